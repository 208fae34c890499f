//! Minimal container encoder: enough to produce fixtures and small sample
//! files that the reader accepts.

use std::collections::HashMap;
use std::io::{self, Write};

use bytes::Bytes;
use prost::Message;

use crate::framing::{OSM_DATA, OSM_HEADER};
use crate::primitive::{delta_encode, CoordScale};
use crate::proto::{
    Blob, BlobHeader, DenseNodes, HeaderBlock, Node, PrimitiveBlock, PrimitiveGroup, StringTable,
    Way,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Raw,
    Zlib,
}

pub struct BlobWriter<W: Write> {
    out: W,
    compression: Compression,
}

impl<W: Write> BlobWriter<W> {
    pub fn new(out: W, compression: Compression) -> Self {
        Self { out, compression }
    }

    pub fn write_header(&mut self, header: &HeaderBlock) -> io::Result<()> {
        self.write_blob(OSM_HEADER, &header.encode_to_vec())
    }

    pub fn write_block(&mut self, block: &PrimitiveBlock) -> io::Result<()> {
        self.write_blob(OSM_DATA, &block.encode_to_vec())
    }

    /// Frames `data` as one blob of type `kind`.
    pub fn write_blob(&mut self, kind: &str, data: &[u8]) -> io::Result<()> {
        let blob = match self.compression {
            Compression::Raw => Blob {
                raw: Some(Bytes::copy_from_slice(data)),
                ..Default::default()
            },
            Compression::Zlib => Blob {
                raw_size: Some(data.len() as i32),
                zlib_data: Some(Bytes::from(
                    miniz_oxide::deflate::compress_to_vec_zlib(data, 6),
                )),
                ..Default::default()
            },
        };
        let body = blob.encode_to_vec();

        let header = BlobHeader {
            r#type: kind.to_owned(),
            indexdata: None,
            datasize: body.len() as i32,
        }
        .encode_to_vec();

        self.out.write_all(&(header.len() as u32).to_be_bytes())?;
        self.out.write_all(&header)?;
        self.out.write_all(&body)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// The header a well-formed dense-node extract carries.
pub fn standard_header() -> HeaderBlock {
    HeaderBlock {
        required_features: vec!["OsmSchema-V0.6".into(), "DenseNodes".into()],
        writingprogram: Some(concat!("pbfblob ", env!("CARGO_PKG_VERSION")).into()),
        ..Default::default()
    }
}

/// Builds one `PrimitiveBlock`, interning strings as it goes. Dense nodes,
/// plain nodes and ways land in separate groups, in that order.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    strings: Vec<Vec<u8>>,
    index: HashMap<String, u32>,
    scale: CoordScale,
    dense: Vec<(i64, f64, f64)>,
    nodes: Vec<Node>,
    ways: Vec<Way>,
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockBuilder {
    pub fn new() -> Self {
        // Entry 0 is reserved as the empty string / dense-tag delimiter.
        Self {
            strings: vec![Vec::new()],
            index: HashMap::new(),
            scale: CoordScale::default(),
            dense: Vec::new(),
            nodes: Vec::new(),
            ways: Vec::new(),
        }
    }

    pub fn with_scale(mut self, scale: CoordScale) -> Self {
        self.scale = scale;
        self
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.as_bytes().to_vec());
        self.index.insert(s.to_owned(), i);
        i
    }

    pub fn way(mut self, id: i64, tags: &[(&str, &str)], refs: &[i64]) -> Self {
        let (keys, vals): (Vec<u32>, Vec<u32>) = tags
            .iter()
            .map(|(k, v)| (self.intern(k), self.intern(v)))
            .unzip();

        self.ways.push(Way {
            id,
            keys,
            vals,
            refs: delta_encode(refs),
        });
        self
    }

    pub fn dense_node(mut self, id: i64, lat: f64, lon: f64) -> Self {
        self.dense.push((id, lat, lon));
        self
    }

    pub fn node(mut self, id: i64, lat: f64, lon: f64) -> Self {
        self.nodes.push(Node {
            id,
            keys: Vec::new(),
            vals: Vec::new(),
            lat: self.scale.raw_lat(lat),
            lon: self.scale.raw_lon(lon),
        });
        self
    }

    pub fn build(&self) -> PrimitiveBlock {
        let mut groups = Vec::new();

        if !self.dense.is_empty() {
            let ids: Vec<i64> = self.dense.iter().map(|n| n.0).collect();
            let lats: Vec<i64> = self.dense.iter().map(|n| self.scale.raw_lat(n.1)).collect();
            let lons: Vec<i64> = self.dense.iter().map(|n| self.scale.raw_lon(n.2)).collect();

            groups.push(PrimitiveGroup {
                dense: Some(DenseNodes {
                    id: delta_encode(&ids),
                    lat: delta_encode(&lats),
                    lon: delta_encode(&lons),
                    keys_vals: Vec::new(),
                }),
                ..Default::default()
            });
        }

        if !self.nodes.is_empty() {
            groups.push(PrimitiveGroup {
                nodes: self.nodes.clone(),
                ..Default::default()
            });
        }

        if !self.ways.is_empty() {
            groups.push(PrimitiveGroup {
                ways: self.ways.clone(),
                ..Default::default()
            });
        }

        PrimitiveBlock {
            stringtable: StringTable {
                s: self.strings.clone(),
            },
            primitivegroup: groups,
            granularity: Some(self.scale.granularity as i32),
            date_granularity: None,
            lat_offset: Some(self.scale.lat_offset),
            lon_offset: Some(self.scale.lon_offset),
        }
    }
}
