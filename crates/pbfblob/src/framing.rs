//! Sequential blob framing.
//!
//! Layout of every blob (big-endian length prefix, protobuf bodies):
//!   u32         header_len
//!   [header_len] BlobHeader { type, indexdata?, datasize }
//!   [datasize]   Blob       { raw | zlib_data | ..., raw_size? }

use std::fs::File;
use std::io::{self, BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use prost::Message;

use crate::error::{BlobError, Result};
use crate::proto::BlobHeader;

/// The container caps a `BlobHeader` at 64 KiB.
pub const MAX_HEADER_SIZE: u32 = 64 * 1024;

/// The container caps a `Blob` at 32 MiB.
pub const MAX_BLOB_SIZE: i32 = 32 * 1024 * 1024;

pub const OSM_HEADER: &str = "OSMHeader";
pub const OSM_DATA: &str = "OSMData";

/// What a blob claims to contain, from its header's `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Header,
    Data,
    Other(String),
}

impl BlobKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            OSM_HEADER => BlobKind::Header,
            OSM_DATA => BlobKind::Data,
            other => BlobKind::Other(other.to_owned()),
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            BlobKind::Header => OSM_HEADER,
            BlobKind::Data => OSM_DATA,
            BlobKind::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for BlobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// One framed blob, still compressed.
#[derive(Debug, Clone)]
pub struct RawBlob {
    pub kind: BlobKind,
    /// Absolute file offset of the payload; stable across passes.
    pub offset: u64,
    pub payload: Bytes,
}

impl RawBlob {
    #[inline]
    pub fn compressed_size(&self) -> usize {
        self.payload.len()
    }
}

/// Lazy, fused iterator over the blobs of a container, in file order.
pub struct BlobReader<R> {
    reader: R,
    position: u64,
    done: bool,
}

impl<R: Read> BlobReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: 0,
            done: false,
        }
    }

    /// Byte position of the next length prefix.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reads the next header; `Ok(None)` on a clean end of file.
    fn next_header(&mut self) -> Result<Option<BlobHeader>> {
        let blob_start = self.position;

        let header_len = match read_prefix(&mut self.reader, blob_start)? {
            Some(len) => len,
            None => return Ok(None),
        };
        if header_len > MAX_HEADER_SIZE {
            return Err(BlobError::HeaderTooLarge {
                offset: blob_start,
                size: header_len as u64,
            });
        }
        self.position += 4;

        let mut buf = vec![0u8; header_len as usize];
        read_exact_at(&mut self.reader, &mut buf, self.position)?;
        self.position += header_len as u64;

        let header = BlobHeader::decode(buf.as_slice())
            .map_err(|e| BlobError::protobuf("BlobHeader", e))?;

        if header.datasize < 0 || header.datasize > MAX_BLOB_SIZE {
            return Err(BlobError::BadDataSize {
                offset: blob_start,
                size: header.datasize as i64,
            });
        }

        Ok(Some(header))
    }

    fn read_blob(&mut self) -> Result<Option<RawBlob>> {
        let header = match self.next_header()? {
            Some(h) => h,
            None => return Ok(None),
        };

        let offset = self.position;
        let mut payload = vec![0u8; header.datasize as usize];
        read_exact_at(&mut self.reader, &mut payload, offset)?;
        self.position += payload.len() as u64;

        Ok(Some(RawBlob {
            kind: BlobKind::from_tag(&header.r#type),
            offset,
            payload: Bytes::from(payload),
        }))
    }
}

impl<R: Read + Seek> BlobReader<R> {
    /// Pre-scan: walks every header and seeks over the payloads.
    pub fn count_remaining(mut self) -> Result<usize> {
        let mut count = 0usize;

        while let Some(header) = self.next_header()? {
            let skip = header.datasize as i64;
            self.reader.seek(SeekFrom::Current(skip))?;
            self.position += skip as u64;
            count += 1;
        }

        Ok(count)
    }
}

impl<R: Read> Iterator for BlobReader<R> {
    type Item = Result<RawBlob>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_blob() {
            Ok(Some(blob)) => Some(Ok(blob)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads the 4-byte length prefix, telling a clean EOF apart from a torn one.
fn read_prefix<R: Read>(reader: &mut R, offset: u64) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0usize;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match filled {
        0 => Ok(None),
        4 => Ok(Some(u32::from_be_bytes(buf))),
        _ => Err(BlobError::Truncated { offset }),
    }
}

fn read_exact_at<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            BlobError::Truncated { offset }
        } else {
            BlobError::Io(e)
        }
    })
}

/// A re-openable container. Every pass asks for a fresh reader from offset 0.
pub trait BlobSource: Sync {
    type Reader: Read + Seek + Send;

    fn open(&self) -> io::Result<Self::Reader>;

    /// Where the container lives, for error messages.
    fn location(&self) -> PathBuf {
        PathBuf::from("<memory>")
    }

    fn blobs(&self) -> io::Result<BlobReader<Self::Reader>> {
        Ok(BlobReader::new(self.open()?))
    }

    fn count_blobs(&self) -> Result<usize> {
        BlobReader::new(self.open()?).count_remaining()
    }
}

/// A container on disk.
#[derive(Debug, Clone)]
pub struct PbfFile {
    path: PathBuf,
}

impl PbfFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl BlobSource for PbfFile {
    type Reader = BufReader<File>;

    fn open(&self) -> io::Result<Self::Reader> {
        Ok(BufReader::with_capacity(1 << 20, File::open(&self.path)?))
    }

    fn location(&self) -> PathBuf {
        self.path.clone()
    }
}

/// An in-memory container.
impl BlobSource for Bytes {
    type Reader = Cursor<Bytes>;

    fn open(&self) -> io::Result<Self::Reader> {
        Ok(Cursor::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::HeaderBlock;
    use crate::write::{BlobWriter, BlockBuilder, Compression};

    fn sample_container() -> Bytes {
        let mut writer = BlobWriter::new(Vec::new(), Compression::Zlib);
        writer.write_header(&HeaderBlock::default()).unwrap();
        for i in 0..3 {
            let block = BlockBuilder::new()
                .way(i, &[("highway", "primary")], &[1, 2, 3])
                .build();
            writer.write_block(&block).unwrap();
        }
        Bytes::from(writer.into_inner())
    }

    #[test]
    fn yields_blobs_in_file_order() {
        let container = sample_container();
        let kinds: Vec<BlobKind> = container
            .blobs()
            .unwrap()
            .map(|b| b.unwrap().kind)
            .collect();

        assert_eq!(
            kinds,
            vec![BlobKind::Header, BlobKind::Data, BlobKind::Data, BlobKind::Data]
        );
    }

    #[test]
    fn offsets_point_at_payloads() {
        let container = sample_container();
        let mut reader = container.blobs().unwrap();
        let mut last = 0u64;
        while let Some(blob) = reader.next() {
            let blob = blob.unwrap();
            assert!(blob.offset > last);
            let start = blob.offset as usize;
            assert_eq!(&container[start..start + blob.compressed_size()], &blob.payload[..]);
            assert_eq!(reader.position(), (start + blob.compressed_size()) as u64);
            last = blob.offset;
        }
        assert_eq!(reader.position(), container.len() as u64);
    }

    #[test]
    fn pre_scan_counts_every_blob() {
        assert_eq!(sample_container().count_blobs().unwrap(), 4);
        assert_eq!(Bytes::new().count_blobs().unwrap(), 0);
    }

    #[test]
    fn empty_input_is_a_clean_end() {
        assert!(Bytes::new().blobs().unwrap().next().is_none());
    }

    #[test]
    fn torn_payload_is_fatal_and_fuses() {
        let container = sample_container();
        let torn = container.slice(..container.len() - 3);
        let mut blobs = torn.blobs().unwrap();

        let results: Vec<_> = blobs.by_ref().collect();
        assert_eq!(results.len(), 4);
        assert!(results[..3].iter().all(|r| r.is_ok()));
        assert!(matches!(results[3], Err(BlobError::Truncated { .. })));
        assert!(blobs.next().is_none());
    }

    #[test]
    fn torn_length_prefix_is_fatal() {
        let container = Bytes::from_static(&[0, 0]);
        let first = container.blobs().unwrap().next().unwrap();
        assert!(matches!(first, Err(BlobError::Truncated { .. })));
    }

    #[test]
    fn oversized_header_is_rejected() {
        let container = Bytes::from((MAX_HEADER_SIZE + 1).to_be_bytes().to_vec());
        assert!(matches!(
            container.count_blobs(),
            Err(BlobError::HeaderTooLarge { .. })
        ));
    }

    #[test]
    fn unknown_kinds_are_kept_verbatim() {
        let mut writer = BlobWriter::new(Vec::new(), Compression::Raw);
        writer.write_blob("OSMIndex", b"opaque").unwrap();
        let container = Bytes::from(writer.into_inner());

        let blob = container.blobs().unwrap().next().unwrap().unwrap();
        assert_eq!(blob.kind, BlobKind::Other("OSMIndex".into()));
        assert_eq!(blob.kind.to_string(), "OSMIndex");
    }
}
