//! The three passes over the container.

use std::io::Write;
use std::panic;
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use log::info;
use pbfblob::{BlobDecoder, BlobKind, BlobReader, BlobSource, DecodedBlock, HeaderBlock, Point};

use crate::error::ExtractError;
use crate::filter::{MatchedWay, WayFilter};
use crate::nodeset::{collect_node_ids, Aggregate, NodeIdSet};
use crate::pool::{Pass, PassStats, WorkerPool};
use crate::sink::{Sink, TableWriter};

/// Required header features this reader understands.
pub const SUPPORTED_FEATURES: [&str; 2] = ["OsmSchema-V0.6", "DenseNodes"];

const SCHEMA_PASS: &str = "Pass 1/3";
const WAYS_PASS: &str = "Pass 2/3";
const NODES_PASS: &str = "Pass 3/3";

/// What pass 1 learned from an `OSMHeader` blob.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderSummary {
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    pub writing_program: Option<String>,
    /// left, bottom, right, top in degrees.
    pub bbox: Option<[f64; 4]>,
}

/// Rejects headers that need a feature outside [`SUPPORTED_FEATURES`].
pub fn check_header(header: &HeaderBlock) -> Result<HeaderSummary, ExtractError> {
    if let Some(feature) = header
        .required_features
        .iter()
        .find(|f| !SUPPORTED_FEATURES.contains(&f.as_str()))
    {
        return Err(ExtractError::UnsupportedFeature(feature.clone()));
    }

    Ok(HeaderSummary {
        required_features: header.required_features.clone(),
        optional_features: header.optional_features.clone(),
        writing_program: header.writingprogram.clone(),
        bbox: header.bbox.as_ref().map(|b| {
            [b.left, b.bottom, b.right, b.top].map(|nano| nano as f64 * 1e-9)
        }),
    })
}

/// Pass 1 sink: logs and keeps every header seen.
#[derive(Debug, Default)]
struct HeaderLog {
    headers: Vec<HeaderSummary>,
}

impl Sink<HeaderSummary> for HeaderLog {
    fn accept(&mut self, header: HeaderSummary) -> Result<(), ExtractError> {
        info!(
            "OSM header: required {:?}, optional {:?}, written by {}",
            header.required_features,
            header.optional_features,
            header.writing_program.as_deref().unwrap_or("unknown")
        );
        if let Some([left, bottom, right, top]) = header.bbox {
            info!("OSM header: bbox lon {left:.6}..{right:.6}, lat {bottom:.6}..{top:.6}");
        }
        self.headers.push(header);
        Ok(())
    }
}

/// Everything a pass needs besides its work function and sink.
pub struct PassContext<'a, S: BlobSource> {
    pub source: &'a S,
    pub pool: WorkerPool,
    pub decoder: BlobDecoder<'a>,
    pub total_blobs: usize,
}

impl<'a, S: BlobSource> PassContext<'a, S> {
    fn open(&self) -> Result<BlobReader<S::Reader>, ExtractError> {
        self.source.blobs().map_err(|source| ExtractError::OpenInput {
            path: self.source.location(),
            source,
        })
    }

    fn pass(&self, name: &'static str, wanted: BlobKind) -> Pass<'a> {
        Pass {
            name,
            wanted,
            total_blobs: self.total_blobs,
            decoder: self.decoder,
        }
    }

    /// Pass 1: every header must only require supported features.
    pub fn check_schema(&self) -> Result<(Vec<HeaderSummary>, PassStats), ExtractError> {
        info!("{SCHEMA_PASS}: checking header blocks");
        let pass = self.pass(SCHEMA_PASS, BlobKind::Header);
        let mut log = HeaderLog::default();

        let stats = self.pool.run(
            &pass,
            self.open()?,
            |block, records: &Sender<HeaderSummary>| {
                if let DecodedBlock::Header(header) = block {
                    records
                        .send(check_header(&header)?)
                        .map_err(|_| ExtractError::SinkClosed(SCHEMA_PASS))?;
                }
                Ok(())
            },
            &mut log,
            || {},
        )?;

        Ok((log.headers, stats))
    }

    /// Pass 2: writes every matching way and collects the node ids they
    /// reference. The id set is complete once every blob has completed.
    pub fn find_ways<W: Write + Send>(
        &self,
        filter: &WayFilter,
        out: &mut TableWriter<W>,
    ) -> Result<(NodeIdSet, PassStats), ExtractError> {
        info!("{WAYS_PASS}: finding ways with key {:?}", filter.key);
        let pass = self.pass(WAYS_PASS, BlobKind::Data);
        let blobs = self.open()?;
        let (refs_tx, refs_rx) = unbounded::<Aggregate>();

        thread::scope(|s| {
            let aggregator = s.spawn(move || collect_node_ids(refs_rx));

            let stats = self.pool.run(
                &pass,
                blobs,
                |block, records: &Sender<MatchedWay>| {
                    let DecodedBlock::Data(block) = block else {
                        return Ok(());
                    };
                    for way in block.ways() {
                        let Some(matched) = filter.apply(&way) else {
                            continue;
                        };
                        refs_tx
                            .send(Aggregate::Refs(matched.refs.clone()))
                            .map_err(|_| ExtractError::SinkClosed(WAYS_PASS))?;
                        records
                            .send(matched)
                            .map_err(|_| ExtractError::SinkClosed(WAYS_PASS))?;
                    }
                    Ok(())
                },
                out,
                || {
                    let _ = refs_tx.send(Aggregate::Close);
                },
            );
            drop(refs_tx);

            let ids = aggregator.join().unwrap_or_else(|p| panic::resume_unwind(p));
            stats.map(|stats| (ids, stats))
        })
    }

    /// Pass 3: writes every node whose id is in `wanted`.
    pub fn find_nodes<W: Write + Send>(
        &self,
        wanted: &NodeIdSet,
        out: &mut TableWriter<W>,
    ) -> Result<PassStats, ExtractError> {
        info!("{NODES_PASS}: extracting {} nodes", wanted.len());
        let pass = self.pass(NODES_PASS, BlobKind::Data);

        self.pool.run(
            &pass,
            self.open()?,
            |block, records: &Sender<Point>| {
                let DecodedBlock::Data(block) = block else {
                    return Ok(());
                };
                for point in block.points_where(|id| wanted.contains(id)) {
                    records
                        .send(point)
                        .map_err(|_| ExtractError::SinkClosed(NODES_PASS))?;
                }
                Ok(())
            },
            out,
            || {},
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pbfblob::write::{standard_header, BlobWriter, BlockBuilder, Compression};
    use pbfblob::BlobCache;

    /// Header, one block of nodes, one block of ways. Ways 10 and 11 carry
    /// `highway`, way 12 does not; nodes 5 and 6 are only on way 12.
    fn fixture() -> Bytes {
        let nodes = BlockBuilder::new()
            .dense_node(1, 48.85, 2.35)
            .dense_node(2, 48.86, 2.36)
            .dense_node(3, 48.87, 2.37)
            .node(4, 48.88, 2.38)
            .dense_node(5, 0.0, 0.0)
            .dense_node(6, 0.0, 0.0)
            .build();
        let ways = BlockBuilder::new()
            .way(10, &[("highway", "primary"), ("name", "Rue, Haute")], &[1, 2, 3])
            .way(11, &[("highway", "service")], &[3, 4])
            .way(12, &[("building", "yes")], &[5, 6])
            .build();

        let mut out = BlobWriter::new(Vec::new(), Compression::Zlib);
        out.write_header(&standard_header()).unwrap();
        out.write_block(&nodes).unwrap();
        out.write_block(&ways).unwrap();
        Bytes::from(out.into_inner())
    }

    fn highway() -> WayFilter {
        WayFilter::new("highway", vec!["primary".into()])
    }

    fn context<'a>(source: &'a Bytes, cache: Option<&'a BlobCache>) -> PassContext<'a, Bytes> {
        PassContext {
            source,
            pool: WorkerPool::new(3, 100),
            decoder: BlobDecoder::new(cache),
            total_blobs: source.count_blobs().unwrap(),
        }
    }

    fn sorted_lines(table: Vec<u8>) -> Vec<String> {
        let mut lines: Vec<String> = String::from_utf8(table)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect();
        lines.sort();
        lines
    }

    #[test]
    fn header_check_accepts_the_standard_features() {
        let summary = check_header(&standard_header()).unwrap();
        assert_eq!(summary.required_features.len(), 2);
        assert!(summary.writing_program.is_some());
        assert!(summary.bbox.is_none());
    }

    #[test]
    fn header_check_names_the_unknown_feature() {
        let mut header = standard_header();
        header.required_features.push("FutureExtension".into());

        match check_header(&header) {
            Err(ExtractError::UnsupportedFeature(f)) => assert_eq!(f, "FutureExtension"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn three_passes_over_a_small_container() {
        let source = fixture();
        let ctx = context(&source, None);

        let (headers, schema) = ctx.check_schema().unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(schema.blobs_decoded, 1);
        assert_eq!(schema.blobs_completed, 3);

        let mut ways = TableWriter::new(Vec::new(), 10);
        let (ids, stats) = ctx.find_ways(&highway(), &mut ways).unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(
            sorted_lines(ways.finish().unwrap()),
            vec!["10,Rue Haute,,primary,,1,2,3", "11,,,service,,3,4"]
        );

        let mut sorted: Vec<i64> = ids.iter().collect();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3, 4]);

        let mut nodes = TableWriter::new(Vec::new(), 10);
        let stats = ctx.find_nodes(&ids, &mut nodes).unwrap();
        assert_eq!(stats.records, 4);

        let lines = sorted_lines(nodes.finish().unwrap());
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "1,48.850000,2.350000");
        assert_eq!(lines[3], "4,48.880000,2.380000");
    }

    #[test]
    fn cached_and_uncached_passes_agree() {
        let source = fixture();

        let mut plain = TableWriter::new(Vec::new(), 10);
        context(&source, None).find_ways(&highway(), &mut plain).unwrap();
        let expected = sorted_lines(plain.finish().unwrap());

        let cache = BlobCache::new();
        let cached = context(&source, Some(&cache));
        for _ in 0..2 {
            let mut out = TableWriter::new(Vec::new(), 10);
            cached.find_ways(&highway(), &mut out).unwrap();
            assert_eq!(sorted_lines(out.finish().unwrap()), expected);
        }
        assert_eq!(cache.len(), 2);
    }
}
