//! Run orchestration: pre-scan, optional cache, three passes, two tables.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use log::info;
use pbfblob::{BlobCache, BlobDecoder, BlobReader, BlobSource, PbfFile};

use crate::config::Config;
use crate::error::ExtractError;
use crate::filter::WayFilter;
use crate::passes::{HeaderSummary, PassContext};
use crate::pool::{PassStats, WorkerPool};
use crate::sink::TableWriter;

/// Knobs of one run, independent of where the input comes from.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub workers: usize,
    pub high_memory: bool,
    pub flush_every: usize,
    pub progress_every: usize,
}

impl From<&Config> for ExtractOptions {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.worker_count(),
            high_memory: config.high_memory,
            flush_every: config.flush_every,
            progress_every: config.progress_every,
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct Summary {
    pub total_blobs: usize,
    pub headers: Vec<HeaderSummary>,
    pub matched_ways: u64,
    pub nodes_of_interest: usize,
    pub nodes_written: u64,
    pub cached_blobs: usize,
    pub passes: [PassStats; 3],
}

pub struct Extractor<'a, S: BlobSource> {
    source: &'a S,
    options: ExtractOptions,
}

impl<'a, S: BlobSource> Extractor<'a, S> {
    pub fn new(source: &'a S, options: ExtractOptions) -> Self {
        Self { source, options }
    }

    /// Runs the three passes. Output sinks are opened lazily, each just before
    /// the pass that fills it, so a header that fails pass 1 leaves no files
    /// behind.
    pub fn run<WW, WN, OW, ON>(
        &self,
        filter: &WayFilter,
        open_ways: OW,
        open_nodes: ON,
    ) -> Result<(Summary, WW, WN), ExtractError>
    where
        WW: Write + Send,
        WN: Write + Send,
        OW: FnOnce() -> Result<WW, ExtractError>,
        ON: FnOnce() -> Result<WN, ExtractError>,
    {
        let reader = self.source.open().map_err(|source| ExtractError::OpenInput {
            path: self.source.location(),
            source,
        })?;
        let total_blobs = BlobReader::new(reader)
            .count_remaining()
            .map_err(ExtractError::BlobHeader)?;
        info!("Total number of blobs: {total_blobs}");

        let cache = self
            .options
            .high_memory
            .then(|| BlobCache::with_capacity(total_blobs));
        if cache.is_some() {
            info!("High-memory mode: inflated blobs are kept for later passes");
        }

        let ctx = PassContext {
            source: self.source,
            pool: WorkerPool::new(self.options.workers, self.options.progress_every),
            decoder: BlobDecoder::new(cache.as_ref()),
            total_blobs,
        };
        info!("Using {} workers per pass", ctx.pool.workers());

        let (headers, schema) = ctx.check_schema()?;

        let mut ways = TableWriter::new(open_ways()?, self.options.flush_every);
        let (wanted, way_stats) = ctx.find_ways(filter, &mut ways)?;
        let ways = ways.finish()?;
        info!("{} matching ways found", way_stats.records);
        info!("{} nodes of interest", wanted.len());

        let mut nodes = TableWriter::new(open_nodes()?, self.options.flush_every);
        let node_stats = ctx.find_nodes(&wanted, &mut nodes)?;
        let nodes = nodes.finish()?;
        info!("{} nodes written", node_stats.records);
        if let Some(cache) = &cache {
            info!(
                "Blob cache held {} blobs, {:.1} MiB inflated",
                cache.len(),
                cache.resident_bytes() as f64 / (1024.0 * 1024.0)
            );
        }

        let summary = Summary {
            total_blobs,
            headers,
            matched_ways: way_stats.records,
            nodes_of_interest: wanted.len(),
            nodes_written: node_stats.records,
            cached_blobs: cache.as_ref().map_or(0, BlobCache::len),
            passes: [schema, way_stats, node_stats],
        };

        Ok((summary, ways, nodes))
    }
}

fn create(path: &Path) -> Result<File, ExtractError> {
    File::create(path).map_err(|source| ExtractError::OpenOutput {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs the extraction described by `config` against files on disk.
pub fn run(config: &Config) -> Result<Summary, ExtractError> {
    let start = Instant::now();
    let filter = WayFilter::new(config.tag.clone(), config.filter_values());
    info!("Will find {} for {:?}", filter.key, filter.values);

    let input = PbfFile::new(&config.input);
    let (summary, _, _) = Extractor::new(&input, ExtractOptions::from(config))
        .run(
            &filter,
            || create(&config.ways_out),
            || create(&config.nodes_out),
        )?;

    info!(
        "Done: {} ways to {}, {} nodes to {} in {:.2}s",
        summary.matched_ways,
        config.ways_out.display(),
        summary.nodes_written,
        config.nodes_out.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(summary)
}
