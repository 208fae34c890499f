use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_ROAD_TYPES: &str = "motorway motorway_link trunk trunk_link primary \
primary_link secondary secondary_link tertiary tertiary_link";

/// `pbf_extract` - pull matching ways and the nodes they reference out of an
/// OSM PBF file.
///
/// Runs three passes over the input: header check, way discovery (writes the
/// ways table and collects referenced node ids), node extraction (writes the
/// nodes table).
#[derive(Parser, Debug, Clone)]
#[command(name = "pbf_extract", version, about, long_about = None)]
pub struct Config {
    /// Input OSM PBF file.
    #[arg(short = 'i', long = "input", default_value = "input.pbf.osm")]
    pub input: PathBuf,

    /// Keep every inflated blob in memory so later passes skip decompression.
    #[arg(long = "high-memory", default_value_t = false)]
    pub high_memory: bool,

    /// Tag key a way must carry to be extracted.
    #[arg(short = 't', long = "tag", default_value = "highway")]
    pub tag: String,

    /// Space separated values of interest for `--tag`.
    ///
    /// Logged for reference; matching is on the key alone.
    #[arg(short = 'r', long = "road-types", default_value = DEFAULT_ROAD_TYPES)]
    pub road_types: String,

    /// Output table for matched ways.
    #[arg(long = "ways-out", default_value = "ways.csv")]
    pub ways_out: PathBuf,

    /// Output table for referenced nodes.
    #[arg(long = "nodes-out", default_value = "nodes.csv")]
    pub nodes_out: PathBuf,

    /// Worker threads per pass. Defaults to twice the available parallelism.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Flush output tables every N records.
    #[arg(long, default_value_t = 1000)]
    pub flush_every: usize,

    /// Log a progress line every N completed blobs.
    #[arg(long, default_value_t = 500)]
    pub progress_every: usize,
}

impl Config {
    pub fn filter_values(&self) -> Vec<String> {
        self.road_types
            .split_whitespace()
            .map(str::to_owned)
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.filter(|&n| n > 0).unwrap_or_else(default_worker_count)
    }
}

/// Two workers per hardware thread.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}
