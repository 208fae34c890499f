//! pbf_extract: three-pass extraction of tagged ways and the nodes they
//! reference from an OSM PBF container.
//!
//! - Pass 1 checks that every header only requires supported features.
//! - Pass 2 writes matching ways and collects the node ids they reference.
//! - Pass 3 writes the coordinates of exactly those nodes.
//!
//! Each pass streams every blob through a worker pool; one sink thread owns
//! the output table of the pass.

pub mod barrier;
pub mod config;
pub mod error;
pub mod extract;
pub mod filter;
pub mod nodeset;
pub mod passes;
pub mod pool;
pub mod progress;
pub mod sink;

pub use config::Config;
pub use error::ExtractError;
pub use extract::{run, ExtractOptions, Extractor, Summary};
pub use filter::{MatchedWay, WayFilter};
pub use nodeset::NodeIdSet;
pub use passes::{HeaderSummary, PassContext, SUPPORTED_FEATURES};
pub use pool::{PassStats, WorkerPool};
pub use sink::{Sink, TableWriter};
