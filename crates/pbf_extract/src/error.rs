use std::io;
use std::path::PathBuf;

use pbfblob::BlobError;

/// Run-terminating failures, one variant per phase. There is no recovery:
/// every variant ends the run with [`ExtractError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unable to open input {}: {source}", path.display())]
    OpenInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("blob header read error: {0}")]
    BlobHeader(#[source] BlobError),

    #[error("unable to create output {}: {source}", path.display())]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("output write error: {0}")]
    WriteOutput(#[from] io::Error),

    #[error("OSMHeader decode error: {0}")]
    HeaderDecode(#[source] BlobError),

    #[error("unsupported feature required in OSM header: {0}")]
    UnsupportedFeature(String),

    #[error("OSMData decode error: {0}")]
    DataDecode(#[source] BlobError),

    #[error("{pass}: {completed} blobs completed, pre-scan counted {expected}")]
    BlobCountMismatch {
        pass: &'static str,
        completed: usize,
        expected: usize,
    },

    #[error("{0}: a worker stopped without reporting")]
    WorkerLost(&'static str),

    #[error("{0}: result sink closed early")]
    SinkClosed(&'static str),
}

impl ExtractError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExtractError::OpenInput { .. } => 1,
            ExtractError::BlobHeader(_) => 2,
            ExtractError::OpenOutput { .. } => 3,
            ExtractError::WriteOutput(_) => 4,
            ExtractError::HeaderDecode(_) | ExtractError::UnsupportedFeature(_) => 5,
            ExtractError::DataDecode(_) => 6,
            ExtractError::BlobCountMismatch { .. }
            | ExtractError::WorkerLost(_)
            | ExtractError::SinkClosed(_) => 7,
        }
    }
}
