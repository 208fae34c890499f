use std::io;

/// Everything that can go wrong between the raw file and a typed block.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("blob stream truncated at offset {offset}")]
    Truncated { offset: u64 },

    #[error("blob header of {size} bytes at offset {offset} exceeds the 64 KiB limit")]
    HeaderTooLarge { offset: u64, size: u64 },

    #[error("blob at offset {offset} declares an invalid size of {size} bytes")]
    BadDataSize { offset: u64, size: i64 },

    #[error("malformed {what}: {source}")]
    Protobuf {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("blob at offset {offset} uses unsupported compression ({codec})")]
    UnsupportedCompression { offset: u64, codec: &'static str },

    #[error("blob at offset {offset} carries no data")]
    Empty { offset: u64 },

    #[error("zlib inflate failed for blob at offset {offset}: {status}")]
    Inflate { offset: u64, status: String },

    #[error("blob at offset {offset} inflated to {actual} bytes, header declared {declared}")]
    SizeMismatch {
        offset: u64,
        declared: usize,
        actual: usize,
    },

    #[error("string table index {index} out of range ({len} entries)")]
    StringIndex { index: u32, len: usize },

    #[error("element {id} has {keys} keys but {vals} values")]
    TagArity { id: i64, keys: usize, vals: usize },

    #[error("dense nodes disagree in length (ids {ids}, lats {lats}, lons {lons})")]
    DenseArity { ids: usize, lats: usize, lons: usize },

    #[error("node {id} has coordinates outside the representable range")]
    CoordinateRange { id: i64 },

    #[error("blob at offset {offset} has kind {kind:?}, which has no block decoder")]
    UnknownKind { offset: u64, kind: String },
}

pub type Result<T> = std::result::Result<T, BlobError>;

impl BlobError {
    #[inline]
    pub(crate) fn protobuf(what: &'static str, source: prost::DecodeError) -> Self {
        Self::Protobuf { what, source }
    }
}
