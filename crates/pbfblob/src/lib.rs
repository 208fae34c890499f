//! pbfblob: sequential blob reader and decoder for OSM PBF containers.
//!
//! - `framing`: length-prefixed blob stream, pre-scan counting, re-openable sources.
//! - `decode`: raw/zlib inflate, typed header/data blocks, offset-keyed cache.
//! - `primitive`: delta-coded refs, way tags, node coordinates in degrees.
//! - `write`: small encoder used to produce fixtures.
//!
//! Container layout (big-endian prefix, protobuf bodies):
//!   u32 header_len | BlobHeader | Blob
//!   BlobHeader.type is "OSMHeader" (one per file, first) or "OSMData".
//!   Blob carries either `raw` bytes or `zlib_data` plus `raw_size`.

pub mod decode;
pub mod error;
pub mod framing;
pub mod primitive;
pub mod proto;
pub mod write;

pub use decode::{inflate, BlobCache, BlobDecoder, DecodedBlock};
pub use error::{BlobError, Result};
pub use framing::{BlobKind, BlobReader, BlobSource, PbfFile, RawBlob};
pub use primitive::{delta_decode, delta_encode, CoordScale, DeltaDecoder, Point, WayRef};
pub use proto::{HeaderBlock, PrimitiveBlock};
