//! Blob decompression and deserialisation, with an optional run-wide cache
//! of inflated payloads keyed by file offset.

use bytes::Bytes;
use dashmap::DashMap;
use prost::Message;

use crate::error::{BlobError, Result};
use crate::framing::{BlobKind, RawBlob, MAX_BLOB_SIZE};
use crate::proto::{Blob, HeaderBlock, PrimitiveBlock};

/// A decoded blob, owned by whoever decoded it.
#[derive(Debug, Clone)]
pub enum DecodedBlock {
    Header(HeaderBlock),
    Data(PrimitiveBlock),
}

/// Inflated payloads keyed by file offset. Insert-only: an entry, once
/// present, is never replaced or removed.
#[derive(Debug, Default)]
pub struct BlobCache {
    entries: DashMap<u64, Bytes>,
}

impl BlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
        }
    }

    pub fn get(&self, offset: u64) -> Option<Bytes> {
        self.entries.get(&offset).map(|entry| entry.value().clone())
    }

    /// Returns the cached bytes for `offset`, computing and inserting them on
    /// a miss. If two callers race on the same key the first insert wins and
    /// both get that value.
    pub fn get_or_try_insert_with<F>(&self, offset: u64, f: F) -> Result<Bytes>
    where
        F: FnOnce() -> Result<Bytes>,
    {
        if let Some(hit) = self.get(offset) {
            return Ok(hit);
        }

        let fresh = f()?;
        let entry = self.entries.entry(offset).or_insert(fresh);
        Ok(entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total inflated bytes held.
    pub fn resident_bytes(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }
}

/// Turns raw blobs into typed blocks. Cheap to copy; share one per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobDecoder<'a> {
    cache: Option<&'a BlobCache>,
}

impl<'a> BlobDecoder<'a> {
    pub fn new(cache: Option<&'a BlobCache>) -> Self {
        Self { cache }
    }

    pub fn uncached() -> Self {
        Self { cache: None }
    }

    /// Inflates the blob, consulting the cache first when one is attached.
    pub fn inflate(&self, blob: &RawBlob) -> Result<Bytes> {
        match self.cache {
            Some(cache) => cache.get_or_try_insert_with(blob.offset, || inflate(blob)),
            None => inflate(blob),
        }
    }

    /// Inflates and deserialises a header or data blob. Other kinds have no
    /// block schema and are rejected before any inflate work.
    pub fn decode(&self, blob: &RawBlob) -> Result<DecodedBlock> {
        if let BlobKind::Other(kind) = &blob.kind {
            return Err(BlobError::UnknownKind {
                offset: blob.offset,
                kind: kind.clone(),
            });
        }
        let bytes = self.inflate(blob)?;

        if blob.kind == BlobKind::Header {
            return HeaderBlock::decode(bytes)
                .map(DecodedBlock::Header)
                .map_err(|e| BlobError::protobuf("HeaderBlock", e));
        }

        let block =
            PrimitiveBlock::decode(bytes).map_err(|e| BlobError::protobuf("PrimitiveBlock", e))?;
        block.validate()?;
        Ok(DecodedBlock::Data(block))
    }
}

/// Pure payload -> bytes step: unwrap the `Blob` message and inflate it.
pub fn inflate(blob: &RawBlob) -> Result<Bytes> {
    let offset = blob.offset;
    let message =
        Blob::decode(blob.payload.clone()).map_err(|e| BlobError::protobuf("Blob", e))?;

    let declared = match message.raw_size {
        Some(size) if size < 0 || size > MAX_BLOB_SIZE => {
            return Err(BlobError::BadDataSize {
                offset,
                size: size as i64,
            })
        }
        Some(size) => Some(size as usize),
        None => None,
    };

    if let Some(raw) = message.raw {
        return Ok(raw);
    }

    if let Some(zlib) = message.zlib_data {
        let limit = declared.unwrap_or(MAX_BLOB_SIZE as usize);
        let out = miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(&zlib, limit)
            .map_err(|e| BlobError::Inflate {
                offset,
                status: format!("{:?}", e.status),
            })?;

        if let Some(declared) = declared {
            if out.len() != declared {
                return Err(BlobError::SizeMismatch {
                    offset,
                    declared,
                    actual: out.len(),
                });
            }
        }

        return Ok(Bytes::from(out));
    }

    let codec = if message.lzma_data.is_some() {
        "lzma"
    } else if message.lz4_data.is_some() {
        "lz4"
    } else if message.zstd_data.is_some() {
        "zstd"
    } else if message.obsolete_bzip2_data.is_some() {
        "bzip2"
    } else {
        return Err(BlobError::Empty { offset });
    };

    Err(BlobError::UnsupportedCompression { offset, codec })
}
