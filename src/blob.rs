//! Binary content sink
//!
//! Builders hand byte streams to a [`BlobStore`] and embed the returned
//! [`Blob`] reference as a BINARY property value. The in-memory store is
//! content-addressed by FNV-1a, so identical content is stored once.
//!
//! Author: Moroya Sakamoto

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use parking_lot::RwLock;

/// Opaque reference to stored binary content
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Blob {
    id: String,
    length: u64,
}

impl Blob {
    pub fn new(id: String, length: u64) -> Self {
        Self { id, length }
    }

    /// Content identifier assigned by the sink
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Content length in bytes
    pub fn length(&self) -> u64 {
        self.length
    }
}

/// Sink for binary property content
pub trait BlobStore: Send + Sync {
    /// Consume `reader` to its end and store the bytes.
    /// Read failures are returned unchanged.
    fn write_blob(&self, reader: &mut dyn Read) -> std::io::Result<Blob>;

    /// Fetch content previously written, if still held
    fn read_blob(&self, blob: &Blob) -> Option<Arc<[u8]>>;
}

/// FNV-1a 64-bit content hash
pub fn content_hash(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// Content-addressed in-memory blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Store `data` under `id`, or under the first free `id-N` when `id`
    /// already holds different bytes. Returns the id actually used.
    fn insert(&self, id: String, data: Arc<[u8]>) -> String {
        let mut blobs = self.blobs.write();
        let mut candidate = id.clone();
        let mut suffix = 0u32;
        loop {
            match blobs.get(&candidate) {
                None => {
                    blobs.insert(candidate.clone(), data);
                    return candidate;
                }
                Some(existing) if existing[..] == data[..] => return candidate,
                Some(_) => {
                    suffix += 1;
                    candidate = format!("{id}-{suffix}");
                }
            }
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn write_blob(&self, reader: &mut dyn Read) -> std::io::Result<Blob> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        // Length is part of the id to keep colliding hashes of different sizes apart
        let id = format!("{:016x}-{}", content_hash(&data), data.len());
        let length = data.len() as u64;
        let id = self.insert(id, Arc::from(data));
        Ok(Blob::new(id, length))
    }

    fn read_blob(&self, blob: &Blob) -> Option<Arc<[u8]>> {
        self.blobs.read().get(blob.id()).cloned()
    }
}
