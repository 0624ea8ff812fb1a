//! Virtual files served to the patch host over the message channel.
//!
//! Clients register named content providers; the server reads chunks with
//! `req_file_read` requests in any order until the file is removed or the
//! connection goes away. The registry is control-thread only.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use patchbay_core::{Error, Result};

/// Byte-range access to one virtual file.
pub trait ContentProvider: Send + Sync {
    fn size(&self) -> u64;

    /// Read `length` bytes at `offset`. Short reads at end-of-file are
    /// fine; reads past the end return an empty chunk.
    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>>;
}

/// A provider backed by an in-memory byte buffer.
pub struct InMemoryContent {
    bytes: Vec<u8>,
}

impl InMemoryContent {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl ContentProvider for InMemoryContent {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let start = usize::try_from(offset)
            .map_err(|_| Error::FileRead("offset out of range".into()))?;
        if start >= self.bytes.len() {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(length).min(self.bytes.len());
        Ok(self.bytes[start..end].to_vec())
    }
}

/// Name → provider mapping for one session.
#[derive(Default)]
pub struct VirtualFileRegistry {
    files: Mutex<HashMap<String, Arc<dyn ContentProvider>>>,
}

impl VirtualFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under an exact name, replacing any previous provider.
    pub fn register(&self, name: &str, provider: Arc<dyn ContentProvider>) {
        self.files.lock().insert(name.to_string(), provider);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ContentProvider>> {
        self.files.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }

    pub fn clear(&self) {
        self.files.lock().clear();
    }
}
