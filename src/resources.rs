//! Viewable resources: in-memory document bytes behind releasable handles.
//!
//! A topic registers the bytes of every uploaded file so a citation can
//! later be opened on its page. Handles are owned by the topic that created
//! them and are released explicitly on replace, reset and shutdown; nothing
//! here is ever persisted, so a restarted process starts with an empty pool.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Opaque reference to bytes held by a [`ResourcePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(Uuid);

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource:{}", self.0)
    }
}

struct Entry {
    file_name: String,
    bytes: Arc<[u8]>,
}

/// Shared registry of viewable bytes. Cloning shares the same pool.
#[derive(Clone, Default)]
pub struct ResourcePool {
    entries: Arc<Mutex<HashMap<ResourceHandle, Entry>>>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, file_name: &str, bytes: Vec<u8>) -> ResourceHandle {
        let handle = ResourceHandle(Uuid::new_v4());
        self.entries.lock().unwrap().insert(
            handle,
            Entry {
                file_name: file_name.to_string(),
                bytes: Arc::from(bytes),
            },
        );
        tracing::debug!(%handle, file_name, "registered viewable resource");
        handle
    }

    /// Bytes behind a live handle; `None` once released.
    pub fn bytes(&self, handle: ResourceHandle) -> Option<Arc<[u8]>> {
        self.entries
            .lock()
            .unwrap()
            .get(&handle)
            .map(|entry| Arc::clone(&entry.bytes))
    }

    /// Returns `false` when the handle was already released.
    pub fn release(&self, handle: ResourceHandle) -> bool {
        let removed = self.entries.lock().unwrap().remove(&handle);
        if let Some(entry) = &removed {
            tracing::debug!(%handle, file_name = %entry.file_name, "released viewable resource");
        }
        removed.is_some()
    }

    /// Number of handles registered and not yet released.
    pub fn outstanding(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
