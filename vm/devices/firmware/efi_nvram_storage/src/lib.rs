// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Persistence of the flash-backed EFI NVRAM region.
//!
//! The NVRAM region is persisted as a single opaque byte blob. Where the blob
//! lives is abstracted by [`ByteStore`], keyed by a `(namespace, key)` pair so
//! that stores shared with other devices can keep their items apart.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod file;
pub mod in_memory;

use thiserror::Error;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "efi";
/// Key used when none is configured.
pub const DEFAULT_KEY: &str = "nvram";

/// Error when accessing a [`ByteStore`]
#[derive(Error, Debug)]
#[error("error accessing byte store")]
pub struct ByteStoreError(#[from] anyhow::Error);

impl ByteStoreError {
    /// Create a new [`ByteStoreError`]
    pub fn new(e: impl Into<anyhow::Error>) -> ByteStoreError {
        Self(e.into())
    }
}

/// Host storage for opaque byte blobs.
pub trait ByteStore: Send {
    /// Returns the size of the stored item, or `None` if it was never
    /// written.
    fn query_size(&self, namespace: &str, key: &str) -> Result<Option<u64>, ByteStoreError>;

    /// Reads the whole item. Returns `None` if it was never written.
    fn load_all(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ByteStoreError>;

    /// Replaces the item with `data`.
    fn write_all(&mut self, namespace: &str, key: &str, data: &[u8])
    -> Result<(), ByteStoreError>;
}

// Boilerplate: forward `ByteStore` methods for `Box<dyn ByteStore>`
impl ByteStore for Box<dyn ByteStore> {
    fn query_size(&self, namespace: &str, key: &str) -> Result<Option<u64>, ByteStoreError> {
        (**self).query_size(namespace, key)
    }

    fn load_all(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ByteStoreError> {
        (**self).load_all(namespace, key)
    }

    fn write_all(
        &mut self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> Result<(), ByteStoreError> {
        (**self).write_all(namespace, key, data)
    }
}

// Boilerplate: forward `ByteStore` methods for `&mut ByteStore`
impl<T> ByteStore for &mut T
where
    T: ByteStore,
{
    fn query_size(&self, namespace: &str, key: &str) -> Result<Option<u64>, ByteStoreError> {
        (**self).query_size(namespace, key)
    }

    fn load_all(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ByteStoreError> {
        (**self).load_all(namespace, key)
    }

    fn write_all(
        &mut self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> Result<(), ByteStoreError> {
        (**self).write_all(namespace, key, data)
    }
}

/// Errors from [`NvramPersistence`].
#[derive(Debug, Error)]
pub enum NvramPersistError {
    /// The store failed while reading.
    #[error("failed to load nvram from {namespace}/{key}")]
    Load {
        /// Store namespace.
        namespace: String,
        /// Store key.
        key: String,
        /// Underlying store error.
        #[source]
        source: ByteStoreError,
    },
    /// The store failed while writing.
    #[error("failed to save nvram to {namespace}/{key}")]
    Save {
        /// Store namespace.
        namespace: String,
        /// Store key.
        key: String,
        /// Underlying store error.
        #[source]
        source: ByteStoreError,
    },
    /// The store returned a different amount of data than it reported.
    #[error("nvram store reported {reported} bytes but returned {actual}")]
    Inconsistent {
        /// Size from [`ByteStore::query_size`].
        reported: u64,
        /// Length of the data from [`ByteStore::load_all`].
        actual: usize,
    },
}

/// Loads and saves the NVRAM blob at a fixed location in a [`ByteStore`].
pub struct NvramPersistence {
    store: Box<dyn ByteStore>,
    namespace: String,
    key: String,
}

impl std::fmt::Debug for NvramPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvramPersistence")
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl NvramPersistence {
    /// Persists to `store` under the default namespace and key.
    pub fn new(store: Box<dyn ByteStore>) -> Self {
        Self::with_location(store, DEFAULT_NAMESPACE, DEFAULT_KEY)
    }

    /// Persists to `store` under `namespace`/`key`.
    pub fn with_location(
        store: Box<dyn ByteStore>,
        namespace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// The namespace items are stored under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The key items are stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the previously persisted NVRAM, or `None` if nothing was
    /// ever saved.
    pub fn load(&self) -> Result<Option<Vec<u8>>, NvramPersistError> {
        let load_err = |source| NvramPersistError::Load {
            namespace: self.namespace.clone(),
            key: self.key.clone(),
            source,
        };

        let Some(reported) = self
            .store
            .query_size(&self.namespace, &self.key)
            .map_err(load_err)?
        else {
            tracing::debug!(namespace = %self.namespace, key = %self.key, "no persisted nvram");
            return Ok(None);
        };

        let Some(data) = self
            .store
            .load_all(&self.namespace, &self.key)
            .map_err(load_err)?
        else {
            // Removed between the two calls.
            return Ok(None);
        };

        if data.len() as u64 != reported {
            return Err(NvramPersistError::Inconsistent {
                reported,
                actual: data.len(),
            });
        }

        tracing::debug!(
            namespace = %self.namespace,
            key = %self.key,
            len = data.len(),
            "loaded persisted nvram"
        );
        Ok(Some(data))
    }

    /// Overwrites the persisted NVRAM with `data`.
    pub fn save(&mut self, data: &[u8]) -> Result<(), NvramPersistError> {
        self.store
            .write_all(&self.namespace, &self.key, data)
            .map_err(|source| NvramPersistError::Save {
                namespace: self.namespace.clone(),
                key: self.key.clone(),
                source,
            })?;
        tracing::trace!(
            namespace = %self.namespace,
            key = %self.key,
            len = data.len(),
            "saved nvram"
        );
        Ok(())
    }
}
