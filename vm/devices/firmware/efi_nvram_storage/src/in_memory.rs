// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Provides an in-memory implementation of [`ByteStore`] that doesn't
//! automatically persist to disk.

use crate::ByteStore;
use crate::ByteStoreError;
use std::collections::BTreeMap;

/// An in-memory implementation of [`ByteStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryByteStore {
    items: BTreeMap<(String, String), Vec<u8>>,
}

impl InMemoryByteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the item stored under `namespace`/`key`, if any.
    pub fn get(&self, namespace: &str, key: &str) -> Option<&[u8]> {
        self.items
            .get(&(namespace.to_owned(), key.to_owned()))
            .map(Vec::as_slice)
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        self.items.clear()
    }
}

impl ByteStore for InMemoryByteStore {
    fn query_size(&self, namespace: &str, key: &str) -> Result<Option<u64>, ByteStoreError> {
        Ok(self.get(namespace, key).map(|data| data.len() as u64))
    }

    fn load_all(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ByteStoreError> {
        Ok(self.get(namespace, key).map(<[u8]>::to_vec))
    }

    fn write_all(
        &mut self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> Result<(), ByteStoreError> {
        self.items
            .insert((namespace.to_owned(), key.to_owned()), data.to_vec());
        Ok(())
    }
}
