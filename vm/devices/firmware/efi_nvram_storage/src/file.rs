// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A [`ByteStore`] backed by a single host file.

use crate::ByteStore;
use crate::ByteStoreError;
use anyhow::Context;
use std::io::ErrorKind;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

/// Stores one item in one host file.
///
/// The namespace and key are not part of the on-disk format; every item
/// maps to the same file. Writes go to a temporary file next to the target
/// which then replaces it, so a crash mid-write leaves the previous content
/// intact.
#[derive(Debug, Clone)]
pub struct FileByteStore {
    path: PathBuf,
}

impl FileByteStore {
    /// Uses the file at `path`. The file does not need to exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteStore for FileByteStore {
    fn query_size(&self, _namespace: &str, _key: &str) -> Result<Option<u64>, ByteStoreError> {
        match fs_err::metadata(&self.path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ByteStoreError::new(err)),
        }
    }

    fn load_all(&self, _namespace: &str, _key: &str) -> Result<Option<Vec<u8>>, ByteStoreError> {
        match fs_err::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ByteStoreError::new(err)),
        }
    }

    fn write_all(
        &mut self,
        _namespace: &str,
        _key: &str,
        data: &[u8],
    ) -> Result<(), ByteStoreError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temporary file in {}", dir.display()))
            .map_err(ByteStoreError::new)?;
        file.write_all(data)
            .and_then(|()| file.as_file().sync_all())
            .context("failed to write temporary file")
            .map_err(ByteStoreError::new)?;
        file.persist(&self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))
            .map_err(ByteStoreError::new)?;
        Ok(())
    }
}
