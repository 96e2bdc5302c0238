// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Initial content of the NVRAM flash, and writing it back.

use efi_flash::FlashCore;
use efi_nvram_storage::NvramPersistError;
use efi_nvram_storage::NvramPersistence;
use thiserror::Error;

/// Where the NVRAM content came from at construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NvramSource {
    /// Previously persisted content.
    Restored,
    /// The variable store shipped in the firmware image.
    Seeded,
}

/// Errors setting up the NVRAM flash.
#[derive(Debug, Error)]
pub enum NvramInitError {
    #[error("failed to load persisted nvram")]
    Load(#[source] NvramPersistError),
    #[error("persisted nvram is {stored:#x} bytes, but the firmware volume needs {expected:#x}")]
    ConfigMismatch { stored: usize, expected: usize },
}

/// Fills `flash` from the persisted store if there is one, otherwise from
/// `seed`.
pub fn restore_or_seed(
    flash: &mut FlashCore,
    persistence: &NvramPersistence,
    seed: &[u8],
) -> Result<NvramSource, NvramInitError> {
    let (data, source) = match persistence.load().map_err(NvramInitError::Load)? {
        Some(stored) => (stored, NvramSource::Restored),
        None => (seed.to_vec(), NvramSource::Seeded),
    };

    flash
        .load(&data)
        .map_err(|err| NvramInitError::ConfigMismatch {
            stored: err.actual,
            expected: err.expected,
        })?;

    tracing::info!(
        namespace = persistence.namespace(),
        key = persistence.key(),
        ?source,
        len = data.len(),
        "initialized nvram flash"
    );
    Ok(source)
}

/// Writes the current flash content back to the store.
pub fn persist(
    flash: &FlashCore,
    persistence: &mut NvramPersistence,
) -> Result<(), NvramPersistError> {
    persistence.save(flash.data())
}
