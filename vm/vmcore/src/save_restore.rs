// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Traits and types for save/restore support.
//!
//! To implement save/restore for your device:
//!
//! 1. Define a saved state type. This type needs to be stable across
//!    releases, so do not share types with your implementation even if they
//!    are currently identical. Keep it in a private `state` module next to
//!    the implementation.
//!
//! 2. Derive `serde::Serialize` and `serde::Deserialize` on it, so the
//!    snapshot engine (which lives outside of this crate) can encode it in
//!    whatever container format it uses.
//!
//! 3. Implement [`SaveRestore`], mapping between the runtime type and the
//!    saved state type, and validating anything that must match the live
//!    configuration on restore.

/// Implemented by objects which can be saved/restored
pub trait SaveRestore {
    /// The concrete saved state type.
    type SavedState;

    /// Saves the object's state.
    fn save(&mut self) -> Result<Self::SavedState, SaveError>;
    /// Restores the object's state.
    fn restore(&mut self, state: Self::SavedState) -> Result<(), RestoreError>;
}

/// A restore error.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    /// restore failure in a child object
    #[error("failed to restore child device {0}")]
    ChildError(String, #[source] Box<RestoreError>),
    /// the saved state was produced by an unknown version of the device
    #[error("unsupported saved state version {0}")]
    UnsupportedVersion(u32),
    /// custom saved state corruption error
    #[error("saved state is invalid")]
    InvalidSavedState(#[source] anyhow::Error),
    /// non-state-related restore failure
    #[error(transparent)]
    Other(anyhow::Error),
}

/// A save error.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// This object does not support saved state.
    #[error("save state not supported")]
    NotSupported,
    /// Save failed in child object.
    #[error("failed to save child device {0}")]
    ChildError(String, #[source] Box<SaveError>),
    /// Save failed due to some other error.
    #[error(transparent)]
    Other(anyhow::Error),
}
