// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::FlashCommand;
use super::FlashCore;
use super::FlashStatus;
use thiserror::Error;
use vmcore::save_restore::RestoreError;
use vmcore::save_restore::SaveError;
use vmcore::save_restore::SaveRestore;

pub mod state {
    use serde::Deserialize;
    use serde::Serialize;

    pub const SAVED_STATE_VERSION: u32 = 1;

    /// Snapshot of a flash part, including its full content.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SavedState {
        pub version: u32,
        pub command: u8,
        pub status: u8,
        pub bus_cycle: u8,
        pub block_size: u16,
        pub manufacturer_device_id: u16,
        pub total_size: u32,
        pub data: Vec<u8>,
    }
}

/// A flash snapshot is incompatible with the part it is restored into.
#[derive(Debug, Error)]
pub enum FlashRestoreError {
    /// Saved and configured block sizes differ.
    #[error("saved block size {saved:#x} does not match configured {configured:#x}")]
    BlockSize {
        /// From the snapshot.
        saved: u16,
        /// From the running part.
        configured: u16,
    },
    /// Saved and configured ids differ.
    #[error("saved device id {saved:#06x} does not match configured {configured:#06x}")]
    DeviceId {
        /// From the snapshot.
        saved: u16,
        /// From the running part.
        configured: u16,
    },
    /// Saved and configured sizes differ, or the content length is wrong.
    #[error("saved flash size {saved:#x} does not match configured {configured:#x}")]
    Size {
        /// From the snapshot.
        saved: usize,
        /// From the running part.
        configured: usize,
    },
    /// The snapshot claims to be in a bus cycle that does not exist.
    #[error("invalid bus cycle {0}")]
    BusCycle(u8),
}

impl FlashCore {
    fn check_compatible(&self, state: &state::SavedState) -> Result<(), FlashRestoreError> {
        if state.block_size != self.block_size {
            return Err(FlashRestoreError::BlockSize {
                saved: state.block_size,
                configured: self.block_size,
            });
        }
        if state.manufacturer_device_id != self.manufacturer_device_id {
            return Err(FlashRestoreError::DeviceId {
                saved: state.manufacturer_device_id,
                configured: self.manufacturer_device_id,
            });
        }
        for saved in [state.total_size as usize, state.data.len()] {
            if saved != self.data.len() {
                return Err(FlashRestoreError::Size {
                    saved,
                    configured: self.data.len(),
                });
            }
        }
        if state.bus_cycle > 1 {
            return Err(FlashRestoreError::BusCycle(state.bus_cycle));
        }
        Ok(())
    }
}

impl SaveRestore for FlashCore {
    type SavedState = state::SavedState;

    fn save(&mut self) -> Result<Self::SavedState, SaveError> {
        Ok(state::SavedState {
            version: state::SAVED_STATE_VERSION,
            command: self.command.0,
            status: self.status.into_bits(),
            bus_cycle: self.bus_cycle,
            block_size: self.block_size,
            manufacturer_device_id: self.manufacturer_device_id,
            total_size: self.total_size(),
            data: self.data.clone(),
        })
    }

    fn restore(&mut self, state: Self::SavedState) -> Result<(), RestoreError> {
        if state.version != state::SAVED_STATE_VERSION {
            return Err(RestoreError::UnsupportedVersion(state.version));
        }
        self.check_compatible(&state)
            .map_err(|e| RestoreError::InvalidSavedState(e.into()))?;

        let state::SavedState {
            version: _,
            command,
            status,
            bus_cycle,
            block_size: _,
            manufacturer_device_id: _,
            total_size: _,
            data,
        } = state;

        self.command = FlashCommand(command);
        self.status = FlashStatus::from_bits(status);
        self.bus_cycle = bus_cycle;
        self.data = data;
        Ok(())
    }
}
