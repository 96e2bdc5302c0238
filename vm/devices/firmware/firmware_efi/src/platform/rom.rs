// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interfaces required to place the firmware code in guest memory.

use std::io;

/// Maps read-only firmware code into guest memory.
pub trait MapFirmwareRom {
    /// Maps `data` at `gpa` as shadowed firmware code.
    ///
    /// The returned object will implicitly unmap the ROM when dropped.
    fn map_rom(&self, gpa: u64, data: &[u8]) -> io::Result<Box<dyn UnmapRom>>;
}

/// A live ROM mapping. Unmapped on drop.
pub trait UnmapRom: Send + Sync {}
