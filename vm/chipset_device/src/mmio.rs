// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MMIO intercepts

use crate::ChipsetDevice;
use crate::io::IoResult;
use std::ops::RangeInclusive;

/// Implemented by devices which use MMIO intercepts.
pub trait MmioIntercept: ChipsetDevice {
    /// Dispatch an MMIO read to the device with the given address.
    fn mmio_read(&mut self, addr: u64, data: &mut [u8]) -> IoResult;
    /// Dispatch an MMIO write to the device with the given address.
    fn mmio_write(&mut self, addr: u64, data: &[u8]) -> IoResult;

    /// Report a set of mmio regions (region_name, gpa_range) that are fixed
    /// for the lifetime of the device.
    ///
    /// Unlike port IO, MMIO placement may depend on data only known once the
    /// device is constructed (e.g: the size of a firmware image), so the
    /// regions are borrowed from the device rather than `'static`.
    fn get_static_regions(&mut self) -> &[(&str, RangeInclusive<u64>)] {
        &[]
    }
}
