// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Port IO intercepts

use crate::ChipsetDevice;
use crate::io::IoResult;
use std::ops::RangeInclusive;

/// Implemented by devices which use port IO intercepts.
pub trait PortIoIntercept: ChipsetDevice {
    /// Dispatch an IO port read to the device with the given address.
    fn io_read(&mut self, io_port: u16, data: &mut [u8]) -> IoResult;
    /// Dispatch an IO port write to the device with the given address.
    fn io_write(&mut self, io_port: u16, data: &[u8]) -> IoResult;

    /// Report a set of static io port regions (region_name, port_range) that
    /// cannot be remapped at runtime and are always registered.
    fn get_static_regions(&mut self) -> &[(&str, RangeInclusive<u16>)] {
        &[]
    }
}
