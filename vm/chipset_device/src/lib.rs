// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and traits to model chipset devices.
//!
//! This is the device-facing half of the IO dispatch seam. The VMM's memory
//! manager owns region registration and routing, and calls into devices
//! through the intercept traits defined here. Devices never see each other.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Implemented by any device that is considered part of the guest's "chipset"
/// (insofar as it exists on one or more system busses).
//
// DEVNOTE: keep this trait free of bounds like save/restore. Devices opt into
// those separately so test devices stay cheap to write.
pub trait ChipsetDevice: 'static + Send {
    /// Optionally returns a trait object to send IO port intercepts to.
    #[inline(always)]
    fn supports_pio(&mut self) -> Option<&mut dyn pio::PortIoIntercept> {
        None
    }

    /// Optionally returns a trait object to send MMIO intercepts to.
    #[inline(always)]
    fn supports_mmio(&mut self) -> Option<&mut dyn mmio::MmioIntercept> {
        None
    }
}

pub mod io;
pub mod mmio;
pub mod pio;
