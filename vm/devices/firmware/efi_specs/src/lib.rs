// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Definitions shared between the EFI helper device and the firmware running
//! in the guest.
//!
//! - `guid`: the mixed-endian GUID layout used throughout EFI structures.
//! - `volume`: the on-disk firmware volume header and block map.
//! - `ports`: the helper device's IO port layout and the command encodings of
//!   each port.
//!
//! Nothing in this crate has behavior beyond trivial accessors. Parsing and
//! validation live in the device crate.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod guid;
pub mod ports;
pub mod volume;
