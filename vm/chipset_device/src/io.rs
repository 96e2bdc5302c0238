// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Memory mapped IO (MMIO) and port IO results.

/// An error related to the suitability of the IO request for the device. A
/// device should handle device-specific errors internally, and should return
/// `IoResult::Ok` in these conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// The requested device register is not present.
    InvalidRegister,
    /// The access length is invalid for the specified address.
    InvalidAccessSize,
}

/// The result returned by a device IO operation, as in methods of
/// [`MmioIntercept`](crate::mmio::MmioIntercept) or
/// [`PortIoIntercept`](crate::pio::PortIoIntercept).
///
/// Every access runs to completion on the calling thread. Multi-byte accesses
/// that a device cannot treat atomically must be decomposed by the device
/// into single-byte steps.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum IoResult {
    /// The IO operation succeeded.
    Ok,
    /// The IO operation failed due to an access error.
    ///
    /// The caller should log the failure, then ignore writes, and fill the
    /// buffer with `!0` on reads.
    Err(IoError),
}

impl IoResult {
    /// Asserts if `self` is not `IoResult::Ok`.
    #[track_caller]
    pub fn unwrap(self) {
        match self {
            IoResult::Ok => {}
            IoResult::Err(_) => panic!("unexpected IO result {:?}", self),
        }
    }

    /// Converts `self` to a `Result<(), IoError>`.
    pub fn into_result(self) -> Result<(), IoError> {
        match self {
            IoResult::Ok => Ok(()),
            IoResult::Err(e) => Err(e),
        }
    }
}
