// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interfaces required to stop the VM on behalf of the firmware.

use efi_specs::ports::PanicCommand;

/// Why the device is asking for the VM to be halted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// The firmware reported a fatal error with a message.
    FirmwarePanic(String),
    /// The firmware took a trap it had no handler for.
    UnexpectedTrap(PanicCommand),
    /// The firmware and the device disagree about the port protocol.
    InternalError(String),
}

/// Interface to stop the VM.
pub trait HaltVm: Send {
    /// Halt the VM. Returns immediately; the VM stops asynchronously.
    fn halt(&self, reason: HaltReason);
}
