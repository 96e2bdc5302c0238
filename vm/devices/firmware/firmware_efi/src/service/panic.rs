// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The panic port, through which the firmware reports fatal errors.

use crate::platform::halt::HaltReason;
use efi_specs::ports::PanicCommand;

/// Longest panic message retained. Further characters are dropped.
pub const PANIC_MESSAGE_MAX: usize = 2048;

/// Accumulates a panic message and decides when the VM must stop.
#[derive(Debug, Default)]
pub struct PanicMessage {
    message: Vec<u8>,
}

impl PanicMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The message accumulated so far.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }

    /// Handles one panic port command. Returns a reason to halt the VM if
    /// the command is fatal.
    pub fn handle(&mut self, command: PanicCommand) -> Option<HaltReason> {
        if let Some(ch) = command.message_char() {
            self.append(ch);
            return None;
        }

        match command {
            PanicCommand::BAD_ORG | PanicCommand::THUNK_TRAP => {
                Some(HaltReason::UnexpectedTrap(command))
            }
            PanicCommand::START_MSG => {
                self.message.clear();
                None
            }
            PanicCommand::END_MSG => {
                let message = self.message();
                self.message.clear();
                Some(HaltReason::FirmwarePanic(message))
            }
            _ => {
                tracing::debug!(?command, "unknown panic port command");
                None
            }
        }
    }

    fn append(&mut self, ch: u8) {
        if ch == b'\n' && self.message.last() == Some(&b'\r') {
            self.message.pop();
        }
        if self.message.len() < PANIC_MESSAGE_MAX {
            self.message.push(ch);
        }
    }
}
