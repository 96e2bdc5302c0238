// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Emulation of a byte-wide NOR flash part with an Intel-style command set.
//!
//! The EFI firmware keeps its non-volatile variable store in a flash region
//! that it programs directly, using the same command sequences it would issue
//! to a physical 28F-series part. This crate models just enough of that part
//! for unmodified firmware to work:
//!
//! - single-cycle commands that change what reads return (array, status, id),
//! - two-cycle byte program (`0x40`/`0x10` followed by the data byte),
//! - two-cycle block erase (`0x20` followed by the `0xD0` confirm byte).
//!
//! Every access is processed one byte at a time. A multi-byte store from the
//! guest is applied as consecutive single-byte writes at consecutive offsets,
//! so there is never a partially applied command that needs to be retried.
//!
//! Programming never fails and does not require a prior erase, which is more
//! forgiving than real hardware but matches what the firmware expects from
//! this device.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod save_restore;

pub use save_restore::FlashRestoreError;

use bitfield_struct::bitfield;
use std::fmt;
use thiserror::Error;

/// Value of an erased (or never written) flash byte.
pub const ERASED_BYTE: u8 = 0xff;

/// A command byte, as written to the flash during the first bus cycle.
///
/// Any `u8` is representable, since the guest may write arbitrary values.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FlashCommand(pub u8);

#[expect(missing_docs)] // self-explanatory opcodes
impl FlashCommand {
    pub const ARRAY_READ: Self = Self(0xff);
    pub const STATUS_READ: Self = Self(0x70);
    pub const ERASE_SUSPEND_RESUME: Self = Self(0xb0);
    pub const READ_ID: Self = Self(0x90);
    pub const STATUS_CLEAR: Self = Self(0x50);
    pub const WRITE: Self = Self(0x40);
    pub const ALT_WRITE: Self = Self(0x10);
    pub const ERASE_SETUP: Self = Self(0x20);
    /// Only meaningful as the second cycle of [`FlashCommand::ERASE_SETUP`].
    pub const ERASE_CONFIRM: Self = Self(0xd0);
}

impl fmt::Debug for FlashCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::ARRAY_READ => "ARRAY_READ",
            Self::STATUS_READ => "STATUS_READ",
            Self::ERASE_SUSPEND_RESUME => "ERASE_SUSPEND_RESUME",
            Self::READ_ID => "READ_ID",
            Self::STATUS_CLEAR => "STATUS_CLEAR",
            Self::WRITE => "WRITE",
            Self::ALT_WRITE => "ALT_WRITE",
            Self::ERASE_SETUP => "ERASE_SETUP",
            Self::ERASE_CONFIRM => "ERASE_CONFIRM",
            _ => return write!(f, "FlashCommand({:#04x})", self.0),
        };
        f.pad(name)
    }
}

/// The flash status register.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct FlashStatus {
    #[bits(3)]
    _reserved: u8,
    /// Programming voltage was out of range.
    pub low_voltage: bool,
    /// A byte program failed, or a command sequence was malformed.
    pub byte_write_error: bool,
    /// A block erase failed, or a command sequence was malformed.
    pub erase_error: bool,
    /// A block erase is suspended.
    pub erase_suspended: bool,
    /// The write state machine is ready.
    pub wsm_ready: bool,
}

/// Errors from invalid flash geometry.
#[derive(Debug, Error)]
pub enum FlashGeometryError {
    /// The block size is not usable as an erase granule.
    #[error("block size {0:#x} is not a nonzero power of two")]
    BlockSize(u16),
    /// The flash is not a whole number of blocks.
    #[error("flash size {size:#x} is not a nonzero multiple of the block size {block_size:#x}")]
    TotalSize {
        /// The requested flash size.
        size: u32,
        /// The requested block size.
        block_size: u16,
    },
}

/// Content handed to [`FlashCore::load`] does not match the flash size.
#[derive(Debug, Error)]
#[error("flash content is {actual:#x} bytes, expected {expected:#x}")]
pub struct FlashSizeMismatch {
    /// The configured flash size.
    pub expected: usize,
    /// The size of the offered content.
    pub actual: usize,
}

/// A single emulated flash part.
pub struct FlashCore {
    // Fixed configuration
    manufacturer_device_id: u16,
    block_size: u16,

    // Backing store, `total_size` bytes.
    data: Vec<u8>,

    // Volatile state
    command: FlashCommand,
    status: FlashStatus,
    bus_cycle: u8,

    // Not guest visible, not saved.
    ignored_writes: u64,
}

impl fmt::Debug for FlashCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashCore")
            .field("manufacturer_device_id", &format_args!("{:#06x}", self.manufacturer_device_id))
            .field("block_size", &format_args!("{:#x}", self.block_size))
            .field("total_size", &format_args!("{:#x}", self.data.len()))
            .field("command", &self.command)
            .field("status", &self.status)
            .field("bus_cycle", &self.bus_cycle)
            .finish_non_exhaustive()
    }
}

impl FlashCore {
    /// Creates a new, fully erased flash part.
    pub fn new(
        manufacturer_device_id: u16,
        total_size: u32,
        block_size: u16,
    ) -> Result<Self, FlashGeometryError> {
        if !block_size.is_power_of_two() {
            return Err(FlashGeometryError::BlockSize(block_size));
        }
        if total_size == 0 || total_size % block_size as u32 != 0 {
            return Err(FlashGeometryError::TotalSize {
                size: total_size,
                block_size,
            });
        }

        Ok(Self {
            manufacturer_device_id,
            block_size,
            data: vec![ERASED_BYTE; total_size as usize],
            command: FlashCommand::ARRAY_READ,
            status: FlashStatus::new(),
            bus_cycle: 0,
            ignored_writes: 0,
        })
    }

    /// The value reported in read-id mode.
    pub fn manufacturer_device_id(&self) -> u16 {
        self.manufacturer_device_id
    }

    /// The erase granule, in bytes.
    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    /// The size of the part, in bytes.
    pub fn total_size(&self) -> u32 {
        // Cannot truncate, the buffer was sized from a u32.
        self.data.len() as u32
    }

    /// The command currently determining how reads are interpreted.
    pub fn command(&self) -> FlashCommand {
        self.command
    }

    /// The status register.
    pub fn status(&self) -> FlashStatus {
        self.status
    }

    /// 1 while a two-cycle command is waiting for its second byte, else 0.
    pub fn bus_cycle(&self) -> u8 {
        self.bus_cycle
    }

    /// Number of data writes dropped because they were past the end of the
    /// part.
    pub fn ignored_writes(&self) -> u64 {
        self.ignored_writes
    }

    /// The raw flash content.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replaces the entire flash content.
    pub fn load(&mut self, data: &[u8]) -> Result<(), FlashSizeMismatch> {
        if data.len() != self.data.len() {
            return Err(FlashSizeMismatch {
                expected: self.data.len(),
                actual: data.len(),
            });
        }
        self.data.copy_from_slice(data);
        Ok(())
    }

    /// Returns the command state machine to power-on state. The flash
    /// content is retained.
    pub fn reset(&mut self) {
        self.command = FlashCommand::ARRAY_READ;
        self.status = FlashStatus::new();
        self.bus_cycle = 0;
    }

    /// Applies a bus write of `data` at `offset`, one byte at a time.
    ///
    /// Byte `i` is processed as a single-byte write at `offset + i`. Offsets
    /// do not wrap past `u32::MAX`.
    pub fn write(&mut self, offset: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write_byte(offset as u64 + i as u64, b);
        }
    }

    /// Performs a bus read of `count` bytes at `offset`. Never changes the
    /// device state.
    pub fn read(&self, offset: u32, count: usize) -> Vec<u8> {
        let mut data = vec![0; count];
        self.read_into(offset, &mut data);
        data
    }

    /// Like [`FlashCore::read`], filling a caller provided buffer.
    pub fn read_into(&self, offset: u32, data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b = self.read_byte(offset as u64 + i as u64);
        }
    }

    fn write_byte(&mut self, off: u64, value: u8) {
        if self.bus_cycle == 0 {
            // First bus cycle: the value is a command, the address is ignored.
            let command = FlashCommand(value);
            match command {
                FlashCommand::ARRAY_READ
                | FlashCommand::STATUS_READ
                | FlashCommand::ERASE_SUSPEND_RESUME
                | FlashCommand::READ_ID => {
                    self.command = command;
                }
                FlashCommand::STATUS_CLEAR => {
                    self.status = FlashStatus::new();
                    self.command = FlashCommand::ARRAY_READ;
                }
                FlashCommand::WRITE | FlashCommand::ALT_WRITE | FlashCommand::ERASE_SETUP => {
                    self.command = command;
                    self.bus_cycle = 1;
                }
                _ => {
                    tracing::debug!(
                        ?command,
                        current = ?self.command,
                        "ignoring unknown flash command"
                    );
                }
            }
            return;
        }

        // Second bus cycle of a two-cycle command.
        match self.command {
            FlashCommand::WRITE | FlashCommand::ALT_WRITE => {
                if let Some(b) = self.data.get_mut(off as usize) {
                    *b = value;
                } else {
                    self.ignored_writes += 1;
                    tracing::trace!(off, value, "ignoring flash write past end of part");
                }
            }
            FlashCommand::ERASE_SETUP => {
                if FlashCommand(value) == FlashCommand::ERASE_CONFIRM {
                    self.erase_block(off);
                } else {
                    tracing::debug!(
                        confirm = ?FlashCommand(value),
                        "bad erase confirm, switching to status read"
                    );
                    self.command = FlashCommand::STATUS_READ;
                    self.status.set_byte_write_error(true);
                    self.status.set_erase_error(true);
                }
            }
            command => {
                tracing::debug!(?command, value, "second bus cycle without two-cycle command");
            }
        }
        self.bus_cycle = 0;
    }

    fn erase_block(&mut self, off: u64) {
        let start = (off & !(self.block_size as u64 - 1)) as usize;
        let end = start + self.block_size as usize;
        if let Some(block) = self.data.get_mut(start..end) {
            tracing::trace!(start, "erasing flash block");
            block.fill(ERASED_BYTE);
        } else {
            self.ignored_writes += 1;
            tracing::debug!(off, "ignoring erase past end of part");
        }
    }

    fn read_byte(&self, off: u64) -> u8 {
        match self.command {
            FlashCommand::ARRAY_READ => self.data.get(off as usize).copied().unwrap_or(ERASED_BYTE),
            FlashCommand::STATUS_READ => self.status.into_bits(),
            FlashCommand::READ_ID => {
                let [lo, hi] = self.manufacturer_device_id.to_le_bytes();
                if off & 1 == 0 { lo } else { hi }
            }
            _ => ERASED_BYTE,
        }
    }
}
