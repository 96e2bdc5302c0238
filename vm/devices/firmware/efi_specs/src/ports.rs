// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! IO port interface of the EFI helper device.
//!
//! The firmware talks to the device through a small block of IO ports:
//!
//! ```text
//!   base + 0   info       write u32: select item, read u32: size, read u8: data
//!   base + 1   panic      write u16/u32: PanicCommand
//!   base + 2   debug      write u8: one character of debug output
//!   base + 3   image evt  write u32: ImageEventCommand | payload << 16
//! ```
//!
//! Reads from any port other than `info` return all-ones.

/// First port of the helper device.
pub const PORT_BASE: u16 = 0xEF10;
/// Number of ports claimed by the helper device.
pub const PORT_COUNT: u16 = 8;

/// Offset of the info (selector + streamed data) port.
pub const INFO_PORT_OFFSET: u16 = 0;
/// Offset of the panic port.
pub const PANIC_PORT_OFFSET: u16 = 1;
/// Offset of the debug output port.
pub const DEBUG_PORT_OFFSET: u16 = 2;
/// Offset of the image event port.
pub const IMAGE_EVENT_PORT_OFFSET: u16 = 3;

/// Defines a transparent newtype over an integer with named associated
/// constants. Unlike a Rust `enum`, any value of the underlying integer is a
/// valid instance, which matches how the guest may write arbitrary values.
macro_rules! code_enum {
    (
        $(#[$a:meta])*
        pub struct $name:ident($ty:ty) {
            $(
                $(#[$va:meta])*
                $variant:ident = $value:expr,
            )*
        }
    ) => {
        $(#[$a])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(pub $ty);

        #[allow(missing_docs)]
        impl $name {
            $(
                $(#[$va])*
                pub const $variant: $name = $name($value);
            )*
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                #[allow(unreachable_patterns)]
                match *self {
                    $(Self::$variant => f.pad(stringify!($variant)),)*
                    _ => write!(f, "{}({:#x})", stringify!($name), self.0),
                }
            }
        }
    };
}

code_enum! {
    /// Item selectors for the info port.
    ///
    /// Scalar items are streamed in little-endian byte order.
    pub struct InfoIndex(u32) {
        INVALID = 0,
        VOLUME_BASE = 1,
        VOLUME_SIZE = 2,
        TEMPMEM_BASE = 3,
        TEMPMEM_SIZE = 4,
        STACK_BASE = 5,
        STACK_SIZE = 6,
        BOOT_ARGS = 7,
        DEVICE_PROPS = 8,
        FSB_FREQUENCY = 9,
        CPU_FREQUENCY = 10,
        TSC_FREQUENCY = 11,
        GRAPHICS_MODE = 12,
        HORIZONTAL_RESOLUTION = 13,
        VERTICAL_RESOLUTION = 14,
        MCFG_BASE = 15,
        MCFG_SIZE = 16,
        APIC_MODE = 17,
        CPU_COUNT_CURRENT = 18,
        CPU_COUNT_MAX = 19,
    }
}

code_enum! {
    /// Commands accepted by the panic port.
    pub struct PanicCommand(u16) {
        /// Legacy encoding of [`PanicCommand::THUNK_TRAP`].
        BAD_ORG = 1,
        /// Unexpected trap during early bootstrap.
        THUNK_TRAP = 2,
        /// Begin a panic message.
        START_MSG = 3,
        /// End a panic message; the message is fatal.
        END_MSG = 4,
        /// First "append character" command.
        MSG_FIRST = 0x4201,
        /// Last "append character" command.
        MSG_LAST = 0x427f,
    }
}

impl PanicCommand {
    /// If this is an "append character" command, returns the character.
    pub fn message_char(self) -> Option<u8> {
        (Self::MSG_FIRST.0..=Self::MSG_LAST.0)
            .contains(&self.0)
            .then_some((self.0 & 0x7f) as u8)
    }

    /// Encodes an "append character" command for `ch`.
    ///
    /// Returns `None` for characters outside of the encodable range.
    pub fn message(ch: u8) -> Option<Self> {
        let cmd = Self(0x4200 | ch as u16);
        cmd.message_char().map(|_| cmd)
    }
}

code_enum! {
    /// Commands accepted by the image event port, in the low bits of the
    /// written value.
    pub struct ImageEventCommand(u32) {
        INVALID = 0,
        START_LOAD32 = 1,
        START_LOAD64 = 2,
        START_UNLOAD32 = 3,
        START_UNLOAD64 = 4,
        COMPLETE = 5,
        ADDR0 = 6,
        ADDR1 = 7,
        SIZE0 = 8,
        NAME = 9,
        START_RELOC32 = 0xa,
        START_RELOC64 = 0xb,
    }
}

/// Mask selecting the command bits of an image event port write.
pub const IMAGE_EVENT_CMD_MASK: u32 = 0x3ff;

impl ImageEventCommand {
    /// Splits a raw port value into its command and 16-bit payload.
    pub fn decode(value: u32) -> (Self, u16) {
        (Self(value & IMAGE_EVENT_CMD_MASK), (value >> 16) as u16)
    }

    /// Encodes a command with a payload.
    pub fn encode(self, payload: u16) -> u32 {
        (self.0 & IMAGE_EVENT_CMD_MASK) | (payload as u32) << 16
    }
}

code_enum! {
    /// Local APIC mode reported to the firmware.
    pub struct ApicMode(u8) {
        DISABLED = 0,
        APIC = 1,
        X2APIC = 2,
    }
}
