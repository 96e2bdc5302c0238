// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Streaming of boot configuration through the info port.
//!
//! The firmware selects an item by writing its [`InfoIndex`], queries the
//! item's size with a single 4-byte read, then reads the item one byte at a
//! time. Scalars are little-endian. Reads past the end return zero.

use crate::config::EfiConfig;
use crate::volume::FirmwareVolume;
use efi_specs::ports::InfoIndex;
use thiserror::Error;

/// Top of the early bootstrap stack.
pub const STACK_TOP: u32 = 0x30_0000;
/// Size of the early bootstrap stack.
pub const STACK_SIZE: u32 = 128 * 1024;
/// Temporary memory starts where the stack ends.
pub const TEMPMEM_BASE: u32 = STACK_TOP;
/// Size of the temporary memory region handed to the firmware.
pub const TEMPMEM_SIZE: u32 = 512 * 1024;

/// One serialized info item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InfoItem<'a> {
    U8(u8),
    U32(u32),
    U64(u64),
    Bytes(&'a [u8]),
}

impl InfoItem<'_> {
    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        match self {
            InfoItem::U8(_) => 1,
            InfoItem::U32(_) => 4,
            InfoItem::U64(_) => 8,
            InfoItem::Bytes(b) => b.len(),
        }
    }

    /// Byte `offset` of the item, or zero past the end.
    pub fn byte(&self, offset: usize) -> u8 {
        let b = match self {
            InfoItem::U8(v) => v.to_le_bytes().get(offset).copied(),
            InfoItem::U32(v) => v.to_le_bytes().get(offset).copied(),
            InfoItem::U64(v) => v.to_le_bytes().get(offset).copied(),
            InfoItem::Bytes(b) => b.get(offset).copied(),
        };
        b.unwrap_or(0)
    }
}

/// Values reported through the info port, fixed at construction.
#[derive(Debug, Clone)]
pub struct BootInfo {
    volume_base: u64,
    volume_size: u64,
    boot_args: Vec<u8>,
    device_props: Vec<u8>,
    fsb_frequency: u64,
    cpu_frequency: u64,
    tsc_frequency: u64,
    graphics_mode: u32,
    horizontal_resolution: u32,
    vertical_resolution: u32,
    mcfg_base: u64,
    mcfg_size: u64,
    apic_mode: u8,
    cpu_count: u32,
    cpu_count_max: u32,
}

impl BootInfo {
    pub fn new(config: &EfiConfig, volume: &FirmwareVolume) -> Self {
        let mut boot_args = config.boot_args.clone().into_bytes();
        if boot_args.last() != Some(&0) {
            boot_args.push(0);
        }

        Self {
            volume_base: volume.nvram_load_address,
            volume_size: volume.image_size,
            boot_args,
            device_props: config.device_props.clone(),
            fsb_frequency: config.fsb_frequency,
            cpu_frequency: config.cpu_frequency,
            tsc_frequency: config.tsc_frequency,
            graphics_mode: config.graphics_mode,
            horizontal_resolution: config.horizontal_resolution,
            vertical_resolution: config.vertical_resolution,
            mcfg_base: config.mcfg_base,
            mcfg_size: config.mcfg_size,
            apic_mode: config.apic_mode.0,
            cpu_count: config.cpu_count,
            cpu_count_max: config.cpu_count_max,
        }
    }

    /// Returns the item for `index`, or `None` if the selector is unknown.
    pub fn item(&self, index: InfoIndex) -> Option<InfoItem<'_>> {
        let item = match index {
            InfoIndex::VOLUME_BASE => InfoItem::U64(self.volume_base),
            InfoIndex::VOLUME_SIZE => InfoItem::U64(self.volume_size),
            InfoIndex::TEMPMEM_BASE => InfoItem::U32(TEMPMEM_BASE),
            InfoIndex::TEMPMEM_SIZE => InfoItem::U32(TEMPMEM_SIZE),
            InfoIndex::STACK_BASE => InfoItem::U32(STACK_TOP - STACK_SIZE),
            InfoIndex::STACK_SIZE => InfoItem::U32(STACK_SIZE),
            InfoIndex::BOOT_ARGS => InfoItem::Bytes(&self.boot_args),
            InfoIndex::DEVICE_PROPS => InfoItem::Bytes(&self.device_props),
            InfoIndex::FSB_FREQUENCY => InfoItem::U64(self.fsb_frequency),
            InfoIndex::CPU_FREQUENCY => InfoItem::U64(self.cpu_frequency),
            InfoIndex::TSC_FREQUENCY => InfoItem::U64(self.tsc_frequency),
            InfoIndex::GRAPHICS_MODE => InfoItem::U32(self.graphics_mode),
            InfoIndex::HORIZONTAL_RESOLUTION => InfoItem::U32(self.horizontal_resolution),
            InfoIndex::VERTICAL_RESOLUTION => InfoItem::U32(self.vertical_resolution),
            InfoIndex::MCFG_BASE => InfoItem::U64(self.mcfg_base),
            InfoIndex::MCFG_SIZE => InfoItem::U64(self.mcfg_size),
            InfoIndex::APIC_MODE => InfoItem::U8(self.apic_mode),
            InfoIndex::CPU_COUNT_CURRENT => InfoItem::U32(self.cpu_count),
            InfoIndex::CPU_COUNT_MAX => InfoItem::U32(self.cpu_count_max),
            _ => return None,
        };
        Some(item)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InfoError {
    #[error("size of {0:?} was already queried")]
    SizeAlreadyQueried(InfoIndex),
    #[error("unknown info selector {0:?}")]
    UnknownSelector(InfoIndex),
}

/// Cursor state of the info port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoChannel {
    selector: InfoIndex,
    /// -1 until the size is queried, then the offset of the next byte.
    cursor: i32,
}

impl InfoChannel {
    pub fn new() -> Self {
        Self {
            selector: InfoIndex::INVALID,
            cursor: -1,
        }
    }

    pub fn selector(&self) -> InfoIndex {
        self.selector
    }

    pub fn cursor(&self) -> i32 {
        self.cursor
    }

    pub fn select(&mut self, selector: InfoIndex) {
        self.selector = selector;
        self.cursor = -1;
    }

    /// Handles the 4-byte size query. Unknown selectors still start the
    /// stream, which then reads as zeros.
    pub fn read_size(&mut self, info: &BootInfo) -> Result<u32, InfoError> {
        if self.cursor != -1 {
            return Err(InfoError::SizeAlreadyQueried(self.selector));
        }
        self.cursor = 0;
        let item = info
            .item(self.selector)
            .ok_or(InfoError::UnknownSelector(self.selector))?;
        Ok(item.size() as u32)
    }

    /// Handles a 1-byte data read. Returns `None` if the size has not been
    /// queried yet, without moving the cursor.
    pub fn read_byte(&mut self, info: &BootInfo) -> Option<u8> {
        let offset = usize::try_from(self.cursor).ok()?;
        let b = info.item(self.selector).map_or(0, |item| item.byte(offset));
        self.cursor = self.cursor.saturating_add(1);
        Some(b)
    }

    pub fn save(&self) -> (u32, i32) {
        (self.selector.0, self.cursor)
    }

    /// Restores `selector` and `cursor`. Returns `None` for a cursor that
    /// can not be produced by the protocol.
    pub fn restore(selector: u32, cursor: i32) -> Option<Self> {
        (cursor >= -1).then_some(Self {
            selector: InfoIndex(selector),
            cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume;
    use efi_specs::ports::ApicMode;
    use test_log::test;

    fn boot_info(config: &EfiConfig) -> BootInfo {
        let image = volume::tests::minimal_image();
        BootInfo::new(config, &volume::parse(&image).unwrap())
    }

    fn read_item(channel: &mut InfoChannel, info: &BootInfo, index: InfoIndex) -> Vec<u8> {
        channel.select(index);
        let size = channel.read_size(info).unwrap();
        (0..size).map(|_| channel.read_byte(info).unwrap()).collect()
    }

    #[test]
    fn u64_item_streams_little_endian() {
        let config = EfiConfig {
            tsc_frequency: 0x0123_4567_89ab_cdef,
            ..EfiConfig::default()
        };
        let info = boot_info(&config);
        let mut channel = InfoChannel::new();

        channel.select(InfoIndex::TSC_FREQUENCY);
        assert_eq!(channel.read_size(&info), Ok(8));
        let bytes: Vec<u8> = (0..8).map(|_| channel.read_byte(&info).unwrap()).collect();
        assert_eq!(bytes, 0x0123_4567_89ab_cdef_u64.to_le_bytes());
        // past the end
        assert_eq!(channel.read_byte(&info), Some(0));
    }

    #[test]
    fn item_sizes() {
        let info = boot_info(&EfiConfig::default());
        let mut channel = InfoChannel::new();
        for (index, size) in [
            (InfoIndex::VOLUME_BASE, 8),
            (InfoIndex::VOLUME_SIZE, 8),
            (InfoIndex::TEMPMEM_BASE, 4),
            (InfoIndex::TEMPMEM_SIZE, 4),
            (InfoIndex::STACK_BASE, 4),
            (InfoIndex::STACK_SIZE, 4),
            (InfoIndex::FSB_FREQUENCY, 8),
            (InfoIndex::CPU_FREQUENCY, 8),
            (InfoIndex::GRAPHICS_MODE, 4),
            (InfoIndex::HORIZONTAL_RESOLUTION, 4),
            (InfoIndex::VERTICAL_RESOLUTION, 4),
            (InfoIndex::MCFG_BASE, 8),
            (InfoIndex::MCFG_SIZE, 8),
            (InfoIndex::APIC_MODE, 1),
            (InfoIndex::CPU_COUNT_CURRENT, 4),
            (InfoIndex::CPU_COUNT_MAX, 4),
        ] {
            channel.select(index);
            assert_eq!(channel.read_size(&info), Ok(size), "{index:?}");
        }
    }

    #[test]
    fn layout_items() {
        let info = boot_info(&EfiConfig::default());
        let mut channel = InfoChannel::new();
        let u32_item = |channel: &mut InfoChannel, index| {
            u32::from_le_bytes(read_item(channel, &info, index).try_into().unwrap())
        };
        assert_eq!(u32_item(&mut channel, InfoIndex::STACK_BASE), 0x2e_0000);
        assert_eq!(u32_item(&mut channel, InfoIndex::STACK_SIZE), 0x2_0000);
        assert_eq!(u32_item(&mut channel, InfoIndex::TEMPMEM_BASE), 0x30_0000);
        assert_eq!(u32_item(&mut channel, InfoIndex::TEMPMEM_SIZE), 0x8_0000);

        let base = read_item(&mut channel, &info, InfoIndex::VOLUME_BASE);
        assert_eq!(base, 0xffff_e000_u64.to_le_bytes());
        let size = read_item(&mut channel, &info, InfoIndex::VOLUME_SIZE);
        assert_eq!(size, 0x2000_u64.to_le_bytes());
    }

    #[test]
    fn boot_args_are_nul_terminated() {
        let config = EfiConfig {
            boot_args: "-v debug=0x100".into(),
            ..EfiConfig::default()
        };
        let info = boot_info(&config);
        let mut channel = InfoChannel::new();
        assert_eq!(
            read_item(&mut channel, &info, InfoIndex::BOOT_ARGS),
            b"-v debug=0x100\0"
        );

        let info = boot_info(&EfiConfig::default());
        assert_eq!(read_item(&mut channel, &info, InfoIndex::BOOT_ARGS), b"\0");

        // an existing terminator is not doubled
        let config = EfiConfig {
            boot_args: "x\0".into(),
            ..EfiConfig::default()
        };
        let info = boot_info(&config);
        assert_eq!(read_item(&mut channel, &info, InfoIndex::BOOT_ARGS), b"x\0");
    }

    #[test]
    fn device_props_are_raw() {
        let config = EfiConfig {
            device_props: vec![1, 0, 2, 0xff],
            apic_mode: ApicMode::X2APIC,
            ..EfiConfig::default()
        };
        let info = boot_info(&config);
        let mut channel = InfoChannel::new();
        assert_eq!(
            read_item(&mut channel, &info, InfoIndex::DEVICE_PROPS),
            [1, 0, 2, 0xff]
        );
        assert_eq!(read_item(&mut channel, &info, InfoIndex::APIC_MODE), [2]);

        let config = EfiConfig::default();
        let info = boot_info(&config);
        assert!(read_item(&mut channel, &info, InfoIndex::DEVICE_PROPS).is_empty());
    }

    #[test]
    fn byte_before_size_query_is_zero() {
        let info = boot_info(&EfiConfig::default());
        let mut channel = InfoChannel::new();
        channel.select(InfoIndex::CPU_COUNT_CURRENT);
        assert_eq!(channel.read_byte(&info), None);
        assert_eq!(channel.cursor(), -1);
        assert_eq!(channel.read_size(&info), Ok(4));
    }

    #[test]
    fn second_size_query_is_rejected() {
        let info = boot_info(&EfiConfig::default());
        let mut channel = InfoChannel::new();
        channel.select(InfoIndex::CPU_COUNT_MAX);
        channel.read_size(&info).unwrap();
        assert_eq!(
            channel.read_size(&info),
            Err(InfoError::SizeAlreadyQueried(InfoIndex::CPU_COUNT_MAX))
        );

        // reselecting starts over
        channel.select(InfoIndex::CPU_COUNT_MAX);
        assert_eq!(channel.read_size(&info), Ok(4));
    }

    #[test]
    fn unknown_selector_streams_zeros() {
        let info = boot_info(&EfiConfig::default());
        let mut channel = InfoChannel::new();
        for index in [InfoIndex::INVALID, InfoIndex(20), InfoIndex(0xffff_ffff)] {
            channel.select(index);
            assert_eq!(
                channel.read_size(&info),
                Err(InfoError::UnknownSelector(index))
            );
            assert_eq!(channel.cursor(), 0);
            assert_eq!(channel.read_byte(&info), Some(0));
        }
    }

    #[test]
    fn restore_rejects_impossible_cursor() {
        assert!(InfoChannel::restore(7, -2).is_none());
        let channel = InfoChannel::restore(7, 3).unwrap();
        assert_eq!(channel.selector(), InfoIndex::BOOT_ARGS);
        assert_eq!(channel.save(), (7, 3));
    }
}
