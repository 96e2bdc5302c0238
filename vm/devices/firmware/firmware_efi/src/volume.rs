// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Splitting of the shipped firmware image into its NVRAM and code regions.
//!
//! The image is a concatenation of two parts, laid out to end exactly at the
//! 4 GiB boundary:
//!
//! ```text
//!   nvram_load_address   +---------------------------+
//!                        | NV data firmware volume   |  nvram_size
//!   code_load_address    +---------------------------+
//!                        | firmware code             |  code_size
//!   TOP_OF_ADDRESS_SPACE +---------------------------+
//! ```
//!
//! Only the leading firmware volume header is interpreted. It must describe a
//! volume formatted as the system NV data store; everything after it is opaque
//! code.

use efi_specs::guid::Guid;
use efi_specs::volume::BlockMapEntry;
use efi_specs::volume::FVH_REVISION;
use efi_specs::volume::FVH_SIGNATURE;
use efi_specs::volume::FirmwareVolumeHeader;
use efi_specs::volume::SYSTEM_NV_DATA_FV_GUID;
use std::ops::Range;
use thiserror::Error;
use zerocopy::FromBytes;

/// The firmware image ends at this guest physical address.
pub const TOP_OF_ADDRESS_SPACE: u64 = 0x1_0000_0000;

const PAGE_SIZE: u64 = 4096;
const HEADER_SIZE: usize = size_of::<FirmwareVolumeHeader>();
const BLOCK_MAP_ENTRY_SIZE: usize = size_of::<BlockMapEntry>();

/// Errors from [`parse`].
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("image of {image_len:#x} bytes is too short for a {needed:#x} byte volume header")]
    Truncated { image_len: usize, needed: usize },
    #[error("invalid volume signature {0:x?}")]
    InvalidSignature([u8; 4]),
    #[error("unsupported volume header revision {0}")]
    VersionMismatch(u8),
    #[error("volume length {volume_len:#x} exceeds image length {image_len:#x}")]
    TooLarge { volume_len: u64, image_len: usize },
    #[error("invalid block map: {0}")]
    InvalidBlockMap(&'static str),
    #[error("volume is formatted as {0}, not as system nv data")]
    WrongContainerKind(Guid),
    #[error("invalid firmware image size {0:#x}")]
    InvalidImageSize(usize),
}

/// The parsed NVRAM volume header and the derived image layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVolume {
    pub signature: [u8; 4],
    pub revision: u8,
    /// `fv_length` from the header.
    pub total_length: u64,
    /// Block map entries, without the terminator.
    pub block_map: Vec<BlockMapEntry>,
    pub filesystem_guid: Guid,
    /// Length of the whole image.
    pub image_size: u64,
    /// Erase granule of the NVRAM flash.
    pub block_size: u16,
    pub nvram_size: u32,
    pub code_size: u64,
    pub nvram_load_address: u64,
    pub code_load_address: u64,
}

impl FirmwareVolume {
    /// Byte range of the NVRAM region within the image.
    pub fn nvram_range(&self) -> Range<usize> {
        0..self.nvram_size as usize
    }

    /// Byte range of the code region within the image.
    pub fn code_range(&self) -> Range<usize> {
        self.nvram_size as usize..self.image_size as usize
    }

    /// Guest physical range the NVRAM flash is exposed at.
    pub fn nvram_gpa_range(&self) -> Range<u64> {
        self.nvram_load_address..self.nvram_load_address + self.nvram_size as u64
    }
}

/// Parses the leading NVRAM volume of `image` and computes where the image
/// is placed in guest memory.
pub fn parse(image: &[u8]) -> Result<FirmwareVolume, VolumeError> {
    let (header, _) = FirmwareVolumeHeader::read_from_prefix(image).map_err(|_| {
        VolumeError::Truncated {
            image_len: image.len(),
            needed: HEADER_SIZE,
        }
    })?;

    if header.signature != FVH_SIGNATURE {
        return Err(VolumeError::InvalidSignature(header.signature));
    }
    if header.revision != FVH_REVISION {
        return Err(VolumeError::VersionMismatch(header.revision));
    }
    if header.fv_length > image.len() as u64 {
        return Err(VolumeError::TooLarge {
            volume_len: header.fv_length,
            image_len: image.len(),
        });
    }

    let block_map = parse_block_map(image, &header)?;
    let first = block_map[0];
    if header.fv_length < header.header_length as u64 {
        return Err(VolumeError::InvalidBlockMap("volume is shorter than its header"));
    }

    if header.file_system_guid != SYSTEM_NV_DATA_FV_GUID {
        return Err(VolumeError::WrongContainerKind(header.file_system_guid));
    }

    let block_size = u16::try_from(first.length)
        .ok()
        .filter(|len| len.is_power_of_two())
        .ok_or(VolumeError::InvalidBlockMap(
            "block length is not a power of two below 64KiB",
        ))?;
    let nvram_size = u32::try_from(header.fv_length)
        .map_err(|_| VolumeError::InvalidBlockMap("volume larger than 4GiB"))?;
    if nvram_size % block_size as u32 != 0 {
        return Err(VolumeError::InvalidBlockMap("volume is not a whole number of blocks"));
    }
    let mapped = block_map.iter().try_fold(0u64, |total, entry| {
        total.checked_add(entry.num_blocks as u64 * entry.length as u64)
    });
    if mapped != Some(header.fv_length) {
        return Err(VolumeError::InvalidBlockMap("block map does not cover the volume"));
    }

    let image_size = image.len() as u64;
    if image_size % PAGE_SIZE != 0 || image_size > TOP_OF_ADDRESS_SPACE {
        return Err(VolumeError::InvalidImageSize(image.len()));
    }
    let code_size = image_size - nvram_size as u64;
    if code_size == 0 {
        return Err(VolumeError::InvalidImageSize(image.len()));
    }

    let code_load_address = TOP_OF_ADDRESS_SPACE - code_size;
    let nvram_load_address = code_load_address - nvram_size as u64;

    Ok(FirmwareVolume {
        signature: header.signature,
        revision: header.revision,
        total_length: header.fv_length,
        block_map,
        filesystem_guid: header.file_system_guid,
        image_size,
        block_size,
        nvram_size,
        code_size,
        nvram_load_address,
        code_load_address,
    })
}

/// Reads the block map between the fixed header and `header_length`. The
/// first entry must describe real blocks.
fn parse_block_map(
    image: &[u8],
    header: &FirmwareVolumeHeader,
) -> Result<Vec<BlockMapEntry>, VolumeError> {
    let header_len = header.header_length as usize;
    if header_len < HEADER_SIZE + BLOCK_MAP_ENTRY_SIZE {
        return Err(VolumeError::InvalidBlockMap("header has no room for a block map"));
    }
    let raw = image
        .get(HEADER_SIZE..header_len)
        .ok_or(VolumeError::Truncated {
            image_len: image.len(),
            needed: header_len,
        })?;

    let block_map: Vec<BlockMapEntry> = raw
        .chunks_exact(BLOCK_MAP_ENTRY_SIZE)
        .filter_map(|entry| BlockMapEntry::read_from_bytes(entry).ok())
        .take_while(|entry| !entry.is_terminator())
        .collect();

    match block_map.first() {
        Some(first) if first.num_blocks != 0 && first.length != 0 => Ok(block_map),
        _ => Err(VolumeError::InvalidBlockMap("first block map entry is empty")),
    }
}
