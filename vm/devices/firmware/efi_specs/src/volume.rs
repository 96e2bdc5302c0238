// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware volume types defined in the PI specification, volume 3.

use crate::guid::Guid;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// `EFI_FVH_SIGNATURE`
pub const FVH_SIGNATURE: [u8; 4] = *b"_FVH";

/// `EFI_FVH_REVISION`, the only header revision understood by the loader.
pub const FVH_REVISION: u8 = 0x02;

/// `EFI_SYSTEM_NV_DATA_FV_GUID`: {fff12b8d-7696-4c8b-a985-2747075b4f50}
///
/// Identifies a volume holding the firmware's non-volatile variable store.
pub const SYSTEM_NV_DATA_FV_GUID: Guid = Guid {
    data1: 0xfff12b8d,
    data2: 0x7696,
    data3: 0x4c8b,
    data4: [0xa9, 0x85, 0x27, 0x47, 0x07, 0x5b, 0x4f, 0x50],
};

/// `EFI_FIRMWARE_VOLUME_HEADER`, without the trailing block map.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct FirmwareVolumeHeader {
    /// Reserved for processor reset vectors; always zero in NV volumes.
    pub zero_vector: [u8; 16],
    /// Declares the file system with which the volume is formatted.
    pub file_system_guid: Guid,
    /// Length in bytes of the complete volume, including the header.
    pub fv_length: u64,
    /// Must be [`FVH_SIGNATURE`].
    pub signature: [u8; 4],
    /// `EFI_FVB_ATTRIBUTES_2` capability and status bits.
    pub attributes: u32,
    /// Length in bytes of the header, including the block map.
    pub header_length: u16,
    /// 16-bit checksum of the header.
    pub checksum: u16,
    /// Offset of the extended header, or zero.
    pub ext_header_offset: u16,
    /// Must be zero.
    pub reserved: u8,
    /// Must be [`FVH_REVISION`].
    pub revision: u8,
}

const_assert_eq!(56, size_of::<FirmwareVolumeHeader>());

/// `EFI_FV_BLOCK_MAP_ENTRY`
///
/// The block map is a run of these entries directly following the header,
/// terminated by an all-zero entry.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct BlockMapEntry {
    /// Number of blocks in this run.
    pub num_blocks: u32,
    /// Length in bytes of each block in this run.
    pub length: u32,
}

const_assert_eq!(8, size_of::<BlockMapEntry>());

impl BlockMapEntry {
    /// Whether this is the block map terminator.
    pub fn is_terminator(&self) -> bool {
        self.num_blocks == 0 && self.length == 0
    }
}
