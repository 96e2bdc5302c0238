// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Provides the [`Guid`] type with the same layout as the EFI type `EFI_GUID`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// EFI format GUID.
#[repr(C)]
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, IntoBytes, FromBytes, Immutable, KnownLayout,
)]
#[expect(missing_docs)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

// Default + FromBytes: null-guid is a reasonable return default
impl Default for Guid {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl Guid {
    /// The all-zero GUID.
    pub const ZERO: Self = Self {
        data1: 0,
        data2: 0,
        data3: 0,
        data4: [0; 8],
    };
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An error parsing a GUID.
#[derive(Debug, Error, PartialEq, Eq)]
#[expect(missing_docs)]
pub enum ParseError {
    #[error("invalid GUID length")]
    Length,
    #[error("invalid GUID format")]
    Format,
    #[error("invalid GUID digit")]
    Digit,
}

impl FromStr for Guid {
    type Err = ParseError;

    /// Accepts "{00000000-0000-0000-0000-000000000000}" and
    /// "00000000-0000-0000-0000-000000000000".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = match s.strip_prefix('{') {
            Some(inner) => inner.strip_suffix('}').ok_or(ParseError::Format)?,
            None => s,
        };
        if s.len() != 36 {
            return Err(ParseError::Length);
        }
        if !s.is_ascii() {
            return Err(ParseError::Format);
        }

        let groups: Vec<&str> = s.split('-').collect();
        let [a, b, c, d, e] = groups.as_slice() else {
            return Err(ParseError::Format);
        };
        if [a.len(), b.len(), c.len(), d.len(), e.len()] != [8, 4, 4, 4, 12] {
            return Err(ParseError::Format);
        }

        let hex_u8 = |s: &str| u8::from_str_radix(s, 16).map_err(|_| ParseError::Digit);
        let mut data4 = [0; 8];
        for (i, byte) in data4.iter_mut().enumerate() {
            let src = if i < 2 { &d[i * 2..][..2] } else { &e[(i - 2) * 2..][..2] };
            *byte = hex_u8(src)?;
        }

        Ok(Guid {
            data1: u32::from_str_radix(a, 16).map_err(|_| ParseError::Digit)?,
            data2: u16::from_str_radix(b, 16).map_err(|_| ParseError::Digit)?,
            data3: u16::from_str_radix(c, 16).map_err(|_| ParseError::Digit)?,
            data4,
        })
    }
}
