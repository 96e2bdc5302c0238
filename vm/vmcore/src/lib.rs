// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Core VM device lifecycle abstractions.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod device_state;
pub mod save_restore;
