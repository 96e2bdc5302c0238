// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interfaces that must be implemented by the platform hosting the EFI
//! helper device.

pub mod halt;
pub mod rom;
