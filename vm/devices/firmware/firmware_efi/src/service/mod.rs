// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Various EFI helper device subsystems.

pub mod debug_log;
pub mod image_event;
pub mod info;
pub mod nvram;
pub mod panic;
