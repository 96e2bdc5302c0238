// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Trait definition for chipset device state transitions.

/// Trait for transitioning device state.
///
/// All transitions are synchronous: they are only invoked at already
/// serialized lifecycle points, never concurrently with guest IO.
pub trait ChangeDeviceState {
    /// Starts a device, allowing it to interact with the guest.
    ///
    /// Callers must ensure that the device is in a stopped state before calling
    /// this method.
    fn start(&mut self);

    /// Stops a device.
    ///
    /// After this returns, the device must not process any additional work. It
    /// should be in a stable state where it can be saved without losing data
    /// (if it implements the appropriate trait).
    fn stop(&mut self);

    /// Resets the device state to its initial state, for a fresh boot.
    ///
    /// Callers must ensure that the device is in a stopped state before calling
    /// this method.
    fn reset(&mut self);
}
