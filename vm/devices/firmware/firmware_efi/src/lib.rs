// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! EFI helper device.
//!
//! A bespoke virtual device that works in-tandem with the EFI firmware
//! running within the guest.
//!
//! The device owns the firmware's view of its own image: at construction it
//! splits the shipped image into the code region (mapped as ROM just below
//! 4 GiB) and the NV data volume (exposed as an emulated flash part directly
//! below the code), and it serves machine configuration to the firmware
//! before any shared memory protocol exists.
//!
//! # Crate Structure
//!
//! ### `mod service`:
//!
//! The individual device services. The info port, the panic port, the debug
//! port and the image event port each have their own state and handler, and
//! never share state with each other. NVRAM restore and write back live here
//! too.
//!
//! The top-level `EfiDevice` code in `lib.rs` takes care of IO port and MMIO
//! routing in one central location, so services only expose plain handler
//! functions and can be tested without a device.
//!
//! ### `pub mod platform`
//!
//! Interface traits that must be implemented by the platform hosting the
//! device: mapping the firmware code into guest memory, and stopping the VM
//! when the firmware reports a fatal error.
//!
//! ### `pub mod volume`
//!
//! Parsing of the firmware image layout.

#![expect(missing_docs)]
#![forbid(unsafe_code)]

pub mod platform;
pub mod volume;

mod service;

pub use service::image_event::ImageEvent;
pub use service::nvram::NvramInitError;

use chipset_device::ChipsetDevice;
use chipset_device::io::IoError;
use chipset_device::io::IoResult;
use chipset_device::mmio::MmioIntercept;
use chipset_device::pio::PortIoIntercept;
use efi_flash::FlashCore;
use efi_flash::FlashGeometryError;
use efi_nvram_storage::ByteStore;
use efi_nvram_storage::NvramPersistError;
use efi_nvram_storage::NvramPersistence;
use efi_specs::ports::DEBUG_PORT_OFFSET;
use efi_specs::ports::IMAGE_EVENT_PORT_OFFSET;
use efi_specs::ports::INFO_PORT_OFFSET;
use efi_specs::ports::InfoIndex;
use efi_specs::ports::PANIC_PORT_OFFSET;
use efi_specs::ports::PORT_BASE;
use efi_specs::ports::PORT_COUNT;
use efi_specs::ports::PanicCommand;
use platform::halt::HaltReason;
use platform::halt::HaltVm;
use platform::rom::MapFirmwareRom;
use platform::rom::UnmapRom;
use service::debug_log::DebugLog;
use service::image_event::ImageEventTracker;
use service::info::BootInfo;
use service::info::InfoChannel;
use service::info::InfoError;
use service::panic::PanicMessage;
use std::ops::RangeInclusive;
use thiserror::Error;
use vmcore::device_state::ChangeDeviceState;
use volume::FirmwareVolume;
use volume::VolumeError;

/// Static configuration reported to the firmware.
pub mod config {
    use efi_specs::ports::ApicMode;

    /// Flash id reported in read-id mode unless configured otherwise.
    pub const DEFAULT_FLASH_ID: u16 = 0xa289;

    /// EFI device static configuration data.
    #[derive(Debug, Clone)]
    pub struct EfiConfig {
        /// Kernel/bootloader command line. Terminated with a NUL if needed.
        pub boot_args: String,
        /// Opaque device property blob.
        pub device_props: Vec<u8>,
        /// Front side bus frequency, in Hz. Zero lets the firmware measure it.
        pub fsb_frequency: u64,
        /// CPU frequency, in Hz. Zero lets the firmware measure it.
        pub cpu_frequency: u64,
        /// TSC frequency, in Hz. Zero lets the firmware measure it.
        pub tsc_frequency: u64,
        /// Preferred GOP mode, or `u32::MAX` to let the firmware pick.
        pub graphics_mode: u32,
        pub horizontal_resolution: u32,
        pub vertical_resolution: u32,
        /// PCI express config space window. Zero size if there is none.
        pub mcfg_base: u64,
        pub mcfg_size: u64,
        pub apic_mode: ApicMode,
        /// Number of processors present at boot.
        pub cpu_count: u32,
        /// Number of processors that may ever be present.
        pub cpu_count_max: u32,
        /// Manufacturer/device id of the emulated NVRAM flash part.
        pub flash_id: u16,
        /// Where the NVRAM content is persisted.
        pub nvram_namespace: String,
        pub nvram_key: String,
    }

    impl Default for EfiConfig {
        fn default() -> Self {
            Self {
                boot_args: String::new(),
                device_props: Vec::new(),
                fsb_frequency: 0,
                cpu_frequency: 0,
                tsc_frequency: 0,
                graphics_mode: u32::MAX,
                horizontal_resolution: 1024,
                vertical_resolution: 768,
                mcfg_base: 0,
                mcfg_size: 0,
                apic_mode: ApicMode::APIC,
                cpu_count: 1,
                cpu_count_max: 1,
                flash_id: DEFAULT_FLASH_ID,
                nvram_namespace: efi_nvram_storage::DEFAULT_NAMESPACE.into(),
                nvram_key: efi_nvram_storage::DEFAULT_KEY.into(),
            }
        }
    }
}

/// EFI device runtime dependencies.
pub struct EfiRuntimeDeps<'a> {
    /// The complete firmware image: NV data volume followed by code.
    pub firmware_image: &'a [u8],
    /// Host storage the NVRAM is persisted to.
    pub nvram_store: Box<dyn ByteStore>,
    /// Maps the firmware code into guest memory.
    pub rom: &'a dyn MapFirmwareRom,
    /// Stops the VM on fatal firmware errors.
    pub halt: Box<dyn HaltVm>,
}

/// Errors which may occur during EFI helper device initialization.
#[derive(Debug, Error)]
pub enum EfiInitError {
    #[error("invalid firmware image")]
    Volume(#[source] VolumeError),
    #[error("unsupported nvram flash geometry")]
    FlashGeometry(#[source] FlashGeometryError),
    #[error("failed to initialize nvram")]
    Nvram(#[source] NvramInitError),
    #[error("error mapping firmware code")]
    Rom(#[source] std::io::Error),
}

const PORT_RANGE_END: u16 = PORT_BASE + PORT_COUNT - 1;

#[derive(Debug)]
struct EfiDeviceState {
    info: InfoChannel,
    debug_log: DebugLog,
    panic: PanicMessage,
    image_events: ImageEventTracker,
}

impl EfiDeviceState {
    fn new() -> Self {
        Self {
            info: InfoChannel::new(),
            debug_log: DebugLog::new(),
            panic: PanicMessage::new(),
            image_events: ImageEventTracker::new(),
        }
    }
}

/// EFI helper device.
pub struct EfiDevice {
    // Fixed configuration
    volume: FirmwareVolume,
    boot_info: BootInfo,
    mmio_regions: Vec<(&'static str, RangeInclusive<u64>)>,

    // Runtime glue
    nvram: NvramPersistence,
    halt: Box<dyn HaltVm>,
    _rom_mems: Vec<Box<dyn UnmapRom>>,

    // Sub-emulators
    flash: FlashCore,

    // Volatile state
    state: EfiDeviceState,
}

impl EfiDevice {
    /// Create a new instance of the EFI helper device.
    pub fn new(
        runtime_deps: EfiRuntimeDeps<'_>,
        config: config::EfiConfig,
    ) -> Result<EfiDevice, EfiInitError> {
        let EfiRuntimeDeps {
            firmware_image,
            nvram_store,
            rom,
            halt,
        } = runtime_deps;

        let volume = volume::parse(firmware_image).map_err(EfiInitError::Volume)?;
        tracing::info!(
            image_size = volume.image_size,
            nvram_size = volume.nvram_size,
            nvram_load_address = format_args!("{:#x}", volume.nvram_load_address),
            code_load_address = format_args!("{:#x}", volume.code_load_address),
            "parsed firmware image"
        );

        let mut flash = FlashCore::new(config.flash_id, volume.nvram_size, volume.block_size)
            .map_err(EfiInitError::FlashGeometry)?;
        let nvram = NvramPersistence::with_location(
            nvram_store,
            config.nvram_namespace.clone(),
            config.nvram_key.clone(),
        );
        service::nvram::restore_or_seed(
            &mut flash,
            &nvram,
            &firmware_image[volume.nvram_range()],
        )
        .map_err(EfiInitError::Nvram)?;

        let rom_mem = rom
            .map_rom(volume.code_load_address, &firmware_image[volume.code_range()])
            .map_err(EfiInitError::Rom)?;

        let nvram_gpa = volume.nvram_gpa_range();
        let mmio_regions = vec![("efi-nvram", nvram_gpa.start..=nvram_gpa.end - 1)];

        Ok(EfiDevice {
            boot_info: BootInfo::new(&config, &volume),
            volume,
            mmio_regions,
            nvram,
            halt,
            _rom_mems: vec![rom_mem],
            flash,
            state: EfiDeviceState::new(),
        })
    }

    /// The parsed firmware image layout.
    pub fn volume(&self) -> &FirmwareVolume {
        &self.volume
    }

    /// The NVRAM flash part.
    pub fn flash(&self) -> &FlashCore {
        &self.flash
    }

    /// The most recent image event reported by the firmware.
    pub fn last_image_event(&self) -> Option<&ImageEvent> {
        self.state.image_events.last()
    }

    /// Writes the current NVRAM content back to the store.
    pub fn flush_nvram(&mut self) -> Result<(), NvramPersistError> {
        service::nvram::persist(&self.flash, &mut self.nvram)
    }

    /// Writes NVRAM back, logging failures. Losing NVRAM changes is
    /// preferable to blocking shutdown.
    fn flush_nvram_logged(&mut self) {
        if let Err(err) = self.flush_nvram() {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "failed to persist nvram"
            );
        }
    }

    fn halt_vm(&self, reason: HaltReason) {
        tracing::error!(?reason, "firmware requested vm halt");
        self.halt.halt(reason);
    }

    fn read_info_size(&mut self) -> Result<u32, IoError> {
        match self.state.info.read_size(&self.boot_info) {
            Ok(size) => Ok(size),
            Err(InfoError::SizeAlreadyQueried(selector)) => {
                tracing::debug!(?selector, "info size queried twice");
                Err(IoError::InvalidAccessSize)
            }
            Err(err @ InfoError::UnknownSelector(_)) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    "firmware and device disagree on info items"
                );
                if cfg!(debug_assertions) {
                    self.halt_vm(HaltReason::InternalError(err.to_string()));
                }
                Ok(0)
            }
        }
    }

    fn read_info_byte(&mut self) -> u8 {
        self.state
            .info
            .read_byte(&self.boot_info)
            .unwrap_or_else(|| {
                tracing::debug!(
                    selector = ?self.state.info.selector(),
                    "info data read before size query"
                );
                0
            })
    }

    fn write_panic(&mut self, data: &[u8]) -> Result<(), IoError> {
        let value = match *data {
            [lo, hi] => u16::from_le_bytes([lo, hi]) as u32,
            [a, b, c, d] => u32::from_le_bytes([a, b, c, d]),
            _ => return Err(IoError::InvalidAccessSize),
        };
        let Ok(command) = u16::try_from(value) else {
            tracing::debug!(value, "out of range panic port command");
            return Ok(());
        };
        if let Some(reason) = self.state.panic.handle(PanicCommand(command)) {
            self.halt_vm(reason);
        }
        Ok(())
    }

    fn write_debug(&mut self, data: &[u8]) -> Result<(), IoError> {
        let [ch] = *data else {
            return Err(IoError::InvalidAccessSize);
        };
        if let Some(line) = self.state.debug_log.push(ch) {
            tracing::info!(target: "firmware_efi::debug", "{line}");
        }
        Ok(())
    }

    fn write_image_event(&mut self, data: &[u8]) -> Result<(), IoError> {
        let value = u32::from_le_bytes(data.try_into().map_err(|_| IoError::InvalidAccessSize)?);
        if let Some(event) = self.state.image_events.handle(value) {
            tracing::debug!(
                kind = ?event.kind,
                addr0 = format_args!("{:#x}", event.addr0),
                addr1 = format_args!("{:#x}", event.addr1),
                size0 = format_args!("{:#x}", event.size0),
                name = %event.name(),
                file_name = %event.file_name(),
                "firmware image event"
            );
        }
        Ok(())
    }

    fn flash_offset(&self, addr: u64) -> Option<u32> {
        let range = self.volume.nvram_gpa_range();
        range.contains(&addr).then(|| (addr - range.start) as u32)
    }
}

impl ChangeDeviceState for EfiDevice {
    fn start(&mut self) {}

    fn stop(&mut self) {
        self.flush_nvram_logged();
    }

    fn reset(&mut self) {
        if let Some(line) = self.state.debug_log.flush() {
            tracing::info!(target: "firmware_efi::debug", "{line}");
        }
        self.flash.reset();
        self.state = EfiDeviceState::new();
    }
}

impl ChipsetDevice for EfiDevice {
    fn supports_pio(&mut self) -> Option<&mut dyn PortIoIntercept> {
        Some(self)
    }

    fn supports_mmio(&mut self) -> Option<&mut dyn MmioIntercept> {
        Some(self)
    }
}

impl PortIoIntercept for EfiDevice {
    fn io_read(&mut self, io_port: u16, data: &mut [u8]) -> IoResult {
        let Some(offset) = io_port.checked_sub(PORT_BASE).filter(|&o| o < PORT_COUNT) else {
            return IoResult::Err(IoError::InvalidRegister);
        };

        if offset != INFO_PORT_OFFSET {
            // Write-only ports.
            data.fill(!0);
            return IoResult::Ok;
        }

        match data.len() {
            4 => match self.read_info_size() {
                Ok(size) => data.copy_from_slice(&size.to_le_bytes()),
                Err(err) => return IoResult::Err(err),
            },
            1 => data[0] = self.read_info_byte(),
            _ => return IoResult::Err(IoError::InvalidAccessSize),
        }

        tracing::trace!(
            selector = ?self.state.info.selector(),
            cursor = self.state.info.cursor(),
            ?data,
            "info read"
        );
        IoResult::Ok
    }

    fn io_write(&mut self, io_port: u16, data: &[u8]) -> IoResult {
        let Some(offset) = io_port.checked_sub(PORT_BASE).filter(|&o| o < PORT_COUNT) else {
            return IoResult::Err(IoError::InvalidRegister);
        };

        let r = match offset {
            INFO_PORT_OFFSET => match <[u8; 4]>::try_from(data) {
                Ok(v) => {
                    let selector = InfoIndex(u32::from_le_bytes(v));
                    tracing::trace!(?selector, "info select");
                    self.state.info.select(selector);
                    Ok(())
                }
                Err(_) => Err(IoError::InvalidAccessSize),
            },
            PANIC_PORT_OFFSET => self.write_panic(data),
            DEBUG_PORT_OFFSET => self.write_debug(data),
            IMAGE_EVENT_PORT_OFFSET => self.write_image_event(data),
            _ => {
                tracing::trace!(offset, ?data, "write to unused port");
                Ok(())
            }
        };

        match r {
            Ok(()) => IoResult::Ok,
            Err(err) => IoResult::Err(err),
        }
    }

    fn get_static_regions(&mut self) -> &[(&str, RangeInclusive<u16>)] {
        &[("firmware_efi", PORT_BASE..=PORT_RANGE_END)]
    }
}

impl MmioIntercept for EfiDevice {
    fn mmio_read(&mut self, addr: u64, data: &mut [u8]) -> IoResult {
        let Some(offset) = self.flash_offset(addr) else {
            return IoResult::Err(IoError::InvalidRegister);
        };
        self.flash.read_into(offset, data);
        IoResult::Ok
    }

    fn mmio_write(&mut self, addr: u64, data: &[u8]) -> IoResult {
        let Some(offset) = self.flash_offset(addr) else {
            return IoResult::Err(IoError::InvalidRegister);
        };
        self.flash.write(offset, data);
        IoResult::Ok
    }

    fn get_static_regions(&mut self) -> &[(&str, RangeInclusive<u64>)] {
        &self.mmio_regions
    }
}

mod save_restore {
    use super::*;
    use vmcore::save_restore::RestoreError;
    use vmcore::save_restore::SaveError;
    use vmcore::save_restore::SaveRestore;

    pub mod state {
        use efi_flash::FlashCore;
        use serde::Deserialize;
        use serde::Serialize;
        use vmcore::save_restore::SaveRestore;

        pub const SAVED_STATE_VERSION: u32 = 1;

        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct SavedState {
            pub version: u32,
            pub info_selector: u32,
            pub info_cursor: i32,
            pub flash: <FlashCore as SaveRestore>::SavedState,
        }
    }

    impl SaveRestore for EfiDevice {
        type SavedState = state::SavedState;

        fn save(&mut self) -> Result<Self::SavedState, SaveError> {
            // Snapshots are a persistence point for NVRAM too.
            self.flush_nvram_logged();

            let (info_selector, info_cursor) = self.state.info.save();
            Ok(state::SavedState {
                version: state::SAVED_STATE_VERSION,
                info_selector,
                info_cursor,
                flash: self
                    .flash
                    .save()
                    .map_err(|e| SaveError::ChildError("flash".into(), Box::new(e)))?,
            })
        }

        fn restore(&mut self, state: Self::SavedState) -> Result<(), RestoreError> {
            let state::SavedState {
                version,
                info_selector,
                info_cursor,
                flash,
            } = state;

            if version != state::SAVED_STATE_VERSION {
                return Err(RestoreError::UnsupportedVersion(version));
            }
            let info = InfoChannel::restore(info_selector, info_cursor).ok_or_else(|| {
                RestoreError::InvalidSavedState(anyhow::anyhow!(
                    "invalid info cursor {info_cursor}"
                ))
            })?;
            self.flash
                .restore(flash)
                .map_err(|e| RestoreError::ChildError("flash".into(), Box::new(e)))?;

            self.state = EfiDeviceState::new();
            self.state.info = info;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EfiConfig;
    use crate::volume::tests::build_image;
    use crate::volume::tests::minimal_image;
    use efi_flash::FlashCommand;
    use efi_nvram_storage::ByteStoreError;
    use efi_nvram_storage::in_memory::InMemoryByteStore;
    use efi_specs::ports::ImageEventCommand;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use test_log::test;
    use vmcore::save_restore::RestoreError;
    use vmcore::save_restore::SaveRestore;

    const INFO_PORT: u16 = PORT_BASE + INFO_PORT_OFFSET;
    const PANIC_PORT: u16 = PORT_BASE + PANIC_PORT_OFFSET;
    const DEBUG_PORT: u16 = PORT_BASE + DEBUG_PORT_OFFSET;
    const IMAGE_EVENT_PORT: u16 = PORT_BASE + IMAGE_EVENT_PORT_OFFSET;

    #[derive(Default)]
    struct TestRom {
        mapped: Mutex<Vec<(u64, Vec<u8>)>>,
    }

    struct TestRomMapping;

    impl UnmapRom for TestRomMapping {}

    impl MapFirmwareRom for TestRom {
        fn map_rom(&self, gpa: u64, data: &[u8]) -> std::io::Result<Box<dyn UnmapRom>> {
            self.mapped.lock().push((gpa, data.to_vec()));
            Ok(Box::new(TestRomMapping))
        }
    }

    #[derive(Clone, Default)]
    struct HaltRecorder(Arc<Mutex<Vec<HaltReason>>>);

    impl HaltVm for HaltRecorder {
        fn halt(&self, reason: HaltReason) {
            self.0.lock().push(reason);
        }
    }

    /// A store that stays inspectable after being handed to the device.
    #[derive(Clone, Default)]
    struct SharedStore(Arc<Mutex<InMemoryByteStore>>);

    impl ByteStore for SharedStore {
        fn query_size(&self, namespace: &str, key: &str) -> Result<Option<u64>, ByteStoreError> {
            self.0.lock().query_size(namespace, key)
        }

        fn load_all(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ByteStoreError> {
            self.0.lock().load_all(namespace, key)
        }

        fn write_all(
            &mut self,
            namespace: &str,
            key: &str,
            data: &[u8],
        ) -> Result<(), ByteStoreError> {
            self.0.lock().write_all(namespace, key, data)
        }
    }

    struct Harness {
        device: EfiDevice,
        rom: TestRom,
        halts: HaltRecorder,
        store: SharedStore,
    }

    impl Harness {
        fn new(image: &[u8], config: EfiConfig) -> Self {
            Self::with_store(image, config, SharedStore::default())
        }

        fn with_store(image: &[u8], config: EfiConfig, store: SharedStore) -> Self {
            let rom = TestRom::default();
            let halts = HaltRecorder::default();
            let device = EfiDevice::new(
                EfiRuntimeDeps {
                    firmware_image: image,
                    nvram_store: Box::new(store.clone()),
                    rom: &rom,
                    halt: Box::new(halts.clone()),
                },
                config,
            )
            .unwrap();
            Self {
                device,
                rom,
                halts,
                store,
            }
        }

        fn select(&mut self, index: InfoIndex) {
            self.device
                .io_write(INFO_PORT, &index.0.to_le_bytes())
                .unwrap();
        }

        fn read_size(&mut self) -> u32 {
            let mut data = [0; 4];
            self.device.io_read(INFO_PORT, &mut data).unwrap();
            u32::from_le_bytes(data)
        }

        fn read_byte(&mut self) -> u8 {
            let mut data = [0; 1];
            self.device.io_read(INFO_PORT, &mut data).unwrap();
            data[0]
        }

        fn panic(&mut self, command: PanicCommand) {
            self.device
                .io_write(PANIC_PORT, &command.0.to_le_bytes())
                .unwrap();
        }

        fn nvram_base(&self) -> u64 {
            self.device.volume().nvram_load_address
        }

        fn persisted(&self) -> Option<Vec<u8>> {
            self.store.0.lock().get("efi", "nvram").map(<[u8]>::to_vec)
        }
    }

    #[test]
    fn construction_maps_code_and_seeds_nvram() {
        let image = minimal_image();
        let mut h = Harness::new(&image, EfiConfig::default());

        let mapped = h.rom.mapped.lock().clone();
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].0, 0xffff_f000);
        assert_eq!(mapped[0].1, &image[4096..]);
        assert_eq!(&mapped[0].1[..4], b"CODE");

        assert_eq!(h.device.flash().data(), &image[..4096]);

        let regions = MmioIntercept::get_static_regions(&mut h.device);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].1, 0xffff_e000..=0xffff_efff);
        let ports = PortIoIntercept::get_static_regions(&mut h.device);
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].1, 0xef10..=0xef17);
    }

    #[test]
    fn construction_restores_persisted_nvram() {
        let image = minimal_image();
        let store = SharedStore::default();
        store.0.lock().write_all("efi", "nvram", &[0x3c; 4096]).unwrap();

        let h = Harness::with_store(&image, EfiConfig::default(), store);
        assert!(h.device.flash().data().iter().all(|&b| b == 0x3c));
    }

    #[test]
    fn construction_honors_nvram_location() {
        let image = minimal_image();
        let store = SharedStore::default();
        store.0.lock().write_all("vm7", "vars", &[0x3c; 4096]).unwrap();

        let config = EfiConfig {
            nvram_namespace: "vm7".into(),
            nvram_key: "vars".into(),
            ..EfiConfig::default()
        };
        let h = Harness::with_store(&image, config, store);
        assert_eq!(h.device.flash().data()[0], 0x3c);
    }

    #[test]
    fn construction_rejects_mismatched_nvram() {
        let image = minimal_image();
        let store = SharedStore::default();
        store.0.lock().write_all("efi", "nvram", &[0; 100]).unwrap();

        let rom = TestRom::default();
        let err = EfiDevice::new(
            EfiRuntimeDeps {
                firmware_image: &image,
                nvram_store: Box::new(store),
                rom: &rom,
                halt: Box::new(HaltRecorder::default()),
            },
            EfiConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            EfiInitError::Nvram(NvramInitError::ConfigMismatch {
                stored: 100,
                expected: 4096
            })
        ));
        assert!(rom.mapped.lock().is_empty());
    }

    #[test]
    fn construction_rejects_bad_image() {
        let mut image = minimal_image();
        image[40..44].copy_from_slice(b"JUNK");
        let rom = TestRom::default();
        let err = EfiDevice::new(
            EfiRuntimeDeps {
                firmware_image: &image,
                nvram_store: Box::new(InMemoryByteStore::new()),
                rom: &rom,
                halt: Box::new(HaltRecorder::default()),
            },
            EfiConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            EfiInitError::Volume(VolumeError::InvalidSignature(_))
        ));
    }

    #[test]
    fn info_port_streams_u64() {
        let config = EfiConfig {
            cpu_frequency: 2_400_000_000,
            ..EfiConfig::default()
        };
        let mut h = Harness::new(&minimal_image(), config);

        h.select(InfoIndex::CPU_FREQUENCY);
        assert_eq!(h.read_size(), 8);
        let bytes: Vec<u8> = (0..8).map(|_| h.read_byte()).collect();
        assert_eq!(bytes, 2_400_000_000_u64.to_le_bytes());
        assert_eq!(h.read_byte(), 0);
    }

    #[test]
    fn info_port_access_sizes() {
        let mut h = Harness::new(&minimal_image(), EfiConfig::default());

        assert_eq!(
            h.device.io_write(INFO_PORT, &[1, 0]),
            IoResult::Err(IoError::InvalidAccessSize)
        );

        h.select(InfoIndex::CPU_COUNT_CURRENT);
        // byte read before the size query
        assert_eq!(h.read_byte(), 0);
        assert_eq!(h.read_size(), 4);
        // second size query
        let mut data = [0; 4];
        assert_eq!(
            h.device.io_read(INFO_PORT, &mut data),
            IoResult::Err(IoError::InvalidAccessSize)
        );
        let mut data = [0; 2];
        assert_eq!(
            h.device.io_read(INFO_PORT, &mut data),
            IoResult::Err(IoError::InvalidAccessSize)
        );
        assert_eq!(h.read_byte(), 1);
    }

    #[test]
    fn unknown_info_selector_halts_debug_builds() {
        let mut h = Harness::new(&minimal_image(), EfiConfig::default());
        h.select(InfoIndex(0x99));
        assert_eq!(h.read_size(), 0);
        assert_eq!(h.read_byte(), 0);

        let halts = h.halts.0.lock().clone();
        if cfg!(debug_assertions) {
            assert!(matches!(halts.as_slice(), [HaltReason::InternalError(_)]));
        } else {
            assert!(halts.is_empty());
        }
    }

    #[test]
    fn side_channel_reads_are_all_ones() {
        let mut h = Harness::new(&minimal_image(), EfiConfig::default());
        for port in [PANIC_PORT, DEBUG_PORT, IMAGE_EVENT_PORT, PORT_BASE + 7] {
            let mut data = [0; 4];
            h.device.io_read(port, &mut data).unwrap();
            assert_eq!(data, [0xff; 4]);
        }
        let mut data = [0; 1];
        assert_eq!(
            h.device.io_read(PORT_BASE + 8, &mut data),
            IoResult::Err(IoError::InvalidRegister)
        );
        assert_eq!(
            h.device.io_read(PORT_BASE - 1, &mut data),
            IoResult::Err(IoError::InvalidRegister)
        );
    }

    #[test]
    fn panic_message_halts_vm() {
        let mut h = Harness::new(&minimal_image(), EfiConfig::default());
        h.panic(PanicCommand::START_MSG);
        for &ch in b"no boot device\r\n" {
            h.panic(PanicCommand::message(ch).unwrap());
        }
        assert!(h.halts.0.lock().is_empty());

        // 32-bit writes are accepted too
        h.device
            .io_write(PANIC_PORT, &(PanicCommand::END_MSG.0 as u32).to_le_bytes())
            .unwrap();
        assert_eq!(
            h.halts.0.lock().as_slice(),
            [HaltReason::FirmwarePanic("no boot device\n".into())]
        );
    }

    #[test]
    fn trap_halts_vm() {
        let mut h = Harness::new(&minimal_image(), EfiConfig::default());
        h.panic(PanicCommand::THUNK_TRAP);
        assert_eq!(
            h.halts.0.lock().as_slice(),
            [HaltReason::UnexpectedTrap(PanicCommand::THUNK_TRAP)]
        );
        assert_eq!(
            h.device.io_write(PANIC_PORT, &[2]),
            IoResult::Err(IoError::InvalidAccessSize)
        );
    }

    #[test]
    fn debug_port_takes_bytes() {
        let mut h = Harness::new(&minimal_image(), EfiConfig::default());
        for &ch in b"hello\n" {
            h.device.io_write(DEBUG_PORT, &[ch]).unwrap();
        }
        assert_eq!(
            h.device.io_write(DEBUG_PORT, &[b'a', b'b']),
            IoResult::Err(IoError::InvalidAccessSize)
        );
    }

    #[test]
    fn image_events_are_recorded() {
        let mut h = Harness::new(&minimal_image(), EfiConfig::default());
        let mut send = |cmd: ImageEventCommand, payload: u16| {
            h.device
                .io_write(IMAGE_EVENT_PORT, &cmd.encode(payload).to_le_bytes())
                .unwrap();
        };
        send(ImageEventCommand::START_LOAD64, 0);
        send(ImageEventCommand::ADDR0, 0x7f00);
        send(ImageEventCommand::ADDR0, 0x1000);
        send(ImageEventCommand::SIZE0, 0x2000);
        for ch in "Shell\\Shell.efi".bytes() {
            send(ImageEventCommand::NAME, ch as u16);
        }
        send(ImageEventCommand::COMPLETE, 0);

        let event = h.device.last_image_event().unwrap();
        assert_eq!(event.kind, ImageEventCommand::START_LOAD64);
        assert_eq!(event.addr0, 0x7f00_1000);
        assert_eq!(event.size0, 0x2000);
        assert_eq!(event.name(), "Shell/Shell.efi");
        assert_eq!(event.file_name(), "Shell.efi");
    }

    #[test]
    fn nvram_is_programmed_through_mmio() {
        let mut h = Harness::new(&minimal_image(), EfiConfig::default());
        let base = h.nvram_base();

        // erase the only block, then program one byte
        h.device
            .mmio_write(base + 0x20, &[FlashCommand::ERASE_SETUP.0])
            .unwrap();
        h.device
            .mmio_write(base + 0x20, &[FlashCommand::ERASE_CONFIRM.0])
            .unwrap();
        h.device
            .mmio_write(base + 0x30, &[FlashCommand::WRITE.0])
            .unwrap();
        h.device.mmio_write(base + 0x30, &[0x42]).unwrap();
        h.device
            .mmio_write(base, &[FlashCommand::ARRAY_READ.0])
            .unwrap();

        let mut data = [0; 2];
        h.device.mmio_read(base + 0x30, &mut data).unwrap();
        assert_eq!(data, [0x42, 0xff]);

        h.device.mmio_write(base, &[FlashCommand::READ_ID.0]).unwrap();
        h.device.mmio_read(base, &mut data).unwrap();
        assert_eq!(data, [0x89, 0xa2]);

        assert_eq!(
            h.device.mmio_read(base - 1, &mut data),
            IoResult::Err(IoError::InvalidRegister)
        );
        assert_eq!(
            h.device.mmio_write(base + 4096, &[0]),
            IoResult::Err(IoError::InvalidRegister)
        );
    }

    #[test]
    fn stop_persists_nvram() {
        let image = minimal_image();
        let mut h = Harness::new(&image, EfiConfig::default());
        assert_eq!(h.persisted(), None);

        let base = h.nvram_base();
        h.device
            .mmio_write(base + 0x200, &[FlashCommand::WRITE.0, 0x77])
            .unwrap();
        h.device.stop();

        let persisted = h.persisted().unwrap();
        assert_eq!(persisted.len(), 4096);
        assert_eq!(persisted[0x201], 0x77);

        // the next boot sees the written content
        let h2 = Harness::with_store(&image, EfiConfig::default(), h.store.clone());
        assert_eq!(h2.device.flash().data(), persisted.as_slice());
    }

    #[test]
    fn persistence_failure_at_stop_is_not_fatal() {
        struct ReadOnlyStore;

        impl ByteStore for ReadOnlyStore {
            fn query_size(&self, _: &str, _: &str) -> Result<Option<u64>, ByteStoreError> {
                Ok(None)
            }

            fn load_all(&self, _: &str, _: &str) -> Result<Option<Vec<u8>>, ByteStoreError> {
                Ok(None)
            }

            fn write_all(&mut self, _: &str, _: &str, _: &[u8]) -> Result<(), ByteStoreError> {
                Err(ByteStoreError::new(anyhow::anyhow!("read only")))
            }
        }

        let image = minimal_image();
        let rom = TestRom::default();
        let mut device = EfiDevice::new(
            EfiRuntimeDeps {
                firmware_image: &image,
                nvram_store: Box::new(ReadOnlyStore),
                rom: &rom,
                halt: Box::new(HaltRecorder::default()),
            },
            EfiConfig::default(),
        )
        .unwrap();

        device.stop();
        assert!(device.save().is_ok());
        assert!(device.flush_nvram().is_err());
    }

    #[test]
    fn reset_keeps_nvram_and_clears_protocol_state() {
        let mut h = Harness::new(&minimal_image(), EfiConfig::default());
        let base = h.nvram_base();
        h.device
            .mmio_write(base + 0x100, &[FlashCommand::WRITE.0, 0x12])
            .unwrap();
        h.device
            .mmio_write(base, &[FlashCommand::STATUS_READ.0])
            .unwrap();
        h.select(InfoIndex::STACK_SIZE);
        h.read_size();
        h.device.io_write(DEBUG_PORT, &[b'x']).unwrap();

        h.device.reset();

        assert_eq!(h.device.flash().command(), FlashCommand::ARRAY_READ);
        assert_eq!(h.device.flash().data()[0x101], 0x12);
        // the info channel is back to "size not queried"
        assert_eq!(h.read_byte(), 0);
        assert_eq!(h.read_size(), 0);
    }

    #[test]
    fn save_restore_round_trip() {
        let image = build_image(0x2000, 0x1000, 0x3000);
        let mut h = Harness::new(&image, EfiConfig::default());
        let base = h.nvram_base();
        h.device
            .mmio_write(base + 0x1800, &[FlashCommand::WRITE.0, 0xab])
            .unwrap();
        h.device
            .mmio_write(base, &[FlashCommand::ERASE_SETUP.0])
            .unwrap();
        h.select(InfoIndex::MCFG_BASE);
        h.read_size();
        h.read_byte();

        let saved = h.device.save().unwrap();
        // saving also persists
        assert_eq!(h.persisted().unwrap()[0x1801], 0xab);

        let json = serde_json::to_vec(&saved).unwrap();
        let saved: <EfiDevice as SaveRestore>::SavedState = serde_json::from_slice(&json).unwrap();

        let mut h2 = Harness::new(&image, EfiConfig::default());
        h2.device.restore(saved.clone()).unwrap();
        assert_eq!(h2.device.save().unwrap(), saved);
        assert_eq!(h2.device.flash().data()[0x1801], 0xab);

        // the pending erase completes against the restored device
        h2.device
            .mmio_write(base + 0x1000, &[FlashCommand::ERASE_CONFIRM.0])
            .unwrap();
        assert_eq!(h2.device.flash().data()[0x1801], 0xff);
    }

    #[test]
    fn restore_rejects_other_flash_geometry() {
        let mut h = Harness::new(&build_image(0x2000, 0x1000, 0x3000), EfiConfig::default());
        let saved = h.device.save().unwrap();

        let mut other = Harness::new(&minimal_image(), EfiConfig::default());
        assert!(matches!(
            other.device.restore(saved.clone()),
            Err(RestoreError::ChildError(..))
        ));

        let mut bad = saved;
        bad.info_cursor = -5;
        assert!(matches!(
            h.device.restore(bad),
            Err(RestoreError::InvalidSavedState(_))
        ));
    }
}
