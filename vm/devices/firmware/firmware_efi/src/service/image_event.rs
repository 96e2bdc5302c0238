// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tracking of image load, unload and relocation events, for symbol
//! loading by debuggers.
//!
//! Each event is sent as a sequence of port writes: a start command naming
//! the kind of event, 16-bit chunks of the image base and size (most
//! significant chunk first), the image path one character at a time, and
//! finally a complete command.

use efi_specs::ports::ImageEventCommand;

/// Longest image path retained. Further characters are dropped.
pub const IMAGE_NAME_MAX: usize = 256;

/// One image event, possibly still being assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEvent {
    /// The start command that opened this event.
    pub kind: ImageEventCommand,
    pub addr0: u64,
    pub addr1: u64,
    pub size0: u64,
    name: Vec<u8>,
    /// Offset of the last path component in `name`.
    file_name_offset: usize,
}

impl ImageEvent {
    fn new(kind: ImageEventCommand) -> Self {
        Self {
            kind,
            addr0: 0,
            addr1: 0,
            size0: 0,
            name: Vec::new(),
            file_name_offset: 0,
        }
    }

    /// The image path, with `/` separators.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// The last component of the image path.
    pub fn file_name(&self) -> String {
        String::from_utf8_lossy(&self.name[self.file_name_offset..]).into_owned()
    }

    fn push_name(&mut self, ch: u8) {
        if self.name.len() >= IMAGE_NAME_MAX {
            return;
        }
        let ch = if ch == b'\\' { b'/' } else { ch };
        self.name.push(ch);
        if ch == b'/' {
            self.file_name_offset = self.name.len();
        }
    }
}

/// Assembles image events from port writes.
#[derive(Debug)]
pub struct ImageEventTracker {
    current: ImageEvent,
    last: Option<ImageEvent>,
}

impl ImageEventTracker {
    pub fn new() -> Self {
        Self {
            current: ImageEvent::new(ImageEventCommand::INVALID),
            last: None,
        }
    }

    /// The most recently completed event.
    pub fn last(&self) -> Option<&ImageEvent> {
        self.last.as_ref()
    }

    /// Handles one raw port value. Returns the event it completed, if any.
    pub fn handle(&mut self, value: u32) -> Option<&ImageEvent> {
        let (command, payload) = ImageEventCommand::decode(value);
        let payload = payload as u64;
        match command {
            ImageEventCommand::START_LOAD32
            | ImageEventCommand::START_LOAD64
            | ImageEventCommand::START_UNLOAD32
            | ImageEventCommand::START_UNLOAD64
            | ImageEventCommand::START_RELOC32
            | ImageEventCommand::START_RELOC64 => {
                self.current = ImageEvent::new(command);
            }
            ImageEventCommand::ADDR0 => {
                self.current.addr0 = (self.current.addr0 << 16) | payload;
            }
            ImageEventCommand::ADDR1 => {
                self.current.addr1 = (self.current.addr1 << 16) | payload;
            }
            ImageEventCommand::SIZE0 => {
                self.current.size0 = (self.current.size0 << 16) | payload;
            }
            ImageEventCommand::NAME => {
                self.current.push_name(payload as u8);
            }
            ImageEventCommand::COMPLETE => {
                let event = std::mem::replace(
                    &mut self.current,
                    ImageEvent::new(ImageEventCommand::INVALID),
                );
                return Some(&*self.last.insert(event));
            }
            _ => {
                tracing::debug!(?command, payload, "unknown image event command");
            }
        }
        None
    }
}
