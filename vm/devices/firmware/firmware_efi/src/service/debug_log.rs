// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Line buffering for the firmware's debug output port.

/// Longest line emitted in one piece. Longer output is split.
pub const DEBUG_LINE_MAX: usize = 256;

/// Accumulates debug port characters into lines.
#[derive(Debug, Default)]
pub struct DebugLog {
    line: Vec<u8>,
}

impl DebugLog {
    pub fn new() -> Self {
        Self {
            line: Vec::with_capacity(DEBUG_LINE_MAX),
        }
    }

    /// Adds one character. Returns a completed line, without its
    /// terminator, when one is ready.
    pub fn push(&mut self, ch: u8) -> Option<String> {
        if ch == b'\n' || ch == b'\r' {
            return self.flush();
        }
        self.line.push(ch);
        if self.line.len() >= DEBUG_LINE_MAX {
            return self.flush();
        }
        None
    }

    /// Takes any buffered partial line.
    pub fn flush(&mut self) -> Option<String> {
        if self.line.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        Some(line)
    }
}
