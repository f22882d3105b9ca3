//! Newline framing for byte streams.

use heapless::Vec;
use log::warn;

/// Accumulates bytes until `\n` or `\r`.
///
/// A line that grows past `N` bytes is discarded whole; bytes up to the next
/// terminator are dropped with it.
#[derive(Debug, Default)]
pub struct LineBuffer<const N: usize> {
    buf: Vec<u8, N>,
    overflowed: bool,
    dropped: u32,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            overflowed: false,
            dropped: 0,
        }
    }

    /// Lines discarded for overflow or bad UTF-8.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed bytes, calling `on_line` for every complete non-empty line.
    pub fn feed(&mut self, data: &[u8], mut on_line: impl FnMut(&str)) {
        for &byte in data {
            if byte == b'\n' || byte == b'\r' {
                self.finish_line(&mut on_line);
                continue;
            }
            if self.overflowed {
                continue;
            }
            if self.buf.push(byte).is_err() {
                warn!("Command line longer than {} bytes dropped", N);
                self.buf.clear();
                self.overflowed = true;
                self.dropped += 1;
            }
        }
    }

    fn finish_line(&mut self, on_line: &mut impl FnMut(&str)) {
        if self.overflowed {
            self.overflowed = false;
            return;
        }
        if self.buf.is_empty() {
            return;
        }
        match core::str::from_utf8(&self.buf) {
            Ok(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    on_line(line);
                }
            }
            Err(_) => {
                warn!("Dropped command line with invalid UTF-8");
                self.dropped += 1;
            }
        }
        self.buf.clear();
    }
}
