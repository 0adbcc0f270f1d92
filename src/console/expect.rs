//! Accumulates console output and matches prompts and exit markers.

use tracing::trace;

/// Upper bound on retained console output. Older text is discarded once the
/// buffer grows past it; markers are always matched near the tail.
const MAX_PENDING: usize = 64 * 1024;
/// Amount of output kept after trimming.
const MAX_PENDING_RETAINED: usize = 32 * 1024;

/// Console output that has not yet been consumed by a match.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConsoleBuffer {
    pending: String,
    /// Leading bytes of a UTF-8 sequence split across reads.
    incomplete: Vec<u8>,
}

impl ConsoleBuffer {
    /// Appends raw console bytes. Invalid UTF-8 becomes U+FFFD; a sequence
    /// cut off at the end of `bytes` is held back until the next push.
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        let mut raw = std::mem::take(&mut self.incomplete);
        raw.extend_from_slice(bytes);
        let start = self.pending.len();
        self.decode(&raw);
        trace!(output = %self.pending.get(start..).unwrap_or_default(), "console");
        self.trim();
    }

    fn decode(&mut self, raw: &[u8]) {
        let mut rest = raw;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.pending.push_str(text);
                    return;
                }
                Err(err) => {
                    let Some((valid, after)) = rest.split_at_checked(err.valid_up_to()) else {
                        return;
                    };
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.pending.push_str(text);
                    }
                    match err.error_len() {
                        Some(invalid) => {
                            self.pending.push(char::REPLACEMENT_CHARACTER);
                            rest = after.get(invalid..).unwrap_or_default();
                        }
                        None => {
                            self.incomplete = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn trim(&mut self) {
        if self.pending.len() <= MAX_PENDING {
            return;
        }
        let mut cut = self.pending.len().saturating_sub(MAX_PENDING_RETAINED);
        while !self.pending.is_char_boundary(cut) {
            cut += 1;
        }
        self.pending.drain(..cut);
    }

    /// Consumes output up to and including the first occurrence of `needle`.
    pub(crate) fn take_through(&mut self, needle: &str) -> bool {
        let Some(start) = self.pending.find(needle) else {
            return false;
        };
        self.pending.drain(..start + needle.len());
        true
    }

    /// Finds `<marker>:<digits>:` and consumes output through it, returning
    /// the digits as an exit code. The typed `echo '<marker>':$?:` line never
    /// matches because the quote separates the marker from the colon.
    pub(crate) fn take_exit_code(&mut self, marker: &str) -> Option<i32> {
        let needle = format!("{marker}:");
        let mut offset = 0;
        while let Some(found) = self.pending.get(offset..)?.find(&needle) {
            let digits_start = offset + found + needle.len();
            let rest = self.pending.get(digits_start..)?;
            let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits_len > 0 && rest.as_bytes().get(digits_len) == Some(&b':') {
                let code = rest.get(..digits_len)?.parse::<i32>().ok()?;
                self.pending.drain(..digits_start + digits_len + 1);
                return Some(code);
            }
            offset = digits_start;
        }
        None
    }

    /// Returns unconsumed output.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> &str {
        &self.pending
    }
}
