//! Newline record splitting over a growing byte buffer

/// Accumulates response bytes and yields complete records
///
/// Only bytes after the last newline are retained; everything up to and
/// including a delimiter is handed out once and discarded.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    fragment: Vec<u8>,
    consumed: usize,
}

impl StreamBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes and return every record they complete
    ///
    /// Blank records are skipped and a trailing `\r` is stripped.
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<String> {
        self.consumed += bytes.len();

        let mut records = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.fragment.extend_from_slice(&rest[..pos]);
            if let Some(record) = take_record(&mut self.fragment) {
                records.push(record);
            }
            rest = &rest[pos + 1..];
        }

        self.fragment.extend_from_slice(rest);
        records
    }

    /// Take the unterminated trailing fragment once the source has ended
    pub fn finish(&mut self) -> Option<String> {
        take_record(&mut self.fragment)
    }

    /// Total bytes received so far, which is also the read offset into a
    /// cumulative source
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.consumed
    }

    /// Bytes held back waiting for a delimiter
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.fragment.len()
    }
}

fn take_record(fragment: &mut Vec<u8>) -> Option<String> {
    let bytes = std::mem::take(fragment);
    let text = String::from_utf8_lossy(&bytes);
    let trimmed = text.trim_end_matches('\r');
    if trimmed.trim().is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
