//! Length bound for text values pulled out of the document.

use crate::config::defaults::{DEFAULT_MAX_TEXT_BYTES, TRUNCATION_MARKER};

/// Truncates oversized text values to a fixed byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextGuard {
    max_bytes: usize,
}

impl Default for TextGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TEXT_BYTES)
    }
}

impl TextGuard {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(1),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// True once `buffer` holds more than the budget; further text can be dropped.
    pub fn is_saturated(&self, buffer: &str) -> bool {
        buffer.len() > self.max_bytes
    }

    /// Append `text` to an in-flight buffer without growing it far past the budget.
    ///
    /// Keeps one byte beyond the budget so [`TextGuard::apply`] still sees the
    /// value as oversized and marks it.
    pub fn push_bounded(&self, buffer: &mut String, text: &str) {
        let room = (self.max_bytes + 1).saturating_sub(buffer.len());
        if room == 0 {
            return;
        }
        if text.len() <= room {
            buffer.push_str(text);
        } else {
            let cut = floor_char_boundary(text, room);
            buffer.push_str(&text[..cut]);
            // A multi-byte char straddling the cut still has to count as overflow.
            if buffer.len() <= self.max_bytes {
                buffer.push_str(TRUNCATION_MARKER);
            }
        }
    }

    /// Return `value` unchanged if within budget, otherwise truncated at a char
    /// boundary with the truncation marker appended. The flag reports truncation.
    pub fn apply(&self, value: String, field: &str) -> (String, bool) {
        if value.len() <= self.max_bytes {
            return (value, false);
        }

        let original_len = value.len();
        let cut = floor_char_boundary(&value, self.max_bytes);
        let mut truncated = value;
        truncated.truncate(cut);
        truncated.push_str(TRUNCATION_MARKER);

        tracing::warn!(
            "Truncated oversized '{}' text from {} bytes to {} bytes",
            field,
            original_len,
            cut
        );

        (truncated, true)
    }
}

/// Largest index `<= index` that sits on a char boundary of `s`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut cut = index;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}
