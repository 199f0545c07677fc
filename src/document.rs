//! Document state management and position addressing
//!
//! Positions use the editor-protocol convention: zero-based lines and
//! UTF-16 code-unit character offsets. Scanning works on line bytes, so the
//! conversions between the two live here.

/// Represents the state of a text document
#[derive(Debug, Clone)]
pub struct Document {
    /// The document text content
    pub text: String,
    /// The document version
    pub version: i32,
}

impl Document {
    /// Create a new document with the given text and version
    pub fn new(text: String, version: i32) -> Self {
        Self { text, version }
    }
}

/// Convert a UTF-16 character offset within a line to a byte offset.
///
/// Returns `None` if the offset points past the end of the line. An offset
/// equal to the line's UTF-16 length maps to the end of the line.
pub fn utf16_col_to_byte(line: &str, character: u32) -> Option<usize> {
    let target = character as usize;
    let mut units = 0usize;
    for (byte_idx, ch) in line.char_indices() {
        if units >= target {
            return Some(byte_idx);
        }
        units += ch.len_utf16();
    }
    if units >= target {
        Some(line.len())
    } else {
        None
    }
}

/// Convert a byte offset within a line to a UTF-16 character offset.
///
/// Offsets inside a multi-byte character round down to its start.
pub fn byte_to_utf16_col(line: &str, byte_offset: usize) -> u32 {
    let mut units = 0u32;
    for (byte_idx, ch) in line.char_indices() {
        if byte_idx >= byte_offset {
            return units;
        }
        units += ch.len_utf16() as u32;
    }
    units
}

/// UTF-16 length of a line.
pub fn utf16_len(line: &str) -> u32 {
    line.chars().map(|c| c.len_utf16() as u32).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_round_trip() {
        let line = "name: value";
        assert_eq!(utf16_col_to_byte(line, 0), Some(0));
        assert_eq!(utf16_col_to_byte(line, 6), Some(6));
        assert_eq!(utf16_col_to_byte(line, 11), Some(11));
        assert_eq!(utf16_col_to_byte(line, 12), None);
        assert_eq!(byte_to_utf16_col(line, 6), 6);
    }

    #[test]
    fn test_multibyte_characters() {
        // 'é' is 2 bytes in UTF-8 but 1 UTF-16 unit
        let line = "é: x";
        assert_eq!(utf16_col_to_byte(line, 0), Some(0));
        assert_eq!(utf16_col_to_byte(line, 1), Some(2));
        assert_eq!(byte_to_utf16_col(line, 2), 1);
    }

    #[test]
    fn test_surrogate_pair() {
        // '😀' is 4 bytes in UTF-8 and 2 UTF-16 units
        let line = "a😀b";
        assert_eq!(utf16_len(line), 4);
        assert_eq!(utf16_col_to_byte(line, 1), Some(1));
        assert_eq!(utf16_col_to_byte(line, 3), Some(5));
        assert_eq!(byte_to_utf16_col(line, 5), 3);
    }

    #[test]
    fn test_document_new() {
        let doc = Document::new("text".to_string(), 3);
        assert_eq!(doc.text, "text");
        assert_eq!(doc.version, 3);
    }
}
