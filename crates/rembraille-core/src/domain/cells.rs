//! Display cells and key input.
//!
//! # Cell encoding (for beginners)
//!
//! A braille cell has up to eight dots.  Each cell travels as one byte where
//! dot 1 is bit 0 and dot 8 is bit 7, so `0x00` is a blank cell and `0x3F`
//! has all six standard dots raised.  Unicode has a matching block starting
//! at U+2800, which makes on-screen rendering a single addition.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First code point of the Unicode braille patterns block.
pub const UNICODE_BRAILLE_BASE: u32 = 0x2800;

/// North American Braille ASCII, indexed by the six-dot pattern (dots 1–6).
const BRAILLE_ASCII: &[u8; 64] =
    b" A1B'K2L@CIF/MSP\"E3H9O6R^DJG>NTQ,*5<-U8V.%[$+X!&;:4\\0Z7(_?W]#Y)=";

/// Errors raised when a cell buffer does not fit the negotiated display.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CellError {
    #[error("cell count mismatch: display has {expected} cells, buffer has {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// An ordered row of display cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellBuffer(Vec<u8>);

impl CellBuffer {
    pub fn new(cells: Vec<u8>) -> Self {
        Self(cells)
    }

    /// A row of `count` blank cells.
    pub fn blank(count: usize) -> Self {
        Self(vec![0; count])
    }

    /// Fits `cells` to exactly `count` cells: short rows are padded with
    /// blanks, long rows are truncated.
    pub fn fit(mut cells: Vec<u8>, count: usize) -> Self {
        cells.resize(count, 0);
        Self(cells)
    }

    /// Builds a row from Braille ASCII text; characters outside the table
    /// become blank cells.
    pub fn from_braille_ascii(text: &str) -> Self {
        Self(text.chars().map(ascii_to_cell).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Checks the row length against the negotiated cell count.
    ///
    /// # Errors
    ///
    /// Returns [`CellError::CountMismatch`] when the lengths differ.
    pub fn validate(&self, expected: usize) -> Result<(), CellError> {
        if self.0.len() != expected {
            return Err(CellError::CountMismatch {
                expected,
                actual: self.0.len(),
            });
        }
        Ok(())
    }

    /// Renders the row as Unicode braille patterns (U+2800 + cell).
    pub fn to_unicode(&self) -> String {
        self.0.iter().map(|&cell| cell_to_unicode(cell)).collect()
    }

    /// Renders the row as Braille ASCII.  Dots 7 and 8 are ignored.
    pub fn to_braille_ascii(&self) -> String {
        self.0
            .iter()
            .map(|&cell| BRAILLE_ASCII[(cell & 0x3F) as usize] as char)
            .collect()
    }
}

impl From<Vec<u8>> for CellBuffer {
    fn from(cells: Vec<u8>) -> Self {
        Self(cells)
    }
}

impl fmt::Display for CellBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_unicode())
    }
}

fn cell_to_unicode(cell: u8) -> char {
    // Every value in 0x2800..=0x28FF is a valid scalar; the fallback is unreachable.
    char::from_u32(UNICODE_BRAILLE_BASE + u32::from(cell)).unwrap_or(' ')
}

fn ascii_to_cell(c: char) -> u8 {
    let upper = c.to_ascii_uppercase();
    BRAILLE_ASCII
        .iter()
        .position(|&b| b as char == upper)
        .map(|i| i as u8)
        .unwrap_or(0)
}

/// A key press or release reported by the physical display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Display-specific key identifier.
    pub code: u16,
    pub pressed: bool,
    /// Microseconds since the Unix epoch at which the guest received the event.
    pub timestamp_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_pads_short_rows_with_blank_cells() {
        let row = CellBuffer::fit(vec![0x01, 0x03], 5);
        assert_eq!(row.as_bytes(), &[0x01, 0x03, 0, 0, 0]);
    }

    #[test]
    fn test_fit_truncates_long_rows() {
        let row = CellBuffer::fit(vec![1, 2, 3, 4], 2);
        assert_eq!(row.as_bytes(), &[1, 2]);
    }

    #[test]
    fn test_validate_reports_both_lengths() {
        assert_eq!(
            CellBuffer::blank(3).validate(40),
            Err(CellError::CountMismatch {
                expected: 40,
                actual: 3
            })
        );
        assert!(CellBuffer::blank(40).validate(40).is_ok());
    }

    #[test]
    fn test_to_unicode_offsets_from_braille_block() {
        // Arrange: dots 1, dots 1-2, all eight dots
        let row = CellBuffer::new(vec![0x01, 0x03, 0xFF]);

        // Act / Assert
        assert_eq!(row.to_unicode(), "\u{2801}\u{2803}\u{28FF}");
    }

    #[test]
    fn test_to_braille_ascii_uses_dot_pattern_table() {
        // a = dot 1, b = dots 1-2, c = dots 1-4, blank
        let row = CellBuffer::new(vec![0x01, 0x03, 0x09, 0x00]);
        assert_eq!(row.to_braille_ascii(), "ABC ");
    }

    #[test]
    fn test_braille_ascii_ignores_dots_seven_and_eight() {
        let row = CellBuffer::new(vec![0x01 | 0x40 | 0x80]);
        assert_eq!(row.to_braille_ascii(), "A");
    }

    #[test]
    fn test_from_braille_ascii_round_trips_text() {
        let row = CellBuffer::from_braille_ascii("hello world");
        assert_eq!(row.to_braille_ascii(), "HELLO WORLD");
        assert_eq!(row.len(), 11);
    }
}
