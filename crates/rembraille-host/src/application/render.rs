//! Text renderings of a display row for the host log.

use rembraille_core::CellBuffer;

/// One row in the three forms the host logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
    /// Unicode braille patterns (U+2800 block).
    pub unicode: String,
    /// North American Braille ASCII, dots 7 and 8 dropped.
    pub ascii: String,
    /// Raw cell bytes as space-separated hex.
    pub hex: String,
}

pub fn render(cells: &CellBuffer) -> RenderedRow {
    let hex = cells
        .as_bytes()
        .iter()
        .map(|c| format!("{c:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    RenderedRow {
        unicode: cells.to_unicode(),
        ascii: cells.to_braille_ascii(),
        hex,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_hello() {
        // Arrange: "hello" in Braille ASCII
        let row = CellBuffer::from_braille_ascii("HELLO");

        // Act
        let rendered = render(&row);

        // Assert
        assert_eq!(rendered.ascii, "HELLO");
        assert_eq!(rendered.unicode, "⠓⠑⠇⠇⠕");
        assert_eq!(rendered.hex, "13 11 07 07 15");
    }

    #[test]
    fn test_render_empty_row() {
        let rendered = render(&CellBuffer::default());
        assert_eq!(rendered.unicode, "");
        assert_eq!(rendered.hex, "");
    }
}
