// Licensed under the Apache-2.0 license

//! Text staged for the three-line display.

use core::fmt;
use heapless::Vec;

/// Characters per display line.
pub const LINE_WIDTH: usize = 16;

/// Lines on the DOGM163.
pub const LINE_COUNT: usize = 3;

/// Glyph used for characters outside the display's ASCII range.
const REPLACEMENT: u8 = b'?';

/// One display line.
///
/// Implements [`fmt::Write`]; text past [`LINE_WIDTH`] characters is dropped,
/// never wrapped into the next line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Line {
    text: Vec<u8, LINE_WIDTH>,
}

impl Line {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    /// The line as sent to the display: exactly [`LINE_WIDTH`] characters,
    /// space padded.
    pub fn padded(&self) -> impl Iterator<Item = u8> + '_ {
        self.text
            .iter()
            .copied()
            .chain(core::iter::repeat(b' '))
            .take(LINE_WIDTH)
    }
}

impl fmt::Write for Line {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            let byte = if c.is_ascii() { c as u8 } else { REPLACEMENT };
            if self.text.push(byte).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Contents of the whole display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayBuffer {
    lines: [Line; LINE_COUNT],
}

impl DisplayBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Line `index`, counted from the top starting at zero.
    pub fn line_mut(&mut self, index: usize) -> Option<&mut Line> {
        self.lines.get_mut(index)
    }

    #[must_use]
    pub fn line(&self, index: usize) -> Option<&Line> {
        self.lines.get(index)
    }

    pub fn lines(&self) -> &[Line; LINE_COUNT] {
        &self.lines
    }

    pub fn clear(&mut self) {
        self.lines.iter_mut().for_each(Line::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn test_line_formatting_truncates() {
        let mut line = Line::new();
        write!(line, "T = {:>5.1} C", 23.456).unwrap();
        assert_eq!(line.as_bytes(), b"T =  23.5 C");

        write!(line, " and much more text").unwrap();
        assert_eq!(line.as_bytes().len(), LINE_WIDTH);
        assert_eq!(line.as_bytes(), b"T =  23.5 C and ");
    }

    #[test]
    fn test_padding_and_replacement() {
        let mut line = Line::new();
        write!(line, "25\u{b0}C").unwrap();
        let padded: std::vec::Vec<u8> = line.padded().collect();
        assert_eq!(&padded, b"25?C            ");
    }

    #[test]
    fn test_buffer_lines() {
        let mut buffer = DisplayBuffer::new();
        write!(buffer.line_mut(2).unwrap(), "RH 41%").unwrap();
        assert!(buffer.line_mut(3).is_none());
        assert_eq!(buffer.line(2).map(Line::as_bytes), Some(&b"RH 41%"[..]));
        assert!(buffer.line(0).unwrap().as_bytes().is_empty());

        buffer.clear();
        assert!(buffer.lines().iter().all(|l| l.as_bytes().is_empty()));
    }
}
