//! Line framing for the stdio channel: one JSON document per `\n`-terminated
//! line, UTF-8, optionally with every non-ASCII character escaped as `\uXXXX`.

use serde::Serialize;
use serde_json::ser::Formatter;
use std::io::{self, Write};

/// Serializes `value` as a single line, newline included.
pub fn encode_line<T: Serialize>(value: &T, ascii_only: bool) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(128);
    if ascii_only {
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, AsciiFormatter);
        value.serialize(&mut ser)?;
    } else {
        serde_json::to_writer(&mut buf, value)?;
    }
    buf.push(b'\n');
    Ok(buf)
}

/// Strips the line terminator (`\n` or `\r\n`) and surrounding whitespace.
/// Returns `None` for blank lines, which carry no message.
pub fn trim_line(raw: &[u8]) -> Option<&[u8]> {
    let start = raw.iter().position(|b| !b.is_ascii_whitespace())?;
    let end = raw.iter().rposition(|b| !b.is_ascii_whitespace())?;
    Some(&raw[start..=end])
}

/// Compact output with non-ASCII escaped, so a peer that mis-decodes the
/// byte stream can still parse every line.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}
