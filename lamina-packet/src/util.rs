//! Small diagnostic helpers

use std::fmt::Write;

/// Render a buffer as a classic offset / hex / ASCII dump, 16 bytes per row
pub fn hexdump(buf: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in buf.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| {
                if (0x20..0x7f).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        let _ = writeln!(out, "  {:04x}:  {:<47} {}", row * 16, hex.join(" "), ascii);
    }
    out
}
