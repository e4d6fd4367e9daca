use std::fmt::Write;

/// Render bytes as space-separated uppercase hex, for trace logging.
pub fn format_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hex_pairs() {
        assert_eq!(format_bytes(&[0x01, 0xAB, 0xFF]), "01 AB FF");
    }

    #[test]
    fn empty_input_is_empty_string() {
        assert_eq!(format_bytes(&[]), "");
    }
}
