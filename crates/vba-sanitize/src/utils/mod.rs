use crate::errors::CliError;
use regex::Regex;

pub mod config;
pub mod job;

#[macro_export]
macro_rules! println_pad {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        for __line in __s.lines() {
            println!("    {}", __line);
        }
    }};
}

/// Parse a hex byte pattern such as `"51 42 49 53"`, `"0x51424953"` or `"51:42"`.
pub fn parse_hex_pattern(value: &str) -> Result<Vec<u8>, CliError> {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();

    hex::decode(&digits).map_err(|e| CliError::invalid_hex(value.to_string(), e))
}

/// Render a byte pattern for display: quoted text when it is printable UTF-8,
/// spaced hex otherwise.
pub fn describe_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.chars().any(char::is_control) => format!("'{}'", text),
        _ => bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Prints the provided lines inside an ASCII box
pub fn print_ansi_boxed_lines(lines: &[String]) {
    let ansi = Regex::new("\x1b\\[[0-9;]*m").unwrap();
    let visible_len = |s: &str| ansi.replace_all(s, "").chars().count();

    let width = lines
        .iter()
        .map(|s| visible_len(s.as_str()))
        .max()
        .unwrap_or(0);

    let border = "-".repeat(width + 4);
    println_pad!("{}", border);
    for line in lines {
        let pad = width - visible_len(line.as_str());
        println_pad!("| {}{} |", line, " ".repeat(pad));
    }
    println_pad!("{}", border);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_pattern_accepts_common_forms() {
        assert_eq!(parse_hex_pattern("51424953").unwrap(), b"QBIS");
        assert_eq!(parse_hex_pattern("51 42 49 53").unwrap(), b"QBIS");
        assert_eq!(parse_hex_pattern("0x5142").unwrap(), b"QB");
        assert_eq!(parse_hex_pattern("de:ad:BE:ef").unwrap(), [0xde_u8, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn parse_hex_pattern_rejects_garbage() {
        assert!(matches!(
            parse_hex_pattern("5"),
            Err(CliError::InvalidHex { .. })
        ));
        assert!(matches!(
            parse_hex_pattern("zz"),
            Err(CliError::InvalidHex { .. })
        ));
    }

    #[test]
    fn describe_bytes_prefers_text() {
        assert_eq!(describe_bytes(b"QBIS"), "'QBIS'");
        assert_eq!(describe_bytes(b"\x00\xff"), "00 ff");
        assert_eq!(describe_bytes(b"a\nb"), "61 0a 62");
    }
}
