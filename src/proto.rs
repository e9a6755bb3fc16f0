//! Line format of the backing file: one `<key>:<value>` record per line.

pub const DELIMITER: char = ':';

/// Encode one entry as a newline-terminated record.
pub fn encode(key: &str, value: &str) -> String {
    format!("{key}{DELIMITER}{value}\n")
}

/// Split a line at the first delimiter. The value keeps any later colons.
/// Returns `None` for lines with no delimiter at all.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    line.split_once(DELIMITER)
}
