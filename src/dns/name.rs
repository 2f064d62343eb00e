//! Presentation-format domain names.
//!
//! Labels are kept as raw octets inside the codec. The presentation form
//! escapes `.` and `\` with a backslash and every octet outside printable
//! ASCII as `\DDD`, so a presentation name never contains a raw NUL.

use super::ParseError;

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;

/// Whether the byte at `idx` is preceded by an odd number of backslashes.
pub fn is_escaped(name: &[u8], idx: usize) -> bool {
    name[..idx]
        .iter()
        .rev()
        .take_while(|&&b| b == b'\\')
        .count()
        % 2
        == 1
}

/// Whether `name` ends in an unescaped dot.
pub fn is_fqdn(name: &str) -> bool {
    let bytes = name.as_bytes();
    match bytes.last() {
        Some(b'.') => !is_escaped(bytes, bytes.len() - 1),
        _ => false,
    }
}

/// Appends the root dot unless `name` is already fully qualified.
pub fn fqdn(name: &str) -> String {
    if is_fqdn(name) {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Renders raw labels as a fully-qualified presentation name.
pub fn to_presentation(labels: &[Vec<u8>]) -> String {
    if labels.is_empty() {
        return ".".to_string();
    }
    let mut out = String::new();
    for label in labels {
        escape_label(label, &mut out);
        out.push('.');
    }
    out
}

fn escape_label(label: &[u8], out: &mut String) {
    for &b in label {
        match b {
            b'.' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
}

/// Parses a presentation name into raw labels. The root name (`.` or the
/// empty string) yields no labels.
pub fn parse_presentation(name: &str) -> Result<Vec<Vec<u8>>, ParseError> {
    let bytes = name.as_bytes();
    let mut labels = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut i = 0;

    if name.is_empty() || name == "." {
        return Ok(labels);
    }

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let rest = &bytes[i + 1..];
                if rest.len() >= 3 && rest[..3].iter().all(u8::is_ascii_digit) {
                    let value = (rest[0] - b'0') as u32 * 100
                        + (rest[1] - b'0') as u32 * 10
                        + (rest[2] - b'0') as u32;
                    if value > 255 {
                        return Err(ParseError::InvalidLabel);
                    }
                    current.push(value as u8);
                    i += 4;
                } else if let Some(&next) = rest.first() {
                    current.push(next);
                    i += 2;
                } else {
                    return Err(ParseError::InvalidLabel);
                }
            }
            b'.' => {
                if current.is_empty() {
                    return Err(ParseError::InvalidLabel);
                }
                labels.push(finish_label(&mut current)?);
                i += 1;
            }
            b => {
                current.push(b);
                i += 1;
            }
        }
    }
    if !current.is_empty() {
        labels.push(finish_label(&mut current)?);
    }

    let wire_len: usize = labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1;
    if wire_len > MAX_NAME_LEN {
        return Err(ParseError::NameTooLong);
    }
    Ok(labels)
}

fn finish_label(current: &mut Vec<u8>) -> Result<Vec<u8>, ParseError> {
    if current.len() > MAX_LABEL_LEN {
        return Err(ParseError::InvalidLabel);
    }
    Ok(std::mem::take(current))
}

/// Uncompressed wire form, lowercased, as used in TSIG digests.
pub fn canonical_wire(labels: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1);
    for label in labels {
        out.push(label.len() as u8);
        out.extend(label.iter().map(u8::to_ascii_lowercase));
    }
    out.push(0);
    out
}
