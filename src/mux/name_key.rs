//! Linearization of domain names into radix keys.
//!
//! Labels are reversed so that a zone's key is a prefix of the keys of all
//! names below it, and joined with [`SEPARATOR`]. Presentation names never
//! contain a raw NUL, so the separator cannot collide with label content,
//! escaped or not.

use crate::dns::name::is_escaped;

pub const SEPARATOR: u8 = 0;

const SEPARATOR_STR: &str = "\0";

/// `www.miek.nl.` becomes `\0nl\0miek\0www`; the root name becomes the
/// separator alone.
pub fn to_key(name: &str) -> String {
    if name.is_empty() {
        return SEPARATOR_STR.to_string();
    }

    let bytes = name.as_bytes();
    let mut labels = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'.' && !is_escaped(bytes, i) {
            labels.push(&name[start..i]);
            start = i + 1;
        }
    }
    labels.push(&name[start..]);
    labels.reverse();
    labels.join(SEPARATOR_STR)
}

/// Inverse of [`to_key`] for fully-qualified names.
pub fn from_key(key: &str) -> String {
    if key == SEPARATOR_STR {
        return ".".to_string();
    }
    let mut labels: Vec<&str> = key.split(SEPARATOR_STR).collect();
    labels.reverse();
    labels.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn readable(key: &str) -> String {
        key.replace('\0', ".")
    }

    #[test]
    fn test_to_key() {
        let cases = [
            (".", "."),
            ("www.miek.nl.", ".nl.miek.www"),
            ("miek.nl.", ".nl.miek"),
            ("mi\\.ek.nl.", ".nl.mi\\.ek"),
            ("mi\\\\.ek.nl.", ".nl.ek.mi\\\\"),
            ("", "."),
            ("com", "com"),
        ];
        for (name, expected) in cases {
            assert_eq!(readable(&to_key(name)), expected, "key for {:?}", name);
        }
    }

    #[test]
    fn test_escaped_dot_is_not_a_separator() {
        assert_eq!(to_key("mi\\.ek.nl."), "\0nl\0mi\\.ek");
        assert_ne!(to_key("mi\\.ek.nl."), to_key("ek.mi.nl."));
    }

    #[test]
    fn test_injective() {
        let names = [
            ".",
            "nl.",
            "miek.nl.",
            "www.miek.nl.",
            "mi\\.ek.nl.",
            "ek.mi.nl.",
            "mi\\\\.ek.nl.",
            "nl.miek.",
            "a.b.c.",
            "a\\.b.c.",
            "a.b\\.c.",
        ];
        let keys: HashSet<String> = names.iter().map(|n| to_key(n)).collect();
        assert_eq!(keys.len(), names.len());
    }

    #[test]
    fn test_from_key_roundtrip() {
        for name in [".", "miek.nl.", "www.mi\\.ek.nl."] {
            assert_eq!(from_key(&to_key(name)), name);
        }
    }

    #[test]
    fn test_zone_key_prefixes_names_below() {
        let zone = to_key("miek.nl.");
        assert!(to_key("foo.miek.nl.").starts_with(&zone));
        assert!(to_key("miek.nl.").starts_with(&to_key(".")));
    }
}
