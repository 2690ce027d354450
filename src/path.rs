use heapless::Vec;

use crate::{config::NameEncoding, error::IllegalName, CHARS_PER_FRAGMENT, MAX_NAME_LEN, MAX_PATH_DEPTH};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedPath<'a> {
    /// Resolve from the volume root rather than the supplied directory.
    pub from_root: bool,
    pub components: Vec<&'a str, MAX_PATH_DEPTH>,
}

impl<'a> ParsedPath<'a> {
    /// Splits off the final component. `None` for the bare root path.
    pub fn split_last(&self) -> Option<(&'a str, &[&'a str])> {
        self.components
            .split_last()
            .map(|(last, parents)| (*last, parents))
    }
}

pub fn parse_path(path: &str, encoding: NameEncoding) -> Result<ParsedPath<'_>, IllegalName> {
    let (from_root, rest) = match path.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, path),
    };
    let mut parsed = ParsedPath {
        from_root,
        components: Vec::new(),
    };
    if rest.is_empty() {
        return if from_root { Ok(parsed) } else { Err(IllegalName) };
    }

    let rest = rest.strip_suffix('/').unwrap_or(rest);
    for raw in rest.split('/') {
        let component = validate_component(raw, encoding)?;
        parsed.components.push(component).map_err(|_| IllegalName)?;
    }
    Ok(parsed)
}

/// Applies the naming rules to one path component and returns the stored
/// form: leading spaces skipped, trailing spaces and dots removed.
pub fn validate_component(raw: &str, encoding: NameEncoding) -> Result<&str, IllegalName> {
    let name = raw.trim_start_matches(' ');
    if !name.chars().all(|ch| is_legal_char(ch, encoding)) {
        return Err(IllegalName);
    }
    let name = name.trim_end_matches([' ', '.']);
    if name.is_empty() || name.encode_utf16().count() > MAX_NAME_LEN {
        return Err(IllegalName);
    }
    Ok(name)
}

pub fn is_legal_char(ch: char, encoding: NameEncoding) -> bool {
    if (ch as u32) < 0x20 || matches!(ch, '/' | '\\' | '"' | '*' | ':' | '<' | '>' | '?' | '|') {
        return false;
    }
    match encoding {
        NameEncoding::Ascii => (ch as u32) < 0x7F,
        NameEncoding::Unicode => true,
    }
}

/// Name entries needed to hold `name`.
pub fn fragment_count(name: &str) -> usize {
    name.encode_utf16().count().div_ceil(CHARS_PER_FRAGMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_and_relative_paths() {
        let parsed = parse_path("/Music/Album 1/track.flac", NameEncoding::Ascii).unwrap();
        assert!(parsed.from_root);
        assert_eq!(&parsed.components[..], &["Music", "Album 1", "track.flac"]);

        let parsed = parse_path("notes.txt", NameEncoding::Ascii).unwrap();
        assert!(!parsed.from_root);
        assert_eq!(parsed.split_last(), Some(("notes.txt", &[][..])));
    }

    #[test]
    fn root_alone_has_no_components() {
        let parsed = parse_path("/", NameEncoding::Ascii).unwrap();
        assert!(parsed.from_root);
        assert!(parsed.components.is_empty());
        assert_eq!(parsed.split_last(), None);
        assert_eq!(parse_path("", NameEncoding::Ascii), Err(IllegalName));
    }

    #[test]
    fn spaces_and_dots_are_trimmed() {
        let parsed = parse_path("  dir /file.txt. .", NameEncoding::Ascii).unwrap();
        assert_eq!(&parsed.components[..], &["dir", "file.txt"]);
    }

    #[test]
    fn dot_components_become_empty_and_fail() {
        assert_eq!(parse_path("a/../b", NameEncoding::Ascii), Err(IllegalName));
        assert_eq!(parse_path("./b", NameEncoding::Ascii), Err(IllegalName));
        assert_eq!(parse_path("   ", NameEncoding::Ascii), Err(IllegalName));
    }

    #[test]
    fn empty_interior_component_fails_trailing_slash_is_ignored() {
        assert_eq!(parse_path("a//b", NameEncoding::Ascii), Err(IllegalName));
        let parsed = parse_path("a/b/", NameEncoding::Ascii).unwrap();
        assert_eq!(&parsed.components[..], &["a", "b"]);
    }

    #[test]
    fn illegal_characters_are_rejected() {
        for bad in ["a*b", "a?b", "a:b", "a<b", "a>b", "a|b", "a\"b", "a\\b", "a\u{1}b"] {
            assert_eq!(parse_path(bad, NameEncoding::Unicode), Err(IllegalName), "{bad}");
        }
    }

    #[test]
    fn encoding_selects_character_set() {
        assert_eq!(parse_path("caf\u{e9}", NameEncoding::Ascii), Err(IllegalName));
        assert_eq!(parse_path("a\u{7f}", NameEncoding::Ascii), Err(IllegalName));
        let parsed = parse_path("caf\u{e9}", NameEncoding::Unicode).unwrap();
        assert_eq!(&parsed.components[..], &["caf\u{e9}"]);
    }

    #[test]
    fn name_length_limit_counts_utf16_units() {
        let ok: String = core::iter::repeat('n').take(MAX_NAME_LEN).collect();
        assert!(parse_path(&ok, NameEncoding::Ascii).is_ok());
        let too_long: String = core::iter::repeat('n').take(MAX_NAME_LEN + 1).collect();
        assert_eq!(parse_path(&too_long, NameEncoding::Ascii), Err(IllegalName));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut deep = String::new();
        for _ in 0..=MAX_PATH_DEPTH {
            deep.push_str("/d");
        }
        assert_eq!(parse_path(&deep, NameEncoding::Ascii), Err(IllegalName));
    }

    #[test]
    fn fragment_count_rounds_up() {
        assert_eq!(fragment_count("a"), 1);
        assert_eq!(fragment_count("abcdefghijklmno"), 1);
        assert_eq!(fragment_count("abcdefghijklmnop"), 2);
    }
}
