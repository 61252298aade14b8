//! Byte-level substring replacement on a staged entry.
//!
//! The blob is never decoded as text. Searching and replacing work on raw byte
//! slices, so every byte value passes through untouched unless it is part of a
//! match.
//!
//! Replacement is a single non-overlapping, left-to-right pass over the
//! *original* bytes: after a match the scan resumes right after the matched
//! range, and bytes produced by the replacement are never scanned again. If the
//! replacement itself contains the search pattern, those occurrences survive and
//! show up in [`PatchedBlob::count_after`].

use crate::archive::StagingArea;
use crate::error::{Error, Result};
use memchr::memmem;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::str::FromStr;

/// How textual patterns are turned into bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    /// The UTF-8 bytes of the text.
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    /// One byte per character; only U+0000..=U+00FF are representable.
    #[serde(rename = "latin-1", alias = "latin1")]
    Latin1,
}

impl TextEncoding {
    /// Encode `text` into the byte pattern that will be searched for.
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        Error::invalid_argument(format!(
                            "character {c:?} cannot be represented in latin-1"
                        ))
                    })
                })
                .collect(),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => f.write_str("utf-8"),
            TextEncoding::Latin1 => f.write_str("latin-1"),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(TextEncoding::Latin1),
            other => Err(Error::invalid_argument(format!(
                "unknown text encoding '{other}' (expected utf-8 or latin-1)"
            ))),
        }
    }
}

/// A literal search/replace pair over raw bytes.
///
/// The search pattern is guaranteed to be non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    search: Vec<u8>,
    replacement: Vec<u8>,
}

/// Result of applying a [`Patch`] to a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedBlob {
    pub bytes: Vec<u8>,
    /// Number of substitutions made.
    pub replaced: usize,
    /// Occurrences of the search pattern left in `bytes`.
    pub count_after: usize,
}

impl Patch {
    /// Fails with [`Error::InvalidArgument`] if `search` is empty.
    pub fn new(search: impl Into<Vec<u8>>, replacement: impl Into<Vec<u8>>) -> Result<Self> {
        let search = search.into();
        if search.is_empty() {
            return Err(Error::invalid_argument("search pattern must not be empty"));
        }

        Ok(Self {
            search,
            replacement: replacement.into(),
        })
    }

    pub fn from_text(search: &str, replacement: &str, encoding: TextEncoding) -> Result<Self> {
        Self::new(encoding.encode(search)?, encoding.encode(replacement)?)
    }

    pub fn search(&self) -> &[u8] {
        &self.search
    }

    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }

    /// Size change of the blob per substitution.
    pub fn size_delta_per_match(&self) -> i64 {
        self.replacement.len() as i64 - self.search.len() as i64
    }

    /// Whether the replacement contains the search pattern, so that a patched
    /// blob can still report remaining matches.
    pub fn reintroduces_search(&self) -> bool {
        memmem::find(&self.replacement, &self.search).is_some()
    }

    /// Count, replace and count again.
    pub fn apply(&self, blob: &[u8]) -> PatchedBlob {
        let (bytes, replaced) = replace_counted(blob, &self.search, &self.replacement);
        let count_after = memmem::find_iter(&bytes, &self.search).count();

        PatchedBlob {
            bytes,
            replaced,
            count_after,
        }
    }
}

/// Count non-overlapping occurrences of `needle` in `blob`.
pub fn count_occurrences(blob: &[u8], needle: &[u8]) -> Result<usize> {
    if needle.is_empty() {
        return Err(Error::invalid_argument("search pattern must not be empty"));
    }

    Ok(memmem::find_iter(blob, needle).count())
}

/// Replace every non-overlapping occurrence of `needle` with `replacement`.
pub fn replace_all(blob: &[u8], needle: &[u8], replacement: &[u8]) -> Result<Vec<u8>> {
    if needle.is_empty() {
        return Err(Error::invalid_argument("search pattern must not be empty"));
    }

    Ok(replace_counted(blob, needle, replacement).0)
}

fn replace_counted(blob: &[u8], needle: &[u8], replacement: &[u8]) -> (Vec<u8>, usize) {
    let mut output = Vec::with_capacity(blob.len());
    let mut last = 0;
    let mut count = 0;

    for position in memmem::find_iter(blob, needle) {
        output.extend_from_slice(&blob[last..position]);
        output.extend_from_slice(replacement);
        last = position + needle.len();
        count += 1;
    }
    output.extend_from_slice(&blob[last..]);

    (output, count)
}

/// Read a staged entry as raw bytes.
///
/// Returns `Ok(None)` if no regular file exists at `relative_path`.
pub fn load_entry(staging: &StagingArea, relative_path: &str) -> Result<Option<Vec<u8>>> {
    let path = staging.entry_path(relative_path)?;
    if !path.is_file() {
        return Ok(None);
    }

    Ok(Some(fs::read(&path)?))
}

/// Overwrite a staged entry with `bytes`.
pub fn write_entry(staging: &StagingArea, relative_path: &str, bytes: &[u8]) -> Result<()> {
    let path = staging.entry_path(relative_path)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scenario_shrinking_replacement() {
        let patch = Patch::new(*b"XX", *b"Y").unwrap();
        let patched = patch.apply(b"XXfooXXbarXX");

        assert_eq!(patched.bytes, b"YfooYbarY");
        assert_eq!(patched.replaced, 3);
        assert_eq!(patched.count_after, 0);
    }

    #[test]
    fn test_count_is_non_overlapping() {
        assert_eq!(count_occurrences(b"aaaa", b"aa").unwrap(), 2);
        assert_eq!(count_occurrences(b"aaa", b"aa").unwrap(), 1);
        assert_eq!(count_occurrences(b"", b"aa").unwrap(), 0);
    }

    #[test]
    fn test_replace_is_left_to_right() {
        assert_eq!(replace_all(b"aaa", b"aa", b"b").unwrap(), b"ba");
    }

    #[test]
    fn test_empty_needle_rejected() {
        assert!(matches!(
            count_occurrences(b"abc", b""),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            replace_all(b"abc", b"", b"x"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Patch::new(Vec::<u8>::new(), *b"x"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_replacement_is_not_rescanned() {
        // "QBIS" -> "QBISQBIS" must not loop or double-apply.
        let patch = Patch::new(*b"QBIS", *b"QBISQBIS").unwrap();
        assert!(patch.reintroduces_search());

        let patched = patch.apply(b"xQBISyQBIS");
        assert_eq!(patched.bytes, b"xQBISQBISyQBISQBIS");
        assert_eq!(patched.replaced, 2);
        assert_eq!(patched.count_after, 4);
    }

    #[test]
    fn test_replacement_can_complete_match_across_boundary() {
        // "a" + "ab" -> "a" + "a" leaves "aab", which holds a fresh "ab".
        let patch = Patch::new(*b"ab", *b"a").unwrap();
        assert!(!patch.reintroduces_search());

        let patched = patch.apply(b"aabb");
        assert_eq!(patched.bytes, b"aab");
        assert_eq!(patched.replaced, 1);
        assert_eq!(patched.count_after, 1);
    }

    #[test]
    fn test_binary_bytes_pass_through() {
        let blob: Vec<u8> = (0..=255u8).collect();
        let patch = Patch::new(vec![0x7f, 0x80], vec![0x00, 0xff, 0x00]).unwrap();
        let patched = patch.apply(&blob);

        assert_eq!(patched.replaced, 1);
        assert_eq!(patched.bytes.len(), 257);
        assert_eq!(&patched.bytes[..0x7f], &blob[..0x7f]);
        assert_eq!(&patched.bytes[0x7f..0x82], &[0x00, 0xff, 0x00]);
        assert_eq!(&patched.bytes[0x82..], &blob[0x81..]);
    }

    #[test]
    fn test_size_delta() {
        let growing = Patch::new(*b"QBIS", *b"ERPSystem").unwrap();
        assert_eq!(growing.size_delta_per_match(), 5);

        let shrinking = Patch::new(*b"XX", *b"Y").unwrap();
        assert_eq!(shrinking.size_delta_per_match(), -1);
    }

    #[test]
    fn test_latin1_encoding() {
        assert_eq!(TextEncoding::Latin1.encode("caf\u{e9}").unwrap(), b"caf\xe9");
        assert_eq!(TextEncoding::Utf8.encode("caf\u{e9}").unwrap(), b"caf\xc3\xa9");
        assert!(matches!(
            TextEncoding::Latin1.encode("\u{3042}"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("UTF-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("latin1".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        assert!("shift-jis".parse::<TextEncoding>().is_err());
    }

    #[test]
    fn test_load_and_write_entry() {
        let staging = StagingArea::new_in(None).unwrap();

        assert_eq!(load_entry(&staging, "xl/vbaProject.bin").unwrap(), None);

        write_entry(&staging, "xl/vbaProject.bin", b"\x00data\xff").unwrap();
        assert_eq!(
            load_entry(&staging, "xl/vbaProject.bin").unwrap(),
            Some(b"\x00data\xff".to_vec())
        );
    }

    #[test]
    fn test_load_entry_ignores_directories() {
        let staging = StagingArea::new_in(None).unwrap();
        fs::create_dir_all(staging.root().join("xl/vbaProject.bin")).unwrap();

        assert_eq!(load_entry(&staging, "xl/vbaProject.bin").unwrap(), None);
    }

    proptest! {
        #[test]
        fn prop_no_matches_remain_without_reintroduction(
            blob in proptest::collection::vec(any::<u8>(), 0..512),
            needle in proptest::collection::vec(any::<u8>(), 1..4),
            replacement in proptest::collection::vec(any::<u8>(), 1..4),
        ) {
            // A non-empty replacement made only of bytes absent from the needle
            // can neither contain the needle nor complete one across a boundary.
            prop_assume!(replacement.iter().all(|b| !needle.contains(b)));

            let patched = replace_all(&blob, &needle, &replacement).unwrap();
            prop_assert_eq!(count_occurrences(&patched, &needle).unwrap(), 0);
        }

        #[test]
        fn prop_length_follows_count(
            blob in proptest::collection::vec(any::<u8>(), 0..512),
            needle in proptest::collection::vec(any::<u8>(), 1..3),
            replacement in proptest::collection::vec(any::<u8>(), 0..5),
        ) {
            let patch = Patch::new(needle.clone(), replacement.clone()).unwrap();
            let count = count_occurrences(&blob, &needle).unwrap();
            let patched = patch.apply(&blob);

            prop_assert_eq!(patched.replaced, count);
            let expected = blob.len() as i64 + count as i64 * patch.size_delta_per_match();
            prop_assert_eq!(patched.bytes.len() as i64, expected);
        }

        #[test]
        fn prop_identity_patch_is_noop(
            blob in proptest::collection::vec(any::<u8>(), 0..512),
            needle in proptest::collection::vec(any::<u8>(), 1..3),
        ) {
            let patched = replace_all(&blob, &needle, &needle).unwrap();
            prop_assert_eq!(patched, blob);
        }
    }
}
