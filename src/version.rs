// src/version.rs

//! Version and revision ordering
//!
//! Ports are ordered by an RPM-derived segment comparison rather than semver:
//! strings are split into maximal runs of digits or ASCII letters, separators
//! are ignored, numeric runs compare by value and alphabetic runs by byte.
//! The same function backs the `VERSION` SQL collation, so everything that
//! sorts or deduplicates ports by version agrees on one order.

use std::cmp::Ordering;
use std::fmt;

/// Compare two version (or revision) strings.
///
/// Total and side-effect free; any byte strings are accepted, including empty
/// ones. Only ASCII digits and letters take part in the comparison.
pub fn vercmp(a: impl AsRef<[u8]>, b: impl AsRef<[u8]>) -> Ordering {
    compare_bytes(a.as_ref(), b.as_ref())
}

/// `vercmp` mapped to the traditional -1 / 0 / 1 result.
pub fn compare(a: impl AsRef<[u8]>, b: impl AsRef<[u8]>) -> i32 {
    match vercmp(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn is_digit(s: &[u8], i: usize) -> bool {
    s.get(i).is_some_and(u8::is_ascii_digit)
}

fn is_alpha(s: &[u8], i: usize) -> bool {
    s.get(i).is_some_and(u8::is_ascii_alphabetic)
}

fn run_end(s: &[u8], mut i: usize, pred: fn(&u8) -> bool) -> usize {
    while s.get(i).is_some_and(pred) {
        i += 1;
    }
    i
}

fn compare_bytes(a: &[u8], b: &[u8]) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (mut pa, mut pb) = (0, 0);
    while pa < a.len() && pb < b.len() {
        while pa < a.len() && !a[pa].is_ascii_alphanumeric() {
            pa += 1;
        }
        while pb < b.len() && !b[pb].is_ascii_alphanumeric() {
            pb += 1;
        }

        // A digit segment always beats whatever B has that is not a digit.
        if !is_digit(b, pb) && is_digit(a, pa) {
            return Ordering::Greater;
        }
        if is_alpha(a, pa) && is_digit(b, pb) {
            return Ordering::Less;
        }

        let (ea, eb);
        if is_alpha(a, pa) {
            ea = run_end(a, pa, u8::is_ascii_alphabetic);
            eb = run_end(b, pb, u8::is_ascii_alphabetic);
        } else {
            ea = run_end(a, pa, u8::is_ascii_digit);
            eb = run_end(b, pb, u8::is_ascii_digit);

            while pa < ea && a[pa] == b'0' {
                pa += 1;
            }
            while pb < eb && b[pb] == b'0' {
                pb += 1;
            }

            match (ea - pa).cmp(&(eb - pb)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }

        while pa < ea && pb < eb && a[pa] == b[pb] {
            pa += 1;
            pb += 1;
        }
        if pa < ea && pb < eb {
            return a[pa].cmp(&b[pb]);
        }

        pa = ea;
        pb = eb;
    }

    // Only separators differed.
    if pa >= a.len() && pb >= b.len() {
        Ordering::Equal
    } else if pa < a.len() {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

/// A borrowed version string ordered by [`vercmp`].
///
/// Equality follows the comparison too, so `"1.0"` and `"1_0"` are equal.
#[derive(Debug, Clone, Copy)]
pub struct Version<'a>(pub &'a str);

impl PartialEq for Version<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version<'_> {}

impl PartialOrd for Version<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        vercmp(self.0, other.0)
    }
}

impl fmt::Display for Version<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings_are_equal() {
        for v in ["", "1", "1.0", "abc", "1.0-rc1", "...", "\u{e9}"] {
            assert_eq!(compare(v, v), 0, "{v:?}");
        }
    }

    #[test]
    fn test_trailing_segment_is_greater() {
        assert_eq!(compare("1.0", "1.0.1"), -1);
        assert_eq!(compare("1.0.1", "1.0"), 1);
        assert_eq!(compare("", "1"), -1);
        assert_eq!(compare("1", ""), 1);
    }

    #[test]
    fn test_numeric_segments_compare_by_value() {
        assert_eq!(compare("1.2", "1.10"), -1);
        assert_eq!(compare("1.10", "1.9"), 1);
        assert_eq!(compare("2.0", "10.0"), -1);
        assert_eq!(compare("1.002", "1.2"), 0);
        assert_eq!(compare("1.010", "1.9"), 1);
    }

    #[test]
    fn test_separators_are_ignored() {
        assert_eq!(compare("1.0", "1_0"), 0);
        assert_eq!(compare("1-0", "1..0"), 0);
        assert_eq!(compare("1.", "1.0"), 0);
    }

    #[test]
    fn test_digit_beats_alpha() {
        assert_eq!(compare("1.0", "1.a"), 1);
        assert_eq!(compare("1.a", "1.0"), -1);
        assert_eq!(compare("1.0a", "1.0"), 1);
        assert_eq!(compare("1", "a"), 1);
        assert_eq!(compare("a", "1"), -1);
    }

    #[test]
    fn test_alpha_segments() {
        assert_eq!(compare("1.0a", "1.0b"), -1);
        assert_eq!(compare("1.0b", "1.0a"), 1);
        assert_eq!(compare("1.0beta", "1.0alpha"), 1);
        // A shorter run that is a prefix of the other one compares equal.
        assert_eq!(compare("1.0a", "1.0ab"), 0);
        assert_eq!(compare("1.0rc1", "1.0rc2"), -1);
    }

    #[test]
    fn test_non_ascii_bytes_are_separators() {
        assert_eq!(vercmp(b"1\xff2".as_slice(), b"1.2".as_slice()), Ordering::Equal);
    }

    #[test]
    fn test_version_wrapper_sorts() {
        let mut versions = vec![Version("1.10"), Version("1.9"), Version("1.2")];
        versions.sort();
        let sorted: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(sorted, vec!["1.2", "1.9", "1.10"]);
        assert_eq!(Version("1.0"), Version("1_0"));
    }
}
