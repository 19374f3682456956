//! Total ordering over R package version strings.
//!
//! R versions are dotted/dashed integer sequences (`1.10.0`, `0.99.2-45`),
//! occasionally with alphabetic parts. Versions are compared component by
//! component; a version that is a strict prefix of another sorts first.
//! Malformed strings (empty, or with an empty component such as `1..2`)
//! sort below every well-formed version and are ordered among themselves
//! by plain string comparison.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component<'a> {
    Num(u64),
    Alpha(&'a str),
}

impl Ord for Component<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.cmp(b),
            (Self::Alpha(a), Self::Alpha(b)) => a.cmp(b),
            // numeric releases outrank alphabetic tags at the same position
            (Self::Num(_), Self::Alpha(_)) => Ordering::Greater,
            (Self::Alpha(_), Self::Num(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Component<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn components(version: &str) -> Option<Vec<Component<'_>>> {
    let version = version.trim();
    if version.is_empty() {
        return None;
    }
    version
        .split(['.', '-'])
        .map(|part| {
            if part.is_empty() {
                None
            } else if part.bytes().all(|b| b.is_ascii_digit()) {
                // Absurdly long numbers still order sensibly as strings
                Some(part.parse().map_or(Component::Alpha(part), Component::Num))
            } else {
                Some(Component::Alpha(part))
            }
        })
        .collect()
}

/// Compare two version strings. Never panics.
#[must_use]
pub fn compare(a: &str, b: &str) -> Ordering {
    match (components(a), components(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Whether `version` parses into well-formed components.
#[must_use]
pub fn is_well_formed(version: &str) -> bool {
    components(version).is_some()
}

/// Index of the most recent version; the first one wins on ties.
#[must_use]
pub fn most_recent_index<'a, I>(versions: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, &str)> = None;
    for (i, v) in versions.into_iter().enumerate() {
        match best {
            Some((_, current)) if compare(v, current) != Ordering::Greater => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_not_lexicographic() {
        assert_eq!(compare("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare("1.9.0", "1.10.0"), Ordering::Less);
    }

    #[test]
    fn test_dash_components() {
        assert_eq!(compare("0.99.2-45", "0.99.2-12"), Ordering::Greater);
        assert_eq!(compare("0.99.2-45", "0.99.2"), Ordering::Greater);
        assert_eq!(compare("1.0.2", "0.99.2-1"), Ordering::Greater);
        assert_eq!(compare("2.0", "1.0.1"), Ordering::Greater);
    }

    #[test]
    fn test_dot_and_dash_are_equivalent_separators() {
        assert_eq!(compare("0.9.42", "0.9-41"), Ordering::Greater);
        assert_eq!(compare("1.2-3", "1.2.3"), Ordering::Equal);
    }

    #[test]
    fn test_equal() {
        assert_eq!(compare("3.4.1", "3.4.1"), Ordering::Equal);
        assert_eq!(compare("1.01", "1.1"), Ordering::Equal);
    }

    #[test]
    fn test_alpha_components() {
        assert_eq!(compare("1.0.a", "1.0.b"), Ordering::Less);
        assert_eq!(compare("1.0.1", "1.0.rc"), Ordering::Greater);
    }

    #[test]
    fn test_malformed_sorts_first() {
        assert_eq!(compare("", "0.0.1"), Ordering::Less);
        assert_eq!(compare("1..2", "0.1"), Ordering::Less);
        assert_eq!(compare("0.1", "1..2"), Ordering::Greater);
        assert_eq!(compare("1.", "1."), Ordering::Equal);
        assert!(!is_well_formed("-1"));
        assert!(is_well_formed("1.0-3"));
    }

    #[test]
    fn test_huge_number_does_not_panic() {
        let huge = "1.99999999999999999999999999";
        assert_eq!(compare(huge, huge), Ordering::Equal);
        assert_eq!(compare("1.0", huge), Ordering::Greater);
    }

    #[test]
    fn test_most_recent_index_first_wins_on_tie() {
        let versions = ["1.0", "2.0", "2.0", "1.5"];
        assert_eq!(most_recent_index(versions), Some(1));
        assert_eq!(most_recent_index(std::iter::empty()), None);
    }
}
