//! Property-based tests for version ordering and parsing.

use proptest::prelude::*;
use std::cmp::Ordering;
use uplift_common::{RelPath, Version, VersionOrdering};

fn version_strategy() -> impl Strategy<Value = Version> {
    (0u64..50, 0u64..50, 0u64..50).prop_map(|(a, b, c)| Version::new(a, b, c))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    /// Ordering is the lexicographic order of the numeric triple.
    #[test]
    fn ordering_is_numeric_per_component(a in version_strategy(), b in version_strategy()) {
        let expected = (a.major, a.minor, a.patch).cmp(&(b.major, b.minor, b.patch));
        prop_assert_eq!(a.cmp(&b), expected);
    }

    /// Exactly one of a < b, a == b, a > b holds.
    #[test]
    fn ordering_is_strict_total(a in version_strategy(), b in version_strategy()) {
        let holds = [a < b, a == b, a > b].iter().filter(|x| **x).count();
        prop_assert_eq!(holds, 1);
        prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn ordering_is_transitive(
        a in version_strategy(),
        b in version_strategy(),
        c in version_strategy(),
    ) {
        if a <= b && b <= c {
            prop_assert!(a <= c);
        }
    }

    /// Display output parses back, with or without decoration.
    #[test]
    fn display_parses_back(v in version_strategy(), suffix in "[a-z0-9.]{0,6}") {
        prop_assert_eq!(Version::parse(&v.to_string()).unwrap(), v);
        prop_assert_eq!(Version::parse(&format!("v{}", v)).unwrap(), v);
        prop_assert_eq!(Version::parse(&format!("{}-{}", v, suffix)).unwrap(), v);
    }

    #[test]
    fn compare_remote_agrees_with_ord(local in version_strategy(), remote in version_strategy()) {
        let expected = match remote.cmp(&local) {
            Ordering::Greater => VersionOrdering::UpdateAvailable,
            Ordering::Less => VersionOrdering::LocalAhead,
            Ordering::Equal => VersionOrdering::UpToDate,
        };
        prop_assert_eq!(local.compare_remote(&remote), expected);
    }

    /// The parser never panics on arbitrary input.
    #[test]
    fn parse_never_panics(s in "\\PC{0,24}") {
        let _ = Version::parse(&s);
    }

    /// Accepted relative paths never contain a parent component.
    #[test]
    fn relpath_never_escapes(s in "[a-z./\\\\]{0,20}") {
        if let Ok(p) = RelPath::new(&s) {
            prop_assert!(!p.as_str().split('/').any(|c| c == ".." || c.is_empty()));
            prop_assert!(!p.as_str().starts_with('/'));
        }
    }
}

#[test]
fn nine_sorts_before_ten() {
    let mut versions: Vec<Version> = ["1.10.0", "1.9.0", "1.2.10", "1.2.9", "0.99.99"]
        .iter()
        .map(|s| Version::parse(s).unwrap())
        .collect();
    versions.sort();
    let rendered: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
    assert_eq!(rendered, ["0.99.99", "1.2.9", "1.2.10", "1.9.0", "1.10.0"]);
}
