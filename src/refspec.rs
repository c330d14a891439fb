//! Ref-spec sets: fetch-mode expansion and remote-ref narrowing

use std::collections::BTreeSet;
use std::fmt;

/// Spec fetching every ref into the same local name
pub const ALL_REFS_SPEC: &str = "+refs/*:refs/*";
/// Negative spec excluding tags from an all-refs fetch
pub const EXCLUDE_TAGS_SPEC: &str = "^refs/tags/*";

/// A `source:destination` mapping rule with an optional force marker
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefSpec {
    source: String,
    destination: String,
    force: bool,
}

impl RefSpec {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, force: bool) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            force,
        }
    }

    /// Forced spec fetching a ref into the same local name, the shape used
    /// for explicit per-branch fetches
    pub fn forced(ref_name: &str) -> Self {
        Self::new(ref_name, ref_name, true)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Wildcard specs cannot be narrowed against an advertised ref list
    pub fn is_wildcard(&self) -> bool {
        self.source.contains('*') || self.destination.contains('*')
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.force {
            write!(f, "+{}:{}", self.source, self.destination)
        } else {
            write!(f, "{}:{}", self.source, self.destination)
        }
    }
}

/// What a fetch should bring over
#[derive(Clone, Debug)]
pub enum FetchMode {
    /// Everything the remote advertises
    AllRefs,
    /// Everything except `refs/tags/*`
    AllRefsExceptTags,
    /// An explicit list of specs
    RefSpecs(Vec<RefSpec>),
}

/// Expands a fetch mode into the de-duplicated spec strings passed to git.
/// The set is ordered deterministically so identical requests produce
/// identical command lines.
pub fn specs_for_mode(mode: &FetchMode) -> Vec<String> {
    let mut specs = BTreeSet::new();
    match mode {
        FetchMode::AllRefs => {
            specs.insert(ALL_REFS_SPEC.to_string());
        }
        FetchMode::AllRefsExceptTags => {
            specs.insert(ALL_REFS_SPEC.to_string());
            specs.insert(EXCLUDE_TAGS_SPEC.to_string());
        }
        FetchMode::RefSpecs(list) => {
            for spec in list {
                specs.insert(spec.to_string());
            }
        }
    }
    specs.into_iter().collect()
}

/// Narrows explicit specs to those whose source ref the remote still
/// advertises. Wildcard and negative specs are kept untouched; they are
/// resolved by git itself, not by the advertisement.
pub fn narrow<'a>(
    specs: &[String],
    advertised: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let advertised: BTreeSet<&str> = advertised
        .into_iter()
        .filter(|name| name.starts_with("refs/"))
        .collect();

    specs
        .iter()
        .filter(|spec| {
            if spec.contains('*') || spec.starts_with('^') {
                return true;
            }
            let source = source_of(spec);
            advertised.contains(source)
        })
        .cloned()
        .collect()
}

/// Source ref of a textual spec: the part before `:`, without a `+` marker
fn source_of(spec: &str) -> &str {
    let spec = spec.strip_prefix('+').unwrap_or(spec);
    spec.split(':').next().unwrap_or(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_renders_force_marker() {
        let spec = RefSpec::new("refs/heads/*", "refs/remotes/origin/*", true);
        assert_eq!(spec.to_string(), "+refs/heads/*:refs/remotes/origin/*");

        let plain = RefSpec::new("refs/heads/main", "refs/heads/main", false);
        assert_eq!(plain.to_string(), "refs/heads/main:refs/heads/main");
    }

    #[test]
    fn test_all_refs_except_tags_expansion() {
        let specs = specs_for_mode(&FetchMode::AllRefsExceptTags);
        assert_eq!(specs.len(), 2);
        assert!(specs.contains(&ALL_REFS_SPEC.to_string()));
        assert!(specs.contains(&EXCLUDE_TAGS_SPEC.to_string()));
    }

    #[test]
    fn test_explicit_specs_are_deduplicated() {
        let specs = specs_for_mode(&FetchMode::RefSpecs(vec![
            RefSpec::forced("refs/heads/main"),
            RefSpec::forced("refs/heads/dev"),
            RefSpec::forced("refs/heads/main"),
        ]));
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn test_narrow_drops_vanished_refs() {
        let specs = vec![
            "+refs/heads/a:refs/heads/a".to_string(),
            "+refs/heads/b:refs/heads/b".to_string(),
            "+refs/heads/c:refs/heads/c".to_string(),
        ];
        let narrowed = narrow(&specs, ["refs/heads/a", "refs/heads/c"]);
        assert_eq!(
            narrowed,
            vec![
                "+refs/heads/a:refs/heads/a".to_string(),
                "+refs/heads/c:refs/heads/c".to_string(),
            ]
        );
    }

    #[test]
    fn test_narrow_keeps_wildcard_and_negative_specs() {
        let specs = vec![
            ALL_REFS_SPEC.to_string(),
            EXCLUDE_TAGS_SPEC.to_string(),
            "+refs/heads/gone:refs/heads/gone".to_string(),
        ];
        let narrowed = narrow(&specs, ["refs/heads/main"]);
        assert_eq!(
            narrowed,
            vec![ALL_REFS_SPEC.to_string(), EXCLUDE_TAGS_SPEC.to_string()]
        );
    }

    #[test]
    fn test_narrow_to_empty_set() {
        let specs = vec!["+refs/heads/x:refs/heads/x".to_string()];
        let narrowed = narrow(&specs, std::iter::empty());
        assert!(narrowed.is_empty());
    }

    #[test]
    fn test_narrow_ignores_non_ref_advertisements() {
        let specs = vec!["+HEAD:HEAD".to_string()];
        let narrowed = narrow(&specs, ["HEAD"]);
        assert!(narrowed.is_empty());
    }
}
