//! Glob filters over projection-relative paths.
//!
//! A pattern containing `/` is anchored at the projection root and matched
//! segment by segment. `**` matches zero or more segments, except as the
//! trailing segment where it matches one or more, so `dir3/**` selects the
//! contents of `dir3` but not `dir3` itself. A pattern without `/` applies to
//! a component at any depth.

use glob::{MatchOptions, Pattern};

use crate::error::{ConnectorError, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Segment {
    AnyDepth,
    Name(Pattern),
}

/// A compiled inclusion or exclusion filter.
#[derive(Debug, Clone)]
pub struct PathFilter {
    source: String,
    segments: Vec<Segment>,
}

impl PathFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(ConnectorError::Config(format!(
                "empty filter pattern '{pattern}'"
            )));
        }

        let mut raw_segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        if !trimmed.contains('/') {
            raw_segments.insert(0, "**");
        }

        let segments = raw_segments
            .into_iter()
            .map(|segment| {
                if segment == "**" {
                    Ok(Segment::AnyDepth)
                } else {
                    Pattern::new(segment).map(Segment::Name).map_err(|error| {
                        ConnectorError::Config(format!(
                            "invalid filter pattern '{pattern}': {error}"
                        ))
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the path itself matches the pattern.
    pub fn matches(&self, components: &[&str]) -> bool {
        full_match(&self.segments, components)
    }

    /// Returns true if the path or one of its ancestors matches.
    pub fn covers(&self, components: &[&str]) -> bool {
        (1..=components.len()).any(|len| self.matches(&components[..len]))
    }

    /// Returns true if a directory at this path could still contain a match.
    pub fn may_contain(&self, components: &[&str]) -> bool {
        prefix_match(&self.segments, components)
    }

    /// Inclusion semantics: visible when covered, or when a directory that
    /// leads towards a match.
    pub fn admits(&self, components: &[&str], is_dir: bool) -> bool {
        self.covers(components) || (is_dir && self.may_contain(components))
    }
}

fn segment_matches(segment: &Segment, name: &str) -> bool {
    match segment {
        Segment::AnyDepth => true,
        Segment::Name(pattern) => pattern.matches_with(name, MATCH_OPTIONS),
    }
}

fn full_match(segments: &[Segment], components: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return components.is_empty();
    };

    match first {
        Segment::AnyDepth if rest.is_empty() => !components.is_empty(),
        Segment::AnyDepth => (0..=components.len()).any(|skip| full_match(rest, &components[skip..])),
        Segment::Name(_) => match components.split_first() {
            Some((name, remaining)) => {
                segment_matches(first, name) && full_match(rest, remaining)
            }
            None => false,
        },
    }
}

fn prefix_match(segments: &[Segment], components: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Some((name, remaining)) = components.split_first() else {
        return true;
    };

    match first {
        Segment::AnyDepth => true,
        Segment::Name(_) => segment_matches(first, name) && prefix_match(rest, remaining),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(path: &str) -> Vec<&str> {
        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    #[test]
    fn trailing_double_star_excludes_the_directory_itself() {
        let filter = PathFilter::new("dir3/**").expect("filter");
        assert!(!filter.matches(&parts("dir3")));
        assert!(filter.matches(&parts("dir3/simple.json")));
        assert!(filter.matches(&parts("dir3/a/b/c.txt")));
        assert!(!filter.matches(&parts("dir1")));
    }

    #[test]
    fn inclusion_admits_ancestors_of_possible_matches() {
        let filter = PathFilter::new("dir3/**").expect("filter");
        assert!(filter.admits(&parts("dir3"), true));
        assert!(filter.admits(&parts("dir3/simple.txt"), false));
        assert!(!filter.admits(&parts("dir1"), true));
        assert!(!filter.admits(&parts("dir2"), true));
    }

    #[test]
    fn leaf_patterns_do_not_admit_non_matching_files() {
        let filter = PathFilter::new("dir3/*.txt").expect("filter");
        assert!(filter.admits(&parts("dir3"), true));
        assert!(filter.admits(&parts("dir3/simple.txt"), false));
        assert!(!filter.admits(&parts("dir3/simple.json"), false));
    }

    #[test]
    fn unanchored_patterns_match_at_any_depth() {
        let filter = PathFilter::new("*.tmp").expect("filter");
        assert!(filter.matches(&parts("a.tmp")));
        assert!(filter.matches(&parts("x/y/a.tmp")));
        assert!(!filter.matches(&parts("x/y/a.txt")));
    }

    #[test]
    fn covered_subtrees_follow_a_matching_directory() {
        let filter = PathFilter::new("build").expect("filter");
        assert!(filter.covers(&parts("build/out/app.bin")));
        assert!(filter.covers(&parts("nested/build/x")));
        assert!(!filter.covers(&parts("builder/x")));
    }

    #[test]
    fn leading_and_inner_double_star() {
        let filter = PathFilter::new("src/**/mod.rs").expect("filter");
        assert!(filter.matches(&parts("src/mod.rs")));
        assert!(filter.matches(&parts("src/a/b/mod.rs")));
        assert!(!filter.matches(&parts("lib/mod.rs")));
    }

    #[test]
    fn empty_patterns_are_rejected() {
        assert!(PathFilter::new("  ").is_err());
        assert!(PathFilter::new("[").is_err());
    }
}
