//! Include/exclude glob filtering for persisted files.
//!
//! Patterns follow gitignore-style matching: a pattern without a slash
//! matches at any depth, a leading slash anchors it to the root, a trailing
//! slash matches everything beneath a directory, and `*` never crosses a
//! path separator. Exclude patterns are evaluated first.

use std::path::{Component, Path};
use std::sync::OnceLock;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ModelError, ModelResult};

/// Decides whether a relative file path should be persisted.
pub trait PathFilter: Send + Sync {
    fn matches(&self, path: &Path) -> bool;
}

/// Wire form of [`IncludeExcludeFilter`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FilterSpec {
    /// Glob patterns to include (empty means everything not excluded).
    #[serde(default)]
    pub include: Vec<String>,
    /// Glob patterns to exclude. Takes precedence over `include`.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Two ordered glob lists with lazily compiled, cached matchers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "FilterSpec")]
pub struct IncludeExcludeFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    #[serde(skip)]
    compiled: OnceLock<CompiledFilter>,
}

#[derive(Debug, Clone)]
struct CompiledFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    /// Set when a matcher could not be built; everything is rejected.
    broken: bool,
}

impl IncludeExcludeFilter {
    /// Validate both pattern lists and build a filter.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> ModelResult<Self> {
        for pattern in include.iter().chain(exclude.iter()) {
            for glob in expand_pattern(pattern)? {
                build_glob(&glob).map_err(|e| ModelError::invalid_pattern(pattern, e.to_string()))?;
            }
        }

        Ok(Self {
            include,
            exclude,
            compiled: OnceLock::new(),
        })
    }

    /// Filter that only applies exclusions.
    pub fn excluding<I, S>(patterns: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Vec::new(), patterns.into_iter().map(Into::into).collect())
    }

    /// Filter that only applies inclusions.
    pub fn including<I, S>(patterns: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(patterns.into_iter().map(Into::into).collect(), Vec::new())
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// Match a slash-separated relative path string.
    pub fn matches_str(&self, path: &str) -> bool {
        let normalized = normalize_str(path);
        let compiled = self.compiled();

        if compiled.broken {
            return false;
        }

        if compiled
            .exclude
            .as_ref()
            .is_some_and(|exclude| exclude.is_match(&normalized))
        {
            return false;
        }

        match &compiled.include {
            Some(include) => include.is_match(&normalized),
            None => true,
        }
    }

    fn compiled(&self) -> &CompiledFilter {
        self.compiled
            .get_or_init(|| match (build_set(&self.include), build_set(&self.exclude)) {
                (Ok(include), Ok(exclude)) => CompiledFilter {
                    include,
                    exclude,
                    broken: false,
                },
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to compile path filter, rejecting all paths");
                    CompiledFilter {
                        include: None,
                        exclude: None,
                        broken: true,
                    }
                }
            })
    }
}

impl PathFilter for IncludeExcludeFilter {
    fn matches(&self, path: &Path) -> bool {
        self.matches_str(&normalize_path(path))
    }
}

impl PartialEq for IncludeExcludeFilter {
    fn eq(&self, other: &Self) -> bool {
        self.include == other.include && self.exclude == other.exclude
    }
}

impl TryFrom<FilterSpec> for IncludeExcludeFilter {
    type Error = ModelError;

    fn try_from(spec: FilterSpec) -> Result<Self, Self::Error> {
        Self::new(spec.include, spec.exclude)
    }
}

impl JsonSchema for IncludeExcludeFilter {
    fn schema_name() -> String {
        "IncludeExcludeFilter".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        FilterSpec::json_schema(gen)
    }
}

/// Join the normal components of `path` with `/`, whatever the platform.
pub fn normalize_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().replace('\\', "/")),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn normalize_str(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Translate one gitignore-style pattern into equivalent globs.
fn expand_pattern(pattern: &str) -> ModelResult<Vec<String>> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(ModelError::invalid_pattern(pattern, "pattern is empty"));
    }
    if trimmed.starts_with('!') {
        return Err(ModelError::invalid_pattern(
            pattern,
            "negated patterns are not supported, use exclude",
        ));
    }

    let dir_only = trimmed.ends_with('/');
    let body = trimmed.trim_end_matches('/');
    let anchored = body.starts_with('/') || body.contains('/');
    let body = body.trim_start_matches('/');

    if body.is_empty() {
        return Err(ModelError::invalid_pattern(pattern, "pattern matches no path"));
    }

    let base = if anchored || body.starts_with("**") {
        body.to_string()
    } else {
        format!("**/{body}")
    };

    // A matched directory matches everything beneath it.
    let descendants = format!("{base}/**");
    Ok(if dir_only {
        vec![descendants]
    } else {
        vec![base, descendants]
    })
}

fn build_glob(glob: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(glob).literal_separator(true).build()
}

fn build_set(patterns: &[String]) -> Result<Option<GlobSet>, ModelError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        for glob in expand_pattern(pattern)? {
            builder.add(
                build_glob(&glob).map_err(|e| ModelError::invalid_pattern(pattern, e.to_string()))?,
            );
        }
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| ModelError::invalid_pattern("<set>", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn filter(include: &[&str], exclude: &[&str]) -> IncludeExcludeFilter {
        IncludeExcludeFilter::new(
            include.iter().map(|s| s.to_string()).collect(),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_exclude_only() {
        let f = filter(&[], &["**/*.pdf"]);
        assert!(!f.matches(Path::new("a/doc.pdf")));
        assert!(!f.matches(Path::new("doc.pdf")));
        assert!(f.matches(Path::new("a/video.mp4")));
    }

    #[test]
    fn test_include_only() {
        let f = filter(&["*.mp4"], &[]);
        assert!(f.matches(Path::new("clip.mp4")));
        assert!(!f.matches(Path::new("clip.webm")));
    }

    #[test]
    fn test_exclude_takes_precedence() {
        let f = filter(&["*.mp4"], &["secret.mp4"]);
        assert!(!f.matches(Path::new("secret.mp4")));
        assert!(f.matches(Path::new("public.mp4")));
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let f = IncludeExcludeFilter::default();
        assert!(f.matches(Path::new("anything/at/all.bin")));
    }

    #[test]
    fn test_unanchored_pattern_matches_at_depth() {
        let f = filter(&["*.mp4"], &[]);
        assert!(f.matches(Path::new("channel/2024/clip.mp4")));
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        let f = filter(&["videos/*.mp4"], &[]);
        assert!(f.matches(Path::new("videos/a.mp4")));
        assert!(!f.matches(Path::new("videos/nested/a.mp4")));
        assert!(!f.matches(Path::new("other/videos/a.mp4")));
    }

    #[test]
    fn test_directory_patterns() {
        let f = filter(&[], &["thumbnails/"]);
        assert!(!f.matches(Path::new("thumbnails/a.jpg")));
        assert!(!f.matches(Path::new("x/thumbnails/a.jpg")));
        assert!(f.matches(Path::new("thumbnails.txt")));

        let anchored = filter(&[], &["/subs"]);
        assert!(!anchored.matches(Path::new("subs/en.vtt")));
        assert!(anchored.matches(Path::new("video/subs/en.vtt")));
    }

    #[test]
    fn test_backslash_paths_are_normalised() {
        let f = filter(&[], &["**/*.pdf"]);
        assert!(!f.matches_str("a\\doc.pdf"));
        assert!(f.matches_str(".\\a\\video.mp4"));
    }

    #[test]
    fn test_invalid_patterns_rejected_at_construction() {
        assert!(IncludeExcludeFilter::including(["   "]).is_err());
        assert!(IncludeExcludeFilter::excluding(["!keep.mp4"]).is_err());
        assert!(IncludeExcludeFilter::including(["a[b"]).is_err());
    }

    #[test]
    fn test_deserialize_validates_patterns() {
        let f: IncludeExcludeFilter =
            serde_json::from_str(r#"{"include": ["*.mp4", "**/*.webm"]}"#).unwrap();
        assert_eq!(f.include(), ["*.mp4", "**/*.webm"]);
        assert!(f.exclude().is_empty());

        assert!(serde_json::from_str::<IncludeExcludeFilter>(r#"{"exclude": [""]}"#).is_err());
    }

    #[test]
    fn test_shared_filter_across_threads() {
        let f = Arc::new(filter(&["*.mp4"], &["**/private/**"]));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || {
                    let public = PathBuf::from(format!("dir{i}/clip.mp4"));
                    let private = PathBuf::from(format!("private/clip{i}.mp4"));
                    (f.matches(&public), f.matches(&private))
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), (true, false));
        }
    }
}
