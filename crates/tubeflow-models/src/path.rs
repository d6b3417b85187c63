//! Relative path values that cannot escape their root.
//!
//! Output templates and destination prefixes are joined onto a scratch
//! directory or a storage prefix, so they are checked once at construction:
//! non-blank, relative, and without `..` segments.

use std::fmt;
use std::path::{Path, PathBuf};

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// A validated, non-empty relative path without parent references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SafeRelativePath(String);

impl SafeRelativePath {
    /// Validate and wrap a path string.
    pub fn new(value: impl Into<String>) -> ModelResult<Self> {
        let value = value.into();

        if value.trim().is_empty() {
            return Err(ModelError::EmptyPath);
        }

        if is_absolute(&value) {
            return Err(ModelError::AbsolutePath(value));
        }

        if value.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(ModelError::ParentReference(value));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Forward-slash form with `.` and empty segments removed.
    pub fn to_posix(&self) -> String {
        self.0
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve this path beneath `root`.
    pub fn resolve_under(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(self.to_posix())
    }
}

fn is_absolute(value: &str) -> bool {
    if value.starts_with('/') || value.starts_with('\\') {
        return true;
    }

    // Windows drive prefix such as `C:` or `c:\`
    let bytes = value.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

impl TryFrom<String> for SafeRelativePath {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SafeRelativePath {
    type Error = ModelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SafeRelativePath> for String {
    fn from(path: SafeRelativePath) -> Self {
        path.0
    }
}

impl AsRef<Path> for SafeRelativePath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl fmt::Display for SafeRelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl JsonSchema for SafeRelativePath {
    fn schema_name() -> String {
        "SafeRelativePath".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_blank() {
        assert_eq!(SafeRelativePath::new(""), Err(ModelError::EmptyPath));
        assert_eq!(SafeRelativePath::new("   "), Err(ModelError::EmptyPath));
        assert_eq!(SafeRelativePath::new("\t\n"), Err(ModelError::EmptyPath));
    }

    #[test]
    fn test_rejects_absolute() {
        assert!(matches!(
            SafeRelativePath::new("/abs/path"),
            Err(ModelError::AbsolutePath(_))
        ));
        assert!(matches!(
            SafeRelativePath::new("/"),
            Err(ModelError::AbsolutePath(_))
        ));
        assert!(matches!(
            SafeRelativePath::new("C:\\videos"),
            Err(ModelError::AbsolutePath(_))
        ));
    }

    #[test]
    fn test_rejects_parent_references() {
        for value in ["a/../b", "../parent", "../../grandparent", "a\\..\\b"] {
            assert!(
                matches!(SafeRelativePath::new(value), Err(ModelError::ParentReference(_))),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn test_accepts_relative_paths() {
        assert_eq!(SafeRelativePath::new("a/b.mp4").unwrap().as_str(), "a/b.mp4");
        assert_eq!(SafeRelativePath::new("a/./b").unwrap().as_str(), "a/./b");
        assert_eq!(SafeRelativePath::new("./current").unwrap().as_str(), "./current");
        assert_eq!(
            SafeRelativePath::new("nested/folder/file.%(ext)s").unwrap().as_str(),
            "nested/folder/file.%(ext)s"
        );
    }

    #[test]
    fn test_dotted_names_are_not_parent_refs() {
        assert!(SafeRelativePath::new("..hidden/file").is_ok());
        assert!(SafeRelativePath::new("name..mp4").is_ok());
    }

    #[test]
    fn test_posix_normalisation() {
        let path = SafeRelativePath::new("a/./b//c.mp4").unwrap();
        assert_eq!(path.to_posix(), "a/b/c.mp4");
        assert_eq!(
            path.resolve_under("/tmp/scratch"),
            PathBuf::from("/tmp/scratch/a/b/c.mp4")
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: SafeRelativePath = serde_json::from_str("\"videos/out.mp4\"").unwrap();
        assert_eq!(ok.as_str(), "videos/out.mp4");

        let err = serde_json::from_str::<SafeRelativePath>("\"../escape\"").unwrap_err();
        assert!(err.to_string().contains(".."));
    }
}
