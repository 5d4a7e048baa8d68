//! Repository path validation.
//!
//! Checks run cheapest first, and the traversal check runs on the raw
//! string before the filesystem is touched at all:
//!
//! 1. no `..` segment and no NUL byte (`path_traversal`, `invalid_path`)
//! 2. path canonicalizes (`not_found`)
//! 3. it is a directory (`not_a_directory`)
//! 4. it contains `.git` (`not_a_repository`)
//! 5. it descends from an allowed base, when any are configured
//!    (`outside_allowed_paths`)

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Resource bounds for one harvest. Fixed for the lifetime of a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLimits {
    pub max_files: usize,
    pub max_file_size_bytes: u64,
    pub max_total_size_bytes: u64,
    pub max_depth: usize,
    pub allowed_base_paths: Vec<PathBuf>,
}

impl Default for RepositoryLimits {
    fn default() -> Self {
        crate::config::LimitsConfig::default().to_limits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    PathTraversal,
    InvalidPath,
    NotFound,
    NotADirectory,
    NotARepository,
    OutsideAllowedPaths,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::PathTraversal => "path_traversal",
            ValidationCode::InvalidPath => "invalid_path",
            ValidationCode::NotFound => "not_found",
            ValidationCode::NotADirectory => "not_a_directory",
            ValidationCode::NotARepository => "not_a_repository",
            ValidationCode::OutsideAllowedPaths => "outside_allowed_paths",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{}: {message}", .code.as_str())]
pub struct ValidationFailure {
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationFailure {
    fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub struct PathValidator {
    limits: RepositoryLimits,
    /// Canonical forms of the configured bases that exist.
    allowed: Vec<PathBuf>,
}

impl PathValidator {
    pub fn new(limits: RepositoryLimits) -> Self {
        let allowed = limits
            .allowed_base_paths
            .iter()
            .filter_map(|base| {
                let expanded = shellexpand::tilde(&base.to_string_lossy()).into_owned();
                match std::fs::canonicalize(&expanded) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        tracing::warn!("Ignoring allowed base path {}: {}", base.display(), e);
                        None
                    }
                }
            })
            .collect();
        Self { limits, allowed }
    }

    pub fn limits(&self) -> &RepositoryLimits {
        &self.limits
    }

    /// Validate `raw` and return its canonical path.
    pub fn validate(&self, raw: &str) -> Result<PathBuf, ValidationFailure> {
        if raw.trim().is_empty() {
            return Err(ValidationFailure::new(
                ValidationCode::InvalidPath,
                "path is empty",
            ));
        }
        if raw.contains('\0') {
            return Err(ValidationFailure::new(
                ValidationCode::InvalidPath,
                "path contains a NUL byte",
            ));
        }
        if has_parent_segment(raw) {
            return Err(ValidationFailure::new(
                ValidationCode::PathTraversal,
                format!("path '{}' contains a '..' segment", raw),
            ));
        }

        let canonical = std::fs::canonicalize(raw).map_err(|e| {
            ValidationFailure::new(
                ValidationCode::NotFound,
                format!("path '{}' does not exist: {}", raw, e),
            )
        })?;

        if !canonical.is_dir() {
            return Err(ValidationFailure::new(
                ValidationCode::NotADirectory,
                format!("{} is not a directory", canonical.display()),
            ));
        }

        if !canonical.join(".git").exists() {
            return Err(ValidationFailure::new(
                ValidationCode::NotARepository,
                format!("{} is not a git repository (no .git)", canonical.display()),
            ));
        }

        if !self.limits.allowed_base_paths.is_empty() && !self.is_allowed(&canonical) {
            return Err(ValidationFailure::new(
                ValidationCode::OutsideAllowedPaths,
                format!("{} is outside the allowed base paths", canonical.display()),
            ));
        }

        Ok(canonical)
    }

    fn is_allowed(&self, canonical: &Path) -> bool {
        self.allowed.iter().any(|base| canonical.starts_with(base))
    }
}

/// True when any `/`- or `\`-separated segment is exactly `..`.
fn has_parent_segment(raw: &str) -> bool {
    raw.split(['/', '\\']).any(|segment| segment == "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        dir
    }

    fn validator() -> PathValidator {
        PathValidator::new(RepositoryLimits::default())
    }

    #[test]
    fn test_traversal_rejected_before_filesystem() {
        for raw in ["../../etc/passwd", "repo/../secret", "..", "a\\..\\b"] {
            let err = validator().validate(raw).unwrap_err();
            assert_eq!(err.code, ValidationCode::PathTraversal, "{}", raw);
        }
    }

    #[test]
    fn test_dots_inside_names_are_fine() {
        assert!(!has_parent_segment("/srv/my..repo"));
        assert!(!has_parent_segment("./repo"));
        assert!(has_parent_segment("/srv/../repo"));
    }

    #[test]
    fn test_missing_path() {
        let err = validator().validate("/definitely/not/here/xyz").unwrap_err();
        assert_eq!(err.code, ValidationCode::NotFound);
    }

    #[test]
    fn test_nul_byte() {
        let err = validator().validate("/tmp/a\0b").unwrap_err();
        assert_eq!(err.code, ValidationCode::InvalidPath);
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let dir = repo();
        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let err = validator().validate(file.to_str().unwrap()).unwrap_err();
        assert_eq!(err.code, ValidationCode::NotADirectory);
    }

    #[test]
    fn test_directory_without_git() {
        let dir = tempfile::tempdir().unwrap();
        let err = validator().validate(dir.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.code, ValidationCode::NotARepository);
    }

    #[test]
    fn test_valid_repository_is_canonicalized() {
        let dir = repo();
        let path = validator().validate(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(path, fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_allowed_base_paths() {
        let base = tempfile::tempdir().unwrap();
        let inside = base.path().join("project");
        fs::create_dir_all(inside.join(".git")).unwrap();
        let outside = repo();

        let limits = RepositoryLimits {
            allowed_base_paths: vec![base.path().to_path_buf()],
            ..RepositoryLimits::default()
        };
        let v = PathValidator::new(limits);

        assert!(v.validate(inside.to_str().unwrap()).is_ok());
        let err = v.validate(outside.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.code, ValidationCode::OutsideAllowedPaths);
    }

    #[test]
    fn test_failure_display_names_code() {
        let err = validator().validate("../x").unwrap_err();
        assert!(err.to_string().starts_with("path_traversal:"));
    }
}
