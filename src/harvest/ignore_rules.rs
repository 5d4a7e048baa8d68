//! Gitignore-style exclusion.
//!
//! Rules come from independent sources, each compiled into its own
//! matcher and evaluated with normal gitignore precedence (last match wins,
//! `!` re-includes). The sources are then OR'ed: a path is excluded if any
//! one of them excludes it. A negation in the repository's `.gitignore`
//! therefore cannot re-include something the global excludes file ignores.
//!
//! Sources, in load order:
//!
//! | Source | File |
//! |--------|------|
//! | [`IgnoreSourceKind::LocalIgnore`] | `<root>/.gitignore` |
//! | [`IgnoreSourceKind::LocalExclude`] | `<root>/.git/info/exclude` |
//! | [`IgnoreSourceKind::GlobalIgnore`] | `core.excludesFile`, else `$XDG_CONFIG_HOME/git/ignore` or `~/.config/git/ignore` |
//! | [`IgnoreSourceKind::ExcludeGlobs`] | configured globs |
//!
//! A directory matches an exclude glob when the glob matches the directory
//! itself or anything directly inside it, so `**/node_modules/**` prunes
//! `node_modules` before the walker descends into it.
//!
//! Nested `.gitignore` files below the root are not consulted.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use std::process::Command;

/// VCS metadata names that are never harvested.
const VCS_METADATA: &[&str] = &[".git", ".gitignore", ".gitattributes", ".gitmodules", ".gitkeep"];

/// Stand-in child name used to test directories against exclude globs.
/// NUL cannot occur in a real file name.
const ANY_CHILD: &str = "\0";

pub fn is_vcs_metadata(name: &str) -> bool {
    VCS_METADATA.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreSourceKind {
    LocalIgnore,
    LocalExclude,
    GlobalIgnore,
    ExcludeGlobs,
}

impl IgnoreSourceKind {
    pub fn describe(&self) -> &'static str {
        match self {
            IgnoreSourceKind::LocalIgnore => "matched .gitignore",
            IgnoreSourceKind::LocalExclude => "matched .git/info/exclude",
            IgnoreSourceKind::GlobalIgnore => "matched global excludes file",
            IgnoreSourceKind::ExcludeGlobs => "matched configured exclude glob",
        }
    }
}

pub struct IgnoreRules {
    sources: Vec<(IgnoreSourceKind, Gitignore)>,
    globs: GlobSet,
}

impl IgnoreRules {
    /// Load rules for the repository at `root`.
    ///
    /// With `respect_ignore_rules` off only `exclude_globs` apply.
    /// `global_override` replaces global excludes discovery (a leading `~`
    /// is expanded); pointing it at a missing file disables global rules.
    pub fn load(
        root: &Path,
        respect_ignore_rules: bool,
        global_override: Option<&Path>,
        exclude_globs: &[String],
    ) -> Result<Self, globset::Error> {
        let mut sources = Vec::new();

        if respect_ignore_rules {
            let global = match global_override {
                Some(path) => Some(expand_tilde(path)),
                None => resolve_global_excludes(root),
            };

            let candidates = [
                (IgnoreSourceKind::LocalIgnore, Some(root.join(".gitignore"))),
                (
                    IgnoreSourceKind::LocalExclude,
                    Some(root.join(".git").join("info").join("exclude")),
                ),
                (IgnoreSourceKind::GlobalIgnore, global),
            ];

            for (kind, path) in candidates {
                let Some(path) = path else { continue };
                if !path.is_file() {
                    continue;
                }
                if let Some(matcher) = compile(root, &path) {
                    tracing::debug!("Loaded ignore rules from {}", path.display());
                    sources.push((kind, matcher));
                }
            }
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_globs {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            sources,
            globs: builder.build()?,
        })
    }

    /// Which source excludes `relative`, if any. `relative` is relative to
    /// the repository root.
    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> Option<IgnoreSourceKind> {
        for (kind, matcher) in &self.sources {
            if matcher
                .matched_path_or_any_parents(relative, is_dir)
                .is_ignore()
            {
                return Some(*kind);
            }
        }
        let glob_hit = if is_dir {
            self.globs.is_match(relative) || self.globs.is_match(relative.join(ANY_CHILD))
        } else {
            self.globs.is_match(relative)
        };
        if glob_hit {
            return Some(IgnoreSourceKind::ExcludeGlobs);
        }
        None
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

fn compile(root: &Path, file: &Path) -> Option<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(file) {
        tracing::warn!("Error loading {}: {}", file.display(), err);
    }
    match builder.build() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!("Failed to build ignore matcher for {}: {}", file.display(), e);
            None
        }
    }
}

fn resolve_global_excludes(root: &Path) -> Option<PathBuf> {
    git_config_excludes_file(root).or_else(default_global_excludes)
}

fn git_config_excludes_file(root: &Path) -> Option<PathBuf> {
    let output = Command::new("git")
        .args(["config", "--get", "core.excludesFile"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        return None;
    }
    Some(expand_tilde(Path::new(&value)))
}

fn expand_tilde(path: &Path) -> PathBuf {
    expand_tilde_with(path, home_dir().as_deref())
}

fn expand_tilde_with(path: &Path, home: Option<&Path>) -> PathBuf {
    let raw = path.to_string_lossy();
    let home: Option<String> = home.map(|h| h.to_string_lossy().into_owned());
    PathBuf::from(shellexpand::tilde_with_context(raw.as_ref(), || home).into_owned())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn default_global_excludes() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("git").join("ignore"));
    }
    home_dir().map(|home| home.join(".config").join("git").join("ignore"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git").join("info")).unwrap();
        dir
    }

    fn no_global(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("no-such-global-ignore")
    }

    #[test]
    fn test_local_gitignore() {
        let dir = repo();
        fs::write(dir.path().join(".gitignore"), "*.log\nbuild/\n!keep.log\n").unwrap();
        let rules = IgnoreRules::load(dir.path(), true, Some(&no_global(&dir)), &[]).unwrap();

        assert_eq!(
            rules.is_excluded(Path::new("debug.log"), false),
            Some(IgnoreSourceKind::LocalIgnore)
        );
        assert_eq!(rules.is_excluded(Path::new("keep.log"), false), None);
        assert!(rules.is_excluded(Path::new("build"), true).is_some());
        assert!(rules.is_excluded(Path::new("build/out/app.js"), false).is_some());
        assert_eq!(rules.is_excluded(Path::new("src/main.rs"), false), None);
    }

    #[test]
    fn test_info_exclude() {
        let dir = repo();
        fs::write(dir.path().join(".git/info/exclude"), "scratch.txt\n").unwrap();
        let rules = IgnoreRules::load(dir.path(), true, Some(&no_global(&dir)), &[]).unwrap();
        assert_eq!(
            rules.is_excluded(Path::new("scratch.txt"), false),
            Some(IgnoreSourceKind::LocalExclude)
        );
    }

    #[test]
    fn test_sources_are_ored_not_merged() {
        let dir = repo();
        let global = dir.path().join("global-ignore");
        fs::write(&global, "*.tmp\n").unwrap();
        fs::write(dir.path().join(".gitignore"), "!important.tmp\n").unwrap();

        let rules = IgnoreRules::load(dir.path(), true, Some(&global), &[]).unwrap();
        assert_eq!(rules.source_count(), 2);
        assert_eq!(
            rules.is_excluded(Path::new("important.tmp"), false),
            Some(IgnoreSourceKind::GlobalIgnore)
        );
    }

    #[test]
    fn test_missing_global_override_disables_global_rules() {
        let dir = repo();
        let rules = IgnoreRules::load(dir.path(), true, Some(&no_global(&dir)), &[]).unwrap();
        assert_eq!(rules.source_count(), 0);
        assert_eq!(rules.is_excluded(Path::new("anything.tmp"), false), None);
    }

    #[test]
    fn test_respect_off_keeps_only_globs() {
        let dir = repo();
        fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        let globs = vec!["**/node_modules/**".to_string()];
        let rules = IgnoreRules::load(dir.path(), false, Some(&no_global(&dir)), &globs).unwrap();

        assert_eq!(rules.is_excluded(Path::new("debug.log"), false), None);
        assert_eq!(
            rules.is_excluded(Path::new("web/node_modules/x/index.js"), false),
            Some(IgnoreSourceKind::ExcludeGlobs)
        );
    }

    #[test]
    fn test_exclude_globs_prune_directories() {
        let dir = repo();
        let globs = vec!["**/node_modules/**".to_string(), "**/target/**".to_string()];
        let rules = IgnoreRules::load(dir.path(), true, Some(&no_global(&dir)), &globs).unwrap();

        assert_eq!(
            rules.is_excluded(Path::new("node_modules"), true),
            Some(IgnoreSourceKind::ExcludeGlobs)
        );
        assert_eq!(
            rules.is_excluded(Path::new("web/node_modules"), true),
            Some(IgnoreSourceKind::ExcludeGlobs)
        );
        assert!(rules.is_excluded(Path::new("target"), true).is_some());
        assert_eq!(rules.is_excluded(Path::new("src"), true), None);
        assert_eq!(rules.is_excluded(Path::new("node_modules_docs"), true), None);
    }

    #[test]
    fn test_file_globs_do_not_prune_directories() {
        let dir = repo();
        let globs = vec!["**/*.min.js".to_string()];
        let rules = IgnoreRules::load(dir.path(), true, Some(&no_global(&dir)), &globs).unwrap();
        assert_eq!(rules.is_excluded(Path::new("static"), true), None);
        assert!(rules.is_excluded(Path::new("static/app.min.js"), false).is_some());
    }

    #[test]
    fn test_global_override_expands_tilde() {
        let home = tempfile::tempdir().unwrap();
        fs::write(home.path().join("gi"), "*.md\n").unwrap();

        let expanded = expand_tilde_with(Path::new("~/gi"), Some(home.path()));
        assert_eq!(expanded, home.path().join("gi"));
        assert_eq!(
            expand_tilde_with(Path::new("/etc/gitignore"), Some(home.path())),
            PathBuf::from("/etc/gitignore")
        );
        assert_eq!(expand_tilde_with(Path::new("~/gi"), None), PathBuf::from("~/gi"));

        let dir = repo();
        let rules = IgnoreRules::load(dir.path(), true, Some(&expanded), &[]).unwrap();
        assert_eq!(
            rules.is_excluded(Path::new("notes.md"), false),
            Some(IgnoreSourceKind::GlobalIgnore)
        );
    }

    #[test]
    fn test_global_override_with_tilde_uses_home() {
        let Some(home) = home_dir() else { return };
        assert_eq!(expand_tilde(Path::new("~/gi")), home.join("gi"));
    }

    #[test]
    fn test_bad_glob_is_an_error() {
        let dir = repo();
        assert!(IgnoreRules::load(dir.path(), false, None, &["a[".to_string()]).is_err());
    }

    #[test]
    fn test_vcs_metadata_names() {
        assert!(is_vcs_metadata(".git"));
        assert!(is_vcs_metadata(".gitignore"));
        assert!(is_vcs_metadata(".gitattributes"));
        assert!(!is_vcs_metadata(".github"));
        assert!(!is_vcs_metadata("main.rs"));
    }
}
