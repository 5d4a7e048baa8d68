//! Repository harvesting: validate a repository path, walk it, and collect
//! the text files that are safe and in budget to ingest.
//!
//! A [`Harvester`] moves through
//! `Pending → Validating → Walking → Completed | Aborted` once per call to
//! [`Harvester::harvest`]. Validation failures and a blown total-size
//! budget abort the harvest; everything else is a per-file
//! [`SkippedFile`].
//!
//! Directories are pruned before descent when they are VCS metadata or
//! excluded by an ignore rule. Per file, checks run in this order:
//!
//! 1. ignore rules (`ignore_rule`)
//! 2. sensitive name or extension (`sensitive_file`)
//! 3. recognized text extension (`binary`)
//! 4. per-file size limit (`too_large`)
//! 5. read as UTF-8 (`binary` on NUL bytes or invalid UTF-8, `read_error`)

pub mod ignore_rules;
pub mod sensitive;
pub mod validate;

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::{SkipReason, SkippedFile};
use ignore_rules::{is_vcs_metadata, IgnoreRules};
use sensitive::SensitiveFilter;
use validate::{PathValidator, RepositoryLimits, ValidationFailure};

/// Extensions read as text.
const TEXT_EXTENSIONS: &[&str] = &[
    // docs and data
    "md", "markdown", "mdx", "txt", "rst", "adoc", "org", "tex", "csv", "tsv", "json", "jsonl",
    "yaml", "yml", "toml", "ini", "cfg", "conf", "xml", "properties", "graphql", "proto", "sql",
    // web
    "html", "htm", "css", "scss", "sass", "less", "vue", "svelte", "astro",
    // languages
    "rs", "go", "py", "pyi", "rb", "php", "java", "kt", "kts", "scala", "groovy", "gradle",
    "c", "h", "cc", "cpp", "cxx", "hpp", "hh", "cs", "fs", "swift", "m", "mm", "dart", "lua",
    "pl", "pm", "r", "jl", "ex", "exs", "erl", "hrl", "hs", "ml", "mli", "clj", "cljs",
    "elm", "zig", "nim", "js", "jsx", "mjs", "cjs", "ts", "tsx",
    // shells and build
    "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd", "mk", "cmake", "nix", "tf", "hcl",
];

/// Extensionless files read as text.
const TEXT_FILE_NAMES: &[&str] = &[
    "Makefile", "Dockerfile", "Containerfile", "Jenkinsfile", "Rakefile", "Gemfile", "Procfile",
    "Vagrantfile", "LICENSE", "README", "CHANGELOG", "CONTRIBUTING", "AUTHORS", "NOTICE",
];

/// Leading bytes searched for NUL when sniffing binary content.
const BINARY_SNIFF_BYTES: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestState {
    Pending,
    Validating,
    Walking,
    Completed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub respect_ignore_rules: bool,
    pub exclude_globs: Vec<String>,
    pub global_ignore_file: Option<PathBuf>,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        let config = crate::config::HarvestConfig::default();
        Self {
            respect_ignore_rules: true,
            exclude_globs: config.exclude_globs,
            global_ignore_file: config.global_ignore_file,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
    #[error("repository exceeds total size limit ({total} > {limit} bytes)")]
    TotalSizeExceeded { total: u64, limit: u64 },
    #[error("invalid exclude glob: {0}")]
    Glob(#[from] globset::Error),
}

#[derive(Debug, Clone)]
pub struct HarvestedFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the repository root, `/`-separated.
    pub relative_path: String,
    pub content: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Harvest {
    /// Canonical repository root.
    pub root: PathBuf,
    /// Admitted files in traversal order.
    pub files: Vec<HarvestedFile>,
    pub skipped: Vec<SkippedFile>,
    /// Regular files examined, admitted or not.
    pub files_scanned: usize,
    pub total_size_bytes: u64,
    /// `max_files` was reached before the walk finished.
    pub truncated: bool,
}

pub struct Harvester {
    validator: PathValidator,
    options: HarvestOptions,
    filter: SensitiveFilter,
    state: HarvestState,
}

impl Harvester {
    pub fn new(limits: RepositoryLimits, options: HarvestOptions) -> Self {
        Self {
            validator: PathValidator::new(limits),
            options,
            filter: SensitiveFilter::new(),
            state: HarvestState::Pending,
        }
    }

    pub fn state(&self) -> HarvestState {
        self.state
    }

    fn transition(&mut self, next: HarvestState) {
        tracing::debug!("harvest state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn harvest(&mut self, raw_path: &str) -> Result<Harvest, HarvestError> {
        self.transition(HarvestState::Validating);
        let root = match self.validator.validate(raw_path) {
            Ok(root) => root,
            Err(e) => {
                self.transition(HarvestState::Aborted);
                return Err(e.into());
            }
        };

        self.transition(HarvestState::Walking);
        match self.walk(root) {
            Ok(harvest) => {
                self.transition(HarvestState::Completed);
                Ok(harvest)
            }
            Err(e) => {
                self.transition(HarvestState::Aborted);
                Err(e)
            }
        }
    }

    fn walk(&self, root: PathBuf) -> Result<Harvest, HarvestError> {
        let limits = self.validator.limits().clone();
        let rules = IgnoreRules::load(
            &root,
            self.options.respect_ignore_rules,
            self.options.global_ignore_file.as_deref(),
            &self.options.exclude_globs,
        )?;

        let mut harvest = Harvest {
            root: root.clone(),
            files: Vec::new(),
            skipped: Vec::new(),
            files_scanned: 0,
            total_size_bytes: 0,
            truncated: false,
        };

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .max_depth(limits.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                if is_vcs_metadata(&name) {
                    return false;
                }
                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                match rules.is_excluded(relative, true) {
                    Some(kind) => {
                        tracing::debug!("pruned {} ({})", relative.display(), kind.describe());
                        false
                    }
                    None => true,
                }
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| relative_string(&root, p))
                        .unwrap_or_default();
                    harvest
                        .skipped
                        .push(SkippedFile::new(path, SkipReason::ReadError, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if is_vcs_metadata(&name) {
                continue;
            }

            if harvest.files.len() >= limits.max_files {
                tracing::debug!("max_files ({}) reached, stopping walk", limits.max_files);
                harvest.truncated = true;
                break;
            }

            harvest.files_scanned += 1;
            let path = entry.path();
            let relative = path.strip_prefix(&root).unwrap_or(path);
            let relative_str = relative_string(&root, path);

            if let Some(kind) = rules.is_excluded(relative, false) {
                harvest.skipped.push(SkippedFile::new(
                    relative_str,
                    SkipReason::IgnoreRule,
                    kind.describe(),
                ));
                continue;
            }

            if let Some(why) = self.filter.is_sensitive_file(path) {
                tracing::warn!("Skipping sensitive file {}: {}", relative_str, why);
                harvest
                    .skipped
                    .push(SkippedFile::new(relative_str, SkipReason::SensitiveFile, why));
                continue;
            }

            if !is_text_file(path) {
                harvest.skipped.push(SkippedFile::new(
                    relative_str,
                    SkipReason::Binary,
                    "unsupported file extension",
                ));
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    harvest
                        .skipped
                        .push(SkippedFile::new(relative_str, SkipReason::ReadError, e.to_string()));
                    continue;
                }
            };
            if size > limits.max_file_size_bytes {
                harvest.skipped.push(SkippedFile::new(
                    relative_str,
                    SkipReason::TooLarge,
                    format!("{} bytes exceeds limit of {}", size, limits.max_file_size_bytes),
                ));
                continue;
            }

            let content = match read_text(path) {
                Ok(content) => content,
                Err((reason, details)) => {
                    harvest
                        .skipped
                        .push(SkippedFile::new(relative_str, reason, details));
                    continue;
                }
            };

            harvest.total_size_bytes += size;
            if harvest.total_size_bytes > limits.max_total_size_bytes {
                return Err(HarvestError::TotalSizeExceeded {
                    total: harvest.total_size_bytes,
                    limit: limits.max_total_size_bytes,
                });
            }

            harvest.files.push(HarvestedFile {
                path: path.to_path_buf(),
                relative_path: relative_str,
                content,
                size_bytes: size,
            });
        }

        tracing::debug!(
            "harvested {} file(s), skipped {}, scanned {}",
            harvest.files.len(),
            harvest.skipped.len(),
            harvest.files_scanned
        );
        Ok(harvest)
    }
}

fn relative_string(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn is_text_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext = ext.to_string_lossy().to_ascii_lowercase();
        return TEXT_EXTENSIONS.contains(&ext.as_str());
    }
    path.file_name()
        .map(|n| TEXT_FILE_NAMES.contains(&&*n.to_string_lossy()))
        .unwrap_or(false)
}

fn read_text(path: &Path) -> Result<String, (SkipReason, String)> {
    let bytes = std::fs::read(path).map_err(|e| (SkipReason::ReadError, e.to_string()))?;
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if sniff.contains(&0) {
        return Err((SkipReason::Binary, "contains NUL bytes".to_string()));
    }
    String::from_utf8(bytes).map_err(|_| (SkipReason::Binary, "not valid UTF-8".to_string()))
}
