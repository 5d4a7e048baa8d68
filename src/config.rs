//! TOML configuration.
//!
//! Every section is optional and falls back to defaults, so a minimal
//! config file only needs the pieces that differ. A handful of settings can
//! be overridden from the environment (see [`apply_env_overrides`]).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkConfig;
use crate::harvest::validate::RepositoryLimits;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/ctx.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            max_tokens: default_max_tokens(),
            min_tokens: default_min_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_target_tokens() -> usize {
    500
}
fn default_max_tokens() -> usize {
    700
}
fn default_min_tokens() -> usize {
    200
}
fn default_overlap_tokens() -> usize {
    75
}

impl ChunkingConfig {
    pub fn to_chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            target_tokens: self.target_tokens,
            max_tokens: self.max_tokens,
            min_tokens: self.min_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"ollama"` (local model server) or `"openai"` (remote API).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            model: default_model(),
            dims: default_dims(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_total_size_mb")]
    pub max_total_size_mb: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub allowed_base_paths: Vec<PathBuf>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_file_size_mb: default_max_file_size_mb(),
            max_total_size_mb: default_max_total_size_mb(),
            max_depth: default_max_depth(),
            allowed_base_paths: Vec::new(),
        }
    }
}

fn default_max_files() -> usize {
    10_000
}
fn default_max_file_size_mb() -> u64 {
    10
}
fn default_max_total_size_mb() -> u64 {
    500
}
fn default_max_depth() -> usize {
    20
}

const MB: u64 = 1024 * 1024;

impl LimitsConfig {
    pub fn to_limits(&self) -> RepositoryLimits {
        RepositoryLimits {
            max_files: self.max_files,
            max_file_size_bytes: self.max_file_size_mb.saturating_mul(MB),
            max_total_size_bytes: self.max_total_size_mb.saturating_mul(MB),
            max_depth: self.max_depth,
            allowed_base_paths: self.allowed_base_paths.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    /// Extra exclusion globs, matched against repository-relative paths.
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    /// Overrides the global excludes file normally resolved from git config.
    #[serde(default)]
    pub global_ignore_file: Option<PathBuf>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            exclude_globs: default_exclude_globs(),
            global_ignore_file: None,
        }
    }
}

fn default_exclude_globs() -> Vec<String> {
    vec!["**/node_modules/**".to_string(), "**/target/**".to_string()]
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Full,
    Quick,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub scan_for_secrets: bool,
    #[serde(default = "default_true")]
    pub skip_files_with_secrets: bool,
    #[serde(default)]
    pub scan_mode: ScanMode,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            scan_for_secrets: true,
            skip_files_with_secrets: true,
            scan_mode: ScanMode::Full,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

/// Apply `CTX_*` environment overrides on top of the file values.
///
/// | Variable | Setting |
/// |----------|---------|
/// | `CTX_EMBEDDING_URL` | `embedding.url` |
/// | `CTX_ALLOWED_BASE_PATHS` | `limits.allowed_base_paths` (OS path-list syntax) |
/// | `CTX_SECRET_SCANNING` | `security.scan_for_secrets` |
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(url) = std::env::var("CTX_EMBEDDING_URL") {
        if !url.trim().is_empty() {
            config.embedding.url = Some(url);
        }
    }

    if let Some(paths) = std::env::var_os("CTX_ALLOWED_BASE_PATHS") {
        config.limits.allowed_base_paths = std::env::split_paths(&paths)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
    }

    if let Ok(flag) = std::env::var("CTX_SECRET_SCANNING") {
        config.security.scan_for_secrets = match flag.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => bail!("CTX_SECRET_SCANNING must be true or false, got '{}'", other),
        };
    }

    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    let c = &config.chunking;
    if c.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if !(c.min_tokens <= c.target_tokens && c.target_tokens <= c.max_tokens) {
        bail!(
            "chunking must satisfy min_tokens <= target_tokens <= max_tokens (got {} / {} / {})",
            c.min_tokens,
            c.target_tokens,
            c.max_tokens
        );
    }
    if c.overlap_tokens >= c.target_tokens {
        bail!("chunking.overlap_tokens must be < target_tokens");
    }

    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "ollama" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be ollama or openai.",
            other
        ),
    }

    if config.limits.max_files == 0 {
        bail!("limits.max_files must be > 0");
    }
    if config.limits.max_depth == 0 {
        bail!("limits.max_depth must be > 0");
    }
    if config.retrieval.default_limit == 0 {
        bail!("retrieval.default_limit must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.chunking.target_tokens, 500);
        assert_eq!(config.chunking.max_tokens, 700);
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.retrieval.default_limit, 5);
        assert!(config.security.scan_for_secrets);
        assert_eq!(config.security.scan_mode, ScanMode::Full);
        assert!(config.limits.allowed_base_paths.is_empty());
    }

    #[test]
    fn test_limits_convert_megabytes() {
        let config: Config = toml::from_str(
            r#"
            [limits]
            max_file_size_mb = 2
            max_total_size_mb = 3
            allowed_base_paths = ["/srv/repos"]
            "#,
        )
        .unwrap();
        let limits = config.limits.to_limits();
        assert_eq!(limits.max_file_size_bytes, 2 * 1024 * 1024);
        assert_eq!(limits.max_total_size_bytes, 3 * 1024 * 1024);
        assert_eq!(limits.allowed_base_paths, vec![PathBuf::from("/srv/repos")]);
    }

    #[test]
    fn test_huge_megabyte_limits_saturate() {
        let config: Config = toml::from_str(
            r#"
            [limits]
            max_file_size_mb = 9223372036854775807
            max_total_size_mb = 9223372036854775807
            "#,
        )
        .unwrap();
        let limits = config.limits.to_limits();
        assert_eq!(limits.max_file_size_bytes, u64::MAX);
        assert_eq!(limits.max_total_size_bytes, u64::MAX);
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_rejects_inverted_chunk_budget() {
        let config: Config =
            toml::from_str("[chunking]\ntarget_tokens = 800\nmax_tokens = 700").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_scan_mode_parses() {
        let config: Config = toml::from_str("[security]\nscan_mode = \"quick\"").unwrap();
        assert_eq!(config.security.scan_mode, ScanMode::Quick);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.toml");
        std::fs::write(&path, "[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.db.path, PathBuf::from("/tmp/x.sqlite"));
    }
}
