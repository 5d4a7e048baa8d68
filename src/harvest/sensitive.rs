//! Secret detection.
//!
//! Two independent checks:
//!
//! - [`SensitiveFilter::is_sensitive_file`] looks only at the file name:
//!   key/certificate/keystore extensions, env files, credential- or
//!   secret-named config files and SSH private key names. It never reads
//!   content.
//! - [`SensitiveFilter::detect`] runs content patterns and reports matches
//!   as [`SecretMatch`]es with a masked preview. The matched secret itself
//!   is never returned or logged.
//!
//! [`SensitiveFilter::quick_scan`] runs a small high-signal subset. In
//! [`ScanMode::Full`] it is the first gate: a quick hit already decides the
//! file, and only quick-clean text goes through the full list.
//! [`SensitiveFilter::contains_sensitive_data`] answers yes/no with a single
//! `RegexSet` pass over the full pattern list.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::Serialize;
use std::path::Path;

use crate::config::ScanMode;

struct ContentPattern {
    id: &'static str,
    regex: &'static str,
    quick: bool,
}

const CONTENT_PATTERNS: &[ContentPattern] = &[
    ContentPattern {
        id: "private_key",
        regex: r"-----BEGIN (?:[A-Z0-9]+ )*PRIVATE KEY(?: BLOCK)?-----",
        quick: true,
    },
    ContentPattern {
        id: "aws_access_key",
        regex: r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
        quick: true,
    },
    ContentPattern {
        id: "aws_secret_key",
        regex: r#"(?i)aws_?secret_?(?:access_?)?key\s*[=:]\s*["']?[A-Za-z0-9/+=]{40}"#,
        quick: false,
    },
    ContentPattern {
        id: "github_token",
        regex: r"\b(?:gh[pousr]_[A-Za-z0-9]{36}|github_pat_[A-Za-z0-9_]{82})\b",
        quick: true,
    },
    ContentPattern {
        id: "openai_key",
        regex: r"\bsk-(?:proj-)?[A-Za-z0-9_-]{20,}",
        quick: true,
    },
    ContentPattern {
        id: "slack_token",
        regex: r"\bxox[baprs]-[0-9A-Za-z-]{10,}",
        quick: false,
    },
    ContentPattern {
        id: "google_api_key",
        regex: r"\bAIza[0-9A-Za-z_-]{35}",
        quick: false,
    },
    ContentPattern {
        id: "connection_string",
        regex: r#"(?i)\b(?:jdbc:)?(?:postgres(?:ql)?|mysql|mariadb|sqlserver|oracle|mongodb(?:\+srv)?|redis|amqps?)://[^\s:/@"']+:[^\s@"']+@[^\s"']+"#,
        quick: true,
    },
    ContentPattern {
        id: "api_key_assignment",
        regex: r#"(?i)\b[a-z0-9_]*api[_-]?(?:key|token|secret)\s*[=:]\s*["']?[A-Za-z0-9_\-+/=.]{16,}"#,
        quick: false,
    },
    ContentPattern {
        id: "secret_assignment",
        regex: r#"(?i)\b[a-z0-9_]*(?:password|passwd|secret|auth_?token|access_?token)\s*[=:]\s*["'][A-Za-z0-9_\-+/=.!@#$%^&*]{8,}["']"#,
        quick: false,
    },
    ContentPattern {
        id: "bearer_token",
        regex: r"(?i)\bbearer\s+[A-Za-z0-9_\-.=]{20,}",
        quick: false,
    },
    ContentPattern {
        id: "base64_blob",
        regex: r"[A-Za-z0-9+/]{100,}={0,2}",
        quick: false,
    },
];

static COMPILED: Lazy<Vec<(&'static str, Regex, bool)>> = Lazy::new(|| {
    CONTENT_PATTERNS
        .iter()
        .map(|p| (p.id, Regex::new(p.regex).expect("Invalid regex"), p.quick))
        .collect()
});

static CONTENT_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(CONTENT_PATTERNS.iter().map(|p| p.regex)).expect("Invalid regex set")
});

const SENSITIVE_EXTENSIONS: &[&str] = &[
    "pem", "key", "p12", "pfx", "jks", "keystore", "crt", "cer", "der", "p8", "ppk", "kdbx",
    "asc", "gpg",
];

static SENSITIVE_NAMES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // .env, .env.local, .env.production (templates are allowed below)
        Regex::new(r"(?i)^\.env(?:\..+)?$").expect("Invalid regex"),
        // credentials.json, secrets.yaml, db-credentials, app_secret.toml
        Regex::new(
            r"(?i)(?:^|[._-])(?:credentials?|secrets?)(?:\.(?:json|ya?ml|toml|ini|conf|cfg|txt|xml|properties|env))?$",
        )
        .expect("Invalid regex"),
        Regex::new(r"^id_(?:rsa|dsa|ecdsa|ed25519)$").expect("Invalid regex"),
        Regex::new(r"^\.?(?:htpasswd|netrc|pgpass|npmrc|pypirc)$").expect("Invalid regex"),
    ]
});

const ENV_TEMPLATES: &[&str] = &[".env.example", ".env.sample", ".env.template"];

/// One content match. `preview` shows at most four leading characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretMatch {
    pub pattern: &'static str,
    pub preview: String,
    /// Byte offset of the match in the scanned text.
    pub offset: usize,
    /// 1-based line number.
    pub line: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SensitiveFilter;

impl SensitiveFilter {
    pub fn new() -> Self {
        Self
    }

    /// Name/extension check. Returns a description of why the file is
    /// sensitive, or `None`.
    pub fn is_sensitive_file(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_string_lossy();

        if let Some(ext) = path.extension() {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            if SENSITIVE_EXTENSIONS.contains(&ext.as_str()) {
                return Some(format!("sensitive extension .{}", ext));
            }
        }

        if ENV_TEMPLATES.contains(&name.to_ascii_lowercase().as_str()) {
            return None;
        }
        if SENSITIVE_NAMES.iter().any(|re| re.is_match(&name)) {
            return Some(format!("sensitive file name {}", name));
        }
        None
    }

    pub fn contains_sensitive_data(&self, text: &str) -> bool {
        CONTENT_SET.is_match(text)
    }

    /// Every match of the full pattern list, in pattern order.
    pub fn scan(&self, text: &str) -> Vec<SecretMatch> {
        self.run(text, false)
    }

    /// Matches of the high-signal subset only.
    pub fn quick_scan(&self, text: &str) -> Vec<SecretMatch> {
        self.run(text, true)
    }

    /// Matches used for the skip decision. `Full` reports the quick-subset
    /// hits when there are any, otherwise every match of the full list.
    pub fn detect(&self, text: &str, mode: ScanMode) -> Vec<SecretMatch> {
        let quick = self.quick_scan(text);
        match mode {
            ScanMode::Quick => quick,
            ScanMode::Full if !quick.is_empty() => quick,
            ScanMode::Full => self.scan(text),
        }
    }

    fn run(&self, text: &str, quick_only: bool) -> Vec<SecretMatch> {
        if !quick_only && !self.contains_sensitive_data(text) {
            return Vec::new();
        }
        let mut matches = Vec::new();
        for (id, regex, quick) in COMPILED.iter() {
            if quick_only && !quick {
                continue;
            }
            for m in regex.find_iter(text) {
                matches.push(SecretMatch {
                    pattern: id,
                    preview: mask(m.as_str()),
                    offset: m.start(),
                    line: line_of(text, m.start()),
                });
            }
        }
        matches
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}

fn line_of(text: &str, offset: usize) -> usize {
    text.as_bytes()[..offset]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

/// Short human-readable summary for skip details and logs.
pub fn summarize(matches: &[SecretMatch]) -> String {
    let mut ids: Vec<&str> = matches.iter().map(|m| m.pattern).collect();
    ids.dedup();
    match matches.first() {
        Some(first) => format!(
            "{} potential secret(s) [{}], first at line {}",
            matches.len(),
            ids.join(", "),
            first.line
        ),
        None => "no secrets".to_string(),
    }
}
