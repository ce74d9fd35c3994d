use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AstCacheError, Result};
use crate::language::LanguageKind;
use crate::manager::profile::CacheStrategy;

/// Config file name looked up at the project root.
pub const CONFIG_FILE: &str = "ast-cache.toml";

/// Cache directory name used when `cache_root` is not configured.
pub const DEFAULT_CACHE_DIR: &str = ".ast-cache";

/// Configuration loaded from `ast-cache.toml` at the project root.
///
/// Every field is optional in the file. Batch tuning knobs left unset fall back
/// to the values of the selected [`CacheStrategy`] profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AstCacheConfig {
    /// Directory holding persisted cache entries. Relative paths are resolved
    /// against the project root. Defaults to `<project>/.ast-cache`.
    pub cache_root: Option<PathBuf>,
    /// Entries older than this are deleted by the cleaner ("2h", "30m", "1d").
    pub max_age: String,
    /// Total cache size that triggers LRU eviction ("100MB", "1GB").
    pub max_size: String,
    /// Languages to watch and track. Empty means every supported language.
    pub languages: Vec<String>,
    /// Additional glob patterns to exclude (beyond .gitignore and the defaults).
    pub exclude: Vec<String>,
    /// Batch window override in milliseconds.
    pub batch_window_ms: Option<u64>,
    /// Max queued changes before a count-triggered flush.
    pub max_batch_size: Option<usize>,
    /// Max estimated invalidation scope before a size-triggered flush.
    pub max_scope_size: Option<usize>,
    /// Max time a change may wait in the queue, in milliseconds.
    pub max_wait_ms: Option<u64>,
    /// Watcher debounce override in milliseconds.
    pub debounce_ms: Option<u64>,
    /// Cache strategy profile.
    pub strategy: CacheStrategy,
    /// Watch repository metadata and special-case branch switches.
    pub git_integration: bool,
    /// Interval between scheduled cleanup passes ("1h").
    pub cleanup_interval: String,
    /// Window during which a hash-less change to the same path is treated as an echo.
    pub dedup_window_ms: u64,
    /// Normalised load (0.0 - 1.0) above which dispatch is deferred.
    pub cpu_threshold: f64,
    /// Max analysis batches in flight at once.
    pub max_concurrent_batches: usize,
    /// How long watching stays paused after a branch switch before resuming.
    pub git_resume_delay_ms: u64,
}

impl Default for AstCacheConfig {
    fn default() -> Self {
        Self {
            cache_root: None,
            max_age: "7d".to_owned(),
            max_size: "500MB".to_owned(),
            languages: Vec::new(),
            exclude: Vec::new(),
            batch_window_ms: None,
            max_batch_size: None,
            max_scope_size: None,
            max_wait_ms: None,
            debounce_ms: None,
            strategy: CacheStrategy::default(),
            git_integration: true,
            cleanup_interval: "1h".to_owned(),
            dedup_window_ms: 100,
            cpu_threshold: 0.8,
            max_concurrent_batches: 2,
            git_resume_delay_ms: 2_000,
        }
    }
}

impl AstCacheConfig {
    /// Load configuration from `ast-cache.toml` in the given root directory.
    ///
    /// Returns a default configuration if the file does not exist. A file that
    /// exists but cannot be read, parsed or validated is an error: invalid
    /// configuration is the one failure surfaced immediately to the caller.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);

        let contents = match std::fs::read_to_string(&config_path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(AstCacheError::io(&config_path, err)),
        };

        let config = Self::from_toml_str(&contents)?;
        tracing::debug!(path = %config_path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|err| AstCacheError::validation(CONFIG_FILE, err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every option for range and format problems.
    pub fn validate(&self) -> Result<()> {
        self.max_age()?;
        self.max_size_bytes()?;
        self.cleanup_interval()?;
        self.supported_languages()?;

        for pattern in &self.exclude {
            glob::Pattern::new(pattern)
                .map_err(|err| AstCacheError::validation("exclude", format!("{pattern}: {err}")))?;
        }
        if self.max_batch_size == Some(0) {
            return Err(AstCacheError::validation("max_batch_size", "must be at least 1"));
        }
        if self.max_scope_size == Some(0) {
            return Err(AstCacheError::validation("max_scope_size", "must be at least 1"));
        }
        if !(self.cpu_threshold > 0.0 && self.cpu_threshold <= 1.0) {
            return Err(AstCacheError::validation(
                "cpu_threshold",
                format!("{} is outside (0.0, 1.0]", self.cpu_threshold),
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err(AstCacheError::validation(
                "max_concurrent_batches",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Parsed `max_age`.
    pub fn max_age(&self) -> Result<Duration> {
        parse_duration(&self.max_age).map_err(|reason| AstCacheError::validation("max_age", reason))
    }

    /// Parsed `max_size` in bytes.
    pub fn max_size_bytes(&self) -> Result<u64> {
        parse_size(&self.max_size).map_err(|reason| AstCacheError::validation("max_size", reason))
    }

    /// Parsed `cleanup_interval`.
    pub fn cleanup_interval(&self) -> Result<Duration> {
        let interval = parse_duration(&self.cleanup_interval)
            .map_err(|reason| AstCacheError::validation("cleanup_interval", reason))?;
        if interval.is_zero() {
            return Err(AstCacheError::validation("cleanup_interval", "must be non-zero"));
        }
        Ok(interval)
    }

    /// The configured languages, or every supported language when none are listed.
    pub fn supported_languages(&self) -> Result<Vec<LanguageKind>> {
        if self.languages.is_empty() {
            return Ok(LanguageKind::ALL.to_vec());
        }
        let mut langs = Vec::with_capacity(self.languages.len());
        for name in &self.languages {
            let lang = LanguageKind::from_str_loose(name).ok_or_else(|| {
                AstCacheError::validation("languages", format!("unsupported language '{name}'"))
            })?;
            if !langs.contains(&lang) {
                langs.push(lang);
            }
        }
        Ok(langs)
    }

    /// Absolute cache root for `project_root`.
    pub fn cache_root(&self, project_root: &Path) -> PathBuf {
        match &self.cache_root {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => project_root.join(p),
            None => project_root.join(DEFAULT_CACHE_DIR),
        }
    }
}

/// Parse a human duration such as `"500ms"`, `"45s"`, `"30m"`, `"2h"`, `"1d"` or `"1w"`.
///
/// A bare number is read as seconds. Fractions are allowed (`"1.5h"`).
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let (value, unit) = split_quantity(input)?;
    let secs = match unit.as_str() {
        "ms" => return Ok(Duration::from_secs_f64(value / 1000.0)),
        "" | "s" | "sec" | "secs" => value,
        "m" | "min" | "mins" => value * 60.0,
        "h" | "hr" | "hrs" => value * 3_600.0,
        "d" | "day" | "days" => value * 86_400.0,
        "w" | "week" | "weeks" => value * 604_800.0,
        other => return Err(format!("unknown duration unit '{other}' in '{input}'")),
    };
    Ok(Duration::from_secs_f64(secs))
}

/// Parse a human size such as `"42B"`, `"512KB"`, `"100MB"` or `"1GB"` (binary multiples).
pub fn parse_size(input: &str) -> std::result::Result<u64, String> {
    let (value, unit) = split_quantity(input)?;
    let multiplier: u64 = match unit.as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        other => return Err(format!("unknown size unit '{other}' in '{input}'")),
    };
    Ok((value * multiplier as f64).round() as u64)
}

/// Split `"100 MB"` into `(100.0, "mb")`.
fn split_quantity(input: &str) -> std::result::Result<(f64, String), String> {
    let trimmed = input.trim();
    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    if number.is_empty() {
        return Err(format!("expected a number in '{input}'"));
    }
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid number '{number}' in '{input}'"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("'{input}' must be a non-negative quantity"));
    }
    Ok((value, unit.trim().to_lowercase()))
}
