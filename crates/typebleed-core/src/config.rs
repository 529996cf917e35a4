use crate::codepoint::{codepoints, Codepoint};
use crate::error::{Result, TypeBleedError};
use crate::registry::default_alphabet;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// First path segments owned by built-in routes.
const RESERVED_SEGMENTS: [&str; 3] = ["api", "css", "static"];

/// Root of the TOML configuration. Every section is optional.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TypeBleedConfig {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub reconstruction: ReconstructionConfig,
    /// Characters the font was split into; the stock alphabet when absent.
    pub alphabet: Option<String>,
    pub templates: Vec<TemplateConfig>,
    /// Word lists by category, used for lexicon inference.
    pub lexicon: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub threads: usize,
    /// Directory holding `<HEX>.<extension>` font files.
    pub fonts_dir: Option<PathBuf>,
    /// Page served on `/`, with `{{ session_id }}` placeholders.
    pub page: Option<PathBuf>,
    /// Demo assets served under `/static/`.
    pub static_dir: Option<PathBuf>,
    pub font_family: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            threads: num_cpus::get(),
            fonts_dir: None,
            page: None,
            static_dir: None,
            font_family: "TypeBleed".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    pub prefix: String,
    pub extension: String,
    pub retention_secs: u64,
    pub sweep_interval_ms: u64,
    pub bucket_width_ms: u64,
    pub journal_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            prefix: "fonts/t".to_string(),
            extension: "woff2".to_string(),
            retention_secs: 3600,
            sweep_interval_ms: 1000,
            bucket_width_ms: 50,
            journal_capacity: 10_000,
        }
    }
}

impl CaptureConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub max_candidates: usize,
    pub step_budget: usize,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            max_candidates: 100,
            step_budget: 1_000_000,
        }
    }
}

/// Raw template description; validated into a `TemplateModel` by the codec.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TemplateConfig {
    pub name: String,
    #[serde(default)]
    pub static_characters: String,
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SlotConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub alphabet: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl TypeBleedConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        tracing::info!("Loading configuration from {}", path.display());
        Self::from_toml_str(&source)
    }

    /// Checks everything that can be checked without a registry. Template
    /// contents are validated when the codec builds its models.
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.retention_secs == 0 {
            return Err(TypeBleedError::config("capture.retention_secs must be positive"));
        }
        if capture.sweep_interval_ms == 0 {
            return Err(TypeBleedError::config("capture.sweep_interval_ms must be positive"));
        }
        if capture.bucket_width_ms == 0 {
            return Err(TypeBleedError::config("capture.bucket_width_ms must be positive"));
        }
        if capture.journal_capacity == 0 {
            return Err(TypeBleedError::config("capture.journal_capacity must be positive"));
        }
        let prefix = capture.prefix.trim_matches('/');
        if prefix.is_empty() || prefix.split('/').any(str::is_empty) {
            return Err(TypeBleedError::config(format!(
                "capture.prefix {:?} must be a non-empty path",
                capture.prefix
            )));
        }
        if prefix.contains(['{', '}', '*', '?', '#', '%']) {
            return Err(TypeBleedError::config(format!(
                "capture.prefix {:?} must not contain route or query syntax",
                capture.prefix
            )));
        }
        let first = prefix.split('/').next().unwrap_or_default();
        if RESERVED_SEGMENTS.contains(&first) || prefix == "fonts/char" {
            return Err(TypeBleedError::config(format!(
                "capture.prefix {:?} collides with a built-in route",
                capture.prefix
            )));
        }
        if capture.extension.is_empty()
            || !capture.extension.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(TypeBleedError::config(format!(
                "capture.extension {:?} must be alphanumeric",
                capture.extension
            )));
        }
        if self.reconstruction.max_candidates == 0 {
            return Err(TypeBleedError::config("reconstruction.max_candidates must be positive"));
        }
        if self.reconstruction.step_budget == 0 {
            return Err(TypeBleedError::config("reconstruction.step_budget must be positive"));
        }
        if self.server.threads == 0 {
            return Err(TypeBleedError::config("server.threads must be positive"));
        }
        if matches!(&self.alphabet, Some(a) if a.is_empty()) {
            return Err(TypeBleedError::config("alphabet must not be empty"));
        }

        let mut names = BTreeSet::new();
        for template in &self.templates {
            if template.name.is_empty() {
                return Err(TypeBleedError::config("template name must not be empty"));
            }
            if !names.insert(template.name.as_str()) {
                return Err(TypeBleedError::config(format!(
                    "duplicate template name {:?}",
                    template.name
                )));
            }
        }
        Ok(())
    }

    pub fn alphabet_set(&self) -> BTreeSet<Codepoint> {
        match &self.alphabet {
            Some(alphabet) => codepoints(alphabet),
            None => default_alphabet(),
        }
    }

    /// Capture prefix without surrounding slashes.
    pub fn capture_prefix(&self) -> &str {
        self.capture.prefix.trim_matches('/')
    }
}
