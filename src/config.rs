//! Build configuration loaded from TOML
//!
//! ```toml
//! input = "app"
//! output = "dist/demo-setup.exe"
//! exclude = [".pdb", "__pycache__"]
//!
//! [product]
//! name = "Demo"
//! version = "1.2.0"
//!
//! [install]
//! default_path = "%ProgramFiles%/Demo"
//!
//! [compression]
//! algo = "zstd"
//! level = 10
//! fallback_to_zip = true
//!
//! [[scripts]]
//! type = "powershell"
//! command = "scripts/setup.ps1"
//! run_if = "success"
//! ```
//!
//! Relative `input`, `output` and `stub` paths resolve against the directory
//! holding the config file.

use crate::archive::{normalize_path, CompressionAlgo};
use crate::error::{InspaError, Result};
use crate::header::{canonical_fingerprint, CompressionInfo, InstallRules, PostAction, ProductInfo};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `[compression]` table
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub algo: CompressionAlgo,
    /// Defaults per algorithm when omitted
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub fallback_to_zip: bool,
}

impl CompressionConfig {
    pub fn effective_level(&self) -> i32 {
        self.level.unwrap_or_else(|| self.algo.default_level())
    }

    pub fn to_info(&self) -> CompressionInfo {
        CompressionInfo {
            algo: self.algo,
            level: self.effective_level(),
            fallback_to_zip: self.fallback_to_zip,
        }
    }
}

/// Everything needed to build one installer
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    pub product: ProductInfo,

    #[serde(default)]
    pub ui: Map<String, Value>,

    #[serde(default)]
    pub install: InstallRules,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub scripts: Vec<PostAction>,

    #[serde(default)]
    pub env: Option<Map<String, Value>>,

    /// Directory whose contents are packaged
    pub input: PathBuf,

    /// Substring patterns; matching relative paths are skipped
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Runtime stub prepended to the container
    #[serde(default)]
    pub stub: Option<PathBuf>,
}

impl BuildConfig {
    /// Parse and validate a TOML document. Paths are kept as written.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, resolving relative paths against its directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| InspaError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&text)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.input = resolve(base, &config.input);
        config.output = config.output.as_deref().map(|p| resolve(base, p));
        config.stub = config.stub.as_deref().map(|p| resolve(base, p));

        debug!("Loaded build config from {}", path.display());
        Ok(config)
    }

    /// Reject configurations that cannot produce a usable installer
    pub fn validate(&self) -> Result<()> {
        if self.product.name.trim().is_empty() {
            return Err(InspaError::Config("product.name must not be empty".into()));
        }
        if self.product.version.trim().is_empty() {
            return Err(InspaError::Config("product.version must not be empty".into()));
        }

        let level = self.compression.effective_level();
        let (min, max) = self.compression.algo.level_range();
        if !(min..=max).contains(&level) {
            return Err(InspaError::Config(format!(
                "compression.level {} out of range for {} ({}..={})",
                level, self.compression.algo, min, max
            )));
        }

        for (index, script) in self.scripts.iter().enumerate() {
            if script.command.trim().is_empty() {
                return Err(InspaError::Config(format!(
                    "scripts[{}].command must not be empty",
                    index
                )));
            }
            if script.timeout_sec == 0 {
                return Err(InspaError::Config(format!(
                    "scripts[{}].timeout_sec must be positive",
                    index
                )));
            }
        }

        Ok(())
    }

    /// Output path, defaulting to `<name>-<version>-setup.exe` next to the input
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => {
                let name: String = self
                    .product
                    .name
                    .chars()
                    .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                    .collect();
                let file = format!("{}-{}-setup.exe", name, self.product.version);
                self.input
                    .parent()
                    .map(|p| p.join(&file))
                    .unwrap_or_else(|| PathBuf::from(file))
            }
        }
    }

    /// SHA-256 over every build-affecting field (not the output location)
    pub fn fingerprint(&self) -> Result<String> {
        let doc = json!({
            "product": self.product,
            "ui": self.ui,
            "install": self.install,
            "compression": self.compression.to_info(),
            "scripts": self.scripts,
            "env": self.env,
            "input": normalize_path(&self.input.to_string_lossy()),
            "exclude": self.exclude,
        });
        canonical_fingerprint(&doc)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
