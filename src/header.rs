//! Installer header document
//!
//! The header is compact UTF-8 JSON stored between the stub and the archive.
//! It describes the product, install rules, the compression used for the
//! archive, the file manifest, post-install actions and build provenance.
//!
//! Older builders nested `install` and `ui` under a `config` key. Reading
//! goes through [`InstallerHeader::deserialize`], which accepts both shapes.

use crate::archive::{normalize_path, CompressionAlgo, FileEntry};
use crate::error::{InspaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

/// Value of the `magic` key
pub const HEADER_MAGIC: &str = "INSPRO1";

/// Value of the `schema_version` key
pub const SCHEMA_VERSION: u32 = 1;

/// Default per-script timeout (seconds)
pub const DEFAULT_SCRIPT_TIMEOUT: u64 = 300;

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Product identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl ProductInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            company: None,
            description: None,
            copyright: None,
            website: None,
        }
    }
}

/// Install rules. Keys this crate does not interpret are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRules {
    /// Default target directory, may contain `%VAR%` / `$VAR` references
    #[serde(default)]
    pub default_path: String,

    #[serde(default = "default_true")]
    pub allow_user_path: bool,

    #[serde(default)]
    pub require_admin: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for InstallRules {
    fn default() -> Self {
        Self {
            default_path: String::new(),
            allow_user_path: true,
            require_admin: false,
            extra: Map::new(),
        }
    }
}

/// Compression used for the archive segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub algo: CompressionAlgo,
    pub level: i32,
    #[serde(default)]
    pub fallback_to_zip: bool,
}

impl CompressionInfo {
    pub fn new(algo: CompressionAlgo, level: i32) -> Self {
        Self {
            algo,
            level,
            fallback_to_zip: false,
        }
    }
}

/// Script interpreter for a post-install action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Powershell,
    Batch,
}

/// Condition under which a post-install action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunIf {
    #[default]
    Always,
    Success,
    Failure,
}

impl RunIf {
    /// Whether an action with this condition runs given the install state so far
    pub fn allows(&self, succeeded: bool) -> bool {
        match self {
            RunIf::Always => true,
            RunIf::Success => succeeded,
            RunIf::Failure => !succeeded,
        }
    }
}

/// Declarative post-install action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAction {
    #[serde(rename = "type")]
    pub kind: ScriptKind,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_true")]
    pub hidden: bool,

    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,

    #[serde(default)]
    pub run_if: RunIf,

    /// Relative paths resolve against the install directory
    #[serde(default)]
    pub working_dir: Option<String>,

    /// A failed required action marks the whole installation failed
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
}

impl PostAction {
    pub fn new(kind: ScriptKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            args: Vec::new(),
            hidden: true,
            timeout_sec: DEFAULT_SCRIPT_TIMEOUT,
            run_if: RunIf::Always,
            working_dir: None,
            required: false,
        }
    }

    /// Whether `command` names a script file rather than an inline command
    pub fn runs_script_file(&self) -> bool {
        match self.kind {
            ScriptKind::Powershell => has_extension(&self.command, &["ps1"]),
            ScriptKind::Batch => has_extension(&self.command, &["bat", "cmd"]),
        }
    }

    /// Forward slashes for script paths; inline commands are kept verbatim
    fn normalize_paths(&mut self) {
        if self.runs_script_file() {
            self.command = normalize_path(&self.command);
        }
        for arg in &mut self.args {
            if is_script_path(arg) {
                *arg = normalize_path(arg);
            }
        }
        if let Some(dir) = self.working_dir.as_mut() {
            *dir = normalize_path(dir);
        }
    }
}

pub(crate) fn has_extension(command: &str, extensions: &[&str]) -> bool {
    Path::new(command)
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// A bare script file reference, e.g. `scripts\helper.ps1`
fn is_script_path(arg: &str) -> bool {
    !arg.contains(char::is_whitespace) && has_extension(arg, &["ps1", "bat", "cmd"])
}

/// Digests over the container segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashInfo {
    pub algorithm: String,
    /// SHA-256 of the compressed archive bytes (hex)
    pub archive: String,
    /// Reserved; always null in headers written by this crate
    #[serde(default)]
    pub header: Option<String>,
}

impl HashInfo {
    pub fn sha256(archive: impl Into<String>) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            archive: archive.into(),
            header: None,
        }
    }
}

/// Build provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// RFC 3339, UTC
    pub timestamp: String,
    pub builder_version: String,
    pub config_fingerprint: String,
}

impl BuildInfo {
    /// Provenance stamped with the current time and this crate's version
    pub fn now(config_fingerprint: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            builder_version: env!("CARGO_PKG_VERSION").to_string(),
            config_fingerprint: config_fingerprint.into(),
        }
    }
}

/// Size statistics carried from build to header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildStats {
    pub original_size: u64,
    pub compressed_size: u64,
    pub file_count: u64,
}

/// The full header document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallerHeader {
    pub magic: String,
    pub schema_version: u32,
    pub product: ProductInfo,
    #[serde(default)]
    pub ui: Map<String, Value>,
    #[serde(default)]
    pub install: InstallRules,
    pub compression: CompressionInfo,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub scripts: Vec<PostAction>,
    #[serde(default)]
    pub env: Option<Map<String, Value>>,
    pub hash: HashInfo,
    pub build: BuildInfo,
    #[serde(default)]
    pub stats: Option<BuildStats>,
}

impl InstallerHeader {
    /// Assemble a header. Paths are normalized to forward slashes.
    pub fn new(
        product: ProductInfo,
        mut install: InstallRules,
        compression: CompressionInfo,
        files: Vec<FileEntry>,
        mut scripts: Vec<PostAction>,
        archive_digest: impl Into<String>,
        build: BuildInfo,
    ) -> Self {
        install.default_path = normalize_path(&install.default_path);
        for script in &mut scripts {
            script.normalize_paths();
        }
        let files = files
            .into_iter()
            .map(|mut f| {
                f.path = normalize_path(&f.path);
                f
            })
            .collect();

        Self {
            magic: HEADER_MAGIC.to_string(),
            schema_version: SCHEMA_VERSION,
            product,
            ui: Map::new(),
            install,
            compression,
            files,
            scripts,
            env: None,
            hash: HashInfo::sha256(archive_digest),
            build,
            stats: None,
        }
    }

    pub fn with_ui(mut self, ui: Map<String, Value>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_env(mut self, env: Map<String, Value>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_stats(mut self, stats: BuildStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Compact JSON; non-ASCII text is written as raw UTF-8
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a header, accepting the legacy `config`-nested shape
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let mut doc = match value {
            Value::Object(map) => map,
            _ => return Err(InspaError::NotAnInstaller("Header is not a JSON object".into())),
        };

        match doc.get("magic").and_then(Value::as_str) {
            Some(HEADER_MAGIC) => {}
            other => {
                return Err(InspaError::NotAnInstaller(format!(
                    "Header magic {:?}, expected {:?}",
                    other.unwrap_or("<missing>"),
                    HEADER_MAGIC
                )))
            }
        }

        let found = doc
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if found != SCHEMA_VERSION as u64 {
            return Err(InspaError::UnsupportedSchema {
                found,
                expected: SCHEMA_VERSION,
            });
        }

        hoist_legacy_config(&mut doc);

        serde_json::from_value(Value::Object(doc))
            .map_err(|e| InspaError::CorruptContainer(format!("Malformed header: {}", e)))
    }

    /// Total uncompressed size, from stats or summed over the manifest
    pub fn original_size(&self) -> u64 {
        match &self.stats {
            Some(stats) => stats.original_size,
            None => self.files.iter().map(|f| f.size).sum(),
        }
    }

    /// Number of regular files, from stats or counted in the manifest
    pub fn file_count(&self) -> u64 {
        match &self.stats {
            Some(stats) => stats.file_count,
            None => self.files.iter().filter(|f| !f.is_directory).count() as u64,
        }
    }
}

/// Move `config.install` / `config.ui` to the top level when the new keys are absent
fn hoist_legacy_config(doc: &mut Map<String, Value>) {
    let Some(Value::Object(config)) = doc.get("config").cloned() else {
        return;
    };

    for key in ["install", "ui"] {
        if doc.contains_key(key) {
            continue;
        }
        if let Some(section) = config.get(key) {
            debug!("Reading legacy header key config.{}", key);
            doc.insert(key.to_string(), section.clone());
        }
    }
    doc.remove("config");
}

/// SHA-256 hex digest
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 hex of the sorted-key JSON form of `value`
pub fn canonical_fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = sort_keys(serde_json::to_value(value)?);
    let json = serde_json::to_vec(&canonical)?;
    Ok(sha256_hex(&json))
}

/// Rebuild every object with its keys in ascending order
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_header() -> InstallerHeader {
        InstallerHeader::new(
            ProductInfo::new("Demo", "1.0.0"),
            InstallRules {
                default_path: "%ProgramFiles%\\Demo".to_string(),
                ..InstallRules::default()
            },
            CompressionInfo::new(CompressionAlgo::Zstd, 10),
            vec![
                FileEntry::file("bin\\app.exe", 10, 1),
                FileEntry::directory("docs", 2),
                FileEntry::file("docs/readme.txt", 5, 3),
            ],
            vec![PostAction::new(ScriptKind::Powershell, "scripts\\setup.ps1")],
            "ab".repeat(32),
            BuildInfo::now("00"),
        )
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header().with_stats(BuildStats {
            original_size: 15,
            compressed_size: 9,
            file_count: 2,
        });
        let bytes = header.serialize().unwrap();
        let parsed = InstallerHeader::deserialize(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_paths_use_forward_slashes() {
        let header = sample_header();
        assert_eq!(header.files[0].path, "bin/app.exe");
        assert_eq!(header.install.default_path, "%ProgramFiles%/Demo");
        assert_eq!(header.scripts[0].command, "scripts/setup.ps1");
        let text = String::from_utf8(header.serialize().unwrap()).unwrap();
        assert!(!text.contains('\\'));
    }

    #[test]
    fn test_inline_commands_kept_verbatim() {
        let mut cleanup = PostAction::new(ScriptKind::Batch, "del /Q C:\\temp\\old.log");
        cleanup.args = vec!["C:\\data\\dir".to_string(), "tools\\post.cmd".to_string()];
        let helper = PostAction::new(ScriptKind::Batch, "scripts\\finish.bat");

        let header = InstallerHeader::new(
            ProductInfo::new("Demo", "1.0.0"),
            InstallRules::default(),
            CompressionInfo::new(CompressionAlgo::Zip, 6),
            Vec::new(),
            vec![cleanup, helper],
            "ab".repeat(32),
            BuildInfo::now("00"),
        );

        assert_eq!(header.scripts[0].command, "del /Q C:\\temp\\old.log");
        assert_eq!(header.scripts[0].args, vec!["C:\\data\\dir", "tools/post.cmd"]);
        assert_eq!(header.scripts[1].command, "scripts/finish.bat");
        assert!(!header.scripts[0].runs_script_file());
        assert!(header.scripts[1].runs_script_file());
    }

    #[test]
    fn test_compact_json_keeps_unicode() {
        let mut header = sample_header();
        header.product.name = "安装程序".to_string();
        let bytes = header.serialize().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("安装程序"));
        assert!(!text.contains("\\u"));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn test_top_level_keys() {
        let value: Value = serde_json::from_slice(&sample_header().serialize().unwrap()).unwrap();
        for key in [
            "magic", "schema_version", "product", "ui", "install", "compression", "files",
            "scripts", "env", "hash", "build", "stats",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["hash"]["header"], Value::Null);
        assert_eq!(value["compression"]["algo"], "zstd");
        assert_eq!(value["scripts"][0]["type"], "powershell");
        assert!(value["scripts"][0].get("required").is_none());
    }

    #[test]
    fn test_wrong_magic_is_not_an_installer() {
        let mut value: Value = serde_json::from_slice(&sample_header().serialize().unwrap()).unwrap();
        value["magic"] = json!("SOMETHING");
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            InstallerHeader::deserialize(&bytes),
            Err(InspaError::NotAnInstaller(_))
        ));
    }

    #[test]
    fn test_wrong_schema_version() {
        let mut value: Value = serde_json::from_slice(&sample_header().serialize().unwrap()).unwrap();
        value["schema_version"] = json!(2);
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            InstallerHeader::deserialize(&bytes),
            Err(InspaError::UnsupportedSchema { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn test_legacy_config_shape() {
        let legacy = json!({
            "magic": "INSPRO1",
            "schema_version": 1,
            "product": {"name": "Old", "version": "0.9"},
            "config": {
                "install": {"default_path": "C:/Old", "require_admin": true, "silent": false},
                "ui": {"theme": "dark"}
            },
            "compression": {"algo": "zip", "level": 6},
            "files": [{"path": "a.txt", "size": 1, "mtime": 0, "is_directory": false}],
            "scripts": [],
            "env": null,
            "hash": {"algorithm": "sha256", "archive": "00"},
            "build": {"timestamp": "t", "builder_version": "0.1", "config_fingerprint": "f"}
        });
        let header = InstallerHeader::deserialize(&serde_json::to_vec(&legacy).unwrap()).unwrap();
        assert_eq!(header.install.default_path, "C:/Old");
        assert!(header.install.require_admin);
        assert_eq!(header.install.extra.get("silent"), Some(&json!(false)));
        assert_eq!(header.ui.get("theme"), Some(&json!("dark")));
        assert_eq!(header.compression.algo, CompressionAlgo::Zip);
        assert!(header.stats.is_none());
    }

    #[test]
    fn test_stats_fallback_to_manifest() {
        let header = sample_header();
        assert_eq!(header.original_size(), 15);
        assert_eq!(header.file_count(), 2);
    }

    #[test]
    fn test_post_action_defaults() {
        let action: PostAction =
            serde_json::from_value(json!({"type": "batch", "command": "setup.bat"})).unwrap();
        assert_eq!(action.kind, ScriptKind::Batch);
        assert!(action.hidden);
        assert_eq!(action.timeout_sec, DEFAULT_SCRIPT_TIMEOUT);
        assert_eq!(action.run_if, RunIf::Always);
        assert!(!action.required);
        assert!(RunIf::Failure.allows(false));
        assert!(!RunIf::Success.allows(false));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(canonical_fingerprint(&a).unwrap(), canonical_fingerprint(&b).unwrap());
        assert_ne!(
            canonical_fingerprint(&a).unwrap(),
            canonical_fingerprint(&json!({"b": 2})).unwrap()
        );
        assert_eq!(canonical_fingerprint(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_fingerprint_hashes_sorted_json() {
        #[derive(Serialize)]
        struct Unsorted {
            zeta: u32,
            alpha: Value,
        }

        let value = Unsorted {
            zeta: 1,
            alpha: json!({"m": [{"d": 4, "c": 5}], "b": 3}),
        };
        assert_eq!(
            canonical_fingerprint(&value).unwrap(),
            sha256_hex(br#"{"alpha":{"b":3,"m":[{"c":5,"d":4}]},"zeta":1}"#)
        );
    }
}
