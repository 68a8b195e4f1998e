use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::db::DEFAULT_DB_PATH;
use crate::parser::markers::{ExtractOptions, DEFAULT_MARKER};
use crate::scan::{ScanOptions, DEFAULT_EXTENSIONS, DEFAULT_IGNORE_DIRS};
use crate::schema::assemble::{AssembleOptions, DuplicatePolicy};
use crate::watch::DEFAULT_DEBOUNCE;

pub const DEFAULT_CONFIG_FILE: &str = "cms.toml";
pub const ENV_PREFIX: &str = "CMS";

/// Layered settings: serde defaults, then `cms.toml`, then `CMS_*` env vars.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub src_dir: PathBuf,
    pub db_path: PathBuf,
    pub schema_out: PathBuf,
    pub marker: String,
    pub extensions: Vec<String>,
    pub ignore_dirs: Vec<String>,
    pub capture_text: bool,
    pub duplicate_policy: DuplicatePolicy,
    pub delete_removed: bool,
    pub debounce_ms: u64,
    pub default_locale: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            src_dir: PathBuf::from("src"),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            schema_out: PathBuf::from("cms-schema.json"),
            marker: DEFAULT_MARKER.to_string(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect(),
            capture_text: true,
            duplicate_policy: DuplicatePolicy::default(),
            delete_removed: false,
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            default_locale: "en".to_string(),
        }
    }
}

impl Settings {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            src_dir: self.src_dir.clone(),
            extensions: self
                .extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            ignore_dirs: self.ignore_dirs.clone(),
            extract: ExtractOptions {
                marker: self.marker.clone(),
                capture_text: self.capture_text,
            },
            assemble: AssembleOptions {
                duplicate_policy: self.duplicate_policy,
            },
            show_progress: false,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Load settings from `file` (or `cms.toml` in the working directory, if present)
/// and the process environment.
pub fn load(file: Option<&Path>) -> Result<Settings, ConfigError> {
    load_with(file, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("extensions")
        .with_list_parse_key("ignore_dirs")
}

fn load_with(file: Option<&Path>, env: Environment) -> Result<Settings, ConfigError> {
    let source = match file {
        Some(path) => File::from(path).required(true),
        None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
    };
    Config::builder()
        .add_source(source)
        .add_source(env)
        .build()?
        .try_deserialize()
}

// ── Tests ──
