use crate::error::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};

pub const DEFAULT_TOOL: &str = "radare2";

/// Decompiler backend selection.
///
/// `Auto` probes the tool for an installed r2dec plugin and falls back to
/// the builtin pseudo decompiler when the plugin is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Decompiler {
    #[default]
    Auto,
    Pdc,
    R2Dec,
}

impl Decompiler {
    /// Tool command implementing this selection. `r2dec_available` is the
    /// result of probing the installed decompiler plugins.
    pub fn command(self, r2dec_available: bool) -> &'static str {
        match self {
            Decompiler::Auto if r2dec_available => "pddo",
            Decompiler::Auto => "pdc",
            Decompiler::Pdc => "pdc",
            Decompiler::R2Dec => "pddo",
        }
    }
}

/// Values applied to the tool display engine right after a session opens.
/// The raw command output is returned to callers untouched, so whoever
/// renders it decides what these switches should be.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// `scr.color` level, 0 disables coloring.
    pub color: u8,
    /// `scr.html` switch, wraps output into html markup.
    pub html: bool,
    /// `scr.utf8` switch, allows utf8 glyphs in text art.
    pub utf8: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            color: 0,
            html: false,
            utf8: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Explicit path to the tool executable. When unset the executable is
    /// located through `PATH`.
    pub tool_path: Option<PathBuf>,
    /// Single read timeout on the tool stdout, milliseconds.
    pub read_timeout_ms: u64,
    /// How many timed out reads are tolerated within one exchange before
    /// the pipe is declared broken.
    pub read_retry_limit: u32,
    pub decompiler: Decompiler,
    pub display: DisplayConfig,
    /// Directory for memory region snapshot files. Defaults to the system
    /// temporary directory.
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool_path: None,
            read_timeout_ms: 100,
            read_retry_limit: 1000,
            decompiler: Decompiler::default(),
            display: DisplayConfig::default(),
            snapshot_dir: None,
        }
    }
}

impl Config {
    /// Default configuration file location (`~/.config/r2bridge/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        home::home_dir().map(|home| home.join(".config").join("r2bridge").join("config.toml"))
    }

    /// Load configuration from `path`, or from the default location when
    /// `path` is `None`. A missing file yields the default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Config::default()),
            },
        };

        if !path.exists() {
            return Ok(Config::default());
        }

        let data = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        toml::de::from_str(&data).map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
