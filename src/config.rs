//! Configuration system for xframe
//!
//! Loads configuration from TOML file at `~/.config/xframe/config.toml`
//! Auto-generates default config file on first run if missing.
//!
//! The `[display]` table doubles as the per-connection overrides passed to
//! [`DisplayConnection::connect`](crate::display::DisplayConnection::connect).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub cursors: CursorConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config = Self::parse(&content)?;
        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("xframe");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string =
            toml::to_string_pretty(&Self::default()).context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Toolkit that owns the outer windows of each frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolkitKind {
    /// Frames are bare windows
    #[default]
    None,
    Xt,
    Gtk,
}

/// Per-connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Display to open; `$DISPLAY` when unset
    pub name: Option<String>,
    /// Preferred visual class, e.g. "TrueColor" or "PseudoColor"
    pub visual_class: Option<String>,
    /// Preferred visual depth
    pub visual_depth: Option<u8>,
    pub toolkit: ToolkitKind,
    /// Give new frames an offscreen back buffer
    pub double_buffered: bool,
    /// Attach input contexts to frames
    pub use_input_method: bool,
    /// Round trip after every flush, so errors surface at the request that
    /// caused them
    pub synchronous: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            name: None,
            visual_class: None,
            visual_depth: None,
            toolkit: ToolkitKind::None,
            double_buffered: true,
            use_input_method: true,
            synchronous: false,
        }
    }
}

/// Cursor font glyph overrides for the frame pointer kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    pub text: Option<u16>,
    pub nontext: Option<u16>,
    pub modeline: Option<u16>,
    pub hand: Option<u16>,
    pub hourglass: Option<u16>,
    pub horizontal_drag: Option<u16>,
    pub vertical_drag: Option<u16>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "xframe=debug,info".to_string(),
        }
    }
}
