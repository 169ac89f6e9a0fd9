//! Configuration management for flowr

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::picker::{DescribeLimits, SandboxSettings};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub picker: PickerConfig,
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeminiConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-exp".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PickerConfig {
    /// Characters of visible text kept in an element description
    pub max_visible_text: usize,
    /// Characters of outer markup kept in an element description
    pub max_outer_markup: usize,
    /// Outline applied to the hovered element while armed
    pub highlight_outline: String,
    /// Keep picking across a document swap instead of ending the session
    pub rearm_on_swap: bool,
}

impl Default for PickerConfig {
    fn default() -> Self {
        let limits = DescribeLimits::default();
        Self {
            max_visible_text: limits.max_visible_text,
            max_outer_markup: limits.max_outer_markup,
            highlight_outline: crate::picker::DEFAULT_HIGHLIGHT_OUTLINE.to_string(),
            rearm_on_swap: true,
        }
    }
}

impl PickerConfig {
    pub fn sandbox_settings(&self) -> SandboxSettings {
        SandboxSettings {
            limits: DescribeLimits {
                max_visible_text: self.max_visible_text,
                max_outer_markup: self.max_outer_markup,
            },
            highlight_outline: self.highlight_outline.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreviewConfig {
    /// Where the rendered document is written
    pub path: PathBuf,
    pub enabled: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("flowr-preview.html"),
            enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`, falling back to defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "flowr") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
