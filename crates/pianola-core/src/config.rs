//! Configuration file support for pianola
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/pianola/config.toml`
//! - macOS: `~/Library/Application Support/pianola/config.toml`
//! - Windows: `%APPDATA%\pianola\config.toml`

use crate::engine::EngineOptions;
use crate::error::{Error, Result};
use crate::highlight::{DEFAULT_CLICK_HIGHLIGHT_MS, DEFAULT_GROUP_COUNT, DEFAULT_MELODY_GRACE_MS};
use crate::voice::SynthSettings;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine configuration
    pub engine: EngineSettings,
    /// Default synth configuration
    pub synth: SynthSettings,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "pianola") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::write_default_config(&path)?;
        Ok(path)
    }

    /// Write the commented default config to `path`
    pub fn write_default_config(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = r#"# pianola configuration file

[engine]
# Initial tempo in beats per minute (1-999)
bpm = 120.0

# Number of highlight groups available to melodies
group_count = 2

# How long a clicked key stays lit, in milliseconds
click_highlight_ms = 180

# Extra time melody highlights stay lit after the note ends, in milliseconds
melody_highlight_grace_ms = 80

[synth]
# Synth volume in dB
volume_db = -8.0

# Oscillator: "sine", "triangle", "square" or "sawtooth"
oscillator = "sine"

# Voices sounding at once before the oldest is stolen
max_polyphony = 32

[synth.envelope]
attack = 0.002
decay = 0.5
sustain = 0.15
release = 1.5

[synth.filter]
# Lowpass cutoff in Hz
frequency = 5000.0
q = 1.0

[synth.compressor]
threshold_db = -20.0
ratio = 3.0
attack = 0.003
release = 0.25

[synth.reverb]
decay = 1.5
wet = 0.2
"#;

        fs::write(path, content)?;
        Ok(())
    }

    /// Convert to engine construction options
    pub fn to_engine_options(&self) -> EngineOptions {
        EngineOptions {
            bpm: self.engine.bpm,
            create_synth: Some(self.synth.clone().factory()),
            group_count: self.engine.group_count,
            click_highlight_ms: self.engine.click_highlight_ms,
            melody_highlight_grace_ms: self.engine.melody_highlight_grace_ms,
            ..EngineOptions::default()
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Initial tempo
    pub bpm: f64,
    /// Number of highlight groups
    pub group_count: usize,
    /// Click highlight duration in milliseconds
    pub click_highlight_ms: u64,
    /// Melody highlight grace in milliseconds
    pub melody_highlight_grace_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            group_count: DEFAULT_GROUP_COUNT,
            click_highlight_ms: DEFAULT_CLICK_HIGHLIGHT_MS,
            melody_highlight_grace_ms: DEFAULT_MELODY_GRACE_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::Oscillator;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.bpm, 120.0);
        assert_eq!(config.engine.group_count, 2);
        assert_eq!(config.engine.click_highlight_ms, 180);
        assert_eq!(config.synth.volume_db, -8.0);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[engine]
bpm = 90

[synth]
oscillator = "triangle"

[synth.envelope]
release = 0.8
"#,
        )
        .unwrap();
        assert_eq!(parsed.engine.bpm, 90.0);
        assert_eq!(parsed.engine.melody_highlight_grace_ms, 80);
        assert_eq!(parsed.synth.oscillator, Oscillator::Triangle);
        assert_eq!(parsed.synth.envelope.release, 0.8);
        assert_eq!(parsed.synth.envelope.attack, 0.002);
    }

    #[test]
    fn test_default_file_matches_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::write_default_config(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.engine.bpm = 200.0;
        config.synth.max_polyphony = 8;
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nbpm = \"fast\"\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::TomlParse(_))));
    }

    #[test]
    fn test_to_engine_options() {
        let mut config = Config::default();
        config.engine.bpm = 140.0;
        config.engine.group_count = 3;
        let options = config.to_engine_options();
        assert_eq!(options.bpm, 140.0);
        assert_eq!(options.group_count, 3);
        assert!(options.create_synth.is_some());
    }
}
