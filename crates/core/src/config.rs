use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "SUPERIMAGE_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub model: String,
    pub output_dir: PathBuf,
    pub upscale: UpscaleConfig,
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpscaleConfig {
    pub tile: u32,
    pub tile_pad: u32,
    pub pre_pad: u32,
    pub outscale: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: "RealESRGAN_x4plus".to_string(),
            output_dir: PathBuf::from("output"),
            upscale: UpscaleConfig::default(),
            device: "cuda".to_string(),
        }
    }
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            tile: 400,
            tile_pad: 10,
            pre_pad: 0,
            outscale: 4.0,
        }
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.upscale.outscale.is_finite() {
            bail!("outscale must be a finite number");
        }
        if self.upscale.outscale < 1.0 {
            bail!("outscale must be >= 1.0, got {}", self.upscale.outscale);
        }
        match self.device.to_ascii_lowercase().as_str() {
            "cpu" | "cuda" => {}
            other => bail!("unknown device '{other}' (expected cpu or cuda)"),
        }
        Ok(())
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. SUPERIMAGE_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

/// Returns the path to config.toml within the given data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Model weight cache directory inside the data directory.
pub fn models_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("models")
}

/// Initialize the data directory structure on first run:
/// - Creates data_dir if missing
/// - Writes default config.toml only if file doesn't exist
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    // Create data directory
    if !data_dir.exists() {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    }

    // Write default config if doesn't exist
    let cfg_path = config_path(data_dir);
    if !cfg_path.exists() {
        let default_cfg = AppConfig::default();
        default_cfg.save_to_path(&cfg_path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.model, "RealESRGAN_x4plus");
        assert_eq!(cfg.output_dir, PathBuf::from("output"));
        assert_eq!(cfg.device, "cuda");

        assert_eq!(cfg.upscale.tile, 400);
        assert_eq!(cfg.upscale.tile_pad, 10);
        assert_eq!(cfg.upscale.pre_pad, 0);
        assert_eq!(cfg.upscale.outscale, 4.0);

        cfg.validate().expect("defaults must validate");
    }

    #[test]
    fn toml_roundtrip_preserves_values() {
        let original = AppConfig {
            model: "RealESRGAN_x4plus_anime_6B".to_string(),
            output_dir: PathBuf::from("/tmp/out"),
            upscale: UpscaleConfig {
                tile: 0,
                tile_pad: 4,
                pre_pad: 2,
                outscale: 2.0,
            },
            device: "cpu".to_string(),
        };
        let encoded = toml::to_string_pretty(&original).expect("serialize config");
        let decoded: AppConfig = toml::from_str(&encoded).expect("deserialize config");
        assert_eq!(decoded, original);
    }

    #[test]
    fn load_from_nonexistent_file_returns_defaults() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let loaded = AppConfig::load_from_path(&temp.path().join("nope.toml"))
            .expect("load config from nonexistent path");
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn partial_config_fills_missing_fields_with_defaults() {
        let cfg: AppConfig = toml::from_str("[upscale]\ntile = 128\n").expect("parse partial");
        assert_eq!(cfg.upscale.tile, 128);
        assert_eq!(cfg.upscale.outscale, 4.0);
        assert_eq!(cfg.model, "RealESRGAN_x4plus");
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut cfg = AppConfig::default();
        cfg.upscale.outscale = 0.5;
        assert!(cfg.validate().is_err());

        cfg.upscale.outscale = f32::NAN;
        assert!(cfg.validate().is_err());

        cfg.upscale.outscale = 2.0;
        cfg.device = "tpu".to_string();
        assert!(cfg.validate().is_err());

        cfg.device = "CPU".to_string();
        cfg.validate().expect("case-insensitive device name");
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli_path = Path::new("/custom");
        let result = data_dir(Some(cli_path));
        assert_eq!(result, PathBuf::from("/custom"));
    }

    #[test]
    fn config_path_is_data_dir_join_config_toml() {
        let result = config_path(Path::new("/data"));
        assert_eq!(result, PathBuf::from("/data/config.toml"));
    }

    #[test]
    fn models_dir_is_under_data_dir() {
        let result = models_dir(Path::new("/data"));
        assert_eq!(result, PathBuf::from("/data/models"));
    }

    #[test]
    fn initialize_creates_data_dir_and_config() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let data = temp.path().join("data");
        initialize_data_dir(&data).expect("initialize data dir");

        assert!(data.exists());
        assert!(data.join("config.toml").exists());
    }

    #[test]
    fn initialize_preserves_existing_config() {
        let temp = tempfile::tempdir().expect("create temp dir");

        let cfg_path = temp.path().join("config.toml");
        let custom_content = "[upscale]\ntile = 9999\n";
        fs::write(&cfg_path, custom_content).expect("write custom config");

        initialize_data_dir(temp.path()).expect("initialize data dir");

        let content = fs::read_to_string(&cfg_path).expect("read config");
        assert_eq!(content, custom_content);
    }
}
