use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Kind of line images the recognizer is fed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Binarized line images (`.bin.png`)
    Binary,
    /// Normalized grayscale line images (`.nrm.png`)
    Gray,
}

impl FromStr for ImageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" | "bin" => Ok(ImageType::Binary),
            "gray" | "grey" | "nrm" => Ok(ImageType::Gray),
            other => Err(format!("unknown image type '{}' (expected binary or gray)", other)),
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::Binary => write!(f, "binary"),
            ImageType::Gray => write!(f, "gray"),
        }
    }
}

/// Configuration for a recognition project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Directory containing one subdirectory per page
    pub page_dir: PathBuf,
    /// Which line images are handed to the recognizer
    pub image_type: ImageType,
    /// Suffix of binarized line images
    pub binary_image_ext: String,
    /// Suffix of grayscale line images
    pub gray_image_ext: String,
    /// Suffix of the text file the recognizer writes next to each line image
    pub recognition_ext: String,
    /// Recognizer executable, resolved through PATH when not absolute
    pub recognizer_bin: PathBuf,
    /// Capture recognizer stdout/stderr
    pub capture_output: bool,
    /// Interval in milliseconds between progress polls in the CLI
    pub poll_interval_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl RecognitionConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            page_dir: PathBuf::from("Pages"),
            image_type: ImageType::Binary,
            binary_image_ext: ".bin.png".to_string(),
            gray_image_ext: ".nrm.png".to_string(),
            recognition_ext: ".txt".to_string(),
            recognizer_bin: PathBuf::from("ocropus-rpred"),
            capture_output: true,
            poll_interval_ms: 1000,
        }
    }

    /// Image suffix for the configured image type
    pub fn image_ext(&self) -> &str {
        match self.image_type {
            ImageType::Binary => &self.binary_image_ext,
            ImageType::Gray => &self.gray_image_ext,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_image_ext_follows_type() {
        let mut cfg = RecognitionConfig::default_config();
        assert_eq!(cfg.image_ext(), ".bin.png");

        cfg.image_type = ImageType::Gray;
        assert_eq!(cfg.image_ext(), ".nrm.png");
    }

    #[test]
    fn test_image_type_parsing() {
        assert_eq!("binary".parse::<ImageType>().unwrap(), ImageType::Binary);
        assert_eq!("Gray".parse::<ImageType>().unwrap(), ImageType::Gray);
        assert_eq!("nrm".parse::<ImageType>().unwrap(), ImageType::Gray);
        assert!("color".parse::<ImageType>().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = RecognitionConfig::load_config(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(cfg.recognition_ext, ".txt");
        assert_eq!(cfg.recognizer_bin, PathBuf::from("ocropus-rpred"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.toml");
        std::fs::write(&path, "page_dir = \"/data/book/Pages\"\nimage_type = \"gray\"\n").unwrap();

        let cfg = RecognitionConfig::load_config(Some(path.as_path())).unwrap();
        assert_eq!(cfg.page_dir, PathBuf::from("/data/book/Pages"));
        assert_eq!(cfg.image_type, ImageType::Gray);
        assert_eq!(cfg.image_ext(), ".nrm.png");
        assert_eq!(cfg.poll_interval_ms, 1000);
    }

    #[test]
    fn test_json_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(&path, r#"{"recognizer_bin": "/opt/ocropy/ocropus-rpred", "capture_output": false}"#).unwrap();

        let cfg = RecognitionConfig::load_config(Some(path.as_path())).unwrap();
        assert_eq!(cfg.recognizer_bin, PathBuf::from("/opt/ocropy/ocropus-rpred"));
        assert!(!cfg.capture_output);
        assert_eq!(cfg.image_type, ImageType::Binary);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "page_dir = [").unwrap();

        let err = RecognitionConfig::load_config(Some(path.as_path())).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse TOML config"));
    }
}
