use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub faces: FacesConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Upper bound on request bodies, which are dominated by image uploads.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for original image blobs.
    #[serde(default = "default_blob_root")]
    pub root: PathBuf,
}

fn default_blob_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pholio")
        .join("blobs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_blob_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacesConfig {
    /// Directory where ONNX models are cached after download.
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    #[serde(default = "default_detector_url")]
    pub detector_model_url: String,

    #[serde(default = "default_recognizer_url")]
    pub recognizer_model_url: String,

    /// Length of the descriptor vector the recognition model emits.
    /// Must match the configured model; changing one without the other
    /// makes stored descriptors incomparable.
    #[serde(default = "default_descriptor_len")]
    pub descriptor_len: usize,

    /// Maximum Euclidean distance for two descriptors to count as the
    /// same person. Paired with the recognition model above.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    /// Longest edge of stored face thumbnails, in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("pholio")
        .join("models")
}

fn default_detector_url() -> String {
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx".to_string()
}

fn default_recognizer_url() -> String {
    "https://github.com/opencv/opencv_zoo/raw/main/models/face_recognition_sface/face_recognition_sface_2021dec.onnx".to_string()
}

fn default_descriptor_len() -> usize {
    128
}

fn default_match_threshold() -> f64 {
    0.6
}

fn default_thumbnail_size() -> u32 {
    160
}

impl Default for FacesConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            detector_model_url: default_detector_url(),
            recognizer_model_url: default_recognizer_url(),
            descriptor_len: default_descriptor_len(),
            match_threshold: default_match_threshold(),
            thumbnail_size: default_thumbnail_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in minutes.
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,
}

fn default_session_ttl_minutes() -> i64 {
    60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_minutes: default_session_ttl_minutes(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pholio")
        .join("pholio.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            faces: FacesConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pholio")
            .join("config.toml")
    }
}
