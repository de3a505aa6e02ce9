use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, height, width, 3]`, what Keras-trained models expect.
    Nhwc,
    /// `[1, 3, height, width]`
    Nchw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_labels_path")]
    pub labels_path: PathBuf,
    #[serde(default = "default_image_size")]
    pub image_size: (u32, u32),
    #[serde(default = "default_layout")]
    pub layout: TensorLayout,
    #[serde(default)]
    pub apply_softmax: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            labels_path: default_labels_path(),
            image_size: default_image_size(),
            layout: default_layout(),
            apply_softmax: false,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
            max_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: u32,
    #[serde(default = "default_history_max_limit")]
    pub max_limit: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_limit: default_history_max_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model: ModelConfig::default(),
            uploads: UploadConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_model_path() -> PathBuf {
    PathBuf::from("plant_disease.onnx")
}

fn default_labels_path() -> PathBuf {
    PathBuf::from("metadata")
}

fn default_image_size() -> (u32, u32) {
    (224, 224)
}

fn default_layout() -> TensorLayout {
    TensorLayout::Nhwc
}

fn default_true() -> bool {
    true
}

fn default_allowed_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_history_limit() -> u32 {
    20
}

fn default_history_max_limit() -> u32 {
    100
}

impl AppConfig {
    /// Reads the JSON config when given, then applies `PLANT_DOCTOR_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {e}", path.display()))
                })?;
                serde_json::from_str(&raw)?
            }
            None => AppConfig::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("PLANT_DOCTOR_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(model) = lookup("PLANT_DOCTOR_MODEL_PATH") {
            self.model.model_path = PathBuf::from(model);
        }
        if let Some(labels) = lookup("PLANT_DOCTOR_LABELS_PATH") {
            self.model.labels_path = PathBuf::from(labels);
        }
        match lookup("PLANT_DOCTOR_ENABLE_ONNX")
            .as_deref()
            .map(|v| v.to_ascii_lowercase())
        {
            Some(v) if v == "0" || v == "false" => self.model.enabled = false,
            Some(v) if v == "1" || v == "true" => self.model.enabled = true,
            _ => {}
        }
    }

    fn validate(&self) -> Result<()> {
        let (w, h) = self.model.image_size;
        if w == 0 || h == 0 {
            return Err(Error::Config("model.image_size must be non-zero".into()));
        }
        if self.history.max_limit == 0 {
            return Err(Error::Config("history.max_limit must be non-zero".into()));
        }
        if self.uploads.allowed_extensions.is_empty() {
            return Err(Error::Config(
                "uploads.allowed_extensions must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPaths {
    pub db_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl AppPaths {
    pub fn discover(config: &AppConfig) -> Result<Self> {
        let root = config.data_dir.clone();
        let db_path = root.join("library.db");
        let uploads_dir = root.join("uploads");
        let models_dir = root.join("models");

        std::fs::create_dir_all(&uploads_dir)?;
        std::fs::create_dir_all(&models_dir)?;

        Ok(Self {
            db_path,
            uploads_dir,
            models_dir,
        })
    }

    pub fn resolve_model(&self, name: &Path) -> PathBuf {
        if name.is_absolute() {
            name.to_path_buf()
        } else {
            self.models_dir.join(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_upload_constraints() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.model.image_size, (224, 224));
        assert_eq!(config.uploads.max_bytes, 16 * 1024 * 1024);
        assert!(config.uploads.allowed_extensions.contains(&"webp".to_string()));
        assert_eq!(config.history.default_limit, 20);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"model": {"layout": "nchw", "image_size": [256, 256]}}"#)
                .unwrap();
        assert_eq!(config.model.layout, TensorLayout::Nchw);
        assert_eq!(config.model.image_size, (256, 256));
        assert_eq!(config.model.labels_path, PathBuf::from("metadata"));
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.history.max_limit, 100);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("PLANT_DOCTOR_DATA_DIR", "/srv/plants"),
            ("PLANT_DOCTOR_ENABLE_ONNX", "false"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.data_dir, PathBuf::from("/srv/plants"));
        assert!(!config.model.enabled);
    }

    #[test]
    fn zero_image_size_is_rejected() {
        let mut config = AppConfig::default();
        config.model.image_size = (0, 224);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn relative_model_resolves_under_models_dir() {
        let mut config = AppConfig::default();
        config.data_dir = std::env::temp_dir().join(format!("pd_paths_{}", uuid::Uuid::new_v4()));
        let paths = AppPaths::discover(&config).unwrap();
        assert!(paths.uploads_dir.is_dir());
        assert_eq!(
            paths.resolve_model(Path::new("m.onnx")),
            paths.models_dir.join("m.onnx")
        );
    }
}
