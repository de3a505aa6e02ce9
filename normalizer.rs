use crate::config::{AppConfig, TensorLayout};
use crate::error::{Error, Result};
use image::imageops::FilterType;
use ndarray::Array4;
use std::path::Path;

/// Raw request payload: the file part's name and its bytes.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: Some(filename.into()),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Self { filename, bytes })
    }

    /// Lowercased extension of the filename, if it has one.
    pub fn extension(&self) -> Option<String> {
        let name = self.filename.as_deref()?;
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeConfig {
    pub allowed_extensions: Vec<String>,
    pub max_bytes: usize,
    pub width: u32,
    pub height: u32,
    pub layout: TensorLayout,
}

impl NormalizeConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        let (width, height) = config.model.image_size;
        Self {
            allowed_extensions: config.uploads.allowed_extensions.clone(),
            max_bytes: config.uploads.max_bytes,
            width,
            height,
            layout: config.model.layout,
        }
    }

    fn allows(&self, ext: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }
}

/// Checks the upload envelope without decoding. Returns the extension.
pub fn validate(upload: &Upload, config: &NormalizeConfig) -> Result<String> {
    let has_name = upload
        .filename
        .as_deref()
        .is_some_and(|name| !name.trim().is_empty());
    if !has_name || upload.bytes.is_empty() {
        return Err(Error::EmptyUpload);
    }
    if upload.bytes.len() > config.max_bytes {
        return Err(Error::UploadTooLarge {
            size: upload.bytes.len(),
            limit: config.max_bytes,
        });
    }
    match upload.extension() {
        Some(ext) if config.allows(&ext) => Ok(ext),
        Some(ext) => Err(Error::UnsupportedFormat(format!(
            "extension .{ext} is not allowed"
        ))),
        None => Err(Error::UnsupportedFormat("file has no extension".into())),
    }
}

/// Decodes, forces RGB, resizes and scales to `[0, 1]` with a batch axis of 1.
pub fn normalize(upload: &Upload, config: &NormalizeConfig) -> Result<Array4<f32>> {
    validate(upload, config)?;
    let img = image::load_from_memory(&upload.bytes)
        .map_err(|e| Error::UnsupportedFormat(format!("could not decode image: {e}")))?;
    let (w, h) = (config.width, config.height);
    let resized = img.resize_exact(w, h, FilterType::Triangle).to_rgb8();

    let (hu, wu) = (h as usize, w as usize);
    let tensor = match config.layout {
        TensorLayout::Nhwc => Array4::from_shape_vec((1, hu, wu, 3), rgb8_to_nhwc(&resized)),
        TensorLayout::Nchw => Array4::from_shape_vec((1, 3, hu, wu), rgb8_to_nchw(&resized, w, h)),
    }
    .map_err(|e| Error::UnsupportedFormat(format!("invalid tensor shape: {e}")))?;
    Ok(tensor)
}

fn rgb8_to_nhwc(img: &image::RgbImage) -> Vec<f32> {
    img.pixels()
        .flat_map(|pixel| pixel.0)
        .map(|channel| f32::from(channel) / 255.0)
        .collect()
}

fn rgb8_to_nchw(img: &image::RgbImage, w: u32, h: u32) -> Vec<f32> {
    let plane = (w * h) as usize;
    let mut input = vec![0.0; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = (y * w + x) as usize;
        for (c, channel) in pixel.0.iter().enumerate() {
            input[idx + plane * c] = f32::from(*channel) / 255.0;
        }
    }
    input
}
