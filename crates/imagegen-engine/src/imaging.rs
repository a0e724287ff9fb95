use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{ColorType, ImageFormat};
use imagegen_contracts::GenerationResult;
use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::providers::truncate_text;

pub const DEFAULT_ALLOWED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed downloading image ({url}): {message}")]
    Download { url: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("not a base64 data URL")]
    NotDataUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub format: String,
    pub color_type: String,
    pub width: u32,
    pub height: u32,
    pub has_transparency: bool,
}

/// Fetches `url`, optionally writing the bytes to `save_path` as well.
pub fn download_image(url: &str, save_path: Option<&Path>) -> Result<Vec<u8>, ImageError> {
    let download_error = |message: String| ImageError::Download {
        url: url.to_string(),
        message,
    };
    let http = HttpClient::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|err| download_error(err.to_string()))?;
    let response = http
        .get(url)
        .send()
        .map_err(|err| download_error(err.to_string()))?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        return Err(download_error(format!(
            "status {code}: {}",
            truncate_text(&body, 512)
        )));
    }
    let bytes = response
        .bytes()
        .map_err(|err| download_error(err.to_string()))?
        .to_vec();

    if let Some(path) = save_path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes)?;
    }
    Ok(bytes)
}

/// Writes `data` to `directory/filename`, creating the directory.
pub fn save_image(data: &[u8], filename: &str, directory: &Path) -> Result<PathBuf, ImageError> {
    fs::create_dir_all(directory)?;
    let path = directory.join(filename);
    fs::write(&path, data)?;
    Ok(path)
}

/// Sniffs the format from the leading bytes; `None` allows the default set.
pub fn validate_image_format(data: &[u8], allowed: Option<&[ImageFormat]>) -> bool {
    let allowed = allowed.unwrap_or(DEFAULT_ALLOWED_FORMATS);
    match image::guess_format(data) {
        Ok(format) => allowed.contains(&format),
        Err(err) => {
            tracing::debug!("unrecognized image data: {err}");
            false
        }
    }
}

/// Shrinks to fit inside `max_width` x `max_height`, keeping the aspect
/// ratio. Smaller images are left at their size. Output is always PNG.
pub fn resize_image(data: &[u8], max_width: u32, max_height: u32) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory(data)?;
    let img = if img.width() > max_width || img.height() > max_height {
        img.resize(max_width, max_height, FilterType::Lanczos3)
    } else {
        img
    };
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub fn get_image_info(data: &[u8]) -> Result<ImageInfo, ImageError> {
    let format = image::guess_format(data)?;
    let img = image::load_from_memory_with_format(data, format)?;
    let color = img.color();
    Ok(ImageInfo {
        format: format_label(format),
        color_type: color_label(color),
        width: img.width(),
        height: img.height(),
        has_transparency: color.has_alpha(),
    })
}

pub fn convert_to_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn convert_to_bytes(encoded: &str) -> Result<Vec<u8>, ImageError> {
    Ok(BASE64.decode(encoded.trim().as_bytes())?)
}

/// SHA-256 of the bytes, lowercase hex.
pub fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Bytes behind a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, ImageError> {
    let rest = url.strip_prefix("data:").ok_or(ImageError::NotDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(ImageError::NotDataUrl)?;
    if !header.ends_with(";base64") {
        return Err(ImageError::NotDataUrl);
    }
    convert_to_bytes(payload)
}

/// Writes every image of `result` to `directory` as `{stem}-{index}.png`.
/// Inline images are decoded, remote ones downloaded.
pub fn save_result_images(
    result: &GenerationResult,
    directory: &Path,
    stem: &str,
) -> Result<Vec<PathBuf>, ImageError> {
    let mut saved = Vec::new();
    for (idx, image) in result.images.iter().enumerate() {
        let Some(url) = image.url.as_deref() else {
            continue;
        };
        let bytes = if url.starts_with("data:") {
            decode_data_url(url)?
        } else {
            download_image(url, None)?
        };
        let path = save_image(&bytes, &format!("{stem}-{:02}.png", idx + 1), directory)?;
        tracing::debug!(path = %path.display(), hash = %calculate_hash(&bytes), "saved image");
        saved.push(path);
    }
    Ok(saved)
}

fn format_label(format: ImageFormat) -> String {
    match format {
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Gif => "GIF".to_string(),
        ImageFormat::WebP => "WEBP".to_string(),
        other => format!("{other:?}").to_uppercase(),
    }
}

fn color_label(color: ColorType) -> String {
    match color {
        ColorType::L8 | ColorType::L16 => "L".to_string(),
        ColorType::La8 | ColorType::La16 => "LA".to_string(),
        ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => "RGB".to_string(),
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => "RGBA".to_string(),
        other => format!("{other:?}"),
    }
}
