use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::error::WizardError;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_PREPARED_BYTES: usize = 4 * 1024 * 1024;
pub const MAX_EDGE_PX: u32 = 1024;

const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];
const JPEG_QUALITY_STEPS: [u8; 5] = [85, 75, 65, 55, 45];

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

/// Content-sniffed type and size check for a raw upload. Returns the mime
/// type on success so callers can report what they accepted.
pub fn validate_upload(data: &[u8]) -> Result<String, WizardError> {
    let mime = detect_mime_type(data).ok_or_else(|| {
        WizardError::Validation("Unrecognized file. Please upload a JPEG, PNG or WebP photo.".into())
    })?;
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(WizardError::Validation(format!(
            "Unsupported file type {mime}. Please upload a JPEG, PNG or WebP photo."
        )));
    }
    if data.len() > MAX_UPLOAD_BYTES {
        return Err(WizardError::Validation(
            "Photo is larger than 10 MB. Please choose a smaller file.".into(),
        ));
    }
    Ok(mime)
}

/// Scales the photo down to at most 1024 px on its longest edge and
/// re-encodes it as JPEG, stepping the quality down until the result fits
/// in 4 MB.
pub fn prepare_image(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data).map_err(|err| anyhow!("Failed to decode photo: {err}"))?;
    let (w, h) = img.dimensions();
    let img = if w.max(h) > MAX_EDGE_PX {
        img.resize(MAX_EDGE_PX, MAX_EDGE_PX, FilterType::Lanczos3)
    } else {
        img
    };

    for quality in JPEG_QUALITY_STEPS {
        let encoded = encode_jpeg(&img, quality)?;
        debug!(
            "Prepared image: {}x{} -> {}x{}, quality={}, {} bytes",
            w,
            h,
            img.width(),
            img.height(),
            quality,
            encoded.len()
        );
        if encoded.len() <= MAX_PREPARED_BYTES {
            return Ok(encoded);
        }
    }

    Err(anyhow!("Could not compress photo under 4 MB"))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.to_rgb8().write_with_encoder(encoder)?;
    Ok(buf)
}

/// Stamps a translucent band along the bottom edge of the exported poster.
pub fn apply_watermark(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let mut rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let band = (height / 24).max(4);
    for y in height.saturating_sub(band)..height {
        for x in 0..width {
            let pixel = rgb.get_pixel_mut(x, y);
            for channel in pixel.0.iter_mut() {
                *channel = (*channel as u16 * 6 / 10 + 255 * 4 / 10) as u8;
            }
        }
    }
    encode_jpeg(&DynamicImage::ImageRgb8(rgb), 85)
}

pub fn to_data_url(mime: &str, data: &[u8]) -> String {
    format!("data:{mime};base64,{}", general_purpose::STANDARD.encode(data))
}

pub fn from_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Not a data URL"))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| anyhow!("Malformed data URL"))?;
    let bytes = general_purpose::STANDARD.decode(payload)?;
    Ok((mime.to_string(), bytes))
}
