//! Data-URL image decoding.
//!
//! Accepts `"<header>,<base64-payload>"` strings as produced by browser
//! `FileReader.readAsDataURL` and webcam screenshots.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed data URL: {0}")]
    MalformedInput(&'static str),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid image data: {0}")]
    Image(#[from] image::ImageError),
}

impl DecodeError {
    /// True when the caller sent something that is not a data URL at all,
    /// as opposed to a data URL whose content fails to decode.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, DecodeError::MalformedInput(_))
    }
}

/// Split a data URL on its first comma and return the payload.
pub fn split_data_url(data_url: &str) -> Result<&str, DecodeError> {
    let (_header, payload) = data_url
        .split_once(',')
        .ok_or(DecodeError::MalformedInput("missing ',' separator"))?;
    if payload.trim().is_empty() {
        return Err(DecodeError::MalformedInput("empty payload"));
    }
    Ok(payload)
}

/// Decode a base64 payload into raw bytes, ignoring embedded whitespace.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// Decode a full data URL into an 8-bit RGB raster.
pub fn decode_data_url(data_url: &str) -> Result<RgbImage, DecodeError> {
    let payload = split_data_url(data_url)?;
    let bytes = decode_base64(payload)?;
    let image = image::load_from_memory(&bytes)?;
    tracing::debug!(
        bytes = bytes.len(),
        width = image.width(),
        height = image.height(),
        "decoded image"
    );
    Ok(image.to_rgb8())
}

/// Encode raw image bytes as a `data:<mime>;base64,` URL.
pub fn encode_data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}
