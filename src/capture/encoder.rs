use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};

use crate::config::SamplerConfig;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedFrame {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The form the inference service expects in `stream_frame.frame`.
    pub fn to_data_url(&self) -> String {
        let mut url = String::with_capacity(DATA_URL_PREFIX.len() + self.bytes.len() * 4 / 3 + 4);
        url.push_str(DATA_URL_PREFIX);
        STANDARD.encode_string(&self.bytes, &mut url);
        url
    }
}

/// Scales the frame to the configured size and compresses it to JPEG.
/// CPU bound; run it on the blocking pool.
pub fn encode_frame(frame: &DynamicImage, config: &SamplerConfig) -> Result<EncodedFrame> {
    let (width, height) = (config.target_width, config.target_height);
    let scaled = if frame.width() == width && frame.height() == height {
        frame.to_rgb8()
    } else {
        frame.resize_exact(width, height, FilterType::Triangle).to_rgb8()
    };

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, config.quality.clamp(1, 100))
        .encode_image(&scaled)
        .context("jpeg encoding failed")?;

    Ok(EncodedFrame {
        bytes,
        width,
        height,
    })
}
