use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hg_contracts::session::{approx_payload_bytes, ImagePayload};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};

use crate::error::NormalizeError;

/// Payload size that triggers re-encoding.
pub const SOFT_BUDGET_BYTES: usize = 4 * 1024 * 1024;
/// Largest payload the vision provider accepts.
pub const HARD_LIMIT_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_DIMENSION: u32 = 2048;
pub const INITIAL_QUALITY: u8 = 90;
pub const QUALITY_STEP: u8 = 10;
pub const MIN_QUALITY: u8 = 30;

const PASSTHROUGH_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeLimits {
    pub soft_budget: usize,
    pub hard_limit: usize,
    pub max_dimension: u32,
}

impl Default for NormalizeLimits {
    fn default() -> Self {
        Self {
            soft_budget: SOFT_BUDGET_BYTES,
            hard_limit: HARD_LIMIT_BYTES,
            max_dimension: MAX_DIMENSION,
        }
    }
}

/// Result of fitting an image into the provider's budget.
///
/// `was_resized` is true whenever the payload differs from the input, either
/// through scaling or through re-encoding alone. `quality` is the JPEG quality
/// used, or `None` for pass-through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub payload: ImagePayload,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub quality: Option<u8>,
    pub was_resized: bool,
}

impl NormalizedImage {
    pub fn approx_bytes(&self) -> usize {
        self.payload.approx_bytes()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageNormalizer {
    limits: NormalizeLimits,
}

impl ImageNormalizer {
    pub fn new(limits: NormalizeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> NormalizeLimits {
        self.limits
    }

    pub fn normalize_path(&self, path: &Path) -> Result<NormalizedImage, NormalizeError> {
        let bytes = fs::read(path)
            .map_err(|err| NormalizeError::Load(format!("{}: {err}", path.display())))?;
        self.normalize_bytes(&bytes)
    }

    pub fn normalize_data_url(&self, raw: &str) -> Result<NormalizedImage, NormalizeError> {
        let payload =
            ImagePayload::from_data_url(raw).map_err(|err| NormalizeError::Load(err.to_string()))?;
        let bytes = BASE64
            .decode(payload.data.as_bytes())
            .map_err(|err| NormalizeError::Load(format!("invalid base64 payload: {err}")))?;
        self.normalize_bytes(&bytes)
    }

    pub fn normalize_bytes(&self, bytes: &[u8]) -> Result<NormalizedImage, NormalizeError> {
        let format =
            image::guess_format(bytes).map_err(|err| NormalizeError::Load(err.to_string()))?;
        let decoded = image::load_from_memory_with_format(bytes, format)
            .map_err(|err| NormalizeError::Load(err.to_string()))?;
        let (original_width, original_height) = decoded.dimensions();

        let original = ImagePayload::new(format.to_mime_type(), BASE64.encode(bytes));
        let within_dimensions = original_width <= self.limits.max_dimension
            && original_height <= self.limits.max_dimension;
        if PASSTHROUGH_FORMATS.contains(&format)
            && within_dimensions
            && original.approx_bytes() <= self.limits.soft_budget
        {
            return Ok(NormalizedImage {
                payload: original,
                width: original_width,
                height: original_height,
                quality: None,
                was_resized: false,
                original_width,
                original_height,
            });
        }

        let (width, height) =
            fit_within(original_width, original_height, self.limits.max_dimension);
        let mut canvas = flatten_onto_white(&decoded);
        if (width, height) != (original_width, original_height) {
            canvas = DynamicImage::ImageRgb8(canvas)
                .resize_exact(width, height, FilterType::Triangle)
                .to_rgb8();
        }
        let canvas = DynamicImage::ImageRgb8(canvas);

        let mut quality = INITIAL_QUALITY;
        let payload = loop {
            let encoded = encode_jpeg(&canvas, quality)?;
            let payload = ImagePayload::new("image/jpeg", BASE64.encode(encoded));
            if payload.approx_bytes() <= self.limits.soft_budget || quality <= MIN_QUALITY {
                break payload;
            }
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
        };

        let bytes = approx_payload_bytes(payload.data_url_len());
        if bytes > self.limits.hard_limit {
            return Err(NormalizeError::TooLarge {
                bytes,
                limit: self.limits.hard_limit,
            });
        }

        Ok(NormalizedImage {
            payload,
            width,
            height,
            original_width,
            original_height,
            quality: Some(quality),
            was_resized: true,
        })
    }
}

/// Largest size with the same aspect ratio whose sides fit `max_side`.
/// Never upscales.
fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    if width <= max_side && height <= max_side {
        return (width, height);
    }
    let scale = |short: u32, long: u32| -> u32 {
        let scaled = (u64::from(short) * u64::from(max_side) + u64::from(long) / 2) / u64::from(long);
        scaled.clamp(1, u64::from(max_side)) as u32
    };
    if width >= height {
        (max_side, scale(height, width))
    } else {
        (scale(width, height), max_side)
    }
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, NormalizeError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .map_err(|err| NormalizeError::EnvironmentCapability(err.to_string()))?;
    Ok(bytes)
}
