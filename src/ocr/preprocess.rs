use anyhow::{Result, anyhow};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::{box_filter, gaussian_blur_f32, median_filter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::debug::DebugSnapshots;

/// Sigma OpenCV derives for a 3x3 gaussian kernel.
const BLUR_SIGMA: f32 = 0.8;
const DENOISE_PATCH_RADIUS: i64 = 1;
const DENOISE_SEARCH_RADIUS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurKind {
    #[default]
    None,
    Gaussian,
    Median,
}

impl BlurKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlurKind::None => "none",
            BlurKind::Gaussian => "gaussian",
            BlurKind::Median => "median",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ThresholdMethod {
    #[default]
    None,
    Otsu,
    AdaptiveGaussian {
        block_size: u32,
        c: i32,
    },
    AdaptiveMean {
        block_size: u32,
        c: i32,
    },
}

impl ThresholdMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdMethod::None => "none",
            ThresholdMethod::Otsu => "otsu",
            ThresholdMethod::AdaptiveGaussian { .. } => "adaptive_gaussian",
            ThresholdMethod::AdaptiveMean { .. } => "adaptive_mean",
        }
    }
}

fn default_contrast() -> f32 {
    1.0
}

/// One concrete combination of preprocessing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_contrast")]
    pub contrast: f32,
    /// Non-local means filter strength; `None` skips the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denoise: Option<f32>,
    #[serde(default)]
    pub invert: bool,
    #[serde(default)]
    pub blur: BlurKind,
    #[serde(default)]
    pub threshold: ThresholdMethod,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            contrast: 1.0,
            denoise: None,
            invert: false,
            blur: BlurKind::None,
            threshold: ThresholdMethod::None,
        }
    }
}

impl PreprocessConfig {
    /// Number of knobs set away from their default.
    pub fn processing_cost(&self) -> u32 {
        let mut cost = 0;
        if self.contrast != 1.0 {
            cost += 1;
        }
        if self.denoise.is_some() {
            cost += 1;
        }
        if self.invert {
            cost += 1;
        }
        if self.blur != BlurKind::None {
            cost += 1;
        }
        if self.threshold != ThresholdMethod::None {
            cost += 1;
        }
        cost
    }

    pub fn label(&self) -> String {
        let denoise = self
            .denoise
            .map(|h| h.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "contrast={} denoise={} invert={} blur={} threshold={}",
            self.contrast,
            denoise,
            self.invert,
            self.blur.as_str(),
            self.threshold.as_str()
        )
    }
}

/// Static per-language configuration, keyed by OCR language code.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessTable {
    default: PreprocessConfig,
    entries: BTreeMap<String, PreprocessConfig>,
}

impl Default for PreprocessTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PreprocessTable {
    pub fn new(default: PreprocessConfig) -> Self {
        Self {
            default,
            entries: BTreeMap::new(),
        }
    }

    /// Benchmarked table; unlisted languages read fine with grayscale only.
    pub fn builtin() -> Self {
        use BlurKind::{Gaussian, Median};

        let config = |contrast: f32,
                      denoise: Option<f32>,
                      invert: bool,
                      blur: BlurKind,
                      threshold: ThresholdMethod| PreprocessConfig {
            contrast,
            denoise,
            invert,
            blur,
            threshold,
        };

        let mut table = Self::new(PreprocessConfig::default());
        table.insert(
            "ara",
            config(
                1.2,
                Some(9.0),
                false,
                Median,
                ThresholdMethod::AdaptiveGaussian {
                    block_size: 15,
                    c: 4,
                },
            ),
        );
        table.insert(
            "ben",
            config(1.2, Some(1.0), false, Median, ThresholdMethod::None),
        );
        table.insert(
            "chi_sim",
            config(1.2, None, false, Median, ThresholdMethod::Otsu),
        );
        table.insert(
            "ell",
            config(1.0, Some(3.0), false, BlurKind::None, ThresholdMethod::None),
        );
        table.insert(
            "hin",
            config(1.4, None, false, Gaussian, ThresholdMethod::Otsu),
        );
        table.insert(
            "jpn",
            config(1.0, None, false, Gaussian, ThresholdMethod::None),
        );
        table.insert(
            "kor",
            config(1.4, None, true, Median, ThresholdMethod::None),
        );
        table.insert(
            "tha",
            config(1.0, None, false, Gaussian, ThresholdMethod::Otsu),
        );
        table
    }

    pub fn insert(&mut self, code: impl Into<String>, config: PreprocessConfig) {
        self.entries.insert(code.into(), config);
    }

    pub fn get(&self, code: &str) -> &PreprocessConfig {
        self.entries.get(code).unwrap_or(&self.default)
    }

    pub fn default_config(&self) -> &PreprocessConfig {
        &self.default
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &PreprocessConfig)> {
        self.entries.iter()
    }

    /// Returns a copy with the given entries replacing existing ones.
    pub fn with_overrides<'a, I>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a PreprocessConfig)>,
    {
        let mut table = self.clone();
        for (code, config) in overrides {
            table.insert(code.clone(), *config);
        }
        table
    }
}

/// Pipeline stage, used to name debug snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Original,
    Inverted,
    Contrast,
    Denoised,
    Blur(BlurKind),
    Threshold(ThresholdMethod),
}

impl Stage {
    pub fn file_name(&self) -> String {
        match self {
            Stage::Original => "original_image.png".to_string(),
            Stage::Inverted => "inverted.png".to_string(),
            Stage::Contrast => "contrast.png".to_string(),
            Stage::Denoised => "denoised.png".to_string(),
            Stage::Blur(kind) => format!("blur_{}.png", kind.as_str()),
            Stage::Threshold(method) => format!("threshold_{}.png", method.as_str()),
        }
    }
}

/// Language-keyed preprocessing ahead of the local OCR engine.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    table: PreprocessTable,
    debug: Option<DebugSnapshots>,
}

impl Preprocessor {
    pub fn new(table: PreprocessTable) -> Self {
        Self { table, debug: None }
    }

    pub fn with_debug(mut self, debug: DebugSnapshots) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn table(&self) -> &PreprocessTable {
        &self.table
    }

    pub fn process(&self, image: &DynamicImage, language_code: &str) -> Result<GrayImage> {
        apply(image, self.table.get(language_code), self.debug.as_ref())
    }
}

/// Runs the fixed stage order for one config. Stages switched off are skipped.
pub fn apply(
    image: &DynamicImage,
    config: &PreprocessConfig,
    debug: Option<&DebugSnapshots>,
) -> Result<GrayImage> {
    validate(image, config)?;
    let snapshot = |stage: Stage, image: &GrayImage| {
        if let Some(debug) = debug {
            debug.save(stage, image);
        }
    };

    if let Some(debug) = debug {
        debug.save_color(Stage::Original, image);
    }
    let mut gray = grayscale(image);

    if config.invert {
        image::imageops::invert(&mut gray);
        snapshot(Stage::Inverted, &gray);
    }

    if config.contrast != 1.0 {
        scale_contrast(&mut gray, config.contrast);
        snapshot(Stage::Contrast, &gray);
    }

    if let Some(strength) = config.denoise {
        gray = denoise(&gray, strength);
        snapshot(Stage::Denoised, &gray);
    }

    match config.blur {
        BlurKind::None => {}
        BlurKind::Gaussian => {
            gray = gaussian_blur_f32(&gray, BLUR_SIGMA);
            snapshot(Stage::Blur(config.blur), &gray);
        }
        BlurKind::Median => {
            gray = median_filter(&gray, 1, 1);
            snapshot(Stage::Blur(config.blur), &gray);
        }
    }

    match config.threshold {
        ThresholdMethod::None => {}
        ThresholdMethod::Otsu => {
            let level = otsu_level(&gray);
            gray = binarize(&gray, level);
            snapshot(Stage::Threshold(config.threshold), &gray);
        }
        ThresholdMethod::AdaptiveGaussian { block_size, c } => {
            let local = gaussian_blur_f32(&gray, block_sigma(block_size));
            gray = adaptive_binarize(&gray, &local, c);
            snapshot(Stage::Threshold(config.threshold), &gray);
        }
        ThresholdMethod::AdaptiveMean { block_size, c } => {
            let radius = block_size / 2;
            let local = box_filter(&gray, radius, radius);
            gray = adaptive_binarize(&gray, &local, c);
            snapshot(Stage::Threshold(config.threshold), &gray);
        }
    }

    Ok(gray)
}

fn validate(image: &DynamicImage, config: &PreprocessConfig) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("image has no pixels"));
    }
    if !config.contrast.is_finite() || config.contrast < 0.0 {
        return Err(anyhow!("invalid contrast factor {}", config.contrast));
    }
    if let Some(strength) = config.denoise
        && (!strength.is_finite() || strength <= 0.0)
    {
        return Err(anyhow!("invalid denoise strength {}", strength));
    }
    match config.threshold {
        ThresholdMethod::AdaptiveGaussian { block_size, .. }
        | ThresholdMethod::AdaptiveMean { block_size, .. } => {
            if block_size < 3 || block_size % 2 == 0 {
                return Err(anyhow!(
                    "adaptive threshold block size must be odd and >= 3, got {}",
                    block_size
                ));
            }
        }
        ThresholdMethod::None | ThresholdMethod::Otsu => {}
    }
    Ok(())
}

/// Luma conversion with transparent pixels composited onto white.
fn grayscale(image: &DynamicImage) -> GrayImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut luma = GrayImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = r as f32 * alpha + 255.0 * (1.0 - alpha);
        let g = g as f32 * alpha + 255.0 * (1.0 - alpha);
        let b = b as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = (0.299 * r + 0.587 * g + 0.114 * b)
            .round()
            .clamp(0.0, 255.0) as u8;
        luma.put_pixel(x, y, Luma([value]));
    }
    luma
}

fn scale_contrast(image: &mut GrayImage, alpha: f32) {
    for pixel in image.pixels_mut() {
        pixel[0] = (pixel[0] as f32 * alpha).round().clamp(0.0, 255.0) as u8;
    }
}

/// Non-local means over a small search window. Patches are compared by mean
/// squared difference and weighted with `exp(-d / h^2)`.
fn denoise(image: &GrayImage, strength: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let h2 = (strength * strength) as f64;
    let patch_len = ((2 * DENOISE_PATCH_RADIUS + 1) * (2 * DENOISE_PATCH_RADIUS + 1)) as f64;
    let sample = |x: i64, y: i64| -> f64 {
        let cx = x.clamp(0, width as i64 - 1) as u32;
        let cy = y.clamp(0, height as i64 - 1) as u32;
        image.get_pixel(cx, cy)[0] as f64
    };

    let mut output = GrayImage::new(width, height);
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut weight_sum = 0.0;
            let mut value_sum = 0.0;
            for sy in -DENOISE_SEARCH_RADIUS..=DENOISE_SEARCH_RADIUS {
                for sx in -DENOISE_SEARCH_RADIUS..=DENOISE_SEARCH_RADIUS {
                    let (qx, qy) = (x + sx, y + sy);
                    let mut distance = 0.0;
                    for py in -DENOISE_PATCH_RADIUS..=DENOISE_PATCH_RADIUS {
                        for px in -DENOISE_PATCH_RADIUS..=DENOISE_PATCH_RADIUS {
                            let diff = sample(x + px, y + py) - sample(qx + px, qy + py);
                            distance += diff * diff;
                        }
                    }
                    let weight = (-(distance / patch_len) / h2).exp();
                    weight_sum += weight;
                    value_sum += weight * sample(qx, qy);
                }
            }
            let value = (value_sum / weight_sum).round().clamp(0.0, 255.0) as u8;
            output.put_pixel(x as u32, y as u32, Luma([value]));
        }
    }
    output
}

fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel[0] = if pixel[0] > threshold { 255 } else { 0 };
    }
    output
}

fn adaptive_binarize(image: &GrayImage, local: &GrayImage, c: i32) -> GrayImage {
    let mut output = image.clone();
    for (pixel, mean) in output.pixels_mut().zip(local.pixels()) {
        let threshold = mean[0] as i32 - c;
        pixel[0] = if pixel[0] as i32 > threshold { 255 } else { 0 };
    }
    output
}

fn block_sigma(block_size: u32) -> f32 {
    0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}
