use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

pub mod calibration;
pub mod geometry;
pub mod languages;
pub mod logging;
pub mod ocr;
mod paths;
pub mod pipeline;
pub mod providers;
pub mod settings;

pub use geometry::{BBox, MonitorSpec, Monitors, Region, map_rect, map_region};
pub use languages::Language;
pub use ocr::{OcrBackend, OcrMethod, OcrOutput, Paragraph, Token};
pub use pipeline::{
    CaptureRequest, ImageCapture, Overlay, OverlayItem, Pipeline, PipelineError, PipelineHandle,
    PipelineOptions, PipelineOutcome, ScreenCapture,
};
pub use providers::{BackendKind, TranslateError, TranslationRouter};
pub use settings::{Settings, load_settings};

use calibration::{
    CalibrationTable, OcrBenchmark, ParameterSearch, TranslationBenchmark, VariantSpace,
    load_corpus, load_references, write_records,
};
use ocr::{DebugSnapshots, GoogleVision, Preprocessor, Tesseract};
use providers::{DEEPL_KEY_ENV, DeepL, GoogleTranslate, VISION_KEY_ENV};

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct CommonConfig {
    pub settings_path: Option<PathBuf>,
    pub vision_key: Option<String>,
    pub deepl_key: Option<String>,
}

impl CommonConfig {
    fn load_settings(&self) -> Result<Settings> {
        settings::load_settings(self.settings_path.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct TranslateImageConfig {
    pub common: CommonConfig,
    pub image: PathBuf,
    pub source: String,
    pub target: Option<String>,
    pub backend: Option<BackendKind>,
    pub ocr: Option<OcrMethod>,
    /// Capture area inside the image; the whole image when `None`.
    pub region: Option<Region>,
    /// Second monitor to draw the overlay on, given as `WIDTHxHEIGHT+X+Y`.
    pub output_monitor: Option<MonitorSpec>,
    pub no_preprocess: bool,
}

/// Runs the capture pipeline on an image file and returns the outcome as JSON.
///
/// The image plays the part of monitor 0 at the desktop origin. When an
/// output monitor is given it becomes monitor 1 and the overlay is mapped
/// onto it.
pub async fn translate_image(config: TranslateImageConfig) -> Result<String> {
    let settings = config.common.load_settings()?;
    let image = image::open(&config.image)
        .with_context(|| format!("failed to open image: {}", config.image.display()))?;

    let source = languages::resolve(&config.source)?;
    let target = languages::resolve(
        config
            .target
            .as_deref()
            .unwrap_or(&settings.target_language),
    )?;
    let backend = config.backend.unwrap_or(settings.backend);
    let method = config.ocr.unwrap_or(settings.ocr_method);

    let capture_monitor = MonitorSpec {
        index: 0,
        width: image.width(),
        height: image.height(),
        origin_x: 0,
        origin_y: 0,
    };
    let mut specs = vec![capture_monitor];
    let mut output_monitor = None;
    if let Some(spec) = config.output_monitor {
        specs.push(MonitorSpec { index: 1, ..spec });
        output_monitor = Some(1);
    }
    let region = config.region.unwrap_or(Region {
        top: 0,
        left: 0,
        width: image.width(),
        height: image.height(),
    });

    let ocr = build_ocr(&settings, method, config.common.vision_key.as_deref())?;
    let router = build_router(&settings, config.common.deepl_key.as_deref());
    if !router.kinds().contains(&backend) {
        return Err(anyhow!(
            "{} is not available; set {} or pass --deepl-key",
            backend,
            DEEPL_KEY_ENV
        ));
    }
    let preprocessor = build_preprocessor(&settings, source)?;
    let options = PipelineOptions {
        preprocess: settings.preprocess && !config.no_preprocess,
        thresholds: settings.grouping,
        placeholder: settings.placeholder.clone(),
        concurrency: settings.concurrency,
    };

    let pipeline = Pipeline::new(
        Arc::new(ImageCapture::new(image)),
        ocr,
        router,
        preprocessor,
        Monitors::new(specs),
    )
    .with_options(options);
    let request = CaptureRequest {
        region,
        source,
        target,
        backend,
        output_monitor,
    };
    let outcome = pipeline.run(&request, &AtomicBool::new(false)).await?;
    serde_json::to_string_pretty(&outcome).with_context(|| "failed to serialize outcome")
}

#[derive(Debug, Clone, Default)]
pub struct CalibrateConfig {
    pub common: CommonConfig,
    /// Language names or codes to calibrate; every corpus language when empty.
    pub languages: Vec<String>,
    pub workers: Option<usize>,
    pub output: Option<PathBuf>,
}

/// Sweeps preprocessing variants per corpus language and writes the winners
/// into the calibration table. Existing entries for other languages are kept.
pub async fn calibrate(config: CalibrateConfig) -> Result<String> {
    let settings = config.common.load_settings()?;
    let corpus = filter_languages(
        load_corpus(&settings.text_dir, &settings.image_dir)?,
        &config.languages,
        |entry| entry.language,
    )?;
    if corpus.is_empty() {
        return Err(anyhow!(
            "no benchmark corpus found in {} and {}",
            settings.text_dir.display(),
            settings.image_dir.display()
        ));
    }

    let output = config
        .output
        .unwrap_or_else(|| settings.table_output.clone());
    let mut table = if output.exists() {
        CalibrationTable::load(&output)?
    } else {
        CalibrationTable::default()
    };

    let engine: Arc<dyn ocr::TokenOcr> = Arc::new(build_tesseract(&settings));
    let workers = config.workers.or(settings.workers);
    let search = Arc::new(
        ParameterSearch::new(engine, VariantSpace::default(), workers)?
            .with_thresholds(settings.grouping),
    );

    let mut lines = Vec::new();
    for entry in corpus {
        let images = match entry.load_images() {
            Ok(images) => images,
            Err(err) => {
                warn!("skipping {}: {:#}", entry.language.name, err);
                continue;
            }
        };
        let search = Arc::clone(&search);
        let code = entry.language.ocr;
        let reference = entry.reference.clone();
        let outcome =
            tokio::task::spawn_blocking(move || search.search(&images, code, &reference)).await?;
        if table.record(entry.language.name, &outcome)
            && let Some(best) = table.languages.get(code)
        {
            lines.push(format!(
                "{}: {:.2}% (baseline {}) with {} variant(s) in {:.1}s; best variant {:.2}s, cpu {}",
                entry.language.name,
                best.accuracy,
                outcome
                    .baseline
                    .map(|value| format!("{:.2}%", value))
                    .unwrap_or_else(|| "n/a".to_string()),
                outcome.evaluated,
                outcome.elapsed.as_secs_f64(),
                best.seconds,
                best.cpu_avg
                    .map(|value| format!("{:.1}%", value))
                    .unwrap_or_else(|| "n/a".to_string()),
            ));
        } else {
            lines.push(format!("{}: no variant succeeded", entry.language.name));
        }
    }

    table.write(&output)?;
    info!("calibration table written to {}", output.display());
    lines.push(format!("written: {}", output.display()));
    Ok(lines.join("\n"))
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkConfig {
    pub common: CommonConfig,
    pub languages: Vec<String>,
    pub output: Option<PathBuf>,
}

/// Measures every OCR method over the corpus and writes the records as JSON.
pub async fn benchmark_ocr(config: BenchmarkConfig) -> Result<String> {
    let settings = config.common.load_settings()?;
    let corpus = filter_languages(
        load_corpus(&settings.text_dir, &settings.image_dir)?,
        &config.languages,
        |entry| entry.language,
    )?;

    let vision = providers::resolve_key(VISION_KEY_ENV, config.common.vision_key.as_deref())
        .map(|key| Arc::new(GoogleVision::new(key)) as Arc<dyn ocr::DocumentOcr>);
    if vision.is_none() {
        info!("{} not set; skipping Google Vision", VISION_KEY_ENV);
    }
    let benchmark = OcrBenchmark::new(
        Arc::new(build_tesseract(&settings)),
        settings.preprocess_table()?,
    )
    .with_vision(vision)
    .with_thresholds(settings.grouping);
    let (records, summary) = benchmark.run(&corpus).await;

    let output = config
        .output
        .unwrap_or_else(|| settings.ocr_benchmark_output.clone());
    write_records(&output, &records)?;
    Ok(format!(
        "languages: {}\nwith preprocessing: {}\nwithout preprocessing: {}\nskipped: {}\nfailed: {}\nwritten: {}",
        summary.total,
        summary.with_preprocessing,
        summary.without_preprocessing,
        summary.skipped,
        summary.failed,
        output.display()
    ))
}

/// Translates every reference text with each available backend.
pub async fn benchmark_translation(config: BenchmarkConfig) -> Result<String> {
    let settings = config.common.load_settings()?;
    let references = filter_languages(
        load_references(&settings.text_dir)?,
        &config.languages,
        |reference| reference.language,
    )?;
    let router = build_router(&settings, config.common.deepl_key.as_deref());
    let records = TranslationBenchmark::new(&router)
        .with_pause(settings.translation_pause)
        .run(&references)
        .await;

    let output = config
        .output
        .unwrap_or_else(|| settings.translation_benchmark_output.clone());
    write_records(&output, &records)?;
    let translated = records
        .iter()
        .filter(|record| record.status == calibration::benchmark::TranslationStatus::Translated)
        .count();
    Ok(format!(
        "pairs: {}\ntranslated: {}\nwritten: {}",
        records.len(),
        translated,
        output.display()
    ))
}

/// Lists the languages whose DeepL target is missing from DeepL's own list.
pub async fn deepl_languages(common: CommonConfig) -> Result<String> {
    let settings = common.load_settings()?;
    let key = providers::resolve_key(DEEPL_KEY_ENV, common.deepl_key.as_deref())
        .with_context(|| format!("{} is not set", DEEPL_KEY_ENV))?;
    let deepl = DeepL::new(key).with_endpoint(settings.deepl_endpoint);
    let supported = deepl.fetch_supported_languages().await?;
    let missing = providers::missing_languages(&supported);

    let mut lines = vec![format!("DeepL target languages: {}", supported.len())];
    if missing.is_empty() {
        lines.push("every language is covered".to_string());
    } else {
        lines.push("not offered by DeepL:".to_string());
        lines.extend(
            missing
                .iter()
                .map(|language| format!("  {}", language.name)),
        );
    }
    Ok(lines.join("\n"))
}

/// One line per language: name, OCR code, Google code, DeepL code. With a
/// tesseract binary, languages lacking traineddata are marked.
pub fn format_languages(installed: Option<&[String]>) -> String {
    languages::LANGUAGES
        .iter()
        .map(|language| {
            let mut line = format!(
                "{:<22} {:<8} {:<6} {}",
                language.name,
                language.ocr,
                language.google,
                language.deepl.unwrap_or("-")
            );
            if let Some(installed) = installed
                && !installed.iter().any(|code| code == language.ocr)
            {
                line.push_str("  (no traineddata)");
            }
            line.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn list_languages(common: CommonConfig, check_installed: bool) -> Result<String> {
    if !check_installed {
        return Ok(format_languages(None));
    }
    let settings = common.load_settings()?;
    let installed = ocr::list_tesseract_languages(&settings.tesseract_path)?;
    Ok(format_languages(Some(installed.as_slice())))
}

/// Parses `LEFT,TOP,WIDTH,HEIGHT`.
pub fn parse_region(value: &str) -> Result<Region> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid region '{}'", value))?;
    let [left, top, width, height] = parts[..] else {
        return Err(anyhow!("region must be LEFT,TOP,WIDTH,HEIGHT: '{}'", value));
    };
    Ok(Region {
        left: i32::try_from(left).with_context(|| "region left out of range")?,
        top: i32::try_from(top).with_context(|| "region top out of range")?,
        width: u32::try_from(width).with_context(|| "region width must not be negative")?,
        height: u32::try_from(height).with_context(|| "region height must not be negative")?,
    })
}

/// Parses `WIDTHxHEIGHT` or `WIDTHxHEIGHT+X+Y` (offsets may be negative).
pub fn parse_monitor(value: &str) -> Result<MonitorSpec> {
    let invalid = || anyhow!("monitor must be WIDTHxHEIGHT[+X+Y]: '{}'", value);
    let value = value.trim();
    let offset_start = value.find(['+', '-']).unwrap_or(value.len());
    let (size, offsets) = value.split_at(offset_start);
    let (width, height) = size.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width = width.parse::<u32>().map_err(|_| invalid())?;
    let height = height.parse::<u32>().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }

    let (origin_x, origin_y) = if offsets.is_empty() {
        (0, 0)
    } else {
        let second = offsets[1..]
            .find(['+', '-'])
            .map(|idx| idx + 1)
            .ok_or_else(invalid)?;
        let (x, y) = offsets.split_at(second);
        (
            x.parse::<i32>().map_err(|_| invalid())?,
            y.parse::<i32>().map_err(|_| invalid())?,
        )
    };
    Ok(MonitorSpec {
        index: 0,
        width,
        height,
        origin_x,
        origin_y,
    })
}

fn build_tesseract(settings: &Settings) -> Tesseract {
    Tesseract::new(&settings.tesseract_path).with_psm(settings.tesseract_psm)
}

fn build_ocr(
    settings: &Settings,
    method: OcrMethod,
    vision_key: Option<&str>,
) -> Result<OcrBackend> {
    match method {
        OcrMethod::Tesseract => Ok(OcrBackend::Local(Arc::new(build_tesseract(settings)))),
        OcrMethod::GoogleVision => {
            let key = providers::resolve_key(VISION_KEY_ENV, vision_key)
                .with_context(|| format!("{} is not set", VISION_KEY_ENV))?;
            Ok(OcrBackend::Cloud(Arc::new(GoogleVision::new(key))))
        }
    }
}

/// Google Translate is always registered; DeepL only with a key.
fn build_router(settings: &Settings, deepl_key: Option<&str>) -> TranslationRouter {
    let mut router = TranslationRouter::new().with_backend(Arc::new(GoogleTranslate::new()));
    if let Some(key) = providers::resolve_key(DEEPL_KEY_ENV, deepl_key) {
        router.register(Arc::new(
            DeepL::new(key).with_endpoint(settings.deepl_endpoint.clone()),
        ));
    }
    router
}

fn build_preprocessor(settings: &Settings, source: &Language) -> Result<Preprocessor> {
    let preprocessor = Preprocessor::new(settings.preprocess_table()?);
    if !settings.debug {
        return Ok(preprocessor);
    }
    let snapshots = DebugSnapshots::new(settings.debug_dir.as_deref(), Some(source.ocr))?;
    info!("debug snapshots: {}", snapshots.output_dir().display());
    Ok(preprocessor.with_debug(snapshots))
}

fn filter_languages<T>(
    items: Vec<T>,
    queries: &[String],
    language: impl Fn(&T) -> &'static Language,
) -> Result<Vec<T>> {
    if queries.is_empty() {
        return Ok(items);
    }
    let wanted = queries
        .iter()
        .map(|query| languages::resolve(query))
        .collect::<Result<Vec<_>>>()?;
    Ok(items
        .into_iter()
        .filter(|item| {
            let name = language(item).name;
            wanted.iter().any(|wanted| wanted.name == name)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_region() {
        assert_eq!(
            parse_region("100, 100,200,50").unwrap(),
            Region {
                left: 100,
                top: 100,
                width: 200,
                height: 50
            }
        );
        assert!(parse_region("1,2,3").is_err());
        assert!(parse_region("1,2,-3,4").is_err());
        assert!(parse_region("a,b,c,d").is_err());
    }

    #[test]
    fn parses_monitor_with_and_without_offsets() {
        let spec = parse_monitor("3840x2160+1920+0").unwrap();
        assert_eq!((spec.width, spec.height), (3840, 2160));
        assert_eq!((spec.origin_x, spec.origin_y), (1920, 0));

        let spec = parse_monitor("1280x1024-1280+56").unwrap();
        assert_eq!((spec.origin_x, spec.origin_y), (-1280, 56));

        let spec = parse_monitor("800X600").unwrap();
        assert_eq!((spec.origin_x, spec.origin_y), (0, 0));

        assert!(parse_monitor("0x600").is_err());
        assert!(parse_monitor("800x600+5").is_err());
        assert!(parse_monitor("wide").is_err());
    }

    #[test]
    fn language_table_marks_missing_traineddata() {
        let installed = vec!["eng".to_string()];
        let listing = format_languages(Some(installed.as_slice()));
        let english = listing.lines().next().unwrap();
        assert!(english.starts_with("English"));
        assert!(!english.contains("no traineddata"));
        assert!(
            listing
                .lines()
                .any(|line| line.starts_with("Japanese") && line.ends_with("(no traineddata)"))
        );
    }

    #[test]
    fn language_filter_accepts_names_and_codes() {
        let items = languages::LANGUAGES.iter().collect::<Vec<_>>();
        let filtered = filter_languages(
            items,
            &["jpn".to_string(), "Korean".to_string()],
            |language| *language,
        )
        .unwrap();
        let names = filtered.iter().map(|l| l.name).collect::<Vec<_>>();
        assert_eq!(names, vec!["Japanese", "Korean"]);
        let unknown = filter_languages(
            Vec::<&'static Language>::new(),
            &["Klingon".to_string()],
            |language| *language,
        );
        assert!(unknown.is_err());
    }
}
