use anyhow::{Context, Result, anyhow};
use image::DynamicImage;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::accuracy::score;
use super::corpus::{CorpusEntry, ReferenceText};
use super::cpu::{CpuSampler, CpuUsage};
use crate::languages::{self, Language};
use crate::ocr::preprocess::apply;
use crate::ocr::{
    DocumentOcr, GroupingThresholds, PreprocessConfig, PreprocessTable, TokenOcr, read_local,
};
use crate::providers::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_DELAY, RATE_LIMIT_MAX_RETRIES,
};
use crate::providers::{BackendKind, TranslateError, TranslationRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkMethod {
    Tesseract,
    TesseractPreprocessed,
    GoogleVision,
}

impl BenchmarkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkMethod::Tesseract => "tesseract",
            BenchmarkMethod::TesseractPreprocessed => "tesseract+preprocessing",
            BenchmarkMethod::GoogleVision => "google_vision",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrBenchmarkRecord {
    pub language: String,
    pub ocr_method: BenchmarkMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocess_config: Option<PreprocessConfig>,
    pub accuracy: f64,
    pub accuracy_image_1: f64,
    pub accuracy_image_2: f64,
    pub total_seconds: f64,
    pub preprocess_seconds: f64,
    pub ocr_seconds: f64,
    /// `None` where process CPU time cannot be read.
    pub cpu_avg: Option<f64>,
    pub cpu_peak: Option<f64>,
    pub outputs: [String; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OcrBenchmarkSummary {
    pub total: usize,
    pub with_preprocessing: usize,
    pub without_preprocessing: usize,
    pub skipped: usize,
    pub failed: usize,
}

struct ImageRun {
    text: String,
    preprocess: Duration,
    ocr: Duration,
    total: Duration,
    cpu: Option<CpuUsage>,
}

/// Accuracy, latency and CPU cost of each OCR method over the corpus.
pub struct OcrBenchmark {
    tesseract: Arc<dyn TokenOcr>,
    vision: Option<Arc<dyn DocumentOcr>>,
    table: PreprocessTable,
    thresholds: GroupingThresholds,
}

impl OcrBenchmark {
    pub fn new(tesseract: Arc<dyn TokenOcr>, table: PreprocessTable) -> Self {
        Self {
            tesseract,
            vision: None,
            table,
            thresholds: GroupingThresholds::default(),
        }
    }

    pub fn with_vision(mut self, vision: Option<Arc<dyn DocumentOcr>>) -> Self {
        self.vision = vision;
        self
    }

    pub fn with_thresholds(mut self, thresholds: GroupingThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub async fn run(
        &self,
        corpus: &[CorpusEntry],
    ) -> (Vec<OcrBenchmarkRecord>, OcrBenchmarkSummary) {
        let mut records = Vec::new();
        let mut summary = OcrBenchmarkSummary::default();

        for entry in corpus {
            let images = match entry.load_images() {
                Ok(images) => images,
                Err(err) => {
                    warn!("skipping {}: {:#}", entry.language.name, err);
                    summary.failed += 1;
                    continue;
                }
            };
            for method in [
                BenchmarkMethod::Tesseract,
                BenchmarkMethod::TesseractPreprocessed,
                BenchmarkMethod::GoogleVision,
            ] {
                if method == BenchmarkMethod::GoogleVision && self.vision.is_none() {
                    summary.skipped += 1;
                    continue;
                }
                match self.measure(entry, &images, method).await {
                    Ok(record) => {
                        info!(
                            "{} / {}: {:.1}% in {:.2}s",
                            entry.language.name,
                            method.as_str(),
                            record.accuracy,
                            record.total_seconds
                        );
                        if method == BenchmarkMethod::TesseractPreprocessed {
                            summary.with_preprocessing += 1;
                        } else {
                            summary.without_preprocessing += 1;
                        }
                        summary.total += 1;
                        records.push(record);
                    }
                    Err(err) => {
                        warn!(
                            "{} failed for {}: {:#}",
                            method.as_str(),
                            entry.language.name,
                            err
                        );
                        summary.failed += 1;
                    }
                }
            }
        }
        (records, summary)
    }

    async fn measure(
        &self,
        entry: &CorpusEntry,
        images: &[DynamicImage; 2],
        method: BenchmarkMethod,
    ) -> Result<OcrBenchmarkRecord> {
        let code = entry.language.ocr;
        let config = match method {
            BenchmarkMethod::TesseractPreprocessed => Some(*self.table.get(code)),
            _ => None,
        };
        let mut runs = Vec::with_capacity(2);
        for image in images {
            let run = match (&self.vision, method) {
                (Some(vision), BenchmarkMethod::GoogleVision) => {
                    run_document(vision.as_ref(), image).await?
                }
                _ => {
                    let engine = Arc::clone(&self.tesseract);
                    let image = image.clone();
                    let thresholds = self.thresholds;
                    tokio::task::spawn_blocking(move || {
                        run_local(engine.as_ref(), &image, code, config.as_ref(), &thresholds)
                    })
                    .await??
                }
            };
            runs.push(run);
        }

        let accuracy_1 = score(&runs[0].text, &entry.reference);
        let accuracy_2 = score(&runs[1].text, &entry.reference);
        let average = |pick: fn(&ImageRun) -> f64| runs.iter().map(pick).sum::<f64>() / 2.0;
        let cpu = runs
            .iter()
            .map(|run| run.cpu)
            .collect::<Option<Vec<CpuUsage>>>();
        Ok(OcrBenchmarkRecord {
            language: entry.language.name.to_string(),
            ocr_method: method,
            preprocess_config: config,
            accuracy: (accuracy_1 + accuracy_2) / 2.0,
            accuracy_image_1: accuracy_1,
            accuracy_image_2: accuracy_2,
            total_seconds: average(|run| run.total.as_secs_f64()),
            preprocess_seconds: average(|run| run.preprocess.as_secs_f64()),
            ocr_seconds: average(|run| run.ocr.as_secs_f64()),
            cpu_avg: cpu
                .as_ref()
                .map(|usage| usage.iter().map(|usage| usage.average).sum::<f64>() / 2.0),
            cpu_peak: cpu.map(|usage| usage.iter().map(|usage| usage.peak).fold(0.0, f64::max)),
            outputs: [
                normalise_display(&runs[0].text),
                normalise_display(&runs[1].text),
            ],
        })
    }
}

fn run_local(
    engine: &dyn TokenOcr,
    image: &DynamicImage,
    language_code: &str,
    config: Option<&PreprocessConfig>,
    thresholds: &GroupingThresholds,
) -> Result<ImageRun> {
    let sampler = CpuSampler::start();
    let started = Instant::now();
    let prepared = match config {
        Some(config) => DynamicImage::ImageLuma8(apply(image, config, None)?),
        None => image.clone(),
    };
    let preprocess = started.elapsed();
    let ocr_started = Instant::now();
    let output = read_local(engine, &prepared, language_code, thresholds);
    let ocr = ocr_started.elapsed();
    let total = started.elapsed();
    let cpu = sampler.stop();
    Ok(ImageRun {
        text: output?.full_text,
        preprocess,
        ocr,
        total,
        cpu,
    })
}

async fn run_document(engine: &dyn DocumentOcr, image: &DynamicImage) -> Result<ImageRun> {
    let sampler = CpuSampler::start();
    let started = Instant::now();
    let output = engine.extract_document(image).await;
    let ocr = started.elapsed();
    let cpu = sampler.stop();
    Ok(ImageRun {
        text: output?.full_text,
        preprocess: Duration::ZERO,
        ocr,
        total: ocr,
        cpu,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    Translated,
    Unsupported,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslationBenchmarkRecord {
    pub from_language: String,
    pub to_language: String,
    pub backend: BackendKind,
    pub status: TranslationStatus,
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<f64>,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Benchmark target: English, or Spanish when the source already is English.
pub fn benchmark_target(source: &Language) -> &'static Language {
    if source.name == languages::english().name {
        languages::find("Spanish").unwrap_or_else(languages::english)
    } else {
        languages::english()
    }
}

/// Pause between benchmark requests so backends are not hammered.
pub const TRANSLATION_PAUSE: Duration = Duration::from_millis(500);

/// Latency of every registered backend over the reference texts.
pub struct TranslationBenchmark<'a> {
    router: &'a TranslationRouter,
    attempts: usize,
    retry_delay: Duration,
    pause: Duration,
}

impl<'a> TranslationBenchmark<'a> {
    pub fn new(router: &'a TranslationRouter) -> Self {
        Self {
            router,
            attempts: RATE_LIMIT_MAX_RETRIES,
            retry_delay: RATE_LIMIT_BASE_DELAY,
            pause: TRANSLATION_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_retry(mut self, attempts: usize, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub async fn run(&self, references: &[ReferenceText]) -> Vec<TranslationBenchmarkRecord> {
        let mut records = Vec::new();
        let mut requested = false;
        for reference in references {
            let source = reference.language;
            let target = benchmark_target(source);
            for kind in self.router.kinds() {
                if requested && !self.pause.is_zero() {
                    tokio::time::sleep(self.pause).await;
                }
                let record = self.translate_one(reference, target, kind).await;
                requested |= record.attempts > 0;
                info!(
                    "{} -> {} with {}: {:?}",
                    source.name, target.name, kind, record.status
                );
                records.push(record);
            }
        }
        records
    }

    async fn translate_one(
        &self,
        reference: &ReferenceText,
        target: &'static Language,
        kind: BackendKind,
    ) -> TranslationBenchmarkRecord {
        let source = reference.language;
        let mut record = TranslationBenchmarkRecord {
            from_language: source.name.to_string(),
            to_language: target.name.to_string(),
            backend: kind,
            status: TranslationStatus::Unsupported,
            attempts: 0,
            seconds: None,
            input: normalise_display(&reference.text),
            output: None,
        };
        if !self.router.supports(kind, target, Some(source)) {
            return record;
        }

        let mut delay = self.retry_delay;
        for attempt in 1..=self.attempts {
            record.attempts = attempt;
            let started = Instant::now();
            match self
                .router
                .translate(&reference.text, target, Some(source), kind)
                .await
            {
                Ok(result) => {
                    record.status = TranslationStatus::Translated;
                    record.seconds = Some(started.elapsed().as_secs_f64());
                    record.output = Some(normalise_display(&result.text));
                    return record;
                }
                Err(TranslateError::Backend(err)) if attempt < self.attempts => {
                    warn!(
                        "attempt {} failed for {} using {}: {:#}",
                        attempt, source.name, kind, err
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2).min(RATE_LIMIT_MAX_DELAY);
                }
                Err(err) => {
                    warn!(
                        "failed to translate {} using {} after {} attempt(s): {}",
                        source.name, kind, attempt, err
                    );
                    break;
                }
            }
        }
        record.status = TranslationStatus::Failed;
        record
    }
}

/// Single-line form of `text` for reports: no line breaks, no direction marks.
pub fn normalise_display(text: &str) -> String {
    text.replace('\u{00A0}', " ")
        .replace(['\u{200E}', '\u{200F}'], "")
        .replace('\n', " ")
        .trim()
        .to_string()
}

/// Writes `records` as pretty JSON, creating parent directories.
pub fn write_records<T: Serialize>(path: &Path, records: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(records)
        .map_err(|err| anyhow!("failed to serialize benchmark records: {}", err))?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write benchmark records: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::corpus::image_file_name;
    use crate::geometry::BBox;
    use crate::languages::resolve;
    use crate::ocr::testing::{FixedDocument, FixedTokens};
    use crate::ocr::{OcrOutput, Paragraph, Token};
    use crate::providers::testing::EchoBackend;
    use image::{GrayImage, Luma};
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn corpus(dir: &Path, name: &str, reference: &str) -> CorpusEntry {
        let images = [1, 2].map(|idx| {
            let path = dir.join(image_file_name(name, idx));
            GrayImage::from_pixel(8, 8, Luma([255]))
                .save(&path)
                .unwrap();
            path
        });
        CorpusEntry {
            language: resolve(name).unwrap(),
            reference: reference.to_string(),
            images,
        }
    }

    #[tokio::test]
    async fn ocr_benchmark_covers_each_method() {
        let dir = tempdir().unwrap();
        let entries = vec![corpus(dir.path(), "Spanish", "Hola mundo")];
        let tesseract = Arc::new(FixedTokens::new(vec![
            Token {
                text: "Hola".to_string(),
                bbox: BBox::new(0, 0, 40, 10),
            },
            Token {
                text: "mundo".to_string(),
                bbox: BBox::new(50, 0, 40, 10),
            },
        ]));
        let vision = FixedDocument(Ok(OcrOutput {
            full_text: "Hola".to_string(),
            paragraphs: vec![Paragraph {
                text: "Hola".to_string(),
                bbox: BBox::new(0, 0, 40, 10),
            }],
        }));
        let benchmark = OcrBenchmark::new(tesseract.clone(), PreprocessTable::builtin())
            .with_vision(Some(Arc::new(vision)));

        let (records, summary) = benchmark.run(&entries).await;
        assert_eq!(
            summary,
            OcrBenchmarkSummary {
                total: 3,
                with_preprocessing: 1,
                without_preprocessing: 2,
                skipped: 0,
                failed: 0,
            }
        );
        assert_eq!(records[0].ocr_method, BenchmarkMethod::Tesseract);
        assert_eq!(records[0].accuracy, 100.0);
        assert!(records[0].preprocess_config.is_none());
        assert!(records[1].preprocess_config.is_some());
        assert_eq!(records[2].ocr_method, BenchmarkMethod::GoogleVision);
        assert!((records[2].accuracy - 400.0 / 9.0).abs() < 1e-9);
        assert_eq!(tesseract.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn missing_vision_key_skips_method_and_bad_images_fail() {
        let dir = tempdir().unwrap();
        let mut broken = corpus(dir.path(), "German", "Hallo");
        broken.images[1] = dir.path().join("missing.png");
        let entries = vec![corpus(dir.path(), "French", "Bonjour"), broken];
        let benchmark = OcrBenchmark::new(
            Arc::new(FixedTokens::new(Vec::new())),
            PreprocessTable::builtin(),
        );
        let (records, summary) = benchmark.run(&entries).await;
        assert_eq!(records.len(), 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(records[0].accuracy, 0.0);
    }

    #[tokio::test]
    async fn translation_benchmark_records_each_backend() {
        let deepl = EchoBackend {
            unsupported: vec!["Hindi"],
            ..EchoBackend::new(BackendKind::DeepL)
        };
        let deepl_calls = Arc::clone(&deepl.calls);
        let router = TranslationRouter::new()
            .with_backend(Arc::new(EchoBackend::new(BackendKind::Google)))
            .with_backend(Arc::new(deepl));
        let references = vec![
            ReferenceText {
                language: resolve("Hindi").unwrap(),
                text: "नमस्ते\n".to_string(),
            },
            ReferenceText {
                language: resolve("English").unwrap(),
                text: "hello\u{200E} world".to_string(),
            },
        ];

        let records = TranslationBenchmark::new(&router)
            .with_retry(2, Duration::ZERO)
            .with_pause(Duration::ZERO)
            .run(&references)
            .await;
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].backend, BackendKind::Google);
        assert_eq!(records[0].status, TranslationStatus::Translated);
        assert_eq!(records[0].to_language, "English");
        assert_eq!(records[1].status, TranslationStatus::Unsupported);
        assert_eq!(records[1].attempts, 0);
        assert_eq!(records[3].to_language, "Spanish");
        assert_eq!(records[3].input, "hello world");
        assert_eq!(records[3].output.as_deref(), Some("HELLO WORLD"));
        assert_eq!(deepl_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_backend_is_retried_then_recorded() {
        let google = EchoBackend {
            fail_on: Some("boom"),
            ..EchoBackend::new(BackendKind::Google)
        };
        let calls = Arc::clone(&google.calls);
        let router = TranslationRouter::new().with_backend(Arc::new(google));
        let references = vec![ReferenceText {
            language: resolve("French").unwrap(),
            text: "boom".to_string(),
        }];
        let records = TranslationBenchmark::new(&router)
            .with_retry(3, Duration::ZERO)
            .with_pause(Duration::ZERO)
            .run(&references)
            .await;
        assert_eq!(records[0].status, TranslationStatus::Failed);
        assert_eq!(records[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn requests_are_paced_apart() {
        let router =
            TranslationRouter::new().with_backend(Arc::new(EchoBackend::new(BackendKind::Google)));
        let references = ["French", "German", "Italian"]
            .map(|name| ReferenceText {
                language: resolve(name).unwrap(),
                text: "bonjour".to_string(),
            })
            .to_vec();
        let pause = Duration::from_millis(15);
        let started = Instant::now();
        let records = TranslationBenchmark::new(&router)
            .with_retry(1, Duration::ZERO)
            .with_pause(pause)
            .run(&references)
            .await;
        assert_eq!(records.len(), 3);
        assert!(started.elapsed() >= pause * 2);
        assert_eq!(TranslationBenchmark::new(&router).pause, TRANSLATION_PAUSE);
    }

    #[test]
    fn missing_cpu_readings_stay_empty() {
        let record = OcrBenchmarkRecord {
            language: "French".to_string(),
            ocr_method: BenchmarkMethod::Tesseract,
            preprocess_config: None,
            accuracy: 50.0,
            accuracy_image_1: 50.0,
            accuracy_image_2: 50.0,
            total_seconds: 0.1,
            preprocess_seconds: 0.0,
            ocr_seconds: 0.1,
            cpu_avg: None,
            cpu_peak: None,
            outputs: [String::new(), String::new()],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["cpu_avg"].is_null());
        assert!(json["cpu_peak"].is_null());
    }

    #[test]
    fn records_are_written_as_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/records.json");
        let summary = OcrBenchmarkSummary {
            total: 1,
            ..OcrBenchmarkSummary::default()
        };
        write_records(&path, &summary).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["total"], 1);
        assert_eq!(normalise_display("\u{00A0}a\nb\u{200F} "), "a b");
    }
}
