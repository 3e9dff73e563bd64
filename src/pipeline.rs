use anyhow::{Result, anyhow};
use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::geometry::{BBox, MonitorSpec, Monitors, Region, map_rect, map_region};
use crate::languages::Language;
use crate::ocr::{GroupingThresholds, OcrBackend, Preprocessor, RecognizeOptions};
use crate::providers::{BackendKind, TranslationRouter};

/// Grabs pixels for a region of one monitor.
pub trait ScreenCapture: Send + Sync {
    fn capture(&self, region: &Region, monitor: &MonitorSpec) -> Result<DynamicImage>;
}

/// A still image standing in for a monitor's framebuffer.
#[derive(Debug, Clone)]
pub struct ImageCapture {
    image: DynamicImage,
}

impl ImageCapture {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }
}

impl ScreenCapture for ImageCapture {
    fn capture(&self, region: &Region, monitor: &MonitorSpec) -> Result<DynamicImage> {
        let x = region.left - monitor.origin_x;
        let y = region.top - monitor.origin_y;
        if x < 0
            || y < 0
            || x as u64 + region.width as u64 > self.image.width() as u64
            || y as u64 + region.height as u64 > self.image.height() as u64
        {
            return Err(anyhow!(
                "region {}x{} at ({}, {}) is outside the {}x{} image",
                region.width,
                region.height,
                x,
                y,
                self.image.width(),
                self.image.height()
            ));
        }
        Ok(self
            .image
            .crop_imm(x as u32, y as u32, region.width, region.height))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("region at ({left}, {top}) is not on any monitor")]
    RegionOffscreen { left: i32, top: i32 },
    #[error("output monitor {0} does not exist")]
    UnknownMonitor(usize),
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub region: Region,
    pub source: &'static Language,
    pub target: &'static Language,
    pub backend: BackendKind,
    /// Monitor to draw on; the capture monitor when `None`.
    pub output_monitor: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub preprocess: bool,
    pub thresholds: GroupingThresholds,
    pub placeholder: String,
    pub concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            preprocess: true,
            thresholds: GroupingThresholds::default(),
            placeholder: "[translation unavailable]".to_string(),
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayItem {
    pub text: String,
    pub source_text: String,
    pub bbox: BBox,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
}

/// Everything the renderer needs: target monitor, the mapped capture area and
/// one positioned label per paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overlay {
    pub monitor: usize,
    pub region: BBox,
    pub backend: BackendKind,
    pub items: Vec<OverlayItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    EmptyCapture,
    Cancelled,
    NoTextDetected,
    UnsupportedLanguage {
        backend: BackendKind,
        language: String,
    },
    TranslationFailed,
    Overlay(Overlay),
}

/// Capture → OCR → translate → map, with clients built once by the caller.
pub struct Pipeline {
    capture: Arc<dyn ScreenCapture>,
    ocr: OcrBackend,
    router: TranslationRouter,
    preprocessor: Preprocessor,
    monitors: Monitors,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        capture: Arc<dyn ScreenCapture>,
        ocr: OcrBackend,
        router: TranslationRouter,
        preprocessor: Preprocessor,
        monitors: Monitors,
    ) -> Self {
        Self {
            capture,
            ocr,
            router,
            preprocessor,
            monitors,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn monitors(&self) -> &Monitors {
        &self.monitors
    }

    /// Starts a run on the tokio runtime and returns immediately.
    pub fn spawn(self: &Arc<Self>, request: CaptureRequest) -> PipelineHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let pipeline = Arc::clone(self);
        let flag = Arc::clone(&cancelled);
        let task = tokio::spawn(async move { pipeline.run(&request, &flag).await });
        PipelineHandle { cancelled, task }
    }

    /// Runs one capture. `cancelled` is honoured up to the start of OCR.
    pub async fn run(
        &self,
        request: &CaptureRequest,
        cancelled: &AtomicBool,
    ) -> Result<PipelineOutcome, PipelineError> {
        let region = request.region;
        if region.is_empty() {
            debug!("zero-area region; nothing to capture");
            return Ok(PipelineOutcome::EmptyCapture);
        }
        let source_monitor =
            *self
                .monitors
                .containing(&region)
                .ok_or(PipelineError::RegionOffscreen {
                    left: region.left,
                    top: region.top,
                })?;
        let output_index = request.output_monitor.unwrap_or(source_monitor.index);
        let output_monitor = *self
            .monitors
            .get(output_index)
            .ok_or(PipelineError::UnknownMonitor(output_index))?;

        for language in [request.target, request.source] {
            if !self.router.supports(request.backend, language, None) {
                info!("{} cannot translate {}", request.backend, language.name);
                return Ok(PipelineOutcome::UnsupportedLanguage {
                    backend: request.backend,
                    language: language.name.to_string(),
                });
            }
        }

        if cancelled.load(Ordering::SeqCst) {
            return Ok(PipelineOutcome::Cancelled);
        }
        let capture = Arc::clone(&self.capture);
        let captured =
            tokio::task::spawn_blocking(move || capture.capture(&region, &source_monitor)).await?;
        let image = match captured {
            Ok(image) if image.width() > 0 && image.height() > 0 => image,
            Ok(_) => return Ok(PipelineOutcome::EmptyCapture),
            Err(err) => {
                warn!("screen capture failed: {:#}", err);
                return Ok(PipelineOutcome::EmptyCapture);
            }
        };

        if cancelled.load(Ordering::SeqCst) {
            debug!("run cancelled before OCR");
            return Ok(PipelineOutcome::Cancelled);
        }
        let options = RecognizeOptions {
            preprocess: self.options.preprocess,
            thresholds: self.options.thresholds,
        };
        let ocr = self
            .ocr
            .recognize(image, request.source.ocr, &self.preprocessor, options)
            .await;
        if ocr.paragraphs.is_empty() {
            info!("no text detected in the selected region");
            return Ok(PipelineOutcome::NoTextDetected);
        }

        let texts = ocr
            .paragraphs
            .iter()
            .map(|paragraph| paragraph.text.clone())
            .collect::<Vec<_>>();
        let translations = self
            .router
            .translate_paragraphs(
                &texts,
                request.target,
                Some(request.source),
                request.backend,
                &self.options.placeholder,
                self.options.concurrency,
            )
            .await;
        if translations.iter().all(|result| result.placeholder) {
            return Ok(PipelineOutcome::TranslationFailed);
        }

        let items = ocr
            .paragraphs
            .into_iter()
            .zip(translations)
            .map(|(paragraph, translation)| OverlayItem {
                bbox: map_rect(
                    &region.to_global(&paragraph.bbox),
                    &source_monitor,
                    &output_monitor,
                ),
                text: translation.text,
                source_text: paragraph.text,
                placeholder: translation.placeholder,
            })
            .collect::<Vec<_>>();
        info!(
            "overlay ready: {} item(s) on {}",
            items.len(),
            output_monitor.label()
        );
        Ok(PipelineOutcome::Overlay(Overlay {
            monitor: output_monitor.index,
            region: map_region(&region, &source_monitor, &output_monitor),
            backend: request.backend,
            items,
        }))
    }
}

pub struct PipelineHandle {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<Result<PipelineOutcome, PipelineError>>,
}

impl PipelineHandle {
    /// Has no effect once OCR has started.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<PipelineOutcome, PipelineError> {
        self.task.await?
    }
}
