use anyhow::{Result, anyhow};
use image::{DynamicImage, GrayImage, Luma};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use overlay_translator::languages::{self, Language};
use overlay_translator::ocr::{Preprocessor, TokenOcr};
use overlay_translator::providers::{TranslateFuture, TranslationBackend};
use overlay_translator::{
    BBox, BackendKind, CaptureRequest, ImageCapture, MonitorSpec, Monitors, OcrBackend, Pipeline,
    PipelineOutcome, Region, Token, TranslationRouter,
};

struct ScriptedOcr(Vec<Token>);

impl TokenOcr for ScriptedOcr {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn extract(&self, _image: &DynamicImage, _language_code: &str) -> Result<Vec<Token>> {
        Ok(self.0.clone())
    }
}

/// Upper-cases text; refuses anything containing a non-ASCII character.
struct AsciiShout;

impl TranslationBackend for AsciiShout {
    fn kind(&self) -> BackendKind {
        BackendKind::Google
    }

    fn supports(&self, _language: &Language) -> bool {
        true
    }

    fn translate(
        &self,
        text: &str,
        _target: &Language,
        _source: Option<&Language>,
    ) -> TranslateFuture {
        let result = if text.is_ascii() {
            Ok(text.to_uppercase())
        } else {
            Err(anyhow!("cannot shout '{}'", text))
        };
        Box::pin(async move { result })
    }
}

fn token(text: &str, x: i32, y: i32, width: i32, height: i32) -> Token {
    Token {
        text: text.to_string(),
        bbox: BBox::new(x, y, width, height),
    }
}

fn dual_monitor_pipeline(tokens: Vec<Token>) -> Pipeline {
    let desktop = DynamicImage::ImageLuma8(GrayImage::from_pixel(1920, 1080, Luma([255])));
    Pipeline::new(
        Arc::new(ImageCapture::new(desktop)),
        OcrBackend::Local(Arc::new(ScriptedOcr(tokens))),
        TranslationRouter::new().with_backend(Arc::new(AsciiShout)),
        Preprocessor::default(),
        Monitors::new(vec![
            MonitorSpec {
                index: 0,
                width: 1920,
                height: 1080,
                origin_x: 0,
                origin_y: 0,
            },
            MonitorSpec {
                index: 1,
                width: 3840,
                height: 2160,
                origin_x: 1920,
                origin_y: 0,
            },
        ]),
    )
}

fn spanish_capture(output_monitor: Option<usize>) -> CaptureRequest {
    CaptureRequest {
        region: Region {
            top: 100,
            left: 100,
            width: 200,
            height: 80,
        },
        source: languages::resolve("Spanish").unwrap(),
        target: languages::english(),
        backend: BackendKind::Google,
        output_monitor,
    }
}

#[tokio::test]
async fn overlay_on_larger_monitor_snapshot() {
    let pipeline = dual_monitor_pipeline(vec![
        token("Hola", 0, 0, 50, 20),
        token("mundo", 60, 0, 50, 20),
        token("Adiós", 0, 70, 40, 10),
    ]);
    let outcome = pipeline
        .run(&spanish_capture(Some(1)), &AtomicBool::new(false))
        .await
        .unwrap();

    insta::assert_json_snapshot!(outcome, @r###"
    {
      "outcome": "overlay",
      "monitor": 1,
      "region": {
        "x": 2120,
        "y": 200,
        "width": 400,
        "height": 160
      },
      "backend": "google",
      "items": [
        {
          "text": "HOLA MUNDO",
          "source_text": "Hola mundo",
          "bbox": {
            "x": 2120,
            "y": 200,
            "width": 220,
            "height": 40
          }
        },
        {
          "text": "[translation unavailable]",
          "source_text": "Adiós",
          "bbox": {
            "x": 2120,
            "y": 340,
            "width": 80,
            "height": 20
          },
          "placeholder": true
        }
      ]
    }
    "###);
}

#[tokio::test]
async fn spawned_run_can_be_cancelled_before_ocr() {
    let pipeline = Arc::new(dual_monitor_pipeline(vec![token("Hola", 0, 0, 50, 20)]));
    let handle = pipeline.spawn(spanish_capture(None));
    handle.cancel();
    let outcome = handle.join().await.unwrap();
    // The run may already be past the last cancellation point.
    assert!(matches!(
        outcome,
        PipelineOutcome::Cancelled | PipelineOutcome::Overlay(_)
    ));
}

#[tokio::test]
async fn blank_capture_reports_no_text() {
    let pipeline = dual_monitor_pipeline(vec![token("  ", 0, 0, 50, 20)]);
    let outcome = pipeline
        .run(&spanish_capture(None), &AtomicBool::new(false))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::NoTextDetected);
    insta::assert_json_snapshot!(outcome, @r###"
    {
      "outcome": "no_text_detected"
    }
    "###);
}
