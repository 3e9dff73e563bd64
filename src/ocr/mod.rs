pub mod debug;
mod engine;
pub mod paragraph;
pub mod preprocess;

use anyhow::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::geometry::BBox;

pub use debug::DebugSnapshots;
pub use engine::{GoogleVision, Tesseract, list_tesseract_languages};
pub use paragraph::{GroupingThresholds, full_text, reconstruct, retain_tokens};
pub use preprocess::{BlurKind, PreprocessConfig, PreprocessTable, Preprocessor, ThresholdMethod};

/// A single recognized word, in source-image pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub bbox: BBox,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub text: String,
    pub bbox: BBox,
}

impl Paragraph {
    pub(crate) fn from_token(token: &Token) -> Self {
        Self {
            text: token.text.clone(),
            bbox: token.bbox,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OcrOutput {
    pub full_text: String,
    pub paragraphs: Vec<Paragraph>,
}

impl OcrOutput {
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty() && self.full_text.trim().is_empty()
    }
}

pub type DocumentFuture = Pin<Box<dyn Future<Output = Result<OcrOutput>> + Send>>;

/// Engine emitting word tokens in reading order; paragraphs are rebuilt locally.
pub trait TokenOcr: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, image: &DynamicImage, language_code: &str) -> Result<Vec<Token>>;
}

/// Engine that performs its own layout grouping and returns paragraphs.
pub trait DocumentOcr: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract_document(&self, image: &DynamicImage) -> DocumentFuture;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMethod {
    Tesseract,
    GoogleVision,
}

impl OcrMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMethod::Tesseract => "tesseract",
            OcrMethod::GoogleVision => "google_vision",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecognizeOptions {
    pub preprocess: bool,
    pub thresholds: GroupingThresholds,
}

impl Default for RecognizeOptions {
    fn default() -> Self {
        Self {
            preprocess: true,
            thresholds: GroupingThresholds::default(),
        }
    }
}

/// The two OCR backend shapes. Failures never escape [`OcrBackend::recognize`].
#[derive(Clone)]
pub enum OcrBackend {
    Local(Arc<dyn TokenOcr>),
    Cloud(Arc<dyn DocumentOcr>),
}

impl std::fmt::Debug for OcrBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcrBackend::Local(engine) => write!(f, "Local({})", engine.name()),
            OcrBackend::Cloud(engine) => write!(f, "Cloud({})", engine.name()),
        }
    }
}

impl OcrBackend {
    pub fn method(&self) -> OcrMethod {
        match self {
            OcrBackend::Local(_) => OcrMethod::Tesseract,
            OcrBackend::Cloud(_) => OcrMethod::GoogleVision,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OcrBackend::Local(engine) => engine.name(),
            OcrBackend::Cloud(engine) => engine.name(),
        }
    }

    /// Reads paragraphs from `image`. The local engine runs on the blocking
    /// pool; the cloud engine receives the unprocessed image.
    pub async fn recognize(
        &self,
        image: DynamicImage,
        language_code: &str,
        preprocessor: &Preprocessor,
        options: RecognizeOptions,
    ) -> OcrOutput {
        let result = match self {
            OcrBackend::Local(engine) => {
                let engine = Arc::clone(engine);
                let preprocessor = options.preprocess.then(|| preprocessor.clone());
                let code = language_code.to_string();
                tokio::task::spawn_blocking(move || {
                    recognize_local(
                        engine.as_ref(),
                        &image,
                        &code,
                        preprocessor.as_ref(),
                        &options.thresholds,
                    )
                })
                .await
                .map_err(anyhow::Error::from)
                .and_then(|result| result)
            }
            OcrBackend::Cloud(engine) => engine.extract_document(&image).await,
        };

        match result {
            Ok(output) => {
                debug!(
                    "{} produced {} paragraph(s)",
                    self.name(),
                    output.paragraphs.len()
                );
                output
            }
            Err(err) => {
                warn!("{} OCR failed: {:#}", self.name(), err);
                OcrOutput::default()
            }
        }
    }
}

/// Preprocesses (when a preprocessor is given) and reads paragraphs locally.
pub fn recognize_local(
    engine: &dyn TokenOcr,
    image: &DynamicImage,
    language_code: &str,
    preprocessor: Option<&Preprocessor>,
    thresholds: &GroupingThresholds,
) -> Result<OcrOutput> {
    match preprocessor {
        Some(preprocessor) => {
            let processed = preprocessor.process(image, language_code)?;
            read_local(
                engine,
                &DynamicImage::ImageLuma8(processed),
                language_code,
                thresholds,
            )
        }
        None => read_local(engine, image, language_code, thresholds),
    }
}

/// Runs the token engine on an already prepared image and groups the result.
pub fn read_local(
    engine: &dyn TokenOcr,
    image: &DynamicImage,
    language_code: &str,
    thresholds: &GroupingThresholds,
) -> Result<OcrOutput> {
    let tokens = retain_tokens(engine.extract(image, language_code)?);
    let paragraphs = reconstruct(&tokens, thresholds);
    Ok(OcrOutput {
        full_text: full_text(&paragraphs, language_code),
        paragraphs,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Token engine returning a fixed token list.
    pub(crate) struct FixedTokens {
        pub(crate) tokens: Vec<Token>,
        pub(crate) calls: AtomicUsize,
    }

    impl FixedTokens {
        pub(crate) fn new(tokens: Vec<Token>) -> Self {
            Self {
                tokens,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TokenOcr for FixedTokens {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn extract(&self, _image: &DynamicImage, _language_code: &str) -> Result<Vec<Token>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tokens.clone())
        }
    }

    pub(crate) struct FailingTokens;

    impl TokenOcr for FailingTokens {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn extract(&self, _image: &DynamicImage, _language_code: &str) -> Result<Vec<Token>> {
            Err(anyhow!("engine offline"))
        }
    }

    pub(crate) struct FixedDocument(pub(crate) Result<OcrOutput, String>);

    impl DocumentOcr for FixedDocument {
        fn name(&self) -> &'static str {
            "fixed-document"
        }

        fn extract_document(&self, _image: &DynamicImage) -> DocumentFuture {
            let result = self.0.clone().map_err(|message| anyhow!(message));
            Box::pin(async move { result })
        }
    }

    pub(crate) fn token(text: &str, x: i32, y: i32, width: i32, height: i32) -> Token {
        Token {
            text: text.to_string(),
            bbox: BBox::new(x, y, width, height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use image::{GrayImage, Luma};

    fn blank() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([255])))
    }

    #[tokio::test]
    async fn local_backend_groups_tokens() {
        let engine = FixedTokens::new(vec![
            token("Hello", 0, 0, 50, 20),
            token("", 55, 0, 5, 20),
            token("world", 60, 0, 50, 20),
            token("Later", 0, 300, 50, 20),
        ]);
        let backend = OcrBackend::Local(Arc::new(engine));
        let output = backend
            .recognize(
                blank(),
                "eng",
                &Preprocessor::default(),
                RecognizeOptions::default(),
            )
            .await;
        assert_eq!(output.full_text, "Hello world Later");
        assert_eq!(output.paragraphs.len(), 2);
        assert_eq!(output.paragraphs[0].bbox, BBox::new(0, 0, 110, 20));
    }

    #[tokio::test]
    async fn failures_become_empty_output() {
        let local = OcrBackend::Local(Arc::new(FailingTokens));
        let output = local
            .recognize(
                blank(),
                "eng",
                &Preprocessor::default(),
                RecognizeOptions::default(),
            )
            .await;
        assert!(output.is_empty());

        let cloud = OcrBackend::Cloud(Arc::new(FixedDocument(Err("403".to_string()))));
        let output = cloud
            .recognize(
                blank(),
                "eng",
                &Preprocessor::default(),
                RecognizeOptions::default(),
            )
            .await;
        assert_eq!(output, OcrOutput::default());
    }

    #[tokio::test]
    async fn cloud_paragraphs_bypass_reconstruction() {
        let document = OcrOutput {
            full_text: "A\nB".to_string(),
            paragraphs: vec![
                Paragraph {
                    text: "A".to_string(),
                    bbox: BBox::new(0, 0, 10, 10),
                },
                Paragraph {
                    text: "B".to_string(),
                    bbox: BBox::new(12, 0, 10, 10),
                },
            ],
        };
        let cloud = OcrBackend::Cloud(Arc::new(FixedDocument(Ok(document.clone()))));
        let output = cloud
            .recognize(
                blank(),
                "eng",
                &Preprocessor::default(),
                RecognizeOptions::default(),
            )
            .await;
        assert_eq!(output, document);
        assert_eq!(cloud.method(), OcrMethod::GoogleVision);
    }
}
