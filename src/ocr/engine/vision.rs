use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::DynamicImage;
use serde::Deserialize;
use serde_json::json;
use std::io::Cursor;
use tracing::debug;

use crate::geometry::BBox;
use crate::ocr::{DocumentFuture, DocumentOcr, OcrOutput, Paragraph};

const ANNOTATE_URL: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Google Cloud Vision `DOCUMENT_TEXT_DETECTION`, keyed by API key.
#[derive(Debug, Clone)]
pub struct GoogleVision {
    key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl GoogleVision {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            endpoint: ANNOTATE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        if !endpoint.trim().is_empty() {
            self.endpoint = endpoint;
        }
        self
    }
}

impl DocumentOcr for GoogleVision {
    fn name(&self) -> &'static str {
        "google_vision"
    }

    fn extract_document(&self, image: &DynamicImage) -> DocumentFuture {
        let encoded = encode_png(image);
        let client = self.client.clone();
        let url = self.endpoint.clone();
        let key = self.key.clone();
        Box::pin(async move {
            let encoded = encoded?;
            let body = json!({
                "requests": [
                    {
                        "image": {"content": encoded},
                        "features": [{"type": "DOCUMENT_TEXT_DETECTION"}]
                    }
                ]
            });
            let response = client
                .post(&url)
                .query(&[("key", key.as_str())])
                .json(&body)
                .send()
                .await
                .with_context(|| "failed to reach Google Vision")?;
            let status = response.status();
            let text = response
                .text()
                .await
                .with_context(|| "failed to read Google Vision response")?;
            debug!("Google Vision responded with {}", status);
            if !status.is_success() {
                return Err(anyhow!(
                    "Google Vision API error ({}): {}",
                    status,
                    extract_vision_error(&text).unwrap_or(text)
                ));
            }
            parse_annotate_response(&text)
        })
    }
}

fn encode_png(image: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| "failed to encode image for Google Vision")?;
    Ok(BASE64.encode(&bytes))
}

/// Turns an `images:annotate` body into paragraphs, keeping the service's
/// own grouping. Paragraphs without a four-vertex box are skipped.
pub(super) fn parse_annotate_response(text: &str) -> Result<OcrOutput> {
    let payload: AnnotateResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Google Vision response JSON: {}", err))?;
    let Some(first) = payload.responses.into_iter().next() else {
        return Ok(OcrOutput::default());
    };
    if let Some(error) = first.error {
        return Err(anyhow!(
            "Google Vision error: {}",
            error.message.unwrap_or_else(|| "unknown error".to_string())
        ));
    }
    let Some(annotation) = first.full_text_annotation else {
        return Ok(OcrOutput::default());
    };

    let mut paragraphs = Vec::new();
    for block in annotation.pages.iter().flat_map(|page| &page.blocks) {
        for paragraph in &block.paragraphs {
            let vertices = &paragraph.bounding_box.vertices;
            if vertices.len() != 4 {
                continue;
            }
            let text = paragraph
                .words
                .iter()
                .map(|word| {
                    word.symbols
                        .iter()
                        .map(|symbol| symbol.text.as_str())
                        .collect::<String>()
                })
                .collect::<Vec<_>>()
                .join(" ");
            let (x, y) = (vertices[0].x, vertices[0].y);
            paragraphs.push(Paragraph {
                text: text.trim().to_string(),
                bbox: BBox::new(x, y, vertices[2].x - x, vertices[2].y - y),
            });
        }
    }

    Ok(OcrOutput {
        full_text: annotation.text,
        paragraphs,
    })
}

fn extract_vision_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<VisionError>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed.error?.message
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
struct AnnotateImageResponse {
    #[serde(rename = "fullTextAnnotation")]
    full_text_annotation: Option<TextAnnotation>,
    error: Option<VisionError>,
}

#[derive(Debug, Deserialize)]
struct VisionError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(default)]
    paragraphs: Vec<VisionParagraph>,
}

#[derive(Debug, Deserialize)]
struct VisionParagraph {
    #[serde(rename = "boundingBox", default)]
    bounding_box: BoundingPoly,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Default, Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

#[derive(Debug, Deserialize)]
struct Vertex {
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
}

#[derive(Debug, Deserialize)]
struct Word {
    #[serde(default)]
    symbols: Vec<Symbol>,
}

#[derive(Debug, Deserialize)]
struct Symbol {
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::{GoogleVision, parse_annotate_response};
    use crate::geometry::BBox;
    use crate::ocr::DocumentOcr;
    use insta::assert_json_snapshot;

    #[tokio::test]
    async fn cut_off_body_is_reported() {
        let url = crate::providers::testing::truncated_body_server();
        let vision = GoogleVision::new("key").with_endpoint(url);
        let image = image::DynamicImage::new_luma8(4, 4);
        let err = vision.extract_document(&image).await.unwrap_err();
        assert!(
            format!("{:#}", err).contains("failed to read Google Vision response"),
            "{:#}",
            err
        );
    }

    #[test]
    fn vision_paragraphs_snapshot() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/vision_document_response.json"
        ));
        let output = parse_annotate_response(payload).unwrap();
        assert_eq!(output.paragraphs.len(), 2);
        assert_eq!(output.paragraphs[1].bbox, BBox::new(0, 120, 150, 40));
        assert_json_snapshot!(output, @r###"
        {
          "full_text": "Hola mundo\nAdiós\n",
          "paragraphs": [
            {
              "text": "Hola mundo",
              "bbox": {
                "x": 10,
                "y": 20,
                "width": 190,
                "height": 30
              }
            },
            {
              "text": "Adiós",
              "bbox": {
                "x": 0,
                "y": 120,
                "width": 150,
                "height": 40
              }
            }
          ]
        }
        "###);
    }

    #[test]
    fn missing_annotation_is_empty() {
        let output = parse_annotate_response(r#"{"responses":[{}]}"#).unwrap();
        assert!(output.is_empty());
        let output = parse_annotate_response(r#"{}"#).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn per_image_error_is_reported() {
        let err = parse_annotate_response(
            r#"{"responses":[{"error":{"code":7,"message":"API key not valid"}}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("API key not valid"));
    }
}
