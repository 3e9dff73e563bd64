use anyhow::{Context, anyhow};
use serde_json::Value;
use tracing::debug;

use super::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};
use super::{BackendKind, TranslateFuture, TranslationBackend};
use crate::languages::Language;

const BASE_URL: &str = "https://translate.googleapis.com/translate_a/single";

/// Keyless Google Translate web endpoint. Every table language is supported.
#[derive(Debug, Clone)]
pub struct GoogleTranslate {
    endpoint: String,
    client: reqwest::Client,
}

impl Default for GoogleTranslate {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleTranslate {
    pub fn new() -> Self {
        Self {
            endpoint: BASE_URL.to_string(),
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

impl TranslationBackend for GoogleTranslate {
    fn kind(&self) -> BackendKind {
        BackendKind::Google
    }

    fn supports(&self, _language: &Language) -> bool {
        true
    }

    fn translate(
        &self,
        text: &str,
        target: &Language,
        source: Option<&Language>,
    ) -> TranslateFuture {
        let client = self.client.clone();
        let url = self.endpoint.clone();
        let query = vec![
            ("client", "gtx".to_string()),
            ("sl", source.map_or("auto", |lang| lang.google).to_string()),
            ("tl", target.google.to_string()),
            ("dt", "t".to_string()),
            ("q", text.to_string()),
        ];
        Box::pin(async move {
            let mut attempt = 0usize;
            let mut delay = RATE_LIMIT_BASE_DELAY;
            loop {
                attempt += 1;
                let response = client
                    .get(&url)
                    .query(&query)
                    .send()
                    .await
                    .with_context(|| "failed to reach Google Translate")?;

                let status = response.status();
                let retry_after = retry_after(response.headers());
                let body = response
                    .text()
                    .await
                    .with_context(|| "failed to read Google Translate response")?;
                if status.is_success() {
                    let parsed = parse_gtx_response(&body)?;
                    if let Some(detected) = &parsed.detected_source {
                        debug!("Google Translate detected source '{}'", detected);
                    }
                    return Ok(parsed.text);
                }
                if is_rate_limited(status, &body) && attempt < RATE_LIMIT_MAX_RETRIES {
                    delay =
                        wait_with_backoff("Google Translate", attempt, delay, retry_after).await;
                    continue;
                }
                return Err(anyhow!(
                    "Google Translate error ({}): {}",
                    status,
                    body.trim()
                ));
            }
        })
    }
}

#[derive(Debug, PartialEq)]
pub(super) struct GtxTranslation {
    pub(super) text: String,
    pub(super) detected_source: Option<String>,
}

/// Response is a nested array: `[[[translated, original, ..], ..], null, "src", ..]`.
pub(super) fn parse_gtx_response(body: &str) -> anyhow::Result<GtxTranslation> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|err| anyhow!("failed to parse Google Translate response JSON: {}", err))?;
    let chunks = payload
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("no translation returned from Google Translate"))?;
    let text = chunks
        .iter()
        .filter_map(|chunk| chunk.get(0).and_then(Value::as_str))
        .collect::<String>();
    let detected_source = payload.get(2).and_then(Value::as_str).map(str::to_string);
    Ok(GtxTranslation {
        text,
        detected_source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::english;

    #[test]
    fn chunks_are_concatenated() {
        let body = r#"[[["Hello world. ","Hola mundo. ",null,null,10],["Goodbye","Adiós",null,null,10]],null,"es",null,null,null,1.0]"#;
        let parsed = parse_gtx_response(body).unwrap();
        assert_eq!(
            parsed,
            GtxTranslation {
                text: "Hello world. Goodbye".to_string(),
                detected_source: Some("es".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn cut_off_body_is_reported() {
        let url = crate::providers::testing::truncated_body_server();
        let google = GoogleTranslate::new().with_endpoint(url);
        let err = google.translate("hola", english(), None).await.unwrap_err();
        assert!(
            format!("{:#}", err).contains("failed to read Google Translate response"),
            "{:#}",
            err
        );
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(parse_gtx_response("<html>").is_err());
        assert!(parse_gtx_response("[null]").is_err());
    }
}
