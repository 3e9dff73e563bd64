use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

use super::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};
use super::{BackendKind, TranslateFuture, TranslationBackend};
use crate::languages::{LANGUAGES, Language};

pub const DEEPL_FREE_ENDPOINT: &str = "https://api-free.deepl.com/v2";

/// Table languages DeepL does not translate.
const UNSUPPORTED: &[&str] = &[
    "Hindi",
    "Bengali",
    "Vietnamese",
    "Hebrew",
    "Thai",
    "Malay",
    "Filipino",
    "Swahili",
];

#[derive(Debug, Clone)]
pub struct DeepL {
    key: String,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepLLanguage {
    pub language: String,
    pub name: String,
}

impl DeepL {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            endpoint: DEEPL_FREE_ENDPOINT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let endpoint = endpoint.trim().trim_end_matches('/');
        if !endpoint.is_empty() {
            self.endpoint = endpoint.to_string();
        }
        self
    }

    fn auth_header(&self) -> String {
        format!("DeepL-Auth-Key {}", self.key)
    }

    /// Target languages DeepL currently offers for this key.
    pub async fn fetch_supported_languages(&self) -> anyhow::Result<Vec<DeepLLanguage>> {
        let response = self
            .client
            .get(format!("{}/languages", self.endpoint))
            .query(&[("type", "target")])
            .header("Authorization", self.auth_header())
            .send()
            .await
            .with_context(|| "failed to reach DeepL")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| "failed to read DeepL languages response")?;
        if !status.is_success() {
            return Err(anyhow!("DeepL API error ({}): {}", status, body.trim()));
        }
        serde_json::from_str(&body)
            .map_err(|err| anyhow!("failed to parse DeepL languages JSON: {}", err))
    }
}

impl TranslationBackend for DeepL {
    fn kind(&self) -> BackendKind {
        BackendKind::DeepL
    }

    fn supports(&self, language: &Language) -> bool {
        language.deepl.is_some() && !UNSUPPORTED.contains(&language.name)
    }

    fn translate(
        &self,
        text: &str,
        target: &Language,
        source: Option<&Language>,
    ) -> TranslateFuture {
        let client = self.client.clone();
        let url = format!("{}/translate", self.endpoint);
        let auth = self.auth_header();
        let mut form = vec![("text", text.to_string())];
        if let Some(code) = target.deepl {
            form.push(("target_lang", code.to_string()));
        }
        if let Some(code) = source.and_then(|lang| lang.deepl) {
            form.push(("source_lang", code.to_string()));
        }
        let target_name = target.name;
        Box::pin(async move {
            if !form.iter().any(|(key, _)| *key == "target_lang") {
                return Err(anyhow!("DeepL has no code for {}", target_name));
            }
            let mut attempt = 0usize;
            let mut delay = RATE_LIMIT_BASE_DELAY;
            loop {
                attempt += 1;
                let response = client
                    .post(&url)
                    .header("Authorization", auth.clone())
                    .form(&form)
                    .send()
                    .await
                    .with_context(|| "failed to reach DeepL")?;

                let status = response.status();
                let retry_after = retry_after(response.headers());
                let body = response
                    .text()
                    .await
                    .with_context(|| "failed to read DeepL response")?;
                if status.is_success() {
                    return parse_translate_response(&body);
                }
                if is_rate_limited(status, &body) && attempt < RATE_LIMIT_MAX_RETRIES {
                    delay = wait_with_backoff("DeepL", attempt, delay, retry_after).await;
                    continue;
                }
                return Err(anyhow!("DeepL API error ({}): {}", status, body.trim()));
            }
        })
    }
}

fn parse_translate_response(body: &str) -> anyhow::Result<String> {
    #[derive(Deserialize)]
    struct TranslateResponse {
        translations: Vec<Translation>,
    }

    #[derive(Deserialize)]
    struct Translation {
        text: String,
    }

    let payload: TranslateResponse = serde_json::from_str(body)
        .map_err(|err| anyhow!("failed to parse DeepL response JSON: {}", err))?;
    payload
        .translations
        .into_iter()
        .next()
        .map(|translation| translation.text)
        .ok_or_else(|| anyhow!("no translation returned from DeepL"))
}

/// Table languages with no matching entry in DeepL's target list.
///
/// Regional variants such as `EN-GB` count for the base code `EN`.
pub fn missing_languages(supported: &[DeepLLanguage]) -> Vec<&'static Language> {
    LANGUAGES
        .iter()
        .filter(|language| {
            let code = language
                .deepl
                .map(str::to_string)
                .unwrap_or_else(|| language.google.to_ascii_uppercase());
            !supported.iter().any(|entry| {
                let offered = entry.language.to_ascii_uppercase();
                offered == code || offered.starts_with(&format!("{}-", code))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::resolve;

    #[tokio::test]
    async fn cut_off_bodies_are_reported() {
        let server = crate::providers::testing::truncated_body_server;
        let deepl = DeepL::new("key").with_endpoint(server());
        let err = deepl
            .translate("hallo", resolve("English").unwrap(), None)
            .await
            .unwrap_err();
        assert!(
            format!("{:#}", err).contains("failed to read DeepL response"),
            "{:#}",
            err
        );

        let deepl = DeepL::new("key").with_endpoint(server());
        let err = deepl.fetch_supported_languages().await.unwrap_err();
        assert!(
            format!("{:#}", err).contains("failed to read DeepL languages response"),
            "{:#}",
            err
        );
    }

    #[test]
    fn fixed_unsupported_list() {
        let deepl = DeepL::new("key");
        for name in UNSUPPORTED {
            assert!(!deepl.supports(resolve(name).unwrap()), "{}", name);
        }
        assert!(deepl.supports(resolve("German").unwrap()));
        assert!(deepl.supports(resolve("Norwegian").unwrap()));
        assert!(!deepl.supports(resolve("Chinese (Traditional)").unwrap()));
    }

    #[test]
    fn translation_text_is_extracted() {
        let body = r#"{"translations":[{"detected_source_language":"DE","text":"Hello"}]}"#;
        assert_eq!(parse_translate_response(body).unwrap(), "Hello");
        assert!(parse_translate_response(r#"{"translations":[]}"#).is_err());
    }

    #[test]
    fn endpoint_trailing_slash_is_dropped() {
        let deepl = DeepL::new("key").with_endpoint("https://api.deepl.com/v2/");
        assert_eq!(deepl.endpoint, "https://api.deepl.com/v2");
        assert_eq!(deepl.auth_header(), "DeepL-Auth-Key key");
    }

    #[test]
    fn audit_reports_languages_deepl_lacks() {
        let supported = ["EN-GB", "EN-US", "ES", "DE", "ZH-HANS", "PT-BR", "NB", "JA"]
            .iter()
            .map(|code| DeepLLanguage {
                language: code.to_string(),
                name: code.to_string(),
            })
            .collect::<Vec<_>>();
        let missing = missing_languages(&supported)
            .into_iter()
            .map(|lang| lang.name)
            .collect::<Vec<_>>();
        assert!(!missing.contains(&"English"));
        assert!(!missing.contains(&"Chinese (Simplified)"));
        assert!(!missing.contains(&"Portuguese"));
        assert!(!missing.contains(&"Norwegian"));
        assert!(missing.contains(&"French"));
        assert!(missing.contains(&"Hindi"));
        assert!(missing.contains(&"Chinese (Traditional)"));
    }
}
