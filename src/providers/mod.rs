use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::languages::Language;

mod deepl;
mod google;
pub(crate) mod retry;

pub use deepl::{DEEPL_FREE_ENDPOINT, DeepL, DeepLLanguage, missing_languages};
pub use google::GoogleTranslate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Google,
    DeepL,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Google, BackendKind::DeepL];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Google => "google",
            BackendKind::DeepL => "deepl",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" | "google_translate" => Some(BackendKind::Google),
            "deepl" => Some(BackendKind::DeepL),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type TranslateFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

pub trait TranslationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    fn supports(&self, language: &Language) -> bool;
    /// `source` is `None` when the backend should detect it.
    fn translate(
        &self,
        text: &str,
        target: &Language,
        source: Option<&Language>,
    ) -> TranslateFuture;
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("{backend} does not support {language}")]
    UnsupportedLanguage {
        backend: BackendKind,
        language: &'static str,
    },
    #[error("translation backend '{0}' is not configured")]
    UnknownBackend(BackendKind),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationResult {
    pub text: String,
    pub backend_used: BackendKind,
    /// Set when `text` is the placeholder for a failed item.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
}

/// Explicitly selected translation backends. There is no fallback between them.
#[derive(Clone, Default)]
pub struct TranslationRouter {
    backends: Vec<Arc<dyn TranslationBackend>>,
}

impl fmt::Debug for TranslationRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

impl TranslationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `backend`, replacing one already registered for the same kind.
    pub fn register(&mut self, backend: Arc<dyn TranslationBackend>) {
        self.backends
            .retain(|existing| existing.kind() != backend.kind());
        self.backends.push(backend);
    }

    pub fn with_backend(mut self, backend: Arc<dyn TranslationBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|backend| backend.kind()).collect()
    }

    fn backend(&self, kind: BackendKind) -> Option<&Arc<dyn TranslationBackend>> {
        self.backends.iter().find(|backend| backend.kind() == kind)
    }

    pub fn supports(
        &self,
        kind: BackendKind,
        target: &Language,
        source: Option<&Language>,
    ) -> bool {
        self.check(kind, target, source).is_ok()
    }

    fn check(
        &self,
        kind: BackendKind,
        target: &Language,
        source: Option<&Language>,
    ) -> Result<&Arc<dyn TranslationBackend>, TranslateError> {
        let backend = self
            .backend(kind)
            .ok_or(TranslateError::UnknownBackend(kind))?;
        for language in std::iter::once(target).chain(source) {
            if !backend.supports(language) {
                return Err(TranslateError::UnsupportedLanguage {
                    backend: kind,
                    language: language.name,
                });
            }
        }
        Ok(backend)
    }

    pub async fn translate(
        &self,
        text: &str,
        target: &Language,
        source: Option<&Language>,
        kind: BackendKind,
    ) -> Result<TranslationResult, TranslateError> {
        let backend = self.check(kind, target, source)?;
        let translated = backend.translate(text, target, source).await?;
        Ok(TranslationResult {
            text: translated,
            backend_used: kind,
            placeholder: false,
        })
    }

    /// One request per paragraph, at most `concurrency` in flight, output in
    /// input order. Failed items carry `placeholder` instead of a translation.
    pub async fn translate_paragraphs(
        &self,
        texts: &[String],
        target: &Language,
        source: Option<&Language>,
        kind: BackendKind,
        placeholder: &str,
        concurrency: usize,
    ) -> Vec<TranslationResult> {
        let results = stream::iter(0..texts.len())
            .map(|idx| {
                let text = texts[idx].as_str();
                async move {
                    match self.translate(text, target, source, kind).await {
                        Ok(result) => result,
                        Err(err) => {
                            warn!("translation of paragraph {} failed: {}", idx + 1, err);
                            TranslationResult {
                                text: placeholder.to_string(),
                                backend_used: kind,
                                placeholder: true,
                            }
                        }
                    }
                }
            })
            .buffered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        debug!(
            "{} translated {} paragraph(s) into {}",
            kind,
            results.len(),
            target.name
        );
        results
    }
}

pub const DEEPL_KEY_ENV: &str = "DEEPL_API_KEY";
pub const VISION_KEY_ENV: &str = "GOOGLE_VISION_API_KEY";

/// Explicit key first, then the environment variable `env`.
pub fn resolve_key(env: &str, override_key: Option<&str>) -> Option<String> {
    if let Some(key) = override_key
        && !key.trim().is_empty()
    {
        return Some(key.trim().to_string());
    }
    get_env(env)
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
