use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibration::{CalibrationTable, TRANSLATION_PAUSE};
use crate::ocr::{GroupingThresholds, OcrMethod, PreprocessConfig, PreprocessTable};
use crate::paths;
use crate::providers::{BackendKind, DEEPL_FREE_ENDPOINT};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub ocr_method: OcrMethod,
    pub tesseract_path: PathBuf,
    pub tesseract_psm: Option<u32>,
    pub preprocess: bool,
    pub debug: bool,
    pub debug_dir: Option<PathBuf>,
    pub grouping: GroupingThresholds,
    pub backend: BackendKind,
    pub target_language: String,
    pub deepl_endpoint: String,
    pub placeholder: String,
    pub concurrency: usize,
    pub image_dir: PathBuf,
    pub text_dir: PathBuf,
    pub table_output: PathBuf,
    pub ocr_benchmark_output: PathBuf,
    pub translation_benchmark_output: PathBuf,
    /// Wait between translation benchmark requests.
    pub translation_pause: Duration,
    pub workers: Option<usize>,
    /// Calibration table layered over the built-in preprocessing table.
    pub calibration_table: Option<PathBuf>,
    pub preprocess_overrides: BTreeMap<String, PreprocessConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ocr_method: OcrMethod::Tesseract,
            tesseract_path: PathBuf::from("tesseract"),
            tesseract_psm: None,
            preprocess: true,
            debug: false,
            debug_dir: None,
            grouping: GroupingThresholds::default(),
            backend: BackendKind::Google,
            target_language: "English".to_string(),
            deepl_endpoint: DEEPL_FREE_ENDPOINT.to_string(),
            placeholder: "[translation unavailable]".to_string(),
            concurrency: 4,
            image_dir: PathBuf::from("benchmark_test_images"),
            text_dir: PathBuf::from("benchmark_test_texts"),
            table_output: PathBuf::from("calibration/preprocess_table.toml"),
            ocr_benchmark_output: PathBuf::from("calibration/ocr_benchmark.json"),
            translation_benchmark_output: PathBuf::from("calibration/translation_benchmark.json"),
            translation_pause: TRANSLATION_PAUSE,
            workers: None,
            calibration_table: None,
            preprocess_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrSettings>,
    translation: Option<TranslationSettings>,
    calibration: Option<CalibrationSettings>,
    preprocess: Option<BTreeMap<String, PreprocessConfig>>,
    calibration_table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    backend: Option<OcrMethod>,
    tesseract_path: Option<String>,
    tesseract_psm: Option<u32>,
    preprocess: Option<bool>,
    debug: Option<bool>,
    debug_dir: Option<String>,
    grouping: Option<GroupingSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct GroupingSettings {
    vertical: Option<i32>,
    horizontal: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSettings {
    backend: Option<BackendKind>,
    target: Option<String>,
    deepl_endpoint: Option<String>,
    placeholder: Option<String>,
    concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct CalibrationSettings {
    image_dir: Option<String>,
    text_dir: Option<String>,
    table_output: Option<String>,
    ocr_benchmark_output: Option<String>,
    translation_benchmark_output: Option<String>,
    translation_pause_ms: Option<u64>,
    workers: Option<usize>,
}

/// Layers `./settings.toml`, `./settings.local.toml`, the home copies of both
/// and finally `extra_path`, later files winning key by key.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = paths::settings_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }
    load_layers(&ordered_paths)
}

/// Merges every existing file of `paths` over the defaults, in order.
pub fn load_layers(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    for path in paths {
        if !path.exists() {
            continue;
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        let parsed: SettingsFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        settings.merge(parsed);
    }
    Ok(settings)
}

impl Settings {
    /// Built-in table, then the calibration table, then `[preprocess.*]` entries.
    pub fn preprocess_table(&self) -> Result<PreprocessTable> {
        let mut table = PreprocessTable::builtin();
        if let Some(path) = &self.calibration_table {
            if path.exists() {
                let calibration = CalibrationTable::load(path)?;
                table = table.with_calibration(&calibration);
            } else {
                tracing::warn!("calibration table not found: {}", path.display());
            }
        }
        Ok(table.with_overrides(self.preprocess_overrides.iter()))
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(method) = ocr.backend {
                self.ocr_method = method;
            }
            if let Some(path) = non_blank(ocr.tesseract_path) {
                self.tesseract_path = PathBuf::from(path);
            }
            if let Some(psm) = ocr.tesseract_psm {
                self.tesseract_psm = Some(psm);
            }
            if let Some(preprocess) = ocr.preprocess {
                self.preprocess = preprocess;
            }
            if let Some(debug) = ocr.debug {
                self.debug = debug;
            }
            if let Some(dir) = ocr.debug_dir.as_deref().and_then(paths::normalize_dir) {
                self.debug_dir = Some(dir);
            }
            if let Some(grouping) = ocr.grouping {
                if let Some(vertical) = grouping.vertical.filter(|v| *v > 0) {
                    self.grouping.vertical = vertical;
                }
                if let Some(horizontal) = grouping.horizontal.filter(|v| *v > 0) {
                    self.grouping.horizontal = horizontal;
                }
            }
        }
        if let Some(translation) = incoming.translation {
            if let Some(backend) = translation.backend {
                self.backend = backend;
            }
            if let Some(target) = non_blank(translation.target) {
                self.target_language = target;
            }
            if let Some(endpoint) = non_blank(translation.deepl_endpoint) {
                self.deepl_endpoint = endpoint;
            }
            if let Some(placeholder) = non_blank(translation.placeholder) {
                self.placeholder = placeholder;
            }
            if let Some(concurrency) = translation.concurrency.filter(|n| *n > 0) {
                self.concurrency = concurrency;
            }
        }
        if let Some(calibration) = incoming.calibration {
            let dir = |value: Option<String>| value.as_deref().and_then(paths::normalize_dir);
            if let Some(path) = dir(calibration.image_dir) {
                self.image_dir = path;
            }
            if let Some(path) = dir(calibration.text_dir) {
                self.text_dir = path;
            }
            if let Some(path) = dir(calibration.table_output) {
                self.table_output = path;
            }
            if let Some(path) = dir(calibration.ocr_benchmark_output) {
                self.ocr_benchmark_output = path;
            }
            if let Some(path) = dir(calibration.translation_benchmark_output) {
                self.translation_benchmark_output = path;
            }
            if let Some(pause) = calibration.translation_pause_ms {
                self.translation_pause = Duration::from_millis(pause);
            }
            if let Some(workers) = calibration.workers.filter(|n| *n > 0) {
                self.workers = Some(workers);
            }
        }
        if let Some(path) = incoming
            .calibration_table
            .as_deref()
            .and_then(paths::normalize_dir)
        {
            self.calibration_table = Some(path);
        }
        if let Some(preprocess) = incoming.preprocess {
            self.preprocess_overrides.extend(preprocess);
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = paths::settings_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{BlurKind, ThresholdMethod};
    use tempfile::tempdir;

    #[test]
    fn embedded_defaults_match_builtin_defaults() {
        let parsed: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML).unwrap();
        let mut settings = Settings::default();
        settings.merge(parsed);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn later_layers_override_earlier_keys() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("settings.toml");
        let local = dir.path().join("settings.local.toml");
        fs::write(
            &base,
            r#"
[ocr]
backend = "google_vision"
tesseract_psm = 6

[ocr.grouping]
vertical = 30

[translation]
backend = "deepl"
target = "Japanese"
"#,
        )
        .unwrap();
        fs::write(
            &local,
            r#"
[translation]
target = "  "
concurrency = 8

[calibration]
translation_pause_ms = 0

[ocr.grouping]
horizontal = 80
"#,
        )
        .unwrap();

        let missing = dir.path().join("missing.toml");
        let settings = load_layers(&[base, missing, local]).unwrap();
        assert_eq!(settings.ocr_method, OcrMethod::GoogleVision);
        assert_eq!(settings.tesseract_psm, Some(6));
        assert_eq!(settings.backend, BackendKind::DeepL);
        assert_eq!(settings.target_language, "Japanese");
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.translation_pause, Duration::ZERO);
        assert_eq!(
            settings.grouping,
            GroupingThresholds {
                vertical: 30,
                horizontal: 80
            }
        );
    }

    #[test]
    fn invalid_toml_reports_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[ocr\nbackend = ").unwrap();
        let err = load_layers(&[path]).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));
    }

    #[test]
    fn preprocess_table_layers_calibration_then_overrides() {
        let dir = tempdir().unwrap();
        let calibration_path = dir.path().join("table.toml");
        fs::write(
            &calibration_path,
            r#"
[languages.jpn]
language = "Japanese"
accuracy = 91.0
accuracy_image_1 = 90.0
accuracy_image_2 = 92.0
seconds = 12.5

[languages.jpn.config]
contrast = 1.4
invert = true

[languages.kor]
language = "Korean"
accuracy = 80.0
accuracy_image_1 = 80.0
accuracy_image_2 = 80.0
seconds = 3.0

[languages.kor.config]
blur = "gaussian"
"#,
        )
        .unwrap();
        let settings_path = dir.path().join("settings.toml");
        fs::write(
            &settings_path,
            format!(
                r#"
calibration_table = "{}"

[preprocess.kor]
threshold = {{ method = "otsu" }}
"#,
                calibration_path.display()
            ),
        )
        .unwrap();

        let settings = load_layers(&[settings_path]).unwrap();
        let table = settings.preprocess_table().unwrap();
        assert_eq!(table.get("jpn").contrast, 1.4);
        assert!(table.get("jpn").invert);
        assert_eq!(table.get("kor").threshold, ThresholdMethod::Otsu);
        assert_eq!(table.get("kor").blur, BlurKind::None);
        assert_eq!(table.get("eng"), &PreprocessConfig::default());
    }

    #[test]
    fn missing_calibration_table_falls_back_to_builtin() {
        let settings = Settings {
            calibration_table: Some(PathBuf::from("/nonexistent/table.toml")),
            ..Settings::default()
        };
        let table = settings.preprocess_table().unwrap();
        assert_eq!(table, PreprocessTable::builtin());
    }
}
