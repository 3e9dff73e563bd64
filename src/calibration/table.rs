use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::search::SearchOutcome;
use crate::ocr::{PreprocessConfig, PreprocessTable};

/// Best configuration found per OCR language code, as persisted to TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    #[serde(default)]
    pub languages: BTreeMap<String, CalibrationEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_accuracy: Option<f64>,
    pub accuracy: f64,
    pub accuracy_image_1: f64,
    pub accuracy_image_2: f64,
    /// Preprocessing plus OCR of both images with the chosen variant.
    pub seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_avg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_peak: Option<f64>,
    /// Wall time of the whole sweep for this language.
    #[serde(default)]
    pub search_seconds: f64,
    pub config: PreprocessConfig,
}

impl CalibrationTable {
    /// Stores the winner of `outcome`. Returns false when nothing succeeded.
    pub fn record(&mut self, language: &str, outcome: &SearchOutcome) -> bool {
        let Some(best) = &outcome.best else {
            return false;
        };
        self.languages.insert(
            outcome.language_code.clone(),
            CalibrationEntry {
                language: language.to_string(),
                baseline_accuracy: outcome.baseline,
                accuracy: best.average,
                accuracy_image_1: best.accuracy[0],
                accuracy_image_2: best.accuracy[1],
                seconds: best.seconds,
                cpu_avg: best.cpu_avg,
                cpu_peak: best.cpu_peak,
                search_seconds: outcome.elapsed.as_secs_f64(),
                config: best.config,
            },
        );
        true
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read calibration table: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse calibration table: {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create dir: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self)
            .with_context(|| "failed to serialize calibration table")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write calibration table: {}", path.display()))
    }
}

impl PreprocessTable {
    /// Copy of this table with every calibrated language replaced.
    pub fn with_calibration(&self, calibration: &CalibrationTable) -> Self {
        self.with_overrides(
            calibration
                .languages
                .iter()
                .map(|(code, entry)| (code, &entry.config)),
        )
    }
}
