use anyhow::{Context, Result, anyhow};
use image::DynamicImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use super::parse::parse_tsv_tokens;
use crate::ocr::{Token, TokenOcr};

/// Local OCR through the `tesseract` command line tool.
#[derive(Debug, Clone)]
pub struct Tesseract {
    binary: PathBuf,
    psm: Option<u32>,
}

impl Default for Tesseract {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            psm: None,
        }
    }
}

impl Tesseract {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            psm: None,
        }
    }

    pub fn with_psm(mut self, psm: Option<u32>) -> Self {
        self.psm = psm;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn run_tsv(&self, path: &Path, language_code: &str) -> Result<String> {
        let mut command = Command::new(&self.binary);
        command.arg(path).arg("stdout").arg("-l").arg(language_code);
        if let Some(psm) = self.psm {
            command.arg("--psm").arg(psm.to_string());
        }
        command.arg("tsv");
        let output = command.output().with_context(|| {
            format!("failed to run {} (is it installed?)", self.binary.display())
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("tesseract failed: {}", stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl TokenOcr for Tesseract {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn extract(&self, image: &DynamicImage, language_code: &str) -> Result<Vec<Token>> {
        let mut tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .with_context(|| "failed to create temp file for OCR")?;
        image
            .write_to(&mut tmp, image::ImageFormat::Png)
            .with_context(|| "failed to write temp image for OCR")?;
        tmp.flush().ok();

        let tsv = self.run_tsv(tmp.path(), language_code)?;
        let tokens = parse_tsv_tokens(&tsv);
        debug!(
            "tesseract returned {} word(s) for {}",
            tokens.len(),
            language_code
        );
        Ok(tokens)
    }
}

/// Language packs installed for `binary`, as reported by `--list-langs`.
pub fn list_tesseract_languages(binary: &Path) -> Result<Vec<String>> {
    let output = Command::new(binary)
        .arg("--list-langs")
        .output()
        .with_context(|| format!("failed to run {} --list-langs", binary.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn missing_binary_is_an_error() {
        let engine = Tesseract::new("/nonexistent/tesseract-binary");
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([255])));
        let err = engine.extract(&image, "eng").unwrap_err();
        assert!(err.to_string().contains("is it installed"));
        assert!(list_tesseract_languages(engine.binary()).is_err());
    }
}
