use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::preprocess::Stage;
use crate::paths;

/// Writes a PNG after each preprocessing stage. Failures are logged only.
#[derive(Debug, Clone)]
pub struct DebugSnapshots {
    output_dir: PathBuf,
    prefix: String,
}

impl DebugSnapshots {
    pub fn new(dir: Option<&Path>, prefix: Option<&str>) -> Result<Self> {
        let output_dir = dir.map(Path::to_path_buf).unwrap_or_else(paths::debug_dir);
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create debug dir: {}", output_dir.display()))?;
        Ok(Self {
            output_dir,
            prefix: prefix.map(sanitize_filename_component).unwrap_or_default(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn path_for(&self, stage: Stage) -> PathBuf {
        if self.prefix.is_empty() {
            self.output_dir.join(stage.file_name())
        } else {
            self.output_dir
                .join(format!("{}_{}", self.prefix, stage.file_name()))
        }
    }

    pub(crate) fn save(&self, stage: Stage, image: &GrayImage) {
        let path = self.path_for(stage);
        match image.save(&path) {
            Ok(()) => debug!("wrote debug snapshot {}", path.display()),
            Err(err) => warn!("failed to write debug snapshot {}: {}", path.display(), err),
        }
    }

    pub(crate) fn save_color(&self, stage: Stage, image: &DynamicImage) {
        let path = self.path_for(stage);
        match image.to_rgba8().save(&path) {
            Ok(()) => debug!("wrote debug snapshot {}", path.display()),
            Err(err) => warn!("failed to write debug snapshot {}: {}", path.display(), err),
        }
    }
}

fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else if ch.is_whitespace() {
            out.push('_');
        }
    }
    out
}
