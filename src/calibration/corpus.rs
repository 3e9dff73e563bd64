use anyhow::{Context, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::languages::{self, Language};

const PREFIX: &str = "paragraph_";

/// One ground-truth text and its two rendered benchmark images.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub language: &'static Language,
    pub reference: String,
    pub images: [PathBuf; 2],
}

impl CorpusEntry {
    pub fn load_images(&self) -> Result<[DynamicImage; 2]> {
        let [first, second] = &self.images;
        Ok([load_image(first)?, load_image(second)?])
    }
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed to open image: {}", path.display()))
}

pub fn text_file_name(language_name: &str) -> String {
    format!("{}{}.txt", PREFIX, language_name.replace(' ', "_"))
}

pub fn image_file_name(language_name: &str, index: usize) -> String {
    format!(
        "{}{}_{}.png",
        PREFIX,
        language_name.replace(' ', "_"),
        index
    )
}

/// A ground-truth paragraph for one language.
#[derive(Debug, Clone)]
pub struct ReferenceText {
    pub language: &'static Language,
    pub text: String,
}

/// Reads `paragraph_<Name>.txt` files in name order. Files naming an unknown
/// language are skipped with a warning.
pub fn load_references(text_dir: &Path) -> Result<Vec<ReferenceText>> {
    let mut text_files = std::fs::read_dir(text_dir)
        .with_context(|| format!("failed to read text dir: {}", text_dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "txt")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(PREFIX))
        })
        .collect::<Vec<_>>();
    text_files.sort();

    let mut references = Vec::new();
    for path in text_files {
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let name = stem.trim_start_matches(PREFIX).replace('_', " ");
        let Some(language) = languages::find(name.trim()) else {
            warn!("skipping {}: unknown language '{}'", path.display(), name);
            continue;
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read reference text: {}", path.display()))?;
        references.push(ReferenceText { language, text });
    }
    Ok(references)
}

/// Pairs each reference text with its `_1.png`/`_2.png` images. Languages
/// missing either image are skipped with a warning.
pub fn load_corpus(text_dir: &Path, image_dir: &Path) -> Result<Vec<CorpusEntry>> {
    Ok(load_references(text_dir)?
        .into_iter()
        .filter_map(|reference| {
            let images = [
                image_dir.join(image_file_name(reference.language.name, 1)),
                image_dir.join(image_file_name(reference.language.name, 2)),
            ];
            if images.iter().any(|image| !image.exists()) {
                warn!(
                    "image files not found for {}; skipping",
                    reference.language.name
                );
                return None;
            }
            Some(CorpusEntry {
                language: reference.language,
                reference: reference.text,
                images,
            })
        })
        .collect())
}
