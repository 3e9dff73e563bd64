use anyhow::{Context, Result};
use image::DynamicImage;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::accuracy::score;
use super::cpu::CpuSampler;
use crate::ocr::preprocess::apply;
use crate::ocr::{
    BlurKind, GroupingThresholds, PreprocessConfig, ThresholdMethod, TokenOcr, read_local,
};

/// Candidate values per knob. Variants are the full cross product.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSpace {
    pub contrast: Vec<f32>,
    pub denoise: Vec<Option<f32>>,
    pub invert: Vec<bool>,
    pub threshold: Vec<ThresholdMethod>,
    pub blur: Vec<BlurKind>,
}

impl Default for VariantSpace {
    fn default() -> Self {
        Self {
            contrast: vec![1.0, 1.2, 1.4],
            denoise: vec![None, Some(1.0), Some(3.0), Some(9.0)],
            invert: vec![false, true],
            threshold: vec![
                ThresholdMethod::None,
                ThresholdMethod::Otsu,
                ThresholdMethod::AdaptiveGaussian {
                    block_size: 15,
                    c: 4,
                },
                ThresholdMethod::AdaptiveMean {
                    block_size: 11,
                    c: 2,
                },
            ],
            blur: vec![BlurKind::None, BlurKind::Gaussian, BlurKind::Median],
        }
    }
}

impl VariantSpace {
    /// Nesting order, outermost first: contrast, denoise, invert, threshold, blur.
    pub fn variants(&self) -> Vec<PreprocessConfig> {
        let mut variants = Vec::with_capacity(self.len());
        for &contrast in &self.contrast {
            for &denoise in &self.denoise {
                for &invert in &self.invert {
                    for &threshold in &self.threshold {
                        for &blur in &self.blur {
                            variants.push(PreprocessConfig {
                                contrast,
                                denoise,
                                invert,
                                blur,
                                threshold,
                            });
                        }
                    }
                }
            }
        }
        variants
    }

    pub fn len(&self) -> usize {
        self.contrast.len()
            * self.denoise.len()
            * self.invert.len()
            * self.threshold.len()
            * self.blur.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scores of one variant over both benchmark images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub config: PreprocessConfig,
    pub accuracy: [f64; 2],
    pub average: f64,
    pub outputs: [String; 2],
    /// Wall time of preprocessing and OCR over both images.
    pub seconds: f64,
    /// Process CPU percent while this variant ran; `None` without `/proc`.
    pub cpu_avg: Option<f64>,
    pub cpu_peak: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub language_code: String,
    /// Average accuracy of the unprocessed images, when OCR succeeded on both.
    pub baseline: Option<f64>,
    pub best: Option<Evaluation>,
    pub evaluated: usize,
    pub failed: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

/// Picks the variant with the strictly highest average accuracy. Exact ties go
/// to the lower processing cost, then to the earlier candidate.
pub fn select_best<I>(evaluations: I) -> Option<Evaluation>
where
    I: IntoIterator<Item = Evaluation>,
{
    evaluations
        .into_iter()
        .fold(None, |best, candidate| match best {
            None => Some(candidate),
            Some(best) => {
                let better = candidate.average > best.average
                    || (candidate.average == best.average
                        && candidate.config.processing_cost() < best.config.processing_cost());
                Some(if better { candidate } else { best })
            }
        })
}

/// Offline sweep of preprocessing variants against ground-truth text.
pub struct ParameterSearch {
    engine: Arc<dyn TokenOcr>,
    space: VariantSpace,
    thresholds: GroupingThresholds,
    pool: rayon::ThreadPool,
}

impl ParameterSearch {
    /// `workers` defaults to the number of logical CPUs.
    pub fn new(
        engine: Arc<dyn TokenOcr>,
        space: VariantSpace,
        workers: Option<usize>,
    ) -> Result<Self> {
        let workers = workers.filter(|n| *n > 0).unwrap_or_else(num_cpus::get);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("calibration-{}", idx))
            .build()
            .with_context(|| "failed to build calibration thread pool")?;
        Ok(Self {
            engine,
            space,
            thresholds: GroupingThresholds::default(),
            pool,
        })
    }

    pub fn with_thresholds(mut self, thresholds: GroupingThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn space(&self) -> &VariantSpace {
        &self.space
    }

    fn read_text(&self, image: &DynamicImage, language_code: &str) -> Result<String> {
        Ok(read_local(self.engine.as_ref(), image, language_code, &self.thresholds)?.full_text)
    }

    /// Applies `config` to both images and scores the OCR text of each.
    pub fn evaluate(
        &self,
        config: &PreprocessConfig,
        images: &[DynamicImage; 2],
        language_code: &str,
        reference: &str,
    ) -> Result<Evaluation> {
        let sampler = CpuSampler::start();
        let started = Instant::now();
        let mut texts = Vec::with_capacity(2);
        for image in images {
            let processed = DynamicImage::ImageLuma8(apply(image, config, None)?);
            texts.push(self.read_text(&processed, language_code)?);
        }
        let seconds = started.elapsed().as_secs_f64();
        let cpu = sampler.stop();

        let accuracy = [score(&texts[0], reference), score(&texts[1], reference)];
        let outputs = [texts.remove(0), texts.remove(0)];
        Ok(Evaluation {
            config: *config,
            accuracy,
            average: (accuracy[0] + accuracy[1]) / 2.0,
            outputs,
            seconds,
            cpu_avg: cpu.map(|usage| usage.average),
            cpu_peak: cpu.map(|usage| usage.peak),
        })
    }

    fn baseline(
        &self,
        images: &[DynamicImage; 2],
        language_code: &str,
        reference: &str,
    ) -> Option<f64> {
        let mut total = 0.0;
        for image in images {
            match self.read_text(image, language_code) {
                Ok(text) => total += score(&text, reference),
                Err(err) => {
                    warn!("baseline OCR failed for {}: {:#}", language_code, err);
                    return None;
                }
            }
        }
        Some(total / 2.0)
    }

    /// Evaluates every variant in parallel, then reduces in candidate order.
    pub fn search(
        &self,
        images: &[DynamicImage; 2],
        language_code: &str,
        reference: &str,
    ) -> SearchOutcome {
        let started = Instant::now();
        let baseline = self.baseline(images, language_code, reference);
        let variants = self.space.variants();
        info!(
            "searching {} variant(s) for {} on {} thread(s)",
            variants.len(),
            language_code,
            self.pool.current_num_threads()
        );

        let results = self.pool.install(|| {
            variants
                .par_iter()
                .map(|config| self.evaluate(config, images, language_code, reference))
                .collect::<Vec<_>>()
        });

        let mut failed = 0usize;
        let evaluations = variants
            .iter()
            .zip(results)
            .filter_map(|(config, result)| match result {
                Ok(evaluation) => Some(evaluation),
                Err(err) => {
                    failed += 1;
                    debug!("variant {} failed: {:#}", config.label(), err);
                    None
                }
            })
            .collect::<Vec<_>>();
        let evaluated = evaluations.len();
        let best = select_best(evaluations);
        if failed > 0 {
            warn!("{} variant(s) failed for {}", failed, language_code);
        }
        SearchOutcome {
            language_code: language_code.to_string(),
            baseline,
            best,
            evaluated,
            failed,
            elapsed: started.elapsed(),
        }
    }
}

pub(crate) mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub(crate) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
