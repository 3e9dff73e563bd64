//! Offline tooling: accuracy scoring, the preprocessing parameter sweep and
//! the OCR/translation benchmarks over a ground-truth corpus.

pub mod accuracy;
pub mod benchmark;
pub mod corpus;
pub mod cpu;
pub mod search;
pub mod table;

pub use accuracy::{levenshtein, score};
pub use benchmark::{
    OcrBenchmark, OcrBenchmarkRecord, OcrBenchmarkSummary, TRANSLATION_PAUSE, TranslationBenchmark,
    TranslationBenchmarkRecord, write_records,
};
pub use corpus::{CorpusEntry, ReferenceText, load_corpus, load_references};
pub use cpu::{CpuSampler, CpuUsage};
pub use search::{Evaluation, ParameterSearch, SearchOutcome, VariantSpace, select_best};
pub use table::{CalibrationEntry, CalibrationTable};
