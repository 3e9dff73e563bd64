use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};

use overlay_translator::{
    BackendKind, BenchmarkConfig, CalibrateConfig, CommonConfig, OcrMethod, TranslateImageConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "overlay-translator",
    version,
    about = "Read text from screen captures, translate it and place it back over the source"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (TOML), layered over the defaults
    #[arg(short = 'c', long = "settings", global = true)]
    settings: Option<PathBuf>,

    /// Google Vision API key (overrides GOOGLE_VISION_API_KEY)
    #[arg(long = "vision-key", global = true)]
    vision_key: Option<String>,

    /// DeepL API key (overrides DEEPL_API_KEY)
    #[arg(long = "deepl-key", global = true)]
    deepl_key: Option<String>,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture pipeline on an image and print the overlay as JSON
    TranslateImage(TranslateImageArgs),
    /// Search preprocessing parameters against the benchmark corpus
    Calibrate(CalibrateArgs),
    /// Measure OCR accuracy, latency and CPU use per method
    BenchmarkOcr(BenchmarkArgs),
    /// Measure translation latency per backend
    BenchmarkTranslation(BenchmarkArgs),
    /// List languages DeepL does not offer as targets
    DeeplLanguages,
    /// Show the language table
    Languages {
        /// Mark languages without installed tesseract traineddata
        #[arg(long = "check-installed")]
        check_installed: bool,
    },
}

#[derive(Args, Debug)]
struct TranslateImageArgs {
    /// Image standing in for the captured monitor
    image: PathBuf,

    /// Language of the text in the image (name or code)
    #[arg(short = 'L', long = "source", default_value = "English")]
    source: String,

    /// Target language (default: settings [translation] target)
    #[arg(short = 'l', long = "target")]
    target: Option<String>,

    /// Translation backend: google or deepl
    #[arg(short = 'b', long = "backend", value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// OCR engine: tesseract or google_vision
    #[arg(short = 'o', long = "ocr", value_parser = parse_ocr)]
    ocr: Option<OcrMethod>,

    /// Capture area as LEFT,TOP,WIDTH,HEIGHT (default: whole image)
    #[arg(short = 'r', long = "region", value_parser = overlay_translator::parse_region)]
    region: Option<overlay_translator::Region>,

    /// Draw on a second monitor, WIDTHxHEIGHT[+X+Y]
    #[arg(short = 'm', long = "output-monitor", value_parser = overlay_translator::parse_monitor)]
    output_monitor: Option<overlay_translator::MonitorSpec>,

    /// Skip image preprocessing
    #[arg(long = "no-preprocess")]
    no_preprocess: bool,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    /// Only these languages (name or code); repeatable
    #[arg(short = 'l', long = "lang")]
    languages: Vec<String>,

    /// Worker threads (default: logical CPUs)
    #[arg(short = 'j', long = "workers")]
    workers: Option<usize>,

    /// Calibration table to update
    #[arg(short = 'O', long = "output")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct BenchmarkArgs {
    /// Only these languages (name or code); repeatable
    #[arg(short = 'l', long = "lang")]
    languages: Vec<String>,

    /// JSON file for the records
    #[arg(short = 'O', long = "output")]
    output: Option<PathBuf>,
}

fn parse_backend(value: &str) -> Result<BackendKind> {
    BackendKind::parse(value).ok_or_else(|| anyhow!("unknown backend '{}'", value))
}

fn parse_ocr(value: &str) -> Result<OcrMethod> {
    match value.trim().to_ascii_lowercase().as_str() {
        "tesseract" => Ok(OcrMethod::Tesseract),
        "google_vision" | "google-vision" | "vision" => Ok(OcrMethod::GoogleVision),
        _ => Err(anyhow!("unknown OCR engine '{}'", value)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    overlay_translator::logging::init(cli.verbose)?;

    let common = CommonConfig {
        settings_path: cli.settings,
        vision_key: cli.vision_key,
        deepl_key: cli.deepl_key,
    };
    let output = match cli.command {
        Command::TranslateImage(args) => {
            overlay_translator::translate_image(TranslateImageConfig {
                common,
                image: args.image,
                source: args.source,
                target: args.target,
                backend: args.backend,
                ocr: args.ocr,
                region: args.region,
                output_monitor: args.output_monitor,
                no_preprocess: args.no_preprocess,
            })
            .await?
        }
        Command::Calibrate(args) => {
            overlay_translator::calibrate(CalibrateConfig {
                common,
                languages: args.languages,
                workers: args.workers,
                output: args.output,
            })
            .await?
        }
        Command::BenchmarkOcr(args) => {
            overlay_translator::benchmark_ocr(BenchmarkConfig {
                common,
                languages: args.languages,
                output: args.output,
            })
            .await?
        }
        Command::BenchmarkTranslation(args) => {
            overlay_translator::benchmark_translation(BenchmarkConfig {
                common,
                languages: args.languages,
                output: args.output,
            })
            .await?
        }
        Command::DeeplLanguages => overlay_translator::deepl_languages(common).await?,
        Command::Languages { check_installed } => {
            overlay_translator::list_languages(common, check_installed)?
        }
    };
    println!("{}", output);
    Ok(())
}
