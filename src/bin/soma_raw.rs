// soma_raw - RAW inspection and decoding CLI
// Runs LibRaw through the async facade, or through the worker proxy with --worker

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use soma_raw::{ImageData, RawDecoder, RawWorker, Settings};

#[derive(Parser)]
#[command(name = "soma_raw", version, about = "SOMA RAW - LibRaw decoding via async facade or worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print metadata of a RAW file as JSON
    Metadata {
        /// RAW file to inspect
        input: PathBuf,

        /// Include the full field set
        #[arg(long)]
        full: bool,

        /// Go through the background worker (prints unnormalized metadata)
        #[arg(long)]
        worker: bool,
    },

    /// Decode a RAW file and save it as PNG
    Decode {
        /// RAW file to decode
        input: PathBuf,

        /// Output PNG path
        output: PathBuf,

        /// JSON file with LibRaw settings
        #[arg(long, conflicts_with = "preset")]
        settings: Option<PathBuf>,

        /// Settings preset: fast, maximum, default
        #[arg(long)]
        preset: Option<String>,

        /// Go through the background worker
        #[arg(long)]
        worker: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Metadata { input, full, worker } => {
            let bytes = read_input(&input)?;
            let json = if worker {
                let mut handle = RawWorker::spawn()?;
                handle.open(bytes, Settings::default()).await?;
                let meta = handle.metadata(full).await?;
                handle.shutdown()?;
                serde_json::to_string_pretty(&meta)?
            } else {
                let decoder = RawDecoder::new();
                decoder.open(bytes, Settings::default()).await?;
                let meta = decoder.metadata(full).await?;
                if let Some(summary) = meta.exposure_summary() {
                    info!("   {}", summary);
                }
                serde_json::to_string_pretty(&meta)?
            };
            println!("{}", json);
        }
        Command::Decode { input, output, settings, preset, worker } => {
            let settings = load_settings(settings.as_deref(), preset.as_deref())?;
            let bytes = read_input(&input)?;

            info!("🎞️  Decoding {}", input.display());
            let start = Instant::now();

            let image = if worker {
                let mut handle = RawWorker::spawn()?;
                handle.open(bytes, settings).await?;
                let image = handle.image_data().await?;
                debug!("Worker metrics: {:?}", handle.metrics());
                handle.shutdown()?;
                image
            } else {
                let decoder = RawDecoder::new();
                decoder.open(bytes, settings).await?;
                decoder.image_data().await?
            };

            write_png(&image, &output)?;
            info!(
                "   ✓ {}x{} ({} ch, {} bit) → {} in {}ms",
                image.width,
                image.height,
                image.colors,
                image.bits,
                output.display(),
                start.elapsed().as_millis()
            );
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_settings(file: Option<&Path>, preset: Option<&str>) -> Result<Settings> {
    if let Some(file) = file {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read settings {}", file.display()))?;
        return serde_json::from_str(&text).context("Failed to parse settings JSON");
    }

    match preset {
        Some(name) => match Settings::preset(name) {
            Some(settings) => Ok(settings),
            None => bail!("Unknown preset: {} (expected fast, maximum or default)", name),
        },
        None => Ok(Settings::default()),
    }
}

fn write_png(image: &ImageData, output: &Path) -> Result<()> {
    image
        .save_png(output)
        .with_context(|| format!("Failed to write {}", output.display()))
}
