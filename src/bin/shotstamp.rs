// shotstamp - batch media conversion CLI
// Converts photos/videos and names each output after its capture instant.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use shotstamp::{
    BatchConfig, BatchRunner, FfmpegBackend, ImageConfig, ImageConverter, LibraryConfig,
    LocalLibrary, VideoConfig, VideoContainer, VideoConverter,
};

#[derive(Parser)]
#[command(
    name = "shotstamp",
    version,
    about = "Convert photos to JPEG and videos to MP4/MOV, named by capture time"
)]
struct Args {
    /// Media files to convert
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output directory (must already exist)
    #[arg(short, long)]
    output: PathBuf,

    /// Video output container: mp4 or mov
    #[arg(long, default_value = "mp4")]
    container: VideoContainer,

    /// JPEG re-encode quality, 1-100
    #[arg(long, default_value_t = 80)]
    jpeg_quality: u8,

    /// Maximum simultaneous conversions
    #[arg(short, long, default_value_t = 6)]
    jobs: usize,

    /// Use file modification time when no capture date is embedded
    #[arg(long)]
    mtime_fallback: bool,

    /// Print the batch summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let source = Arc::new(LocalLibrary::new(LibraryConfig {
        root: None,
        mtime_fallback: args.mtime_fallback,
    }));
    let images = ImageConverter::new(ImageConfig {
        jpeg_quality: args.jpeg_quality,
    });
    let videos = VideoConverter::new(
        VideoConfig {
            container: args.container,
        },
        Arc::new(FfmpegBackend),
    );

    let runner = BatchRunner::new(source, images, videos)
        .with_config(BatchConfig {
            max_in_flight: args.jobs,
        })
        .with_progress(Arc::new(|fraction, line| {
            eprintln!("[{:>3.0}%] {line}", fraction * 100.0);
        }));

    let summary = runner
        .run(&args.inputs, &args.output)
        .await
        .context("batch conversion failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in &summary.messages {
            println!("{line}");
        }
    }

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
