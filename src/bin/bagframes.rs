use std::{path::PathBuf, sync::Arc};

use bagframes::{
    BagConverter, CaptureMetadata, ConversionOptions, FfmpegLogLevel, FrameFormat, OutputTarget,
    ProgressCallback, ProgressInfo, StopReason, StreamSelection, images_to_video,
    validate_input_path,
};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  bagframes -i capture.bag -o frames\n  bagframes -i capture.bag -o depth.avi -s rgbd --fps 15 --width 640 --height 480\n  bagframes -i capture.bag -o ir.mp4 -s infrared -f y8 --progress\n  bagframes -i capture.bag --probe --json\n  bagframes --assemble frames -o frames.mp4";

#[derive(Debug, Parser)]
#[command(
    name = "bagframes",
    version,
    about = "Convert RealSense .bag recordings to images or video",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    /// Path to the .bag capture file.
    #[arg(short, long, required_unless_present = "assemble")]
    input: Option<PathBuf>,

    /// Output directory for images, or a .mp4 / .avi file for video.
    #[arg(short, long, required_unless_present = "probe")]
    output: Option<PathBuf>,

    /// Stream to convert (color, depth, infrared, rgbd).
    #[arg(short, long, default_value = "color")]
    stream: String,

    /// Pixel format expected for the stream (rgb8, z16, y8, ...).
    #[arg(short, long, default_value = "rgb8")]
    format: String,

    /// Output video frame rate.
    #[arg(long, default_value_t = bagframes::convert::DEFAULT_FPS)]
    fps: u32,

    /// Output video width.
    #[arg(long, default_value_t = bagframes::convert::DEFAULT_WIDTH)]
    width: u32,

    /// Output video height.
    #[arg(long, default_value_t = bagframes::convert::DEFAULT_HEIGHT)]
    height: u32,

    /// Frame sets to drop at the start while auto-exposure settles.
    #[arg(long, default_value_t = bagframes::convert::DEFAULT_WARMUP)]
    skip: u64,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,

    /// Show additional logging output.
    #[arg(long)]
    verbose: bool,

    /// FFmpeg log level (quiet, error, warning, info, debug). Follows --verbose by default.
    #[arg(long)]
    log_level: Option<String>,

    /// Print the recording's streams and exit.
    #[arg(long, conflicts_with = "assemble")]
    probe: bool,

    /// With --probe, print machine-readable JSON.
    #[arg(long, requires = "probe")]
    json: bool,

    /// Assemble the .jpg images of a directory into the --output video.
    #[arg(long, value_name = "DIR")]
    assemble: Option<PathBuf>,
}

fn parse_stream(value: &str) -> Result<StreamSelection, Box<dyn std::error::Error>> {
    value
        .parse::<StreamSelection>()
        .map_err(|_| format!("You put the wrong stream: {value}").into())
}

fn parse_format(value: &str) -> Result<FrameFormat, Box<dyn std::error::Error>> {
    value
        .parse::<FrameFormat>()
        .map_err(|_| format!("You put the wrong format: {value}").into())
}

fn parse_log_level(value: &str) -> Result<FfmpegLogLevel, Box<dyn std::error::Error>> {
    value
        .parse::<FfmpegLogLevel>()
        .map_err(|_| format!("unsupported --log-level: {value}").into())
}

struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for BarProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.bar.set_length(total.max(info.current));
        }
        self.bar.set_position(info.current);
    }
}

fn print_probe(metadata: &CaptureMetadata, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if as_json {
        let payload = json!({
            "path": metadata.path.display().to_string(),
            "duration_seconds": metadata.duration.as_secs_f64(),
            "depth_units": metadata.depth_units,
            "chunks": metadata.chunk_count,
            "streams": metadata.streams.iter().map(|stream| json!({
                "kind": stream.kind.to_string(),
                "index": stream.index,
                "width": stream.width,
                "height": stream.height,
                "fps": stream.fps,
                "format": stream.format.map(|format| format.to_string()),
                "frame_count": stream.frame_count,
                "calibrated": stream.intrinsics.is_some(),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("File: {}", metadata.path.display());
        println!("Duration: {:?}", metadata.duration);
        println!("Depth units: {} m", metadata.depth_units);
        for stream in &metadata.streams {
            let format = stream
                .format
                .map_or_else(|| "unknown".to_string(), |format| format.to_string());
            println!(
                "{} #{}: {}x{} @ {} fps [{}], {} frames",
                stream.kind, stream.index, stream.width, stream.height, stream.fps, format, stream.frame_count,
            );
        }
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    bagframes::logging::init(cli.verbose);

    let ffmpeg_level = match &cli.log_level {
        Some(level) => parse_log_level(level)?,
        None => FfmpegLogLevel::for_filter(bagframes::logging::default_level(cli.verbose)),
    };
    bagframes::set_ffmpeg_log_level(ffmpeg_level);

    let progress = if cli.progress {
        Some(Arc::new(BarProgress::new()?))
    } else {
        None
    };

    let mut options = ConversionOptions::new()
        .with_fps(cli.fps)
        .with_resolution(cli.width, cli.height)
        .with_warmup(cli.skip);
    if let Some(progress) = &progress {
        options = options.with_progress(progress.clone());
    }

    if let Some(dir) = &cli.assemble {
        let output = cli.output.as_ref().ok_or("--assemble requires --output")?;
        let written = images_to_video(dir, output, &options)?;
        if let Some(progress) = &progress {
            progress.bar.finish_and_clear();
        }
        println!(
            "{} assembled {} frames into {}",
            "success:".green().bold(),
            written,
            output.display()
        );
        return Ok(());
    }

    let input = cli.input.as_ref().ok_or("--input is required")?;
    validate_input_path(input)?;

    if cli.probe {
        let metadata = CaptureMetadata::probe(input)?;
        return print_probe(&metadata, cli.json);
    }

    let stream = parse_stream(&cli.stream)?;
    let format = parse_format(&cli.format)?;
    let output = cli.output.as_ref().ok_or("--output is required")?;
    let target = OutputTarget::from_path(output)?;

    let summary = BagConverter::new(input, options.with_stream(stream).with_format(format)).run(&target)?;
    if let Some(progress) = &progress {
        progress.bar.finish_and_clear();
    }

    match &summary.stop_reason {
        StopReason::EndOfStream => println!(
            "{} wrote {} frames to {}",
            "success:".green().bold(),
            summary.frames_written,
            summary.output.display()
        ),
        StopReason::Cancelled => println!(
            "{} cancelled after {} frames",
            "warning:".yellow().bold(),
            summary.frames_written
        ),
        StopReason::Error(reason) => eprintln!(
            "{} stopped after {} frames: {}",
            "warning:".yellow().bold(),
            summary.frames_written,
            reason.yellow()
        ),
    }
    if summary.frames_skipped > 0 {
        eprintln!(
            "{} {} frame sets had no {} frame",
            "note:".cyan().bold(),
            summary.frames_skipped,
            stream
        );
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
