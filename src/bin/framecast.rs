use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use env_logger::Env;
use framecast::{
    CaptionResult, EventWriter, FfmpegLogLevel, FfmpegSampler, FrameSampler, HttpCaptioner,
    ImageFormat, Pipeline, PipelineOptions, ProgressCallback, ProgressInfo, SamplingOptions,
    SourceInfo, Upload, purge_frames,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  framecast caption input.mp4 --endpoint http://localhost:8000/caption\n  framecast sample input.mp4 --out frames --interval 0.5 --progress\n  framecast probe input.mp4 --json\n  framecast completions zsh > _framecast";

#[derive(Debug, Parser)]
#[command(
    name = "framecast",
    version,
    about = "Sample frames from a video and stream back captions",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging (otherwise RUST_LOG applies).
    #[arg(long, global = true)]
    verbose: bool,

    /// FFmpeg log level (quiet, error, warning, info, debug).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Parser, Clone)]
struct SamplingArgs {
    /// Seconds between sampled frames.
    #[arg(long, default_value_t = 2.0)]
    interval: f64,

    /// Frame rate assumed when the video declares none.
    #[arg(long, default_value_t = 30.0)]
    fps_fallback: f64,

    /// Frame image format (jpg, png, bmp).
    #[arg(long, default_value = "jpg")]
    format: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sample, caption, and stream results to stdout.
    #[command(
        about = "Caption a video through a remote captioning service",
        after_help = "Examples:\n  framecast caption input.mp4 --endpoint http://localhost:8000/caption\n  framecast caption input.mp4 --endpoint http://gpu:8000/caption --batch-size 8 --timeout 30 --json"
    )]
    Caption {
        /// Input video path.
        input: PathBuf,
        /// URL of the captioning service.
        #[arg(long)]
        endpoint: String,
        /// Directory frame images are written to.
        #[arg(long, default_value = "static/frames")]
        frames: PathBuf,
        /// Directory the input is staged in while it is processed.
        #[arg(long, default_value = "uploads")]
        uploads: PathBuf,
        #[command(flatten)]
        sampling: SamplingArgs,
        /// Frames per captioning request.
        #[arg(long, default_value_t = 4)]
        batch_size: usize,
        /// Give up on a captioning request after this many seconds.
        #[arg(long)]
        timeout: Option<f64>,
        /// Print JSON lines instead of event-stream frames.
        #[arg(long)]
        json: bool,
    },

    /// Write sampled frames to a directory without captioning.
    #[command(
        about = "Sample frames only",
        after_help = "Examples:\n  framecast sample input.mp4 --out frames\n  framecast sample input.mp4 --out frames --interval 0.5 --format png --progress"
    )]
    Sample {
        /// Input video path.
        input: PathBuf,
        /// Output directory. Existing contents are removed.
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        sampling: SamplingArgs,
        /// Show a progress bar.
        #[arg(long)]
        progress: bool,
    },

    /// Print what the sampler sees in a video.
    #[command(about = "Print video stream properties")]
    Probe {
        /// Input video path.
        input: PathBuf,
        /// Frame rate assumed when the video declares none.
        #[arg(long, default_value_t = 30.0)]
        fps_fallback: f64,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_image_format(value: &str) -> Result<ImageFormat, Box<dyn std::error::Error>> {
    ImageFormat::from_extension(value)
        .ok_or_else(|| format!("unsupported --format: {value}").into())
}

fn parse_seconds(flag: &str, value: f64) -> Result<Duration, Box<dyn std::error::Error>> {
    if value <= 0.0 {
        return Err(format!("{flag} must be positive, got {value}").into());
    }
    Duration::try_from_secs_f64(value).map_err(|_| format!("invalid {flag}: {value}").into())
}

fn sampling_options(args: &SamplingArgs) -> Result<SamplingOptions, Box<dyn std::error::Error>> {
    Ok(SamplingOptions::new()
        .with_interval_seconds(args.interval)?
        .with_fps_fallback(args.fps_fallback)
        .with_image_format(parse_image_format(&args.format)?))
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    if let Some(level) = &global.log_level {
        let parsed: FfmpegLogLevel = level
            .parse()
            .map_err(|_| format!("unsupported --log-level: {level}"))?;
        framecast::set_ffmpeg_log_level(parsed);
    }
    Ok(())
}

struct BarProgress(ProgressBar);

impl ProgressCallback for BarProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.0.set_length(total);
        }
        self.0.set_position(info.current);
        if let Some(saved) = info.saved_frames {
            self.0.set_message(format!("{saved} saved"));
        }
    }
}

fn print_result(
    result: &CaptionResult,
    json: bool,
    events: &mut EventWriter<io::StdoutLock<'_>>,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let line = json!({
            "index": result.index,
            "frame": result.frame_identifier,
            "caption": result.text,
        });
        let stdout = events.get_mut();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
    } else {
        events.write_result(result)?;
    }
    Ok(())
}

fn source_info_json(info: &SourceInfo) -> serde_json::Value {
    json!({
        "width": info.width,
        "height": info.height,
        "declared_frames_per_second": info.declared_frames_per_second,
        "frames_per_second": info.frames_per_second,
        "used_fallback_rate": info.used_fallback_rate(),
        "duration_seconds": info.duration.as_secs_f64(),
        "estimated_frames": info.estimated_frames,
        "codec": info.codec,
    })
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Caption {
            input,
            endpoint,
            frames,
            uploads,
            sampling,
            batch_size,
            timeout,
            json,
        } => {
            let timeout = timeout
                .map(|seconds| parse_seconds("--timeout", seconds))
                .transpose()?;
            let captioner = match timeout {
                Some(limit) => HttpCaptioner::with_timeout(endpoint, limit)?,
                None => HttpCaptioner::new(endpoint)?,
            };

            let mut options = PipelineOptions::new()
                .with_sampling(sampling_options(&sampling)?)
                .with_batch_size(batch_size)
                .with_upload_directory(uploads)
                .with_frame_directory(frames);
            if let Some(limit) = timeout {
                options = options.with_inference_timeout(limit);
            }

            // The pipeline deletes its staged copy, never the caller's file.
            let pipeline = Pipeline::new(Arc::new(captioner), options);
            let run = pipeline.run(Upload::from_path(&input)?)?;
            if let Some(report) = run.sample_report() {
                eprintln!(
                    "{} {} frame(s) sampled every {} decoded frame(s)",
                    "sampled".cyan().bold(),
                    report.frames.len(),
                    report.stride
                );
            }

            let mut events = EventWriter::new(io::stdout().lock());
            let mut captioned = 0_u64;
            for result in run {
                print_result(&result?, json, &mut events)?;
                captioned += 1;
            }

            eprintln!(
                "{} {}",
                "success:".green().bold(),
                format!("Captioned {captioned} frame(s) from {}", input.display()).green()
            );
        }
        Commands::Sample {
            input,
            out,
            sampling,
            progress,
        } => {
            let mut options = sampling_options(&sampling)?;
            let progress_bar = if progress {
                let pb = ProgressBar::new(0);
                let style = ProgressStyle::with_template(
                    "{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}",
                )?;
                pb.set_style(style.progress_chars("##-"));
                options = options.with_progress(Arc::new(BarProgress(pb.clone())));
                Some(pb)
            } else {
                None
            };

            let removed = purge_frames(&out)?;
            if removed > 0 {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("removed {removed} stale frame(s) from {}", out.display()).yellow()
                );
            }

            let report = FfmpegSampler.sample(&input, &out, &options)?;
            if let Some(pb) = progress_bar {
                pb.finish_with_message("done");
            }

            if report.failed_writes > 0 {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("{} frame(s) could not be written", report.failed_writes).yellow()
                );
            }
            println!(
                "{} {}",
                "success:".green().bold(),
                format!(
                    "Sampled {} of {} decoded frame(s) to {}",
                    report.frames.len(),
                    report.decoded_frames,
                    out.display()
                )
                .green()
            );
        }
        Commands::Probe {
            input,
            fps_fallback,
            json,
        } => {
            let info = FfmpegSampler.probe(&input, fps_fallback)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&source_info_json(&info))?);
            } else {
                println!("Resolution: {}x{}", info.width, info.height);
                if info.used_fallback_rate() {
                    println!(
                        "Frame rate: {:.3} fps {}",
                        info.frames_per_second,
                        "(fallback)".yellow()
                    );
                } else {
                    println!("Frame rate: {:.3} fps", info.frames_per_second);
                }
                println!("Duration: {:.2}s", info.duration.as_secs_f64());
                println!("Frames (estimated): {}", info.estimated_frames);
                println!("Codec: {}", info.codec);
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framecast", &mut io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
