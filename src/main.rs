//! barscan: frame-rate gated barcode detection for live video

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use barscan::capture::{Frame, V4l2Capture};
use barscan::pipeline::{Annotator, DecoderAdapter, FrameStage};
use barscan::scan::{scan_image, ScanOptions};
use barscan::{utils, AdmissionPolicy, CaptureBackend, Config, DecoderBackend};
use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "barscan", version, about = "Barcode detection and annotation for video streams")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a live camera stream
    Run(RunArgs),
    /// Decode and annotate a single image file
    Scan(ScanArgs),
}

#[derive(Args)]
struct RunArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    #[arg(long, value_enum)]
    source: Option<SourceArg>,

    /// Admit at most one frame per interval
    #[arg(long, conflicts_with = "unthrottled")]
    interval_ms: Option<u64>,

    /// Admit every frame
    #[arg(long)]
    unthrottled: bool,

    /// Capture device, empty string to auto-detect
    #[arg(short, long)]
    device: Option<String>,

    /// Show a live preview window
    #[arg(long)]
    display: bool,
}

#[derive(Args)]
struct ScanArgs {
    image: PathBuf,

    /// Annotated output path, defaults to `<stem>_annotated.<ext>`
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Binarize the image before decoding
    #[arg(long)]
    enhance: bool,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Multi,
    Crop,
    Single,
    #[value(name = "datamatrix")]
    DataMatrix,
    Barcode,
    Any,
}

impl From<BackendArg> for DecoderBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Multi => DecoderBackend::Multi,
            BackendArg::Crop => DecoderBackend::Crop,
            BackendArg::Single => DecoderBackend::Single,
            BackendArg::DataMatrix => DecoderBackend::DataMatrix,
            BackendArg::Barcode => DecoderBackend::Barcode,
            BackendArg::Any => DecoderBackend::Any,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Gstreamer,
    V4l2,
}

impl From<SourceArg> for CaptureBackend {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Gstreamer => CaptureBackend::Gstreamer,
            SourceArg::V4l2 => CaptureBackend::V4l2,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("barscan=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Scan(args) => scan(args),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    info!("barscan launching...");

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.decoder.backend = backend.into();
    }
    if let Some(source) = args.source {
        config.capture.backend = source.into();
    }
    if let Some(interval_ms) = args.interval_ms {
        config.admission.policy = AdmissionPolicy::RateLimited;
        config.admission.interval_ms = interval_ms;
    }
    if args.unthrottled {
        config.admission.policy = AdmissionPolicy::Unthrottled;
    }
    if let Some(device) = args.device {
        config.capture.device = device;
    }
    config.capture.display |= args.display;

    if config.capture.device.is_empty() {
        let found = utils::auto_detect_device()?;
        config.capture.device = found.path;
        config.capture.format = found.format;
    }
    info!("Using capture device: {} ({:?})", config.capture.device, config.capture.format);

    let stage = Arc::new(FrameStage::from_config(&config)?);

    match config.capture.backend {
        CaptureBackend::Gstreamer => run_gstreamer(&config, stage.clone()).await?,
        CaptureBackend::V4l2 => run_v4l2(&config, stage.clone()).await?,
    }

    info!(
        frames = stage.gate().frames_admitted(),
        "barscan shutting down"
    );
    Ok(())
}

#[cfg(feature = "gstreamer-pipeline")]
async fn run_gstreamer(config: &Config, stage: Arc<FrameStage>) -> Result<()> {
    use barscan::capture::gst_capture::{interrupt_bus, watch_bus};
    use barscan::capture::GstCapture;

    let mut capture = GstCapture::new(&config.capture)?;
    capture.attach(stage);
    capture.start_stream()?;

    let bus = capture.bus()?;
    let watcher_bus = bus.clone();
    let mut watcher = tokio::task::spawn_blocking(move || watch_bus(watcher_bus));

    let finished = tokio::select! {
        joined = &mut watcher => Some(joined.map_err(|e| eyre!("Bus watcher failed: {}", e))?),
        signal = shutdown_signal() => {
            signal?;
            None
        }
    };

    let result = match finished {
        Some(result) => result,
        None => {
            info!("Shutdown requested");
            interrupt_bus(&bus)?;
            watcher
                .await
                .map_err(|e| eyre!("Bus watcher failed: {}", e))?
        }
    };

    capture.stop_stream()?;
    info!(samples = capture.samples_delivered(), "Pipeline stopped");
    result
}

#[cfg(not(feature = "gstreamer-pipeline"))]
async fn run_gstreamer(_config: &Config, _stage: Arc<FrameStage>) -> Result<()> {
    Err(eyre!(
        "built without GStreamer support, use `--source v4l2`"
    ))
}

async fn run_v4l2(config: &Config, stage: Arc<FrameStage>) -> Result<()> {
    let (tx, rx) = flume::bounded::<Option<Frame>>(config.capture.buffer_count.max(1) as usize);
    let stop = Arc::new(AtomicBool::new(false));

    let capture_config = config.capture.clone();
    let capture_stop = stop.clone();
    let capture_thread = std::thread::Builder::new()
        .name("v4l2-capture".into())
        .spawn(move || -> Result<()> {
            let mut capture = V4l2Capture::new(capture_config)?;
            capture.start_stream()?;
            capture.stream_into(tx, capture_stop);
            Ok(())
        })?;

    let mut processor = tokio::task::spawn_blocking(move || {
        for frame in rx.iter() {
            stage.on_frame(frame);
        }
    });

    let interrupted = tokio::select! {
        joined = &mut processor => {
            joined.map_err(|e| eyre!("Frame processing failed: {}", e))?;
            false
        }
        signal = shutdown_signal() => {
            signal?;
            true
        }
    };

    if interrupted {
        info!("Shutdown requested");
        stop.store(true, Ordering::Relaxed);
        processor
            .await
            .map_err(|e| eyre!("Frame processing failed: {}", e))?;
    }

    tokio::task::spawn_blocking(move || capture_thread.join())
        .await?
        .map_err(|_| eyre!("Capture thread panicked"))?
}

async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        ctrl_c = tokio::signal::ctrl_c() => ctrl_c?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

fn scan(args: ScanArgs) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.decoder.backend = backend.into();
    }

    let decoder = DecoderAdapter::from_config(&config.decoder)?;
    let annotator = Annotator::from_config(&config.annotation)?;
    let options = ScanOptions {
        output: args.output,
        enhance: args.enhance,
    };

    let report = scan_image(&args.image, &decoder, &annotator, &options)?;

    if report.symbols.is_empty() {
        warn!("No symbols found in {}", args.image.display());
    }
    for symbol in &report.symbols {
        println!("{} {} {}", symbol.kind, symbol.bbox, symbol.payload);
    }
    println!("Annotated image: {}", report.output.display());

    Ok(())
}
