//! LoopCam - always-on loop recording daemon
//!
//! Records bounded-length segments from a V4L2 camera into a ring of MP4
//! files, throttles resolution under thermal pressure and serves control
//! intents from the web and BLE layers.

use chrono::Local;
use clap::Parser;
use loopcam::command::{CommandKind, ControlRouter, ShellSystemActions, SystemActions, WebGates};
use loopcam::recording::camera::{V4l2Camera, V4l2Settings};
use loopcam::recording::engine::{EngineParts, RecordingEngine};
use loopcam::recording::manager::{RecorderControl, RecorderHandle};
use loopcam::recording::muxer::FfmpegMuxerFactory;
use loopcam::recording::probe::{SysinfoDiskProbe, SysinfoThermalSensor};
use loopcam::recording::status::StatusBoard;
use loopcam::recording::{config, storage};
use loopcam::{RecorderError, Result, command_channel};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory for segments, ring state and snapshots
    #[arg(short = 'r', long)]
    records_location: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG overrides.
    /// Logs also go to a daily file in the records directory
    #[arg(short = 'L', long, default_value = "info")]
    loglevel: String,

    /// JSON configuration file (defaults apply when missing)
    #[arg(short, long, default_value = "/etc/loopcam.json")]
    config: PathBuf,

    /// Wait for a start command instead of recording at launch
    #[arg(long)]
    no_autostart: bool,
}

// Log lines go to stderr and to the day's file next to the footage
struct DailyLog {
    file: File,
}

impl Write for DailyLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

fn init_logging(records: &Path, loglevel: &str) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(loglevel));

    let path = storage::log_file_path(records, Local::now().date_naive());
    let file_error = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(DailyLog { file })));
            None
        }
        Err(e) => Some(e),
    };
    builder.init();

    if let Some(e) = file_error {
        log::warn!("Failed to open log file {:?}, logging to stderr only: {}", path, e);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // The records directory holds the log files, so it is settled first
    let mut config = config::load_config(&args.config)?;
    if let Some(records) = args.records_location {
        config.records_location = records;
    }
    config.validate().map_err(RecorderError::InvalidConfig)?;
    storage::ensure_records_dir(&config.records_location).map_err(RecorderError::Storage)?;

    init_logging(&config.records_location, &args.loglevel);
    log::info!("LoopCam v{} starting...", env!("CARGO_PKG_VERSION"));

    match storage::delete_old_logs(
        &config.records_location,
        config.keep_logs_days,
        Local::now().date_naive(),
    ) {
        Ok(0) => {}
        Ok(n) => log::info!("Deleted {} log files older than {} days", n, config.keep_logs_days),
        Err(e) => log::warn!("{}", e),
    }

    log::info!(
        "Records: {:?}, {} s segments, camera {} at {} / {} @ {} fps",
        config.records_location,
        config.segment_duration_seconds,
        config.camera_device,
        config.high_resolution,
        config.low_resolution,
        config.framerate
    );

    let status = Arc::new(StatusBoard::new());
    status.subscribe_temperature(Box::new(|celsius| {
        log::debug!("SoC temperature: {:?} C", celsius);
    }));

    // Web handlers request rotate/snapshot/stop through these gates
    let gates = WebGates::default();
    let (engine_tx, engine_rx) = command_channel(config.control_queue_capacity);

    let camera = V4l2Camera::new(V4l2Settings {
        ffmpeg_path: config.ffmpeg_path.clone(),
        device: config.camera_device.clone(),
        quality: config.quality,
        text_size: config.overlay_text_size,
        work_dir: config.records_location.clone(),
    });
    let parts = EngineParts {
        camera: Box::new(camera),
        muxers: Box::new(FfmpegMuxerFactory::new(config.ffmpeg_path.clone())),
        disk: Box::new(SysinfoDiskProbe::new()),
        thermal: Box::new(SysinfoThermalSensor::new()),
    };

    let engine = RecordingEngine::new(config.clone(), parts, Arc::clone(&status), engine_rx, gates);
    let recorder = Arc::new(RecorderHandle::new(engine));

    // BLE writes are submitted through the router
    let actions: Arc<dyn SystemActions> = Arc::new(ShellSystemActions);
    let mut router = ControlRouter::spawn(
        config.control_queue_capacity,
        Arc::clone(&recorder) as Arc<dyn RecorderControl>,
        engine_tx,
        actions,
    )?;

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| RecorderError::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    if args.no_autostart {
        log::info!("Autostart disabled, waiting for a start command");
    } else {
        router.submit(CommandKind::StartRecording);
    }

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(500));
    }

    log::info!("Shutting down...");
    router.shutdown();
    recorder.stop()?;

    log::info!("Final status: {}", status.status_text());
    Ok(())
}
