use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{ArcFaceEngine, AttendanceLog};
use rollcall_hw::Camera;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing_subscriber::EnvFilter;

mod config;
mod preview;
mod session;

use config::Config;
use preview::{Headless, Preview, WindowPreview};
use session::{Classroom, Session, SessionSummary};

#[derive(Parser)]
#[command(name = "rollcall", about = "Camera-driven classroom attendance")]
struct Cli {
    /// TOML config file (defaults to $ROLLCALL_CONFIG if set)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and mark recognized students present
    Run {
        #[command(flatten)]
        sources: SourceArgs,
        /// Attendance log CSV
        #[arg(long)]
        log: Option<PathBuf>,
        /// Camera index (/dev/video{N})
        #[arg(long)]
        camera: Option<u32>,
        /// Run without the preview window; stop with Ctrl-C
        #[arg(long)]
        no_preview: bool,
    },
    /// Encode the reference photos and report what was enrolled
    Enroll {
        #[command(flatten)]
        sources: SourceArgs,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Args)]
struct SourceArgs {
    /// Directory of reference photos, one student per file
    #[arg(long)]
    photos: Option<PathBuf>,
    /// Roster CSV (Name, Student Id, Branch)
    #[arg(long)]
    roster: Option<PathBuf>,
}

impl SourceArgs {
    fn apply(self, config: &mut Config) {
        if let Some(photos) = self.photos {
            config.photos_dir = photos;
        }
        if let Some(roster) = self.roster {
            config.roster_path = roster;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match dispatch(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run {
            sources,
            log,
            camera,
            no_preview,
        } => {
            sources.apply(&mut config);
            if let Some(log) = log {
                config.attendance_path = log;
            }
            if let Some(camera) = camera {
                config.camera_index = camera;
            }
            if no_preview {
                config.preview = false;
            }
            config.validate()?;
            run(config).await
        }
        Commands::Enroll { sources, json } => {
            sources.apply(&mut config);
            config.validate()?;
            enroll(&config, json)
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
    }
}

/// Drive the session on a blocking thread; Ctrl-C sets the stop flag.
async fn run(config: Config) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = stop.clone();
    let worker = tokio::task::spawn_blocking(move || run_session(&config, worker_stop));

    let interrupt = || async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let joined = match supervise(worker, &stop, interrupt).await {
        Supervised::Finished(joined) => joined,
        Supervised::Forced => {
            // The runtime would wait on the blocked capture thread; leave now.
            tracing::warn!("second interrupt, exiting without releasing the camera");
            std::process::exit(130);
        }
    };

    let summary = joined.context("session thread panicked")??;
    if !summary.marked.is_empty() {
        println!("Marked present: {}", summary.marked.join(", "));
    }
    Ok(())
}

enum Supervised<T> {
    Finished(Result<T, JoinError>),
    /// Interrupted twice before the worker stopped.
    Forced,
}

/// Wait for `worker`. The first interrupt sets `stop`; a second gives up on it.
async fn supervise<T, F, Fut>(
    mut worker: JoinHandle<T>,
    stop: &AtomicBool,
    mut interrupt: F,
) -> Supervised<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::select! {
        joined = &mut worker => return Supervised::Finished(joined),
        _ = interrupt() => {
            tracing::info!("interrupt received, stopping after the current frame (Ctrl-C again to force)");
            stop.store(true, Ordering::SeqCst);
        }
    }

    tokio::select! {
        joined = &mut worker => Supervised::Finished(joined),
        _ = interrupt() => Supervised::Forced,
    }
}

fn run_session(config: &Config, stop: Arc<AtomicBool>) -> Result<SessionSummary> {
    let mut engine = load_engine(config)?;
    let classroom = Classroom::load(&config.photos_dir, &config.roster_path, &mut engine)?;

    let camera = Camera::open_index(config.camera_index)
        .with_context(|| format!("opening camera {}", config.camera_index))?;
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let preview: Box<dyn Preview> = if config.preview {
        match WindowPreview::open(camera.width, camera.height) {
            Ok(window) => Box::new(window),
            Err(e) => {
                tracing::warn!(error = %e, "preview window unavailable; running headless");
                Box::new(Headless)
            }
        }
    } else {
        Box::new(Headless)
    };

    let log = AttendanceLog::new(&config.attendance_path);
    let mut session =
        Session::new(engine, classroom, log, camera, preview, config.downscale).with_stop_flag(stop);
    Ok(session.run())
}

fn load_engine(config: &Config) -> Result<ArcFaceEngine> {
    let scrfd = config.scrfd_model_path();
    let arcface = config.arcface_model_path();
    let engine = ArcFaceEngine::load(&scrfd, &arcface, config.match_tolerance)
        .context("loading face models")?;
    tracing::info!(
        detector = %scrfd.display(),
        recognizer = %arcface.display(),
        tolerance = config.match_tolerance,
        "face models loaded"
    );
    Ok(engine)
}

fn enroll(config: &Config, json: bool) -> Result<()> {
    let mut engine = load_engine(config)?;
    let classroom = Classroom::load(&config.photos_dir, &config.roster_path, &mut engine)?;
    let report = classroom.enrollment.report();
    let unrostered = classroom.unrostered();

    if json {
        let out = serde_json::json!({
            "enrolled": classroom.enrollment.names(),
            "report": report,
            "unrostered": unrostered,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "Enrolled {} of {} files ({} decoded)",
        classroom.enrollment.len(),
        report.files_seen,
        report.decoded
    );
    for (name, source) in classroom
        .enrollment
        .names()
        .iter()
        .zip(classroom.enrollment.sources())
    {
        let details = classroom
            .roster
            .get(name)
            .map(|r| r.display_text())
            .unwrap_or_else(|| session::DETAILS_NOT_FOUND.to_string());
        println!("  {name:<20} {}  {details}", source.display());
    }
    for skipped in &report.skipped {
        println!(
            "  skipped {} ({:?}): {}",
            skipped.path.display(),
            skipped.reason,
            skipped.detail
        );
    }
    Ok(())
}
