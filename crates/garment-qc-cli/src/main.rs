use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use thiserror::Error;

use garment_qc::config::{ConfigError, SessionConfig};
use garment_qc::core::init_with_level;
use garment_qc::render::{render_overlay, save_overlay};
use garment_qc::session::{ImageDirSource, LiveSession, SessionError, SessionParams};
use garment_qc::track::{AnnotationError, AnnotationSet, Calibration, CalibrationError, Role};

/// Worker exit protocol understood by the supervising process.
const EXIT_NO_FRAMES: u8 = 10;
const EXIT_ANNOTATION_MISSING: u8 = 11;
const EXIT_ANNOTATION_INVALID: u8 = 12;

#[derive(Parser)]
#[command(
    name = "garment-qc",
    about = "Live garment measurement from annotated reference images",
    version
)]
struct Cli {
    /// Verbose (debug) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a measurement session over a directory of frame images.
    Measure {
        /// Session config JSON (annotation/reference paths, side,
        /// tolerance, spec labels).
        #[arg(long)]
        config: PathBuf,
        /// Directory of frames played in sorted order as the live feed.
        #[arg(long)]
        frames: PathBuf,
        /// Write per-frame overlay images into this directory.
        #[arg(long)]
        overlay_dir: Option<PathBuf>,
        /// Stop after this many frames.
        #[arg(long)]
        max_frames: Option<usize>,
    },
    /// Derive a pixels-per-cm calibration from a measured reference span.
    Calibrate {
        /// Measured span of the reference object, in pixels.
        #[arg(long)]
        pixel_distance: f64,
        /// Physical length of the reference object, in centimeters.
        #[arg(long)]
        length_cm: f64,
        #[arg(long, default_value = "camera_calibration.json")]
        out: PathBuf,
    },
    /// Validate and summarize an annotation file.
    Inspect {
        #[arg(long)]
        annotation: PathBuf,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
    #[error(transparent)]
    CalibrationStore(#[from] CalibrationError),
    #[error("cannot read frame directory {path}: {source}")]
    Frames {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no frame images found in {0}")]
    NoFrames(PathBuf),
    #[error("invalid calibration inputs (pixel distance and length must be positive)")]
    BadCalibration,
    #[error("failed to write overlay {path}: {source}")]
    Overlay {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn exit_code_for(err: &CliError) -> u8 {
    match err {
        CliError::Frames { .. } | CliError::NoFrames(_) => EXIT_NO_FRAMES,
        CliError::Annotation(AnnotationError::Missing(_))
        | CliError::Session(SessionError::Annotation(AnnotationError::Missing(_))) => {
            EXIT_ANNOTATION_MISSING
        }
        CliError::Annotation(_) | CliError::Session(SessionError::Annotation(_)) => {
            EXIT_ANNOTATION_INVALID
        }
        _ => 1,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = init_with_level(level);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Measure {
            config,
            frames,
            overlay_dir,
            max_frames,
        } => measure(&config, &frames, overlay_dir.as_deref(), max_frames),
        Command::Calibrate {
            pixel_distance,
            length_cm,
            out,
        } => calibrate(pixel_distance, length_cm, &out),
        Command::Inspect { annotation } => inspect(&annotation),
    }
}

fn measure(
    config_path: &std::path::Path,
    frames_dir: &std::path::Path,
    overlay_dir: Option<&std::path::Path>,
    max_frames: Option<usize>,
) -> Result<(), CliError> {
    let config = SessionConfig::load(config_path)?;

    let source = ImageDirSource::from_dir(frames_dir).map_err(|source| CliError::Frames {
        path: frames_dir.to_path_buf(),
        source,
    })?;
    if source.is_empty() {
        return Err(CliError::NoFrames(frames_dir.to_path_buf()));
    }
    info!("playing {} frames from {frames_dir:?}", source.len());

    if let Some(dir) = overlay_dir {
        std::fs::create_dir_all(dir).map_err(|source| CliError::Frames {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let mut session = LiveSession::from_config(&config, source, SessionParams::default())?;

    let mut frame_index = 0usize;
    while let Some(report) = session.step()? {
        if let Some(dir) = overlay_dir {
            let overlay = render_overlay(
                &report.frame,
                session.annotation(),
                &report.points,
                &report.measurements,
                session.is_stabilized(),
            );
            let path = dir.join(format!("frame_{frame_index:05}.png"));
            save_overlay(&path, &overlay).map_err(|source| CliError::Overlay {
                path: path.clone(),
                source,
            })?;
        }

        // Terminal readout at a low cadence, as the overlay carries the
        // live detail.
        if frame_index % 20 == 0 {
            print_measurements(&session, &report.measurements);
        }

        frame_index += 1;
        if max_frames.is_some_and(|max| frame_index >= max) {
            info!("reached frame limit ({frame_index}), stopping");
            break;
        }
    }

    println!("session complete: {frame_index} frames processed");
    Ok(())
}

fn print_measurements(
    session: &LiveSession<ImageDirSource>,
    measurements: &[garment_qc::LiveMeasurement],
) {
    println!("--- live {} measurements ---", session.side());
    for m in measurements {
        match m.real_cm {
            Some(cm) => {
                let status = if m.qc_passed { "PASS" } else { "FAIL" };
                println!("pair {}: {cm:.2} cm - {status}", m.pair_id);
            }
            None => println!("pair {}: {:.1} px (uncalibrated)", m.pair_id, m.pixel_distance),
        }
    }
}

fn calibrate(pixel_distance: f64, length_cm: f64, out: &std::path::Path) -> Result<(), CliError> {
    let calibration =
        Calibration::from_reference(pixel_distance, length_cm).ok_or(CliError::BadCalibration)?;
    calibration.save(out)?;
    println!(
        "calibration saved to {out:?}: {:.2} px/cm (reference {length_cm} cm)",
        calibration.pixels_per_cm
    );
    Ok(())
}

fn inspect(path: &std::path::Path) -> Result<(), CliError> {
    let annotation = AnnotationSet::load(path)?;

    println!("annotation {path:?}");
    println!(
        "  keypoints: {} ({} corner, {} perp, {} normal)",
        annotation.len(),
        annotation.indices_with_role(Role::Corner).len(),
        annotation.indices_with_role(Role::Perpendicular).len(),
        annotation.indices_with_role(Role::Normal).len(),
    );
    println!("  measurement pairs: {}", annotation.pair_count());
    for (pair, cm) in &annotation.target_distances {
        println!("  target pair {pair}: {cm} cm");
    }
    match annotation.placement_box {
        Some([x1, y1, x2, y2]) => {
            println!("  placement box: ({x1}, {y1}) .. ({x2}, {y2})");
        }
        None => println!("  placement box: none"),
    }
    Ok(())
}
