use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use log::info;
use motorsichel::calib::{CalibrationMeta, CalibrationParams, CheckerboardSpec};
use motorsichel::measure::{
    hsv_reference_chart, DrawingName, HsvRange, MorphMode, SegmentationParams,
};
use motorsichel::{io, MeasurementSession, PipelineError, Settings, Workspace};
use nalgebra::Point2;

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl From<motorsichel::SettingsError> for CliError {
    fn from(err: motorsichel::SettingsError) -> Self {
        CliError::Pipeline(err.into())
    }
}

impl From<io::LoadError> for CliError {
    fn from(err: io::LoadError) -> Self {
        CliError::Pipeline(err.into())
    }
}

#[derive(Parser, Debug)]
#[command(name = "motorsichel")]
#[command(about = "Measure holes in a photographed part and export them as a DXF drawing")]
struct Cli {
    /// Workspace holding data/, res/ and result/.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON logs (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate the camera from a directory of checkerboard photos.
    Calibrate(CalibrateArgs),
    /// Measure a part and write the drawing and reference report.
    Measure(MeasureArgs),
    /// Write the HSV reference chart into res/.
    Chart,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    /// Directory with at least 10 JPEG/PNG checkerboard photos.
    #[arg(long)]
    images: PathBuf,
    /// Inner corners along the fast board index.
    #[arg(long, default_value_t = 6)]
    rows: u32,
    /// Inner corners along the slow board index.
    #[arg(long, default_value_t = 8)]
    cols: u32,
    /// Square edge length in millimeters.
    #[arg(long, default_value_t = 20.0)]
    square: f64,
    #[arg(long)]
    owner: String,
    #[arg(long)]
    camera: String,
    #[arg(long)]
    lens: String,
    /// Lens focal length in millimeters.
    #[arg(long)]
    focal: f64,
}

#[derive(Args, Debug)]
struct MeasureArgs {
    /// Calibration record written by `calibrate`.
    #[arg(long)]
    calibration: PathBuf,
    /// Photo of the checkerboard lying on the object plane.
    #[arg(long)]
    chessboard: PathBuf,
    /// Photo of the part.
    #[arg(long)]
    object: PathBuf,
    /// Lower HSV bound as `h,s,v`.
    #[arg(long, default_value = "0,0,0")]
    hsv_lower: HsvTriple,
    /// Upper HSV bound as `h,s,v`.
    #[arg(long, default_value = "179,255,255")]
    hsv_upper: HsvTriple,
    /// Second HSV range, OR-ed with the first.
    #[arg(long, requires = "hsv2_upper")]
    hsv2_lower: Option<HsvTriple>,
    #[arg(long, requires = "hsv2_lower")]
    hsv2_upper: Option<HsvTriple>,
    /// Morphology code: 0 none, 1 dilate, 2 erode, 3 open, 4 close.
    #[arg(long)]
    morph: Option<u8>,
    /// `auto`, `hole:N` or `x,y` in pixels of the undistorted photo.
    #[arg(long, default_value = "auto")]
    reference: ReferenceArg,
    #[arg(long)]
    manufacturer: Option<String>,
    #[arg(long)]
    model: Option<String>,
}

#[derive(Clone, Copy, Debug)]
struct HsvTriple([u8; 3]);

impl FromStr for HsvTriple {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u8>().map_err(|e| format!("{p:?}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        let triple: [u8; 3] = parts
            .try_into()
            .map_err(|_| format!("expected h,s,v, got {s:?}"))?;
        Ok(HsvTriple(triple))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ReferenceArg {
    Auto,
    Hole(usize),
    Point(f64, f64),
}

impl FromStr for ReferenceArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "auto" {
            return Ok(ReferenceArg::Auto);
        }
        if let Some(index) = s.strip_prefix("hole:") {
            return index
                .parse()
                .map(ReferenceArg::Hole)
                .map_err(|e| format!("hole index {index:?}: {e}"));
        }
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected auto, hole:N or x,y, got {s:?}"))?;
        let coord = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("{v:?}: {e}"));
        Ok(ReferenceArg::Point(coord(x)?, coord(y)?))
    }
}

fn init_logging(cli: &Cli, settings: &Settings) {
    #[cfg(feature = "tracing")]
    {
        let _ = settings;
        motorsichel::core::init_tracing(cli.json_logs);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let level = motorsichel::core::level_from_verbosity(cli.verbose, settings.debug_mode);
        let _ = motorsichel::core::init_with_level(level);
        if cli.json_logs {
            log::warn!("--json-logs needs the tracing feature, using plain logs");
        }
    }
}

fn run_calibrate(session: &mut MeasurementSession, args: &CalibrateArgs) -> Result<(), CliError> {
    let scale = session.settings().scale_factor;
    let board = CheckerboardSpec::new(args.rows, args.cols, args.square)
        .map_err(|e| PipelineError::InvalidParameter(e.to_string()))?;
    let meta = CalibrationMeta {
        owner: args.owner.clone(),
        camera: args.camera.clone(),
        lens: args.lens.clone(),
        focal_length_mm: args.focal,
        scale_factor: scale,
    };
    meta.check().map_err(PipelineError::from)?;
    let frames = io::load_calibration_images(&args.images, scale)?;
    let record = session.calibrate(&frames, &board, &meta, &CalibrationParams::default())?;
    println!("mean reprojection error: {:.4} px", record.mean_error);
    let path = session.save_calibration()?;
    println!("calibration written to {}", path.display());
    Ok(())
}

fn run_measure(session: &mut MeasurementSession, args: &MeasureArgs) -> Result<(), CliError> {
    let scale = session.settings().scale_factor;
    session.load_calibration(&args.calibration)?;
    session.load_chessboard_image(&io::load_image(&args.chessboard, scale)?)?;
    if let Some(scene) = session.scene() {
        println!(
            "object distance {:.1} mm, {:.5} mm/px",
            scene.object_distance_mm,
            scene.mm_per_px.get()
        );
    }
    session.load_object_image(&io::load_image(&args.object, scale)?)?;

    let morph = match args.morph {
        Some(code) => MorphMode::try_from(code).map_err(PipelineError::InvalidParameter)?,
        None => session.settings().morph_mode,
    };
    let channel2 = args
        .hsv2_lower
        .zip(args.hsv2_upper)
        .map(|(lower, upper)| HsvRange::new(lower.0, upper.0));
    session.binarize(SegmentationParams {
        channel1: HsvRange::new(args.hsv_lower.0, args.hsv_upper.0),
        channel2,
        morph,
    })?;

    let contours = session.find_contours()?;
    println!(
        "{} contours, {} holes",
        contours.len(),
        contours.iter().filter(|c| c.is_hole).count()
    );
    let origin = match args.reference {
        ReferenceArg::Auto => session.set_reference_auto()?,
        ReferenceArg::Hole(index) => session.set_reference_to_hole(index)?,
        ReferenceArg::Point(x, y) => {
            let p = Point2::new(x, y);
            session.set_reference(p)?;
            p
        }
    };
    info!("reference point ({:.1}, {:.1})", origin.x, origin.y);

    session.set_part_name(DrawingName::new(args.manufacturer.clone(), args.model.clone()));
    let out = session.export()?;
    println!("drawing: {}", out.drawing.display());
    println!("report: {}", out.report_text.display());
    Ok(())
}

fn run(cli: Cli) -> Result<(), CliError> {
    let workspace = Workspace::new(&cli.workspace);
    let settings = Settings::load_or_default(&workspace)?;
    init_logging(&cli, &settings);
    workspace.ensure()?;
    let mut session = MeasurementSession::new(settings, workspace);

    match &cli.command {
        Command::Calibrate(args) => run_calibrate(&mut session, args),
        Command::Measure(args) => run_measure(&mut session, args),
        Command::Chart => {
            let path = session.workspace().res_dir().join("hsv_chart.png");
            hsv_reference_chart().save(&path)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_argument_forms() {
        assert_eq!("auto".parse::<ReferenceArg>(), Ok(ReferenceArg::Auto));
        assert_eq!("hole:3".parse::<ReferenceArg>(), Ok(ReferenceArg::Hole(3)));
        assert_eq!(
            "12.5, 40".parse::<ReferenceArg>(),
            Ok(ReferenceArg::Point(12.5, 40.0))
        );
        assert!("hole:x".parse::<ReferenceArg>().is_err());
        assert!("middle".parse::<ReferenceArg>().is_err());
    }

    #[test]
    fn hsv_triples_need_three_bytes() {
        assert_eq!("10,20,30".parse::<HsvTriple>().unwrap().0, [10, 20, 30]);
        assert!("10,20".parse::<HsvTriple>().is_err());
        assert!("10,20,300".parse::<HsvTriple>().is_err());
    }
}
