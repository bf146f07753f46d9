use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;

use clap::{ArgMatches, Args, Command, FromArgMatches};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use ledmap::detector::BackendRegistry;
use ledmap::sfm::CameraModel;
use ledmap::worker::{ExitEvent, TICK};
use ledmap::{ScanConfig, Scanner, ViewOutcome};
use log::{info, warn, LevelFilter};

/// Options shared by every backend subcommand.
#[derive(Debug, Args)]
struct ScanArgs {
    /// Directory holding the 2D maps and the 3D map.
    dir: PathBuf,

    /// Camera frames: an image file or a directory of images.
    #[arg(long)]
    device: Option<PathBuf>,

    /// Address of the LED server, for backends that need one.
    #[arg(long)]
    server: Option<String>,

    /// Camera exposure while scanning.
    #[arg(long, allow_hyphen_values = true)]
    exposure: Option<i32>,

    /// Pixel brightness threshold (0-255).
    #[arg(long)]
    threshold: Option<u8>,

    /// First LED to scan.
    #[arg(long)]
    start: Option<u32>,

    /// LED after the last one to scan.
    #[arg(long)]
    end: Option<u32>,

    /// Largest run of missing LEDs to interpolate.
    #[arg(long)]
    max_fill: Option<u32>,

    /// Keep viewpoints even if the camera moved during the scan.
    #[arg(long)]
    disable_movement_check: bool,

    /// JSON ScanConfig; command line options override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// External reconstruction command, `program [args...]`.
    #[arg(long)]
    sfm_command: Option<String>,

    /// Camera model of the reconstruction: simple_pinhole or simple_radial.
    #[arg(long, value_parser = parse_camera_model)]
    camera_model: Option<CameraModel>,

    /// Scan this many viewpoints without prompting.
    #[arg(long)]
    views: Option<u32>,

    /// More logging; repeat for trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_camera_model(value: &str) -> Result<CameraModel, String> {
    match value {
        "simple_pinhole" => Ok(CameraModel::SimplePinhole),
        "simple_radial" => Ok(CameraModel::SimpleRadial),
        other => Err(format!(
            "unknown camera model {other}, expected simple_pinhole or simple_radial"
        )),
    }
}

fn cli(registry: &BackendRegistry) -> Command {
    let mut command = Command::new("ledmap")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Map addressable LEDs to 3D positions from camera viewpoints")
        .subcommand_required(true)
        .arg_required_else_help(true);
    for name in registry.names() {
        let about = format!("Scan with the {name} LED backend");
        command = command.subcommand(ScanArgs::augment_args(Command::new(name)).about(about));
    }
    command
}

fn build_config(backend: &str, args: &ScanArgs) -> Result<ScanConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => ScanConfig::load_json(path)?,
        None => ScanConfig::default(),
    };
    config.backend = backend.to_string();
    config.output_dir = args.dir.clone();
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if args.server.is_some() {
        config.server = args.server.clone();
    }
    if let Some(exposure) = args.exposure {
        config.exposure = exposure;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(start) = args.start {
        config.led_start = start;
    }
    if let Some(end) = args.end {
        config.led_end = end;
    }
    if let Some(max_fill) = args.max_fill {
        config.max_fill = max_fill;
    }
    if args.disable_movement_check {
        config.check_movement = false;
    }
    if args.sfm_command.is_some() {
        config.sfm_command = args.sfm_command.clone();
    }
    if let Some(model) = args.camera_model {
        config.camera_model = model;
    }
    Ok(config)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        ledmap::core::init_tracing(false, level);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = ledmap::core::init_with_level(level);
    }
}

/// Operator input, read on its own thread so a pending prompt can be interrupted.
fn stdin_lines() -> io::Result<Receiver<String>> {
    let (tx, rx) = channel::bounded(1);
    thread::Builder::new().name("stdin".into()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}

/// `false` when the operator quits, stdin ends or the session is interrupted.
fn wait_for_answer(lines: &Receiver<String>, interrupt: &ExitEvent) -> bool {
    loop {
        if interrupt.is_set() {
            return false;
        }
        match lines.recv_timeout(TICK) {
            Ok(line) => return !matches!(line.trim(), "q" | "quit" | "n" | "no"),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}

/// Ask before each viewpoint.
fn prompt_next(
    view_id: u32,
    lines: &Receiver<String>,
    interrupt: &ExitEvent,
) -> io::Result<bool> {
    print!("Place the camera and press enter to scan view {view_id} (q to quit): ");
    io::stdout().flush()?;
    let next = wait_for_answer(lines, interrupt);
    if interrupt.is_set() {
        println!();
    }
    Ok(next)
}

fn run_scan(
    backend: &str,
    matches: &ArgMatches,
    registry: &BackendRegistry,
) -> Result<(), Box<dyn Error>> {
    let args = ScanArgs::from_arg_matches(matches)?;
    init_logging(args.verbose);
    let config = build_config(backend, &args)?;

    let interrupt = ExitEvent::new();
    let handler_event = interrupt.clone();
    ctrlc::set_handler(move || handler_event.set())?;

    let mut scanner = Scanner::new(config, registry)?;
    scanner.set_interrupt(interrupt.clone());
    let lines = match args.views {
        Some(_) => channel::never(),
        None => stdin_lines()?,
    };

    let mut scanned = 0;
    let result: Result<(), Box<dyn Error>> = loop {
        let next = match args.views {
            Some(views) => Ok(scanned < views && !interrupt.is_set()),
            None => prompt_next(scanner.current_view(), &lines, &interrupt),
        };
        match next {
            Ok(true) => {}
            Ok(false) => break Ok(()),
            Err(err) => break Err(err.into()),
        }
        let view_id = scanner.current_view();
        match scanner.scan_view() {
            Ok(_) if interrupt.is_set() => println!("view {view_id} interrupted"),
            Ok(ViewOutcome::Done) => println!("view {view_id} done"),
            Ok(ViewOutcome::Deleted) => {
                println!("camera moved during view {view_id}, scan it again")
            }
            Ok(ViewOutcome::Failed) => println!("view {view_id} failed, check for stray light"),
            Err(err) => break Err(err.into()),
        }
        scanned += 1;
    };
    if interrupt.is_set() {
        warn!("interrupted, switching LEDs off");
    }

    if let Some(map) = scanner.latest_map() {
        info!("latest 3D map has {} LEDs", map.len());
    }
    scanner.close();
    result
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let registry = BackendRegistry::default();
    let matches = cli(&registry).get_matches();
    match matches.subcommand() {
        Some((backend, sub)) => run_scan(backend, sub, &registry),
        None => Ok(()),
    }
}
