mod settings;
mod sources;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam::channel::{self, select, Receiver, Sender};
use driving::{Collaborators, DriveLoop, OperatorEvent, RowController, SharedTuning, StatusSnapshot};
use serial::{SerialLink, SerialPortDiscovery};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;
use crate::sources::{ImageDirectory, ThermalZone};

#[derive(Parser)]
#[command(name = "rowbot")]
#[command(about = "Follow crop rows and drive the hoe from the front and rear cameras")]
#[command(version)]
struct Cli {
    /// Settings document with tuning, driving and link sections
    #[arg(long, default_value = "state/settings.json")]
    config: PathBuf,

    /// Directory of recorded frames for the front camera
    #[arg(long)]
    front_dir: Option<PathBuf>,

    /// Directory of recorded frames for the rear camera
    #[arg(long)]
    rear_dir: Option<PathBuf>,

    /// Serial device of the controller board, probed when omitted
    #[arg(long)]
    port: Option<String>,

    /// Stop after this many status snapshots
    #[arg(long)]
    cycles: Option<u64>,

    /// Print every status snapshot as one JSON line on stdout
    #[arg(long)]
    json: bool,

    #[arg(long, default_value = "/sys/class/thermal/thermal_zone0/temp")]
    thermal_zone: PathBuf,
}

enum ConsoleCommand {
    Event(OperatorEvent),
    Quit,
}

fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim() {
        "r" | "reverse" => Some(ConsoleCommand::Event(OperatorEvent::ToggleDirection)),
        "h" | "hoe" => Some(ConsoleCommand::Event(OperatorEvent::ToggleHoe)),
        "q" | "quit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Operator keys on stdin, one command per line
fn spawn_console(commands: Sender<ConsoleCommand>) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("console".to_owned())
        .spawn(move || {
            for line in io::stdin().lock().lines().map_while(Result::ok) {
                match parse_command(&line) {
                    Some(command) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    None => warn!("Unknown command {:?}, expected reverse, hoe or quit", line.trim()),
                }
            }
        })
        .context("Spawn console thread")?;

    Ok(())
}

fn report(snapshot: StatusSnapshot, json: bool) -> anyhow::Result<()> {
    debug!(
        side = ?snapshot.side,
        stage = ?snapshot.stage,
        mode = ?snapshot.mode,
        lost_context = snapshot.lost_context,
        left = snapshot.command.drive.left,
        right = snapshot.command.drive.right,
        gantry = snapshot.command.gantry.step_delay_us,
        forwarded = snapshot.forwarded,
        "Cycle"
    );

    if json {
        let snapshot = StatusSnapshot { preview: None, ..snapshot };
        println!("{}", serde_json::to_string(&snapshot).context("Serialize status")?);
    }

    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(&cli.config)?;

    let discovery = SerialPortDiscovery {
        baud_rate: settings.link.baud_rate,
        vendor_id: settings.link.usb_vendor_id,
        pinned: cli.port.clone(),
        read_timeout: Duration::from_millis(settings.link.read_timeout_ms),
    };
    let link = Arc::new(SerialLink::spawn(discovery, settings.link.clone())?);
    link.register_callback(|message| info!(target: "controller", "{}", message.text()));

    let collaborators = Collaborators {
        frames: Arc::new(ImageDirectory::new(cli.front_dir.as_deref(), cli.rear_dir.as_deref())?),
        temperature: Some(Arc::new(ThermalZone { path: cli.thermal_zone.clone() })),
        tuning: SharedTuning::new(settings.tuning).context("Invalid tuning")?,
    };

    let (tx_status, rx_status) = channel::bounded::<StatusSnapshot>(8);
    let (tx_console, rx_console) = channel::bounded::<ConsoleCommand>(8);
    spawn_console(tx_console)?;

    let controller = Arc::new(RowController::new(settings.driving));
    let drive = DriveLoop::spawn(controller, collaborators, link, tx_status)?;
    info!("Drive loop running, type reverse, hoe or quit");

    let closed: Receiver<ConsoleCommand> = channel::never();
    let mut console_open = true;
    let mut seen = 0;

    loop {
        let console = if console_open { &rx_console } else { &closed };
        select! {
            recv(rx_status) -> snapshot => {
                let Ok(snapshot) = snapshot else { break };
                report(snapshot, cli.json)?;

                seen += 1;
                if cli.cycles.map_or(false, |cycles| seen >= cycles) {
                    info!(cycles = seen, "Cycle limit reached");
                    break;
                }
            }
            recv(console) -> command => match command {
                Ok(ConsoleCommand::Event(event)) => drive.handle_event(event),
                Ok(ConsoleCommand::Quit) => break,
                // stdin closed, keep driving
                Err(_) => console_open = false,
            },
            default(Duration::from_millis(500)) => {
                if !drive.is_running() {
                    break;
                }
            }
        }
    }

    let halted = drive.halted();
    drive.shutdown();

    if halted {
        bail!("Drive loop halted on an invalid actuator command");
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
