//! typecast: typing engine, bus hub and operator tools in one binary.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use typecast::bus::{net, Bus, BusError, BusHub, Command, Message, NetBus, RecvError, Topic};
use typecast::engine::Engine;
use typecast::focus::{FocusGuard, NullLens, WindowLens};
use typecast::input;
use typecast::logging;
use typecast::playback::{ConfigStore, PlaybackConfig};
use typecast::timing::SystemClock;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Replay a file into the focused window, one keystroke at a time.
#[derive(Parser, Debug)]
#[command(name = "typecast", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Tool>,

    /// Bus hub port (0 picks the first available one).
    #[arg(long, global = true, default_value_t = 0)]
    port: u16,

    /// Write diagnostics to typecast.log and stderr.
    #[arg(long, global = true)]
    logging: bool,

    /// Use an already running hub instead of starting one.
    #[arg(
        long = "extbroker",
        visible_alias = "extmqtt",
        value_name = "HOST:PORT",
        global = true
    )]
    extbroker: Option<String>,

    /// Playback config file (default: ~/.typecast/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Script to load on startup.
    #[arg(long)]
    load: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Tool {
    /// Publish one command to a running engine.
    Send {
        /// play, pause, resume, toggle-pause, stop, line, token, reload,
        /// describe, shutdown, focus-lost, focus-regained, load <path>,
        /// load-text <text>, set-config <yaml path>
        command: String,
        arg: Option<String>,
    },
    /// Print engine events as JSON lines until interrupted.
    Monitor,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = if cli.logging {
        logging::init(Path::new("."))
    } else {
        None
    };

    match &cli.command {
        None => run_engine(&cli),
        Some(Tool::Send { command, arg }) => send(&cli, command, arg.as_deref()),
        Some(Tool::Monitor) => monitor(&cli),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<PlaybackConfig> {
    match &cli.config {
        Some(path) => Ok(PlaybackConfig::load_from(path)?),
        None => Ok(PlaybackConfig::load().unwrap_or_default()),
    }
}

fn run_engine(cli: &Cli) -> anyhow::Result<()> {
    let store = ConfigStore::new(load_config(cli)?);

    let (_hub, hub_addr) = match &cli.extbroker {
        Some(addr) => (None, net::resolve(addr)?),
        None => {
            let hub = BusHub::bind(cli.port)?;
            let addr = hub.local_addr();
            (Some(hub), addr)
        }
    };
    let net = Arc::new(
        NetBus::connect(hub_addr, CONNECT_TIMEOUT)
            .with_context(|| format!("connecting to bus hub at {hub_addr}"))?,
    );
    let bus: Arc<dyn Bus> = net.clone();
    println!("typecast bus on {hub_addr}");

    let commands = bus.subscribe(&[Topic::Commands, Topic::Focus]);
    let lens: Arc<dyn WindowLens> = Arc::new(NullLens);
    let _guard = FocusGuard::new(lens.clone(), store.clone()).spawn(bus.clone());

    // Shutdown must reach the engine even when the hub is gone.
    ctrlc::set_handler(move || net.publish_local(Topic::Commands, Command::Shutdown.into()))
        .context("installing Ctrl-C handler")?;

    let mut engine = Engine::new(
        bus,
        input::default_simulator()?,
        lens,
        store,
        Arc::new(SystemClock::new()),
    );
    if let Some(path) = &cli.load {
        engine.handle(Command::Load { path: path.clone() });
    }
    engine.run(commands);
    Ok(())
}

/// Hub address for operator tools, which never start their own hub.
fn client_addr(cli: &Cli) -> anyhow::Result<SocketAddr> {
    match (&cli.extbroker, cli.port) {
        (Some(addr), _) => Ok(net::resolve(addr)?),
        (None, 0) => bail!("no bus to talk to: pass --port or --extbroker"),
        (None, port) => Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port))),
    }
}

fn send(cli: &Cli, name: &str, arg: Option<&str>) -> anyhow::Result<()> {
    let command = Command::from_cli(name, arg).map_err(anyhow::Error::msg)?;
    let bus = NetBus::connect(client_addr(cli)?, CONNECT_TIMEOUT)?;
    let topic = match command {
        Command::FocusLost | Command::FocusRegained => Topic::Focus,
        _ => Topic::Commands,
    };
    match bus.try_publish(topic, Message::Command(command)) {
        Err(e @ BusError::TooLarge { .. }) => {
            Err(e).context("text too large for the bus; use `send load <path>` instead")
        }
        other => Ok(other?),
    }
}

fn monitor(cli: &Cli) -> anyhow::Result<()> {
    let bus = NetBus::connect(client_addr(cli)?, CONNECT_TIMEOUT)?;
    let events = bus.subscribe(&[Topic::Events]);

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::Relaxed))
        .context("installing Ctrl-C handler")?;

    while running.load(Ordering::Relaxed) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok((_, message)) => {
                if let Some(event) = message.into_event() {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            Err(RecvError::Timeout) => {}
            Err(RecvError::Closed) => break,
        }
    }
    Ok(())
}
