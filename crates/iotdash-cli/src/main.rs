//! `iotdash` – live telemetry dashboard for MQTT sensor streams.
//!
//! ```text
//! iotdash            interactive dashboard (REPL + web cockpit)
//! iotdash publish    simulated temperature / humidity / proximity publisher
//! ```
//!
//! The dashboard:
//!
//! 1. Loads `~/.iotdash/config.toml` (running a **First-Run Wizard** when the
//!    file is absent and stdin is a terminal) and applies `IOTDASH_*`
//!    overrides.
//! 2. Starts the broker client once on a background thread.
//! 3. Serves the web cockpit on `web_port`.
//! 4. Drops the user into an **interactive REPL** with slash-commands.
//! 5. Intercepts **Ctrl-C** to stop the broker client and exit.

mod config;
mod publisher;
mod render;
mod repl;
mod sensors;
mod telemetry;

use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use colored::Colorize;
use iotdash_cockpit::CockpitServer;
use iotdash_middleware::{ConnectionSupervisor, MqttTransportFactory, SharedStore};
use iotdash_types::DEFAULT_CHANNELS;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::publisher::Publisher;
use crate::telemetry::LogSink;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("dashboard") => run_dashboard(),
        Some("publish") => {
            if let Err(code) = run_publisher() {
                std::process::exit(code);
            }
        }
        Some("help" | "-h" | "--help") => print_usage(),
        Some(other) => {
            eprintln!("{} '{}'", "Unknown subcommand:".red(), other.yellow());
            print_usage();
            std::process::exit(2);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dashboard
// ─────────────────────────────────────────────────────────────────────────────

fn run_dashboard() {
    // Logs go to stderr at `warn` so they do not tear through the REPL;
    // RUST_LOG overrides.
    let _guard = telemetry::init_tracing("iotdash", "warn", LogSink::Stderr);

    print_banner();

    if !config::config_path().exists() && std::io::stdin().is_terminal() {
        run_first_run_wizard();
    }
    let cfg = load_config();

    let store = Arc::new(SharedStore::with_capacity(
        DEFAULT_CHANNELS,
        cfg.buffer_capacity,
        cfg.debug_capacity,
    ));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::clone(&store),
        Arc::new(MqttTransportFactory),
    ));

    // ── Shared shutdown flag + Ctrl-C handler ─────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let supervisor = Arc::clone(&supervisor);
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – stopping the broker client …".yellow().bold());
            supervisor.stop();
            shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    // ── Broker client (auto-start once) ───────────────────────────────────
    let broker = cfg.to_broker_config();
    println!(
        "  Broker {}:{} ({})  topic {}",
        broker.host.bold(),
        broker.port,
        cfg.transport,
        broker.subscription_pattern().bold()
    );
    match supervisor.start(broker) {
        Ok(outcome) => info!(?outcome, "broker client started"),
        Err(e) => println!("  {}: {}", "Broker client failed to start".red(), e),
    }

    // ── Web cockpit ───────────────────────────────────────────────────────
    let cockpit_url = if cfg.web_enabled {
        spawn_cockpit(Arc::clone(&supervisor), &cfg);
        let url = format!("http://localhost:{}", cfg.web_port);
        println!("  Cockpit {}", url.bold());
        Some(url)
    } else {
        None
    };

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&repl::ReplContext {
        supervisor: Arc::clone(&supervisor),
        refresh: cfg.refresh(),
        shutdown,
        cockpit_url,
    });

    supervisor.stop();
    println!("{}", "  ✓ Exiting iotdash.".green());
}

/// Run the cockpit on its own Tokio runtime so the REPL thread stays
/// synchronous.
fn spawn_cockpit(supervisor: Arc<ConnectionSupervisor>, cfg: &Config) {
    let server = CockpitServer::new(supervisor)
        .with_port(cfg.web_port)
        .with_refresh(cfg.refresh());
    let spawned = thread::Builder::new()
        .name("iotdash-cockpit".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "failed to start cockpit runtime");
                    return;
                }
            };
            if let Err(e) = runtime.block_on(server.run()) {
                error!(error = %e, "cockpit stopped");
            }
        });
    if let Err(e) = spawned {
        error!(error = %e, "failed to spawn cockpit thread");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Publisher
// ─────────────────────────────────────────────────────────────────────────────

fn run_publisher() -> Result<(), i32> {
    let _guard = telemetry::init_tracing("iotdash-publisher", "info", LogSink::Stdout);

    let cfg = load_config();
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst)) {
            warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    let broker = cfg.to_broker_config();
    println!(
        "  Publishing to {}:{} under {} every {:.1}s (Ctrl-C to stop)",
        broker.host.bold(),
        broker.port,
        broker.base_topic.bold(),
        cfg.publish_interval().as_secs_f64()
    );
    Publisher::new(broker)
        .run(&MqttTransportFactory, cfg.publish_interval(), shutdown)
        .map_err(|e| {
            eprintln!("{}: {}", "Publisher error".red(), e);
            1
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> Config {
    match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn run_first_run_wizard() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       iotdash First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found. Press Enter to accept a default.\n");

    let mut cfg = Config::default();

    cfg.broker = prompt_line(&format!("  Broker host [{}]: ", cfg.broker), &cfg.broker);
    let port = prompt_line(&format!("  Broker port [{}]: ", cfg.port), &cfg.port.to_string());
    if let Ok(p) = port.parse::<u16>() {
        cfg.port = p;
    }
    cfg.base_topic = prompt_line(&format!("  Base topic [{}]: ", cfg.base_topic), &cfg.base_topic);
    let port = prompt_line(
        &format!("  Web cockpit port [{}]: ", cfg.web_port),
        &cfg.web_port.to_string(),
    );
    if let Ok(p) = port.parse::<u16>() {
        cfg.web_port = p;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner / usage
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "iotdash".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Live MQTT telemetry dashboard");
    println!();
}

fn print_usage() {
    println!("{}", "Usage".bold().underline());
    println!("  iotdash            interactive dashboard + web cockpit");
    println!("  iotdash publish    simulated sensor publisher");
    println!();
    println!("  Config: {}", config::config_path().display());
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
