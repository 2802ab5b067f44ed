//! REPL – the interactive terminal dashboard.
//!
//! Supported slash-commands:
//!   /help              – show this list
//!   /status            – connection badge, supervisor state and broker
//!   /latest            – latest value and sparkline per channel
//!   /watch [secs]      – redraw the dashboard every refresh for `secs` (default 10)
//!   /debug [n]         – newest `n` debug lines (default 50)
//!   /reconnect         – restart the broker client with the last configuration
//!   /disconnect        – stop the broker client
//!   /clear             – empty every channel buffer
//!   /quit | /exit      – gracefully exit the CLI

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;
use iotdash_middleware::ConnectionSupervisor;
use iotdash_types::DebugRecord;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::render;

/// Debug lines shown by `/debug` without an argument.
pub const DEFAULT_DEBUG_LINES: usize = 50;

/// Duration of `/watch` without an argument.
pub const DEFAULT_WATCH: Duration = Duration::from_secs(10);

const SPARK_WIDTH: usize = 40;

/// A parsed slash-command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Latest,
    Watch(Duration),
    Debug(usize),
    Reconnect,
    Disconnect,
    Clear,
    Quit,
    Unknown(String),
}

/// Parse one input line. Arguments that fail to parse fall back to the
/// command's default.
pub fn parse_command(line: &str) -> Command {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Command::Unknown(String::new());
    };
    let arg = parts.next();
    match head {
        "/help" | "/?" => Command::Help,
        "/status" => Command::Status,
        "/latest" => Command::Latest,
        "/watch" => Command::Watch(
            arg.and_then(|a| a.parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_WATCH),
        ),
        "/debug" => Command::Debug(
            arg.and_then(|a| a.parse::<usize>().ok())
                .unwrap_or(DEFAULT_DEBUG_LINES),
        ),
        "/reconnect" => Command::Reconnect,
        "/disconnect" => Command::Disconnect,
        "/clear" => Command::Clear,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

/// Everything the REPL needs from the rest of the process.
pub struct ReplContext {
    pub supervisor: Arc<ConnectionSupervisor>,
    pub refresh: Duration,
    pub shutdown: Arc<AtomicBool>,
    pub cockpit_url: Option<String>,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(ctx: &ReplContext) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };

    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let prompt = format!("{} ", "iotdash>".bold().cyan());
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                ctx.shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(cmd);

        match parse_command(cmd) {
            Command::Help => cmd_help(),
            Command::Status => cmd_status(ctx),
            Command::Latest => cmd_latest(ctx),
            Command::Watch(duration) => cmd_watch(ctx, duration),
            Command::Debug(n) => cmd_debug(ctx, n),
            Command::Reconnect => cmd_reconnect(ctx),
            Command::Disconnect => cmd_disconnect(ctx),
            Command::Clear => cmd_clear(ctx),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                ctx.shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "iotdash Commands".bold().underline());
    println!("  {}         – connection badge and broker", "/status".bold().cyan());
    println!("  {}         – latest value per channel", "/latest".bold().cyan());
    println!("  {}   – live dashboard (default 10 s)", "/watch [secs]".bold().cyan());
    println!("  {}      – newest debug lines (default 50)", "/debug [n]".bold().cyan());
    println!("  {}      – restart the broker client", "/reconnect".bold().cyan());
    println!("  {}     – stop the broker client", "/disconnect".bold().cyan());
    println!("  {}          – clear all charts", "/clear".bold().cyan());
    println!("  {}   – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(ctx: &ReplContext) {
    let store = ctx.supervisor.store();
    println!("  Status     {}", render::badge(store.connection_state()));
    println!("  Client     {:?}", ctx.supervisor.state());
    if let Some(cfg) = ctx.supervisor.last_config() {
        println!(
            "  Broker     {}:{} ({})",
            cfg.host.bold(),
            cfg.port,
            cfg.subscription_pattern().dimmed()
        );
    }
    println!(
        "  Buffers    {} channel(s) × {} samples, debug ring {}",
        store.channels().len(),
        store.buffer_capacity(),
        store.debug_capacity()
    );
    if let Some(url) = &ctx.cockpit_url {
        println!("  Cockpit    {}", url.bold());
    }
}

fn cmd_latest(ctx: &ReplContext) {
    let snapshot = ctx.supervisor.store().frame(0);
    for line in render::dashboard(&snapshot, SPARK_WIDTH, 0) {
        println!("{line}");
    }
}

fn cmd_watch(ctx: &ReplContext, duration: Duration) {
    // `None` when the deadline lies past what `Instant` can hold.
    let deadline = Instant::now().checked_add(duration);
    let mut stdout = io::stdout();
    while deadline.is_none_or(|d| Instant::now() < d) && !ctx.shutdown.load(Ordering::SeqCst) {
        let snapshot = ctx.supervisor.store().frame(10);
        // Clear screen, cursor home.
        print!("\x1B[2J\x1B[H");
        for line in render::dashboard(&snapshot, SPARK_WIDTH, 10) {
            println!("{line}");
        }
        println!();
        println!("  {}", "watching… returns to the prompt when the timer ends".dimmed());
        stdout.flush().ok();
        let remaining =
            deadline.map_or(ctx.refresh, |d| d.saturating_duration_since(Instant::now()));
        thread::sleep(ctx.refresh.min(remaining));
    }
}

fn cmd_debug(ctx: &ReplContext, n: usize) {
    let lines = ctx.supervisor.store().snapshot_debug();
    if lines.is_empty() {
        println!("  {}", "(debug log is empty)".dimmed());
        return;
    }
    for line in lines.iter().take(n) {
        println!("  {line}");
    }
}

fn cmd_reconnect(ctx: &ReplContext) {
    match ctx.supervisor.reconnect() {
        Ok(outcome) => println!("  {} reconnect: {:?}", "✓".green().bold(), outcome),
        Err(e) => println!("  {}: {}", "Reconnect failed".red(), e),
    }
}

fn cmd_disconnect(ctx: &ReplContext) {
    ctx.supervisor.stop();
    println!("  {} client stopped", "✓".green().bold());
}

fn cmd_clear(ctx: &ReplContext) {
    let store = ctx.supervisor.store();
    store.clear_all();
    store.log_event(DebugRecord::lifecycle("repl", "buffers cleared"));
    println!("  {} buffers cleared", "✓".green().bold());
}
