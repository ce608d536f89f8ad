use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use nudge::activity::HealthSnapshot;
use nudge::cli::{Cli, Command};
use nudge::config::Config;
use nudge::gate::FsControlPlane;
use nudge::locate::DefaultLocator;
use nudge::paths::Layout;
use nudge::session::SessionId;
use nudge::watch::{SessionArg, WatchLoop, WatchOptions};
use nudge::{shell_completion, tmux};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "nudge=info",
        1 => "nudge=debug",
        _ => "nudge=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let (config, config_path) = Config::load(&cwd)?;
    if let Some(ref path) = config_path {
        info!("loaded config from {}", path.display());
    }

    match cli.command {
        Command::Watch {
            pane,
            session,
            message,
            message_file,
            cooldown_secs,
            require_pane_active,
        } => {
            let layout = Layout::resolve(
                config.paths.codex_home.as_deref(),
                config.paths.state_dir.as_deref(),
            )?;

            let pane = tmux::resolve_pane(&pane)?;

            // Explicit session ids are validated up front; a typo must not
            // silently fall back to auto-detection.
            let session = if session == "auto" {
                SessionArg::Auto
            } else {
                SessionArg::Explicit(
                    SessionId::parse(&session)
                        .with_context(|| format!("invalid --session value '{session}'"))?,
                )
            };

            let message = match (message, message_file) {
                (Some(inline), _) => inline,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read message file {}", path.display()))?,
                (None, None) => config.watch.message.clone(),
            };

            let mut settings = config.watch;
            if let Some(cooldown) = cooldown_secs {
                if !cooldown.is_finite() || cooldown < 0.0 {
                    bail!("--cooldown-secs must be a non-negative number");
                }
                settings.cooldown_secs = cooldown;
            }
            settings.require_pane_active |= require_pane_active;

            let stop = Arc::new(AtomicBool::new(false));
            let handler_stop = Arc::clone(&stop);
            ctrlc::set_handler(move || {
                handler_stop.store(true, Ordering::Relaxed);
            })
            .context("failed to install signal handler")?;

            let mut watch = WatchLoop::new(
                WatchOptions {
                    pane: pane.clone(),
                    session,
                    message,
                },
                settings,
                layout.clone(),
                Box::new(tmux::TmuxPane::new(pane.clone())),
                Box::new(FsControlPlane::new(&layout)),
                Box::new(DefaultLocator::new(layout)),
            )?;

            info!(pane = %pane, "watching");
            watch.run(&stop)
        }
        Command::Health { pane, json } => {
            let layout = Layout::resolve(
                config.paths.codex_home.as_deref(),
                config.paths.state_dir.as_deref(),
            )?;
            // Resolve live targets through tmux, but accept a raw pane id so
            // a dead pane's last snapshot stays inspectable.
            let pane = if nudge::paths::is_pane_id(&pane) {
                pane
            } else {
                tmux::resolve_pane(&pane)?
            };

            match HealthSnapshot::load(&layout.snapshot(&pane)) {
                None => println!("no watcher snapshot for pane {pane}"),
                Some(snapshot) if json => {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                }
                Some(snapshot) => {
                    println!("pane:          {}", snapshot.pane);
                    println!(
                        "session:       {}",
                        snapshot
                            .session_id
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "unresolved".to_string())
                    );
                    println!("health:        {}", snapshot.health);
                    if let Some(detail) = &snapshot.health_detail {
                        println!("health detail: {detail}");
                    }
                    println!("health since:  {}", snapshot.health_since.to_rfc3339());
                    if let Some(event) = &snapshot.last_event {
                        println!("last event:    {event}");
                    }
                    if let Some(at) = &snapshot.last_delivery_at {
                        println!("last delivery: {}", at.to_rfc3339());
                    }
                    if let Some(turn) = snapshot.last_delivered_turn {
                        println!("last turn:     {turn}");
                    }
                }
            }
            Ok(())
        }
        Command::Completions { shell } => shell_completion::print(shell),
    }
}
