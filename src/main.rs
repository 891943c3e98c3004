use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use geofications::config::Config;
use geofications::db::SqliteStore;
use geofications::local::LocalPlatform;
use geofications::platform::PlatformEvent;
use geofications::reminders::SaveOutcome;
use geofications::types::{now_ms, Place, Reminder};
use geofications::AppState;

#[derive(Parser)]
#[command(name = "geofications", version, about = "Date/time and location reminders")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keep reminders armed and deliver notifications. Reads "LAT LON" lines
    /// from stdin as position updates.
    Run,
    /// Create a reminder.
    Add {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// When to notify: RFC 3339 timestamp or "+SECONDS" from now.
        #[arg(long)]
        at: Option<String>,
        #[arg(long, requires_all = ["lon", "label"])]
        lat: Option<f64>,
        #[arg(long, requires_all = ["lat", "label"])]
        lon: Option<f64>,
        #[arg(long, requires_all = ["lat", "lon"])]
        label: Option<String>,
    },
    /// List reminders, most recently edited first.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Mark a reminder completed.
    Complete { id: i64 },
    /// Delete a reminder and everything it had armed.
    Delete { id: i64 },
    /// Delete all completed reminders.
    PurgeCompleted,
}

#[tokio::main]
async fn main() -> Result<()> {
    geofications::init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = Arc::new(SqliteStore::open(&config.db_path)?);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let local = LocalPlatform::new(events_tx.clone(), config.location_permission.to_permissions())?;
    let (state, service) = AppState::new(&config, store, local.platform());

    match cli.command {
        Command::Run => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let service = tokio::spawn(service.run(shutdown_rx));
            let receiver = geofications::receiver::start_receiver(
                events_rx,
                Arc::clone(&state.handler),
                Arc::clone(&state.boot),
            );
            let _ = events_tx.send(PlatformEvent::BootCompleted);
            tracing::info!("Watching reminders in {}", config.db_path.display());

            feed_positions(&local).await?;

            let _ = shutdown_tx.send(true);
            let _ = service.await;
            receiver.abort();
        }
        Command::Add {
            title,
            description,
            at,
            lat,
            lon,
            label,
        } => {
            let mut draft = Reminder::new(title, description);
            if let Some(at) = at {
                let at_ms = parse_when(&at)?;
                if at_ms <= now_ms() {
                    eprintln!("Warning: {at} is already in the past");
                }
                draft.notify_at_ms = Some(at_ms);
                draft.date_time_armed = true;
            }
            if let (Some(latitude), Some(longitude), Some(label)) = (lat, lon, label) {
                draft.place = Some(Place {
                    latitude,
                    longitude,
                    label,
                });
                draft.location_armed = true;
            }
            match state.reminders.save(draft).await? {
                SaveOutcome::Created(id) => println!("{id}"),
                outcome => bail!("reminder not created: {outcome:?}"),
            }
        }
        Command::List { json } => {
            let reminders = state.reminders.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reminders)?);
            } else {
                for r in &reminders {
                    println!("{}", describe(r));
                }
            }
        }
        Command::Complete { id } => state.reminders.set_completed(id, true)?,
        Command::Delete { id } => {
            if state.reminders.delete(id).await? == 0 {
                bail!("reminder {id} not found");
            }
        }
        Command::PurgeCompleted => {
            let deleted = state.reminders.delete_completed().await?;
            println!("{deleted}");
        }
    }
    Ok(())
}

/// Forward "LAT LON" lines from stdin to the geofence simulator until Ctrl-C.
async fn feed_positions(local: &LocalPlatform) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for Ctrl-C")?;
                return Ok(());
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_position(&line) {
                    Some((lat, lon)) => local.geofences.update_position(lat, lon),
                    None if line.trim().is_empty() => {}
                    None => tracing::warn!("Ignoring position line '{line}', expected \"LAT LON\""),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {e}");
                    stdin_open = false;
                }
            },
        }
    }
}

fn parse_position(line: &str) -> Option<(f64, f64)> {
    let mut parts = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty());
    let lat = parts.next()?.parse().ok()?;
    let lon = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((lat, lon))
}

fn parse_when(value: &str) -> Result<i64> {
    if let Some(secs) = value.strip_prefix('+') {
        let secs: i64 = secs
            .parse()
            .with_context(|| format!("invalid relative time '{value}'"))?;
        return secs
            .checked_mul(1000)
            .and_then(|ms| now_ms().checked_add(ms))
            .with_context(|| format!("relative time '{value}' is out of range"));
    }
    let at = chrono::DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid RFC 3339 time '{value}'"))?;
    Ok(at.timestamp_millis())
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn describe(r: &Reminder) -> String {
    let mut line = format!(
        "{:>4} [{}] {}",
        r.id,
        if r.completed { "x" } else { " " },
        r.title
    );
    if let Some(at) = r.notify_at_ms {
        let state = if r.date_time_armed { "armed" } else { "off" };
        line.push_str(&format!("  @ {} ({state})", format_ms(at)));
    }
    if let Some(place) = &r.place {
        let state = if r.location_armed { "armed" } else { "off" };
        line.push_str(&format!("  near {} ({state})", place.label));
    }
    line
}
