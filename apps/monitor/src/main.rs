//! Headless monitor for a wattlink event server.
//!
//! Connects once, logs every subscribed event and state change, and
//! reports connection health periodically until Ctrl-C.

mod config;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wattlink_realtime::{Event, EventPayload};
use wattlink_session::{EventHook, RealtimeProvider};

use crate::config::MonitorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wattlink=debug")),
        )
        .init();

    let cfg = MonitorConfig::load().context("invalid monitor configuration")?;
    let Some(token) = cfg.token.clone() else {
        anyhow::bail!(
            "no credential: set WATTLINK_TOKEN or \"token\" in {}",
            config::config_path()?.display()
        );
    };
    info!(endpoint = %cfg.connection.endpoint, events = ?cfg.events, "starting monitor");

    let provider = RealtimeProvider::websocket(cfg.connection.clone())?;
    let session = provider.open_session()?;

    let _states = session.use_state_observer(|change| {
        info!(from = %change.from, to = %change.to, reason = ?change.reason, "connection state");
    });
    let hooks: Vec<EventHook> = cfg
        .events
        .iter()
        .map(|name| session.use_event(name, log_event))
        .collect();

    tokio::select! {
        result = session.start(token) => result.context("connecting to event server")?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted before connecting");
            session.end();
            return Ok(());
        }
    }

    let mut ticker = tokio::time::interval(cfg.stats_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let metrics = session.manager().metrics();
                let stats = session.manager().memory_stats();
                info!(
                    state = %session.connection_state(),
                    received = metrics.events_received,
                    invalid = metrics.invalid_payloads,
                    reconnections = metrics.reconnections,
                    listeners = stats.total_listeners,
                    timers = stats.active_timers,
                    "health"
                );
                if session.connection_state() == wattlink_realtime::ConnectionState::Disconnected {
                    warn!(last_error = ?metrics.last_error, "connection ended, exiting");
                    break;
                }
            }
        }
    }

    drop(hooks);
    session.end();
    info!("monitor stopped");
    Ok(())
}

fn log_event(event: &Event) {
    match &event.payload {
        EventPayload::DeviceTelemetry(t) => info!(
            device = %t.device_id,
            voltage = t.voltage,
            current = t.current,
            power = t.power,
            "telemetry"
        ),
        EventPayload::DeviceStatus(s) => {
            info!(device = %s.device_id, status = ?s.status, "device status")
        }
        EventPayload::Alert(a) => warn!(
            id = %a.id,
            severity = ?a.severity,
            resolved = a.resolved,
            "{}",
            a.title
        ),
        EventPayload::SystemMetrics(m) => info!(
            devices = m.active_devices,
            total_power = m.total_power,
            alerts = m.active_alerts,
            "system metrics"
        ),
        EventPayload::Raw(data) => info!(event = %event.name, %data, "event"),
    }
}
