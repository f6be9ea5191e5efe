//! Daemon event loop.
//!
//! The engine sits behind one async mutex. Frames arrive on one blocking
//! thread per port, timers and link polling run as tokio tasks.

use crate::config::Config;
use crate::platform::{Interfaces, LinuxSwitch, MonotonicClock, PortSocket, RX_BUF_LEN, SoftAcl};
use common::{Error, Result};
use mrp::hal::Clock;
use mrp::{Engine, PortNo};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

pub type SharedEngine = Arc<Mutex<Engine>>;

/// MRP daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        info!("Starting MRP daemon");

        let switch = LinuxSwitch::open(&self.config)
            .map_err(|e| Error::platform(format!("bridge {}: {}", self.config.node.bridge, e)))?;
        let clock = Arc::new(MonotonicClock);
        let engine = Engine::new(
            self.config.capabilities(),
            switch.node_mac,
            switch.port_table(),
            switch.platform(clock.clone()),
        );
        let engine: SharedEngine = Arc::new(Mutex::new(engine));

        let timer_wake = Arc::new(Notify::new());
        {
            let wake = timer_wake.clone();
            engine
                .lock()
                .await
                .set_timer_waker(Box::new(move || wake.notify_one()));
        }

        let confs = self.config.instance_confs().map_err(Error::config)?;
        {
            let mut engine = engine.lock().await;
            for (id, conf) in confs {
                engine
                    .conf_set(id, conf)
                    .map_err(|e| Error::mrp(format!("instance {}: {}", id, e)))?;
                info!(instance = id, "Instance configured");
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let mut receivers = Vec::new();
        for (port, socket) in &switch.sockets {
            receivers.push(spawn_receiver(
                engine.clone(),
                switch.acl.clone(),
                *port,
                socket.clone(),
                running.clone(),
            )?);
        }

        let mut tasks = JoinSet::new();
        tasks.spawn(timer_loop(engine.clone(), clock, timer_wake));
        tasks.spawn(link_loop(
            engine.clone(),
            switch.interfaces.clone(),
            self.config.runtime.link_poll_interval,
        ));
        if !self.config.runtime.status_interval.is_zero() {
            tasks.spawn(status_loop(
                engine.clone(),
                self.config.runtime.status_interval,
            ));
        }

        wait_for_shutdown().await?;
        info!("Shutting down");

        tasks.abort_all();
        running.store(false, Ordering::Relaxed);
        engine.lock().await.shutdown();

        for handle in receivers {
            if handle.join().is_err() {
                warn!("Receive thread panicked");
            }
        }

        info!("MRP daemon stopped");
        Ok(())
    }
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

fn spawn_receiver(
    engine: SharedEngine,
    acl: SoftAcl,
    port: PortNo,
    socket: Arc<PortSocket>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name(format!("mrp-rx-{}", socket.interface()))
        .spawn(move || receive_loop(engine, acl, port, socket, running))?;
    Ok(handle)
}

fn receive_loop(
    engine: SharedEngine,
    acl: SoftAcl,
    port: PortNo,
    socket: Arc<PortSocket>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; RX_BUF_LEN];
    debug!(port, interface = socket.interface(), "Receive thread started");

    while running.load(Ordering::Relaxed) {
        match socket.recv(&mut buf) {
            Ok(Some(len)) => {
                let frame = &buf[..len];
                if acl.admits(port, frame) {
                    engine.blocking_lock().on_frame(port, frame);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(port, interface = socket.interface(), error = %e, "Receive failed");
                std::thread::sleep(crate::platform::RX_POLL);
            }
        }
    }
}

/// Sleep until the next engine deadline, or until a new timer is armed
async fn timer_loop(engine: SharedEngine, clock: Arc<MonotonicClock>, wake: Arc<Notify>) {
    loop {
        let next = engine.lock().await.next_deadline();
        match next {
            Some(deadline) => {
                let wait = Duration::from_micros(deadline.saturating_sub(clock.now_us()));
                tokio::select! {
                    _ = tokio::time::sleep(wait) => engine.lock().await.run_timers(),
                    _ = wake.notified() => {}
                }
            }
            None => wake.notified().await,
        }
    }
}

/// Ports whose state in `current` differs from `last`; updates `last`
pub fn link_changes(
    last: &mut BTreeMap<PortNo, bool>,
    current: impl IntoIterator<Item = (PortNo, bool)>,
) -> Vec<(PortNo, bool)> {
    current
        .into_iter()
        .filter(|(port, up)| last.insert(*port, *up) != Some(*up))
        .collect()
}

async fn link_loop(engine: SharedEngine, interfaces: Interfaces, poll: Duration) {
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = BTreeMap::new();

    loop {
        ticker.tick().await;
        let current: Vec<(PortNo, bool)> = interfaces
            .iter()
            .map(|(port, ifname)| (port, crate::platform::read_carrier(ifname)))
            .collect();

        let changes = link_changes(&mut last, current);
        if changes.is_empty() {
            continue;
        }

        let mut engine = engine.lock().await;
        for (port, up) in changes {
            let state = if up { "up" } else { "down" };
            info!(port, link = state, "Link change");
            engine.on_link_change(port, up);
        }
    }
}

/// One instance in the periodic status log
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub instance: mrp::InstanceId,
    pub status: mrp::InstanceStatus,
    pub notifications: mrp::NotificationStatus,
}

pub fn status_reports(engine: &Engine) -> Vec<StatusReport> {
    engine
        .instance_ids()
        .into_iter()
        .filter_map(|id| {
            Some(StatusReport {
                instance: id,
                status: engine.status(id).ok()?,
                notifications: engine.notification_status(id).ok()?,
            })
        })
        .collect()
}

async fn status_loop(engine: SharedEngine, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let reports = {
            let mut engine = engine.lock().await;
            // VLAN and STP settings are not signalled, so re-read them here
            engine.on_bridge_change();
            status_reports(&engine)
        };

        for report in reports {
            match serde_json::to_string(&report) {
                Ok(json) => info!(instance = report.instance, status = %json, "Instance status"),
                Err(e) => warn!(error = %e, "Failed to serialize status"),
            }
        }
    }
}
