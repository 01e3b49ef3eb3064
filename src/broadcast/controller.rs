//! Periodic broadcast controller
//!
//! Owns at most one background task that, on every tick, renders the
//! configured template, sends it as a UDP datagram and mirrors it to the
//! dashboard sessions.
//!
//! `start` and `stop` cancel the running task and wait for it to finish
//! before returning, so a superseded configuration can never tick again.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::template::{render, TemplateArgs};
use crate::config::BroadcastDefaults;
use crate::net::send_datagram;
use crate::server::{broadcast_mirror_frame, BroadcastStatus};
use crate::session::{send_to_all, SessionRegistry};

/// Shortest accepted tick interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Parameters of one broadcast run
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastSettings {
    pub interval: Duration,
    pub template: String,
    pub port: u16,
    /// Datagram destination
    pub address: Ipv4Addr,
}

impl BroadcastSettings {
    /// Settings from explicit values, clamping the interval to [`MIN_INTERVAL`]
    pub fn new(interval_ms: u64, template: impl Into<String>, port: u16, address: Ipv4Addr) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms).max(MIN_INTERVAL),
            template: template.into(),
            port,
            address,
        }
    }
}

impl From<&BroadcastDefaults> for BroadcastSettings {
    fn from(defaults: &BroadcastDefaults) -> Self {
        Self::new(
            defaults.interval_ms,
            defaults.message.clone(),
            defaults.port,
            defaults.address,
        )
    }
}

struct ActiveRun {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ControllerState {
    /// Most recent settings, kept after stop for status reporting
    settings: BroadcastSettings,
    messages_sent: Arc<AtomicU64>,
    generation: u64,
    run: Option<ActiveRun>,
}

/// Start/stop/status control over the single periodic broadcaster
pub struct BroadcastController {
    registry: Arc<SessionRegistry>,
    state: Mutex<ControllerState>,
}

impl BroadcastController {
    /// Create an idle controller reporting `initial` settings until the first start
    pub fn new(registry: Arc<SessionRegistry>, initial: BroadcastSettings) -> Self {
        Self {
            registry,
            state: Mutex::new(ControllerState {
                settings: initial,
                messages_sent: Arc::new(AtomicU64::new(0)),
                generation: 0,
                run: None,
            }),
        }
    }

    /// Replace any active run with a new one using `settings`
    pub async fn start(&self, settings: BroadcastSettings) {
        let mut state = self.state.lock().await;
        if let Some(run) = state.run.take() {
            finish_run(run).await;
        }

        state.generation += 1;
        state.settings = settings.clone();
        state.messages_sent = Arc::new(AtomicU64::new(0));

        info!(
            "Starting UDP broadcast (generation {}): port {}, interval {:?}, template {}",
            state.generation, settings.port, settings.interval, settings.template
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_ticks(
            settings,
            Arc::clone(&self.registry),
            Arc::clone(&state.messages_sent),
            cancel.clone(),
        ));

        state.run = Some(ActiveRun {
            generation: state.generation,
            cancel,
            task,
        });
    }

    /// Stop the active run. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.run.take() {
            Some(run) => {
                finish_run(run).await;
                info!("Stopped broadcast");
                true
            }
            None => {
                debug!("Stop requested while idle");
                false
            }
        }
    }

    /// Snapshot of the broadcaster state
    pub async fn status(&self) -> BroadcastStatus {
        let state = self.state.lock().await;
        BroadcastStatus {
            is_active: state.run.is_some(),
            interval: state.settings.interval.as_millis() as u64,
            message_template: state.settings.template.clone(),
            clients_connected: self.registry.len().await,
            messages_sent: state.messages_sent.load(Ordering::SeqCst),
            port: state.settings.port,
        }
    }

    /// Whether a run is active
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.run.is_some()
    }
}

/// Cancel a run and wait until its task has exited
async fn finish_run(run: ActiveRun) {
    run.cancel.cancel();
    if let Err(e) = run.task.await {
        warn!("Broadcast task (generation {}) ended abnormally: {}", run.generation, e);
    }
    debug!("Broadcast generation {} finished", run.generation);
}

async fn run_ticks(
    settings: BroadcastSettings,
    registry: Arc<SessionRegistry>,
    messages_sent: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick(&settings, &registry, &messages_sent) => {}
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }
}

async fn tick(settings: &BroadcastSettings, registry: &SessionRegistry, messages_sent: &AtomicU64) {
    let args = TemplateArgs {
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        messages_sent: messages_sent.load(Ordering::SeqCst),
        clients: registry.len().await,
    };
    let payload = render(&settings.template, args).unwrap_or_else(|e| {
        warn!("Failed to render broadcast template, sending it verbatim: {}", e);
        settings.template.clone()
    });

    match send_datagram(settings.address, settings.port, payload.as_bytes()).await {
        Ok(_) => debug!("UDP broadcast sent on port {}: {}", settings.port, payload),
        Err(e) => warn!(
            "UDP broadcast to {}:{} failed: {}",
            settings.address, settings.port, e
        ),
    }

    let dashboards = registry.dashboards().await;
    send_to_all(&dashboards, &broadcast_mirror_frame(&payload), None);

    messages_sent.fetch_add(1, Ordering::SeqCst);
}
