use tokio::sync::broadcast;

use crate::config::OrchestratorConfig;

/// OrchestratorContext contains the configuration and the shutdown signal
/// shared by every long running task.
#[derive(Clone)]
pub struct OrchestratorContext {
    /// The configuration of the orchestrator.
    pub config: OrchestratorConfig,
    /// Broadcasts a shutdown signal to all active loops.
    ///
    /// The initial trigger comes from the binary's signal handler or from
    /// the supervisor after a fatal error. Each loop holds a broadcast
    /// receiver handle; when the `()` value arrives it finishes its current
    /// tick and terminates.
    notify_shutdown: broadcast::Sender<()>,
}

impl OrchestratorContext {
    /// Creates a new OrchestratorContext.
    pub fn new(config: OrchestratorConfig) -> Self {
        let (notify_shutdown, _) = broadcast::channel(2);
        Self {
            config,
            notify_shutdown,
        }
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }
}

/// One loop's handle on the shutdown signal.
///
/// A loop awaits `recv` at several points per tick, so the receiver is
/// dropped after the first receipt and every later call resolves
/// immediately instead of parking on a channel that will never carry
/// another value.
#[derive(Debug)]
pub struct Shutdown {
    notify: Option<broadcast::Receiver<()>>,
}

impl Shutdown {
    fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            notify: Some(notify),
        }
    }

    /// Waits until the orchestrator is shutting down.
    pub async fn recv(&mut self) {
        if let Some(notify) = &mut self.notify {
            // either the signal arrived or the sender is gone; both mean
            // the orchestrator is going down
            let _ = notify.recv().await;
            self.notify = None;
        }
    }
}
