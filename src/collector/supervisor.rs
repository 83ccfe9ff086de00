//! Shutdown signalling and the run-with-recovery supervisor
//!
//! Every long-running loop of a porter is launched through
//! [`run_with_recovery`]: the loop runs as its own Tokio task, and if that task
//! panics the supervisor logs it and relaunches a fresh instance after a delay.
//! A single faulty subsystem therefore never takes the process down.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, warn};

/// Sending half of the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every [`Shutdown`] receiver
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Create an additional receiver
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of the shutdown signal
///
/// Dropping every [`ShutdownTrigger`] counts as a shutdown.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until shutdown is signalled
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    /// Sleep for `duration` unless shutdown arrives first
    ///
    /// Returns `false` if the sleep was cut short by shutdown.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        let slept = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        };
        slept && !self.is_triggered()
    }
}

/// Create a connected trigger/receiver pair
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run a task, relaunching it after `restart_delay` whenever it panics
///
/// The task factory is invoked once per launch. Returns once an instance
/// finishes normally, is cancelled, or shutdown is signalled while waiting to
/// restart. Dropping the returned future (e.g. aborting the task that polls
/// it) aborts the running instance as well.
pub async fn run_with_recovery<F, Fut>(
    name: &str,
    restart_delay: Duration,
    mut shutdown: Shutdown,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let handle = tokio::spawn(task());
        let _guard = AbortOnDrop(handle.abort_handle());

        match handle.await {
            Ok(()) => {
                debug!("{name} finished");
                return;
            }
            Err(e) if e.is_panic() => {
                error!("{name} panicked, restarting in {restart_delay:?}");
            }
            Err(e) => {
                warn!("{name} was cancelled: {e}");
                return;
            }
        }

        if !shutdown.sleep(restart_delay).await {
            debug!("{name} not restarted, shutting down");
            return;
        }
    }
}

/// Spawn [`run_with_recovery`] as a background task
///
/// Aborting the returned handle stops the supervised task too.
pub fn spawn_supervised<F, Fut>(
    name: String,
    restart_delay: Duration,
    shutdown: Shutdown,
    task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move { run_with_recovery(&name, restart_delay, shutdown, task).await })
}

/// Route panic reports through `tracing`, including a backtrace of the panic site
pub fn install_panic_logger() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        let thread = std::thread::current();
        let thread = thread.name().unwrap_or("<unnamed>");
        error!("thread '{thread}' {info}\n{backtrace}");
    }));
}

/// Best-effort text of a caught panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
