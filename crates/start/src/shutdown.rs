//! Shutdown coordination.
//!
//! Every way the session can end funnels into [`ShutdownCoordinator::trigger`]: termination
//! signals, the orchestrator leaving its run scope, fatal errors from supervised tasks and
//! the tracker closing. The first trigger tears the services down; later ones only record
//! fatal errors so they are never swallowed.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    sync::watch,
    task::{AbortHandle, JoinHandle},
};

use crate::services::{AssetServer, ServiceContext, Subprocess};

/// Lifecycle of the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[repr(u8)]
pub enum ShutdownState {
    Idle = 0,
    ShuttingDown = 1,
    Done = 2,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShutdownState::Idle,
            1 => ShutdownState::ShuttingDown,
            _ => ShutdownState::Done,
        }
    }
}

/// Termination signals the coordinator listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TerminationSignal {
    #[strum(serialize = "SIGINT")]
    Interrupt,
    #[strum(serialize = "SIGTERM")]
    Terminate,
}

/// What ended (or is ending) the session.
#[derive(Debug)]
pub enum Trigger {
    Signal(TerminationSignal),
    /// The orchestrator left its run scope.
    Exit,
    /// The tracker subprocess closed with this exit code.
    TrackerClosed(i32),
    /// An error nothing else handled.
    Fatal(anyhow::Error),
}

impl Trigger {
    /// The process exit code for this outcome, or the error to surface.
    pub fn into_exit_code(self) -> Result<i32> {
        match self {
            Trigger::Signal(_) | Trigger::Exit => Ok(0),
            Trigger::TrackerClosed(code) => Ok(code),
            Trigger::Fatal(error) => Err(error),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Signal(signal) => write!(f, "{}", signal),
            Trigger::Exit => write!(f, "exit"),
            Trigger::TrackerClosed(code) => write!(f, "tracker closed with code {}", code),
            Trigger::Fatal(error) => write!(f, "fatal error: {:#}", error),
        }
    }
}

struct Inner {
    state: AtomicU8,
    services: Arc<ServiceContext>,
    /// The trigger that started the shutdown.
    cause: Mutex<Option<Trigger>>,
    /// First fatal error that arrived after the shutdown started.
    late_error: Mutex<Option<anyhow::Error>>,
    state_tx: watch::Sender<ShutdownState>,
    supervised: Mutex<Vec<SupervisedTask>>,
}

/// A task started with [`ShutdownCoordinator::spawn_supervised`].
struct SupervisedTask {
    name: &'static str,
    /// Completes once the task finished and its outcome was reported.
    watcher: JoinHandle<()>,
    abort: AbortHandle,
}

/// Idempotent teardown of the launched services.
///
/// Cheap to clone; all clones share one state machine.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new(services: Arc<ServiceContext>) -> Self {
        let (state_tx, _) = watch::channel(ShutdownState::Idle);

        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ShutdownState::Idle as u8),
                services,
                cause: Mutex::new(None),
                late_error: Mutex::new(None),
                state_tx,
                supervised: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn services(&self) -> &Arc<ServiceContext> {
        &self.inner.services
    }

    /// Fire a trigger.
    ///
    /// Returns `true` if this trigger started the shutdown. Any later trigger performs no
    /// teardown; a late fatal error is kept so it still surfaces.
    pub fn trigger(&self, trigger: Trigger) -> bool {
        let started = self
            .inner
            .state
            .compare_exchange(
                ShutdownState::Idle as u8,
                ShutdownState::ShuttingDown as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if !started {
            match trigger {
                Trigger::Fatal(error) => {
                    tracing::error!(error = ?error, "Fatal error during shutdown");
                    let mut slot = lock(&self.inner.late_error);
                    if slot.is_none() {
                        *slot = Some(error);
                    }
                }
                other => {
                    tracing::debug!(trigger = %other, state = %self.state(), "Shutdown already in progress");
                }
            }
            return false;
        }

        self.inner.state_tx.send_replace(ShutdownState::ShuttingDown);

        match &trigger {
            Trigger::Fatal(error) => {
                tracing::error!(error = ?error, "Fatal error, shutting down services...")
            }
            other => tracing::info!(trigger = %other, "Shutting down services..."),
        }

        self.inner.services.release_all();
        *lock(&self.inner.cause) = Some(trigger);

        self.inner
            .state
            .store(ShutdownState::Done as u8, Ordering::SeqCst);
        self.inner.state_tx.send_replace(ShutdownState::Done);

        tracing::debug!("Shutdown sequence issued");

        true
    }

    /// Fire a [`Trigger::Fatal`].
    pub fn fail(&self, error: anyhow::Error) -> bool {
        self.trigger(Trigger::Fatal(error))
    }

    /// Resolves once the first trigger fired.
    pub async fn terminated(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|state| *state != ShutdownState::Idle).await;
    }

    /// Wait for the shutdown sequence to finish and take its outcome.
    ///
    /// The tracker's exit code wins over everything else. Otherwise a fatal error wins,
    /// even one that arrived after the shutdown started.
    pub async fn wait(&self) -> Trigger {
        let mut rx = self.inner.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == ShutdownState::Done).await;

        let cause = lock(&self.inner.cause).take().unwrap_or(Trigger::Exit);
        let late_error = lock(&self.inner.late_error).take();

        match (cause, late_error) {
            (cause @ (Trigger::TrackerClosed(_) | Trigger::Fatal(_)), _) => cause,
            (_, Some(error)) => Trigger::Fatal(error),
            (cause, None) => cause,
        }
    }

    /// Register the asset server so any trigger closes it.
    ///
    /// If the shutdown already started, the server is closed right away.
    pub fn register_asset_server(&self, server: Arc<dyn AssetServer>) -> Result<()> {
        self.inner.services.set_asset_server(server)?;
        self.release_if_shutting_down();
        Ok(())
    }

    /// Register the tracker so any trigger kills it.
    ///
    /// If the shutdown already started, the tracker is killed right away.
    pub fn register_tracker(&self, tracker: Arc<dyn Subprocess>) -> Result<()> {
        self.inner.services.set_tracker(tracker)?;
        self.release_if_shutting_down();
        Ok(())
    }

    fn release_if_shutting_down(&self) {
        if self.state() != ShutdownState::Idle {
            tracing::debug!("Service registered after shutdown started, releasing it");
            self.inner.services.release_all();
        }
    }

    /// Install a listener for a termination signal.
    ///
    /// Repeated deliveries of the signal keep funnelling into [`Self::trigger`].
    pub fn register_termination_trigger(&self, signal: TerminationSignal) -> Result<()> {
        let mut stream = signal_stream(signal)?;
        let coordinator = self.clone();

        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                tracing::debug!(%signal, "Received termination signal");
                coordinator.trigger(Trigger::Signal(signal));
            }
        });

        Ok(())
    }

    /// Returns a guard firing [`Trigger::Exit`] when dropped.
    pub fn exit_guard(&self) -> ExitGuard {
        ExitGuard {
            coordinator: self.clone(),
        }
    }

    /// Spawn a task whose failure shuts everything down.
    ///
    /// An error returned by the task, or a panic inside it, fires [`Trigger::Fatal`].
    pub fn spawn_supervised<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let coordinator = self.clone();
        let handle = tokio::spawn(task);
        let abort = handle.abort_handle();

        let watcher = tokio::spawn(async move {
            let error = match handle.await {
                Ok(Ok(())) => return,
                Ok(Err(error)) => error.context(format!("{} failed", name)),
                Err(join_error) if join_error.is_panic() => {
                    anyhow::anyhow!("{} panicked: {}", name, join_error)
                }
                Err(_) => return,
            };

            coordinator.fail(error);
        });

        lock(&self.inner.supervised).push(SupervisedTask {
            name,
            watcher,
            abort,
        });
    }

    /// Wait for every supervised task to finish.
    ///
    /// Services stop on their own once released, which is what lets their child processes
    /// be reaped. Tasks still running after `grace` are aborted; dropping them kills any
    /// child they own.
    pub async fn join_supervised(&self, grace: Duration) {
        let tasks = std::mem::take(&mut *lock(&self.inner.supervised));
        if tasks.is_empty() {
            return;
        }

        let mut names = Vec::with_capacity(tasks.len());
        let mut aborts = Vec::with_capacity(tasks.len());
        let mut watchers = Vec::with_capacity(tasks.len());
        for task in tasks {
            names.push(task.name);
            aborts.push(task.abort);
            watchers.push(task.watcher);
        }

        let all = futures::future::join_all(watchers);
        tokio::pin!(all);

        if tokio::time::timeout(grace, all.as_mut()).await.is_err() {
            tracing::warn!(
                tasks = ?names,
                grace_secs = grace.as_secs_f64(),
                "Services did not stop in time, aborting them"
            );
            for abort in &aborts {
                abort.abort();
            }
            all.await;
        }

        tracing::debug!(tasks = ?names, "Supervised tasks finished");
    }
}

/// Fires [`Trigger::Exit`] on drop.
pub struct ExitGuard {
    coordinator: ShutdownCoordinator,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.coordinator.trigger(Trigger::Exit);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(unix)]
struct SignalStream(tokio::signal::unix::Signal);

#[cfg(unix)]
impl SignalStream {
    async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[cfg(unix)]
fn signal_stream(signal: TerminationSignal) -> Result<SignalStream> {
    use tokio::signal::unix::{SignalKind, signal as unix_signal};

    let kind = match signal {
        TerminationSignal::Interrupt => SignalKind::interrupt(),
        TerminationSignal::Terminate => SignalKind::terminate(),
    };

    unix_signal(kind)
        .map(SignalStream)
        .with_context(|| format!("Failed to register {} handler", signal))
}

#[cfg(not(unix))]
struct SignalStream(TerminationSignal);

#[cfg(not(unix))]
impl SignalStream {
    async fn recv(&mut self) -> Option<()> {
        match self.0 {
            TerminationSignal::Interrupt => tokio::signal::ctrl_c().await.ok(),
            TerminationSignal::Terminate => std::future::pending().await,
        }
    }
}

#[cfg(not(unix))]
fn signal_stream(signal: TerminationSignal) -> Result<SignalStream> {
    Ok(SignalStream(signal))
}
