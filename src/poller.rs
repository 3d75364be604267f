//! A background poller thread that periodically refreshes configuration, retrying failed refreshes
//! with exponential backoff.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc, Mutex, MutexGuard},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{Error, Result};

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval to wait between successful refreshes.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Upper bound of a random delay added to every wait. This helps to avoid multiple clients
    /// synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
    /// Number of backoff retries after a failed refresh before falling back to the regular
    /// interval.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_MAX_RETRIES`].
    pub max_retries: u32,
}

impl PollerConfig {
    /// Default value for [`PollerConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`PollerConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);
    /// Default value for [`PollerConfig::max_retries`].
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new() -> PollerConfig {
        PollerConfig::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> PollerConfig {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> PollerConfig {
        self.jitter = jitter;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> PollerConfig {
        self.max_retries = max_retries;
        self
    }
}

impl Default for PollerConfig {
    fn default() -> PollerConfig {
        PollerConfig {
            interval: PollerConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerConfig::DEFAULT_POLL_JITTER,
            max_retries: PollerConfig::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Lifecycle of a [`PollerThread`]. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

/// Delay schedule between refresh attempts (without jitter).
///
/// A failed refresh is retried after `interval * 2^retry`. Once `max_retries` retries have
/// failed, the chain is abandoned and the next attempt happens after the regular interval.
#[derive(Debug)]
struct Backoff {
    interval: Duration,
    max_retries: u32,
    retries: u32,
}

impl Backoff {
    fn new(config: &PollerConfig) -> Backoff {
        Backoff {
            interval: config.interval,
            max_retries: config.max_retries,
            retries: 0,
        }
    }

    fn on_success(&mut self) -> Duration {
        self.reset()
    }

    /// Abandon the current retry chain and return the regular interval.
    fn reset(&mut self) -> Duration {
        self.retries = 0;
        self.interval
    }

    /// Returns `None` when the retry chain is exhausted. The caller should then wait for the
    /// regular interval.
    fn on_failure(&mut self) -> Option<Duration> {
        self.retries += 1;
        if self.retries > self.max_retries {
            self.retries = 0;
            return None;
        }
        let factor = 1u32.checked_shl(self.retries).unwrap_or(u32::MAX);
        Some(self.interval.saturating_mul(factor))
    }
}

type Refresh = Box<dyn FnMut() -> Result<()> + Send>;

struct Shared {
    state: Mutex<PollerState>,
    last_error: Mutex<Option<Error>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, PollerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_last_error(&self, error: Option<Error>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = error;
    }
}

/// A configuration poller thread.
///
/// [`PollerThread::start`] performs the first refresh synchronously and then keeps refreshing in
/// a background thread until [`PollerThread::stop`] is called or the `PollerThread` is dropped.
pub struct PollerThread {
    config: PollerConfig,
    refresh: Option<Refresh>,
    shared: Arc<Shared>,
    join_handle: Option<std::thread::JoinHandle<()>>,

    /// Used to send a stop command to the poller thread.
    stop_sender: Option<std::sync::mpsc::SyncSender<()>>,

    /// Outcome of the synchronous refresh performed by `start()`.
    initial_result: Option<Result<()>>,
}

impl PollerThread {
    /// Create an idle poller that calls `refresh` on every tick.
    pub fn new(
        refresh: impl FnMut() -> Result<()> + Send + 'static,
        config: PollerConfig,
    ) -> PollerThread {
        PollerThread {
            config,
            refresh: Some(Box::new(refresh)),
            shared: Arc::new(Shared {
                state: Mutex::new(PollerState::Idle),
                last_error: Mutex::new(None),
            }),
            join_handle: None,
            stop_sender: None,
            initial_result: None,
        }
    }

    /// Refresh once on the calling thread, then start the background thread.
    ///
    /// Returns the result of the initial refresh. Unless it failed with [`Error::Unauthorized`],
    /// the background thread is still started and the caller may proceed with an empty
    /// configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the poller has already been started.
    /// - Errors of the initial refresh. [`Error::Unauthorized`] leaves the poller `Stopped`.
    /// - [`Error::Io`] if the thread failed to start.
    pub fn start(&mut self) -> Result<()> {
        let Some(mut refresh) = self.refresh.take() else {
            return Err(Error::InvalidArgument(
                "poller thread has already been started".to_owned(),
            ));
        };
        if *self.shared.state() != PollerState::Idle {
            return Err(Error::InvalidArgument(
                "poller thread has already been stopped".to_owned(),
            ));
        }

        let initial_result = refresh();
        self.shared
            .set_last_error(initial_result.as_ref().err().cloned());
        self.initial_result = Some(initial_result.clone());

        match &initial_result {
            Err(err @ Error::Unauthorized) => {
                log::warn!(target: "eppo", "initial configuration fetch failed, not polling: {:?}", err);
                *self.shared.state() = PollerState::Stopped;
                return initial_result;
            }
            Err(err) => {
                log::warn!(target: "eppo", "initial configuration fetch failed, will retry: {:?}", err);
            }
            Ok(()) => {}
        }

        // Using `sync_channel` here as it makes `stop_sender` `Sync` (shareable between threads).
        // Buffer size of 1 is enough: a stop command only needs to be delivered once.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let join_handle = std::thread::Builder::new()
            .name("eppo-poller".to_owned())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    poll_loop(&mut refresh, &config, &shared, &stop_receiver)
                }));

                if result.is_err() {
                    shared.set_last_error(Some(Error::PollerThreadPanicked));
                }
                *shared.state() = PollerState::Stopped;
            })
            .map_err(|err| {
                *self.shared.state() = PollerState::Stopped;
                Error::from(err)
            })?;

        {
            let mut state = self.shared.state();
            // The thread may have already stopped itself.
            if *state == PollerState::Idle {
                *state = PollerState::Running;
            }
        }
        self.join_handle = Some(join_handle);
        self.stop_sender = Some(stop_sender);

        initial_result
    }

    /// Returns the outcome of the initial refresh performed by [`PollerThread::start`].
    ///
    /// The initial refresh is synchronous, so this never blocks.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the poller has not been started.
    /// - The error of the initial refresh, if any.
    pub fn wait_for_configuration(&self) -> Result<()> {
        self.initial_result.clone().unwrap_or_else(|| {
            Err(Error::InvalidArgument(
                "poller thread has not been started".to_owned(),
            ))
        })
    }

    pub fn state(&self) -> PollerState {
        *self.shared.state()
    }

    /// The error of the most recent refresh, or `None` if it succeeded.
    pub fn last_error(&self) -> Option<Error> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop. A refresh that is already in
    /// flight completes, but no further refreshes are made.
    pub fn stop(&self) {
        *self.shared.state() = PollerState::Stopped;
        if let Some(stop_sender) = &self.stop_sender {
            // Error means that the receiver was dropped (thread exited) or the channel buffer is
            // full (another stop command is pending). The thread stops either way.
            let _ = stop_sender.try_send(());
        }
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// If you don't need to wait for the thread to exit, use [`PollerThread::stop`] instead.
    ///
    /// # Errors
    ///
    /// - [`Error::PollerThreadPanicked`] if the thread has panicked.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop();

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .join()
                .map_err(|_| Error::PollerThreadPanicked)?;
        }

        match self.last_error() {
            Some(Error::PollerThreadPanicked) => Err(Error::PollerThreadPanicked),
            _ => Ok(()),
        }
    }
}

fn poll_loop(
    refresh: &mut Refresh,
    config: &PollerConfig,
    shared: &Shared,
    stop_receiver: &std::sync::mpsc::Receiver<()>,
) {
    let mut backoff = Backoff::new(config);
    let mut delay = config.interval;

    loop {
        match stop_receiver.recv_timeout(jitter(delay, config.jitter)) {
            Err(RecvTimeoutError::Timeout) => {
                // Timed out. Refresh unless stopped in the meantime.
            }
            Ok(()) => {
                log::debug!(target: "eppo", "poller thread received stop command");
                return;
            }
            Err(RecvTimeoutError::Disconnected) => {
                // PollerThread has been dropped.
                log::debug!(target: "eppo", "poller thread received disconnected");
                return;
            }
        }

        if *shared.state() == PollerState::Stopped {
            return;
        }

        match refresh() {
            Ok(()) => {
                shared.set_last_error(None);
                delay = backoff.on_success();
            }
            Err(err @ Error::Unauthorized) => {
                log::warn!(target: "eppo", "stopping poller, api key was rejected: {:?}", err);
                shared.set_last_error(Some(err));
                return;
            }
            Err(err) if !err.is_recoverable() => {
                // Client errors skip the backoff chain.
                log::warn!(target: "eppo", "refresh failed, waiting for next poll: {:?}", err);
                delay = backoff.reset();
                shared.set_last_error(Some(err));
            }
            Err(err) => {
                delay = match backoff.on_failure() {
                    Some(retry_delay) => {
                        log::debug!(target: "eppo", "refresh failed, retrying in {:?}: {:?}", retry_delay, err);
                        retry_delay
                    }
                    None => {
                        log::warn!(target: "eppo", "refresh retries exhausted, waiting for next poll: {:?}", err);
                        config.interval
                    }
                };
                shared.set_last_error(Some(err));
            }
        }
    }
}

/// Apply a random jitter to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    interval + thread_rng().gen_range(Duration::ZERO..=jitter)
}
