//! A background thread that periodically triggers a flush.
use std::{
    sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender},
    thread::JoinHandle,
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{flush::FlushManager, Error, Result};

/// Configuration for [`FlushThread`].
#[derive(Debug, Clone)]
pub struct FlushThreadConfig {
    /// Interval between flushes.
    ///
    /// Defaults to [`FlushThreadConfig::DEFAULT_INTERVAL`].
    pub interval: Duration,
    /// Randomized amount subtracted from each interval, so that many devices started together
    /// do not flush in lockstep.
    ///
    /// Defaults to [`FlushThreadConfig::DEFAULT_JITTER`].
    pub jitter: Duration,
}

impl FlushThreadConfig {
    /// Default value for [`FlushThreadConfig::interval`].
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
    /// Default value for [`FlushThreadConfig::jitter`].
    pub const DEFAULT_JITTER: Duration = Duration::from_secs(5);

    pub fn new() -> FlushThreadConfig {
        FlushThreadConfig::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> FlushThreadConfig {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> FlushThreadConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for FlushThreadConfig {
    fn default() -> FlushThreadConfig {
        FlushThreadConfig {
            interval: FlushThreadConfig::DEFAULT_INTERVAL,
            jitter: FlushThreadConfig::DEFAULT_JITTER,
        }
    }
}

/// Periodic flush trigger.
///
/// Each tick calls [`FlushManager::flush_now`], so a tick that lands while a cycle is already
/// running simply joins it.
pub struct FlushThread {
    join_handle: JoinHandle<()>,
    /// Buffer of one: a second stop command can be dropped, the thread stops anyway.
    stop_sender: SyncSender<()>,
}

impl FlushThread {
    /// Start the flush thread.
    ///
    /// # Errors
    ///
    /// IO error if the thread could not be spawned.
    pub fn start(manager: FlushManager, config: FlushThreadConfig) -> std::io::Result<FlushThread> {
        let (stop_sender, stop_receiver) = sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("beacon-flush-timer".to_owned())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| loop {
                    let timeout = jitter(config.interval, config.jitter);
                    match stop_receiver.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {
                            log::debug!(target: "beacon", "periodic flush");
                            manager.flush_now(None);
                        }
                        Ok(()) => {
                            log::debug!(target: "beacon", "flush thread received stop command");
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            log::debug!(target: "beacon", "flush thread received disconnected");
                            return;
                        }
                    }
                }));
                if result.is_err() {
                    log::warn!(target: "beacon", "flush thread panicked");
                }
            })?;

        Ok(FlushThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the flush thread without waiting for it to exit.
    pub fn stop(&self) {
        // Full buffer means a stop is already pending; disconnected means the thread is gone.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the flush thread and block until it exits.
    ///
    /// A flush cycle already started by the thread keeps running on its own thread.
    ///
    /// # Errors
    ///
    /// - [`Error::FlushThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::FlushThreadPanicked)?;
        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
