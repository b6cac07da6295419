//! Drains the [`EventRepository`] to the API.
//!
//! At most one flush cycle is in flight at any time. [`FlushManager::flush_now`] never blocks:
//! it either starts a cycle on a background thread or attaches the caller's listener to the
//! cycle already running.
use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use crate::{
    clock::Clock,
    event::ExportedEvent,
    network::{Connectivity, NetworkTransport},
    repository::EventRepository,
};

/// Default for the number of failed attempts after which an event is dropped.
pub const DEFAULT_MAX_TRIES: u32 = 10;

/// Statuses meaning the request is malformed and resending it verbatim can never succeed.
pub const PERMANENT_FAILURE_CODES: [u16; 8] = [400, 401, 403, 404, 405, 410, 413, 422];

/// How a flush cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Every pending event was processed.
    Completed,
    /// A delivery failed; the remaining events wait for the next cycle.
    StoppedEarly,
    /// No connectivity, nothing was attempted.
    Offline,
    /// Pending events could not be read.
    StorageFailed,
}

/// Summary of one flush cycle, handed to completion listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub outcome: FlushOutcome,
    /// Delivered and removed.
    pub sent: usize,
    /// Refused permanently by the server (or unaddressable) and removed.
    pub rejected: usize,
    /// Removed after running out of tries.
    pub dropped: usize,
    /// Flagged to be skipped and left in place.
    pub skipped: usize,
    /// Still pending after this cycle.
    pub retained: usize,
}

impl FlushReport {
    fn new(outcome: FlushOutcome) -> FlushReport {
        FlushReport {
            outcome,
            sent: 0,
            rejected: 0,
            dropped: 0,
            skipped: 0,
            retained: 0,
        }
    }
}

/// One-shot listener invoked when the cycle serving a [`FlushManager::flush_now`] call ends.
pub type FlushListener = Box<dyn FnOnce(&FlushReport) + Send>;

type FlushFinishListener = Arc<dyn Fn(&FlushReport) + Send + Sync>;

enum Delivery {
    Sent,
    Rejected,
    Failed,
}

/// Single-flight flush driver. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct FlushManager {
    inner: Arc<Inner>,
}

struct Inner {
    repository: Arc<EventRepository>,
    transport: Arc<dyn NetworkTransport>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    max_tries: u32,
    running: AtomicBool,
    /// Listeners waiting for the end of the current cycle. Only locked for short critical
    /// sections; never held across I/O.
    waiters: Mutex<Vec<FlushListener>>,
    on_flush_finish: Mutex<Option<FlushFinishListener>>,
}

impl FlushManager {
    pub fn new(
        repository: Arc<EventRepository>,
        transport: Arc<dyn NetworkTransport>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        max_tries: u32,
    ) -> FlushManager {
        FlushManager {
            inner: Arc::new(Inner {
                repository,
                transport,
                connectivity,
                clock,
                max_tries,
                running: AtomicBool::new(false),
                waiters: Mutex::new(Vec::new()),
                on_flush_finish: Mutex::new(None),
            }),
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.inner.max_tries
    }

    /// Whether a flush cycle is currently in flight.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Register a listener called at the end of every flush cycle, replacing the previous one.
    pub fn set_on_flush_finish(&self, listener: impl Fn(&FlushReport) + Send + Sync + 'static) {
        *self
            .inner
            .on_flush_finish
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
    }

    /// Start a flush cycle, or join the one already in flight.
    ///
    /// `listener` is called exactly once, when the cycle that serves this call ends. Returns
    /// `true` if this call started a new cycle.
    pub fn flush_now(&self, listener: Option<FlushListener>) -> bool {
        let started = {
            let mut waiters = self
                .inner
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            waiters.extend(listener);
            self.inner
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        };
        if !started {
            log::debug!(target: "beacon", "flush already running, waiting for it to finish");
            return false;
        }

        let manager = self.clone();
        let spawned = std::thread::Builder::new()
            .name("beacon-flush".to_owned())
            .spawn(move || manager.run());
        if let Err(err) = spawned {
            log::warn!(target: "beacon", "cannot spawn flush thread, flushing inline: {:?}", err);
            self.run();
        }
        true
    }

    /// Connectivity callback: flush as soon as the network is back.
    pub fn on_connectivity_changed(&self, online: bool) {
        if online {
            log::debug!(target: "beacon", "connectivity regained");
            self.flush_now(None);
        }
    }

    fn run(&self) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.cycle()));
        let report = result.unwrap_or_else(|_panic| {
            log::warn!(target: "beacon", "flush cycle panicked");
            FlushReport::new(FlushOutcome::StoppedEarly)
        });
        self.finish(report);
    }

    fn finish(&self, report: FlushReport) {
        let listeners = {
            let mut waiters = self
                .inner
                .waiters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let listeners = mem::take(&mut *waiters);
            self.inner.running.store(false, Ordering::Release);
            listeners
        };

        log::debug!(target: "beacon",
                    outcome:debug = report.outcome,
                    sent = report.sent,
                    retained = report.retained;
                    "flush finished");

        for listener in listeners {
            listener(&report);
        }
        let on_flush_finish = self
            .inner
            .on_flush_finish
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(on_flush_finish) = on_flush_finish {
            on_flush_finish(&report);
        }
    }

    fn cycle(&self) -> FlushReport {
        let inner = &*self.inner;
        if !inner.connectivity.is_online() {
            log::debug!(target: "beacon", "offline, skipping flush");
            return FlushReport::new(FlushOutcome::Offline);
        }

        let events = match inner.repository.all() {
            Ok(events) => events,
            Err(err) => {
                log::warn!(target: "beacon", "cannot read pending events: {}", err);
                return FlushReport::new(FlushOutcome::StorageFailed);
            }
        };
        log::debug!(target: "beacon", pending = events.len(); "flush started");

        let now = inner.clock.now();
        let mut report = FlushReport::new(FlushOutcome::Completed);
        let mut events = events.into_iter();
        while let Some(mut event) = events.next() {
            if event.should_be_skipped {
                report.skipped += 1;
                continue;
            }
            if event.tries() > inner.max_tries {
                self.remove(&event);
                report.dropped += 1;
                continue;
            }

            match self.deliver(&event, now) {
                Delivery::Sent => {
                    self.remove(&event);
                    report.sent += 1;
                }
                Delivery::Rejected => {
                    self.remove(&event);
                    report.rejected += 1;
                }
                Delivery::Failed => {
                    event.record_failed_attempt();
                    if event.tries() > inner.max_tries {
                        log::warn!(target: "beacon",
                                   event_id:display = event.id(),
                                   tries = event.tries();
                                   "dropping event after too many failed attempts");
                        self.remove(&event);
                        report.dropped += 1;
                    } else {
                        match inner.repository.replace(&event) {
                            Ok(true) => report.retained += 1,
                            Ok(false) => {
                                log::debug!(target: "beacon",
                                            event_id:display = event.id();
                                            "event removed during delivery, not requeueing");
                            }
                            Err(err) => {
                                log::warn!(target: "beacon",
                                           event_id:display = event.id();
                                           "cannot persist failed attempt: {}", err);
                                report.retained += 1;
                            }
                        }
                    }
                    report.retained += events.len();
                    report.outcome = FlushOutcome::StoppedEarly;
                    break;
                }
            }
        }
        report.retained += report.skipped;
        report
    }

    fn deliver(&self, event: &ExportedEvent, now: f64) -> Delivery {
        let project = event.project();
        let url = match project.endpoint(event.route()) {
            Ok(url) => url,
            Err(err) => {
                log::warn!(target: "beacon",
                           event_id:display = event.id();
                           "event cannot be addressed, dropping: {}", err);
                return Delivery::Rejected;
            }
        };

        let mut headers = vec![("Content-Type", "application/json")];
        if let Some(authorization) = project.authorization.as_deref() {
            headers.push(("Authorization", authorization));
        }

        log::trace!(target: "beacon",
                    event_id:display = event.id(),
                    route:display = event.route();
                    "sending event");
        match self
            .inner
            .transport
            .post(&url, &headers, &event.request_body(now))
        {
            Ok(response) if response.is_success() => Delivery::Sent,
            Ok(response) if PERMANENT_FAILURE_CODES.contains(&response.status) => {
                log::warn!(target: "beacon",
                           event_id:display = event.id(),
                           status = response.status;
                           "event rejected by server");
                Delivery::Rejected
            }
            Ok(response) => {
                log::warn!(target: "beacon",
                           event_id:display = event.id(),
                           status = response.status;
                           "event delivery failed, will retry");
                Delivery::Failed
            }
            Err(err) => {
                log::warn!(target: "beacon",
                           event_id:display = event.id();
                           "event delivery failed, will retry: {}", err);
                Delivery::Failed
            }
        }
    }

    fn remove(&self, event: &ExportedEvent) {
        if let Err(err) = self.inner.repository.remove(event.id()) {
            log::warn!(target: "beacon",
                       event_id:display = event.id();
                       "cannot remove event: {}", err);
        }
    }
}
