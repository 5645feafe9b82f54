//! Coalescing log dispatcher
//!
//! Converts a stream of publish notifications into periodic batch
//! deliveries to a single [`LogSink`], bounded by a minimum
//! inter-notification interval (one delivery per ~16ms by default, about a
//! display refresh). This is coalescing, not debouncing: a pending
//! notification is never cancelled. A burst of publishes is satisfied by
//! the one already-scheduled delivery, and an explicit flush request can
//! only push that delivery later, never discard it.
//!
//! The timer runs on a single dedicated scheduling thread which also owns
//! the sink, so two notifications can never run concurrently. Every
//! delivery drains the entire buffer - a coalesced-away intermediate
//! notification therefore loses no information.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ember_logs::{LogBuffer, LogSink};
use tracing::{debug, warn};

/// Default minimum interval between sink notifications
pub const DEFAULT_MIN_NOTIFY_INTERVAL: Duration = Duration::from_millis(16);

enum Command {
    Publish,
    Flush(Duration),
    Shutdown(SyncSender<()>),
}

/// Cloneable handle used by producers to wake the dispatcher
#[derive(Clone)]
pub struct DispatchHandle {
    tx: Sender<Command>,
}

impl DispatchHandle {
    /// Wake the dispatcher after a record was published. Never blocks.
    pub fn notify_publish(&self) {
        let _ = self.tx.send(Command::Publish);
    }

    /// Ask for a delivery no earlier than `delay` from now, letting
    /// asynchronous producers catch up first. A pending delivery is
    /// rescheduled later if needed, never cancelled.
    pub fn request_flush(&self, delay: Duration) {
        let _ = self.tx.send(Command::Flush(delay));
    }
}

/// Owner of the scheduling thread
pub struct CoalescingDispatcher {
    handle: DispatchHandle,
    thread: Option<JoinHandle<()>>,
}

impl CoalescingDispatcher {
    /// Spawn the scheduling thread. The sink is moved onto that thread and
    /// is only ever called from it.
    pub fn spawn(
        buffer: Arc<LogBuffer>,
        sink: Box<dyn LogSink>,
        min_interval: Duration,
    ) -> CoalescingDispatcher {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("ember-dispatch".to_string())
            .spawn(move || run_scheduler(rx, buffer, sink, min_interval))
            .expect("failed to spawn dispatcher thread");

        CoalescingDispatcher {
            handle: DispatchHandle { tx },
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    pub fn notify_publish(&self) {
        self.handle.notify_publish();
    }

    pub fn request_flush(&self, delay: Duration) {
        self.handle.request_flush(delay);
    }

    /// Deliver everything still buffered and stop the scheduling thread.
    /// Blocks until the final batch has been handed to the sink, so no
    /// delivery can happen after this returns.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if self.handle.tx.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
        if thread.join().is_err() {
            warn!(target: "dispatch", "dispatcher thread panicked during shutdown");
        }
    }
}

impl Drop for CoalescingDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_scheduler(
    rx: Receiver<Command>,
    buffer: Arc<LogBuffer>,
    mut sink: Box<dyn LogSink>,
    min_interval: Duration,
) {
    // Treat spawn time as the last notification so a burst arriving right
    // after startup coalesces into a single delivery.
    let mut last_notify = Instant::now();
    let mut pending: Option<Instant> = None;

    loop {
        let command = match pending {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        let now = Instant::now();
        match command {
            // Pending deadline reached
            None => {
                pending = None;
                deliver(&buffer, sink.as_mut(), &mut last_notify, now);
            }
            Some(Command::Publish) => {
                if pending.is_some() {
                    // Coalesced into the delivery already scheduled
                } else if now.duration_since(last_notify) >= min_interval {
                    deliver(&buffer, sink.as_mut(), &mut last_notify, now);
                } else {
                    pending = Some(last_notify + min_interval);
                }
            }
            Some(Command::Flush(delay)) => {
                let target = (now + delay).max(last_notify + min_interval);
                match pending {
                    // A strictly later flush reschedules the pending
                    // delivery; an earlier one is satisfied by it
                    Some(existing) if target > existing => pending = Some(target),
                    Some(_) => {}
                    None if target <= now => {
                        deliver(&buffer, sink.as_mut(), &mut last_notify, now);
                    }
                    None => pending = Some(target),
                }
            }
            Some(Command::Shutdown(ack)) => {
                let records = buffer.drain();
                if !records.is_empty() {
                    sink.on_batch_ready(records);
                }
                let _ = ack.send(());
                return;
            }
        }
    }

    // All handles dropped without an explicit shutdown - deliver leftovers
    let records = buffer.drain();
    if !records.is_empty() {
        sink.on_batch_ready(records);
    }
    debug!(target: "dispatch", "dispatcher thread exiting");
}

fn deliver(buffer: &LogBuffer, sink: &mut dyn LogSink, last_notify: &mut Instant, now: Instant) {
    *last_notify = now;
    let records = buffer.drain();
    if !records.is_empty() {
        sink.on_batch_ready(records);
    }
}
