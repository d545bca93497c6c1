use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use tracing::{trace, warn};

use crate::builder::BuildError;

use super::{FlushError, Inner};

/// Background thread flushing a registry at a fixed interval.
pub(super) struct Scheduler {
    closing: Sender<()>,
    closed: Receiver<Result<(), FlushError>>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawns the flush thread.
    ///
    /// Errors from scheduled flushes go to `errors`. `pending` must be a receiver for the same
    /// channel: buffered errors are drained through it on shutdown.
    pub fn spawn(
        inner: Arc<Inner>,
        interval: Duration,
        errors: Sender<FlushError>,
        pending: Receiver<FlushError>,
    ) -> Result<Self, BuildError> {
        let (closing_tx, closing_rx) = bounded(0);
        let (closed_tx, closed_rx) = bounded(1);

        let flusher =
            Flusher { inner, interval, closing: closing_rx, closed: closed_tx, errors, pending };
        let handle = thread::Builder::new()
            .name("metrics-instruments-flush".to_string())
            .spawn(move || flusher.run())
            .map_err(|_| BuildError::Backend)?;

        Ok(Self { closing: closing_tx, closed: closed_rx, handle })
    }

    /// Stops the flush thread after its final flush, returning that flush's result.
    pub fn shutdown(self) -> Result<(), FlushError> {
        // Disconnecting the closing channel is the shutdown signal.
        drop(self.closing);

        let result = self.closed.recv().unwrap_or(Err(FlushError::Scheduler));
        let _ = self.handle.join();
        result
    }
}

struct Flusher {
    inner: Arc<Inner>,
    interval: Duration,
    closing: Receiver<()>,
    closed: Sender<Result<(), FlushError>>,
    errors: Sender<FlushError>,
    pending: Receiver<FlushError>,
}

impl Flusher {
    fn run(self) {
        let Flusher { inner, interval, closing, closed, errors, pending } = self;
        let ticker = tick(interval);

        loop {
            select! {
                recv(closing) -> _ => break,
                recv(ticker) -> _ => {
                    if let Err(e) = inner.flush() {
                        if let Err(TrySendError::Full(e)) = errors.try_send(e) {
                            warn!(error = %e, "Error channel is full. Dropping flush error.");
                        }
                    }
                }
            }
        }

        drop(errors);
        for e in pending.try_iter() {
            trace!(error = %e, "Discarding buffered flush error on shutdown.");
        }

        let _ = closed.send(inner.flush());
    }
}
