//! X11 Async Readiness
//!
//! Lets an async loop sleep until a display connection has data to read.
//! A blocking task polls the connection's descriptor with mio and wakes the
//! loop through a [`Notify`]; the events themselves are still read with
//! [`XServer::poll_event`](crate::server::XServer::poll_event).

use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use tokio::sync::{oneshot, Notify};

use crate::server::ConnectionHandle;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub struct ConnectionReadiness {
    handle: ConnectionHandle,
    notify: Arc<Notify>,
    _task_guard: oneshot::Receiver<()>,
}

impl ConnectionReadiness {
    /// Start watching `handle`. Must be called inside a tokio runtime.
    ///
    /// The watcher stops once this value is dropped; the descriptor must stay
    /// open at least that long.
    pub fn watch(handle: ConnectionHandle) -> Result<Self> {
        let fd = handle.0;
        let notify = Arc::new(Notify::new());
        let task_notify = notify.clone();

        let (guard, task_guard) = oneshot::channel::<()>();
        let mut poll = mio::Poll::new().context("Failed to create mio Poll")?;
        let mut events = mio::Events::with_capacity(1);

        poll.registry()
            .register(&mut mio::unix::SourceFd(&fd), mio::Token(0), mio::Interest::READABLE)
            .context("Failed to register display descriptor with mio")?;

        tokio::task::spawn_blocking(move || loop {
            if guard.is_closed() {
                tracing::debug!("Readiness watcher for {} shutting down", handle);
                return;
            }

            if let Err(err) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                tracing::warn!("Display socket poll failed: {:?}", err);
                continue;
            }

            events
                .iter()
                .filter(|event| event.token() == mio::Token(0))
                .for_each(|_| task_notify.notify_one());
        });

        Ok(Self {
            handle,
            notify,
            _task_guard: task_guard,
        })
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Wait until the descriptor has become readable.
    ///
    /// Data already buffered inside the connection does not wake this, so
    /// drain the event queue before waiting.
    pub async fn wait_readable(&self) {
        self.notify.notified().await;
    }
}
