use std::future::Future;
use tokio::task::JoinHandle;

/// Owned handle to a background task; the task is aborted on `cancel()`
/// and when the handle is dropped.
#[derive(Debug)]
pub struct TimerHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl TimerHandle {
    pub fn spawn<F>(name: &'static str, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: tokio::spawn(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        // Drop does the abort
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            tracing::trace!("Cancelling {} task", self.name);
        }
        self.handle.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Pull-mode poll loop
    Poll,
    /// Push-mode read loop
    Stream,
    Heartbeat,
    Cleanup,
    Reconnect,
}

/// The client's background activities, one slot each
#[derive(Debug, Default)]
pub struct Timers {
    poll: Option<TimerHandle>,
    stream: Option<TimerHandle>,
    heartbeat: Option<TimerHandle>,
    cleanup: Option<TimerHandle>,
    reconnect: Option<TimerHandle>,
}

impl Timers {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::Poll => &mut self.poll,
            TimerKind::Stream => &mut self.stream,
            TimerKind::Heartbeat => &mut self.heartbeat,
            TimerKind::Cleanup => &mut self.cleanup,
            TimerKind::Reconnect => &mut self.reconnect,
        }
    }

    /// Install `handle`, aborting whatever held the slot before
    pub fn set(&mut self, kind: TimerKind, handle: TimerHandle) {
        *self.slot(kind) = Some(handle);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.slot(kind).take();
    }

    pub fn is_active(&self, kind: TimerKind) -> bool {
        let slot = match kind {
            TimerKind::Poll => &self.poll,
            TimerKind::Stream => &self.stream,
            TimerKind::Heartbeat => &self.heartbeat,
            TimerKind::Cleanup => &self.cleanup,
            TimerKind::Reconnect => &self.reconnect,
        };
        slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop the transport loops and heartbeat of the current session. The
    /// cleanup sweep and any reconnect task keep running.
    pub fn cancel_session_tasks(&mut self) {
        self.cancel(TimerKind::Poll);
        self.cancel(TimerKind::Stream);
        self.cancel(TimerKind::Heartbeat);
    }

    pub fn cancel_all(&mut self) {
        self.cancel_session_tasks();
        self.cancel(TimerKind::Cleanup);
        self.cancel(TimerKind::Reconnect);
    }
}
