use tokio::task::JoinHandle;
use uuid::Uuid;

/// A live, cancelable scheduling handle backing a task's next fire.
///
/// Wraps the timer's join handle as an opaque cancelable resource; the
/// dispatch table never inspects the underlying future.
#[derive(Debug)]
pub struct ArmedTimer {
    /// Identity of this arming, so a fired timer only removes its own entry
    /// and never one installed by a newer `schedule` call.
    pub timer_id: Uuid,
    /// Trigger kind tag that produced this timer, for logging.
    pub kind: &'static str,
    handle: JoinHandle<()>,
}

impl ArmedTimer {
    pub fn new(timer_id: Uuid, kind: &'static str, handle: JoinHandle<()>) -> Self {
        Self {
            timer_id,
            kind,
            handle,
        }
    }

    /// Cancel the pending fire. A no-op if the timer already fired.
    pub fn cancel(self) {
        self.handle.abort();
    }
}
