/// The lifecycle state of a loader job.
///
/// A job moves `Scheduled → Admitted → Running` and ends in one of the
/// terminal states. Redirect replay, auth retry and the SSL downgrade retry
/// move a running job back to `Scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Queued, admission not yet decided.
    #[default]
    Scheduled,

    /// Held back by the admission gate.
    Suspended,

    /// Waiting for the embedder to answer an admission question.
    Asking,

    /// Admitted, waiting for a free connection slot.
    Admitted,

    /// Bound to a transfer on the transport.
    Running,

    /// Waiting for the cache-read pass of the next pump.
    ReadingCache,

    /// Waiting for the embedder to supply credentials.
    WaitingForCredentials,

    /// Finished successfully.
    Completed,

    /// Failed; the error has been delivered.
    Failed,

    /// Cancelled by the owner or the admission gate.
    Cancelled,
}

impl LoadState {
    /// True once the job can no longer deliver callbacks.
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadState::Completed | LoadState::Failed | LoadState::Cancelled)
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: LoadState) -> bool {
        use LoadState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Cancelled) => true,
            (Scheduled, Suspended | Asking | Admitted | ReadingCache | Failed) => true,
            (Suspended, Asking | Admitted | Failed) => true,
            (Asking, Admitted | Failed) => true,
            (Admitted, Running | Failed) => true,
            (Running, Scheduled | ReadingCache | WaitingForCredentials | Completed | Failed) => {
                true
            }
            (ReadingCache, Completed | Failed | Scheduled) => true,
            (WaitingForCredentials, Scheduled | Completed | Failed) => true,
            _ => false,
        }
    }
}
