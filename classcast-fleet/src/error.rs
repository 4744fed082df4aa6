use thiserror::Error;

/// Errors surfaced by fleet provisioning.
///
/// Clonable because a single launch result is shared with every waiter of
/// the in-flight entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FleetError {
    #[error("Cloud provider error: {0}")]
    Provider(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Timed out waiting for instance {0} to reach running state")]
    LaunchTimeout(String),

    #[error("Provisioning aborted for room {0}")]
    LaunchAborted(String),
}
