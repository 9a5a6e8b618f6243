//! Remote dispatch contract.
//!
//! The engine does not know the transport: it only requires that submission
//! is asynchronous and that the completion for a submitted task eventually
//! arrives through the unblock-signal path, waking the blocked local entry.

use orcha_core::TaskRef;

/// Remote transport failures.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// No remote transport is configured for this deployment.
    #[error("no remote transport is configured")]
    Unavailable,

    /// The transport rejected or lost the submission.
    #[error("remote submission failed: {0}")]
    Submit(String),
}

/// Hands tasks to the remote-dispatch subsystem.
pub trait RemoteQueueClient: Send + Sync {
    /// Submit a remote-tagged task asynchronously. The local entry stays
    /// blocked until the transport signals completion: once the remote
    /// result is merged into the task, the transport marks it
    /// module-complete and hands it back through the unblock-signal path.
    fn submit_async(&self, task: &TaskRef) -> Result<(), RemoteError>;

    /// Push the result of a received replica back to its origin node.
    fn push_complete(&self, task: &TaskRef) -> Result<(), RemoteError>;
}

/// Transport stub for purely-local deployments: every remote operation is
/// refused, which surfaces misrouted tasks instead of hanging them.
pub struct NullRemoteClient;

impl RemoteQueueClient for NullRemoteClient {
    fn submit_async(&self, _task: &TaskRef) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable)
    }

    fn push_complete(&self, _task: &TaskRef) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable)
    }
}
