//! Human approval gate for side-effecting tools.
//!
//! The agent runs on the async runtime; the human answers on whatever
//! surface owns user interaction (a terminal, an IDE dialog). The gate owns a
//! dedicated interaction thread that asks the [`Approver`] one request at a
//! time. Callers post a request and await a one-shot reply, so two sessions
//! sharing a gate queue up behind the same human instead of racing prompts.
//! [`ApprovalGate::shared`] makes sure sessions that share an approver also
//! share its gate.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Whoever decides whether a host-mutating action may run.
///
/// Called on the gate's interaction thread, never on the async runtime, so a
/// blocking implementation (stdin prompt, modal dialog) is fine. Called
/// exactly once per request.
pub trait Approver: Send + Sync {
    fn confirm(&self, action: &str, purpose: &str) -> bool;
}

impl<F> Approver for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn confirm(&self, action: &str, purpose: &str) -> bool {
        self(action, purpose)
    }
}

/// Approves everything. For `--yes` runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Approver for AutoApprove {
    fn confirm(&self, _action: &str, _purpose: &str) -> bool {
        true
    }
}

/// What the human is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    /// The concrete command or action, e.g. `python3 -m pip install requests`
    pub action: String,
    /// The stated reason for running it
    pub purpose: String,
}

impl ApprovalRequest {
    pub fn new(action: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            purpose: purpose.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
    /// The run was cancelled while the request was pending.
    Cancelled,
}

struct PendingApproval {
    request: ApprovalRequest,
    reply: oneshot::Sender<bool>,
}

/// Gates currently alive, by approver. Held weakly: a gate's thread still
/// exits once the last session using it is gone.
static SHARED_GATES: LazyLock<Mutex<Vec<SharedGate>>> = LazyLock::new(|| Mutex::new(Vec::new()));

struct SharedGate {
    approver: Weak<dyn Approver>,
    requests: mpsc::WeakUnboundedSender<PendingApproval>,
}

/// Handle to the interaction thread. Cheap to clone; the thread exits once
/// every handle is dropped.
#[derive(Clone)]
pub struct ApprovalGate {
    requests: mpsc::UnboundedSender<PendingApproval>,
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("open", &!self.requests.is_closed())
            .finish()
    }
}

impl ApprovalGate {
    /// Start the interaction thread for `approver`.
    pub fn spawn(approver: Arc<dyn Approver>) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PendingApproval>();

        std::thread::Builder::new()
            .name("envmedic-approval".into())
            .spawn(move || {
                while let Some(pending) = rx.blocking_recv() {
                    // The waiter was cancelled before its turn came up.
                    if pending.reply.is_closed() {
                        debug!(action = %pending.request.action, "Skipping abandoned approval request");
                        continue;
                    }

                    let request = &pending.request;
                    let approved = catch_unwind(AssertUnwindSafe(|| {
                        approver.confirm(&request.action, &request.purpose)
                    }))
                    .unwrap_or_else(|_| {
                        warn!(action = %request.action, "Approver panicked, treating as denial");
                        false
                    });

                    debug!(action = %request.action, approved, "Approval decided");
                    let _ = pending.reply.send(approved);
                }
                debug!("Approval thread exiting");
            })?;

        Ok(Self { requests: tx })
    }

    /// The live gate for `approver`, or a newly spawned one.
    ///
    /// Approvers are matched by identity, so every clone of the same `Arc`
    /// gets the same interaction thread and its prompts never overlap.
    pub fn shared(approver: Arc<dyn Approver>) -> std::io::Result<Self> {
        let mut gates = SHARED_GATES.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        gates.retain(|gate| gate.requests.upgrade().is_some());

        let key = Arc::downgrade(&approver);
        if let Some(requests) = gates
            .iter()
            .find(|gate| Weak::ptr_eq(&gate.approver, &key))
            .and_then(|gate| gate.requests.upgrade())
        {
            debug!("Reusing approval thread for this approver");
            return Ok(Self { requests });
        }

        let gate = Self::spawn(approver)?;
        gates.push(SharedGate {
            approver: key,
            requests: gate.requests.downgrade(),
        });
        Ok(gate)
    }

    /// True when both handles feed the same interaction thread.
    pub fn same_gate(&self, other: &ApprovalGate) -> bool {
        self.requests.same_channel(&other.requests)
    }

    /// A gate with no interaction thread. Every request is denied.
    pub fn closed() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { requests: tx }
    }

    /// Ask for approval and wait for the decision.
    ///
    /// No timeout is imposed on the human. Cancelling `cancel` resolves the
    /// wait with [`ApprovalDecision::Cancelled`].
    pub async fn confirm(
        &self,
        request: ApprovalRequest,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = PendingApproval {
            request,
            reply: reply_tx,
        };

        if self.requests.send(pending).is_err() {
            warn!("Approval thread is gone, denying request");
            return ApprovalDecision::Denied;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ApprovalDecision::Cancelled,
            reply = reply_rx => match reply {
                Ok(true) => ApprovalDecision::Approved,
                Ok(false) => ApprovalDecision::Denied,
                Err(_) => ApprovalDecision::Denied,
            },
        }
    }
}
