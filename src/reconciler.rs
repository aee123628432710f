//! Operation Result Reconciler
//!
//! Turns an invocation result into the [`OperationOutcome`] reported to the
//! caller. The policy is optimistic: a call that returned without error is a
//! success right away, even though the platform's own result may still be in
//! flight. A false positive is possible when the platform queues and later
//! rejects the operation; the next list refresh corrects it.

use crate::error::{BrokerError, Result};
use crate::invoker::PendingCompletion;
use crate::operation_state::{OperationStage, OperationTracker};
use crate::types::OperationOutcome;

/// Record the invocation result on `tracker` and produce the outcome.
///
/// The tracker must be in `Invoking`; it ends in `OptimisticDone` or `Failed`.
pub fn reconcile(
    tracker: &mut OperationTracker,
    invocation: Result<PendingCompletion>,
) -> OperationOutcome {
    match invocation {
        Ok(pending) => {
            if let Err(e) = tracker.transition_to(OperationStage::OptimisticDone) {
                log::error!("{}: {}", tracker.request(), e);
                return OperationOutcome::failed(e.to_string());
            }
            log::info!(
                "{}: issued {} call(s), awaiting {} (unconfirmed)",
                tracker.request(),
                pending.issued_calls,
                pending.action
            );
            OperationOutcome::succeeded()
        }
        Err(err) => fail(tracker, &err),
    }
}

/// Fail `tracker` with `err` and produce the failed outcome.
pub fn fail(tracker: &mut OperationTracker, err: &BrokerError) -> OperationOutcome {
    let diagnostic = diagnostic_for(err);
    log::error!("Failed to {}: {}", tracker.request(), diagnostic);
    if let Err(e) = tracker.fail(diagnostic.clone()) {
        log::error!("{}: {}", tracker.request(), e);
    }
    OperationOutcome::failed(diagnostic)
}

/// Human-readable cause, with advice matching the failure class.
pub fn diagnostic_for(err: &BrokerError) -> String {
    format!("{} ({})", err, err.hint())
}
