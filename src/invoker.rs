//! Privileged Operation Invoker
//!
//! Issues the hidden uninstall / install-existing calls against the
//! privileged handle. The call's return is the primary signal; the platform's
//! own result arrives later on the completion target and is only logged.
//!
//! # Reset before uninstall
//!
//! On an updated system app the platform treats the first uninstall as
//! "revert to factory image". That step is best-effort: its failure is logged
//! and the main uninstall is attempted regardless.

use crate::error::Result;
use crate::flags::ResolvedFlags;
use crate::inspector::PackageInspector;
use crate::platform::{
    CompletionEvent, CompletionStatus, CompletionTarget, INSTALL_REASON_UNKNOWN,
    INSTALL_RESULT_ACTION, InstallerSession, PlatformInstallerBridge, UNINSTALL_RESULT_ACTION,
};
use crate::privilege::PrivilegeHandle;
use crate::types::{OperationKind, OperationRequest};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};

/// Completion events kept for diagnostics.
const COMPLETION_HISTORY: usize = 64;

/// Listener for both completion actions.
///
/// A background thread drains the channel, logs every platform result and
/// keeps the most recent ones for follow-up diagnostics.
pub struct CompletionLog {
    sender: Sender<CompletionEvent>,
    recent: Arc<Mutex<VecDeque<CompletionEvent>>>,
}

impl CompletionLog {
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel::<CompletionEvent>();
        let recent = Arc::new(Mutex::new(VecDeque::with_capacity(COMPLETION_HISTORY)));
        let sink = Arc::clone(&recent);

        std::thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                match &event.status {
                    CompletionStatus::Success => {
                        log::info!("[{}] {} completed", event.action, event.package_name)
                    }
                    CompletionStatus::Failure(reason) => log::warn!(
                        "[{}] {} reported failure: {}",
                        event.action,
                        event.package_name,
                        reason
                    ),
                }
                if let Ok(mut recent) = sink.lock() {
                    if recent.len() == COMPLETION_HISTORY {
                        recent.pop_front();
                    }
                    recent.push_back(event);
                }
            }
        });

        Self { sender, recent }
    }

    /// Completion target for `action`, feeding this log.
    pub fn target(&self, action: &'static str) -> CompletionTarget {
        CompletionTarget::new(action, Some(self.sender.clone()))
    }

    /// Most recent completion events, oldest first.
    pub fn recent(&self) -> Vec<CompletionEvent> {
        self.recent
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Latest platform result seen for `package_name`, if any arrived yet.
    pub fn last_for(&self, package_name: &str) -> Option<CompletionEvent> {
        self.recent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|e| e.package_name == package_name)
            .cloned()
    }
}

/// Token for an issued operation whose platform result is still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCompletion {
    /// Action the platform result will be delivered on
    pub action: &'static str,
    pub package_name: String,
    /// Privileged calls actually issued (0 in dry-run)
    pub issued_calls: usize,
    /// Outcome of the reset step, `None` when no reset was attempted
    pub reset_succeeded: Option<bool>,
}

/// Performs privileged calls through a [`PlatformInstallerBridge`].
#[derive(Clone)]
pub struct OperationInvoker {
    bridge: Arc<dyn PlatformInstallerBridge>,
    inspector: PackageInspector,
    dry_run: bool,
}

impl OperationInvoker {
    pub fn new(bridge: Arc<dyn PlatformInstallerBridge>, inspector: PackageInspector) -> Self {
        Self {
            bridge,
            inspector,
            dry_run: false,
        }
    }

    /// Log privileged calls instead of issuing them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Issue the privileged call(s) for `request`.
    ///
    /// # Errors
    ///
    /// Only the main call's error is returned. A failed reset step never is.
    pub fn invoke(
        &self,
        handle: &PrivilegeHandle,
        session: &InstallerSession,
        request: &OperationRequest,
        flags: ResolvedFlags,
        completions: &CompletionLog,
    ) -> Result<PendingCompletion> {
        let package_name = request.package_name();
        let action = match request.kind() {
            OperationKind::Uninstall => UNINSTALL_RESULT_ACTION,
            OperationKind::Reinstall => INSTALL_RESULT_ACTION,
        };
        let target = completions.target(action);

        if self.dry_run {
            log::info!(
                "[dry-run] would {} '{}' with flags {:#x} (reset first: {})",
                request.kind(),
                package_name,
                flags.bitmask,
                flags.needs_pre_reset
            );
            return Ok(PendingCompletion {
                action,
                package_name: package_name.to_string(),
                issued_calls: 0,
                reset_succeeded: None,
            });
        }

        let mut issued_calls = 0;
        let mut reset_succeeded = None;

        if flags.needs_pre_reset {
            issued_calls += 1;
            reset_succeeded = Some(self.reset_to_factory(session, package_name, flags, &target));
        }

        issued_calls += 1;
        match request.kind() {
            OperationKind::Uninstall => {
                self.bridge
                    .uninstall(session, package_name, flags.bitmask, &target)?;
            }
            OperationKind::Reinstall => {
                self.bridge.install_existing_package(
                    handle.installer(),
                    package_name,
                    flags.bitmask,
                    INSTALL_REASON_UNKNOWN,
                    &target,
                    session.identity.user_id,
                    None,
                )?;
            }
        }

        Ok(PendingCompletion {
            action,
            package_name: package_name.to_string(),
            issued_calls,
            reset_succeeded,
        })
    }

    fn reset_to_factory(
        &self,
        session: &InstallerSession,
        package_name: &str,
        flags: ResolvedFlags,
        target: &CompletionTarget,
    ) -> bool {
        log::info!("Attempting to reset system app '{}' before uninstalling", package_name);

        if let Err(e) = self
            .bridge
            .uninstall(session, package_name, flags.bitmask, target)
        {
            log::error!("Failed to reset system app '{}': {}", package_name, e);
            log::warn!("Falling back to plain uninstall of '{}'", package_name);
            return false;
        }

        log::info!("Reset system app '{}'", package_name);
        match self.inspector.try_inspect(package_name) {
            Ok(Some(state)) => log::info!(
                "After reset: '{}' still has updates: {}",
                package_name,
                state.has_system_update
            ),
            Ok(None) => log::info!("After reset: '{}' no longer registered", package_name),
            Err(e) => log::error!("Failed to check update status after reset: {}", e),
        }
        true
    }
}
