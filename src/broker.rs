//! Package broker facade
//!
//! Wires the inspector, privilege client, flag resolver, invoker and
//! reconciler into the two entry points the rest of the program uses:
//! [`PackageBroker::perform_uninstall`] and [`PackageBroker::perform_reinstall`].
//! Neither lets an error cross the boundary; failures become `false` and a
//! log line. [`PackageBroker::execute`] returns the full [`OperationOutcome`].

use crate::error::BrokerError;
use crate::flags::resolve_flags;
use crate::inspector::PackageInspector;
use crate::invoker::{CompletionLog, OperationInvoker};
use crate::operation_state::{OperationStage, OperationTracker};
use crate::platform::{ElevationBroker, PackageRegistry, PlatformInstallerBridge};
use crate::privilege::PrivilegeClient;
use crate::reconciler;
use crate::types::{BrokerStatus, OperationOutcome, OperationRequest};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Outcome of a sequential batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    /// (package, diagnostic)
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Removes the package from the in-flight set when the operation ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    package_name: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = match self.in_flight.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.remove(&self.package_name);
    }
}

/// Entry point for privileged package operations.
pub struct PackageBroker {
    broker: Arc<dyn ElevationBroker>,
    inspector: PackageInspector,
    client: PrivilegeClient,
    invoker: OperationInvoker,
    completions: CompletionLog,
    in_flight: Mutex<HashSet<String>>,
}

impl PackageBroker {
    pub fn new(
        broker: Arc<dyn ElevationBroker>,
        registry: Arc<dyn PackageRegistry>,
        bridge: Arc<dyn PlatformInstallerBridge>,
        installer_package: impl Into<String>,
    ) -> Self {
        let inspector = PackageInspector::new(Arc::clone(&registry));
        let client = PrivilegeClient::new(
            Arc::clone(&broker),
            Arc::clone(&bridge),
            registry,
            installer_package,
        );
        let invoker = OperationInvoker::new(bridge, inspector.clone());

        Self {
            broker,
            inspector,
            client,
            invoker,
            completions: CompletionLog::spawn(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Log privileged calls instead of issuing them. Queries still run.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.invoker = self.invoker.with_dry_run(dry_run);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.invoker.is_dry_run()
    }

    pub fn status(&self) -> BrokerStatus {
        self.broker.status()
    }

    pub fn is_authorized(&self) -> bool {
        self.broker.is_authorized()
    }

    /// Start the broker's authorization flow. `on_result` runs exactly once.
    pub fn request_authorization(&self, on_result: impl FnOnce(bool) + Send + 'static) {
        self.broker.request_authorization(Box::new(on_result));
    }

    pub fn inspector(&self) -> &PackageInspector {
        &self.inspector
    }

    pub fn privilege_client(&self) -> &PrivilegeClient {
        &self.client
    }

    pub fn completions(&self) -> &CompletionLog {
        &self.completions
    }

    /// Remove a package, optionally reverting an updated system app first.
    pub fn perform_uninstall(&self, package_name: &str, reset_to_factory: bool) -> bool {
        self.execute(&OperationRequest::uninstall(package_name, reset_to_factory))
            .success
    }

    /// Restore a package that is still registered as a system stub.
    pub fn perform_reinstall(&self, package_name: &str) -> bool {
        self.execute(&OperationRequest::reinstall(package_name))
            .success
    }

    /// Run one operation end to end.
    pub fn execute(&self, request: &OperationRequest) -> OperationOutcome {
        let span = tracing::info_span!(
            "operation",
            package = %request.package_name(),
            kind = %request.kind()
        );
        let _enter = span.enter();

        let mut tracker = OperationTracker::new(request.clone());

        // Fail locally before any broker traffic
        if !self.broker.is_authorized() {
            let err = BrokerError::unauthorized(format!(
                "no broker access for {}",
                request.package_name()
            ));
            return reconciler::fail(&mut tracker, &err);
        }

        let _guard = match self.claim(request.package_name()) {
            Ok(guard) => guard,
            Err(err) => return reconciler::fail(&mut tracker, &err),
        };

        let state = match self.inspector.inspect(request.package_name()) {
            Ok(state) => state,
            Err(err) => return self.fail_and_maybe_invalidate(&mut tracker, err),
        };
        log::info!("{} -> {}", request, state);

        let flags = resolve_flags(&state, request);
        log::info!(
            "Resolved flags {:#x} for {} (reset first: {})",
            flags.bitmask,
            request,
            flags.needs_pre_reset
        );

        let handle = match self.client.privileged_installer() {
            Ok(handle) => handle,
            Err(err) => return self.fail_and_maybe_invalidate(&mut tracker, err),
        };
        let session = match self.client.session_for_caller(&handle) {
            Ok(session) => session,
            Err(err) => return self.fail_and_maybe_invalidate(&mut tracker, err),
        };

        if let Err(e) = tracker.transition_to(OperationStage::Invoking) {
            return reconciler::fail(&mut tracker, &BrokerError::state(e.to_string()));
        }

        let invocation = self
            .invoker
            .invoke(&handle, &session, request, flags, &self.completions);
        if let Err(err) = &invocation {
            if err.invalidates_handle() {
                self.client.invalidate();
            }
        }
        reconciler::reconcile(&mut tracker, invocation)
    }

    /// Run `requests` one after another, each fully resolved before the next.
    ///
    /// `on_success` runs after every successful operation, before the next
    /// one starts.
    pub fn perform_batch<'a, I, F>(&self, requests: I, mut on_success: F) -> BatchReport
    where
        I: IntoIterator<Item = &'a OperationRequest>,
        F: FnMut(&OperationRequest),
    {
        let mut report = BatchReport::default();
        for request in requests {
            let outcome = self.execute(request);
            if outcome.success {
                on_success(request);
                report.succeeded.push(request.package_name().to_string());
            } else {
                report.failed.push((
                    request.package_name().to_string(),
                    outcome.diagnostic.unwrap_or_default(),
                ));
            }
        }
        log::info!(
            "Batch finished: {} succeeded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    fn claim(&self, package_name: &str) -> Result<InFlightGuard<'_>, BrokerError> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| BrokerError::state("in-flight set lock poisoned"))?;
        if !set.insert(package_name.to_string()) {
            return Err(BrokerError::Busy(package_name.to_string()));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            package_name: package_name.to_string(),
        })
    }

    fn fail_and_maybe_invalidate(
        &self,
        tracker: &mut OperationTracker,
        err: BrokerError,
    ) -> OperationOutcome {
        if err.invalidates_handle() {
            self.client.invalidate();
        }
        reconciler::fail(tracker, &err)
    }
}
