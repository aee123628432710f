//! In-memory platform used by the integration tests.
//!
//! One `FakePlatform` plays all three platform roles and records every call
//! so tests can assert on broker traffic.

#![allow(dead_code)]

use pkgbroker::error::{BrokerError, Result};
use pkgbroker::platform::{
    Binder, Bundle, CallerIdentity, CompletionStatus, CompletionTarget, DELETE_SYSTEM_APP,
    ElevationBroker, FLAG_SYSTEM, FLAG_UPDATED_SYSTEM_APP, InstallerSession,
    MATCH_UNINSTALLED_PACKAGES, PACKAGE_INSTALLER_DESCRIPTOR, PACKAGE_MANAGER_DESCRIPTOR,
    PackageInfoFlags, PackageRecord, PackageRegistry, PlatformInstallerBridge, SdkLevel,
    SessionVariant,
};
use pkgbroker::{BrokerStatus, PackageBroker};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FakePackage {
    pub installed: bool,
    pub system: bool,
    pub updated: bool,
    pub enabled: bool,
}

/// A privileged call as the platform saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Uninstall { package: String, flags: u32 },
    InstallExisting {
        package: String,
        flags: u32,
        reason: i32,
        user_id: u32,
        has_extras: bool,
    },
}

pub struct FakePlatform {
    pub authorized: AtomicBool,
    pub status: Mutex<BrokerStatus>,
    pub uid: u32,
    pub current_user: u32,
    pub sdk: SdkLevel,
    packages: Mutex<BTreeMap<String, FakePackage>>,

    pub status_calls: AtomicUsize,
    pub system_service_calls: AtomicUsize,
    pub wrap_calls: AtomicUsize,
    pub session_opens: AtomicUsize,
    pub query_calls: AtomicUsize,
    calls: Mutex<Vec<Call>>,

    /// Errors keyed by the zero-based index of the uninstall call
    uninstall_failures: Mutex<BTreeMap<usize, BrokerError>>,
    install_failure: Mutex<Option<BrokerError>>,
    system_service_failure: Mutex<Option<BrokerError>>,
    /// Slows down `wrap` to widen race windows
    pub wrap_delay: Mutex<Duration>,
    /// Slows down uninstall to keep an operation in flight
    pub uninstall_delay: Mutex<Duration>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            authorized: AtomicBool::new(true),
            status: Mutex::new(BrokerStatus::Active),
            uid: 2000,
            current_user: 10,
            sdk: SdkLevel(34),
            packages: Mutex::new(BTreeMap::new()),
            status_calls: AtomicUsize::new(0),
            system_service_calls: AtomicUsize::new(0),
            wrap_calls: AtomicUsize::new(0),
            session_opens: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            uninstall_failures: Mutex::new(BTreeMap::new()),
            install_failure: Mutex::new(None),
            system_service_failure: Mutex::new(None),
            wrap_delay: Mutex::new(Duration::ZERO),
            uninstall_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn with_sdk(mut self, sdk: u32) -> Self {
        self.sdk = SdkLevel(sdk);
        self
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_package(self, name: &str, installed: bool, system: bool, updated: bool) -> Self {
        self.packages.lock().unwrap().insert(
            name.to_string(),
            FakePackage {
                installed,
                system,
                updated,
                enabled: true,
            },
        );
        self
    }

    pub fn deauthorize(&self) {
        self.authorized.store(false, Ordering::SeqCst);
        *self.status.lock().unwrap() = BrokerStatus::NotActive;
    }

    pub fn fail_next_uninstall(&self, err: BrokerError) {
        let next = self.uninstall_count();
        self.fail_uninstall_at(next, err);
    }

    /// Fail the `index`-th uninstall call (zero-based, counted over the fake's lifetime).
    pub fn fail_uninstall_at(&self, index: usize, err: BrokerError) {
        self.uninstall_failures.lock().unwrap().insert(index, err);
    }

    fn uninstall_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Uninstall { .. }))
            .count()
    }

    pub fn fail_install(&self, err: BrokerError) {
        *self.install_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_system_service(&self, err: BrokerError) {
        *self.system_service_failure.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn package(&self, name: &str) -> Option<FakePackage> {
        self.packages.lock().unwrap().get(name).cloned()
    }

    /// Total broker traffic of any kind.
    pub fn traffic(&self) -> usize {
        self.system_service_calls.load(Ordering::SeqCst)
            + self.wrap_calls.load(Ordering::SeqCst)
            + self.session_opens.load(Ordering::SeqCst)
            + self.calls.lock().unwrap().len()
    }

    fn record(name: &str, pkg: &FakePackage) -> PackageRecord {
        let mut app_flags = 0;
        if pkg.system {
            app_flags |= FLAG_SYSTEM;
        }
        if pkg.updated {
            app_flags |= FLAG_UPDATED_SYSTEM_APP;
        }
        PackageRecord {
            package_name: name.to_string(),
            app_flags,
            enabled: pkg.enabled,
        }
    }

    fn visible(pkg: &FakePackage, flags: PackageInfoFlags) -> bool {
        pkg.installed || (pkg.system && flags.contains(MATCH_UNINSTALLED_PACKAGES))
    }
}

/// Build a broker over a shared fake.
pub fn broker_over(platform: &Arc<FakePlatform>) -> PackageBroker {
    PackageBroker::new(
        platform.clone(),
        platform.clone(),
        platform.clone(),
        "com.android.shell",
    )
}

impl ElevationBroker for FakePlatform {
    fn status(&self) -> BrokerStatus {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        *self.status.lock().unwrap()
    }

    fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    fn request_authorization(&self, on_result: Box<dyn FnOnce(bool) + Send>) {
        self.authorized.store(true, Ordering::SeqCst);
        *self.status.lock().unwrap() = BrokerStatus::Active;
        on_result(true);
    }

    fn uid(&self) -> Result<u32> {
        Ok(self.uid)
    }

    fn system_service(&self, name: &str) -> Result<Binder> {
        self.system_service_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.system_service_failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(Binder::new(name))
    }

    fn wrap(&self, binder: Binder) -> Result<Binder> {
        let delay = *self.wrap_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.wrap_calls.fetch_add(1, Ordering::SeqCst);
        Ok(binder.into_proxied())
    }
}

impl PackageRegistry for FakePlatform {
    fn sdk_level(&self) -> Result<SdkLevel> {
        Ok(self.sdk)
    }

    fn query_packages(&self, flags: PackageInfoFlags) -> Result<Vec<PackageRecord>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .packages
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| Self::visible(p, flags))
            .map(|(n, p)| Self::record(n, p))
            .collect())
    }

    fn query_package(
        &self,
        package_name: &str,
        flags: PackageInfoFlags,
    ) -> Result<Option<PackageRecord>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .packages
            .lock()
            .unwrap()
            .get(package_name)
            .filter(|p| Self::visible(p, flags))
            .map(|p| Self::record(package_name, p)))
    }

    fn current_user_id(&self) -> Result<u32> {
        Ok(self.current_user)
    }
}

impl PlatformInstallerBridge for FakePlatform {
    fn sdk_level(&self) -> Result<SdkLevel> {
        Ok(self.sdk)
    }

    fn exempt_hidden_api(&self, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn package_manager_interface(&self, service: Binder) -> Result<Binder> {
        Ok(service.as_interface(PACKAGE_MANAGER_DESCRIPTOR))
    }

    fn installer_of(&self, package_manager: &Binder) -> Result<Binder> {
        if !package_manager.is_proxied() {
            return Err(BrokerError::rejected("package manager not proxied"));
        }
        // Fresh object owned by the package manager; must be wrapped again
        Ok(Binder::new(PACKAGE_INSTALLER_DESCRIPTOR))
    }

    fn open_session(
        &self,
        installer: &Binder,
        _variant: SessionVariant,
        _identity: &CallerIdentity,
    ) -> Result<()> {
        if !installer.is_proxied() {
            return Err(BrokerError::rejected("installer not proxied"));
        }
        self.session_opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn uninstall(
        &self,
        session: &InstallerSession,
        package_name: &str,
        flags: u32,
        target: &CompletionTarget,
    ) -> Result<()> {
        let delay = *self.uninstall_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        assert!(session.installer.is_proxied(), "uninstall through unproxied installer");
        let index = self.uninstall_count();
        self.calls.lock().unwrap().push(Call::Uninstall {
            package: package_name.to_string(),
            flags,
        });
        if let Some(err) = self.uninstall_failures.lock().unwrap().remove(&index) {
            return Err(err);
        }

        let mut packages = self.packages.lock().unwrap();
        if let Some(pkg) = packages.get_mut(package_name) {
            if pkg.system && pkg.updated && flags & DELETE_SYSTEM_APP != 0 {
                // First removal of an updated system app drops the update only
                pkg.updated = false;
            } else {
                pkg.installed = false;
            }
        }
        target.deliver(package_name, CompletionStatus::Success);
        Ok(())
    }

    fn install_existing_package(
        &self,
        installer: &Binder,
        package_name: &str,
        install_flags: u32,
        install_reason: i32,
        target: &CompletionTarget,
        user_id: u32,
        extras: Option<&Bundle>,
    ) -> Result<()> {
        assert!(installer.is_proxied(), "install through unproxied installer");
        self.calls.lock().unwrap().push(Call::InstallExisting {
            package: package_name.to_string(),
            flags: install_flags,
            reason: install_reason,
            user_id,
            has_extras: extras.is_some(),
        });
        if let Some(err) = self.install_failure.lock().unwrap().take() {
            return Err(err);
        }
        if let Some(pkg) = self.packages.lock().unwrap().get_mut(package_name) {
            pkg.installed = true;
        }
        target.deliver(package_name, CompletionStatus::Success);
        Ok(())
    }
}
