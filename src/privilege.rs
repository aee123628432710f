//! Privilege Proxy Client
//!
//! Resolves and caches the privileged installer handle. Acquisition runs
//! through the elevation broker twice:
//!
//! ```text
//! system_service("package") -> broker.wrap -> IPackageManager
//!     -> getPackageInstaller() -> broker.wrap -> PrivilegeHandle
//! ```
//!
//! The installer object is itself obtained through a privileged call, so it
//! has to be proxied again; a bare installer would run with our own identity.
//!
//! The handle is a process-wide singleton in practice: [`PrivilegeClient`] is
//! shared behind an `Arc`, constructs the handle at most once, and drops it on
//! [`invalidate`](PrivilegeClient::invalidate) so the next call re-resolves.

use crate::error::{BrokerError, Result};
use crate::platform::{
    Binder, CallerIdentity, ElevationBroker, HIDDEN_API_PREFIX, InstallerSession, PACKAGE_SERVICE,
    PackageRegistry, PlatformInstallerBridge, strategy_for,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Authorized connection to the privileged installer surface.
///
/// Only [`PrivilegeClient`] can construct one.
#[derive(Debug, PartialEq, Eq)]
pub struct PrivilegeHandle {
    package_manager: Binder,
    installer: Binder,
    generation: u64,
}

impl PrivilegeHandle {
    /// Broker-proxied package manager interface
    pub fn package_manager(&self) -> &Binder {
        &self.package_manager
    }

    /// Broker-proxied installer interface
    pub fn installer(&self) -> &Binder {
        &self.installer
    }

    /// Increments every time the handle is re-resolved after invalidation
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Connection manager for the privileged installer handle.
pub struct PrivilegeClient {
    broker: Arc<dyn ElevationBroker>,
    bridge: Arc<dyn PlatformInstallerBridge>,
    registry: Arc<dyn PackageRegistry>,
    installer_package: String,
    cached: Mutex<Option<Arc<PrivilegeHandle>>>,
    generation: AtomicU64,
}

impl PrivilegeClient {
    pub fn new(
        broker: Arc<dyn ElevationBroker>,
        bridge: Arc<dyn PlatformInstallerBridge>,
        registry: Arc<dyn PackageRegistry>,
        installer_package: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            bridge,
            registry,
            installer_package: installer_package.into(),
            cached: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Return the cached handle, resolving it through the broker on first use.
    ///
    /// Concurrent callers block on the same lock, so the broker wrap runs at
    /// most once and everyone observes the same `Arc`.
    ///
    /// # Errors
    ///
    /// Propagates the broker/bridge error unchanged; nothing is cached on failure.
    pub fn privileged_installer(&self) -> Result<Arc<PrivilegeHandle>> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| BrokerError::state("privileged handle lock poisoned"))?;

        if let Some(handle) = cached.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(self.acquire()?);
        log::info!(
            "Privileged installer resolved: {} (generation {})",
            handle.installer(),
            handle.generation()
        );
        *cached = Some(Arc::clone(&handle));
        Ok(handle)
    }

    fn acquire(&self) -> Result<PrivilegeHandle> {
        self.bridge.exempt_hidden_api(HIDDEN_API_PREFIX)?;

        let service = self.broker.system_service(PACKAGE_SERVICE)?;
        let service = self.broker.wrap(service)?;
        let package_manager = self.bridge.package_manager_interface(service)?;

        let installer = self.bridge.installer_of(&package_manager)?;
        let installer = self.broker.wrap(installer)?;

        Ok(PrivilegeHandle {
            package_manager,
            installer,
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    /// Drop the cached handle (broker died, authorization revoked).
    pub fn invalidate(&self) {
        match self.cached.lock() {
            Ok(mut cached) => {
                if cached.take().is_some() {
                    log::warn!("Privileged installer handle invalidated");
                }
            }
            // A poisoned lock still holds a possibly dead handle; clear it anyway
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    /// Returns true if a handle is currently cached.
    pub fn is_cached(&self) -> bool {
        self.cached.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Session owner for calls made on behalf of this process.
    ///
    /// A root-equivalent broker acts for the current user; otherwise sessions
    /// are owned by user 0 under the shell installer identity.
    pub fn caller_identity(&self) -> Result<CallerIdentity> {
        let uid = self.broker.uid()?;
        let user_id = if uid == 0 {
            self.registry.current_user_id()?
        } else {
            0
        };
        Ok(CallerIdentity {
            installer_package: self.installer_package.clone(),
            user_id,
        })
    }

    /// Create an installer session owned by `installer_package` / `user_id`.
    ///
    /// The session constructor changed shape across releases; the variant is
    /// taken from the version strategy table.
    pub fn create_installer_session(
        &self,
        handle: &PrivilegeHandle,
        installer_package: &str,
        user_id: u32,
    ) -> Result<InstallerSession> {
        let sdk = self.bridge.sdk_level()?;
        let variant = strategy_for(sdk)?.session;
        let identity = CallerIdentity {
            installer_package: installer_package.to_string(),
            user_id,
        };

        self.bridge.open_session(handle.installer(), variant, &identity)?;
        log::debug!(
            "Installer session {:?} for {} (user {})",
            variant,
            installer_package,
            user_id
        );

        Ok(InstallerSession {
            installer: handle.installer().clone(),
            identity,
            variant,
        })
    }

    /// Session for this process's own caller identity.
    pub fn session_for_caller(&self, handle: &PrivilegeHandle) -> Result<InstallerSession> {
        let identity = self.caller_identity()?;
        self.create_installer_session(handle, &identity.installer_package, identity.user_id)
    }
}
