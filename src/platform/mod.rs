//! Platform seams for privileged package operations
//!
//! Everything the broker needs from the device goes through three traits:
//!
//! - [`ElevationBroker`]: the external always-on privilege process (authorization,
//!   system-service lookup, binder proxying)
//! - [`PackageRegistry`]: read-only queries against the platform package database
//! - [`PlatformInstallerBridge`]: the hidden installer surface (session
//!   construction, uninstall, install-existing)
//!
//! The production implementation lives in [`shell`]; tests supply in-memory fakes.

pub mod shell;
pub mod version;

use crate::error::Result;
use crate::types::BrokerStatus;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;

pub use version::{
    FlagShape, InstallExistingVariant, PackageInfoFlags, SdkLevel, SessionVariant,
    VersionStrategy, strategy_for,
};

/// `ApplicationInfo.FLAG_SYSTEM`
pub const FLAG_SYSTEM: u32 = 0x0000_0001;
/// `ApplicationInfo.FLAG_UPDATED_SYSTEM_APP`
pub const FLAG_UPDATED_SYSTEM_APP: u32 = 0x0000_0080;

/// `PackageManager.GET_META_DATA`
pub const GET_META_DATA: u32 = 0x0000_0080;
/// `PackageManager.MATCH_UNINSTALLED_PACKAGES`
pub const MATCH_UNINSTALLED_PACKAGES: u32 = 0x0000_2000;

/// `PackageManager.DELETE_ALL_USERS`
pub const DELETE_ALL_USERS: u32 = 0x0000_0002;
/// `PackageManager.DELETE_SYSTEM_APP`
pub const DELETE_SYSTEM_APP: u32 = 0x0000_0004;
/// `PackageManager.INSTALL_ALL_WHITELIST_RESTRICTED_PERMISSIONS`
pub const INSTALL_ALL_WHITELIST_RESTRICTED_PERMISSIONS: u32 = 0x0040_0000;
/// `PackageManager.INSTALL_REASON_UNKNOWN`
pub const INSTALL_REASON_UNKNOWN: i32 = 0;

/// Name of the platform package service.
pub const PACKAGE_SERVICE: &str = "package";
/// Interface descriptor of the platform package manager.
pub const PACKAGE_MANAGER_DESCRIPTOR: &str = "android.content.pm.IPackageManager";
/// Interface descriptor of the platform package installer.
pub const PACKAGE_INSTALLER_DESCRIPTOR: &str = "android.content.pm.IPackageInstaller";
/// Class prefix that must be exempted from the hidden-API denylist.
pub const HIDDEN_API_PREFIX: &str = "Landroid/content/pm";

/// Broadcast action receiving uninstall results.
pub const UNINSTALL_RESULT_ACTION: &str = "pkgbroker.UNINSTALL_RESULT_ACTION";
/// Broadcast action receiving install-existing results.
pub const INSTALL_RESULT_ACTION: &str = "pkgbroker.INSTALL_RESULT_ACTION";

/// Installer package recorded on sessions when running with shell identity.
pub const SHELL_INSTALLER_PACKAGE: &str = "com.android.shell";

static NEXT_BINDER_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque reference to a remote platform object.
///
/// `proxied` records whether calls on it are routed through the elevation
/// broker. Only proxied binders carry the broker's privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binder {
    descriptor: String,
    token: u64,
    proxied: bool,
}

impl Binder {
    /// Create a reference to a raw (unproxied) remote object.
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            token: NEXT_BINDER_TOKEN.fetch_add(1, Ordering::Relaxed),
            proxied: false,
        }
    }

    /// Same remote object, routed through the broker.
    pub fn into_proxied(self) -> Self {
        Self {
            proxied: true,
            ..self
        }
    }

    /// Same remote object reinterpreted as another interface.
    pub fn as_interface(&self, descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            token: self.token,
            proxied: self.proxied,
        }
    }

    #[inline]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    #[inline]
    pub fn token(&self) -> u64 {
        self.token
    }

    #[inline]
    pub fn is_proxied(&self) -> bool {
        self.proxied
    }
}

impl fmt::Display for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.descriptor, self.token)?;
        if self.proxied {
            write!(f, " (proxied)")?;
        }
        Ok(())
    }
}

/// Package entry as reported by the platform registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub package_name: String,
    /// `ApplicationInfo.flags` bitmask
    pub app_flags: u32,
    pub enabled: bool,
}

impl PackageRecord {
    #[inline]
    pub fn is_system(&self) -> bool {
        self.app_flags & FLAG_SYSTEM != 0
    }

    #[inline]
    pub fn is_updated_system(&self) -> bool {
        self.app_flags & FLAG_UPDATED_SYSTEM_APP != 0
    }
}

/// Owner recorded on installer sessions.
///
/// Session listing on the platform keys off the installer package stored at
/// creation; a mismatched owner makes later session queries return nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub installer_package: String,
    pub user_id: u32,
}

/// An installer session bound to the privileged installer handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerSession {
    pub installer: Binder,
    pub identity: CallerIdentity,
    pub variant: SessionVariant,
}

/// Extra arguments for install-existing. Never populated by the broker.
pub type Bundle = BTreeMap<String, String>;

/// Result reported by the platform on a completion target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Failure(String),
}

/// One asynchronous result delivered to a completion target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub action: &'static str,
    pub package_name: String,
    pub status: CompletionStatus,
}

/// Receiver target handed to privileged calls.
///
/// Delivery is fire-and-forget: a dropped listener never fails the call.
#[derive(Debug, Clone)]
pub struct CompletionTarget {
    action: &'static str,
    sink: Option<Sender<CompletionEvent>>,
}

impl CompletionTarget {
    pub fn new(action: &'static str, sink: Option<Sender<CompletionEvent>>) -> Self {
        Self { action, sink }
    }

    /// Target with no listener attached.
    pub fn detached(action: &'static str) -> Self {
        Self { action, sink: None }
    }

    #[inline]
    pub fn action(&self) -> &'static str {
        self.action
    }

    /// Deliver a platform result to whoever listens on this action.
    pub fn deliver(&self, package_name: &str, status: CompletionStatus) {
        let event = CompletionEvent {
            action: self.action,
            package_name: package_name.to_string(),
            status,
        };
        match &self.sink {
            Some(sink) => {
                if sink.send(event).is_err() {
                    log::debug!("No listener for {} anymore", self.action);
                }
            }
            None => log::debug!("Unobserved completion: {:?}", event),
        }
    }
}

/// External always-on privilege process.
pub trait ElevationBroker: Send + Sync {
    /// Whether the broker is installed and running.
    fn status(&self) -> BrokerStatus;

    /// True when the broker is running and has granted this client access.
    fn is_authorized(&self) -> bool;

    /// Ask the broker for access. `on_result` is invoked exactly once.
    fn request_authorization(&self, on_result: Box<dyn FnOnce(bool) + Send>);

    /// Uid the broker runs as (0 when root-equivalent).
    fn uid(&self) -> Result<u32>;

    /// Raw binder of a platform system service.
    fn system_service(&self, name: &str) -> Result<Binder>;

    /// Route a binder through the broker so calls carry its privileges.
    fn wrap(&self, binder: Binder) -> Result<Binder>;
}

/// Read-only access to the platform package database.
pub trait PackageRegistry: Send + Sync {
    /// Platform API level, used to pick query flag shapes.
    fn sdk_level(&self) -> Result<SdkLevel>;

    /// All packages matching `flags`.
    fn query_packages(&self, flags: PackageInfoFlags) -> Result<Vec<PackageRecord>>;

    /// One package; `Ok(None)` when the platform has no record of it.
    fn query_package(&self, package_name: &str, flags: PackageInfoFlags)
    -> Result<Option<PackageRecord>>;

    /// Uid of the calling user.
    fn current_user_id(&self) -> Result<u32>;
}

/// Hidden installer surface of the platform.
///
/// Every call here is outside the public API; implementations surface a shape
/// mismatch as `UnsupportedPlatform` and keep it apart from rejections.
pub trait PlatformInstallerBridge: Send + Sync {
    /// Platform API level, used to pick the session variant.
    fn sdk_level(&self) -> Result<SdkLevel>;

    /// Lift the hidden-API denylist for classes under `prefix`.
    fn exempt_hidden_api(&self, prefix: &str) -> Result<()>;

    /// Interpret a package service binder as the package manager interface.
    fn package_manager_interface(&self, service: Binder) -> Result<Binder>;

    /// Fetch the installer sub-interface embedded in the package manager.
    fn installer_of(&self, package_manager: &Binder) -> Result<Binder>;

    /// Construct an installer session with the given constructor variant.
    fn open_session(
        &self,
        installer: &Binder,
        variant: SessionVariant,
        identity: &CallerIdentity,
    ) -> Result<()>;

    /// Hidden `uninstall(packageName, flags, statusReceiver)`.
    fn uninstall(
        &self,
        session: &InstallerSession,
        package_name: &str,
        flags: u32,
        target: &CompletionTarget,
    ) -> Result<()>;

    /// Hidden `installExistingPackage(...)` on the privileged installer.
    #[allow(clippy::too_many_arguments)]
    fn install_existing_package(
        &self,
        installer: &Binder,
        package_name: &str,
        install_flags: u32,
        install_reason: i32,
        target: &CompletionTarget,
        user_id: u32,
        extras: Option<&Bundle>,
    ) -> Result<()>;
}
