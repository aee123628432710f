//! pkgbroker Library
//!
//! Removes and restores Android packages by driving the platform's hidden
//! installer surface through an external elevation broker.
//!
//! The pipeline for one operation:
//!
//! ```text
//! authorization gate -> inspector -> flag resolver -> privilege client
//!     -> invoker -> reconciler
//! ```

pub mod bloat;
pub mod broker;
pub mod catalog;
pub mod cli;
pub mod config_file;
pub mod error;
pub mod executor;
pub mod flags;
pub mod inspector;
pub mod invoker;
pub mod operation_state;
pub mod platform;
pub mod preset;
pub mod privilege;
pub mod process_guard;
pub mod reconciler;
pub mod types;

// Re-export main types for convenience
pub use broker::{BatchReport, PackageBroker};
pub use config_file::BrokerConfig;
pub use error::{BrokerError, Result};
pub use flags::{ResolvedFlags, resolve_flags};
pub use inspector::PackageInspector;
pub use invoker::{CompletionLog, OperationInvoker, PendingCompletion};
pub use operation_state::{OperationStage, OperationTracker, OperationTransitionError};
pub use platform::shell::{ShellBroker, ShellConfig};
pub use privilege::{PrivilegeClient, PrivilegeHandle};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use types::{
    BrokerStatus, InstallList, OperationKind, OperationOutcome, OperationRequest, PackageState,
    RemovalRecommendation,
};
