//! Operation Flag Resolver
//!
//! Pure mapping from a package snapshot and a request to the flags passed to
//! the privileged call.
//!
//! | Request   | Package            | Bitmask                                        | Pre-reset        |
//! |-----------|--------------------|------------------------------------------------|------------------|
//! | Uninstall | system             | `DELETE_SYSTEM_APP`                            | if reset+updated |
//! | Uninstall | non-system         | `DELETE_ALL_USERS`                             | never            |
//! | Reinstall | any                | `INSTALL_ALL_WHITELIST_RESTRICTED_PERMISSIONS` | never            |

use crate::platform::{DELETE_ALL_USERS, DELETE_SYSTEM_APP, INSTALL_ALL_WHITELIST_RESTRICTED_PERMISSIONS};
use crate::types::{OperationKind, OperationRequest, PackageState};

/// Flags for one privileged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFlags {
    pub bitmask: u32,
    /// Issue an uninstall first to drop the update layered over the factory image
    pub needs_pre_reset: bool,
}

/// Resolve flags for `request` against the package's current `state`.
pub fn resolve_flags(state: &PackageState, request: &OperationRequest) -> ResolvedFlags {
    match request.kind() {
        OperationKind::Uninstall => ResolvedFlags {
            // Without DELETE_SYSTEM_APP a system app is only hidden for the user
            bitmask: if state.is_system_app {
                DELETE_SYSTEM_APP
            } else {
                DELETE_ALL_USERS
            },
            needs_pre_reset: request.reset_to_factory_first()
                && state.is_system_app
                && state.has_system_update,
        },
        OperationKind::Reinstall => ResolvedFlags {
            bitmask: INSTALL_ALL_WHITELIST_RESTRICTED_PERMISSIONS,
            needs_pre_reset: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(system: bool, updated: bool) -> PackageState {
        PackageState {
            package_name: "com.example.bloat".into(),
            is_installed: true,
            is_system_app: system,
            has_system_update: updated,
            is_disabled: false,
        }
    }

    #[test]
    fn test_pristine_system_app_never_resets() {
        let flags = resolve_flags(
            &state(true, false),
            &OperationRequest::uninstall("com.example.bloat", true),
        );
        assert_eq!(flags.bitmask, DELETE_SYSTEM_APP);
        assert!(!flags.needs_pre_reset);
    }

    #[test]
    fn test_updated_system_app_resets_when_asked() {
        let request = OperationRequest::uninstall("com.example.updated", true);
        let flags = resolve_flags(&state(true, true), &request);
        assert_eq!(flags.bitmask, DELETE_SYSTEM_APP);
        assert!(flags.needs_pre_reset);

        let no_reset = OperationRequest::uninstall("com.example.updated", false);
        assert!(!resolve_flags(&state(true, true), &no_reset).needs_pre_reset);
    }

    #[test]
    fn test_user_app_removed_for_all_users() {
        let flags = resolve_flags(
            &state(false, false),
            &OperationRequest::uninstall("com.example.user", true),
        );
        assert_eq!(flags.bitmask, DELETE_ALL_USERS);
        assert!(!flags.needs_pre_reset);
    }

    #[test]
    fn test_reinstall_whitelists_restricted_permissions() {
        let mut removed = state(true, false);
        removed.is_installed = false;
        let flags = resolve_flags(&removed, &OperationRequest::reinstall("com.example.removed"));
        assert_eq!(flags.bitmask, 0x0040_0000);
        assert!(!flags.needs_pre_reset);
    }
}
