//! Broker backend driving the platform through a privileged shell
//!
//! The elevation broker exposes a shell running with its identity (`rish -c`
//! for a Shizuku-style broker, `adb shell` when tethered). Every platform
//! operation becomes one short-lived command through that shell:
//!
//! - registry queries: `pm list packages -f [-u]`, `-s`, `-d`
//! - uninstall: `pm uninstall [--user N] <pkg>`
//! - install-existing: `cmd package install-existing --user N <pkg>`
//!
//! The command's exit is the primary result of a privileged call. The
//! `Success` / `Failure [...]` line it prints is the platform's asynchronous
//! status and is forwarded to the completion target.

use crate::error::{BrokerError, Result};
use crate::platform::{
    Binder, Bundle, CallerIdentity, CompletionStatus, CompletionTarget, DELETE_ALL_USERS,
    DELETE_SYSTEM_APP, ElevationBroker, FLAG_SYSTEM, FLAG_UPDATED_SYSTEM_APP,
    INSTALL_ALL_WHITELIST_RESTRICTED_PERMISSIONS, InstallExistingVariant, InstallerSession,
    MATCH_UNINSTALLED_PACKAGES, PACKAGE_INSTALLER_DESCRIPTOR, PACKAGE_MANAGER_DESCRIPTOR,
    PACKAGE_SERVICE, PackageInfoFlags, PackageRecord, PackageRegistry, PlatformInstallerBridge,
    SdkLevel, SessionVariant, strategy_for,
};
use crate::process_guard::run_tracked;
use crate::types::{BrokerStatus, is_valid_package_name};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::process::Command;
use std::sync::OnceLock;

/// Marker echoed back to check that the broker shell answers.
const PING_TOKEN: &str = "pkgbroker-ping";

/// Exit code used by the broker shells when the broker itself is unreachable.
const BROKER_UNREACHABLE_EXIT: i32 = 255;

/// How to reach the broker shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Broker shell executable (`rish`, `adb`, ...)
    pub program: String,
    /// Arguments placed before the command string (`["-c"]`, `["shell"]`)
    pub args: Vec<String>,
    /// Skip `getprop` and assume this API level
    #[serde(default)]
    pub sdk_override: Option<u32>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "rish".to_string(),
            args: vec!["-c".to_string()],
            sdk_override: None,
        }
    }
}

/// Captured result of one broker shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn combined(&self) -> String {
        format!("{}\n{}", self.stdout.trim(), self.stderr.trim())
            .trim()
            .to_string()
    }
}

/// Production broker backend.
///
/// Implements all three platform seams on top of one broker shell.
#[derive(Debug)]
pub struct ShellBroker {
    config: ShellConfig,
    sdk: OnceLock<SdkLevel>,
    uid: OnceLock<u32>,
}

impl ShellBroker {
    pub fn new(config: ShellConfig) -> Self {
        let sdk = OnceLock::new();
        if let Some(level) = config.sdk_override {
            let _ = sdk.set(SdkLevel(level));
        }
        Self {
            config,
            sdk,
            uid: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Run one command string through the broker shell.
    ///
    /// # Errors
    ///
    /// `BrokerDisconnected` when the shell cannot be spawned or reports the
    /// broker as unreachable. A non-zero exit of the command itself is
    /// returned as output for the caller to classify.
    pub fn run(&self, command: &str) -> Result<ShellOutput> {
        log::debug!("broker shell: {} {:?} {:?}", self.config.program, self.config.args, command);

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args).arg(command);

        let output = run_tracked(&mut cmd).map_err(|e| {
            BrokerError::disconnected(format!(
                "failed to start broker shell {}: {}",
                self.config.program, e
            ))
        })?;

        let result = ShellOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };

        if result.exit_code == Some(BROKER_UNREACHABLE_EXIT) || is_broker_unreachable(&result.stderr)
        {
            return Err(BrokerError::disconnected(result.combined()));
        }

        log::trace!("broker shell exit={:?} stdout={:?}", result.exit_code, result.stdout);
        Ok(result)
    }

    /// Run a command that must succeed, classifying failures.
    fn run_checked(&self, command: &str) -> Result<ShellOutput> {
        let output = self.run(command)?;
        if output.success() && !is_call_rejected(&output.combined()) {
            Ok(output)
        } else {
            Err(classify_failure(command, &output))
        }
    }

    fn list_names(
        &self,
        selector: &str,
        flags: PackageInfoFlags,
        filter: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let mut command = String::from("pm list packages -f");
        if !selector.is_empty() {
            command.push(' ');
            command.push_str(selector);
        }
        if flags.contains(MATCH_UNINSTALLED_PACKAGES) {
            command.push_str(" -u");
        }
        if let Some(name) = filter {
            command.push(' ');
            command.push_str(name);
        }
        let output = self.run_checked(&command)?;
        Ok(parse_package_list(&output.stdout))
    }

    fn ensure_valid(package_name: &str) -> Result<()> {
        if is_valid_package_name(package_name) {
            Ok(())
        } else {
            Err(BrokerError::not_found(format!(
                "{package_name:?} is not a valid package name"
            )))
        }
    }

    fn records(&self, flags: PackageInfoFlags, filter: Option<&str>) -> Result<Vec<PackageRecord>> {
        let all = self.list_names("", flags, filter)?;
        let system: HashSet<String> = self
            .list_names("-s", flags, filter)?
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        let disabled: HashSet<String> = self
            .list_names("-d", flags, filter)?
            .into_iter()
            .map(|(_, name)| name)
            .collect();

        Ok(all
            .into_iter()
            .map(|(path, name)| {
                let mut app_flags = 0;
                if system.contains(&name) {
                    app_flags |= FLAG_SYSTEM;
                    // An update over a factory image lives under /data
                    if path.starts_with("/data/") {
                        app_flags |= FLAG_UPDATED_SYSTEM_APP;
                    }
                }
                PackageRecord {
                    enabled: !disabled.contains(&name),
                    package_name: name,
                    app_flags,
                }
            })
            .collect())
    }
}

impl ElevationBroker for ShellBroker {
    fn status(&self) -> BrokerStatus {
        match self.run(&format!("echo {PING_TOKEN}")) {
            Ok(output) if output.stdout.contains(PING_TOKEN) => BrokerStatus::Active,
            Ok(_) => BrokerStatus::NotActive,
            Err(BrokerError::BrokerDisconnected(msg)) if msg.contains("failed to start") => {
                BrokerStatus::NotInstalled
            }
            Err(_) => BrokerStatus::NotActive,
        }
    }

    fn is_authorized(&self) -> bool {
        self.uid().is_ok()
    }

    fn request_authorization(&self, on_result: Box<dyn FnOnce(bool) + Send>) {
        let status = self.status();
        if status != BrokerStatus::Active {
            log::info!("Broker not usable ({}), authorization denied", status);
            on_result(false);
            return;
        }
        let granted = self.is_authorized();
        log::info!("Broker authorization result: {}", granted);
        on_result(granted);
    }

    fn uid(&self) -> Result<u32> {
        if let Some(uid) = self.uid.get() {
            return Ok(*uid);
        }
        let output = self.run_checked("id -u")?;
        let uid = output.stdout.trim().parse::<u32>().map_err(|_| {
            BrokerError::unauthorized(format!("broker shell refused identity query: {}", output.combined()))
        })?;
        let _ = self.uid.set(uid);
        Ok(uid)
    }

    fn system_service(&self, name: &str) -> Result<Binder> {
        let output = self.run_checked(&format!("service check {name}"))?;
        if output.stdout.contains("not found") {
            return Err(BrokerError::disconnected(format!("system service {name} not found")));
        }
        Ok(Binder::new(name))
    }

    fn wrap(&self, binder: Binder) -> Result<Binder> {
        Ok(binder.into_proxied())
    }
}

impl PackageRegistry for ShellBroker {
    fn sdk_level(&self) -> Result<SdkLevel> {
        if let Some(level) = self.sdk.get() {
            return Ok(*level);
        }
        let output = self.run_checked("getprop ro.build.version.sdk")?;
        let level: SdkLevel = output.stdout.parse()?;
        let _ = self.sdk.set(level);
        log::info!("Device platform level: {}", level);
        Ok(level)
    }

    fn query_packages(&self, flags: PackageInfoFlags) -> Result<Vec<PackageRecord>> {
        self.records(flags, None)
    }

    fn query_package(
        &self,
        package_name: &str,
        flags: PackageInfoFlags,
    ) -> Result<Option<PackageRecord>> {
        Self::ensure_valid(package_name)?;
        // `pm list packages` filters by substring; keep the exact match only
        Ok(self
            .records(flags, Some(package_name))?
            .into_iter()
            .find(|record| record.package_name == package_name))
    }

    fn current_user_id(&self) -> Result<u32> {
        let output = self.run_checked("am get-current-user")?;
        output.stdout.trim().parse::<u32>().map_err(|_| {
            BrokerError::unsupported_platform(format!(
                "unexpected current user output {:?}",
                output.stdout.trim()
            ))
        })
    }
}

impl PlatformInstallerBridge for ShellBroker {
    fn sdk_level(&self) -> Result<SdkLevel> {
        PackageRegistry::sdk_level(self)
    }

    fn exempt_hidden_api(&self, prefix: &str) -> Result<()> {
        log::debug!("Hidden-API exemption for {} not needed for shell calls", prefix);
        Ok(())
    }

    fn package_manager_interface(&self, service: Binder) -> Result<Binder> {
        if service.descriptor() != PACKAGE_SERVICE {
            return Err(BrokerError::unsupported_platform(format!(
                "{service} is not the package service"
            )));
        }
        if !service.is_proxied() {
            return Err(BrokerError::rejected("package service is not routed through the broker"));
        }
        Ok(service.as_interface(PACKAGE_MANAGER_DESCRIPTOR))
    }

    fn installer_of(&self, package_manager: &Binder) -> Result<Binder> {
        if package_manager.descriptor() != PACKAGE_MANAGER_DESCRIPTOR {
            return Err(BrokerError::unsupported_platform(format!(
                "{package_manager} has no getPackageInstaller"
            )));
        }
        Ok(Binder::new(PACKAGE_INSTALLER_DESCRIPTOR))
    }

    fn open_session(
        &self,
        installer: &Binder,
        variant: SessionVariant,
        identity: &CallerIdentity,
    ) -> Result<()> {
        if !installer.is_proxied() {
            return Err(BrokerError::rejected("installer is not routed through the broker"));
        }
        let sdk = PackageRegistry::sdk_level(self)?;
        let expected = strategy_for(sdk)?.session;
        if expected != variant {
            return Err(BrokerError::unsupported_platform(format!(
                "no PackageInstaller constructor {variant:?} on {sdk} (expected {expected:?})"
            )));
        }
        log::debug!(
            "Installer session opened as {} (user {})",
            identity.installer_package,
            identity.user_id
        );
        Ok(())
    }

    fn uninstall(
        &self,
        session: &InstallerSession,
        package_name: &str,
        flags: u32,
        target: &CompletionTarget,
    ) -> Result<()> {
        Self::ensure_valid(package_name)?;
        if !session.installer.is_proxied() {
            return Err(BrokerError::rejected("installer is not routed through the broker"));
        }
        let command = uninstall_command(package_name, flags, session.identity.user_id)?;
        let output = self.run(&command)?;
        finish_call(&command, package_name, &output, target)
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
        Self::ensure_valid(package_name)?;
        if !installer.is_proxied() {
            return Err(BrokerError::rejected("installer is not routed through the broker"));
        }
        let sdk = PackageRegistry::sdk_level(self)?;
        let variant = strategy_for(sdk)?.install_existing;
        if extras.is_some() {
            log::warn!("install-existing extras are not forwarded by the shell backend");
        }
        log::debug!("install-existing reason={} variant={:?}", install_reason, variant);

        let command = install_existing_command(package_name, install_flags, user_id, sdk, variant)?;
        let output = self.run(&command)?;
        finish_call(&command, package_name, &output, target)
    }
}

/// Shell form of the hidden uninstall call.
fn uninstall_command(package_name: &str, flags: u32, user_id: u32) -> Result<String> {
    if flags & DELETE_SYSTEM_APP != 0 {
        Ok(format!("pm uninstall --user {user_id} {package_name}"))
    } else if flags & DELETE_ALL_USERS != 0 {
        Ok(format!("pm uninstall {package_name}"))
    } else {
        Err(BrokerError::unsupported_platform(format!(
            "uninstall flags {flags:#x} have no shell equivalent"
        )))
    }
}

/// Shell form of the hidden install-existing call.
fn install_existing_command(
    package_name: &str,
    install_flags: u32,
    user_id: u32,
    sdk: SdkLevel,
    variant: InstallExistingVariant,
) -> Result<String> {
    let prefix = match variant {
        InstallExistingVariant::Unavailable => {
            return Err(BrokerError::unsupported_platform(format!(
                "install-existing is not available on {sdk}"
            )));
        }
        _ if sdk >= SdkLevel::OREO => "cmd package",
        _ => "pm",
    };

    let mut command = format!("{prefix} install-existing --user {user_id}");
    if sdk >= SdkLevel::Q && install_flags & INSTALL_ALL_WHITELIST_RESTRICTED_PERMISSIONS == 0 {
        command.push_str(" --restrict-permissions");
    }
    command.push(' ');
    command.push_str(package_name);
    Ok(command)
}

/// Turn a finished privileged command into the call result.
///
/// Any error class aborts the call; otherwise the status line goes to the
/// completion target and the call counts as issued.
fn finish_call(
    command: &str,
    package_name: &str,
    output: &ShellOutput,
    target: &CompletionTarget,
) -> Result<()> {
    let text = output.combined();
    if is_unsupported(&text) || is_call_rejected(&text) {
        return Err(classify_failure(command, output));
    }
    if !output.success() && parse_status_line(&text).is_none() {
        return Err(classify_failure(command, output));
    }

    let status = parse_status_line(&text).unwrap_or(CompletionStatus::Success);
    target.deliver(package_name, status);
    Ok(())
}

/// Parse `package:<path>=<name>` lines. Lines without a path yield an empty path.
pub fn parse_package_list(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .filter_map(|entry| match entry.rsplit_once('=') {
            Some((path, name)) if !name.is_empty() => Some((path.to_string(), name.to_string())),
            Some(_) => None,
            None if !entry.is_empty() => Some((String::new(), entry.to_string())),
            None => None,
        })
        .collect()
}

/// Extract the platform status from command output.
pub fn parse_status_line(text: &str) -> Option<CompletionStatus> {
    for line in text.lines().map(str::trim) {
        if line == "Success" || (line.starts_with("Package ") && line.contains(" installed for user")) {
            return Some(CompletionStatus::Success);
        }
        if let Some(rest) = line.strip_prefix("Failure") {
            let reason = rest.trim().trim_start_matches('[').trim_end_matches(']').trim();
            return Some(CompletionStatus::Failure(reason.to_string()));
        }
    }
    None
}

fn is_broker_unreachable(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("binder is dead")
        || s.contains("shizuku is not running")
        || s.contains("server is not running")
        || s.contains("no devices/emulators found")
        || s.contains("device offline")
}

fn is_unsupported(text: &str) -> bool {
    text.contains("Unknown command") || text.contains("Unknown option") || text.contains("NoSuchMethodError")
}

fn is_call_rejected(text: &str) -> bool {
    text.contains("SecurityException")
        || text.contains("Permission Denial")
        || text.contains("Permission denied")
        || text.contains("not allowed")
}

/// Map a failed command to the broker error taxonomy.
pub fn classify_failure(command: &str, output: &ShellOutput) -> BrokerError {
    let text = output.combined();
    let detail = format!("{command} -> {text}");
    if is_unsupported(&text) {
        BrokerError::unsupported_platform(detail)
    } else if is_call_rejected(&text) {
        BrokerError::rejected(detail)
    } else if is_broker_unreachable(&text) {
        BrokerError::disconnected(detail)
    } else if text.contains("doesn't exist") || text.contains("Unknown package") {
        BrokerError::not_found(detail)
    } else {
        BrokerError::rejected(format!(
            "{detail} (exit code {})",
            output.exit_code.unwrap_or(-1)
        ))
    }
}
