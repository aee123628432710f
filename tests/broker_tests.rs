//! End-to-end operation tests against the in-memory platform.

mod common;

use common::{Call, FakePlatform, broker_over};
use pkgbroker::BrokerError;
use pkgbroker::OperationRequest;
use pkgbroker::platform::{
    DELETE_ALL_USERS, DELETE_SYSTEM_APP, INSTALL_ALL_WHITELIST_RESTRICTED_PERMISSIONS,
    INSTALL_REASON_UNKNOWN, UNINSTALL_RESULT_ACTION,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn scenario_a_pristine_system_app_single_uninstall() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.bloat", true, true, false));
    let broker = broker_over(&platform);

    assert!(broker.perform_uninstall("com.example.bloat", true));
    assert_eq!(
        platform.calls(),
        vec![Call::Uninstall {
            package: "com.example.bloat".into(),
            flags: DELETE_SYSTEM_APP
        }]
    );
    assert!(!platform.package("com.example.bloat").unwrap().installed);
}

#[test]
fn scenario_b_updated_system_app_resets_then_uninstalls() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.updated", true, true, true));
    let broker = broker_over(&platform);

    assert!(broker.perform_uninstall("com.example.updated", true));

    let expected = Call::Uninstall {
        package: "com.example.updated".into(),
        flags: DELETE_SYSTEM_APP,
    };
    assert_eq!(platform.calls(), vec![expected.clone(), expected]);
    let pkg = platform.package("com.example.updated").unwrap();
    assert!(!pkg.updated);
    assert!(!pkg.installed);
}

#[test]
fn scenario_b_reset_failure_still_attempts_uninstall() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.updated", true, true, true));
    platform.fail_next_uninstall(BrokerError::rejected("reset refused"));
    let broker = broker_over(&platform);

    assert!(broker.perform_uninstall("com.example.updated", true));
    assert_eq!(platform.calls().len(), 2);
}

#[test]
fn scenario_b_main_failure_alone_decides_outcome() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.updated", true, true, true));
    platform.fail_uninstall_at(1, BrokerError::rejected("uninstall refused"));
    let broker = broker_over(&platform);

    let outcome = broker.execute(&OperationRequest::uninstall("com.example.updated", true));
    assert!(!outcome.success);
    assert!(outcome.diagnostic.unwrap().contains("uninstall refused"));
    assert_eq!(platform.calls().len(), 2);
}

#[test]
fn scenario_c_concurrent_operations_share_one_handle() {
    let platform = Arc::new(
        FakePlatform::new()
            .with_package("com.example.one", true, false, false)
            .with_package("com.example.two", true, false, false),
    );
    *platform.wrap_delay.lock().unwrap() = Duration::from_millis(50);
    let broker = Arc::new(broker_over(&platform));

    let handles: Vec<_> = ["com.example.one", "com.example.two"]
        .into_iter()
        .map(|name| {
            let broker = Arc::clone(&broker);
            thread::spawn(move || broker.perform_uninstall(name, false))
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap());
    }

    // One acquisition: package service + installer wrapped once each
    assert_eq!(platform.system_service_calls.load(Ordering::SeqCst), 1);
    assert_eq!(platform.wrap_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn scenario_d_unauthorized_has_no_broker_traffic() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.bloat", true, true, false));
    platform.deauthorize();
    let broker = broker_over(&platform);

    assert!(!broker.perform_uninstall("com.example.bloat", false));
    assert!(!broker.perform_reinstall("com.example.bloat"));
    assert_eq!(platform.traffic(), 0);
    assert_eq!(platform.query_calls.load(Ordering::SeqCst), 0);
    assert_eq!(platform.status_calls.load(Ordering::SeqCst), 0);
    assert!(!broker.privilege_client().is_cached());
}

#[test]
fn scenario_d_authorization_unlocks_operations() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.bloat", true, false, false));
    platform.deauthorize();
    let broker = broker_over(&platform);

    let (tx, rx) = mpsc::channel();
    broker.request_authorization(move |granted| tx.send(granted).unwrap());
    assert!(rx.recv().unwrap());
    assert!(broker.perform_uninstall("com.example.bloat", false));
}

#[test]
fn scenario_e_reinstall_stub() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.removed", false, true, false));
    let broker = broker_over(&platform);

    assert!(broker.perform_reinstall("com.example.removed"));
    assert_eq!(
        platform.calls(),
        vec![Call::InstallExisting {
            package: "com.example.removed".into(),
            flags: INSTALL_ALL_WHITELIST_RESTRICTED_PERMISSIONS,
            reason: INSTALL_REASON_UNKNOWN,
            user_id: 0,
            has_extras: false,
        }]
    );
    assert!(platform.package("com.example.removed").unwrap().installed);
}

#[test]
fn root_broker_acts_for_current_user() {
    let platform = Arc::new(
        FakePlatform::new()
            .with_uid(0)
            .with_package("com.example.removed", false, true, false),
    );
    let broker = broker_over(&platform);

    assert!(broker.perform_reinstall("com.example.removed"));
    match &platform.calls()[0] {
        Call::InstallExisting { user_id, .. } => assert_eq!(*user_id, platform.current_user),
        other => panic!("unexpected call {:?}", other),
    }
}

#[test]
fn user_app_removed_for_all_users() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.notes", true, false, false));
    let broker = broker_over(&platform);

    assert!(broker.perform_uninstall("com.example.notes", true));
    assert_eq!(
        platform.calls(),
        vec![Call::Uninstall {
            package: "com.example.notes".into(),
            flags: DELETE_ALL_USERS
        }]
    );
}

#[test]
fn unknown_package_fails_without_privileged_calls() {
    let platform = Arc::new(FakePlatform::new());
    let broker = broker_over(&platform);

    let outcome = broker.execute(&OperationRequest::uninstall("com.example.ghost", false));
    assert!(!outcome.success);
    assert!(outcome.diagnostic.unwrap().contains("not found"));
    assert!(platform.calls().is_empty());
}

#[test]
fn unsupported_platform_is_distinct_diagnostic() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.removed", false, true, false));
    platform.fail_install(BrokerError::unsupported_platform("installExistingPackage missing"));
    let broker = broker_over(&platform);

    let outcome = broker.execute(&OperationRequest::reinstall("com.example.removed"));
    assert!(!outcome.success);
    assert!(outcome.diagnostic.unwrap().contains("unsupported Android version"));
}

#[test]
fn below_minimum_sdk_is_unsupported() {
    let platform = Arc::new(
        FakePlatform::new()
            .with_sdk(19)
            .with_package("com.example.bloat", true, true, false),
    );
    let broker = broker_over(&platform);

    let outcome = broker.execute(&OperationRequest::uninstall("com.example.bloat", false));
    assert!(!outcome.success);
    assert!(outcome.diagnostic.unwrap().contains("unsupported Android version"));
    assert!(platform.calls().is_empty());
}

#[test]
fn disconnect_invalidates_cached_handle() {
    let platform = Arc::new(
        FakePlatform::new()
            .with_package("com.example.one", true, false, false)
            .with_package("com.example.two", true, false, false),
    );
    let broker = broker_over(&platform);

    platform.fail_next_uninstall(BrokerError::disconnected("binder died"));
    assert!(!broker.perform_uninstall("com.example.one", false));
    assert!(!broker.privilege_client().is_cached());

    assert!(broker.perform_uninstall("com.example.two", false));
    assert_eq!(platform.system_service_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn rejection_keeps_cached_handle() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.one", true, false, false));
    let broker = broker_over(&platform);

    platform.fail_next_uninstall(BrokerError::rejected("SecurityException"));
    assert!(!broker.perform_uninstall("com.example.one", false));
    assert!(broker.privilege_client().is_cached());
}

#[test]
fn duplicate_in_flight_operation_is_busy() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.slow", true, false, false));
    *platform.uninstall_delay.lock().unwrap() = Duration::from_millis(300);
    let broker = Arc::new(broker_over(&platform));

    let first = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || broker.perform_uninstall("com.example.slow", false))
    };

    // Wait until the first operation is inside the privileged call
    let deadline = Instant::now() + Duration::from_secs(5);
    while !broker.privilege_client().is_cached() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));

    let outcome = broker.execute(&OperationRequest::uninstall("com.example.slow", false));
    assert!(!outcome.success);
    assert!(outcome.diagnostic.unwrap().contains("already in progress"));

    assert!(first.join().unwrap());
    assert_eq!(platform.calls().len(), 1);
}

#[test]
fn batch_runs_sequentially_and_reports() {
    let platform = Arc::new(
        FakePlatform::new()
            .with_package("com.example.a", true, false, false)
            .with_package("com.example.b", true, true, false),
    );
    let broker = broker_over(&platform);

    let requests = vec![
        OperationRequest::uninstall("com.example.a", false),
        OperationRequest::uninstall("com.example.ghost", false),
        OperationRequest::uninstall("com.example.b", false),
    ];
    let mut seen = Vec::new();
    let report = broker.perform_batch(&requests, |r| seen.push(r.package_name().to_string()));

    assert_eq!(report.succeeded, vec!["com.example.a", "com.example.b"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "com.example.ghost");
    assert_eq!(seen, report.succeeded);
    assert!(!report.all_succeeded());
}

#[test]
fn dry_run_issues_no_privileged_calls() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.bloat", true, true, true));
    let broker = broker_over(&platform).with_dry_run(true);

    assert!(broker.perform_uninstall("com.example.bloat", true));
    assert!(platform.calls().is_empty());
    assert!(platform.package("com.example.bloat").unwrap().installed);
}

#[test]
fn completion_results_are_logged() {
    let platform = Arc::new(FakePlatform::new().with_package("com.example.bloat", true, false, false));
    let broker = broker_over(&platform);
    assert!(broker.perform_uninstall("com.example.bloat", false));

    let deadline = Instant::now() + Duration::from_secs(5);
    let event = loop {
        if let Some(event) = broker.completions().last_for("com.example.bloat") {
            break event;
        }
        assert!(Instant::now() < deadline, "no completion event delivered");
        thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(event.action, UNINSTALL_RESULT_ACTION);
}
