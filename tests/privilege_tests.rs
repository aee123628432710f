//! Privileged handle lifecycle: lazy-once acquisition, sharing, invalidation.

mod common;

use common::FakePlatform;
use pkgbroker::platform::SessionVariant;
use pkgbroker::{BrokerError, PrivilegeClient};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn client_over(platform: &Arc<FakePlatform>) -> PrivilegeClient {
    PrivilegeClient::new(
        platform.clone(),
        platform.clone(),
        platform.clone(),
        "com.android.shell",
    )
}

#[test]
fn concurrent_callers_observe_the_same_handle() {
    let platform = Arc::new(FakePlatform::new());
    *platform.wrap_delay.lock().unwrap() = Duration::from_millis(20);
    let client = Arc::new(client_over(&platform));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                client.privileged_installer().unwrap()
            })
        })
        .collect();
    let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for handle in &resolved[1..] {
        assert!(Arc::ptr_eq(&resolved[0], handle));
    }
    assert_eq!(platform.system_service_calls.load(Ordering::SeqCst), 1);
    assert_eq!(platform.wrap_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn installer_is_proxied_twice_over() {
    let platform = Arc::new(FakePlatform::new());
    let client = client_over(&platform);

    let handle = client.privileged_installer().unwrap();
    assert!(handle.package_manager().is_proxied());
    assert!(handle.installer().is_proxied());
    assert_ne!(handle.package_manager().token(), handle.installer().token());
}

#[test]
fn invalidate_forces_reacquisition() {
    let platform = Arc::new(FakePlatform::new());
    let client = client_over(&platform);

    let first = client.privileged_installer().unwrap();
    client.invalidate();
    assert!(!client.is_cached());

    let second = client.privileged_installer().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.generation(), first.generation() + 1);
    assert_eq!(platform.system_service_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_acquisition_caches_nothing() {
    let platform = Arc::new(FakePlatform::new());
    platform.fail_system_service(BrokerError::disconnected("service manager died"));
    let client = client_over(&platform);

    assert!(matches!(
        client.privileged_installer(),
        Err(BrokerError::BrokerDisconnected(_))
    ));
    assert!(!client.is_cached());
    assert!(client.privileged_installer().is_ok());
}

#[test]
fn session_variant_follows_sdk() {
    for (sdk, variant) in [
        (22, SessionVariant::LegacyContext),
        (28, SessionVariant::Modern),
        (34, SessionVariant::Attributed),
    ] {
        let platform = Arc::new(FakePlatform::new().with_sdk(sdk));
        let client = client_over(&platform);
        let handle = client.privileged_installer().unwrap();
        let session = client.session_for_caller(&handle).unwrap();
        assert_eq!(session.variant, variant, "sdk {}", sdk);
        assert_eq!(session.identity.installer_package, "com.android.shell");
    }
}

#[test]
fn caller_identity_depends_on_broker_uid() {
    let shell = Arc::new(FakePlatform::new());
    assert_eq!(client_over(&shell).caller_identity().unwrap().user_id, 0);

    let root = Arc::new(FakePlatform::new().with_uid(0));
    assert_eq!(
        client_over(&root).caller_identity().unwrap().user_id,
        root.current_user
    );
}
