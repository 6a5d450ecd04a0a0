//! Integration tests for opening platforms after `start`

use std::sync::Arc;

use expod_app::test_utils::{fake_server_factory, FakePrerequisite};
use expod_app::{
    open_platforms, DevServerManager, OpenOptions, PlatformSelection, PlatformsOpened,
    StartRequest,
};
use expod_core::{BundlerKind, BundlerStartOptions, HostType, LocationOptions, RuntimeTarget};
use expod_daemon::test_utils::{CallLog, FakePlatformManager};
use expod_daemon::PlatformManager;

fn localhost_options() -> BundlerStartOptions {
    BundlerStartOptions {
        location: LocationOptions {
            host_type: HostType::Localhost,
            scheme: None,
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_open_android_ios_web_in_order() {
    let temp = tempfile::tempdir().unwrap();
    let log = CallLog::default();
    let android = Arc::new(FakePlatformManager::opened(RuntimeTarget::Emulator, log.clone()));
    let ios = Arc::new(FakePlatformManager::opened(RuntimeTarget::Simulator, log.clone()));
    let browser = Arc::new(FakePlatformManager::opened(RuntimeTarget::Desktop, log.clone()));
    let managers: Vec<Arc<dyn PlatformManager>> =
        vec![android.clone(), ios.clone(), browser.clone()];

    let manager = DevServerManager::new(
        temp.path(),
        fake_server_factory(temp.path(), CallLog::default(), managers, &[]),
    )
    .with_web_prerequisite(Arc::new(FakePrerequisite::passing()));

    let locations = manager
        .start(vec![StartRequest::new(
            BundlerKind::Native,
            localhost_options(),
        )])
        .await
        .unwrap();
    let native_port = locations[0].port;

    let result = open_platforms(
        &manager,
        PlatformSelection {
            android: true,
            ios: true,
            web: true,
        },
        &OpenOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(result, PlatformsOpened::Opened { native: true });
    assert_eq!(log.calls(), vec!["emulator", "simulator", "desktop"]);

    // Each platform opened exactly once with its own URL
    assert_eq!(
        android.urls(),
        vec![format!("exp://127.0.0.1:{}", native_port)]
    );
    assert_eq!(ios.urls(), android.urls());
    let web = manager.web_dev_server().unwrap();
    assert_eq!(browser.urls(), vec![web.location().unwrap().url]);
    assert_ne!(web.location().unwrap().port, native_port);

    manager.stop().await.unwrap();
    assert!(manager.default_dev_server().is_none());
}
