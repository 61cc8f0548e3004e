pub mod app;
pub mod camera;
pub mod config;
pub mod platform;

#[cfg(target_os = "android")]
#[no_mangle]
fn android_main(android_app: slint::android::AndroidApp) {
    use slint::android::android_activity::{MainEvent, PollEvent};

    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag(config::LOG_TAG),
    );

    let (lifecycle_sender, lifecycle_receiver) = std::sync::mpsc::channel();
    slint::android::init_with_event_listener(android_app.clone(), move |event| {
        let change = match event {
            PollEvent::Main(MainEvent::Resume { .. }) => Some(app::Lifecycle::Resumed),
            PollEvent::Main(MainEvent::Pause | MainEvent::Stop) => Some(app::Lifecycle::Paused),
            _ => None,
        };
        if let Some(change) = change {
            let _ = lifecycle_sender.send(change);
        }
    })
    .unwrap();

    let platform = platform::Platform::new(android_app);
    if let Err(err) = platform.hide_system_bars() {
        log::warn!("failed to hide the system bars: {err:?}");
    }

    if let Err(err) = app::run(platform, lifecycle_receiver) {
        log::error!("fatal: {err:?}");
    }
}
