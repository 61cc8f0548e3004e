#[cfg(not(target_os = "android"))]
fn main() -> anyhow::Result<()> {
    use easycamera::app::{self, Lifecycle};
    use easycamera::platform::Platform;

    env_logger::init();

    // No pause/resume cycle outside Android; the preview runs for the whole
    // session.
    let (lifecycle_sender, lifecycle_receiver) = std::sync::mpsc::channel();
    let _ = lifecycle_sender.send(Lifecycle::Resumed);

    app::run(Platform::new(), lifecycle_receiver)
}

// The Android build ships the cdylib entry point instead.
#[cfg(target_os = "android")]
fn main() {}
