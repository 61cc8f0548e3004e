use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver};

use anyhow::Result;
use log::{error, info};
use slint::{Image, Timer, TimerMode};

use crate::camera::Camera;
use crate::config;
use crate::platform::{PermissionState, Platform};

/// Foreground state of the screen, delivered by the platform event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Resumed,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Start,
    Stop,
    Keep,
}

/// The preview streams exactly while the permission is granted and the
/// screen is in the foreground.
fn transition(streaming: bool, granted: bool, resumed: bool) -> Transition {
    match (streaming, granted && resumed) {
        (false, true) => Transition::Start,
        (true, false) => Transition::Stop,
        _ => Transition::Keep,
    }
}

struct PreviewController {
    camera: Camera,
    granted: bool,
    resumed: bool,
    streaming: bool,
}

impl PreviewController {
    fn new(camera: Camera) -> Self {
        Self {
            camera,
            granted: false,
            resumed: false,
            streaming: false,
        }
    }

    fn sync(&mut self) {
        match transition(self.streaming, self.granted, self.resumed) {
            Transition::Start => {
                match self
                    .camera
                    .start_preview(config::PREVIEW_WIDTH, config::PREVIEW_HEIGHT)
                {
                    Ok(()) => {
                        self.streaming = true;
                        info!("camera preview bound");
                    }
                    Err(err) => error!("camera preview binding failed: {err:?}"),
                }
            }
            Transition::Stop => {
                self.camera.stop_preview();
                self.streaming = false;
                info!("camera preview released");
            }
            Transition::Keep => {}
        }
    }
}

pub fn run(platform: Platform, lifecycle: Receiver<Lifecycle>) -> Result<()> {
    slint::slint! {
        import { Button } from "std-widgets.slint";

        export component MainWindow inherits Window {
            preferred-width: 960px;
            preferred-height: 540px;
            background: black;

            in-out property <bool> permission-granted;
            in-out property <bool> show-rationale;
            in-out property <image> preview-frame;
            callback request-permission();

            if root.permission-granted: Image {
                width: 100%;
                height: 100%;
                image-fit: cover;
                source: root.preview-frame;
            }

            if !root.permission-granted: VerticalLayout {
                alignment: center;
                padding: 20px;
                spacing: 10px;

                Text {
                    horizontal-alignment: center;
                    wrap: word-wrap;
                    font-size: 20px;
                    color: white;
                    text: root.show-rationale
                        ? "The camera permission is required to show the live preview. Please grant it."
                        : "This app shows a live preview from your camera and needs access to it.";
                }

                if !root.show-rationale: Text {
                    horizontal-alignment: center;
                    wrap: word-wrap;
                    font-size: 16px;
                    color: gray;
                    text: "Nothing is recorded or stored.";
                }

                HorizontalLayout {
                    alignment: center;
                    Button {
                        text: "Grant camera access";
                        clicked => {
                            root.request-permission();
                        }
                    }
                }
            }
        }
    }

    let app = MainWindow::new()?;

    let (frame_sender, frame_receiver) = channel();
    let camera = Camera::new(
        #[cfg(target_os = "android")]
        platform.android_app().clone(),
        frame_sender,
    )?;
    let controller = Rc::new(RefCell::new(PreviewController::new(camera)));

    // Re-reads the permission state and starts or stops the preview to match.
    let refresh = {
        let platform = platform.clone();
        let controller = controller.clone();
        let app_weak = app.as_weak();
        move || {
            let Some(app) = app_weak.upgrade() else { return };
            match platform.permission_state() {
                Ok(state) => {
                    let mut controller = controller.borrow_mut();
                    if state.is_granted() != controller.granted {
                        info!("camera permission state: {state:?}");
                    }
                    controller.granted = state.is_granted();
                    if let PermissionState::Denied { show_rationale } = state {
                        app.set_show_rationale(show_rationale);
                    }
                    app.set_permission_granted(controller.granted);
                    controller.sync();
                }
                Err(err) => error!("permission state query failed: {err:?}"),
            }
        }
    };
    refresh();

    {
        let platform = platform.clone();
        app.on_request_permission(move || {
            info!("requesting the camera permission");
            if let Err(err) = platform.request_permission() {
                error!("permission request failed: {err:?}");
            }
        });
    }

    // Pumps lifecycle changes and decoded frames into the UI.
    let frame_timer = Timer::default();
    {
        let app_weak = app.as_weak();
        let controller = controller.clone();
        let refresh = refresh.clone();
        frame_timer.start(TimerMode::Repeated, config::FRAME_PUMP_INTERVAL, move || {
            while let Ok(event) = lifecycle.try_recv() {
                let resumed = matches!(event, Lifecycle::Resumed);
                controller.borrow_mut().resumed = resumed;
                if resumed {
                    // Also picks up a grant made while we were backgrounded.
                    refresh();
                } else {
                    controller.borrow_mut().sync();
                }
            }
            if let (Ok(buffer), Some(app)) = (frame_receiver.try_recv(), app_weak.upgrade()) {
                app.set_preview_frame(Image::from_rgba8(buffer));
            }
        });
    }

    // The grant never reaches native code as a callback, so poll while the
    // gate is closed.
    let permission_timer = Timer::default();
    {
        let controller = controller.clone();
        let refresh = refresh.clone();
        permission_timer.start(
            TimerMode::Repeated,
            config::PERMISSION_POLL_INTERVAL,
            move || {
                if controller.borrow().granted {
                    return;
                }
                refresh();
            },
        );
    }

    app.run()?;
    controller.borrow_mut().camera.stop_preview();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_follows_grant_and_lifecycle() {
        assert_eq!(transition(false, true, true), Transition::Start);
        assert_eq!(transition(false, true, false), Transition::Keep);
        assert_eq!(transition(false, false, true), Transition::Keep);
        assert_eq!(transition(false, false, false), Transition::Keep);
        assert_eq!(transition(true, true, false), Transition::Stop);
        assert_eq!(transition(true, false, true), Transition::Stop);
        assert_eq!(transition(true, true, true), Transition::Keep);
    }
}
