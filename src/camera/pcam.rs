use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use kamera::Camera as DeviceCamera;
use log::{info, warn};
use slint::SharedPixelBuffer;

use super::{convert, FrameBuffer};

/// Desktop capture over the kamera backend. The device delivers frames at
/// its native size; the requested preview size is only a hint there.
pub struct DesktopCamera {
    stop_flag: Option<Arc<Mutex<bool>>>,
    worker: Option<JoinHandle<Result<()>>>,
    frame_sender: Sender<FrameBuffer>,
}

impl DesktopCamera {
    pub fn new(frame_sender: Sender<FrameBuffer>) -> Self {
        Self {
            stop_flag: None,
            worker: None,
            frame_sender,
        }
    }

    pub fn start_preview(&mut self, _width: u32, _height: u32) -> Result<()> {
        self.stop_preview();

        let stop_flag = Arc::new(Mutex::new(false));
        self.stop_flag = Some(stop_flag.clone());
        let frame_sender = self.frame_sender.clone();

        self.worker = Some(std::thread::spawn(move || {
            let camera = match DeviceCamera::new_device(0) {
                Some(camera) => camera,
                None => return Err(anyhow!("No camera device detected.")),
            };
            camera.start();
            info!("camera worker started");

            let mut rgba_buffer = Vec::new();
            loop {
                if stop_flag.lock().map(|stop| *stop).unwrap_or(true) {
                    break;
                }

                let Some(frame) = camera.wait_for_frame() else {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                };

                let (width, height) = frame.size_u32();
                let frame_data = frame.data();
                convert::bgra_to_rgba(frame_data.data_u8(), &mut rgba_buffer);

                let buffer = SharedPixelBuffer::clone_from_slice(&rgba_buffer, width, height);
                if frame_sender.send(buffer).is_err() {
                    // The UI is gone.
                    break;
                }
            }

            camera.stop();
            Ok(())
        }));
        Ok(())
    }

    pub fn stop_preview(&mut self) {
        if let Some(stop_flag) = self.stop_flag.take() {
            if let Ok(mut stop) = stop_flag.lock() {
                *stop = true;
            }
        }
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(Ok(())) => info!("camera worker stopped"),
                Ok(Err(err)) => warn!("camera worker failed: {err:?}"),
                Err(_) => warn!("camera worker panicked"),
            }
        }
    }
}

impl Drop for DesktopCamera {
    fn drop(&mut self) {
        self.stop_preview();
    }
}
