use std::sync::mpsc::Sender;

use anyhow::Result;
use slint::{Rgba8Pixel, SharedPixelBuffer};

#[cfg(target_os = "android")]
mod camera2;

#[cfg(not(target_os = "android"))]
mod pcam;

pub mod convert;

/// RGBA frame as it crosses the channel between the capture thread and the UI.
pub type FrameBuffer = SharedPixelBuffer<Rgba8Pixel>;

/// AIMAGE_FORMAT_YUV_420_888
pub const IMAGE_FORMAT_YUV_420_888: i32 = 0x23;

/// One output stream configuration advertised by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: i32,
    pub height: i32,
}

/// Parses the ACAMERA_SCALER_AVAILABLE_STREAM_CONFIGURATIONS table. Entries
/// are (format, width, height, is_input) quadruples; only output entries of
/// the requested format are kept.
pub fn parse_stream_configs(data: &[i32], format: i32) -> Vec<StreamConfig> {
    data.chunks_exact(4)
        .filter(|entry| entry[3] == 0 && entry[0] == format)
        .map(|entry| StreamConfig {
            width: entry[1],
            height: entry[2],
        })
        .collect()
}

/// Picks the supported size whose pixel count is closest to the requested
/// one. Ties go to the earlier entry, which the camera lists first.
pub fn choose_preview_size(
    configs: &[StreamConfig],
    width: u32,
    height: u32,
) -> Option<StreamConfig> {
    let want = i64::from(width) * i64::from(height);
    configs
        .iter()
        .copied()
        .min_by_key(|config| (i64::from(config.width) * i64::from(config.height) - want).abs())
}

pub struct Camera {
    #[cfg(target_os = "android")]
    inner: camera2::AndroidCamera,
    #[cfg(not(target_os = "android"))]
    inner: pcam::DesktopCamera,
}

impl Camera {
    pub fn new(
        #[cfg(target_os = "android")] app: slint::android::AndroidApp,
        frame_sender: Sender<FrameBuffer>,
    ) -> Result<Self> {
        Ok(Camera {
            #[cfg(target_os = "android")]
            inner: camera2::AndroidCamera::new(app, frame_sender),
            #[cfg(not(target_os = "android"))]
            inner: pcam::DesktopCamera::new(frame_sender),
        })
    }

    pub fn start_preview(&mut self, width: u32, height: u32) -> Result<()> {
        #[cfg(target_os = "android")]
        {
            self.inner.open()?;
            self.inner.start_preview(width, height)?;
        }
        #[cfg(not(target_os = "android"))]
        self.inner.start_preview(width, height)?;
        Ok(())
    }

    pub fn stop_preview(&mut self) {
        #[cfg(target_os = "android")]
        self.inner.close();
        #[cfg(not(target_os = "android"))]
        self.inner.stop_preview();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_configs() {
        let data = [
            IMAGE_FORMAT_YUV_420_888, 1920, 1080, 0,
            IMAGE_FORMAT_YUV_420_888, 640, 480, 1, // input stream, skipped
            0x21, 1280, 720, 0, // JPEG, skipped
            IMAGE_FORMAT_YUV_420_888, 1280, 720, 0,
        ];
        assert_eq!(
            parse_stream_configs(&data, IMAGE_FORMAT_YUV_420_888),
            vec![
                StreamConfig { width: 1920, height: 1080 },
                StreamConfig { width: 1280, height: 720 },
            ]
        );
    }

    #[test]
    fn test_parse_stream_configs_ignores_trailing_partial_entry() {
        let data = [IMAGE_FORMAT_YUV_420_888, 1920, 1080, 0, IMAGE_FORMAT_YUV_420_888, 640];
        assert_eq!(
            parse_stream_configs(&data, IMAGE_FORMAT_YUV_420_888),
            vec![StreamConfig { width: 1920, height: 1080 }]
        );
    }

    #[test]
    fn test_choose_preview_size() {
        let configs = [
            StreamConfig { width: 320, height: 240 },
            StreamConfig { width: 1280, height: 720 },
            StreamConfig { width: 1920, height: 1080 },
        ];
        assert_eq!(
            choose_preview_size(&configs, 1280, 720),
            Some(StreamConfig { width: 1280, height: 720 })
        );
        assert_eq!(
            choose_preview_size(&configs, 1600, 900),
            Some(StreamConfig { width: 1280, height: 720 })
        );
        assert_eq!(
            choose_preview_size(&configs, 4000, 3000),
            Some(StreamConfig { width: 1920, height: 1080 })
        );
        assert_eq!(choose_preview_size(&[], 1280, 720), None);
    }
}
