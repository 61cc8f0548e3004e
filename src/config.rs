//! Application-wide constants

use std::time::Duration;

pub const LOG_TAG: &str = "easycamera";

/// Preview resolution requested from the camera. The closest supported
/// YUV_420_888 size wins, so this is a target rather than a guarantee.
pub const PREVIEW_WIDTH: u32 = 1280;
pub const PREVIEW_HEIGHT: u32 = 720;

/// Interval at which the UI drains the frame channel. Preview callbacks
/// arrive at ~30 FPS, so this comfortably keeps up.
pub const FRAME_PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// Interval at which the permission gate re-reads the permission state while
/// it is closed. The platform delivers no grant callback to native code.
pub const PERMISSION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Request code passed to `requestPermissions`. The result never reaches
/// native code, the value only has to be non-negative.
pub const PERMISSION_REQUEST_CODE: i32 = 100;
