//! Runtime permission state and window glue.
//!
//! On Android this talks to the activity over JNI; elsewhere there is no
//! runtime permission model and the camera is always available.

use anyhow::Result;

#[cfg(target_os = "android")]
pub mod android;

/// State of the camera runtime permission as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied {
        /// Whether the platform asks us to explain the request before
        /// retrying (the user has denied it at least once).
        show_rationale: bool,
    },
}

impl PermissionState {
    pub fn is_granted(self) -> bool {
        matches!(self, PermissionState::Granted)
    }
}

#[derive(Clone)]
pub struct Platform {
    #[cfg(target_os = "android")]
    app: slint::android::AndroidApp,
}

impl Platform {
    #[cfg(target_os = "android")]
    pub fn new(app: slint::android::AndroidApp) -> Self {
        Self { app }
    }

    #[cfg(not(target_os = "android"))]
    pub fn new() -> Self {
        Self {}
    }

    #[cfg(target_os = "android")]
    pub fn android_app(&self) -> &slint::android::AndroidApp {
        &self.app
    }

    pub fn permission_state(&self) -> Result<PermissionState> {
        #[cfg(target_os = "android")]
        {
            android::camera_permission_state(&self.app)
        }
        #[cfg(not(target_os = "android"))]
        {
            Ok(PermissionState::Granted)
        }
    }

    pub fn request_permission(&self) -> Result<()> {
        #[cfg(target_os = "android")]
        {
            android::request_camera_permission(&self.app)
        }
        #[cfg(not(target_os = "android"))]
        {
            Ok(())
        }
    }

    pub fn hide_system_bars(&self) -> Result<()> {
        #[cfg(target_os = "android")]
        {
            android::hide_system_bars(&self.app)
        }
        #[cfg(not(target_os = "android"))]
        {
            Ok(())
        }
    }
}

#[cfg(not(target_os = "android"))]
impl Default for Platform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_state() {
        assert!(PermissionState::Granted.is_granted());
        assert!(!PermissionState::Denied { show_rationale: true }.is_granted());
        assert!(!PermissionState::Denied { show_rationale: false }.is_granted());
    }
}
