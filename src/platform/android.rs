//! JNI calls against the activity: permission checks, permission requests
//! and the immersive window flags.

use anyhow::{anyhow, Result};
use jni::objects::{JObject, JValueGen};
use jni::sys::{jint, JNIInvokeInterface_, _jobject};
use jni::JavaVM;
use log::info;
use slint::android::AndroidApp;

use super::PermissionState;
use crate::config;

pub const CAMERA_PERMISSION: &str = "android.permission.CAMERA";

// View.SYSTEM_UI_FLAG_{LOW_PROFILE excluded}: HIDE_NAVIGATION | FULLSCREEN |
// LAYOUT_STABLE | LAYOUT_HIDE_NAVIGATION | LAYOUT_FULLSCREEN | IMMERSIVE_STICKY.
const SYSTEM_UI_IMMERSIVE_FLAGS: jint = 0x0002 | 0x0004 | 0x0100 | 0x0200 | 0x0400 | 0x1000;

pub fn sdk_version(app: &AndroidApp) -> Result<i32> {
    unsafe {
        let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
        let mut env = vm.attach_current_thread()?;
        Ok(env
            .get_static_field("android/os/Build$VERSION", "SDK_INT", "I")?
            .i()?)
    }
}

pub fn check_self_permission(app: &AndroidApp, permission: &str) -> Result<bool> {
    unsafe {
        let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
        let mut env = vm.attach_current_thread()?;
        let granted_int = env
            .get_static_field(
                "android/content/pm/PackageManager",
                "PERMISSION_GRANTED",
                "I",
            )?
            .i()?;
        let permission_str = env.new_string(permission)?;
        let activity: JObject<'_> = JObject::from_raw(app.activity_as_ptr() as *mut _jobject);
        let result = env
            .call_method(
                activity,
                "checkSelfPermission",
                "(Ljava/lang/String;)I",
                &[JValueGen::Object(&JObject::from(permission_str))],
            )?
            .i()?;
        Ok(result == granted_int)
    }
}

pub fn should_show_rationale(app: &AndroidApp, permission: &str) -> Result<bool> {
    unsafe {
        let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
        let mut env = vm.attach_current_thread()?;
        let permission_str = env.new_string(permission)?;
        let activity: JObject<'_> = JObject::from_raw(app.activity_as_ptr() as *mut _jobject);
        Ok(env
            .call_method(
                activity,
                "shouldShowRequestPermissionRationale",
                "(Ljava/lang/String;)Z",
                &[JValueGen::Object(&JObject::from(permission_str))],
            )?
            .z()?)
    }
}

pub fn request_permissions(
    app: &AndroidApp,
    permissions: &[&str],
    request_code: i32,
) -> Result<()> {
    unsafe {
        let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
        let mut env = vm.attach_current_thread()?;
        let activity: JObject<'_> = JObject::from_raw(app.activity_as_ptr() as *mut _jobject);

        let permission_count = permissions.len() as jint;
        let java_permission_array =
            env.new_object_array(permission_count, "java/lang/String", JObject::null())?;
        for (index, permission) in permissions.iter().enumerate() {
            let permission_str = env.new_string(*permission)?;
            env.set_object_array_element(&java_permission_array, index as jint, permission_str)?;
        }

        let _ = env.call_method(
            activity,
            "requestPermissions",
            "([Ljava/lang/String;I)V",
            &[
                JValueGen::Object(&JObject::from(java_permission_array)),
                request_code.into(),
            ],
        )?;
    }
    Ok(())
}

/// Camera permission as the activity currently reports it. Below SDK 23 the
/// permission is granted at install time and no runtime state exists.
pub fn camera_permission_state(app: &AndroidApp) -> Result<PermissionState> {
    if sdk_version(app)? < 23 {
        return Ok(PermissionState::Granted);
    }
    if check_self_permission(app, CAMERA_PERMISSION)? {
        Ok(PermissionState::Granted)
    } else {
        Ok(PermissionState::Denied {
            show_rationale: should_show_rationale(app, CAMERA_PERMISSION)?,
        })
    }
}

pub fn request_camera_permission(app: &AndroidApp) -> Result<()> {
    let sdk_version = sdk_version(app)?;
    info!("sdk version:{sdk_version}");
    if sdk_version >= 23 && !check_self_permission(app, CAMERA_PERMISSION)? {
        request_permissions(
            app,
            &[CAMERA_PERMISSION],
            config::PERMISSION_REQUEST_CODE,
        )?;
    }
    Ok(())
}

/// Hides the system bars and lets the preview draw edge to edge.
pub fn hide_system_bars(app: &AndroidApp) -> Result<()> {
    unsafe {
        let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
        let mut env = vm.attach_current_thread()?;
        let activity: JObject<'_> = JObject::from_raw(app.activity_as_ptr() as *mut _jobject);

        let window = env.call_method(activity, "getWindow", "()Landroid/view/Window;", &[])?;
        if let JValueGen::Object(window) = window {
            let decor_view =
                env.call_method(window, "getDecorView", "()Landroid/view/View;", &[])?;
            if let JValueGen::Object(decor_view) = decor_view {
                env.call_method(
                    decor_view,
                    "setSystemUiVisibility",
                    "(I)V",
                    &[JValueGen::Int(SYSTEM_UI_IMMERSIVE_FLAGS)],
                )?;
                Ok(())
            } else {
                Err(anyhow!("object is not a view"))
            }
        } else {
            Err(anyhow!("object is not a window"))
        }
    }
}
