use core::slice;
use std::ffi::{c_int, c_void, CStr};
use std::mem::zeroed;
use std::ptr::null_mut;
use std::sync::mpsc::Sender;
use std::time::Instant;

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use ndk_sys::{
    acamera_metadata_tag, camera_status_t, media_status_t, ACameraCaptureSession,
    ACameraCaptureSession_close, ACameraCaptureSession_setRepeatingRequest,
    ACameraCaptureSession_stateCallbacks, ACameraCaptureSession_stopRepeating, ACameraDevice,
    ACameraDevice_StateCallbacks, ACameraDevice_close, ACameraDevice_createCaptureRequest,
    ACameraDevice_createCaptureSession, ACameraDevice_getId, ACameraDevice_request_template,
    ACameraManager_create, ACameraManager_delete, ACameraManager_deleteCameraIdList,
    ACameraManager_getCameraCharacteristics, ACameraManager_getCameraIdList,
    ACameraManager_openCamera, ACameraMetadata, ACameraMetadata_const_entry, ACameraMetadata_free,
    ACameraMetadata_getConstEntry, ACameraOutputTarget, ACameraOutputTarget_create,
    ACameraOutputTarget_free, ACaptureRequest, ACaptureRequest_addTarget, ACaptureRequest_free,
    ACaptureSessionOutput, ACaptureSessionOutputContainer, ACaptureSessionOutputContainer_add,
    ACaptureSessionOutputContainer_create, ACaptureSessionOutputContainer_free,
    ACaptureSessionOutput_create, ACaptureSessionOutput_free, AImage, AImageReader,
    AImageReader_ImageListener, AImageReader_acquireLatestImage, AImageReader_delete,
    AImageReader_getFormat, AImageReader_getHeight, AImageReader_getWidth, AImageReader_getWindow,
    AImageReader_new, AImageReader_setImageListener, AImage_delete, AImage_getPlaneData,
    AImage_getPlanePixelStride, AImage_getPlaneRowStride, ANativeWindow,
};
use slint::android::AndroidApp;
use slint::SharedPixelBuffer;

use super::convert::Converter;
use super::{
    choose_preview_size, parse_stream_configs, FrameBuffer, StreamConfig,
    IMAGE_FORMAT_YUV_420_888,
};
use crate::platform::android::{check_self_permission, CAMERA_PERMISSION};

#[link(name = "camera2ndk")]
extern "C" {}

#[link(name = "mediandk")]
extern "C" {}

/// ACAMERA_LENS_FACING_BACK
const LENS_FACING_BACK: u8 = 1;

pub struct AndroidCamera {
    app: AndroidApp,
    frame_sender: Sender<FrameBuffer>,
    camera_device: *mut ACameraDevice,
    capture_request: *mut ACaptureRequest,
    camera_output_target: *mut ACameraOutputTarget,
    session_output: *mut ACaptureSessionOutput,
    session_output_container: *mut ACaptureSessionOutputContainer,
    capture_session: *mut ACameraCaptureSession,
    image_reader: *mut AImageReader,
    image_listener: AImageReader_ImageListener,
    session_state_callbacks: ACameraCaptureSession_stateCallbacks,
    device_state_callbacks: ACameraDevice_StateCallbacks,
    stream_configs: Vec<StreamConfig>,
    sensor_orientation: i32,
    converter: Option<Converter>,
    rgba_buffer: Vec<u8>,
    yuv_scratch: Vec<u8>,
    frame_count: i32,
    fps_timer: Instant,
}

impl AndroidCamera {
    pub fn new(app: AndroidApp, frame_sender: Sender<FrameBuffer>) -> Self {
        Self {
            app,
            frame_sender,
            camera_device: null_mut(),
            capture_request: null_mut(),
            camera_output_target: null_mut(),
            session_output: null_mut(),
            session_output_container: null_mut(),
            capture_session: null_mut(),
            image_reader: null_mut(),
            image_listener: AImageReader_ImageListener {
                context: null_mut(),
                onImageAvailable: None,
            },
            session_state_callbacks: unsafe { zeroed() },
            device_state_callbacks: unsafe { zeroed() },
            stream_configs: vec![],
            sensor_orientation: 0,
            converter: None,
            rgba_buffer: vec![],
            yuv_scratch: vec![],
            frame_count: 0,
            fps_timer: Instant::now(),
        }
    }

    /// Opens the back-facing camera, or the first one when no back lens
    /// exists.
    pub fn open(&mut self) -> Result<()> {
        if !check_self_permission(&self.app, CAMERA_PERMISSION)? {
            return Err(anyhow!("The camera permission is not granted."));
        }
        if !self.camera_device.is_null() {
            self.close();
        }
        unsafe {
            let camera_manager = ACameraManager_create();
            let mut camera_id_list_raw = null_mut();
            let status = ACameraManager_getCameraIdList(camera_manager, &mut camera_id_list_raw);
            if status != camera_status_t::ACAMERA_OK || camera_id_list_raw.is_null() {
                ACameraManager_delete(camera_manager);
                return Err(anyhow!(
                    "Failed to get camera id list (reason: {:?})",
                    status
                ));
            }

            let camera_id_list = &*camera_id_list_raw;
            if camera_id_list.numCameras < 1 {
                ACameraManager_deleteCameraIdList(camera_id_list_raw);
                ACameraManager_delete(camera_manager);
                return Err(anyhow!("No camera device detected."));
            }
            let camera_ids =
                slice::from_raw_parts(camera_id_list.cameraIds, camera_id_list.numCameras as usize);

            let mut selected: Option<(usize, u8, i32, Vec<StreamConfig>)> = None;
            for (index, &camera_id) in camera_ids.iter().enumerate() {
                let mut metadata = null_mut();
                let status =
                    ACameraManager_getCameraCharacteristics(camera_manager, camera_id, &mut metadata);
                if status != camera_status_t::ACAMERA_OK || metadata.is_null() {
                    warn!(
                        "Failed to get camera characteristics (index: {index}, reason: {:?})",
                        status
                    );
                    continue;
                }
                let (lens_facing, sensor_orientation) = sensor_info(metadata);
                let stream_configs = yuv_stream_configs(metadata);
                ACameraMetadata_free(metadata);

                let is_back = lens_facing == LENS_FACING_BACK;
                if selected.is_none() || is_back {
                    selected = Some((index, lens_facing, sensor_orientation, stream_configs));
                }
                if is_back {
                    break;
                }
            }

            let Some((index, lens_facing, sensor_orientation, stream_configs)) = selected else {
                ACameraManager_deleteCameraIdList(camera_id_list_raw);
                ACameraManager_delete(camera_manager);
                return Err(anyhow!("No usable camera device."));
            };

            info!(
                "Opening camera {index} of {} (lens facing: {lens_facing}, orientation: {sensor_orientation})",
                camera_ids.len()
            );

            unsafe extern "C" fn on_disconnected(_context: *mut c_void, device: *mut ACameraDevice) {
                info!("Camera(id: {:?}) is disconnected.", cstr(ACameraDevice_getId(device)));
            }

            unsafe extern "C" fn on_error(
                _context: *mut c_void,
                device: *mut ACameraDevice,
                error: c_int,
            ) {
                error!(
                    "Error(code: {error}) on Camera(id: {:?}).",
                    cstr(ACameraDevice_getId(device))
                );
            }

            self.device_state_callbacks.onDisconnected = Some(on_disconnected);
            self.device_state_callbacks.onError = Some(on_error);

            let status = ACameraManager_openCamera(
                camera_manager,
                camera_ids[index],
                &mut self.device_state_callbacks,
                &mut self.camera_device,
            );

            ACameraManager_deleteCameraIdList(camera_id_list_raw);
            ACameraManager_delete(camera_manager);

            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to open camera device (index: {index}, reason: {:?})",
                    status
                ));
            }

            self.sensor_orientation = sensor_orientation;
            self.stream_configs = stream_configs;
        }
        Ok(())
    }

    pub fn start_preview(&mut self, width: u32, height: u32) -> Result<()> {
        if self.camera_device.is_null() {
            return Err(anyhow!("The camera is not open."));
        }
        let Some(size) = choose_preview_size(&self.stream_configs, width, height) else {
            return Err(anyhow!("No YUV_420_888 stream configuration."));
        };
        info!(
            "preview size {}x{} (requested {width}x{height})",
            size.width, size.height
        );

        self.converter = Some(Converter::new(size.width as u32, size.height as u32));
        self.rgba_buffer.clear();
        self.frame_count = 0;
        self.fps_timer = Instant::now();
        self.create_image_reader(size.width, size.height)?;

        unsafe {
            let status = ACameraDevice_createCaptureRequest(
                self.camera_device,
                ACameraDevice_request_template::TEMPLATE_PREVIEW,
                &mut self.capture_request,
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to create preview capture request (reason: {:?})",
                    status
                ));
            }

            let mut native_window: *mut ANativeWindow = null_mut();
            let status = AImageReader_getWindow(self.image_reader, &mut native_window);
            if status != media_status_t::AMEDIA_OK {
                return Err(anyhow!(
                    "Failed to get the image reader window (reason: {:?})",
                    status
                ));
            }

            ACameraOutputTarget_create(native_window, &mut self.camera_output_target);
            ACaptureRequest_addTarget(self.capture_request, self.camera_output_target);

            ACaptureSessionOutput_create(native_window, &mut self.session_output);

            let status = ACaptureSessionOutputContainer_create(&mut self.session_output_container);
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to create capture session output container (reason: {:?})",
                    status
                ));
            }
            ACaptureSessionOutputContainer_add(self.session_output_container, self.session_output);

            unsafe extern "C" fn session_on_ready(
                _context: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                info!("Session is ready. {session:?}");
            }

            unsafe extern "C" fn session_on_active(
                _context: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                info!("Session is activated. {session:?}");
            }

            unsafe extern "C" fn session_on_closed(
                _context: *mut c_void,
                session: *mut ACameraCaptureSession,
            ) {
                info!("Session is closed. {session:?}");
            }

            self.session_state_callbacks.onReady = Some(session_on_ready);
            self.session_state_callbacks.onActive = Some(session_on_active);
            self.session_state_callbacks.onClosed = Some(session_on_closed);
            self.session_state_callbacks.context = null_mut();

            let status = ACameraDevice_createCaptureSession(
                self.camera_device,
                self.session_output_container,
                &self.session_state_callbacks,
                &mut self.capture_session,
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to create capture session (reason: {:?})",
                    status
                ));
            }

            let status = ACameraCaptureSession_setRepeatingRequest(
                self.capture_session,
                null_mut(),
                1,
                &mut self.capture_request,
                null_mut(),
            );
            if status != camera_status_t::ACAMERA_OK {
                return Err(anyhow!(
                    "Failed to set repeating request (reason: {:?})",
                    status
                ));
            }
        }
        Ok(())
    }

    fn create_image_reader(&mut self, width: i32, height: i32) -> Result<()> {
        unsafe {
            let status = AImageReader_new(
                width,
                height,
                IMAGE_FORMAT_YUV_420_888,
                2,
                &mut self.image_reader,
            );
            if status != media_status_t::AMEDIA_OK {
                return Err(anyhow!(
                    "Failed to create the image reader (reason: {:?})",
                    status
                ));
            }

            unsafe extern "C" fn on_image_available(
                context: *mut c_void,
                _reader: *mut AImageReader,
            ) {
                // Runs on the media callback thread. The context points at the
                // camera, which stays in place for the lifetime of the session.
                let camera = &mut *(context as *mut AndroidCamera);
                if let Err(err) = camera.on_image_available() {
                    warn!("dropping preview frame: {err:?}");
                }
            }

            self.image_listener.context = self as *mut _ as *mut c_void;
            self.image_listener.onImageAvailable = Some(on_image_available);

            let status = AImageReader_setImageListener(self.image_reader, &mut self.image_listener);
            if status != media_status_t::AMEDIA_OK {
                return Err(anyhow!(
                    "Failed to set the image listener (reason: {:?})",
                    status
                ));
            }
        }
        Ok(())
    }

    fn on_image_available(&mut self) -> Result<()> {
        unsafe {
            let mut image = null_mut();
            let status = AImageReader_acquireLatestImage(self.image_reader, &mut image);
            if status != media_status_t::AMEDIA_OK {
                // The reader discards frames when the consumer lags behind.
                return if status == media_status_t::AMEDIA_IMGREADER_NO_BUFFER_AVAILABLE {
                    Ok(())
                } else {
                    Err(anyhow!(
                        "Failed to acquire the latest image (reason: {:?})",
                        status
                    ))
                };
            }
            let result = self.process_image(image);
            AImage_delete(image);
            result
        }
    }

    unsafe fn process_image(&mut self, image: *mut AImage) -> Result<()> {
        let mut format = 0;
        let status = AImageReader_getFormat(self.image_reader, &mut format);
        if status != media_status_t::AMEDIA_OK {
            return Err(anyhow!("Failed to read the image format (reason: {:?})", status));
        }
        if format != IMAGE_FORMAT_YUV_420_888 {
            return Err(anyhow!("unexpected image format {format}"));
        }

        let mut width = 0;
        let mut height = 0;
        let status = AImageReader_getWidth(self.image_reader, &mut width);
        if status != media_status_t::AMEDIA_OK {
            return Err(anyhow!("Failed to read the image width (reason: {:?})", status));
        }
        let status = AImageReader_getHeight(self.image_reader, &mut height);
        if status != media_status_t::AMEDIA_OK {
            return Err(anyhow!("Failed to read the image height (reason: {:?})", status));
        }

        let mut y_stride = 0;
        let mut vu_stride = 0;
        let mut vu_pixel_stride = 0;
        let mut y_pixel = null_mut();
        let mut vu_pixel = null_mut();
        let mut y_len = 0;
        let mut vu_len = 0;
        AImage_getPlaneRowStride(image, 0, &mut y_stride);
        AImage_getPlaneRowStride(image, 1, &mut vu_stride);
        AImage_getPlanePixelStride(image, 1, &mut vu_pixel_stride);
        AImage_getPlaneData(image, 0, &mut y_pixel, &mut y_len);
        AImage_getPlaneData(image, 1, &mut vu_pixel, &mut vu_len);

        if vu_pixel_stride != 2 {
            return Err(anyhow!(
                "planar chroma layout is not supported (pixel stride {vu_pixel_stride})"
            ));
        }

        let width_u = width as usize;
        let height_u = height as usize;
        let y_size = width_u * height_u;
        let frame_len = y_size + y_size / 2;

        // Plane 1 normally follows the Y plane directly, making the whole
        // frame one packed block. Repack row by row when it does not.
        let contiguous =
            y_stride == width && vu_stride == width && vu_pixel == y_pixel.add(y_size);
        let yuv: &[u8] = if contiguous {
            slice::from_raw_parts(y_pixel, frame_len)
        } else {
            self.yuv_scratch.clear();
            self.yuv_scratch.reserve(frame_len);
            for row in 0..height_u {
                let src = y_pixel.add(row * y_stride as usize);
                self.yuv_scratch
                    .extend_from_slice(slice::from_raw_parts(src, width_u));
            }
            for row in 0..height_u / 2 {
                let src = vu_pixel.add(row * vu_stride as usize);
                self.yuv_scratch
                    .extend_from_slice(slice::from_raw_parts(src, width_u));
            }
            &self.yuv_scratch
        };

        let converter = self
            .converter
            .as_mut()
            .ok_or_else(|| anyhow!("no converter for this session"))?;
        if converter.size() != (width as u32, height as u32) {
            return Err(anyhow!("frame size {width}x{height} does not match the session"));
        }
        let (out_width, out_height) =
            converter.convert(yuv, self.sensor_orientation, &mut self.rgba_buffer)?;

        let buffer = SharedPixelBuffer::clone_from_slice(&self.rgba_buffer, out_width, out_height);
        self.frame_sender
            .send(buffer)
            .map_err(|err| anyhow!("{err:?}"))?;

        // Preview callbacks arrive at ~30 FPS.
        self.frame_count += 1;
        if self.fps_timer.elapsed().as_millis() > 1000 {
            info!("preview FPS:{}", self.frame_count);
            self.fps_timer = Instant::now();
            self.frame_count = 0;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        unsafe {
            if !self.capture_session.is_null() {
                ACameraCaptureSession_stopRepeating(self.capture_session);
                ACameraCaptureSession_close(self.capture_session);
                self.capture_session = null_mut();
            }
            if !self.capture_request.is_null() {
                ACaptureRequest_free(self.capture_request);
                self.capture_request = null_mut();
            }
            if !self.camera_output_target.is_null() {
                ACameraOutputTarget_free(self.camera_output_target);
                self.camera_output_target = null_mut();
            }
            if !self.camera_device.is_null() {
                let status = ACameraDevice_close(self.camera_device);
                if status != camera_status_t::ACAMERA_OK {
                    error!("Failed to close the camera device (reason: {:?})", status);
                }
                self.camera_device = null_mut();
            }
            if !self.session_output.is_null() {
                ACaptureSessionOutput_free(self.session_output);
                self.session_output = null_mut();
            }
            if !self.session_output_container.is_null() {
                ACaptureSessionOutputContainer_free(self.session_output_container);
                self.session_output_container = null_mut();
            }
            if !self.image_reader.is_null() {
                // The listener goes with the reader; no callbacks fire past
                // this point.
                AImageReader_delete(self.image_reader);
                self.image_reader = null_mut();
            }
        }
        self.converter = None;
        info!("Close Camera");
    }
}

impl Drop for AndroidCamera {
    fn drop(&mut self) {
        self.close();
    }
}

unsafe fn sensor_info(metadata: *mut ACameraMetadata) -> (u8, i32) {
    let mut lens_facing: ACameraMetadata_const_entry = zeroed();
    let mut orientation: ACameraMetadata_const_entry = zeroed();

    let facing = if ACameraMetadata_getConstEntry(
        metadata,
        acamera_metadata_tag::ACAMERA_LENS_FACING.0,
        &mut lens_facing,
    ) == camera_status_t::ACAMERA_OK
        && lens_facing.count > 0
    {
        *lens_facing.data.u8_
    } else {
        0
    };

    let degrees = if ACameraMetadata_getConstEntry(
        metadata,
        acamera_metadata_tag::ACAMERA_SENSOR_ORIENTATION.0,
        &mut orientation,
    ) == camera_status_t::ACAMERA_OK
        && orientation.count > 0
    {
        *orientation.data.i32_
    } else {
        0
    };

    (facing, degrees)
}

unsafe fn yuv_stream_configs(metadata: *mut ACameraMetadata) -> Vec<StreamConfig> {
    let mut configs: ACameraMetadata_const_entry = zeroed();
    let status = ACameraMetadata_getConstEntry(
        metadata,
        acamera_metadata_tag::ACAMERA_SCALER_AVAILABLE_STREAM_CONFIGURATIONS.0,
        &mut configs,
    );
    if status != camera_status_t::ACAMERA_OK || configs.count == 0 {
        return Vec::new();
    }
    let data = slice::from_raw_parts(configs.data.i32_, configs.count as usize);
    parse_stream_configs(data, IMAGE_FORMAT_YUV_420_888)
}

unsafe fn cstr<'a>(s: *const std::os::raw::c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}
