use crate::camera::{CameraDevice, V4l2Camera};
use crate::common::config::CameraConfig;
use crate::common::{AuthError, Result};
use crate::core::CapturedImage;
use crate::face::FaceAuthClient;
use image::DynamicImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

type SharedCamera = Arc<Mutex<Box<dyn CameraDevice>>>;

/// Drives a camera for face login and signup.
///
/// While active, a background task grabs a frame every `detect_interval`,
/// asks the face backend whether a face is present and publishes the answer
/// on a watch channel. The camera is released when a capture succeeds, on
/// `cancel()` and when the controller is dropped.
pub struct FaceCaptureController {
    camera: SharedCamera,
    face: FaceAuthClient,
    detect_interval: Duration,
    face_tx: watch::Sender<bool>,
    poll: Option<JoinHandle<()>>,
    // Bumped under the camera lock on every start, so a deferred stop can
    // tell that the camera was started again after it was queued.
    epoch: Arc<AtomicU64>,
}

impl FaceCaptureController {
    pub fn new(camera: Box<dyn CameraDevice>, face: FaceAuthClient, detect_interval: Duration) -> Self {
        let (face_tx, _) = watch::channel(false);
        Self {
            camera: Arc::new(Mutex::new(camera)),
            face,
            detect_interval,
            face_tx,
            poll: None,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Controller over the V4L2 device named in `[camera]`.
    pub fn from_config(config: &CameraConfig, face: FaceAuthClient) -> Self {
        Self::new(
            Box::new(V4l2Camera::new(config)),
            face,
            Duration::from_millis(config.detect_interval_ms),
        )
    }

    pub fn is_active(&self) -> bool {
        self.poll.is_some()
    }

    pub fn face_detected(&self) -> bool {
        *self.face_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.face_tx.subscribe()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let camera = Arc::clone(&self.camera);
        let epoch = Arc::clone(&self.epoch);
        tokio::task::spawn_blocking(move || {
            let mut device = lock(&camera)?;
            epoch.fetch_add(1, Ordering::SeqCst);
            device.start()
        })
            .await
            .map_err(|e| AuthError::Camera(format!("Camera task failed: {}", e)))??;

        self.face_tx.send_replace(false);
        self.poll = Some(tokio::spawn(poll_faces(
            Arc::clone(&self.camera),
            self.face.clone(),
            self.detect_interval,
            self.face_tx.clone(),
        )));
        tracing::debug!("Face detection polling every {:?}", self.detect_interval);
        Ok(())
    }

    /// Grabs a still and stops the camera. On failure the controller stays
    /// active so the caller can try again.
    pub async fn capture(&mut self) -> Result<CapturedImage> {
        if !self.is_active() {
            return Err(AuthError::Camera("Camera is not started".into()));
        }

        let frame = grab(&self.camera).await?;
        let image = CapturedImage::from_dynamic(&frame)?;
        self.release();
        tracing::info!("Captured {} byte still", image.len());
        Ok(image)
    }

    /// Waits until the poll reports a face, then captures. Gives up with
    /// `NoFaceDetected` after `timeout`; the camera stays on in that case.
    pub async fn capture_when_detected(&mut self, timeout: Duration) -> Result<CapturedImage> {
        if !self.is_active() {
            return Err(AuthError::Camera("Camera is not started".into()));
        }

        let mut rx = self.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|detected| *detected)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => return Err(AuthError::Camera("Face detection stopped".into())),
            Err(_) => return Err(AuthError::NoFaceDetected),
        }
        self.capture().await
    }

    pub fn cancel(&mut self) {
        if self.is_active() {
            tracing::debug!("Face capture cancelled");
        }
        self.release();
    }

    /// Never waits on the camera lock. If an aborted poll still has a grab
    /// running on the blocking pool, the stop is queued behind it there.
    fn release(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
        self.face_tx.send_replace(false);

        match self.camera.try_lock() {
            Ok(mut camera) => camera.stop(),
            // A poisoned lock still holds the device; release it regardless.
            Err(TryLockError::Poisoned(e)) => e.into_inner().stop(),
            Err(TryLockError::WouldBlock) => {
                let camera = Arc::clone(&self.camera);
                let epoch = Arc::clone(&self.epoch);
                let queued_at = epoch.load(Ordering::SeqCst);
                let stop = move || {
                    let mut device = camera.lock().unwrap_or_else(|e| e.into_inner());
                    if epoch.load(Ordering::SeqCst) == queued_at {
                        device.stop();
                    }
                };
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        tracing::debug!("Camera busy; stopping it once the current grab finishes");
                        handle.spawn_blocking(stop);
                    }
                    Err(_) => stop(),
                }
            }
        }
    }
}

impl Drop for FaceCaptureController {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock(camera: &SharedCamera) -> Result<std::sync::MutexGuard<'_, Box<dyn CameraDevice>>> {
    camera
        .lock()
        .map_err(|_| AuthError::Camera("Camera lock poisoned".into()))
}

async fn grab(camera: &SharedCamera) -> Result<DynamicImage> {
    let camera = Arc::clone(camera);
    tokio::task::spawn_blocking(move || {
        let mut device = lock(&camera)?;
        device.grab_frame()
    })
        .await
        .map_err(|e| AuthError::Camera(format!("Camera task failed: {}", e)))?
}

async fn poll_faces(camera: SharedCamera, face: FaceAuthClient, interval: Duration, tx: watch::Sender<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let detected = match grab(&camera).await.and_then(|frame| CapturedImage::from_dynamic(&frame)) {
            Ok(image) => match face.detect(&image).await {
                Ok(result) => result.detected,
                Err(e) => {
                    tracing::debug!("Face detection failed: {}", e);
                    false
                }
            },
            Err(e) => {
                tracing::debug!("Frame grab failed: {}", e);
                false
            }
        };

        tx.send_if_modified(|current| {
            let changed = *current != detected;
            *current = detected;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::mock::tests::{blank, face_a};
    use crate::face::{MockBackend, RetryPolicy};
    use std::sync::atomic::{AtomicBool, AtomicU32};

    #[derive(Clone, Default)]
    struct CameraState {
        active: Arc<AtomicBool>,
        grabs: Arc<AtomicU32>,
        fail_grab: Arc<AtomicBool>,
        // While set, a grab blocks the way a slow V4L2 read does.
        hold_grab: Arc<AtomicBool>,
        grabbing: Arc<AtomicBool>,
    }

    struct FakeCamera {
        state: CameraState,
        frame: DynamicImage,
        missing: bool,
    }

    impl CameraDevice for FakeCamera {
        fn start(&mut self) -> Result<()> {
            if self.missing {
                return Err(AuthError::CameraUnavailable("no device".into()));
            }
            self.state.active.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn grab_frame(&mut self) -> Result<DynamicImage> {
            if !self.state.active.load(Ordering::SeqCst) {
                return Err(AuthError::Camera("Camera is not started".into()));
            }
            if self.state.fail_grab.load(Ordering::SeqCst) {
                return Err(AuthError::Camera("read timeout".into()));
            }
            self.state.grabbing.store(true, Ordering::SeqCst);
            while self.state.hold_grab.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.state.grabbing.store(false, Ordering::SeqCst);
            self.state.grabs.fetch_add(1, Ordering::SeqCst);
            Ok(self.frame.clone())
        }

        fn stop(&mut self) {
            self.state.active.store(false, Ordering::SeqCst);
        }

        fn is_active(&self) -> bool {
            self.state.active.load(Ordering::SeqCst)
        }
    }

    fn controller(frame: CapturedImage, missing: bool) -> (FaceCaptureController, CameraState) {
        let state = CameraState::default();
        let camera = FakeCamera {
            state: state.clone(),
            frame: frame.decode().unwrap(),
            missing,
        };
        let face = FaceAuthClient::new(Arc::new(MockBackend::new(0.9)), RetryPolicy::default());
        (
            FaceCaptureController::new(Box::new(camera), face, Duration::from_millis(10)),
            state,
        )
    }

    #[tokio::test]
    async fn missing_camera_is_unavailable() {
        let (mut controller, state) = controller(face_a(), true);
        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, AuthError::CameraUnavailable(_)));
        assert!(!controller.is_active());
        assert!(!state.active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn publishes_detection_and_releases_after_capture() {
        let (mut controller, state) = controller(face_a(), false);
        controller.start().await.unwrap();

        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|d| *d))
            .await
            .unwrap()
            .unwrap();
        assert!(controller.face_detected());

        let still = controller.capture().await.unwrap();
        assert!(!still.is_empty());
        assert!(!controller.is_active());
        assert!(!controller.face_detected());
        eventually(|| !state.active.load(Ordering::SeqCst)).await;
    }

    #[tokio::test]
    async fn blank_frames_never_report_a_face() {
        let (mut controller, state) = controller(blank(), false);
        controller.start().await.unwrap();

        let err = controller
            .capture_when_detected(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoFaceDetected));
        assert!(state.grabs.load(Ordering::SeqCst) > 0);
        assert!(controller.is_active());

        controller.cancel();
        eventually(|| !state.active.load(Ordering::SeqCst)).await;
    }

    #[tokio::test]
    async fn failed_capture_keeps_controller_active() {
        let (mut controller, state) = controller(face_a(), false);
        controller.start().await.unwrap();

        state.fail_grab.store(true, Ordering::SeqCst);
        assert!(controller.capture().await.is_err());
        assert!(controller.is_active());
        assert!(state.active.load(Ordering::SeqCst));

        state.fail_grab.store(false, Ordering::SeqCst);
        assert!(controller.capture().await.is_ok());
        eventually(|| !state.active.load(Ordering::SeqCst)).await;
    }

    #[tokio::test]
    async fn drop_releases_camera() {
        let (mut controller, state) = controller(face_a(), false);
        controller.start().await.unwrap();
        assert!(state.active.load(Ordering::SeqCst));

        drop(controller);
        assert!(!state.active.load(Ordering::SeqCst));
    }

    async fn eventually(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn cancel_does_not_wait_for_a_grab_in_flight() {
        let (mut controller, state) = controller(face_a(), false);
        state.hold_grab.store(true, Ordering::SeqCst);
        controller.start().await.unwrap();
        eventually(|| state.grabbing.load(Ordering::SeqCst)).await;

        controller.cancel();
        assert!(!controller.is_active());
        assert!(state.active.load(Ordering::SeqCst));

        state.hold_grab.store(false, Ordering::SeqCst);
        eventually(|| !state.active.load(Ordering::SeqCst)).await;
    }

    #[tokio::test]
    async fn capture_requires_start() {
        let (mut controller, _state) = controller(face_a(), false);
        assert!(controller.capture().await.is_err());
    }
}
