use crate::camera::CameraDevice;
use crate::common::config::CameraConfig;
use crate::common::{AuthError, Result};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

pub struct V4l2Camera {
    config: CameraConfig,
    device: Option<Device>,
    format: Option<v4l::Format>,
}

impl V4l2Camera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            config: config.clone(),
            device: None,
            format: None,
        }
    }

    fn open(&self) -> Result<(Device, v4l::Format)> {
        let index = self.config.device_index;
        tracing::debug!("Opening camera device {}", index);

        let device = Device::new(index as usize)
            .map_err(|e| AuthError::CameraUnavailable(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device
            .query_caps()
            .map_err(|e| AuthError::CameraUnavailable(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} ({}) may not support standard video capture", index, caps.card);
        }

        let mut fmt = device
            .format()
            .map_err(|e| AuthError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;

        // GREY stays GREY (IR sensors); everything else is asked for MJPG.
        if fmt.fourcc.str().unwrap_or("") != "GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let actual = device
            .format()
            .map_err(|e| AuthError::Camera(format!("Failed to get final format: {}", e)))?;
        tracing::debug!(
            "Camera format: {}x{} {}",
            actual.width,
            actual.height,
            actual.fourcc.str().unwrap_or("????")
        );
        if actual.width != self.config.width || actual.height != self.config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width, actual.height, self.config.width, self.config.height
            );
        }

        Ok((device, actual))
    }

    fn decode(format: &v4l::Format, data: &[u8]) -> Result<DynamicImage> {
        let (width, height) = (format.width, format.height);
        match format.fourcc.str().unwrap_or("") {
            "GREY" => {
                let len = (width * height) as usize;
                if data.len() < len {
                    return Err(AuthError::Camera(format!("Short GREY frame: {} bytes", data.len())));
                }
                let buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data[..len].to_vec())
                    .ok_or_else(|| AuthError::Camera("Failed to create grayscale image buffer".into()))?;
                Ok(DynamicImage::ImageLuma8(buffer))
            }
            "YUYV" => {
                // Luma only: every other byte.
                let luma: Vec<u8> = data.iter().step_by(2).take((width * height) as usize).copied().collect();
                let buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, luma)
                    .ok_or_else(|| AuthError::Camera("Short YUYV frame".into()))?;
                Ok(DynamicImage::ImageLuma8(buffer))
            }
            "MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
            other => Err(AuthError::Camera(format!("Unsupported format: {}", other))),
        }
    }
}

impl CameraDevice for V4l2Camera {
    fn start(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }
        let (device, format) = self.open()?;
        self.device = Some(device);
        self.format = Some(format);

        for _ in 0..self.config.warmup_frames {
            if let Err(e) = self.grab_frame() {
                self.stop();
                return Err(e);
            }
            std::thread::sleep(std::time::Duration::from_millis(self.config.warmup_delay_ms));
        }
        tracing::info!("Camera {} started", self.config.device_index);
        Ok(())
    }

    fn grab_frame(&mut self) -> Result<DynamicImage> {
        let (device, format) = match (self.device.as_mut(), self.format.as_ref()) {
            (Some(device), Some(format)) => (device, format),
            _ => return Err(AuthError::Camera("Camera is not started".into())),
        };

        let mut stream = v4l::io::mmap::Stream::with_buffers(device, Type::VideoCapture, 4)
            .map_err(|e| AuthError::Camera(format!("Failed to create stream: {}", e)))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| AuthError::Camera(format!("Failed to capture: {}", e)))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        Self::decode(format, &buf[..used])
    }

    fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::info!("Camera {} released", self.config.device_index);
        }
        self.format = None;
    }

    fn is_active(&self) -> bool {
        self.device.is_some()
    }
}
