//! Memory-mapped V4L2 capture backend.
//!
//! The device is opened by node path and the requested pixel format is
//! negotiated through `VIDIOC_S_FMT`: a driver that cannot produce the
//! requested four-character code rejects the configuration outright, while
//! an adjusted resolution is accepted and logged. Frames are dequeued from a
//! small mmap ring; every dequeue is preceded by a poll so a wedged driver
//! surfaces as `Timeout` instead of blocking the acquisition thread forever.

use crate::config::V4l2Settings;
use crate::errors::TransportError;
use crate::transport::{wait_readable, TransportBackend};
use crate::types::Frame;
use bytes::Bytes;
use std::os::fd::{BorrowedFd, RawFd};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

pub struct V4l2Backend {
    settings: V4l2Settings,
    // Declared before `device` so an active stream always drops first.
    stream: Option<MmapStream<'static>>,
    device: Option<Box<Device>>,
    fd: RawFd,
    format_name: String,
}

impl V4l2Backend {
    pub fn new(settings: V4l2Settings) -> Self {
        let format_name = settings.fourcc.clone();
        Self {
            settings,
            stream: None,
            device: None,
            fd: -1,
            format_name,
        }
    }

    fn requested_fourcc(&self) -> Result<FourCC, TransportError> {
        let code: [u8; 4] = self.settings.fourcc.as_bytes().try_into().map_err(|_| {
            TransportError::ConfigRejected(format!(
                "fourcc {:?} must be exactly four characters",
                self.settings.fourcc
            ))
        })?;
        Ok(FourCC::new(&code))
    }

    /// Pull one buffer from the active stream, poll-bounded.
    fn dequeue(&mut self) -> Result<Bytes, TransportError> {
        let timeout = self.settings.frame_timeout();
        // The fd belongs to the boxed device owned by self, which stays
        // alive for the duration of this call.
        let ready = wait_readable(unsafe { BorrowedFd::borrow_raw(self.fd) }, timeout)?;
        if !ready {
            return Err(TransportError::Timeout);
        }
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        let (buf, meta) = stream.next().map_err(|e| {
            TransportError::DeviceUnavailable(format!("buffer dequeue failed: {}", e))
        })?;
        let used = meta.bytesused as usize;
        if used == 0 {
            return Err(TransportError::Protocol(
                "driver returned an empty buffer".to_string(),
            ));
        }
        Ok(Bytes::copy_from_slice(&buf[..used.min(buf.len())]))
    }
}

impl TransportBackend for V4l2Backend {
    fn describe(&self) -> String {
        format!(
            "v4l2 {} {}x{}@{}fps",
            self.settings.device, self.settings.width, self.settings.height, self.settings.fps
        )
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let fourcc = self.requested_fourcc()?;
        let device = Device::with_path(&self.settings.device).map_err(|e| {
            TransportError::DeviceUnavailable(format!(
                "cannot open {}: {}",
                self.settings.device, e
            ))
        })?;

        let requested = Format::new(self.settings.width, self.settings.height, fourcc);
        let actual = device.set_format(&requested).map_err(|e| {
            TransportError::ConfigRejected(format!(
                "format {}x{} {} refused: {}",
                self.settings.width, self.settings.height, fourcc, e
            ))
        })?;
        if actual.fourcc != requested.fourcc {
            return Err(TransportError::ConfigRejected(format!(
                "device cannot produce {}, offered {} instead",
                requested.fourcc, actual.fourcc
            )));
        }
        if actual.width != requested.width || actual.height != requested.height {
            log::warn!(
                "device adjusted resolution from {}x{} to {}x{}",
                requested.width,
                requested.height,
                actual.width,
                actual.height
            );
        }
        if let Err(e) = device.set_params(&Parameters::with_fps(self.settings.fps)) {
            log::warn!("frame rate {} not applied: {}", self.settings.fps, e);
        }

        self.format_name = actual.fourcc.to_string();
        self.fd = device.handle().fd();
        self.device = Some(Box::new(device));
        Ok(())
    }

    fn capture_still(&mut self) -> Result<Frame, TransportError> {
        if self.stream.is_some() {
            // Already streaming: take the next live frame as the still.
            let data = self.dequeue()?;
            return Ok(Frame::still(data, self.format_name.clone()));
        }

        let device = self.device.as_deref().ok_or(TransportError::NotOpen)?;
        let timeout = self.settings.frame_timeout();
        let fd = device.handle().fd();
        let mut stream = MmapStream::with_buffers(device, Type::VideoCapture, self.settings.buffers)
            .map_err(|e| {
                TransportError::DeviceUnavailable(format!("cannot map capture buffers: {}", e))
            })?;

        // A cold sensor needs a few frames to settle exposure; discard them.
        for _ in 0..self.settings.warmup_frames {
            if !wait_readable(unsafe { BorrowedFd::borrow_raw(fd) }, timeout)? {
                return Err(TransportError::Timeout);
            }
            stream.next().map_err(|e| {
                TransportError::DeviceUnavailable(format!("buffer dequeue failed: {}", e))
            })?;
        }
        if !wait_readable(unsafe { BorrowedFd::borrow_raw(fd) }, timeout)? {
            return Err(TransportError::Timeout);
        }
        let (buf, meta) = stream.next().map_err(|e| {
            TransportError::DeviceUnavailable(format!("buffer dequeue failed: {}", e))
        })?;
        let used = meta.bytesused as usize;
        if used == 0 {
            return Err(TransportError::Protocol(
                "driver returned an empty buffer".to_string(),
            ));
        }
        let data = Bytes::copy_from_slice(&buf[..used.min(buf.len())]);
        Ok(Frame::still(data, self.format_name.clone()))
    }

    fn start_streaming(&mut self) -> Result<(), TransportError> {
        let device = self.device.as_deref().ok_or(TransportError::NotOpen)?;
        // The stream borrows the boxed device for 'static. Soundness rests
        // on drop order: stop_streaming and close both clear the stream
        // before the device can go away, and the field order drops it first.
        let device: &'static Device = unsafe { &*(device as *const Device) };
        let stream = MmapStream::with_buffers(device, Type::VideoCapture, self.settings.buffers)
            .map_err(|e| {
                TransportError::DeviceUnavailable(format!("cannot map capture buffers: {}", e))
            })?;
        self.stream = Some(stream);
        Ok(())
    }

    fn read_stream_frame(&mut self) -> Result<Frame, TransportError> {
        let data = self.dequeue()?;
        Ok(Frame::stream_unit(data, self.format_name.clone()))
    }

    fn stop_streaming(&mut self) -> Result<(), TransportError> {
        self.stream = None;
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
        self.device = None;
        self.fd = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_names_device_and_mode() {
        let backend = V4l2Backend::new(V4l2Settings::default());
        assert_eq!(backend.describe(), "v4l2 /dev/video0 640x480@30fps");
    }

    #[test]
    fn open_rejects_malformed_fourcc() {
        let mut backend = V4l2Backend::new(V4l2Settings {
            fourcc: "BAD".to_string(),
            ..V4l2Settings::default()
        });
        let err = backend.open().unwrap_err();
        assert!(matches!(err, TransportError::ConfigRejected(_)));
    }
}
