//! UART-attached camera backend.
//!
//! The device speaks a line-oriented command protocol: each command is an
//! ASCII token terminated by `\n`, acknowledged by a status line containing
//! `OK`. Image payloads follow as a 4-byte big-endian length prefix plus
//! JPEG bytes. The port runs raw 8N1 with no flow control; all reads are
//! poll-bounded so a silent device surfaces as `Timeout`, never a hang.

use crate::config::SerialSettings;
use crate::errors::TransportError;
use crate::transport::framing::{ByteSource, FrameDecoder};
use crate::transport::{wait_readable, TransportBackend};
use crate::types::Frame;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, LocalFlags, SetArg, SpecialCharacterIndices,
};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

const CMD_CAPTURE_IMAGE: &str = "CAPTURE_IMAGE";
const CMD_START_VIDEO: &str = "START_VIDEO";
const CMD_STOP_VIDEO: &str = "STOP_VIDEO";
const STATUS_OK: &str = "OK";
const STATUS_LINE_MAX: usize = 256;

pub struct SerialBackend {
    settings: SerialSettings,
    port: Option<File>,
    decoder: FrameDecoder,
}

impl SerialBackend {
    pub fn new(settings: SerialSettings) -> Self {
        let decoder = FrameDecoder::new(settings.max_frame_bytes);
        Self {
            settings,
            port: None,
            decoder,
        }
    }

    fn configure_port(&self, port: &File) -> Result<(), TransportError> {
        let fd = port.as_fd();
        let mut tio = termios::tcgetattr(fd).map_err(|e| {
            TransportError::DeviceUnavailable(format!(
                "{} is not a terminal device: {}",
                self.settings.path, e
            ))
        })?;

        termios::cfmakeraw(&mut tio);
        tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        tio.control_flags &= !(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CRTSCTS);
        tio.control_flags &= !ControlFlags::CSIZE;
        tio.control_flags |= ControlFlags::CS8;
        tio.local_flags &= !LocalFlags::ECHO;
        // Non-blocking reads; timing is driven by poll, not the driver.
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        let baud = map_baud(self.settings.baud).ok_or_else(|| {
            TransportError::ConfigRejected(format!(
                "unsupported baud rate {}",
                self.settings.baud
            ))
        })?;
        termios::cfsetspeed(&mut tio, baud).map_err(|e| {
            TransportError::ConfigRejected(format!(
                "baud rate {} refused: {}",
                self.settings.baud, e
            ))
        })?;

        termios::tcsetattr(fd, SetArg::TCSANOW, &tio).map_err(|e| {
            TransportError::DeviceUnavailable(format!("failed to configure port: {}", e))
        })?;
        termios::tcflush(fd, FlushArg::TCIOFLUSH).map_err(|e| {
            TransportError::DeviceUnavailable(format!("failed to flush port: {}", e))
        })?;
        Ok(())
    }

    fn port(&mut self) -> Result<&mut File, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }

    /// Drop whatever the device is still sending after a framing error so
    /// the next exchange starts at a command boundary.
    fn drain_input(&mut self) {
        if let Some(port) = &self.port {
            if let Err(e) = termios::tcflush(port.as_fd(), FlushArg::TCIFLUSH) {
                log::debug!("input flush failed: {}", e);
            }
        }
    }

    /// Send one command token and require an `OK` status line back.
    fn send_command(&mut self, cmd: &str) -> Result<(), TransportError> {
        let response_timeout = self.settings.response_timeout();
        let decoder = self.decoder;
        let port = self.port()?;
        port.write_all(format!("{}\n", cmd).as_bytes())
            .map_err(|e| TransportError::DeviceUnavailable(format!("serial write failed: {}", e)))?;

        let deadline = Instant::now() + response_timeout;
        let mut src = TtySource { port };
        let line = decoder.read_status_line(&mut src, deadline, STATUS_LINE_MAX)?;
        if line.contains(STATUS_OK) {
            log::trace!("{} acknowledged: {:?}", cmd, line);
            Ok(())
        } else {
            Err(TransportError::Protocol(format!(
                "{} rejected by device: {:?}",
                cmd, line
            )))
        }
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<bytes::Bytes, TransportError> {
        let decoder = self.decoder;
        let deadline = Instant::now() + timeout;
        let port = self.port()?;
        let mut src = TtySource { port };
        decoder.read_frame(&mut src, deadline)
    }
}

impl TransportBackend for SerialBackend {
    fn describe(&self) -> String {
        format!("serial {} @{}", self.settings.path, self.settings.baud)
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let port = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NOCTTY)
            .open(&self.settings.path)
            .map_err(|e| {
                TransportError::DeviceUnavailable(format!(
                    "cannot open {}: {}",
                    self.settings.path, e
                ))
            })?;
        self.configure_port(&port)?;
        self.port = Some(port);
        Ok(())
    }

    fn capture_still(&mut self) -> Result<Frame, TransportError> {
        self.send_command(CMD_CAPTURE_IMAGE).map_err(|e| {
            if matches!(e, TransportError::Protocol(_)) {
                self.drain_input();
            }
            e
        })?;
        let data = self
            .read_frame(self.settings.frame_timeout())
            .map_err(|e| {
                if matches!(e, TransportError::Protocol(_)) {
                    self.drain_input();
                }
                e
            })?;
        Ok(Frame::still(data, "JPEG"))
    }

    fn start_streaming(&mut self) -> Result<(), TransportError> {
        self.send_command(CMD_START_VIDEO)
    }

    fn read_stream_frame(&mut self) -> Result<Frame, TransportError> {
        let data = self
            .read_frame(self.settings.frame_timeout())
            .map_err(|e| {
                if matches!(e, TransportError::Protocol(_)) {
                    self.drain_input();
                }
                e
            })?;
        Ok(Frame::stream_unit(data, "JPEG"))
    }

    fn stop_streaming(&mut self) -> Result<(), TransportError> {
        // The device may still be pushing frames when the stop token goes
        // out, so tolerate frame bytes ahead of the status line by flushing
        // after a protocol mismatch and retrying once.
        match self.send_command(CMD_STOP_VIDEO) {
            Ok(()) => Ok(()),
            Err(TransportError::Protocol(_)) => {
                self.drain_input();
                self.send_command(CMD_STOP_VIDEO)
            }
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        self.port = None;
    }
}

/// Poll-bounded byte reads over the open tty.
struct TtySource<'a> {
    port: &'a mut File,
}

impl ByteSource for TtySource<'_> {
    fn read_wait(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, TransportError> {
        if !wait_readable(self.port.as_fd(), wait)? {
            return Err(TransportError::Timeout);
        }
        loop {
            match self.port.read(buf) {
                Ok(0) => {
                    return Err(TransportError::DeviceUnavailable(
                        "serial port closed".to_string(),
                    ))
                }
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(TransportError::DeviceUnavailable(format!(
                        "serial read failed: {}",
                        e
                    )))
                }
            }
        }
    }
}

fn map_baud(baud: u32) -> Option<BaudRate> {
    match baud {
        9600 => Some(BaudRate::B9600),
        19200 => Some(BaudRate::B19200),
        38400 => Some(BaudRate::B38400),
        57600 => Some(BaudRate::B57600),
        115_200 => Some(BaudRate::B115200),
        230_400 => Some(BaudRate::B230400),
        _ => None,
    }
}
