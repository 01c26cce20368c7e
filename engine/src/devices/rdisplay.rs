//! Remote display device contract (§6 "Remote display", §4.5).
//!
//! The production implementation is a persistent blocking `TcpStream` to
//! a frame-accurate remote display process, framing each
//! [`proto::display`] message as a 4-byte big-endian length prefix
//! followed by JSON — a length-prefixed framing chosen over UDP
//! datagrams (the teacher's `udp_tx.rs` transport) because the remote
//! display is a single persistent peer the engine must never silently
//! drop frames to, unlike the teacher's broadcast telemetry fan-out.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use proto::display::{FrameAck, FrameUpdate, ScreenGeometry, TargetDef};
use proto::error::DeviceError;

pub trait RemoteDisplay: Send {
    fn reinit(&mut self) -> Result<(), DeviceError>;
    fn add_target(&mut self, def: TargetDef) -> Result<(), DeviceError>;
    fn load_targets(&mut self) -> Result<(), DeviceError>;
    fn start_animation(&mut self, frame0: FrameUpdate, frame1: FrameUpdate) -> Result<FrameAck, DeviceError>;
    fn update_animation(&mut self, frame: FrameUpdate) -> Result<FrameAck, DeviceError>;
    fn stop_animation(&mut self) -> Result<(), DeviceError>;
    fn get_geometry(&mut self) -> Result<ScreenGeometry, DeviceError>;
    fn set_bkg_color(&mut self, r: u8, g: u8, b: u8) -> Result<(), DeviceError>;
    fn set_sync_flash_params(&mut self, size_pix: u16, dur_ticks: u16) -> Result<(), DeviceError>;
}

/// JSON wire envelope for one request/reply pair over the TCP link.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", content = "data")]
enum Request {
    Reinit,
    AddTarget(TargetDef),
    LoadTargets,
    StartAnimation(FrameUpdate, FrameUpdate),
    UpdateAnimation(FrameUpdate),
    StopAnimation,
    GetGeometry,
    SetBkgColor(u8, u8, u8),
    SetSyncFlashParams(u16, u16),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "data")]
enum Reply {
    Ack(FrameAck),
    Geometry(ScreenGeometry),
    Ok,
    Err(String),
}

/// TCP-backed remote display client. Never panics on I/O failure — every
/// method maps a broken link to `DeviceError::LinkDown` and the caller
/// decides whether that's fatal for the current session.
pub struct TcpRemoteDisplay {
    stream: TcpStream,
}

impl TcpRemoteDisplay {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, DeviceError> {
        let stream = TcpStream::connect(addr).map_err(|_| DeviceError::LinkDown)?;
        stream.set_read_timeout(Some(timeout)).ok();
        stream.set_write_timeout(Some(timeout)).ok();
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }

    fn roundtrip(&mut self, req: &Request) -> Result<Reply, DeviceError> {
        let payload = serde_json::to_vec(req).map_err(|_| DeviceError::InvalidBuffer)?;
        let len = (payload.len() as u32).to_be_bytes();
        self.stream.write_all(&len).map_err(|_| DeviceError::LinkDown)?;
        self.stream.write_all(&payload).map_err(|_| DeviceError::LinkDown)?;

        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).map_err(|_| DeviceError::LinkDown)?;
        let reply_len = u32::from_be_bytes(len_buf) as usize;
        let mut reply_buf = vec![0u8; reply_len];
        self.stream.read_exact(&mut reply_buf).map_err(|_| DeviceError::LinkDown)?;
        serde_json::from_slice(&reply_buf).map_err(|_| DeviceError::InvalidBuffer)
    }
}

impl RemoteDisplay for TcpRemoteDisplay {
    fn reinit(&mut self) -> Result<(), DeviceError> {
        match self.roundtrip(&Request::Reinit)? {
            Reply::Ok => Ok(()),
            _ => Err(DeviceError::DeviceFault),
        }
    }

    fn add_target(&mut self, def: TargetDef) -> Result<(), DeviceError> {
        match self.roundtrip(&Request::AddTarget(def))? {
            Reply::Ok => Ok(()),
            _ => Err(DeviceError::DeviceFault),
        }
    }

    fn load_targets(&mut self) -> Result<(), DeviceError> {
        match self.roundtrip(&Request::LoadTargets)? {
            Reply::Ok => Ok(()),
            _ => Err(DeviceError::DeviceFault),
        }
    }

    fn start_animation(&mut self, frame0: FrameUpdate, frame1: FrameUpdate) -> Result<FrameAck, DeviceError> {
        match self.roundtrip(&Request::StartAnimation(frame0, frame1))? {
            Reply::Ack(ack) => Ok(ack),
            _ => Err(DeviceError::DeviceFault),
        }
    }

    fn update_animation(&mut self, frame: FrameUpdate) -> Result<FrameAck, DeviceError> {
        match self.roundtrip(&Request::UpdateAnimation(frame))? {
            Reply::Ack(ack) => Ok(ack),
            _ => Err(DeviceError::DeviceFault),
        }
    }

    fn stop_animation(&mut self) -> Result<(), DeviceError> {
        match self.roundtrip(&Request::StopAnimation)? {
            Reply::Ok => Ok(()),
            _ => Err(DeviceError::DeviceFault),
        }
    }

    fn get_geometry(&mut self) -> Result<ScreenGeometry, DeviceError> {
        match self.roundtrip(&Request::GetGeometry)? {
            Reply::Geometry(g) => Ok(g),
            _ => Err(DeviceError::DeviceFault),
        }
    }

    fn set_bkg_color(&mut self, r: u8, g: u8, b: u8) -> Result<(), DeviceError> {
        match self.roundtrip(&Request::SetBkgColor(r, g, b))? {
            Reply::Ok => Ok(()),
            _ => Err(DeviceError::DeviceFault),
        }
    }

    fn set_sync_flash_params(&mut self, size_pix: u16, dur_ticks: u16) -> Result<(), DeviceError> {
        match self.roundtrip(&Request::SetSyncFlashParams(size_pix, dur_ticks))? {
            Reply::Ok => Ok(()),
            _ => Err(DeviceError::DeviceFault),
        }
    }
}

/// Deterministic in-process stand-in for tests: acks every call, never
/// reports duplicate frames or drift.
pub struct SimRemoteDisplay {
    pub geometry: ScreenGeometry,
    pub frames_sent: u64,
}

impl SimRemoteDisplay {
    pub fn new() -> Self {
        Self {
            geometry: ScreenGeometry {
                width_pix: 1024,
                height_pix: 768,
                width_mm: 400,
                height_mm: 300,
                distance_mm: 600,
                refresh_microhz: 60_000_000,
            },
            frames_sent: 0,
        }
    }
}

impl Default for SimRemoteDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteDisplay for SimRemoteDisplay {
    fn reinit(&mut self) -> Result<(), DeviceError> {
        self.frames_sent = 0;
        Ok(())
    }
    fn add_target(&mut self, _def: TargetDef) -> Result<(), DeviceError> {
        Ok(())
    }
    fn load_targets(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
    fn start_animation(&mut self, _frame0: FrameUpdate, _frame1: FrameUpdate) -> Result<FrameAck, DeviceError> {
        self.frames_sent += 2;
        Ok(FrameAck { ok: true, duplicate_frames: Some(0), frames_elapsed: Some(self.frames_sent) })
    }
    fn update_animation(&mut self, _frame: FrameUpdate) -> Result<FrameAck, DeviceError> {
        self.frames_sent += 1;
        Ok(FrameAck { ok: true, duplicate_frames: Some(0), frames_elapsed: Some(self.frames_sent) })
    }
    fn stop_animation(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
    fn get_geometry(&mut self) -> Result<ScreenGeometry, DeviceError> {
        Ok(self.geometry)
    }
    fn set_bkg_color(&mut self, _r: u8, _g: u8, _b: u8) -> Result<(), DeviceError> {
        Ok(())
    }
    fn set_sync_flash_params(&mut self, _size_pix: u16, _dur_ticks: u16) -> Result<(), DeviceError> {
        Ok(())
    }
}
