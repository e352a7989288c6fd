//! UDP camera ingest. Cameras split each JPEG over several datagrams; a
//! datagram starting with SOI opens a frame and one ending with EOI
//! completes it.

use std::{collections::HashMap, future::Future, net::IpAddr};

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use watchpost_types::config::WatchpostConfig;

use crate::state::AppState;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const DATAGRAM_BUFFER: usize = 64 * 1024;

/// Per-camera reassembly buffers.
#[derive(Debug)]
pub struct FrameAssembler {
    max_frame_bytes: usize,
    buffers: HashMap<String, BytesMut>,
}

impl FrameAssembler {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            buffers: HashMap::new(),
        }
    }

    /// Feeds one datagram and returns the frame it completes, if any.
    pub fn push(&mut self, camera: &str, datagram: &[u8]) -> Option<Bytes> {
        let buffer = self.buffers.entry(camera.to_string()).or_default();
        if datagram.starts_with(&SOI) {
            buffer.clear();
        } else if buffer.is_empty() {
            debug!(camera, len = datagram.len(), "dropping fragment outside a frame");
            return None;
        }
        if buffer.len() + datagram.len() > self.max_frame_bytes {
            warn!(
                camera,
                limit = self.max_frame_bytes,
                "udp frame exceeds size limit, discarding"
            );
            buffer.clear();
            return None;
        }
        buffer.extend_from_slice(datagram);
        if datagram.ends_with(&EOI) {
            Some(buffer.split().freeze())
        } else {
            None
        }
    }
}

/// Camera id for a datagram source: the configured camera at that address,
/// otherwise `unknown_<ip>`.
pub fn camera_for(config: &WatchpostConfig, ip: IpAddr) -> String {
    let address = ip.to_string();
    match config.camera_for_address(&address) {
        Some(camera) => camera.to_string(),
        None => format!("unknown_{address}"),
    }
}

pub async fn run<F>(state: AppState, socket: UdpSocket, shutdown: F)
where
    F: Future<Output = ()>,
{
    if let Ok(addr) = socket.local_addr() {
        info!(%addr, "udp camera listener started");
    }
    let mut assembler = FrameAssembler::new(state.config.server.udp_max_frame_bytes);
    let mut datagram = vec![0u8; DATAGRAM_BUFFER];
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = socket.recv_from(&mut datagram) => match received {
                Ok((len, source)) => {
                    let camera = camera_for(&state.config, source.ip());
                    if let Some(frame) = assembler.push(&camera, &datagram[..len]) {
                        // Rejections are logged by the intake.
                        let _ = state.intake.submit(camera, frame, Vec::new()).await;
                    }
                }
                Err(err) => warn!(error = %err, "error reading udp datagram"),
            },
        }
    }
    info!("udp camera listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn reassembles_split_jpeg() {
        let mut assembler = FrameAssembler::new(1024);
        assert_eq!(assembler.push("drzwi", &[0xFF, 0xD8, 1, 2]), None);
        assert_eq!(assembler.push("drzwi", &[3, 4]), None);
        let frame = assembler.push("drzwi", &[5, 0xFF, 0xD9]).expect("frame complete");
        assert_eq!(&frame[..], &[0xFF, 0xD8, 1, 2, 3, 4, 5, 0xFF, 0xD9]);
        assert_eq!(assembler.push("drzwi", &[7, 0xFF, 0xD9]), None);
    }

    #[test]
    fn new_start_discards_partial_frame() {
        let mut assembler = FrameAssembler::new(1024);
        assembler.push("brama", &[0xFF, 0xD8, 9, 9]);
        let frame = assembler
            .push("brama", &[0xFF, 0xD8, 1, 0xFF, 0xD9])
            .expect("single datagram frame");
        assert_eq!(frame.len(), 5);
    }

    #[test]
    fn cameras_reassemble_independently() {
        let mut assembler = FrameAssembler::new(1024);
        assembler.push("drzwi", &[0xFF, 0xD8, 1]);
        assembler.push("brama", &[0xFF, 0xD8, 2]);
        let drzwi = assembler.push("drzwi", &[0xFF, 0xD9]).unwrap();
        let brama = assembler.push("brama", &[0xFF, 0xD9]).unwrap();
        assert_eq!(drzwi[2], 1);
        assert_eq!(brama[2], 2);
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let mut assembler = FrameAssembler::new(6);
        assembler.push("drzwi", &[0xFF, 0xD8, 1, 2]);
        assert_eq!(assembler.push("drzwi", &[3, 4, 0xFF, 0xD9]), None);
        assert_eq!(assembler.push("drzwi", &[0xFF, 0xD9]), None);
    }

    #[test]
    fn maps_source_address_to_camera() {
        let config = WatchpostConfig::default();
        assert_eq!(
            camera_for(&config, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 29))),
            "brama"
        );
        assert_eq!(
            camera_for(&config, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
            "unknown_10.0.0.7"
        );
    }
}
