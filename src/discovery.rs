//! Passive LAN discovery listener (spec §4.F).
//!
//! Grounded on `scanner.rs`'s socket construction (`socket2` with
//! `SO_BROADCAST`/`SO_REUSEADDR`) and on `housetuya_device_discovery`'s
//! field extraction, but feeds the engine's command channel instead of a
//! process-global cache — there is exactly one discovery task per engine.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::Deserialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::crypto;
use crate::protocol;

const PLAINTEXT_PORT: u16 = 6666;
const ENCRYPTED_PORT: u16 = 6667;
const MAX_DATAGRAM: usize = 1600;

/// Fields extracted from a decoded beacon payload (spec §4.F).
#[derive(Debug, Clone, Deserialize)]
pub struct Beacon {
    #[serde(rename = "gwId")]
    pub gw_id: String,
    #[serde(rename = "productKey")]
    pub product_key: String,
    pub version: String,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,
}

fn bind_broadcast_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

fn parse_beacon(datagram: &[u8], key: Option<&[u8; 16]>) -> Option<Beacon> {
    let frame = protocol::decode(datagram, key, protocol::DEFAULT_VERSION)?;
    serde_json::from_slice(&frame.payload).ok()
}

/// Run the two discovery sockets until cancelled, forwarding every
/// successfully decoded beacon to `tx`. Bind failures are returned to the
/// caller to log and continue without discovery (spec §6: "UDP sockets
/// cannot open both ports — log only").
pub async fn run(tx: mpsc::Sender<Beacon>) -> std::io::Result<()> {
    let plaintext = bind_broadcast_socket(PLAINTEXT_PORT)?;
    let encrypted = bind_broadcast_socket(ENCRYPTED_PORT)?;
    let mut plaintext_buf = [0u8; MAX_DATAGRAM];
    let mut encrypted_buf = [0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            result = plaintext.recv(&mut plaintext_buf) => {
                if let Ok(n) = result
                    && let Some(beacon) = parse_beacon(&plaintext_buf[..n], None)
                {
                    let _ = tx.send(beacon).await;
                }
            }
            result = encrypted.recv(&mut encrypted_buf) => {
                if let Ok(n) = result
                    && let Some(beacon) = parse_beacon(&encrypted_buf[..n], Some(crypto::discovery_key()))
                {
                    let _ = tx.send(beacon).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, WriteBytesExt};

    fn build_frame(code: u32, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame
            .write_u32::<BigEndian>(protocol::PREFIX)
            .unwrap();
        frame.write_u32::<BigEndian>(0).unwrap();
        frame.write_u32::<BigEndian>(code).unwrap();
        frame.write_u32::<BigEndian>((payload.len() + 8) as u32).unwrap();
        frame.extend_from_slice(payload);
        frame.write_u32::<BigEndian>(0).unwrap();
        frame
            .write_u32::<BigEndian>(protocol::SUFFIX)
            .unwrap();
        frame
    }

    #[test]
    fn parses_a_plaintext_beacon() {
        let payload = br#"{"gwId":"bf12","productKey":"keyA","version":"3.3","encrypt":true,"ip":"10.0.0.7"}"#;
        let frame = build_frame(8, payload);
        let beacon = parse_beacon(&frame, None).expect("parses");
        assert_eq!(beacon.gw_id, "bf12");
        assert_eq!(beacon.product_key, "keyA");
        assert!(beacon.encrypt);
        assert_eq!(beacon.ip, Some(Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[test]
    fn parses_an_encrypted_beacon() {
        let key = crypto::discovery_key();
        let json = br#"{"gwId":"aa01","productKey":"keyB","version":"3.3"}"#;
        let cipher = crypto::encrypt(key, json);
        let frame = build_frame(8, &cipher);
        let beacon = parse_beacon(&frame, Some(key)).expect("parses");
        assert_eq!(beacon.gw_id, "aa01");
        assert!(!beacon.encrypt);
    }

    #[test]
    fn malformed_datagram_yields_no_beacon() {
        assert!(parse_beacon(b"not a frame", None).is_none());
    }
}
