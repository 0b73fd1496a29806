//! Tuya wire protocol framing (spec §4.C).
//!
//! ```text
//! prefix(4) seq(4) cmd(4) length(4) [ext_hdr(15)] payload crc(4) suffix(4)
//! ```
//!
//! `length` counts everything after itself up to and including the suffix.
//! The 15-byte extended header carries the protocol version, NUL-padded,
//! and is present on every outbound frame except QUERY/UPDATE; on decode
//! it is detected by comparing the first 15 bytes of the payload against
//! the expected version string (spec §4.C point 4).
//!
//! CRC is written on encode but never checked on decode — Tuya devices
//! don't check it either, and TCP/UDP already cover envelope integrity
//! (spec §4.C, §9).

use crate::crypto;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

pub const PREFIX: u32 = 0x0000_55AA;
pub const SUFFIX: u32 = 0x0000_AA55;

const HEADER_LEN: usize = 16; // prefix + seq + cmd + length
const EXT_HEADER_LEN: usize = 15;
const FOOTER_LEN: usize = 8; // crc + suffix

define_command_type! {
    Control = 7,
    Status = 8,
    Query = 10,
    Update = 18,
}

/// The default protocol version used for the extended header and as the
/// decode-side discriminator, per spec §3.
pub const DEFAULT_VERSION: &str = "3.3";

/// A decoded inbound frame (spec §4.C "Decoding").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub code: u32,
    pub sequence: u32,
    /// Usable JSON bytes once decrypted and stripped of any extended
    /// header.
    pub payload: Vec<u8>,
}

fn write_envelope(seq: u32, cmd: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len() + FOOTER_LEN);
    out.write_u32::<BigEndian>(PREFIX).unwrap();
    out.write_u32::<BigEndian>(seq).unwrap();
    out.write_u32::<BigEndian>(cmd).unwrap();
    out.write_u32::<BigEndian>((body.len() + FOOTER_LEN) as u32)
        .unwrap();
    out.extend_from_slice(body);

    let crc = crate::crc::checksum(&out[4..]); // seq|cmd|length|body
    out.write_u32::<BigEndian>(crc).unwrap();
    out.write_u32::<BigEndian>(SUFFIX).unwrap();
    out
}

fn ext_header(version: &str) -> [u8; EXT_HEADER_LEN] {
    let mut hdr = [0u8; EXT_HEADER_LEN];
    let bytes = version.as_bytes();
    let n = bytes.len().min(EXT_HEADER_LEN);
    hdr[..n].copy_from_slice(&bytes[..n]);
    hdr
}

/// Encode a CONTROL frame: `{"devId","uid","t","dps":{"<dps>":<bool>}}`,
/// AES-encrypted under `key`, with the version extended header (spec §4.C
/// "Encoding (CONTROL)").
pub fn encode_control(
    key: &[u8; 16],
    version: &str,
    device_id: &str,
    sequence: u32,
    dps: u32,
    value: bool,
) -> Vec<u8> {
    let now = crate::now_unix();
    let json = format!(
        r#"{{"devId":"{id}","uid":"{id}","t":"{t}","dps":{{"{dps}":{val}}}}}"#,
        id = device_id,
        t = now,
        dps = dps,
        val = value,
    );

    let mut body = ext_header(version).to_vec();
    body.extend_from_slice(&crypto::encrypt(key, json.as_bytes()));
    write_envelope(sequence, CommandType::Control as u32, &body)
}

/// Encode a QUERY frame: same payload shape without `dps`, no extended
/// header (spec §4.C "Encoding (QUERY)").
pub fn encode_query(key: &[u8; 16], device_id: &str, sequence: u32) -> Vec<u8> {
    let now = crate::now_unix();
    let json = format!(
        r#"{{"devId":"{id}","uid":"{id}","t":"{t}"}}"#,
        id = device_id,
        t = now,
    );
    let body = crypto::encrypt(key, json.as_bytes());
    write_envelope(sequence, CommandType::Query as u32, &body)
}

/// Decode any inbound frame into `(code, sequence, payload)` (spec §4.C
/// "Decoding"). Returns `None` on any structural failure: bad prefix/
/// suffix, truncated buffer, or (if a secret was supplied) a malformed
/// ciphertext.
///
/// `key` is `None` for plaintext discovery beacons (port 6666); `version`
/// is the string to sniff for and strip from the front of the decrypted
/// payload, matching the device's extended header.
pub fn decode(data: &[u8], key: Option<&[u8; 16]>, version: &str) -> Option<DecodedFrame> {
    if data.len() < HEADER_LEN + FOOTER_LEN {
        return None;
    }
    if BigEndian::read_u32(&data[0..4]) != PREFIX {
        return None;
    }

    let sequence = BigEndian::read_u32(&data[4..8]);
    let code = BigEndian::read_u32(&data[8..12]);
    let length = BigEndian::read_u32(&data[12..16]) as usize;
    if length < FOOTER_LEN {
        return None;
    }
    let total = HEADER_LEN + length;
    if total > data.len() {
        return None;
    }
    if BigEndian::read_u32(&data[total - 4..total]) != SUFFIX {
        return None;
    }

    let payload_end = total - FOOTER_LEN;
    if payload_end < HEADER_LEN {
        return None;
    }

    // spec §4.C decoding step 1/2: a word with bits set above the low byte
    // at offset 16 means there's no return-code field (it's ciphertext);
    // otherwise the next 4 bytes are a numeric return code to skip.
    let has_retcode = payload_end >= HEADER_LEN + 4
        && (BigEndian::read_u32(&data[HEADER_LEN..HEADER_LEN + 4]) & 0xFFFF_FF00) == 0;
    let payload_start = if has_retcode {
        HEADER_LEN + 4
    } else {
        HEADER_LEN
    };
    if payload_start > payload_end {
        return None;
    }
    let raw = &data[payload_start..payload_end];

    let mut decoded = match key {
        Some(k) => {
            let out = crypto::decrypt(k, raw);
            if out.is_empty() && !raw.is_empty() {
                return None;
            }
            out
        }
        None => raw.to_vec(),
    };
    // crypto::decrypt appends a trailing NUL; drop it before prefix-sniffing
    // so the returned bytes are exactly the JSON text.
    if key.is_some() && decoded.last() == Some(&0) {
        decoded.pop();
    }

    if decoded.len() >= EXT_HEADER_LEN {
        let candidate = &decoded[..EXT_HEADER_LEN];
        let expected = ext_header(version);
        if candidate == expected {
            decoded.drain(..EXT_HEADER_LEN);
        }
    }

    Some(DecodedFrame {
        code,
        sequence,
        payload: decoded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 16] = b"0123456789abcdef";

    #[test]
    fn control_round_trips_through_decode() {
        let encoded = encode_control(KEY, DEFAULT_VERSION, "dev-1", 42, 1, true);
        let frame = decode(&encoded, Some(KEY), DEFAULT_VERSION).expect("decodes");
        assert_eq!(frame.code, CommandType::Control as u32);
        assert_eq!(frame.sequence, 42);
        let json: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(json["devId"], "dev-1");
        assert_eq!(json["dps"]["1"], true);
    }

    #[test]
    fn query_round_trips_and_has_no_extended_header_on_the_wire() {
        let encoded = encode_query(KEY, "dev-2", 7);
        let frame = decode(&encoded, Some(KEY), DEFAULT_VERSION).expect("decodes");
        assert_eq!(frame.code, CommandType::Query as u32);
        assert!(frame.payload.starts_with(b"{"));
        let json: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(json["devId"], "dev-2");
    }

    #[test]
    fn decode_rejects_bad_prefix() {
        let mut encoded = encode_query(KEY, "dev-3", 1);
        encoded[0] = 0xFF;
        assert!(decode(&encoded, Some(KEY), DEFAULT_VERSION).is_none());
    }

    #[test]
    fn decode_rejects_bad_suffix() {
        let mut encoded = encode_query(KEY, "dev-3", 1);
        let n = encoded.len();
        encoded[n - 1] = 0x00;
        assert!(decode(&encoded, Some(KEY), DEFAULT_VERSION).is_none());
    }

    #[test]
    fn decode_tolerates_truncated_buffer() {
        assert!(decode(&[0, 0, 0x55, 0xAA], Some(KEY), DEFAULT_VERSION).is_none());
    }

    fn build_raw_frame(cmd: u32, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.write_u32::<BigEndian>(PREFIX).unwrap();
        frame.write_u32::<BigEndian>(0).unwrap();
        frame.write_u32::<BigEndian>(cmd).unwrap();
        frame
            .write_u32::<BigEndian>((payload.len() + FOOTER_LEN) as u32)
            .unwrap();
        frame.extend_from_slice(payload);
        frame.write_u32::<BigEndian>(0).unwrap(); // crc not checked on ingress
        frame.write_u32::<BigEndian>(SUFFIX).unwrap();
        frame
    }

    #[test]
    fn decode_plaintext_with_no_secret() {
        // As a discovery beacon on port 6666 would arrive: raw JSON, no crypto.
        let payload = br#"{"gwId":"bf12"}"#;
        let frame = build_raw_frame(CommandType::Status as u32, payload);
        let decoded = decode(&frame, None, DEFAULT_VERSION).expect("decodes");
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn decode_tolerates_unknown_command_codes() {
        let payload = br#"{"a":1}"#;
        let frame = build_raw_frame(255, payload); // not a known CommandType
        let decoded = decode(&frame, None, DEFAULT_VERSION).expect("still decodes");
        assert_eq!(decoded.code, 255);
        assert!(CommandType::from_u32(255).is_none());
    }

    #[test]
    fn decode_strips_extended_header_when_present() {
        let mut padded_version = ext_header(DEFAULT_VERSION).to_vec();
        padded_version.extend_from_slice(br#"{"ok":true}"#);
        let frame = build_raw_frame(CommandType::Control as u32, &padded_version);
        let decoded = decode(&frame, None, DEFAULT_VERSION).expect("decodes");
        assert_eq!(decoded.payload, br#"{"ok":true}"#);
    }
}
