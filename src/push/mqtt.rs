//! Minimal MQTT 3.1.1 packet codec
//!
//! Just the subset the push channel needs: CONNECT/CONNACK handshake, one
//! QoS 1 SUBSCRIBE/SUBACK, inbound PUBLISH with PUBACK confirmation, and
//! PINGREQ/PINGRESP keepalive. Packets travel inside WebSocket binary
//! frames; frames may carry multiple or partial packets, so decoding works
//! on an accumulating buffer and reports how many bytes it consumed.

use anyhow::{bail, Context, Result};

/// Packet type values (high nibble of the fixed-header byte).
const TYPE_CONNECT: u8 = 1;
const TYPE_CONNACK: u8 = 2;
const TYPE_PUBLISH: u8 = 3;
const TYPE_PUBACK: u8 = 4;
const TYPE_SUBSCRIBE: u8 = 8;
const TYPE_SUBACK: u8 = 9;
const TYPE_PINGREQ: u8 = 12;
const TYPE_PINGRESP: u8 = 13;
const TYPE_DISCONNECT: u8 = 14;

/// CONNECT flags: clean session + username + password present.
const CONNECT_FLAGS: u8 = 0x02 | 0x80 | 0x40;

/// CONNACK return code for an accepted connection.
pub const CONNACK_ACCEPTED: u8 = 0x00;
/// SUBACK return code signalling subscription failure.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Server-to-client packets the session loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connack {
        session_present: bool,
        return_code: u8,
    },
    Suback {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    Publish {
        duplicate: bool,
        qos: u8,
        topic: String,
        packet_id: Option<u16>,
        payload: Vec<u8>,
    },
    Puback {
        packet_id: u16,
    },
    Pingresp,
    /// Anything else the server might send; logged and ignored.
    Other(u8),
}

/// Encode a CONNECT packet (clean session, username + password auth).
pub fn encode_connect(client_id: &str, username: &str, password: &str, keep_alive: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(
        12 + client_id.len() + username.len() + password.len(),
    );
    write_str(&mut body, "MQTT");
    body.push(0x04); // protocol level 3.1.1
    body.push(CONNECT_FLAGS);
    body.extend_from_slice(&keep_alive.to_be_bytes());
    write_str(&mut body, client_id);
    write_str(&mut body, username);
    write_str(&mut body, password);
    packet(TYPE_CONNECT << 4, &body)
}

/// Encode a SUBSCRIBE packet for a single topic filter.
pub fn encode_subscribe(packet_id: u16, topic: &str, qos: u8) -> Vec<u8> {
    let mut body = Vec::with_capacity(5 + topic.len());
    body.extend_from_slice(&packet_id.to_be_bytes());
    write_str(&mut body, topic);
    body.push(qos);
    // SUBSCRIBE requires the reserved flag bits 0b0010.
    packet((TYPE_SUBSCRIBE << 4) | 0x02, &body)
}

/// Encode a PUBACK confirming a QoS 1 delivery.
pub fn encode_puback(packet_id: u16) -> Vec<u8> {
    packet(TYPE_PUBACK << 4, &packet_id.to_be_bytes())
}

pub fn encode_pingreq() -> Vec<u8> {
    vec![TYPE_PINGREQ << 4, 0x00]
}

pub fn encode_disconnect() -> Vec<u8> {
    vec![TYPE_DISCONNECT << 4, 0x00]
}

/// Decode one packet from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer holds only a partial packet; the
/// caller keeps accumulating. On success returns the packet and the number
/// of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let first = buf[0];
    let Some((remaining, len_bytes)) = decode_remaining_length(&buf[1..])? else {
        return Ok(None);
    };
    let total = 1 + len_bytes + remaining;
    if buf.len() < total {
        return Ok(None);
    }
    let body = &buf[1 + len_bytes..total];
    let packet_type = first >> 4;

    let packet = match packet_type {
        TYPE_CONNACK => {
            if body.len() < 2 {
                bail!("CONNACK too short: {} bytes", body.len());
            }
            Packet::Connack {
                session_present: body[0] & 0x01 != 0,
                return_code: body[1],
            }
        }
        TYPE_SUBACK => {
            if body.len() < 3 {
                bail!("SUBACK too short: {} bytes", body.len());
            }
            Packet::Suback {
                packet_id: u16::from_be_bytes([body[0], body[1]]),
                return_codes: body[2..].to_vec(),
            }
        }
        TYPE_PUBLISH => decode_publish(first, body)?,
        TYPE_PUBACK => {
            if body.len() < 2 {
                bail!("PUBACK too short: {} bytes", body.len());
            }
            Packet::Puback {
                packet_id: u16::from_be_bytes([body[0], body[1]]),
            }
        }
        TYPE_PINGRESP => Packet::Pingresp,
        other => Packet::Other(other),
    };
    Ok(Some((packet, total)))
}

fn decode_publish(first: u8, body: &[u8]) -> Result<Packet> {
    let duplicate = first & 0x08 != 0;
    let qos = (first >> 1) & 0x03;
    if qos > 2 {
        bail!("PUBLISH with invalid QoS 3");
    }

    let (topic, mut offset) = read_str(body).context("PUBLISH topic")?;
    let packet_id = if qos > 0 {
        if body.len() < offset + 2 {
            bail!("PUBLISH missing packet id");
        }
        let id = u16::from_be_bytes([body[offset], body[offset + 1]]);
        offset += 2;
        Some(id)
    } else {
        None
    };

    Ok(Packet::Publish {
        duplicate,
        qos,
        topic,
        packet_id,
        payload: body[offset..].to_vec(),
    })
}

/// Frame a packet body with the fixed header and remaining-length varint.
fn packet(first: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(first);
    encode_remaining_length(&mut out, body.len());
    out.extend_from_slice(body);
    out
}

/// Encode the remaining-length field (7 bits per byte, continuation bit).
fn encode_remaining_length(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Decode the remaining-length field. Returns `Ok(None)` when the varint is
/// not complete yet, else `(value, bytes_used)`.
fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 4 {
            bail!("remaining length varint longer than 4 bytes");
        }
        value |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        shift += 7;
    }
    if buf.len() >= 4 {
        bail!("remaining length varint longer than 4 bytes");
    }
    Ok(None)
}

/// UTF-8 string with u16 length prefix.
fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn read_str(buf: &[u8]) -> Result<(String, usize)> {
    if buf.len() < 2 {
        bail!("string field truncated");
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < 2 + len {
        bail!("string field truncated: need {} bytes", len);
    }
    let s = std::str::from_utf8(&buf[2..2 + len])
        .context("string field is not valid UTF-8")?
        .to_string();
    Ok((s, 2 + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_packet_layout() {
        let bytes = encode_connect("client-1", "app/user", "secret", 60);
        assert_eq!(bytes[0], TYPE_CONNECT << 4);
        // Protocol name directly after the 1-byte remaining length.
        assert_eq!(&bytes[2..4], &[0x00, 0x04]);
        assert_eq!(&bytes[4..8], b"MQTT");
        assert_eq!(bytes[8], 0x04);
        assert_eq!(bytes[9], CONNECT_FLAGS);
        assert_eq!(&bytes[10..12], &60u16.to_be_bytes());
    }

    #[test]
    fn test_remaining_length_boundaries() {
        for len in [0usize, 1, 127, 128, 16_383, 16_384, 2_097_151] {
            let mut encoded = Vec::new();
            encode_remaining_length(&mut encoded, len);
            let (decoded, used) = decode_remaining_length(&encoded).unwrap().unwrap();
            assert_eq!(decoded, len);
            assert_eq!(used, encoded.len());
        }
    }

    #[test]
    fn test_decode_incomplete_returns_none() {
        let publish = build_publish(1, "a/b", Some(7), b"{}");
        for cut in 1..publish.len() {
            assert!(
                decode(&publish[..cut]).unwrap().is_none(),
                "cut at {} should be incomplete",
                cut
            );
        }
    }

    #[test]
    fn test_decode_publish_qos1() {
        let bytes = build_publish(1, "app/user", Some(42), br#"{"message":"hi"}"#);
        let (packet, used) = decode(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        let Packet::Publish {
            qos,
            topic,
            packet_id,
            payload,
            ..
        } = packet
        else {
            panic!("expected publish");
        };
        assert_eq!(qos, 1);
        assert_eq!(topic, "app/user");
        assert_eq!(packet_id, Some(42));
        assert_eq!(payload, br#"{"message":"hi"}"#);
    }

    #[test]
    fn test_decode_publish_qos0_has_no_packet_id() {
        let bytes = build_publish(0, "t", None, b"x");
        let (packet, _) = decode(&bytes).unwrap().unwrap();
        let Packet::Publish {
            packet_id, payload, ..
        } = packet
        else {
            panic!("expected publish");
        };
        assert_eq!(packet_id, None);
        assert_eq!(payload, b"x");
    }

    #[test]
    fn test_decode_two_packets_from_one_buffer() {
        let mut buf = build_publish(0, "t", None, b"one");
        buf.extend_from_slice(&encode_pingreq_response());
        let (first, used) = decode(&buf).unwrap().unwrap();
        assert!(matches!(first, Packet::Publish { .. }));
        let (second, _) = decode(&buf[used..]).unwrap().unwrap();
        assert_eq!(second, Packet::Pingresp);
    }

    #[test]
    fn test_decode_connack_and_suback() {
        let connack = [TYPE_CONNACK << 4, 2, 0x00, CONNACK_ACCEPTED];
        let (packet, _) = decode(&connack).unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::Connack {
                session_present: false,
                return_code: CONNACK_ACCEPTED
            }
        );

        let suback = [TYPE_SUBACK << 4, 3, 0x00, 0x01, 0x01];
        let (packet, _) = decode(&suback).unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::Suback {
                packet_id: 1,
                return_codes: vec![0x01]
            }
        );
    }

    #[test]
    fn test_subscribe_sets_reserved_flags() {
        let bytes = encode_subscribe(1, "app/user", 1);
        assert_eq!(bytes[0], (TYPE_SUBSCRIBE << 4) | 0x02);
        assert_eq!(*bytes.last().unwrap(), 1, "requested QoS trails the topic");
    }

    #[test]
    fn test_puback_layout() {
        assert_eq!(encode_puback(0x1234), vec![TYPE_PUBACK << 4, 2, 0x12, 0x34]);
    }

    /// Build a server-side PUBLISH the way a broker would.
    fn build_publish(qos: u8, topic: &str, packet_id: Option<u16>, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        write_str(&mut body, topic);
        if let Some(id) = packet_id {
            body.extend_from_slice(&id.to_be_bytes());
        }
        body.extend_from_slice(payload);
        packet((TYPE_PUBLISH << 4) | (qos << 1), &body)
    }

    fn encode_pingreq_response() -> Vec<u8> {
        vec![TYPE_PINGRESP << 4, 0x00]
    }
}
