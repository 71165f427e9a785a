//! BEP-3 framed peer messages: `u32 length | [u8 id | payload]`. Length 0 is
//! a keep-alive. `extended` (BEP-10, id 20) carries a bencoded dict followed
//! by optional trailing raw bytes (used by BEP-9 metadata pieces).

use bytes::{BufMut, BytesMut};

use super::{WireError, WireResult};

pub const BLOCK_SIZE: u32 = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    Port(u16),
    Extended { ext_id: u8, payload: Vec<u8> },
}

impl Message {
    pub fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Interested => Some(2),
            Message::NotInterested => Some(3),
            Message::Have(_) => Some(4),
            Message::Bitfield(_) => Some(5),
            Message::Request { .. } => Some(6),
            Message::Piece { .. } => Some(7),
            Message::Cancel { .. } => Some(8),
            Message::Port(_) => Some(9),
            Message::Extended { .. } => Some(20),
        }
    }

    /// Serializes the full wire frame, including the 4-byte length prefix.
    pub fn encode_frame(&self) -> Vec<u8> {
        let mut body = BytesMut::new();
        if let Some(id) = self.id() {
            body.put_u8(id);
        }
        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have(index) => body.put_u32(*index),
            Message::Bitfield(bits) => body.put_slice(bits),
            Message::Request { index, begin, length } | Message::Cancel { index, begin, length } => {
                body.put_u32(*index);
                body.put_u32(*begin);
                body.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                body.put_u32(*index);
                body.put_u32(*begin);
                body.put_slice(block);
            }
            Message::Port(port) => body.put_u16(*port),
            Message::Extended { ext_id, payload } => {
                body.put_u8(*ext_id);
                body.put_slice(payload);
            }
        }

        let mut frame = BytesMut::with_capacity(4 + body.len());
        frame.put_u32(body.len() as u32);
        frame.extend_from_slice(&body);
        frame.to_vec()
    }

    /// Decodes a message body: the bytes of a frame *after* its 4-byte
    /// length prefix. An empty body is a keep-alive.
    pub fn decode_body(body: &[u8]) -> WireResult<Message> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }
        let id = body[0];
        let payload = &body[1..];
        match id {
            0 => Ok(Message::Choke),
            1 => Ok(Message::Unchoke),
            2 => Ok(Message::Interested),
            3 => Ok(Message::NotInterested),
            4 => {
                let index = read_u32(payload, "have")?;
                Ok(Message::Have(index))
            }
            5 => Ok(Message::Bitfield(payload.to_vec())),
            6 | 8 => {
                if payload.len() != 12 {
                    return Err(WireError::Malformed {
                        kind: "request/cancel",
                        reason: "expected 12-byte payload",
                    });
                }
                let index = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                let begin = u32::from_be_bytes(payload[4..8].try_into().unwrap());
                let length = u32::from_be_bytes(payload[8..12].try_into().unwrap());
                if id == 6 {
                    Ok(Message::Request { index, begin, length })
                } else {
                    Ok(Message::Cancel { index, begin, length })
                }
            }
            7 => {
                if payload.len() < 8 {
                    return Err(WireError::Malformed {
                        kind: "piece",
                        reason: "payload shorter than index+begin",
                    });
                }
                let index = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                let begin = u32::from_be_bytes(payload[4..8].try_into().unwrap());
                Ok(Message::Piece {
                    index,
                    begin,
                    block: payload[8..].to_vec(),
                })
            }
            9 => {
                if payload.len() != 2 {
                    return Err(WireError::Malformed {
                        kind: "port",
                        reason: "expected 2-byte payload",
                    });
                }
                Ok(Message::Port(u16::from_be_bytes(payload.try_into().unwrap())))
            }
            20 => {
                if payload.is_empty() {
                    return Err(WireError::Malformed {
                        kind: "extended",
                        reason: "missing extended message id",
                    });
                }
                Ok(Message::Extended {
                    ext_id: payload[0],
                    payload: payload[1..].to_vec(),
                })
            }
            other => Err(WireError::UnknownMessageId(other)),
        }
    }
}

fn read_u32(payload: &[u8], kind: &'static str) -> WireResult<u32> {
    if payload.len() != 4 {
        return Err(WireError::Malformed {
            kind,
            reason: "expected 4-byte payload",
        });
    }
    Ok(u32::from_be_bytes(payload.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(m: Message) {
        let frame = m.encode_frame();
        let decoded = Message::decode_body(&frame[4..]).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn round_trips_every_message_kind() {
        round_trip(Message::KeepAlive);
        round_trip(Message::Choke);
        round_trip(Message::Unchoke);
        round_trip(Message::Interested);
        round_trip(Message::NotInterested);
        round_trip(Message::Have(7));
        round_trip(Message::Bitfield(vec![0xff, 0x00]));
        round_trip(Message::Request { index: 1, begin: 2, length: 3 });
        round_trip(Message::Piece { index: 1, begin: 0, block: vec![1, 2, 3] });
        round_trip(Message::Cancel { index: 1, begin: 2, length: 3 });
        round_trip(Message::Port(6881));
        round_trip(Message::Extended { ext_id: 0, payload: vec![1, 2, 3] });
    }

    #[test]
    fn keep_alive_frame_is_four_zero_bytes() {
        assert_eq!(Message::KeepAlive.encode_frame(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn unknown_id_is_protocol_error() {
        let body = vec![200u8];
        assert!(matches!(
            Message::decode_body(&body),
            Err(WireError::UnknownMessageId(200))
        ));
    }
}
