//! Length-delimited framing for post-handshake peer messages, wired into
//! `tokio_util::codec::Framed` the way the rest of the pack's async
//! BitTorrent clients frame their peer sockets.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Message, WireError};

/// Refuse frames larger than this; a peer announcing a multi-megabyte
/// message body is either broken or hostile. Generous enough for a 16 KiB
/// block payload plus framing overhead.
const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Default)]
pub struct MessageCodec {
    state: DecodeState,
}

#[derive(Debug, Default)]
enum DecodeState {
    #[default]
    Length,
    Body(usize),
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        loop {
            match self.state {
                DecodeState::Length => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let len = u32::from_be_bytes(src[0..4].try_into().unwrap()) as usize;
                    if len > MAX_FRAME_LEN {
                        return Err(WireError::Malformed {
                            kind: "frame",
                            reason: "length prefix exceeds maximum frame size",
                        });
                    }
                    src.advance(4);
                    if len == 0 {
                        return Ok(Some(Message::KeepAlive));
                    }
                    self.state = DecodeState::Body(len);
                }
                DecodeState::Body(len) => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    let body = src.split_to(len);
                    self.state = DecodeState::Length;
                    return Message::decode_body(&body).map(Some);
                }
            }
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), WireError> {
        dst.extend_from_slice(&item.encode_frame());
        Ok(())
    }
}
