//! Stream framing for OpenFlow connections.
//!
//! The decoder only splits the byte stream on the header length; frames are
//! decoded by [`Message::decode`](crate::Message::decode) afterwards so that
//! one undecodable message does not tear down the connection.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::consts::OFP_HEADER_LEN;
use crate::error::CodecError;
use crate::header::Header;

/// Splits a byte stream into OpenFlow frames and writes encoded frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfpFrameCodec;

impl Decoder for OfpFrameCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(length) = Header::peek_length(src) else {
            return Ok(None);
        };
        if length < OFP_HEADER_LEN {
            return Err(CodecError::BadLength {
                what: "header",
                length,
            });
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for OfpFrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
