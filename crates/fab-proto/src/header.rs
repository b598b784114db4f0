//! The fixed routing header (spec.md §4.6.1).
//!
//! ```text
//! offset  size  field
//! 0       4     messageType (i32)
//! 4       1     handled (bool)
//! 5       3     reserved, must be zero
//! 8       4     seqNum (i32)
//! 12      4     corr (i32, 0 if not applicable)
//! 16      *     txEndpoint (length-prefixed utf8)
//! *       *     rxEndpoint (length-prefixed utf8)
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use fab_types::EndpointAddress;
use std::io::Cursor;

/// Discriminant for [`Header::message_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Request,
    Response,
    CancellationRequest,
    CancellationResponse,
    ProtocolNotSupported,
    EndPointNotPresent,
    Misrouted,
    /// Any value not in the recognized set; carried so the receive loop
    /// can log-and-drop per spec.md §4.6.3 step 6 instead of failing to
    /// parse.
    Unknown(i32),
}

impl MessageType {
    #[must_use]
    pub fn to_i32(self) -> i32 {
        match self {
            Self::Request => 1,
            Self::Response => 2,
            Self::CancellationRequest => 3,
            Self::CancellationResponse => 4,
            Self::ProtocolNotSupported => -1,
            Self::EndPointNotPresent => -2,
            Self::Misrouted => -3,
            Self::Unknown(v) => v,
        }
    }

    #[must_use]
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => Self::Request,
            2 => Self::Response,
            3 => Self::CancellationRequest,
            4 => Self::CancellationResponse,
            -1 => Self::ProtocolNotSupported,
            -2 => Self::EndPointNotPresent,
            -3 => Self::Misrouted,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("frame too short to contain a header: {0} bytes")]
    Truncated(usize),
    #[error("length-prefixed string length {0} exceeds remaining buffer of {1} bytes")]
    BadStringLength(u32, usize),
    #[error("endpoint string is not valid utf-8")]
    InvalidUtf8,
}

/// The fixed routing frame header, independent of the application payload
/// that follows it on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub handled: bool,
    pub seq_num: i32,
    pub corr: i32,
    pub tx_endpoint: EndpointAddress,
    pub rx_endpoint: EndpointAddress,
}

impl Header {
    /// Encode the header as the top frame, ready to be followed by the
    /// application payload bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let tx = self.tx_endpoint.as_bytes();
        let rx = self.rx_endpoint.as_bytes();
        let mut buf = BytesMut::with_capacity(16 + 4 + tx.len() + 4 + rx.len());
        buf.put_i32(self.message_type.to_i32());
        buf.put_u8(u8::from(self.handled));
        buf.put_bytes(0, 3); // reserved
        buf.put_i32(self.seq_num);
        buf.put_i32(self.corr);
        buf.put_u32(tx.len() as u32);
        buf.put_slice(tx);
        buf.put_u32(rx.len() as u32);
        buf.put_slice(rx);
        buf.freeze()
    }

    /// Decode a header from the front of `frame`, returning the header and
    /// the remaining bytes (the application payload, untouched).
    pub fn decode(frame: &[u8]) -> Result<(Self, &[u8]), HeaderError> {
        if frame.len() < 16 {
            return Err(HeaderError::Truncated(frame.len()));
        }
        let mut cursor = Cursor::new(frame);
        let message_type = MessageType::from_i32(
            cursor
                .read_i32::<BigEndian>()
                .map_err(|_| HeaderError::Truncated(frame.len()))?,
        );
        let handled = cursor
            .read_u8()
            .map_err(|_| HeaderError::Truncated(frame.len()))?
            != 0;
        cursor.advance(3); // reserved
        let seq_num = cursor
            .read_i32::<BigEndian>()
            .map_err(|_| HeaderError::Truncated(frame.len()))?;
        let corr = cursor
            .read_i32::<BigEndian>()
            .map_err(|_| HeaderError::Truncated(frame.len()))?;
        let tx_endpoint = read_lp_string(&mut cursor)?;
        let rx_endpoint = read_lp_string(&mut cursor)?;
        let consumed = cursor.position() as usize;
        Ok((
            Self {
                message_type,
                handled,
                seq_num,
                corr,
                tx_endpoint: tx_endpoint.into(),
                rx_endpoint: rx_endpoint.into(),
            },
            &frame[consumed..],
        ))
    }
}

fn read_lp_string(cursor: &mut Cursor<&[u8]>) -> Result<String, HeaderError> {
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| HeaderError::Truncated(cursor.get_ref().len()))?;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len as usize > remaining {
        return Err(HeaderError::BadStringLength(len, remaining));
    }
    let start = cursor.position() as usize;
    let end = start + len as usize;
    let bytes = &cursor.get_ref()[start..end];
    cursor.advance(len as usize);
    String::from_utf8(bytes.to_vec()).map_err(|_| HeaderError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            message_type: MessageType::Request,
            handled: false,
            seq_num: 42,
            corr: 0,
            tx_endpoint: "node-a".into(),
            rx_endpoint: "node-b".into(),
        }
    }

    #[test]
    fn encode_then_decode_round_trips_every_field() {
        let h = sample();
        let encoded = h.encode();
        let (decoded, rest) = Header::decode(&encoded).unwrap();
        assert_eq!(decoded, h);
        assert!(rest.is_empty());
    }

    #[test]
    fn payload_bytes_after_header_are_untouched() {
        let h = sample();
        let mut frame = h.encode().to_vec();
        frame.extend_from_slice(b"payload-bytes");
        let (decoded, rest) = Header::decode(&frame).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(rest, b"payload-bytes");
    }

    #[test]
    fn message_type_round_trips_including_negative_and_unknown_values() {
        for v in [1, 2, 3, 4, -1, -2, -3, 99] {
            assert_eq!(MessageType::from_i32(v).to_i32(), v);
        }
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        assert_eq!(Header::decode(&[0u8; 4]), Err(HeaderError::Truncated(4)));
    }

    #[test]
    fn decode_rejects_string_length_exceeding_buffer() {
        let mut buf = BytesMut::new();
        buf.put_i32(MessageType::Request.to_i32());
        buf.put_u8(0);
        buf.put_bytes(0, 3);
        buf.put_i32(1);
        buf.put_i32(0);
        buf.put_u32(1000); // claims 1000 bytes of tx_endpoint but none follow
        let err = Header::decode(&buf).unwrap_err();
        assert!(matches!(err, HeaderError::BadStringLength(1000, _)));
    }

    #[test]
    fn corr_defaults_are_preserved_through_encode_decode() {
        let mut h = sample();
        h.message_type = MessageType::Response;
        h.corr = 42;
        h.handled = true;
        let (decoded, _) = Header::decode(&h.encode()).unwrap();
        assert_eq!(decoded.corr, 42);
        assert!(decoded.handled);
    }
}
