//! Remote `MessageRouter` wire frames (spec.md §6.5).
//!
//! Used only when a `MessageRouter` implementation is accessed via a
//! `RouteEndpoint::Send` to a well-known registry endpoint rather than
//! calling the route registry in-process. The frame is pushed as the top
//! frame in front of the routed message's own application payload, per
//! the stack-of-frames model in §6.3: after the structured fields below
//! are parsed, any bytes left in the buffer are that inner payload.

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterFrameError {
    #[error("frame too short")]
    Truncated,
    #[error("unrecognized messageType {0}")]
    UnknownMessageType(i16),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
}

/// A single remote-router request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterFrame {
    /// `messageType = 0`: route to every endpoint subscribed to any of
    /// `routes`.
    Route {
        routes: Vec<String>,
        publish: bool,
        payload: Bytes,
    },
    /// `messageType = 1`: route directly to one endpoint, skipping
    /// resolution.
    RouteToEndPoint {
        endpoint: String,
        publish: bool,
        payload: Bytes,
    },
    /// `messageType = 2`
    RegisterRoute { options: i32, route: String },
    /// `messageType = 3`
    UnregisterRoute { route: String },
    /// `messageType = 4`
    UnregisterRoutes { remove_persistent: bool },
    /// `messageType = 5`: server-to-handler delivery.
    Handle {
        route: String,
        publish: bool,
        payload: Bytes,
    },
}

impl RouterFrame {
    fn message_type(&self) -> i16 {
        match self {
            Self::Route { .. } => 0,
            Self::RouteToEndPoint { .. } => 1,
            Self::RegisterRoute { .. } => 2,
            Self::UnregisterRoute { .. } => 3,
            Self::UnregisterRoutes { .. } => 4,
            Self::Handle { .. } => 5,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_i16(self.message_type());
        buf.put_i16(0); // reserved
        match self {
            Self::Route {
                routes,
                publish,
                payload,
            } => {
                buf.put_i32(routes.len() as i32);
                for r in routes {
                    put_lp_string(&mut buf, r);
                }
                buf.put_u8(u8::from(*publish));
                buf.put_slice(payload);
            }
            Self::RouteToEndPoint {
                endpoint,
                publish,
                payload,
            } => {
                put_lp_string(&mut buf, endpoint);
                buf.put_u8(u8::from(*publish));
                buf.put_slice(payload);
            }
            Self::RegisterRoute { options, route } => {
                buf.put_i32(*options);
                put_lp_string(&mut buf, route);
            }
            Self::UnregisterRoute { route } => {
                put_lp_string(&mut buf, route);
            }
            Self::UnregisterRoutes { remove_persistent } => {
                buf.put_u8(u8::from(*remove_persistent));
            }
            Self::Handle {
                route,
                publish,
                payload,
            } => {
                put_lp_string(&mut buf, route);
                buf.put_u8(u8::from(*publish));
                buf.put_slice(payload);
            }
        }
        buf.freeze()
    }

    pub fn decode(frame: &[u8]) -> Result<Self, RouterFrameError> {
        if frame.len() < 4 {
            return Err(RouterFrameError::Truncated);
        }
        let mut cursor = Cursor::new(frame);
        let message_type = cursor.read_i16::<BigEndian>().map_err(|_| RouterFrameError::Truncated)?;
        let _reserved = cursor.read_i16::<BigEndian>().map_err(|_| RouterFrameError::Truncated)?;

        match message_type {
            0 => {
                let count = cursor.read_i32::<BigEndian>().map_err(|_| RouterFrameError::Truncated)?;
                let mut routes = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    routes.push(read_lp_string(&mut cursor)?);
                }
                let publish = cursor.read_u8().map_err(|_| RouterFrameError::Truncated)? != 0;
                let payload = remaining(&cursor, frame);
                Ok(Self::Route {
                    routes,
                    publish,
                    payload,
                })
            }
            1 => {
                let endpoint = read_lp_string(&mut cursor)?;
                let publish = cursor.read_u8().map_err(|_| RouterFrameError::Truncated)? != 0;
                let payload = remaining(&cursor, frame);
                Ok(Self::RouteToEndPoint {
                    endpoint,
                    publish,
                    payload,
                })
            }
            2 => {
                let options = cursor.read_i32::<BigEndian>().map_err(|_| RouterFrameError::Truncated)?;
                let route = read_lp_string(&mut cursor)?;
                Ok(Self::RegisterRoute { options, route })
            }
            3 => {
                let route = read_lp_string(&mut cursor)?;
                Ok(Self::UnregisterRoute { route })
            }
            4 => {
                let remove_persistent = cursor.read_u8().map_err(|_| RouterFrameError::Truncated)? != 0;
                Ok(Self::UnregisterRoutes { remove_persistent })
            }
            5 => {
                let route = read_lp_string(&mut cursor)?;
                let publish = cursor.read_u8().map_err(|_| RouterFrameError::Truncated)? != 0;
                let payload = remaining(&cursor, frame);
                Ok(Self::Handle {
                    route,
                    publish,
                    payload,
                })
            }
            other => Err(RouterFrameError::UnknownMessageType(other)),
        }
    }
}

/// The reply payload for a multi-target `Route`: `count: int32;
/// (len: int64, bytes)⁺`, each inner `bytes` being a whole recursive
/// message (e.g. an encoded routing-layer `Response`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteReply {
    pub results: Vec<Bytes>,
}

impl RouteReply {
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_i32(self.results.len() as i32);
        for r in &self.results {
            buf.put_i64(r.len() as i64);
            buf.put_slice(r);
        }
        buf.freeze()
    }

    pub fn decode(frame: &[u8]) -> Result<Self, RouterFrameError> {
        let mut cursor = Cursor::new(frame);
        let count = cursor.read_i32::<BigEndian>().map_err(|_| RouterFrameError::Truncated)?;
        let mut results = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let len = cursor.read_i64::<BigEndian>().map_err(|_| RouterFrameError::Truncated)?;
            let start = cursor.position() as usize;
            let end = start + len as usize;
            if end > frame.len() {
                return Err(RouterFrameError::Truncated);
            }
            results.push(Bytes::copy_from_slice(&frame[start..end]));
            cursor.advance(len as usize);
        }
        Ok(Self { results })
    }
}

fn put_lp_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

fn read_lp_string(cursor: &mut Cursor<&[u8]>) -> Result<String, RouterFrameError> {
    let len = cursor.read_i32::<BigEndian>().map_err(|_| RouterFrameError::Truncated)?;
    if len < 0 {
        return Err(RouterFrameError::Truncated);
    }
    let start = cursor.position() as usize;
    let end = start + len as usize;
    if end > cursor.get_ref().len() {
        return Err(RouterFrameError::Truncated);
    }
    let s = String::from_utf8(cursor.get_ref()[start..end].to_vec())
        .map_err(|_| RouterFrameError::InvalidUtf8)?;
    cursor.advance(len as usize);
    Ok(s)
}

fn remaining(cursor: &Cursor<&[u8]>, frame: &[u8]) -> Bytes {
    let pos = cursor.position() as usize;
    Bytes::copy_from_slice(&frame[pos..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_frame_round_trips_with_payload() {
        let f = RouterFrame::Route {
            routes: vec!["r1".to_owned(), "r2".to_owned()],
            publish: true,
            payload: Bytes::from_static(b"hello"),
        };
        let decoded = RouterFrame::decode(&f.encode()).unwrap();
        assert_eq!(f, decoded);
    }

    #[test]
    fn route_to_endpoint_round_trips() {
        let f = RouterFrame::RouteToEndPoint {
            endpoint: "b".to_owned(),
            publish: false,
            payload: Bytes::from_static(b"ping"),
        };
        assert_eq!(RouterFrame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn register_and_unregister_frames_round_trip() {
        let reg = RouterFrame::RegisterRoute {
            options: 3,
            route: "r".to_owned(),
        };
        assert_eq!(RouterFrame::decode(&reg.encode()).unwrap(), reg);

        let unreg = RouterFrame::UnregisterRoute {
            route: "r".to_owned(),
        };
        assert_eq!(RouterFrame::decode(&unreg.encode()).unwrap(), unreg);

        let unregs = RouterFrame::UnregisterRoutes {
            remove_persistent: true,
        };
        assert_eq!(RouterFrame::decode(&unregs.encode()).unwrap(), unregs);
    }

    #[test]
    fn handle_frame_round_trips() {
        let f = RouterFrame::Handle {
            route: "r".to_owned(),
            publish: true,
            payload: Bytes::from_static(b"body"),
        };
        assert_eq!(RouterFrame::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn route_reply_round_trips_multiple_recursive_messages() {
        let reply = RouteReply {
            results: vec![Bytes::from_static(b"one"), Bytes::from_static(b"two-longer")],
        };
        assert_eq!(RouteReply::decode(&reply.encode()).unwrap(), reply);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i16(99);
        buf.put_i16(0);
        assert_eq!(
            RouterFrame::decode(&buf),
            Err(RouterFrameError::UnknownMessageType(99))
        );
    }
}
