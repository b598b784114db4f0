//! Wire framing for the routing layer.
//!
//! Every message carries a fixed header frame (§4.6.1 of the spec) pushed
//! in front of the application payload; the routing layer pops the header
//! on receive and hands the remaining bytes to the caller untouched
//! (§6.3). A second, unrelated framing (§6.5) is used only by a remote
//! `MessageRouter` talking to a well-known registry endpoint through a
//! `RouteEndpoint`.

pub mod header;
pub mod router_frame;

pub use header::{Header, HeaderError, MessageType};
pub use router_frame::{RouterFrame, RouterFrameError};
