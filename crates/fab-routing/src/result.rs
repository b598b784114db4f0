//! `RouteResult` replaces the source's exception-carried outcomes
//! (`Misrouted`, timeouts, disposal) with a plain sum type, per the
//! "Exceptions used as result carriers" redesign.

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResult {
    /// A peer replied with `handled = true`.
    Handled(Bytes),
    /// A peer replied but declined to handle the request.
    Unhandled(Bytes),
    /// The receiver rejected the frame: its endpoint didn't match ours.
    Misrouted,
    /// The caller's cancellation token fired before a result was ready.
    Cancelled,
    /// The owning Route Endpoint was closed while the call was pending.
    Disposed,
    /// Every replica's transport failed and none ever answered.
    TransportFailed,
}

impl RouteResult {
    #[must_use]
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::Handled(_) | Self::Unhandled(_))
    }
}
