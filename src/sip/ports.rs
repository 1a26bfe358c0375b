//! Capability traits implemented by the SIP driver adapter.

use std::path::Path;
use std::sync::Arc;

use crate::core::audio::FramePort;
use crate::errors::SipError;

use super::{CallId, CallLifecycle};

/// Signaling operations on one call leg.
///
/// Implementations must be callable from any thread; the adapter is
/// responsible for whatever thread registration its stack requires.
pub trait CallActions: Send + Sync {
    fn call_id(&self) -> CallId;

    /// Dial an outbound call to `to_uri`.
    fn make_call(&self, to_uri: &str) -> Result<(), SipError>;

    /// Answer an inbound call with the given SIP status (180 rings, 200 picks up).
    fn answer(&self, status_code: u16) -> Result<(), SipError>;

    /// Terminate the call with the given SIP status.
    fn hangup(&self, status_code: u16) -> Result<(), SipError>;

    /// Issue a REFER-style blind transfer to `to_uri`.
    fn transfer(&self, to_uri: &str) -> Result<(), SipError>;

    /// Send DTMF digits on the established leg.
    fn dial_dtmf(&self, digits: &str) -> Result<(), SipError>;

    fn lifecycle(&self) -> Result<CallLifecycle, SipError>;

    fn last_status_code(&self) -> u16;

    /// Media surface of the call. Only valid while `Confirmed`.
    fn media(&self) -> Result<Arc<dyn CallMedia>, SipError>;
}

/// Media surface of a confirmed call leg.
///
/// Capture frames are fixed-format PCM (mono, 16-bit, the configured sample
/// rate and frame time). File playback reports completion exactly once per
/// file through the `on_eof` closure.
pub trait CallMedia: Send + Sync {
    /// Attach the inbound capture sink. The driver feeds received frames
    /// into the port and pulls outbound frames from it.
    fn attach_capture(&self, port: Arc<FramePort>) -> Result<(), SipError>;

    fn detach_capture(&self);

    /// Begin playing a WAV file into the call (and the recorder, when one is
    /// active). `on_eof` fires once when the file finishes on its own; it
    /// does not fire when playback is stopped.
    fn play_file(&self, path: &Path, on_eof: Box<dyn FnOnce() + Send>) -> Result<(), SipError>;

    /// Stop the current file playback, if any.
    fn stop_playback(&self);

    /// Start multiplexed call recording to `path`.
    fn start_recording(&self, path: &Path) -> Result<(), SipError>;

    fn stop_recording(&self);
}

/// Entry point for originating call legs.
pub trait SipDriver: Send + Sync {
    /// Allocate a fresh outbound call leg. The driver delivers subsequent
    /// lifecycle events for the leg to the gateway under the returned id.
    fn create_call(&self) -> Result<Arc<dyn CallActions>, SipError>;
}
