//! Call-leg audio plumbing: capture frame port, WAV codec, and the serial
//! file player.

pub mod frame_port;
pub mod player;
pub mod wav;

pub use frame_port::{FrameHandler, FramePort};
pub use player::SmartPlayer;
pub use wav::{decode_wav, encode_wav};
