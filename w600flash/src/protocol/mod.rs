//! Protocol implementations.

pub mod crc;
pub mod frame;
pub mod xmodem;

// Re-export common types
pub use frame::{Command, CommandFrame, FRAME_START};
pub use xmodem::{Xmodem1k, XmodemConfig};
