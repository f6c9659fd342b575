//! # w600flash
//!
//! A library for flashing WinnerMicro W600/W601 chips.
//!
//! This crate provides the core functionality for talking to the W600 serial
//! bootloader:
//!
//! - Command framing with CRC-16/CCITT-FALSE checksums
//! - Boot handshake (reset, ESC probing, `CCCC` prompt detection)
//! - MAC address and flash-ID queries, image and secure-boot erase
//! - Baud-rate renegotiation with rollback
//! - Firmware upload over XMODEM-1K with progress reporting
//!
//! The protocol is asymmetric: commands go out as binary frames, query
//! replies come back as newline-terminated ASCII lines.
//!
//! ## Example
//!
//! ```rust,no_run
//! use w600flash::W600Flasher;
//!
//! fn main() -> w600flash::Result<()> {
//!     let mut flasher = W600Flasher::open("/dev/ttyUSB0", 115200)?;
//!     flasher.connect()?;
//!
//!     let plan = flasher.plan_upload("firmware.fls".as_ref(), 1000000, false)?;
//!     let reply = flasher.upload(&plan, |_sent, _total| {})?;
//!     println!("{reply}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flasher;
pub mod host;
pub mod port;
pub mod protocol;

// Re-exports for convenience
pub use {
    error::{Error, Result},
    flasher::{ImageKind, SUPPORTED_BAUDS, UploadPlan, W600Flasher},
    host::{default_port, discover_ports},
    port::{NativePort, NativePortEnumerator, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::frame::{Command, CommandFrame, FRAME_START},
};
