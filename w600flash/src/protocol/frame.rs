//! W600 boot protocol command frames.
//!
//! Commands are binary-framed; the bootloader answers query commands with
//! newline-terminated ASCII lines instead of frames, so there is no decode
//! counterpart here.
//!
//! ## Frame Format
//!
//! ```text
//! +-------+--------+--------+-----------------------+
//! | Start | Length | CRC16  |        Payload        |
//! +-------+--------+--------+-----------------------+
//! | 1     | 2      | 2      |       variable        |
//! +-------+--------+--------+-----------------------+
//! | 0x21  | LE     | LE     | opcode (u32 LE) ++ args|
//! +-------+--------+--------+-----------------------+
//! ```
//!
//! The length field counts the payload plus the two CRC bytes; the CRC is
//! CRC-16/CCITT-FALSE over the payload only.

use {
    crate::protocol::crc::crc16_ccitt_false,
    byteorder::{LittleEndian, WriteBytesExt},
};

/// Frame start marker.
pub const FRAME_START: u8 = 0x21;

/// W600 bootloader command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Change the link baud rate.
    SetBaud = 0x31,
    /// Erase the image region (ROM boot only).
    EraseImage = 0x32,
    /// Write the secret region (ROM boot only).
    SetSec = 0x33,
    /// Read the secret region (ROM boot only).
    GetSec = 0x34,
    /// Set RF gain calibration.
    SetGain = 0x35,
    /// Get RF gain calibration.
    GetGain = 0x36,
    /// Set the device MAC address.
    SetMac = 0x37,
    /// Query the device MAC address.
    GetMac = 0x38,
    /// Query the QSPI flash ID (ROM boot only).
    GetFlashId = 0x3C,
    /// Erase the secure-boot region.
    EraseSecboot = 0x3F,
}

/// Command frame builder.
///
/// A frame is immutable once built and constructed fresh per command.
#[derive(Debug)]
pub struct CommandFrame {
    cmd: Command,
    args: Vec<u8>,
}

impl CommandFrame {
    /// Create a new frame with no arguments.
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd,
            args: Vec::new(),
        }
    }

    /// Create a set-baud-rate command frame.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn set_baud(baud: u32) -> Self {
        let mut frame = Self::new(Command::SetBaud);
        frame.args.write_u32::<LittleEndian>(baud).unwrap();
        frame
    }

    /// Create an erase-image command frame.
    pub fn erase_image() -> Self {
        Self::new(Command::EraseImage)
    }

    /// Create an erase-secboot command frame.
    pub fn erase_secboot() -> Self {
        Self::new(Command::EraseSecboot)
    }

    /// Create a set-MAC command frame.
    pub fn set_mac(mac: &[u8; 6]) -> Self {
        let mut frame = Self::new(Command::SetMac);
        frame.args.extend_from_slice(mac);
        frame
    }

    /// Create a get-MAC query frame.
    pub fn get_mac() -> Self {
        Self::new(Command::GetMac)
    }

    /// Create a flash-ID query frame.
    pub fn get_flash_id() -> Self {
        Self::new(Command::GetFlashId)
    }

    /// Build the complete frame data.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn build(&self) -> Vec<u8> {
        // Payload = opcode as u32 LE + args
        let mut payload = Vec::with_capacity(4 + self.args.len());
        payload
            .write_u32::<LittleEndian>(u32::from(self.cmd as u8))
            .unwrap();
        payload.extend_from_slice(&self.args);

        // Total = start(1) + len(2) + crc(2) + payload
        let mut buf = Vec::with_capacity(5 + payload.len());
        buf.push(FRAME_START);

        // Length covers payload plus the CRC field - safe cast, frames < 64KB
        buf.write_u16::<LittleEndian>((payload.len() + 2) as u16)
            .unwrap();

        // CRC16 over the payload only
        buf.write_u16::<LittleEndian>(crc16_ccitt_false(&payload))
            .unwrap();

        buf.extend_from_slice(&payload);
        buf
    }

    /// Get the command opcode.
    pub fn command(&self) -> Command {
        self.cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_start_and_lengths() {
        let frame = CommandFrame::get_mac();
        let data = frame.build();

        // start(1) + len(2) + crc(2) + opcode(4)
        assert_eq!(data.len(), 9);
        assert_eq!(data[0], FRAME_START);
        // Length field = payload + CRC bytes
        assert_eq!(u16::from_le_bytes([data[1], data[2]]), 6);
    }

    #[test]
    fn test_frame_length_tracks_payload() {
        let frame = CommandFrame::set_mac(&[0x28, 0x6D, 0xCD, 0x00, 0x11, 0x22]);
        let data = frame.build();

        // Payload is opcode(4) + mac(6) = 10; encoded adds 5 bytes of header
        assert_eq!(data.len(), 15);
        assert_eq!(u16::from_le_bytes([data[1], data[2]]), 12);
    }

    #[test]
    fn test_frame_crc_covers_payload_only() {
        let frame = CommandFrame::set_baud(1000000);
        let data = frame.build();

        let crc = u16::from_le_bytes([data[3], data[4]]);
        assert_eq!(crc, crc16_ccitt_false(&data[5..]));
    }

    #[test]
    fn test_opcode_encoded_little_endian() {
        let frame = CommandFrame::erase_secboot();
        let data = frame.build();

        assert_eq!(&data[5..9], &[0x3F, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_set_baud_argument_encoding() {
        let frame = CommandFrame::set_baud(1000000);
        let data = frame.build();

        // 1000000 = 0x000F4240 little-endian after the opcode
        assert_eq!(&data[9..13], &[0x40, 0x42, 0x0F, 0x00]);
    }

    #[test]
    fn test_set_baud_matches_reference_bytes() {
        // Known-good frame for switching to 1000000 baud, captured from the
        // stock flashing tools for this chip family.
        let expected: &[u8] = &[
            0x21, 0x0A, 0x00, 0x5E, 0x3D, 0x31, 0x00, 0x00, 0x00, 0x40, 0x42, 0x0F, 0x00,
        ];
        assert_eq!(CommandFrame::set_baud(1000000).build(), expected);
    }

    #[test]
    fn test_command_getter() {
        assert_eq!(CommandFrame::get_mac().command(), Command::GetMac);
        assert_eq!(CommandFrame::erase_image().command(), Command::EraseImage);
        assert_eq!(
            CommandFrame::erase_secboot().command(),
            Command::EraseSecboot
        );
    }
}
