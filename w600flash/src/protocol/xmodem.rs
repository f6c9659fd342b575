//! XMODEM-1K file transfer protocol implementation.
//!
//! The W600 bootloader receives firmware images over plain XMODEM with
//! 1024-byte blocks and CRC error detection. There is no file-info block;
//! data blocks start at sequence 1.
//!
//! ## Protocol Overview
//!
//! ```text
//! Block format:
//! +-----+-----+------+---------------+--------+
//! | STX | SEQ | ~SEQ |   DATA (1024) | CRC16  |
//! +-----+-----+------+---------------+--------+
//! | 1   | 1   | 1    |     1024      | 2      |
//! +-----+-----+------+---------------+--------+
//! ```
//!
//! Short final blocks are padded with 0x1A; the CRC is CRC-16/XMODEM,
//! transmitted big-endian.

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_xmodem;
use log::{debug, trace};
use std::io::{Read, Write};
use std::time::Duration;

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
}

/// Block size for STX packets (XMODEM-1K).
pub const BLOCK_SIZE: usize = 1024;

/// Pad byte for short final blocks.
pub const PAD: u8 = 0x1A;

/// XMODEM configuration options.
#[derive(Debug, Clone)]
pub struct XmodemConfig {
    /// Timeout for waiting for a single response character.
    pub char_timeout: Duration,
    /// Timeout for waiting for the receiver's initial 'C'.
    pub start_timeout: Duration,
    /// Maximum retries for sending a block.
    pub max_retries: u32,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            char_timeout: Duration::from_millis(1000),
            start_timeout: Duration::from_secs(60),
            max_retries: 10,
        }
    }
}

/// XMODEM-1K transfer handler.
pub struct Xmodem1k<'a, P: Read + Write> {
    port: &'a mut P,
    config: XmodemConfig,
}

impl<'a, P: Read + Write> Xmodem1k<'a, P> {
    /// Create a new transfer handler.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: XmodemConfig::default(),
        }
    }

    /// Create a new transfer handler with custom configuration.
    pub fn with_config(port: &'a mut P, config: XmodemConfig) -> Self {
        Self { port, config }
    }

    /// Read a single byte with timeout.
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        // Timeout handling is delegated to the port implementation.
        match self.port.read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(Error::Timeout("read_byte: no data".into())),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(Error::Timeout("read_byte: timeout".into()))
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Wait for the receiver to send 'C' (CRC mode request).
    pub fn wait_for_start(&mut self) -> Result<()> {
        debug!("Waiting for 'C' from receiver...");
        let start = std::time::Instant::now();

        while start.elapsed() < self.config.start_timeout {
            match self.read_byte() {
                Ok(control::C) => {
                    debug!("Received 'C', starting transfer");
                    return Ok(());
                },
                Ok(c) => {
                    trace!("Received unexpected char: 0x{c:02X}");
                },
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout("Timeout waiting for 'C'".into()))
    }

    /// Build an XMODEM-1K block.
    fn build_block(seq: u8, data: &[u8]) -> Vec<u8> {
        let mut block = Vec::with_capacity(3 + BLOCK_SIZE + 2);

        // Header
        block.push(control::STX);
        block.push(seq);
        block.push(!seq);

        // Data (padded with 0x1A if necessary)
        if data.len() >= BLOCK_SIZE {
            block.extend_from_slice(&data[..BLOCK_SIZE]);
        } else {
            block.extend_from_slice(data);
            block.resize(3 + BLOCK_SIZE, PAD);
        }

        // CRC16, big-endian on the wire
        let crc = crc16_xmodem(&block[3..3 + BLOCK_SIZE]);
        block.push((crc >> 8) as u8);
        block.push((crc & 0xFF) as u8);

        block
    }

    /// Send a block and wait for ACK.
    fn send_block(&mut self, block: &[u8]) -> Result<()> {
        for retry in 0..self.config.max_retries {
            trace!("Sending block (attempt {})", retry + 1);

            self.port.write_all(block)?;
            self.port.flush()?;

            match self.read_byte() {
                Ok(control::ACK) => {
                    trace!("Block ACKed");
                    return Ok(());
                },
                Ok(control::NAK) => {
                    debug!("Block NAKed, retrying...");
                },
                Ok(control::CAN) => {
                    return Err(Error::Xmodem("Transfer cancelled by receiver".into()));
                },
                Ok(c) => {
                    debug!("Unexpected response: 0x{c:02X}, retrying...");
                },
                Err(Error::Timeout(_)) => {
                    debug!("Timeout waiting for ACK, retrying...");
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::Xmodem(format!(
            "Block transfer failed after {} retries",
            self.config.max_retries
        )))
    }

    /// Send EOT (End of Transmission).
    pub fn send_eot(&mut self) -> Result<()> {
        debug!("Sending EOT");

        for _retry in 0..self.config.max_retries {
            self.port.write_all(&[control::EOT])?;
            self.port.flush()?;

            match self.read_byte() {
                Ok(control::ACK) => {
                    debug!("EOT ACKed");
                    return Ok(());
                },
                // NAK, timeout, or unexpected response - retry
                Ok(_) | Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        // Consider EOT sent even without ACK
        Ok(())
    }

    /// Transfer data to the receiver.
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes to transfer
    /// * `progress` - Progress callback (bytes sent, total bytes)
    pub fn transfer<F>(&mut self, data: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        debug!("Starting XMODEM-1K transfer: {} bytes", data.len());

        // Wait for the receiver to request CRC mode
        self.wait_for_start()?;

        // Send data blocks, sequence starts at 1 and wraps
        let mut seq: u8 = 1;
        let mut offset = 0;
        let total = data.len();

        while offset < total {
            let chunk_end = (offset + BLOCK_SIZE).min(total);
            let chunk = &data[offset..chunk_end];

            let block = Self::build_block(seq, chunk);
            self.send_block(&block)?;

            offset = chunk_end;
            seq = seq.wrapping_add(1);

            progress(offset, total);
        }

        // Send EOT
        self.send_eot()?;

        debug!("XMODEM transfer complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_block_header() {
        let data = [0x01, 0x02, 0x03];

        let block = Xmodem1k::<std::io::Cursor<Vec<u8>>>::build_block(1, &data);

        assert_eq!(block[0], control::STX);
        assert_eq!(block[1], 1);
        assert_eq!(block[2], 0xFE);
        assert_eq!(block.len(), 3 + BLOCK_SIZE + 2);
    }

    #[test]
    fn test_build_block_pads_with_sub() {
        let data = [0xAB; 10];

        let block = Xmodem1k::<std::io::Cursor<Vec<u8>>>::build_block(3, &data);

        assert_eq!(&block[3..13], &data);
        assert!(block[13..3 + BLOCK_SIZE].iter().all(|&b| b == PAD));
    }

    #[test]
    fn test_build_block_crc_big_endian() {
        let data = vec![0x42; BLOCK_SIZE];

        let block = Xmodem1k::<std::io::Cursor<Vec<u8>>>::build_block(5, &data);

        assert_eq!(block[1], 5);
        assert_eq!(block[2], 0xFA);
        let crc = crc16_xmodem(&data);
        assert_eq!(block[3 + BLOCK_SIZE], (crc >> 8) as u8);
        assert_eq!(block[3 + BLOCK_SIZE + 1], (crc & 0xFF) as u8);
    }

    /// Mock serial port with separate read/write buffers.
    ///
    /// Unlike `Cursor<Vec<u8>>`, this keeps reads and writes independent.
    struct MockSerial {
        read_buf: std::collections::VecDeque<u8>,
        write_buf: Vec<u8>,
    }

    impl MockSerial {
        fn new(response: &[u8]) -> Self {
            Self {
                read_buf: response.iter().copied().collect(),
                write_buf: Vec::new(),
            }
        }
    }

    impl std::io::Read for MockSerial {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.read_buf.is_empty() {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.read_buf.len());
            for b in buf.iter_mut().take(n) {
                *b = self.read_buf.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl std::io::Write for MockSerial {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write_buf.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn test_config() -> XmodemConfig {
        XmodemConfig {
            char_timeout: Duration::from_millis(100),
            start_timeout: Duration::from_millis(200),
            max_retries: 2,
        }
    }

    #[test]
    fn test_transfer_single_block() {
        // Device sends: C, ACK(data), ACK(EOT)
        let mut port = MockSerial::new(&[control::C, control::ACK, control::ACK]);

        let mut xmodem = Xmodem1k::with_config(&mut port, test_config());
        let data = vec![0x42; 100];
        let result = xmodem.transfer(&data, |_, _| {});

        assert!(result.is_ok(), "Error: {:?}", result.err());
        // One full block plus EOT on the wire
        assert_eq!(port.write_buf.len(), 3 + BLOCK_SIZE + 2 + 1);
        assert_eq!(*port.write_buf.last().unwrap(), control::EOT);
    }

    #[test]
    fn test_transfer_multi_block_progress() {
        let num_blocks = 3;
        let mut response = vec![control::C];
        response.extend(std::iter::repeat_n(control::ACK, num_blocks)); // data blocks
        response.push(control::ACK); // EOT

        let mut port = MockSerial::new(&response);
        let mut xmodem = Xmodem1k::with_config(&mut port, test_config());

        let data = vec![0xDD; BLOCK_SIZE * num_blocks];
        let mut progress_calls = 0;
        let result = xmodem.transfer(&data, |current, total| {
            assert_eq!(total, BLOCK_SIZE * num_blocks);
            assert!(current <= total);
            progress_calls += 1;
        });

        assert!(result.is_ok(), "Error: {:?}", result.err());
        assert_eq!(
            progress_calls, num_blocks,
            "Progress should be called once per block"
        );
    }

    #[test]
    fn test_transfer_retransmits_on_nak() {
        // First data block is NAKed once, then ACKed
        let response = vec![control::C, control::NAK, control::ACK, control::ACK];

        let mut port = MockSerial::new(&response);
        let mut xmodem = Xmodem1k::with_config(&mut port, test_config());

        let data = vec![0x55; 50];
        let result = xmodem.transfer(&data, |_, _| {});

        assert!(result.is_ok(), "Error: {:?}", result.err());
        // Block went out twice plus the EOT
        assert_eq!(port.write_buf.len(), 2 * (3 + BLOCK_SIZE + 2) + 1);
    }

    #[test]
    fn test_transfer_fails_after_retries_exhausted() {
        // Device NAKs everything
        let response = vec![control::C, control::NAK, control::NAK, control::NAK];

        let mut port = MockSerial::new(&response);
        let mut xmodem = Xmodem1k::with_config(&mut port, test_config());

        let data = vec![0x55; 50];
        let result = xmodem.transfer(&data, |_, _| {});

        assert!(matches!(result, Err(Error::Xmodem(_))));
    }

    #[test]
    fn test_transfer_aborts_on_cancel() {
        let response = vec![control::C, control::CAN];

        let mut port = MockSerial::new(&response);
        let mut xmodem = Xmodem1k::with_config(&mut port, test_config());

        let data = vec![0x55; 50];
        let result = xmodem.transfer(&data, |_, _| {});

        assert!(matches!(result, Err(Error::Xmodem(_))));
    }

    #[test]
    fn test_transfer_times_out_without_start() {
        // Device never sends 'C'
        let mut port = MockSerial::new(&[]);
        let mut xmodem = Xmodem1k::with_config(&mut port, test_config());

        let data = vec![0x55; 50];
        let result = xmodem.transfer(&data, |_, _| {});

        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
