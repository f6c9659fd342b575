//! W600 flasher session.
//!
//! This module drives the serial bootloader of WinnerMicro W600/W601 chips:
//! reset-and-handshake, MAC and flash-ID queries, image and secure-boot
//! erase, baud-rate renegotiation, and firmware upload over XMODEM-1K.
//!
//! The flasher is generic over the [`Port`] trait, so the whole session can
//! run against an in-memory transport in tests.
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
//!     if let Some(mac) = flasher.get_mac()? {
//!         println!("MAC: {mac}");
//!     }
//!
//!     let plan = flasher.plan_upload("firmware.fls".as_ref(), 1000000, false)?;
//!     let reply = flasher.upload(&plan, |sent, total| {
//!         println!("{sent}/{total}");
//!     })?;
//!     println!("{reply}");
//!
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::CommandFrame;
use crate::protocol::xmodem::{Xmodem1k, XmodemConfig};
use log::{debug, info, trace, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Baud rates the bootloader supports.
pub const SUPPORTED_BAUDS: [u32; 5] = [115200, 460800, 921600, 1000000, 2000000];

/// Boot prompt the bootloader emits when it is listening for commands.
const BOOT_MARKER: &[u8] = b"CCCC";

/// Size of the rolling window scanned for the boot prompt.
const BOOT_WINDOW: usize = 16;

/// Probe byte sent while waiting for the boot prompt.
const ESC: u8 = 0x1B;

/// Per-read timeout during boot probing.
const PROBE_TIMEOUT: Duration = Duration::from_millis(10);

/// Default timeout for the boot handshake.
const BOOT_TIMEOUT: Duration = Duration::from_secs(3);

/// Extended handshake timeout for a manually triggered bootloader.
const RETRY_BOOT_TIMEOUT: Duration = Duration::from_secs(15);

/// Handshake timeout after an image erase.
const ERASE_IMAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handshake timeout after a secure-boot erase (full region erase is slow).
const ERASE_SECBOOT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for a single ASCII reply line.
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for the final run marker after an upload.
const RUN_MARKER_TIMEOUT: Duration = Duration::from_secs(5);

/// Duration of the RTS reset pulse.
const RESET_PULSE: Duration = Duration::from_millis(100);

/// Maximum attempts for the baud-switch negotiation.
const SET_BAUD_ATTEMPTS: u32 = 3;

/// Text the firmware prints once it starts after a successful upload.
const RUN_MARKER: &[u8] = b"run user code...";

/// Firmware image kind, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Full image including secure-boot, accepted by the ROM bootloader.
    Fls,
    /// Application image, applied by the running firmware's updater.
    Img,
    /// Unrecognized extension; uploaded without mode-specific handling.
    Other,
}

impl ImageKind {
    /// Classify a file by its extension, case-insensitive.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("fls") => Self::Fls,
            Some("img") => Self::Img,
            _ => Self::Other,
        }
    }
}

/// Immutable upload plan, derived once before the transfer begins.
#[derive(Debug, Clone)]
pub struct UploadPlan {
    /// Image file to upload.
    pub path: PathBuf,
    /// Image kind from the file extension.
    pub kind: ImageKind,
    /// Whether the secure-boot region must be erased first.
    pub erase_secboot: bool,
    /// Baud rate to use for the transfer.
    pub target_baud: u32,
}

/// W600 flasher session.
///
/// Owns the port exclusively for the lifetime of the session; all operations
/// are strictly sequential.
pub struct W600Flasher<P: Port> {
    port: P,
    boot_timeout: Duration,
    retry_boot_timeout: Duration,
}

impl<P: Port> W600Flasher<P> {
    /// Create a new flasher session over an opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            boot_timeout: BOOT_TIMEOUT,
            retry_boot_timeout: RETRY_BOOT_TIMEOUT,
        }
    }

    /// Override the handshake timeouts (first attempt, manual-reset retry).
    #[must_use]
    pub fn with_boot_timeouts(mut self, boot: Duration, retry: Duration) -> Self {
        self.boot_timeout = boot;
        self.retry_boot_timeout = retry;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Close the underlying port.
    pub fn close(&mut self) {
        let _ = self.port.close();
    }

    /// Pulse RTS to hard-reset the device.
    pub fn hard_reset(&mut self) -> Result<()> {
        debug!("Hard-resetting device");
        self.port.set_rts(true)?;
        thread::sleep(RESET_PULSE);
        self.port.set_rts(false)?;
        Ok(())
    }

    /// Wait for the bootloader prompt.
    ///
    /// Probes the device with ESC bytes and scans the last [`BOOT_WINDOW`]
    /// received bytes for the `CCCC` marker. Returns `Ok(false)` once
    /// `timeout` elapses without a match; errors only on transport failure.
    pub fn wait_for_boot(&mut self, timeout: Duration) -> Result<bool> {
        self.port.set_timeout(PROBE_TIMEOUT)?;
        self.port.clear_input()?;

        let start = Instant::now();
        let mut window: Vec<u8> = Vec::with_capacity(BOOT_WINDOW + 1);
        let mut byte = [0u8; 1];

        while start.elapsed() < timeout {
            self.port.write_all(&[ESC])?;

            match self.port.read(&mut byte) {
                Ok(1) => {
                    window.push(byte[0]);
                    if window.len() > BOOT_WINDOW {
                        window.remove(0);
                    }
                    if window.ends_with(BOOT_MARKER) {
                        debug!("Boot prompt detected");
                        return Ok(true);
                    }
                },
                Ok(_) => {},
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        trace!("No boot prompt within {timeout:?}");
        Ok(false)
    }

    /// Connect to the bootloader.
    ///
    /// Hard-resets the device and waits for the boot prompt; if the device
    /// does not show up, asks for a manual reset and waits once more with an
    /// extended timeout.
    pub fn connect(&mut self) -> Result<()> {
        info!("Waiting for device on {}...", self.port.name());

        self.hard_reset()?;
        if self.wait_for_boot(self.boot_timeout)? {
            return Ok(());
        }

        info!("Push reset button to enter bootloader...");
        if self.wait_for_boot(self.retry_boot_timeout)? {
            return Ok(());
        }

        Err(Error::DeviceNotFound)
    }

    /// Send a command frame. No reply is awaited.
    pub fn send_command(&mut self, frame: &CommandFrame) -> Result<()> {
        let data = frame.build();
        trace!("Sending command {:?}: {} bytes", frame.command(), data.len());

        self.port.clear_input()?;
        self.port.write_all(&data)?;
        self.port.flush()?;
        Ok(())
    }

    /// Send a query command and read its tagged ASCII reply line.
    ///
    /// A reply that does not carry the expected prefix is reported as
    /// `None` rather than an error; queries are answered only in some boot
    /// modes and callers decide whether "no data" matters.
    fn query_line(&mut self, frame: &CommandFrame, prefix: &str) -> Result<Option<String>> {
        self.port.set_timeout(REPLY_TIMEOUT)?;
        self.send_command(frame)?;

        let raw = self.port.read_until(b"\n", REPLY_TIMEOUT)?;
        let line = String::from_utf8_lossy(&raw).to_uppercase();
        let line = line.trim();

        Ok(line.strip_prefix(prefix).map(|s| s.trim().to_string()))
    }

    /// Query the device MAC address.
    pub fn get_mac(&mut self) -> Result<Option<String>> {
        self.query_line(&CommandFrame::get_mac(), "MAC:")
    }

    /// Query the QSPI flash ID.
    pub fn get_flash_id(&mut self) -> Result<Option<String>> {
        self.query_line(&CommandFrame::get_flash_id(), "FID:")
    }

    /// Set the device MAC address.
    pub fn set_mac(&mut self, mac: &[u8; 6]) -> Result<()> {
        self.port.set_timeout(REPLY_TIMEOUT)?;
        self.send_command(&CommandFrame::set_mac(mac))
    }

    /// Whether the device is in ROM boot mode.
    ///
    /// The flash-ID query is only answered by the mask ROM, so a non-empty
    /// reply identifies the mode.
    pub fn is_in_rom_boot(&mut self) -> Result<bool> {
        Ok(self.get_flash_id()?.is_some())
    }

    /// Erase the image region and wait for the bootloader to come back.
    pub fn erase_image(&mut self) -> Result<bool> {
        self.send_command(&CommandFrame::erase_image())?;
        self.wait_for_boot(ERASE_IMAGE_TIMEOUT)
    }

    /// Erase the secure-boot region.
    ///
    /// The prompt alone is not proof here: the erase counts as successful
    /// only once the device is back in ROM boot and answers a flash-ID query.
    pub fn erase_secboot(&mut self) -> Result<bool> {
        self.send_command(&CommandFrame::erase_secboot())?;
        self.wait_for_boot(ERASE_SECBOOT_TIMEOUT)?;
        self.is_in_rom_boot()
    }

    /// Switch the link to a new baud rate.
    ///
    /// Runs up to [`SET_BAUD_ATTEMPTS`] rounds of: restore the last known
    /// good rate, send the set-baud command, switch the local port, and
    /// handshake. On success the port is left at the new rate; on total
    /// failure it is restored to the original rate exactly.
    pub fn set_baud(&mut self, baud: u32) -> Result<bool> {
        if !SUPPORTED_BAUDS.contains(&baud) {
            return Err(Error::UnsupportedBaud(baud));
        }

        let prev_baud = self.port.baud_rate();
        if baud == prev_baud {
            return Ok(true);
        }

        for attempt in 1..=SET_BAUD_ATTEMPTS {
            debug!("Baud switch to {baud}, attempt {attempt}/{SET_BAUD_ATTEMPTS}");

            self.port.set_baud_rate(prev_baud)?;
            self.send_command(&CommandFrame::set_baud(baud))?;
            self.port.set_baud_rate(baud)?;

            if self.wait_for_boot(self.boot_timeout)? {
                info!("Switched speed to {baud}");
                return Ok(true);
            }
        }

        warn!("Baud switch to {baud} failed, restoring {prev_baud}");
        self.port.set_baud_rate(prev_baud)?;
        Ok(false)
    }

    /// Derive an upload plan from the image path and the current device state.
    ///
    /// `already_erased` marks that the secure-boot region was erased earlier
    /// in this session (an explicit erase request), so `.fls` images skip the
    /// redundant erase. `.img` images are rejected while the device is in ROM
    /// boot; that mode only accepts `.fls` files.
    pub fn plan_upload(
        &mut self,
        path: &Path,
        target_baud: u32,
        already_erased: bool,
    ) -> Result<UploadPlan> {
        if !SUPPORTED_BAUDS.contains(&target_baud) {
            return Err(Error::UnsupportedBaud(target_baud));
        }

        let kind = ImageKind::from_path(path);
        let erase_secboot = match kind {
            ImageKind::Fls => !already_erased,
            ImageKind::Img => {
                if self.is_in_rom_boot()? {
                    return Err(Error::ImageMode(
                        "ROM bootloader only accepts FLS files".into(),
                    ));
                }
                false
            },
            ImageKind::Other => false,
        };

        Ok(UploadPlan {
            path: path.to_path_buf(),
            kind,
            erase_secboot,
            target_baud,
        })
    }

    /// Upload a firmware image per the given plan.
    ///
    /// Returns the text the device printed after the transfer, up to and
    /// including the run marker (or whatever arrived before the timeout).
    ///
    /// The `progress` callback observes `(bytes_sent, total_bytes)` and must
    /// not perform blocking I/O of its own.
    pub fn upload<F>(&mut self, plan: &UploadPlan, mut progress: F) -> Result<String>
    where
        F: FnMut(usize, usize),
    {
        if plan.erase_secboot {
            info!("Erasing secboot");
            if !self.erase_secboot()? {
                return Err(Error::Erase(
                    "erasing secboot failed; try entering ROM boot manually".into(),
                ));
            }
        }

        if plan.target_baud != self.port.baud_rate() {
            if !self.set_baud(plan.target_baud)? {
                warn!("Cannot switch speed, continuing at current rate");
                if !self.wait_for_boot(ERASE_IMAGE_TIMEOUT)? {
                    return Err(Error::Handshake(
                        "could not recover from speed switch failure; \
                         try again, or set the upload baud to 115200"
                            .into(),
                    ));
                }
            }
        }

        let data = fs::read(&plan.path)?;
        info!("Uploading {} ({} bytes)", plan.path.display(), data.len());
        progress(0, data.len());

        // Give the bootloader a moment before the first block
        thread::sleep(Duration::from_millis(200));
        self.port.set_timeout(REPLY_TIMEOUT)?;
        self.port.clear_input()?;

        let config = XmodemConfig::default();
        let mut xmodem = Xmodem1k::with_config(&mut self.port, config);
        xmodem.transfer(&data, &mut progress)?;

        // The chip verifies and boots the image before it prints anything
        thread::sleep(Duration::from_secs(1));
        let reply = self.port.read_until(RUN_MARKER, RUN_MARKER_TIMEOUT)?;
        Ok(String::from_utf8_lossy(&reply).trim().to_string())
    }
}

mod native_impl {
    use super::{Duration, Error, Result, W600Flasher, debug, thread, warn};
    use crate::port::{NativePort, SerialConfig};

    impl W600Flasher<NativePort> {
        /// Create a flasher session by opening a serial port.
        ///
        /// # Arguments
        ///
        /// * `port_name` - Serial port name (e.g., "/dev/ttyUSB0" or "COM3")
        /// * `baud_rate` - Initial baud rate for the handshake
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
            const MAX_OPEN_ATTEMPTS: usize = 3;
            const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

            let mut last_error = None;

            for attempt in 1..=MAX_OPEN_ATTEMPTS {
                let config = SerialConfig::new(port_name, baud_rate);
                match NativePort::open(&config) {
                    Ok(port) => {
                        if attempt > 1 {
                            debug!("Port opened on attempt {attempt}");
                        }
                        return Ok(Self::new(port));
                    },
                    Err(e) => {
                        warn!(
                            "Failed to open port {port_name} (attempt {attempt}/{MAX_OPEN_ATTEMPTS}): {e}"
                        );
                        last_error = Some(e);

                        if attempt < MAX_OPEN_ATTEMPTS {
                            thread::sleep(OPEN_RETRY_DELAY);
                        }
                    },
                }
            }

            Err(last_error.unwrap_or(Error::DeviceNotFound))
        }
    }
}
