//! w600flash CLI - Command-line tool for flashing WinnerMicro W600 chips.
//!
//! ## Features
//!
//! - Upload `.fls` / `.img` firmware images over the serial bootloader
//! - Read and write the device MAC address
//! - Erase the image and secure-boot flash regions
//! - Automatic baud-rate renegotiation for fast uploads
//! - Serial port auto-detection

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use w600flash::{SUPPORTED_BAUDS, W600Flasher};

/// w600flash - A cross-platform tool for flashing WinnerMicro W600 chips.
///
/// Environment variables:
///   W600FLASH_PORT   - Default serial port
///   W600FLASH_BAUD   - Default connection baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "w600flash")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "For more information, visit: https://github.com/w600flash/w600flash")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (first detected port if not specified).
    #[arg(short, long, env = "W600FLASH_PORT")]
    port: Option<String>,

    /// Baud rate for the initial connection.
    #[arg(
        short,
        long,
        default_value_t = 115200,
        value_parser = parse_baud,
        env = "W600FLASH_BAUD"
    )]
    baud: u32,

    /// Print the device MAC address.
    #[arg(long)]
    get_mac: bool,

    /// Set the device MAC address (12 hex digits, colons and spaces allowed).
    #[arg(long, value_name = "MAC", value_parser = parse_mac)]
    set_mac: Option<[u8; 6]>,

    /// Erase the secure-boot and image regions.
    #[arg(short, long)]
    erase: bool,

    /// Upload a firmware image (.fls or .img).
    #[arg(short, long, value_name = "FILE")]
    upload: Option<PathBuf>,

    /// Baud rate for the upload transfer.
    #[arg(long, default_value_t = 1000000, value_parser = parse_baud)]
    upload_baud: u32,

    /// List available serial ports and exit.
    #[arg(long)]
    list_ports: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,
}

/// Parse a baud rate restricted to the bootloader's supported set.
fn parse_baud(s: &str) -> Result<u32, String> {
    let baud: u32 = s.parse().map_err(|e| format!("Invalid baud rate: {e}"))?;
    if SUPPORTED_BAUDS.contains(&baud) {
        Ok(baud)
    } else {
        Err(format!(
            "Unsupported baud rate {baud} (supported: {})",
            SUPPORTED_BAUDS.map(|b| b.to_string()).join(", ")
        ))
    }
}

/// Parse a MAC address: 12 hex digits, with colons and spaces tolerated.
fn parse_mac(s: &str) -> Result<[u8; 6], String> {
    let hex: String = s.chars().filter(|c| *c != ':' && *c != ' ').collect();
    if hex.len() != 12 {
        return Err(format!(
            "Expected 12 hex digits, got {} (e.g. 28:6D:CD:01:02:03)",
            hex.len()
        ));
    }

    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
            .map_err(|e| format!("Invalid hex in MAC address: {e}"))?;
    }
    Ok(mac)
}

/// Format a MAC address for display.
fn format_mac(mac: &[u8; 6]) -> String {
    mac.map(|b| format!("{b:02X}")).join(":")
}

/// Check if progress animations should be used (stderr is a terminal).
fn use_fancy_output() -> bool {
    console::Term::stderr().is_term()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // NO_COLOR and TTY detection (clig.dev best practice)
    if env::var("NO_COLOR").is_ok() || !use_fancy_output() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "w600flash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if cli.list_ports {
        cmd_list_ports();
        return Ok(());
    }

    // Cheap preconditions first, before any device I/O
    if let Some(ref path) = cli.upload {
        if !path.exists() {
            bail!("The specified file does not exist: {}", path.display());
        }
    }

    let port_name = cli.port.clone().unwrap_or_else(w600flash::default_port);
    if !cli.quiet {
        eprintln!(
            "{} Opening device: {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).cyan(),
            cli.baud
        );
    }

    let mut flasher = W600Flasher::open(&port_name, cli.baud)
        .with_context(|| format!("Failed to open {port_name}"))?;

    let result = run(&cli, &mut flasher);
    flasher.close();
    result
}

/// Drive the requested operations over an established session.
fn run(cli: &Cli, flasher: &mut W600Flasher<w600flash::NativePort>) -> Result<()> {
    if !cli.quiet {
        eprintln!("{} Waiting for bootloader...", style("⏳").yellow());
    }
    flasher.connect().context("Bootloader not responding")?;
    if !cli.quiet {
        eprintln!("{} Connected", style("✓").green());
    }

    if let Some(mac) = cli.set_mac {
        if !cli.quiet {
            eprintln!(
                "{} Setting MAC: {}",
                style("🔧").cyan(),
                style(format_mac(&mac)).cyan()
            );
        }
        flasher.set_mac(&mac)?;
    }

    if cli.get_mac {
        match flasher.get_mac()? {
            Some(mac) => println!("MAC: {mac}"),
            None => println!("MAC: unknown"),
        }
    }

    let mut erased = false;
    if cli.erase {
        if !cli.quiet {
            eprintln!("{} Erasing secboot", style("🗑").red());
        }
        if !flasher.erase_secboot()? {
            bail!("Erasing secboot failed");
        }

        if !cli.quiet {
            eprintln!("{} Erasing image", style("🗑").red());
        }
        // Best effort: the secboot erase above already proved the device is
        // back in ROM boot, a sluggish prompt here is not fatal
        flasher.erase_image()?;
        flasher.wait_for_boot(Duration::from_secs(5))?;
        erased = true;
    }

    if let Some(ref path) = cli.upload {
        let plan = flasher.plan_upload(path, cli.upload_baud, erased)?;

        if !cli.quiet {
            eprintln!(
                "{} Uploading {}",
                style("📦").cyan(),
                style(path.display()).cyan()
            );
        }

        let pb = if cli.quiet || !use_fancy_output() {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(0);
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                         {bytes}/{total_bytes}",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb
        };

        let reply = flasher.upload(&plan, |sent, total| {
            pb.set_length(total as u64);
            pb.set_position(sent as u64);
        })?;
        pb.finish();

        if !reply.is_empty() {
            println!("{reply}");
        }
        if !cli.quiet {
            eprintln!(
                "\n{} Reset board to run user code...",
                style("🎉").green().bold()
            );
        }
    }

    Ok(())
}

/// List available serial ports.
fn cmd_list_ports() {
    let ports = w600flash::discover_ports();

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No ports found").dim());
        return;
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }
}
