//! # Ink Frame Application Entry Point
//!
//! This binary wires the refresh loop to real collaborators: sysfs identity,
//! the system connectivity probe, the HTTP image source, and a panel.
//! It supports both production mode (e-paper panel) and development mode
//! (character preview on stdout).
//!
//! ```text
//! ink-frame [--stdout] [--config <path>] [--once]
//! ```

// Test modules
#[cfg(test)]
mod tests;

use anyhow::Context;
use ink_frame_lib::config::Config;
use ink_frame_lib::connectivity::{CredentialStore, RouteTable, SystemConnectivity};
use ink_frame_lib::fetch::HttpImageSource;
use ink_frame_lib::identity::SysfsIdentity;
use ink_frame_lib::panel::{PanelRenderer, TerminalPanel};
use ink_frame_lib::refresh::{RefreshLoop, RefreshSettings};
use std::env;
use std::path::PathBuf;
use tokio::sync::watch;

/// Command line options.
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    /// Development mode: preview frames on stdout instead of the panel
    stdout: bool,
    /// Stop after the first cycle reaches Idle
    once: bool,
    config: Option<PathBuf>,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stdout" => parsed.stdout = true,
            "--once" => parsed.once = true,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("unknown argument {:?}", other),
        }
    }
    Ok(parsed)
}

/// Flip the watch channel on SIGINT or SIGTERM.
async fn forward_shutdown_signals(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => log::info!("Interrupt received"),
                    _ = term.recv() => log::info!("Termination requested"),
                }
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {}", e);
                tokio::signal::ctrl_c().await.ok();
                log::info!("Interrupt received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Interrupt received");
    }

    tx.send(true).ok();
}

/// Build the collaborators and run the loop on `panel` until shutdown.
async fn run_with_panel<P: PanelRenderer>(
    panel: P,
    config: &Config,
    once: bool,
) -> anyhow::Result<()> {
    let identity = SysfsIdentity::new(
        &config.identity.sysfs_root,
        config.identity.interfaces.clone(),
    );
    let credentials = config
        .network
        .credentials_path
        .as_ref()
        .map(CredentialStore::new);
    let routes = config.network.route_table.as_ref().map(RouteTable::new);
    let connectivity = SystemConnectivity::new(credentials, routes);
    let source = HttpImageSource::new(config.server.timeout()).context("HTTP client")?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(forward_shutdown_signals(tx));

    let mut refresh = RefreshLoop::new(
        panel,
        source,
        identity,
        connectivity,
        RefreshSettings::from_config(config),
    );
    refresh.run(rx, once).await;
    Ok(())
}

/// Open the 7.5" panel on the configured GPIO chip and SPI device.
#[cfg(all(target_os = "linux", feature = "hardware"))]
fn open_panel(
    config: &Config,
) -> anyhow::Result<
    ink_frame_lib::epd7in5_v2::Epd7in5V2<
        linux_embedded_hal::SpidevDevice,
        linux_embedded_hal::CdevPin,
        linux_embedded_hal::CdevPin,
        linux_embedded_hal::CdevPin,
        linux_embedded_hal::Delay,
    >,
> {
    use ink_frame_lib::epd7in5_v2::{Epd7in5V2, EPD_HEIGHT, EPD_WIDTH};
    use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
    use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
    use linux_embedded_hal::{CdevPin, Delay, SpidevDevice};

    let hw = &config.display.hardware;
    log::info!(
        "Opening panel: {} (DC {}, RST {}, BUSY {}) on {}",
        hw.gpio_chip,
        hw.dc_pin,
        hw.rst_pin,
        hw.busy_pin,
        hw.spi_device
    );
    if (config.display.width, config.display.height) != (EPD_WIDTH, EPD_HEIGHT) {
        log::warn!(
            "Configured size {}x{} ignored, panel is {}x{}",
            config.display.width,
            config.display.height,
            EPD_WIDTH,
            EPD_HEIGHT
        );
    }

    let mut chip =
        Chip::new(&hw.gpio_chip).with_context(|| format!("open {}", hw.gpio_chip))?;
    let mut output = |pin: u32, label: &str| -> anyhow::Result<CdevPin> {
        let handle = chip
            .get_line(pin)?
            .request(LineRequestFlags::OUTPUT, 0, label)
            .with_context(|| format!("request GPIO {} ({})", pin, label))?;
        Ok(CdevPin::new(handle)?)
    };
    let dc = output(hw.dc_pin, "ink-frame-dc")?;
    let rst = output(hw.rst_pin, "ink-frame-rst")?;
    let busy_handle = chip
        .get_line(hw.busy_pin)?
        .request(LineRequestFlags::INPUT, 0, "ink-frame-busy")
        .with_context(|| format!("request GPIO {} (busy)", hw.busy_pin))?;
    let busy = CdevPin::new(busy_handle)?;

    let mut spi =
        SpidevDevice::open(&hw.spi_device).with_context(|| format!("open {}", hw.spi_device))?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(4_000_000)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.configure(&options).context("configure SPI")?;

    Ok(Epd7in5V2::new(spi, dc, rst, busy, Delay))
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args(env::args().skip(1))?;
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    // Strictly sequential cycles: one thread is all the loop needs
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    // Development mode: character preview for testing without hardware
    if args.stdout {
        let panel = TerminalPanel::new(
            std::io::stdout(),
            config.display.width,
            config.display.height,
        );
        return rt.block_on(run_with_panel(panel, &config, args.once));
    }

    // Production mode: requires SPI access and GPIO permissions
    #[cfg(all(target_os = "linux", feature = "hardware"))]
    return {
        let panel = open_panel(&config)?;
        rt.block_on(run_with_panel(panel, &config, args.once))
    };

    #[cfg(not(all(target_os = "linux", feature = "hardware")))]
    anyhow::bail!(
        "E-paper support not enabled. Rebuild with --features hardware on Linux, or use --stdout."
    );
}
