//! Linux hardware binding: spidev for the register port, the GPIO
//! character device for the reset, interrupt and network-status lines.

use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{CdevPin, SpidevDevice};

use crate::domain::{HardwareConfig, MostError, MostResult};

use super::spi::{GpioLines, SpiTransport};

const CONSUMER: &str = "most-link";
const SPI_CLOCK_HZ: u32 = 1_000_000;

pub type LinuxTransport = SpiTransport<SpidevDevice>;
pub type LinuxLines = GpioLines<CdevPin, CdevPin, CdevPin>;

/// Open the SPI device and request the three control lines.
///
/// The reset line starts high so the chip is not held in reset until the
/// bring-up sequence asks for it.
pub fn open(config: &HardwareConfig) -> MostResult<(LinuxTransport, LinuxLines)> {
    let mut spi = SpidevDevice::open(&config.spi_device).map_err(|e| {
        MostError::Transport(format!("Failed to open {}: {e:?}", config.spi_device.display()))
    })?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(SPI_CLOCK_HZ)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.configure(&options)
        .map_err(|e| MostError::Transport(format!("Failed to configure SPI: {e:?}")))?;

    let mut chip = Chip::new(&config.gpio_chip).map_err(|e| {
        MostError::Transport(format!("Failed to open {}: {e:?}", config.gpio_chip.display()))
    })?;

    let reset = request_line(&mut chip, config.reset_line, LineRequestFlags::OUTPUT, 1)?;
    let interrupt = request_line(&mut chip, config.interrupt_line, LineRequestFlags::INPUT, 0)?;
    let network_status =
        request_line(&mut chip, config.network_status_line, LineRequestFlags::INPUT, 0)?;

    log::info!(
        "Opened {} and {} (reset {}, interrupt {}, network status {})",
        config.spi_device.display(),
        config.gpio_chip.display(),
        config.reset_line,
        config.interrupt_line,
        config.network_status_line
    );
    Ok((
        SpiTransport::new(spi),
        GpioLines::new(reset, interrupt, network_status),
    ))
}

fn request_line(
    chip: &mut Chip,
    offset: u32,
    flags: LineRequestFlags,
    default: u8,
) -> MostResult<CdevPin> {
    let handle = chip
        .get_line(offset)
        .and_then(|line| line.request(flags, default, CONSUMER))
        .map_err(|e| MostError::Transport(format!("Failed to request GPIO line {offset}: {e:?}")))?;
    CdevPin::new(handle)
        .map_err(|e| MostError::Transport(format!("Failed to wrap GPIO line {offset}: {e:?}")))
}
