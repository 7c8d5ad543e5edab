mod config;
mod lcd;

use crate::config::Config;
use dotenv::dotenv;
use lcdbus_gpio::delay::StdDelay;
use lcdbus_gpio::gpiod::GpiodDriver;
use lcdbus_gpio::lcd::hd44780::{GpioHD44780Bus, LogObserver};
use lcdbus_gpio::{GpioActiveLevel, GpioBias, GpioDriver};
use log::{debug, info, warn};
use std::thread::sleep;
use std::time::Duration;
use sysinfo::System;

const GREETING: &[u8] = b"Hello, HD44780!";

fn main() -> eyre::Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    const UNKNOWN_STR: &str = "???";

    info!(
        "Hello, {}!",
        System::name().as_deref().unwrap_or(UNKNOWN_STR)
    );
    info!(
        "Hostname {}, kernel ver {}",
        System::host_name().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
    );

    let config = Config::load()?;
    let width = config.line_width()?;

    info!(
        "LCD @ {}, E: {}, RS: {}, RW: {}, Data: {:?} ({:?})",
        config.chip, config.pin_e, config.pin_rs, config.pin_rw, config.pins_data, width
    );

    debug!("Initializing GPIO driver...");
    let gpio = GpiodDriver::open(&config.chip)?;
    debug!("{:?} initialized.", gpio);

    let data_bias = if config.data_pull_up {
        GpioBias::PullUp
    } else {
        GpioBias::None
    };
    let data_lines = config
        .pins_data
        .iter()
        .map(|&index| gpio.get_line_with(index, GpioActiveLevel::High, data_bias))
        .collect::<Result<Vec<_>, _>>()?;

    debug!("Initializing LCD bus...");
    let mut bus = GpioHD44780Bus::new(
        gpio.get_line(config.pin_e)?,
        gpio.get_line(config.pin_rs)?,
        gpio.get_line(config.pin_rw)?,
        data_lines,
        width,
        StdDelay,
    )?
    .with_observer(LogObserver);
    debug!("{:?} initialized.", bus);

    // The controller needs 40 ms after power reaches 2.7 V
    sleep(Duration::from_millis(50));
    lcd::init(&mut bus, width, &mut StdDelay)?;
    info!("Display initialized.");

    lcd::write_text(&mut bus, 0x00, GREETING)?;

    let read_back = lcd::read_text(&mut bus, 0x00, GREETING.len())?;
    if read_back == GREETING {
        info!("Read back {:?}, wiring looks fine.", String::from_utf8_lossy(&read_back));
    } else {
        warn!(
            "Read back {:?} instead of {:?}, check the data and R/W lines.",
            String::from_utf8_lossy(&read_back),
            String::from_utf8_lossy(GREETING)
        );
    }

    Ok(())
}
