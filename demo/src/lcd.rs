//! Just enough of the HD44780 instruction set to bring a display up and check the wiring.
use lcdbus_gpio::GpioResult;
use lcdbus_gpio::bus::LineWidth;
use lcdbus_gpio::delay::Delay;
use lcdbus_gpio::lcd::hd44780::HD44780Bus;
use log::debug;
use std::time::Duration;

const CLEAR_DISPLAY: u8 = 0b0000_0001;
const ENTRY_MODE_INCREMENT: u8 = 0b0000_0110;
const DISPLAY_ON: u8 = 0b0000_1100;
const DISPLAY_OFF: u8 = 0b0000_1000;
const FUNCTION_SET_2_LINES: u8 = 0b0010_1000;
const FUNCTION_SET_8_BIT: u8 = 0b0001_0000;
const SET_DDRAM_ADDRESS: u8 = 0b1000_0000;

/// The first function set takes up to 4.1 ms.
const FIRST_SYNC_TIME: Duration = Duration::from_millis(5);
/// Clearing takes 1.52 ms, far beyond the settle time of a pulse.
const CLEAR_TIME: Duration = Duration::from_millis(2);

/// Sends a single instruction.
pub fn command(bus: &mut dyn HD44780Bus, command: u8) -> GpioResult<()> {
    debug!("Command {:08b}", command);
    bus.set_command_mode(true)?;
    bus.write(&[command])?;
    Ok(())
}

/// Runs the initialization by instruction sequence and leaves the display on and empty.
///
/// `delay` times the waits between instructions that outlast the bus settle time.
pub fn init(bus: &mut dyn HD44780Bus, width: LineWidth, delay: &mut dyn Delay) -> GpioResult<()> {
    bus.set_command_mode(true)?;

    let function_set = match width {
        LineWidth::Four => {
            // Each write carries two nibbles. The 0b0000 ahead of the first 0b0011 and of the
            // final 0b0010 reaches the controller while it still reads 8 lines, as an instruction
            // the rest of the sequence overrides.
            bus.write(&[0b0000_0011])?;
            delay.delay(FIRST_SYNC_TIME);
            bus.write(&[0b0011_0011])?;
            // Switches to 4 bits, every instruction after this is aligned
            bus.write(&[0b0000_0010])?;
            FUNCTION_SET_2_LINES
        }
        LineWidth::Eight => {
            bus.write(&[0b0011_0000])?;
            delay.delay(FIRST_SYNC_TIME);
            bus.write(&[0b0011_0000, 0b0011_0000])?;
            FUNCTION_SET_2_LINES | FUNCTION_SET_8_BIT
        }
    };

    command(bus, function_set)?;
    command(bus, DISPLAY_OFF)?;
    command(bus, CLEAR_DISPLAY)?;
    delay.delay(CLEAR_TIME);
    command(bus, ENTRY_MODE_INCREMENT)?;
    command(bus, DISPLAY_ON)?;
    Ok(())
}

/// Writes the text to display RAM starting at `address`.
pub fn write_text(bus: &mut dyn HD44780Bus, address: u8, text: &[u8]) -> GpioResult<()> {
    command(bus, SET_DDRAM_ADDRESS | (address & 0x7F))?;
    bus.set_command_mode(false)?;
    bus.write(text)?;
    Ok(())
}

/// Reads `len` bytes of display RAM starting at `address`.
pub fn read_text(bus: &mut dyn HD44780Bus, address: u8, len: usize) -> GpioResult<Vec<u8>> {
    command(bus, SET_DDRAM_ADDRESS | (address & 0x7F))?;
    bus.set_command_mode(false)?;
    let mut buffer = vec![0u8; len];
    bus.read(&mut buffer)?;
    Ok(buffer)
}
