//! HD44780 parallel bus transport.
//!
//! Moves raw bytes between the host and an HD44780-compatible controller over 4 or 8 GPIO data
//! lines plus the E, RS and R/W control lines. The command set itself (clearing the display,
//! moving the cursor and so on) is built on top of the [HD44780Bus] trait by the display driver.
mod gpio;

use crate::GpioResult;
pub use gpio::*;
use log::debug;
use std::fmt::{Debug, Display, Formatter};

/// Byte transport to an HD44780 controller.
pub trait HD44780Bus: Debug {
    /// Selects the instruction register (`true`) or the data register (`false`).
    ///
    /// The selection stays until changed.
    fn set_command_mode(&mut self, command: bool) -> GpioResult<()>;

    /// Writes the bytes to the selected register.
    ///
    /// Returns the amount of bytes written, which is always `data.len()`.
    fn write(&mut self, data: &[u8]) -> GpioResult<usize>;

    /// Writes the low nibble of every element on its own, followed by one more enable pulse.
    ///
    /// Used for the initialization sequence, where the controller expects single nibbles with no
    /// paired low half.
    fn write_nibble(&mut self, data: &[u8]) -> GpioResult<usize>;

    /// Reads `buffer.len()` bytes from the selected register.
    ///
    /// The data lines are left as inputs afterwards.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the buffer is empty.
    fn read(&mut self, buffer: &mut [u8]) -> GpioResult<usize>;
}

/// A single unit presented on the data lines for one enable pulse.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transfer {
    /// Whole byte on an 8-line bus.
    Byte(u8),
    /// Bits 7-4 of a byte on a 4-line bus, shifted down.
    HighNibble(u8),
    /// Bits 3-0 of a byte on a 4-line bus.
    LowNibble(u8),
    /// A single nibble sent by [HD44780Bus::write_nibble].
    Nibble(u8),
}

impl Transfer {
    /// Gets the value presented on the data lines.
    pub fn value(self) -> u8 {
        match self {
            Transfer::Byte(value) => value,
            Transfer::HighNibble(value) | Transfer::LowNibble(value) | Transfer::Nibble(value) => {
                value & 0x0F
            }
        }
    }
}

impl Display for Transfer {
    /// Formats the transfer as groups of 4 bits, MSb first.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Transfer::Byte(value) => write!(f, "{:04b} {:04b}", value >> 4, value & 0x0F),
            _ => write!(f, "{:04b}", self.value()),
        }
    }
}

/// Gets notified about every [Transfer] before it is put on the bus.
///
/// Observers only watch, they cannot change what is sent.
pub trait TransferObserver {
    fn observe(&mut self, transfer: Transfer);
}

impl<F: FnMut(Transfer)> TransferObserver for F {
    fn observe(&mut self, transfer: Transfer) {
        self(transfer)
    }
}

/// Logs every transfer as its bit pattern.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogObserver;

impl TransferObserver for LogObserver {
    fn observe(&mut self, transfer: Transfer) {
        let kind = match transfer {
            Transfer::Byte(_) => "byte",
            Transfer::HighNibble(_) => "high nibble",
            Transfer::LowNibble(_) => "low nibble",
            Transfer::Nibble(_) => "nibble",
        };
        debug!("{}: {}", kind, transfer);
    }
}
