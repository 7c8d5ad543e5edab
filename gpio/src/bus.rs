//! Parallel data buses made of individual GPIO lines.
use crate::{GpioDirection, GpioError, GpioLine, GpioResult};
use log::debug;

/// Amount of data lines of a parallel bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineWidth {
    Four,
    Eight,
}

impl LineWidth {
    pub fn line_count(self) -> usize {
        match self {
            LineWidth::Four => 4,
            LineWidth::Eight => 8,
        }
    }

    /// Gets the width matching the given amount of lines, if there is one.
    pub fn from_line_count(count: usize) -> Option<Self> {
        match count {
            4 => Some(LineWidth::Four),
            8 => Some(LineWidth::Eight),
            _ => None,
        }
    }
}

/// Data lines of a parallel bus, line 0 being the least significant bit.
#[derive(Debug)]
pub enum DataLines<'a> {
    Four([Box<dyn GpioLine + 'a>; 4]),
    Eight([Box<dyn GpioLine + 'a>; 8]),
}

impl<'a> DataLines<'a> {
    /// Creates the data lines from a list, checking it against the requested width.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the amount of lines does not match `width`.
    pub fn new(lines: Vec<Box<dyn GpioLine + 'a>>, width: LineWidth) -> GpioResult<Self> {
        match width {
            LineWidth::Four => lines.try_into().map(DataLines::Four),
            LineWidth::Eight => lines.try_into().map(DataLines::Eight),
        }
        .map_err(|_| GpioError::InvalidArgument)
    }

    pub fn width(&self) -> LineWidth {
        match self {
            DataLines::Four(_) => LineWidth::Four,
            DataLines::Eight(_) => LineWidth::Eight,
        }
    }

    fn lines(&self) -> &[Box<dyn GpioLine + 'a>] {
        match self {
            DataLines::Four(lines) => lines.as_slice(),
            DataLines::Eight(lines) => lines.as_slice(),
        }
    }

    fn lines_mut(&mut self) -> &mut [Box<dyn GpioLine + 'a>] {
        match self {
            DataLines::Four(lines) => lines.as_mut_slice(),
            DataLines::Eight(lines) => lines.as_mut_slice(),
        }
    }

    /// Switches every data line to the given direction.
    pub fn set_direction(&mut self, direction: GpioDirection) -> GpioResult<()> {
        debug!("Switching {:?} data bus to {:?}", self.width(), direction);
        for line in self.lines_mut() {
            line.set_direction(direction)?;
        }
        Ok(())
    }

    /// Presents the value on the lines, LSb first.
    ///
    /// On a 4-line bus only the low nibble is presented.
    pub fn write_value(&mut self, value: u8) -> GpioResult<()> {
        for (i, line) in self.lines_mut().iter_mut().enumerate() {
            line.write(value & (1 << i) != 0)?;
        }
        Ok(())
    }

    /// Samples the lines into a value, LSb first.
    pub fn read_value(&self) -> GpioResult<u8> {
        let mut value = 0u8;
        for (i, line) in self.lines().iter().enumerate() {
            if line.read()? {
                value |= 1 << i;
            }
        }
        Ok(value)
    }
}
