//! GpiodDriver implementation for managing GPIO lines using the gpiod library.
use crate::{GpioActiveLevel, GpioBias, GpioDirection, GpioDriver, GpioError, GpioLine, GpioResult};
use bitvec::vec::BitVec;
use log::debug;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::AtomicU8;

/// GpiodDriver is a GPIO driver that uses the Linux GPIO character device to manage lines.
pub struct GpiodDriver {
    chip: gpiod::Chip,
    used_lines: BitVec<AtomicU8>,
}

impl GpiodDriver {
    pub fn new(chip: gpiod::Chip) -> Self {
        let n = chip.num_lines() as usize;
        let bits = BitVec::repeat(false, n);
        Self {
            chip,
            used_lines: bits,
        }
    }

    /// Opens the GPIO chip at the given path, e.g. `/dev/gpiochip0`. Relative paths are taken
    /// from `/dev`.
    pub fn open(path: &str) -> GpioResult<Self> {
        let chip = gpiod::Chip::new(path)?;
        Ok(Self::new(chip))
    }

    /// Claims the line at the given index with a non-default active level or bias.
    ///
    /// See [GpioDriver::get_line].
    pub fn get_line_with(
        &self,
        index: usize,
        active_level: GpioActiveLevel,
        bias: GpioBias,
    ) -> GpioResult<Box<dyn GpioLine + '_>> {
        if index >= self.count()? {
            return Err(GpioError::InvalidArgument);
        }

        if self.used_lines[index] {
            return Err(GpioError::AlreadyInUse);
        }

        let mut line = GpiodLine {
            driver: self,
            line_index: index,
            active_level,
            bias,
            request: None,
            level: false,
        };
        line.set_direction(GpioDirection::Output)?;

        self.used_lines.set_aliased(index, true);

        Ok(Box::new(line))
    }
}

impl Debug for GpiodDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})", self.chip.name())
    }
}

impl GpioDriver for GpiodDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.chip.num_lines() as usize)
    }

    fn get_line(&self, index: usize) -> GpioResult<Box<dyn GpioLine + '_>> {
        self.get_line_with(index, GpioActiveLevel::High, GpioBias::None)
    }
}

impl From<GpioActiveLevel> for gpiod::Active {
    fn from(level: GpioActiveLevel) -> Self {
        match level {
            GpioActiveLevel::High => gpiod::Active::High,
            GpioActiveLevel::Low => gpiod::Active::Low,
        }
    }
}

impl From<GpioBias> for gpiod::Bias {
    fn from(bias: GpioBias) -> Self {
        match bias {
            GpioBias::None => gpiod::Bias::Disable,
            GpioBias::PullUp => gpiod::Bias::PullUp,
            GpioBias::PullDown => gpiod::Bias::PullDown,
        }
    }
}

enum GpiodRequest {
    Input(gpiod::Lines<gpiod::Input>),
    Output(gpiod::Lines<gpiod::Output>),
}

struct GpiodLine<'a> {
    driver: &'a GpiodDriver,
    line_index: usize,
    active_level: GpioActiveLevel,
    bias: GpioBias,
    request: Option<GpiodRequest>,
    /// Last level written, reported back while the line is an output.
    level: bool,
}

impl Debug for GpiodLine<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}[{}][{:?}]",
            self.driver,
            self.line_index,
            self.direction()
        )
    }
}

impl GpioLine for GpiodLine<'_> {
    fn set_direction(&mut self, direction: GpioDirection) -> GpioResult<()> {
        if self.request.is_some() && self.direction() == direction {
            return Ok(());
        }

        // The kernel refuses a second request for a line that is still held
        self.request = None;

        let offsets = [self.line_index as u32];
        self.request = Some(match direction {
            GpioDirection::Input => GpiodRequest::Input(
                self.driver.chip.request_lines(
                    gpiod::Options::input(offsets)
                        .consumer(env!("CARGO_PKG_NAME"))
                        .active(self.active_level.into())
                        .bias(self.bias.into()),
                )?,
            ),
            GpioDirection::Output => {
                let lines = self.driver.chip.request_lines(
                    gpiod::Options::output(offsets)
                        .consumer(env!("CARGO_PKG_NAME"))
                        .active(self.active_level.into())
                        .bias(self.bias.into()),
                )?;
                lines.set_values([self.level])?;
                GpiodRequest::Output(lines)
            }
        });

        debug!("{:?} requested", self);
        Ok(())
    }

    fn direction(&self) -> GpioDirection {
        match self.request {
            Some(GpiodRequest::Input(_)) => GpioDirection::Input,
            _ => GpioDirection::Output,
        }
    }

    fn write(&mut self, value: bool) -> GpioResult<()> {
        match &self.request {
            Some(GpiodRequest::Output(lines)) => {
                lines.set_values([value])?;
                self.level = value;
                Ok(())
            }
            _ => Err(GpioError::NotSupported),
        }
    }

    fn read(&self) -> GpioResult<bool> {
        match &self.request {
            Some(GpiodRequest::Input(lines)) => {
                let values = lines.get_values([false])?;
                Ok(values[0])
            }
            Some(GpiodRequest::Output(_)) => Ok(self.level),
            None => Err(GpioError::NotSupported),
        }
    }
}

impl Drop for GpiodLine<'_> {
    fn drop(&mut self) {
        self.request = None;
        self.driver.used_lines.set_aliased(self.line_index, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_missing_chip_fails() {
        assert!(matches!(
            GpiodDriver::open("/nonexistent/gpiochip0"),
            Err(GpioError::Io(_))
        ));
    }

    #[test]
    fn chip_path_may_be_owned_string() {
        let path = String::from("/nonexistent/gpiochip1");
        assert!(GpiodDriver::open(&path).is_err());
    }
}
