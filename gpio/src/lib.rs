pub mod bus;
pub mod delay;
pub mod gpiod;
pub mod lcd;
pub mod mock;

use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("line already in use")]
    AlreadyInUse,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the feature is not supported on this backend")]
    NotSupported,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
    #[error("error: {0}")]
    Other(String),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

pub trait GpioDriver: Debug {
    /// Gets the amount of GPIO lines available.
    fn count(&self) -> GpioResult<usize>;

    /// Claims the GPIO line at the given index.
    ///
    /// The line is released again when the returned handle is dropped.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the index is out of range.
    /// - `GpioError::AlreadyInUse` if the line is already claimed.
    fn get_line(&self, index: usize) -> GpioResult<Box<dyn GpioLine + '_>>;
}

/// Direction of a GPIO line.
///
/// Lines start as outputs once claimed by a bus.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioDirection {
    Input,
    #[default] Output,
}

/// Specifies the active level of the GPIO line.
///
/// By default, the active level is high.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioActiveLevel {
    #[default] High,
    Low,
}

/// Specifies the bias of the GPIO line.
///
/// Pull-ups are useful on data lines that are read back from an open-drain device.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioBias {
    #[default] None,
    PullUp,
    PullDown,
}

/// A single GPIO line that can be switched between input and output.
///
/// This is the whole hardware surface the LCD bus depends on.
pub trait GpioLine: Debug {
    /// Changes the direction of the line.
    fn set_direction(&mut self, direction: GpioDirection) -> GpioResult<()>;

    /// Gets the current direction of the line.
    fn direction(&self) -> GpioDirection;

    /// Drives the line to the given level. The line must be an output.
    fn write(&mut self, value: bool) -> GpioResult<()>;

    /// Reads the current level of the line.
    fn read(&self) -> GpioResult<bool>;

    fn set_as_input(&mut self) -> GpioResult<()> {
        self.set_direction(GpioDirection::Input)
    }

    fn set_as_output(&mut self) -> GpioResult<()> {
        self.set_direction(GpioDirection::Output)
    }

    fn set_high(&mut self) -> GpioResult<()> {
        self.write(true)
    }

    fn set_low(&mut self) -> GpioResult<()> {
        self.write(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_kind() {
        let err: GpioError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(err, GpioError::Io(std::io::ErrorKind::PermissionDenied));
    }
}
