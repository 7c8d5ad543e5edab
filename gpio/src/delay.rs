use std::fmt::Debug;
use std::thread::sleep;
use std::time::Duration;

/// A blocking delay source.
///
/// Implementations must wait for at least the requested duration before returning.
pub trait Delay: Debug {
    fn delay(&mut self, duration: Duration);

    fn delay_us(&mut self, us: u64) {
        self.delay(Duration::from_micros(us));
    }
}

/// Delay backed by [std::thread::sleep].
#[derive(Copy, Clone, Debug, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay(&mut self, duration: Duration) {
        sleep(duration);
    }
}
