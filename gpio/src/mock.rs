//! In-memory GPIO lines for testing drivers without hardware.
//!
//! A [MockChip] hands out [MockLine]s and a [MockDelay] that all record into one shared history.
//! Lines mirror the level last written to them. Optionally a simulated display can be attached,
//! which latches the data lines on every enable rising edge while they are outputs and plays the
//! latched values back, oldest first, on rising edges while they are inputs. With a data register
//! line set, only units sent while it is high are kept, and reads with it low return zero.
use crate::delay::Delay;
use crate::{GpioDirection, GpioDriver, GpioError, GpioLine, GpioResult};
use bitvec::vec::BitVec;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use std::time::Duration;

/// A single recorded interaction with the mock chip.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MockEvent {
    Direction { line: usize, direction: GpioDirection },
    Write { line: usize, value: bool },
    Read { line: usize, value: bool },
    Delay(Duration),
}

#[derive(Debug)]
struct AttachedDisplay {
    enable: usize,
    data: Vec<usize>,
    data_register: Option<usize>,
    memory: VecDeque<u8>,
}

#[derive(Debug)]
struct MockState {
    levels: Vec<bool>,
    directions: Vec<GpioDirection>,
    used_lines: BitVec,
    failing_lines: BitVec,
    history: Vec<MockEvent>,
    display: Option<AttachedDisplay>,
}

impl MockState {
    fn bus_value(&self, lines: &[usize]) -> u8 {
        lines
            .iter()
            .enumerate()
            .filter(|&(_, &line)| self.levels[line])
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }

    fn on_write(&mut self, line: usize, value: bool) {
        let rising = value && !self.levels[line];
        self.levels[line] = value;

        let Some(display) = &self.display else {
            return;
        };
        if !rising || display.enable != line {
            return;
        }

        let data = display.data.clone();
        let selected = display.data_register.is_none_or(|rs| self.levels[rs]);
        let writing = data
            .iter()
            .all(|&l| self.directions[l] == GpioDirection::Output);

        if writing {
            let value = self.bus_value(&data);
            if let Some(display) = self.display.as_mut().filter(|_| selected) {
                display.memory.push_back(value);
            }
        } else {
            let value = match self.display.as_mut() {
                Some(display) if selected => display.memory.pop_front(),
                // Instruction register reads report an idle controller at address 0
                _ => Some(0),
            };
            if let Some(value) = value {
                for (i, &l) in data.iter().enumerate() {
                    self.levels[l] = value & (1 << i) != 0;
                }
            }
        }
    }
}

/// A fake GPIO chip with a fixed number of lines, all initially low outputs.
#[derive(Clone)]
pub struct MockChip {
    state: Rc<RefCell<MockState>>,
}

impl MockChip {
    pub fn new(count: usize) -> Self {
        MockChip {
            state: Rc::new(RefCell::new(MockState {
                levels: vec![false; count],
                directions: vec![GpioDirection::Output; count],
                used_lines: BitVec::repeat(false, count),
                failing_lines: BitVec::repeat(false, count),
                history: Vec::new(),
                display: None,
            })),
        }
    }

    /// Creates a delay that records every requested duration instead of sleeping.
    pub fn delay(&self) -> MockDelay {
        MockDelay {
            state: Rc::clone(&self.state),
        }
    }

    /// Attaches a simulated display, see the [module documentation](self).
    ///
    /// `data` lists the data lines LSb first.
    pub fn attach_display(&self, enable: usize, data: &[usize]) {
        self.state.borrow_mut().display = Some(AttachedDisplay {
            enable,
            data: data.to_vec(),
            data_register: None,
            memory: VecDeque::new(),
        });
    }

    /// Makes the attached display only latch and play back while `rs` is high, like display RAM
    /// behind the data register.
    pub fn set_data_register(&self, rs: usize) {
        if let Some(display) = &mut self.state.borrow_mut().display {
            display.data_register = Some(rs);
        }
    }

    /// Queues values the attached display will present on the next reads.
    pub fn preload(&self, values: &[u8]) {
        if let Some(display) = &mut self.state.borrow_mut().display {
            display.memory.extend(values);
        }
    }

    /// Makes every direction change of the given line fail, as a refused kernel request would.
    /// Failed changes leave the direction as it was and are not recorded.
    pub fn fail_direction_changes(&self, line: usize, fail: bool) {
        self.state.borrow_mut().failing_lines.set(line, fail);
    }

    /// Forces the level of a line, as an external device would.
    pub fn set_level(&self, line: usize, value: bool) {
        self.state.borrow_mut().levels[line] = value;
    }

    pub fn level(&self, line: usize) -> bool {
        self.state.borrow().levels[line]
    }

    pub fn direction(&self, line: usize) -> GpioDirection {
        self.state.borrow().directions[line]
    }

    /// Gets the value currently presented on the given lines, LSb first.
    pub fn bus_value(&self, lines: &[usize]) -> u8 {
        self.state.borrow().bus_value(lines)
    }

    pub fn history(&self) -> Vec<MockEvent> {
        self.state.borrow().history.clone()
    }

    pub fn clear_history(&self) {
        self.state.borrow_mut().history.clear();
    }

    /// Gets the amount of line operations (direction changes, writes and reads) recorded.
    pub fn operation_count(&self) -> usize {
        self.state
            .borrow()
            .history
            .iter()
            .filter(|event| !matches!(event, MockEvent::Delay(_)))
            .count()
    }

    /// Gets every direction the given line was switched to, in order.
    pub fn direction_history(&self, line: usize) -> Vec<GpioDirection> {
        self.state
            .borrow()
            .history
            .iter()
            .filter_map(|event| match *event {
                MockEvent::Direction { line: l, direction } if l == line => Some(direction),
                _ => None,
            })
            .collect()
    }

    /// Gets the value presented on `data` at every rising edge of `enable`, in order.
    ///
    /// The history is replayed from the point it was last cleared, so levels set before that
    /// point are not known and are taken as low.
    pub fn latched(&self, enable: usize, data: &[usize]) -> Vec<u8> {
        let state = self.state.borrow();
        let mut levels = vec![false; state.levels.len()];
        let mut latched = Vec::new();
        for event in &state.history {
            if let MockEvent::Write { line, value } = *event {
                if line == enable && value && !levels[line] {
                    latched.push(
                        data.iter()
                            .enumerate()
                            .filter(|&(_, &l)| levels[l])
                            .fold(0u8, |acc, (i, _)| acc | (1 << i)),
                    );
                }
                levels[line] = value;
            }
        }
        latched
    }

    /// Gets the amount of rising edges recorded on the given line.
    pub fn pulse_count(&self, line: usize) -> usize {
        self.latched(line, &[]).len()
    }

    /// Gets the sum of all recorded delays.
    pub fn total_delay(&self) -> Duration {
        self.state
            .borrow()
            .history
            .iter()
            .filter_map(|event| match event {
                MockEvent::Delay(duration) => Some(*duration),
                _ => None,
            })
            .sum()
    }
}

impl Debug for MockChip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockChip({})", self.state.borrow().levels.len())
    }
}

impl GpioDriver for MockChip {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.state.borrow().levels.len())
    }

    fn get_line(&self, index: usize) -> GpioResult<Box<dyn GpioLine + '_>> {
        let mut state = self.state.borrow_mut();

        if index >= state.levels.len() {
            return Err(GpioError::InvalidArgument);
        }

        if state.used_lines[index] {
            return Err(GpioError::AlreadyInUse);
        }

        state.used_lines.set(index, true);

        Ok(Box::new(MockLine {
            state: Rc::clone(&self.state),
            index,
        }))
    }
}

/// A line of a [MockChip].
pub struct MockLine {
    state: Rc<RefCell<MockState>>,
    index: usize,
}

impl Debug for MockLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockLine[{}]", self.index)
    }
}

impl GpioLine for MockLine {
    fn set_direction(&mut self, direction: GpioDirection) -> GpioResult<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_lines[self.index] {
            return Err(GpioError::Other(format!(
                "line {} refused {:?}",
                self.index, direction
            )));
        }
        state.directions[self.index] = direction;
        state.history.push(MockEvent::Direction {
            line: self.index,
            direction,
        });
        Ok(())
    }

    fn direction(&self) -> GpioDirection {
        self.state.borrow().directions[self.index]
    }

    fn write(&mut self, value: bool) -> GpioResult<()> {
        let mut state = self.state.borrow_mut();
        state.history.push(MockEvent::Write {
            line: self.index,
            value,
        });
        state.on_write(self.index, value);
        Ok(())
    }

    fn read(&self) -> GpioResult<bool> {
        let mut state = self.state.borrow_mut();
        let value = state.levels[self.index];
        state.history.push(MockEvent::Read {
            line: self.index,
            value,
        });
        Ok(value)
    }
}

impl Drop for MockLine {
    fn drop(&mut self) {
        self.state.borrow_mut().used_lines.set(self.index, false);
    }
}

/// A [Delay] that records the requested durations into its [MockChip] history.
pub struct MockDelay {
    state: Rc<RefCell<MockState>>,
}

impl Debug for MockDelay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockDelay")
    }
}

impl Delay for MockDelay {
    fn delay(&mut self, duration: Duration) {
        self.state.borrow_mut().history.push(MockEvent::Delay(duration));
    }
}
