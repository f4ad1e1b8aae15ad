// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use core::cell::Cell;

/// The scheduler's monotonic tick counter. One slow SAM cycle is 16 ticks
/// (see `sam::TICKS_PER_SLOW_CYCLE`), giving sub-cycle resolution for event
/// scheduling without floating point.
pub struct Clock {
    counter: Cell<u64>,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            counter: Cell::new(0),
        }
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.counter.get()
    }

    pub fn reset(&self) {
        self.counter.set(0);
    }

    #[inline]
    pub fn tick_delta(&self, delta: u64) {
        self.counter.set(self.counter.get().wrapping_add(delta));
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
