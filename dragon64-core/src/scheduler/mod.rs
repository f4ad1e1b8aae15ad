// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! A tick-ordered event queue, driven by the same `Clock` the SAM's
//! cycle-interleave bookkeeping advances. Events are kept sorted by
//! `at_tick` so the next-due event is always at the front; a handler may
//! requeue itself by returning its next deadline, which is how periodic
//! timers are built.

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::util::Clock;

/// Nominal tick rate: 16 ticks per slow CPU cycle at ~0.895 MHz comes out
/// at the NTSC colour-burst crystal, convenient for scheduling.
pub const TICK_RATE: u64 = 14_318_180;

/// Returning `Some(tick)` re-queues the event at that deadline.
pub type Handler = Box<dyn FnMut() -> Option<u64>>;

struct Event {
    at_tick: u64,
    handler: Handler,
}

pub struct Scheduler {
    clock: Clock,
    events: Vec<Event>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            clock: Clock::new(),
            events: Vec::new(),
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.clock.get()
    }

    pub fn schedule(&mut self, at_tick: u64, handler: Handler) {
        let event = Event { at_tick, handler };
        let pos = self
            .events
            .iter()
            .position(|e| e.at_tick > event.at_tick)
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
    }

    pub fn schedule_after(&mut self, ticks: u64, handler: Handler) {
        let at = self.clock.get() + ticks;
        self.schedule(at, handler);
    }

    /// Advances the clock by `ticks` bus ticks, firing every event whose
    /// `at_tick` has now been reached, in deadline order. A handler that
    /// asks to re-fire inside the same window is pushed past `now` so a
    /// zero-period timer cannot wedge the drain.
    pub fn advance(&mut self, ticks: u64) {
        self.clock.tick_delta(ticks);
        let now = self.clock.get();
        while let Some(event) = self.events.first() {
            if event.at_tick > now {
                break;
            }
            let mut due = self.events.remove(0);
            if let Some(next) = (due.handler)() {
                due.at_tick = next.max(now + 1);
                let pos = self
                    .events
                    .iter()
                    .position(|e| e.at_tick > due.at_tick)
                    .unwrap_or(self.events.len());
                self.events.insert(pos, due);
            }
        }
    }

    pub fn reset(&mut self) {
        self.clock.reset();
        self.events.clear();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn events_fire_in_tick_order_even_when_enqueued_in_reverse() {
        let mut scheduler = Scheduler::new();
        let order = Rc::new(Cell::new(0u32));
        let a = order.clone();
        let b = order.clone();
        scheduler.schedule(1, Box::new(move || {
            a.set(a.get() * 10 + 2);
            None
        }));
        scheduler.schedule(0, Box::new(move || {
            b.set(b.get() * 10 + 1);
            None
        }));
        scheduler.advance(1);
        assert_eq!(12, order.get());
    }

    #[test]
    fn events_beyond_the_advance_window_stay_queued() {
        let mut scheduler = Scheduler::new();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        scheduler.schedule(100, Box::new(move || {
            flag.set(true);
            None
        }));
        scheduler.advance(10);
        assert!(!fired.get());
        scheduler.advance(90);
        assert!(fired.get());
    }

    #[test]
    fn periodic_handler_requeues_itself() {
        let mut scheduler = Scheduler::new();
        let count = Rc::new(Cell::new(0u32));
        let counter = count.clone();
        let mut next = 10u64;
        scheduler.schedule(
            10,
            Box::new(move || {
                counter.set(counter.get() + 1);
                next += 10;
                Some(next)
            }),
        );
        for _ in 0..5 {
            scheduler.advance(10);
        }
        assert_eq!(5, count.get());
    }

    #[test]
    fn reset_discards_pending_events() {
        let mut scheduler = Scheduler::new();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        scheduler.schedule(5, Box::new(move || {
            flag.set(true);
            None
        }));
        scheduler.reset();
        scheduler.advance(10);
        assert!(!fired.get());
        assert_eq!(10, scheduler.current_tick());
    }
}
