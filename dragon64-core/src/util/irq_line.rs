// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;

/// An OR-aggregated interrupt or stall line (IRQ, FIRQ, NMI, HALT). Any number
/// of sources may assert their own bit; the line reads low while any bit is set.
pub struct IrqLine {
    #[allow(unused)]
    kind: &'static str,
    signal: u8,
}

impl IrqLine {
    pub fn new(kind: &'static str) -> Self {
        Self { kind, signal: 0 }
    }

    pub fn is_low(&self) -> bool {
        self.signal != 0
    }

    pub fn reset(&mut self) {
        self.signal = 0;
    }

    pub fn set_low(&mut self, source: usize, value: bool) {
        self.signal.set_bit(source, value);
    }
}
