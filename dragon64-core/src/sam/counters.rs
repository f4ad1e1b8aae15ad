// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Spec: MC6883/SN74LS783 datasheet, VDG address counter section.
// Design:
//   The video address is not a flat counter. It is assembled from a chain
//   of ripple counters: B3_0 holds address bits 3-0 and is clocked once per
//   VDG byte fetch; its bit-3 carry feeds either B4 directly or one of two
//   dividers (X divide-by-2/3); B4's carry feeds the Y divider chain
//   (divide-by-2, -3, or -12 via the 3x4 cascade) before finally stepping
//   B15_5, which holds address bits 15-5. Re-programming the SAM video mode
//   re-wires which counter clocks which, and that wiring alone produces the
//   row-repeat and byte-repeat address ladders of the real hardware.

/// Counter node indices. `GROUND` is the unconnected input.
const GROUND: usize = 0;
const B3_0: usize = 1;
const XDIV2: usize = 2;
const XDIV3: usize = 3;
const B4: usize = 4;
const YDIV2: usize = 5;
const YDIV3: usize = 6;
const YDIV4: usize = 7;
const B15_5: usize = 8;
const NUM_NODES: usize = 9;

/// Which low address bits a horizontal sync pulse zeroes.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum HsClear {
    Clr4,
    Clr3,
    ClrN,
}

/// Per-mode wiring: X divisor, Y divisor, HS clear behaviour.
fn mode_wiring(video_mode: u8) -> (u16, u16, HsClear) {
    match video_mode & 0x07 {
        0 => (1, 12, HsClear::Clr4),
        1 => (3, 3, HsClear::Clr3),
        2 => (1, 3, HsClear::Clr4),
        3 => (2, 2, HsClear::Clr3),
        4 => (1, 2, HsClear::Clr4),
        5 => (1, 1, HsClear::Clr3),
        6 => (1, 1, HsClear::Clr4),
        _ => (1, 1, HsClear::ClrN),
    }
}

#[derive(Clone, Copy)]
struct Counter {
    value: u16,
    output: bool,
    val_mod: u16,
    out_mask: u16,
    input_from: usize,
}

impl Counter {
    const fn new(val_mod: u16, out_mask: u16) -> Self {
        Counter {
            value: 0,
            output: false,
            val_mod,
            out_mask,
            input_from: GROUND,
        }
    }
}

pub struct VideoCounters {
    nodes: [Counter; NUM_NODES],
    hs_clear: HsClear,
    base: u16,
}

impl VideoCounters {
    pub fn new() -> Self {
        let mut nodes = [Counter::new(1, 0); NUM_NODES];
        nodes[B3_0] = Counter::new(16, 0x08);
        nodes[XDIV2] = Counter::new(2, 0x01);
        nodes[XDIV3] = Counter::new(3, 0x02);
        nodes[B4] = Counter::new(2, 0x01);
        nodes[YDIV2] = Counter::new(2, 0x01);
        nodes[YDIV3] = Counter::new(3, 0x02);
        nodes[YDIV4] = Counter::new(4, 0x02);
        nodes[B15_5] = Counter::new(0x0800, 0x0000);
        let mut counters = Self {
            nodes,
            hs_clear: HsClear::Clr4,
            base: 0,
        };
        counters.rewire(0);
        counters
    }

    /// Re-routes the `input_from` graph for a new SAM video mode. Counter
    /// values survive a mode change, as they do in the silicon.
    pub fn rewire(&mut self, video_mode: u8) {
        let (xdiv, ydiv, hs_clear) = mode_wiring(video_mode);
        self.hs_clear = hs_clear;
        self.nodes[XDIV2].input_from = GROUND;
        self.nodes[XDIV3].input_from = GROUND;
        self.nodes[YDIV2].input_from = GROUND;
        self.nodes[YDIV3].input_from = GROUND;
        self.nodes[YDIV4].input_from = GROUND;
        match xdiv {
            2 => {
                self.nodes[XDIV2].input_from = B3_0;
                self.nodes[B4].input_from = XDIV2;
            }
            3 => {
                self.nodes[XDIV3].input_from = B3_0;
                self.nodes[B4].input_from = XDIV3;
            }
            _ => self.nodes[B4].input_from = B3_0,
        }
        match ydiv {
            2 => {
                self.nodes[YDIV2].input_from = B4;
                self.nodes[B15_5].input_from = YDIV2;
            }
            3 => {
                self.nodes[YDIV3].input_from = B4;
                self.nodes[B15_5].input_from = YDIV3;
            }
            12 => {
                self.nodes[YDIV3].input_from = B4;
                self.nodes[YDIV4].input_from = YDIV3;
                self.nodes[B15_5].input_from = YDIV4;
            }
            _ => self.nodes[B15_5].input_from = B4,
        }
    }

    /// Field sync: reload B15_5 from the latched display base and zero the
    /// rest of the chain. No carries propagate out of a reload.
    pub fn reload_base(&mut self, base: u16) {
        self.base = base;
        for node in [B3_0, XDIV2, XDIV3, B4, YDIV2, YDIV3, YDIV4].iter() {
            self.nodes[*node].value = 0;
            self.nodes[*node].output = false;
        }
        self.nodes[B15_5].value = (base >> 5) & 0x07ff;
    }

    /// Horizontal sync: zero the low address bits the current mode says to
    /// (`CLR4` clears B4 and B3_0, `CLR3` only B3_0, `CLRN` nothing). A bit
    /// that falls while being cleared still clocks its downstream counter,
    /// which is exactly how short rows advance the Y dividers.
    pub fn horizontal_sync(&mut self) {
        match self.hs_clear {
            HsClear::Clr4 => {
                self.clear_node(B3_0);
                self.clear_node(B4);
            }
            HsClear::Clr3 => self.clear_node(B3_0),
            HsClear::ClrN => {}
        }
    }

    /// The VDG address currently presented on Z15..Z0.
    pub fn address(&self) -> u16 {
        (self.nodes[B15_5].value << 5) | (self.nodes[B4].value << 4) | self.nodes[B3_0].value
    }

    /// One VDG byte fetch. Returns true when B3_0 wraps, i.e. the fetch
    /// that just happened was the last of a 16-byte block.
    pub fn step(&mut self) -> bool {
        self.clock(B3_0);
        self.nodes[B3_0].value == 0
    }

    fn clock(&mut self, node: usize) {
        let counter = &mut self.nodes[node];
        counter.value = (counter.value + 1) % counter.val_mod;
        let output = counter.value & counter.out_mask != 0;
        let fell = counter.output && !output;
        counter.output = output;
        if fell {
            if let Some(next) = self.sink_of(node) {
                self.clock(next);
            }
        }
    }

    fn clear_node(&mut self, node: usize) {
        let counter = &mut self.nodes[node];
        counter.value = 0;
        let fell = counter.output;
        counter.output = false;
        if fell {
            if let Some(next) = self.sink_of(node) {
                self.clock(next);
            }
        }
    }

    fn sink_of(&self, node: usize) -> Option<usize> {
        self.nodes
            .iter()
            .position(|c| c.input_from == node)
            .filter(|_| node != GROUND)
    }
}

impl Default for VideoCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_row(counters: &mut VideoCounters, n: usize) -> Vec<u16> {
        let mut addresses = Vec::with_capacity(n);
        for _ in 0..n {
            addresses.push(counters.address());
            counters.step();
        }
        addresses
    }

    #[test]
    fn undivided_mode_counts_linearly() {
        let mut counters = VideoCounters::new();
        counters.rewire(7);
        counters.reload_base(0x0400);
        let addresses = fetch_row(&mut counters, 40);
        assert_eq!(0x0400, addresses[0]);
        assert_eq!(0x0410, addresses[16]);
        assert_eq!(0x0420, addresses[32]);
    }

    #[test]
    fn divide_by_three_x_repeats_sixteen_byte_blocks() {
        let mut counters = VideoCounters::new();
        counters.rewire(1);
        counters.reload_base(0x0400);
        let addresses = fetch_row(&mut counters, 48);
        // Three 16-byte blocks at the same base before B4 advances.
        assert_eq!(0x0400, addresses[0]);
        assert_eq!(0x0400, addresses[16]);
        assert_eq!(0x0400, addresses[32]);
        assert_eq!(0x0410, counters.address(), "fourth block starts one up");
    }

    #[test]
    fn divide_by_two_y_advances_base_every_other_row() {
        let mut counters = VideoCounters::new();
        counters.rewire(4); // 32-byte rows, Y divide-by-2
        counters.reload_base(0x0400);
        let row0 = fetch_row(&mut counters, 32);
        counters.horizontal_sync();
        let row1 = fetch_row(&mut counters, 32);
        counters.horizontal_sync();
        let row2 = fetch_row(&mut counters, 32);
        assert_eq!(0x0400, row0[0]);
        assert_eq!(0x0400, row1[0], "row repeated");
        assert_eq!(0x0420, row2[0], "base advanced after two rows");
    }

    #[test]
    fn text_mode_repeats_each_row_twelve_times() {
        let mut counters = VideoCounters::new();
        counters.rewire(0);
        counters.reload_base(0x0400);
        for row in 0..12 {
            let addresses = fetch_row(&mut counters, 32);
            assert_eq!(0x0400, addresses[0], "row {} re-reads the base", row);
            counters.horizontal_sync();
        }
        let next = fetch_row(&mut counters, 1);
        assert_eq!(0x0420, next[0], "thirteenth row is the next line of text");
    }

    #[test]
    fn field_sync_reloads_base_and_survives_mode_change() {
        let mut counters = VideoCounters::new();
        counters.rewire(6);
        counters.reload_base(0x0400);
        fetch_row(&mut counters, 100);
        counters.rewire(1);
        counters.reload_base(0x1e00);
        assert_eq!(0x1e00, counters.address());
    }
}
