// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Spec: MC6801/6803 datasheet (Motorola).
// Design:
//   The MC-10's CPU. Unlike the 6809 the MC-10 has no SAM between CPU and
//   memory, so `Bus` is wired straight to the machine's flat decode. The
//   register file is the 6800 set plus the 6803's 16-bit D column (SUBD,
//   ADDD, LDD, STD, LSRD, ASLD). Decode mirrors the 6809 core's column
//   style: the $80-$FF block is two accumulator stripes with the operand
//   mode in bits 4-5.

use bit_field::BitField;

use super::bus::Bus;

pub mod cc {
    pub const CARRY: usize = 0;
    pub const OVERFLOW: usize = 1;
    pub const ZERO: usize = 2;
    pub const NEGATIVE: usize = 3;
    pub const IRQ_MASK: usize = 4;
    pub const HALF_CARRY: usize = 5;
}

#[derive(Clone, Copy, PartialEq)]
enum AddrMode {
    Direct,
    Indexed,
    Extended,
}

#[derive(Default, Clone)]
pub struct Regs6803 {
    pub a: u8,
    pub b: u8,
    pub x: u16,
    pub sp: u16,
    pub pc: u16,
    pub cc: u8,
}

impl Regs6803 {
    pub fn d(&self) -> u16 {
        ((self.a as u16) << 8) | self.b as u16
    }

    pub fn set_d(&mut self, value: u16) {
        self.a = (value >> 8) as u8;
        self.b = value as u8;
    }

    pub fn cc_bit(&self, bit: usize) -> bool {
        self.cc.get_bit(bit)
    }

    pub fn set_cc_bit(&mut self, bit: usize, value: bool) {
        self.cc.set_bit(bit, value);
    }
}

pub struct Mc6803 {
    pub regs: Regs6803,
    irq_pending: bool,
    waiting: bool,
    running: bool,
}

impl Mc6803 {
    pub fn new() -> Self {
        Self {
            regs: Regs6803::default(),
            irq_pending: false,
            waiting: false,
            running: true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn assert_irq(&mut self) {
        self.irq_pending = true;
    }

    pub fn reset(&mut self, bus: &mut dyn Bus) {
        self.regs = Regs6803::default();
        self.regs.set_cc_bit(cc::IRQ_MASK, true);
        self.irq_pending = false;
        self.waiting = false;
        self.running = true;
        let hi = bus.read_cycle(0xfffe);
        let lo = bus.read_cycle(0xffff);
        self.regs.pc = ((hi as u16) << 8) | lo as u16;
    }

    pub fn run(&mut self, bus: &mut dyn Bus) {
        while self.running {
            self.step(bus);
        }
    }

    pub fn step(&mut self, bus: &mut dyn Bus) -> u32 {
        if self.irq_pending && !self.regs.cc_bit(cc::IRQ_MASK) {
            self.irq_pending = false;
            if !self.waiting {
                self.push_context(bus);
            }
            self.waiting = false;
            self.regs.set_cc_bit(cc::IRQ_MASK, true);
            let hi = bus.read_cycle(0xfff8);
            let lo = bus.read_cycle(0xfff9);
            self.regs.pc = ((hi as u16) << 8) | lo as u16;
            return 12;
        }
        if self.waiting {
            return 1;
        }
        self.execute_one(bus)
    }

    // -- Fetch and stack

    fn fetch_byte(&mut self, bus: &mut dyn Bus) -> u8 {
        let v = bus.read_cycle(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        v
    }

    fn fetch_word(&mut self, bus: &mut dyn Bus) -> u16 {
        let hi = self.fetch_byte(bus);
        let lo = self.fetch_byte(bus);
        ((hi as u16) << 8) | lo as u16
    }

    fn push_byte(&mut self, bus: &mut dyn Bus, v: u8) {
        bus.write_cycle(self.regs.sp, v);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    fn pull_byte(&mut self, bus: &mut dyn Bus) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        bus.read_cycle(self.regs.sp)
    }

    fn push_word(&mut self, bus: &mut dyn Bus, v: u16) {
        self.push_byte(bus, v as u8);
        self.push_byte(bus, (v >> 8) as u8);
    }

    fn pull_word(&mut self, bus: &mut dyn Bus) -> u16 {
        let hi = self.pull_byte(bus);
        let lo = self.pull_byte(bus);
        ((hi as u16) << 8) | lo as u16
    }

    fn push_context(&mut self, bus: &mut dyn Bus) {
        let pc = self.regs.pc;
        self.push_word(bus, pc);
        let x = self.regs.x;
        self.push_word(bus, x);
        self.push_byte(bus, self.regs.a);
        self.push_byte(bus, self.regs.b);
        self.push_byte(bus, self.regs.cc);
    }

    // -- Effective addresses

    fn ea(&mut self, bus: &mut dyn Bus, mode: AddrMode) -> u16 {
        match mode {
            AddrMode::Direct => self.fetch_byte(bus) as u16,
            AddrMode::Indexed => {
                let offset = self.fetch_byte(bus);
                self.regs.x.wrapping_add(offset as u16)
            }
            AddrMode::Extended => self.fetch_word(bus),
        }
    }

    // -- Condition codes

    fn set_nz(&mut self, v: u8) {
        self.regs.set_cc_bit(cc::ZERO, v == 0);
        self.regs.set_cc_bit(cc::NEGATIVE, v & 0x80 != 0);
    }

    fn set_nz16(&mut self, v: u16) {
        self.regs.set_cc_bit(cc::ZERO, v == 0);
        self.regs.set_cc_bit(cc::NEGATIVE, v & 0x8000 != 0);
    }

    fn flags_load(&mut self, v: u8) {
        self.set_nz(v);
        self.regs.set_cc_bit(cc::OVERFLOW, false);
    }

    fn flags_load16(&mut self, v: u16) {
        self.set_nz16(v);
        self.regs.set_cc_bit(cc::OVERFLOW, false);
    }

    fn alu_add(&mut self, a: u8, b: u8, carry_in: bool) -> u8 {
        let c = carry_in as u16;
        let full = a as u16 + b as u16 + c;
        let half = (a & 0x0f) + (b & 0x0f) + c as u8;
        let result = full as u8;
        self.regs.set_cc_bit(cc::CARRY, full > 0xff);
        self.regs.set_cc_bit(cc::HALF_CARRY, half > 0x0f);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (a ^ result) & (b ^ result) & 0x80 != 0);
        self.set_nz(result);
        result
    }

    fn alu_sub(&mut self, a: u8, b: u8, borrow_in: bool) -> u8 {
        let full = a as i16 - b as i16 - borrow_in as i16;
        let result = full as u8;
        self.regs.set_cc_bit(cc::CARRY, full < 0);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (a ^ b) & (a ^ result) & 0x80 != 0);
        self.set_nz(result);
        result
    }

    fn alu_add16(&mut self, a: u16, b: u16) -> u16 {
        let full = a as u32 + b as u32;
        let result = full as u16;
        self.regs.set_cc_bit(cc::CARRY, full > 0xffff);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (a ^ result) & (b ^ result) & 0x8000 != 0);
        self.set_nz16(result);
        result
    }

    fn alu_sub16(&mut self, a: u16, b: u16) -> u16 {
        let full = a as i32 - b as i32;
        let result = full as u16;
        self.regs.set_cc_bit(cc::CARRY, full < 0);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (a ^ b) & (a ^ result) & 0x8000 != 0);
        self.set_nz16(result);
        result
    }

    // -- Read-modify-write micro-ops, shared by the inherent and memory
    // forms.

    fn rmw_op(&mut self, op_col: u8, v: u8) -> u8 {
        match op_col {
            0x00 => self.alu_sub(0, v, false), // NEG
            0x03 => {
                let r = !v;
                self.regs.set_cc_bit(cc::CARRY, true);
                self.regs.set_cc_bit(cc::OVERFLOW, false);
                self.set_nz(r);
                r
            } // COM
            0x04 => {
                self.regs.set_cc_bit(cc::CARRY, v & 0x01 != 0);
                let r = v >> 1;
                self.flags_shift(r);
                r
            } // LSR
            0x06 => {
                let cin = (self.regs.cc_bit(cc::CARRY) as u8) << 7;
                self.regs.set_cc_bit(cc::CARRY, v & 0x01 != 0);
                let r = (v >> 1) | cin;
                self.flags_shift(r);
                r
            } // ROR
            0x07 => {
                self.regs.set_cc_bit(cc::CARRY, v & 0x01 != 0);
                let r = (v >> 1) | (v & 0x80);
                self.flags_shift(r);
                r
            } // ASR
            0x08 => {
                self.regs.set_cc_bit(cc::CARRY, v & 0x80 != 0);
                let r = v << 1;
                self.flags_shift(r);
                r
            } // ASL
            0x09 => {
                let cin = self.regs.cc_bit(cc::CARRY) as u8;
                self.regs.set_cc_bit(cc::CARRY, v & 0x80 != 0);
                let r = (v << 1) | cin;
                self.flags_shift(r);
                r
            } // ROL
            0x0a => {
                let r = v.wrapping_sub(1);
                self.regs.set_cc_bit(cc::OVERFLOW, v == 0x80);
                self.set_nz(r);
                r
            } // DEC
            0x0c => {
                let r = v.wrapping_add(1);
                self.regs.set_cc_bit(cc::OVERFLOW, v == 0x7f);
                self.set_nz(r);
                r
            } // INC
            0x0d => {
                self.set_nz(v);
                self.regs.set_cc_bit(cc::OVERFLOW, false);
                self.regs.set_cc_bit(cc::CARRY, false);
                v
            } // TST
            _ => {
                self.regs.cc &= !0x0f;
                self.regs.set_cc_bit(cc::ZERO, true);
                0
            } // CLR
        }
    }

    /// Shifts and rotates on the 6800 family set V to N xor C.
    fn flags_shift(&mut self, result: u8) {
        self.set_nz(result);
        let v = self.regs.cc_bit(cc::NEGATIVE) != self.regs.cc_bit(cc::CARRY);
        self.regs.set_cc_bit(cc::OVERFLOW, v);
    }

    fn branch_cond(&self, op: u8) -> bool {
        let test = match (op >> 1) & 0x07 {
            0 => false,
            1 => self.regs.cc_bit(cc::CARRY) || self.regs.cc_bit(cc::ZERO),
            2 => self.regs.cc_bit(cc::CARRY),
            3 => self.regs.cc_bit(cc::ZERO),
            4 => self.regs.cc_bit(cc::OVERFLOW),
            5 => self.regs.cc_bit(cc::NEGATIVE),
            6 => self.regs.cc_bit(cc::NEGATIVE) != self.regs.cc_bit(cc::OVERFLOW),
            _ => {
                (self.regs.cc_bit(cc::NEGATIVE) != self.regs.cc_bit(cc::OVERFLOW))
                    || self.regs.cc_bit(cc::ZERO)
            }
        };
        test == (op & 0x01 != 0)
    }

    fn execute_one(&mut self, bus: &mut dyn Bus) -> u32 {
        let op = self.fetch_byte(bus);
        match op {
            0x01 => 2, // NOP
            0x04 => {
                // LSRD
                let d = self.regs.d();
                self.regs.set_cc_bit(cc::CARRY, d & 0x0001 != 0);
                let r = d >> 1;
                self.regs.set_d(r);
                self.flags_load16(r);
                3
            }
            0x05 => {
                // ASLD
                let d = self.regs.d();
                self.regs.set_cc_bit(cc::CARRY, d & 0x8000 != 0);
                let r = d << 1;
                self.regs.set_d(r);
                self.set_nz16(r);
                let v = self.regs.cc_bit(cc::NEGATIVE) != self.regs.cc_bit(cc::CARRY);
                self.regs.set_cc_bit(cc::OVERFLOW, v);
                3
            }
            0x06 => {
                self.regs.cc = self.regs.a | 0xc0;
                2
            } // TAP
            0x07 => {
                self.regs.a = self.regs.cc | 0xc0;
                2
            } // TPA
            0x08 => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.regs.set_cc_bit(cc::ZERO, self.regs.x == 0);
                3
            } // INX
            0x09 => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.regs.set_cc_bit(cc::ZERO, self.regs.x == 0);
                3
            } // DEX
            0x0a => {
                self.regs.set_cc_bit(cc::OVERFLOW, false);
                2
            } // CLV
            0x0b => {
                self.regs.set_cc_bit(cc::OVERFLOW, true);
                2
            } // SEV
            0x0c => {
                self.regs.set_cc_bit(cc::CARRY, false);
                2
            } // CLC
            0x0d => {
                self.regs.set_cc_bit(cc::CARRY, true);
                2
            } // SEC
            0x0e => {
                self.regs.set_cc_bit(cc::IRQ_MASK, false);
                2
            } // CLI
            0x0f => {
                self.regs.set_cc_bit(cc::IRQ_MASK, true);
                2
            } // SEI
            0x10 => {
                let r = self.alu_sub(self.regs.a, self.regs.b, false);
                self.regs.a = r;
                2
            } // SBA
            0x11 => {
                self.alu_sub(self.regs.a, self.regs.b, false);
                2
            } // CBA
            0x16 => {
                self.regs.b = self.regs.a;
                self.flags_load(self.regs.b);
                2
            } // TAB
            0x17 => {
                self.regs.a = self.regs.b;
                self.flags_load(self.regs.a);
                2
            } // TBA
            0x19 => {
                // DAA
                let a = self.regs.a;
                let mut correction = 0u8;
                if (a & 0x0f) > 0x09 || self.regs.cc_bit(cc::HALF_CARRY) {
                    correction |= 0x06;
                }
                if a > 0x99 || self.regs.cc_bit(cc::CARRY) || (a > 0x8f && (a & 0x0f) > 0x09) {
                    correction |= 0x60;
                }
                let (result, carry) = a.overflowing_add(correction);
                if carry {
                    self.regs.set_cc_bit(cc::CARRY, true);
                }
                self.regs.a = result;
                self.set_nz(result);
                2
            }
            0x1b => {
                let r = self.alu_add(self.regs.a, self.regs.b, false);
                self.regs.a = r;
                2
            } // ABA
            0x20..=0x2f => {
                let offset = self.fetch_byte(bus) as i8 as i16 as u16;
                if self.branch_cond(op) {
                    self.regs.pc = self.regs.pc.wrapping_add(offset);
                }
                3
            }
            0x30 => {
                self.regs.x = self.regs.sp.wrapping_add(1);
                3
            } // TSX
            0x31 => {
                self.regs.sp = self.regs.sp.wrapping_add(1);
                3
            } // INS
            0x32 => {
                self.regs.a = self.pull_byte(bus);
                4
            } // PULA
            0x33 => {
                self.regs.b = self.pull_byte(bus);
                4
            } // PULB
            0x34 => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                3
            } // DES
            0x35 => {
                self.regs.sp = self.regs.x.wrapping_sub(1);
                3
            } // TXS
            0x36 => {
                let a = self.regs.a;
                self.push_byte(bus, a);
                3
            } // PSHA
            0x37 => {
                let b = self.regs.b;
                self.push_byte(bus, b);
                3
            } // PSHB
            0x38 => {
                self.regs.x = self.pull_word(bus);
                5
            } // PULX
            0x39 => {
                self.regs.pc = self.pull_word(bus);
                5
            } // RTS
            0x3a => {
                self.regs.x = self.regs.x.wrapping_add(self.regs.b as u16);
                3
            } // ABX
            0x3b => {
                // RTI
                self.regs.cc = self.pull_byte(bus);
                self.regs.b = self.pull_byte(bus);
                self.regs.a = self.pull_byte(bus);
                self.regs.x = self.pull_word(bus);
                self.regs.pc = self.pull_word(bus);
                10
            }
            0x3c => {
                let x = self.regs.x;
                self.push_word(bus, x);
                4
            } // PSHX
            0x3d => {
                let result = self.regs.a as u16 * self.regs.b as u16;
                self.regs.set_d(result);
                self.regs.set_cc_bit(cc::CARRY, result & 0x80 != 0);
                10
            } // MUL
            0x3e => {
                // WAI: stack everything, then sleep until an interrupt.
                self.push_context(bus);
                self.waiting = true;
                9
            }
            0x3f => {
                // SWI
                self.push_context(bus);
                self.regs.set_cc_bit(cc::IRQ_MASK, true);
                let hi = bus.read_cycle(0xfffa);
                let lo = bus.read_cycle(0xfffb);
                self.regs.pc = ((hi as u16) << 8) | lo as u16;
                12
            }
            0x40..=0x4f => {
                let a = self.regs.a;
                self.regs.a = self.rmw_op(op & 0x0f, a);
                2
            }
            0x50..=0x5f => {
                let b = self.regs.b;
                self.regs.b = self.rmw_op(op & 0x0f, b);
                2
            }
            0x60..=0x7f => {
                let mode = if op < 0x70 {
                    AddrMode::Indexed
                } else {
                    AddrMode::Extended
                };
                let ea = self.ea(bus, mode);
                if op & 0x0f == 0x0e {
                    self.regs.pc = ea; // JMP
                    return 3;
                }
                let v = bus.read_cycle(ea);
                let r = self.rmw_op(op & 0x0f, v);
                if op & 0x0f != 0x0d {
                    bus.write_cycle(ea, r);
                }
                6
            }
            0x80..=0xff => self.acc_column(bus, op),
            _ => {
                debug!("illegal 6803 opcode {:02x} at {:04x}", op, self.regs.pc);
                2
            }
        }
    }

    /// The two accumulator stripes: $80-$BF on A, $C0-$FF on B, with the
    /// 16-bit columns ($x3 SUBD/ADDD, $xC CPX/LDD, $xD BSR-JSR/STD, $xE
    /// LDS/LDX, $xF STS/STX) woven through.
    fn acc_column(&mut self, bus: &mut dyn Bus, op: u8) -> u32 {
        let is_a_block = op < 0xc0;
        let col = op & 0x0f;
        let mode = match op & 0x30 {
            0x10 => AddrMode::Direct,
            0x20 => AddrMode::Indexed,
            _ => AddrMode::Extended,
        };
        let immediate = op & 0x30 == 0x00;

        // 16-bit columns first.
        match col {
            0x03 => {
                let operand = self.word_operand(bus, immediate, mode);
                let d = self.regs.d();
                let r = if is_a_block {
                    self.alu_sub16(d, operand) // SUBD
                } else {
                    self.alu_add16(d, operand) // ADDD
                };
                self.regs.set_d(r);
                return 4;
            }
            0x0c => {
                let operand = self.word_operand(bus, immediate, mode);
                if is_a_block {
                    let x = self.regs.x;
                    self.alu_sub16(x, operand); // CPX
                } else {
                    self.regs.set_d(operand); // LDD
                    self.flags_load16(operand);
                }
                return 4;
            }
            0x0d => {
                if is_a_block {
                    // BSR (immediate slot) / JSR
                    let target = if immediate {
                        let offset = self.fetch_byte(bus) as i8 as i16 as u16;
                        self.regs.pc.wrapping_add(offset)
                    } else {
                        self.ea(bus, mode)
                    };
                    let ret = self.regs.pc;
                    self.push_word(bus, ret);
                    self.regs.pc = target;
                    return 6;
                }
                // STD
                let ea = self.ea(bus, mode);
                let d = self.regs.d();
                bus.write_cycle(ea, (d >> 8) as u8);
                bus.write_cycle(ea.wrapping_add(1), d as u8);
                self.flags_load16(d);
                return 5;
            }
            0x0e => {
                let operand = self.word_operand(bus, immediate, mode);
                if is_a_block {
                    self.regs.sp = operand; // LDS
                } else {
                    self.regs.x = operand; // LDX
                }
                self.flags_load16(operand);
                return 4;
            }
            0x0f => {
                let ea = self.ea(bus, mode);
                let value = if is_a_block { self.regs.sp } else { self.regs.x };
                bus.write_cycle(ea, (value >> 8) as u8);
                bus.write_cycle(ea.wrapping_add(1), value as u8);
                self.flags_load16(value);
                return 5;
            }
            _ => {}
        }

        if col == 0x07 {
            // STA has no immediate form.
            let ea = self.ea(bus, mode);
            let value = if is_a_block { self.regs.a } else { self.regs.b };
            bus.write_cycle(ea, value);
            self.flags_load(value);
            return 4;
        }
        let operand = if immediate {
            self.fetch_byte(bus)
        } else {
            let ea = self.ea(bus, mode);
            bus.read_cycle(ea)
        };
        let reg = if is_a_block { self.regs.a } else { self.regs.b };
        let (result, writeback) = match col {
            0x00 => (self.alu_sub(reg, operand, false), true),
            0x01 => (self.alu_sub(reg, operand, false), false),
            0x02 => {
                let c = self.regs.cc_bit(cc::CARRY);
                (self.alu_sub(reg, operand, c), true)
            }
            0x04 => {
                let r = reg & operand;
                self.flags_load(r);
                (r, true)
            }
            0x05 => {
                let r = reg & operand;
                self.flags_load(r);
                (r, false)
            }
            0x06 => {
                self.flags_load(operand);
                (operand, true)
            }
            0x08 => {
                let r = reg ^ operand;
                self.flags_load(r);
                (r, true)
            }
            0x09 => {
                let c = self.regs.cc_bit(cc::CARRY);
                (self.alu_add(reg, operand, c), true)
            }
            0x0a => {
                let r = reg | operand;
                self.flags_load(r);
                (r, true)
            }
            _ => (self.alu_add(reg, operand, false), true), // 0x0b ADD
        };
        if writeback {
            if is_a_block {
                self.regs.a = result;
            } else {
                self.regs.b = result;
            }
        }
        if immediate {
            2
        } else {
            4
        }
    }

    fn word_operand(&mut self, bus: &mut dyn Bus, immediate: bool, mode: AddrMode) -> u16 {
        if immediate {
            self.fetch_word(bus)
        } else {
            let ea = self.ea(bus, mode);
            let hi = bus.read_cycle(ea);
            let lo = bus.read_cycle(ea.wrapping_add(1));
            ((hi as u16) << 8) | lo as u16
        }
    }
}

impl Default for Mc6803 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatBus {
        mem: [u8; 0x10000],
    }

    impl FlatBus {
        fn new() -> Self {
            Self { mem: [0; 0x10000] }
        }
    }

    impl Bus for FlatBus {
        fn read_cycle(&mut self, address: u16) -> u8 {
            self.mem[address as usize]
        }
        fn write_cycle(&mut self, address: u16, value: u8) {
            self.mem[address as usize] = value;
        }
    }

    fn boot(entry: u16) -> (Mc6803, FlatBus) {
        let mut cpu = Mc6803::new();
        let mut bus = FlatBus::new();
        bus.mem[0xfffe] = (entry >> 8) as u8;
        bus.mem[0xffff] = entry as u8;
        cpu.reset(&mut bus);
        (cpu, bus)
    }

    #[test]
    fn reset_vectors_through_fffe() {
        let (cpu, _) = boot(0x4000);
        assert_eq!(0x4000, cpu.regs.pc);
        assert!(cpu.regs.cc_bit(cc::IRQ_MASK));
    }

    #[test]
    fn ldaa_immediate_and_staa_extended() {
        let (mut cpu, mut bus) = boot(0x4000);
        bus.mem[0x4000] = 0x86; // LDAA #$7f
        bus.mem[0x4001] = 0x7f;
        bus.mem[0x4002] = 0xb7; // STAA $1234
        bus.mem[0x4003] = 0x12;
        bus.mem[0x4004] = 0x34;
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(0x7f, bus.mem[0x1234]);
    }

    #[test]
    fn addd_immediate_is_sixteen_bit() {
        let (mut cpu, mut bus) = boot(0x4000);
        cpu.regs.set_d(0x00ff);
        bus.mem[0x4000] = 0xc3; // ADDD #$0001
        bus.mem[0x4001] = 0x00;
        bus.mem[0x4002] = 0x01;
        cpu.step(&mut bus);
        assert_eq!(0x0100, cpu.regs.d());
        assert!(!cpu.regs.cc_bit(cc::CARRY));
    }

    #[test]
    fn cpx_sets_zero_without_clobbering_x() {
        let (mut cpu, mut bus) = boot(0x4000);
        cpu.regs.x = 0x1234;
        bus.mem[0x4000] = 0x8c;
        bus.mem[0x4001] = 0x12;
        bus.mem[0x4002] = 0x34;
        cpu.step(&mut bus);
        assert!(cpu.regs.cc_bit(cc::ZERO));
        assert_eq!(0x1234, cpu.regs.x);
    }

    #[test]
    fn jsr_extended_pushes_return_address() {
        let (mut cpu, mut bus) = boot(0x4000);
        cpu.regs.sp = 0x00ff;
        bus.mem[0x4000] = 0xbd; // JSR $5000
        bus.mem[0x4001] = 0x50;
        bus.mem[0x4002] = 0x00;
        bus.mem[0x5000] = 0x39; // RTS
        cpu.step(&mut bus);
        assert_eq!(0x5000, cpu.regs.pc);
        cpu.step(&mut bus);
        assert_eq!(0x4003, cpu.regs.pc);
        assert_eq!(0x00ff, cpu.regs.sp);
    }

    #[test]
    fn wai_parks_until_interrupt() {
        let (mut cpu, mut bus) = boot(0x4000);
        cpu.regs.sp = 0x00ff;
        cpu.regs.set_cc_bit(cc::IRQ_MASK, false);
        bus.mem[0xfff8] = 0x60;
        bus.mem[0xfff9] = 0x00;
        bus.mem[0x4000] = 0x3e; // WAI
        cpu.step(&mut bus);
        let sp = cpu.regs.sp;
        cpu.step(&mut bus);
        assert_eq!(sp, cpu.regs.sp, "parked");
        cpu.assert_irq();
        cpu.step(&mut bus);
        assert_eq!(0x6000, cpu.regs.pc);
        assert_eq!(sp, cpu.regs.sp, "context was stacked by WAI itself");
    }

    #[test]
    fn branch_polarity_matches_the_6800_map() {
        let (mut cpu, mut bus) = boot(0x4000);
        cpu.regs.set_cc_bit(cc::ZERO, true);
        bus.mem[0x4000] = 0x27; // BEQ +4
        bus.mem[0x4001] = 0x04;
        cpu.step(&mut bus);
        assert_eq!(0x4006, cpu.regs.pc);
        cpu.regs.pc = 0x4100;
        cpu.regs.set_cc_bit(cc::CARRY, true);
        bus.mem[0x4100] = 0x24; // BCC +4, not taken
        bus.mem[0x4101] = 0x04;
        cpu.step(&mut bus);
        assert_eq!(0x4102, cpu.regs.pc);
    }

    #[test]
    fn inherent_rmw_on_accumulators() {
        let (mut cpu, mut bus) = boot(0x4000);
        cpu.regs.a = 0x01;
        bus.mem[0x4000] = 0x40; // NEGA
        cpu.step(&mut bus);
        assert_eq!(0xff, cpu.regs.a);
        assert!(cpu.regs.cc_bit(cc::CARRY));
        cpu.regs.b = 0x80;
        bus.mem[0x4001] = 0x58; // ASLB
        cpu.step(&mut bus);
        assert_eq!(0x00, cpu.regs.b);
        assert!(cpu.regs.cc_bit(cc::CARRY));
        assert!(cpu.regs.cc_bit(cc::ZERO));
    }
}
