// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#![cfg_attr(feature = "cargo-clippy", allow(clippy::cast_lossless))]

// Spec: MC6809E datasheet (Motorola), HD6309 programmer's notes.
// Design:
//   The CPU is an explicit state machine. `step` runs the machine until one
//   instruction retires (or one cycle of a HALT/SYNC/CWAI stall elapses) and
//   returns the number of bus cycles consumed. Every access, including the
//   dead "VMA" cycles the real part spends with $FFFF on the address bus,
//   goes through the `Bus` delegate, so the bus owner sees the true cycle
//   stream and can charge each cycle its slow/fast cost.
//   Decode is a flat match per opcode page. Undocumented 6809 opcodes that
//   alias documented ones (the $x1/$x5/$xB holes, and $x2 "NGC") are decoded
//   on the 6809; the same holes carry TIM/OIM/AIM/EIM on the 6309.

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;
use bit_field::BitField;

use super::bus::Bus;
use super::registers::{cc, md, Registers};
use crate::util::{IrqLine, Shared};

#[derive(Clone, Copy, PartialEq)]
pub enum Variant {
    Mc6809,
    Hd6309,
}

/// Machine states, named after the hardware's own instruction sequencer.
#[derive(Clone, Copy, PartialEq, Debug)]
enum State {
    Reset,
    ResetCheckHalt,
    NextInstruction,
    InstructionPage2,
    InstructionPage3,
    DispatchIrq,
    Sync,
    CwaiCheckHalt,
    Tfm,
    TfmWrite,
    DoneInstruction,
}

#[derive(Clone, Copy, PartialEq)]
enum IndexReg {
    X,
    Y,
    U,
    S,
}

#[derive(Clone, Copy, PartialEq)]
enum AddrMode {
    Direct,
    Indexed,
    Extended,
}

pub type TraceHook = Box<dyn FnMut(&Registers) -> bool>;

pub struct Cpu6809 {
    variant: Variant,
    pub regs: Registers,
    state: State,
    irq: Shared<IrqLine>,
    firq: Shared<IrqLine>,
    nmi: Shared<IrqLine>,
    halt: Shared<IrqLine>,
    nmi_was_low: bool,
    nmi_pending: bool,
    tfm_post: u8,
    tfm_mode: u8,
    tfm_byte: u8,
    running: bool,
    cycles: u32,
    pub instruction_hook: Option<TraceHook>,
    pub instruction_posthook: Option<TraceHook>,
}

impl Cpu6809 {
    pub fn new(
        variant: Variant,
        irq: Shared<IrqLine>,
        firq: Shared<IrqLine>,
        nmi: Shared<IrqLine>,
        halt: Shared<IrqLine>,
    ) -> Self {
        Self {
            variant,
            regs: Registers::default(),
            state: State::Reset,
            irq,
            firq,
            nmi,
            halt,
            nmi_was_low: false,
            nmi_pending: false,
            tfm_post: 0,
            tfm_mode: 0,
            tfm_byte: 0,
            running: true,
            cycles: 0,
            instruction_hook: None,
            instruction_posthook: None,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn get_pc(&self) -> u16 {
        self.regs.pc
    }

    pub fn set_pc(&mut self, value: u16) {
        self.regs.pc = value;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn reset(&mut self, bus: &mut dyn Bus) {
        self.state = State::Reset;
        self.running = true;
        self.step(bus);
    }

    pub fn run(&mut self, bus: &mut dyn Bus) {
        while self.running {
            self.step(bus);
        }
    }

    /// Advance one instruction, or one cycle of a stalled/waiting state.
    /// Returns the number of CPU bus cycles consumed.
    pub fn step(&mut self, bus: &mut dyn Bus) -> u32 {
        self.cycles = 0;
        loop {
            match self.state {
                State::Reset => {
                    self.regs.reset();
                    self.nmi_was_low = false;
                    self.nmi_pending = false;
                    self.state = State::ResetCheckHalt;
                }
                State::ResetCheckHalt => {
                    if self.halt.borrow().is_low() {
                        self.idle(bus);
                        return self.cycles;
                    }
                    self.regs.pc = self.read16(bus, 0xfffe);
                    self.state = State::NextInstruction;
                    return self.cycles;
                }
                State::NextInstruction => {
                    self.latch_nmi_edge();
                    if self.halt.borrow().is_low() {
                        self.idle(bus);
                        return self.cycles;
                    }
                    if self.interrupt_pending() {
                        self.state = State::DispatchIrq;
                        continue;
                    }
                    if let Some(ref mut hook) = self.instruction_hook {
                        if !hook(&self.regs) {
                            self.running = false;
                            return self.cycles;
                        }
                    }
                    let op = self.fetch8(bus);
                    match op {
                        0x10 => self.state = State::InstructionPage2,
                        0x11 => self.state = State::InstructionPage3,
                        _ => {
                            self.execute_page1(bus, op);
                            if self.state == State::NextInstruction {
                                self.state = State::DoneInstruction;
                            }
                        }
                    }
                }
                State::InstructionPage2 => {
                    let op = self.fetch8(bus);
                    self.state = State::NextInstruction;
                    self.execute_page2(bus, op);
                    if self.state == State::NextInstruction {
                        self.state = State::DoneInstruction;
                    }
                }
                State::InstructionPage3 => {
                    let op = self.fetch8(bus);
                    self.state = State::NextInstruction;
                    self.execute_page3(bus, op);
                    if self.state == State::NextInstruction {
                        self.state = State::DoneInstruction;
                    }
                }
                State::DispatchIrq => {
                    self.dispatch_interrupt(bus);
                    return self.cycles;
                }
                State::Sync => {
                    // Any interrupt edge releases SYNC; whether it is also
                    // taken depends on the masks, checked at the next
                    // instruction boundary.
                    self.latch_nmi_edge();
                    if self.nmi_pending
                        || self.firq.borrow().is_low()
                        || self.irq.borrow().is_low()
                    {
                        self.state = State::NextInstruction;
                    }
                    self.idle(bus);
                    return self.cycles;
                }
                State::CwaiCheckHalt => {
                    self.latch_nmi_edge();
                    if self.halt.borrow().is_low() {
                        self.idle(bus);
                        return self.cycles;
                    }
                    // Context is already stacked; vector straight through.
                    if self.nmi_pending {
                        self.nmi_pending = false;
                        self.regs.set_cc_bit(cc::IRQ_MASK, true);
                        self.regs.set_cc_bit(cc::FIRQ_MASK, true);
                        self.regs.pc = self.read16(bus, 0xfffc);
                        self.state = State::NextInstruction;
                    } else if self.firq.borrow().is_low() && !self.regs.cc_bit(cc::FIRQ_MASK) {
                        self.regs.set_cc_bit(cc::IRQ_MASK, true);
                        self.regs.set_cc_bit(cc::FIRQ_MASK, true);
                        self.regs.pc = self.read16(bus, 0xfff6);
                        self.state = State::NextInstruction;
                    } else if self.irq.borrow().is_low() && !self.regs.cc_bit(cc::IRQ_MASK) {
                        self.regs.set_cc_bit(cc::IRQ_MASK, true);
                        self.regs.pc = self.read16(bus, 0xfff8);
                        self.state = State::NextInstruction;
                    } else {
                        self.idle(bus);
                    }
                    return self.cycles;
                }
                State::Tfm => {
                    if self.regs.w() == 0 {
                        self.state = State::DoneInstruction;
                        continue;
                    }
                    let src = self.tfm_src();
                    self.tfm_byte = self.read8(bus, src);
                    self.state = State::TfmWrite;
                }
                State::TfmWrite => {
                    let dst = self.tfm_dst();
                    let byte = self.tfm_byte;
                    self.write8(bus, dst, byte);
                    self.tfm_advance();
                    self.regs.set_w(self.regs.w().wrapping_sub(1));
                    self.idle(bus);
                    self.latch_nmi_edge();
                    if self.interrupt_pending() {
                        // Interruptible between byte pairs: back PC up over
                        // `11 3x postbyte` so the transfer resumes after RTI.
                        self.regs.pc = self.regs.pc.wrapping_sub(3);
                        self.state = State::NextInstruction;
                        return self.cycles;
                    }
                    if self.regs.w() == 0 {
                        self.state = State::DoneInstruction;
                        continue;
                    }
                    self.state = State::Tfm;
                    return self.cycles;
                }
                State::DoneInstruction => {
                    self.state = State::NextInstruction;
                    if let Some(ref mut hook) = self.instruction_posthook {
                        if !hook(&self.regs) {
                            self.running = false;
                        }
                    }
                    return self.cycles;
                }
            }
        }
    }

    // -- Interrupts

    fn latch_nmi_edge(&mut self) {
        let low = self.nmi.borrow().is_low();
        if low && !self.nmi_was_low {
            self.nmi_pending = true;
        }
        self.nmi_was_low = low;
    }

    fn interrupt_pending(&self) -> bool {
        self.nmi_pending
            || (self.firq.borrow().is_low() && !self.regs.cc_bit(cc::FIRQ_MASK))
            || (self.irq.borrow().is_low() && !self.regs.cc_bit(cc::IRQ_MASK))
    }

    fn dispatch_interrupt(&mut self, bus: &mut dyn Bus) {
        if self.nmi_pending {
            self.nmi_pending = false;
            self.idle(bus);
            self.push_entire(bus);
            self.regs.set_cc_bit(cc::IRQ_MASK, true);
            self.regs.set_cc_bit(cc::FIRQ_MASK, true);
            self.regs.pc = self.read16(bus, 0xfffc);
            self.idle(bus);
        } else if self.firq.borrow().is_low() && !self.regs.cc_bit(cc::FIRQ_MASK) {
            self.idle(bus);
            if self.variant == Variant::Hd6309 && self.regs.md.get_bit(md::FIRQ_ENTIRE) {
                self.push_entire(bus);
            } else {
                self.regs.set_cc_bit(cc::ENTIRE, false);
                let pc = self.regs.pc;
                self.push16(bus, IndexReg::S, pc);
                let cc_val = self.regs.cc;
                self.push8(bus, IndexReg::S, cc_val);
            }
            self.regs.set_cc_bit(cc::IRQ_MASK, true);
            self.regs.set_cc_bit(cc::FIRQ_MASK, true);
            self.regs.pc = self.read16(bus, 0xfff6);
            self.idle(bus);
        } else if self.irq.borrow().is_low() && !self.regs.cc_bit(cc::IRQ_MASK) {
            self.idle(bus);
            self.push_entire(bus);
            self.regs.set_cc_bit(cc::IRQ_MASK, true);
            self.regs.pc = self.read16(bus, 0xfff8);
            self.idle(bus);
        }
        self.state = State::NextInstruction;
    }

    /// Stacks the full machine state on S and sets the E flag. In 6309
    /// native mode E and F ride along between DP and B, so RTI can restore
    /// them.
    fn push_entire(&mut self, bus: &mut dyn Bus) {
        self.regs.set_cc_bit(cc::ENTIRE, true);
        let pc = self.regs.pc;
        let u = self.regs.u;
        let y = self.regs.y;
        let x = self.regs.x;
        self.push16(bus, IndexReg::S, pc);
        self.push16(bus, IndexReg::S, u);
        self.push16(bus, IndexReg::S, y);
        self.push16(bus, IndexReg::S, x);
        let dp_val = self.regs.dp;
        self.push8(bus, IndexReg::S, dp_val);
        if self.variant == Variant::Hd6309 && self.regs.native_mode() {
            let f_val = self.regs.f;
            self.push8(bus, IndexReg::S, f_val);
            let e_val = self.regs.e;
            self.push8(bus, IndexReg::S, e_val);
        }
        let b_val = self.regs.b;
        self.push8(bus, IndexReg::S, b_val);
        let a_val = self.regs.a;
        self.push8(bus, IndexReg::S, a_val);
        let cc_val = self.regs.cc;
        self.push8(bus, IndexReg::S, cc_val);
    }

    fn pull_entire(&mut self, bus: &mut dyn Bus) {
        self.regs.a = self.pull8(bus, IndexReg::S);
        self.regs.b = self.pull8(bus, IndexReg::S);
        if self.variant == Variant::Hd6309 && self.regs.native_mode() {
            self.regs.e = self.pull8(bus, IndexReg::S);
            self.regs.f = self.pull8(bus, IndexReg::S);
        }
        self.regs.dp = self.pull8(bus, IndexReg::S);
        self.regs.x = self.pull16(bus, IndexReg::S);
        self.regs.y = self.pull16(bus, IndexReg::S);
        self.regs.u = self.pull16(bus, IndexReg::S);
        self.regs.pc = self.pull16(bus, IndexReg::S);
    }

    // -- Bus cycle helpers. Dead cycles park $FFFF on the address bus like
    // the real part; they still cost a SAM cycle but do not latch D.

    fn idle(&mut self, bus: &mut dyn Bus) {
        self.cycles += 1;
        bus.read_cycle(0xffff);
    }

    fn idle_n(&mut self, bus: &mut dyn Bus, n: u32) {
        for _ in 0..n {
            self.idle(bus);
        }
    }

    fn read8(&mut self, bus: &mut dyn Bus, address: u16) -> u8 {
        self.cycles += 1;
        let value = bus.read_cycle(address);
        self.regs.d = value;
        value
    }

    fn write8(&mut self, bus: &mut dyn Bus, address: u16, value: u8) {
        self.cycles += 1;
        self.regs.d = value;
        bus.write_cycle(address, value);
    }

    fn read16(&mut self, bus: &mut dyn Bus, address: u16) -> u16 {
        let hi = self.read8(bus, address);
        let lo = self.read8(bus, address.wrapping_add(1));
        ((hi as u16) << 8) | lo as u16
    }

    fn write16(&mut self, bus: &mut dyn Bus, address: u16, value: u16) {
        self.write8(bus, address, (value >> 8) as u8);
        self.write8(bus, address.wrapping_add(1), value as u8);
    }

    fn fetch8(&mut self, bus: &mut dyn Bus) -> u8 {
        let value = self.read8(bus, self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn fetch16(&mut self, bus: &mut dyn Bus) -> u16 {
        let hi = self.fetch8(bus);
        let lo = self.fetch8(bus);
        ((hi as u16) << 8) | lo as u16
    }

    // -- Stack helpers

    fn push8(&mut self, bus: &mut dyn Bus, which: IndexReg, value: u8) {
        let sp = self.reg(which).wrapping_sub(1);
        *self.reg_mut(which) = sp;
        self.write8(bus, sp, value);
    }

    fn push16(&mut self, bus: &mut dyn Bus, which: IndexReg, value: u16) {
        self.push8(bus, which, value as u8);
        self.push8(bus, which, (value >> 8) as u8);
    }

    fn pull8(&mut self, bus: &mut dyn Bus, which: IndexReg) -> u8 {
        let sp = self.reg(which);
        let value = self.read8(bus, sp);
        *self.reg_mut(which) = sp.wrapping_add(1);
        value
    }

    fn pull16(&mut self, bus: &mut dyn Bus, which: IndexReg) -> u16 {
        let hi = self.pull8(bus, which);
        let lo = self.pull8(bus, which);
        ((hi as u16) << 8) | lo as u16
    }

    fn reg(&self, which: IndexReg) -> u16 {
        match which {
            IndexReg::X => self.regs.x,
            IndexReg::Y => self.regs.y,
            IndexReg::U => self.regs.u,
            IndexReg::S => self.regs.s,
        }
    }

    fn reg_mut(&mut self, which: IndexReg) -> &mut u16 {
        match which {
            IndexReg::X => &mut self.regs.x,
            IndexReg::Y => &mut self.regs.y,
            IndexReg::U => &mut self.regs.u,
            IndexReg::S => &mut self.regs.s,
        }
    }

    // -- Effective addresses

    fn ea_direct(&mut self, bus: &mut dyn Bus) -> u16 {
        let lo = self.fetch8(bus);
        self.idle(bus);
        ((self.regs.dp as u16) << 8) | lo as u16
    }

    fn ea_extended(&mut self, bus: &mut dyn Bus) -> u16 {
        let ea = self.fetch16(bus);
        self.idle(bus);
        ea
    }

    /// Decodes the indexed-addressing postbyte, charging the datasheet's
    /// per-mode dead cycles. Bit 7 clear selects the 5-bit constant offset
    /// form, which can never be indirect.
    fn ea_indexed(&mut self, bus: &mut dyn Bus) -> u16 {
        let postbyte = self.fetch8(bus);
        let which = match (postbyte >> 5) & 0x03 {
            0 => IndexReg::X,
            1 => IndexReg::Y,
            2 => IndexReg::U,
            _ => IndexReg::S,
        };
        if !postbyte.get_bit(7) {
            let offset = sign_extend5(postbyte & 0x1f) as u16;
            self.idle_n(bus, 2);
            return self.reg(which).wrapping_add(offset);
        }
        let indirect = postbyte.get_bit(4);
        let ea = match postbyte & 0x0f {
            0x00 => {
                let ea = self.reg(which);
                *self.reg_mut(which) = ea.wrapping_add(1);
                self.idle_n(bus, 3);
                ea
            }
            0x01 => {
                let ea = self.reg(which);
                *self.reg_mut(which) = ea.wrapping_add(2);
                self.idle_n(bus, 4);
                ea
            }
            0x02 => {
                let ea = self.reg(which).wrapping_sub(1);
                *self.reg_mut(which) = ea;
                self.idle_n(bus, 3);
                ea
            }
            0x03 => {
                let ea = self.reg(which).wrapping_sub(2);
                *self.reg_mut(which) = ea;
                self.idle_n(bus, 4);
                ea
            }
            0x04 => {
                self.idle(bus);
                self.reg(which)
            }
            0x05 => {
                self.idle_n(bus, 2);
                self.reg(which).wrapping_add(sign_ext8(self.regs.b))
            }
            0x06 => {
                self.idle_n(bus, 2);
                self.reg(which).wrapping_add(sign_ext8(self.regs.a))
            }
            0x08 => {
                let offset = sign_ext8(self.fetch8(bus));
                self.idle(bus);
                self.reg(which).wrapping_add(offset)
            }
            0x09 => {
                let offset = self.fetch16(bus);
                self.idle_n(bus, 3);
                self.reg(which).wrapping_add(offset)
            }
            0x0b => {
                self.idle_n(bus, 5);
                self.reg(which).wrapping_add(self.regs.d())
            }
            0x0c => {
                let offset = sign_ext8(self.fetch8(bus));
                self.idle(bus);
                self.regs.pc.wrapping_add(offset)
            }
            0x0d => {
                let offset = self.fetch16(bus);
                self.idle_n(bus, 4);
                self.regs.pc.wrapping_add(offset)
            }
            0x0f => {
                let ea = self.fetch16(bus);
                self.idle(bus);
                ea
            }
            _ => {
                debug!("invalid indexed postbyte {:02x}", postbyte);
                self.reg(which)
            }
        };
        if indirect {
            let target = self.read16(bus, ea);
            self.idle(bus);
            target
        } else {
            ea
        }
    }

    fn ea(&mut self, bus: &mut dyn Bus, mode: AddrMode) -> u16 {
        match mode {
            AddrMode::Direct => self.ea_direct(bus),
            AddrMode::Indexed => self.ea_indexed(bus),
            AddrMode::Extended => self.ea_extended(bus),
        }
    }

    // -- Condition codes

    fn set_nz8(&mut self, value: u8) {
        self.regs.set_cc_bit(cc::ZERO, value == 0);
        self.regs.set_cc_bit(cc::NEGATIVE, value & 0x80 != 0);
    }

    fn set_nz16(&mut self, value: u16) {
        self.regs.set_cc_bit(cc::ZERO, value == 0);
        self.regs.set_cc_bit(cc::NEGATIVE, value & 0x8000 != 0);
    }

    fn flags_load8(&mut self, value: u8) {
        self.set_nz8(value);
        self.regs.set_cc_bit(cc::OVERFLOW, false);
    }

    fn flags_load16(&mut self, value: u16) {
        self.set_nz16(value);
        self.regs.set_cc_bit(cc::OVERFLOW, false);
    }

    fn alu_add8(&mut self, a: u8, b: u8, carry_in: bool) -> u8 {
        let c = carry_in as u16;
        let full = a as u16 + b as u16 + c;
        let half = (a & 0x0f) + (b & 0x0f) + c as u8;
        let result = full as u8;
        self.regs.set_cc_bit(cc::CARRY, full > 0xff);
        self.regs.set_cc_bit(cc::HALF_CARRY, half > 0x0f);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (a ^ result) & (b ^ result) & 0x80 != 0);
        self.set_nz8(result);
        result
    }

    /// 8-bit subtract; H is left untouched, as the silicon does.
    fn alu_sub8(&mut self, a: u8, b: u8, borrow_in: bool) -> u8 {
        let full = a as i16 - b as i16 - borrow_in as i16;
        let result = full as u8;
        self.regs.set_cc_bit(cc::CARRY, full < 0);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (a ^ b) & (a ^ result) & 0x80 != 0);
        self.set_nz8(result);
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
        self.alu_sbc16(a, b, false)
    }

    fn alu_adc16(&mut self, a: u16, b: u16, carry_in: bool) -> u16 {
        let full = a as u32 + b as u32 + carry_in as u32;
        let result = full as u16;
        self.regs.set_cc_bit(cc::CARRY, full > 0xffff);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (a ^ result) & (b ^ result) & 0x8000 != 0);
        self.set_nz16(result);
        result
    }

    fn alu_sbc16(&mut self, a: u16, b: u16, borrow_in: bool) -> u16 {
        let full = a as i32 - b as i32 - borrow_in as i32;
        let result = full as u16;
        self.regs.set_cc_bit(cc::CARRY, full < 0);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (a ^ b) & (a ^ result) & 0x8000 != 0);
        self.set_nz16(result);
        result
    }

    // -- Read-modify-write micro-ops

    fn negate(&mut self, v: u8) -> u8 {
        self.alu_sub8(0, v, false)
    }

    fn complement(&mut self, v: u8) -> u8 {
        let result = !v;
        self.regs.set_cc_bit(cc::CARRY, true);
        self.regs.set_cc_bit(cc::OVERFLOW, false);
        self.set_nz8(result);
        result
    }

    /// Undocumented: complement when carry is set, negate otherwise.
    fn negate_or_complement(&mut self, v: u8) -> u8 {
        if self.regs.cc_bit(cc::CARRY) {
            self.complement(v)
        } else {
            self.negate(v)
        }
    }

    fn logical_shift_right(&mut self, v: u8) -> u8 {
        self.regs.set_cc_bit(cc::CARRY, v & 0x01 != 0);
        let result = v >> 1;
        self.set_nz8(result);
        result
    }

    fn arith_shift_right(&mut self, v: u8) -> u8 {
        self.regs.set_cc_bit(cc::CARRY, v & 0x01 != 0);
        let result = (v >> 1) | (v & 0x80);
        self.set_nz8(result);
        result
    }

    fn arith_shift_left(&mut self, v: u8) -> u8 {
        self.regs.set_cc_bit(cc::CARRY, v & 0x80 != 0);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (v ^ (v << 1)) & 0x80 != 0);
        let result = v << 1;
        self.set_nz8(result);
        result
    }

    fn rotate_left(&mut self, v: u8) -> u8 {
        let carry_in = self.regs.cc_bit(cc::CARRY) as u8;
        self.regs.set_cc_bit(cc::CARRY, v & 0x80 != 0);
        self.regs
            .set_cc_bit(cc::OVERFLOW, (v ^ (v << 1)) & 0x80 != 0);
        let result = (v << 1) | carry_in;
        self.set_nz8(result);
        result
    }

    fn rotate_right(&mut self, v: u8) -> u8 {
        let carry_in = (self.regs.cc_bit(cc::CARRY) as u8) << 7;
        self.regs.set_cc_bit(cc::CARRY, v & 0x01 != 0);
        let result = (v >> 1) | carry_in;
        self.set_nz8(result);
        result
    }

    fn increment(&mut self, v: u8) -> u8 {
        let result = v.wrapping_add(1);
        self.regs.set_cc_bit(cc::OVERFLOW, v == 0x7f);
        self.set_nz8(result);
        result
    }

    fn decrement(&mut self, v: u8) -> u8 {
        let result = v.wrapping_sub(1);
        self.regs.set_cc_bit(cc::OVERFLOW, v == 0x80);
        self.set_nz8(result);
        result
    }

    fn test(&mut self, v: u8) -> u8 {
        self.set_nz8(v);
        self.regs.set_cc_bit(cc::OVERFLOW, false);
        v
    }

    fn clear(&mut self, _v: u8) -> u8 {
        self.regs.cc &= !0x0f;
        self.regs.set_cc_bit(cc::ZERO, true);
        0
    }

    fn rmw_mem(&mut self, bus: &mut dyn Bus, mode: AddrMode, f: fn(&mut Self, u8) -> u8) {
        let ea = self.ea(bus, mode);
        let v = self.read8(bus, ea);
        self.idle(bus);
        let result = f(self, v);
        self.write8(bus, ea, result);
    }

    fn tst_mem(&mut self, bus: &mut dyn Bus, mode: AddrMode) {
        let ea = self.ea(bus, mode);
        let v = self.read8(bus, ea);
        self.idle_n(bus, 2);
        self.test(v);
    }

    fn clr_mem(&mut self, bus: &mut dyn Bus, mode: AddrMode) {
        let ea = self.ea(bus, mode);
        let _ = self.read8(bus, ea);
        self.idle(bus);
        let result = self.clear(0);
        self.write8(bus, ea, result);
    }

    /// 6309 in-memory immediate group (`OIM`/`AIM`/`EIM` write back, `TIM`
    /// only tests). The immediate byte precedes the address operand.
    fn mem_imm_op(&mut self, bus: &mut dyn Bus, mode: AddrMode, op: u8) {
        let imm = self.fetch8(bus);
        let ea = self.ea(bus, mode);
        let v = self.read8(bus, ea);
        let result = match op & 0x0f {
            0x01 => v | imm,
            0x02 => v & imm,
            0x05 => v ^ imm,
            _ => v & imm, // TIM
        };
        self.set_nz8(result);
        self.regs.set_cc_bit(cc::OVERFLOW, false);
        if op & 0x0f != 0x0b {
            self.write8(bus, ea, result);
        } else {
            self.idle(bus);
        }
    }

    // -- Decode

    fn execute_page1(&mut self, bus: &mut dyn Bus, op: u8) {
        match op {
            // Direct-page read-modify-write, including the undocumented
            // holes; on the 6309 the holes are the memory-immediate group.
            0x00 => self.rmw_mem(bus, AddrMode::Direct, Self::negate),
            0x01 | 0x02 | 0x05 | 0x0b => self.page1_hole(bus, AddrMode::Direct, op),
            0x03 => self.rmw_mem(bus, AddrMode::Direct, Self::complement),
            0x04 => self.rmw_mem(bus, AddrMode::Direct, Self::logical_shift_right),
            0x06 => self.rmw_mem(bus, AddrMode::Direct, Self::rotate_right),
            0x07 => self.rmw_mem(bus, AddrMode::Direct, Self::arith_shift_right),
            0x08 => self.rmw_mem(bus, AddrMode::Direct, Self::arith_shift_left),
            0x09 => self.rmw_mem(bus, AddrMode::Direct, Self::rotate_left),
            0x0a => self.rmw_mem(bus, AddrMode::Direct, Self::decrement),
            0x0c => self.rmw_mem(bus, AddrMode::Direct, Self::increment),
            0x0d => self.tst_mem(bus, AddrMode::Direct),
            0x0e => {
                self.regs.pc = self.ea_direct(bus);
            }
            0x0f => self.clr_mem(bus, AddrMode::Direct),

            0x12 => self.idle(bus), // NOP
            0x13 => {
                self.idle(bus);
                self.state = State::Sync;
            }
            0x14 => {
                if self.variant == Variant::Hd6309 {
                    // SEXW: sign-extend W through D; N/Z describe the
                    // resulting 32-bit quad.
                    let w = self.regs.w();
                    let d = if w & 0x8000 != 0 { 0xffff } else { 0x0000 };
                    self.regs.set_d(d);
                    self.regs.set_cc_bit(cc::NEGATIVE, w & 0x8000 != 0);
                    self.regs.set_cc_bit(cc::ZERO, d == 0 && w == 0);
                    self.idle_n(bus, 3);
                } else {
                    self.illegal(bus, op);
                }
            }
            0x16 => {
                // LBRA
                let offset = self.fetch16(bus);
                self.regs.pc = self.regs.pc.wrapping_add(offset);
                self.idle_n(bus, 2);
            }
            0x17 => {
                // LBSR
                let offset = self.fetch16(bus);
                let ret = self.regs.pc;
                self.idle_n(bus, 4);
                self.push16(bus, IndexReg::S, ret);
                self.regs.pc = ret.wrapping_add(offset);
            }
            0x19 => self.daa(bus),
            0x1a => {
                let mask = self.fetch8(bus);
                self.regs.cc |= mask;
                self.idle(bus);
            }
            0x1c | 0x38 => {
                // ANDCC; $38 is its undocumented one-cycle-longer twin
                let mask = self.fetch8(bus);
                self.regs.cc &= mask;
                self.idle(bus);
                if op == 0x38 {
                    self.idle(bus);
                }
            }
            0x1d => {
                // SEX
                self.regs.a = if self.regs.b & 0x80 != 0 { 0xff } else { 0x00 };
                let d = self.regs.d();
                self.set_nz16(d);
                self.idle(bus);
            }
            0x1e => {
                let postbyte = self.fetch8(bus);
                self.exchange(postbyte);
                self.idle_n(bus, 6);
            }
            0x1f => {
                let postbyte = self.fetch8(bus);
                self.transfer(postbyte);
                self.idle_n(bus, 4);
            }

            0x20..=0x2f => {
                let offset = sign_ext8(self.fetch8(bus));
                self.idle(bus);
                if self.branch_cond(op) {
                    self.regs.pc = self.regs.pc.wrapping_add(offset);
                }
            }

            0x30 => {
                let ea = self.ea_indexed(bus);
                self.regs.x = ea;
                self.regs.set_cc_bit(cc::ZERO, ea == 0);
                self.idle(bus);
            }
            0x31 => {
                let ea = self.ea_indexed(bus);
                self.regs.y = ea;
                self.regs.set_cc_bit(cc::ZERO, ea == 0);
                self.idle(bus);
            }
            0x32 => {
                self.regs.s = self.ea_indexed(bus);
                self.idle(bus);
            }
            0x33 => {
                self.regs.u = self.ea_indexed(bus);
                self.idle(bus);
            }
            0x34 => {
                let mask = self.fetch8(bus);
                self.idle_n(bus, 3);
                self.push_selected(bus, IndexReg::S, mask);
            }
            0x35 => {
                let mask = self.fetch8(bus);
                self.idle_n(bus, 2);
                self.pull_selected(bus, IndexReg::S, mask);
                self.idle(bus);
            }
            0x36 => {
                let mask = self.fetch8(bus);
                self.idle_n(bus, 3);
                self.push_selected(bus, IndexReg::U, mask);
            }
            0x37 => {
                let mask = self.fetch8(bus);
                self.idle_n(bus, 2);
                self.pull_selected(bus, IndexReg::U, mask);
                self.idle(bus);
            }
            0x39 => {
                self.idle(bus);
                self.regs.pc = self.pull16(bus, IndexReg::S);
                self.idle(bus);
            }
            0x3a => {
                self.regs.x = self.regs.x.wrapping_add(self.regs.b as u16);
                self.idle_n(bus, 2);
            }
            0x3b => self.rti(bus),
            0x3c => {
                // CWAI: clear selected CC bits, stack everything, park.
                let mask = self.fetch8(bus);
                self.regs.cc &= mask;
                self.idle(bus);
                self.push_entire(bus);
                self.state = State::CwaiCheckHalt;
            }
            0x3d => {
                let result = self.regs.a as u16 * self.regs.b as u16;
                self.regs.set_d(result);
                self.regs.set_cc_bit(cc::ZERO, result == 0);
                self.regs.set_cc_bit(cc::CARRY, result & 0x80 != 0);
                self.idle_n(bus, 10);
            }
            0x3f => {
                self.idle(bus);
                self.push_entire(bus);
                self.regs.set_cc_bit(cc::IRQ_MASK, true);
                self.regs.set_cc_bit(cc::FIRQ_MASK, true);
                self.regs.pc = self.read16(bus, 0xfffa);
                self.idle(bus);
            }

            // Inherent accumulator group; $x1/$x2/$x5/$xB alias on the 6809.
            0x40..=0x4f => {
                let a = self.regs.a;
                let result = self.inherent_rmw(op, a);
                self.regs.a = result;
                self.idle(bus);
            }
            0x50..=0x5f => {
                let b = self.regs.b;
                let result = self.inherent_rmw(op, b);
                self.regs.b = result;
                self.idle(bus);
            }

            // Indexed / extended read-modify-write
            0x60 => self.rmw_mem(bus, AddrMode::Indexed, Self::negate),
            0x61 | 0x62 | 0x65 | 0x6b => self.page1_hole(bus, AddrMode::Indexed, op),
            0x63 => self.rmw_mem(bus, AddrMode::Indexed, Self::complement),
            0x64 => self.rmw_mem(bus, AddrMode::Indexed, Self::logical_shift_right),
            0x66 => self.rmw_mem(bus, AddrMode::Indexed, Self::rotate_right),
            0x67 => self.rmw_mem(bus, AddrMode::Indexed, Self::arith_shift_right),
            0x68 => self.rmw_mem(bus, AddrMode::Indexed, Self::arith_shift_left),
            0x69 => self.rmw_mem(bus, AddrMode::Indexed, Self::rotate_left),
            0x6a => self.rmw_mem(bus, AddrMode::Indexed, Self::decrement),
            0x6c => self.rmw_mem(bus, AddrMode::Indexed, Self::increment),
            0x6d => self.tst_mem(bus, AddrMode::Indexed),
            0x6e => {
                self.regs.pc = self.ea_indexed(bus);
            }
            0x6f => self.clr_mem(bus, AddrMode::Indexed),

            0x70 => self.rmw_mem(bus, AddrMode::Extended, Self::negate),
            0x71 | 0x72 | 0x75 | 0x7b => self.page1_hole(bus, AddrMode::Extended, op),
            0x73 => self.rmw_mem(bus, AddrMode::Extended, Self::complement),
            0x74 => self.rmw_mem(bus, AddrMode::Extended, Self::logical_shift_right),
            0x76 => self.rmw_mem(bus, AddrMode::Extended, Self::rotate_right),
            0x77 => self.rmw_mem(bus, AddrMode::Extended, Self::arith_shift_right),
            0x78 => self.rmw_mem(bus, AddrMode::Extended, Self::arith_shift_left),
            0x79 => self.rmw_mem(bus, AddrMode::Extended, Self::rotate_left),
            0x7a => self.rmw_mem(bus, AddrMode::Extended, Self::decrement),
            0x7c => self.rmw_mem(bus, AddrMode::Extended, Self::increment),
            0x7d => self.tst_mem(bus, AddrMode::Extended),
            0x7e => {
                self.regs.pc = self.ea_extended(bus);
            }
            0x7f => self.clr_mem(bus, AddrMode::Extended),

            // 16-bit column $x3: SUBD / ADDD
            0x83 => {
                let operand = self.fetch16(bus);
                let d = self.regs.d();
                let result = self.alu_sub16(d, operand);
                self.regs.set_d(result);
                self.idle(bus);
            }
            0x93 | 0xa3 | 0xb3 => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let operand = self.read16(bus, ea);
                let d = self.regs.d();
                let result = self.alu_sub16(d, operand);
                self.regs.set_d(result);
                self.idle(bus);
            }
            0xc3 => {
                let operand = self.fetch16(bus);
                let d = self.regs.d();
                let result = self.alu_add16(d, operand);
                self.regs.set_d(result);
                self.idle(bus);
            }
            0xd3 | 0xe3 | 0xf3 => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let operand = self.read16(bus, ea);
                let d = self.regs.d();
                let result = self.alu_add16(d, operand);
                self.regs.set_d(result);
                self.idle(bus);
            }

            // 16-bit column $xC: CMPX / LDD
            0x8c => {
                let operand = self.fetch16(bus);
                let x = self.regs.x;
                self.alu_sub16(x, operand);
                self.idle(bus);
            }
            0x9c | 0xac | 0xbc => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let operand = self.read16(bus, ea);
                let x = self.regs.x;
                self.alu_sub16(x, operand);
                self.idle(bus);
            }
            0xcc => {
                let operand = self.fetch16(bus);
                self.regs.set_d(operand);
                self.flags_load16(operand);
            }
            0xdc | 0xec | 0xfc => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let operand = self.read16(bus, ea);
                self.regs.set_d(operand);
                self.flags_load16(operand);
            }
            0xdd | 0xed | 0xfd => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let d = self.regs.d();
                self.write16(bus, ea, d);
                self.flags_load16(d);
            }

            // Column $xD: BSR / JSR
            0x8d => {
                let offset = sign_ext8(self.fetch8(bus));
                let ret = self.regs.pc;
                self.idle_n(bus, 3);
                self.push16(bus, IndexReg::S, ret);
                self.regs.pc = ret.wrapping_add(offset);
            }
            0x9d | 0xad | 0xbd => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let ret = self.regs.pc;
                self.idle(bus);
                self.push16(bus, IndexReg::S, ret);
                self.regs.pc = ea;
            }

            // Column $xE/$xF: LDX/STX, LDU/STU
            0x8e => {
                let operand = self.fetch16(bus);
                self.regs.x = operand;
                self.flags_load16(operand);
            }
            0x9e | 0xae | 0xbe => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let operand = self.read16(bus, ea);
                self.regs.x = operand;
                self.flags_load16(operand);
            }
            0x9f | 0xaf | 0xbf => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let x = self.regs.x;
                self.write16(bus, ea, x);
                self.flags_load16(x);
            }
            0xce => {
                let operand = self.fetch16(bus);
                self.regs.u = operand;
                self.flags_load16(operand);
            }
            0xde | 0xee | 0xfe => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let operand = self.read16(bus, ea);
                self.regs.u = operand;
                self.flags_load16(operand);
            }
            0xdf | 0xef | 0xff => {
                let mode = mode_of(op);
                let ea = self.ea(bus, mode);
                let u = self.regs.u;
                self.write16(bus, ea, u);
                self.flags_load16(u);
            }

            // 8-bit accumulator columns
            0x80..=0xbb | 0xc0..=0xfb => self.acc_column(bus, op),

            _ => self.illegal(bus, op),
        }
    }

    /// The $x1/$x2/$x5/$xB memory opcode holes: undocumented aliases on the
    /// 6809 (NEG, NGC, LSR, DEC), the immediate-memory group on the 6309.
    fn page1_hole(&mut self, bus: &mut dyn Bus, mode: AddrMode, op: u8) {
        if self.variant == Variant::Hd6309 {
            self.mem_imm_op(bus, mode, op);
            return;
        }
        match op & 0x0f {
            0x01 => self.rmw_mem(bus, mode, Self::negate),
            0x02 => self.rmw_mem(bus, mode, Self::negate_or_complement),
            0x05 => self.rmw_mem(bus, mode, Self::logical_shift_right),
            _ => self.rmw_mem(bus, mode, Self::decrement),
        }
    }

    fn inherent_rmw(&mut self, op: u8, v: u8) -> u8 {
        match op & 0x0f {
            0x00 | 0x01 => self.negate(v),
            0x02 => self.negate_or_complement(v),
            0x03 => self.complement(v),
            0x04 | 0x05 => self.logical_shift_right(v),
            0x06 => self.rotate_right(v),
            0x07 => self.arith_shift_right(v),
            0x08 => self.arith_shift_left(v),
            0x09 => self.rotate_left(v),
            0x0a | 0x0b => self.decrement(v),
            0x0c => self.increment(v),
            0x0d => self.test(v),
            _ => self.clear(v),
        }
    }

    /// 8-bit ALU columns over A ($80-$BF) and B ($C0-$FF). ST has no
    /// immediate form; the $87/$C7 holes fall through to `illegal`.
    fn acc_column(&mut self, bus: &mut dyn Bus, op: u8) {
        let is_a = op < 0xc0;
        let col = op & 0x0f;
        let mode = mode_of(op);
        let immediate = op & 0x30 == 0x00;
        if col == 0x07 {
            if immediate {
                self.illegal(bus, op);
                return;
            }
            let ea = self.ea(bus, mode);
            let value = if is_a { self.regs.a } else { self.regs.b };
            self.write8(bus, ea, value);
            self.flags_load8(value);
            return;
        }
        let operand = if immediate {
            self.fetch8(bus)
        } else {
            let ea = self.ea(bus, mode);
            self.read8(bus, ea)
        };
        let reg = if is_a { self.regs.a } else { self.regs.b };
        let (result, writeback) = match col {
            0x00 => (self.alu_sub8(reg, operand, false), true),
            0x01 => (self.alu_sub8(reg, operand, false), false),
            0x02 => {
                let c = self.regs.cc_bit(cc::CARRY);
                (self.alu_sub8(reg, operand, c), true)
            }
            0x04 => {
                let r = reg & operand;
                self.flags_load8(r);
                (r, true)
            }
            0x05 => {
                let r = reg & operand;
                self.flags_load8(r);
                (r, false)
            }
            0x06 => {
                self.flags_load8(operand);
                (operand, true)
            }
            0x08 => {
                let r = reg ^ operand;
                self.flags_load8(r);
                (r, true)
            }
            0x09 => {
                let c = self.regs.cc_bit(cc::CARRY);
                (self.alu_add8(reg, operand, c), true)
            }
            0x0a => {
                let r = reg | operand;
                self.flags_load8(r);
                (r, true)
            }
            0x0b => (self.alu_add8(reg, operand, false), true),
            _ => {
                self.illegal(bus, op);
                return;
            }
        };
        if writeback {
            if is_a {
                self.regs.a = result;
            } else {
                self.regs.b = result;
            }
        }
    }

    fn execute_page2(&mut self, bus: &mut dyn Bus, op: u8) {
        match op {
            0x21..=0x2f => {
                // Long conditional branches
                let offset = self.fetch16(bus);
                self.idle(bus);
                if self.branch_cond(op) {
                    self.regs.pc = self.regs.pc.wrapping_add(offset);
                    self.idle(bus);
                }
            }
            0x3f => {
                // SWI2 leaves the interrupt masks alone
                self.idle(bus);
                self.push_entire(bus);
                self.regs.pc = self.read16(bus, 0xfff4);
                self.idle(bus);
            }
            0x83 | 0x93 | 0xa3 | 0xb3 => {
                // CMPD
                let operand = self.word_operand(bus, op);
                let d = self.regs.d();
                self.alu_sub16(d, operand);
                self.idle(bus);
            }
            0x8c | 0x9c | 0xac | 0xbc => {
                // CMPY
                let operand = self.word_operand(bus, op);
                let y = self.regs.y;
                self.alu_sub16(y, operand);
                self.idle(bus);
            }
            0x8e | 0x9e | 0xae | 0xbe => {
                let operand = self.word_operand(bus, op);
                self.regs.y = operand;
                self.flags_load16(operand);
            }
            0x9f | 0xaf | 0xbf => {
                let ea = self.ea(bus, mode_of(op));
                let y = self.regs.y;
                self.write16(bus, ea, y);
                self.flags_load16(y);
            }
            0xce | 0xde | 0xee | 0xfe => {
                let operand = self.word_operand(bus, op);
                self.regs.s = operand;
                self.flags_load16(operand);
            }
            0xdf | 0xef | 0xff => {
                let ea = self.ea(bus, mode_of(op));
                let s = self.regs.s;
                self.write16(bus, ea, s);
                self.flags_load16(s);
            }
            _ if self.variant == Variant::Hd6309 => self.execute_page2_6309(bus, op),
            _ => self.illegal(bus, op),
        }
    }

    /// 6309 page-2 extensions: the inter-register ALU group and the W
    /// accumulator's load/store/arithmetic column.
    fn execute_page2_6309(&mut self, bus: &mut dyn Bus, op: u8) {
        match op {
            0x30..=0x37 => {
                let postbyte = self.fetch8(bus);
                self.inter_register_op(op, postbyte);
                self.idle(bus);
            }
            0x80 | 0x90 | 0xa0 | 0xb0 => {
                // SUBW
                let operand = self.word_operand(bus, op);
                let w = self.regs.w();
                let result = self.alu_sub16(w, operand);
                self.regs.set_w(result);
                self.idle(bus);
            }
            0x81 | 0x91 | 0xa1 | 0xb1 => {
                // CMPW
                let operand = self.word_operand(bus, op);
                let w = self.regs.w();
                self.alu_sub16(w, operand);
                self.idle(bus);
            }
            0x86 | 0x96 | 0xa6 | 0xb6 => {
                // LDW
                let operand = self.word_operand(bus, op);
                self.regs.set_w(operand);
                self.flags_load16(operand);
            }
            0x8b | 0x9b | 0xab | 0xbb => {
                // ADDW
                let operand = self.word_operand(bus, op);
                let w = self.regs.w();
                let result = self.alu_add16(w, operand);
                self.regs.set_w(result);
                self.idle(bus);
            }
            0x97 | 0xa7 | 0xb7 => {
                // STW
                let ea = self.ea(bus, mode_of(op));
                let w = self.regs.w();
                self.write16(bus, ea, w);
                self.flags_load16(w);
            }
            _ => self.illegal(bus, op),
        }
    }

    fn execute_page3(&mut self, bus: &mut dyn Bus, op: u8) {
        match op {
            0x3f => {
                // SWI3 leaves the interrupt masks alone
                self.idle(bus);
                self.push_entire(bus);
                self.regs.pc = self.read16(bus, 0xfff2);
                self.idle(bus);
            }
            0x83 | 0x93 | 0xa3 | 0xb3 => {
                // CMPU
                let operand = self.word_operand(bus, op);
                let u = self.regs.u;
                self.alu_sub16(u, operand);
                self.idle(bus);
            }
            0x8c | 0x9c | 0xac | 0xbc => {
                // CMPS
                let operand = self.word_operand(bus, op);
                let s = self.regs.s;
                self.alu_sub16(s, operand);
                self.idle(bus);
            }
            _ if self.variant == Variant::Hd6309 => self.execute_page3_6309(bus, op),
            _ => self.illegal(bus, op),
        }
    }

    fn execute_page3_6309(&mut self, bus: &mut dyn Bus, op: u8) {
        match op {
            0x38..=0x3b => {
                // TFM: one source byte and one destination byte per pair of
                // bus cycles, W counts down, interruptible between pairs.
                let postbyte = self.fetch8(bus);
                if postbyte >> 4 > 4 || postbyte & 0x0f > 4 {
                    debug!("tfm with invalid register postbyte {:02x}", postbyte);
                    return;
                }
                self.tfm_post = postbyte;
                self.tfm_mode = op & 0x03;
                self.idle_n(bus, 2);
                self.state = State::Tfm;
            }
            0x3c => {
                // BITMD: read-and-clear the status bits; neither is raised
                // by this implementation, so the answer is always zero.
                let mask = self.fetch8(bus);
                let status = self.regs.md & 0xc0 & mask;
                self.regs.set_cc_bit(cc::ZERO, status == 0);
                self.regs.md &= !(status);
                self.idle(bus);
            }
            0x3d => {
                // LDMD
                let value = self.fetch8(bus);
                self.regs.md = (self.regs.md & 0xc0) | (value & 0x03);
                self.idle_n(bus, 3);
            }
            _ => self.illegal(bus, op),
        }
    }

    fn tfm_reg(&self, sel: u8) -> u16 {
        match sel {
            0 => self.regs.d(),
            1 => self.regs.x,
            2 => self.regs.y,
            3 => self.regs.u,
            _ => self.regs.s,
        }
    }

    fn tfm_reg_set(&mut self, sel: u8, value: u16) {
        match sel {
            0 => self.regs.set_d(value),
            1 => self.regs.x = value,
            2 => self.regs.y = value,
            3 => self.regs.u = value,
            _ => self.regs.s = value,
        }
    }

    fn tfm_src(&self) -> u16 {
        self.tfm_reg(self.tfm_post >> 4)
    }

    fn tfm_dst(&self) -> u16 {
        self.tfm_reg(self.tfm_post & 0x0f)
    }

    fn tfm_advance(&mut self) {
        let (src_step, dst_step): (i16, i16) = match self.tfm_mode {
            0x00 => (1, 1),
            0x01 => (-1, -1),
            0x02 => (1, 0),
            _ => (0, 1),
        };
        let src_sel = self.tfm_post >> 4;
        let dst_sel = self.tfm_post & 0x0f;
        let src = self.tfm_reg(src_sel).wrapping_add(src_step as u16);
        let dst = self.tfm_reg(dst_sel).wrapping_add(dst_step as u16);
        if src_step != 0 {
            self.tfm_reg_set(src_sel, src);
        }
        if dst_step != 0 {
            self.tfm_reg_set(dst_sel, dst);
        }
    }

    /// 6309 inter-register operations (`ADDR`/`ADCR`/`SUBR`/`SBCR`/`ANDR`/
    /// `ORR`/`EORR`/`CMPR`): source register in the postbyte's high nibble,
    /// destination in the low, always a 16-bit operation on this core.
    fn inter_register_op(&mut self, op: u8, postbyte: u8) {
        let src = self.read_exg_reg(postbyte >> 4);
        let dst = self.read_exg_reg(postbyte & 0x0f);
        let carry = self.regs.cc_bit(cc::CARRY);
        let (result, writeback) = match op {
            0x30 => (self.alu_add16(dst, src), true),
            0x31 => (self.alu_adc16(dst, src, carry), true),
            0x32 => (self.alu_sub16(dst, src), true),
            0x33 => (self.alu_sbc16(dst, src, carry), true),
            0x34 => {
                let r = dst & src;
                self.flags_load16(r);
                (r, true)
            }
            0x35 => {
                let r = dst | src;
                self.flags_load16(r);
                (r, true)
            }
            0x36 => {
                let r = dst ^ src;
                self.flags_load16(r);
                (r, true)
            }
            _ => {
                self.alu_sub16(dst, src);
                (dst, false)
            }
        };
        if writeback {
            self.write_exg_reg(postbyte & 0x0f, result);
        }
    }

    fn word_operand(&mut self, bus: &mut dyn Bus, op: u8) -> u16 {
        if op & 0x30 == 0x00 {
            self.fetch16(bus)
        } else {
            let ea = self.ea(bus, mode_of(op));
            self.read16(bus, ea)
        }
    }

    fn rti(&mut self, bus: &mut dyn Bus) {
        self.idle(bus);
        self.regs.cc = self.pull8(bus, IndexReg::S);
        if self.regs.cc_bit(cc::ENTIRE) {
            self.pull_entire(bus);
        } else {
            self.regs.pc = self.pull16(bus, IndexReg::S);
        }
        self.idle(bus);
    }

    fn daa(&mut self, bus: &mut dyn Bus) {
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
        self.set_nz8(result);
        self.idle(bus);
    }

    fn branch_cond(&self, op: u8) -> bool {
        let invert = op & 0x01 != 0;
        // Each group's test is the "set" condition of the odd opcode; the
        // even twin takes when the test is clear.
        let test = match (op >> 1) & 0x07 {
            0 => false, // BRA/BRN pair
            1 => self.regs.cc_bit(cc::CARRY) || self.regs.cc_bit(cc::ZERO), // BHI/BLS
            2 => self.regs.cc_bit(cc::CARRY),                               // BCC/BCS
            3 => self.regs.cc_bit(cc::ZERO),                                // BNE/BEQ
            4 => self.regs.cc_bit(cc::OVERFLOW),                            // BVC/BVS
            5 => self.regs.cc_bit(cc::NEGATIVE),                            // BPL/BMI
            6 => self.regs.cc_bit(cc::NEGATIVE) != self.regs.cc_bit(cc::OVERFLOW), // BGE/BLT
            _ => {
                (self.regs.cc_bit(cc::NEGATIVE) != self.regs.cc_bit(cc::OVERFLOW))
                    || self.regs.cc_bit(cc::ZERO) // BGT/BLE
            }
        };
        test == invert
    }

    // -- EXG/TFR register codes. Invalid selectors read as all-ones, which
    // is what the undriven internal bus yields on real silicon. The 6309
    // adds W, V and the E/F halves.

    fn read_exg_reg(&self, sel: u8) -> u16 {
        match sel {
            0x0 => self.regs.d(),
            0x1 => self.regs.x,
            0x2 => self.regs.y,
            0x3 => self.regs.u,
            0x4 => self.regs.s,
            0x5 => self.regs.pc,
            0x6 if self.variant == Variant::Hd6309 => self.regs.w(),
            0x7 if self.variant == Variant::Hd6309 => self.regs.v,
            0x8 => self.regs.a as u16 | 0xff00,
            0x9 => self.regs.b as u16 | 0xff00,
            0xa => self.regs.cc as u16 | 0xff00,
            0xb => self.regs.dp as u16 | 0xff00,
            0xe if self.variant == Variant::Hd6309 => self.regs.e as u16 | 0xff00,
            0xf if self.variant == Variant::Hd6309 => self.regs.f as u16 | 0xff00,
            _ => 0xffff,
        }
    }

    fn write_exg_reg(&mut self, sel: u8, value: u16) {
        match sel {
            0x0 => self.regs.set_d(value),
            0x1 => self.regs.x = value,
            0x2 => self.regs.y = value,
            0x3 => self.regs.u = value,
            0x4 => self.regs.s = value,
            0x5 => self.regs.pc = value,
            0x6 if self.variant == Variant::Hd6309 => self.regs.set_w(value),
            0x7 if self.variant == Variant::Hd6309 => self.regs.v = value,
            0x8 => self.regs.a = value as u8,
            0x9 => self.regs.b = value as u8,
            0xa => self.regs.cc = value as u8,
            0xb => self.regs.dp = value as u8,
            0xe if self.variant == Variant::Hd6309 => self.regs.e = value as u8,
            0xf if self.variant == Variant::Hd6309 => self.regs.f = value as u8,
            _ => {}
        }
    }

    fn exchange(&mut self, postbyte: u8) {
        let (hi, lo) = (postbyte >> 4, postbyte & 0x0f);
        let a = self.read_exg_reg(hi);
        let b = self.read_exg_reg(lo);
        self.write_exg_reg(hi, b);
        self.write_exg_reg(lo, a);
    }

    fn transfer(&mut self, postbyte: u8) {
        let (hi, lo) = (postbyte >> 4, postbyte & 0x0f);
        let value = self.read_exg_reg(hi);
        self.write_exg_reg(lo, value);
    }

    // -- PSH/PUL. The postbyte's bit order fixes the stacking order; the
    // "other" stack pointer takes the place of the bit-6 register.

    fn push_selected(&mut self, bus: &mut dyn Bus, which: IndexReg, mask: u8) {
        if mask.get_bit(7) {
            let pc = self.regs.pc;
            self.push16(bus, which, pc);
        }
        if mask.get_bit(6) {
            let other = if which == IndexReg::S {
                self.regs.u
            } else {
                self.regs.s
            };
            self.push16(bus, which, other);
        }
        if mask.get_bit(5) {
            let y = self.regs.y;
            self.push16(bus, which, y);
        }
        if mask.get_bit(4) {
            let x = self.regs.x;
            self.push16(bus, which, x);
        }
        if mask.get_bit(3) {
            let dp = self.regs.dp;
            self.push8(bus, which, dp);
        }
        if mask.get_bit(2) {
            let b = self.regs.b;
            self.push8(bus, which, b);
        }
        if mask.get_bit(1) {
            let a = self.regs.a;
            self.push8(bus, which, a);
        }
        if mask.get_bit(0) {
            let cc_val = self.regs.cc;
            self.push8(bus, which, cc_val);
        }
    }

    fn pull_selected(&mut self, bus: &mut dyn Bus, which: IndexReg, mask: u8) {
        if mask.get_bit(0) {
            self.regs.cc = self.pull8(bus, which);
        }
        if mask.get_bit(1) {
            self.regs.a = self.pull8(bus, which);
        }
        if mask.get_bit(2) {
            self.regs.b = self.pull8(bus, which);
        }
        if mask.get_bit(3) {
            self.regs.dp = self.pull8(bus, which);
        }
        if mask.get_bit(4) {
            self.regs.x = self.pull16(bus, which);
        }
        if mask.get_bit(5) {
            self.regs.y = self.pull16(bus, which);
        }
        if mask.get_bit(6) {
            let value = self.pull16(bus, which);
            if which == IndexReg::S {
                self.regs.u = value;
            } else {
                self.regs.s = value;
            }
        }
        if mask.get_bit(7) {
            self.regs.pc = self.pull16(bus, which);
        }
    }

    fn illegal(&mut self, bus: &mut dyn Bus, op: u8) {
        debug!("illegal opcode {:02x} at {:04x}", op, self.regs.pc);
        self.idle(bus);
    }
}

fn mode_of(op: u8) -> AddrMode {
    match op & 0x30 {
        0x10 => AddrMode::Direct,
        0x20 => AddrMode::Indexed,
        _ => AddrMode::Extended,
    }
}

fn sign_extend5(v: u8) -> i16 {
    if v & 0x10 != 0 {
        (v as i16) | !0x1f
    } else {
        v as i16
    }
}

fn sign_ext8(v: u8) -> u16 {
    v as i8 as i16 as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::new_shared;

    struct FlatBus {
        mem: [u8; 0x10000],
    }

    impl FlatBus {
        fn new() -> Self {
            Self { mem: [0; 0x10000] }
        }

        fn load(&mut self, address: u16, bytes: &[u8]) {
            for (i, byte) in bytes.iter().enumerate() {
                self.mem[address as usize + i] = *byte;
            }
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

    fn new_cpu(variant: Variant) -> (Cpu6809, FlatBus) {
        let cpu = Cpu6809::new(
            variant,
            new_shared(IrqLine::new("irq")),
            new_shared(IrqLine::new("firq")),
            new_shared(IrqLine::new("nmi")),
            new_shared(IrqLine::new("halt")),
        );
        (cpu, FlatBus::new())
    }

    fn new_6809() -> (Cpu6809, FlatBus) {
        new_cpu(Variant::Mc6809)
    }

    fn boot(cpu: &mut Cpu6809, bus: &mut FlatBus, entry: u16) {
        bus.mem[0xfffe] = (entry >> 8) as u8;
        bus.mem[0xffff] = entry as u8;
        cpu.reset(bus);
    }

    #[test]
    fn reset_vectors_through_fffe_and_masks_interrupts() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0xb3b4);
        assert_eq!(0xb3b4, cpu.get_pc());
        assert!(cpu.regs.cc_bit(cc::IRQ_MASK));
        assert!(cpu.regs.cc_bit(cc::FIRQ_MASK));
    }

    #[test]
    fn lda_immediate_sets_zero_and_clears_overflow() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        bus.load(0x1000, &[0x86, 0x00]);
        cpu.regs.set_cc_bit(cc::OVERFLOW, true);
        cpu.step(&mut bus);
        assert_eq!(0, cpu.regs.a);
        assert!(cpu.regs.cc_bit(cc::ZERO));
        assert!(!cpu.regs.cc_bit(cc::OVERFLOW));
    }

    #[test]
    fn sta_direct_uses_dp_page() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.a = 0x42;
        cpu.regs.dp = 0x20;
        bus.load(0x1000, &[0x97, 0x34]); // STA <$34
        cpu.step(&mut bus);
        assert_eq!(0x42, bus.mem[0x2034]);
    }

    #[test]
    fn adda_sets_half_carry_and_overflow() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.a = 0x7f;
        bus.load(0x1000, &[0x8b, 0x01]); // ADDA #1
        cpu.step(&mut bus);
        assert_eq!(0x80, cpu.regs.a);
        assert!(cpu.regs.cc_bit(cc::OVERFLOW));
        assert!(cpu.regs.cc_bit(cc::HALF_CARRY));
        assert!(cpu.regs.cc_bit(cc::NEGATIVE));
        assert!(!cpu.regs.cc_bit(cc::CARRY));
    }

    #[test]
    fn subd_immediate_borrows_through_carry() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.set_d(0x0001);
        bus.load(0x1000, &[0x83, 0x00, 0x02]); // SUBD #2
        cpu.step(&mut bus);
        assert_eq!(0xffff, cpu.regs.d());
        assert!(cpu.regs.cc_bit(cc::CARRY));
        assert!(cpu.regs.cc_bit(cc::NEGATIVE));
    }

    #[test]
    fn cmpx_leaves_register_untouched() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.x = 0x8000;
        bus.load(0x1000, &[0x8c, 0x80, 0x00]); // CMPX #$8000
        cpu.step(&mut bus);
        assert_eq!(0x8000, cpu.regs.x);
        assert!(cpu.regs.cc_bit(cc::ZERO));
    }

    #[test]
    fn branch_polarity_bhi_bcc_beq() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        // BHI taken only when both C and Z clear.
        cpu.regs.cc = 0;
        bus.load(0x1000, &[0x22, 0x10]);
        cpu.step(&mut bus);
        assert_eq!(0x1012, cpu.get_pc());
        // BCC not taken when carry set.
        cpu.set_pc(0x2000);
        cpu.regs.set_cc_bit(cc::CARRY, true);
        bus.load(0x2000, &[0x24, 0x10]);
        cpu.step(&mut bus);
        assert_eq!(0x2002, cpu.get_pc());
        // BEQ taken when zero set.
        cpu.set_pc(0x3000);
        cpu.regs.set_cc_bit(cc::ZERO, true);
        bus.load(0x3000, &[0x27, 0x10]);
        cpu.step(&mut bus);
        assert_eq!(0x3012, cpu.get_pc());
    }

    #[test]
    fn lbra_takes_sixteen_bit_offset_backwards() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        bus.load(0x1000, &[0x16, 0xff, 0xfd]); // LBRA -3
        cpu.step(&mut bus);
        assert_eq!(0x1000, cpu.get_pc());
    }

    #[test]
    fn indexed_post_increment_steps_register() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.x = 0x4000;
        bus.mem[0x4000] = 0x55;
        bus.load(0x1000, &[0xa6, 0x80]); // LDA ,X+
        cpu.step(&mut bus);
        assert_eq!(0x55, cpu.regs.a);
        assert_eq!(0x4001, cpu.regs.x);
    }

    #[test]
    fn indexed_extended_indirect_dereferences_pointer() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        bus.load(0x5000, &[0x60, 0x00]); // pointer to $6000
        bus.mem[0x6000] = 0x99;
        bus.load(0x1000, &[0xa6, 0x9f, 0x50, 0x00]); // LDA [$5000]
        cpu.step(&mut bus);
        assert_eq!(0x99, cpu.regs.a);
    }

    #[test]
    fn pshs_puls_roundtrip_preserves_registers() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.s = 0x7f00;
        cpu.regs.a = 0x11;
        cpu.regs.b = 0x22;
        cpu.regs.x = 0x3344;
        bus.load(0x1000, &[0x34, 0x16]); // PSHS A,B,X
        cpu.step(&mut bus);
        assert_eq!(0x7f00 - 4, cpu.regs.s);
        cpu.regs.a = 0;
        cpu.regs.b = 0;
        cpu.regs.x = 0;
        bus.load(0x1002, &[0x35, 0x16]); // PULS A,B,X
        cpu.step(&mut bus);
        assert_eq!(0x11, cpu.regs.a);
        assert_eq!(0x22, cpu.regs.b);
        assert_eq!(0x3344, cpu.regs.x);
        assert_eq!(0x7f00, cpu.regs.s);
    }

    #[test]
    fn exg_swaps_eight_bit_pair() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.a = 0xaa;
        cpu.regs.dp = 0x55;
        bus.load(0x1000, &[0x1e, 0x8b]); // EXG A,DP
        cpu.step(&mut bus);
        assert_eq!(0x55, cpu.regs.a);
        assert_eq!(0xaa, cpu.regs.dp);
    }

    #[test]
    fn irq_pushes_full_frame_and_vectors() {
        let (mut cpu, mut bus) = new_6809();
        bus.load(0xfff8, &[0x30, 0x00]); // IRQ vector -> $3000
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.s = 0x7f00;
        cpu.regs.set_cc_bit(cc::IRQ_MASK, false);
        cpu.irq.borrow_mut().set_low(0, true);
        cpu.step(&mut bus);
        assert_eq!(0x3000, cpu.get_pc());
        assert!(cpu.regs.cc_bit(cc::IRQ_MASK));
        assert_eq!(0x7f00 - 12, cpu.regs.s);
        // The stacked CC has E set, so RTI will restore the whole frame.
        assert!(bus.mem[(0x7f00 - 12) as usize] & 0x80 != 0);
    }

    #[test]
    fn firq_pushes_short_frame_unless_masked() {
        let (mut cpu, mut bus) = new_6809();
        bus.load(0xfff6, &[0x40, 0x00]);
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.s = 0x7f00;
        bus.load(0x1000, &[0x12]); // NOP
        cpu.firq.borrow_mut().set_low(0, true);
        // F mask still set from reset: FIRQ must not dispatch.
        cpu.step(&mut bus);
        assert_eq!(0x1001, cpu.get_pc());
        cpu.regs.set_cc_bit(cc::FIRQ_MASK, false);
        cpu.step(&mut bus);
        assert_eq!(0x4000, cpu.get_pc());
        assert_eq!(0x7f00 - 3, cpu.regs.s, "CC and PC only");
    }

    #[test]
    fn rti_restores_frame_pushed_by_irq() {
        let (mut cpu, mut bus) = new_6809();
        bus.load(0xfff8, &[0x30, 0x00]);
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.s = 0x7f00;
        cpu.regs.a = 0x12;
        cpu.regs.x = 0x3456;
        cpu.regs.set_cc_bit(cc::IRQ_MASK, false);
        cpu.irq.borrow_mut().set_low(0, true);
        cpu.step(&mut bus);
        cpu.irq.borrow_mut().set_low(0, false);
        cpu.regs.a = 0;
        cpu.regs.x = 0;
        bus.load(0x3000, &[0x3b]); // RTI
        cpu.step(&mut bus);
        assert_eq!(0x1000, cpu.get_pc());
        assert_eq!(0x12, cpu.regs.a);
        assert_eq!(0x3456, cpu.regs.x);
        assert_eq!(0x7f00, cpu.regs.s);
    }

    #[test]
    fn nmi_is_edge_triggered() {
        let (mut cpu, mut bus) = new_6809();
        bus.load(0xfffc, &[0x50, 0x00]);
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.s = 0x7f00;
        bus.load(0x1000, &[0x12, 0x12]); // NOP NOP
        cpu.nmi.borrow_mut().set_low(0, true);
        cpu.step(&mut bus);
        assert_eq!(0x5000, cpu.get_pc());
        // Line still held low: no second dispatch without a new edge.
        bus.load(0x5000, &[0x12]);
        cpu.step(&mut bus);
        assert_eq!(0x5001, cpu.get_pc());
    }

    #[test]
    fn sync_parks_until_any_interrupt_edge() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        bus.load(0x1000, &[0x13, 0x12]); // SYNC; NOP
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(0x1001, cpu.get_pc(), "still parked");
        // A masked IRQ releases SYNC without dispatching.
        cpu.irq.borrow_mut().set_low(0, true);
        cpu.step(&mut bus); // releases
        cpu.step(&mut bus); // executes NOP
        assert_eq!(0x1002, cpu.get_pc());
    }

    #[test]
    fn cwai_stacks_then_vectors_without_restacking() {
        let (mut cpu, mut bus) = new_6809();
        bus.load(0xfff8, &[0x30, 0x00]);
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.s = 0x7f00;
        bus.load(0x1000, &[0x3c, 0xef]); // CWAI #$EF (clear I)
        cpu.step(&mut bus);
        assert_eq!(0x7f00 - 12, cpu.regs.s, "context stacked up front");
        let stacked_s = cpu.regs.s;
        cpu.step(&mut bus);
        assert_eq!(stacked_s, cpu.regs.s, "waiting does not grow the stack");
        cpu.irq.borrow_mut().set_low(0, true);
        cpu.step(&mut bus);
        assert_eq!(0x3000, cpu.get_pc());
        assert_eq!(stacked_s, cpu.regs.s, "no second frame");
    }

    #[test]
    fn halt_stalls_without_advancing_pc() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        bus.load(0x1000, &[0x12]);
        cpu.halt.borrow_mut().set_low(0, true);
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(0x1000, cpu.get_pc());
        cpu.halt.borrow_mut().set_low(0, false);
        cpu.step(&mut bus);
        assert_eq!(0x1001, cpu.get_pc());
    }

    #[test]
    fn daa_corrects_bcd_addition() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.a = 0x19;
        bus.load(0x1000, &[0x8b, 0x28, 0x19]); // ADDA #$28; DAA
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(0x47, cpu.regs.a);
    }

    #[test]
    fn mul_sets_carry_from_bit_seven_of_b() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.a = 0x10;
        cpu.regs.b = 0x18;
        bus.load(0x1000, &[0x3d]);
        cpu.step(&mut bus);
        assert_eq!(0x0180, cpu.regs.d());
        assert!(cpu.regs.cc_bit(cc::CARRY));
    }

    #[test]
    fn undocumented_ngc_complements_when_carry_set() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        bus.mem[0x0040] = 0x0f;
        cpu.regs.set_cc_bit(cc::CARRY, true);
        bus.load(0x1000, &[0x02, 0x40]); // NGC <$40
        cpu.step(&mut bus);
        assert_eq!(0xf0, bus.mem[0x0040]);
    }

    #[test]
    fn leax_sets_only_zero_flag() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.x = 0x0001;
        cpu.regs.set_cc_bit(cc::NEGATIVE, true);
        bus.load(0x1000, &[0x30, 0x1f]); // LEAX -1,X
        cpu.step(&mut bus);
        assert_eq!(0x0000, cpu.regs.x);
        assert!(cpu.regs.cc_bit(cc::ZERO));
        assert!(cpu.regs.cc_bit(cc::NEGATIVE), "N untouched by LEA");
    }

    #[test]
    fn hd6309_oim_ors_immediate_into_memory() {
        let (mut cpu, mut bus) = new_cpu(Variant::Hd6309);
        boot(&mut cpu, &mut bus, 0x1000);
        bus.mem[0x0040] = 0x01;
        bus.load(0x1000, &[0x01, 0x80, 0x40]); // OIM #$80,<$40
        cpu.step(&mut bus);
        assert_eq!(0x81, bus.mem[0x0040]);
        assert!(cpu.regs.cc_bit(cc::NEGATIVE));
    }

    #[test]
    fn hd6309_ldw_and_tfm_block_copy() {
        let (mut cpu, mut bus) = new_cpu(Variant::Hd6309);
        boot(&mut cpu, &mut bus, 0x1000);
        bus.load(0x4000, &[0xde, 0xad, 0xbe]);
        cpu.regs.x = 0x4000;
        cpu.regs.y = 0x5000;
        bus.load(0x1000, &[0x10, 0x86, 0x00, 0x03]); // LDW #3
        cpu.step(&mut bus);
        assert_eq!(3, cpu.regs.w());
        bus.load(0x1004, &[0x11, 0x38, 0x12, 0x12]); // TFM X+,Y+; NOP
        while cpu.regs.w() != 0 {
            cpu.step(&mut bus);
        }
        assert_eq!(&bus.mem[0x5000..0x5003], &[0xde, 0xad, 0xbe]);
        assert_eq!(0x4003, cpu.regs.x);
        assert_eq!(0x5003, cpu.regs.y);
        cpu.step(&mut bus);
        assert_eq!(0x1008, cpu.get_pc(), "falls through to the NOP");
    }

    #[test]
    fn hd6309_tfm_is_interruptible_and_resumes() {
        let (mut cpu, mut bus) = new_cpu(Variant::Hd6309);
        bus.load(0xfff8, &[0x30, 0x00]);
        bus.load(0x3000, &[0x3b]); // RTI
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.s = 0x7000;
        cpu.regs.x = 0x4000;
        cpu.regs.y = 0x5000;
        bus.load(0x4000, &[1, 2, 3, 4]);
        bus.load(0x1000, &[0x10, 0x86, 0x00, 0x04]); // LDW #4
        cpu.step(&mut bus);
        cpu.regs.set_cc_bit(cc::IRQ_MASK, false);
        bus.load(0x1004, &[0x11, 0x38, 0x12]); // TFM X+,Y+
        cpu.step(&mut bus); // decode + first pair
        cpu.irq.borrow_mut().set_low(0, true);
        cpu.step(&mut bus); // one more pair, then interrupt noticed
        cpu.step(&mut bus); // dispatch
        assert_eq!(0x3000, cpu.get_pc());
        cpu.irq.borrow_mut().set_low(0, false);
        cpu.step(&mut bus); // RTI back into the TFM opcode
        while cpu.regs.w() != 0 {
            cpu.step(&mut bus);
        }
        assert_eq!(&bus.mem[0x5000..0x5004], &[1, 2, 3, 4]);
    }

    #[test]
    fn hd6309_addr_adds_register_to_register() {
        let (mut cpu, mut bus) = new_cpu(Variant::Hd6309);
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.x = 0x1111;
        cpu.regs.y = 0x2222;
        bus.load(0x1000, &[0x10, 0x30, 0x12]); // ADDR X,Y
        cpu.step(&mut bus);
        assert_eq!(0x3333, cpu.regs.y);
        assert_eq!(0x1111, cpu.regs.x);
    }

    #[test]
    fn hd6309_sexw_sign_extends_w_into_d() {
        let (mut cpu, mut bus) = new_cpu(Variant::Hd6309);
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.set_w(0x8001);
        bus.load(0x1000, &[0x14]);
        cpu.step(&mut bus);
        assert_eq!(0xffff, cpu.regs.d());
        assert!(cpu.regs.cc_bit(cc::NEGATIVE));
    }

    #[test]
    fn hd6309_exg_reaches_w_register() {
        let (mut cpu, mut bus) = new_cpu(Variant::Hd6309);
        boot(&mut cpu, &mut bus, 0x1000);
        cpu.regs.x = 0x1234;
        cpu.regs.set_w(0x5678);
        bus.load(0x1000, &[0x1e, 0x16]); // EXG X,W
        cpu.step(&mut bus);
        assert_eq!(0x5678, cpu.regs.x);
        assert_eq!(0x1234, cpu.regs.w());
    }

    #[test]
    fn instruction_hook_can_stop_the_cpu() {
        let (mut cpu, mut bus) = new_6809();
        boot(&mut cpu, &mut bus, 0x1000);
        bus.load(0x1000, &[0x12]);
        cpu.instruction_hook = Some(Box::new(|regs| regs.pc != 0x1000));
        cpu.step(&mut bus);
        assert!(!cpu.is_running());
        assert_eq!(0x1000, cpu.get_pc(), "stopped before the fetch");
    }
}
