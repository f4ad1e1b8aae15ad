// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! A 6821 Peripheral Interface Adapter. The Dragon/CoCo machines carry two
//! (PIA0 at `$FF00-$FF1F`, PIA1 at `$FF20-$FF3F`); the MC-10 uses the 6803's
//! built-in ports instead and does not instantiate this chip.

mod port;

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;
use bit_field::BitField;

use crate::util::{IrqLine, Pin, Shared};

pub use self::port::IoPort;

pub mod reg {
    pub const PRA: u8 = 0x00;
    pub const CRA: u8 = 0x01;
    pub const PRB: u8 = 0x02;
    pub const CRB: u8 = 0x03;
}

#[derive(Copy, Clone, PartialEq)]
pub enum Side {
    A,
    B,
}

/// Invoked just before a data-register read so external state (keyboard
/// matrix scan, joystick comparator, printer BUSY) can assert source/sink
/// atomically with the read, per the `data_preread` delegate.
pub type PreReadHook = Box<dyn FnMut(Side, &Shared<IoPort>, &Shared<IoPort>)>;
pub type PostWriteHook = Box<dyn FnMut(Side, u8)>;

pub struct Pia {
    port_a: Shared<IoPort>,
    port_b: Shared<IoPort>,
    cra: u8,
    crb: u8,
    ca1: Pin,
    cb1: Pin,
    ca2: Pin,
    cb2: Pin,
    irq_a: Shared<IrqLine>,
    irq_b: Shared<IrqLine>,
    irq_source: usize,
    data_preread: Option<PreReadHook>,
    data_postwrite: Option<PostWriteHook>,
    control_postwrite: Option<PostWriteHook>,
}

impl Pia {
    pub fn new(
        irq_source: usize,
        port_a: Shared<IoPort>,
        port_b: Shared<IoPort>,
        irq_a: Shared<IrqLine>,
        irq_b: Shared<IrqLine>,
    ) -> Self {
        Self {
            port_a,
            port_b,
            cra: 0,
            crb: 0,
            ca1: Pin::new_low(),
            cb1: Pin::new_low(),
            ca2: Pin::new_low(),
            cb2: Pin::new_low(),
            irq_a,
            irq_b,
            irq_source,
            data_preread: None,
            data_postwrite: None,
            control_postwrite: None,
        }
    }

    pub fn set_data_preread(&mut self, hook: PreReadHook) {
        self.data_preread = Some(hook);
    }

    pub fn set_data_postwrite(&mut self, hook: PostWriteHook) {
        self.data_postwrite = Some(hook);
    }

    pub fn set_control_postwrite(&mut self, hook: PostWriteHook) {
        self.control_postwrite = Some(hook);
    }

    pub fn reset(&mut self) {
        self.cra = 0;
        self.crb = 0;
        self.port_a.borrow_mut().reset();
        self.port_b.borrow_mut().reset();
        self.ca1 = Pin::new_low();
        self.cb1 = Pin::new_low();
        self.ca2 = Pin::new_low();
        self.cb2 = Pin::new_low();
        self.irq_a.borrow_mut().set_low(self.irq_source, false);
        self.irq_b.borrow_mut().set_low(self.irq_source, false);
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        match reg & 0x03 {
            reg::PRA => {
                if self.cra.get_bit(2) {
                    self.read_data(Side::A)
                } else {
                    self.port_a.borrow().get_direction()
                }
            }
            // Reading a control register exposes the latched edge flags in
            // bits 7/6 but does not clear them; only a data-register read
            // does.
            reg::CRA => self.cra,
            reg::PRB => {
                if self.crb.get_bit(2) {
                    self.read_data(Side::B)
                } else {
                    self.port_b.borrow().get_direction()
                }
            }
            reg::CRB => self.crb,
            _ => unreachable!(),
        }
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        match reg & 0x03 {
            reg::PRA => {
                if self.cra.get_bit(2) {
                    self.port_a.borrow_mut().set_output(value);
                    if let Some(ref mut hook) = self.data_postwrite {
                        hook(Side::A, value);
                    }
                } else {
                    self.port_a.borrow_mut().set_direction(value);
                }
            }
            reg::CRA => {
                // Bits 7/6 are flag outputs, untouched by a write.
                self.cra = (self.cra & 0xc0) | (value & 0x3f);
                self.sync_irq(Side::A);
                if let Some(ref mut hook) = self.control_postwrite {
                    hook(Side::A, self.cra);
                }
            }
            reg::PRB => {
                if self.crb.get_bit(2) {
                    self.port_b.borrow_mut().set_output(value);
                    if let Some(ref mut hook) = self.data_postwrite {
                        hook(Side::B, value);
                    }
                } else {
                    self.port_b.borrow_mut().set_direction(value);
                }
            }
            reg::CRB => {
                self.crb = (self.crb & 0xc0) | (value & 0x3f);
                self.sync_irq(Side::B);
                if let Some(ref mut hook) = self.control_postwrite {
                    hook(Side::B, self.crb);
                }
            }
            _ => unreachable!(),
        }
    }

    /// Edge-trigger CA1/CB1 (HS/FS from the VDG, or a host peripheral).
    /// Control bit 1 selects which edge latches the bit-7 flag.
    pub fn set_c1(&mut self, side: Side, active: bool) {
        let (pin, cr) = match side {
            Side::A => (&mut self.ca1, &mut self.cra),
            Side::B => (&mut self.cb1, &mut self.crb),
        };
        pin.set_active(active);
        let rising_wanted = cr.get_bit(1);
        if (rising_wanted && pin.is_rising()) || (!rising_wanted && pin.is_falling()) {
            cr.set_bit(7, true);
        }
        self.sync_irq(side);
    }

    /// CA2/CB2 as an input (control bit 5 clear): bit 4 selects the edge
    /// that latches the bit-6 flag. In output mode the line is driven by
    /// the machine-side wiring and no flag is kept here.
    pub fn set_c2(&mut self, side: Side, active: bool) {
        let (pin, cr) = match side {
            Side::A => (&mut self.ca2, &mut self.cra),
            Side::B => (&mut self.cb2, &mut self.crb),
        };
        pin.set_active(active);
        if !cr.get_bit(5) {
            let rising_wanted = cr.get_bit(4);
            if (rising_wanted && pin.is_rising()) || (!rising_wanted && pin.is_falling()) {
                cr.set_bit(6, true);
            }
        }
        self.sync_irq(side);
    }

    /// A data-register read: run the pre-read delegate so external drivers
    /// can settle their source/sink masks, latch the pin state, and clear
    /// both edge flags for this side.
    fn read_data(&mut self, side: Side) -> u8 {
        if let Some(mut hook) = self.data_preread.take() {
            hook(side, &self.port_a, &self.port_b);
            self.data_preread = Some(hook);
        }
        let value = match side {
            Side::A => self.port_a.borrow().value(),
            Side::B => self.port_b.borrow().value(),
        };
        match side {
            Side::A => self.cra &= 0x3f,
            Side::B => self.crb &= 0x3f,
        }
        self.sync_irq(side);
        value
    }

    fn sync_irq(&mut self, side: Side) {
        let (cr, irq) = match side {
            Side::A => (self.cra, &self.irq_a),
            Side::B => (self.crb, &self.irq_b),
        };
        let c1_irq = cr.get_bit(0) && cr.get_bit(7);
        let c2_irq = cr.get_bit(3) && !cr.get_bit(5) && cr.get_bit(6);
        irq.borrow_mut().set_low(self.irq_source, c1_irq || c2_irq);
    }
}
