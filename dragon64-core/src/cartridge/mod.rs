// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod mpi;

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

pub use self::mpi::Mpi;

/// A cartridge sees every CPU cycle, not just the ones addressed to it, so
/// it can snoop the bus and drive `EXTMEM` to veto the host's own RAM
/// decode for that cycle.
pub trait Cartridge {
    /// `p2` is asserted for `$FF40-$FF5F`, `r2` for `$C000-$FEFF`.
    fn read(&mut self, address: u16, p2: bool, r2: bool, data: u8) -> u8;
    /// Returns the (possibly modified) data byte; some carts drive the bus
    /// back on a nominally-write cycle.
    fn write(&mut self, address: u16, p2: bool, r2: bool, data: u8) -> u8;
    fn reset(&mut self, hard: bool);
    /// Called when the cartridge is seated in (or removed from) a live
    /// machine, for carts that need to spin up or park their peripherals.
    fn attach(&mut self) {}
    fn detach(&mut self) {}
    /// Named capability query ("floppy", "sound", ...), the hook a host
    /// uses to find out what a cartridge brings to the party.
    fn has_interface(&self, _name: &str) -> bool {
        false
    }
    fn extmem(&self) -> bool {
        false
    }
    fn firq(&self) -> bool {
        false
    }
    fn nmi(&self) -> bool {
        false
    }
    fn halt(&self) -> bool {
        false
    }
}

/// A cartridge holding a flat ROM image with no onboard logic: reads
/// within its image return ROM data, everything else falls through.
pub struct RomCartridge {
    data: Vec<u8>,
    base: u16,
}

impl RomCartridge {
    pub fn new(data: Vec<u8>, base: u16) -> Self {
        Self { data, base }
    }
}

impl Cartridge for RomCartridge {
    fn read(&mut self, address: u16, _p2: bool, r2: bool, data: u8) -> u8 {
        if r2 && !self.data.is_empty() {
            let offset = address.wrapping_sub(self.base) as usize % self.data.len();
            self.data[offset]
        } else {
            data
        }
    }

    fn write(&mut self, _address: u16, _p2: bool, _r2: bool, data: u8) -> u8 {
        data
    }

    fn reset(&mut self, _hard: bool) {}
}

pub type BoxedCartridge = Box<dyn Cartridge>;
