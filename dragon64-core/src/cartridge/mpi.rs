// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! The Tandy Multi-Pak Interface: four cartridge slots behind one routing
//! register. A write to `$FF7F` selects which slot answers `R2` (ROM select)
//! and which answers `P2` (I/O select) independently; a RACE cage collapses
//! both routes into the same nibble at `$FEFF` instead.

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;

use super::Cartridge;

const SLOT_COUNT: usize = 4;

pub struct Mpi {
    slots: [Option<Box<dyn Cartridge>>; SLOT_COUNT],
    cts_route: usize,
    p2_route: usize,
}

impl Mpi {
    pub fn new() -> Self {
        Self {
            slots: [None, None, None, None],
            cts_route: 0,
            p2_route: 0,
        }
    }

    pub fn insert(&mut self, slot: usize, cart: Box<dyn Cartridge>) {
        self.slots[slot % SLOT_COUNT] = Some(cart);
    }

    pub fn remove(&mut self, slot: usize) {
        self.slots[slot % SLOT_COUNT] = None;
    }

    fn is_routing_register(address: u16) -> bool {
        address == 0xff7f || address == 0xfeff
    }

    fn set_routing(&mut self, address: u16, value: u8) {
        if address == 0xfeff {
            // RACE cage: both routes share the low nibble.
            let slot = (value & 0x03) as usize;
            self.cts_route = slot;
            self.p2_route = slot;
        } else {
            // Tandy MPI: ROM select in the high nibble, I/O in the low.
            self.cts_route = ((value >> 4) & 0x03) as usize;
            self.p2_route = (value & 0x03) as usize;
        }
        debug!(
            "mpi routing: cts slot {}, p2 slot {}",
            self.cts_route, self.p2_route
        );
    }
}

impl Cartridge for Mpi {
    fn read(&mut self, address: u16, p2: bool, r2: bool, data: u8) -> u8 {
        if Self::is_routing_register(address) {
            return data;
        }
        if !p2 && !r2 {
            for slot in self.slots.iter_mut().flatten() {
                slot.read(address, false, false, data);
            }
            return data;
        }
        let slot_index = if r2 { self.cts_route } else { self.p2_route };
        match self.slots[slot_index].as_mut() {
            Some(cart) => cart.read(address, p2, r2, data),
            None => data,
        }
    }

    fn write(&mut self, address: u16, p2: bool, r2: bool, data: u8) -> u8 {
        if Self::is_routing_register(address) {
            self.set_routing(address, data);
            return data;
        }
        if !p2 && !r2 {
            let mut result = data;
            for slot in self.slots.iter_mut().flatten() {
                result = slot.write(address, false, false, result);
            }
            return result;
        }
        let slot_index = if r2 { self.cts_route } else { self.p2_route };
        match self.slots[slot_index].as_mut() {
            Some(cart) => cart.write(address, p2, r2, data),
            None => data,
        }
    }

    fn reset(&mut self, hard: bool) {
        if hard {
            self.cts_route = 0;
            self.p2_route = 0;
        }
        for slot in self.slots.iter_mut().flatten() {
            slot.reset(hard);
        }
    }

    fn attach(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.attach();
        }
    }

    fn detach(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.detach();
        }
    }

    fn has_interface(&self, name: &str) -> bool {
        self.slots.iter().flatten().any(|c| c.has_interface(name))
    }

    fn extmem(&self) -> bool {
        self.slots[self.cts_route]
            .as_ref()
            .map(|c| c.extmem())
            .unwrap_or(false)
    }

    fn firq(&self) -> bool {
        self.slots[self.cts_route]
            .as_ref()
            .map(|c| c.firq())
            .unwrap_or(false)
    }

    fn nmi(&self) -> bool {
        self.slots.iter().flatten().any(|c| c.nmi())
    }

    fn halt(&self) -> bool {
        self.slots.iter().flatten().any(|c| c.halt())
    }
}

impl Default for Mpi {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::RomCartridge;

    #[cfg(not(feature = "std"))]
    use alloc::vec;

    #[test]
    fn routing_register_selects_cts_from_high_nibble() {
        let mut mpi = Mpi::new();
        mpi.insert(0, Box::new(RomCartridge::new(vec![0xaa], 0xc000)));
        mpi.insert(1, Box::new(RomCartridge::new(vec![0xbb], 0xc000)));
        mpi.write(0xff7f, false, false, 0x10);
        assert_eq!(0xbb, mpi.read(0xc000, false, true, 0x00));
        mpi.write(0xff7f, false, false, 0x01);
        assert_eq!(0xaa, mpi.read(0xc000, false, true, 0x00), "low nibble is P2 only");
    }

    #[test]
    fn race_cage_shares_one_route_for_both_selects() {
        let mut mpi = Mpi::new();
        mpi.insert(2, Box::new(RomCartridge::new(vec![0xcc], 0xc000)));
        mpi.write(0xfeff, false, false, 0x02);
        assert_eq!(0xcc, mpi.read(0xc000, false, true, 0x00));
    }

    struct ShoutyCart;

    impl Cartridge for ShoutyCart {
        fn read(&mut self, _address: u16, _p2: bool, _r2: bool, data: u8) -> u8 {
            data
        }
        fn write(&mut self, _address: u16, _p2: bool, _r2: bool, data: u8) -> u8 {
            data
        }
        fn reset(&mut self, _hard: bool) {}
        fn firq(&self) -> bool {
            true
        }
        fn nmi(&self) -> bool {
            true
        }
    }

    #[test]
    fn nmi_is_or_of_all_slots_but_firq_follows_cts() {
        let mut mpi = Mpi::new();
        mpi.insert(3, Box::new(ShoutyCart));
        assert!(mpi.nmi(), "any slot may pull NMI");
        assert!(!mpi.firq(), "slot 3 is not the CTS slot");
        mpi.write(0xff7f, false, false, 0x30);
        assert!(mpi.firq(), "now it is");
    }

    #[test]
    fn hard_reset_parks_both_routes_on_slot_zero() {
        let mut mpi = Mpi::new();
        mpi.insert(0, Box::new(RomCartridge::new(vec![0xaa], 0xc000)));
        mpi.insert(1, Box::new(RomCartridge::new(vec![0xbb], 0xc000)));
        mpi.write(0xff7f, false, false, 0x11);
        mpi.reset(true);
        assert_eq!(0xaa, mpi.read(0xc000, false, true, 0x00));
    }
}
