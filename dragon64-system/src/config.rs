// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::net::SocketAddr;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Architecture {
    Dragon32,
    Dragon64,
    CoCo1,
    CoCo2,
    Mc10,
}

impl Architecture {
    pub fn default_ram_size(self) -> u32 {
        match self {
            Architecture::Dragon32 => 32 * 1024,
            Architecture::Dragon64 => 64 * 1024,
            Architecture::CoCo1 => 16 * 1024,
            Architecture::CoCo2 => 64 * 1024,
            Architecture::Mc10 => 20 * 1024,
        }
    }

    pub fn has_sam(self) -> bool {
        !matches!(self, Architecture::Mc10)
    }

    /// CoCo decodes PIA0/PIA1 without requiring control-bit 2 to already be
    /// set; Dragon requires the DDR/data mux bit before I/O responds. See
    /// the Machine composer's "relaxed PIA decode" policy flag.
    pub fn relaxed_pia_decode(self) -> bool {
        matches!(self, Architecture::CoCo1 | Architecture::CoCo2)
    }

    /// An unexpanded Dragon 32 aliases its 4K/16K RAM without gating PIA0
    /// through control-bit 2.
    pub fn unexpanded_d32(self) -> bool {
        matches!(self, Architecture::Dragon32)
    }

    pub fn has_acia(self) -> bool {
        matches!(self, Architecture::Dragon64)
    }

    pub fn is_coco(self) -> bool {
        matches!(self, Architecture::CoCo1 | Architecture::CoCo2)
    }

    pub fn default_cpu(self) -> CpuModel {
        match self {
            Architecture::Mc10 => CpuModel::Mc6803,
            _ => CpuModel::Mc6809,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum CpuModel {
    Mc6809,
    Hd6309,
    Mc6803,
}

/// Raw ROM images. The CLI/loader collaborator reads these from disk (or a
/// packaged cartridge); the core never touches the filesystem.
#[derive(Clone, Default)]
pub struct RomData {
    pub boot: Vec<u8>,
    pub extended_basic: Option<Vec<u8>>,
    pub charset: Option<Vec<u8>>,
}

#[derive(Clone)]
pub struct GdbConfig {
    pub bind_addr: SocketAddr,
}

impl Default for GdbConfig {
    fn default() -> Self {
        GdbConfig {
            bind_addr: "127.0.0.1:65520".parse().unwrap(),
        }
    }
}

/// A cartridge image and its load address, as read by the loader
/// collaborator; the core turns this into a `RomCartridge` at machine
/// build time.
#[derive(Clone)]
pub struct CartridgeSpec {
    pub rom: Vec<u8>,
    pub base: u16,
}

#[derive(Clone)]
pub struct MachineConfig {
    pub arch: Architecture,
    pub cpu: CpuModel,
    pub ram_size: u32,
    pub roms: RomData,
    pub gdb: Option<GdbConfig>,
    pub mpi_slots: [Option<CartridgeSpec>; 4],
}

impl MachineConfig {
    pub fn new(arch: Architecture, roms: RomData) -> Self {
        MachineConfig {
            cpu: arch.default_cpu(),
            ram_size: arch.default_ram_size(),
            roms,
            gdb: None,
            mpi_slots: [None, None, None, None],
            arch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dragon64_defaults_to_6809_and_64k() {
        let cfg = MachineConfig::new(Architecture::Dragon64, RomData::default());
        assert_eq!(CpuModel::Mc6809, cfg.cpu);
        assert_eq!(64 * 1024, cfg.ram_size);
    }

    #[test]
    fn mc10_defaults_to_6803_with_no_sam() {
        let cfg = MachineConfig::new(Architecture::Mc10, RomData::default());
        assert_eq!(CpuModel::Mc6803, cfg.cpu);
        assert!(!cfg.arch.has_sam());
    }
}
