// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#[macro_use]
extern crate log;

mod breakpoint;
pub mod config;
mod error;
mod machine;

pub use self::breakpoint::{
    BreakpointManager, BreakpointSpec, Condition, Kind as BreakpointKind,
    Register as BreakpointRegister, RegisterSnapshot,
};
pub use self::config::{Architecture, CartridgeSpec, CpuModel, GdbConfig, MachineConfig, RomData};
pub use self::error::MachineError;
pub use self::machine::{
    factory_for, CocoFactory, DragonFactory, LineSink, Machine, MachineFactory, Mc10Factory,
};
