// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! GDB remote-serial-protocol stub plus the command channel a stub thread
//! and the thread owning the `Machine` use to talk without either side
//! touching the other's state directly.

#[macro_use]
extern crate log;

mod error;
mod gdb;
mod runner;
mod session;

pub use self::error::GdbError;
pub use self::gdb::GdbServer;
pub use self::runner::MachineRunner;
pub use self::session::{Command, CommandResult, RegOp};
