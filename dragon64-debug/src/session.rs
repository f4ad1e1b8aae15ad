// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! The command/result pair passed between a connection-handling thread and
//! the thread that owns the `Machine`. A stub never touches machine state
//! directly; it sends a `Command` and blocks on the matching
//! `CommandResult`.

use std::sync::mpsc::Sender;

use dragon64_system::{BreakpointKind, Condition, RegisterSnapshot};

pub enum Command {
    Attach(Sender<CommandResult>),
    Detach,
    Break,
    Continue,
    Step,
    RegRead,
    RegWrite(Vec<RegOp>),
    MemRead(u16, u16),
    MemWrite(u16, Vec<u8>),
    BpSet(u16, BreakpointKind, Option<Condition>),
    BpRemove(u32),
    SamRead,
    SamWrite(u16),
}

pub enum CommandResult {
    Unit,
    Buffer(Vec<u8>),
    Registers(RegisterSnapshot),
    Number(u16),
    BreakpointId(u32),
    Stopped(u8),
}

/// One register assignment from a `G` or `P` packet. The 6309-only fields
/// are applied unconditionally; on a plain 6809 they land in the snapshot
/// slots nothing reads back.
pub enum RegOp {
    SetPc(u16),
    SetA(u8),
    SetB(u8),
    SetX(u16),
    SetY(u16),
    SetU(u16),
    SetS(u16),
    SetDp(u8),
    SetCc(u8),
    SetMd(u8),
    SetE(u8),
    SetF(u8),
    SetV(u16),
}
