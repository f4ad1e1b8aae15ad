// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! The thread that owns the `Machine`. It steps the guest CPU on its own
//! while no debugger is attached, and switches to servicing `Command`
//! messages exclusively once a GDB connection puts it in the stopped
//! state: the run-lock described by the stub's coordination rules.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};

use dragon64_system::Machine;

use crate::session::{Command, CommandResult, RegOp};

pub struct MachineRunner {
    machine: Machine,
    command_rx: Receiver<Command>,
    response_tx: Option<Sender<CommandResult>>,
    stopped: bool,
}

impl MachineRunner {
    pub fn new(machine: Machine, command_rx: Receiver<Command>) -> Self {
        Self {
            machine,
            command_rx,
            response_tx: None,
            stopped: false,
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Runs until the command channel disconnects, i.e. the stub (and the
    /// CLI's main thread) dropped their senders, or the machine quits.
    pub fn run(&mut self) {
        while self.tick() {}
    }

    /// Services one pending command, or steps the CPU once if the machine
    /// isn't stopped and nothing is pending. Returns `false` once the
    /// command channel disconnects or the machine is done, so a caller
    /// that also watches a wall-clock deadline can drive the loop itself.
    pub fn tick(&mut self) -> bool {
        if self.stopped {
            match self.command_rx.recv() {
                Ok(command) => {
                    self.execute(command);
                    true
                }
                Err(_) => false,
            }
        } else {
            match self.command_rx.try_recv() {
                Ok(command) => {
                    self.execute(command);
                    true
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    if self.machine.is_running() {
                        self.machine.step();
                        true
                    } else {
                        false
                    }
                }
            }
        }
    }

    fn reply(&self, result: CommandResult) {
        if let Some(tx) = &self.response_tx {
            let _ = tx.send(result);
        }
    }

    fn apply_reg_op(&mut self, op: RegOp) {
        self.machine.apply_registers(|regs| match op {
            RegOp::SetPc(v) => regs.pc = v,
            RegOp::SetA(v) => regs.a = v,
            RegOp::SetB(v) => regs.b = v,
            RegOp::SetX(v) => regs.x = v,
            RegOp::SetY(v) => regs.y = v,
            RegOp::SetU(v) => regs.u = v,
            RegOp::SetS(v) => regs.s = v,
            RegOp::SetDp(v) => regs.dp = v,
            RegOp::SetCc(v) => regs.cc = v,
            RegOp::SetMd(v) => regs.md = v,
            RegOp::SetE(v) => regs.e = v,
            RegOp::SetF(v) => regs.f = v,
            RegOp::SetV(v) => regs.v = v,
        });
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Attach(tx) => {
                info!(target: "gdb", "debugger attached, machine stopped");
                self.stopped = true;
                self.response_tx = Some(tx);
                self.reply(CommandResult::Unit);
            }
            Command::Detach => {
                info!(target: "gdb", "debugger detached, machine resumes");
                self.stopped = false;
                self.reply(CommandResult::Unit);
                self.response_tx = None;
            }
            Command::Break => {
                self.stopped = true;
                self.reply(CommandResult::Unit);
            }
            Command::Continue => {
                // Free-run under the run-lock: keep stepping until a
                // breakpoint fires, the machine quits, or the connection
                // thread relays an async break. The reply doubles as the
                // stop notification.
                let result = loop {
                    match self.command_rx.try_recv() {
                        Ok(Command::Break) => break CommandResult::Stopped(2),
                        Ok(_) => warn!(target: "gdb", "command ignored while running"),
                        Err(TryRecvError::Disconnected) => break CommandResult::Stopped(0),
                        Err(TryRecvError::Empty) => {}
                    }
                    if !self.machine.is_running() {
                        break CommandResult::Stopped(0);
                    }
                    if self.machine.step_checked() {
                        break CommandResult::Stopped(5);
                    }
                };
                self.stopped = true;
                self.reply(result);
            }
            Command::Step => {
                if self.machine.is_running() {
                    self.machine.step();
                }
                self.stopped = true;
                self.reply(CommandResult::Stopped(5));
            }
            Command::RegRead => {
                self.reply(CommandResult::Registers(self.machine.registers()));
            }
            Command::RegWrite(ops) => {
                for op in ops {
                    self.apply_reg_op(op);
                }
                self.reply(CommandResult::Unit);
            }
            Command::MemRead(start, len) => {
                let mut data = Vec::with_capacity(len as usize);
                let mut addr = start;
                for _ in 0..len {
                    data.push(self.machine.read(addr));
                    addr = addr.wrapping_add(1);
                }
                self.reply(CommandResult::Buffer(data));
            }
            Command::MemWrite(start, data) => {
                let mut addr = start;
                for byte in data {
                    self.machine.write(addr, byte);
                    addr = addr.wrapping_add(1);
                }
                self.reply(CommandResult::Unit);
            }
            Command::BpSet(address, kind, condition) => {
                let id = match kind {
                    dragon64_system::BreakpointKind::Exec => {
                        self.machine.breakpoints_mut().add_exec(address, condition)
                    }
                    other => self
                        .machine
                        .breakpoints_mut()
                        .add_watch(address, other, condition),
                };
                self.reply(CommandResult::BreakpointId(id));
            }
            Command::BpRemove(id) => {
                self.machine.breakpoints_mut().remove(id);
                self.reply(CommandResult::Unit);
            }
            Command::SamRead => {
                let value = self.machine.sam_register().unwrap_or(0);
                self.reply(CommandResult::Number(value));
            }
            Command::SamWrite(value) => {
                self.machine.set_sam_register(value);
                self.reply(CommandResult::Unit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dragon64_system::{factory_for, Architecture, MachineConfig, RomData};
    use std::sync::mpsc;

    fn boot_machine() -> Machine {
        let mut boot = vec![0x12u8; 0x4000];
        boot[0x3ffe] = 0x80;
        boot[0x3fff] = 0x00;
        let config = MachineConfig::new(
            Architecture::Dragon64,
            RomData {
                boot,
                extended_basic: None,
                charset: None,
            },
        );
        let mut machine = factory_for(config.arch).build(&config).unwrap();
        machine.reset(true);
        machine
    }

    #[test]
    fn attach_stops_and_reg_read_replies_with_snapshot() {
        let (command_tx, command_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();
        let mut runner = MachineRunner::new(boot_machine(), command_rx);
        command_tx.send(Command::Attach(response_tx.clone())).unwrap();
        command_tx.send(Command::RegRead).unwrap();
        command_tx.send(Command::Detach).unwrap();
        drop(command_tx);
        runner.run();
        let _ = response_rx.recv().unwrap();
        match response_rx.recv().unwrap() {
            CommandResult::Registers(snapshot) => {
                assert_eq!(0x8000, snapshot.pc);
                assert!(!snapshot.has_6309);
            }
            _ => panic!("unexpected reply"),
        }
    }

    #[test]
    fn reg_write_applies_through_the_snapshot() {
        let (command_tx, command_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();
        let mut runner = MachineRunner::new(boot_machine(), command_rx);
        command_tx.send(Command::Attach(response_tx.clone())).unwrap();
        command_tx
            .send(Command::RegWrite(vec![
                RegOp::SetPc(0x4321),
                RegOp::SetA(0x42),
            ]))
            .unwrap();
        command_tx.send(Command::RegRead).unwrap();
        drop(command_tx);
        runner.run();
        let _ = response_rx.recv().unwrap();
        let _ = response_rx.recv().unwrap();
        match response_rx.recv().unwrap() {
            CommandResult::Registers(snapshot) => {
                assert_eq!(0x4321, snapshot.pc);
                assert_eq!(0x42, snapshot.a);
            }
            _ => panic!("unexpected reply"),
        }
    }

    #[test]
    fn mem_roundtrip_through_the_debug_path() {
        let (command_tx, command_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();
        let mut runner = MachineRunner::new(boot_machine(), command_rx);
        command_tx.send(Command::Attach(response_tx.clone())).unwrap();
        command_tx
            .send(Command::MemWrite(0x1000, vec![0xde, 0xad]))
            .unwrap();
        command_tx.send(Command::MemRead(0x1000, 2)).unwrap();
        drop(command_tx);
        runner.run();
        let _ = response_rx.recv().unwrap();
        let _ = response_rx.recv().unwrap();
        match response_rx.recv().unwrap() {
            CommandResult::Buffer(data) => assert_eq!(vec![0xde, 0xad], data),
            _ => panic!("unexpected reply"),
        }
    }
}
