// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Design:
//   The Machine owns every chip and the policy quirks that differ between
//   architectures (ACIA dummy decode, PIA cross-wiring, RAM organisation).
//   A bus cycle flows: cartridge snoop (EXTMEM may pre-empt) -> SAM segment
//   select -> RAM/ROM/PIA/cartridge sink -> scheduler tick -> breakpoint
//   hook. Debugger accesses use the same decode through `read`/`write` but
//   skip the tick and the hooks, so inspecting memory never perturbs
//   emulated time.

use dragon64_core::cartridge::{BoxedCartridge, Cartridge, Mpi, RomCartridge};
use dragon64_core::cpu::{Bus, Cpu6809, Mc6803, Variant};
use dragon64_core::pia::{IoPort, Pia, Side};
use dragon64_core::ram::Ram;
use dragon64_core::sam::{RamSize, Sam, Segment};
use dragon64_core::scheduler::{Scheduler, TICK_RATE};
use dragon64_core::util::{new_shared, new_shared_cell, IrqLine, Rom, Shared, SharedCell};
use dragon64_core::vdg::{BurstPhase, Mode, Vdg};

use crate::breakpoint::{BreakpointManager, BreakpointSpec, RegisterSnapshot};
use crate::config::{Architecture, CpuModel, MachineConfig};
use crate::error::MachineError;

/// One NTSC scanline in scheduler ticks: 57 slow cycles of 16.
const TICKS_PER_SCANLINE: u64 = 912;

pub type LineSink = Box<dyn FnMut(&[u8], BurstPhase)>;

enum CpuCore {
    Wide(Cpu6809),
    Narrow(Mc6803),
}

impl CpuCore {
    fn get_pc(&self) -> u16 {
        match self {
            CpuCore::Wide(c) => c.get_pc(),
            CpuCore::Narrow(c) => c.regs.pc,
        }
    }

    fn set_pc(&mut self, pc: u16) {
        match self {
            CpuCore::Wide(c) => c.set_pc(pc),
            CpuCore::Narrow(c) => c.regs.pc = pc,
        }
    }

    fn is_running(&self) -> bool {
        match self {
            CpuCore::Wide(c) => c.is_running(),
            CpuCore::Narrow(c) => c.is_running(),
        }
    }

    fn stop(&mut self) {
        match self {
            CpuCore::Wide(c) => c.stop(),
            CpuCore::Narrow(c) => c.stop(),
        }
    }
}

fn ram_size_class(bytes: u32) -> RamSize {
    match bytes {
        0..=4096 => RamSize::K4,
        // 32K machines use 16K chips in two RAS banks.
        4097..=32768 => RamSize::K16,
        _ => RamSize::K64,
    }
}

/// Everything a CPU bus cycle needs other than the CPU itself, split out
/// so `Machine::step` can hand the CPU a borrow of the rest of the machine
/// without aliasing its own `&mut self`.
struct MachineBus<'a> {
    sam: Option<&'a mut Sam>,
    ram: &'a mut Ram,
    rom_8000: Option<&'a Rom>,
    rom_a000: Option<&'a Rom>,
    pia0: Option<&'a mut Pia>,
    pia1: Option<&'a mut Pia>,
    cartridge: &'a mut Option<BoxedCartridge>,
    scheduler: &'a mut Scheduler,
    breakpoints: &'a mut BreakpointManager,
    acia_dummy: bool,
}

impl<'a> MachineBus<'a> {
    fn cartridge_cycle(&mut self, address: u16, write: bool, data: u8) -> (u8, bool) {
        let p2 = (0xff40..=0xff5f).contains(&address);
        let r2 = (0xc000..=0xfeff).contains(&address);
        if let Some(cart) = self.cartridge.as_mut() {
            let result = if write {
                cart.write(address, p2, r2, data)
            } else {
                cart.read(address, p2, r2, data)
            };
            (result, cart.extmem())
        } else {
            (data, false)
        }
    }

    fn rom_read(&self, address: u16, segment: Segment) -> u8 {
        let (first, second) = match segment {
            Segment::Rom0 => (self.rom_8000, self.rom_a000),
            _ => (self.rom_a000, self.rom_8000),
        };
        first
            .or(second)
            .map(|rom| rom.read(address))
            .unwrap_or(0xff)
    }

    fn dispatch_read(&mut self, address: u16) -> u8 {
        let (forced, extmem) = self.cartridge_cycle(address, false, 0xff);
        if extmem {
            return forced;
        }
        if let Some(sam) = self.sam.as_mut() {
            match sam.segment(address) {
                Segment::Ram => {
                    let z = sam.translate_ram(address);
                    self.ram.read(z)
                }
                segment @ Segment::Rom0 | segment @ Segment::Rom1 => {
                    self.rom_read(address, segment)
                }
                Segment::Pia0 => {
                    // A Dragon 64 gates PIA0 behind A2 and parks an ACIA in
                    // the upper half of the window; reads there float low.
                    if self.acia_dummy && address & 0x04 != 0 {
                        return 0x00;
                    }
                    self.pia0
                        .as_mut()
                        .map(|p| p.read((address & 0x03) as u8))
                        .unwrap_or(0xff)
                }
                Segment::Pia1 => self
                    .pia1
                    .as_mut()
                    .map(|p| p.read((address & 0x03) as u8))
                    .unwrap_or(0xff),
                // The cartridge already drove the data lines during the
                // snoop above; nothing else answers in these windows.
                Segment::CartridgeRom | Segment::CartridgeIo | Segment::CatchAll => forced,
            }
        } else {
            // MC-10: flat decode, no SAM. ROM above $C000, keyboard ports
            // approximated by the PIA at the bottom of the map.
            if address >= 0xc000 {
                self.rom_8000
                    .map(|rom| rom.read(address))
                    .unwrap_or(0xff)
            } else if address < 0x0020 {
                self.pia0
                    .as_mut()
                    .map(|p| p.read((address & 0x03) as u8))
                    .unwrap_or(0xff)
            } else {
                self.ram.read(address as usize)
            }
        }
    }

    fn dispatch_write(&mut self, address: u16, value: u8) {
        let (value, extmem) = self.cartridge_cycle(address, true, value);
        if extmem {
            return;
        }
        if let Some(sam) = self.sam.as_mut() {
            if (0xffc0..=0xffdf).contains(&address) {
                sam.write_register_strobe(address);
                return;
            }
            match sam.segment(address) {
                Segment::Pia0 => {
                    if self.acia_dummy && address & 0x04 != 0 {
                        return;
                    }
                    if let Some(p) = self.pia0.as_mut() {
                        p.write((address & 0x03) as u8, value);
                    }
                }
                Segment::Pia1 => {
                    if let Some(p) = self.pia1.as_mut() {
                        p.write((address & 0x03) as u8, value);
                    }
                }
                Segment::CartridgeIo | Segment::CatchAll => {}
                // RAS is asserted on every RAM/ROM cycle, so a write to a
                // ROM-mapped segment still lands in the RAM row behind it.
                _ => {
                    let z = sam.translate_ram(address);
                    self.ram.write(z, value);
                }
            }
        } else if address < 0x0020 {
            if let Some(p) = self.pia0.as_mut() {
                p.write((address & 0x03) as u8, value);
            }
        } else if address < 0xc000 {
            self.ram.write(address as usize, value);
        }
    }

    fn tick(&mut self, address: u16) {
        let ticks = self
            .sam
            .as_mut()
            .map(|sam| sam.cycle_ticks(address))
            .unwrap_or(1);
        self.scheduler.advance(ticks as u64);
    }
}

impl<'a> Bus for MachineBus<'a> {
    fn read_cycle(&mut self, address: u16) -> u8 {
        let value = self.dispatch_read(address);
        self.tick(address);
        self.breakpoints.on_read(address);
        value
    }

    fn write_cycle(&mut self, address: u16, value: u8) {
        self.dispatch_write(address, value);
        self.tick(address);
        self.breakpoints.on_write(address, value);
    }
}

pub struct Machine {
    arch: Architecture,
    cpu: CpuCore,
    sam: Option<Sam>,
    pia0: Option<Pia>,
    pia1: Option<Pia>,
    pia1_port_b: Option<Shared<IoPort>>,
    vdg: Option<Vdg>,
    cartridge: Option<BoxedCartridge>,
    ram: Ram,
    rom_8000: Option<Rom>,
    rom_a000: Option<Rom>,
    charset: Option<Rom>,
    scheduler: Scheduler,
    breakpoints: BreakpointManager,
    line_sink: Option<LineSink>,
    next_scanline_tick: u64,
    quit_flag: SharedCell<bool>,
    firq: Shared<IrqLine>,
    nmi: Shared<IrqLine>,
    halt: Shared<IrqLine>,
}

impl Machine {
    /// Splits the machine into the CPU and a bus over everything else, so
    /// the CPU can drive cycles without aliasing `&mut self`.
    fn with_bus<R>(&mut self, f: impl FnOnce(&mut CpuCore, &mut MachineBus) -> R) -> R {
        let Machine {
            ref mut cpu,
            ref mut sam,
            ref mut ram,
            ref rom_8000,
            ref rom_a000,
            ref mut pia0,
            ref mut pia1,
            ref mut cartridge,
            ref mut scheduler,
            ref mut breakpoints,
            ref arch,
            ..
        } = *self;
        let mut bus = MachineBus {
            sam: sam.as_mut(),
            ram,
            rom_8000: rom_8000.as_ref(),
            rom_a000: rom_a000.as_ref(),
            pia0: pia0.as_mut(),
            pia1: pia1.as_mut(),
            cartridge,
            scheduler,
            breakpoints,
            acia_dummy: arch.has_acia(),
        };
        f(cpu, &mut bus)
    }
    pub fn arch(&self) -> Architecture {
        self.arch
    }

    pub fn get_pc(&self) -> u16 {
        self.cpu.get_pc()
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.cpu.set_pc(pc);
    }

    pub fn registers(&self) -> RegisterSnapshot {
        self.register_snapshot()
    }

    pub fn apply_registers(&mut self, apply: impl FnOnce(&mut RegisterSnapshot)) {
        let mut snapshot = self.register_snapshot();
        apply(&mut snapshot);
        self.write_back_snapshot(snapshot);
    }

    pub fn sam_register(&self) -> Option<u16> {
        self.sam.as_ref().map(|sam| sam.register())
    }

    pub fn set_sam_register(&mut self, value: u16) {
        if let Some(sam) = self.sam.as_mut() {
            sam.set_register(value);
        }
    }

    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointManager {
        &mut self.breakpoints
    }

    /// Inserts a shared breakpoint table, keeping only the entries that
    /// apply to this machine's architecture.
    pub fn add_breakpoint_list(&mut self, specs: &[BreakpointSpec]) -> Vec<u32> {
        let arch = self.arch;
        self.breakpoints.add_list(specs, arch)
    }

    pub fn current_tick(&self) -> u64 {
        self.scheduler.current_tick()
    }

    pub fn set_line_sink(&mut self, sink: LineSink) {
        self.line_sink = Some(sink);
    }

    /// The external character generator image, if this machine shipped
    /// one; the renderer collaborator indexes it per glyph row.
    pub fn charset_rom(&self) -> Option<&Rom> {
        self.charset.as_ref()
    }

    pub fn attach_cartridge(&mut self, mut cart: BoxedCartridge) {
        cart.attach();
        self.cartridge = Some(cart);
    }

    pub fn attach_rom_cartridge(&mut self, rom: Vec<u8>, base: u16) {
        info!("attaching cartridge at ${:04x}, {} bytes", base, rom.len());
        self.attach_cartridge(Box::new(RomCartridge::new(rom, base)));
    }

    pub fn attach_mpi(&mut self, mpi: Mpi) {
        info!("attaching multi-pak interface");
        self.attach_cartridge(Box::new(mpi));
    }

    pub fn detach_cartridge(&mut self) {
        if let Some(mut cart) = self.cartridge.take() {
            cart.detach();
        }
    }

    /// Debugger read: same decode as a CPU cycle but with no scheduler
    /// tick and no breakpoint hooks, so inspection is invisible to the
    /// guest.
    pub fn read(&mut self, address: u16) -> u8 {
        self.with_bus(|_, bus| bus.dispatch_read(address))
    }

    /// Debugger write, same no-clock rules as `read`.
    pub fn write(&mut self, address: u16, value: u8) {
        self.with_bus(|_, bus| bus.dispatch_write(address, value));
    }

    /// Quit after roughly `seconds` of emulated time, as a scheduled event
    /// on the machine queue.
    pub fn schedule_quit_after(&mut self, seconds: u64) {
        let flag = self.quit_flag.clone();
        self.scheduler.schedule_after(
            seconds * TICK_RATE,
            Box::new(move || {
                flag.set(true);
                None
            }),
        );
    }

    /// Log every instruction via the CPU-side hook. 6809/6309 only; the
    /// MC-10 core has no hook points.
    pub fn set_trace(&mut self, enabled: bool) {
        if let CpuCore::Wide(cpu) = &mut self.cpu {
            cpu.instruction_hook = if enabled {
                Some(Box::new(|regs| {
                    trace!(
                        target: "trace",
                        "pc={:04x} a={:02x} b={:02x} x={:04x} y={:04x} s={:04x} cc={:02x}",
                        regs.pc, regs.a, regs.b, regs.x, regs.y, regs.s, regs.cc
                    );
                    true
                }))
            } else {
                None
            };
        }
    }

    /// Hard reset fills RAM with the deterministic bootstrap pattern so
    /// BASIC's memory-size probe sees non-uniform contents. The scheduler
    /// is zeroed after the reset vector fetch, so tick 0 is the first
    /// instruction's first cycle.
    pub fn reset(&mut self, hard: bool) {
        debug!("machine reset, hard={}", hard);
        if hard {
            self.ram.fill_bootstrap_pattern();
        }
        if let Some(sam) = self.sam.as_mut() {
            sam.reset();
        }
        if let Some(pia) = self.pia0.as_mut() {
            pia.reset();
        }
        if let Some(pia) = self.pia1.as_mut() {
            pia.reset();
        }
        if let Some(vdg) = self.vdg.as_mut() {
            vdg.reset();
        }
        if let Some(cart) = self.cartridge.as_mut() {
            cart.reset(hard);
        }
        self.quit_flag.set(false);
        self.with_bus(|cpu, bus| match cpu {
            CpuCore::Wide(c) => c.reset(bus),
            CpuCore::Narrow(c) => c.reset(bus),
        });
        self.scheduler.reset();
        self.next_scanline_tick = TICKS_PER_SCANLINE;
    }

    pub fn is_running(&self) -> bool {
        self.cpu.is_running() && !self.quit_flag.get()
    }

    pub fn stop(&mut self) {
        self.cpu.stop();
    }

    /// Advances one CPU instruction and then services any scanlines whose
    /// time has come. Returns the number of bus cycles consumed.
    /// Breakpoint hooks run inside `MachineBus` on every individual
    /// read/write, not just at the instruction boundary.
    pub fn step(&mut self) -> u32 {
        let cycles = self.with_bus(|cpu, bus| match cpu {
            CpuCore::Wide(c) => c.step(bus),
            CpuCore::Narrow(c) => c.step(bus),
        });
        self.sync_cartridge_lines();
        while self.scheduler.current_tick() >= self.next_scanline_tick {
            self.next_scanline_tick += TICKS_PER_SCANLINE;
            self.advance_video();
        }
        cycles
    }

    /// Cartridge FIRQ/NMI/HALT outputs are level lines into the CPU's
    /// aggregated inputs; refresh them once per instruction boundary.
    fn sync_cartridge_lines(&mut self) {
        const CART_SOURCE: usize = 7;
        if let Some(cart) = self.cartridge.as_ref() {
            self.firq.borrow_mut().set_low(CART_SOURCE, cart.firq());
            self.nmi.borrow_mut().set_low(CART_SOURCE, cart.nmi());
            self.halt.borrow_mut().set_low(CART_SOURCE, cart.halt());
        }
    }

    /// Renders one VDG scanline: mode pins follow PIA1 port B, the row's
    /// bytes come from the SAM's counter tree, and the HS/FS edges are
    /// wired into PIA0's CA1/CB1 the way the board routes them.
    fn advance_video(&mut self) {
        let vdg = match self.vdg.as_mut() {
            Some(vdg) => vdg,
            None => return,
        };
        let sam = match self.sam.as_mut() {
            Some(sam) => sam,
            None => return,
        };
        if let Some(port) = self.pia1_port_b.as_ref() {
            vdg.set_mode(Mode::from_pia_bits(port.borrow().value()));
        }
        let ram = &self.ram;
        let fs_was_low = vdg.fs.is_low();
        // HS rises at the start of the line and pulses low at its end, on
        // every line; the pulse clears the SAM's low counter bits and
        // clocks PIA0 CA1 at the line rate.
        if let Some(pia) = self.pia0.as_mut() {
            pia.set_c1(Side::A, true);
        }
        let sink = &mut self.line_sink;
        vdg.advance_scanline(
            // vdg_bytes hands back at most one 16-byte run per call; a
            // full 32-byte row is two of them.
            |_resolution, _bpp| {
                let mut row = sam.vdg_bytes(32, |z| ram.read(z));
                while row.len() < 32 {
                    let chunk = sam.vdg_bytes(32 - row.len(), |z| ram.read(z));
                    if chunk.is_empty() {
                        break;
                    }
                    row.extend(chunk);
                }
                row
            },
            |row, burst| {
                if let Some(sink) = sink.as_mut() {
                    sink(row, burst);
                }
            },
        );
        sam.on_horizontal_sync();
        if let Some(pia) = self.pia0.as_mut() {
            pia.set_c1(Side::A, false);
        }
        if !fs_was_low && vdg.fs.is_low() {
            sam.on_field_sync();
            if let Some(pia) = self.pia0.as_mut() {
                pia.set_c1(Side::B, false);
            }
        } else if fs_was_low && vdg.fs.is_high() {
            if let Some(pia) = self.pia0.as_mut() {
                pia.set_c1(Side::B, true);
            }
        }
    }

    fn register_snapshot(&self) -> RegisterSnapshot {
        match &self.cpu {
            CpuCore::Wide(c) => RegisterSnapshot {
                pc: c.regs.pc,
                a: c.regs.a,
                b: c.regs.b,
                x: c.regs.x,
                y: c.regs.y,
                u: c.regs.u,
                s: c.regs.s,
                dp: c.regs.dp,
                cc: c.regs.cc,
                md: c.regs.md,
                e: c.regs.e,
                f: c.regs.f,
                v: c.regs.v,
                has_6309: c.variant() == Variant::Hd6309,
            },
            CpuCore::Narrow(c) => RegisterSnapshot {
                pc: c.regs.pc,
                a: c.regs.a,
                b: c.regs.b,
                x: c.regs.x,
                s: c.regs.sp,
                cc: c.regs.cc,
                ..Default::default()
            },
        }
    }

    fn write_back_snapshot(&mut self, snapshot: RegisterSnapshot) {
        match &mut self.cpu {
            CpuCore::Wide(c) => {
                c.regs.pc = snapshot.pc;
                c.regs.a = snapshot.a;
                c.regs.b = snapshot.b;
                c.regs.x = snapshot.x;
                c.regs.y = snapshot.y;
                c.regs.u = snapshot.u;
                c.regs.s = snapshot.s;
                c.regs.dp = snapshot.dp;
                c.regs.cc = snapshot.cc;
                c.regs.md = snapshot.md;
                c.regs.e = snapshot.e;
                c.regs.f = snapshot.f;
                c.regs.v = snapshot.v;
            }
            CpuCore::Narrow(c) => {
                c.regs.pc = snapshot.pc;
                c.regs.a = snapshot.a;
                c.regs.b = snapshot.b;
                c.regs.x = snapshot.x;
                c.regs.sp = snapshot.s;
                c.regs.cc = snapshot.cc;
            }
        }
    }

    /// Advances one instruction and reports whether a breakpoint or
    /// watchpoint asked for a stop. The register snapshot is refreshed
    /// first so conditional breakpoints see live state.
    pub fn step_checked(&mut self) -> bool {
        self.step();
        if !self.breakpoints.is_armed() {
            return false;
        }
        let snapshot = self.register_snapshot();
        self.breakpoints.update_snapshot(snapshot);
        self.breakpoints.check_exec(snapshot.pc);
        self.breakpoints.take_pending_stop()
    }

    pub fn run(&mut self) {
        while self.is_running() {
            if self.step_checked() {
                break;
            }
        }
    }
}

pub trait MachineFactory {
    fn build(&self, config: &MachineConfig) -> Result<Machine, MachineError>;
}

/// Turns the config's `mpi_slots` into an attached `Mpi` cartridge. A
/// config with no populated slots leaves the cartridge bay empty.
fn attach_mpi_slots(machine: &mut Machine, config: &MachineConfig) {
    if config.mpi_slots.iter().all(Option::is_none) {
        return;
    }
    let mut mpi = Mpi::new();
    for (slot, spec) in config.mpi_slots.iter().enumerate() {
        if let Some(spec) = spec {
            mpi.insert(slot, Box::new(RomCartridge::new(spec.rom.clone(), spec.base)));
        }
    }
    machine.attach_mpi(mpi);
}

struct Lines {
    irq: Shared<IrqLine>,
    firq: Shared<IrqLine>,
    nmi: Shared<IrqLine>,
    halt: Shared<IrqLine>,
}

fn make_lines() -> Lines {
    Lines {
        irq: new_shared(IrqLine::new("irq")),
        firq: new_shared(IrqLine::new("firq")),
        nmi: new_shared(IrqLine::new("nmi")),
        halt: new_shared(IrqLine::new("halt")),
    }
}

fn check_boot_rom(config: &MachineConfig) -> Result<(), MachineError> {
    // A missing boot image means the reset vector can never be fetched;
    // refuse to hand back a machine that would just read junk forever.
    if config.roms.boot.is_empty() {
        return Err(MachineError::EmptyBootRom);
    }
    Ok(())
}

/// Builds a 6809/6309 machine: SAM, two PIAs, VDG, and the ROM banks laid
/// out per architecture. Dragon ships one combined image at `$8000`; CoCo
/// puts Color BASIC at `$A000` with Extended BASIC below it.
fn build_wide(config: &MachineConfig, lines: Lines) -> Machine {
    let variant = if config.cpu == CpuModel::Hd6309 {
        Variant::Hd6309
    } else {
        Variant::Mc6809
    };
    let cpu = Cpu6809::new(
        variant,
        lines.irq.clone(),
        lines.firq.clone(),
        lines.nmi.clone(),
        lines.halt.clone(),
    );

    let port_a0 = new_shared(IoPort::new());
    let port_b0 = new_shared(IoPort::new());
    let port_a1 = new_shared(IoPort::new());
    let port_b1 = new_shared(IoPort::new());
    // PIA0 raises IRQ from both halves; PIA1 raises FIRQ (cartridge FIRQ
    // joins the same line with its own source bit).
    let mut pia0 = Pia::new(0, port_a0, port_b0, lines.irq.clone(), lines.irq.clone());
    let pia1 = Pia::new(1, port_a1, port_b1.clone(), lines.firq.clone(), lines.firq.clone());

    if config.arch.relaxed_pia_decode() {
        // CoCo 64K: PIA1 PB2 is looped back into PIA0 PB6 so BASIC can
        // sense the RAM fit. Model the loop with the source/sink masks.
        let sense = port_b1.clone();
        pia0.set_data_preread(Box::new(move |side, _a, b| {
            if side == Side::B {
                if sense.borrow().value() & 0x04 != 0 {
                    b.borrow_mut().set_external(0x40, 0xff);
                } else {
                    b.borrow_mut().set_external(0x00, 0xbf);
                }
            }
        }));
    }

    let (rom_8000, rom_a000) = if config.arch.is_coco() {
        (
            config
                .roms
                .extended_basic
                .as_ref()
                .map(|data| Rom::new_with_data(data, 0x8000)),
            Some(Rom::new_with_data(&config.roms.boot, 0xa000)),
        )
    } else {
        (
            Some(Rom::new_with_data(&config.roms.boot, 0x8000)),
            config
                .roms
                .extended_basic
                .as_ref()
                .map(|data| Rom::new_with_data(data, 0xa000)),
        )
    };

    // An unexpanded Dragon 32 tops out at two banks of 16K chips however
    // much the config asks for.
    let installed = if config.arch.unexpanded_d32() {
        ram_size_class(config.ram_size.min(32 * 1024))
    } else {
        ram_size_class(config.ram_size)
    };
    let mut sam = Sam::new(installed);
    sam.reset();
    Machine {
        arch: config.arch,
        cpu: CpuCore::Wide(cpu),
        sam: Some(sam),
        pia0: Some(pia0),
        pia1: Some(pia1),
        pia1_port_b: Some(port_b1),
        vdg: Some(Vdg::new()),
        cartridge: None,
        // Sized for the full translated address space: 64K plus the RAS1
        // bank above it.
        ram: Ram::new(0x20000),
        rom_8000,
        rom_a000,
        charset: config
            .roms
            .charset
            .as_ref()
            .map(|data| Rom::new_with_data(data, 0)),
        scheduler: Scheduler::new(),
        breakpoints: BreakpointManager::default(),
        line_sink: None,
        next_scanline_tick: TICKS_PER_SCANLINE,
        quit_flag: new_shared_cell(false),
        firq: lines.firq,
        nmi: lines.nmi,
        halt: lines.halt,
    }
}

pub struct DragonFactory;
pub struct CocoFactory;
pub struct Mc10Factory;

impl MachineFactory for DragonFactory {
    fn build(&self, config: &MachineConfig) -> Result<Machine, MachineError> {
        check_boot_rom(config)?;
        let mut machine = build_wide(config, make_lines());
        attach_mpi_slots(&mut machine, config);
        Ok(machine)
    }
}

impl MachineFactory for CocoFactory {
    fn build(&self, config: &MachineConfig) -> Result<Machine, MachineError> {
        check_boot_rom(config)?;
        let mut machine = build_wide(config, make_lines());
        attach_mpi_slots(&mut machine, config);
        Ok(machine)
    }
}

impl MachineFactory for Mc10Factory {
    fn build(&self, config: &MachineConfig) -> Result<Machine, MachineError> {
        check_boot_rom(config)?;
        let lines = make_lines();
        let port_a0 = new_shared(IoPort::new());
        let port_b0 = new_shared(IoPort::new());
        let pia0 = Pia::new(0, port_a0, port_b0, lines.irq.clone(), lines.irq.clone());
        let mut machine = Machine {
            arch: config.arch,
            cpu: CpuCore::Narrow(Mc6803::new()),
            sam: None,
            pia0: Some(pia0),
            pia1: None,
            pia1_port_b: None,
            vdg: None,
            cartridge: None,
            ram: Ram::new(config.ram_size.max(0x1000) as usize),
            rom_8000: Some(Rom::new_with_data(&config.roms.boot, 0xc000)),
            rom_a000: None,
            charset: None,
            scheduler: Scheduler::new(),
            breakpoints: BreakpointManager::default(),
            line_sink: None,
            next_scanline_tick: TICKS_PER_SCANLINE,
            quit_flag: new_shared_cell(false),
            firq: lines.firq,
            nmi: lines.nmi,
            halt: lines.halt,
        };
        attach_mpi_slots(&mut machine, config);
        Ok(machine)
    }
}

pub fn factory_for(arch: Architecture) -> Box<dyn MachineFactory> {
    match arch {
        Architecture::Dragon32 | Architecture::Dragon64 => Box::new(DragonFactory),
        Architecture::CoCo1 | Architecture::CoCo2 => Box::new(CocoFactory),
        Architecture::Mc10 => Box::new(Mc10Factory),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RomData;

    /// A 16K combined image the way a Dragon ships it: the reset vector
    /// lives at the very top, which the SAM aliases up to $FFFE.
    fn dragon_boot(entry: u16) -> RomData {
        let mut boot = vec![0x12u8; 0x4000];
        boot[0x3ffe] = (entry >> 8) as u8;
        boot[0x3fff] = entry as u8;
        RomData {
            boot,
            extended_basic: None,
            charset: None,
        }
    }

    fn dragon_machine(entry: u16) -> Machine {
        let config = MachineConfig::new(Architecture::Dragon64, dragon_boot(entry));
        let mut machine = factory_for(config.arch).build(&config).unwrap();
        machine.reset(true);
        machine
    }

    #[test]
    fn dragon_reset_vectors_pc_through_rom() {
        let machine = dragon_machine(0xb3b4);
        assert_eq!(0xb3b4, machine.get_pc());
    }

    #[test]
    fn reset_leaves_tick_zero_and_sam_clear() {
        let machine = dragon_machine(0x8000);
        assert_eq!(0, machine.current_tick());
        assert_eq!(Some(0), machine.sam_register());
    }

    #[test]
    fn hard_reset_leaves_non_uniform_ram() {
        let mut machine = dragon_machine(0x8000);
        assert_ne!(machine.read(0x0000), machine.read(0x0100));
    }

    #[test]
    fn debugger_reads_do_not_advance_the_clock() {
        let mut machine = dragon_machine(0x8000);
        let before = machine.current_tick();
        machine.read(0x1234);
        machine.write(0x1234, 0xaa);
        assert_eq!(before, machine.current_tick());
        assert_eq!(0xaa, machine.read(0x1234));
    }

    #[test]
    fn stepping_advances_the_scheduler_per_cycle() {
        let mut machine = dragon_machine(0x8000);
        let cycles = machine.step(); // NOP from the 0x12 fill
        assert!(cycles >= 2);
        assert_eq!(16 * cycles as u64, machine.current_tick());
    }

    #[test]
    fn ghost_write_to_rom_window_lands_in_ram() {
        let mut machine = dragon_machine(0x8000);
        machine.write(0x9000, 0x5a);
        assert_eq!(0x12, machine.read(0x9000), "reads still come from ROM");
        // Map type 1 exposes the RAM row that took the ghost write.
        machine.write(0xffdf, 0x00);
        assert_eq!(0x5a, machine.read(0x9000));
    }

    #[test]
    fn sam_strobe_write_is_visible_in_register() {
        let mut machine = dragon_machine(0x8000);
        machine.write(0xffc1, 0x00);
        assert_eq!(Some(0x0001), machine.sam_register());
        machine.write(0xffc0, 0x00);
        assert_eq!(Some(0x0000), machine.sam_register());
    }

    #[test]
    fn scheduled_quit_stops_the_run_loop() {
        let mut machine = dragon_machine(0x8000);
        // One emulated second is a lot of NOPs; use a tiny deadline by
        // scheduling directly in ticks.
        let flag = machine.quit_flag.clone();
        machine.scheduler.schedule_after(
            100,
            Box::new(move || {
                flag.set(true);
                None
            }),
        );
        machine.run();
        assert!(!machine.is_running());
        assert!(machine.current_tick() >= 100);
    }

    #[test]
    fn mc10_builds_without_sam_and_vectors_from_high_rom() {
        let mut boot = vec![0x01u8; 0x4000];
        boot[0x3ffe] = 0xc0;
        boot[0x3fff] = 0x00;
        let config = MachineConfig::new(
            Architecture::Mc10,
            RomData {
                boot,
                extended_basic: None,
                charset: None,
            },
        );
        let mut machine = factory_for(config.arch).build(&config).unwrap();
        machine.reset(true);
        assert_eq!(0xc000, machine.get_pc());
        assert!(machine.sam_register().is_none());
    }

    #[test]
    fn empty_boot_rom_refuses_to_build() {
        let config = MachineConfig::new(Architecture::Dragon64, RomData::default());
        assert!(factory_for(config.arch).build(&config).is_err());
    }
}
