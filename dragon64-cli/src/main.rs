// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

#[macro_use]
extern crate log;

mod cli;
mod logger;

use std::process;
use std::sync::mpsc;
use std::thread;

use dragon64_core::cartridge::{Mpi, RomCartridge};
use dragon64_debug::{GdbServer, MachineRunner};
use dragon64_system::factory_for;

use crate::cli::CartType;
use crate::logger::Logger;

static NAME: &str = "dragon64";

fn main() {
    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(_) => process::exit(0),
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    }
}

fn run(args: &[String]) -> Result<(), String> {
    let matches = cli::parse_args(args).map_err(|err| err.to_string())?;
    if matches.opt_present("help") {
        cli::print_help(&cli::build_options());
        return Ok(());
    }
    let app_options = cli::parse_app_options(&matches)?;
    let logger = Logger::build(&app_options.log_level, &app_options.log_target_level)?;
    Logger::enable(logger).map_err(|_| "cannot initialize logging".to_string())?;
    info!("starting {}", NAME);

    let config = cli::parse_machine_config(&matches)?;
    let gdb = config.gdb.clone();
    let factory = factory_for(config.arch);
    let mut machine = factory.build(&config).map_err(|err| err.to_string())?;

    if let Some(cart_image) = app_options.cartridge.clone() {
        match app_options.cart_type {
            CartType::Rom => machine.attach_rom_cartridge(cart_image, 0xc000),
            CartType::Mpi => {
                // A single -cart with -cart-type mpi seats the image in
                // the chosen slot.
                let mut mpi = Mpi::new();
                mpi.insert(
                    app_options.mpi_slot,
                    Box::new(RomCartridge::new(cart_image, 0xc000)),
                );
                machine.attach_mpi(mpi);
            }
        }
    }
    machine.reset(true);
    if app_options.mpi_slot != 0 {
        // Point both multi-pak routes at the requested slot; reset had
        // parked them on slot 0.
        let slot = app_options.mpi_slot as u8;
        machine.write(0xff7f, slot << 4 | slot);
    }
    machine.set_trace(app_options.trace);
    if let Some(seconds) = app_options.timeout {
        machine.schedule_quit_after(seconds);
    }

    let (command_tx, command_rx) = mpsc::channel();
    if let Some(gdb_config) = gdb {
        let stub = GdbServer::new(command_tx.clone());
        thread::spawn(move || {
            if let Err(err) = stub.start(gdb_config.bind_addr) {
                error!(target: "gdb", "listener failed: {}", err);
            }
        });
    }
    drop(command_tx);

    let mut runner = MachineRunner::new(machine, command_rx);
    runner.run();
    info!("machine stopped at tick {}", runner.machine().current_tick());
    Ok(())
}
