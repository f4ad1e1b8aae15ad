// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use dragon64_system::{Architecture, CartridgeSpec, CpuModel, GdbConfig, MachineConfig, RomData};

const CARTRIDGE_BASE: u16 = 0xc000;

#[derive(Clone, Copy, PartialEq)]
pub enum CartType {
    Rom,
    Mpi,
}

pub struct AppOptions {
    pub trace: bool,
    pub timeout: Option<u64>,
    pub log_level: String,
    pub log_target_level: Vec<(String, String)>,
    pub cartridge: Option<Vec<u8>>,
    pub cart_type: CartType,
    pub mpi_slot: usize,
}

pub fn build_options() -> getopts::Options {
    let mut opts = getopts::Options::new();
    opts.optopt("", "machine", "machine preset name", "[dragon32|dragon64|coco|coco2|mc10]")
        .optopt("", "machine-arch", "machine architecture", "[dragon32|dragon64|coco1|coco2|mc10]")
        .optopt("", "machine-cpu", "cpu model override", "[6809|6309]")
        .optopt("", "ram", "installed RAM in kilobytes", "64")
        .optopt("", "cart", "attach a cartridge image", "path")
        .optopt("", "cart-type", "cartridge flavour", "[rom|mpi]")
        .optopt("", "mpi-slot", "initially selected multi-pak slot", "0-3")
        .optmulti("", "mpi-load-cart", "load a cartridge into a multi-pak slot", "[N=]path")
        .optopt("", "gdb-ip", "GDB stub bind address", "127.0.0.1")
        .optopt("", "gdb-port", "GDB stub bind port", "65520")
        .optflag("", "gdb", "start the GDB remote stub")
        .optflag("", "trace", "log every executed instruction")
        .optopt("", "timeout", "quit after this many emulated seconds", "seconds")
        .optopt("", "loglevel", "set log level", "[error|warn|info|debug|trace]")
        .optmulti("", "log", "set log level for a target", "target=level")
        .optflag("h", "help", "display this help");
    opts
}

pub fn print_help(opts: &getopts::Options) {
    println!("dragon64 {}", env!("CARGO_PKG_VERSION"));
    print!("{}", opts.usage("Usage: dragon64 [options] BOOT-ROM [SECOND-ROM]"));
}

fn parse_arch(text: &str) -> Result<Architecture, String> {
    match text {
        "dragon32" => Ok(Architecture::Dragon32),
        "dragon64" => Ok(Architecture::Dragon64),
        "coco" | "coco1" => Ok(Architecture::CoCo1),
        "coco2" => Ok(Architecture::CoCo2),
        "mc10" => Ok(Architecture::Mc10),
        _ => Err(format!("invalid machine architecture {}", text)),
    }
}

fn parse_cpu(text: &str) -> Result<CpuModel, String> {
    match text {
        "6809" => Ok(CpuModel::Mc6809),
        "6309" => Ok(CpuModel::Hd6309),
        _ => Err(format!("invalid machine-cpu {}", text)),
    }
}

fn load_file(path: &str) -> Result<Vec<u8>, String> {
    let mut data = Vec::new();
    File::open(Path::new(path))
        .and_then(|mut file| file.read_to_end(&mut data))
        .map_err(|err| format!("failed to read {}: {}", path, err))?;
    Ok(data)
}

/// Loads a cartridge image, stripping the optional leader some dumps
/// carry: anything that keeps the file from being a whole number of
/// 256-byte pages is treated as a header.
pub fn load_cart_image(path: &str) -> Result<Vec<u8>, String> {
    let mut data = load_file(path)?;
    let leader = data.len() % 256;
    if leader != 0 && data.len() > 256 {
        info!("stripping {}-byte leader from {}", leader, path);
        data.drain(0..leader);
    }
    Ok(data)
}

/// `[N=]path` from a repeated `-mpi-load-cart`; without `N=` the carts
/// fill slots in the order given.
fn parse_mpi_cart(text: &str, next_slot: usize) -> Result<(usize, String), String> {
    if let Some(eq) = text.find('=') {
        let (slot, path) = text.split_at(eq);
        let slot: usize = slot
            .parse()
            .map_err(|_| format!("invalid mpi slot in {}", text))?;
        if slot > 3 {
            return Err(format!("mpi slot {} out of range", slot));
        }
        Ok((slot, path[1..].to_string()))
    } else {
        Ok((next_slot, text.to_string()))
    }
}

pub fn parse_machine_config(matches: &getopts::Matches) -> Result<MachineConfig, String> {
    let boot_path = matches
        .free
        .first()
        .ok_or_else(|| "missing boot rom argument".to_string())?;
    let arch = matches
        .opt_str("machine-arch")
        .or_else(|| matches.opt_str("machine"))
        .map(|s| parse_arch(&s))
        .transpose()?
        .unwrap_or(Architecture::Dragon64);
    let roms = RomData {
        boot: load_file(boot_path)?,
        extended_basic: matches.free.get(1).map(|p| load_file(p)).transpose()?,
        charset: None,
    };
    let mut config = MachineConfig::new(arch, roms);
    if let Some(cpu) = matches.opt_str("machine-cpu") {
        config.cpu = parse_cpu(&cpu)?;
    }
    if let Some(ram) = matches.opt_str("ram") {
        config.ram_size =
            ram.parse::<u32>().map_err(|_| "invalid ram size".to_string())? * 1024;
    }
    let mut next_slot = 0;
    for entry in matches.opt_strs("mpi-load-cart") {
        let (slot, path) = parse_mpi_cart(&entry, next_slot)?;
        next_slot = slot + 1;
        config.mpi_slots[slot] = Some(CartridgeSpec {
            rom: load_cart_image(&path)?,
            base: CARTRIDGE_BASE,
        });
    }
    if matches.opt_present("gdb") {
        let ip: IpAddr = matches
            .opt_str("gdb-ip")
            .unwrap_or_else(|| "127.0.0.1".to_string())
            .parse()
            .map_err(|_| "invalid gdb-ip".to_string())?;
        let port: u16 = matches
            .opt_str("gdb-port")
            .unwrap_or_else(|| "65520".to_string())
            .parse()
            .map_err(|_| "invalid gdb-port".to_string())?;
        config.gdb = Some(GdbConfig {
            bind_addr: SocketAddr::new(ip, port),
        });
    }
    Ok(config)
}

pub fn parse_app_options(matches: &getopts::Matches) -> Result<AppOptions, String> {
    let cart_type = match matches.opt_str("cart-type").as_deref() {
        None | Some("rom") => CartType::Rom,
        Some("mpi") => CartType::Mpi,
        Some(other) => return Err(format!("invalid cart-type {}", other)),
    };
    let mpi_slot = matches
        .opt_str("mpi-slot")
        .map(|s| s.parse::<usize>())
        .transpose()
        .map_err(|_| "invalid mpi-slot".to_string())?
        .unwrap_or(0);
    if mpi_slot > 3 {
        return Err("mpi-slot out of range".to_string());
    }
    Ok(AppOptions {
        trace: matches.opt_present("trace"),
        timeout: matches
            .opt_str("timeout")
            .map(|s| s.parse::<u64>())
            .transpose()
            .map_err(|_| "invalid timeout".to_string())?,
        log_level: matches.opt_str("loglevel").unwrap_or_else(|| "info".to_string()),
        log_target_level: matches
            .opt_strs("log")
            .into_iter()
            .filter_map(|pair| {
                let mut parts = pair.splitn(2, '=');
                match (parts.next(), parts.next()) {
                    (Some(target), Some(level)) => Some((target.to_string(), level.to_string())),
                    _ => None,
                }
            })
            .collect(),
        cartridge: matches
            .opt_str("cart")
            .map(|path| load_cart_image(&path))
            .transpose()?,
        cart_type,
        mpi_slot,
    })
}

pub fn parse_args(args: &[String]) -> io::Result<getopts::Matches> {
    let opts = build_options();
    opts.parse(&args[1..])
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpi_cart_entries_take_explicit_or_sequential_slots() {
        assert_eq!(
            (2, "game.rom".to_string()),
            parse_mpi_cart("2=game.rom", 0).unwrap()
        );
        assert_eq!(
            (1, "game.rom".to_string()),
            parse_mpi_cart("game.rom", 1).unwrap()
        );
        assert!(parse_mpi_cart("7=game.rom", 0).is_err());
    }
}
