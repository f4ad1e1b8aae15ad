// This file is part of dragon64.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

//! End-to-end GDB stub exercises over a real TCP socket: packet framing,
//! the g/G register round trip, memory access boundary cases, SAM access
//! packets, and breakpoint-driven stop replies.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;

use dragon64_debug::{GdbServer, MachineRunner};
use dragon64_system::{factory_for, Architecture, MachineConfig, RomData};

struct Client {
    reader: BufReader<TcpStream>,
    stream: TcpStream,
}

impl Client {
    fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            stream,
        }
    }

    fn send(&mut self, payload: &str) {
        let checksum = payload
            .bytes()
            .fold(0u8, |acc, b| acc.wrapping_add(b));
        let framed = format!("${}#{:02x}", payload, checksum);
        self.stream.write_all(framed.as_bytes()).unwrap();
        let mut ack = [0u8; 1];
        self.reader.read_exact(&mut ack).unwrap();
        assert_eq!(b'+', ack[0], "packet must be acknowledged");
    }

    fn read_reply(&mut self) -> String {
        let mut byte = [0u8; 1];
        loop {
            self.reader.read_exact(&mut byte).unwrap();
            if byte[0] == b'$' {
                break;
            }
        }
        let mut payload = Vec::new();
        self.reader.read_until(b'#', &mut payload).unwrap();
        payload.pop();
        let mut checksum = [0u8; 2];
        self.reader.read_exact(&mut checksum).unwrap();
        self.stream.write_all(b"+").unwrap();
        String::from_utf8(payload).unwrap()
    }

    fn transact(&mut self, payload: &str) -> String {
        self.send(payload);
        self.read_reply()
    }
}

fn start_session() -> Client {
    let mut boot = vec![0x12u8; 0x4000]; // NOP filler
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

    let (command_tx, command_rx) = mpsc::channel();
    thread::spawn(move || MachineRunner::new(machine, command_rx).run());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GdbServer::new(command_tx);
    thread::spawn(move || {
        let _ = server.serve(listener);
    });
    Client::connect(addr)
}

#[test]
fn qsupported_advertises_the_buffer_size() {
    let mut client = start_session();
    assert_eq!("PacketSize=400", client.transact("qSupported"));
}

#[test]
fn question_mark_reports_stopped() {
    let mut client = start_session();
    assert_eq!("S00", client.transact("?"));
}

#[test]
fn g_packet_layout_and_round_trip() {
    let mut client = start_session();
    let regs = client.transact("g");
    assert_eq!(38, regs.len());
    assert!(regs.starts_with("50000000"), "CC has only the masks set");
    assert_eq!("8000", &regs[24..28], "PC from the reset vector");
    assert_eq!("xxxxxxxxxx", &regs[28..38], "6309 slots are placeholders");
    // Writing back what g returned must not change anything.
    assert_eq!("OK", client.transact(&format!("G{}", regs)));
    assert_eq!(regs, client.transact("g"));
}

#[test]
fn memory_access_and_boundary_cases() {
    let mut client = start_session();
    assert_eq!("", client.transact("m0,0"), "zero-length read is empty");
    assert_eq!("OK", client.transact("M1000,2:dead"));
    assert_eq!("dead", client.transact("m1000,2"));
    assert_eq!(
        "E00",
        client.transact("M1000,3:dead"),
        "declared length must match the payload"
    );
}

#[test]
fn single_register_access_with_placeholders() {
    let mut client = start_session();
    assert_eq!("8000", client.transact("p8"));
    assert_eq!("xx", client.transact("p9"), "MD missing on a 6809");
    assert_eq!("xxxx", client.transact("pc"), "V missing on a 6809");
    assert_eq!("OK", client.transact("P8=9abc"));
    assert_eq!("9abc", client.transact("p8"));
}

#[test]
fn sam_register_packets_round_trip() {
    let mut client = start_session();
    assert_eq!("0000", client.transact("qxroar.sam"));
    assert_eq!("OK", client.transact("Qxroar.sam:0601"));
    assert_eq!("0601", client.transact("qxroar.sam"));
}

#[test]
fn step_replies_with_sigtrap() {
    let mut client = start_session();
    assert_eq!("S05", client.transact("s"));
    assert_eq!("8001", client.transact("p8"), "one instruction retired");
}

#[test]
fn breakpoint_continue_stops_with_sigtrap() {
    let mut client = start_session();
    assert_eq!("OK", client.transact("Z0,8004,1"));
    assert_eq!("S05", client.transact("c"));
    assert_eq!("8004", client.transact("p8"), "stopped before the target");
    assert_eq!("OK", client.transact("z0,8004,1"));
}

#[test]
fn unknown_packets_get_an_empty_reply() {
    let mut client = start_session();
    assert_eq!("", client.transact("vMustReplyEmpty"));
}

#[test]
fn detach_replies_ok() {
    let mut client = start_session();
    assert_eq!("OK", client.transact("D"));
}
