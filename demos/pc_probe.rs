use serialport::{available_ports, open};
use std::{cell::RefCell, env, time::Duration};
use zw111::{BlockingPort, TransferCell, Zw111};

mod pc_utils;
use pc_utils::{SerialReader, SerialWriter, StdClock};

const DEFAULT_BAUD_RATE: u32 = 57600;

static TX_DONE: TransferCell = TransferCell::new();
static RX_DONE: TransferCell = TransferCell::new();

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => print_ports(),
        2 => probe(args[1].as_str()),
        _ => panic!("Usage: pc_probe [port_name]"),
    };
}

fn print_ports() {
    let ports = available_ports().unwrap();
    for port in ports {
        println!("Available port: {} ({:#?})", port.port_name, port.port_type);
    }
}

fn probe(port_name: &str) {
    println!("Using port {}", port_name);
    let mut port = open(port_name).unwrap();
    port.set_baud_rate(DEFAULT_BAUD_RATE).unwrap();
    port.set_timeout(Duration::from_millis(10)).unwrap();

    let port_cell = RefCell::new(port);
    let reader = SerialReader(&port_cell);
    let writer = SerialWriter(&port_cell);

    let link = BlockingPort::new(writer, reader, StdClock::new(), &TX_DONE, &RX_DONE);
    let mut fp = Zw111::new(link, &TX_DONE, &RX_DONE);

    println!("1. Verifying password");
    match fp.verify_password(0x00000000) {
        Ok(()) => println!("Password accepted"),
        Err(e) => panic!("Error: {:#?}", e),
    }

    println!("2. Reading system parameters");
    match fp.read_sysinfo() {
        Ok(info) => {
            println!("Address:         {:#010x}", info.address);
            println!("Capacity:        {}", info.capacity);
            println!("Security level:  {}", info.security_level);
            println!("Packet size:     {}", 32 << info.packet_size);
            println!("Baud rate:       {}", 9600 * u32::from(info.baud_multiplier));
        }
        Err(e) => panic!("Error: {:#?}", e),
    }

    println!("3. Counting stored templates");
    match fp.valid_template_count() {
        Ok(count) => println!("Valid templates: {}", count),
        Err(e) => panic!("Error: {:#?}", e),
    }
}
