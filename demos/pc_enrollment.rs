use serialport::{available_ports, open};
use std::{cell::RefCell, env, thread, time::Duration};
use zw111::{Error, TransferCell, BlockingPort, Zw111};

mod pc_utils;
use pc_utils::{SerialReader, SerialWriter, StdClock};

const DEFAULT_BAUD_RATE: u32 = 57600;

static TX_DONE: TransferCell = TransferCell::new();
static RX_DONE: TransferCell = TransferCell::new();

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => print_ports(),
        3 => enroll_to_id(args[1].as_str(), args[2].parse::<u16>().unwrap()),
        _ => panic!("Usage: pc_enrollment [port_name] [page_id]"),
    };
}

fn print_ports() {
    let ports = available_ports().unwrap();
    for port in ports {
        println!("Available port: {} ({:#?})", port.port_name, port.port_type);
    }
}

fn enroll_to_id(port_name: &str, page_id: u16) {
    println!("Using port {}", port_name);
    let mut port = open(port_name).unwrap();
    port.set_baud_rate(DEFAULT_BAUD_RATE).unwrap();
    port.set_timeout(Duration::from_millis(10)).unwrap();

    let port_cell = RefCell::new(port);
    let reader = SerialReader(&port_cell);
    let writer = SerialWriter(&port_cell);

    let link = BlockingPort::new(writer, reader, StdClock::new(), &TX_DONE, &RX_DONE);
    let mut fp = Zw111::new(link, &TX_DONE, &RX_DONE);

    fp.verify_password(0x00000000).expect("password handshake");
    fp.enroll_start(page_id);

    println!("Place your finger on the sensor");
    capture(&mut fp, |fp| fp.enroll_step1());

    println!("Lift your finger, then place it again");
    thread::sleep(Duration::from_millis(1000));
    capture(&mut fp, |fp| fp.enroll_step2());

    match fp.enroll_store() {
        Ok(()) => println!("Template stored at page {}", page_id),
        Err(e) => panic!("Store failed: {:#?}", e),
    }
}

fn capture<'c, P, F>(fp: &mut Zw111<'c, P>, mut step: F)
where
    P: zw111::Port,
    F: FnMut(&mut Zw111<'c, P>) -> zw111::Result<()>,
{
    loop {
        match step(fp) {
            Ok(()) => return,
            Err(Error::NoFinger) => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => panic!("Capture failed: {:#?}", e),
        }
    }
}
