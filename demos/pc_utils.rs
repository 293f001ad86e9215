use embedded_hal::serial::{Read, Write};
use serialport::prelude::*;
use std::cell::RefCell;
use std::io;
use std::io::{Read as _, Write as _};
use std::time::Instant;
use zw111::Clock;

// We're cheating here and will use the host OS's serial port as our UART,
// bridging it to the embedded-hal read/write interfaces that BlockingPort
// consumes. Serial timeouts become WouldBlock so the idle-window framing
// in the adapter works the same as on a bare target.

pub struct SerialReader<'a>(pub &'a RefCell<Box<dyn SerialPort>>);
pub struct SerialWriter<'a>(pub &'a RefCell<Box<dyn SerialPort>>);

impl Read<u8> for SerialReader<'_> {
    type Error = io::Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        let mut buf: [u8; 1] = [0u8];
        match self.0.borrow_mut().read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(nb::Error::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::from(e)),
        }
    }
}

impl Write<u8> for SerialWriter<'_> {
    type Error = io::Error;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        let buf: [u8; 1] = [word];
        loop {
            match self.0.borrow_mut().write(&buf) {
                Ok(n) => {
                    if n == 1 {
                        return Ok(());
                    }
                }
                Err(e) => {
                    return Err(nb::Error::from(e));
                }
            };
        }
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        match self.0.borrow_mut().flush() {
            Ok(_) => Ok(()),
            Err(e) => Err(nb::Error::from(e)),
        }
    }
}

/// Millisecond clock over std time.
pub struct StdClock(Instant);

impl StdClock {
    pub fn new() -> Self {
        StdClock(Instant::now())
    }
}

impl Clock for StdClock {
    fn ticks(&self) -> u32 {
        self.0.elapsed().as_millis() as u32
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}
