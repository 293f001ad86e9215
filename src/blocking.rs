//! [`Port`] adapter over blocking `embedded-hal` serial endpoints.
//!
//! Platforms with a DMA/callback UART driver implement [`Port`] directly.
//! For everything else — simple polled HALs, or a PC talking through
//! `serialport` — this adapter runs the same transaction contract on top
//! of `embedded_hal::serial::{Read, Write}`: a kicked transfer completes
//! (or lands what it can) within the kick itself, and the completion cell
//! is settled as if a callback had fired. A receive that lands fewer bytes
//! than kicked stays busy until the teardown abort, exactly like the
//! oversized DMA transfers it stands in for.

use embedded_hal::serial::{Read, Write};
use nb::block;

use crate::port::Port;
use crate::transaction::TransferCell;

/// Monotonic time source for the adapter.
pub trait Clock {
    /// Monotonic tick counter. Wraps around.
    fn ticks(&self) -> u32;

    /// Converts a tick delta to milliseconds; identity for 1 kHz ticks.
    fn ticks_to_ms(&self, ticks: u32) -> u32 {
        ticks
    }

    /// Busy-waits for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// How long a receive keeps waiting for its first byte.
const FIRST_BYTE_TIMEOUT_MS: u32 = 1000;

/// Inter-byte gap treated as end of frame once bytes have arrived.
const IDLE_WINDOW_MS: u32 = 20;

/// Blocking serial endpoints driven through the [`Port`] contract.
#[derive(Debug)]
pub struct BlockingPort<'c, TX, RX, C> {
    tx: TX,
    rx: RX,
    clock: C,
    tx_cell: &'c TransferCell,
    rx_cell: &'c TransferCell,
    rx_got: usize,
}

impl<'c, TX, RX, C> BlockingPort<'c, TX, RX, C>
where
    TX: Write<u8>,
    RX: Read<u8>,
    C: Clock,
{
    /// Wires the serial pair and clock to the same completion cells the
    /// [`Uart`](crate::Uart) slots poll.
    pub fn new(
        tx: TX,
        rx: RX,
        clock: C,
        tx_cell: &'c TransferCell,
        rx_cell: &'c TransferCell,
    ) -> Self {
        Self {
            tx,
            rx,
            clock,
            tx_cell,
            rx_cell,
            rx_got: 0,
        }
    }

    fn ms_since(&self, start: u32) -> u32 {
        let now = self.clock.ticks();
        self.clock.ticks_to_ms(now.wrapping_sub(start))
    }
}

impl<'c, TX, RX, C> Port for BlockingPort<'c, TX, RX, C>
where
    TX: Write<u8>,
    RX: Read<u8>,
    C: Clock,
{
    fn tx(&mut self, buf: &[u8]) -> bool {
        let mut sent = 0;
        for byte in buf {
            if block!(self.tx.write(*byte)).is_err() {
                break;
            }
            sent += 1;
        }
        let _ = block!(self.tx.flush());
        self.tx_cell.finish(sent == buf.len(), sent);
        true
    }

    fn rx(&mut self, buf: &mut [u8]) -> bool {
        self.rx_got = 0;
        let started = self.clock.ticks();
        let mut last_byte = started;

        while self.rx_got < buf.len() {
            match self.rx.read() {
                Ok(byte) => {
                    buf[self.rx_got] = byte;
                    self.rx_got += 1;
                    last_byte = self.clock.ticks();
                }
                Err(nb::Error::WouldBlock) => {
                    if self.rx_got > 0 {
                        if self.ms_since(last_byte) >= IDLE_WINDOW_MS {
                            break;
                        }
                    } else if self.ms_since(started) >= FIRST_BYTE_TIMEOUT_MS {
                        break;
                    }
                }
                Err(nb::Error::Other(_)) => {
                    self.rx_cell.finish(false, self.rx_got);
                    return true;
                }
            }
        }

        if self.rx_got == buf.len() {
            self.rx_cell.finish(true, self.rx_got);
        }
        // a short frame leaves the transfer busy for the teardown abort
        true
    }

    fn rx_progress(&mut self) -> usize {
        self.rx_got
    }

    fn abort_tx(&mut self) {}

    fn abort_rx(&mut self) {
        self.rx_cell.finish(false, self.rx_got);
    }

    fn flush(&mut self) -> bool {
        while self.rx.read().is_ok() {}
        true
    }

    fn ready(&self) -> bool {
        true
    }

    fn ticks(&self) -> u32 {
        self.clock.ticks()
    }

    fn ticks_to_ms(&self, ticks: u32) -> u32 {
        self.clock.ticks_to_ms(ticks)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock.delay_ms(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Zw111;
    use crate::mock::ack_frame;
    use crate::protocol::DEFAULT_ADDRESS;
    use std::cell::Cell;
    use std::collections::VecDeque;

    struct ScriptTx(Vec<u8>);

    impl Write<u8> for ScriptTx {
        type Error = ();
        fn write(&mut self, word: u8) -> nb::Result<(), ()> {
            self.0.push(word);
            Ok(())
        }
        fn flush(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
    }

    struct ScriptRx(VecDeque<u8>);

    impl Read<u8> for ScriptRx {
        type Error = ();
        fn read(&mut self) -> nb::Result<u8, ()> {
            match self.0.pop_front() {
                Some(byte) => Ok(byte),
                None => Err(nb::Error::WouldBlock),
            }
        }
    }

    struct TestClock(Cell<u32>);

    impl Clock for TestClock {
        fn ticks(&self) -> u32 {
            self.0.set(self.0.get().wrapping_add(1));
            self.0.get()
        }
        fn delay_ms(&mut self, _ms: u32) {}
    }

    #[test]
    fn full_exchange_over_blocking_serial() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let reply = ack_frame(DEFAULT_ADDRESS, 0x00, &[]);
        let port = BlockingPort::new(
            ScriptTx(Vec::new()),
            ScriptRx(reply.into_iter().collect()),
            TestClock(Cell::new(0)),
            &tx_cell,
            &rx_cell,
        );
        let mut fp = Zw111::new(port, &tx_cell, &rx_cell);

        assert!(fp.get_image().is_ok());
    }

    #[test]
    fn silent_line_times_out_cleanly() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let port = BlockingPort::new(
            ScriptTx(Vec::new()),
            ScriptRx(VecDeque::new()),
            TestClock(Cell::new(0)),
            &tx_cell,
            &rx_cell,
        );
        let mut fp = Zw111::new(port, &tx_cell, &rx_cell);

        assert!(fp.get_image().is_err());
        // the slot was retired; the next exchange is accepted
        let reply = ack_frame(DEFAULT_ADDRESS, 0x00, &[]);
        fp.link().uart().port_mut().rx.0 = reply.into_iter().collect();
        assert!(fp.get_image().is_ok());
    }
}
