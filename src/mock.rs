//! Scripted transport used by the unit tests.
//!
//! `MockPort` behaves like a DMA-backed UART driver: a transmit completes
//! immediately at its exact length; a receive lands the next canned reply
//! into the kicked buffer and only reports completion when the reply fills
//! the whole transfer, which for the codec's oversized kicks means the
//! transfer stays busy until the deliberate teardown aborts it. The tick
//! counter advances by one on every read so bounded waits expire on their
//! own.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::port::Port;
use crate::protocol::{sum16, PacketKind, DEFAULT_ADDRESS, HEADER};
use crate::transaction::TransferCell;

#[derive(Default)]
pub struct MockState {
    /// Frames the driver transmitted, in order.
    pub sent: Vec<Vec<u8>>,
    /// Canned replies, one consumed per kicked receive.
    pub replies: VecDeque<Vec<u8>>,
    pub accept_tx: bool,
    pub accept_rx: bool,
    pub rx_got: usize,
    pub now: u32,
    pub flushes: usize,
    pub delays: Vec<u32>,
    pub rx_aborts: usize,
}

pub struct MockPort<'c> {
    state: Rc<RefCell<MockState>>,
    tx_cell: &'c TransferCell,
    rx_cell: &'c TransferCell,
}

impl<'c> MockPort<'c> {
    pub fn new(
        tx_cell: &'c TransferCell,
        rx_cell: &'c TransferCell,
    ) -> (Self, Rc<RefCell<MockState>>) {
        let state = Rc::new(RefCell::new(MockState {
            accept_tx: true,
            accept_rx: true,
            ..MockState::default()
        }));
        (
            Self {
                state: Rc::clone(&state),
                tx_cell,
                rx_cell,
            },
            state,
        )
    }
}

impl Port for MockPort<'_> {
    fn tx(&mut self, buf: &[u8]) -> bool {
        {
            let mut s = self.state.borrow_mut();
            if !s.accept_tx {
                return false;
            }
            s.sent.push(buf.to_vec());
        }
        self.tx_cell.finish(true, buf.len());
        true
    }

    fn rx(&mut self, buf: &mut [u8]) -> bool {
        let filled = {
            let mut s = self.state.borrow_mut();
            if !s.accept_rx {
                return false;
            }
            s.rx_got = 0;
            match s.replies.pop_front() {
                Some(reply) => {
                    let n = reply.len().min(buf.len());
                    buf[..n].copy_from_slice(&reply[..n]);
                    s.rx_got = n;
                    n == buf.len()
                }
                None => false,
            }
        };
        if filled {
            let n = self.state.borrow().rx_got;
            self.rx_cell.finish(true, n);
        }
        true
    }

    fn rx_progress(&mut self) -> usize {
        self.state.borrow().rx_got
    }

    fn abort_tx(&mut self) {}

    fn abort_rx(&mut self) {
        let got = {
            let mut s = self.state.borrow_mut();
            s.rx_aborts += 1;
            s.rx_got
        };
        self.rx_cell.finish(false, got);
    }

    fn flush(&mut self) -> bool {
        self.state.borrow_mut().flushes += 1;
        true
    }

    fn ready(&self) -> bool {
        true
    }

    fn ticks(&self) -> u32 {
        let mut s = self.state.borrow_mut();
        s.now = s.now.wrapping_add(1);
        s.now
    }

    fn delay_ms(&mut self, ms: u32) {
        self.state.borrow_mut().delays.push(ms);
    }
}

/// Builds a well-formed ACK frame with a valid checksum.
pub fn ack_frame(address: u32, confirm: u8, params: &[u8]) -> Vec<u8> {
    let mut f = Vec::new();
    f.extend_from_slice(&HEADER.to_be_bytes());
    f.extend_from_slice(&address.to_be_bytes());
    f.push(PacketKind::Ack as u8);
    let length = (1 + params.len() + 2) as u16;
    f.extend_from_slice(&length.to_be_bytes());
    f.push(confirm);
    f.extend_from_slice(params);
    let sum = sum16(&f[6..]);
    f.extend_from_slice(&sum.to_be_bytes());
    f
}

/// An OK ACK with no return parameters, from the default address.
pub fn ok_ack() -> Vec<u8> {
    ack_frame(DEFAULT_ADDRESS, 0x00, &[])
}

/// Builds a well-formed data frame (PID Data, or End when `last`).
pub fn data_frame(address: u32, data: &[u8], last: bool) -> Vec<u8> {
    let kind = if last { PacketKind::End } else { PacketKind::Data };
    let mut f = Vec::new();
    f.extend_from_slice(&HEADER.to_be_bytes());
    f.extend_from_slice(&address.to_be_bytes());
    f.push(kind as u8);
    let length = (data.len() + 2) as u16;
    f.extend_from_slice(&length.to_be_bytes());
    f.extend_from_slice(data);
    let sum = sum16(&f[6..]);
    f.extend_from_slice(&sum.to_be_bytes());
    f
}
