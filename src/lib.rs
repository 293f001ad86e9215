//! **zw111** is a driver for the ZW111 (and likely similar HZ Grow family)
//! UART fingerprint modules.
//!
//! The crate is split the way the wire works: [`Uart`] turns a
//! callback-completed byte transport into bounded, pollable transactions;
//! [`Channel`] frames, checksums and parses protocol packets on top of it;
//! [`Zw111`] exposes one call per sensor instruction; and [`Session`]
//! sequences those calls into enroll and match workflows with retry and
//! timeout policy, advanced one cooperative [`tick`](Session::tick) at a
//! time.
//!
//! Platforms with an interrupt/DMA UART driver implement [`Port`] directly
//! and report completions through the [`TransferCell`] pair. Anything that
//! only has blocking `embedded-hal` serial endpoints can use
//! [`BlockingPort`] instead.
//!
//! ## Example
//!
//! To authenticate with the module over a blocking serial pair:
//! ```
//! # use embedded_hal::serial::{Read, Write};
//! use zw111::{BlockingPort, Clock, TransferCell, Zw111};
//! # struct TestTx;
//! # struct TestRx(usize);
//! #
//! # impl Write<u8> for TestTx {
//! #     type Error = ();
//! #     fn write(&mut self, _word: u8) -> nb::Result<(), Self::Error> {
//! #         return Ok(());
//! #     }
//! #     fn flush(&mut self) -> nb::Result<(), Self::Error> {
//! #         return Ok(());
//! #     }
//! # }
//! #
//! # const RES_DATA: &[u8] = &[ 0xef, 0x01, 0xff, 0xff, 0xff, 0xff, 0x07, 0x00, 0x03, 0x00, 0x00, 0x0a ];
//! #
//! # impl Read<u8> for TestRx {
//! #     type Error = ();
//! #     fn read(&mut self) -> nb::Result<u8, Self::Error> {
//! #         if self.0 < RES_DATA.len() {
//! #             let word = RES_DATA[self.0];
//! #             self.0 += 1;
//! #             return Ok(word);
//! #         }
//! #         return Err(nb::Error::WouldBlock);
//! #     }
//! # }
//! #
//! # struct TestClock(core::cell::Cell<u32>);
//! #
//! # impl Clock for TestClock {
//! #     fn ticks(&self) -> u32 {
//! #         self.0.set(self.0.get().wrapping_add(1));
//! #         return self.0.get();
//! #     }
//! #     fn delay_ms(&mut self, _ms: u32) {}
//! # }
//! # let tx = TestTx;
//! # let rx = TestRx(0);
//! # let clock = TestClock(core::cell::Cell::new(0));
//!
//! static TX_DONE: TransferCell = TransferCell::new();
//! static RX_DONE: TransferCell = TransferCell::new();
//!
//! // Obtain tx, rx from some serial port implementation
//! let port = BlockingPort::new(tx, rx, clock, &TX_DONE, &RX_DONE);
//! let mut fp = Zw111::new(port, &TX_DONE, &RX_DONE);
//! match fp.verify_password(0x00000000) {
//!     Ok(()) => println!("password accepted"),
//!     Err(error) => panic!("Error: {:#?}", error),
//! }
//! ```
//!
//! For complete PC-side programs, see the `demos` directory.
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod blocking;
mod codec;
mod driver;
mod error;
#[cfg(test)]
mod mock;
mod port;
mod protocol;
mod session;
mod transaction;

pub use crate::blocking::{BlockingPort, Clock};
pub use crate::codec::{Ack, Channel, RECV_TIMEOUT_MS, SEND_TIMEOUT_MS};
pub use crate::driver::{SearchHit, SystemInfo, Zw111};
pub use crate::error::{Error, Result};
pub use crate::port::{elapsed_ms, Port};
pub use crate::protocol::{
    CharBuffer, Command, CommandWriter, ConfirmCode, PacketKind, PacketSize, Register,
    DEFAULT_ADDRESS, DEFAULT_PASSWORD,
};
pub use crate::session::{Notify, Policy, Request, Session, State, FIRST_PAGE};
pub use crate::transaction::{TransferCell, TransferState, Uart, RX_FRAME_CAP};
