//! Packet codec: builds, sends and parses protocol frames on top of the
//! transaction slots, exposing synchronous-looking bounded calls.

use arrayvec::ArrayVec;
use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::port::{elapsed_ms, Port};
use crate::protocol::{
    checksum, sum16, Command, CommandWriter, ConfirmCode, PacketKind, CHECKSUM_LEN, HDR_LEN,
    HEADER, MAX_PAYLOAD, MIN_ACK_PAYLOAD,
};
use crate::transaction::{TransferCell, Uart, RX_FRAME_CAP};

/// Bounded wait for a kicked transmit to complete.
pub const SEND_TIMEOUT_MS: u32 = 200;

/// Bounded wait for the device to answer with a full frame.
pub const RECV_TIMEOUT_MS: u32 = 1000;

/// Command frames are small: header + instruction + a handful of params.
const CMD_FRAME_CAP: usize = 64;

/// Data frames carry up to one full payload plus framing.
const DATA_FRAME_CAP: usize = 384;

/// Covers the largest possible ACK return-parameter block (253 bytes).
const ACK_PARAMS_CAP: usize = MAX_PAYLOAD;

/// Parsed ACK packet: confirm code plus return parameters.
#[derive(Debug)]
pub struct Ack {
    pub confirm: ConfirmCode,
    pub params: ArrayVec<[u8; ACK_PARAMS_CAP]>,
}

impl Ack {
    /// Maps the confirm code through the fixed status table.
    pub fn status(&self) -> Result<()> {
        self.confirm.status()
    }
}

impl CommandWriter for ArrayVec<[u8; CMD_FRAME_CAP]> {
    fn write_cmd_bytes(&mut self, bytes: &[u8]) {
        // capacity is static and sized for the largest command
        self.try_extend_from_slice(bytes).unwrap();
    }
}

/// Framed command/ACK channel to one device address.
#[derive(Debug)]
pub struct Channel<'c, P: Port> {
    uart: Uart<'c, P>,
    address: u32,
}

impl<'c, P: Port> Channel<'c, P> {
    pub fn new(port: P, tx_cell: &'c TransferCell, rx_cell: &'c TransferCell, address: u32) -> Self {
        Self {
            uart: Uart::new(port, tx_cell, rx_cell),
            address,
        }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    /// Retargets subsequent frames, after a SetAddress exchange.
    pub fn set_address(&mut self, address: u32) {
        self.address = address;
    }

    pub fn uart(&mut self) -> &mut Uart<'c, P> {
        &mut self.uart
    }

    /// Serializes and transmits one command packet, waiting (bounded) for
    /// the transfer to complete.
    pub fn send_command(&mut self, cmd: &Command) -> Result<()> {
        let mut frame = ArrayVec::<[u8; CMD_FRAME_CAP]>::new();

        frame.write_cmd_bytes(&HEADER.to_be_bytes()[..]);
        frame.write_cmd_bytes(&self.address.to_be_bytes()[..]);
        frame.write_cmd_bytes(&[PacketKind::Command as u8]);

        // length = instruction + params + checksum; params land after the
        // placeholder so the field can be patched once their size is known
        frame.write_cmd_bytes(&[0, 0]);
        frame.write_cmd_bytes(&[cmd.instruction()]);
        cmd.write_params(&mut frame);

        let length = (frame.len() - HDR_LEN + CHECKSUM_LEN) as u16;
        BigEndian::write_u16(&mut frame[HDR_LEN - 2..HDR_LEN], length);

        let sum = sum16(&frame[HDR_LEN - 3..]);
        frame.write_cmd_bytes(&sum.to_be_bytes()[..]);

        trace!("tx command {:x}", cmd.instruction());
        if !self.uart.begin_tx(&frame) {
            return Err(Error::Failed);
        }
        self.uart.wait_tx_done(SEND_TIMEOUT_MS)
    }

    /// Receives and validates one ACK packet.
    ///
    /// Kicks a single oversized receive, reads the fixed header once nine
    /// bytes have landed, then waits for the full frame announced by the
    /// length field. The transaction is retired in the cleanup path on
    /// every outcome, so nothing leaks into the next exchange.
    pub fn receive_ack(&mut self) -> Result<Ack> {
        if !self.uart.begin_rx(RX_FRAME_CAP) {
            return Err(Error::Failed);
        }
        let result = self.read_ack_frame();
        // transaction is still oversized-busy; retire it deliberately
        let _ = self.uart.abort_rx_as_done(RECV_TIMEOUT_MS);
        result
    }

    fn read_ack_frame(&mut self) -> Result<Ack> {
        self.uart.wait_rx_reach(HDR_LEN, RECV_TIMEOUT_MS)?;

        let frame = self.uart.frame();
        if BigEndian::read_u16(&frame[0..2]) != HEADER {
            return Err(Error::Packet);
        }
        if frame[6] != PacketKind::Ack as u8 {
            return Err(Error::Packet);
        }
        let length = BigEndian::read_u16(&frame[7..9]) as usize;
        if length < MIN_ACK_PAYLOAD || length > MAX_PAYLOAD {
            return Err(Error::Packet);
        }

        self.uart.wait_rx_reach(HDR_LEN + length, RECV_TIMEOUT_MS)?;

        let frame = self.uart.frame();
        let payload = &frame[HDR_LEN..HDR_LEN + length];
        let expect = checksum(
            PacketKind::Ack as u8,
            length as u16,
            &payload[..length - CHECKSUM_LEN],
        );
        let got = BigEndian::read_u16(&payload[length - CHECKSUM_LEN..]);
        if expect != got {
            warn!("ack checksum mismatch: expect {:x} got {:x}", expect, got);
            return Err(Error::Packet);
        }

        let mut params = ArrayVec::new();
        params
            .try_extend_from_slice(&payload[1..length - CHECKSUM_LEN])
            .map_err(|_| Error::Packet)?;
        Ok(Ack {
            confirm: ConfirmCode(payload[0]),
            params,
        })
    }

    /// Transmits one data packet (PID Data, or End for the final one).
    ///
    /// Unused by the enroll/match flows; kept for the bulk template
    /// upload/download path, which shares all framing rules.
    pub fn send_data(&mut self, data: &[u8], last: bool) -> Result<()> {
        if data.len() > MAX_PAYLOAD - CHECKSUM_LEN {
            return Err(Error::Failed);
        }
        let mut frame = ArrayVec::<[u8; DATA_FRAME_CAP]>::new();
        let kind = if last { PacketKind::End } else { PacketKind::Data };

        frame.try_extend_from_slice(&HEADER.to_be_bytes()[..]).unwrap();
        frame.try_extend_from_slice(&self.address.to_be_bytes()[..]).unwrap();
        frame.try_extend_from_slice(&[kind as u8]).unwrap();
        let length = (data.len() + CHECKSUM_LEN) as u16;
        frame.try_extend_from_slice(&length.to_be_bytes()[..]).unwrap();
        frame.try_extend_from_slice(data).unwrap();
        let sum = sum16(&frame[HDR_LEN - 3..]);
        frame.try_extend_from_slice(&sum.to_be_bytes()[..]).unwrap();

        if !self.uart.begin_tx(&frame) {
            return Err(Error::Failed);
        }
        self.uart.wait_tx_done(SEND_TIMEOUT_MS)
    }

    /// Receives one data packet into `out`, returning the byte count and
    /// whether it was the final (End) packet of the stream.
    pub fn receive_data(&mut self, out: &mut [u8]) -> Result<(usize, bool)> {
        if !self.uart.begin_rx(RX_FRAME_CAP) {
            return Err(Error::Failed);
        }
        let result = self.read_data_frame(out);
        let _ = self.uart.abort_rx_as_done(RECV_TIMEOUT_MS);
        result
    }

    fn read_data_frame(&mut self, out: &mut [u8]) -> Result<(usize, bool)> {
        self.uart.wait_rx_reach(HDR_LEN, RECV_TIMEOUT_MS)?;

        let frame = self.uart.frame();
        if BigEndian::read_u16(&frame[0..2]) != HEADER {
            return Err(Error::Packet);
        }
        let pid = frame[6];
        let last = match pid {
            x if x == PacketKind::Data as u8 => false,
            x if x == PacketKind::End as u8 => true,
            _ => return Err(Error::Packet),
        };
        let length = BigEndian::read_u16(&frame[7..9]) as usize;
        if length < CHECKSUM_LEN || length > MAX_PAYLOAD {
            return Err(Error::Packet);
        }
        let data_len = length - CHECKSUM_LEN;
        if data_len > out.len() {
            return Err(Error::Failed);
        }

        self.uart.wait_rx_reach(HDR_LEN + length, RECV_TIMEOUT_MS)?;

        let frame = self.uart.frame();
        let payload = &frame[HDR_LEN..HDR_LEN + length];
        let expect = checksum(pid, length as u16, &payload[..data_len]);
        let got = BigEndian::read_u16(&payload[data_len..]);
        if expect != got {
            return Err(Error::Packet);
        }

        out[..data_len].copy_from_slice(&payload[..data_len]);
        Ok((data_len, last))
    }

    /// Sends a command and receives its ACK. Short-circuits without
    /// attempting the receive when the send fails.
    pub fn cmd_with_ack(&mut self, cmd: &Command) -> Result<Ack> {
        self.send_command(cmd)?;
        self.receive_ack()
    }

    /// Polls for an ACK inside a wall-clock window, treating per-attempt
    /// timeouts as retryable and everything else as terminal.
    pub fn wait_ack(&mut self, timeout_ms: u32) -> Result<Ack> {
        let start = self.uart.ticks();
        loop {
            match self.receive_ack() {
                Err(Error::Timeout) => {}
                other => return other,
            }
            let now = self.uart.ticks();
            if elapsed_ms(self.uart.port(), start, now) >= timeout_ms {
                return Err(Error::Timeout);
            }
        }
    }
}
