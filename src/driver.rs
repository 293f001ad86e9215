//! Command API: one call per sensor instruction, with typed results and
//! the confirm-code mapping applied.

use byteorder::{BigEndian, ByteOrder};

use crate::codec::Channel;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{CharBuffer, Command, PacketSize, Register, DEFAULT_ADDRESS};
use crate::transaction::TransferCell;

/// The 16-byte basic parameter table returned by ReadSysPara.
///
/// Offsets are protocol-fixed: words at 0/2/4/6, the 32-bit address at 8,
/// then words at 12/14.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemInfo {
    /// Hardware state register.
    pub system_state: u16,
    /// Sensor type code.
    pub sensor_type: u16,
    /// Template database capacity.
    pub capacity: u16,
    /// Security rank, 1 to 5.
    pub security_level: u16,
    /// Current 32-bit device address.
    pub address: u32,
    /// Data packet size code (see [`PacketSize`]).
    pub packet_size: u16,
    /// Baud rate is 9600 times this multiplier.
    pub baud_multiplier: u16,
}

impl SystemInfo {
    fn from_table(table: &[u8]) -> Self {
        Self {
            system_state: BigEndian::read_u16(&table[0..2]),
            sensor_type: BigEndian::read_u16(&table[2..4]),
            capacity: BigEndian::read_u16(&table[4..6]),
            security_level: BigEndian::read_u16(&table[6..8]),
            address: BigEndian::read_u32(&table[8..12]),
            packet_size: BigEndian::read_u16(&table[12..14]),
            baud_multiplier: BigEndian::read_u16(&table[14..16]),
        }
    }
}

/// A database hit reported by the device-side Search instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SearchHit {
    pub page_id: u16,
    pub score: u16,
}

/// Represents a ZW111 device connected to a U(S)ART.
#[derive(Debug)]
pub struct Zw111<'c, P: Port> {
    link: Channel<'c, P>,
    enroll_page: Option<u16>,
}

impl<'c, P: Port> Zw111<'c, P> {
    /// Driver talking to the factory default address.
    pub fn new(port: P, tx_cell: &'c TransferCell, rx_cell: &'c TransferCell) -> Self {
        Self::with_address(port, tx_cell, rx_cell, DEFAULT_ADDRESS)
    }

    pub fn with_address(
        port: P,
        tx_cell: &'c TransferCell,
        rx_cell: &'c TransferCell,
        address: u32,
    ) -> Self {
        Self {
            link: Channel::new(port, tx_cell, rx_cell, address),
            enroll_page: None,
        }
    }

    /// Brings the link into a known state: checks the transport is up,
    /// drops stale RX bytes, and performs the password handshake when a
    /// non-default password is configured.
    pub fn init(&mut self, password: u32) -> Result<()> {
        if !self.link.uart().ready() {
            return Err(Error::Failed);
        }
        if !self.link.uart().flush() {
            return Err(Error::Failed);
        }
        if password != 0 {
            self.verify_password(password)?;
        }
        Ok(())
    }

    fn simple(&mut self, cmd: Command) -> Result<()> {
        self.link.cmd_with_ack(&cmd)?.status()
    }

    pub fn verify_password(&mut self, password: u32) -> Result<()> {
        self.simple(Command::VerifyPassword { password })
    }

    pub fn set_password(&mut self, password: u32) -> Result<()> {
        self.simple(Command::SetPassword { password })
    }

    /// Captures a fingerprint image into the image buffer.
    ///
    /// `Error::NoFinger` is the normal idle outcome, not a failure.
    pub fn get_image(&mut self) -> Result<()> {
        self.simple(Command::GetImage)
    }

    /// Extracts features from the captured image into `buffer`.
    pub fn gen_char(&mut self, buffer: CharBuffer) -> Result<()> {
        self.simple(Command::GenChar { buffer })
    }

    /// Compares CharBuffer1 against CharBuffer2, returning the similarity
    /// score. A non-matching pair reports `Error::NoMatch`.
    pub fn match_templates(&mut self) -> Result<u16> {
        let ack = self.link.cmd_with_ack(&Command::Match)?;
        ack.status()?;
        if ack.params.len() < 2 {
            return Err(Error::Failed);
        }
        Ok(BigEndian::read_u16(&ack.params[0..2]))
    }

    /// Device-ranked search of `count` templates starting at `start`.
    pub fn search(&mut self, buffer: CharBuffer, start: u16, count: u16) -> Result<SearchHit> {
        let ack = self.link.cmd_with_ack(&Command::Search {
            buffer,
            start,
            count,
        })?;
        ack.status()?;
        if ack.params.len() < 4 {
            return Err(Error::Failed);
        }
        Ok(SearchHit {
            page_id: BigEndian::read_u16(&ack.params[0..2]),
            score: BigEndian::read_u16(&ack.params[2..4]),
        })
    }

    /// Loads the template at `page` into `buffer` for a host-driven match.
    pub fn load_char(&mut self, buffer: CharBuffer, page: u16) -> Result<()> {
        if page == 0xFFFF {
            return Err(Error::Failed);
        }
        self.simple(Command::LoadChar { buffer, page })
    }

    /// Arms the page id a subsequent [`enroll_store`](Zw111::enroll_store)
    /// will persist to.
    pub fn enroll_start(&mut self, page: u16) {
        self.enroll_page = Some(page);
    }

    /// First enroll capture: image + features into CharBuffer1.
    pub fn enroll_step1(&mut self) -> Result<()> {
        self.get_image()?;
        self.gen_char(CharBuffer::One)
    }

    /// Second enroll capture: image + features into CharBuffer2, then the
    /// two feature files merge into a template candidate held in both
    /// buffers.
    pub fn enroll_step2(&mut self) -> Result<()> {
        self.get_image()?;
        self.gen_char(CharBuffer::Two)?;
        self.simple(Command::RegModel)
    }

    /// Persists the merged template at the armed page id.
    ///
    /// The armed id is single-use: it is consumed before the store is
    /// attempted, so a second store without a new
    /// [`enroll_start`](Zw111::enroll_start) fails.
    pub fn enroll_store(&mut self) -> Result<()> {
        let page = self.enroll_page.take().ok_or(Error::Failed)?;
        self.simple(Command::StoreChar {
            buffer: CharBuffer::One,
            page,
        })
    }

    /// Deletes the single template at `page`.
    pub fn delete_template(&mut self, page: u16) -> Result<()> {
        self.simple(Command::DeleteChar { page, count: 1 })
    }

    /// Clears the whole template database.
    pub fn clear_database(&mut self) -> Result<()> {
        self.simple(Command::Empty)
    }

    /// Reads one 32-byte page of the template index bitmap. Page 0 covers
    /// templates 0..=255, page 1 covers 256..=511.
    pub fn read_index_table(&mut self, page: u8) -> Result<[u8; 32]> {
        let ack = self.link.cmd_with_ack(&Command::ReadIndexTable { page })?;
        ack.status()?;
        if ack.params.len() < 32 {
            return Err(Error::Failed);
        }
        let mut table = [0u8; 32];
        table.copy_from_slice(&ack.params[0..32]);
        Ok(table)
    }

    /// Number of valid templates currently stored in flash.
    pub fn valid_template_count(&mut self) -> Result<u16> {
        let ack = self.link.cmd_with_ack(&Command::TemplateCount)?;
        ack.status()?;
        if ack.params.len() < 2 {
            return Err(Error::Failed);
        }
        Ok(BigEndian::read_u16(&ack.params[0..2]))
    }

    /// Reads the basic parameter table.
    pub fn read_sysinfo(&mut self) -> Result<SystemInfo> {
        let ack = self.link.cmd_with_ack(&Command::ReadSysPara)?;
        ack.status()?;
        if ack.params.len() < 16 {
            return Err(Error::Failed);
        }
        Ok(SystemInfo::from_table(&ack.params[0..16]))
    }

    /// Assigns a new device address and retargets the link to it.
    pub fn set_address(&mut self, address: u32) -> Result<()> {
        self.simple(Command::SetAddress { address })?;
        self.link.set_address(address);
        Ok(())
    }

    /// Writes one byte into a SOC system register.
    pub fn write_reg(&mut self, reg: Register, value: u8) -> Result<()> {
        self.simple(Command::WriteReg { reg, value })
    }

    /// Baud rate = 9600 * `multiplier`; zero is rejected.
    pub fn set_baudrate(&mut self, multiplier: u8) -> Result<()> {
        if multiplier == 0 {
            return Err(Error::Failed);
        }
        self.write_reg(Register::Baudrate, multiplier)
    }

    pub fn set_packet_size(&mut self, size: PacketSize) -> Result<()> {
        self.write_reg(Register::PacketSize, size as u8)
    }

    /// Match threshold rank, 1 (loosest) to 5 (strictest).
    pub fn set_security_level(&mut self, level: u8) -> Result<()> {
        if !(1..=5).contains(&level) {
            return Err(Error::Failed);
        }
        self.write_reg(Register::SecurityLevel, level)
    }

    /// Access to the underlying framed channel.
    pub fn link(&mut self) -> &mut Channel<'c, P> {
        &mut self.link
    }

    /// Discards stale bytes pending on the receive side.
    pub fn flush_rx(&mut self) -> bool {
        self.link.uart().flush()
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.link.uart().delay_ms(ms);
    }

    pub fn ticks(&mut self) -> u32 {
        self.link.uart().ticks()
    }

    pub fn ticks_to_ms(&mut self, ticks: u32) -> u32 {
        self.link.uart().ticks_to_ms(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ack_frame, ok_ack, MockPort, MockState};
    use crate::protocol::ConfirmCode;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn driver<'c>(
        tx_cell: &'c TransferCell,
        rx_cell: &'c TransferCell,
    ) -> (Zw111<'c, MockPort<'c>>, Rc<RefCell<MockState>>) {
        let (port, state) = MockPort::new(tx_cell, rx_cell);
        (Zw111::new(port, tx_cell, rx_cell), state)
    }

    fn push(state: &Rc<RefCell<MockState>>, frame: Vec<u8>) {
        state.borrow_mut().replies.push_back(frame);
    }

    #[test]
    fn get_image_maps_no_finger() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(&state, ack_frame(DEFAULT_ADDRESS, ConfirmCode::NO_FINGER.0, &[]));

        assert_eq!(fp.get_image(), Err(Error::NoFinger));
    }

    #[test]
    fn match_returns_the_score() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(&state, ack_frame(DEFAULT_ADDRESS, 0x00, &[0x00, 0x50]));

        assert_eq!(fp.match_templates(), Ok(0x50));
    }

    #[test]
    fn match_failure_has_no_score() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(&state, ack_frame(DEFAULT_ADDRESS, ConfirmCode::NOT_MATCH.0, &[]));

        assert_eq!(fp.match_templates(), Err(Error::NoMatch));
    }

    #[test]
    fn search_parses_page_then_score() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(
            &state,
            ack_frame(DEFAULT_ADDRESS, 0x00, &[0x00, 0x07, 0x00, 0x63]),
        );

        let hit = fp.search(CharBuffer::One, 0, 100).unwrap();
        assert_eq!(hit.page_id, 7);
        assert_eq!(hit.score, 99);
    }

    #[test]
    fn sysinfo_table_offsets_are_fixed() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        let table = [
            0x00, 0x01, // system state
            0x00, 0x09, // sensor type
            0x00, 0xC8, // capacity 200
            0x00, 0x03, // security level
            0xFF, 0xFF, 0xFF, 0xFF, // address
            0x00, 0x02, // packet size code (128 bytes)
            0x00, 0x06, // baud multiplier (57600)
        ];
        push(&state, ack_frame(DEFAULT_ADDRESS, 0x00, &table));

        let info = fp.read_sysinfo().unwrap();
        assert_eq!(info.system_state, 1);
        assert_eq!(info.sensor_type, 9);
        assert_eq!(info.capacity, 200);
        assert_eq!(info.security_level, 3);
        assert_eq!(info.address, 0xFFFF_FFFF);
        assert_eq!(info.packet_size, 2);
        assert_eq!(info.baud_multiplier, 6);
    }

    #[test]
    fn short_sysinfo_table_is_rejected() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(&state, ack_frame(DEFAULT_ADDRESS, 0x00, &[0x00; 8]));

        assert_eq!(fp.read_sysinfo(), Err(Error::Failed));
    }

    #[test]
    fn enroll_store_is_single_use() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(&state, ok_ack());
        push(&state, ok_ack());

        fp.enroll_start(3);
        assert!(fp.enroll_store().is_ok());
        // armed id was consumed by the first store
        assert_eq!(fp.enroll_store(), Err(Error::Failed));
        // only one StoreChar frame ever went out
        assert_eq!(state.borrow().sent.len(), 1);
    }

    #[test]
    fn armed_page_is_cleared_even_when_the_store_fails() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(
            &state,
            ack_frame(DEFAULT_ADDRESS, ConfirmCode::RW_FLASH_ERROR.0, &[]),
        );

        fp.enroll_start(3);
        assert_eq!(fp.enroll_store(), Err(Error::Flash));
        assert_eq!(fp.enroll_store(), Err(Error::Failed));
    }

    #[test]
    fn enroll_step1_short_circuits_on_capture_failure() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(&state, ack_frame(DEFAULT_ADDRESS, ConfirmCode::NO_FINGER.0, &[]));

        assert_eq!(fp.enroll_step1(), Err(Error::NoFinger));
        // GenChar was never sent
        assert_eq!(state.borrow().sent.len(), 1);
    }

    #[test]
    fn enroll_step2_sends_the_merge() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(&state, ok_ack()); // GetImage
        push(&state, ok_ack()); // GenChar(2)
        push(&state, ok_ack()); // RegModel

        assert!(fp.enroll_step2().is_ok());
        let s = state.borrow();
        assert_eq!(s.sent.len(), 3);
        assert_eq!(s.sent[0][9], 0x01); // GetImage
        assert_eq!(s.sent[1][9], 0x02); // GenChar
        assert_eq!(s.sent[1][10], 0x02); // into CharBuffer2
        assert_eq!(s.sent[2][9], 0x05); // RegModel
    }

    #[test]
    fn set_address_retargets_the_link() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        push(&state, ok_ack());
        push(&state, ack_frame(0x0000_0001, 0x00, &[]));

        fp.set_address(0x0000_0001).unwrap();
        fp.clear_database().unwrap();
        let s = state.borrow();
        assert_eq!(&s.sent[1][2..6], &[0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn register_writes_validate_their_ranges() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);

        assert_eq!(fp.set_baudrate(0), Err(Error::Failed));
        assert_eq!(fp.set_security_level(0), Err(Error::Failed));
        assert_eq!(fp.set_security_level(6), Err(Error::Failed));
        assert!(state.borrow().sent.is_empty());

        push(&state, ok_ack());
        assert!(fp.set_security_level(3).is_ok());
        let s = state.borrow();
        assert_eq!(s.sent[0][9], 0x0E); // WriteReg
        assert_eq!(s.sent[0][10], 0x05); // threshold register
        assert_eq!(s.sent[0][11], 0x03);
    }

    #[test]
    fn index_table_requires_a_full_page() {
        let (tx_cell, rx_cell) = (TransferCell::new(), TransferCell::new());
        let (mut fp, state) = driver(&tx_cell, &rx_cell);
        let mut bitmap = [0u8; 32];
        bitmap[0] = 0b0000_0111;
        push(&state, ack_frame(DEFAULT_ADDRESS, 0x00, &bitmap));

        let table = fp.read_index_table(0).unwrap();
        assert_eq!(table[0], 0b0000_0111);

        push(&state, ack_frame(DEFAULT_ADDRESS, 0x00, &[0u8; 16]));
        assert_eq!(fp.read_index_table(0), Err(Error::Failed));
    }
}
