//! Wire-level protocol definitions: frame constants, checksums, the
//! instruction set and the confirm-code mapping.
//!
//! Frame layout (all multi-byte fields big-endian):
//!
//! ```text
//! headr  | 0xEF 0x01 [2]
//! addr   | device address [4]
//! pid    | packet kind [1]
//! length | payload + checksum [2]
//! pload  | instruction/confirm + params [length - 2]
//! chksum | low 16 bits of sum(pid..last payload byte) [2]
//! ```
//!
//! Naming follows the ZW111 datasheet where it has a name for something.

use crate::error::Error;

/// Constant frame header, first two bytes of every packet.
pub const HEADER: u16 = 0xEF01;

/// Factory default device address.
pub const DEFAULT_ADDRESS: u32 = 0xFFFF_FFFF;

/// Factory default handshake password.
pub const DEFAULT_PASSWORD: u32 = 0x0000_0000;

/// Bytes before the payload: header (2) + address (4) + PID (1) + length (2).
pub const HDR_LEN: usize = 9;

/// Trailing checksum size.
pub const CHECKSUM_LEN: usize = 2;

/// Largest payload the length field may announce.
pub const MAX_PAYLOAD: usize = 256;

/// Smallest valid ACK payload: confirm code (1) + checksum (2).
pub const MIN_ACK_PAYLOAD: usize = 3;

/// Packet identifier byte distinguishing the four frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketKind {
    Command = 0x01,
    Data = 0x02,
    Ack = 0x07,
    End = 0x08,
}

/// One of the two device-side RAM feature slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CharBuffer {
    One = 0x01,
    Two = 0x02,
}

/// Writable SOC system registers (WriteReg instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Register {
    /// Baud rate control; value is the 9600 * N multiplier.
    Baudrate = 0x04,
    /// Match threshold / security rank, 1 to 5.
    SecurityLevel = 0x05,
    /// Data packet size code, see [`PacketSize`].
    PacketSize = 0x06,
}

/// Data packet size codes accepted by the packet-size register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketSize {
    Bytes32 = 0,
    Bytes64 = 1,
    Bytes128 = 2,
    Bytes256 = 3,
}

/// Low 16 bits of the byte sum over a raw slice.
pub fn sum16(bytes: &[u8]) -> u16 {
    let mut sum = 0u32;
    for byte in bytes {
        sum += u32::from(*byte);
    }
    sum as u16
}

/// Checksum of a received frame: PID, both length bytes, then the payload
/// with its trailing checksum bytes excluded.
pub fn checksum(pid: u8, length: u16, payload_sans_checksum: &[u8]) -> u16 {
    let mut sum = u32::from(pid);
    sum += u32::from(length >> 8);
    sum += u32::from(length & 0x00FF);
    for byte in payload_sans_checksum {
        sum += u32::from(*byte);
    }
    sum as u16
}

/// Confirm code byte returned in every ACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfirmCode(pub u8);

impl ConfirmCode {
    pub const OK: ConfirmCode = ConfirmCode(0x00);
    pub const PACKET_ERROR: ConfirmCode = ConfirmCode(0x01);
    pub const NO_FINGER: ConfirmCode = ConfirmCode(0x02);
    pub const NOT_MATCH: ConfirmCode = ConfirmCode(0x08);
    pub const NOT_FOUND: ConfirmCode = ConfirmCode(0x09);
    pub const PASSWORD_ERROR: ConfirmCode = ConfirmCode(0x13);
    pub const RW_FLASH_ERROR: ConfirmCode = ConfirmCode(0x18);
    pub const DB_FULL: ConfirmCode = ConfirmCode(0x1F);
    pub const MUST_VERIFY_PASSWORD: ConfirmCode = ConfirmCode(0x21);
    pub const STREAM_DATA_OK: ConfirmCode = ConfirmCode(0xF0);
    pub const STREAM_CMD_ACCEPTED: ConfirmCode = ConfirmCode(0xF1);
    pub const SUM_ERROR: ConfirmCode = ConfirmCode(0xF2);
    pub const PACKET_FLAG_ERROR: ConfirmCode = ConfirmCode(0xF3);
    pub const PACKET_LENGTH_ERROR: ConfirmCode = ConfirmCode(0xF4);
    pub const CODE_LENGTH_TOO_LONG: ConfirmCode = ConfirmCode(0xF5);
    pub const BURNING_FLASH_FAILED: ConfirmCode = ConfirmCode(0xF6);

    /// Total mapping from device confirm codes to the driver outcome.
    ///
    /// The streaming handshake codes (0xF0/0xF1) acknowledge bulk transfer
    /// progress and count as success; anything unmapped surfaces the raw
    /// byte.
    pub fn status(self) -> Result<(), Error> {
        match self {
            ConfirmCode::OK => Ok(()),
            ConfirmCode::NO_FINGER => Err(Error::NoFinger),
            ConfirmCode::NOT_MATCH | ConfirmCode::NOT_FOUND => Err(Error::NoMatch),
            ConfirmCode::PASSWORD_ERROR | ConfirmCode::MUST_VERIFY_PASSWORD => {
                Err(Error::Password)
            }
            ConfirmCode::DB_FULL => Err(Error::DbFull),
            ConfirmCode::RW_FLASH_ERROR | ConfirmCode::BURNING_FLASH_FAILED => Err(Error::Flash),
            ConfirmCode::PACKET_ERROR
            | ConfirmCode::SUM_ERROR
            | ConfirmCode::PACKET_FLAG_ERROR
            | ConfirmCode::PACKET_LENGTH_ERROR
            | ConfirmCode::CODE_LENGTH_TOO_LONG => Err(Error::Packet),
            ConfirmCode::STREAM_DATA_OK | ConfirmCode::STREAM_CMD_ACCEPTED => Ok(()),
            ConfirmCode(other) => Err(Error::Device(other)),
        }
    }
}

/// Sink the command serializer writes parameter bytes into.
pub trait CommandWriter {
    fn write_cmd_bytes(&mut self, bytes: &[u8]);
}

/// Enum for commands one can send to the ZW111. Names match the datasheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Captures an image of the fingerprint into the image buffer.
    GetImage,

    /// Extracts features from the image buffer into a char buffer.
    GenChar { buffer: CharBuffer },

    /// Compares the feature files in CharBuffer1 and CharBuffer2.
    Match,

    /// Searches the template database with the features in `buffer`.
    Search {
        buffer: CharBuffer,
        start: u16,
        count: u16,
    },

    /// Merges CharBuffer1 and CharBuffer2 into a template candidate.
    RegModel,

    /// Stores the template in `buffer` at flash page `page`.
    StoreChar { buffer: CharBuffer, page: u16 },

    /// Loads the template at `page` into `buffer`.
    LoadChar { buffer: CharBuffer, page: u16 },

    /// Deletes `count` templates starting at `page`.
    DeleteChar { page: u16, count: u16 },

    /// Clears the whole template database.
    Empty,

    /// Writes one byte into a SOC system register.
    WriteReg { reg: Register, value: u8 },

    /// Reads the 16-byte basic parameter table.
    ReadSysPara,

    /// Writes a new 32-bit handshake password.
    SetPassword { password: u32 },

    /// Performs the password handshake.
    VerifyPassword { password: u32 },

    /// Assigns a new 32-bit device address.
    SetAddress { address: u32 },

    /// Reads the number of valid templates in flash.
    TemplateCount,

    /// Reads one 32-byte page of the template index table.
    ReadIndexTable { page: u8 },
}

impl Command {
    /// The instruction byte sent in the command payload.
    pub fn instruction(&self) -> u8 {
        match self {
            Command::GetImage => 0x01,
            Command::GenChar { .. } => 0x02,
            Command::Match => 0x03,
            Command::Search { .. } => 0x04,
            Command::RegModel => 0x05,
            Command::StoreChar { .. } => 0x06,
            Command::LoadChar { .. } => 0x07,
            Command::DeleteChar { .. } => 0x0C,
            Command::Empty => 0x0D,
            Command::WriteReg { .. } => 0x0E,
            Command::ReadSysPara => 0x0F,
            Command::SetPassword { .. } => 0x12,
            Command::VerifyPassword { .. } => 0x13,
            Command::SetAddress { .. } => 0x15,
            Command::TemplateCount => 0x1D,
            Command::ReadIndexTable { .. } => 0x1F,
        }
    }

    /// Serializes the parameter bytes following the instruction.
    pub fn write_params(&self, writer: &mut dyn CommandWriter) {
        match self {
            Command::GetImage
            | Command::Match
            | Command::RegModel
            | Command::Empty
            | Command::ReadSysPara
            | Command::TemplateCount => {}

            Command::GenChar { buffer } => {
                writer.write_cmd_bytes(&[*buffer as u8]);
            }

            // bufid  | buffer [1]
            // sstart | start page [2]
            // snum   | page count [2]
            Command::Search {
                buffer,
                start,
                count,
            } => {
                writer.write_cmd_bytes(&[*buffer as u8]);
                writer.write_cmd_bytes(&start.to_be_bytes()[..]);
                writer.write_cmd_bytes(&count.to_be_bytes()[..]);
            }

            Command::StoreChar { buffer, page } | Command::LoadChar { buffer, page } => {
                writer.write_cmd_bytes(&[*buffer as u8]);
                writer.write_cmd_bytes(&page.to_be_bytes()[..]);
            }

            Command::DeleteChar { page, count } => {
                writer.write_cmd_bytes(&page.to_be_bytes()[..]);
                writer.write_cmd_bytes(&count.to_be_bytes()[..]);
            }

            Command::WriteReg { reg, value } => {
                writer.write_cmd_bytes(&[*reg as u8, *value]);
            }

            Command::SetPassword { password } | Command::VerifyPassword { password } => {
                writer.write_cmd_bytes(&password.to_be_bytes()[..]);
            }

            Command::SetAddress { address } => {
                writer.write_cmd_bytes(&address.to_be_bytes()[..]);
            }

            Command::ReadIndexTable { page } => {
                writer.write_cmd_bytes(&[*page]);
            }
        }
    }
}
