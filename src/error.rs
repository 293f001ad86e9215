use thiserror::Error;

/// Convenience alias used by every fallible driver call.
pub type Result<T> = core::result::Result<T, Error>;

/// Canonical failure taxonomy surfaced by the driver.
///
/// Transport failures (`Failed`, `Timeout`) and protocol violations
/// (`Packet`) come from the codec itself; the remaining variants are valid
/// device outcomes decoded from the ACK confirm code. Workflow code treats
/// `NoFinger` as "keep waiting" during capture and everything else as the
/// end of the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The transport refused the operation, or a hardware transfer failed.
    #[error("link failure")]
    Failed,

    /// A bounded wait expired before the device responded.
    #[error("timed out waiting for the device")]
    Timeout,

    /// Framing, length or checksum violation in a received packet.
    #[error("malformed packet")]
    Packet,

    /// No finger on the sensor window.
    #[error("no finger detected")]
    NoFinger,

    /// The captured features did not match the probed template.
    #[error("fingerprint not matched")]
    NoMatch,

    /// Device password missing or wrong.
    #[error("password rejected")]
    Password,

    /// The template database is full.
    #[error("template database full")]
    DbFull,

    /// Flash read/write or burn failure inside the module.
    #[error("module flash failure")]
    Flash,

    /// Any confirm code outside the mapped set; carries the raw byte.
    #[error("device reported error {0:#04x}")]
    Device(u8),
}
