use thiserror::Error;

/// Logical device addresses of the two transceiver halves on the shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceAddress {
    Receiver = 0x60,
    Transmitter = 0x61,
}

/// A bus transaction failed. The communication core never inspects failure
/// detail beyond the fact of it; retry and logging policy live above the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bus transaction failed")]
pub struct BusError;

/// Byte-oriented bus transactions against the transceiver.
///
/// Implementations are expected to serialize transactions per device address
/// internally; the driver additionally holds independent transmit-path and
/// receive-path locks so calls for the same logical device never interleave.
pub trait CommBus: Send + Sync {
    /// Write `data` to `address` in a single transaction.
    fn write(&self, address: DeviceAddress, data: &[u8]) -> Result<(), BusError>;

    /// Write `data` to `address`, then read exactly `response.len()` bytes
    /// back within the same transaction.
    fn write_read(
        &self,
        address: DeviceAddress,
        data: &[u8],
        response: &mut [u8],
    ) -> Result<(), BusError>;
}
