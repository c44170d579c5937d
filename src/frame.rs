use core::time::Duration;
use static_assertions::const_assert;
use thiserror::Error;

/// Largest payload the transceiver will accept for downlink transmission.
pub const MAX_DOWNLINK_FRAME_SIZE: usize = 235;
/// Largest telecommand payload the receiver will deliver in one frame.
pub const MAX_UPLINK_FRAME_SIZE: usize = 200;
/// Downlink frame header: `[full_size:u16][doppler:u16][rssi:u16]`, little-endian.
pub const FRAME_HEADER_SIZE: usize = 6;
/// Transaction buffer large enough for a maximum-size frame plus its header.
pub const PREFERRED_BUFFER_SIZE: usize = MAX_DOWNLINK_FRAME_SIZE + FRAME_HEADER_SIZE;
/// Number of frame slots in the transmitter's hardware buffer.
pub const TRANSMITTER_BUFFER_SLOTS: u8 = 40;
/// Most frames the receiver hardware can hold; larger counts are corruption.
pub const RECEIVER_QUEUE_CAPACITY: u16 = 64;

const_assert!(PREFERRED_BUFFER_SIZE > FRAME_HEADER_SIZE);
const_assert!(MAX_UPLINK_FRAME_SIZE <= MAX_DOWNLINK_FRAME_SIZE);

/// Mask over the bits a 12-bit hardware measurement may legally use.
const VALID_12BIT_MASK: u16 = 0x0FFF;

/// One downlinked transmission as retrieved from the receiver.
///
/// The payload is a borrowed view into the caller-supplied retrieval buffer;
/// the frame never owns its bytes and is invalid once that buffer is reused.
/// Callers must check [`Frame::verify`] before acting on the contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frame<'a> {
    full_size: u16,
    doppler: u16,
    rssi: u16,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(full_size: u16, doppler: u16, rssi: u16, payload: &'a [u8]) -> Self {
        Self {
            full_size,
            doppler,
            rssi,
            payload,
        }
    }

    /// Bytes actually retrieved, which may be fewer than [`Frame::full_size`].
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Payload size the hardware declared for this frame.
    pub fn full_size(&self) -> u16 {
        self.full_size
    }

    pub fn doppler(&self) -> u16 {
        self.doppler
    }

    pub fn rssi(&self) -> u16 {
        self.rssi
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn is_doppler_valid(&self) -> bool {
        self.doppler & !VALID_12BIT_MASK == 0
    }

    pub fn is_rssi_valid(&self) -> bool {
        self.rssi & !VALID_12BIT_MASK == 0
    }

    /// True when every declared payload byte was actually retrieved.
    pub fn is_complete(&self) -> bool {
        self.payload.len() == usize::from(self.full_size)
    }

    /// Full validity check: sane doppler and RSSI, declared size within
    /// bounds, payload complete, and at least one payload byte declared.
    /// A default (all-zero) frame never verifies.
    pub fn verify(&self) -> bool {
        self.is_doppler_valid()
            && self.is_rssi_valid()
            && self.full_size > 0
            && usize::from(self.full_size) <= MAX_DOWNLINK_FRAME_SIZE
            && self.is_complete()
    }
}

/// A payload the transmitter retransmits autonomously at a fixed period
/// until explicitly cleared. Hardware is the single source of truth for the
/// active beacon; no copy is kept on the flight computer.
#[derive(Debug, Clone, Copy)]
pub struct Beacon<'a> {
    period: Duration,
    payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BeaconError {
    #[error("beacon period {0:?} outside hardware-representable range")]
    PeriodOutOfRange(Duration),
    #[error("beacon payload of {0} bytes exceeds maximum downlink frame size")]
    PayloadTooLong(usize),
}

impl<'a> Beacon<'a> {
    pub fn new(period: Duration, payload: &'a [u8]) -> Result<Self, BeaconError> {
        let seconds = period.as_secs();
        if seconds == 0 || seconds > u64::from(u16::MAX) {
            return Err(BeaconError::PeriodOutOfRange(period));
        }
        if payload.len() > MAX_DOWNLINK_FRAME_SIZE {
            return Err(BeaconError::PayloadTooLong(payload.len()));
        }
        Ok(Self { period, payload })
    }

    /// Beacon period truncated to whole seconds, as the hardware encodes it.
    pub fn period_seconds(&self) -> u16 {
        self.period.as_secs() as u16
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}
