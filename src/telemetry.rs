use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RECEIVER_TELEMETRY_SIZE: usize = 14;
pub const TRANSMITTER_TELEMETRY_SIZE: usize = 8;

/// Hardware reports every analog channel as a 12-bit ADC reading; a set top
/// nibble means the measurement is invalid or the readout was corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hardware reported out-of-range value in field `{field}`")]
pub struct TelemetryOutOfRange {
    pub field: &'static str,
}

fn read_u12(bytes: &[u8], offset: usize, field: &'static str) -> Result<u16, TelemetryOutOfRange> {
    let raw = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
    if raw & 0xF000 != 0 {
        return Err(TelemetryOutOfRange { field });
    }
    Ok(raw)
}

/// Receiver-side housekeeping readings, one 12-bit channel each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverTelemetry {
    pub transmitter_current: u16,
    pub doppler_offset: u16,
    pub receiver_current: u16,
    pub supply_voltage: u16,
    pub oscillator_temperature: u16,
    pub amplifier_temperature: u16,
    pub signal_strength: u16,
}

impl ReceiverTelemetry {
    /// Parse the fixed 14-byte little-endian readout. Any channel with its
    /// top nibble set fails the whole query.
    pub fn from_bytes(bytes: &[u8; RECEIVER_TELEMETRY_SIZE]) -> Result<Self, TelemetryOutOfRange> {
        Ok(Self {
            transmitter_current: read_u12(bytes, 0, "transmitter_current")?,
            doppler_offset: read_u12(bytes, 2, "doppler_offset")?,
            receiver_current: read_u12(bytes, 4, "receiver_current")?,
            supply_voltage: read_u12(bytes, 6, "supply_voltage")?,
            oscillator_temperature: read_u12(bytes, 8, "oscillator_temperature")?,
            amplifier_temperature: read_u12(bytes, 10, "amplifier_temperature")?,
            signal_strength: read_u12(bytes, 12, "signal_strength")?,
        })
    }
}

/// Transmitter-side housekeeping readings taken during the last transmission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmitterTelemetry {
    pub rf_reflected_power: u16,
    pub amplifier_temperature: u16,
    pub rf_forward_power: u16,
    pub transmitter_current: u16,
}

impl TransmitterTelemetry {
    pub fn from_bytes(
        bytes: &[u8; TRANSMITTER_TELEMETRY_SIZE],
    ) -> Result<Self, TelemetryOutOfRange> {
        Ok(Self {
            rf_reflected_power: read_u12(bytes, 0, "rf_reflected_power")?,
            amplifier_temperature: read_u12(bytes, 2, "amplifier_temperature")?,
            rf_forward_power: read_u12(bytes, 4, "rf_forward_power")?,
            transmitter_current: read_u12(bytes, 6, "transmitter_current")?,
        })
    }
}

/// Behaviour of the transmitter when no frame is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IdleState {
    Off = 0x00,
    On = 0x01,
}

/// Downlink bitrate selection. The discriminants are the flags the hardware
/// takes in the set-bitrate command; the state readout packs the same
/// selection into two bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Bitrate {
    B1200 = 0x01,
    B2400 = 0x02,
    B4800 = 0x04,
    B9600 = 0x08,
}

impl Bitrate {
    fn from_state_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x00 => Bitrate::B1200,
            0x01 => Bitrate::B2400,
            0x02 => Bitrate::B4800,
            _ => Bitrate::B9600,
        }
    }
}

/// Decoded transmitter state byte: `[reserved:4][bitrate:2][idle:1][beacon:1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmitterState {
    pub beacon_active: bool,
    pub state_when_idle: IdleState,
    pub bit_rate: Bitrate,
}

impl TransmitterState {
    /// Parse the single state byte; the reserved top nibble must be clear.
    pub fn from_byte(byte: u8) -> Result<Self, TelemetryOutOfRange> {
        if byte & 0xF0 != 0 {
            return Err(TelemetryOutOfRange {
                field: "transmitter_state",
            });
        }
        Ok(Self {
            beacon_active: byte & 0x01 != 0,
            state_when_idle: if byte & 0x02 != 0 {
                IdleState::On
            } else {
                IdleState::Off
            },
            bit_rate: Bitrate::from_state_bits(byte >> 2),
        })
    }
}
