use std::sync::Arc;

use heapless::Vec as BoundedVec;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::driver::{FrameHandler, FrameTransmitter};
use crate::frame::{Frame, MAX_UPLINK_FRAME_SIZE};

pub const SECURITY_CODE_SIZE: usize = 4;
/// Security code plus the one-byte command code.
pub const MIN_TELECOMMAND_SIZE: usize = SECURITY_CODE_SIZE + 1;
pub const MAX_TELECOMMAND_HANDLERS: usize = 32;

/// Shared 4-byte value every telecommand must lead with. A lightweight
/// authenticity check, not encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityCode(u32);

impl SecurityCode {
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Wire form: big-endian, so `0xAABB_CCDD` matches bytes `AA BB CC DD`.
    pub fn as_bytes(self) -> [u8; SECURITY_CODE_SIZE] {
        self.0.to_be_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("telecommand frame shorter than security code and command byte")]
    MalformedFrame,
    #[error("telecommand carried an invalid security code")]
    InvalidSecurityCode,
    #[error("telecommand could not be decoded")]
    GeneralError,
}

/// A decoded uplink frame: `[security:4][command:1][parameters:N]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telecommand<'a> {
    pub command_code: u8,
    pub parameters: &'a [u8],
}

/// Pure, deterministic telecommand frame decoder.
#[derive(Debug, Clone, Copy)]
pub struct TelecommandDecoder {
    security_code: SecurityCode,
}

impl TelecommandDecoder {
    pub fn new(security_code: SecurityCode) -> Self {
        Self { security_code }
    }

    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Telecommand<'a>, DecodeError> {
        if bytes.len() < MIN_TELECOMMAND_SIZE || bytes.len() > MAX_UPLINK_FRAME_SIZE {
            return Err(DecodeError::MalformedFrame);
        }
        if bytes[..SECURITY_CODE_SIZE] != self.security_code.as_bytes() {
            return Err(DecodeError::InvalidSecurityCode);
        }
        Ok(Telecommand {
            command_code: bytes[SECURITY_CODE_SIZE],
            parameters: &bytes[MIN_TELECOMMAND_SIZE..],
        })
    }
}

/// One ground command implementation, registered under a unique code.
/// Uniqueness across the registration is the integrator's responsibility;
/// dispatch honors first-match order and never checks it.
pub trait TelecommandHandler: Send + Sync {
    fn command_code(&self) -> u8;

    /// Execute the command. `transmitter` is the same downlink capability
    /// the driver exposes, so a reply frame can be sent synchronously.
    fn handle(&self, transmitter: &dyn FrameTransmitter, parameters: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("telecommand handler registration is full")]
pub struct RegistrationFull;

/// Routes each received frame to the handler matching its command code.
///
/// Decode failures and unknown command codes are logged and dropped without
/// a reply: an unauthenticated or malformed frame receives no
/// acknowledgment of any kind.
pub struct TelecommandDispatcher {
    decoder: TelecommandDecoder,
    handlers: BoundedVec<Arc<dyn TelecommandHandler>, MAX_TELECOMMAND_HANDLERS>,
}

impl TelecommandDispatcher {
    pub fn new(security_code: SecurityCode) -> Self {
        Self {
            decoder: TelecommandDecoder::new(security_code),
            handlers: BoundedVec::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn TelecommandHandler>) -> Result<(), RegistrationFull> {
        self.handlers.push(handler).map_err(|_| RegistrationFull)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl FrameHandler for TelecommandDispatcher {
    fn handle_frame(&self, transmitter: &dyn FrameTransmitter, frame: &Frame<'_>) {
        let telecommand = match self.decoder.decode(frame.payload()) {
            Ok(telecommand) => telecommand,
            Err(e) => {
                error!("discarding uplink frame: {}", e);
                return;
            }
        };

        match self
            .handlers
            .iter()
            .find(|handler| handler.command_code() == telecommand.command_code)
        {
            Some(handler) => {
                debug!(
                    "dispatching telecommand {:#04x} with {} parameter byte(s)",
                    telecommand.command_code,
                    telecommand.parameters.len()
                );
                handler.handle(transmitter, telecommand.parameters);
            }
            None => {
                warn!(
                    "no handler registered for telecommand {:#04x}",
                    telecommand.command_code
                );
            }
        }
    }
}
