//! # Ground-Link Communication Core
//!
//! The ground communication subsystem of a small-satellite flight software
//! stack: a transceiver driver speaking a byte-oriented bus command
//! protocol, a background poller that drains received frames, and a
//! telecommand decoding/dispatch pipeline that routes every authenticated
//! uplink frame to its registered handler.
//!
//! ## Features
//!
//! - **Two-phase frame retrieval**: bounded transactions against hardware
//!   that cannot report frame length and payload atomically
//! - **Bounded retry policy**: transaction failures and invalid frames are
//!   retried a fixed number of times, never indefinitely
//! - **Background polling**: a long-lived task with a blocking
//!   pause/resume handshake that cannot cut a transfer mid-flight
//! - **Telecommand dispatch**: security-code validation and first-match
//!   routing to polymorphic command handlers
//! - **Independent path locking**: a downlink transmission may overlap
//!   frame reception, but neither path ever interleaves with itself
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use groundlink::{
//!     BusError, Comm, CommBus, DeviceAddress, FrameTransmitter, SecurityCode,
//!     TelecommandDispatcher,
//! };
//!
//! struct LoopbackBus;
//!
//! impl CommBus for LoopbackBus {
//!     fn write(&self, _: DeviceAddress, _: &[u8]) -> Result<(), BusError> {
//!         Ok(())
//!     }
//!
//!     fn write_read(
//!         &self,
//!         _: DeviceAddress,
//!         _: &[u8],
//!         response: &mut [u8],
//!     ) -> Result<(), BusError> {
//!         response.fill(0);
//!         Ok(())
//!     }
//! }
//!
//! let dispatcher = TelecommandDispatcher::new(SecurityCode::new(0xAABB_CCDD));
//! let comm = Arc::new(Comm::new(LoopbackBus, Arc::new(dispatcher)));
//!
//! // Downlink a frame; the loopback transmitter reports a free buffer.
//! comm.send_frame(b"HELLO").unwrap();
//! ```
//!
//! ## Architecture
//!
//! - [`frame`] - Received-frame value type, beacon type, size constants
//! - [`bus`] - Bus transaction interface consumed by the driver
//! - [`driver`] - Transceiver driver, bus command protocol, background poller
//! - [`telecommand`] - Telecommand decoder and dispatcher
//! - [`telemetry`] - Fixed-layout housekeeping readouts and their parsers
//! - [`retry`] - Bounded-retry combinator shared by hardware transactions

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bus;
pub mod driver;
pub mod frame;
pub mod retry;
pub mod telecommand;
pub mod telemetry;

// Re-export the main public types for convenience
pub use bus::{BusError, CommBus, DeviceAddress};
pub use driver::{Comm, CommConfig, CommError, FrameHandler, FrameTransmitter};
pub use frame::{Beacon, BeaconError, Frame, MAX_DOWNLINK_FRAME_SIZE, MAX_UPLINK_FRAME_SIZE};
pub use telecommand::{
    DecodeError, SecurityCode, Telecommand, TelecommandDecoder, TelecommandDispatcher,
    TelecommandHandler,
};
pub use telemetry::{Bitrate, IdleState, ReceiverTelemetry, TransmitterState, TransmitterTelemetry};
