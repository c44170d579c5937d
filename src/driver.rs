use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use heapless::Vec as BoundedVec;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::bus::{BusError, CommBus, DeviceAddress};
use crate::frame::{
    Beacon, Frame, FRAME_HEADER_SIZE, MAX_DOWNLINK_FRAME_SIZE, PREFERRED_BUFFER_SIZE,
    RECEIVER_QUEUE_CAPACITY, TRANSMITTER_BUFFER_SLOTS,
};
use crate::retry::retry_with_limit;
use crate::telemetry::{
    Bitrate, IdleState, ReceiverTelemetry, TelemetryOutOfRange, TransmitterState,
    TransmitterTelemetry, RECEIVER_TELEMETRY_SIZE, TRANSMITTER_TELEMETRY_SIZE,
};

/// Default interval between background poll cycles.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default number of retrieval attempts before a frame is given up on.
const DEFAULT_FRAME_RETRY_LIMIT: u8 = 3;
/// Free-slot value the transmitter reports when it refused a frame.
const FRAME_REJECTED_SENTINEL: u8 = 0xFF;

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum ReceiverCommand {
    GetTelemetry = 0x1A,
    GetFrameCount = 0x21,
    GetFrame = 0x22,
    RemoveFrame = 0x24,
    HardReset = 0xAB,
    ResetWatchdog = 0xCC,
}

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum TransmitterCommand {
    SendFrame = 0x10,
    SetBeacon = 0x14,
    ClearBeacon = 0x1C,
    GetState = 0x22,
    SetIdleState = 0x24,
    GetTelemetry = 0x26,
    SetBitRate = 0x28,
    HardReset = 0xAB,
    ResetWatchdog = 0xCC,
}

#[derive(Debug, Error)]
pub enum CommError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("payload of {0} bytes exceeds maximum downlink frame size")]
    PayloadTooLarge(usize),
    #[error("transmitter rejected the frame")]
    FrameRejected,
    #[error("transmitter did not accept beacon payload ({free_slots} slots reported free)")]
    BeaconRejected { free_slots: u8 },
    #[error("receiver reported implausible pending frame count {0}")]
    InvalidFrameCount(u16),
    #[error("retrieval buffer of {0} bytes cannot hold a frame header")]
    BufferTooSmall(usize),
    #[error("no valid frame after {attempts} retrieval attempts")]
    RetriesExhausted { attempts: u8 },
    #[error(transparent)]
    Telemetry(#[from] TelemetryOutOfRange),
    #[error("transceiver hardware reset failed")]
    ResetFailed,
    #[error("failed to start poller task")]
    TaskStart(#[from] std::io::Error),
    #[error("background poller is not running")]
    PollerNotRunning,
    #[error("background poller has stopped")]
    PollerStopped,
}

#[derive(Debug, Clone, Copy)]
pub struct CommConfig {
    /// How long the poller waits for a pause request before running a cycle.
    pub poll_interval: Duration,
    /// Retrieval attempts per frame before the slot is discarded.
    pub frame_retry_limit: u8,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            frame_retry_limit: DEFAULT_FRAME_RETRY_LIMIT,
        }
    }
}

/// Capability to downlink one frame, handed to telecommand handlers so they
/// can reply on the same link that delivered the command.
pub trait FrameTransmitter: Send + Sync {
    fn send_frame(&self, payload: &[u8]) -> Result<(), CommError>;
}

/// Upstream consumer of received frames, invoked synchronously from the
/// poller's call stack for every verified frame.
pub trait FrameHandler: Send + Sync {
    fn handle_frame(&self, transmitter: &dyn FrameTransmitter, frame: &Frame<'_>);
}

/// Header fields of a retrieved frame before the payload view is carved out
/// of the caller's buffer.
#[derive(Debug, Clone, Copy, Default)]
struct RawFrame {
    full_size: u16,
    doppler: u16,
    rssi: u16,
    payload_len: usize,
}

impl RawFrame {
    fn as_frame<'a>(&self, buffer: &'a [u8]) -> Frame<'a> {
        if self.payload_len == 0 {
            return Frame::new(self.full_size, self.doppler, self.rssi, &[]);
        }
        Frame::new(
            self.full_size,
            self.doppler,
            self.rssi,
            &buffer[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + self.payload_len],
        )
    }

    // Mirror of Frame::verify over the not-yet-sliced buffer.
    fn verify(&self) -> bool {
        self.doppler & 0xF000 == 0
            && self.rssi & 0xF000 == 0
            && self.full_size > 0
            && usize::from(self.full_size) <= MAX_DOWNLINK_FRAME_SIZE
            && self.payload_len == usize::from(self.full_size)
    }
}

enum PollerControl {
    Pause,
    Resume,
}

struct PollerHandle {
    control: mpsc::Sender<PollerControl>,
    ack: Receiver<()>,
}

/// Driver for the radio transceiver's two logical devices.
///
/// Transmit-path and receive-path operations are serialized by two
/// independent locks, so a foreground `send_frame` can overlap the poller's
/// receive work but never interleave with another transmission.
pub struct Comm<B: CommBus> {
    bus: B,
    config: CommConfig,
    frame_handler: Arc<dyn FrameHandler>,
    tx_lock: Mutex<()>,
    rx_lock: Mutex<()>,
    poller: Mutex<Option<PollerHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: CommBus> Comm<B> {
    pub fn new(bus: B, frame_handler: Arc<dyn FrameHandler>) -> Self {
        Self::with_config(bus, frame_handler, CommConfig::default())
    }

    pub fn with_config(bus: B, frame_handler: Arc<dyn FrameHandler>, config: CommConfig) -> Self {
        Self {
            bus,
            config,
            frame_handler,
            tx_lock: Mutex::new(()),
            rx_lock: Mutex::new(()),
            poller: Mutex::new(None),
        }
    }

    pub fn config(&self) -> CommConfig {
        self.config
    }

    fn write_request(&self, device: DeviceAddress, request: &[u8]) -> Result<(), BusError> {
        let result = self.bus.write(device, request);
        if let Err(e) = &result {
            error!("write of {} byte(s) to {:?} failed: {}", request.len(), device, e);
        }
        result
    }

    fn write_request_with_response(
        &self,
        device: DeviceAddress,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<(), BusError> {
        let result = self.bus.write_read(device, request, response);
        if let Err(e) = &result {
            error!(
                "write-read of {}/{} byte(s) on {:?} failed: {}",
                request.len(),
                response.len(),
                device,
                e
            );
        }
        result
    }

    fn send_command(&self, device: DeviceAddress, command: u8) -> Result<(), BusError> {
        self.write_request(device, &[command])
    }

    fn send_command_with_response(
        &self,
        device: DeviceAddress,
        command: u8,
        response: &mut [u8],
    ) -> Result<(), BusError> {
        self.write_request_with_response(device, &[command], response)
    }

    /// Two-phase frame retrieval. The receiver cannot report length and
    /// payload atomically, so the first transaction asks only for the
    /// declared size and the second re-issues the command over a window
    /// clamped to the caller's storage.
    fn receive_frame_raw(&self, buffer: &mut [u8]) -> Result<RawFrame, CommError> {
        if buffer.is_empty() {
            return Ok(RawFrame::default());
        }
        if buffer.len() < FRAME_HEADER_SIZE {
            return Err(CommError::BufferTooSmall(buffer.len()));
        }

        let mut size_bytes = [0u8; 2];
        self.send_command_with_response(
            DeviceAddress::Receiver,
            ReceiverCommand::GetFrame as u8,
            &mut size_bytes,
        )?;
        let declared = usize::from(u16::from_le_bytes(size_bytes));

        let window = buffer.len().min(declared + FRAME_HEADER_SIZE);
        let response = &mut buffer[..window];
        self.send_command_with_response(
            DeviceAddress::Receiver,
            ReceiverCommand::GetFrame as u8,
            response,
        )?;

        Ok(RawFrame {
            full_size: u16::from_le_bytes([response[0], response[1]]),
            doppler: u16::from_le_bytes([response[2], response[3]]),
            rssi: u16::from_le_bytes([response[4], response[5]]),
            payload_len: window - FRAME_HEADER_SIZE,
        })
    }

    /// Retrieve the frame at the head of the receiver queue without
    /// advancing it. An empty buffer yields a default (unverified) frame
    /// and touches no hardware.
    pub fn receive_frame<'a>(&self, buffer: &'a mut [u8]) -> Result<Frame<'a>, CommError> {
        let _rx = lock(&self.rx_lock);
        let raw = self.receive_frame_raw(buffer)?;
        Ok(raw.as_frame(buffer))
    }

    /// Retrieve one frame with the bounded retry policy, then advance the
    /// receiver queue whether or not a valid frame was obtained — a bad
    /// frame must never stay at the head of the hardware queue.
    pub fn get_frame<'a>(&self, buffer: &'a mut [u8]) -> Result<Frame<'a>, CommError> {
        let _rx = lock(&self.rx_lock);
        let attempts = self.config.frame_retry_limit;
        let outcome = retry_with_limit(
            attempts,
            |attempt| match self.receive_frame_raw(buffer) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!("frame retrieval attempt {} failed: {}", attempt + 1, e);
                    None
                }
            },
            |outcome| matches!(outcome, Some(raw) if raw.verify()),
        );

        if let Err(e) = self.send_command(
            DeviceAddress::Receiver,
            ReceiverCommand::RemoveFrame as u8,
        ) {
            error!("failed to advance receiver frame queue: {}", e);
        }

        match outcome.flatten() {
            Some(raw) => Ok(raw.as_frame(buffer)),
            None => Err(CommError::RetriesExhausted { attempts }),
        }
    }

    /// Number of frames waiting in the receiver's hardware queue.
    pub fn get_frame_count(&self) -> Result<u16, CommError> {
        let _rx = lock(&self.rx_lock);
        let mut bytes = [0u8; 2];
        self.send_command_with_response(
            DeviceAddress::Receiver,
            ReceiverCommand::GetFrameCount as u8,
            &mut bytes,
        )?;
        let count = u16::from_le_bytes(bytes);
        if count > RECEIVER_QUEUE_CAPACITY {
            return Err(CommError::InvalidFrameCount(count));
        }
        Ok(count)
    }

    // Caller must hold the transmit lock.
    fn transmit_frame(&self, payload: &[u8]) -> Result<u8, CommError> {
        if payload.len() > MAX_DOWNLINK_FRAME_SIZE {
            return Err(CommError::PayloadTooLarge(payload.len()));
        }

        let mut request: BoundedVec<u8, { MAX_DOWNLINK_FRAME_SIZE + 1 }> = BoundedVec::new();
        let _ = request.push(TransmitterCommand::SendFrame as u8);
        let _ = request.extend_from_slice(payload);

        let mut response = [0u8; 1];
        self.write_request_with_response(DeviceAddress::Transmitter, &request, &mut response)?;

        if response[0] == FRAME_REJECTED_SENTINEL {
            warn!("transmitter rejected {}-byte frame", payload.len());
            return Err(CommError::FrameRejected);
        }
        Ok(response[0])
    }

    /// Queue `payload` for downlink transmission; returns the number of
    /// transmit-buffer slots still free after queuing.
    pub fn schedule_frame_transmission(&self, payload: &[u8]) -> Result<u8, CommError> {
        let _tx = lock(&self.tx_lock);
        self.transmit_frame(payload)
    }

    /// Install `beacon` as the recurring transmission. The payload is first
    /// scheduled as an ordinary frame and accepted only if the transmit
    /// buffer was otherwise empty; this confirms the hardware took the
    /// payload before the persistent beacon command commits it.
    pub fn set_beacon(&self, beacon: &Beacon<'_>) -> Result<(), CommError> {
        let _tx = lock(&self.tx_lock);
        let free_slots = self.transmit_frame(beacon.payload())?;
        if free_slots != TRANSMITTER_BUFFER_SLOTS - 1 {
            warn!(
                "beacon trial transmission left {} slots free, expected {}",
                free_slots,
                TRANSMITTER_BUFFER_SLOTS - 1
            );
            return Err(CommError::BeaconRejected { free_slots });
        }

        let mut request: BoundedVec<u8, { MAX_DOWNLINK_FRAME_SIZE + 3 }> = BoundedVec::new();
        let _ = request.push(TransmitterCommand::SetBeacon as u8);
        let _ = request.extend_from_slice(&beacon.period_seconds().to_le_bytes());
        let _ = request.extend_from_slice(beacon.payload());
        self.write_request(DeviceAddress::Transmitter, &request)?;
        Ok(())
    }

    /// Stop the recurring beacon transmission.
    pub fn clear_beacon(&self) -> Result<(), CommError> {
        let _tx = lock(&self.tx_lock);
        self.send_command(
            DeviceAddress::Transmitter,
            TransmitterCommand::ClearBeacon as u8,
        )?;
        Ok(())
    }

    pub fn receiver_telemetry(&self) -> Result<ReceiverTelemetry, CommError> {
        let _rx = lock(&self.rx_lock);
        let mut bytes = [0u8; RECEIVER_TELEMETRY_SIZE];
        self.send_command_with_response(
            DeviceAddress::Receiver,
            ReceiverCommand::GetTelemetry as u8,
            &mut bytes,
        )?;
        Ok(ReceiverTelemetry::from_bytes(&bytes)?)
    }

    pub fn transmitter_telemetry(&self) -> Result<TransmitterTelemetry, CommError> {
        let _tx = lock(&self.tx_lock);
        let mut bytes = [0u8; TRANSMITTER_TELEMETRY_SIZE];
        self.send_command_with_response(
            DeviceAddress::Transmitter,
            TransmitterCommand::GetTelemetry as u8,
            &mut bytes,
        )?;
        Ok(TransmitterTelemetry::from_bytes(&bytes)?)
    }

    pub fn transmitter_state(&self) -> Result<TransmitterState, CommError> {
        let _tx = lock(&self.tx_lock);
        let mut byte = [0u8; 1];
        self.send_command_with_response(
            DeviceAddress::Transmitter,
            TransmitterCommand::GetState as u8,
            &mut byte,
        )?;
        Ok(TransmitterState::from_byte(byte[0])?)
    }

    pub fn set_idle_state(&self, state: IdleState) -> Result<(), CommError> {
        let _tx = lock(&self.tx_lock);
        self.write_request(
            DeviceAddress::Transmitter,
            &[TransmitterCommand::SetIdleState as u8, state as u8],
        )?;
        Ok(())
    }

    pub fn set_bit_rate(&self, rate: Bitrate) -> Result<(), CommError> {
        let _tx = lock(&self.tx_lock);
        self.write_request(
            DeviceAddress::Transmitter,
            &[TransmitterCommand::SetBitRate as u8, rate as u8],
        )?;
        Ok(())
    }

    /// Feed both hardware watchdogs. The resets are independent; a single
    /// failure is already logged at the bus layer, and only the loss of
    /// both in one cycle is an anomaly.
    pub fn reset_watchdogs(&self) {
        let receiver_ok = {
            let _rx = lock(&self.rx_lock);
            self.send_command(
                DeviceAddress::Receiver,
                ReceiverCommand::ResetWatchdog as u8,
            )
            .is_ok()
        };
        let transmitter_ok = {
            let _tx = lock(&self.tx_lock);
            self.send_command(
                DeviceAddress::Transmitter,
                TransmitterCommand::ResetWatchdog as u8,
            )
            .is_ok()
        };
        if !receiver_ok && !transmitter_ok {
            error!("both hardware watchdog resets failed");
        }
    }

    /// Full hardware reset of both transceiver halves. Both commands must
    /// succeed; lock order is receive path first, then transmit path.
    pub fn hardware_reset(&self) -> Result<(), CommError> {
        let _rx = lock(&self.rx_lock);
        let _tx = lock(&self.tx_lock);
        self.send_command(DeviceAddress::Receiver, ReceiverCommand::HardReset as u8)
            .map_err(|_| CommError::ResetFailed)?;
        self.send_command(
            DeviceAddress::Transmitter,
            TransmitterCommand::HardReset as u8,
        )
        .map_err(|_| CommError::ResetFailed)?;
        Ok(())
    }

    /// Start the background poller, resetting the hardware first. A no-op
    /// when the poller is already running; if the reset fails, no task is
    /// created and the error is returned.
    pub fn restart(self: &Arc<Self>) -> Result<(), CommError>
    where
        B: 'static,
    {
        let mut poller = lock(&self.poller);
        if poller.is_some() {
            debug!("comm poller already running");
            return Ok(());
        }

        self.hardware_reset()?;

        let (control_tx, control_rx) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::sync_channel(0);
        let comm = Arc::downgrade(self);
        let poll_interval = self.config.poll_interval;
        thread::Builder::new()
            .name("comm-poller".into())
            .spawn(move || poll_loop(&comm, &control_rx, &ack_tx, poll_interval))?;

        *poller = Some(PollerHandle {
            control: control_tx,
            ack: ack_rx,
        });
        Ok(())
    }

    pub fn poller_running(&self) -> bool {
        lock(&self.poller).is_some()
    }

    /// Request a pause and block until the poller acknowledges from the top
    /// of its wait loop. Never returns while a poll cycle is mid-flight.
    pub fn pause(&self) -> Result<(), CommError> {
        let poller = lock(&self.poller);
        let handle = poller.as_ref().ok_or(CommError::PollerNotRunning)?;
        handle
            .control
            .send(PollerControl::Pause)
            .map_err(|_| CommError::PollerStopped)?;
        handle.ack.recv().map_err(|_| CommError::PollerStopped)
    }

    /// External trigger that un-suspends a paused poller.
    pub fn resume(&self) -> Result<(), CommError> {
        let poller = lock(&self.poller);
        let handle = poller.as_ref().ok_or(CommError::PollerNotRunning)?;
        handle
            .control
            .send(PollerControl::Resume)
            .map_err(|_| CommError::PollerStopped)
    }

    /// One poll cycle: drain pending frames to the upstream consumer, then
    /// feed the watchdogs. A failed count query skips the drain but the
    /// watchdogs are still reset.
    fn poll_cycle(&self) {
        match self.get_frame_count() {
            Ok(0) => {}
            Ok(count) => {
                debug!("{} frame(s) pending in receiver queue", count);
                for _ in 0..count {
                    let mut buffer = [0u8; PREFERRED_BUFFER_SIZE];
                    match self.get_frame(&mut buffer) {
                        Ok(frame) => self.frame_handler.handle_frame(self, &frame),
                        Err(e) => error!("dropped frame after failed retrieval: {}", e),
                    }
                }
            }
            Err(e) => error!("pending frame count query failed: {}", e),
        }
        self.reset_watchdogs();
    }
}

impl<B: CommBus> FrameTransmitter for Comm<B> {
    fn send_frame(&self, payload: &[u8]) -> Result<(), CommError> {
        self.schedule_frame_transmission(payload).map(|_| ())
    }
}

fn poll_loop<B: CommBus>(
    comm: &Weak<Comm<B>>,
    control: &Receiver<PollerControl>,
    ack: &SyncSender<()>,
    poll_interval: Duration,
) {
    loop {
        match control.recv_timeout(poll_interval) {
            Ok(PollerControl::Pause) => {
                if ack.send(()).is_err() {
                    break;
                }
                // Suspended: only an external resume (or shutdown) continues.
                let resumed = loop {
                    match control.recv() {
                        Ok(PollerControl::Resume) => break true,
                        Ok(PollerControl::Pause) => {
                            if ack.send(()).is_err() {
                                break false;
                            }
                        }
                        Err(_) => break false,
                    }
                };
                if !resumed {
                    break;
                }
            }
            Ok(PollerControl::Resume) => {}
            Err(RecvTimeoutError::Timeout) => {
                let Some(comm) = comm.upgrade() else {
                    break;
                };
                comm.poll_cycle();
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("comm poller exiting");
}
