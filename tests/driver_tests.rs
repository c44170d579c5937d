use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use groundlink::driver::{Comm, CommError, FrameHandler, FrameTransmitter};
use groundlink::frame::{Beacon, Frame, MAX_DOWNLINK_FRAME_SIZE, TRANSMITTER_BUFFER_SLOTS};
use groundlink::telemetry::{Bitrate, IdleState};
use groundlink::{BusError, CommBus, DeviceAddress};

const GET_FRAME: u8 = 0x22;
const REMOVE_FRAME: u8 = 0x24;
const SEND_FRAME: u8 = 0x10;
const SET_BEACON: u8 = 0x14;
const CLEAR_BEACON: u8 = 0x1C;
const RESET_WATCHDOG: u8 = 0xCC;
const HARD_RESET: u8 = 0xAB;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transaction {
    Write {
        device: DeviceAddress,
        data: Vec<u8>,
    },
    WriteRead {
        device: DeviceAddress,
        data: Vec<u8>,
        response_len: usize,
    },
}

/// Bus double that logs every transaction and replays scripted responses.
/// Unscripted write-reads answer with zeroes; unscripted writes succeed.
#[derive(Default)]
struct ScriptedBus {
    log: Mutex<Vec<Transaction>>,
    read_script: Mutex<VecDeque<Result<Vec<u8>, BusError>>>,
    write_script: Mutex<VecDeque<Result<(), BusError>>>,
}

impl ScriptedBus {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script_response(&self, bytes: &[u8]) {
        self.read_script
            .lock()
            .unwrap()
            .push_back(Ok(bytes.to_vec()));
    }

    fn script_response_failure(&self) {
        self.read_script.lock().unwrap().push_back(Err(BusError));
    }

    fn script_write_failure(&self) {
        self.write_script.lock().unwrap().push_back(Err(BusError));
    }

    fn transactions(&self) -> Vec<Transaction> {
        self.log.lock().unwrap().clone()
    }
}

/// Handle handed to the driver; the test keeps its own clone of the inner
/// bus for scripting and inspection.
struct SharedBus(Arc<ScriptedBus>);

impl CommBus for SharedBus {
    fn write(&self, device: DeviceAddress, data: &[u8]) -> Result<(), BusError> {
        self.0.log.lock().unwrap().push(Transaction::Write {
            device,
            data: data.to_vec(),
        });
        self.0
            .write_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn write_read(
        &self,
        device: DeviceAddress,
        data: &[u8],
        response: &mut [u8],
    ) -> Result<(), BusError> {
        self.0.log.lock().unwrap().push(Transaction::WriteRead {
            device,
            data: data.to_vec(),
            response_len: response.len(),
        });
        response.fill(0);
        match self.0.read_script.lock().unwrap().pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(response.len());
                response[..n].copy_from_slice(&bytes[..n]);
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }
}

struct NullHandler;

impl FrameHandler for NullHandler {
    fn handle_frame(&self, _transmitter: &dyn FrameTransmitter, _frame: &Frame<'_>) {}
}

fn comm_over(bus: &Arc<ScriptedBus>) -> Comm<SharedBus> {
    Comm::new(SharedBus(bus.clone()), Arc::new(NullHandler))
}

/// Builds the scripted phase-2 response: header plus payload.
fn frame_response(full_size: u16, doppler: u16, rssi: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&full_size.to_le_bytes());
    bytes.extend_from_slice(&doppler.to_le_bytes());
    bytes.extend_from_slice(&rssi.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

#[test]
fn test_receive_frame_issues_two_phase_protocol() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    bus.script_response(&4u16.to_le_bytes());
    bus.script_response(&frame_response(4, 0x0123, 0x0456, b"ABCD"));

    let mut buffer = [0u8; 64];
    let frame = comm.receive_frame(&mut buffer).unwrap();

    assert!(frame.verify());
    assert_eq!(frame.full_size(), 4);
    assert_eq!(frame.doppler(), 0x0123);
    assert_eq!(frame.rssi(), 0x0456);
    assert_eq!(frame.payload(), b"ABCD");

    let transactions = bus.transactions();
    assert_eq!(
        transactions,
        vec![
            Transaction::WriteRead {
                device: DeviceAddress::Receiver,
                data: vec![GET_FRAME],
                response_len: 2,
            },
            Transaction::WriteRead {
                device: DeviceAddress::Receiver,
                data: vec![GET_FRAME],
                response_len: 10,
            },
        ]
    );
}

#[test]
fn test_receive_frame_clamps_window_to_caller_storage() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    // Hardware claims 100 payload bytes but the caller only has 20.
    bus.script_response(&100u16.to_le_bytes());
    bus.script_response(&frame_response(100, 0, 0, &[0xEE; 100]));

    let mut buffer = [0u8; 20];
    let frame = comm.receive_frame(&mut buffer).unwrap();

    assert_eq!(frame.full_size(), 100);
    assert_eq!(frame.size(), 14);
    assert!(!frame.is_complete());
    assert!(!frame.verify());

    match &bus.transactions()[1] {
        Transaction::WriteRead { response_len, .. } => assert_eq!(*response_len, 20),
        other => panic!("unexpected transaction {other:?}"),
    }
}

#[test]
fn test_receive_frame_with_empty_buffer_touches_no_hardware() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    let frame = comm.receive_frame(&mut []).unwrap();
    assert_eq!(frame.size(), 0);
    assert_eq!(frame.full_size(), 0);
    assert!(!frame.verify());
    assert!(bus.transactions().is_empty());
}

#[test]
fn test_receive_frame_rejects_buffer_smaller_than_header() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    let mut buffer = [0u8; 3];
    assert!(matches!(
        comm.receive_frame(&mut buffer),
        Err(CommError::BufferTooSmall(3))
    ));
    assert!(bus.transactions().is_empty());
}

#[test]
fn test_get_frame_retries_twice_then_succeeds_on_third_attempt() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    // Attempt 1: size probe fails outright.
    bus.script_response_failure();
    // Attempt 2: size probe ok, payload transaction fails.
    bus.script_response(&4u16.to_le_bytes());
    bus.script_response_failure();
    // Attempt 3: clean retrieval.
    bus.script_response(&4u16.to_le_bytes());
    bus.script_response(&frame_response(4, 0x0010, 0x0020, b"PING"));

    let mut buffer = [0u8; 64];
    let frame = comm.get_frame(&mut buffer).unwrap();
    assert_eq!(frame.payload(), b"PING");

    // Five write-reads (1 + 2 + 2) and the queue-advancing remove command.
    let transactions = bus.transactions();
    assert_eq!(transactions.len(), 6);
    assert_eq!(
        transactions[5],
        Transaction::Write {
            device: DeviceAddress::Receiver,
            data: vec![REMOVE_FRAME],
        }
    );
}

#[test]
fn test_get_frame_treats_unverified_frame_as_retryable() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    // Three retrievals succeed at the bus level but carry a bad doppler.
    for _ in 0..3 {
        bus.script_response(&4u16.to_le_bytes());
        bus.script_response(&frame_response(4, 0xF000, 0, b"JUNK"));
    }

    let mut buffer = [0u8; 64];
    let result = comm.get_frame(&mut buffer);
    assert!(matches!(
        result,
        Err(CommError::RetriesExhausted { attempts: 3 })
    ));

    // The bad frame must still be removed from the hardware queue.
    assert_eq!(
        bus.transactions().last().unwrap(),
        &Transaction::Write {
            device: DeviceAddress::Receiver,
            data: vec![REMOVE_FRAME],
        }
    );
}

#[test]
fn test_get_frame_count_parses_little_endian() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    bus.script_response(&5u16.to_le_bytes());
    assert_eq!(comm.get_frame_count().unwrap(), 5);
}

#[test]
fn test_get_frame_count_rejects_implausible_count() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    bus.script_response(&1000u16.to_le_bytes());
    assert!(matches!(
        comm.get_frame_count(),
        Err(CommError::InvalidFrameCount(1000))
    ));
}

#[test]
fn test_oversized_payload_never_reaches_the_bus() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    let payload = [0u8; MAX_DOWNLINK_FRAME_SIZE + 1];
    assert!(matches!(
        comm.schedule_frame_transmission(&payload),
        Err(CommError::PayloadTooLarge(_))
    ));
    assert!(bus.transactions().is_empty());
}

#[test]
fn test_send_frame_builds_command_and_reports_free_slots() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    bus.script_response(&[17]);
    let free_slots = comm.schedule_frame_transmission(b"DOWNLINK").unwrap();
    assert_eq!(free_slots, 17);

    let mut expected = vec![SEND_FRAME];
    expected.extend_from_slice(b"DOWNLINK");
    assert_eq!(
        bus.transactions(),
        vec![Transaction::WriteRead {
            device: DeviceAddress::Transmitter,
            data: expected,
            response_len: 1,
        }]
    );
}

#[test]
fn test_send_frame_sentinel_is_failure_despite_bus_success() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    bus.script_response(&[0xFF]);
    assert!(matches!(
        comm.schedule_frame_transmission(b"X"),
        Err(CommError::FrameRejected)
    ));
}

#[test]
fn test_set_beacon_commits_after_trial_transmission() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    bus.script_response(&[TRANSMITTER_BUFFER_SLOTS - 1]);
    let beacon = Beacon::new(Duration::from_secs(30), b"BEACON").unwrap();
    comm.set_beacon(&beacon).unwrap();

    let mut expected = vec![SET_BEACON];
    expected.extend_from_slice(&30u16.to_le_bytes());
    expected.extend_from_slice(b"BEACON");
    assert_eq!(
        bus.transactions()[1],
        Transaction::Write {
            device: DeviceAddress::Transmitter,
            data: expected,
        }
    );
}

#[test]
fn test_set_beacon_aborts_when_transmit_buffer_not_free() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    // Other frames were already queued, so the trial leaves fewer slots.
    bus.script_response(&[TRANSMITTER_BUFFER_SLOTS - 3]);
    let beacon = Beacon::new(Duration::from_secs(30), b"BEACON").unwrap();
    assert!(matches!(
        comm.set_beacon(&beacon),
        Err(CommError::BeaconRejected { free_slots }) if free_slots == TRANSMITTER_BUFFER_SLOTS - 3
    ));

    // Only the trial transmission happened; no beacon command was written.
    assert_eq!(bus.transactions().len(), 1);
}

#[test]
fn test_clear_beacon_is_a_single_command_byte() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    comm.clear_beacon().unwrap();
    assert_eq!(
        bus.transactions(),
        vec![Transaction::Write {
            device: DeviceAddress::Transmitter,
            data: vec![CLEAR_BEACON],
        }]
    );
}

#[test]
fn test_receiver_telemetry_query() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    let mut readout = Vec::new();
    for value in [0x0100u16, 0x0200, 0x0300, 0x0400, 0x0500, 0x0600, 0x0700] {
        readout.extend_from_slice(&value.to_le_bytes());
    }
    bus.script_response(&readout);

    let telemetry = comm.receiver_telemetry().unwrap();
    assert_eq!(telemetry.transmitter_current, 0x0100);
    assert_eq!(telemetry.signal_strength, 0x0700);
}

#[test]
fn test_telemetry_query_fails_on_out_of_range_field() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    let mut readout = vec![0u8; 14];
    readout[4..6].copy_from_slice(&0x8000u16.to_le_bytes());
    bus.script_response(&readout);

    assert!(matches!(
        comm.receiver_telemetry(),
        Err(CommError::Telemetry(_))
    ));
}

#[test]
fn test_transmitter_state_query() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    bus.script_response(&[0b0000_0111]);
    let state = comm.transmitter_state().unwrap();
    assert!(state.beacon_active);
    assert_eq!(state.state_when_idle, IdleState::On);
    assert_eq!(state.bit_rate, Bitrate::B2400);
}

#[test]
fn test_transmitter_configuration_commands() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    comm.set_idle_state(IdleState::On).unwrap();
    comm.set_bit_rate(Bitrate::B9600).unwrap();

    assert_eq!(
        bus.transactions(),
        vec![
            Transaction::Write {
                device: DeviceAddress::Transmitter,
                data: vec![0x24, 0x01],
            },
            Transaction::Write {
                device: DeviceAddress::Transmitter,
                data: vec![0x28, 0x08],
            },
        ]
    );
}

#[test]
fn test_watchdog_reset_feeds_both_devices_independently() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    // Receiver-side reset fails; the transmitter must still be fed.
    bus.script_write_failure();
    comm.reset_watchdogs();

    assert_eq!(
        bus.transactions(),
        vec![
            Transaction::Write {
                device: DeviceAddress::Receiver,
                data: vec![RESET_WATCHDOG],
            },
            Transaction::Write {
                device: DeviceAddress::Transmitter,
                data: vec![RESET_WATCHDOG],
            },
        ]
    );
}

#[test]
fn test_watchdog_reset_attempts_both_devices_when_both_fail() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    // Both resets fail in the same cycle; each must still be attempted.
    bus.script_write_failure();
    bus.script_write_failure();
    comm.reset_watchdogs();

    assert_eq!(
        bus.transactions(),
        vec![
            Transaction::Write {
                device: DeviceAddress::Receiver,
                data: vec![RESET_WATCHDOG],
            },
            Transaction::Write {
                device: DeviceAddress::Transmitter,
                data: vec![RESET_WATCHDOG],
            },
        ]
    );
}

#[test]
fn test_hardware_reset_requires_both_devices() {
    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);

    comm.hardware_reset().unwrap();
    assert_eq!(
        bus.transactions(),
        vec![
            Transaction::Write {
                device: DeviceAddress::Receiver,
                data: vec![HARD_RESET],
            },
            Transaction::Write {
                device: DeviceAddress::Transmitter,
                data: vec![HARD_RESET],
            },
        ]
    );

    let bus = ScriptedBus::new();
    let comm = comm_over(&bus);
    bus.script_write_failure();
    assert!(matches!(
        comm.hardware_reset(),
        Err(CommError::ResetFailed)
    ));
    assert_eq!(bus.transactions().len(), 1);
}
