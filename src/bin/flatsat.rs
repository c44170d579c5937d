use clap::{App, Arg};
use colored::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use groundlink::{
    BusError, Comm, CommBus, CommConfig, DeviceAddress, FrameTransmitter, SecurityCode,
    TelecommandDispatcher, TelecommandHandler,
};

const GET_FRAME_COUNT: u8 = 0x21;
const GET_FRAME: u8 = 0x22;
const REMOVE_FRAME: u8 = 0x24;
const SEND_FRAME: u8 = 0x10;
const GET_RX_TELEMETRY: u8 = 0x1A;
const FREE_SLOTS_AFTER_SEND: u8 = 39;

/// Bench model of the transceiver: an uplink queue seeded from the command
/// line and a downlink log the harness prints at the end.
struct BenchTransceiver {
    uplink: Mutex<VecDeque<Vec<u8>>>,
    downlink: Mutex<Vec<Vec<u8>>>,
    watchdog_resets: Mutex<u32>,
}

impl BenchTransceiver {
    fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            uplink: Mutex::new(frames.into_iter().collect()),
            downlink: Mutex::new(Vec::new()),
            watchdog_resets: Mutex::new(0),
        }
    }
}

impl CommBus for BenchTransceiver {
    fn write(&self, _address: DeviceAddress, data: &[u8]) -> Result<(), BusError> {
        match data.first() {
            Some(&REMOVE_FRAME) => {
                self.uplink.lock().unwrap().pop_front();
            }
            Some(&0xCC) => {
                *self.watchdog_resets.lock().unwrap() += 1;
            }
            _ => {}
        }
        Ok(())
    }

    fn write_read(
        &self,
        _address: DeviceAddress,
        data: &[u8],
        response: &mut [u8],
    ) -> Result<(), BusError> {
        response.fill(0);
        match data.first() {
            Some(&GET_FRAME_COUNT) => {
                let count = self.uplink.lock().unwrap().len() as u16;
                response[..2].copy_from_slice(&count.to_le_bytes());
            }
            Some(&GET_FRAME) => {
                let uplink = self.uplink.lock().unwrap();
                let Some(payload) = uplink.front() else {
                    return Ok(());
                };
                let full_size = payload.len() as u16;
                if response.len() == 2 {
                    // Size-probe phase of the two-phase retrieval.
                    response.copy_from_slice(&full_size.to_le_bytes());
                } else {
                    response[0..2].copy_from_slice(&full_size.to_le_bytes());
                    response[2..4].copy_from_slice(&0x0123u16.to_le_bytes());
                    response[4..6].copy_from_slice(&0x0456u16.to_le_bytes());
                    let n = payload.len().min(response.len() - 6);
                    response[6..6 + n].copy_from_slice(&payload[..n]);
                }
            }
            Some(&SEND_FRAME) => {
                self.downlink.lock().unwrap().push(data[1..].to_vec());
                response[0] = FREE_SLOTS_AFTER_SEND;
            }
            Some(&GET_RX_TELEMETRY) => {
                // Plausible 12-bit housekeeping channels.
                for (i, value) in [0x01A0u16, 0x0010, 0x0150, 0x0CE4, 0x0222, 0x0231, 0x0666]
                    .iter()
                    .enumerate()
                {
                    response[i * 2..i * 2 + 2].copy_from_slice(&value.to_le_bytes());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

struct PingHandler;

impl TelecommandHandler for PingHandler {
    fn command_code(&self) -> u8 {
        0x50
    }

    fn handle(&self, transmitter: &dyn FrameTransmitter, _parameters: &[u8]) {
        if let Err(e) = transmitter.send_frame(b"PONG") {
            eprintln!("{} {}", "ping reply failed:".red(), e);
        }
    }
}

struct EchoHandler;

impl TelecommandHandler for EchoHandler {
    fn command_code(&self) -> u8 {
        0x45
    }

    fn handle(&self, transmitter: &dyn FrameTransmitter, parameters: &[u8]) {
        if let Err(e) = transmitter.send_frame(parameters) {
            eprintln!("{} {}", "echo reply failed:".red(), e);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("flatsat")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Flatsat bench harness for the ground-link communication core")
        .arg(
            Arg::with_name("security-code")
                .short("s")
                .long("security-code")
                .value_name("HEX")
                .help("Shared 4-byte telecommand security code")
                .takes_value(true)
                .default_value("AABBCCDD")
                .validator(|v| {
                    u32::from_str_radix(&v, 16)
                        .map(|_| ())
                        .map_err(|_| "security code must be up to 8 hex digits".into())
                }),
        )
        .arg(
            Arg::with_name("cycles")
                .short("c")
                .long("cycles")
                .value_name("N")
                .help("Number of poll cycles to run before shutting down")
                .takes_value(true)
                .default_value("3"),
        )
        .arg(
            Arg::with_name("interval-ms")
                .short("i")
                .long("interval-ms")
                .value_name("MS")
                .help("Poll interval in milliseconds (flight value is 10000)")
                .takes_value(true)
                .default_value("200"),
        )
        .get_matches();

    let code = u32::from_str_radix(matches.value_of("security-code").unwrap_or("AABBCCDD"), 16)?;
    let cycles: u32 = matches.value_of("cycles").unwrap_or("3").parse()?;
    let interval_ms: u64 = matches.value_of("interval-ms").unwrap_or("200").parse()?;

    let security_code = SecurityCode::new(code);

    // Seed the uplink with one ping and one echo telecommand.
    let mut ping = security_code.as_bytes().to_vec();
    ping.push(0x50);
    let mut echo = security_code.as_bytes().to_vec();
    echo.push(0x45);
    echo.extend_from_slice(b"FLATSAT");

    let transceiver = Arc::new(BenchTransceiver::new(vec![ping, echo]));

    let mut dispatcher = TelecommandDispatcher::new(security_code);
    dispatcher.register(Arc::new(PingHandler))?;
    dispatcher.register(Arc::new(EchoHandler))?;

    let comm = Arc::new(Comm::with_config(
        SharedBus(transceiver.clone()),
        Arc::new(dispatcher),
        CommConfig {
            poll_interval: Duration::from_millis(interval_ms),
            ..CommConfig::default()
        },
    ));

    println!("{}", "🚀 Flatsat bench starting...".green().bold());
    comm.restart()?;

    thread::sleep(Duration::from_millis(interval_ms * u64::from(cycles) + interval_ms / 2));
    comm.pause()?;
    println!("{}", "🛑 Poller paused, bench complete".yellow());

    let downlink = transceiver.downlink.lock().unwrap();
    println!("\n{}", "Downlinked frames:".cyan().bold());
    for (i, frame) in downlink.iter().enumerate() {
        println!("  [{}] {:?} ({} bytes)", i, String::from_utf8_lossy(frame), frame.len());
    }
    println!(
        "{} {}",
        "Watchdog resets:".cyan(),
        transceiver.watchdog_resets.lock().unwrap()
    );

    let telemetry = comm.receiver_telemetry()?;
    println!("\n{}", "Receiver telemetry:".cyan().bold());
    println!("{}", serde_json::to_string_pretty(&telemetry)?);

    Ok(())
}

/// The driver owns its bus; the bench keeps a second handle to inspect the
/// transceiver afterwards, so the bus handed over is a shared wrapper.
struct SharedBus(Arc<BenchTransceiver>);

impl CommBus for SharedBus {
    fn write(&self, address: DeviceAddress, data: &[u8]) -> Result<(), BusError> {
        self.0.write(address, data)
    }

    fn write_read(
        &self,
        address: DeviceAddress,
        data: &[u8],
        response: &mut [u8],
    ) -> Result<(), BusError> {
        self.0.write_read(address, data, response)
    }
}
