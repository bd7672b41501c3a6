#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use daq_iq_client::config::AppConfig;
use daq_iq_client::events::{EventReceiver, StatusEvent};
use daq_iq_client::protocol::{CommandFrame, Opcode};
use daq_iq_client::sim::{FirmwareSimulator, SimulatorConfig};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn simulator(channels: u32, samples_per_channel: u32, bit_depth: u32) -> FirmwareSimulator {
    FirmwareSimulator::start(SimulatorConfig {
        channels,
        samples_per_channel,
        sample_bit_depth: bit_depth,
        ..Default::default()
    })
    .unwrap()
}

/// Client configuration pointing at `sim`
pub fn config_for(sim: &FirmwareSimulator) -> AppConfig {
    let mut config = AppConfig::default();
    config.receiver.address = "127.0.0.1".to_string();
    config.receiver.data_port = sim.data_addr().port();
    config.receiver.control_port = sim.control_addr().port();
    config.receiver.connect_timeout_ms = 1000;
    config.receiver.ack_timeout_ms = 2000;
    config
}

pub fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

pub fn opcodes(commands: &[CommandFrame]) -> Vec<Opcode> {
    commands.iter().map(CommandFrame::opcode).collect()
}

/// Events delivered within a short grace period
pub fn drain(events: &EventReceiver) -> Vec<StatusEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.recv_timeout(Duration::from_millis(200)) {
        out.push(event);
    }
    out
}

/// Block until the `config-ok` for `command_id` arrives
pub fn wait_config_ok(events: &EventReceiver, command_id: u64) -> Vec<StatusEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        if let Ok(event) = events.recv_timeout(Duration::from_millis(50)) {
            let matched = matches!(
                event,
                StatusEvent::ConfigApplied { command_id: id, .. } if id == command_id
            );
            seen.push(event);
            if matched {
                return seen;
            }
        }
    }
    panic!("no config-ok for command #{}, saw {:?}", command_id, seen);
}
