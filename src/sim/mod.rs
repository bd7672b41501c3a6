//! Loopback DAQ firmware
//!
//! Serves the IQ data protocol and the control protocol on two local TCP
//! listeners, so the client can be exercised without hardware. Every
//! accepted control frame is recorded for inspection.

use parking_lot::Mutex;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::protocol::command::{COMMAND_FRAME_SIZE, STATUS_FINISHED};
use crate::protocol::header::MAX_CHANNELS;
use crate::protocol::{AckFrame, CommandFrame, DataToken, FrameHeader, Opcode};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shape of the synthetic frames and initial firmware state
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Address both listeners bind to; port 0 picks free ports
    pub data_bind: SocketAddr,
    pub control_bind: SocketAddr,
    pub channels: u32,
    pub samples_per_channel: u32,
    pub sample_bit_depth: u32,
    pub center_freq_hz: u64,
    /// Status put into every acknowledgement
    pub ack_status: [u8; 4],
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        Self {
            data_bind: loopback,
            control_bind: loopback,
            channels: 5,
            samples_per_channel: 1024,
            sample_bit_depth: 32,
            center_freq_hz: 100_000_000,
            ack_status: STATUS_FINISHED,
        }
    }
}

struct FrameShape {
    channels: u32,
    samples_per_channel: u32,
    sample_bit_depth: u32,
}

struct SimState {
    shape: Mutex<FrameShape>,
    center_freq_hz: AtomicU64,
    gains: Mutex<[u32; MAX_CHANNELS]>,
    agc: AtomicBool,
    ack_status: Mutex<[u8; 4]>,
    acks_enabled: AtomicBool,
    commands: Mutex<Vec<CommandFrame>>,
    rejected: AtomicU64,
    frames_sent: AtomicU64,
    kick_data: AtomicBool,
    stop: AtomicBool,
}

/// Simulated firmware
pub struct FirmwareSimulator {
    data_addr: SocketAddr,
    control_addr: SocketAddr,
    state: Arc<SimState>,
    threads: Vec<JoinHandle<()>>,
}

impl FirmwareSimulator {
    /// Bind both listeners and start serving
    pub fn start(config: SimulatorConfig) -> io::Result<Self> {
        let data_listener = TcpListener::bind(config.data_bind)?;
        let control_listener = TcpListener::bind(config.control_bind)?;
        data_listener.set_nonblocking(true)?;
        control_listener.set_nonblocking(true)?;
        let data_addr = data_listener.local_addr()?;
        let control_addr = control_listener.local_addr()?;

        let state = Arc::new(SimState {
            shape: Mutex::new(FrameShape {
                channels: config.channels,
                samples_per_channel: config.samples_per_channel,
                sample_bit_depth: config.sample_bit_depth,
            }),
            center_freq_hz: AtomicU64::new(config.center_freq_hz),
            gains: Mutex::new([0; MAX_CHANNELS]),
            agc: AtomicBool::new(false),
            ack_status: Mutex::new(config.ack_status),
            acks_enabled: AtomicBool::new(true),
            commands: Mutex::new(Vec::new()),
            rejected: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            kick_data: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        });

        let data_state = state.clone();
        let data = thread::Builder::new()
            .name("sim-data".to_string())
            .spawn(move || accept_loop(data_listener, data_state, serve_data))?;
        let control_state = state.clone();
        let control = thread::Builder::new()
            .name("sim-control".to_string())
            .spawn(move || accept_loop(control_listener, control_state, serve_control))?;

        tracing::info!(
            "Simulated DAQ listening: data {}, control {}",
            data_addr,
            control_addr
        );
        Ok(Self {
            data_addr,
            control_addr,
            state,
            threads: vec![data, control],
        })
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Control frames received so far, in arrival order
    pub fn received_commands(&self) -> Vec<CommandFrame> {
        self.state.commands.lock().clone()
    }

    /// Control frames that carried an unknown opcode
    pub fn rejected_commands(&self) -> u64 {
        self.state.rejected.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.state.frames_sent.load(Ordering::SeqCst)
    }

    pub fn center_frequency(&self) -> u64 {
        self.state.center_freq_hz.load(Ordering::SeqCst)
    }

    pub fn agc_enabled(&self) -> bool {
        self.state.agc.load(Ordering::SeqCst)
    }

    /// Gains of the first `channels` channels in tenths of dB
    pub fn gains(&self, channels: usize) -> Vec<u32> {
        self.state.gains.lock()[..channels.min(MAX_CHANNELS)].to_vec()
    }

    /// Status used for subsequent acknowledgements
    pub fn set_ack_status(&self, status: [u8; 4]) {
        *self.state.ack_status.lock() = status;
    }

    /// Stop answering commands, so the client's acknowledgement wait expires
    pub fn set_acks_enabled(&self, enabled: bool) {
        self.state.acks_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Change the shape of subsequent frames
    pub fn set_frame_shape(&self, channels: u32, samples_per_channel: u32, sample_bit_depth: u32) {
        *self.state.shape.lock() = FrameShape {
            channels,
            samples_per_channel,
            sample_bit_depth,
        };
    }

    /// Close the current data connection as if the firmware restarted
    pub fn drop_data_connection(&self) {
        self.state.kick_data.store(true, Ordering::SeqCst);
    }

    pub fn shutdown(&mut self) {
        self.state.stop.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Simulator thread panicked");
            }
        }
    }
}

impl Drop for FirmwareSimulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Serve one client at a time until stopped
fn accept_loop(
    listener: TcpListener,
    state: Arc<SimState>,
    serve: fn(TcpStream, &SimState) -> io::Result<()>,
) {
    while !state.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!("Simulator accepted {}", peer);
                let configured = stream
                    .set_nonblocking(false)
                    .and_then(|_| stream.set_read_timeout(Some(POLL_INTERVAL)));
                let result = configured.and_then(|_| serve(stream, &state));
                if let Err(e) = result {
                    tracing::debug!("Simulator connection with {} ended: {}", peer, e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                tracing::error!("Simulator accept failed: {}", e);
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn serve_data(mut stream: TcpStream, state: &SimState) -> io::Result<()> {
    state.kick_data.store(false, Ordering::SeqCst);
    let mut pending = Vec::new();
    let mut buf = [0u8; 64];

    loop {
        while let Some((token, len)) = DataToken::parse_prefix(&pending) {
            pending.drain(..len);
            match token {
                DataToken::Streaming | DataToken::IqDownload => {
                    let frame = build_frame(state);
                    stream.write_all(&frame)?;
                    state.frames_sent.fetch_add(1, Ordering::SeqCst);
                }
                DataToken::Quit => {
                    tracing::debug!("Data client quit");
                    return Ok(());
                }
            }
        }
        let partial_token = DataToken::ALL
            .iter()
            .any(|token| token.as_bytes().starts_with(&pending));
        if !partial_token {
            tracing::warn!("Simulator dropping unknown data byte {:#04x}", pending[0]);
            pending.remove(0);
            continue;
        }

        if state.stop.load(Ordering::SeqCst) || state.kick_data.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => pending.extend_from_slice(&buf[..n]),
            Err(e) if is_poll_timeout(&e) || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Header + payload of the next synthetic frame
fn build_frame(state: &SimState) -> Vec<u8> {
    let shape = state.shape.lock();
    let mut header = FrameHeader::new(
        shape.channels,
        shape.samples_per_channel,
        shape.sample_bit_depth,
    );
    header.rf_center_freq = state.center_freq_hz.load(Ordering::SeqCst);
    header.cpi_index = state.frames_sent.load(Ordering::SeqCst) as u32;
    header.time_stamp = chrono::Utc::now().timestamp_millis() as u64;
    header.if_gains = *state.gains.lock();
    header.set_hardware_id("SIM");

    let mut out = header.encode().to_vec();
    out.reserve(header.payload_size());
    for ch in 0..shape.channels {
        for n in 0..shape.samples_per_channel {
            push_component(&mut out, ch as i32, shape.sample_bit_depth);
            push_component(&mut out, n as i32, shape.sample_bit_depth);
        }
    }
    out
}

fn push_component(out: &mut Vec<u8>, value: i32, bit_depth: u32) {
    match bit_depth {
        32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        8 => out.push(value as i8 as u8),
        _ => {}
    }
}

fn serve_control(mut stream: TcpStream, state: &SimState) -> io::Result<()> {
    let mut raw = [0u8; COMMAND_FRAME_SIZE];
    loop {
        let mut filled = 0;
        while filled < COMMAND_FRAME_SIZE {
            if state.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            match stream.read(&mut raw[filled..]) {
                Ok(0) => return Ok(()),
                Ok(n) => filled += n,
                Err(e) if is_poll_timeout(&e) || e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        let frame = match CommandFrame::from_bytes(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Simulator rejected control frame: {}", e);
                state.rejected.fetch_add(1, Ordering::SeqCst);
                stream.write_all(AckFrame::new(*b"ERRO").as_bytes())?;
                continue;
            }
        };
        let opcode = frame.opcode();
        apply(state, &frame);
        state.commands.lock().push(frame);

        if !opcode.expects_ack() {
            tracing::debug!("Control client sent {}", opcode);
            return Ok(());
        }
        if state.acks_enabled.load(Ordering::SeqCst) {
            let status = *state.ack_status.lock();
            stream.write_all(AckFrame::new(status).as_bytes())?;
        }
    }
}

fn apply(state: &SimState, frame: &CommandFrame) {
    match frame.opcode() {
        Opcode::Freq => {
            if let Some(hz) = frame.frequency_hz() {
                state.center_freq_hz.store(hz, Ordering::SeqCst);
            }
        }
        Opcode::Gain => {
            let channels = state.shape.lock().channels as usize;
            if let Some(values) = frame.gain_values(channels) {
                let mut gains = state.gains.lock();
                gains[..values.len()].copy_from_slice(&values);
                state.agc.store(false, Ordering::SeqCst);
            }
        }
        Opcode::Agc => state.agc.store(true, Ordering::SeqCst),
        Opcode::Init | Opcode::Exit => {}
    }
}
