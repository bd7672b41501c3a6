//! # DAQ IQ Client
//!
//! Acquires multichannel IQ frames from a coherent DAQ firmware and drives its
//! tuning through the firmware's control interface.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                           DAQ FIRMWARE PROCESS                              │
//! │   ┌──────────────────────┐  ┌──────────────────────┐  ┌─────────────────┐   │
//! │   │ IQ Data Server :5000 │  │ Shared Memory A / B  │  │ Control  :5001  │   │
//! │   └──────────┬───────────┘  └──────────┬───────────┘  └────────┬────────┘   │
//! └──────────────┼─────────────────────────┼───────────────────────┼────────────┘
//!                │ header + payload        │ free / ready          │ 128 B frames
//!                ▼                         ▼                       ▲
//! ┌──────────────────────────────────────────────────────┐         │
//! │          Transport (transport::Transport)            │         │
//! │   Stream (TCP, exact reads)  │  SharedBuffer (slots) │         │
//! └──────────────────────────────┬───────────────────────┘         │
//!                                ▼                                 │
//! ┌──────────────────────────────────────────────────────┐         │
//! │        Frame Receiver (receiver::FrameReceiver)      │         │
//! │   1024 B header ─► payload size ─► SampleFrame [M][N]│         │
//! └──────────────────────────────┬───────────────────────┘         │
//!                                ▼                                 │
//! ┌──────────────────────────────────────────────────────┐  ┌──────┴──────────┐
//! │       Acquisition Client (client::AcquisitionClient) │─►│ Command         │
//! │   connect / get_next_frame / close / set_* tuning    │  │ Dispatcher      │
//! └──────────────────────────────┬───────────────────────┘  │ (FIFO worker)   │
//!                                │                          └──────┬──────────┘
//!                                ▼                                 │ config-ok
//! ┌─────────────────────────────────────────────────────────────────▼──────────┐
//! │               Delivery queue (events): conn-ok, disconn-ok, config-ok      │
//! └────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod protocol;
pub mod receiver;
pub mod sim;
pub mod transport;

pub use client::{AcquisitionClient, ConnectionState};
pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default IQ data server port
    pub const DEFAULT_DATA_PORT: u16 = 5000;

    /// Default control interface port
    pub const DEFAULT_CONTROL_PORT: u16 = 5001;

    /// Socket receive buffer size, also the slack added to the payload scratch buffer
    pub const RECEIVE_BUFFER_SIZE: usize = 1 << 18;

    /// Default center frequency in Hz
    pub const DEFAULT_CENTER_FREQ_HZ: u64 = 100_000_000;

    /// Default bound on waiting for a control acknowledgement
    pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5000;

    /// Default bound on a silent data connection
    pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

    /// Gain value that selects automatic gain control
    pub const AUTO_GAIN_VALUE: u32 = u32::MAX;

    /// Number of shared memory slots the firmware ping-pongs between
    pub const SHMEM_SLOTS: usize = 2;
}
