//! Acquisition client
//!
//! Owns the data transport, the frame receiver and the control dispatcher,
//! and drives them through the connection state machine:
//!
//! ```text
//! Disconnected ─► Connecting ─► DataConnected ─► ControlConnected ─► Ready
//!       ▲          (ethernet only)                                     │
//!       └──────────────── close() / data path failure ─────────────────┘
//! ```
//!
//! Tuning values are remembered even while disconnected and replayed on
//! every successful connection.

use crate::config::{AppConfig, DataInterface, ReceiverConfig};
use crate::constants::AUTO_GAIN_VALUE;
use crate::control::{CommandDispatcher, CommandTicket, ControlChannel};
use crate::error::{CommandError, Error, Result};
use crate::events::{emit, EventSender, StatusEvent};
use crate::protocol::command::MAX_GAIN_CHANNELS;
use crate::protocol::{CommandFrame, DataToken};
use crate::receiver::{FrameOutcome, FrameReceiver, ReceiverStats, SampleFrame};
use crate::transport::{SharedBufferTransport, StreamTransport, TcpConnector, Transport};

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Data socket open and the first frame received
    DataConnected,
    /// Control connection open, tuning not yet restored
    ControlConnected,
    Ready,
}

/// Receiver gain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GainSetting {
    /// One gain in tenths of dB for every channel
    Uniform(u32),
    /// Per-channel gains in tenths of dB
    Manual(Vec<u32>),
    /// Automatic gain control
    Agc,
}

impl GainSetting {
    /// Per-channel values for `channels` channels, None for AGC
    pub fn values(&self, channels: usize) -> Option<Vec<u32>> {
        match self {
            Self::Uniform(gain) => Some(vec![*gain; channels]),
            Self::Manual(gains) => {
                let mut gains = gains.clone();
                gains.resize(channels, gains.last().copied().unwrap_or(0));
                Some(gains)
            }
            Self::Agc => None,
        }
    }

    fn command(&self, channels: usize) -> std::result::Result<CommandFrame, CommandError> {
        match self.values(channels) {
            Some(gains) => CommandFrame::gains(&gains),
            None => Ok(CommandFrame::agc()),
        }
    }
}

/// Client for one DAQ firmware instance
pub struct AcquisitionClient {
    config: ReceiverConfig,
    state: ConnectionState,
    transport: Transport,
    receiver: FrameReceiver,
    frame: SampleFrame,
    dispatcher: Option<CommandDispatcher>,
    events: EventSender,

    /// Last requested center frequency in Hz
    center_freq_hz: u64,
    /// Last requested gain
    gain: GainSetting,
    /// Gain still has to be replayed once the channel count is known
    gain_replay_pending: bool,
}

impl AcquisitionClient {
    /// Create a client talking to the firmware's TCP data server
    pub fn new(config: AppConfig, events: EventSender) -> Result<Self> {
        config.validate()?;
        if config.receiver.interface == DataInterface::SharedMemory {
            return Err(Error::Config(
                "the shared memory interface needs a segment, use AcquisitionClient::with_shared_memory"
                    .into(),
            ));
        }
        let receiver = &config.receiver;
        let connector = TcpConnector::new(
            receiver.data_addr()?,
            receiver.connect_timeout(),
            receiver.receive_buffer_size,
        )
        .with_read_timeout(receiver.read_timeout());
        let transport = StreamTransport::new(connector);
        Ok(Self::with_transport(config, transport.into(), events))
    }

    /// Create a client reading frames from a shared memory segment
    pub fn with_shared_memory(
        config: AppConfig,
        transport: SharedBufferTransport,
        events: EventSender,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_transport(config, transport.into(), events))
    }

    /// Create a client around an existing transport
    pub fn with_transport(config: AppConfig, transport: Transport, events: EventSender) -> Self {
        let gain = if config.daq.agc {
            GainSetting::Agc
        } else {
            GainSetting::Uniform(config.daq.gain_tenths)
        };
        let receiver = FrameReceiver::new(config.receiver.receive_buffer_size);

        Self {
            center_freq_hz: config.daq.center_freq_hz,
            gain,
            gain_replay_pending: false,
            config: config.receiver,
            state: ConnectionState::Disconnected,
            transport,
            receiver,
            frame: SampleFrame::new(),
            dispatcher: None,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn interface(&self) -> DataInterface {
        self.transport.interface()
    }

    /// Channel count learned from the first header, 0 until known
    pub fn channel_count(&self) -> usize {
        self.receiver.channel_count()
    }

    pub fn center_frequency(&self) -> u64 {
        self.center_freq_hz
    }

    pub fn gain(&self) -> &GainSetting {
        &self.gain
    }

    /// Most recently received frame
    pub fn frame(&self) -> &SampleFrame {
        &self.frame
    }

    pub fn stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }

    /// Open the data and control paths and restore the tuning
    pub fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Ready {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;

        match self.open_session() {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                tracing::info!("Connection established");
                emit(&self.events, StatusEvent::Connected);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to connect to the DAQ: {}", e);
                self.release_session();
                Err(e)
            }
        }
    }

    fn open_session(&mut self) -> Result<()> {
        self.transport.connect()?;

        if let Transport::Stream(stream) = &mut self.transport {
            stream.send_token(DataToken::Streaming)?;
        }
        if self.transport.interface() == DataInterface::Ethernet {
            // The server answers the mode switch with a frame that reveals M.
            self.receiver.receive(&mut self.transport, &mut self.frame)?;
            self.state = ConnectionState::DataConnected;
        }

        let channel = ControlChannel::connect(
            self.config.control_addr()?,
            self.config.connect_timeout(),
            self.config.ack_timeout(),
        )?;
        self.dispatcher = Some(CommandDispatcher::start(channel, self.events.clone())?);
        self.state = ConnectionState::ControlConnected;

        self.dispatch(CommandFrame::init())?;
        tracing::info!("CTR INIT Center freq: {}", self.center_freq_hz);
        self.dispatch(CommandFrame::frequency(self.center_freq_hz))?;
        self.gain_replay_pending = true;
        self.replay_gain()?;
        Ok(())
    }

    /// Receive the next frame, connecting first if needed
    ///
    /// Returns `Ok(None)` for a frame without payload.
    pub fn get_next_frame(&mut self) -> Result<Option<&SampleFrame>> {
        if self.state == ConnectionState::Ready && !self.control_healthy() {
            tracing::warn!("Control connection failed, reconnecting");
            self.drop_session();
        }
        if self.state != ConnectionState::Ready {
            self.connect()?;
        }

        let requested = match &mut self.transport {
            Transport::Stream(stream) => stream.send_token(DataToken::IqDownload),
            Transport::SharedBuffer(_) => Ok(()),
        };
        if let Err(e) = requested {
            return Err(self.data_path_failed(e.into()));
        }

        let outcome = match self.receiver.receive(&mut self.transport, &mut self.frame) {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.data_path_failed(e)),
        };
        if self.gain_replay_pending {
            self.replay_gain()?;
        }

        match outcome {
            FrameOutcome::Frame(_) => Ok(Some(&self.frame)),
            FrameOutcome::Empty(header) => {
                tracing::debug!("Empty frame #{} ({:?})", header.sequence(), header.frame_type);
                Ok(None)
            }
        }
    }

    /// Tune the center frequency in Hz
    pub fn set_center_frequency(&mut self, hz: u64) -> Result<CommandTicket> {
        self.center_freq_hz = hz;
        self.submit(CommandFrame::frequency(hz))
    }

    /// Set the gain in tenths of dB
    ///
    /// With `applies_to_all_channels` every channel gets the value; otherwise
    /// only the first channel changes and the others keep their last gain.
    /// `AUTO_GAIN_VALUE` enables automatic gain control instead.
    pub fn set_gain(
        &mut self,
        db_tenths: u32,
        applies_to_all_channels: bool,
    ) -> Result<CommandTicket> {
        if db_tenths == AUTO_GAIN_VALUE {
            return self.set_agc();
        }

        let channels = self.channel_count();
        if applies_to_all_channels {
            self.gain = GainSetting::Uniform(db_tenths);
        } else {
            if channels == 0 {
                return Err(Error::NotReady("channel count is not known yet".into()));
            }
            let mut gains = self.gain.values(channels).unwrap_or_else(|| vec![0; channels]);
            gains[0] = db_tenths;
            self.gain = GainSetting::Manual(gains);
        }
        self.submit_gain()
    }

    /// Set one gain per channel in tenths of dB
    pub fn set_channel_gains(&mut self, gains_tenths: &[u32]) -> Result<CommandTicket> {
        if gains_tenths.is_empty() || gains_tenths.len() > MAX_GAIN_CHANNELS {
            return Err(Error::InvalidArgument(format!(
                "{} gains given, expected 1 to {}",
                gains_tenths.len(),
                MAX_GAIN_CHANNELS
            )));
        }
        let channels = self.channel_count();
        if channels > 0 && gains_tenths.len() != channels {
            return Err(Error::InvalidArgument(format!(
                "{} gains given for {} channels",
                gains_tenths.len(),
                channels
            )));
        }
        self.gain = GainSetting::Manual(gains_tenths.to_vec());
        self.submit_gain()
    }

    /// Enable automatic gain control
    pub fn set_agc(&mut self) -> Result<CommandTicket> {
        self.gain = GainSetting::Agc;
        self.submit(CommandFrame::agc())
    }

    /// Re-send `INIT`
    pub fn init(&mut self) -> Result<CommandTicket> {
        self.submit(CommandFrame::init())
    }

    /// Leave the firmware, ending `Disconnected` whatever fails on the way
    pub fn close(&mut self) {
        self.drop_session();
        tracing::info!("Disconnected from the DAQ");
    }

    fn submit_gain(&mut self) -> Result<CommandTicket> {
        let channels = self.channel_count();
        if channels == 0 {
            return Err(Error::NotReady("channel count is not known yet".into()));
        }
        let frame = self.gain.command(channels)?;
        self.submit(frame)
    }

    fn submit(&mut self, frame: CommandFrame) -> Result<CommandTicket> {
        if self.state != ConnectionState::Ready {
            return Err(Error::NotReady(format!(
                "cannot send {} while {:?}",
                frame.opcode(),
                self.state
            )));
        }
        self.dispatch(frame)
    }

    fn dispatch(&mut self, frame: CommandFrame) -> Result<CommandTicket> {
        let submitted = match &self.dispatcher {
            Some(dispatcher) if dispatcher.is_healthy() => dispatcher.submit(frame),
            Some(_) => Err(CommandError::ConnectionLost(
                "control connection is no longer usable".into(),
            )),
            None => Err(CommandError::DispatcherClosed),
        };
        submitted.map_err(|e| {
            if self.state == ConnectionState::Ready {
                self.drop_session();
                Error::NotReady(e.to_string())
            } else {
                e.into()
            }
        })
    }

    fn replay_gain(&mut self) -> Result<()> {
        let channels = self.channel_count();
        if self.gain != GainSetting::Agc && channels == 0 {
            tracing::debug!("Gain replay deferred until the channel count is known");
            return Ok(());
        }
        self.gain_replay_pending = false;
        match self.gain.command(channels) {
            Ok(frame) => {
                self.dispatch(frame)?;
            }
            Err(e) => tracing::warn!("Not restoring gain {:?}: {}", self.gain, e),
        }
        Ok(())
    }

    fn control_healthy(&self) -> bool {
        self.dispatcher
            .as_ref()
            .map(CommandDispatcher::is_healthy)
            .unwrap_or(false)
    }

    fn data_path_failed(&mut self, err: Error) -> Error {
        if !self.transport.is_connected() {
            tracing::error!("Data path lost: {}", err);
            self.drop_session();
        }
        err
    }

    /// Tear down an established session and notify the consumer
    fn drop_session(&mut self) {
        if let Transport::Stream(stream) = &mut self.transport {
            if stream.is_connected() {
                if let Err(e) = stream.send_token(DataToken::Quit) {
                    tracing::debug!("Failed to send quit on the data connection: {}", e);
                }
            }
        }
        self.release_session();
        emit(&self.events, StatusEvent::Disconnected);
    }

    /// Drop every connection primitive; the next `connect` opens fresh ones
    fn release_session(&mut self) {
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown();
        }
        self.transport.close();
        self.receiver.reset_channel_count();
        self.gain_replay_pending = false;
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for AcquisitionClient {
    fn drop(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::delivery_queue;
    use crate::transport::memory_segment;

    fn disconnected() -> (AcquisitionClient, crate::events::EventReceiver) {
        let (segment, _producer) = memory_segment(1024);
        let (tx, rx) = delivery_queue();
        let client = AcquisitionClient::with_shared_memory(
            AppConfig::default(),
            SharedBufferTransport::new(segment),
            tx,
        )
        .unwrap();
        (client, rx)
    }

    #[test]
    fn test_setters_record_while_disconnected() {
        let (mut client, rx) = disconnected();

        assert!(matches!(
            client.set_center_frequency(433_000_000),
            Err(Error::NotReady(_))
        ));
        assert_eq!(client.center_frequency(), 433_000_000);

        assert!(matches!(client.set_gain(150, true), Err(Error::NotReady(_))));
        assert_eq!(client.gain(), &GainSetting::Uniform(150));

        assert!(matches!(client.set_agc(), Err(Error::NotReady(_))));
        assert_eq!(client.gain(), &GainSetting::Agc);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_auto_gain_value_selects_agc() {
        let (mut client, _rx) = disconnected();
        let _ = client.set_gain(AUTO_GAIN_VALUE, true);
        assert_eq!(client.gain(), &GainSetting::Agc);
    }

    #[test]
    fn test_single_channel_gain_needs_channel_count() {
        let (mut client, _rx) = disconnected();
        assert_eq!(client.channel_count(), 0);
        assert!(matches!(client.set_gain(90, false), Err(Error::NotReady(_))));
        assert_eq!(client.gain(), &GainSetting::Uniform(0));
    }

    #[test]
    fn test_channel_gains_bounds() {
        let (mut client, _rx) = disconnected();
        assert!(matches!(
            client.set_channel_gains(&[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            client.set_channel_gains(&[0; MAX_GAIN_CHANNELS + 1]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_gain_setting_values() {
        assert_eq!(GainSetting::Uniform(7).values(3), Some(vec![7, 7, 7]));
        assert_eq!(
            GainSetting::Manual(vec![1, 2]).values(4),
            Some(vec![1, 2, 2, 2])
        );
        assert_eq!(GainSetting::Manual(vec![1, 2, 3]).values(2), Some(vec![1, 2]));
        assert_eq!(GainSetting::Agc.values(4), None);
    }

    #[test]
    fn test_close_always_notifies() {
        let (mut client, rx) = disconnected();
        client.close();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::Disconnected);
        drop(client);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_shared_memory_requires_segment() {
        let mut config = AppConfig::default();
        config.receiver.interface = DataInterface::SharedMemory;
        let (tx, _rx) = delivery_queue();
        assert!(matches!(
            AcquisitionClient::new(config, tx),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_failed_connect_rolls_back() {
        let mut config = AppConfig::default();
        // Nothing listens on the discard port.
        config.receiver.control_port = 9;
        config.receiver.connect_timeout_ms = 200;
        let (segment, _producer) = memory_segment(1024);
        let (tx, rx) = delivery_queue();
        let mut client = AcquisitionClient::with_shared_memory(
            config,
            SharedBufferTransport::new(segment),
            tx,
        )
        .unwrap();

        assert!(client.connect().is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.transport.is_connected());
        assert!(rx.try_recv().is_err());
    }
}
