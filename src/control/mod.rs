//! Control interface: connection and command dispatch

pub mod channel;
pub mod dispatcher;

pub use channel::ControlChannel;
pub use dispatcher::{CommandDispatcher, CommandTicket};
