//! # chatsync-client
//!
//! Async session layer on top of `chatsync-store`: turns UI intents into
//! optimistic store changes and transport calls, and pumps inbound events
//! into the store.

pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod transport;

pub use channel::{ChannelTransport, IntentReply, TransportRequest};
pub use config::SessionConfig;
pub use error::{ClientError, Result, TransportError};
pub use logging::{init_logging, DEFAULT_FILTER};
pub use session::{IntentOutcome, LoadOutcome, ResyncReport, SendReport, Session};
pub use transport::Transport;
