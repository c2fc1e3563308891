pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod message;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transport;

pub use client::{ChatClient, Exchange};
pub use error::ClientError;
pub use message::{AssembledMessage, FinishReason, MessageObserver};
pub use session::{Conversation, SessionOutcome};
pub use stream::{classify, ParsedEvent};
