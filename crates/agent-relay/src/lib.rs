pub mod config;
pub mod config_store;
pub mod error;
pub mod events;
pub mod executor;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod session;

#[cfg(feature = "ws-api")]
pub mod ws_api;

pub use config::{AgentConfig, EnvVar, RelayConfig};
pub use config_store::{ConfigStoreError, SessionConfig, SessionConfigStore};
pub use error::{RelayError, Result};
pub use events::AgentEvent;
pub use executor::{AgentRuntime, ClaudeSdkRuntime, ControlCommand, Query, QueryControl, RuntimeOutput};
pub use protocol::{ClientMessage, SdkUserMessage, ServerMessage, UserMessagePayload};
pub use queue::{InboundQueue, MessageProducer, ProducerState, ProducerStopHandle};
pub use registry::{ConnectionId, ConnectionRegistry, Rejected};
pub use relay::Relay;
pub use session::{AgentSession, QueryOptions, SessionHandle, SessionId, SessionStatus};
