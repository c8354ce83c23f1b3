pub mod config;
pub mod message;
pub mod tool;
pub mod transcript;

pub use config::{
    AgentConfig, AgentsConfig, DeskConfig, EnvRef, OutputConfig, ProviderConfig, ProviderKind,
    SupervisorConfig, ToolServerConfig, ToolsConfig, TransportKind,
};
pub use message::{HandoffDirection, HandoffRecord, Message, Role, ToolCall, SUPERVISOR};
pub use tool::ToolSpec;
pub use transcript::{Transcript, TranscriptUpdate};
