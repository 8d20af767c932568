pub mod provider;
pub mod copilot;

pub use provider::{AiClient, AiConfig, AiProvider, ChatMessage};
pub use copilot::{build_prompt, LogCopilot};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
