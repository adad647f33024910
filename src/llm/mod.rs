pub mod anthropic_provider;
pub mod catalog;
pub(crate) mod http;
pub mod openai_provider;
pub mod provider;
pub mod scripted_provider;
pub mod types;

pub use anthropic_provider::AnthropicProvider;
pub use openai_provider::OpenAICompatibleProvider;
pub use provider::{LLMProvider, LLMProviderFactory};
pub use scripted_provider::{RecordedCall, ScriptedProvider, ScriptedReply};
pub use types::*;
