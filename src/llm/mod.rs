//! LLM 层：Completion 客户端抽象与实现（OpenAI 兼容 HTTP / 脚本化 Mock）

pub mod mock;
pub mod openai;
pub mod provider;
pub mod traits;

pub use mock::ScriptedClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use provider::{create_client, Provider};
pub use traits::{
    CompletionClient, CompletionRequest, CompletionResponse, LlmError, RawFunctionCall,
};
