//! Completion 客户端抽象
//!
//! 所有后端（OpenAI 兼容 HTTP / 脚本化 Mock）实现 CompletionClient：一次 complete 即一次往返，
//! 不含任何重试逻辑；传输/HTTP 错误以 LlmError 区分返回。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Message, MessageHistory};

/// 后端单次往返错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// 连接失败、超时、连接重置等
    #[error("transport: {0}")]
    Transport(String),

    /// 非 2xx 响应（含 429 限流）
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// 响应体无法解码
    #[error("decode: {0}")]
    Decode(String),

    /// 未知 provider、缺少密钥等配置问题
    #[error("config: {0}")]
    Config(String),

    /// 后端要求立即停止（反馈循环不收敛），上层不得重试
    #[error("aborted: {0}")]
    Aborted(String),
}

/// 模型返回的函数调用；arguments 可能是字符串（近似 JSON）或对象，取决于后端
#[derive(Debug, Clone, PartialEq)]
pub struct RawFunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// choices[0].message 的两种形态：自由文本或函数调用
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub function_call: Option<RawFunctionCall>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            function_call: None,
        }
    }

    pub fn call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            content: None,
            function_call: Some(RawFunctionCall {
                name: name.into(),
                arguments,
            }),
        }
    }

    /// 写回历史用的 assistant 文本
    pub fn transcript(&self) -> String {
        match (&self.function_call, &self.content) {
            (Some(call), _) => {
                let args = match &call.arguments {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("function_call: {}({})", call.name, args)
            }
            (None, Some(content)) => content.clone(),
            (None, None) => String::new(),
        }
    }
}

/// 一次请求：消息 + 可选函数 schema + 可选强制调用目标
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// `{name, description, parameters}` 列表
    pub functions: Vec<Value>,
    /// Some(name) 时要求模型只为该函数/schema 生成参数
    pub function_call: Option<String>,
}

impl CompletionRequest {
    /// 纯文本补全（不带 schema）
    pub fn plain(history: &MessageHistory) -> Self {
        Self {
            messages: history.messages().to_vec(),
            functions: Vec::new(),
            function_call: None,
        }
    }

    /// 公布函数 schema，由模型自行决定调用哪一个
    pub fn with_functions(history: &MessageHistory, functions: Vec<Value>) -> Self {
        Self {
            messages: history.messages().to_vec(),
            functions,
            function_call: None,
        }
    }

    /// 强制调用：只公布目标 schema，并指定 function_call
    pub fn forced(history: &MessageHistory, schema: Value, target: impl Into<String>) -> Self {
        Self {
            messages: history.messages().to_vec(),
            functions: vec![schema],
            function_call: Some(target.into()),
        }
    }
}

/// Completion 客户端 trait
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// 单次阻塞往返
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
