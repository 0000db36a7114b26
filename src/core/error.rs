//! 解析引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ResolveError 决定 RetryWithPrompt / Backoff / Abort。

use thiserror::Error;

use crate::llm::LlmError;

/// 一次解析调用中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// 回复里既没有 function_call，也没有可用作参数的 JSON
    #[error("No function call found in the response")]
    NoCallFound,

    #[error("Unparseable arguments: {0}")]
    Unparseable(String),

    #[error("Missing required parameter '{param}' for {function}")]
    MissingRequiredParam { function: String, param: String },

    /// 模型给出了注册表中不存在的函数名
    #[error("Unknown function: {name}")]
    UnknownFunction { name: String, available: Vec<String> },

    /// 调用函数失败；redundant 为上一次匹配中多余的参数名（仅提示）
    #[error("Function {function} failed: {message}")]
    InvocationFailed {
        function: String,
        message: String,
        redundant: Vec<String>,
    },

    /// 暂时性故障（连接失败、超时、408/429/5xx），退避重试
    #[error("Transport error: {0}")]
    Transport(String),

    /// 后端拒绝请求（认证失败、请求或 schema 被拒等 4xx）或配置错误，重试不会成功
    #[error("Backend rejected the request: {0}")]
    Backend(String),

    /// 纠错反馈不收敛（后端或函数主动中止，或往返次数超出上限），不再重试
    #[error("Recursion exceeded: {0}")]
    RecursionExceeded(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        last: Box<ResolveError>,
    },
}

impl ResolveError {
    /// 错误类别名（日志字段）
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::NoCallFound => "no_call_found",
            ResolveError::Unparseable(_) => "unparseable",
            ResolveError::MissingRequiredParam { .. } => "missing_required_param",
            ResolveError::UnknownFunction { .. } => "unknown_function",
            ResolveError::InvocationFailed { .. } => "invocation_exception",
            ResolveError::Transport(_) => "transport",
            ResolveError::Backend(_) => "backend",
            ResolveError::RecursionExceeded(_) => "recursion_exceeded",
            ResolveError::Cancelled => "cancelled",
            ResolveError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResolveError::RecursionExceeded(_)
                | ResolveError::Backend(_)
                | ResolveError::Cancelled
                | ResolveError::RetriesExhausted { .. }
        )
    }
}

impl From<LlmError> for ResolveError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Aborted(msg) => ResolveError::RecursionExceeded(msg),
            LlmError::Http { status, .. } if is_transient_status(status) => {
                ResolveError::Transport(e.to_string())
            }
            LlmError::Http { .. } | LlmError::Config(_) => ResolveError::Backend(e.to_string()),
            // 响应体损坏按不可解析处理，消耗一次重试预算
            LlmError::Decode(msg) => ResolveError::Unparseable(format!("undecodable response: {msg}")),
            LlmError::Transport(_) => ResolveError::Transport(e.to_string()),
        }
    }
}

/// 408 超时、429 限流与 5xx 可以退避后重试
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}

/// 恢复引擎根据错误类型给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 追加纠错 user 消息后重试，消耗一次重试预算
    RetryWithPrompt(String),
    /// 固定间隔退避后重试，不消耗重试预算
    Backoff,
    /// 立即终止，返回空结果
    Abort,
}
