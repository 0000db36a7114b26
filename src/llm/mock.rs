//! 脚本化 Mock 客户端（用于测试，无需 API）
//!
//! 按顺序回放预置的响应/错误；队列耗尽后重复 fallback（模拟永久失败的后端）。
//! 记录收到的每个请求，便于断言往返次数与历史中的纠错消息。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionClient, CompletionRequest, CompletionResponse, LlmError};

type Scripted = Result<CompletionResponse, LlmError>;

#[derive(Debug, Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一结果
    pub fn repeating(outcome: Scripted) -> Self {
        Self::new(Vec::new()).with_fallback(outcome)
    }

    pub fn with_fallback(mut self, outcome: Scripted) -> Self {
        self.fallback = Some(outcome);
        self
    }

    /// 已收到的请求数（即往返次数）
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next.or_else(|| self.fallback.clone()) {
            Some(outcome) => outcome,
            None => Err(LlmError::Transport("script exhausted".to_string())),
        }
    }
}
