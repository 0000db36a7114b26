//! 错误恢复引擎
//!
//! 根据 ResolveError 类型返回 RecoveryAction，供重试控制器决定是注入纠错消息重试、退避还是终止。

use crate::core::{RecoveryAction, ResolveError};

/// 把失败映射为可执行动作（纠错提示 / 退避 / 终止）；纠错文本面向模型
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &ResolveError) -> RecoveryAction {
        match err {
            ResolveError::NoCallFound => RecoveryAction::RetryWithPrompt(
                "No function call was found in your previous response. \
                You must respond with a call to one of the provided functions, \
                with its arguments as valid JSON. Retry."
                    .to_string(),
            ),
            ResolveError::Unparseable(detail) => RecoveryAction::RetryWithPrompt(format!(
                "The arguments in your previous response could not be parsed as JSON: {detail}. \
                Return valid JSON only as a response, no additional text. Retry."
            )),
            ResolveError::MissingRequiredParam { function, param } => {
                RecoveryAction::RetryWithPrompt(format!(
                    "Missing required parameter '{param}' for {function}. \
                    Provide every required parameter. Retry."
                ))
            }
            ResolveError::UnknownFunction { name, available } => {
                RecoveryAction::RetryWithPrompt(format!(
                    "Got incorrect function name: {name}, function not found. \
                    Choose one of: {}. Retry.",
                    available.join(", ")
                ))
            }
            ResolveError::InvocationFailed {
                function,
                message,
                redundant,
            } => {
                let mut prompt = format!("Could not call function {function}: {message}.");
                if !redundant.is_empty() {
                    prompt.push_str(&format!(
                        " Parameters [{}] are not accepted by {function}, do not send them.",
                        redundant.join(", ")
                    ));
                }
                prompt.push_str(" Retry.");
                RecoveryAction::RetryWithPrompt(prompt)
            }
            ResolveError::Transport(_) => RecoveryAction::Backoff,
            ResolveError::RecursionExceeded(_)
            | ResolveError::Backend(_)
            | ResolveError::Cancelled
            | ResolveError::RetriesExhausted { .. } => RecoveryAction::Abort,
        }
    }
}
