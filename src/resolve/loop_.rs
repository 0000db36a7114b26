//! 重试控制器
//!
//! REQUEST -> PARSE -> MATCH -> INVOKE -> DONE；任一步失败经 RecoveryEngine 映射为动作：
//! - RetryWithPrompt：纠错 user 消息先写入历史，再消耗一次预算重试（n 次预算最多 n+1 次往返）
//! - Backoff：固定间隔退避（可取消），不消耗预算，受 max_transport_retries 限制
//! - Abort：立即返回
//!
//! 每轮开始检查取消令牌与往返上限。PARSE/MATCH/INVOKE 由 AttemptStep 实现，
//! 请求形态（纯文本 / 自由选择 / 强制调用 / 强制 JSON）因此与重试策略解耦。

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{RecoveryAction, RecoveryEngine, ResolveError};
use crate::llm::{CompletionClient, CompletionRequest, CompletionResponse};
use crate::memory::{Message, MessageHistory};

/// 一次逻辑调用的重试状态
#[derive(Debug, Clone, PartialEq)]
pub struct CallAttempt {
    pub remaining_retries: u32,
    pub last_error: Option<ResolveError>,
    /// 已完成的往返次数
    pub round_trips: usize,
    /// 连续传输失败次数
    pub transport_failures: u32,
}

impl CallAttempt {
    pub fn new(retries: u32) -> Self {
        Self {
            remaining_retries: retries,
            last_error: None,
            round_trips: 0,
            transport_failures: 0,
        }
    }
}

/// 一轮往返中除 REQUEST 外的部分：构造请求，处理响应
#[async_trait]
pub trait AttemptStep: Send {
    type Output: Send;

    fn request(&self, history: &MessageHistory) -> CompletionRequest;

    async fn handle(&mut self, response: CompletionResponse) -> Result<Self::Output, ResolveError>;
}

/// 重试策略参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_transport_retries: u32,
    pub max_round_trips: usize,
    /// 是否把每次后端回答作为 assistant 消息写入历史
    pub echo_responses: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(2000),
            max_transport_retries: 3,
            max_round_trips: 32,
            echo_responses: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }
}

pub struct RetryController<'a> {
    client: &'a dyn CompletionClient,
    recovery: &'a RecoveryEngine,
    cancel: CancellationToken,
    policy: RetryPolicy,
}

impl<'a> RetryController<'a> {
    pub fn new(
        client: &'a dyn CompletionClient,
        recovery: &'a RecoveryEngine,
        cancel: CancellationToken,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            recovery,
            cancel,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// 驱动 step 直到成功、预算耗尽或致命错误；history 会累积纠错消息
    pub async fn run<S: AttemptStep>(
        &self,
        history: &mut MessageHistory,
        step: &mut S,
    ) -> Result<S::Output, ResolveError> {
        let mut attempt = CallAttempt::new(self.policy.max_retries);

        loop {
            if self.cancel.is_cancelled() {
                tracing::warn!("Resolution cancelled after {} round trips", attempt.round_trips);
                return Err(ResolveError::Cancelled);
            }
            if attempt.round_trips >= self.policy.max_round_trips {
                let err = ResolveError::RecursionExceeded(format!(
                    "{} round trips without a result",
                    attempt.round_trips
                ));
                tracing::error!(kind = err.kind(), "{}", err);
                return Err(err);
            }
            attempt.round_trips += 1;

            let request = step.request(history);
            let result = match self.client.complete(&request).await {
                Ok(response) => {
                    if self.policy.echo_responses {
                        let transcript = response.transcript();
                        if !transcript.is_empty() {
                            history.append(Message::assistant(transcript));
                        }
                    }
                    step.handle(response).await
                }
                Err(e) => Err(ResolveError::from(e)),
            };

            let err = match result {
                Ok(output) => {
                    tracing::debug!("Resolved after {} round trips", attempt.round_trips);
                    return Ok(output);
                }
                Err(e) => e,
            };

            match self.recovery.handle(&err) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    if attempt.remaining_retries == 0 {
                        tracing::error!(
                            kind = err.kind(),
                            "Retries exhausted after {} attempts: {}",
                            attempt.round_trips,
                            err
                        );
                        return Err(ResolveError::RetriesExhausted {
                            attempts: attempt.round_trips,
                            last: Box::new(err),
                        });
                    }
                    attempt.remaining_retries -= 1;
                    tracing::warn!(
                        kind = err.kind(),
                        remaining = attempt.remaining_retries,
                        "Retrying with corrective message: {}",
                        err
                    );
                    history.append(Message::user(prompt));
                }
                RecoveryAction::Backoff => {
                    attempt.transport_failures += 1;
                    if attempt.transport_failures > self.policy.max_transport_retries {
                        tracing::error!(
                            kind = err.kind(),
                            "Giving up after {} transport failures: {}",
                            attempt.transport_failures,
                            err
                        );
                        return Err(ResolveError::RetriesExhausted {
                            attempts: attempt.round_trips,
                            last: Box::new(err),
                        });
                    }
                    tracing::warn!(
                        kind = err.kind(),
                        "Backing off {:?}: {}",
                        self.policy.backoff,
                        err
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(ResolveError::Cancelled),
                        _ = tokio::time::sleep(self.policy.backoff) => {}
                    }
                }
                RecoveryAction::Abort => {
                    tracing::error!(kind = err.kind(), "Aborting resolution: {}", err);
                    return Err(err);
                }
            }
            attempt.last_error = Some(err);
        }
    }
}
