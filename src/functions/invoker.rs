//! 函数调用器
//!
//! 在调用方传入的注册表中按名查找并调用，施加超时；结果映射为 ResolveError
//! （未知函数 / 调用失败 / 主动中止），由重试控制器决定后续动作。每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::ResolveError;
use crate::functions::{CallError, FunctionRegistry, ParsedArguments};

pub struct Invoker {
    timeout: Duration,
}

impl Invoker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 调用 registry 中的 name；redundant 仅用于失败时回传给模型
    pub async fn invoke(
        &self,
        registry: &FunctionRegistry,
        name: &str,
        args: ParsedArguments,
        redundant: &[String],
    ) -> Result<Value, ResolveError> {
        let callable = registry
            .get(name)
            .ok_or_else(|| ResolveError::UnknownFunction {
                name: name.to_string(),
                available: registry.names(),
            })?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, callable.call(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(CallError::Failed(_))) => (false, "error"),
            Ok(Err(CallError::Abort(_))) => (false, "abort"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "function_audit",
            "function": name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "function");

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(CallError::Failed(message))) => Err(ResolveError::InvocationFailed {
                function: name.to_string(),
                message,
                redundant: redundant.to_vec(),
            }),
            Ok(Err(CallError::Abort(message))) => Err(ResolveError::RecursionExceeded(message)),
            Err(_) => Err(ResolveError::InvocationFailed {
                function: name.to_string(),
                message: format!("timed out after {}s", self.timeout.as_secs()),
                redundant: redundant.to_vec(),
            }),
        }
    }
}

fn args_preview(args: &ParsedArguments) -> String {
    let s = Value::Object(args.clone().into_map()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
