//! 解析引擎对外入口
//!
//! Resolver 持有后端客户端、恢复引擎、参数匹配器与调用器；每个公开操作新建一个
//! RetryController 驱动对应的 AttemptStep。注册表与历史由调用方按请求传入。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::EngineSection;
use crate::core::{RecoveryEngine, ResolveError};
use crate::functions::{describe_model, FunctionDescriptor, FunctionRegistry, Invoker};
use crate::llm::CompletionClient;
use crate::memory::MessageHistory;
use crate::resolve::loop_::{RetryController, RetryPolicy};
use crate::resolve::matcher::ParameterMatcher;
use crate::resolve::steps::{InvokeStep, Invocation, JsonStep, TextStep};

/// 引擎参数（通常来自配置文件的 [engine] 段）
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub policy: RetryPolicy,
    /// 两阶段选择第一阶段的独立预算
    pub selection_retries: u32,
    pub invoke_timeout: Duration,
    /// 缺失时可用默认值补齐的参数
    pub defaults: HashMap<String, Value>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&EngineSection::default())
    }
}

impl From<&EngineSection> for ResolverConfig {
    fn from(engine: &EngineSection) -> Self {
        Self {
            policy: RetryPolicy {
                max_retries: engine.max_retries,
                backoff: engine.backoff(),
                max_transport_retries: engine.max_transport_retries,
                max_round_trips: engine.max_round_trips,
                echo_responses: engine.echo_responses,
            },
            selection_retries: engine.selection_retries,
            invoke_timeout: engine.invoke_timeout(),
            defaults: engine
                .defaults
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        }
    }
}

pub struct Resolver {
    pub(crate) client: Arc<dyn CompletionClient>,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) matcher: ParameterMatcher,
    pub(crate) invoker: Invoker,
    pub(crate) config: ResolverConfig,
    pub(crate) cancel: CancellationToken,
}

impl Resolver {
    pub fn new(client: Arc<dyn CompletionClient>, config: ResolverConfig) -> Self {
        Self {
            client,
            recovery: RecoveryEngine::new(),
            matcher: ParameterMatcher::new(config.defaults.clone()),
            invoker: Invoker::new(config.invoke_timeout),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// 共享外部取消令牌（每轮 REQUEST 前与退避期间检查）
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.client.token_usage()
    }

    pub(crate) fn controller(&self, retries: u32) -> RetryController<'_> {
        RetryController::new(
            self.client.as_ref(),
            &self.recovery,
            self.cancel.clone(),
            self.config.policy.with_retries(retries),
        )
    }

    /// 纯文本补全；仅传输错误会重试
    pub async fn complete_text(&self, history: &mut MessageHistory) -> Result<String, ResolveError> {
        self.controller(self.config.policy.max_retries)
            .run(history, &mut TextStep)
            .await
    }

    /// 公布注册表全部函数，由模型自行选择并调用
    pub async fn call_function(
        &self,
        history: &mut MessageHistory,
        registry: &FunctionRegistry,
    ) -> Result<Invocation, ResolveError> {
        if registry.is_empty() {
            tracing::warn!("No functions to advertise");
            return Err(ResolveError::NoCallFound);
        }
        let mut step = InvokeStep::free(registry, &self.matcher, &self.invoker);
        self.controller(self.config.policy.max_retries)
            .run(history, &mut step)
            .await
    }

    /// 强制模型为 name 生成参数并调用
    pub async fn call_forced(
        &self,
        history: &mut MessageHistory,
        registry: &FunctionRegistry,
        name: &str,
    ) -> Result<Invocation, ResolveError> {
        if !registry.contains(name) {
            return Err(ResolveError::UnknownFunction {
                name: name.to_string(),
                available: registry.names(),
            });
        }
        let mut step = InvokeStep::forced(registry, &self.matcher, &self.invoker, name);
        self.controller(self.config.policy.max_retries)
            .run(history, &mut step)
            .await
    }

    /// 强制按 descriptor 返回 JSON 对象，恰好包含其参数
    pub async fn resolve_json(
        &self,
        history: &mut MessageHistory,
        descriptor: &FunctionDescriptor,
    ) -> Result<Map<String, Value>, ResolveError> {
        if descriptor.is_empty() {
            return Err(ResolveError::Unparseable("empty schema".to_string()));
        }
        let mut step = JsonStep::new(descriptor, &self.matcher, Ok);
        self.controller(self.config.policy.max_retries)
            .run(history, &mut step)
            .await
    }

    /// resolve_json 的类型化版本：schema 由 schemars 推导，结果反序列化为 T
    pub async fn resolve_model<T>(&self, history: &mut MessageHistory) -> Result<T, ResolveError>
    where
        T: JsonSchema + DeserializeOwned + Send + 'static,
    {
        let descriptor = describe_model::<T>();
        if descriptor.is_empty() {
            return Err(ResolveError::Unparseable(format!(
                "cannot describe {}",
                T::schema_name()
            )));
        }
        let mut step = JsonStep::new(&descriptor, &self.matcher, |map| {
            serde_json::from_value::<T>(Value::Object(map))
                .map_err(|e| ResolveError::Unparseable(e.to_string()))
        });
        self.controller(self.config.policy.max_retries)
            .run(history, &mut step)
            .await
    }
}
