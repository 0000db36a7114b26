//! 各请求形态的单轮处理（供 RetryController 驱动）
//!
//! - TextStep：纯文本补全
//! - InvokeStep：自由选择或强制调用注册表中的函数，修复、匹配后调用
//! - JsonStep：强制按给定 schema 返回 JSON 对象
//! - ChooseStep：两阶段选择的第一阶段，只返回被选中的函数名

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::ResolveError;
use crate::functions::{FunctionDescriptor, FunctionRegistry, Invoker, ParsedArguments};
use crate::llm::{CompletionRequest, CompletionResponse};
use crate::memory::MessageHistory;
use crate::resolve::loop_::AttemptStep;
use crate::resolve::matcher::{MatchOutcome, ParameterMatcher};
use crate::resolve::repair::repair;

/// 第一阶段使用的选择 schema 名与参数名
pub const CHOOSER_NAME: &str = "ChosenFunction";
pub const CHOOSER_PARAM: &str = "function_name";

/// 一次成功调用
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub function: String,
    pub arguments: ParsedArguments,
    pub result: Value,
    /// 模型多给、已被丢弃的参数名
    pub redundant: Vec<String>,
}

/// 取参数块：优先 function_call.arguments；强制请求下允许用正文（JSON 模式后端）
fn argument_blob(response: CompletionResponse, allow_content: bool) -> Option<(Option<String>, Value)> {
    match (response.function_call, response.content) {
        (Some(call), _) => Some((Some(call.name), call.arguments)),
        (None, Some(content)) if allow_content && !content.trim().is_empty() => {
            Some((None, Value::String(content)))
        }
        _ => None,
    }
}

pub struct TextStep;

#[async_trait]
impl AttemptStep for TextStep {
    type Output = String;

    fn request(&self, history: &MessageHistory) -> CompletionRequest {
        CompletionRequest::plain(history)
    }

    async fn handle(&mut self, response: CompletionResponse) -> Result<String, ResolveError> {
        Ok(response.content.unwrap_or_default())
    }
}

pub struct InvokeStep<'a> {
    registry: &'a FunctionRegistry,
    matcher: &'a ParameterMatcher,
    invoker: &'a Invoker,
    /// Some 时为强制调用，返回的函数名以此为准
    target: Option<String>,
}

impl<'a> InvokeStep<'a> {
    pub fn free(registry: &'a FunctionRegistry, matcher: &'a ParameterMatcher, invoker: &'a Invoker) -> Self {
        Self {
            registry,
            matcher,
            invoker,
            target: None,
        }
    }

    pub fn forced(
        registry: &'a FunctionRegistry,
        matcher: &'a ParameterMatcher,
        invoker: &'a Invoker,
        target: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            matcher,
            invoker,
            target: Some(target.into()),
        }
    }
}

#[async_trait]
impl AttemptStep for InvokeStep<'_> {
    type Output = Invocation;

    fn request(&self, history: &MessageHistory) -> CompletionRequest {
        match self.target.as_deref().and_then(|t| self.registry.descriptor(t)) {
            Some(descriptor) => {
                CompletionRequest::forced(history, descriptor.to_function_schema(), &descriptor.name)
            }
            None => CompletionRequest::with_functions(history, self.registry.function_schemas()),
        }
    }

    async fn handle(&mut self, response: CompletionResponse) -> Result<Invocation, ResolveError> {
        let (returned, raw) =
            argument_blob(response, self.target.is_some()).ok_or(ResolveError::NoCallFound)?;
        let name = match (&self.target, returned) {
            (Some(target), _) => target.clone(),
            (None, Some(name)) => name,
            (None, None) => return Err(ResolveError::NoCallFound),
        };

        let descriptor = self
            .registry
            .descriptor(&name)
            .ok_or_else(|| ResolveError::UnknownFunction {
                name: name.clone(),
                available: self.registry.names(),
            })?;

        let outcome = if descriptor.has_parameters() {
            let repaired = repair(&raw)?;
            self.matcher.match_arguments(descriptor, &repaired)?
        } else {
            MatchOutcome {
                arguments: ParsedArguments::new(),
                redundant: Vec::new(),
                defaulted: Vec::new(),
            }
        };

        let result = self
            .invoker
            .invoke(self.registry, &name, outcome.arguments.clone(), &outcome.redundant)
            .await?;
        tracing::info!("Called {} with {} arguments", name, outcome.arguments.len());
        Ok(Invocation {
            function: name,
            arguments: outcome.arguments,
            result,
            redundant: outcome.redundant,
        })
    }
}

/// 强制 JSON：按描述匹配后交给 convert 转为目标类型（转换失败同样可重试）
pub struct JsonStep<'a, T> {
    descriptor: &'a FunctionDescriptor,
    matcher: &'a ParameterMatcher,
    convert: fn(Map<String, Value>) -> Result<T, ResolveError>,
}

impl<'a, T> JsonStep<'a, T> {
    pub fn new(
        descriptor: &'a FunctionDescriptor,
        matcher: &'a ParameterMatcher,
        convert: fn(Map<String, Value>) -> Result<T, ResolveError>,
    ) -> Self {
        Self {
            descriptor,
            matcher,
            convert,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> AttemptStep for JsonStep<'_, T> {
    type Output = T;

    fn request(&self, history: &MessageHistory) -> CompletionRequest {
        CompletionRequest::forced(history, self.descriptor.to_function_schema(), &self.descriptor.name)
    }

    async fn handle(&mut self, response: CompletionResponse) -> Result<T, ResolveError> {
        let (_, raw) = argument_blob(response, true).ok_or(ResolveError::NoCallFound)?;
        let repaired = repair(&raw)?;
        let outcome = self.matcher.match_arguments(self.descriptor, &repaired)?;
        (self.convert)(outcome.arguments.into_map())
    }
}

/// 第一阶段：模型只需给出 {"function_name": ...}
pub struct ChooseStep<'a> {
    registry: &'a FunctionRegistry,
    descriptor: FunctionDescriptor,
}

impl<'a> ChooseStep<'a> {
    /// choices 为展示给模型的候选名（可与注册表顺序不同）
    pub fn new(registry: &'a FunctionRegistry, choices: &[String]) -> Self {
        let descriptor = FunctionDescriptor::builder(CHOOSER_NAME)
            .description("The single function that best handles the task")
            .param_enum(CHOOSER_PARAM, choices)
            .build();
        Self { registry, descriptor }
    }
}

#[async_trait]
impl AttemptStep for ChooseStep<'_> {
    type Output = String;

    fn request(&self, history: &MessageHistory) -> CompletionRequest {
        CompletionRequest::forced(history, self.descriptor.to_function_schema(), CHOOSER_NAME)
    }

    async fn handle(&mut self, response: CompletionResponse) -> Result<String, ResolveError> {
        let (returned, raw) = argument_blob(response, true).ok_or(ResolveError::NoCallFound)?;
        let repaired = repair(&raw)?;
        let chosen = match repaired.get(CHOOSER_PARAM) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(other) => other.to_string(),
            // 有些后端直接以候选函数名作为 function_call.name 回答
            None => match returned {
                Some(name) if name != CHOOSER_NAME => name,
                _ => {
                    return Err(ResolveError::MissingRequiredParam {
                        function: CHOOSER_NAME.to_string(),
                        param: CHOOSER_PARAM.to_string(),
                    })
                }
            },
        };
        if !self.registry.contains(&chosen) {
            return Err(ResolveError::UnknownFunction {
                name: chosen,
                available: self.registry.names(),
            });
        }
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{CallError, ParamType};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn registry() -> FunctionRegistry {
        let mut r = FunctionRegistry::new();
        r.register_fn(
            FunctionDescriptor::builder("add_place")
                .description("A place")
                .param("header", ParamType::String)
                .param("address", ParamType::String)
                .build(),
            |args| Ok(json!({"header": args.str("header"), "address": args.str("address")})),
        );
        r.register_fn(
            FunctionDescriptor::builder("assign_event").description("An event").build(),
            |args| {
                if !args.is_empty() {
                    return Err(CallError::Failed("takes no arguments".into()));
                }
                Ok(json!("event"))
            },
        );
        r
    }

    fn matcher() -> ParameterMatcher {
        ParameterMatcher::new(HashMap::from([("address".to_string(), json!("Brno"))]))
    }

    #[tokio::test]
    async fn test_free_choice_invokes_returned_function() {
        let (r, m, i) = (registry(), matcher(), Invoker::new(Duration::from_secs(1)));
        let mut step = InvokeStep::free(&r, &m, &i);
        let out = step
            .handle(CompletionResponse::call("add_place", json!("{'header': 'Špilberk'}")))
            .await
            .unwrap();
        assert_eq!(out.function, "add_place");
        assert_eq!(out.result, json!({"header": "Špilberk", "address": "Brno"}));
    }

    #[tokio::test]
    async fn test_free_choice_text_is_no_call() {
        let (r, m, i) = (registry(), matcher(), Invoker::new(Duration::from_secs(1)));
        let mut step = InvokeStep::free(&r, &m, &i);
        let err = step.handle(CompletionResponse::text("{\"header\": \"x\"}")).await.unwrap_err();
        assert_eq!(err, ResolveError::NoCallFound);
    }

    #[tokio::test]
    async fn test_forced_uses_target_and_content_fallback() {
        let (r, m, i) = (registry(), matcher(), Invoker::new(Duration::from_secs(1)));
        let mut step = InvokeStep::forced(&r, &m, &i, "add_place");
        let req = step.request(&MessageHistory::default());
        assert_eq!(req.function_call.as_deref(), Some("add_place"));
        let out = step
            .handle(CompletionResponse::text("```json\n{\"header\": \"Villa Tugendhat\", \"address\": \"Černopolní 45\"}\n```"))
            .await
            .unwrap();
        assert_eq!(out.result["address"], "Černopolní 45");
    }

    #[tokio::test]
    async fn test_zero_param_function_skips_parsing() {
        let (r, m, i) = (registry(), matcher(), Invoker::new(Duration::from_secs(1)));
        let mut step = InvokeStep::free(&r, &m, &i);
        let out = step
            .handle(CompletionResponse::call("assign_event", json!("not json at all")))
            .await
            .unwrap();
        assert_eq!(out.result, json!("event"));
    }

    #[tokio::test]
    async fn test_unknown_function_lists_available() {
        let (r, m, i) = (registry(), matcher(), Invoker::new(Duration::from_secs(1)));
        let mut step = InvokeStep::free(&r, &m, &i);
        let err = step
            .handle(CompletionResponse::call("add_museum", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownFunction { ref available, .. } if available.len() == 2));
    }

    #[tokio::test]
    async fn test_json_step_returns_matched_object() {
        let d = FunctionDescriptor::builder("Summary")
            .param("brief", ParamType::String)
            .build();
        let m = matcher();
        let mut step = JsonStep::new(&d, &m, Ok);
        let out = step
            .handle(CompletionResponse::text("{'brief': 'Opera', 'extra': 1}"))
            .await
            .unwrap();
        assert_eq!(out, json!({"brief": "Opera"}).as_object().cloned().unwrap());
    }

    #[tokio::test]
    async fn test_choose_step_validates_name() {
        let r = registry();
        let mut step = ChooseStep::new(&r, &r.names());
        let req = step.request(&MessageHistory::default());
        assert_eq!(
            req.functions[0]["parameters"]["properties"]["function_name"]["enum"],
            json!(["add_place", "assign_event"])
        );

        let err = step
            .handle(CompletionResponse::call(CHOOSER_NAME, json!({"function_name": "add_museum"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_function");

        let ok = step
            .handle(CompletionResponse::text("{\"function_name\": \" add_place \"}"))
            .await
            .unwrap();
        assert_eq!(ok, "add_place");
    }

    #[tokio::test]
    async fn test_choose_step_accepts_call_named_after_choice() {
        let r = registry();
        let mut step = ChooseStep::new(&r, &r.names());
        let ok = step
            .handle(CompletionResponse::call("assign_event", json!({})))
            .await
            .unwrap();
        assert_eq!(ok, "assign_event");
    }
}
