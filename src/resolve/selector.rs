//! 两阶段选择：先选函数名，再填参数
//!
//! 第一阶段在独立的临时历史上运行（system 列出候选 + 原始任务），只要求返回
//! `{"function_name": ...}`，名称不在注册表中时在本阶段内纠错重试。
//! 第二阶段在调用方历史中追加一条 system 消息，只描述被选中函数的参数，再走强制调用。
//! 两阶段各自拥有独立的 RetryController 与预算；注册表只有一个函数时跳过第一阶段。

use serde_json::Value;

use crate::core::ResolveError;
use crate::functions::{choices_json, FunctionDescriptor, FunctionRegistry};
use crate::memory::{Message, MessageHistory};
use crate::resolve::resolver::Resolver;
use crate::resolve::steps::{ChooseStep, Invocation, CHOOSER_PARAM};

/// 第一阶段的临时历史：候选列表 + 首条 user 消息（没有时沿用全部消息）
pub fn selection_history(history: &MessageHistory, choices: &[(String, String)]) -> MessageHistory {
    let listing = serde_json::to_string_pretty(&choices_json(choices))
        .unwrap_or_else(|_| choices_json(choices).to_string());
    let system = Message::system(format!(
        "You choose the single function that best processes the user's text.\n\
        Available functions:\n{listing}\n\
        Return valid JSON only as a response, no additional text: \
        {{\"{CHOOSER_PARAM}\": \"<one of the function names above>\"}}"
    ));

    let mut scratch = MessageHistory::new(history.limits());
    scratch.append(system);
    match history.first_user_message() {
        Some(task) => scratch.append(task.clone()),
        None => {
            for m in history.messages() {
                scratch.append(m.clone());
            }
        }
    }
    scratch
}

/// 第二阶段写入调用方历史的 system 消息
pub fn fill_instruction(descriptor: &FunctionDescriptor) -> Message {
    let template = match descriptor.parameter_template() {
        Value::Object(map) if map.is_empty() => "{}".to_string(),
        t => serde_json::to_string_pretty(&t).unwrap_or_else(|_| t.to_string()),
    };
    Message::system(format!(
        "Fill the parameters of function {}: {}\n\
        Parameters:\n{template}\n\
        Return valid JSON only as a response, no additional text.",
        descriptor.name, descriptor.description
    ))
}

impl Resolver {
    /// 两阶段选择并调用；第一阶段展示注册表自带的描述
    pub async fn select_and_call(
        &self,
        history: &mut MessageHistory,
        registry: &FunctionRegistry,
    ) -> Result<Invocation, ResolveError> {
        let choices = registry.names_and_descriptions();
        self.select_and_call_described(history, registry, &choices).await
    }

    /// 同 select_and_call，但第一阶段展示调用方给出的 (名称, 描述)
    pub async fn select_and_call_described(
        &self,
        history: &mut MessageHistory,
        registry: &FunctionRegistry,
        choices: &[(String, String)],
    ) -> Result<Invocation, ResolveError> {
        let name = self.choose(history, registry, choices).await?;
        let descriptor = registry
            .descriptor(&name)
            .ok_or_else(|| ResolveError::UnknownFunction {
                name: name.clone(),
                available: registry.names(),
            })?;
        tracing::info!("Selected function {}", name);

        history.append(fill_instruction(descriptor));
        self.call_forced(history, registry, &name).await
    }

    async fn choose(
        &self,
        history: &MessageHistory,
        registry: &FunctionRegistry,
        choices: &[(String, String)],
    ) -> Result<String, ResolveError> {
        let names = registry.names();
        match names.as_slice() {
            [] => {
                tracing::warn!("No functions to choose from");
                Err(ResolveError::NoCallFound)
            }
            [only] => Ok(only.clone()),
            _ => {
                let listed: Vec<String> = if choices.is_empty() {
                    names.clone()
                } else {
                    choices.iter().map(|(n, _)| n.clone()).collect()
                };
                let shown: Vec<(String, String)> = if choices.is_empty() {
                    registry.names_and_descriptions()
                } else {
                    choices.to_vec()
                };
                let mut scratch = selection_history(history, &shown);
                let mut step = ChooseStep::new(registry, &listed);
                self.controller(self.config.selection_retries)
                    .run(&mut scratch, &mut step)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::ParamType;
    use crate::memory::Role;

    #[test]
    fn test_selection_history_uses_first_user_message() {
        let mut h = MessageHistory::default();
        h.append(Message::system("You parse web pages."));
        h.append(Message::user("Villa Tugendhat, functionalist villa"));
        h.append(Message::assistant("ok"));
        let scratch = selection_history(
            &h,
            &[("add_place".into(), "A place".into()), ("add_event".into(), "An event".into())],
        );
        assert_eq!(scratch.len(), 2);
        assert_eq!(scratch.messages()[0].role, Role::System);
        assert!(scratch.messages()[0].content.contains("\"function_name\": \"add_event\""));
        assert_eq!(scratch.messages()[1].content, "Villa Tugendhat, functionalist villa");
    }

    #[test]
    fn test_selection_history_without_user_message_keeps_all() {
        let mut h = MessageHistory::default();
        h.append(Message::system("a"));
        h.append(Message::assistant("b"));
        assert_eq!(selection_history(&h, &[]).len(), 3);
    }

    #[test]
    fn test_fill_instruction_lists_parameters() {
        let d = FunctionDescriptor::builder("add_place")
            .description("A place in Brno")
            .param_described("header", ParamType::String, "Name of the place")
            .build();
        let m = fill_instruction(&d);
        assert_eq!(m.role, Role::System);
        assert!(m.content.contains("Fill the parameters of function add_place: A place in Brno"));
        assert!(m.content.contains("\"header\": \"string - Name of the place\""));
        assert!(m.content.contains("Return valid JSON only"));
    }
}
