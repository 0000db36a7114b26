//! 解析引擎集成测试（脚本化后端，无网络）

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use callforge::core::ResolveError;
    use callforge::functions::{FunctionDescriptor, FunctionRegistry, ParamType};
    use callforge::llm::{CompletionResponse, LlmError, ScriptedClient};
    use callforge::memory::{Message, MessageHistory, Role};
    use callforge::records::{self, CityRecord, RecordKind};
    use callforge::{Resolver, ResolverConfig};
    use serde_json::json;

    fn config(max_retries: u32) -> ResolverConfig {
        let mut c = ResolverConfig::default();
        c.policy.max_retries = max_retries;
        c.policy.backoff = Duration::from_millis(1);
        c
    }

    fn resolver(client: &Arc<ScriptedClient>, max_retries: u32) -> Resolver {
        Resolver::new(client.clone(), config(max_retries))
    }

    fn history(text: &str) -> MessageHistory {
        let mut h = MessageHistory::default();
        h.append(Message::user(text));
        h
    }

    /// add_place(header, text, brief)
    fn place_registry() -> FunctionRegistry {
        let mut r = FunctionRegistry::new();
        r.register_fn(
            FunctionDescriptor::builder("add_place")
                .description("A place or destination in or near Brno")
                .param("header", ParamType::String)
                .param("text", ParamType::String)
                .param("brief", ParamType::String)
                .build(),
            |args| {
                Ok(json!({
                    "header": args.str("header"),
                    "text": args.str("text"),
                    "brief": args.str("brief"),
                }))
            },
        );
        r
    }

    #[tokio::test]
    async fn test_description_wrappers_end_to_end() {
        let raw = r#"{"header":{"description":"Otello"}, "text":{"description":"Opera in four acts by Giuseppe Verdi"}, "brief":{"description":"Verdi's Otello at the Janáček Theatre"}}"#;
        let client = Arc::new(ScriptedClient::new(vec![Ok(CompletionResponse::call(
            "add_place",
            json!(raw),
        ))]));
        let out = resolver(&client, 2)
            .call_function(&mut history("Otello ..."), &place_registry())
            .await
            .unwrap();
        assert_eq!(out.function, "add_place");
        assert_eq!(
            out.result,
            json!({
                "header": "Otello",
                "text": "Opera in four acts by Giuseppe Verdi",
                "brief": "Verdi's Otello at the Janáček Theatre"
            })
        );
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_bounds_round_trips() {
        let client = Arc::new(ScriptedClient::repeating(Ok(CompletionResponse::text(
            "I think this is a place.",
        ))));
        let err = resolver(&client, 2)
            .call_function(&mut history("Špilberk castle"), &place_registry())
            .await
            .unwrap_err();
        match err {
            ResolveError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(*last, ResolveError::NoCallFound);
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_aborted_backend_short_circuits() {
        let client = Arc::new(ScriptedClient::repeating(Err(LlmError::Aborted(
            "feedback loop".into(),
        ))));
        let err = resolver(&client, 5)
            .call_function(&mut history("text"), &place_registry())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::RecursionExceeded(_)));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_redundant_arguments_are_not_fatal() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(CompletionResponse::call(
            "add_place",
            json!({"header": "Villa Tugendhat", "text": "t", "brief": "b", "architect": "Mies"}),
        ))]));
        let out = resolver(&client, 0)
            .call_function(&mut history("Villa Tugendhat"), &place_registry())
            .await
            .unwrap();
        assert_eq!(out.redundant, vec!["architect"]);
        assert!(out.arguments.get("architect").is_none());
    }

    #[tokio::test]
    async fn test_transport_errors_do_not_consume_budget() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(LlmError::Http {
                status: 429,
                body: "rate limited".into(),
            }),
            Err(LlmError::Transport("connection reset".into())),
            Ok(CompletionResponse::call(
                "add_place",
                json!({"header": "a", "text": "b", "brief": "c"}),
            )),
        ]));
        let out = resolver(&client, 0)
            .call_function(&mut history("x"), &place_registry())
            .await
            .unwrap();
        assert_eq!(out.result["header"], "a");
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_parameter_feedback_reaches_next_request() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(CompletionResponse::call(
                "add_place",
                json!("{'text': 'Gothic cathedral', 'brief': 'Cathedral on Petrov hill'}"),
            )),
            Ok(CompletionResponse::call(
                "add_place",
                json!({"header": "Petrov", "text": "Gothic cathedral", "brief": "Cathedral on Petrov hill"}),
            )),
        ]));
        let mut h = history("Cathedral of St. Peter and Paul");
        let out = resolver(&client, 2)
            .call_function(&mut h, &place_registry())
            .await
            .unwrap();
        assert_eq!(out.result["header"], "Petrov");

        let second = &client.requests()[1];
        let feedback = second.messages.last().unwrap();
        assert_eq!(feedback.role, Role::User);
        assert!(feedback.content.contains("Missing required parameter 'header' for add_place"));
        // 原始回答先以 assistant 消息写回
        assert_eq!(second.messages[1].role, Role::Assistant);
        assert!(second.messages[1].content.starts_with("function_call: add_place("));
    }

    #[tokio::test]
    async fn test_two_phase_selection_retries_unknown_name() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(CompletionResponse::call(
                "ChosenFunction",
                json!({"function_name": "add_concert"}),
            )),
            Ok(CompletionResponse::text("{\"function_name\": \"add_event\"}")),
            Ok(CompletionResponse::call(
                "add_event",
                json!({
                    "header": "Otello",
                    "text": "Opera in four acts",
                    "brief": "Verdi's opera",
                    "dates": [{"start": "2024-01-11"}, {"start": "2024-01-31 15:00", "end": "2024-02-14"}]
                }),
            )),
        ]));
        let registry = records::parsing_registry("https://www.ndbrno.cz/otello");
        let mut h = MessageHistory::default();
        h.append(Message::system("You are a smart processor of web-scraped text."));
        h.append(Message::user("Otello, Janáček Theatre, 11 Jan 2024"));

        let out = resolver(&client, 2).select_and_call(&mut h, &registry).await.unwrap();
        assert_eq!(client.calls(), 3);

        let requests = client.requests();
        // 第一阶段：临时历史，只含候选列表与首条 user 消息
        assert_eq!(requests[0].function_call.as_deref(), Some("ChosenFunction"));
        assert_eq!(requests[0].messages.len(), 2);
        assert!(requests[0].messages[0].content.contains("add_administration"));
        assert!(requests[1]
            .messages
            .iter()
            .any(|m| m.content.contains("Got incorrect function name: add_concert")));

        // 第二阶段：调用方历史 + 参数说明，强制 add_event
        assert_eq!(requests[2].function_call.as_deref(), Some("add_event"));
        let fill = requests[2].messages.last().unwrap();
        assert_eq!(fill.role, Role::System);
        assert!(fill.content.contains("Fill the parameters of function add_event"));
        assert!(requests[2]
            .messages
            .iter()
            .all(|m| !m.content.contains("add_concert")));

        let record: CityRecord = serde_json::from_value(out.result).unwrap();
        assert_eq!(record.record_type, RecordKind::Event);
        assert_eq!(record.address.as_deref(), Some("Brno, Czech Republic"));
        assert_eq!(record.dates.unwrap().len(), 2);
        assert_eq!(record.url, "https://www.ndbrno.cz/otello");
    }

    #[tokio::test]
    async fn test_single_function_skips_selection() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(CompletionResponse::call(
            "add_place",
            json!({"header": "a", "text": "b", "brief": "c"}),
        ))]));
        let out = resolver(&client, 2)
            .select_and_call(&mut history("x"), &place_registry())
            .await
            .unwrap();
        assert_eq!(out.function, "add_place");
        assert_eq!(client.calls(), 1);
        assert_eq!(client.requests()[0].function_call.as_deref(), Some("add_place"));
    }

    #[tokio::test]
    async fn test_custom_descriptions_shown_in_selection() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(CompletionResponse::call("ChosenFunction", json!({"function_name": "assign_static"}))),
            Ok(CompletionResponse::call("assign_static", json!({}))),
        ]));
        let registry = records::classification_registry();
        let choices: Vec<(String, String)> = registry
            .names()
            .into_iter()
            .map(|n| (n.clone(), format!("custom text for {n}")))
            .collect();
        let out = resolver(&client, 1)
            .select_and_call_described(&mut history("History of Brno"), &registry, &choices)
            .await
            .unwrap();
        assert_eq!(out.result, json!("static"));
        assert!(client.requests()[0].messages[0]
            .content
            .contains("custom text for assign_event"));
    }

    #[tokio::test]
    async fn test_forced_json_from_plain_content() {
        let descriptor = FunctionDescriptor::builder("Summary")
            .param("header", ParamType::String)
            .param("brief", ParamType::String)
            .build();
        let client = Arc::new(ScriptedClient::new(vec![Ok(CompletionResponse::text(
            "Here you go:\n```json\n{'header': 'Brno Exhibition Centre', 'brief': 'Trade fairs since 1928',}\n```",
        ))]));
        let out = resolver(&client, 1)
            .resolve_json(&mut history("Výstaviště"), &descriptor)
            .await
            .unwrap();
        assert_eq!(
            serde_json::Value::Object(out),
            json!({"header": "Brno Exhibition Centre", "brief": "Trade fairs since 1928"})
        );
        assert_eq!(client.requests()[0].function_call.as_deref(), Some("Summary"));
    }

    #[tokio::test]
    async fn test_classify_prefers_url() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let kind = records::classify(
            &resolver(&client, 1),
            MessageHistory::default().limits(),
            "https://www.gotobrno.cz/akce/ignis-brunensis/",
            "Fireworks competition",
        )
        .await
        .unwrap();
        assert_eq!(kind, RecordKind::Event);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_classify_by_function_call() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(CompletionResponse::call(
            "assign_administration",
            json!("{}"),
        ))]));
        let kind = records::classify(
            &resolver(&client, 1),
            MessageHistory::default().limits(),
            "https://www.brno.cz/",
            "Opening hours of the municipal office",
        )
        .await
        .unwrap();
        assert_eq!(kind, RecordKind::Administration);
        assert_eq!(client.requests()[0].functions.len(), 4);
    }

    #[tokio::test]
    async fn test_classify_by_json() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(CompletionResponse::text(
            "{\"type\": \"place\"}",
        ))]));
        let kind = records::classify_by_json(
            &resolver(&client, 1),
            MessageHistory::default().limits(),
            "Café Spolek, Orlí 22",
        )
        .await
        .unwrap();
        assert_eq!(kind, RecordKind::Place);
    }

    #[tokio::test]
    async fn test_parse_content_keeps_conversation() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(CompletionResponse::call("ChosenFunction", json!({"function_name": "add_static"}))),
            Ok(CompletionResponse::call(
                "add_static",
                json!({"header": "Leoš Janáček", "text": "Composer", "brief": "Czech composer living in Brno"}),
            )),
        ]));
        let mut h = MessageHistory::default();
        let record = records::parse_content(
            &resolver(&client, 1),
            &mut h,
            "https://www.brno.cz/janacek",
            "Leoš Janáček was a Czech composer...",
        )
        .await
        .unwrap();
        assert_eq!(record.record_type, RecordKind::Static);
        assert_eq!(record.address, None);
        assert!(h.messages().iter().any(|m| m.content.contains("Fill the parameters of function add_static")));
    }
    #[tokio::test]
    async fn test_parse_content_starts_each_page_fresh() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(CompletionResponse::call("ChosenFunction", json!({"function_name": "add_static"}))),
            Ok(CompletionResponse::call(
                "add_static",
                json!({"header": "Leoš Janáček", "text": "Composer", "brief": "Czech composer"}),
            )),
            Ok(CompletionResponse::call("ChosenFunction", json!({"function_name": "add_place"}))),
            Ok(CompletionResponse::call(
                "add_place",
                json!({
                    "header": "Villa Tugendhat",
                    "text": "Functionalist villa",
                    "brief": "Mies van der Rohe villa",
                    "address": "Černopolní 45, Brno"
                }),
            )),
        ]));
        let r = resolver(&client, 1);
        let mut h = MessageHistory::default();
        records::parse_content(&r, &mut h, "https://www.brno.cz/janacek", "OLD PAGE Leos Janacek composer")
            .await
            .unwrap();
        let record = records::parse_content(&r, &mut h, "https://www.brno.cz/tugendhat", "NEW PAGE Villa Tugendhat")
            .await
            .unwrap();
        assert_eq!(record.header, "Villa Tugendhat");

        let requests = client.requests();
        assert_eq!(requests.len(), 4);
        for req in &requests[2..] {
            assert!(req.messages.iter().any(|m| m.content.contains("NEW PAGE Villa Tugendhat")));
            assert!(!req.messages.iter().any(|m| m.content.contains("OLD PAGE")));
        }
        // 保存的历史只含本页对话
        assert!(!h.messages().iter().any(|m| m.content.contains("OLD PAGE")));
        assert!(h.first_user_message().unwrap().content.contains("NEW PAGE"));
    }
}
