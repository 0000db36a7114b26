//! 城市记录：把抓取的网页文本解析为结构化记录
//!
//! - 解析注册表：add_place / add_event / add_administration / add_static，返回 CityRecord
//! - 分类注册表：assign_*（无参数），返回记录类型
//! - 按 URL 子串预分类，无法判断时交给模型

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::ResolveError;
use crate::functions::{CallError, FunctionDescriptor, FunctionRegistry, ParamType, ParsedArguments};
use crate::memory::{HistoryLimits, Message, MessageHistory};
use crate::resolve::Resolver;

const DATE_FORMAT: &str = "%Y-%m-%d";

const EVENT_URL_SUBSTRINGS: &[&str] = &["/akce", "/event", "/udalost", "/kalendar", "/program", "/vystava"];
const PLACE_URL_SUBSTRINGS: &[&str] = &["/mista", "/place", "/restaura", "/kavarn", "/muze", "/pamatk"];
const ADMINISTRATION_URL_SUBSTRINGS: &[&str] = &["/urad", "/sluzby", "/office", "/expat", "/poplatk", "/formular"];
const STATIC_URL_SUBSTRINGS: &[&str] = &["wikipedia.org", "/blog", "/clanek", "/article", "/historie", "/osobnost"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Place,
    Event,
    Administration,
    Static,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Place,
        RecordKind::Event,
        RecordKind::Administration,
        RecordKind::Static,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Place => "place",
            RecordKind::Event => "event",
            RecordKind::Administration => "administration",
            RecordKind::Static => "static",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "place" => Ok(RecordKind::Place),
            "event" => Ok(RecordKind::Event),
            "administration" => Ok(RecordKind::Administration),
            "static" => Ok(RecordKind::Static),
            other => Err(format!("unknown record type: {other}")),
        }
    }
}

/// Duration of an event. Field "end" is optional and used for a period of time (two dates from-to).
/// Use the format YYYY-MM-DD for date and HH:MM:SS for time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Duration {
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl Duration {
    pub fn on(start: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: None,
        }
    }
}

/// 一条解析完成的记录；address 仅非 static 记录有，dates 仅 event 有
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRecord {
    pub header: String,
    pub record_type: RecordKind,
    pub brief: String,
    pub text: String,
    pub url: String,
    pub date_fetched: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dates: Option<Vec<Duration>>,
}

/// Content type of the entity, one of: place, event, administration, static
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct ContentType {
    #[serde(rename = "type")]
    pub kind: RecordKind,
}

/// 按 URL 子串预分类（event 优先，其次 place、administration、static）
pub fn preclassify_by_url(url: &str) -> Option<RecordKind> {
    let table: [(&[&str], RecordKind); 4] = [
        (EVENT_URL_SUBSTRINGS, RecordKind::Event),
        (PLACE_URL_SUBSTRINGS, RecordKind::Place),
        (ADMINISTRATION_URL_SUBSTRINGS, RecordKind::Administration),
        (STATIC_URL_SUBSTRINGS, RecordKind::Static),
    ];
    table
        .iter()
        .find(|(substrings, _)| substrings.iter().any(|s| url.contains(s)))
        .map(|(_, kind)| *kind)
}

fn today() -> String {
    Local::now().format(DATE_FORMAT).to_string()
}

fn required_text(args: &ParsedArguments, name: &str) -> Result<String, CallError> {
    let value = args.str(name).trim().to_string();
    if value.is_empty() {
        return Err(CallError::Failed(format!("parameter '{name}' must not be empty")));
    }
    Ok(value)
}

fn page_url(args: &ParsedArguments, fallback: &str) -> String {
    match args.str("url").trim() {
        "" => fallback.to_string(),
        u => u.to_string(),
    }
}

fn check_date(value: &str) -> Result<(), CallError> {
    let day: String = value.trim().chars().take(10).collect();
    NaiveDate::parse_from_str(&day, DATE_FORMAT)
        .map(|_| ())
        .map_err(|_| CallError::Failed(format!("date '{value}' is not in YYYY-MM-DD format")))
}

/// dates 参数：Duration 数组，也接受单个日期字符串或被编码成字符串的数组
fn parse_dates(value: Option<&Value>) -> Result<Vec<Duration>, CallError> {
    let items: Vec<Value> = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            Ok(other @ Value::Object(_)) => vec![other],
            _ => vec![Value::String(s.clone())],
        },
        Some(other) => vec![other.clone()],
    };

    let mut dates = Vec::with_capacity(items.len());
    for item in items {
        let duration = match item {
            Value::String(s) => Duration::on(s),
            other => serde_json::from_value::<Duration>(other)
                .map_err(|e| CallError::Failed(format!("dates: {e}, expected {{\"start\": ..., \"end\": ...}}")))?,
        };
        check_date(&duration.start)?;
        if let Some(end) = &duration.end {
            check_date(end)?;
        }
        dates.push(duration);
    }
    Ok(dates)
}

fn to_value(record: CityRecord) -> Result<Value, CallError> {
    serde_json::to_value(record).map_err(|e| CallError::Failed(e.to_string()))
}

fn common(builder: crate::functions::DescriptorBuilder) -> crate::functions::DescriptorBuilder {
    builder
        .param_described("header", ParamType::String, "Provided or generated header fitting the text")
        .param_described("text", ParamType::String, "Descriptive text of the entity, not shortened")
        .param_described("brief", ParamType::String, "Sum up of the text, no longer than 3 sentences")
}

/// 解析注册表；url 为被解析页面的地址（模型未给出 url 参数时使用）
pub fn parsing_registry(url: &str) -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();

    let page = url.to_string();
    registry.register_fn(
        common(FunctionDescriptor::builder("add_place").description(
            "Call this function if you encounter entity that is a place or destination in or near Brno city, \
            such as restaurant, café, bar, bakery, museum, tour, greenery, church, castle, university, kino, theatre or similar.",
        ))
        .param_described("address", ParamType::String, "Address of the place")
        .optional("url", ParamType::String)
        .build(),
        move |args| {
            to_value(CityRecord {
                header: required_text(&args, "header")?,
                record_type: RecordKind::Place,
                brief: args.str("brief"),
                text: args.str("text"),
                url: page_url(&args, &page),
                date_fetched: today(),
                address: Some(args.str("address")),
                dates: None,
            })
        },
    );

    let page = url.to_string();
    registry.register_fn(
        common(FunctionDescriptor::builder("add_event").description(
            "Call this function if you encounter entity that is an event such as concert, exhibition, celebration, \
            festival, sports match, theatrical performance or similar.",
        ))
        .param_described("address", ParamType::String, "Address of the venue")
        .param_schema(
            "dates",
            json!({
                "type": "array",
                "description": "Dates of the event as a list of durations",
                "items": {
                    "type": "object",
                    "properties": {
                        "start": {"type": "string"},
                        "end": {"type": "string"}
                    },
                    "required": ["start"]
                }
            }),
        )
        .optional("url", ParamType::String)
        .build(),
        move |args| {
            to_value(CityRecord {
                header: required_text(&args, "header")?,
                record_type: RecordKind::Event,
                brief: args.str("brief"),
                text: args.str("text"),
                url: page_url(&args, &page),
                date_fetched: today(),
                address: Some(args.str("address")),
                dates: Some(parse_dates(args.get("dates"))?),
            })
        },
    );

    let page = url.to_string();
    registry.register_fn(
        common(FunctionDescriptor::builder("add_administration").description(
            "Call this function if you encounter entity that is administrative information such as Municipal office, \
            business, authorities, insurance, social care, vehicle registration, taxes, fees, information for expats, \
            school system, residence, ID cards or similar.",
        ))
        .param_described("address", ParamType::String, "Address of the office")
        .optional("url", ParamType::String)
        .build(),
        move |args| {
            to_value(CityRecord {
                header: required_text(&args, "header")?,
                record_type: RecordKind::Administration,
                brief: args.str("brief"),
                text: args.str("text"),
                url: page_url(&args, &page),
                date_fetched: today(),
                address: Some(args.str("address")),
                dates: None,
            })
        },
    );

    let page = url.to_string();
    registry.register_fn(
        common(FunctionDescriptor::builder("add_static").description(
            "Call this function if you encounter entity that contains blog post, an article from wikipedia or \
            information about well-known personality connected with Brno that is not likely to change in next 5 years. \
            This entity does not contain any information about places in Brno, events or administrative.",
        ))
        .optional("url", ParamType::String)
        .build(),
        move |args| {
            to_value(CityRecord {
                header: required_text(&args, "header")?,
                record_type: RecordKind::Static,
                brief: args.str("brief"),
                text: args.str("text"),
                url: page_url(&args, &page),
                date_fetched: today(),
                address: None,
                dates: None,
            })
        },
    );

    registry
}

/// 分类注册表：四个无参数函数，各自返回记录类型名
pub fn classification_registry() -> FunctionRegistry {
    let descriptions = [
        (RecordKind::Place, "Call this function if you encounter entity that describes places, tours or destinations in or near Brno city, such as restaurant, café, bar, bakery, museum, greenery, church, castle, university, kino, theatre or similar."),
        (RecordKind::Event, "Call this function if you encounter entity that describes events, such as concert, exhibition, celebration, festival, sports match, theatrical performance or similar."),
        (RecordKind::Administration, "Call this function if you encounter entity that contains administrative information such as Municipal office, business, authorities, insurance, social care, vehicle registration, taxes, fees, information for expats, school system, residence, ID cards or similar."),
        (RecordKind::Static, "Call this function if you encounter entity that contains various articles, blog posts, or an article from wikipedia or information about well-known personality connected with Brno that is not likely to change in next 5 years."),
    ];

    let mut registry = FunctionRegistry::new();
    for (kind, description) in descriptions {
        registry.register_fn(
            FunctionDescriptor::builder(format!("assign_{}", kind.as_str()))
                .description(description)
                .build(),
            move |_| Ok(json!(kind.as_str())),
        );
    }
    registry
}

/// 解析用对话：system 为处理说明，user 为待处理文本
pub fn parsing_messages(url: &str, content: &str) -> Vec<Message> {
    let example = json!([
        {"start": "2024-01-11"},
        {"start": "2024-01-14 15:00"},
        {"start": "2024-01-31 15:00", "end": "2024-02-14"}
    ]);
    vec![
        Message::system(format!(
            "You are a smart processor of web-scraped text. Follow these instructions:\n\
            1. Go through the text and extract information from the article, translate to English if not in English. Use plain text.\n\
            2. Use the function with the most fitting description, pass parameters as described:\n\
            Use provided or generate a header more fitting the found text.\n\
            If you encounter a descriptive text of the entity, for example a plot of a theatrical performance for an event \
            or a menu of a restaurant for a place, assign it as the text. Do not shorten it.\n\
            Create a brief which is a sum up of the text no longer than 3 sentences.\n\
            For non-static entities, if you encounter an address, assign it as address. \
            Fill in \"Brno, Czech Republic\" if the specific address is not found.\n\
            For an event, assign date(s) of the event as list of durations with fields \"start\" and optional \"end\". \
            Use the format YYYY-MM-DD for date, and format HH:MM:SS for time. For example {example}.\n\
            3. End with the function call response, the function call must be in valid JSON format.\n\
            URL is {url}."
        )),
        Message::user(format!("Here is the text to process ```{content}```")),
    ]
}

pub fn classification_messages(content: &str) -> Vec<Message> {
    vec![
        Message::system(
            "You're a function picker based on given web-scraped text. Follow these instructions:\n\
            1. Take the given text as a one whole entity.\n\
            2. Call one of the given functions, choose one with most fitting description.\n\
            3. Stop when you find the fitting function, you must call only one function.",
        ),
        Message::user(format!("Here is the text to process ```{content}```")),
    ]
}

/// 先按 URL 预分类，无法判断时让模型在 assign_* 中选择
pub async fn classify(
    resolver: &Resolver,
    limits: HistoryLimits,
    url: &str,
    content: &str,
) -> Result<RecordKind, ResolveError> {
    if let Some(kind) = preclassify_by_url(url) {
        tracing::debug!("Pre-classified {} as {}", url, kind);
        return Ok(kind);
    }
    tracing::info!("Could not pre-classify content type of {}", url);
    let mut history = MessageHistory::from_messages(limits, classification_messages(content));
    let invocation = resolver
        .call_function(&mut history, &classification_registry())
        .await?;
    invocation
        .result
        .as_str()
        .unwrap_or_default()
        .parse()
        .map_err(ResolveError::Unparseable)
}

/// 不走函数调用，直接要求返回 {"type": ...}
pub async fn classify_by_json(
    resolver: &Resolver,
    limits: HistoryLimits,
    content: &str,
) -> Result<RecordKind, ResolveError> {
    let mut history = MessageHistory::from_messages(
        limits,
        [
            Message::system(
                "You are a smart classifier of web-scraped text. Take the given text as a one whole entity \
                and classify it as one of 'place', 'event', 'administration', 'static'. \
                As the response, return only valid JSON with the type of the entity, no additional text.",
            ),
            Message::user(format!("Here is the text to process ```{content}```")),
        ],
    );
    let content_type: ContentType = resolver.resolve_model(&mut history).await?;
    Ok(content_type.kind)
}

/// 两阶段选择解析出一条记录
///
/// 每个页面都是一段新对话：history 先被重置为本页的解析消息，结束后保存的是本页的完整对话。
pub async fn parse_content(
    resolver: &Resolver,
    history: &mut MessageHistory,
    url: &str,
    content: &str,
) -> Result<CityRecord, ResolveError> {
    history.reset(parsing_messages(url, content));
    let invocation = resolver
        .select_and_call(history, &parsing_registry(url))
        .await?;
    serde_json::from_value(invocation.result).map_err(|e| ResolveError::Unparseable(e.to_string()))
}
