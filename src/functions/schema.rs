//! 函数描述目录：名称、参数列表与 JSON Schema
//!
//! 两种来源，均在注册时一次性生成、之后不可变：
//! - 显式 builder：逐个声明参数名与类型（未标注时默认 string）
//! - schemars：从 `#[derive(JsonSchema)]` 的结构体推导（用于"返回符合此 schema 的 JSON"）
//!
//! 生成失败时返回空描述（sentinel），调用方据此跳过该函数，不向模型公布。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::{json, Map, Value};

/// 参数的 JSON 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    fn from_schema(schema: &Value) -> Self {
        match schema.get("type").and_then(Value::as_str) {
            Some("integer") => ParamType::Integer,
            Some("number") => ParamType::Number,
            Some("boolean") => ParamType::Boolean,
            Some("array") => ParamType::Array,
            Some("object") => ParamType::Object,
            _ => ParamType::String,
        }
    }
}

/// 函数描述：name / 有序必需参数 / 可选参数 / description / JSON Schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionDescriptor {
    pub name: String,
    /// 必需参数，按声明顺序
    pub parameters: Vec<String>,
    /// 可选参数（出现时照常传递，不视为多余）
    pub optional: Vec<String>,
    pub description: String,
    pub json_schema: Value,
}

impl FunctionDescriptor {
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
        }
    }

    /// 空描述：表示"当前无法向模型公布"
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    pub fn has_parameters(&self) -> bool {
        !self.parameters.is_empty() || !self.optional.is_empty()
    }

    /// 请求体 functions 字段中的一项
    pub fn to_function_schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.json_schema,
        })
    }

    /// 第二阶段配置消息中的参数模板：{参数名: "类型 - 描述"}
    pub fn parameter_template(&self) -> Value {
        let mut template = Map::new();
        let properties = self.json_schema.get("properties").and_then(Value::as_object);
        for name in self.parameters.iter().chain(self.optional.iter()) {
            let prop = properties.and_then(|p| p.get(name));
            let ty = prop.map(ParamType::from_schema).unwrap_or_default();
            let text = match prop.and_then(|p| p.get("description")).and_then(Value::as_str) {
                Some(d) => format!("{} - {}", ty.as_str(), d),
                None => ty.as_str().to_string(),
            };
            template.insert(name.clone(), Value::String(text));
        }
        Value::Object(template)
    }
}

struct ParamSpec {
    name: String,
    schema: Value,
    required: bool,
}

/// 显式 schema 注册（取代运行时签名反射）
pub struct DescriptorBuilder {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
}

impl DescriptorBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn param(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.push(name.into(), json!({ "type": ty.as_str() }), true)
    }

    pub fn param_described(
        self,
        name: impl Into<String>,
        ty: ParamType,
        description: impl Into<String>,
    ) -> Self {
        let schema = json!({ "type": ty.as_str(), "description": description.into() });
        self.push(name.into(), schema, true)
    }

    /// 取值限定在给定集合内的字符串参数
    pub fn param_enum(self, name: impl Into<String>, values: &[String]) -> Self {
        self.push(name.into(), json!({ "type": "string", "enum": values }), true)
    }

    /// 自定义子 schema（如日期区间数组）
    pub fn param_schema(self, name: impl Into<String>, schema: Value) -> Self {
        self.push(name.into(), schema, true)
    }

    pub fn optional(self, name: impl Into<String>, ty: ParamType) -> Self {
        self.push(name.into(), json!({ "type": ty.as_str() }), false)
    }

    fn push(mut self, name: String, schema: Value, required: bool) -> Self {
        self.params.push(ParamSpec {
            name,
            schema,
            required,
        });
        self
    }

    pub fn build(self) -> FunctionDescriptor {
        if !is_identifier(&self.name) {
            tracing::warn!("Cannot describe function with invalid name '{}'", self.name);
            return FunctionDescriptor::empty();
        }

        let mut properties = Map::new();
        let mut parameters = Vec::new();
        let mut optional = Vec::new();
        for p in self.params {
            if !is_identifier(&p.name) || properties.contains_key(&p.name) {
                tracing::warn!("Cannot describe {}: bad or duplicate parameter '{}'", self.name, p.name);
                return FunctionDescriptor::empty();
            }
            if p.required {
                parameters.push(p.name.clone());
            } else {
                optional.push(p.name.clone());
            }
            properties.insert(p.name, p.schema);
        }

        FunctionDescriptor {
            json_schema: json!({
                "type": "object",
                "properties": properties,
                "required": parameters,
            }),
            name: self.name,
            parameters,
            optional,
            description: self.description,
        }
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// 从 schemars 推导的结构体 schema 生成描述；名称取结构体名，description 取文档注释
pub fn describe_model<T: JsonSchema>() -> FunctionDescriptor {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let root = settings.into_generator().into_root_schema_for::<T>();
    match serde_json::to_value(&root) {
        Ok(value) => descriptor_from_schema(value),
        Err(e) => {
            tracing::warn!("Cannot describe {}: {}", T::schema_name(), e);
            FunctionDescriptor::empty()
        }
    }
}

fn descriptor_from_schema(mut schema: Value) -> FunctionDescriptor {
    let Some(obj) = schema.as_object_mut() else {
        return FunctionDescriptor::empty();
    };
    let name = obj
        .remove("title")
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let Some(properties) = obj.get("properties").and_then(Value::as_object) else {
        tracing::warn!("Cannot describe {}: schema has no properties", name);
        return FunctionDescriptor::empty();
    };
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let (parameters, optional): (Vec<String>, Vec<String>) = properties
        .keys()
        .cloned()
        .partition(|k| required.contains(&k.as_str()));

    if !is_identifier(&name) {
        return FunctionDescriptor::empty();
    }
    FunctionDescriptor {
        name,
        parameters,
        optional,
        description,
        json_schema: schema,
    }
}
