//! 函数层：参数、描述目录、按请求构建的注册表与调用器

pub mod args;
pub mod invoker;
pub mod registry;
pub mod schema;

pub use args::ParsedArguments;
pub use invoker::Invoker;
pub use registry::{choices_json, CallError, Callable, FnCallable, FunctionRegistry};
pub use schema::{describe_model, DescriptorBuilder, FunctionDescriptor, ParamType};
