//! 解析引擎：参数修复、参数匹配、重试控制、两阶段选择与对外入口 Resolver

pub mod loop_;
pub mod matcher;
pub mod repair;
pub mod resolver;
pub mod selector;
pub mod steps;

pub use loop_::{AttemptStep, CallAttempt, RetryController, RetryPolicy};
pub use matcher::{MatchOutcome, ParameterMatcher};
pub use repair::repair;
pub use resolver::{Resolver, ResolverConfig};
pub use selector::{fill_instruction, selection_history};
pub use steps::{ChooseStep, Invocation, InvokeStep, JsonStep, TextStep, CHOOSER_NAME, CHOOSER_PARAM};
