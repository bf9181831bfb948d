//! 流程层（Workflow Layer）
//!
//! 定义"一道题的一次尝试"的完整处理流程；不做重试决策，不持有资源

pub mod question_ctx;
pub mod question_flow;

pub use question_ctx::{AttemptCtx, QuestionContext};
pub use question_flow::{AttemptOutcome, AttemptResult, QuestionFlow};
