//! 基础设施层（Infrastructure Layer）
//!
//! 持有稀缺资源，只向上暴露能力：
//! - `code_runner` - 持有执行根目录，暴露"执行生成代码"能力

pub mod code_runner;

pub use code_runner::{CodeRunner, ExecutionResult};
