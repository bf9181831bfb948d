//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责链路推进和重试调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `chain_runner` - 答题链运行器
//! - 沿下一题 URL 推进整条链（ChainState 唯一修改者）
//! - 单题重试预算 / 时间预算与策略升级
//! - 宽松跳题语义（答错但带下一题 URL）
//! - 持有 CodeRunner（scratch 根目录随实例释放）
//! - 输出链路统计
//!
//! ### `manual` - 人工兜底输入
//! - 重试耗尽后的操作者交互
//!
//! ## 层次关系
//!
//! ```text
//! server (每个请求 spawn 一条链)
//!     ↓
//! chain_runner (处理 Chain / Vec<Question URL>)
//!     ↓
//! workflow::QuestionFlow (处理单次尝试)
//!     ↓
//! services (能力层：fetch / decode / strategy / synthesize / submit)
//!     ↓
//! infrastructure (基础设施：CodeRunner) + browser
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：chain_runner 管推进与重试，workflow 管单次尝试
//! 2. **实例隔离**：每条链一个全新 ChainRunner，尝试历史互不可见
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **无业务判断**：只做调度、预算与统计

pub mod chain_runner;
pub mod manual;

pub use chain_runner::{next_action, ChainReport, ChainRunner, PolicyDecision};
