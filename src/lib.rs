//! # Quiz Chain Solver
//!
//! 一个用于自动求解数据分析答题链的 Rust 服务
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `CodeRunner` - 唯一的 scratch 目录 owner，提供执行生成代码的能力
//! - `browser/` - 无头浏览器抓取渲染页面
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个题目
//! - `file_decoder` / `FileFetcher` - 文件下载与材料归一化
//! - `page_parser` - 题目标识与文件 URL 启发式提取
//! - `LlmService` - 模型调用能力（含视觉输入）
//! - `AnswerSynthesizer` - 提示词构建与答案/代码提取
//! - `StrategySelector` - 直接作答 vs 代码执行判定
//! - `Submitter` - 答案提交与响应解释
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一道题的一次尝试"的完整处理流程
//! - `QuestionContext` - 单次抓取的页面快照（只读）
//! - `QuestionFlow` - 流程编排（fetch → strategy → answer → submit）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/chain_runner` - 链路推进、重试预算、宽松跳题
//! - `orchestrator/manual` - 人工兜底输入
//! - `server` - 入站 HTTP 服务，每个请求 spawn 一条后台链
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{CodeRunner, ExecutionResult};
pub use models::{Answer, ChainState, FileMaterial, MaterialSet};
pub use orchestrator::{ChainReport, ChainRunner};
pub use services::ResolutionStrategy;
pub use workflow::{QuestionContext, QuestionFlow};
