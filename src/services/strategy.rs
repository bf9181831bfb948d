//! 解析策略选择 - 业务能力层
//!
//! 判定一道题走直接作答还是代码执行：综合模型自述的策略标记、
//! 响应中的代码块、以及题面中的领域关键词三路信号

use tracing::{info, warn};

use crate::models::{MaterialSet, StrategyKind};
use crate::services::llm_service::LlmService;
use crate::services::synthesizer::{extract_code_block, AnswerSynthesizer};

/// 题面中暗示需要代码执行的领域关键词
const EXECUTION_KEYWORDS: &[&str] = &[
    "visualization",
    "visualize",
    "plot",
    "chart",
    "graph",
    "machine learning",
    "regression",
    "classification",
    "clustering",
    "model",
    "predict",
    "train",
    "generate",
    "create a file",
    "create csv",
    "statistical analysis",
    "hypothesis test",
    "correlation",
    "distribution",
];

/// 一次尝试的解析策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// 模型凭上下文直接作答
    Direct,
    /// 执行生成的代码，输出即答案
    CodeExecution(String),
}

impl ResolutionStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            ResolutionStrategy::Direct => StrategyKind::Direct,
            ResolutionStrategy::CodeExecution(_) => StrategyKind::CodeExecution,
        }
    }
}

/// 策略选择服务
pub struct StrategySelector;

impl StrategySelector {
    pub fn new() -> Self {
        Self
    }

    /// 选择解析策略
    ///
    /// 模型后端不可用时退化为直接作答（StrategyFailure 不中断流程）
    pub async fn select(
        &self,
        llm: &LlmService,
        synthesizer: &AnswerSynthesizer,
        question: &str,
        materials: &MaterialSet,
    ) -> ResolutionStrategy {
        let prompt = synthesizer.build_strategy_prompt(question, materials);

        let response = match llm.send_to_llm(&prompt, None, None).await {
            Ok(response) => response,
            Err(e) => {
                warn!("策略判定调用失败，退化为直接作答: {}", e);
                return ResolutionStrategy::Direct;
            }
        };

        let strategy = decide(&response, question);
        match &strategy {
            ResolutionStrategy::Direct => info!("策略: 直接作答"),
            ResolutionStrategy::CodeExecution(code) => {
                info!("策略: 代码执行 ({} 字符)", code.len())
            }
        }
        strategy
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new()
    }
}

/// 由模型响应与题面文本判定策略（纯函数，便于测试）
///
/// 有代码执行投票但提取不出代码时退化为直接作答，绝不凭空造代码
pub fn decide(response: &str, question_text: &str) -> ResolutionStrategy {
    if !needs_code_execution(response, question_text) {
        return ResolutionStrategy::Direct;
    }

    match extract_code_block(response) {
        Some(code) => ResolutionStrategy::CodeExecution(code),
        None => ResolutionStrategy::Direct,
    }
}

/// 是否存在代码执行投票
fn needs_code_execution(response: &str, question_text: &str) -> bool {
    // 模型明确声明
    if response.to_uppercase().contains("STRATEGY: CODE_EXECUTION") {
        return true;
    }

    // 模型给出了 Python 代码块
    if response.contains("```python") || response.contains("```Python") {
        return true;
    }

    // 题面关键词 + 模型响应带代码围栏，双条件同时满足才算投票
    let lower = question_text.to_lowercase();
    if EXECUTION_KEYWORDS.iter().any(|k| lower.contains(k)) && response.contains("```") {
        return true;
    }

    false
}
