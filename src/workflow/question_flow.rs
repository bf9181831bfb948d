//! 题目处理流程 - 流程层
//!
//! 核心职责：定义"一道题的一次尝试"的完整处理流程
//!
//! 流程顺序：
//! 1. 抓取渲染页面 → 解析题目标识 / 发现文件 → 汇集材料
//! 2. 策略选择（或被编排层强制代码执行）
//! 3. 直接作答 / 生成代码并执行（执行失败回退直接作答）
//! 4. 提交并返回提交解释结果

use tracing::{error, info, warn};

use crate::browser;
use crate::config::Config;
use crate::error::{AppError, FetchError};
use crate::infrastructure::CodeRunner;
use crate::models::{Answer, MaterialSet, StrategyKind, SubmitOutcome};
use crate::services::{
    page_parser, AnswerSynthesizer, FileFetcher, LlmService, ResolutionStrategy, StrategySelector,
    Submitter,
};
use crate::utils::logging::truncate_text;
use crate::workflow::question_ctx::{AttemptCtx, QuestionContext};

/// 一次尝试的结局
#[derive(Debug)]
pub enum AttemptResult {
    /// 已提交，附带评分端点的解释结果
    Submitted(SubmitOutcome),
    /// 页面抓取失败（链路首次抓取失败时由编排层终止整条链）
    FetchFailed(String),
    /// 答案解析失败（代码没生成出来 / 模型没给出答案），未提交
    ResolutionFailed(String),
}

/// 一次尝试的完整报告
#[derive(Debug)]
pub struct AttemptOutcome {
    /// 本次尝试实际使用的策略（未走到作答阶段时为 None）
    pub strategy: Option<StrategyKind>,
    pub result: AttemptResult,
}

impl AttemptOutcome {
    fn without_strategy(result: AttemptResult) -> Self {
        Self {
            strategy: None,
            result,
        }
    }
}

/// 题目处理流程
///
/// - 编排一次尝试的完整步骤
/// - 不持有 scratch 目录资源（CodeRunner 由编排层传入）
/// - 不做重试决策
pub struct QuestionFlow {
    config: Config,
    file_fetcher: FileFetcher,
    llm_service: LlmService,
    synthesizer: AnswerSynthesizer,
    selector: StrategySelector,
    submitter: Submitter,
}

impl QuestionFlow {
    /// 创建新的题目处理流程
    pub fn new(config: &Config) -> Self {
        Self {
            file_fetcher: FileFetcher::new(),
            llm_service: LlmService::new(config),
            synthesizer: AnswerSynthesizer::new(config),
            selector: StrategySelector::new(),
            submitter: Submitter::new(config),
            config: config.clone(),
        }
    }

    /// 执行一次尝试
    ///
    /// # 参数
    /// - `runner`: 代码执行器（编排层持有）
    /// - `url`: 当前题目的抓取 URL（每次尝试重新抓取）
    /// - `ctx`: 尝试上下文
    /// - `force_code`: 重试升级时绕过策略选择，直接走代码生成
    pub async fn run(
        &self,
        runner: &CodeRunner,
        url: &str,
        ctx: &AttemptCtx,
        force_code: bool,
    ) -> AttemptOutcome {
        // ========== 阶段 1: 抓取 ==========
        let question_ctx = match self.fetch_question(url).await {
            Ok(question_ctx) => question_ctx,
            Err(reason) => {
                error!("{} ❌ 页面抓取失败: {}", ctx, reason);
                return AttemptOutcome::without_strategy(AttemptResult::FetchFailed(reason));
            }
        };

        info!(
            "{} 页面抓取完成: {} 字符, {} 项材料",
            ctx,
            question_ctx.raw_page_text.len(),
            question_ctx.materials.len()
        );

        // ========== 阶段 2: 策略选择 ==========
        let strategy = if force_code {
            // 直接作答已经失败过，强制计算路径
            info!("{} ⚙️ 升级策略: 强制代码执行", ctx);
            match self
                .synthesizer
                .generate_code(&self.llm_service, &question_ctx.raw_page_text, &question_ctx.materials)
                .await
            {
                Ok(Some(code)) => ResolutionStrategy::CodeExecution(code),
                Ok(None) => {
                    warn!("{} ⚠️ 代码生成失败（无代码块）", ctx);
                    return AttemptOutcome::without_strategy(AttemptResult::ResolutionFailed(
                        "代码生成未产生代码块".to_string(),
                    ));
                }
                Err(e) => {
                    warn!("{} ⚠️ 代码生成调用失败: {}", ctx, e);
                    return AttemptOutcome::without_strategy(AttemptResult::ResolutionFailed(
                        format!("代码生成调用失败: {}", e),
                    ));
                }
            }
        } else {
            self.selector
                .select(
                    &self.llm_service,
                    &self.synthesizer,
                    &question_ctx.raw_page_text,
                    &question_ctx.materials,
                )
                .await
        };

        let strategy_kind = strategy.kind();

        // ========== 阶段 3: 作答 ==========
        let answer = match self.resolve_answer(runner, &question_ctx, strategy, ctx).await {
            Some(answer) => answer,
            None => {
                return AttemptOutcome {
                    strategy: Some(strategy_kind),
                    result: AttemptResult::ResolutionFailed("未能产生答案".to_string()),
                };
            }
        };

        info!("{} 💡 生成答案: {}", ctx, answer.preview());

        // ========== 阶段 4: 提交 ==========
        let outcome = self
            .submitter
            .submit(&question_ctx.quiz_identifier, answer)
            .await;

        AttemptOutcome {
            strategy: Some(strategy_kind),
            result: AttemptResult::Submitted(outcome),
        }
    }

    /// 抓取页面并构建题目上下文
    async fn fetch_question(&self, url: &str) -> Result<QuestionContext, String> {
        let page = browser::fetch_rendered_page(&self.config, url)
            .await
            .map_err(|e| e.to_string())?;

        let raw_page_text = page.combined_content();
        if page.body_text.trim().is_empty() && page.html.trim().is_empty() {
            let err = AppError::Fetch(FetchError::EmptyPage {
                url: url.to_string(),
            });
            return Err(err.to_string());
        }

        let quiz_identifier = page_parser::extract_quiz_identifier(&raw_page_text, url);
        let file_urls = page_parser::discover_file_urls(&raw_page_text, url);

        let materials = self
            .file_fetcher
            .collect_materials(&file_urls, &page.images, url)
            .await;

        Ok(QuestionContext {
            raw_page_text,
            html: page.html,
            submit_endpoint: self.config.submit_endpoint.clone(),
            quiz_identifier,
            materials,
        })
    }

    /// 按策略产生答案
    ///
    /// 代码执行失败时在本次尝试内回退到直接作答
    async fn resolve_answer(
        &self,
        runner: &CodeRunner,
        question_ctx: &QuestionContext,
        strategy: ResolutionStrategy,
        ctx: &AttemptCtx,
    ) -> Option<Answer> {
        match strategy {
            ResolutionStrategy::CodeExecution(code) => {
                info!(
                    "{} 生成的代码:\n{}\n{}\n{}",
                    ctx,
                    "=".repeat(60),
                    code,
                    "=".repeat(60)
                );

                let result = runner.run(&code, &question_ctx.materials).await;

                if result.succeeded {
                    return result.value;
                }

                warn!(
                    "{} ⚠️ 代码执行失败: {}，回退到直接作答",
                    ctx,
                    truncate_text(result.error_message.as_deref().unwrap_or("未知原因"), 300)
                );

                self.answer_directly(&question_ctx.raw_page_text, &question_ctx.materials, ctx)
                    .await
            }
            ResolutionStrategy::Direct => {
                self.answer_directly(&question_ctx.raw_page_text, &question_ctx.materials, ctx)
                    .await
            }
        }
    }

    async fn answer_directly(
        &self,
        question: &str,
        materials: &MaterialSet,
        ctx: &AttemptCtx,
    ) -> Option<Answer> {
        match self
            .synthesizer
            .answer_directly(&self.llm_service, question, materials)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!("{} ⚠️ 直接作答调用失败: {}", ctx, e);
                None
            }
        }
    }
}
