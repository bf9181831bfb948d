//! 答题链运行器 - 编排层
//!
//! ## 职责
//!
//! 1. **链路循环**：沿评分端点给出的下一题 URL 依次处理，直到链路
//!    正常结束或无路可走
//! 2. **单题策略**：重试预算与时间预算内退避重试，第二次尝试起强制
//!    代码执行路径
//! 3. **宽松跳题**：答错但评分端点给过下一题 URL 时视为允许跳过
//! 4. **人工兜底**：重试耗尽后可由操作者提供字面答案（需配置开启）
//! 5. **资源管理**：持有 CodeRunner（执行根目录随运行器释放）
//!
//! 每条链使用全新的运行器实例，尝试历史只在实例内部，
//! 并发链路之间互不干扰

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::infrastructure::CodeRunner;
use crate::models::{AttemptRecord, ChainState, SubmitOutcome};
use crate::orchestrator::manual;
use crate::services::synthesizer::extract_answer;
use crate::services::Submitter;
use crate::utils::logging;
use crate::workflow::{AttemptCtx, AttemptResult, QuestionFlow};

/// 一条链的最终报告
#[derive(Debug, Default)]
pub struct ChainReport {
    /// 处理过的题目数
    pub attempted: usize,
    /// 答对数
    pub correct: usize,
    /// 宽松跳过数（答错但拿到下一题 URL）
    pub skipped: usize,
    /// 链路是否正常走到终点
    pub completed: bool,
    /// 失败终止时的原因
    pub failure_reason: Option<String>,
}

/// 单题解决后的推进方式
#[derive(Debug)]
enum QuestionResolution {
    /// 推进到下一题（next_url 为 None 表示链路正常结束）
    Advance {
        next_url: Option<String>,
        correct: bool,
    },
    /// 链路无法继续
    ChainFatal(String),
}

/// 策略决策（纯函数输出，便于测试）
#[derive(Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    /// 答对，按响应推进
    AdvanceCorrect(Option<String>),
    /// 预算内重试
    Retry,
    /// 答错但允许跳过，携带下一题 URL
    SkipAdvance(String),
    /// 预算耗尽且无路可走
    Exhausted,
}

/// 答题链运行器
pub struct ChainRunner {
    config: Config,
    flow: QuestionFlow,
    runner: CodeRunner,
    submitter: Submitter,
    /// 按题目 URL 记录的尝试历史（实例状态，不跨链共享）
    attempt_history: HashMap<String, AttemptRecord>,
}

impl ChainRunner {
    /// 创建新的链运行器（分配代码执行资源）
    pub fn new(config: Config) -> Result<Self> {
        let runner = CodeRunner::new(&config)?;
        Ok(Self {
            flow: QuestionFlow::new(&config),
            submitter: Submitter::new(&config),
            runner,
            config,
            attempt_history: HashMap::new(),
        })
    }

    /// 运行一条完整的答题链
    pub async fn run_chain(&mut self, initial_url: &str) -> ChainReport {
        logging::log_chain_start(initial_url);
        let started = chrono::Local::now();

        let mut state = ChainState::new(initial_url);
        let mut report = ChainReport::default();

        while let Some(url) = state.current_url.clone() {
            logging::log_question_start(state.question_number, &url);

            match self.solve_question(&url, state.question_number).await {
                QuestionResolution::Advance { next_url, correct } => {
                    report.attempted += 1;
                    if correct {
                        report.correct += 1;
                    } else {
                        report.skipped += 1;
                        warn!("⏭️ 第 {} 题以失败告终，跳到下一题", state.question_number);
                    }

                    if next_url.is_none() {
                        info!("🎉 答题链处理完毕");
                        report.completed = true;
                    }
                    state.advance(next_url);
                }
                QuestionResolution::ChainFatal(reason) => {
                    report.attempted += 1;
                    report.failure_reason = Some(reason.clone());
                    error!("❌ 链路终止: {}", reason);
                    state.current_url = None;
                }
            }
        }

        logging::print_chain_stats(report.attempted, report.correct, report.skipped, started);
        report
    }

    /// 处理一道题：预算内重试，升级策略，宽松跳题，人工兜底
    async fn solve_question(&mut self, url: &str, question_number: usize) -> QuestionResolution {
        let mut last_known_next_url: Option<String> = None;
        let attempts_allowed = 1 + self.config.max_retries_per_question;
        let question_timeout = Duration::from_secs(self.config.question_timeout_secs);

        loop {
            let attempt = {
                let record = self
                    .attempt_history
                    .entry(url.to_string())
                    .or_default();
                record.attempt_count += 1;
                record.attempt_count
            };

            let ctx = AttemptCtx::new(question_number, attempt);
            let force_code = attempt >= self.config.escalate_after_attempt;

            let outcome = self.flow.run(&self.runner, url, &ctx, force_code).await;

            if let Some(kind) = outcome.strategy {
                if let Some(record) = self.attempt_history.get_mut(url) {
                    record.strategies_tried.push(kind);
                }
            }

            let submit_outcome = match outcome.result {
                AttemptResult::Submitted(submit_outcome) => {
                    // 答错也可能带下一题 URL，跨尝试保留这条线索
                    if let Some(next) = &submit_outcome.next_url {
                        last_known_next_url = Some(next.clone());
                    }
                    Some(submit_outcome)
                }
                AttemptResult::FetchFailed(reason) => {
                    // 链路的第一次抓取失败是唯一的链级致命错误
                    if question_number == 1 && attempt == 1 {
                        return QuestionResolution::ChainFatal(format!(
                            "首次页面抓取失败: {}",
                            reason
                        ));
                    }
                    warn!("{} ⚠️ 本次尝试抓取失败: {}", ctx, reason);
                    None
                }
                AttemptResult::ResolutionFailed(reason) => {
                    warn!("{} ⚠️ 本次尝试未产生答案: {}", ctx, reason);
                    None
                }
            };

            let elapsed = self
                .attempt_history
                .get(url)
                .map(|r| r.started_at.elapsed())
                .unwrap_or_default();

            let decision = match submit_outcome {
                Some(submit_outcome) => next_action(
                    &submit_outcome,
                    url,
                    last_known_next_url.as_deref(),
                    attempt,
                    attempts_allowed,
                    elapsed,
                    question_timeout,
                ),
                // 未走到提交的尝试按答错处理，复用同一套预算判定
                None => next_action(
                    &SubmitOutcome::incorrect("尝试未完成"),
                    url,
                    last_known_next_url.as_deref(),
                    attempt,
                    attempts_allowed,
                    elapsed,
                    question_timeout,
                ),
            };

            match decision {
                PolicyDecision::AdvanceCorrect(next_url) => {
                    info!("{} ✅ 答对", ctx);
                    return QuestionResolution::Advance {
                        next_url,
                        correct: true,
                    };
                }
                PolicyDecision::Retry => {
                    info!(
                        "{} 🔄 {} 秒后重试 (已用 {}/{} 次)",
                        ctx, self.config.retry_backoff_secs, attempt, attempts_allowed
                    );
                    sleep(Duration::from_secs(self.config.retry_backoff_secs)).await;
                }
                PolicyDecision::SkipAdvance(next_url) => {
                    warn!("{} ⏭️ 预算耗尽但已知下一题 URL，跳过本题", ctx);
                    return QuestionResolution::Advance {
                        next_url: Some(next_url),
                        correct: false,
                    };
                }
                PolicyDecision::Exhausted => {
                    if self.config.manual_fallback {
                        if let Some(resolution) = self.manual_fallback(url).await {
                            return resolution;
                        }
                    }
                    return QuestionResolution::ChainFatal(format!(
                        "第 {} 题重试耗尽且没有下一题线索",
                        question_number
                    ));
                }
            }
        }
    }

    /// 人工兜底：操作者提供字面答案与题目标识 URL，走同一条提交契约，
    /// 结果按同样的正确/跳过语义解释；没有自动重试，循环由操作者驱动
    async fn manual_fallback(&self, current_url: &str) -> Option<QuestionResolution> {
        loop {
            let input = manual::prompt_manual_answer(current_url).await?;

            let answer = extract_answer(&input.answer_text);
            let outcome = self.submitter.submit(&input.quiz_url, answer).await;

            if outcome.correct {
                info!("✅ 人工答案被接受");
                return Some(QuestionResolution::Advance {
                    next_url: outcome.next_url,
                    correct: true,
                });
            }

            if let Some(next) = outcome.next_url {
                if next != current_url {
                    warn!("⏭️ 人工答案未通过，但获得下一题 URL");
                    return Some(QuestionResolution::Advance {
                        next_url: Some(next),
                        correct: false,
                    });
                }
            }

            warn!(
                "人工答案未通过: {}",
                outcome.reason.as_deref().unwrap_or("无原因")
            );
        }
    }
}

/// 一次提交解释后的推进决策（纯函数）
///
/// 调用前须先把本次响应的 next_url 并入 `last_known_next_url`：
/// 较早尝试学到的下一题线索不会被后续失败尝试丢弃
pub fn next_action(
    outcome: &SubmitOutcome,
    current_url: &str,
    last_known_next_url: Option<&str>,
    attempts_used: usize,
    attempts_allowed: usize,
    elapsed: Duration,
    question_timeout: Duration,
) -> PolicyDecision {
    if outcome.correct {
        return PolicyDecision::AdvanceCorrect(outcome.next_url.clone());
    }

    // 时间预算只在尝试之间检查（非抢占），单次超长尝试可能越过预算
    if attempts_used < attempts_allowed && elapsed < question_timeout {
        return PolicyDecision::Retry;
    }

    if let Some(next) = last_known_next_url {
        if next != current_url {
            return PolicyDecision::SkipAdvance(next.to_string());
        }
    }

    PolicyDecision::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(correct: bool, next_url: Option<&str>) -> SubmitOutcome {
        SubmitOutcome {
            correct,
            reason: None,
            next_url: next_url.map(str::to_string),
        }
    }

    const Q1: &str = "http://host/quiz/q1";
    const Q2: &str = "http://host/quiz/q2";
    const TIMEOUT: Duration = Duration::from_secs(160);

    #[test]
    fn test_correct_advances_with_next_url() {
        let decision = next_action(
            &outcome(true, Some(Q2)),
            Q1,
            Some(Q2),
            1,
            3,
            Duration::ZERO,
            TIMEOUT,
        );
        assert_eq!(
            decision,
            PolicyDecision::AdvanceCorrect(Some(Q2.to_string()))
        );
    }

    #[test]
    fn test_correct_without_next_url_terminates_chain() {
        let decision = next_action(
            &outcome(true, None),
            Q1,
            None,
            1,
            3,
            Duration::ZERO,
            TIMEOUT,
        );
        assert_eq!(decision, PolicyDecision::AdvanceCorrect(None));
    }

    #[test]
    fn test_incorrect_within_budget_retries() {
        let decision = next_action(
            &outcome(false, None),
            Q1,
            None,
            1,
            3,
            Duration::from_secs(5),
            TIMEOUT,
        );
        assert_eq!(decision, PolicyDecision::Retry);
    }

    #[test]
    fn test_incorrect_on_final_retry_with_next_url_skips() {
        // 宽松跳题：最后一次重试仍答错，但评分端点给过下一题 URL
        let decision = next_action(
            &outcome(false, Some(Q2)),
            Q1,
            Some(Q2),
            3,
            3,
            Duration::from_secs(5),
            TIMEOUT,
        );
        assert_eq!(decision, PolicyDecision::SkipAdvance(Q2.to_string()));
    }

    #[test]
    fn test_remembered_next_url_survives_later_failure() {
        // 下一题线索来自较早的尝试，本次失败响应没有 URL
        let decision = next_action(
            &outcome(false, None),
            Q1,
            Some(Q2),
            3,
            3,
            Duration::from_secs(5),
            TIMEOUT,
        );
        assert_eq!(decision, PolicyDecision::SkipAdvance(Q2.to_string()));
    }

    #[test]
    fn test_timeout_exceeded_stops_retrying() {
        let decision = next_action(
            &outcome(false, None),
            Q1,
            None,
            1,
            3,
            Duration::from_secs(200),
            TIMEOUT,
        );
        assert_eq!(decision, PolicyDecision::Exhausted);
    }

    #[test]
    fn test_next_url_equal_to_current_does_not_skip() {
        // 指回当前题的 URL 不构成推进路径
        let decision = next_action(
            &outcome(false, Some(Q1)),
            Q1,
            Some(Q1),
            3,
            3,
            Duration::from_secs(5),
            TIMEOUT,
        );
        assert_eq!(decision, PolicyDecision::Exhausted);
    }
}
