//! 提交与链路状态数据结构

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::models::answer::Answer;

/// 发往评分端点的提交载荷
#[derive(Debug, Clone, Serialize)]
pub struct SubmitPayload {
    pub email: String,
    pub secret: String,
    /// 题目标识 URL（从页面指令解析，未必等于抓取 URL）
    pub url: String,
    pub answer: Answer,
}

/// 评分端点的响应
///
/// `url` 字段即使在答错时也可能出现，指向下一题
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub correct: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// 一次提交的解释结果（HTTP 层错误也归一化到这里）
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub correct: bool,
    pub reason: Option<String>,
    pub next_url: Option<String>,
}

impl SubmitOutcome {
    /// 非正确结果的便捷构造
    pub fn incorrect(reason: impl Into<String>) -> Self {
        Self {
            correct: false,
            reason: Some(reason.into()),
            next_url: None,
        }
    }
}

impl From<SubmitResponse> for SubmitOutcome {
    fn from(resp: SubmitResponse) -> Self {
        Self {
            correct: resp.correct,
            reason: resp.reason,
            next_url: resp.url,
        }
    }
}

/// 解析策略种类（用于尝试历史记录）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Direct,
    CodeExecution,
}

/// 单题尝试记录
///
/// 以题目 URL 为键存放在编排器实例内，链路推进后即丢弃，不跨进程持久化
#[derive(Debug)]
pub struct AttemptRecord {
    pub attempt_count: usize,
    pub strategies_tried: Vec<StrategyKind>,
    pub started_at: Instant,
}

impl AttemptRecord {
    pub fn new() -> Self {
        Self {
            attempt_count: 0,
            strategies_tried: Vec::new(),
            started_at: Instant::now(),
        }
    }
}

impl Default for AttemptRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// 链路推进状态，仅由链路运行器修改
#[derive(Debug, Clone)]
pub struct ChainState {
    /// 当前题目 URL；None 表示链路正常结束
    pub current_url: Option<String>,
    /// 题目序号（从 1 开始）
    pub question_number: usize,
}

impl ChainState {
    pub fn new(initial_url: impl Into<String>) -> Self {
        Self {
            current_url: Some(initial_url.into()),
            question_number: 1,
        }
    }

    /// 推进到下一题
    pub fn advance(&mut self, next_url: Option<String>) {
        self.current_url = next_url;
        self.question_number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_response_url_survives_incorrect() {
        let resp: SubmitResponse =
            serde_json::from_value(json!({"correct": false, "url": "http://h/q2"})).unwrap();
        let outcome = SubmitOutcome::from(resp);
        assert!(!outcome.correct);
        assert_eq!(outcome.next_url.as_deref(), Some("http://h/q2"));
    }

    #[test]
    fn test_chain_state_advance() {
        let mut state = ChainState::new("http://h/q1");
        state.advance(Some("http://h/q2".to_string()));
        assert_eq!(state.current_url.as_deref(), Some("http://h/q2"));
        assert_eq!(state.question_number, 2);

        state.advance(None);
        assert!(state.current_url.is_none());
    }
}
