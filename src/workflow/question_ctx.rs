//! 题目处理上下文
//!
//! 封装"我正在处理第几题的第几次尝试"以及单次抓取得到的页面快照

use std::fmt::Display;

use crate::models::MaterialSet;

/// 尝试上下文（仅用于日志显示）
#[derive(Debug, Clone)]
pub struct AttemptCtx {
    /// 题目序号（从 1 开始）
    pub question_number: usize,

    /// 本题第几次尝试（从 1 开始）
    pub attempt: usize,
}

impl AttemptCtx {
    pub fn new(question_number: usize, attempt: usize) -> Self {
        Self {
            question_number,
            attempt,
        }
    }
}

impl Display for AttemptCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[题 {} 尝试 {}]", self.question_number, self.attempt)
    }
}

/// 题目上下文
///
/// 单次抓取构建一次，之后只读
#[derive(Debug, Clone)]
pub struct QuestionContext {
    /// 渲染后的页面文本（正文 + HTML 拼接）
    pub raw_page_text: String,

    /// 原始 HTML
    pub html: String,

    /// 提交端点（固定配置常量）
    pub submit_endpoint: String,

    /// 题目标识 URL（从页面指令解析，缺失时等于抓取 URL）
    pub quiz_identifier: String,

    /// 本题的全部文件材料
    pub materials: MaterialSet,
}
