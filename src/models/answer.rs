//! 答案类型
//!
//! 提交边界上的显式标签联合，序列化时不带标签：
//! 数字不加引号，data-URI 作为字符串，与评分端点的 JSON 约定一致

use serde::Serialize;
use serde_json::Value as JsonValue;

/// 一道题的最终答案
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Answer {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// 普通文本答案
    Text(String),
    /// `data:<mime>;base64,...` 形式的生成产物
    DataUri(String),
    /// 任意 JSON 值（对象 / 数组）
    Json(JsonValue),
}

impl Answer {
    /// 从执行结果的 JSON 值还原答案
    ///
    /// 代码执行路径的 `result` 字段已经是 JSON 兼容值，按形状归类
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Bool(b) => Answer::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Answer::Int(i)
                } else {
                    Answer::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => {
                if s.starts_with("data:") {
                    Answer::DataUri(s)
                } else {
                    Answer::Text(s)
                }
            }
            other => Answer::Json(other),
        }
    }

    /// 转为提交载荷中的 JSON 值
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// 日志用预览（长答案截断）
    pub fn preview(&self) -> String {
        let rendered = match self {
            Answer::DataUri(uri) => uri.clone(),
            other => other.to_json().to_string(),
        };
        if rendered.chars().count() > 100 {
            rendered.chars().take(100).collect::<String>() + "..."
        } else {
            rendered
        }
    }
}
