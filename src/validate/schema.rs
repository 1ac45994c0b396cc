//! 消息 schema 声明
//!
//! 消息类型通过 [`Message::schema`] 声明每个字段的线上名称和约束，
//! 注册时会检查声明本身是否合法。

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;

use crate::error::{BrokerError, Result};

/// 可以通过 broker 发送/接收的消息类型
///
/// # 示例
/// ```rust
/// use flare_broker_client::validate::{FieldSpec, Message};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct UserCreated {
///     #[serde(rename = "user_id")]
///     id: String,
///     age: Option<i32>,
/// }
///
/// impl Message for UserCreated {
///     fn schema() -> Vec<FieldSpec> {
///         vec![
///             FieldSpec::named("user_id").required().not_blank(),
///             FieldSpec::named("age").range(Some(0.0), Some(200.0)),
///         ]
///     }
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 字段声明
    fn schema() -> Vec<FieldSpec>;
}

/// 字段约束
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// 字符串去掉首尾空白后不能为空
    NotBlank,
    /// 字符串字符数 / 数组元素数的范围
    Length { min: Option<usize>, max: Option<usize> },
    /// 数值范围（闭区间）
    Range { min: Option<f64>, max: Option<f64> },
}

/// 单个字段的声明
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// 线上名称（序列化后 JSON 的 key）
    pub name: String,
    pub required: bool,
    pub constraints: Vec<Constraint>,
}

impl FieldSpec {
    /// 声明一个字段
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            constraints: Vec::new(),
        }
    }

    /// 字段不能缺失或为 null
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn not_blank(mut self) -> Self {
        self.constraints.push(Constraint::NotBlank);
        self
    }

    #[must_use]
    pub fn length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.constraints.push(Constraint::Length { min, max });
        self
    }

    #[must_use]
    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.constraints.push(Constraint::Range { min, max });
        self
    }
}

/// 检查消息类型的 schema 声明
///
/// 声明错误属于启动期配置错误，返回 [`BrokerError::Configuration`]
pub(crate) fn check_schema(type_name: &str, fields: &[FieldSpec]) -> Result<()> {
    let mut names = HashSet::with_capacity(fields.len());

    for field in fields {
        if field.name.trim().is_empty() {
            return Err(BrokerError::configuration(format!(
                "message field must have a name, type={}",
                type_name
            )));
        }
        if field.name.chars().any(char::is_whitespace) {
            return Err(BrokerError::configuration(format!(
                "message field name must not contain whitespace, type={}, field={}",
                type_name, field.name
            )));
        }
        if !names.insert(field.name.as_str()) {
            return Err(BrokerError::configuration(format!(
                "message field name is duplicated, type={}, field={}",
                type_name, field.name
            )));
        }

        for constraint in &field.constraints {
            match constraint {
                Constraint::Length { min: Some(min), max: Some(max) } if min > max => {
                    return Err(BrokerError::configuration(format!(
                        "length min must not be greater than max, type={}, field={}",
                        type_name, field.name
                    )));
                }
                Constraint::Range { min: Some(min), max: Some(max) } if min > max => {
                    return Err(BrokerError::configuration(format!(
                        "range min must not be greater than max, type={}, field={}",
                        type_name, field.name
                    )));
                }
                _ => {}
            }
        }
    }

    Ok(())
}
