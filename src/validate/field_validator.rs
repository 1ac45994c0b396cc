//! 按字段校验序列化后的消息

use serde_json::{Map, Value};

use super::schema::{Constraint, FieldSpec};
use crate::error::FieldViolation;

/// 由 schema 编译出的字段校验器
#[derive(Debug, Clone)]
pub struct FieldValidator {
    type_name: String,
    fields: Vec<FieldSpec>,
}

impl FieldValidator {
    pub fn new(type_name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// 没有声明任何字段
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 返回所有不合法的字段，空表示通过
    pub fn violations(&self, object: &Map<String, Value>) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        violations.push(FieldViolation::new(&field.name, "field must not be null"));
                    }
                }
                Some(value) => {
                    for constraint in &field.constraints {
                        if let Some(message) = check_constraint(constraint, value) {
                            violations.push(FieldViolation::new(&field.name, message));
                        }
                    }
                }
            }
        }

        violations
    }
}

fn check_constraint(constraint: &Constraint, value: &Value) -> Option<String> {
    match constraint {
        Constraint::NotBlank => match value {
            Value::String(text) if text.trim().is_empty() => Some("field must not be blank".to_string()),
            _ => None,
        },
        Constraint::Length { min, max } => {
            let length = match value {
                Value::String(text) => text.chars().count(),
                Value::Array(items) => items.len(),
                _ => return None,
            };
            if min.is_some_and(|min| length < min) || max.is_some_and(|max| length > max) {
                Some(format!(
                    "length must be within [{}, {}], length={}",
                    min.map_or("-".to_string(), |v| v.to_string()),
                    max.map_or("-".to_string(), |v| v.to_string()),
                    length
                ))
            } else {
                None
            }
        }
        Constraint::Range { min, max } => {
            let number = value.as_f64()?;
            if min.is_some_and(|min| number < min) || max.is_some_and(|max| number > max) {
                Some(format!(
                    "value must be within [{}, {}], value={}",
                    min.map_or("-".to_string(), |v| v.to_string()),
                    max.map_or("-".to_string(), |v| v.to_string()),
                    number
                ))
            } else {
                None
            }
        }
    }
}
