//! 消息校验模块
//!
//! 每种消息类型在启动时注册一次，发送前 / 接收后按声明的字段校验，
//! 一次返回所有不合法的字段。

pub mod field_validator;
pub mod schema;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BrokerError, FieldViolation, Result};

pub use field_validator::FieldValidator;
pub use schema::{Constraint, FieldSpec, Message};

/// 消息校验器注册表
#[derive(Default)]
pub struct MessageValidator {
    validators: RwLock<HashMap<TypeId, Arc<FieldValidator>>>,
}

impl MessageValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册消息类型，重复注册是 no-op
    ///
    /// schema 声明不合法时返回 [`BrokerError::Configuration`]
    pub fn register<M: Message>(&self) -> Result<()> {
        let key = TypeId::of::<M>();
        if self.validators.read().contains_key(&key) {
            return Ok(());
        }

        let mut validators = self.validators.write();
        if validators.contains_key(&key) {
            return Ok(());
        }
        let name = type_name::<M>();
        let fields = M::schema();
        schema::check_schema(name, &fields)?;
        validators.insert(key, Arc::new(FieldValidator::new(name, fields)));
        Ok(())
    }

    pub fn is_registered<M: Message>(&self) -> bool {
        self.validators.read().contains_key(&TypeId::of::<M>())
    }

    /// 校验消息
    ///
    /// 先按类型查找校验器，未注册的类型不会被序列化
    pub fn validate<M: Message>(&self, message: &M) -> Result<()> {
        let validator = self.validator_for::<M>()?;
        let value = serde_json::to_value(message)?;
        Self::check_value(&validator, &value)
    }

    /// 校验后序列化为 UTF-8 JSON
    pub fn encode<M: Message>(&self, message: &M) -> Result<Vec<u8>> {
        let validator = self.validator_for::<M>()?;
        let value = serde_json::to_value(message)?;
        Self::check_value(&validator, &value)?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// 反序列化并校验接收到的消息
    pub fn decode<M: Message>(&self, payload: &[u8]) -> Result<M> {
        let validator = self.validator_for::<M>()?;
        if payload.is_empty() {
            return Err(BrokerError::invalid_argument("message must not be null"));
        }
        let value: Value = serde_json::from_slice(payload)?;
        Self::check_value(&validator, &value)?;
        Ok(serde_json::from_value(value)?)
    }

    fn validator_for<M: Message>(&self) -> Result<Arc<FieldValidator>> {
        self.validators
            .read()
            .get(&TypeId::of::<M>())
            .cloned()
            .ok_or_else(|| BrokerError::UnregisteredType(type_name::<M>().to_string()))
    }

    fn check_value(validator: &FieldValidator, value: &Value) -> Result<()> {
        // 没有字段的类型（如 unit struct）序列化为 null，按空对象处理
        let empty = Map::new();
        let object = match value {
            Value::Null if validator.is_empty() => &empty,
            Value::Null => return Err(BrokerError::invalid_argument("message must not be null")),
            Value::Object(object) => object,
            _ => {
                return Err(BrokerError::Validation {
                    type_name: validator.type_name().to_string(),
                    violations: vec![FieldViolation::new("$", "message must be an object")],
                });
            }
        };

        let violations = validator.violations(object);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::Validation {
                type_name: validator.type_name().to_string(),
                violations,
            })
        }
    }
}
