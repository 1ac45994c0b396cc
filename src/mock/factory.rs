//! 按类型替换依赖的 mock 工厂

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::broker::MockBroker;
use crate::config::KafkaConfig;
use crate::kafka::Kafka;

type Constructor = Box<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// 类型 → 构造函数的注册表
///
/// 已注册的类型返回注册的 mock 实例，未注册的类型退回到 `Default`。
#[derive(Default)]
pub struct MockFactory {
    constructors: HashMap<TypeId, Constructor>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预注册 [`Kafka`]：每次创建都使用新的 [`MockBroker`]
    pub fn standard() -> Self {
        Self::new().register(|| {
            Kafka::new(
                KafkaConfig::named("mock").with_uri("mock:9092"),
                Arc::new(MockBroker::new()),
            )
        })
    }

    /// 注册类型的构造函数，重复注册时覆盖
    pub fn register<T, F>(mut self, constructor: F) -> Self
    where
        T: Any + Send,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.constructors
            .insert(TypeId::of::<T>(), Box::new(move || Box::new(constructor())));
        self
    }

    pub fn is_registered<T: Any>(&self) -> bool {
        self.constructors.contains_key(&TypeId::of::<T>())
    }

    /// 创建已注册类型的实例
    pub fn try_create<T: Any>(&self) -> Option<T> {
        let constructor = self.constructors.get(&TypeId::of::<T>())?;
        constructor().downcast::<T>().ok().map(|instance| *instance)
    }

    /// 创建实例，未注册的类型使用 `T::default()`
    pub fn create<T: Any + Default>(&self) -> T {
        self.try_create::<T>().unwrap_or_else(|| {
            debug!(type_name = type_name::<T>(), "No mock registered, using default instance");
            T::default()
        })
    }
}
