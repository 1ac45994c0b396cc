//! 测试用的内存实现
//!
//! - [`MockBroker`]：内存 broker，可注入 poll / 连接失败，记录提交和关闭顺序
//! - [`MockFactory`]：按类型替换依赖

pub mod broker;
pub mod factory;

pub use broker::{BrokerEvent, MockBroker};
pub use factory::MockFactory;
