//! 生命周期组件定义

use async_trait::async_trait;

/// 随应用启动 / 关闭的组件
///
/// 启动按注册顺序调用 `initialize`，关闭按相反顺序调用 `close`
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// 组件名称（用于日志）
    fn name(&self) -> &str;

    async fn initialize(&self) -> anyhow::Result<()>;

    /// 关闭组件，内部错误只记录日志
    async fn close(&self);
}
