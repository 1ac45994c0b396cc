//! 生命周期运行时实现

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::runtime::config::RuntimeConfig;
use crate::runtime::lifecycle::Lifecycle;

/// 生命周期运行时
///
/// 组件按注册顺序启动，按相反顺序关闭
pub struct LifecycleRuntime {
    name: String,
    components: Vec<Arc<dyn Lifecycle>>,
    started: usize,
    config: RuntimeConfig,
}

impl LifecycleRuntime {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            started: 0,
            config: RuntimeConfig::default(),
        }
    }

    /// 设置运行时配置
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// 注册组件
    pub fn add(mut self, component: Arc<dyn Lifecycle>) -> Self {
        info!(runtime = %self.name, component = %component.name(), "Component added to runtime");
        self.components.push(component);
        self
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name().to_string()).collect()
    }

    /// 按注册顺序启动组件
    ///
    /// 任一组件启动失败或超时，已启动的组件按相反顺序关闭，并返回错误
    pub async fn start(&mut self) -> Result<()> {
        info!(
            runtime = %self.name,
            component_count = self.components.len(),
            "Starting lifecycle runtime"
        );

        while self.started < self.components.len() {
            let component = self.components[self.started].clone();
            let started = Instant::now();
            let result = tokio::time::timeout(self.config.startup_timeout, component.initialize())
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "component did not start within {:?}",
                        self.config.startup_timeout
                    )
                })
                .and_then(|result| result);

            if let Err(e) = result {
                error!(
                    runtime = %self.name,
                    component = %component.name(),
                    error = %e,
                    "Failed to start component, closing started components"
                );
                self.shutdown().await;
                return Err(e.context(format!("failed to start component {}", component.name())));
            }

            info!(
                component = %component.name(),
                elapsed = ?started.elapsed(),
                "Component started"
            );
            self.started += 1;
        }

        info!(runtime = %self.name, "Lifecycle runtime started");
        Ok(())
    }

    /// 按启动的相反顺序关闭组件，每个组件最多等待 `shutdown_timeout`
    pub async fn shutdown(&mut self) {
        while self.started > 0 {
            self.started -= 1;
            let component = self.components[self.started].clone();
            let started = Instant::now();
            match tokio::time::timeout(self.config.shutdown_timeout, component.close()).await {
                Ok(()) => {
                    info!(
                        component = %component.name(),
                        elapsed = ?started.elapsed(),
                        "Component closed"
                    );
                }
                Err(_) => {
                    warn!(
                        component = %component.name(),
                        timeout = ?self.config.shutdown_timeout,
                        "Component close timeout, skipping"
                    );
                }
            }
        }
        info!(runtime = %self.name, "Lifecycle runtime stopped");
    }

    /// 启动所有组件，收到 `signal` 后关闭
    pub async fn run_until<F>(mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.start().await?;
        signal.await;
        info!(runtime = %self.name, "Shutdown signal received");
        self.shutdown().await;
        Ok(())
    }

    /// 启动所有组件，收到 Ctrl+C 后关闭
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await
    }
}
