//! 任务调度：能力调用并发池 + 后台任务
//!
//! 能力调用使用 Semaphore 限制并发；画像抽取、资源释放等后台任务挂在 TaskTracker 上，
//! 失败只记日志，不影响前台轮次。

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

/// 任务调度器
pub struct TaskScheduler {
    /// 能力调用并发限制（默认 3）
    capability_semaphore: Arc<Semaphore>,
    background: TaskTracker,
}

impl TaskScheduler {
    pub fn new(max_concurrent_capabilities: usize) -> Self {
        Self {
            capability_semaphore: Arc::new(Semaphore::new(max_concurrent_capabilities.max(1))),
            background: TaskTracker::new(),
        }
    }

    /// 获取能力调用许可；信号量从不关闭，None 时调用方直接执行
    pub async fn acquire_capability(&self) -> Option<OwnedSemaphorePermit> {
        self.capability_semaphore.clone().acquire_owned().await.ok()
    }

    /// 启动后台任务；返回 Err 时以 warn 记录，不向外传播
    pub fn spawn_background<F, E>(&self, label: &'static str, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.background.spawn(async move {
            if let Err(e) = fut.await {
                tracing::warn!(task = label, error = %e, "background task failed");
            }
        });
    }

    /// 尚未结束的后台任务数
    pub fn background_len(&self) -> usize {
        self.background.len()
    }

    /// 等待当前所有后台任务结束（退出前、测试中使用）
    pub async fn wait_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
