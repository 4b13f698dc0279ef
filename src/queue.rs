//! 绘图请求队列：单工作协程按入队顺序处理，条目之间插入随机延迟。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// 队列条目的处理器。`handle` 的错误交给 `on_error`，不会终止队列。
#[async_trait]
pub trait QueueHandler<T>: Send + Sync {
    async fn handle(&self, item: &T) -> Result<()>;

    async fn on_error(&self, _error: anyhow::Error, _item: &T) {}
}

/// 按顺序处理绘图请求，自动加入延迟。
///
/// `None` 是注入队尾的停止哨兵，保证排在 `stop()` 之前入队的条目
/// 全部先被处理。
pub struct RequestQueue<T> {
    tx: mpsc::UnboundedSender<Option<T>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Option<T>>>>,
    handler: Arc<dyn QueueHandler<T>>,
    min_delay: f64,
    max_delay: f64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> RequestQueue<T> {
    pub fn new(
        handler: Arc<dyn QueueHandler<T>>,
        min_delay: f64,
        max_delay: f64,
    ) -> Result<Self> {
        if min_delay < 0.0 || max_delay < min_delay {
            anyhow::bail!("延迟范围配置无效");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            handler,
            min_delay,
            max_delay,
            worker: Mutex::new(None),
        })
    }

    /// 追加到队尾，从不阻塞调用方。队列停止时条目会留到下次 `start()`。
    pub fn enqueue(&self, item: T) {
        let _ = self.tx.send(Some(item));
    }

    /// 启动工作协程。已有协程在跑时直接返回。
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let rx = self.rx.clone();
        let handler = self.handler.clone();
        let min_delay = self.min_delay;
        let max_delay = self.max_delay;
        *worker = Some(tokio::spawn(async move {
            worker_loop(rx, handler, min_delay, max_delay).await;
        }));
    }

    /// 注入停止哨兵并等待工作协程退出。没有活动协程时直接返回。
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(handle) = worker.take() else { return };
        let _ = self.tx.send(None);
        let _ = handle.await;
    }
}

async fn worker_loop<T>(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Option<T>>>>,
    handler: Arc<dyn QueueHandler<T>>,
    min_delay: f64,
    max_delay: f64,
) {
    let mut rx = rx.lock().await;
    while let Some(message) = rx.recv().await {
        let Some(item) = message else { break };

        if let Err(error) = handler.handle(&item).await {
            handler.on_error(error, &item).await;
        }

        if !rx.is_empty() {
            let seconds = {
                let mut rng = rand::rng();
                rng.random_range(min_delay..=max_delay)
            };
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        }
    }

    // 清空哨兵之后残留的条目，不再交给处理器
    loop {
        match rx.try_recv() {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
}
