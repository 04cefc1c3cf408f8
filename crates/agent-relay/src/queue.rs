//! 入站队列与消息生产者。
//!
//! 连接侧把用户消息追加到 [`InboundQueue`]，Agent 运行时通过
//! [`MessageProducer`] 按 FIFO 顺序逐条拉取。生产者是无限序列：
//! 队列为空时挂起等待（被新消息唤醒，或在固定间隔后重新检查），
//! 只有收到外部停止信号后才返回 `None`。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::protocol::SdkUserMessage;

/// 待投递给 Agent 运行时的消息队列，无界、严格 FIFO，进程内共享。
#[derive(Debug, Default)]
pub struct InboundQueue {
    pending: Mutex<VecDeque<SdkUserMessage>>,
    notify: Notify,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加到队尾并唤醒等待中的生产者。
    pub fn enqueue(&self, message: SdkUserMessage) {
        let depth = {
            let mut pending = self.lock();
            pending.push_back(message);
            pending.len()
        };
        debug!(depth, "message enqueued");
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn pop(&self) -> Option<SdkUserMessage> {
        self.lock().pop_front()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SdkUserMessage>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 生产者状态机。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// 队列为空，挂起等待。
    Waiting,
    /// 刚交出一条消息。
    Yielding,
    /// 已收到停止信号，不再产出。
    Stopped,
}

/// 从 [`InboundQueue`] 拉取消息的无限序列。
#[derive(Debug)]
pub struct MessageProducer {
    queue: Arc<InboundQueue>,
    idle_interval: Duration,
    stop: CancellationToken,
    state: ProducerState,
}

impl MessageProducer {
    pub fn new(queue: Arc<InboundQueue>, idle_interval: Duration) -> Self {
        Self {
            queue,
            idle_interval,
            stop: CancellationToken::new(),
            state: ProducerState::Waiting,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// 供会话在输出流结束时放弃该生产者。
    pub fn stop_handle(&self) -> ProducerStopHandle {
        ProducerStopHandle {
            token: self.stop.clone(),
        }
    }

    /// 取出下一条消息。
    ///
    /// 队列非空时立即返回队首；为空时挂起，直到有新消息入队或空闲间隔到期后重试。
    /// 停止之后返回 `None`，未取走的消息保留在队列中。
    pub async fn next(&mut self) -> Option<SdkUserMessage> {
        loop {
            if self.stop.is_cancelled() {
                self.state = ProducerState::Stopped;
                return None;
            }

            if let Some(message) = self.queue.pop() {
                self.state = ProducerState::Yielding;
                return Some(message);
            }

            self.state = ProducerState::Waiting;
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {}
                _ = self.queue.notify.notified() => {}
                _ = tokio::time::sleep(self.idle_interval) => {}
            }
        }
    }
}

/// 生产者的外部停止信号。
#[derive(Debug, Clone)]
pub struct ProducerStopHandle {
    token: CancellationToken,
}

impl ProducerStopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}
