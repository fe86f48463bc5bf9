//! 有界交接队列：两个线程之间唯一共享的可变状态。
//!
//! # 教案级导览
//!
//! - **Why**：工作线程上的同步引擎与事件循环线程之间需要一个保序、可阻塞等待的交接点。
//!   工作线程在“队列为空”（Writable 方向的消费者）或“字节数超限”（Readable 方向的生产者）时阻塞；
//!   事件循环线程只做有界时间的加锁操作，永不阻塞。
//! - **How**：一把互斥锁 + 一个条件变量守护 `VecDeque<Chunk>` 与字节计数 `queued_bytes`。
//!   条件变量只在状态自洽之后才被等待或通知。
//! - **What**：
//!   - FIFO：消费者观察到的字节顺序与入队顺序完全一致；
//!   - 至多一个结束标记，且总在逻辑末尾；结束标记被取走后，后续弹出立即得到新的结束标记而非阻塞；
//!   - `queued_bytes == 所有数据块剩余字节之和`，只在锁内读写；
//!   - `close` 之后所有等待者以 [`BridgeError::Closed`] 醒来。

use std::collections::VecDeque;

#[cfg(any(loom, spark_loom))]
use loom::sync::{Condvar, Mutex, MutexGuard};
#[cfg(not(any(loom, spark_loom)))]
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::trace;

use crate::{chunk::Chunk, error::BridgeError, event_loop::Completion};

#[derive(Debug, Default)]
struct QueueState {
    chunks: VecDeque<Chunk>,
    queued_bytes: usize,
    end_enqueued: bool,
    end_taken: bool,
    closed: bool,
}

impl QueueState {
    fn admit(&self) -> Result<(), BridgeError> {
        if self.closed {
            return Err(BridgeError::Closed);
        }
        if self.end_enqueued {
            return Err(BridgeError::WriteAfterEnd);
        }
        Ok(())
    }

    fn append(&mut self, chunk: Chunk) {
        if chunk.is_end() {
            self.end_enqueued = true;
        } else {
            self.queued_bytes += chunk.len();
        }
        self.chunks.push_back(chunk);
    }

    fn pop_front(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop_front()?;
        if chunk.is_end() {
            self.end_taken = true;
        } else {
            self.queued_bytes -= chunk.len();
        }
        Some(chunk)
    }
}

/// 一次 [`HandoffQueue::fill_blocking`] 的结果。
///
/// - `copied`：本次复制进目标缓冲区的字节数；
/// - `reached_end`：是否在本次调用中（或之前）到达结束标记；
/// - `consumed`：本次被完全消费的数据块（以及结束标记）的完成通知，调用方应在锁外触发。
#[derive(Debug, Default)]
pub struct Fill {
    pub copied: usize,
    pub reached_end: bool,
    pub consumed: Vec<Completion>,
}

/// 线程安全的字节块交接队列。
pub struct HandoffQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, QueueState>) -> MutexGuard<'a, QueueState> {
        match self.changed.wait(guard) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 追加到队尾并唤醒一个等待者，永不阻塞。
    ///
    /// 结束标记入队后再追加任何内容都会返回 [`BridgeError::WriteAfterEnd`]。
    pub fn push(&self, chunk: Chunk) -> Result<(), BridgeError> {
        let mut state = self.lock();
        state.admit()?;
        state.append(chunk);
        drop(state);
        self.changed.notify_one();
        Ok(())
    }

    /// 阻塞直到队列非空，然后弹出队首。
    ///
    /// 结束标记已被取走之后再次调用会立即返回一个新的结束标记；没有超时，
    /// 唯一的非数据唤醒来源是 [`close`](Self::close)。
    pub fn pop_blocking(&self) -> Result<Chunk, BridgeError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(BridgeError::Closed);
            }
            if let Some(chunk) = state.pop_front() {
                drop(state);
                self.changed.notify_all();
                return Ok(chunk);
            }
            if state.end_taken {
                return Ok(Chunk::end());
            }
            state = self.wait(state);
        }
    }

    /// 当 `queued_bytes >= capacity` 时阻塞，直到消费方排空到容量以下再入队。
    ///
    /// 这是 Readable 方向工作线程感受背压的唯一途径。
    pub fn push_blocking_if_full(&self, chunk: Chunk, capacity: usize) -> Result<(), BridgeError> {
        let mut state = self.lock();
        loop {
            state.admit()?;
            if state.queued_bytes < capacity {
                break;
            }
            trace!(
                queued = state.queued_bytes,
                capacity, "handoff queue full, producer parked"
            );
            state = self.wait(state);
        }
        state.append(chunk);
        drop(state);
        self.changed.notify_one();
        Ok(())
    }

    /// 非阻塞地弹出整个队首。
    pub fn try_pop(&self) -> Option<Chunk> {
        let chunk = self.lock().pop_front();
        if chunk.is_some() {
            self.changed.notify_all();
        }
        chunk
    }

    /// 非阻塞地弹出至多 `max` 字节；队首数据块更大时将其拆分，尾部原地保留。
    ///
    /// 结束标记总是整体弹出。`max == 0` 按 1 处理，保证每次调用都有进展。
    pub fn try_pop_upto(&self, max: usize) -> Option<Chunk> {
        let max = max.max(1);
        let mut state = self.lock();
        let whole = {
            let front = state.chunks.front()?;
            front.is_end() || front.len() <= max
        };
        let chunk = if whole {
            state.pop_front()?
        } else {
            let head = state.chunks.front_mut()?.split_front(max);
            state.queued_bytes -= head.len();
            head
        };
        drop(state);
        self.changed.notify_all();
        Some(chunk)
    }

    /// 阻塞直到至少有一个数据块（或结束标记）可用，然后跨越多个数据块复制至多 `dst.len()` 字节。
    ///
    /// # 契约（What）
    /// - 只等待一次：拿到数据后，队列被取空即返回已复制的部分，不会为了填满 `dst` 再次阻塞；
    /// - 遇到结束标记时弹出它并设置 `reached_end`，此前已复制的字节照常计入 `copied`；
    /// - 数据块剩余部分不足以填满时整体弹出，超出时只推进游标留在队首；
    /// - `dst` 为空时立即返回，不等待。
    pub fn fill_blocking(&self, dst: &mut [u8]) -> Result<Fill, BridgeError> {
        let mut fill = Fill::default();
        if dst.is_empty() {
            return Ok(fill);
        }

        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(BridgeError::Closed);
            }
            if !state.chunks.is_empty() || state.end_taken {
                break;
            }
            state = self.wait(state);
        }
        if state.chunks.is_empty() {
            fill.reached_end = true;
            return Ok(fill);
        }

        while fill.copied < dst.len() {
            let (copied, exhausted) = match state.chunks.front_mut() {
                None => break,
                Some(front) if front.is_end() => (0, true),
                Some(front) => {
                    let copied = front.copy_to(&mut dst[fill.copied..]);
                    (copied, front.is_empty())
                }
            };
            fill.copied += copied;
            state.queued_bytes -= copied;
            if !exhausted {
                continue;
            }
            if let Some(mut done) = state.pop_front() {
                fill.consumed.extend(done.take_completion());
                if done.is_end() {
                    fill.reached_end = true;
                    break;
                }
            }
        }
        drop(state);
        self.changed.notify_all();
        Ok(fill)
    }

    /// 关闭队列：唤醒所有等待者并返回仍在排队的数据块。
    ///
    /// 返回值由调用方在锁外丢弃；携带的完成通知会以 [`BridgeError::Closed`] 触发。
    pub fn close(&self) -> Vec<Chunk> {
        let mut state = self.lock();
        state.closed = true;
        state.queued_bytes = 0;
        let drained = state.chunks.drain(..).collect();
        drop(state);
        self.changed.notify_all();
        drained
    }

    /// 尚未被消费的数据字节数。
    pub fn queued_bytes(&self) -> usize {
        self.lock().queued_bytes
    }

    /// 排队项数量（含结束标记）。
    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().chunks.is_empty()
    }

    pub fn end_enqueued(&self) -> bool {
        self.lock().end_enqueued
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for HandoffQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandoffQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("HandoffQueue")
            .field("chunks", &state.chunks.len())
            .field("queued_bytes", &state.queued_bytes)
            .field("end_enqueued", &state.end_enqueued)
            .field("closed", &state.closed)
            .finish()
    }
}
