//! Readable 方向：工作线程上的引擎写入，事件循环向宿主流投递。
//!
//! # 教案级导览
//!
//! - **Why**：引擎产出的编码数据需要以宿主自己的节奏下发。宿主通过 `read(n)` 表达需求，
//!   通过 [`StreamSink::push`] 的返回值表达“暂时够了”；引擎则只在队列字节数达到上限时被阻塞。
//! - **How**：
//!   - 工作线程侧 [`ReadableEngineIo::write`] 复制数据入队（满则阻塞），然后发出可合并的唤醒；
//!   - 循环侧维护 `Idle → Flowing → Idle` 的排空状态机，排空受未满足的需求字节数约束，
//!     队首数据块大于剩余需求时被拆分，尾部原地保留；
//!   - 排空遇到结束标记时调用 [`StreamSink::end`]，进入终态 `Closed` 并触发 `finish` 回调。
//! - **What**：
//!   - `Flowing` 期间再次 `read` 是空操作，排空永不重入；
//!   - 排空过程中桥被固定（持有一份 `Rc`），宿主在回调里丢弃句柄也不会释放正在使用的状态；
//!   - 终态之后的 `read` 返回 [`BridgeError::ReadAfterEnd`]。

use std::{
    cell::{Cell, RefCell},
    fmt,
    io::{self, SeekFrom},
    rc::{Rc, Weak},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::{
    chunk::Chunk,
    error::{BridgeError, Direction},
    event_loop::{AsyncSignal, Completion, LoopContext, LoopThread, SignalRegistration},
    io::{SyncIo, Whence, forward_only_seek, std_seek},
    queue::HandoffQueue,
    session::{BridgeSession, StreamDescriptor, StreamId},
};

/// 宿主侧的可读流，接收桥投递的数据。
///
/// 所有方法都在事件循环线程上调用。
pub trait StreamSink {
    /// 投递一段数据；返回 `false` 表示宿主缓冲已满，桥应暂停投递直到下一次 `read`。
    fn push(&mut self, chunk: Bytes) -> bool;

    /// 流结束，此后不会再有 `push`。
    fn end(&mut self);
}

/// 循环侧排空状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowState {
    /// 等待需求或数据。
    Idle,
    /// 正在排空，期间的 `read` 为空操作。
    Flowing,
    /// 已投递结束或已拆除。
    Closed,
}

struct ReadableShared {
    id: StreamId,
    queue: HandoffQueue,
    capacity: usize,
    loop_thread: LoopThread,
    signal: AsyncSignal,
    position: AtomicU64,
}

struct ReadableCore {
    shared: Arc<ReadableShared>,
    context: LoopContext,
    descriptor: StreamDescriptor,
    sink: RefCell<Box<dyn StreamSink>>,
    state: Cell<FlowState>,
    demand: Cell<usize>,
    on_finished: RefCell<Option<Completion>>,
    _registration: SignalRegistration,
}

impl ReadableCore {
    fn on_signal(self: &Rc<Self>) {
        if self.state.get() == FlowState::Idle && self.demand.get() > 0 {
            self.drain();
        }
    }

    fn drain(self: &Rc<Self>) {
        let _pinned = Rc::clone(self);
        self.state.set(FlowState::Flowing);
        let mut delivered = 0usize;

        while self.state.get() == FlowState::Flowing && self.demand.get() > 0 {
            let Some(chunk) = self.shared.queue.try_pop_upto(self.demand.get()) else {
                break;
            };
            let (payload, _) = chunk.into_parts();
            let Some(bytes) = payload else {
                self.deliver_end(delivered);
                return;
            };

            delivered += bytes.len();
            self.demand.set(self.demand.get().saturating_sub(bytes.len()));
            let wants_more = self.sink.borrow_mut().push(bytes);
            if !wants_more {
                trace!(stream = %self.shared.id, "host sink is full, pausing delivery");
                self.demand.set(0);
            }
        }

        trace!(stream = %self.shared.id, delivered, "drain pass finished");
        if self.state.get() == FlowState::Flowing {
            self.state.set(FlowState::Idle);
        }
    }

    fn deliver_end(&self, delivered: usize) {
        debug!(stream = %self.shared.id, delivered, "readable stream reached end");
        self.state.set(FlowState::Closed);
        self.demand.set(0);
        self.sink.borrow_mut().end();
        let finished = self.on_finished.borrow_mut().take();
        if let Some(completion) = finished {
            completion.complete(Ok(()));
        }
    }
}

/// Readable 桥的事件循环侧句柄。
///
/// 析构即拆除：队列被关闭，阻塞在背压上的引擎写入以 [`BridgeError::Closed`] 醒来，
/// 尚未触发的 `finish` 回调同样收到 `Closed`。
pub struct ReadableBridge {
    core: Rc<ReadableCore>,
}

impl ReadableBridge {
    pub(crate) fn new(
        session: &BridgeSession,
        sink: Box<dyn StreamSink>,
        capacity: usize,
    ) -> Result<Self, BridgeError> {
        let descriptor = session.construct(Direction::Readable, Some(capacity))?;
        let context = session.context().clone();
        let core = Rc::new_cyclic(|weak: &Weak<ReadableCore>| {
            let weak = weak.clone();
            let (signal, registration) = context.async_signal(move || {
                if let Some(core) = weak.upgrade() {
                    core.on_signal();
                }
            });
            ReadableCore {
                shared: Arc::new(ReadableShared {
                    id: descriptor.id(),
                    queue: HandoffQueue::new(),
                    capacity,
                    loop_thread: context.loop_thread(),
                    signal,
                    position: AtomicU64::new(0),
                }),
                context: context.clone(),
                descriptor,
                sink: RefCell::new(sink),
                state: Cell::new(FlowState::Idle),
                demand: Cell::new(0),
                on_finished: RefCell::new(None),
                _registration: registration,
            }
        });
        Ok(Self { core })
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.core.descriptor
    }

    pub fn state(&self) -> FlowState {
        self.core.state.get()
    }

    /// 宿主请求至多 `requested` 字节，立即在当前调用栈上排空一次。
    ///
    /// `requested == 0` 按 1 处理；`Flowing` 期间为空操作。
    pub fn read(&self, requested: usize) -> Result<(), BridgeError> {
        let core = &self.core;
        core.context.ensure_loop_thread("readable.read")?;
        match core.state.get() {
            FlowState::Closed if core.shared.queue.is_closed() => Err(BridgeError::Closed),
            FlowState::Closed => Err(BridgeError::ReadAfterEnd),
            FlowState::Flowing => Ok(()),
            FlowState::Idle => {
                core.demand.set(requested.max(1));
                core.drain();
                Ok(())
            }
        }
    }

    /// 从循环侧结束流：入队结束标记（引擎已入队时跳过），
    /// `callback` 在结束被投递给宿主流之后执行。
    pub fn finish(
        &self,
        callback: impl FnOnce(Result<(), BridgeError>) + 'static,
    ) -> Result<(), BridgeError> {
        let core = &self.core;
        core.context.ensure_loop_thread("readable.finish")?;
        if core.shared.queue.is_closed() {
            return Err(BridgeError::Closed);
        }
        if core.on_finished.borrow().is_some() {
            return Err(BridgeError::WriteAfterEnd);
        }

        let completion = core.context.completion(callback);
        if core.state.get() == FlowState::Closed {
            completion.complete(Ok(()));
            return Ok(());
        }
        *core.on_finished.borrow_mut() = Some(completion);
        match core.shared.queue.push(Chunk::end()) {
            Ok(()) | Err(BridgeError::WriteAfterEnd) => {}
            Err(error) => return Err(error),
        }
        core.shared.signal.signal();
        Ok(())
    }

    /// 拆除桥，可重复调用。
    pub fn close(&self) {
        let core = &self.core;
        let pending = core.shared.queue.close();
        core.state.set(FlowState::Closed);
        core.demand.set(0);
        drop(core.on_finished.borrow_mut().take());
        if !pending.is_empty() {
            warn!(
                stream = %core.shared.id,
                pending = pending.len(),
                "readable bridge closed with undelivered chunks"
            );
        }
    }

    /// 交给工作线程的引擎 I/O 句柄。
    pub fn engine_io(&self) -> ReadableEngineIo {
        ReadableEngineIo {
            shared: Arc::clone(&self.core.shared),
        }
    }

    /// 已入队、尚未投递给宿主的字节数。
    pub fn queued_bytes(&self) -> usize {
        self.core.shared.queue.queued_bytes()
    }

    pub fn capacity(&self) -> usize {
        self.core.shared.capacity
    }
}

impl Drop for ReadableBridge {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ReadableBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableBridge")
            .field("stream", &self.core.shared.id)
            .field("state", &self.state())
            .field("demand", &self.core.demand.get())
            .field("queue", &self.core.shared.queue)
            .finish()
    }
}

/// Readable 桥的工作线程侧句柄。
pub struct ReadableEngineIo {
    shared: Arc<ReadableShared>,
}

impl ReadableEngineIo {
    pub fn stream_id(&self) -> StreamId {
        self.shared.id
    }

    /// 引擎已写入的字节数。
    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    /// 引擎侧结束流：入队结束标记并唤醒循环，不阻塞。
    pub fn finish(&self) -> Result<(), BridgeError> {
        self.shared.queue.push(Chunk::end())?;
        self.shared.signal.signal();
        debug!(stream = %self.shared.id, written = self.position(), "engine finished readable stream");
        Ok(())
    }
}

impl SyncIo for ReadableEngineIo {
    /// 复制 `buf` 入队；队列字节数已达上限时阻塞到循环侧排空为止。
    fn write(&mut self, buf: &[u8]) -> Result<usize, BridgeError> {
        self.shared.loop_thread.ensure_worker("readable.write")?;
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = Chunk::data(Bytes::copy_from_slice(buf));
        self.shared
            .queue
            .push_blocking_if_full(chunk, self.shared.capacity)?;
        self.shared
            .position
            .fetch_add(buf.len() as u64, Ordering::AcqRel);
        self.shared.signal.signal();
        trace!(stream = %self.shared.id, len = buf.len(), "engine chunk queued");
        Ok(buf.len())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, BridgeError> {
        forward_only_seek(self.position(), offset, whence)
    }
}

impl io::Write for ReadableEngineIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(SyncIo::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for ReadableEngineIo {
    fn seek(&mut self, position: SeekFrom) -> io::Result<u64> {
        Ok(std_seek(self.position(), position)?)
    }
}

impl fmt::Debug for ReadableEngineIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableEngineIo")
            .field("stream", &self.shared.id)
            .field("position", &self.position())
            .finish()
    }
}
