//! Writable 方向：事件循环写入，工作线程上的引擎阻塞读取。
//!
//! # 教案级导览
//!
//! - **Why**：宿主把上传数据交给桥后立即返回，真正的消费由引擎在工作线程上按需拉取；
//!   宿主需要在每块数据被完全消费时得到通知，才能据此向上游施加背压。
//! - **How**：循环侧的 [`WritableBridge`] 把数据块连同一次性的 [`Completion`] 放入交接队列；
//!   工作线程侧的 [`WritableEngineIo`] 用 `fill_blocking` 取数，在锁外触发被完全消费的块的完成通知。
//! - **What**：
//!   - 数据块只有在最后一个字节被复制出去后才算完成，完成回调恰好执行一次；
//!   - 结束标记的完成回调在引擎读到结束时触发，之后的读取恒为 `Eof`；
//!   - 本方向不设字节上限，背压由宿主依据完成回调自行实施。

use std::{
    fmt,
    io::{self, SeekFrom},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::{
    chunk::Chunk,
    error::{BridgeError, Direction},
    event_loop::{LoopContext, LoopThread},
    io::{ReadOutcome, SyncIo, Whence, forward_only_seek, std_seek},
    queue::HandoffQueue,
    session::{BridgeSession, StreamDescriptor, StreamId},
};

struct WritableShared {
    id: StreamId,
    queue: HandoffQueue,
    loop_thread: LoopThread,
    ended: AtomicBool,
    position: AtomicU64,
}

/// Writable 桥的事件循环侧句柄。
///
/// 析构即拆除：队列被关闭，阻塞中的引擎读取以 [`BridgeError::Closed`] 醒来，
/// 尚未消费的数据块的完成回调同样收到 `Closed`。
pub struct WritableBridge {
    shared: Arc<WritableShared>,
    context: LoopContext,
    descriptor: StreamDescriptor,
}

impl WritableBridge {
    pub(crate) fn new(session: &BridgeSession) -> Result<Self, BridgeError> {
        let descriptor = session.construct(Direction::Writable, None)?;
        let context = session.context().clone();
        let shared = Arc::new(WritableShared {
            id: descriptor.id(),
            queue: HandoffQueue::new(),
            loop_thread: context.loop_thread(),
            ended: AtomicBool::new(false),
            position: AtomicU64::new(0),
        });
        Ok(Self {
            shared,
            context,
            descriptor,
        })
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// 入队一块数据，永不阻塞；`callback` 在该块被引擎完全消费后于循环线程上执行。
    ///
    /// 空数据不入队，回调在下一轮循环时直接以 `Ok(())` 执行。
    pub fn write(
        &self,
        data: impl Into<Bytes>,
        callback: impl FnOnce(Result<(), BridgeError>) + 'static,
    ) -> Result<(), BridgeError> {
        self.context.ensure_loop_thread("writable.write")?;
        self.ensure_open()?;
        let data = data.into();
        let completion = self.context.completion(callback);
        if data.is_empty() {
            completion.complete(Ok(()));
            return Ok(());
        }
        trace!(stream = %self.shared.id, len = data.len(), "host chunk queued");
        self.shared
            .queue
            .push(Chunk::data(data).with_completion(completion))
    }

    /// 入队结束标记；`callback` 在引擎读到结束时于循环线程上执行。
    pub fn finish(
        &self,
        callback: impl FnOnce(Result<(), BridgeError>) + 'static,
    ) -> Result<(), BridgeError> {
        self.context.ensure_loop_thread("writable.finish")?;
        self.ensure_open()?;
        let completion = self.context.completion(callback);
        debug!(stream = %self.shared.id, "host finished writable stream");
        self.shared
            .queue
            .push(Chunk::end().with_completion(completion))
    }

    /// 拆除桥，可重复调用。
    pub fn close(&self) {
        let pending = self.shared.queue.close();
        if !pending.is_empty() {
            warn!(
                stream = %self.shared.id,
                pending = pending.len(),
                "writable bridge closed with unconsumed chunks"
            );
        }
    }

    /// 交给工作线程的引擎 I/O 句柄。
    pub fn engine_io(&self) -> WritableEngineIo {
        WritableEngineIo {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 已入队、尚未被引擎复制走的字节数。
    pub fn queued_bytes(&self) -> usize {
        self.shared.queue.queued_bytes()
    }

    /// 引擎是否已读到结束。
    pub fn is_ended(&self) -> bool {
        self.shared.ended.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        if self.shared.queue.is_closed() {
            return Err(BridgeError::Closed);
        }
        if self.shared.queue.end_enqueued() {
            return Err(BridgeError::WriteAfterEnd);
        }
        Ok(())
    }
}

impl Drop for WritableBridge {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for WritableBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableBridge")
            .field("stream", &self.shared.id)
            .field("queue", &self.shared.queue)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Writable 桥的工作线程侧句柄。
pub struct WritableEngineIo {
    shared: Arc<WritableShared>,
}

impl WritableEngineIo {
    pub fn stream_id(&self) -> StreamId {
        self.shared.id
    }

    /// 已交给引擎的字节数。
    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }
}

impl SyncIo for WritableEngineIo {
    /// 阻塞直到有数据或结束标记，然后尽量填满 `buf`。
    ///
    /// 只等待一次：队列中现有的数据不足以填满 `buf` 时返回已复制的部分。
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, BridgeError> {
        self.shared.loop_thread.ensure_worker("writable.read")?;
        if self.shared.ended.load(Ordering::Acquire) {
            return Ok(ReadOutcome::Eof);
        }

        let fill = self.shared.queue.fill_blocking(buf)?;
        for completion in fill.consumed {
            completion.complete(Ok(()));
        }
        self.shared
            .position
            .fetch_add(fill.copied as u64, Ordering::AcqRel);

        if fill.reached_end {
            self.shared.ended.store(true, Ordering::Release);
            debug!(stream = %self.shared.id, tail = fill.copied, "engine reached end of writable stream");
            if fill.copied == 0 {
                return Ok(ReadOutcome::Eof);
            }
        }
        trace!(stream = %self.shared.id, copied = fill.copied, "engine read");
        Ok(ReadOutcome::Data(fill.copied))
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, BridgeError> {
        forward_only_seek(self.position(), offset, whence)
    }
}

impl io::Read for WritableEngineIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(SyncIo::read(self, buf)?.bytes())
    }
}

impl io::Seek for WritableEngineIo {
    fn seek(&mut self, position: SeekFrom) -> io::Result<u64> {
        Ok(std_seek(self.position(), position)?)
    }
}

impl fmt::Debug for WritableEngineIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableEngineIo")
            .field("stream", &self.shared.id)
            .field("position", &self.position())
            .finish()
    }
}
