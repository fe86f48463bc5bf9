//! 事件循环侧的执行模型与跨线程投递原语。
//!
//! # 教案级导览
//!
//! - **Why**：宿主回调只允许在事件循环线程上执行；工作线程不能直接调用它们，只能通过一个
//!   非阻塞、线程安全的投递原语请求“下一轮循环时在循环线程上执行”。本模块就是这一唯一的
//!   跨线程调用面（除受锁保护的交接队列之外）。
//! - **How**：
//!   - [`EventLoop`] 持有 `tokio::sync::mpsc` 无界通道的接收端，在循环线程上逐条分发消息；
//!   - [`Completion`] 是一次性的完成通知：`Send` 的令牌 + 注册在循环线程上的回调（可为 `!Send`），
//!     未触发就被丢弃时以 [`BridgeError::Closed`] 触发，保证回调恰好执行一次；
//!   - [`AsyncSignal`] 是可合并的唤醒：在上一次唤醒被分发之前重复调用只会投递一条消息。
//! - **What**：循环线程本身永不阻塞于桥；`block_until` / `run_until` 只是驱动循环的入口，
//!   等待的是“有消息到达”，而不是某个桥的状态。

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, ThreadId},
};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::error::BridgeError;

type CompletionFn = Box<dyn FnOnce(Result<(), BridgeError>)>;

enum LoopMessage {
    Complete {
        id: u64,
        outcome: Result<(), BridgeError>,
    },
    Signal {
        id: u64,
    },
}

struct SignalSlot {
    pending: Arc<AtomicBool>,
    handler: Rc<dyn Fn()>,
}

struct LoopInner {
    thread: LoopThread,
    sender: UnboundedSender<LoopMessage>,
    next_id: Cell<u64>,
    completions: RefCell<HashMap<u64, CompletionFn>>,
    signals: RefCell<HashMap<u64, SignalSlot>>,
}

impl LoopInner {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn dispatch(&self, message: LoopMessage) {
        match message {
            LoopMessage::Complete { id, outcome } => {
                let callback = self.completions.borrow_mut().remove(&id);
                match callback {
                    Some(callback) => callback(outcome),
                    None => trace!(id, "completion already dispatched"),
                }
            }
            LoopMessage::Signal { id } => {
                let handler = self.signals.borrow().get(&id).map(|slot| {
                    slot.pending.store(false, Ordering::Release);
                    Rc::clone(&slot.handler)
                });
                // 桥已析构时注册被移除，迟到的唤醒直接丢弃。
                if let Some(handler) = handler {
                    handler();
                }
            }
        }
    }
}

/// 事件循环线程的身份，可跨线程复制，用于线程亲和性检查。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopThread(ThreadId);

impl LoopThread {
    pub fn id(&self) -> ThreadId {
        self.0
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.0
    }

    /// 当前线程必须是事件循环线程。
    pub fn ensure_loop(&self, operation: &'static str) -> Result<(), BridgeError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(BridgeError::loop_only(operation))
        }
    }

    /// 当前线程必须是工作线程；在循环线程上阻塞会让唯一能推进对端的线程自锁。
    pub fn ensure_worker(&self, operation: &'static str) -> Result<(), BridgeError> {
        if self.is_current() {
            Err(BridgeError::worker_only(operation))
        } else {
            Ok(())
        }
    }
}

/// 单线程协作式事件循环。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 模拟宿主环境中“唯一的循环线程”：所有宿主可见的回调（写完成、数据投递、结束通知）都在这里执行；
/// - 既可在 Tokio 单线程运行时中 `await` 驱动，也可在普通线程上阻塞驱动，便于引擎集成与测试。
///
/// ## 契约（What）
/// - 在哪个线程上 `new`，哪个线程就是循环线程；`EventLoop` 与 [`LoopContext`] 均为 `!Send`；
/// - [`run_until_idle`](Self::run_until_idle) 只处理已到达的消息，永不等待；
/// - [`block_until`](Self::block_until) 不得在异步运行时内部调用，此时应使用
///   [`run_until`](Self::run_until)。
pub struct EventLoop {
    context: LoopContext,
    receiver: UnboundedReceiver<LoopMessage>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let inner = LoopInner {
            thread: LoopThread(thread::current().id()),
            sender,
            next_id: Cell::new(0),
            completions: RefCell::new(HashMap::new()),
            signals: RefCell::new(HashMap::new()),
        };
        Self {
            context: LoopContext {
                inner: Rc::new(inner),
            },
            receiver,
        }
    }

    /// 返回供桥与会话使用的循环上下文。
    pub fn context(&self) -> LoopContext {
        self.context.clone()
    }

    /// 分发所有已到达的消息，返回分发数量。
    pub fn run_until_idle(&mut self) -> usize {
        let mut dispatched = 0;
        while let Ok(message) = self.receiver.try_recv() {
            self.context.inner.dispatch(message);
            dispatched += 1;
        }
        dispatched
    }

    /// 在当前线程上阻塞驱动循环，直到 `done` 返回 `true`。
    pub fn block_until(&mut self, mut done: impl FnMut() -> bool) {
        loop {
            self.run_until_idle();
            if done() {
                return;
            }
            match self.receiver.blocking_recv() {
                Some(message) => self.context.inner.dispatch(message),
                None => return,
            }
        }
    }

    /// 异步驱动循环，直到 `done` 返回 `true`；适用于 Tokio 单线程运行时。
    pub async fn run_until(&mut self, mut done: impl FnMut() -> bool) {
        loop {
            self.run_until_idle();
            if done() {
                return;
            }
            match self.receiver.recv().await {
                Some(message) => self.context.inner.dispatch(message),
                None => return,
            }
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("thread", &self.context.inner.thread)
            .finish_non_exhaustive()
    }
}

/// 循环线程上的句柄，用于登记回调与唤醒。
#[derive(Clone)]
pub struct LoopContext {
    inner: Rc<LoopInner>,
}

impl LoopContext {
    pub fn loop_thread(&self) -> LoopThread {
        self.inner.thread
    }

    pub fn is_loop_thread(&self) -> bool {
        self.inner.thread.is_current()
    }

    pub fn ensure_loop_thread(&self, operation: &'static str) -> Result<(), BridgeError> {
        self.inner.thread.ensure_loop(operation)
    }

    pub fn ensure_worker_thread(&self, operation: &'static str) -> Result<(), BridgeError> {
        self.inner.thread.ensure_worker(operation)
    }

    /// 登记一次性回调并返回可跨线程触发的 [`Completion`]。
    pub fn completion(
        &self,
        callback: impl FnOnce(Result<(), BridgeError>) + 'static,
    ) -> Completion {
        let id = self.inner.next_id();
        self.inner
            .completions
            .borrow_mut()
            .insert(id, Box::new(callback));
        Completion {
            id,
            sender: Some(self.inner.sender.clone()),
        }
    }

    /// 登记可重复触发的唤醒处理器。
    ///
    /// 返回的 [`SignalRegistration`] 析构时注销处理器；此后 [`AsyncSignal::signal`] 变为空操作。
    pub fn async_signal(&self, handler: impl Fn() + 'static) -> (AsyncSignal, SignalRegistration) {
        let id = self.inner.next_id();
        let pending = Arc::new(AtomicBool::new(false));
        self.inner.signals.borrow_mut().insert(
            id,
            SignalSlot {
                pending: Arc::clone(&pending),
                handler: Rc::new(handler),
            },
        );
        let signal = AsyncSignal {
            id,
            pending,
            sender: self.inner.sender.clone(),
        };
        let registration = SignalRegistration {
            id,
            inner: Rc::downgrade(&self.inner),
        };
        (signal, registration)
    }

    /// 尚未分发的完成回调数量。
    pub fn pending_completions(&self) -> usize {
        self.inner.completions.borrow().len()
    }
}

impl fmt::Debug for LoopContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopContext")
            .field("thread", &self.inner.thread)
            .field("pending_completions", &self.pending_completions())
            .finish()
    }
}

/// 一次性完成通知，可在任意线程触发，回调总在循环线程上执行。
///
/// 未调用 [`complete`](Self::complete) 就被丢弃时，回调收到 `Err(BridgeError::Closed)`。
pub struct Completion {
    id: u64,
    sender: Option<UnboundedSender<LoopMessage>>,
}

impl Completion {
    pub fn complete(mut self, outcome: Result<(), BridgeError>) {
        self.post(outcome);
    }

    fn post(&mut self, outcome: Result<(), BridgeError>) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        if sender
            .send(LoopMessage::Complete {
                id: self.id,
                outcome,
            })
            .is_err()
        {
            trace!(id = self.id, "event loop is gone, completion discarded");
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.post(Err(BridgeError::Closed));
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("id", &self.id)
            .field("fired", &self.sender.is_none())
            .finish()
    }
}

/// 可合并的跨线程唤醒。
#[derive(Clone)]
pub struct AsyncSignal {
    id: u64,
    pending: Arc<AtomicBool>,
    sender: UnboundedSender<LoopMessage>,
}

impl AsyncSignal {
    /// 请求在下一轮循环时执行处理器；已有未分发的唤醒时不再重复投递。
    pub fn signal(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if self
            .sender
            .send(LoopMessage::Signal { id: self.id })
            .is_err()
        {
            trace!(id = self.id, "event loop is gone, wakeup discarded");
        }
    }
}

impl fmt::Debug for AsyncSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSignal")
            .field("id", &self.id)
            .field("pending", &self.pending.load(Ordering::Acquire))
            .finish()
    }
}

/// 唤醒处理器的注册凭据，析构即注销。
pub struct SignalRegistration {
    id: u64,
    inner: Weak<LoopInner>,
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.signals.borrow_mut().remove(&self.id);
        }
    }
}

impl fmt::Debug for SignalRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalRegistration")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn completion_runs_on_loop_thread_exactly_once() {
        let mut event_loop = EventLoop::new();
        let context = event_loop.context();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        let completion = context.completion(move |outcome| sink.borrow_mut().push(outcome));
        let worker = thread::spawn(move || completion.complete(Ok(())));
        worker.join().expect("worker thread");

        event_loop.block_until(|| !seen.borrow().is_empty());
        event_loop.run_until_idle();
        assert_eq!(*seen.borrow(), vec![Ok(())]);
        assert_eq!(context.pending_completions(), 0);
    }

    #[test]
    fn dropped_completion_reports_closed() {
        let mut event_loop = EventLoop::new();
        let context = event_loop.context();
        let seen = Rc::new(Cell::new(None));

        let slot = Rc::clone(&seen);
        drop(context.completion(move |outcome| slot.set(Some(outcome))));
        event_loop.run_until_idle();
        assert_eq!(seen.take(), Some(Err(BridgeError::Closed)));
    }

    #[test]
    fn signals_coalesce_until_dispatched() {
        let mut event_loop = EventLoop::new();
        let context = event_loop.context();
        let hits = Rc::new(Cell::new(0));

        let counter = Rc::clone(&hits);
        let (signal, _registration) = context.async_signal(move || counter.set(counter.get() + 1));
        signal.signal();
        signal.signal();
        signal.signal();
        assert_eq!(event_loop.run_until_idle(), 1);
        assert_eq!(hits.get(), 1);

        signal.signal();
        event_loop.run_until_idle();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn dropped_registration_silences_signal() {
        let mut event_loop = EventLoop::new();
        let context = event_loop.context();
        let hits = Rc::new(Cell::new(0));

        let counter = Rc::clone(&hits);
        let (signal, registration) = context.async_signal(move || counter.set(counter.get() + 1));
        drop(registration);
        signal.signal();
        event_loop.run_until_idle();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn thread_roles_are_checked() {
        let event_loop = EventLoop::new();
        let thread = event_loop.context().loop_thread();
        assert!(thread.ensure_loop("op").is_ok());
        assert_eq!(
            thread.ensure_worker("op"),
            Err(BridgeError::worker_only("op"))
        );

        let from_worker = std::thread::spawn(move || {
            (thread.ensure_loop("op"), thread.ensure_worker("op"))
        })
        .join()
        .expect("worker thread");
        assert_eq!(from_worker.0, Err(BridgeError::loop_only("op")));
        assert_eq!(from_worker.1, Ok(()));
    }
}
