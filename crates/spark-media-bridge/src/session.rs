//! 会话：持有宿主流构造钩子与配置，是创建桥的唯一入口。
//!
//! # 教案级导览
//!
//! - **Why**：宿主侧的流对象（上传源、下载汇）由宿主自己的类实现；桥在创建时需要回调宿主，
//!   让它把流对象与本桥关联。这些钩子只能登记一次，且只在所属会话内可见，避免进程级全局状态。
//! - **How**：两个 `OnceCell` 分别保存 Writable / Readable 方向的钩子；桥的构造函数先查钩子，
//!   未登记则以 [`BridgeError::NotRegistered`] 失败。
//! - **What**：会话只能在事件循环线程上创建与使用，它本身是 `!Send` 的。

use std::{
    cell::{Cell, OnceCell},
    fmt,
    rc::Rc,
};

use tracing::debug;

use crate::{
    config::{BridgeConfig, validate_capacity},
    error::{BridgeError, Direction},
    event_loop::LoopContext,
    readable::{ReadableBridge, StreamSink},
    writable::WritableBridge,
};

/// 会话内单调递增的流标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// 交给宿主构造钩子的流描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    id: StreamId,
    direction: Direction,
    capacity: Option<usize>,
}

impl StreamDescriptor {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Readable 方向的队列容量；Writable 方向不做字节上限，返回 `None`。
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

type ConstructorHook = Rc<dyn Fn(&StreamDescriptor)>;

struct SessionInner {
    context: LoopContext,
    config: BridgeConfig,
    writable_class: OnceCell<ConstructorHook>,
    readable_class: OnceCell<ConstructorHook>,
    next_stream: Cell<u64>,
}

/// 桥接会话。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - [`register_writable`](Self::register_writable) / [`register_readable`](Self::register_readable)
///   每个方向只能成功一次，重复登记返回 [`BridgeError::AlreadyRegistered`]；
/// - [`writable`](Self::writable) / [`readable`](Self::readable) 在对应方向未登记时返回
///   [`BridgeError::NotRegistered`]，成功时先调用钩子再返回桥；
/// - 克隆得到的是同一会话的另一个句柄。
#[derive(Clone)]
pub struct BridgeSession {
    inner: Rc<SessionInner>,
}

impl BridgeSession {
    /// 在事件循环线程上创建会话，配置非法时失败。
    pub fn new(context: LoopContext, config: BridgeConfig) -> Result<Self, BridgeError> {
        context.ensure_loop_thread("session.new")?;
        config.validate()?;
        debug!(capacity = config.capacity(), "bridge session created");
        Ok(Self {
            inner: Rc::new(SessionInner {
                context,
                config,
                writable_class: OnceCell::new(),
                readable_class: OnceCell::new(),
                next_stream: Cell::new(0),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &LoopContext {
        &self.inner.context
    }

    /// 登记 Writable 方向的宿主流构造钩子。
    pub fn register_writable(
        &self,
        hook: impl Fn(&StreamDescriptor) + 'static,
    ) -> Result<(), BridgeError> {
        self.register(Direction::Writable, Rc::new(hook))
    }

    /// 登记 Readable 方向的宿主流构造钩子。
    pub fn register_readable(
        &self,
        hook: impl Fn(&StreamDescriptor) + 'static,
    ) -> Result<(), BridgeError> {
        self.register(Direction::Readable, Rc::new(hook))
    }

    pub fn is_registered(&self, direction: Direction) -> bool {
        self.slot(direction).get().is_some()
    }

    /// 创建 Writable 桥：事件循环写入，工作线程读取。
    pub fn writable(&self) -> Result<WritableBridge, BridgeError> {
        WritableBridge::new(self)
    }

    /// 以会话默认容量创建 Readable 桥：工作线程写入，事件循环向 `sink` 投递。
    pub fn readable(&self, sink: impl StreamSink + 'static) -> Result<ReadableBridge, BridgeError> {
        self.readable_with_capacity(sink, self.inner.config.capacity())
    }

    /// 以指定容量创建 Readable 桥。
    pub fn readable_with_capacity(
        &self,
        sink: impl StreamSink + 'static,
        capacity: usize,
    ) -> Result<ReadableBridge, BridgeError> {
        validate_capacity(capacity)?;
        ReadableBridge::new(self, Box::new(sink), capacity)
    }

    /// 分配流标识并调用该方向的宿主钩子。
    pub(crate) fn construct(
        &self,
        direction: Direction,
        capacity: Option<usize>,
    ) -> Result<StreamDescriptor, BridgeError> {
        self.inner.context.ensure_loop_thread("session.construct")?;
        let hook = self
            .slot(direction)
            .get()
            .cloned()
            .ok_or(BridgeError::NotRegistered { direction })?;

        let id = StreamId(self.inner.next_stream.get());
        self.inner.next_stream.set(id.0 + 1);
        let descriptor = StreamDescriptor {
            id,
            direction,
            capacity,
        };
        hook(&descriptor);
        debug!(stream = %id, %direction, ?capacity, "bridge constructed");
        Ok(descriptor)
    }

    fn register(&self, direction: Direction, hook: ConstructorHook) -> Result<(), BridgeError> {
        self.inner.context.ensure_loop_thread("session.register")?;
        self.slot(direction)
            .set(hook)
            .map_err(|_| BridgeError::AlreadyRegistered { direction })?;
        debug!(%direction, "host stream class registered");
        Ok(())
    }

    fn slot(&self, direction: Direction) -> &OnceCell<ConstructorHook> {
        match direction {
            Direction::Writable => &self.inner.writable_class,
            Direction::Readable => &self.inner.readable_class,
        }
    }
}

impl fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeSession")
            .field("config", &self.inner.config)
            .field("writable", &self.is_registered(Direction::Writable))
            .field("readable", &self.is_registered(Direction::Readable))
            .finish()
    }
}
