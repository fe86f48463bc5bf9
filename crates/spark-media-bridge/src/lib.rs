#![doc = r#"
# spark-media-bridge

## 设计动机（Why）
- **定位**：该 crate 把运行在工作线程上的同步媒体引擎（解复用、解码、编码、复用）
  与单线程协作式事件循环上的宿主字节流连接起来，两侧都按各自习惯的方式读写。
- **架构角色**：引擎只看到阻塞式的 `read`/`write`/`seek`（[`SyncIo`]）；宿主只看到非阻塞的
  写入 + 完成回调（[`WritableBridge`]）或按需投递（[`ReadableBridge`] + [`StreamSink`]）。
- **设计理念**：两线程之间唯一共享的可变状态是一把锁守护的 [`HandoffQueue`]；
  唯一的跨线程调用面是事件循环的投递原语（[`Completion`] 与 [`AsyncSignal`]）。

## 核心契约（What）
- **保序**：每个桥内字节严格 FIFO，消费方观察到的字节序列与生产方写入的完全一致；
- **结束**：每个桥至多一个结束标记，结束之后的读取恒为 EOF，结束之后的写入返回
  [`BridgeError::WriteAfterEnd`]；
- **线程亲和**：宿主侧接口只能在循环线程上调用，引擎侧接口只能在工作线程上调用，
  违反时同步返回 [`BridgeError::WrongThread`]，循环线程永不阻塞；
- **背压**：Readable 方向的引擎写入在队列字节数达到上限时阻塞，宿主侧以
  [`StreamSink::push`] 返回 `false` 暂停投递；
- **拆除**：桥句柄析构即关闭队列，阻塞中的等待以 [`BridgeError::Closed`] 醒来。

## 实现策略（How）
- **事件循环**：[`EventLoop`] 基于 Tokio 无界通道，既可在 Tokio 单线程运行时中 `await`
  驱动，也可在普通线程上阻塞驱动；
- **零拷贝**：Writable 方向的数据块以 [`bytes::Bytes`] 入队，部分消费只推进游标；
- **会话**：[`BridgeSession`] 保存宿主流构造钩子与 [`BridgeConfig`]，是创建桥的唯一入口；
- **并发验证**：开启 `loom-model` 特性并以 `--cfg loom` 编译时，交接队列切换到 loom 原语。

## 风险与考量（Trade-offs）
- **Writable 无上限**：该方向不限制入队字节数，宿主需依据完成回调自行施加背压；
- **单次等待**：引擎读取只等待一次，拿到部分数据即返回，可能比“读满”产生更多次调用；
- **无超时**：队列等待没有超时，引擎侧的取消只能通过拆除桥实现。
"#]

pub mod chunk;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod io;
pub mod queue;
pub mod readable;
pub mod session;
pub mod writable;

pub use chunk::Chunk;
pub use config::{BridgeConfig, DEFAULT_CAPACITY};
pub use error::{BridgeError, Direction, ThreadRole};
pub use event_loop::{AsyncSignal, Completion, EventLoop, LoopContext, LoopThread, SignalRegistration};
pub use io::{EngineIo, ReadOutcome, SyncIo, Whence};
pub use queue::{Fill, HandoffQueue};
pub use readable::{FlowState, ReadableBridge, ReadableEngineIo, StreamSink};
pub use session::{BridgeSession, StreamDescriptor, StreamId};
pub use writable::{WritableBridge, WritableEngineIo};
