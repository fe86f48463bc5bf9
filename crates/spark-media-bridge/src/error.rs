//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为桥接层集中定义错误语义，区分“调用方用错了接口”（使用故障）与“桥已被拆除”（关闭故障）；
//! - EOF 与背压都不是错误：前者由 [`ReadOutcome::Eof`](crate::io::ReadOutcome::Eof) 表达，
//!   后者由阻塞（工作线程侧）或 `bool` 返回值（事件循环侧）表达，因此不出现在本枚举中。
//!
//! ## 设计要求（What）
//! - 所有变体实现 `thiserror::Error`，并映射到稳定的 `spark.media_bridge.*` 错误码；
//! - 桥内部不做任何重试，错误一律同步返回给调用点。

use std::io;

use thiserror::Error;

/// 桥的数据方向。
///
/// - `Writable`：事件循环写入、工作线程读取（例如对上传数据解码）；
/// - `Readable`：工作线程写入、事件循环读取（例如把编码结果流式下发）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Writable,
    Readable,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Writable => "writable",
            Direction::Readable => "readable",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 线程角色，用于描述线程亲和性故障中“期望的线程”。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadRole {
    /// 运行协作式事件循环的唯一线程。
    Loop,
    /// 运行同步媒体引擎、允许阻塞的线程。
    Worker,
}

impl std::fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadRole::Loop => f.write_str("loop thread"),
            ThreadRole::Worker => f.write_str("worker thread"),
        }
    }
}

/// 桥接层错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：使用故障意味着调用方存在缺陷，必须在调用点同步暴露，绝不能被静默吞掉或重试；
///   `Closed` 则是拆除流程的正常产物，用于唤醒仍阻塞在队列上的工作线程。
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static` 且可克隆，方便通过完成回调跨线程投递；
///   - [`code`](Self::code) 返回稳定错误码，[`is_usage_fault`](Self::is_usage_fault) 区分两类故障。
/// - **设计权衡 (Trade-offs)**：`InvalidConfig` 使用 `String` 保存原因，牺牲一次分配换取可读性。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// 在错误的线程上调用了仅限某一侧的接口。
    ///
    /// 例如在事件循环线程上调用工作线程专用的阻塞 `read`，这会让唯一能补充数据的线程自我阻塞。
    #[error("`{operation}` must be called from the {expected}")]
    WrongThread {
        operation: &'static str,
        expected: ThreadRole,
    },

    /// 桥只支持前向流式访问，非零偏移的 seek 一律拒绝。
    #[error("bridge is forward-only, refusing to seek by {offset}")]
    SeekUnsupported { offset: i64 },

    /// Readable 方向已进入终态后仍收到读取请求。
    #[error("read requested after the end of stream was delivered")]
    ReadAfterEnd,

    /// 结束标记入队之后仍尝试写入数据或再次结束。
    #[error("write attempted after the end of stream marker was queued")]
    WriteAfterEnd,

    /// 会话尚未登记该方向的宿主流构造钩子。
    #[error("{direction} host stream class is not registered in this session")]
    NotRegistered { direction: Direction },

    /// 同一会话内重复登记同一方向的宿主流构造钩子。
    #[error("{direction} host stream class is already registered in this session")]
    AlreadyRegistered { direction: Direction },

    /// 对单向桥调用了另一方向的操作，例如对 Readable 的引擎端执行 `read`。
    #[error("`{operation}` is not supported by this bridge direction")]
    Unsupported { operation: &'static str },

    /// 配置非法。
    #[error("invalid bridge configuration: {reason}")]
    InvalidConfig { reason: String },

    /// 桥已被拆除，阻塞中的等待被唤醒，排队中的数据被丢弃。
    #[error("bridge was closed")]
    Closed,
}

impl BridgeError {
    /// 返回遵循 `<领域>.<语义>` 约定的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::WrongThread { .. } => "spark.media_bridge.wrong_thread",
            BridgeError::SeekUnsupported { .. } => "spark.media_bridge.seek_unsupported",
            BridgeError::ReadAfterEnd => "spark.media_bridge.read_after_end",
            BridgeError::WriteAfterEnd => "spark.media_bridge.write_after_end",
            BridgeError::NotRegistered { .. } => "spark.media_bridge.not_registered",
            BridgeError::AlreadyRegistered { .. } => "spark.media_bridge.already_registered",
            BridgeError::Unsupported { .. } => "spark.media_bridge.unsupported",
            BridgeError::InvalidConfig { .. } => "spark.media_bridge.invalid_config",
            BridgeError::Closed => "spark.media_bridge.closed",
        }
    }

    /// 是否属于使用故障：调用方缺陷，不应重试。
    pub fn is_usage_fault(&self) -> bool {
        !matches!(self, BridgeError::Closed)
    }

    pub(crate) fn worker_only(operation: &'static str) -> Self {
        BridgeError::WrongThread {
            operation,
            expected: ThreadRole::Worker,
        }
    }

    pub(crate) fn loop_only(operation: &'static str) -> Self {
        BridgeError::WrongThread {
            operation,
            expected: ThreadRole::Loop,
        }
    }
}

/// 供 `std::io` 适配层使用的映射，错误码保留在消息中便于排障。
impl From<BridgeError> for io::Error {
    fn from(error: BridgeError) -> Self {
        let kind = match &error {
            BridgeError::Closed => io::ErrorKind::BrokenPipe,
            BridgeError::SeekUnsupported { .. } | BridgeError::Unsupported { .. } => {
                io::ErrorKind::Unsupported
            }
            BridgeError::InvalidConfig { .. } => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, format!("{}: {}", error.code(), error))
    }
}
