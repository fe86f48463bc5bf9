//! 面向同步媒体引擎的 I/O 契约。
//!
//! 引擎只认识一个“读 / 写 / seek”三件套；两种方向的桥都以同一 trait 暴露给引擎，
//! 由 [`EngineIo`] 在运行时按方向分派，调用方无需关心拿到的是哪一侧。

use std::io::SeekFrom;

use tracing::trace;

use crate::{
    error::{BridgeError, Direction},
    readable::ReadableEngineIo,
    writable::WritableEngineIo,
};

/// 一次引擎读取的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 复制了若干字节；仅当目标缓冲区为空时为 0。
    Data(usize),
    /// 流已结束，此后每次读取都返回 `Eof`。
    Eof,
}

impl ReadOutcome {
    pub fn is_eof(&self) -> bool {
        matches!(self, ReadOutcome::Eof)
    }

    /// 复制的字节数，`Eof` 视为 0。
    pub fn bytes(&self) -> usize {
        match self {
            ReadOutcome::Data(n) => *n,
            ReadOutcome::Eof => 0,
        }
    }
}

/// seek 的基准位置。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// 引擎侧同步 I/O 接口，只能在工作线程上调用。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `read`：阻塞直到至少一个字节可用或到达结束；Writable 之外的方向返回
///   [`BridgeError::Unsupported`]；
/// - `write`：可能因背压阻塞，成功时总是接受全部字节；Readable 之外的方向返回
///   [`BridgeError::Unsupported`]；
/// - `seek`：流只能前向访问，偏移为 0 时返回当前位置，其余一律 [`BridgeError::SeekUnsupported`]；
/// - `seekable`：恒为 `false`，引擎据此选择流式封装格式。
pub trait SyncIo: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, BridgeError> {
        let _ = buf;
        Err(BridgeError::Unsupported { operation: "read" })
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, BridgeError> {
        let _ = buf;
        Err(BridgeError::Unsupported { operation: "write" })
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, BridgeError>;

    fn seekable(&self) -> bool {
        false
    }
}

/// 前向流的 seek：只允许零偏移的位置查询。
pub(crate) fn forward_only_seek(
    position: u64,
    offset: i64,
    whence: Whence,
) -> Result<u64, BridgeError> {
    if offset != 0 {
        return Err(BridgeError::SeekUnsupported { offset });
    }
    trace!(?whence, position, "position query on forward-only stream");
    Ok(position)
}

/// `std::io::Seek` 语义下的前向流 seek：成功必须落在请求的绝对位置上。
///
/// - `Start(n)` 换算为相对当前位置的偏移，只有 `n == position` 成立；
/// - `Current(0)` 返回当前位置；
/// - 流的末尾未知，`End(_)` 一律拒绝。
pub(crate) fn std_seek(position: u64, target: SeekFrom) -> Result<u64, BridgeError> {
    let offset = match target {
        SeekFrom::Start(absolute) => {
            let delta = i128::from(absolute) - i128::from(position);
            i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
        }
        SeekFrom::Current(offset) => offset,
        SeekFrom::End(offset) => return Err(BridgeError::SeekUnsupported { offset }),
    };
    forward_only_seek(position, offset, Whence::Current)
}

/// 按方向分派的引擎 I/O 句柄。
#[derive(Debug)]
pub enum EngineIo {
    Writable(WritableEngineIo),
    Readable(ReadableEngineIo),
}

impl EngineIo {
    pub fn direction(&self) -> Direction {
        match self {
            EngineIo::Writable(_) => Direction::Writable,
            EngineIo::Readable(_) => Direction::Readable,
        }
    }
}

impl SyncIo for EngineIo {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, BridgeError> {
        match self {
            EngineIo::Writable(io) => SyncIo::read(io, buf),
            EngineIo::Readable(io) => SyncIo::read(io, buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, BridgeError> {
        match self {
            EngineIo::Writable(io) => SyncIo::write(io, buf),
            EngineIo::Readable(io) => SyncIo::write(io, buf),
        }
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, BridgeError> {
        match self {
            EngineIo::Writable(io) => SyncIo::seek(io, offset, whence),
            EngineIo::Readable(io) => SyncIo::seek(io, offset, whence),
        }
    }
}

impl From<WritableEngineIo> for EngineIo {
    fn from(io: WritableEngineIo) -> Self {
        EngineIo::Writable(io)
    }
}

impl From<ReadableEngineIo> for EngineIo {
    fn from(io: ReadableEngineIo) -> Self {
        EngineIo::Readable(io)
    }
}
