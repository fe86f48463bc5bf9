use serde::Deserialize;

use crate::error::BridgeError;

/// Readable 方向队列的默认容量（字节），与复用器输出流的默认高水位线一致。
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// 桥接层配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 桥只有一种流控手段：Readable 方向的字节上限。工作线程写入时若队列中未被取走的字节数
///   已达到该上限，就在条件变量上阻塞，直到事件循环侧的排空让出空间；
/// - 将该上限显式配置化，避免调用方在各处散落魔法常量。
///
/// ## 契约（What）
/// - `capacity`：以字节计，必须大于零；
/// - 可通过 `serde` 从 TOML/JSON 加载，未知字段会被拒绝；
/// - **后置条件**：[`validate`](Self::validate) 返回 `Ok(())` 时配置可直接交给
///   [`BridgeSession`](crate::session::BridgeSession) 使用。
///
/// ## 注意事项（Trade-offs）
/// - 上限只约束“已入队未排空”的字节，单次写入超过上限的数据块仍会被接受，
///   只是之后的写入会一直阻塞到该块被排空。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    capacity: usize,
}

impl BridgeConfig {
    /// 创建默认配置，等价于 `capacity = DEFAULT_CAPACITY`。
    pub const fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// 设置 Readable 方向的队列容量。
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// 读取当前容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 校验配置。
    pub fn validate(&self) -> Result<(), BridgeError> {
        validate_capacity(self.capacity)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn validate_capacity(capacity: usize) -> Result<(), BridgeError> {
    if capacity == 0 {
        return Err(BridgeError::InvalidConfig {
            reason: "capacity must be greater than zero".to_owned(),
        });
    }
    Ok(())
}
