use bytes::{Buf, Bytes};

use crate::event_loop::Completion;

/// 跨线程传递的最小数据单元：一段字节，或结束标记。
///
/// # 教案级说明
///
/// ## 意图（Why）
/// - `payload == None` 是保留的结束标记，不携带任何字节，且必须是队列中逻辑上的最后一项；
/// - Writable 方向需要在数据块被完全消费后通知原写入方，因此数据块可以携带一个一次性的
///   [`Completion`]；Readable 方向不使用该字段。
///
/// ## 逻辑（How）
/// - 载荷使用 [`Bytes`]：事件循环侧写入的缓冲区只增加引用计数，不复制；
/// - 部分消费通过 [`Buf::advance`] / [`Bytes::split_to`] 推进读游标，剩余部分原地留在队首，
///   无需重新入队。
///
/// ## 契约（What）
/// - `len` 始终表示尚未被消费的字节数；
/// - 结束标记的 `len` 为 0，且 [`is_end`](Self::is_end) 返回 `true`。
#[derive(Debug)]
pub struct Chunk {
    payload: Option<Bytes>,
    completion: Option<Completion>,
}

impl Chunk {
    /// 构造数据块。
    pub fn data(payload: Bytes) -> Self {
        Self {
            payload: Some(payload),
            completion: None,
        }
    }

    /// 构造结束标记。
    pub fn end() -> Self {
        Self {
            payload: None,
            completion: None,
        }
    }

    /// 附加消费完成通知。
    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn is_end(&self) -> bool {
        self.payload.is_none()
    }

    /// 尚未被消费的字节数。
    pub fn len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 只读查看剩余载荷。
    pub fn remaining(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// 将剩余载荷的前 `dst.len()` 字节（至多）复制到 `dst`，并推进游标。
    pub(crate) fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        let Some(payload) = self.payload.as_mut() else {
            return 0;
        };
        let n = payload.len().min(dst.len());
        dst[..n].copy_from_slice(&payload[..n]);
        payload.advance(n);
        n
    }

    /// 从队首切出至多 `max` 字节作为独立数据块，剩余部分留在原处。
    pub(crate) fn split_front(&mut self, max: usize) -> Chunk {
        match self.payload.as_mut() {
            Some(payload) => Chunk::data(payload.split_to(max.min(payload.len()))),
            None => Chunk::end(),
        }
    }

    pub(crate) fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }

    /// 拆解为载荷与完成通知；载荷为 `None` 即结束标记。
    pub fn into_parts(self) -> (Option<Bytes>, Option<Completion>) {
        (self.payload, self.completion)
    }
}
