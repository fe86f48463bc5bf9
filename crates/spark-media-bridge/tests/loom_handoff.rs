#![cfg(any(loom, spark_loom))]
//! 交接队列的 Loom 模型检查。
//!
//! 运行方式：`RUSTFLAGS="--cfg loom" cargo test -p spark-media-bridge --features loom-model --test loom_handoff`。

use bytes::Bytes;
use loom::{model, sync::Arc, thread};
use spark_media_bridge::{BridgeError, Chunk, HandoffQueue};

#[test]
fn blocking_pop_observes_fifo_and_single_end() {
    //
    // 教案级说明：
    // - **Why**：消费者在条件变量上等待，生产者在锁外通知；任何交错下都不能丢失唤醒或打乱顺序。
    // - **How**：生产者依次入队两个数据块与结束标记，消费者用 `pop_blocking` 取到结束为止。
    // - **What**：消费者看到 `a`、`b` 后恰好一个结束标记，且之后再次弹出立即返回结束标记。
    model(|| {
        let queue = Arc::new(HandoffQueue::new());

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue
                    .push(Chunk::data(Bytes::from_static(b"a")))
                    .expect("队列开放");
                queue
                    .push(Chunk::data(Bytes::from_static(b"b")))
                    .expect("队列开放");
                queue.push(Chunk::end()).expect("首个结束标记");
            })
        };

        let mut seen = Vec::new();
        loop {
            let chunk = queue.pop_blocking().expect("队列未关闭");
            if chunk.is_end() {
                break;
            }
            seen.extend_from_slice(chunk.remaining());
        }
        producer.join().expect("生产线程不应 panic");

        assert_eq!(seen, b"ab");
        assert!(queue.pop_blocking().expect("结束后不阻塞").is_end());
    });
}

#[test]
fn capacity_wait_is_released_by_consumer() {
    //
    // 教案级说明：
    // - **Why**：容量为 1 字节时，第二次写入必然等待消费者；必须验证释放路径在所有交错下可达。
    // - **What**：生产者两次写入都成功，消费者按序拿到两块数据。
    model(|| {
        let queue = Arc::new(HandoffQueue::new());

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue
                    .push_blocking_if_full(Chunk::data(Bytes::from_static(b"x")), 1)
                    .expect("队列开放");
                queue
                    .push_blocking_if_full(Chunk::data(Bytes::from_static(b"y")), 1)
                    .expect("队列开放");
            })
        };

        let first = queue.pop_blocking().expect("队列未关闭");
        let second = queue.pop_blocking().expect("队列未关闭");
        producer.join().expect("生产线程不应 panic");

        assert_eq!(first.remaining(), b"x");
        assert_eq!(second.remaining(), b"y");
        assert_eq!(queue.queued_bytes(), 0);
    });
}

#[test]
fn close_wakes_blocked_consumer() {
    model(|| {
        let queue = Arc::new(HandoffQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_blocking().map(|chunk| chunk.len()))
        };

        assert!(queue.close().is_empty());
        assert_eq!(
            consumer.join().expect("消费线程不应 panic"),
            Err(BridgeError::Closed)
        );
    });
}
