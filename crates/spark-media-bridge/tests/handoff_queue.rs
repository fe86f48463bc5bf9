#![cfg(not(any(loom, spark_loom)))]
//! 交接队列的跨线程行为测试。
//!
//! # 教案级导览
//!
//! - **Why**：交接队列是两个线程之间唯一共享的可变状态，阻塞、唤醒与关闭的语义一旦出错，
//!   就会表现为引擎线程永久挂起或数据乱序。
//! - **How**：每个测试用真实的 `std::thread` 扮演工作线程，主线程扮演事件循环侧，
//!   通过 `mpsc` 通道观察“是否仍在阻塞”。
//! - **What**：覆盖容量背压的阻塞与释放、空队列等待被数据唤醒、关闭唤醒两类等待者、跨线程 FIFO。

use std::{
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use bytes::Bytes;
use spark_media_bridge::{BridgeError, Chunk, HandoffQueue};

fn data(bytes: &'static [u8]) -> Chunk {
    Chunk::data(Bytes::from_static(bytes))
}

/// ## 测试一：容量背压
///
/// - **意图 (Why)**：生产者只能在队列字节数低于上限时入队，否则必须阻塞而不是丢数据。
/// - **契约 (What)**：队首被取走后，阻塞中的生产者恰好被释放一次，字节计数随之更新。
#[test]
fn producer_parks_until_consumer_drains() {
    let queue = Arc::new(HandoffQueue::new());
    queue
        .push_blocking_if_full(data(b"abcd"), 4)
        .expect("空队列必然可入队");

    let (admitted_tx, admitted_rx) = mpsc::channel();
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let result = queue.push_blocking_if_full(data(b"ef"), 4);
            admitted_tx.send(()).expect("主线程仍在等待");
            result
        })
    };

    assert!(
        admitted_rx.recv_timeout(Duration::from_millis(50)).is_err(),
        "队列已满时生产者应阻塞"
    );

    let head = queue.try_pop_upto(4).expect("队首存在");
    assert_eq!(head.remaining(), b"abcd");
    producer
        .join()
        .expect("生产线程不应 panic")
        .expect("排空后生产者应被放行");
    assert_eq!(queue.queued_bytes(), 2);
}

#[test]
fn consumer_wakes_on_push() {
    let queue = Arc::new(HandoffQueue::new());
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            queue
                .pop_blocking()
                .map(|chunk| chunk.remaining().to_vec())
        })
    };

    thread::sleep(Duration::from_millis(20));
    queue.push(data(b"wake")).expect("队列开放");
    let popped = consumer.join().expect("消费线程不应 panic");
    assert_eq!(popped, Ok(b"wake".to_vec()));
}

/// ## 测试三：关闭唤醒所有等待者
///
/// - **意图 (Why)**：拆除桥时不得遗留永远阻塞的工作线程。
/// - **契约 (What)**：阻塞在空队列上的消费者与阻塞在容量上的生产者都以 `Closed` 返回。
#[test]
fn close_releases_both_kinds_of_waiters() {
    let empty = Arc::new(HandoffQueue::new());
    let full = Arc::new(HandoffQueue::new());
    full.push(data(b"xx")).expect("队列开放");

    let consumer = {
        let queue = Arc::clone(&empty);
        thread::spawn(move || queue.pop_blocking().map(|chunk| chunk.len()))
    };
    let producer = {
        let queue = Arc::clone(&full);
        thread::spawn(move || queue.push_blocking_if_full(data(b"yy"), 2))
    };

    thread::sleep(Duration::from_millis(20));
    assert!(empty.close().is_empty());
    assert_eq!(full.close().len(), 1, "关闭时返回仍在排队的数据块");

    assert_eq!(consumer.join().expect("消费线程"), Err(BridgeError::Closed));
    assert_eq!(producer.join().expect("生产线程"), Err(BridgeError::Closed));
}

#[test]
fn fifo_is_preserved_across_threads() {
    let queue = Arc::new(HandoffQueue::new());
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0u8..200 {
                queue
                    .push_blocking_if_full(Chunk::data(Bytes::from(vec![i; 3])), 16)
                    .expect("队列开放");
            }
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

    let expected: Vec<u8> = (0u8..200).flat_map(|i| [i; 3]).collect();
    assert_eq!(seen, expected);
    assert!(queue.pop_blocking().expect("结束后不阻塞").is_end());
}
