#![cfg(not(any(loom, spark_loom)))]
//! 字节保序性质验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：无论生产方如何切分数据块、消费方以多大的缓冲或需求读取，
//!   消费方看到的字节序列都必须与生产方写入的完全一致，且结束只出现一次、出现在末尾。
//! - **设计手法 (How)**：使用 Proptest 随机生成写入切分、读取缓冲大小、Readable 容量与需求序列，
//!   每个用例都在真实的工作线程与事件循环之间跑完整条流。
//! - **合同与边界 (What)**：
//!   - 允许空数据块（Writable 方向直接完成，Readable 方向不入队）；
//!   - 读取缓冲与需求均至少为 1 字节，容量至少为 1 字节；
//!   - 每个用例结束后桥被析构，不遗留阻塞线程。

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    thread,
};

use bytes::Bytes;
use proptest::{collection::vec, prelude::*};
use spark_media_bridge::{
    BridgeConfig, BridgeError, BridgeSession, EventLoop, FlowState, ReadOutcome, StreamSink,
    SyncIo,
};

fn session(event_loop: &EventLoop) -> BridgeSession {
    let session = BridgeSession::new(event_loop.context(), BridgeConfig::default())
        .expect("默认配置合法");
    session.register_writable(|_| {}).expect("首次登记");
    session.register_readable(|_| {}).expect("首次登记");
    session
}

#[derive(Clone, Default)]
struct CollectingSink {
    bytes: Rc<RefCell<Vec<u8>>>,
    ends: Rc<Cell<usize>>,
}

impl StreamSink for CollectingSink {
    fn push(&mut self, chunk: Bytes) -> bool {
        assert_eq!(self.ends.get(), 0, "结束之后不得再投递数据");
        self.bytes.borrow_mut().extend_from_slice(&chunk);
        true
    }

    fn end(&mut self) {
        self.ends.set(self.ends.get() + 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// 性质 1：Writable 方向按写入顺序交付给引擎，每个写入回调恰好成功一次。
    #[test]
    fn prop_writable_preserves_byte_order(
        chunks in vec(vec(any::<u8>(), 0..48), 0..12),
        reads in vec(1usize..32, 1..6),
    ) {
        let mut event_loop = EventLoop::new();
        let session = session(&event_loop);
        let bridge = session.writable().expect("已登记");
        let completed = Rc::new(Cell::new(0usize));

        for chunk in &chunks {
            let completed = Rc::clone(&completed);
            bridge
                .write(chunk.clone(), move |result: Result<(), BridgeError>| {
                    assert_eq!(result, Ok(()));
                    completed.set(completed.get() + 1);
                })
                .expect("循环线程写入");
        }
        bridge.finish(|_| {}).expect("首次结束");

        let mut io = bridge.engine_io();
        let received = thread::spawn(move || {
            let mut received = Vec::new();
            for size in reads.iter().cycle() {
                let mut buf = vec![0u8; *size];
                match io.read(&mut buf).expect("工作线程读取") {
                    ReadOutcome::Data(n) => received.extend_from_slice(&buf[..n]),
                    ReadOutcome::Eof => break,
                }
            }
            received
        })
        .join()
        .expect("引擎线程不应 panic");

        prop_assert_eq!(received, chunks.concat());
        event_loop.block_until(|| completed.get() == chunks.len());
        prop_assert_eq!(completed.get(), chunks.len());
    }

    /// 性质 2：Readable 方向在任意容量与需求序列下按序投递，结束恰好一次且位于末尾。
    #[test]
    fn prop_readable_preserves_byte_order(
        pieces in vec(vec(any::<u8>(), 0..48), 0..12),
        capacity in 1usize..64,
        demands in vec(0usize..40, 1..6),
    ) {
        let mut event_loop = EventLoop::new();
        let session = session(&event_loop);
        let sink = CollectingSink::default();
        let bridge = session
            .readable_with_capacity(sink.clone(), capacity)
            .expect("已登记");

        let expected = pieces.concat();
        let mut io = bridge.engine_io();
        let engine = thread::spawn(move || {
            for piece in &pieces {
                io.write(piece)?;
            }
            io.finish()
        });

        let mut step = 0;
        while bridge.state() != FlowState::Closed {
            bridge.read(demands[step % demands.len()]).expect("循环侧读取");
            step += 1;
            event_loop.run_until_idle();
            thread::yield_now();
        }

        prop_assert_eq!(engine.join().expect("引擎线程不应 panic"), Ok(()));
        prop_assert_eq!(&*sink.bytes.borrow(), &expected);
        prop_assert_eq!(sink.ends.get(), 1);
    }
}
