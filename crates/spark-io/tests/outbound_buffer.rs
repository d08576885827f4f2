use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use spark_io::{
    buffer::{PipelineMessage, Unpooled},
    channel::{OutboundBuffer, WaterMarks, WritabilityListener},
    error::{CoreError, codes},
    runtime::ChannelPromise,
};

fn message(len: usize) -> PipelineMessage {
    PipelineMessage::from(Unpooled::wrapped_buffer(vec![0x5a; len]))
}

fn recording_buffer(low: usize, high: usize) -> (OutboundBuffer, Arc<Mutex<Vec<bool>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let listener: Arc<dyn WritabilityListener> = Arc::new(move |writable: bool| {
        sink.lock().expect("events lock").push(writable);
    });
    let marks = WaterMarks::new(low, high).expect("valid water marks");
    (OutboundBuffer::with_listener(marks, listener), events)
}

/// 高水位 2048、低水位 1024：第三条 1000 字节写入后恰好翻转一次不可写，排空两条后恢复可写。
#[test]
fn water_mark_crossing_fires_once_per_transition() {
    let (buffer, events) = recording_buffer(1024, 2048);

    buffer.add_message(message(1000), 1000, ChannelPromise::new());
    buffer.add_message(message(1000), 1000, ChannelPromise::new());
    assert!(buffer.is_writable(), "2000 字节仍低于高水位");
    assert!(events.lock().expect("events lock").is_empty());

    buffer.add_message(message(1000), 1000, ChannelPromise::new());
    assert!(!buffer.is_writable());
    assert_eq!(*events.lock().expect("events lock"), vec![false]);
    assert_eq!(buffer.bytes_before_unwritable(), 0);
    assert_eq!(buffer.bytes_before_writable(), 3000 - 1024);

    buffer.add_flush();
    assert!(buffer.remove());
    assert!(!buffer.is_writable(), "2000 字节仍高于低水位，保持不可写");
    assert_eq!(*events.lock().expect("events lock"), vec![false]);

    assert!(buffer.remove());
    assert!(buffer.is_writable());
    assert_eq!(*events.lock().expect("events lock"), vec![false, true]);

    assert!(buffer.remove());
    assert_eq!(*events.lock().expect("events lock"), vec![false, true]);
    assert_eq!(buffer.total_pending_size(), 0);
}

/// 失败回调中再次调用 `fail_flushed` 直接返回，不会重复失败或死锁。
#[test]
fn fail_flushed_is_not_reentrant() {
    let buffer = Arc::new(OutboundBuffer::new(WaterMarks::default()));
    let first = ChannelPromise::new();
    let second = ChannelPromise::new();
    let reentered = Arc::new(Mutex::new(0_usize));

    let nested = Arc::clone(&buffer);
    let counter = Arc::clone(&reentered);
    first.add_listener(move |_| {
        nested.fail_flushed(CoreError::new(codes::CHANNEL_IO, "nested"), true);
        *counter.lock().expect("counter lock") += 1;
    });

    buffer.add_message(message(8), 8, first.clone());
    buffer.add_message(message(8), 8, second.clone());
    buffer.add_flush();
    buffer.fail_flushed(CoreError::new(codes::CHANNEL_IO, "reset by peer"), true);

    assert_eq!(first.cause().expect("failed").message(), "reset by peer");
    assert_eq!(second.cause().expect("failed").message(), "reset by peer");
    assert_eq!(*reentered.lock().expect("counter lock"), 1);
    assert!(buffer.is_empty());
    assert_eq!(buffer.total_pending_size(), 0);
}

/// 关闭后写入立即失败并释放消息。
#[test]
fn writes_after_close_fail_with_channel_closed() {
    let buffer = OutboundBuffer::new(WaterMarks::default());
    let unflushed = ChannelPromise::new();
    buffer.add_message(message(4), 4, unflushed.clone());
    buffer
        .close(CoreError::new(codes::CHANNEL_CLOSED, "closed"))
        .expect("no flushed entries");
    assert!(buffer.is_closed());
    assert_eq!(
        unflushed.cause().expect("failed").code(),
        codes::CHANNEL_CLOSED
    );

    let late = message(4);
    let observer = late.as_buffer().expect("buffer message").duplicate().expect("live");
    let promise = ChannelPromise::new();
    buffer.add_message(late, 4, promise.clone());
    assert_eq!(promise.cause().expect("failed").code(), codes::CHANNEL_CLOSED);
    assert_eq!(observer.ref_cnt(), 0, "被拒绝的消息必须被释放");
}

/// 聚合写只看到已冲刷的条目，回调返回 `false` 时提前停止。
#[test]
fn gathering_visits_only_flushed_messages() {
    let (buffer, _events) = recording_buffer(1024, 2048);
    for len in [1, 2, 3] {
        buffer.add_message(message(len), len, ChannelPromise::new());
    }
    buffer.add_flush();
    buffer.add_message(message(4), 4, ChannelPromise::new());

    let mut seen = Vec::new();
    buffer.for_each_flushed_message(|msg| {
        seen.push(msg.as_buffer().expect("buffer message").readable_bytes());
        true
    });
    assert_eq!(seen, vec![1, 2, 3]);

    let mut visited = 0;
    buffer.for_each_flushed_message(|_| {
        visited += 1;
        visited < 2
    });
    assert_eq!(visited, 2);

    while buffer.remove() {}
    assert_eq!(buffer.total_pending_size(), 4);
}

#[derive(Debug, Clone)]
enum Step {
    Add(usize),
    Flush,
    Remove,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1_usize..64).prop_map(Step::Add),
        Just(Step::Flush),
        Just(Step::Remove),
    ]
}

proptest! {
    /// 任意 add/flush/remove 交错下，承诺按写入顺序完成，已冲刷条目数始终等于 `size()`。
    #[test]
    fn completion_order_is_fifo(steps in proptest::collection::vec(step_strategy(), 1..80)) {
        let buffer = OutboundBuffer::new(WaterMarks::new(256, 512).expect("valid water marks"));
        let completed = Arc::new(Mutex::new(Vec::new()));
        let mut added = 0_usize;
        let mut flushed = 0_usize;
        let mut removed = 0_usize;

        for step in steps {
            match step {
                Step::Add(len) => {
                    let promise = ChannelPromise::new();
                    let order = Arc::clone(&completed);
                    let id = added;
                    promise.add_listener(move |_| order.lock().expect("order lock").push(id));
                    buffer.add_message(message(len), len, promise);
                    added += 1;
                }
                Step::Flush => {
                    buffer.add_flush();
                    flushed = added;
                }
                Step::Remove => {
                    let had_flushed = removed < flushed;
                    prop_assert_eq!(buffer.remove(), had_flushed);
                    if had_flushed {
                        removed += 1;
                    }
                }
            }
            prop_assert_eq!(buffer.size(), flushed - removed);
        }

        buffer.add_flush();
        while buffer.remove() {}
        let order = completed.lock().expect("order lock").clone();
        prop_assert_eq!(order, (0..added).collect::<Vec<_>>());
        prop_assert_eq!(buffer.total_pending_size(), 0);
        prop_assert!(buffer.is_writable());
    }
}
