use proptest::prelude::*;
use std::{
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use spark_io::{
    buffer::{PipelineMessage, safe_release},
    channel::Channel,
    error::{CoreError, Result, codes},
    pipeline::{
        ChannelHandler, ChannelHandlerContext, Handler, InboundHandler, handler_from_duplex,
        handler_from_inbound,
    },
    runtime::{EventExecutor, SingleThreadEventLoop},
};
use spark_io_embedded::{EmbeddedChannel, EmbeddedTransport};

use super::support::{EventLog, Tracer, bytes, payload_of};

const WAIT: Duration = Duration::from_secs(5);

fn tracer(label: &'static str, log: &EventLog) -> Arc<dyn Handler> {
    handler_from_duplex(Tracer::new(label, log))
}

fn lifecycle(log: &EventLog) -> Vec<String> {
    log.entries()
        .into_iter()
        .filter(|entry| entry.ends_with(":added") || entry.ends_with(":removed"))
        .collect()
}

/// `handler_added` 失败的处理器。
struct RejectsAdd {
    log: EventLog,
}

impl ChannelHandler for RejectsAdd {
    fn handler_added(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        Err(CoreError::new(codes::INVALID_ARGUMENT, "codec state missing"))
    }

    fn handler_removed(&self, _ctx: &ChannelHandlerContext) -> Result<()> {
        self.log.push("rejects:removed");
        Ok(())
    }
}

impl InboundHandler for RejectsAdd {}

/// 把 `channel_read` 所在线程名发回测试线程。
struct ThreadRecorder {
    sender: mpsc::Sender<String>,
}

impl ChannelHandler for ThreadRecorder {}

impl InboundHandler for ThreadRecorder {
    fn channel_read(&self, _ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        safe_release(&msg);
        let name = thread::current().name().unwrap_or("unnamed").to_owned();
        let _ = self.sender.send(name);
        Ok(())
    }
}

/// 四种插入位置组合出预期顺序，移除接口按各自语义摘除节点。
#[test]
fn insertion_positions_and_removal_variants() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    let pipeline = channel.pipeline();
    let handler_c = tracer("c", &log);

    pipeline
        .add_last("b", tracer("b", &log))
        .expect("unique handler name")
        .add_first("a", tracer("a", &log))
        .expect("unique handler name")
        .add_after("b", "d", tracer("d", &log))
        .expect("base exists")
        .add_before("d", "c", Arc::clone(&handler_c))
        .expect("base exists");
    assert_eq!(pipeline.names(), vec!["a", "b", "c", "d"]);
    assert_eq!(pipeline.len(), 4);
    assert!(pipeline.get("c").is_some_and(|handler| handler.is::<Tracer>()));
    assert_eq!(pipeline.context("b").expect("context").name(), "b");

    pipeline.remove_first().expect("a removed");
    pipeline.remove_last().expect("d removed");
    assert_eq!(pipeline.names(), vec!["b", "c"]);

    pipeline.remove_by_type::<Tracer>().expect("b removed");
    assert_eq!(pipeline.names(), vec!["c"]);
    pipeline.remove_handler(&handler_c).expect("c removed by identity");
    assert!(pipeline.is_empty());
    assert!(pipeline.first().is_none() && pipeline.last().is_none());

    assert_eq!(
        lifecycle(&log)
            .into_iter()
            .filter(|entry| entry.ends_with(":removed"))
            .collect::<Vec<_>>(),
        vec!["a:removed", "d:removed", "b:removed", "c:removed"]
    );
}

/// 未命名的处理器得到 `<类型名>#<序号>`；重名与不存在的名称返回对应错误码。
#[test]
fn names_are_generated_and_must_be_unique() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    let pipeline = channel.pipeline();

    assert_eq!(pipeline.add_last_unnamed(tracer("x", &log)).expect("generated"), "Tracer#0");
    assert_eq!(pipeline.add_last_unnamed(tracer("y", &log)).expect("generated"), "Tracer#1");

    pipeline.add_last("codec", tracer("z", &log)).expect("unique handler name");
    let duplicate = pipeline.add_last("codec", tracer("z2", &log)).unwrap_err();
    assert_eq!(duplicate.code(), codes::PIPELINE_DUPLICATE_NAME);
    assert_eq!(pipeline.len(), 3);
    assert!(!log.contains("z2:added"));

    assert_eq!(
        pipeline.remove("missing").unwrap_err().code(),
        codes::PIPELINE_NO_SUCH_HANDLER
    );
    assert_eq!(
        pipeline
            .add_before("missing", "w", tracer("w", &log))
            .unwrap_err()
            .code(),
        codes::PIPELINE_NO_SUCH_HANDLER
    );
    assert_eq!(
        pipeline
            .replace("codec", "Tracer#0", tracer("v", &log))
            .unwrap_err()
            .code(),
        codes::PIPELINE_DUPLICATE_NAME
    );
    assert_eq!(pipeline.names(), vec!["Tracer#0", "Tracer#1", "codec"]);
}

/// 替换时新处理器的 `handler_added` 先于旧处理器的 `handler_removed`，之后的事件只经过新处理器。
#[test]
fn replace_adds_new_before_removing_old() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    let pipeline = channel.pipeline();
    pipeline.add_last("codec", tracer("old", &log)).expect("unique handler name");

    let replaced = pipeline
        .replace("codec", "codec", tracer("new", &log))
        .expect("codec exists");
    assert!(replaced.is::<Tracer>());
    assert_eq!(lifecycle(&log), vec!["old:added", "new:added", "old:removed"]);
    assert_eq!(pipeline.names(), vec!["codec"]);

    assert!(channel.write_inbound([bytes(b"after")]).expect("inbound accepted"));
    assert_eq!(log.of_kind("read"), vec!["new:read"]);
    assert_eq!(payload_of(channel.read_inbound().expect("message at tail")), b"after");
}

/// `handler_added` 失败时处理器被移除，失败以 `pipeline.handler_failed` 传播。
#[test]
fn failing_handler_added_removes_the_handler() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    let pipeline = channel.pipeline();
    pipeline
        .add_last("rejects", handler_from_inbound(RejectsAdd { log: log.clone() }))
        .expect("linked before handler_added runs");

    assert!(pipeline.names().is_empty());
    assert!(log.contains("rejects:removed"));
    let error = channel.check_exception().unwrap_err();
    assert_eq!(error.code(), codes::PIPELINE_HANDLER_FAILED);
    assert!(error.message().contains("rejects"));
}

/// 注册前加入的处理器在注册时补发 `handler_added`，且先于 `channel_registered`。
#[test]
fn handler_added_is_deferred_until_registration() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder()
        .register(false)
        .build()
        .expect("embedded channel");
    channel
        .pipeline()
        .add_last("t", tracer("t", &log))
        .expect("unique handler name");
    assert!(log.entries().is_empty());

    channel.register().expect("registered");
    let entries = log.entries();
    assert_eq!(&entries[..3], ["t:added", "t:registered", "t:active"]);
}

/// 从非循环线程移除处理器会阻塞到循环线程完成移除。
#[test]
fn off_loop_removal_runs_on_the_owner_thread() {
    let log = EventLog::default();
    let event_loop = Arc::new(SingleThreadEventLoop::new("pipeline-loop"));
    let transport = Arc::new(EmbeddedTransport::new());
    let channel = Channel::builder(transport).build().expect("valid config");
    let executor: Arc<dyn EventExecutor> = event_loop.clone();
    channel.register(executor).wait().expect("registered");

    let pipeline = channel.pipeline();
    pipeline.add_last("x", tracer("x", &log)).expect("unique handler name");
    let removed = pipeline.remove("x").expect("removed on the loop");

    assert!(removed.is::<Tracer>());
    assert!(pipeline.names().is_empty());
    assert_eq!(lifecycle(&log), vec!["x:added", "x:removed"]);
    assert!(log.contains("x:removed@pipeline-loop"));

    channel.close().wait().expect("closed");
    event_loop.shutdown_gracefully(Duration::ZERO, Duration::from_secs(1));
    assert!(event_loop.await_termination(WAIT));
    event_loop.join();
}

/// 指定了专属执行器的处理器在该执行器线程上收到事件。
#[test]
fn handler_with_its_own_executor_runs_there() {
    let channel_loop = Arc::new(SingleThreadEventLoop::new("channel-loop"));
    let handler_loop = Arc::new(SingleThreadEventLoop::new("handler-loop"));
    let channel = Channel::builder(Arc::new(EmbeddedTransport::new()))
        .build()
        .expect("valid config");
    let executor: Arc<dyn EventExecutor> = channel_loop.clone();
    channel.register(executor).wait().expect("registered");

    let (sender, receiver) = mpsc::channel();
    let handler_executor: Arc<dyn EventExecutor> = handler_loop.clone();
    channel
        .pipeline()
        .add_last_on(handler_executor, "recorder", handler_from_inbound(ThreadRecorder { sender }))
        .expect("unique handler name");

    channel.fire_channel_read(bytes(b"hop"));
    assert_eq!(receiver.recv_timeout(WAIT).expect("read delivered"), "handler-loop");

    channel.close().wait().expect("closed");
    for event_loop in [&channel_loop, &handler_loop] {
        event_loop.shutdown_gracefully(Duration::ZERO, Duration::from_secs(1));
        assert!(event_loop.await_termination(WAIT));
        event_loop.join();
    }
}

/// 反复增删后流水线不再持有被移除的处理器；仍被上下文持有的节点在句柄释放后的下一次变更中回收。
#[test]
fn removed_handlers_are_released() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    let pipeline = channel.pipeline();
    let handler = tracer("x", &log);

    for _ in 0..1000 {
        pipeline.add_last("x", Arc::clone(&handler)).expect("unique handler name");
        pipeline.remove("x").expect("x removed");
    }
    assert!(pipeline.is_empty());
    assert_eq!(Arc::strong_count(&handler), 1);

    pipeline.add_last("x", Arc::clone(&handler)).expect("unique handler name");
    drop(pipeline.replace("x", "x", tracer("y", &log)).expect("x exists"));
    assert_eq!(Arc::strong_count(&handler), 1);
    assert!(channel.write_inbound([bytes(b"after")]).expect("inbound accepted"));
    assert_eq!(log.of_kind("read"), vec!["y:read"]);
    assert_eq!(payload_of(channel.read_inbound().expect("message at tail")), b"after");

    pipeline.add_first("held", Arc::clone(&handler)).expect("unique handler name");
    let held = pipeline.context("held").expect("context");
    pipeline.remove("held").expect("held removed");
    assert_eq!(Arc::strong_count(&handler), 2, "上下文句柄仍持有节点");
    drop(held);
    pipeline.add_last("z", tracer("z", &log)).expect("unique handler name");
    assert_eq!(Arc::strong_count(&handler), 1);
    assert_eq!(pipeline.names(), vec!["x", "z"]);
}

const LABELS: [&str; 4] = ["p0", "p1", "p2", "p3"];

#[derive(Debug, Clone)]
enum Mutation {
    Add(usize),
    Remove(usize),
    Replace(usize),
}

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (0_usize..4).prop_map(Mutation::Add),
        (0_usize..4).prop_map(Mutation::Remove),
        (0_usize..4).prop_map(Mutation::Replace),
    ]
}

proptest! {
    /// 任意增删替换序列后：名称顺序与模型一致，在链上的处理器恰好多一个引用，已离开的处理器没有残留引用。
    #[test]
    fn handler_references_follow_membership(
        mutations in proptest::collection::vec(mutation_strategy(), 1..48)
    ) {
        let log = EventLog::default();
        let channel = EmbeddedChannel::builder().build().expect("embedded channel");
        let pipeline = channel.pipeline();
        let mut handlers: Vec<Arc<dyn Handler>> =
            LABELS.iter().map(|label| tracer(label, &log)).collect();
        let mut retired: Vec<Arc<dyn Handler>> = Vec::new();
        let mut model: Vec<usize> = Vec::new();

        for mutation in mutations {
            match mutation {
                Mutation::Add(i) => {
                    let added = pipeline.add_last(LABELS[i], Arc::clone(&handlers[i]));
                    prop_assert_eq!(added.is_ok(), !model.contains(&i));
                    if !model.contains(&i) {
                        model.push(i);
                    }
                }
                Mutation::Remove(i) => {
                    prop_assert_eq!(pipeline.remove(LABELS[i]).is_ok(), model.contains(&i));
                    model.retain(|present| *present != i);
                }
                Mutation::Replace(i) => {
                    let fresh = tracer(LABELS[i], &log);
                    let replaced = pipeline.replace(LABELS[i], LABELS[i], Arc::clone(&fresh));
                    prop_assert_eq!(replaced.is_ok(), model.contains(&i));
                    if replaced.is_ok() {
                        retired.push(std::mem::replace(&mut handlers[i], fresh));
                    }
                }
            }

            let expected: Vec<String> = model.iter().map(|i| LABELS[*i].to_owned()).collect();
            prop_assert_eq!(pipeline.names(), expected);
            for (i, handler) in handlers.iter().enumerate() {
                let in_chain = usize::from(model.contains(&i));
                prop_assert_eq!(Arc::strong_count(handler), 1 + in_chain);
            }
            for handler in &retired {
                prop_assert_eq!(Arc::strong_count(handler), 1);
            }
        }
    }
}
