use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::ThreadId,
    time::Duration,
};

use spark_io::{
    channel::{Channel, ChannelConfig, ConnectOutcome},
    error::{CoreError, Result, codes},
    pipeline::handler_from_duplex,
    runtime::{
        EventExecutor, ExecutorState, PeriodicTask, Promise, ScheduledHandle,
        SingleThreadEventLoop, Task,
    },
};
use spark_io_embedded::{EmbeddedChannel, EmbeddedEventLoop, EmbeddedTransport};

use super::support::{EventLog, Tracer, bytes};

fn remote() -> SocketAddr {
    "192.0.2.10:5060".parse().expect("valid socket address")
}

fn channel_with(
    transport: Arc<EmbeddedTransport>,
    config: ChannelConfig,
    log: &EventLog,
) -> EmbeddedChannel {
    let channel = EmbeddedChannel::builder()
        .transport(transport)
        .config(config)
        .build()
        .expect("embedded channel");
    channel
        .pipeline()
        .add_last("t", handler_from_duplex(Tracer::new("t", log)))
        .expect("unique handler name");
    channel
}

fn pending_connect_transport() -> Arc<EmbeddedTransport> {
    let transport = Arc::new(EmbeddedTransport::inactive());
    transport.set_connect_outcome(ConnectOutcome::Pending);
    transport
}

/// 进行中的连接在超时后以 `channel.connect_timeout` 失败并关闭通道；期间的第二次连接被拒绝。
#[test]
fn pending_connect_times_out_and_closes() {
    let log = EventLog::default();
    let config = ChannelConfig {
        connect_timeout: Duration::from_secs(1),
        ..ChannelConfig::default()
    };
    let channel = channel_with(pending_connect_transport(), config, &log);

    let connecting = channel.channel().connect(remote(), None);
    assert!(!connecting.is_done());
    assert_eq!(
        channel.channel().connect(remote(), None).cause().expect("rejected").code(),
        codes::CHANNEL_CONNECTION_PENDING
    );

    channel.advance_time_by(Duration::from_millis(999));
    assert!(!connecting.is_done());

    channel.advance_time_by(Duration::from_millis(1));
    let error = connecting.cause().expect("timed out");
    assert_eq!(error.code(), codes::CHANNEL_CONNECT_TIMEOUT);
    assert!(error.message().contains("192.0.2.10:5060"));
    assert!(!channel.channel().is_open());
    assert!(channel.channel().close_future().is_done());
    assert!(!log.contains("t:active"));
}

/// 传输层报告连接完成后承诺成功、传播 `channel_active` 并取消超时任务。
#[test]
fn finish_connect_completes_the_attempt() {
    let log = EventLog::default();
    let transport = pending_connect_transport();
    let config = ChannelConfig {
        connect_timeout: Duration::from_secs(1),
        ..ChannelConfig::default()
    };
    let channel = channel_with(Arc::clone(&transport), config, &log);

    let connecting = channel.channel().connect(remote(), None);
    assert_eq!(channel.event_loop().scheduled_tasks(), 1);

    transport.complete_connect();
    channel.channel().finish_connect(Ok(()));
    channel.run_pending_tasks();

    assert!(connecting.is_success());
    assert!(log.contains("t:active"));
    assert_eq!(channel.channel().remote_address(), Some(remote()));
    assert_eq!(channel.event_loop().scheduled_tasks(), 0);
    assert!(transport.read_requests() > 0, "激活后自动读");
}

/// 传输层报告连接失败时承诺以该错误失败。
#[test]
fn failed_connect_propagates_the_transport_error() {
    let log = EventLog::default();
    let channel = channel_with(pending_connect_transport(), ChannelConfig::default(), &log);

    let connecting = channel.channel().connect(remote(), None);
    channel
        .channel()
        .finish_connect(Err(CoreError::new(codes::CHANNEL_IO, "connection refused")));
    assert_eq!(connecting.cause().expect("failed").code(), codes::CHANNEL_IO);
    assert!(!log.contains("t:active"));
}

/// 连接进行中关闭通道时连接承诺以 `channel.closed` 失败，超时任务被取消。
#[test]
fn close_fails_a_pending_connect() {
    let log = EventLog::default();
    let channel = channel_with(pending_connect_transport(), ChannelConfig::default(), &log);

    let connecting = channel.channel().connect(remote(), None);
    assert_eq!(channel.event_loop().scheduled_tasks(), 1);

    assert!(channel.close().is_success());
    assert_eq!(connecting.cause().expect("failed").code(), codes::CHANNEL_CLOSED);
    channel.run_pending_tasks();
    assert_eq!(channel.event_loop().scheduled_tasks(), 0);
}

/// 绑定使通道活跃并记录本地地址。
#[test]
fn bind_activates_the_channel() {
    let log = EventLog::default();
    let transport = Arc::new(EmbeddedTransport::inactive());
    let channel = channel_with(Arc::clone(&transport), ChannelConfig::default(), &log);
    let local: SocketAddr = "127.0.0.1:7000".parse().expect("valid socket address");

    let bound = channel.channel().bind(local);
    channel.run_pending_tasks();
    assert!(bound.is_success());
    assert!(channel.channel().is_active());
    assert_eq!(channel.channel().local_address(), Some(local));
    assert!(log.contains("t:active"));
}

/// 未连接时冲刷以 `channel.not_yet_connected` 失败，消息被释放。
#[test]
fn flush_before_connect_fails_writes() {
    let log = EventLog::default();
    let channel = channel_with(
        Arc::new(EmbeddedTransport::inactive()),
        ChannelConfig::default(),
        &log,
    );
    let msg = bytes(b"early");
    let observer = msg.as_buffer().expect("buffer message").duplicate().expect("live");

    let written = channel.channel().write_and_flush(msg);
    assert_eq!(
        written.cause().expect("failed").code(),
        codes::CHANNEL_NOT_YET_CONNECTED
    );
    assert_eq!(observer.ref_cnt(), 0);
    assert!(channel.channel().is_open());
}

/// 写出失败时失败全部已冲刷条目并关闭通道。
#[test]
fn write_failure_closes_the_channel() {
    let log = EventLog::default();
    let transport = Arc::new(EmbeddedTransport::new());
    let channel = channel_with(Arc::clone(&transport), ChannelConfig::default(), &log);

    transport.fail_next_write(CoreError::new(codes::CHANNEL_IO, "broken pipe"));
    let error = channel
        .write_outbound([bytes(b"one"), bytes(b"two")])
        .unwrap_err();
    assert_eq!(error.code(), codes::CHANNEL_IO);
    assert!(!channel.channel().is_open());
    assert!(log.contains("t:inactive"));
    assert_eq!(channel.outbound_len(), 0);
}

/// 关闭依次传播 `channel_inactive`、`channel_unregistered`，随后拆除流水线；重复关闭同样成功。
#[test]
fn close_fires_inactive_then_unregistered_and_empties_the_pipeline() {
    let log = EventLog::default();
    let channel = channel_with(Arc::new(EmbeddedTransport::new()), ChannelConfig::default(), &log);

    let closed = channel.close();
    assert!(closed.is_success());
    assert!(log.contains("t:close"));
    let teardown: Vec<String> = log
        .entries()
        .into_iter()
        .filter(|entry| {
            entry.ends_with(":inactive") || entry.ends_with(":unregistered") || entry.ends_with(":removed")
        })
        .collect();
    assert_eq!(teardown, vec!["t:inactive", "t:unregistered", "t:removed"]);
    assert!(channel.pipeline().is_empty());
    assert!(!channel.channel().is_registered());

    assert!(channel.close().is_success());
    assert_eq!(log.of_kind("unregistered").len(), 1);
}

/// 关闭后的写入以 `channel.closed` 失败并释放消息。
#[test]
fn write_after_close_fails_with_channel_closed() {
    let log = EventLog::default();
    let channel = channel_with(Arc::new(EmbeddedTransport::new()), ChannelConfig::default(), &log);
    channel.close();

    let msg = bytes(b"late");
    let observer = msg.as_buffer().expect("buffer message").duplicate().expect("live");
    let written = channel.channel().write_and_flush(msg);
    assert_eq!(written.cause().expect("failed").code(), codes::CHANNEL_CLOSED);
    assert_eq!(observer.ref_cnt(), 0);
    assert!(!channel.channel().is_writable());
}

/// 待写字节越过高水位时传播不可写，排空到低水位以下后恢复可写。
#[test]
fn writability_follows_water_marks() {
    let log = EventLog::default();
    let transport = Arc::new(EmbeddedTransport::new());
    let config = ChannelConfig {
        write_buffer_high_water_mark: 16,
        write_buffer_low_water_mark: 8,
        ..ChannelConfig::default()
    };
    let channel = channel_with(Arc::clone(&transport), config, &log);
    transport.set_writable(false);

    channel.channel().write(bytes(&[1; 8]));
    assert!(channel.channel().is_writable());
    assert_eq!(channel.channel().bytes_before_unwritable(), 8);
    channel.channel().write(bytes(&[2; 8]));
    assert!(!channel.channel().is_writable());
    assert_eq!(log.of_kind("unwritable"), vec!["t:unwritable"]);

    channel.channel().flush();
    assert!(!channel.channel().is_writable(), "传输层写不动时保持不可写");

    transport.set_writable(true);
    channel.channel().flush();
    assert!(channel.channel().is_writable());
    assert_eq!(log.of_kind("writable"), vec!["t:writable"]);
    assert_eq!(channel.outbound_len(), 2);
    assert!(channel.finish_and_release_all().expect("clean shutdown"));
}

/// 运行中修改配置：非法水位被拒绝且原配置保持不变，合法修改立即生效。
#[test]
fn config_updates_are_validated() {
    let log = EventLog::default();
    let channel = channel_with(Arc::new(EmbeddedTransport::new()), ChannelConfig::default(), &log);
    let before = channel.channel().config();

    let rejected = channel.channel().update_config(|config| {
        config.write_buffer_low_water_mark = config.write_buffer_high_water_mark + 1;
        Ok(())
    });
    assert_eq!(rejected.unwrap_err().code(), codes::CHANNEL_INVALID_CONFIG);
    assert_eq!(channel.channel().config(), before);

    channel
        .channel()
        .update_config(|config| config.set_write_buffer_low_water_mark(4))
        .expect("valid update");
    assert_eq!(channel.channel().config().write_buffer_low_water_mark, 4);
}

/// 重复注册以 `channel.already_registered` 失败。
#[test]
fn second_registration_is_rejected() {
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    let executor: Arc<dyn EventExecutor> = channel.event_loop().clone();
    let again = channel.channel().register(executor);
    assert_eq!(
        again.cause().expect("rejected").code(),
        codes::CHANNEL_ALREADY_REGISTERED
    );
}

/// 进入优雅关闭后立即拒绝新任务的执行器；其余行为委托给内嵌事件循环。
struct RejectingWhileClosing {
    inner: EmbeddedEventLoop,
    closing: AtomicBool,
}

impl RejectingWhileClosing {
    fn new() -> Self {
        Self {
            inner: EmbeddedEventLoop::with_name("rejecting-loop"),
            closing: AtomicBool::new(false),
        }
    }

    fn begin_closing(&self) {
        self.closing.store(true, Ordering::Release);
    }
}

impl EventExecutor for RejectingWhileClosing {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn in_event_loop_of(&self, thread: ThreadId) -> bool {
        self.inner.in_event_loop_of(thread)
    }

    fn execute(&self, task: Task) -> Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(CoreError::new(codes::RUNTIME_REJECTED, "event loop is closing"));
        }
        self.inner.execute(task)
    }

    fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledHandle> {
        self.inner.schedule(task, delay)
    }

    fn schedule_at_fixed_rate(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle> {
        self.inner.schedule_at_fixed_rate(task, initial_delay, period)
    }

    fn schedule_with_fixed_delay(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledHandle> {
        self.inner.schedule_with_fixed_delay(task, initial_delay, delay)
    }

    fn state(&self) -> ExecutorState {
        if self.closing.load(Ordering::Acquire) {
            ExecutorState::ShuttingDown
        } else {
            self.inner.state()
        }
    }

    fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Promise<()> {
        self.inner.shutdown_gracefully(quiet_period, timeout)
    }

    fn termination(&self) -> Promise<()> {
        self.inner.termination()
    }
}

/// 执行器拒绝延后的注销任务时，注销承诺以该拒绝错误失败，而不是永远悬挂。
#[test]
fn deregister_fails_when_the_loop_rejects_the_deferred_task() {
    let event_loop = Arc::new(RejectingWhileClosing::new());
    let channel = Channel::builder(Arc::new(EmbeddedTransport::new()))
        .build()
        .expect("valid config");
    let executor: Arc<dyn EventExecutor> = event_loop.clone();
    assert!(channel.register(executor).is_success());

    event_loop.begin_closing();
    let deregistered = channel.deregister();
    assert_eq!(
        deregistered.cause().expect("rejected").code(),
        codes::RUNTIME_REJECTED
    );
    assert!(channel.is_registered(), "被拒绝的注销不改变注册状态");
}

/// 事件循环终止后发起注销：承诺以 `runtime.rejected` 完成而不是悬挂，通道保持原状。
#[test]
fn deregister_after_the_loop_terminated_completes() {
    let log = EventLog::default();
    let event_loop = Arc::new(SingleThreadEventLoop::new("terminated-loop"));
    let channel = Channel::builder(Arc::new(EmbeddedTransport::new()))
        .build()
        .expect("valid config");
    let executor: Arc<dyn EventExecutor> = event_loop.clone();
    channel.register(executor).wait().expect("registered");
    channel
        .pipeline()
        .add_last("t", handler_from_duplex(Tracer::new("t", &log)))
        .expect("unique handler name");

    event_loop
        .shutdown_gracefully(Duration::ZERO, Duration::from_secs(1))
        .wait_timeout(Duration::from_secs(5))
        .expect("terminated in time")
        .expect("clean termination");

    let outcome = channel
        .deregister()
        .wait_timeout(Duration::from_secs(5))
        .expect("deregistration completes");
    assert_eq!(outcome.unwrap_err().code(), codes::RUNTIME_REJECTED);
    assert!(!log.contains("t:unregistered"));
}
