use spark_io::{
    buffer::{PipelineMessage, safe_release},
    error::{CoreError, Result, codes},
    pipeline::{
        ChannelHandler, ChannelHandlerContext, EventMask, InboundHandler, UserEvent,
        handler_from_duplex, handler_from_inbound,
    },
};
use spark_io_embedded::EmbeddedChannel;
use tracing_test::traced_test;

use super::support::{EventLog, Tracer, bytes, payload_of};

fn traced_channel(log: &EventLog, labels: &[&'static str]) -> EmbeddedChannel {
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    let pipeline = channel.pipeline();
    for label in labels {
        pipeline
            .add_last(*label, handler_from_duplex(Tracer::new(*label, log)))
            .expect("unique handler name");
    }
    channel
}

struct FailingDecoder;

impl ChannelHandler for FailingDecoder {}

impl InboundHandler for FailingDecoder {
    fn channel_read(&self, _ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        safe_release(&msg);
        Err(CoreError::new(codes::CHANNEL_IO, "malformed frame"))
    }
}

fn explode() -> Result<()> {
    panic!("decoder exploded")
}

struct PanickingDecoder;

impl ChannelHandler for PanickingDecoder {}

impl InboundHandler for PanickingDecoder {
    fn channel_read(&self, _ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        safe_release(&msg);
        explode()
    }
}

struct BrokenCatcher;

impl ChannelHandler for BrokenCatcher {}

impl InboundHandler for BrokenCatcher {
    fn exception_caught(&self, _ctx: &ChannelHandlerContext, _error: CoreError) -> Result<()> {
        Err(CoreError::new(codes::CHANNEL_IO, "catcher broke"))
    }
}

/// 声明跳过 `channel_read` 的处理器。
struct ReadSkipper {
    log: EventLog,
}

impl ChannelHandler for ReadSkipper {
    fn skipped_events(&self) -> EventMask {
        EventMask::CHANNEL_READ
    }
}

impl InboundHandler for ReadSkipper {
    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        self.log.push("skipper:read");
        ctx.fire_channel_read(msg);
        Ok(())
    }

    fn user_event_triggered(&self, ctx: &ChannelHandlerContext, event: UserEvent) -> Result<()> {
        self.log.push("skipper:user");
        ctx.fire_user_event_triggered(event);
        Ok(())
    }
}

/// 入站自头向尾经过 a、b、c，出站自尾向头经过 c、b、a。
#[test]
fn inbound_runs_head_to_tail_and_outbound_tail_to_head() {
    let log = EventLog::default();
    let channel = traced_channel(&log, &["a", "b", "c"]);

    assert!(channel.write_inbound([bytes(b"ping")]).expect("inbound accepted"));
    assert_eq!(log.of_kind("read"), vec!["a:read", "b:read", "c:read"]);
    assert_eq!(payload_of(channel.read_inbound().expect("message at tail")), b"ping");

    assert!(channel.write_outbound([bytes(b"pong")]).expect("outbound accepted"));
    assert_eq!(log.of_kind("write"), vec!["c:write", "b:write", "a:write"]);
    assert_eq!(log.of_kind("flush"), vec!["c:flush", "b:flush", "a:flush"]);
    assert_eq!(payload_of(channel.read_outbound().expect("message at transport")), b"pong");

    assert!(!channel.finish().expect("clean shutdown"));
}

/// 处理器失败转入同一上下文的 `exception_caught`，只影响其后的处理器，通道保持打开。
#[test]
fn handler_failure_is_redirected_to_exception_caught() {
    let log = EventLog::default();
    let channel = traced_channel(&log, &["a"]);
    let pipeline = channel.pipeline();
    pipeline
        .add_last("decoder", handler_from_inbound(FailingDecoder))
        .expect("unique handler name")
        .add_last("c", handler_from_duplex(Tracer::new("c", &log)))
        .expect("unique handler name");

    let error = channel.write_inbound([bytes(b"garbage")]).unwrap_err();
    assert_eq!(error.code(), codes::CHANNEL_IO);
    assert!(log.contains("a:read"));
    assert!(!log.contains("c:read"));
    assert!(log.contains("c:channel.io:exception"));
    assert!(!log.contains("a:exception"));
    assert!(channel.channel().is_open());
    assert_eq!(channel.inbound_len(), 0);
}

/// panic 被捕获为 `pipeline.handler_panicked`，携带 panic 信息。
#[test]
fn panicking_handler_surfaces_as_exception() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    channel
        .pipeline()
        .add_last("decoder", handler_from_inbound(PanickingDecoder))
        .expect("unique handler name")
        .add_last("t", handler_from_duplex(Tracer::new("t", &log)))
        .expect("unique handler name");

    let error = channel.write_inbound([bytes(b"boom")]).unwrap_err();
    assert_eq!(error.code(), codes::PIPELINE_HANDLER_PANICKED);
    assert!(error.message().contains("decoder exploded"));
    assert!(log.contains("t:exception"));
    assert!(channel.channel().is_open());
}

/// `exception_caught` 自身失败只记录日志，不再传播。
#[test]
#[traced_test]
fn failing_exception_caught_is_only_logged() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    channel
        .pipeline()
        .add_last("catcher", handler_from_inbound(BrokenCatcher))
        .expect("unique handler name")
        .add_last("t", handler_from_duplex(Tracer::new("t", &log)))
        .expect("unique handler name");

    channel
        .pipeline()
        .fire_exception_caught(CoreError::new(codes::CHANNEL_IO, "peer reset"));

    assert!(!log.contains("t:exception"));
    channel.check_exception().expect("nothing reached the tail");
    assert!(logs_contain("exception_caught failed; the error is only logged"));
}

/// 跳过位命中的上下文被直接越过，其余事件照常到达。
#[test]
fn skipped_events_bypass_the_handler() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    channel
        .pipeline()
        .add_last("skipper", handler_from_inbound(ReadSkipper { log: log.clone() }))
        .expect("unique handler name");

    assert!(channel.write_inbound([bytes(b"data")]).expect("inbound accepted"));
    assert!(!log.contains("skipper:read"));
    assert_eq!(payload_of(channel.read_inbound().expect("message at tail")), b"data");

    channel
        .pipeline()
        .fire_user_event_triggered(Box::new("idle"));
    assert!(log.contains("skipper:user"));
}

/// 入站处理器不参与出站操作。
#[test]
fn inbound_only_handlers_do_not_see_writes() {
    let log = EventLog::default();
    let channel = EmbeddedChannel::builder().build().expect("embedded channel");
    channel
        .pipeline()
        .add_last("skipper", handler_from_inbound(ReadSkipper { log: log.clone() }))
        .expect("unique handler name")
        .add_last("t", handler_from_duplex(Tracer::new("t", &log)))
        .expect("unique handler name");

    assert!(channel.write_outbound([bytes(b"out")]).expect("outbound accepted"));
    assert_eq!(log.of_kind("write"), vec!["t:write"]);
    assert!(channel.finish_and_release_all().expect("clean shutdown"));
}
