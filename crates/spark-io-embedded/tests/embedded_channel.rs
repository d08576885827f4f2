use std::sync::Arc;

use spark_io::{
    buffer::{BufferAllocator, PipelineMessage, Unpooled, UnpooledAllocator},
    channel::ChannelConfig,
    error::{CoreError, Result, codes},
    pipeline::{ChannelHandler, ChannelHandlerContext, InboundHandler, handler_from_inbound},
};
use spark_io_embedded::{EmbeddedChannel, EmbeddedTransport};
use tracing_test::traced_test;

fn bytes(payload: &[u8]) -> PipelineMessage {
    PipelineMessage::from(Unpooled::copied_buffer(payload))
}

/// 把读到的缓冲原样写回。
struct Echo;

impl ChannelHandler for Echo {}

impl InboundHandler for Echo {
    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        ctx.write_and_flush(msg);
        Ok(())
    }
}

/// 把缓冲解码为 UTF-8 字符串业务消息，并用通道分配器写出大写回执。
struct Shouter;

impl ChannelHandler for Shouter {}

impl InboundHandler for Shouter {
    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        let buf = match msg.into_buffer() {
            Ok(buf) => buf,
            Err(other) => {
                ctx.fire_channel_read(other);
                return Ok(());
            }
        };
        let text = buf.to_string_utf8();
        buf.release()?;
        let text = text?;

        let mut reply = ctx.allocator().buffer_with_capacity(text.len())?;
        reply.write_bytes(text.to_uppercase().as_bytes())?;
        ctx.write_and_flush(PipelineMessage::from(reply));
        ctx.fire_channel_read(PipelineMessage::user(text));
        Ok(())
    }
}

/// 每次读取都失败。
struct AlwaysFails;

impl ChannelHandler for AlwaysFails {}

impl InboundHandler for AlwaysFails {
    fn channel_read(&self, _ctx: &ChannelHandlerContext, msg: PipelineMessage) -> Result<()> {
        spark_io::buffer::safe_release(&msg);
        Err(CoreError::new(codes::CHANNEL_IO, "unreadable"))
    }
}

/// 入站消息经回显处理器直接出现在出站侧，尾部没有残留。
#[test]
fn echo_round_trip() {
    let channel = EmbeddedChannel::new([handler_from_inbound(Echo)]).expect("embedded channel");

    assert!(!channel.write_inbound([bytes(b"hello")]).expect("inbound accepted"));
    let echoed = channel
        .read_outbound()
        .expect("echoed message")
        .into_buffer()
        .ok()
        .expect("buffer message");
    assert_eq!(echoed.to_vec().expect("live buffer"), b"hello");
    assert!(echoed.release().expect("release echo"));
    assert!(channel.read_outbound().is_none());
    assert!(!channel.finish().expect("clean shutdown"));
}

/// 业务消息从尾部取出，分配器统计证明没有泄漏。
#[test]
fn decoded_messages_and_replies_do_not_leak() {
    let allocator = Arc::new(UnpooledAllocator::new());
    let channel = EmbeddedChannel::builder()
        .allocator(Arc::clone(&allocator) as Arc<dyn BufferAllocator>)
        .handler(handler_from_inbound(Shouter))
        .build()
        .expect("embedded channel");

    assert!(channel.write_inbound([bytes(b"quiet")]).expect("inbound accepted"));
    let decoded = channel
        .read_inbound()
        .expect("decoded message")
        .downcast::<String>()
        .ok()
        .expect("string message");
    assert_eq!(decoded, "quiet");

    assert_eq!(channel.outbound_len(), 1);
    assert_eq!(allocator.stats().live_buffers, 1);
    assert!(channel.finish_and_release_all().expect("clean shutdown"));
    assert_eq!(allocator.stats().live_buffers, 0);
    assert_eq!(allocator.stats().total_allocations, 1);
}

/// 未处理的异常由 `check_exception` 交还；多个异常时只交还第一个，其余记录告警。
#[test]
#[traced_test]
fn unhandled_exceptions_surface_once() {
    let channel = EmbeddedChannel::new([handler_from_inbound(AlwaysFails)]).expect("embedded channel");

    let pipeline = channel.pipeline();
    pipeline.fire_channel_read(bytes(b"one"));
    pipeline.fire_channel_read(bytes(b"two"));

    let error = channel.check_exception().unwrap_err();
    assert_eq!(error.message(), "unreadable");
    assert!(logs_contain("only the first one is returned"));
    channel.check_exception().expect("exceptions were drained");
}

/// 自动读：激活时与每批读取完成后各请求一次读取；关闭自动读后不再请求。
#[test]
fn auto_read_requests_follow_config() {
    let transport = Arc::new(EmbeddedTransport::new());
    let channel = EmbeddedChannel::builder()
        .transport(Arc::clone(&transport))
        .build()
        .expect("embedded channel");
    assert_eq!(transport.read_requests(), 1);

    channel.write_inbound([bytes(b"x")]).expect("inbound accepted");
    assert_eq!(transport.read_requests(), 2);
    channel.finish_and_release_all().expect("clean shutdown");

    let manual = Arc::new(EmbeddedTransport::new());
    let config = ChannelConfig {
        auto_read: false,
        ..ChannelConfig::default()
    };
    let channel = EmbeddedChannel::builder()
        .transport(Arc::clone(&manual))
        .config(config)
        .build()
        .expect("embedded channel");
    channel.write_inbound([bytes(b"y")]).expect("inbound accepted");
    assert_eq!(manual.read_requests(), 0);

    channel.channel().read();
    assert_eq!(manual.read_requests(), 1);
    channel.finish_and_release_all().expect("clean shutdown");
}

/// 对端关闭后传输层回调关闭通道，流水线被拆除。
#[test]
fn remote_shutdown_closes_the_channel() {
    let transport = Arc::new(EmbeddedTransport::new());
    let channel = EmbeddedChannel::builder()
        .transport(Arc::clone(&transport))
        .handler(handler_from_inbound(Echo))
        .build()
        .expect("embedded channel");
    assert_eq!(channel.pipeline().len(), 1);

    transport.shutdown_remote();
    channel.channel().transport_closed();
    channel.run_pending_tasks();

    assert!(channel.channel().close_future().is_done());
    assert!(!channel.channel().is_registered());
    assert!(channel.pipeline().is_empty());
    assert!(!channel.finish().expect("already closed"));
}

/// 未注册的通道可以稍后注册，注册后才开始处理事件。
#[test]
fn deferred_registration() {
    let channel = EmbeddedChannel::builder()
        .handler(handler_from_inbound(Echo))
        .register(false)
        .build()
        .expect("embedded channel");
    assert!(!channel.channel().is_registered());

    channel.register().expect("registered");
    assert!(channel.channel().is_registered());
    assert!(!channel.write_inbound([bytes(b"ok")]).expect("inbound accepted"));
    assert_eq!(channel.outbound_len(), 1);
    assert!(channel.finish_and_release_all().expect("clean shutdown"));
}
