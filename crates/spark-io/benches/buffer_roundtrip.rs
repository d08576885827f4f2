use criterion::{Criterion, black_box};
use spark_io::{
    buffer::{BufferAllocator, PipelineMessage, UnpooledAllocator},
    pipeline::{ChannelHandler, ChannelHandlerContext, InboundHandler, handler_from_inbound},
};
use spark_io_embedded::EmbeddedChannel;
use std::{env, time::Duration};
use tracing_subscriber::EnvFilter;

/// 缓冲与流水线的往返成本。
///
/// # 设计背景（Why）
/// - 引用计数缓冲的分配、读写与释放处在每条消息的热路径上，需要基准确认改动不会回归。
/// - 流水线分发带有 `catch_unwind` 与跳过位查找，单独测量一次入站读到出站写的完整往返。
///
/// # 逻辑解析（How）
/// - `buffer_roundtrip`：分配 1 KiB、写入、按大端整数读回，最后释放。
/// - `pipeline_echo`：经内存通道注入一条消息，由回显处理器写回并从传输层取出。
fn bench_buffer_roundtrip(c: &mut Criterion) {
    let allocator = UnpooledAllocator::new();
    c.bench_function("buffer_roundtrip", |b| {
        b.iter(|| {
            let mut buf = allocator.buffer_with_max(64, 1024).expect("allocation within limits");
            buf.write_bytes(&[0u8; 512]).expect("write fits");
            for value in 0..128_u32 {
                buf.write_u32(value).expect("write fits");
            }
            buf.skip_bytes(512).expect("readable");
            let mut sum = 0_u64;
            while buf.readable_bytes() >= 4 {
                sum += u64::from(buf.read_u32().expect("readable"));
            }
            buf.release().expect("release");
            black_box(sum)
        });
    });
}

struct Echo;

impl ChannelHandler for Echo {}

impl InboundHandler for Echo {
    fn channel_read(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
    ) -> spark_io::error::Result<()> {
        ctx.write_and_flush(msg);
        Ok(())
    }
}

fn bench_pipeline_echo(c: &mut Criterion) {
    let channel = EmbeddedChannel::new([handler_from_inbound(Echo)]).expect("embedded channel");
    let allocator = channel.channel().allocator();
    c.bench_function("pipeline_echo", |b| {
        b.iter(|| {
            let mut buf = allocator.buffer_with_capacity(64).expect("allocation within limits");
            buf.write_bytes(&[7u8; 64]).expect("write fits");
            channel
                .write_inbound([PipelineMessage::from(buf)])
                .expect("inbound accepted");
            let echoed = channel.read_outbound().expect("echoed message");
            spark_io::buffer::safe_release(&echoed);
            black_box(echoed)
        });
    });
    channel.finish_and_release_all().expect("clean shutdown");
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    // `RUST_LOG=spark_io=debug` 可观察基准期间的通道日志。
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_buffer_roundtrip(&mut criterion);
    bench_pipeline_echo(&mut criterion);
    criterion.final_summary();
}
