#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = "spark-io-embedded: 无套接字驱动 spark-io 流水线的测试夹具。"]
#![doc = ""]
#![doc = "- [`EmbeddedEventLoop`]：调用方驱动、虚拟时钟的执行器；"]
#![doc = "- [`EmbeddedTransport`]：把写出的消息收集在内存中的传输层；"]
#![doc = "- [`EmbeddedChannel`]：组合二者，提供 `write_inbound`/`read_outbound` 等断言入口。"]

mod channel;
mod event_loop;
mod transport;

pub use channel::{EmbeddedChannel, EmbeddedChannelBuilder};
pub use event_loop::EmbeddedEventLoop;
pub use transport::EmbeddedTransport;
