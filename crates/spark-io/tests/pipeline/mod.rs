//! 流水线集成测试：事件传播、异常隔离、结构变更与通道生命周期。

mod channel_lifecycle;
mod mutation;
mod propagation;
mod support;
