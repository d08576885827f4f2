use std::time::Duration;

use spark_io::{
    channel::{ChannelConfig, DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK, WaterMarks},
    error::codes,
    runtime::EventLoopConfig,
};

/// 通道配置从 TOML 读取：时长以毫秒表示，未出现的字段取默认值。
#[test]
fn channel_config_loads_from_toml() {
    let config: ChannelConfig = toml::from_str(
        r#"
        write_buffer_high_water_mark = 8192
        write_buffer_low_water_mark = 2048
        connect_timeout_ms = 1500
        auto_read = false
        "#,
    )
    .expect("valid toml");
    config.validate().expect("consistent config");

    assert_eq!(config.water_marks().expect("valid marks"), WaterMarks::new(2048, 8192).expect("valid marks"));
    assert_eq!(config.connect_timeout, Duration::from_millis(1500));
    assert!(!config.auto_read);
    assert_eq!(config.max_messages_per_read, ChannelConfig::default().max_messages_per_read);
}

/// 空文档等价于默认配置；序列化后再读取保持不变。
#[test]
fn empty_document_yields_defaults() {
    let config: ChannelConfig = toml::from_str("").expect("empty toml");
    assert_eq!(config, ChannelConfig::default());
    assert_eq!(config.write_buffer_high_water_mark, DEFAULT_HIGH_WATER_MARK);
    assert_eq!(config.write_buffer_low_water_mark, DEFAULT_LOW_WATER_MARK);

    let rendered = toml::to_string(&config).expect("serializable");
    assert!(rendered.contains("connect_timeout_ms = 30000"));
}

/// 反序列化不做校验；倒挂或相等的水位与零读取上限由 `validate` 拒绝。
#[test]
fn validation_rejects_inconsistent_values() {
    let inverted: ChannelConfig = toml::from_str(
        r#"
        write_buffer_high_water_mark = 100
        write_buffer_low_water_mark = 200
        "#,
    )
    .expect("syntactically valid");
    assert_eq!(inverted.validate().unwrap_err().code(), codes::CHANNEL_INVALID_CONFIG);

    let collapsed: ChannelConfig = toml::from_str(
        r#"
        write_buffer_high_water_mark = 4096
        write_buffer_low_water_mark = 4096
        "#,
    )
    .expect("syntactically valid");
    assert_eq!(collapsed.validate().unwrap_err().code(), codes::CHANNEL_INVALID_CONFIG);

    let zero_reads: ChannelConfig =
        toml::from_str("max_messages_per_read = 0").expect("syntactically valid");
    assert_eq!(zero_reads.validate().unwrap_err().code(), codes::CHANNEL_INVALID_CONFIG);

    let mut config = ChannelConfig::default();
    assert_eq!(
        config.set_max_messages_per_read(0).unwrap_err().code(),
        codes::CHANNEL_INVALID_CONFIG
    );
    config.set_connect_timeout(Duration::ZERO);
    config.validate().expect("zero timeout disables the timer");
}

/// 事件循环配置从 TOML 读取并校验静默期不超过硬超时。
#[test]
fn event_loop_config_loads_and_validates() {
    let config: EventLoopConfig = toml::from_str(
        r#"
        thread_name_prefix = "io"
        quiet_period_ms = 100
        shutdown_timeout_ms = 1000
        "#,
    )
    .expect("valid toml");
    config.validate().expect("consistent config");
    assert_eq!(config.thread_name_prefix, "io");
    assert_eq!(config.quiet_period, Duration::from_millis(100));
    assert_eq!(config.breakout_interval, EventLoopConfig::default().breakout_interval);

    let inverted: EventLoopConfig = toml::from_str(
        r#"
        quiet_period_ms = 5000
        shutdown_timeout_ms = 10
        "#,
    )
    .expect("syntactically valid");
    assert_eq!(inverted.validate().unwrap_err().code(), codes::INVALID_ARGUMENT);

    let no_breakout: EventLoopConfig =
        toml::from_str("breakout_interval = 0").expect("syntactically valid");
    assert_eq!(no_breakout.validate().unwrap_err().code(), codes::INVALID_ARGUMENT);
}
