//! 串口适配层
//!
//! 字节流端口抽象，提供统一的半双工串行链路接口。
//! 事务引擎只依赖 [`SerialLink`] trait，后端可以是真实串口
//! （[`UsbSerialLink`]）或测试用的仿真链路。

pub mod port;

pub use port::UsbSerialLink;

use std::time::Duration;
use thiserror::Error;

/// 串口层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial device error: {0}")]
    Device(String),

    #[error("Device '{0}' not found")]
    NotFound(String),

    #[error("Device '{0}' is busy or access was denied")]
    AccessDenied(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),
}

/// 半双工串行链路抽象
///
/// 语义约定：
/// - `read` 在超时前返回已到达的字节（可能为 0 个），绝不长阻塞；
/// - `set_timeout` 按「预计收多少字节」武装一个接收截止时刻，
///   由实现根据波特率与配置的 latency 换算成时间；
/// - `check_timeout` 查询该截止时刻是否已过。
pub trait SerialLink: Send {
    /// 写出一段字节，返回实际写出的字节数
    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError>;

    /// 读入已到达的字节（最多 `buf.len()` 个），超时前返回 0 是正常情况
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError>;

    /// 丢弃输入缓冲区里的残留字节
    fn flush(&mut self);

    /// 设置基础接收延迟（毫秒），叠加在逐字节传输时间之上
    fn set_latency(&mut self, ms: u64);

    /// 当前基础接收延迟（毫秒）
    fn latency(&self) -> u64;

    /// 以预计接收的帧长（字节）武装接收截止时刻
    fn set_timeout(&mut self, packet_len: usize);

    /// 接收截止时刻是否已过
    fn check_timeout(&self) -> bool;

    /// 该链路对应的设备节点路径
    fn device_path(&self) -> &str;
}

/// 默认基础接收延迟（毫秒）
pub const DEFAULT_LATENCY_MS: u64 = 50;

/// 按波特率估算单字节传输时间
///
/// 8N1 帧一个字节占 10 个位时。
pub fn byte_transfer_time(baudrate: u32) -> Duration {
    let bits_per_byte = 10u64;
    let nanos = bits_per_byte * 1_000_000_000 / u64::from(baudrate.max(1));
    Duration::from_nanos(nanos)
}

/// 枚举本机可用的串口设备节点
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Vec::new()
        },
    }
}
