//! 基于 `serialport` crate 的真实串口后端

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::{info, warn};

use super::{byte_transfer_time, SerialError, SerialLink, DEFAULT_LATENCY_MS};

/// USB/TTL 串口链路
///
/// 内部 `serialport` 句柄配置成 1 ms 的轮询式读超时，
/// [`SerialLink::read`] 因此表现为「把已到达的字节立刻取走」；
/// 帧级别的超时由 `set_timeout` / `check_timeout` 这对截止时刻
/// 机制承担，事务引擎据此判定 RxTimeout / RxCorrupt。
pub struct UsbSerialLink {
    port: Box<dyn SerialPort>,
    path: String,
    baudrate: u32,
    latency: Duration,
    byte_time: Duration,
    deadline: Option<Instant>,
}

impl UsbSerialLink {
    /// 打开一个串口设备
    ///
    /// # 参数
    /// - `path`: 设备节点路径（如 "/dev/ttyUSB0"）
    /// - `baudrate`: 原始波特率（bps）。"baudnum" 请先经
    ///   [`crate::protocol::baudnum_to_baudrate`] 换算。
    ///
    /// # 错误
    /// - `SerialError::NotFound`: 设备节点不存在
    /// - `SerialError::AccessDenied`: 设备被占用或权限不足
    pub fn open(path: &str, baudrate: u32) -> Result<Self, SerialError> {
        let port = serialport::new(path, baudrate)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice => SerialError::NotFound(path.to_string()),
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    SerialError::AccessDenied(path.to_string())
                },
                _ => SerialError::Device(e.to_string()),
            })?;

        info!(
            "Serial interface successfully opened on '{}' @ {} bps",
            path, baudrate
        );

        Ok(Self {
            port,
            path: path.to_string(),
            baudrate,
            latency: Duration::from_millis(DEFAULT_LATENCY_MS),
            byte_time: byte_transfer_time(baudrate),
            deadline: None,
        })
    }

    /// 当前波特率
    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }
}

impl SerialLink for UsbSerialLink {
    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        let written = self.port.write(data)?;
        self.port.flush()?;
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // 轮询超时：没有数据到达，交给帧级截止时刻去裁决
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(SerialError::Io(e)),
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.port.clear(ClearBuffer::Input) {
            warn!("Failed to clear input buffer on '{}': {}", self.path, e);
        }
    }

    fn set_latency(&mut self, ms: u64) {
        self.latency = Duration::from_millis(ms);
    }

    fn latency(&self) -> u64 {
        self.latency.as_millis() as u64
    }

    fn set_timeout(&mut self, packet_len: usize) {
        let transfer = self.byte_time * packet_len as u32;
        self.deadline = Some(Instant::now() + self.latency + transfer);
    }

    fn check_timeout(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    fn device_path(&self) -> &str {
        &self.path
    }
}
