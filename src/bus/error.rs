//! 总线层错误类型定义

use thiserror::Error;

use crate::protocol::{CommStatus, ProtocolError};
use crate::serial::SerialError;

/// 总线层错误类型
#[derive(Error, Debug)]
pub enum BusError {
    /// 串口层错误
    #[error("Serial link error: {0}")]
    Serial(#[from] SerialError),

    /// 协议编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 事务以错误状态结束（超时、帧损坏、写出失败等）
    #[error("Transaction failed: {0:?}")]
    Comm(CommStatus),

    /// READ 指令不能发往广播地址（调用方缺陷）
    #[error("Cannot send 'Read' instruction to broadcast address")]
    BroadcastRead,

    /// no-reply ack 策略下不能发 READ 指令（调用方缺陷）
    #[error("Cannot send 'Read' instruction if no-reply ack policy is set")]
    ReadWithoutAck,

    /// 总线尚未连接
    #[error("Bus is not connected")]
    NotConnected,

    /// 总线已经连接
    #[error("Bus is already connected")]
    AlreadyConnected,

    /// 同步线程的消息队列已关闭
    #[error("Controller message queue closed")]
    QueueClosed,

    /// 配置不合法
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
