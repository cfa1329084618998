//! 前台 → 同步线程的消息类型
//!
//! 前台 API 每次调用恰好投递一条消息，队列因此不会被单个
//! 调用灌满。`when` 在未来的消息会被同步线程重新投回队尾，
//! 到期后才生效（用于重启/重置后的延迟重新加入）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::servo::ServoShadow;

/// 控制命令
pub enum BusCommand {
    /// 扫描 [start, stop] 范围内的设备并重建影子集合
    Autodetect { start: u8, stop: u8 },
    /// 注册一个影子（同一 ID 重复注册会被忽略）
    Register(Arc<ServoShadow>),
    /// 按 ID 注销影子
    Unregister(u8),
    /// 注销全部影子
    UnregisterAll,
    /// 把设备重新加入同步集合（重启/重置后的延迟回归）
    DelayedAdd { id: u8, initial_read: bool },
    /// 调整串口基础接收延迟（毫秒）
    SetLatency(u64),
}

/// 带生效时刻的消息
pub struct BusMessage {
    pub command: BusCommand,
    /// 生效时刻；在未来时消息会被推迟处理
    pub when: Instant,
}

impl BusMessage {
    /// 立刻生效的消息
    pub fn now(command: BusCommand) -> Self {
        Self {
            command,
            when: Instant::now(),
        }
    }

    /// 延迟生效的消息
    pub fn delayed(command: BusCommand, delay: Duration) -> Self {
        Self {
            command,
            when: Instant::now() + delay,
        }
    }
}
