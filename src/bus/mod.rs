//! 总线层模块
//!
//! - [`TransactionEngine`]: 单飞请求/应答事务引擎，独占一条串行链路
//! - [`SerialBus`]: 受管总线，后台同步线程 + 前台消息队列
//!
//! 事务引擎被同步器组合持有（而不是被继承），串口 IO 全部发生在
//! 同步线程内；前台代码只通过消息或影子访问总线。

pub mod controller;
pub mod error;
pub mod message;
pub mod transaction;

pub use controller::{BusBuilder, BusState, SerialBus};
pub use error::BusError;
pub use message::{BusCommand, BusMessage};
pub use transaction::TransactionEngine;

/// 状态应答（ack）策略
///
/// 决定设备对哪些指令类别回状态包。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// 只写模式：设备从不回状态包
    NoReply,
    /// 只对 READ 指令回状态包
    ReplyOnRead,
    /// 对所有指令回状态包
    #[default]
    ReplyOnAll,
}
