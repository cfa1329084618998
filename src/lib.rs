//! Mercury SDK - 串行总线智能舵机 Rust SDK
//!
//! 面向 Mercury v1 协议（半双工 RS-485/TTL 总线）的主机侧控制库。
//! 一条总线上挂接多个编号设备，主机通过帧化指令包与其通信，
//! 并可选地接收状态应答包。
//!
//! # 架构层次
//!
//! - **串口层** (`serial`): 字节流端口抽象与 `serialport` 后端
//! - **协议层** (`protocol`): 指令包编码、状态包解码、校验和
//! - **设备层** (`servo`): 控制表注册表与设备影子（镜像 + 脏标记）
//! - **总线层** (`bus`): 单飞事务引擎与后台同步控制器

pub mod bus;
pub mod protocol;
pub mod serial;
pub mod servo;

pub mod prelude;

// Re-export 核心类型（简化用户导入）
pub use bus::{AckPolicy, BusBuilder, BusError, BusState, SerialBus, TransactionEngine};
pub use protocol::{CommStatus, DeviceError, Instruction, ProtocolError};
pub use serial::{SerialError, SerialLink, UsbSerialLink};
pub use servo::{RegisterArea, RegisterName, ServoFamily, ServoShadow};
