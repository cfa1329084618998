//! 设备层模块
//!
//! 包含按系列声明的控制表（寄存器注册表）、型号识别工具，
//! 以及前台线程操作的设备影子。

pub mod control_table;
pub mod models;
pub mod shadow;

pub use control_table::{
    ControlTable, RegisterAccess, RegisterArea, RegisterDescriptor, RegisterName,
    ARCADIA_V1_CONTROL_TABLE,
};
pub use models::{model_name, model_to_family, ServoFamily};
pub use shadow::{ActionFlags, ResetMode, ServoShadow, SpeedMode};
