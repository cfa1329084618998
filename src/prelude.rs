//! 常用类型一站式导入
//!
//! ```
//! use mercury_sdk::prelude::*;
//! ```

pub use crate::bus::{AckPolicy, BusBuilder, BusError, BusState, SerialBus, TransactionEngine};
pub use crate::protocol::{CommStatus, DeviceError, Instruction, PingResponse, ProtocolError};
pub use crate::serial::{SerialError, SerialLink, UsbSerialLink};
pub use crate::servo::{
    ControlTable, RegisterAccess, RegisterArea, RegisterDescriptor, RegisterName, ResetMode,
    ServoFamily, ServoShadow, SpeedMode,
};
