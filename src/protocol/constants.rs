//! 协议常量定义
//!
//! 集中定义 Mercury v1 协议的指令码、错误位、通信状态码等常量，
//! 避免在代码中散落"魔法数"。

/// v1 协议帧总长上限（字节）
///
/// 150 字节这一上限来自器件侧接收缓冲区的尺寸，属于协议约定。
pub const MAX_PACKET_LEN: usize = 150;

/// 状态包最小长度：FF FF ID LEN ERR CHK
pub const MIN_STATUS_PACKET_LEN: usize = 6;

/// 广播地址。发往 254 的指令包永远不会有状态应答。
pub const BROADCAST_ID: u8 = 254;

/// 普通设备地址上限（253；使用 USB2AX 转接器时 253 被转接器自身占用）
pub const MAX_DEVICE_ID: u8 = 253;

/// 帧头两字节
pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Mercury v1 协议指令集
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    RegWrite = 0x04,
    Action = 0x05,
    FactoryReset = 0x06,
    SyncWrite = 0x83,
}

impl Instruction {
    /// 从指令码还原指令，未知码返回 `None`
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Instruction::Ping),
            0x02 => Some(Instruction::Read),
            0x03 => Some(Instruction::Write),
            0x04 => Some(Instruction::RegWrite),
            0x05 => Some(Instruction::Action),
            0x06 => Some(Instruction::FactoryReset),
            0x83 => Some(Instruction::SyncWrite),
            _ => None,
        }
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// 单次事务的通信状态
///
/// 每次 TX/RX 事务结束后由事务引擎更新，公开调用返回时
/// 永远不会停留在 `RxWaiting`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommStatus {
    /// 指令包完整写出
    TxSuccess,
    /// 状态包完整收到且校验通过
    #[default]
    RxSuccess,
    /// 接收进行中（仅作为内部中间态）
    RxWaiting,
    /// 超时且一个字节都没收到
    RxTimeout,
    /// 收到了部分或损坏的状态包（帧头缺失、ID 不符、校验失败）
    RxCorrupt,
    /// 串口读取出错
    RxFail,
    /// 指令包写出不完整
    TxFail,
    /// 指令包本身不合法（调用方缺陷）
    TxError,
    /// 未知错误
    Unknown,
}

impl CommStatus {
    /// 该状态是否为错误
    pub fn is_error(self) -> bool {
        !matches!(self, CommStatus::TxSuccess | CommStatus::RxSuccess)
    }
}

/// v1 协议状态包中的设备错误位域
///
/// - bit0: 输入电压越限
/// - bit1: 角度限位越限
/// - bit2: 过热
/// - bit3: 指令参数超范围
/// - bit4: 器件侧校验和不符
/// - bit5: 过载
/// - bit6: 非法指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceError(pub u8);

impl DeviceError {
    pub const VOLTAGE: u8 = 0x01;
    pub const ANGLE_LIMIT: u8 = 0x02;
    pub const OVERHEAT: u8 = 0x04;
    pub const RANGE: u8 = 0x08;
    pub const CHECKSUM: u8 = 0x10;
    pub const OVERLOAD: u8 = 0x20;
    pub const INSTRUCTION: u8 = 0x40;

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// 没有任何错误位被置位
    #[inline]
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn voltage(self) -> bool {
        self.0 & Self::VOLTAGE != 0
    }

    pub fn angle_limit(self) -> bool {
        self.0 & Self::ANGLE_LIMIT != 0
    }

    pub fn overheat(self) -> bool {
        self.0 & Self::OVERHEAT != 0
    }

    pub fn out_of_range(self) -> bool {
        self.0 & Self::RANGE != 0
    }

    pub fn checksum(self) -> bool {
        self.0 & Self::CHECKSUM != 0
    }

    pub fn overload(self) -> bool {
        self.0 & Self::OVERLOAD != 0
    }

    pub fn instruction(self) -> bool {
        self.0 & Self::INSTRUCTION != 0
    }

    /// 被置位的错误位的可读描述
    pub fn describe(self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.voltage() {
            flags.push("input voltage");
        }
        if self.angle_limit() {
            flags.push("angle limit");
        }
        if self.overheat() {
            flags.push("overheat");
        }
        if self.out_of_range() {
            flags.push("out of range");
        }
        if self.checksum() {
            flags.push("checksum");
        }
        if self.overload() {
            flags.push("overload");
        }
        if self.instruction() {
            flags.push("invalid instruction");
        }
        flags
    }
}

/// 把 Mercury "baudnum" 换算成波特率（bps）
///
/// 公式：baudrate = 2_000_000 / (baudnum + 1)，baudnum 合法范围 [1, 254]。
/// 换算结果低于 2400 bps 时强制抬到 2400。
/// 非法 baudnum 回落到默认 1 Mbps。
pub fn baudnum_to_baudrate(baudnum: u8) -> u32 {
    let baudrate = if baudnum >= 1 {
        (2_000_000f64 / f64::from(baudnum as u16 + 1)) as u32
    } else {
        tracing::error!(
            "Invalid baudnum '{}', using default baudrate of 1000000 bps",
            baudnum
        );
        1_000_000
    };

    if baudrate < 2400 {
        tracing::error!(
            "Baudrate value '{}' is too low for Mercury devices, using minimum of 2400 bps",
            baudrate
        );
        2400
    } else {
        baudrate
    }
}
