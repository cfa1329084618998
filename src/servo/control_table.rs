//! 控制表注册表
//!
//! 每个舵机系列用一张静态控制表描述其寄存器布局：
//! 符号名 → {EEPROM 地址, RAM 地址, 字节宽度, 读写权限, 出厂默认值, 取值范围}。
//! 表在启动后只读，可跨线程安全共享；同步器和面向用户的
//! 访问器都通过符号名查表取地址与宽度。

/// 寄存器符号名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterName {
    // EEPROM 区
    ModelNumber,
    FirmwareVersion,
    Id,
    BaudRate,
    ReturnDelayTime,
    MinPosition,
    MaxPosition,
    TemperatureLimit,
    VoltageLowestLimit,
    VoltageHighestLimit,
    MaxTorque,
    StatusReturnLevel,
    AlarmLed,
    AlarmShutdown,
    // RAM 区
    TorqueEnable,
    Led,
    CwComplianceMargin,
    CcwComplianceMargin,
    CwComplianceSlope,
    CcwComplianceSlope,
    GoalPosition,
    GoalSpeed,
    TorqueLimit,
    CurrentPosition,
    CurrentSpeed,
    CurrentLoad,
    CurrentVoltage,
    CurrentTemperature,
    Registered,
    Moving,
    Lock,
    Punch,
}

/// 寄存器读写权限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAccess {
    ReadOnly,
    ReadWrite,
}

/// 寄存器寻址区域
///
/// `Auto` 表示「RAM 优先，没有 RAM 地址时用 EEPROM 地址」。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterArea {
    Eeprom,
    Ram,
    Auto,
}

/// 单个寄存器的描述符
///
/// 每个描述符至少有 EEPROM / RAM 地址之一；两个都缺省的
/// 寄存器不可能出现在控制表里。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub name: RegisterName,
    /// 字节宽度，1 或 2
    pub size: u8,
    pub access: RegisterAccess,
    pub eeprom_addr: Option<u8>,
    pub ram_addr: Option<u8>,
    /// 出厂默认值；只读遥测寄存器没有默认值
    pub default: Option<i32>,
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl RegisterDescriptor {
    /// 按区域取地址
    pub fn address(&self, area: RegisterArea) -> Option<u8> {
        match area {
            RegisterArea::Eeprom => self.eeprom_addr,
            RegisterArea::Ram => self.ram_addr,
            RegisterArea::Auto => self.ram_addr.or(self.eeprom_addr),
        }
    }

    /// 把取值收拢到 [min, max] 区间
    pub fn clamp(&self, value: i32) -> i32 {
        let mut v = value;
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        v
    }
}

// 控制表行构造器。表源自硬件手册，按「EEPROM 行 / RAM 行」
// 分别书写可以让表体保持与手册一致的排版。
const fn rom(
    name: RegisterName,
    size: u8,
    access: RegisterAccess,
    addr: u8,
    default: Option<i32>,
    min: Option<i32>,
    max: Option<i32>,
) -> RegisterDescriptor {
    RegisterDescriptor {
        name,
        size,
        access,
        eeprom_addr: Some(addr),
        ram_addr: None,
        default,
        min,
        max,
    }
}

const fn ram(
    name: RegisterName,
    size: u8,
    access: RegisterAccess,
    addr: u8,
    default: Option<i32>,
    min: Option<i32>,
    max: Option<i32>,
) -> RegisterDescriptor {
    RegisterDescriptor {
        name,
        size,
        access,
        eeprom_addr: None,
        ram_addr: Some(addr),
        default,
        min,
        max,
    }
}

/// 一张按系列组织的控制表
#[derive(Debug)]
pub struct ControlTable {
    registers: &'static [RegisterDescriptor],
}

impl ControlTable {
    /// 表中寄存器个数
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// 按表内位置取描述符
    pub fn at(&self, index: usize) -> Option<&RegisterDescriptor> {
        self.registers.get(index)
    }

    /// 按符号名查描述符
    pub fn find(&self, name: RegisterName) -> Option<&RegisterDescriptor> {
        self.registers.iter().find(|r| r.name == name)
    }

    /// 符号名在表内的位置（影子用它索引并行数组）
    pub fn index_of(&self, name: RegisterName) -> Option<usize> {
        self.registers.iter().position(|r| r.name == name)
    }

    /// 按符号名与区域取地址
    pub fn address(&self, name: RegisterName, area: RegisterArea) -> Option<u8> {
        self.find(name).and_then(|r| r.address(area))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter()
    }
}

use RegisterAccess::{ReadOnly, ReadWrite};
use RegisterName as R;

/// V1（Arcadia）系列控制表
///
/// V1 系列的所有型号共用同一张表。
pub static ARCADIA_V1_CONTROL_TABLE: ControlTable = ControlTable {
    registers: &[
        // 名称 // 宽度 // 权限 // 地址 // 默认 // 最小 // 最大
        // EEPROM 区
        rom(R::ModelNumber, 2, ReadOnly, 0, None, None, None),
        rom(R::FirmwareVersion, 1, ReadOnly, 2, None, None, None),
        rom(R::Id, 1, ReadWrite, 3, Some(1), Some(0), Some(253)),
        rom(R::BaudRate, 1, ReadWrite, 4, Some(1), Some(1), Some(254)),
        rom(R::ReturnDelayTime, 1, ReadWrite, 5, Some(250), Some(0), Some(254)),
        rom(R::MinPosition, 2, ReadWrite, 6, Some(0), Some(0), Some(1023)),
        rom(R::MaxPosition, 2, ReadWrite, 8, Some(1023), Some(0), Some(1023)),
        rom(R::TemperatureLimit, 1, ReadWrite, 11, Some(65), Some(0), Some(150)),
        rom(R::VoltageLowestLimit, 1, ReadWrite, 12, Some(90), Some(50), Some(250)),
        rom(R::VoltageHighestLimit, 1, ReadWrite, 13, Some(120), Some(50), Some(250)),
        rom(R::MaxTorque, 2, ReadWrite, 14, Some(1023), Some(0), Some(1023)),
        rom(R::StatusReturnLevel, 1, ReadWrite, 16, Some(2), Some(0), Some(2)),
        rom(R::AlarmLed, 1, ReadWrite, 17, Some(36), Some(0), Some(127)),
        rom(R::AlarmShutdown, 1, ReadWrite, 18, Some(36), Some(0), Some(127)),
        // RAM 区
        ram(R::TorqueEnable, 1, ReadWrite, 24, Some(0), Some(0), Some(1)),
        ram(R::Led, 1, ReadWrite, 25, Some(0), Some(0), Some(1)),
        ram(R::CwComplianceMargin, 1, ReadWrite, 26, Some(0), Some(0), Some(255)),
        ram(R::CcwComplianceMargin, 1, ReadWrite, 27, Some(0), Some(0), Some(255)),
        ram(R::CwComplianceSlope, 1, ReadWrite, 28, Some(0), Some(2), Some(128)),
        ram(R::CcwComplianceSlope, 1, ReadWrite, 29, Some(0), Some(2), Some(128)),
        ram(R::GoalPosition, 2, ReadWrite, 30, None, Some(0), Some(1023)),
        ram(R::GoalSpeed, 2, ReadWrite, 32, None, Some(0), Some(1023)),
        ram(R::TorqueLimit, 2, ReadWrite, 34, None, Some(0), Some(1023)),
        ram(R::CurrentPosition, 2, ReadOnly, 36, None, None, None),
        ram(R::CurrentSpeed, 2, ReadOnly, 38, None, None, None),
        ram(R::CurrentLoad, 2, ReadOnly, 40, None, None, None),
        ram(R::CurrentVoltage, 1, ReadOnly, 42, None, None, None),
        ram(R::CurrentTemperature, 1, ReadOnly, 43, None, None, None),
        ram(R::Registered, 1, ReadOnly, 44, Some(0), None, None),
        ram(R::Moving, 1, ReadOnly, 46, Some(0), None, None),
        ram(R::Lock, 1, ReadWrite, 47, Some(0), Some(0), Some(1)),
        ram(R::Punch, 2, ReadWrite, 48, Some(32), Some(0), Some(1023)),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_size() {
        assert_eq!(ARCADIA_V1_CONTROL_TABLE.len(), 32);
        assert!(!ARCADIA_V1_CONTROL_TABLE.is_empty());
    }

    #[test]
    fn test_every_register_has_an_address() {
        for reg in ARCADIA_V1_CONTROL_TABLE.iter() {
            assert!(
                reg.eeprom_addr.is_some() || reg.ram_addr.is_some(),
                "register {:?} has neither EEPROM nor RAM address",
                reg.name
            );
            assert!(reg.size == 1 || reg.size == 2);
        }
    }

    #[test]
    fn test_find_and_index() {
        let reg = ARCADIA_V1_CONTROL_TABLE.find(RegisterName::GoalPosition).unwrap();
        assert_eq!(reg.size, 2);
        assert_eq!(reg.ram_addr, Some(30));
        assert_eq!(reg.eeprom_addr, None);

        let idx = ARCADIA_V1_CONTROL_TABLE.index_of(RegisterName::ModelNumber).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_address_area_resolution() {
        let t = &ARCADIA_V1_CONTROL_TABLE;
        // RAM 寄存器：Auto 命中 RAM，Eeprom 取不到
        assert_eq!(t.address(RegisterName::GoalPosition, RegisterArea::Auto), Some(30));
        assert_eq!(t.address(RegisterName::GoalPosition, RegisterArea::Ram), Some(30));
        assert_eq!(t.address(RegisterName::GoalPosition, RegisterArea::Eeprom), None);
        // EEPROM 寄存器：Auto 回落到 EEPROM
        assert_eq!(t.address(RegisterName::Id, RegisterArea::Auto), Some(3));
        assert_eq!(t.address(RegisterName::Id, RegisterArea::Ram), None);
        assert_eq!(t.address(RegisterName::Id, RegisterArea::Eeprom), Some(3));
    }

    #[test]
    fn test_clamp() {
        let reg = ARCADIA_V1_CONTROL_TABLE.find(RegisterName::GoalPosition).unwrap();
        assert_eq!(reg.clamp(1500), 1023);
        assert_eq!(reg.clamp(-5), 0);
        assert_eq!(reg.clamp(512), 512);

        // 没有范围的只读寄存器不收拢
        let reg = ARCADIA_V1_CONTROL_TABLE.find(RegisterName::CurrentPosition).unwrap();
        assert_eq!(reg.clamp(99999), 99999);
    }

    #[test]
    fn test_read_only_flags() {
        let t = &ARCADIA_V1_CONTROL_TABLE;
        assert_eq!(t.find(RegisterName::ModelNumber).unwrap().access, RegisterAccess::ReadOnly);
        assert_eq!(t.find(RegisterName::CurrentVoltage).unwrap().access, RegisterAccess::ReadOnly);
        assert_eq!(t.find(RegisterName::Led).unwrap().access, RegisterAccess::ReadWrite);
    }
}
