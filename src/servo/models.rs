//! 型号识别工具
//!
//! 把 PING 模拟应答里读到的型号编号映射到舵机系列（决定控制表）
//! 与型号名，并提供各系列的机械常量。

use super::control_table::{ControlTable, ARCADIA_V1_CONTROL_TABLE};

/// 舵机系列
///
/// 系列决定设备影子实例化时使用的控制表与机械常量。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoFamily {
    /// V1（Arcadia）系列
    ArcadiaV1,
}

impl ServoFamily {
    /// 该系列的控制表
    pub fn control_table(&self) -> &'static ControlTable {
        match self {
            ServoFamily::ArcadiaV1 => &ARCADIA_V1_CONTROL_TABLE,
        }
    }

    /// 一圈行程的步数
    pub fn steps(&self) -> u16 {
        match self {
            ServoFamily::ArcadiaV1 => 1024,
        }
    }

    /// 可运动角度范围（度）
    pub fn running_degrees(&self) -> u16 {
        match self {
            ServoFamily::ArcadiaV1 => 300,
        }
    }
}

/// 型号编号 → 系列
///
/// 未知型号返回 `None`，扫描时会跳过（带告警日志）。
pub fn model_to_family(model_number: u16) -> Option<ServoFamily> {
    match model_number & 0x0FFF {
        0x0017 => Some(ServoFamily::ArcadiaV1),
        _ => None,
    }
}

/// 型号编号 → 型号名
pub fn model_name(model_number: u16) -> &'static str {
    match model_number & 0x0FFF {
        0x0017 => "ARC-23",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_mapping() {
        assert_eq!(model_to_family(0x0017), Some(ServoFamily::ArcadiaV1));
        // 其它型号编号一律视为未知，扫描时跳过
        assert_eq!(model_to_family(0x0018), None);
        assert_eq!(model_to_family(0x001C), None);
        assert_eq!(model_to_family(0x0999), None);
        assert_eq!(model_name(0x0017), "ARC-23");
        assert_eq!(model_name(0x0018), "Unknown");
        assert_eq!(model_name(0x0999), "Unknown");
    }

    #[test]
    fn test_family_constants() {
        let family = ServoFamily::ArcadiaV1;
        assert_eq!(family.steps(), 1024);
        assert_eq!(family.running_degrees(), 300);
        assert_eq!(family.control_table().len(), 32);
    }
}
