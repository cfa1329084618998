//! 设备影子
//!
//! 每个总线上的设备在主机侧有一个影子：寄存器镜像 + 脏标记。
//! 前台线程通过影子的 getter/setter 读写镜像值，setter 同时
//! 打上「待写入」脏标记；后台同步器消费脏标记并把值落到总线上，
//! 再把周期读回的真实值写回镜像。
//!
//! 影子内部状态由一把细粒度锁保护，锁只围住字段读写，
//! 任何串口 IO 都在锁外发生。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::{CommStatus, DeviceError};
use crate::servo::control_table::{
    ControlTable, RegisterAccess, RegisterArea, RegisterDescriptor, RegisterName,
};
use crate::servo::models::{model_name, ServoFamily};

/// 速度单位换算：GoalSpeed 寄存器一个刻度约等于 0.111 rpm
const SPEED_UNIT_RPM: f64 = 0.111;

/// 自动速度模式下未给出时间预算时采用的默认预算
const AUTO_SPEED_BUDGET_MS: u32 = 1000;

/// 速度控制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedMode {
    /// 手动：移动速度由调用方显式设置
    #[default]
    Manual,
    /// 自动：每次设定目标位置时按时间预算推导移动速度
    Auto,
}

/// 恢复出厂设置的范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// 整张控制表
    All,
    /// 保留设备 ID
    AllExceptId,
    /// 保留设备 ID 和波特率
    AllExceptIdBaud,
}

/// 同步器单次轮询取走的待执行动作
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionFlags {
    /// 触发 ACTION 指令（执行挂起的 REG_WRITE）
    pub action: bool,
    /// 请求重启
    pub reboot: bool,
    /// 请求全寄存器刷新（重新做一次初始读）
    pub refresh: bool,
    /// 请求恢复出厂设置
    pub reset: Option<ResetMode>,
}

struct ShadowState {
    id: u8,
    /// 镜像值，按控制表行序索引
    values: Vec<i32>,
    /// EEPROM 侧待写入标记
    dirty_eeprom: Vec<bool>,
    /// RAM 侧待写入标记
    dirty_ram: Vec<bool>,
    /// 目标位置提交挂起（由全速档专门消费，与普通脏标记分离）
    goal_pending: bool,
    /// 最近一个状态包里的设备错误位域
    device_error: DeviceError,
    /// 最近一次涉及本设备的事务状态
    comm_status: CommStatus,
    action_pending: bool,
    reboot_pending: bool,
    refresh_pending: bool,
    reset_pending: Option<ResetMode>,
    speed_mode: SpeedMode,
}

/// 一个设备的主机侧影子
///
/// 注册到总线后由总线持有（`Arc` 共享），前台线程随时可以
/// 通过克隆的 `Arc` 访问。
pub struct ServoShadow {
    family: ServoFamily,
    table: &'static ControlTable,
    model_number: u16,
    state: Mutex<ShadowState>,
}

impl ServoShadow {
    /// 创建一个影子
    ///
    /// 镜像值初始化为控制表中的出厂默认值（没有默认值的遥测
    /// 寄存器初始化为 0，初始读之后才有意义）。
    pub fn new(id: u8, family: ServoFamily) -> Arc<Self> {
        Self::with_model(id, family, 0)
    }

    /// 创建一个带型号编号的影子（扫描路径使用）
    pub fn with_model(id: u8, family: ServoFamily, model_number: u16) -> Arc<Self> {
        let table = family.control_table();
        let count = table.len();

        let mut values: Vec<i32> = table.iter().map(|r| r.default.unwrap_or(0)).collect();
        if let Some(idx) = table.index_of(RegisterName::ModelNumber) {
            values[idx] = i32::from(model_number);
        }

        Arc::new(Self {
            family,
            table,
            model_number,
            state: Mutex::new(ShadowState {
                id,
                values,
                dirty_eeprom: vec![false; count],
                dirty_ram: vec![false; count],
                goal_pending: false,
                device_error: DeviceError(0),
                comm_status: CommStatus::RxSuccess,
                action_pending: false,
                reboot_pending: false,
                refresh_pending: false,
                reset_pending: None,
                speed_mode: SpeedMode::Manual,
            }),
        })
    }

    // ============================================================
    // 标识与常量
    // ============================================================

    pub fn id(&self) -> u8 {
        self.state.lock().id
    }

    pub fn family(&self) -> ServoFamily {
        self.family
    }

    pub fn control_table(&self) -> &'static ControlTable {
        self.table
    }

    pub fn register_count(&self) -> usize {
        self.table.len()
    }

    pub fn model_number(&self) -> u16 {
        self.model_number
    }

    pub fn model_name(&self) -> &'static str {
        model_name(self.model_number)
    }

    /// 一圈行程的步数（型号常量）
    pub fn steps(&self) -> u16 {
        self.family.steps()
    }

    /// 可运动角度范围（型号常量，度）
    pub fn running_degrees(&self) -> u16 {
        self.family.running_degrees()
    }

    // ============================================================
    // 镜像读写（前台 API）
    // ============================================================

    /// 读镜像值
    pub fn value(&self, name: RegisterName) -> Option<i32> {
        let idx = self.table.index_of(name)?;
        Some(self.state.lock().values[idx])
    }

    /// 写镜像值并打脏标记（auto 区域：RAM 优先）
    ///
    /// 值会被收拢到描述符的 [min, max] 区间；对只读寄存器的
    /// 写入被拒绝（仅记日志，不返回错误）。
    pub fn set_value(&self, name: RegisterName, value: i32) {
        self.set_value_in(name, value, RegisterArea::Auto);
    }

    /// 写镜像值并在指定区域打脏标记
    pub fn set_value_in(&self, name: RegisterName, value: i32, area: RegisterArea) {
        let Some(idx) = self.table.index_of(name) else {
            warn!("Register {:?} is not in this device's control table", name);
            return;
        };
        let Some(reg) = self.table.at(idx) else {
            return;
        };

        if reg.access == RegisterAccess::ReadOnly {
            warn!("Register {:?} is read-only, value not set", name);
            return;
        }

        let clamped = reg.clamp(value);
        if clamped != value {
            debug!(
                "Value {} clamped to {} for register {:?}",
                value, clamped, name
            );
        }

        let mut state = self.state.lock();
        state.values[idx] = clamped;
        mark_dirty(&mut state, reg, idx, area);
    }

    /// 同步器回写：更新镜像但不打脏标记
    pub fn update_value(&self, name: RegisterName, value: i32) {
        if let Some(idx) = self.table.index_of(name) {
            self.state.lock().values[idx] = value;
        }
    }

    /// 指定区域是否有待写入
    pub fn pending(&self, name: RegisterName, area: RegisterArea) -> bool {
        let Some(idx) = self.table.index_of(name) else {
            return false;
        };
        let state = self.state.lock();
        match area {
            RegisterArea::Eeprom => state.dirty_eeprom[idx],
            RegisterArea::Ram => state.dirty_ram[idx],
            RegisterArea::Auto => state.dirty_ram[idx] || state.dirty_eeprom[idx],
        }
    }

    /// 清除指定区域的脏标记（同步器在写入成功后调用）
    pub fn commit(&self, name: RegisterName, area: RegisterArea) {
        let Some(idx) = self.table.index_of(name) else {
            return;
        };
        let mut state = self.state.lock();
        match area {
            RegisterArea::Eeprom => state.dirty_eeprom[idx] = false,
            RegisterArea::Ram => state.dirty_ram[idx] = false,
            RegisterArea::Auto => {
                state.dirty_eeprom[idx] = false;
                state.dirty_ram[idx] = false;
            },
        }
    }

    // ============================================================
    // 动作标记
    // ============================================================

    /// 请求发送 ACTION 指令（触发挂起的 REG_WRITE）
    pub fn request_action(&self) {
        self.state.lock().action_pending = true;
    }

    /// 请求重启。v1 协议不支持 REBOOT 指令，总线会记录一次
    /// TxFail，随后仍按约定把设备重新加入同步集合。
    pub fn request_reboot(&self) {
        self.state.lock().reboot_pending = true;
    }

    /// 请求恢复出厂设置
    pub fn request_reset(&self, mode: ResetMode) {
        self.state.lock().reset_pending = Some(mode);
    }

    /// 请求全寄存器刷新
    pub fn request_refresh(&self) {
        self.state.lock().refresh_pending = true;
    }

    /// 取走并清空全部动作标记（同步器每轮调用一次）
    pub fn take_actions(&self) -> ActionFlags {
        let mut state = self.state.lock();
        let flags = ActionFlags {
            action: state.action_pending,
            reboot: state.reboot_pending,
            refresh: state.refresh_pending,
            reset: state.reset_pending,
        };
        state.action_pending = false;
        state.reboot_pending = false;
        state.refresh_pending = false;
        state.reset_pending = None;
        flags
    }

    // ============================================================
    // 错误记录
    // ============================================================

    /// 记录状态包里的设备错误位域
    pub fn set_device_error(&self, error: DeviceError) {
        self.state.lock().device_error = error;
    }

    pub fn device_error(&self) -> DeviceError {
        self.state.lock().device_error
    }

    /// 记录最近一次事务的通信状态
    pub fn set_comm_status(&self, status: CommStatus) {
        self.state.lock().comm_status = status;
    }

    pub fn comm_status(&self) -> CommStatus {
        self.state.lock().comm_status
    }

    // ============================================================
    // 目标位置
    // ============================================================

    /// 设定目标位置
    ///
    /// 自动速度模式下按默认时间预算推导移动速度；手动模式
    /// 不触碰速度寄存器。
    pub fn set_goal_position(&self, position: i32) {
        match self.speed_mode() {
            SpeedMode::Auto => self.set_goal_position_timed(position, AUTO_SPEED_BUDGET_MS),
            SpeedMode::Manual => self.store_goal(position),
        }
    }

    /// 设定目标位置并给出到位时间预算（毫秒）
    ///
    /// 由 |当前位置 − 目标位置| / 预算推导出移动速度并写入
    /// GoalSpeed（走普通脏标记路径，会先于目标位置落到总线）。
    pub fn set_goal_position_timed(&self, position: i32, budget_ms: u32) {
        let Some(reg) = self.table.find(RegisterName::GoalPosition) else {
            return;
        };
        let goal = reg.clamp(position);
        let current = self.value(RegisterName::CurrentPosition).unwrap_or(goal);

        let speed = self.derive_speed(current, goal, budget_ms);
        self.set_value(RegisterName::GoalSpeed, speed);
        self.store_goal(goal);
    }

    /// 相对移动目标位置
    pub fn move_goal_position(&self, delta: i32) {
        let current = self.value(RegisterName::CurrentPosition).unwrap_or(0);
        self.set_goal_position(current + delta);
    }

    /// 目标位置是否有待提交
    pub fn goal_position_pending(&self) -> bool {
        self.state.lock().goal_pending
    }

    /// 清除目标位置挂起标记（同步器在写入成功后调用）
    pub fn commit_goal_position(&self) {
        self.state.lock().goal_pending = false;
    }

    fn store_goal(&self, position: i32) {
        let Some(idx) = self.table.index_of(RegisterName::GoalPosition) else {
            return;
        };
        let Some(reg) = self.table.at(idx) else {
            return;
        };
        let clamped = reg.clamp(position);

        let mut state = self.state.lock();
        state.values[idx] = clamped;
        state.goal_pending = true;
    }

    /// 步数距离 + 时间预算 → GoalSpeed 刻度
    fn derive_speed(&self, current: i32, goal: i32, budget_ms: u32) -> i32 {
        let distance = f64::from((goal - current).abs());
        if distance == 0.0 || budget_ms == 0 {
            return 1;
        }

        let degrees = distance * f64::from(self.running_degrees()) / f64::from(self.steps());
        let rpm = degrees / 360.0 * 60_000.0 / f64::from(budget_ms);
        let raw = (rpm / SPEED_UNIT_RPM).round() as i32;
        raw.clamp(1, 1023)
    }

    // ============================================================
    // 速度模式
    // ============================================================

    pub fn speed_mode(&self) -> SpeedMode {
        self.state.lock().speed_mode
    }

    pub fn set_speed_mode(&self, mode: SpeedMode) {
        self.state.lock().speed_mode = mode;
    }

    // ============================================================
    // 类型化 getter（遥测与配置）
    // ============================================================

    pub fn baud_rate(&self) -> i32 {
        self.value(RegisterName::BaudRate).unwrap_or(0)
    }

    pub fn return_delay(&self) -> i32 {
        self.value(RegisterName::ReturnDelayTime).unwrap_or(0)
    }

    /// 温度上限（摄氏度）
    pub fn highest_limit_temp(&self) -> f64 {
        f64::from(self.value(RegisterName::TemperatureLimit).unwrap_or(0))
    }

    /// 电压下限（伏特；设备按 0.1 V 刻度存储）
    pub fn lowest_limit_volt(&self) -> f64 {
        f64::from(self.value(RegisterName::VoltageLowestLimit).unwrap_or(0)) / 10.0
    }

    /// 电压上限（伏特）
    pub fn highest_limit_volt(&self) -> f64 {
        f64::from(self.value(RegisterName::VoltageHighestLimit).unwrap_or(0)) / 10.0
    }

    pub fn max_torque(&self) -> i32 {
        self.value(RegisterName::MaxTorque).unwrap_or(0)
    }

    pub fn goal_position(&self) -> i32 {
        self.value(RegisterName::GoalPosition).unwrap_or(0)
    }

    pub fn moving_speed(&self) -> i32 {
        self.value(RegisterName::GoalSpeed).unwrap_or(0)
    }

    pub fn torque_limit(&self) -> i32 {
        self.value(RegisterName::TorqueLimit).unwrap_or(0)
    }

    pub fn current_position(&self) -> i32 {
        self.value(RegisterName::CurrentPosition).unwrap_or(0)
    }

    pub fn current_speed(&self) -> i32 {
        self.value(RegisterName::CurrentSpeed).unwrap_or(0)
    }

    pub fn current_load(&self) -> i32 {
        self.value(RegisterName::CurrentLoad).unwrap_or(0)
    }

    /// 当前电压（伏特）
    pub fn current_voltage(&self) -> f64 {
        f64::from(self.value(RegisterName::CurrentVoltage).unwrap_or(0)) / 10.0
    }

    /// 当前温度（摄氏度）
    pub fn current_temperature(&self) -> f64 {
        f64::from(self.value(RegisterName::CurrentTemperature).unwrap_or(0))
    }

    pub fn registered(&self) -> i32 {
        self.value(RegisterName::Registered).unwrap_or(0)
    }

    /// 设备是否正在运动
    pub fn moving(&self) -> bool {
        self.value(RegisterName::Moving).unwrap_or(0) != 0
    }

    pub fn lock_state(&self) -> i32 {
        self.value(RegisterName::Lock).unwrap_or(0)
    }

    pub fn punch(&self) -> i32 {
        self.value(RegisterName::Punch).unwrap_or(0)
    }

    pub fn cw_compliance_margin(&self) -> i32 {
        self.value(RegisterName::CwComplianceMargin).unwrap_or(0)
    }

    pub fn ccw_compliance_margin(&self) -> i32 {
        self.value(RegisterName::CcwComplianceMargin).unwrap_or(0)
    }

    pub fn cw_compliance_slope(&self) -> i32 {
        self.value(RegisterName::CwComplianceSlope).unwrap_or(0)
    }

    pub fn ccw_compliance_slope(&self) -> i32 {
        self.value(RegisterName::CcwComplianceSlope).unwrap_or(0)
    }

    // ============================================================
    // 类型化 setter
    // ============================================================

    /// 修改设备 ID 寄存器
    ///
    /// 写入落盘后设备在新 ID 上应答；影子继续用旧 ID 寻址，
    /// 直到重新扫描。
    pub fn set_id(&self, id: i32) {
        self.set_value(RegisterName::Id, id);
    }

    /// 顺时针行程限位（MinPosition）
    pub fn set_cw_limit(&self, limit: i32) {
        self.set_value(RegisterName::MinPosition, limit);
    }

    /// 逆时针行程限位（MaxPosition）
    pub fn set_ccw_limit(&self, limit: i32) {
        self.set_value(RegisterName::MaxPosition, limit);
    }

    pub fn set_moving_speed(&self, speed: i32) {
        self.set_value(RegisterName::GoalSpeed, speed);
    }

    pub fn set_max_torque(&self, torque: i32) {
        self.set_value(RegisterName::MaxTorque, torque);
    }

    pub fn set_led(&self, on: bool) {
        self.set_value(RegisterName::Led, i32::from(on));
    }

    pub fn set_torque_enabled(&self, enabled: bool) {
        self.set_value(RegisterName::TorqueEnable, i32::from(enabled));
    }

    // ============================================================
    // 辅助
    // ============================================================

    /// 阻塞等待运动结束
    ///
    /// 轮询镜像中的 Moving 标志（由同步器周期回读），直到停止
    /// 或超时。返回是否在超时前停止。
    pub fn wait_move_complete(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if !self.moving() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(4));
        }
        !self.moving()
    }

    /// 把影子当前状态摘要写入日志
    pub fn status(&self) {
        let state = self.state.lock();
        info!(
            "Servo #{} ({}): pos={} goal={} speed={} volt={:.1} temp={} err={:?}",
            state.id,
            model_name(self.model_number),
            state.values[self.table.index_of(RegisterName::CurrentPosition).unwrap_or(0)],
            state.values[self.table.index_of(RegisterName::GoalPosition).unwrap_or(0)],
            state.values[self.table.index_of(RegisterName::GoalSpeed).unwrap_or(0)],
            f64::from(state.values[self.table.index_of(RegisterName::CurrentVoltage).unwrap_or(0)])
                / 10.0,
            state.values[self.table.index_of(RegisterName::CurrentTemperature).unwrap_or(0)],
            state.device_error.describe(),
        );
    }
}

fn mark_dirty(state: &mut ShadowState, reg: &RegisterDescriptor, idx: usize, area: RegisterArea) {
    match area {
        RegisterArea::Eeprom => {
            if reg.eeprom_addr.is_some() {
                state.dirty_eeprom[idx] = true;
            }
        },
        RegisterArea::Ram => {
            if reg.ram_addr.is_some() {
                state.dirty_ram[idx] = true;
            }
        },
        RegisterArea::Auto => {
            if reg.ram_addr.is_some() {
                state.dirty_ram[idx] = true;
            } else if reg.eeprom_addr.is_some() {
                state.dirty_eeprom[idx] = true;
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shadow() -> Arc<ServoShadow> {
        ServoShadow::with_model(1, ServoFamily::ArcadiaV1, 0x0017)
    }

    #[test]
    fn test_defaults_loaded() {
        let s = shadow();
        assert_eq!(s.value(RegisterName::Id), Some(1));
        assert_eq!(s.value(RegisterName::ReturnDelayTime), Some(250));
        assert_eq!(s.value(RegisterName::ModelNumber), Some(0x0017));
        assert_eq!(s.model_name(), "ARC-23");
    }

    #[test]
    fn test_setter_clamps_to_descriptor_range() {
        let s = shadow();
        s.set_value(RegisterName::GoalSpeed, 5000);
        assert_eq!(s.value(RegisterName::GoalSpeed), Some(1023));
        s.set_value(RegisterName::GoalSpeed, -3);
        assert_eq!(s.value(RegisterName::GoalSpeed), Some(0));
    }

    #[test]
    fn test_goal_position_clamp() {
        let s = shadow();
        s.set_goal_position(1500);
        assert_eq!(s.goal_position(), 1023);
        assert!(s.goal_position_pending());
        s.commit_goal_position();
        assert!(!s.goal_position_pending());
    }

    #[test]
    fn test_read_only_register_rejected() {
        let s = shadow();
        let before = s.value(RegisterName::CurrentPosition);
        s.set_value(RegisterName::CurrentPosition, 777);
        assert_eq!(s.value(RegisterName::CurrentPosition), before);
        // 同步器路径不受权限限制
        s.update_value(RegisterName::CurrentPosition, 777);
        assert_eq!(s.value(RegisterName::CurrentPosition), Some(777));
    }

    #[test]
    fn test_dirty_flags_follow_area() {
        let s = shadow();
        // RAM 寄存器
        s.set_value(RegisterName::Led, 1);
        assert!(s.pending(RegisterName::Led, RegisterArea::Ram));
        assert!(!s.pending(RegisterName::Led, RegisterArea::Eeprom));
        s.commit(RegisterName::Led, RegisterArea::Ram);
        assert!(!s.pending(RegisterName::Led, RegisterArea::Auto));

        // EEPROM 寄存器
        s.set_value(RegisterName::ReturnDelayTime, 100);
        assert!(s.pending(RegisterName::ReturnDelayTime, RegisterArea::Eeprom));
        assert!(!s.pending(RegisterName::ReturnDelayTime, RegisterArea::Ram));
    }

    #[test]
    fn test_update_value_does_not_mark_dirty() {
        let s = shadow();
        s.update_value(RegisterName::Led, 1);
        assert!(!s.pending(RegisterName::Led, RegisterArea::Auto));
    }

    #[test]
    fn test_action_flags_taken_once() {
        let s = shadow();
        s.request_refresh();
        s.request_reset(ResetMode::AllExceptId);

        let flags = s.take_actions();
        assert!(flags.refresh);
        assert_eq!(flags.reset, Some(ResetMode::AllExceptId));
        assert!(!flags.reboot);

        let flags = s.take_actions();
        assert!(!flags.refresh);
        assert_eq!(flags.reset, None);
    }

    #[test]
    fn test_timed_goal_derives_speed() {
        let s = shadow();
        s.update_value(RegisterName::CurrentPosition, 0);
        s.set_goal_position_timed(1023, 1000);

        assert_eq!(s.goal_position(), 1023);
        assert!(s.goal_position_pending());
        assert!(s.pending(RegisterName::GoalSpeed, RegisterArea::Ram));

        // 1023 步 = 300°，1 秒走完 = 50 rpm，约 450 个刻度
        let speed = s.moving_speed();
        assert!((400..=500).contains(&speed), "speed = {}", speed);
    }

    #[test]
    fn test_timed_goal_zero_distance() {
        let s = shadow();
        s.update_value(RegisterName::CurrentPosition, 512);
        s.set_goal_position_timed(512, 1000);
        assert_eq!(s.moving_speed(), 1);
    }

    #[test]
    fn test_auto_speed_mode() {
        let s = shadow();
        s.set_speed_mode(SpeedMode::Auto);
        s.update_value(RegisterName::CurrentPosition, 0);
        s.set_goal_position(512);
        // 自动模式下速度寄存器被推导并打脏
        assert!(s.pending(RegisterName::GoalSpeed, RegisterArea::Ram));
    }

    #[test]
    fn test_scaled_getters() {
        let s = shadow();
        s.update_value(RegisterName::CurrentVoltage, 121);
        assert!((s.current_voltage() - 12.1).abs() < 1e-9);
        // 出厂默认 90 -> 9.0 V
        assert!((s.lowest_limit_volt() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_wait_move_complete_immediate() {
        let s = shadow();
        s.update_value(RegisterName::Moving, 0);
        assert!(s.wait_move_complete(Duration::from_millis(50)));

        s.update_value(RegisterName::Moving, 1);
        assert!(!s.wait_move_complete(Duration::from_millis(20)));
    }
}
