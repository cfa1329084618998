//! 受管总线控制器
//!
//! 一个 [`SerialBus`] 独占一条串行链路，并在自己的后台线程里
//! 跑读写同步循环。前台代码注册影子对象，循环负责让影子和
//! 硬件保持一致：
//!
//! - 消费前台消息队列（扫描、注册、注销、延迟回归）
//! - 对新加入的设备做一次全寄存器初始读
//! - 每轮把脏寄存器写到总线上，再按分档频率回读遥测
//! - 重启/重置后把设备移出同步集合，2 秒后延迟回归
//!
//! 锁序约定：注册表锁 → 影子锁；串口 IO 永远不在任何影子锁
//! 里发生。

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use spin_sleep::SpinSleeper;
use tracing::{error, info, trace, warn};

use crate::protocol::baudnum_to_baudrate;
use crate::serial::{available_ports, SerialLink, UsbSerialLink, DEFAULT_LATENCY_MS};
use crate::servo::{
    model_name, model_to_family, RegisterArea, RegisterDescriptor, RegisterName, ServoFamily,
    ServoShadow,
};

use super::message::{BusCommand, BusMessage};
use super::transaction::{report_device_error, TransactionEngine};
use super::{AckPolicy, BusError};

/// 扫描期间使用的接收延迟（毫秒），换更快的无应答判定
const SCAN_LATENCY_MS: u64 = 8;

/// 同步频率合法区间
const FREQUENCY_RANGE: std::ops::RangeInclusive<u16> = 1..=120;

/// 控制器状态机
///
/// `stopped → started → scanning → scanned → reading → ready`，
/// `ready ↔ paused`，任何状态经 `disconnect` 回到 `stopped`。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Stopped = 0,
    Started = 1,
    Scanning = 2,
    Scanned = 3,
    Reading = 4,
    Ready = 5,
    Paused = 6,
}

impl BusState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BusState::Started,
            2 => BusState::Scanning,
            3 => BusState::Scanned,
            4 => BusState::Reading,
            5 => BusState::Ready,
            6 => BusState::Paused,
            _ => BusState::Stopped,
        }
    }
}

/// SerialBus Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use mercury_sdk::bus::BusBuilder;
///
/// let mut bus = BusBuilder::new()
///     .frequency(30)
///     .build();
/// bus.connect("/dev/ttyUSB0", 1_000_000).unwrap();
/// ```
pub struct BusBuilder {
    frequency: u16,
    family: ServoFamily,
    ack_policy: AckPolicy,
    usb2ax: bool,
    latency_ms: u64,
    readd_delay: Duration,
}

impl BusBuilder {
    pub fn new() -> Self {
        Self {
            frequency: 30,
            family: ServoFamily::ArcadiaV1,
            ack_policy: AckPolicy::default(),
            usb2ax: false,
            latency_ms: DEFAULT_LATENCY_MS,
            readd_delay: Duration::from_secs(2),
        }
    }

    /// 同步频率（Hz），合法区间 [1, 120]，越界时收拢并告警
    pub fn frequency(mut self, hz: u16) -> Self {
        if !FREQUENCY_RANGE.contains(&hz) {
            let clamped = hz.clamp(*FREQUENCY_RANGE.start(), *FREQUENCY_RANGE.end());
            warn!("Sync frequency {} Hz out of range, clamped to {}", hz, clamped);
            self.frequency = clamped;
        } else {
            self.frequency = hz;
        }
        self
    }

    /// 扫描到的设备默认实例化的舵机系列
    pub fn family(mut self, family: ServoFamily) -> Self {
        self.family = family;
        self
    }

    /// 状态应答策略
    pub fn ack_policy(mut self, ack: AckPolicy) -> Self {
        self.ack_policy = ack;
        self
    }

    /// 链路使用 USB2AX 转接器（253 被转接器占用，设备上限降为 252）
    pub fn usb2ax(mut self, enabled: bool) -> Self {
        self.usb2ax = enabled;
        self
    }

    /// 基础接收延迟（毫秒）
    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    /// 重启/重置后延迟回归的等待时长
    pub fn readd_delay(mut self, delay: Duration) -> Self {
        self.readd_delay = delay;
        self
    }

    /// 构建一个处于 stopped 状态的总线
    pub fn build(self) -> SerialBus {
        let (tx, rx) = unbounded();
        let max_id = if self.usb2ax { 252 } else { 253 };

        SerialBus {
            frequency: self.frequency,
            family: self.family,
            ack_policy: self.ack_policy,
            max_id,
            latency_ms: self.latency_ms,
            readd_delay: self.readd_delay,
            queue_tx: tx,
            queue_rx: rx,
            registry: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(AtomicU8::new(BusState::Stopped as u8)),
            errors: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 一条受管总线（对外 API）
///
/// 创建后处于 stopped 状态；`connect` 打开串口并启动同步线程，
/// `disconnect`（或 Drop）停线程、清队列、释放影子、关串口。
pub struct SerialBus {
    frequency: u16,
    family: ServoFamily,
    ack_policy: AckPolicy,
    max_id: u8,
    latency_ms: u64,
    readd_delay: Duration,
    queue_tx: Sender<BusMessage>,
    /// 保留一个接收端用于 disconnect 时清空队列
    queue_rx: Receiver<BusMessage>,
    registry: Arc<Mutex<Vec<Arc<ServoShadow>>>>,
    state: Arc<AtomicU8>,
    errors: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SerialBus {
    // ============================================================
    // 生命周期
    // ============================================================

    /// 打开串口并启动同步线程
    ///
    /// # 参数
    /// - `path`: 串口设备节点路径
    /// - `baud`: 波特率；小于 255 的值按 Mercury "baudnum" 解释
    ///
    /// # 错误
    /// - `BusError::AlreadyConnected`: 总线已在运行
    /// - `BusError::Serial`: 串口打开失败
    pub fn connect(&mut self, path: &str, baud: u32) -> Result<(), BusError> {
        let baudrate = if baud < 255 {
            baudnum_to_baudrate(baud as u8)
        } else {
            baud
        };
        let link = UsbSerialLink::open(path, baudrate)?;
        self.connect_link(link)
    }

    /// 在一条已就绪的链路上启动同步线程
    ///
    /// 测试时用它注入仿真链路。
    pub fn connect_link<L>(&mut self, link: L) -> Result<(), BusError>
    where
        L: SerialLink + 'static,
    {
        if self.running.load(Ordering::Acquire) {
            return Err(BusError::AlreadyConnected);
        }

        let mut engine = TransactionEngine::new(link);
        engine.set_ack_policy(self.ack_policy);
        engine.set_latency(self.latency_ms);

        self.running.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.state.store(BusState::Started as u8, Ordering::Release);

        let mut sync_loop = SyncLoop {
            engine,
            rx: self.queue_rx.clone(),
            tx: self.queue_tx.clone(),
            registry: self.registry.clone(),
            state: self.state.clone(),
            errors: self.errors.clone(),
            running: self.running.clone(),
            paused: self.paused.clone(),
            frequency: u32::from(self.frequency),
            period: Duration::from_secs_f64(1.0 / f64::from(self.frequency)),
            counter: 0,
            update_list: Vec::new(),
            sync_list: Vec::new(),
            max_id: self.max_id,
            readd_delay: self.readd_delay,
        };

        self.thread = Some(std::thread::spawn(move || {
            sync_loop.run();
        }));

        Ok(())
    }

    /// 停线程、清空消息队列、释放全部影子
    ///
    /// 在途事务会自然完成或超时；重复调用是无害的。
    pub fn disconnect(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Sync thread panicked during shutdown");
            }
        }

        // 清掉积压消息（未生效的延迟消息一并丢弃）
        while self.queue_rx.try_recv().is_ok() {}

        self.registry.lock().clear();
        self.state.store(BusState::Stopped as u8, Ordering::Release);
    }

    // ============================================================
    // 设备管理
    // ============================================================

    /// 扫描一段 ID 范围内的设备
    ///
    /// 扫描会注销当前全部影子，并临时把接收延迟降到 8 ms。
    /// 找到的设备按型号实例化影子并加入同步集合。
    pub fn autodetect(&self, start: u8, stop: u8) {
        self.post(BusMessage::now(BusCommand::Autodetect { start, stop }));
    }

    /// 扫描整条总线（[0, max_id]）
    pub fn autodetect_all(&self) {
        self.autodetect(0, self.max_id);
    }

    /// 注册一个已构造的影子
    ///
    /// 同一 ID 重复注册只会保留第一个。
    pub fn register(&self, shadow: Arc<ServoShadow>) {
        self.post(BusMessage::now(BusCommand::Register(shadow)));
    }

    /// 按 ID 创建并注册一个默认系列的影子
    pub fn register_id(&self, id: u8) -> Arc<ServoShadow> {
        let shadow = ServoShadow::new(id, self.family);
        self.register(shadow.clone());
        shadow
    }

    /// 注销一个影子
    pub fn unregister(&self, id: u8) {
        self.post(BusMessage::now(BusCommand::Unregister(id)));
    }

    /// 注销全部影子
    pub fn unregister_all(&self) {
        self.post(BusMessage::now(BusCommand::UnregisterAll));
    }

    /// 按 ID 取回影子
    pub fn servo(&self, id: u8) -> Option<Arc<ServoShadow>> {
        self.registry.lock().iter().find(|s| s.id() == id).cloned()
    }

    /// 当前注册的全部影子
    pub fn servos(&self) -> Vec<Arc<ServoShadow>> {
        self.registry.lock().clone()
    }

    // ============================================================
    // 状态与观测
    // ============================================================

    pub fn state(&self) -> BusState {
        BusState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 累计总线错误数
    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn clear_errors(&self) {
        self.errors.store(0, Ordering::Relaxed);
    }

    /// 阻塞等待控制器进入 ready 状态
    ///
    /// 扫描或手动注册之后调用，给控制器处理新设备的时间。
    /// 返回是否在超时前就绪。
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.state() == BusState::Ready {
                return true;
            }
            if !self.running.load(Ordering::Acquire) {
                return false;
            }
            std::thread::sleep(Duration::from_millis(4));
        }
        self.state() == BusState::Ready
    }

    /// 暂停同步循环（ready ↔ paused）
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// 恢复同步循环
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// 调整串口基础接收延迟（毫秒）
    pub fn set_latency(&self, ms: u64) {
        self.post(BusMessage::now(BusCommand::SetLatency(ms)));
    }

    /// 本机可用的串口设备节点
    pub fn available_ports() -> Vec<String> {
        available_ports()
    }

    /// 配置的设备 ID 上限
    pub fn max_id(&self) -> u8 {
        self.max_id
    }

    fn post(&self, message: BusMessage) {
        if !self.running.load(Ordering::Acquire) {
            warn!("Bus is not running, message discarded");
            return;
        }
        // 收发两端都活在 SerialBus 里，send 不会失败
        let _ = self.queue_tx.send(message);
    }
}

impl Drop for SerialBus {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================
// 同步循环（后台线程私有）
// ============================================================

struct SyncLoop<L: SerialLink> {
    engine: TransactionEngine<L>,
    rx: Receiver<BusMessage>,
    tx: Sender<BusMessage>,
    registry: Arc<Mutex<Vec<Arc<ServoShadow>>>>,
    state: Arc<AtomicU8>,
    errors: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    frequency: u32,
    period: Duration,
    counter: u32,
    /// 等待初始全寄存器读取的设备
    update_list: Vec<u8>,
    /// 保持同步的设备
    sync_list: Vec<u8>,
    max_id: u8,
    readd_delay: Duration,
}

impl<L: SerialLink> SyncLoop<L> {
    fn run(&mut self) {
        info!(
            "Sync loop running on '{}' @ {} Hz",
            self.engine.device_path(),
            self.frequency
        );

        let sleeper = SpinSleeper::default();

        while self.running.load(Ordering::Acquire) {
            let start = Instant::now();

            if self.paused.load(Ordering::Acquire) {
                if self.current_state() == BusState::Ready {
                    self.set_state(BusState::Paused);
                }
                sleeper.sleep(self.period);
                continue;
            }
            if self.current_state() == BusState::Paused {
                self.set_state(BusState::Ready);
            }

            self.process_messages();
            self.process_actions();
            self.initial_reads();
            self.sync_pass();

            self.counter = (self.counter + 1) % self.frequency;

            // 超出本轮预算就不睡了，直接进下一轮
            let elapsed = start.elapsed();
            if elapsed < self.period {
                sleeper.sleep(self.period - elapsed);
            }
        }

        info!("Sync loop stopped on '{}'", self.engine.device_path());
    }

    fn current_state(&self) -> BusState {
        BusState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: BusState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn record_error(&self, shadow: &ServoShadow) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        shadow.set_comm_status(self.engine.last_status());
    }

    // ------------------------------------------------------------
    // 消息处理
    // ------------------------------------------------------------

    fn process_messages(&mut self) {
        let now = Instant::now();

        // 只消化本轮进来前的积压；生效时刻在未来的消息投回队尾，
        // 计数上限保证这次排空一定会终止
        let backlog = self.rx.len();
        for _ in 0..backlog {
            let Ok(message) = self.rx.try_recv() else {
                break;
            };

            if message.when > now {
                let _ = self.tx.send(message);
                continue;
            }

            match message.command {
                BusCommand::Autodetect { start, stop } => self.scan(start, stop),
                BusCommand::Register(shadow) => self.register_shadow(shadow),
                BusCommand::Unregister(id) => self.unregister_id(id),
                BusCommand::UnregisterAll => self.unregister_all(),
                BusCommand::DelayedAdd { id, initial_read } => {
                    if initial_read && !self.update_list.contains(&id) {
                        self.update_list.push(id);
                    }
                    if !self.sync_list.contains(&id) {
                        self.sync_list.push(id);
                    }
                },
                BusCommand::SetLatency(ms) => {
                    self.engine.set_latency(ms);
                },
            }
        }
    }

    fn register_shadow(&mut self, shadow: Arc<ServoShadow>) {
        let id = shadow.id();
        {
            let mut registry = self.registry.lock();
            if registry.iter().any(|s| s.id() == id) {
                warn!("Servo #{} already registered, ignoring", id);
                return;
            }
            registry.push(shadow);
        }

        if !self.update_list.contains(&id) {
            self.update_list.push(id);
        }
        if !self.sync_list.contains(&id) {
            self.sync_list.push(id);
        }
    }

    fn unregister_id(&mut self, id: u8) {
        self.registry.lock().retain(|s| s.id() != id);
        self.update_list.retain(|&i| i != id);
        self.sync_list.retain(|&i| i != id);
    }

    fn unregister_all(&mut self) {
        self.registry.lock().clear();
        self.update_list.clear();
        self.sync_list.clear();
    }

    // ------------------------------------------------------------
    // 扫描
    // ------------------------------------------------------------

    fn scan(&mut self, start: u8, stop: u8) {
        self.set_state(BusState::Scanning);
        self.unregister_all();

        // 收拢扫描范围
        let start = if start > self.max_id.saturating_sub(1) {
            0
        } else {
            start
        };
        let stop = if stop < 1 || stop > self.max_id || stop < start {
            self.max_id
        } else {
            stop
        };

        // 压低接收超时，让无应答的 ID 尽快失败
        let saved_latency = self.engine.latency();
        self.engine.set_latency(SCAN_LATENCY_MS);

        info!(
            "Scanning for Mercury devices on '{}', range is [{},{}]",
            self.engine.device_path(),
            start,
            stop
        );

        for id in start..=stop {
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            match self.engine.ping(id, None) {
                Ok(resp) => match model_to_family(resp.model_number) {
                    Some(family) => {
                        info!(
                            "[#{}] {} servo found!",
                            id,
                            model_name(resp.model_number)
                        );
                        let shadow = ServoShadow::with_model(id, family, resp.model_number);
                        self.registry.lock().push(shadow);
                        self.update_list.push(id);
                        self.sync_list.push(id);
                    },
                    None => {
                        warn!(
                            "[#{}] device answered but model 0x{:04X} is not supported",
                            id, resp.model_number
                        );
                    },
                },
                Err(_) => {
                    trace!("[#{}] no answer", id);
                },
            }
        }

        self.engine.set_latency(saved_latency);
        self.set_state(BusState::Scanned);
    }

    // ------------------------------------------------------------
    // 动作标记
    // ------------------------------------------------------------

    fn process_actions(&mut self) {
        // 先在注册表锁里取快照，线缆操作全部在锁外做
        let snapshot: Vec<Arc<ServoShadow>> = self.registry.lock().clone();

        for shadow in snapshot {
            let id = shadow.id();
            let flags = shadow.take_actions();

            if flags.refresh {
                if !self.update_list.contains(&id) {
                    self.update_list.push(id);
                }
                info!("Refresh servo #{} registers", id);
            }

            if flags.action {
                if let Err(e) = self.engine.action(id, None) {
                    warn!("ACTION failed for servo #{}: {}", id, e);
                    self.record_error(&shadow);
                }
            }

            if flags.reboot {
                self.drop_from_lists(id);

                // v1 协议没有 REBOOT，调用固定失败并计一次错误；
                // 延迟回归仍然照常发出
                if self.engine.reboot(id).is_err() {
                    self.record_error(&shadow);
                }
                info!("Rebooting servo #{}...", id);

                let _ = self.tx.send(BusMessage::delayed(
                    BusCommand::DelayedAdd {
                        id,
                        initial_read: true,
                    },
                    self.readd_delay,
                ));
            }

            if let Some(mode) = flags.reset {
                self.drop_from_lists(id);

                if let Err(e) = self.engine.factory_reset(id, mode, None) {
                    warn!("Factory reset failed for servo #{}: {}", id, e);
                    self.record_error(&shadow);
                }
                info!("Resetting servo #{} ({:?})...", id, mode);

                let _ = self.tx.send(BusMessage::delayed(
                    BusCommand::DelayedAdd {
                        id,
                        initial_read: true,
                    },
                    self.readd_delay,
                ));
            }
        }
    }

    fn drop_from_lists(&mut self, id: u8) {
        self.update_list.retain(|&i| i != id);
        self.sync_list.retain(|&i| i != id);
    }

    // ------------------------------------------------------------
    // 初始读
    // ------------------------------------------------------------

    fn initial_reads(&mut self) {
        if self.update_list.is_empty() {
            return;
        }
        self.set_state(BusState::Reading);

        let ids = std::mem::take(&mut self.update_list);
        for id in ids {
            let Some(shadow) = self.find_shadow(id) else {
                continue;
            };

            // 跳过第 0 行：型号编号在扫描时就拿到了
            for index in 1..shadow.register_count() {
                let Some(reg) = shadow.control_table().at(index).copied() else {
                    continue;
                };
                if let Some(addr) = reg.eeprom_addr {
                    self.read_register_into(&shadow, id, &reg, addr);
                }
                if let Some(addr) = reg.ram_addr {
                    self.read_register_into(&shadow, id, &reg, addr);
                }
            }
        }

        self.set_state(BusState::Ready);
    }

    /// 按描述符宽度读一个寄存器并回写镜像；失败只计错，不污染镜像
    fn read_register_into(
        &mut self,
        shadow: &Arc<ServoShadow>,
        id: u8,
        reg: &RegisterDescriptor,
        address: u8,
    ) {
        let result = if reg.size == 1 {
            self.engine.read_byte(id, address, None).map(i32::from)
        } else {
            self.engine.read_word(id, address, None).map(i32::from)
        };

        match result {
            Ok(value) => {
                shadow.update_value(reg.name, value);
                let device_error = self.engine.last_device_error();
                shadow.set_device_error(device_error);
                if !device_error.is_ok() {
                    report_device_error(id, device_error);
                }
            },
            Err(_) => self.record_error(shadow),
        }
    }

    // ------------------------------------------------------------
    // 周期同步
    // ------------------------------------------------------------

    fn sync_pass(&mut self) {
        let ids = self.sync_list.clone();
        let mut cumulid: u32 = 0;

        for id in ids {
            cumulid = (cumulid + 1) % self.frequency;

            let Some(shadow) = self.find_shadow(id) else {
                continue;
            };

            self.flush_dirty_registers(&shadow, id);

            // 1 Hz 低速档：电压与温度
            if self.counter == cumulid {
                self.refresh_register(&shadow, id, RegisterName::CurrentVoltage);
                self.refresh_register(&shadow, id, RegisterName::CurrentTemperature);
            }

            // 1/4 速遥测档：速度、负载、运动标志
            if (i64::from(self.counter) - i64::from(cumulid)).rem_euclid(4) == 0 {
                self.refresh_register(&shadow, id, RegisterName::CurrentSpeed);
                self.refresh_register(&shadow, id, RegisterName::CurrentLoad);
                self.refresh_register(&shadow, id, RegisterName::Moving);
            }

            // 全速档：当前位置、目标位置提交
            self.refresh_register(&shadow, id, RegisterName::CurrentPosition);

            if shadow.goal_position_pending() {
                self.commit_goal(&shadow, id);
            }
            if !shadow.goal_position_pending() {
                self.refresh_register(&shadow, id, RegisterName::GoalPosition);
            }
        }
    }

    /// 把一个影子的全部脏寄存器写到总线上
    fn flush_dirty_registers(&mut self, shadow: &Arc<ServoShadow>, id: u8) {
        for index in 0..shadow.register_count() {
            let Some(reg) = shadow.control_table().at(index).copied() else {
                continue;
            };

            if shadow.pending(reg.name, RegisterArea::Eeprom) {
                if let Some(addr) = reg.eeprom_addr {
                    self.write_register_from(shadow, id, &reg, addr, RegisterArea::Eeprom);
                }
            }
            if shadow.pending(reg.name, RegisterArea::Ram) {
                if let Some(addr) = reg.ram_addr {
                    self.write_register_from(shadow, id, &reg, addr, RegisterArea::Ram);
                }
            }
        }
    }

    fn write_register_from(
        &mut self,
        shadow: &Arc<ServoShadow>,
        id: u8,
        reg: &RegisterDescriptor,
        address: u8,
        area: RegisterArea,
    ) {
        let Some(value) = shadow.value(reg.name) else {
            return;
        };

        let result = if reg.size == 1 {
            self.engine.write_byte(id, address, value as u8, None)
        } else {
            self.engine.write_word(id, address, value as u16, None)
        };

        match result {
            Ok(device_error) => {
                shadow.set_device_error(device_error);
                if !device_error.is_ok() {
                    report_device_error(id, device_error);
                }
                shadow.commit(reg.name, area);
            },
            Err(_) => self.record_error(shadow),
        }
    }

    /// 回读一个寄存器到镜像（auto 寻址）
    fn refresh_register(&mut self, shadow: &Arc<ServoShadow>, id: u8, name: RegisterName) {
        let Some(index) = shadow.control_table().index_of(name) else {
            return;
        };
        let Some(reg) = shadow.control_table().at(index).copied() else {
            return;
        };
        let Some(addr) = reg.address(RegisterArea::Auto) else {
            return;
        };
        self.read_register_into(shadow, id, &reg, addr);
    }

    /// 提交挂起的目标位置，成功后清除挂起标记
    fn commit_goal(&mut self, shadow: &Arc<ServoShadow>, id: u8) {
        let Some(addr) = shadow
            .control_table()
            .address(RegisterName::GoalPosition, RegisterArea::Ram)
        else {
            return;
        };
        let goal = shadow.goal_position();

        match self.engine.write_word(id, addr, goal as u16, None) {
            Ok(device_error) => {
                shadow.set_device_error(device_error);
                if !device_error.is_ok() {
                    report_device_error(id, device_error);
                }
                shadow.commit_goal_position();
            },
            Err(_) => self.record_error(shadow),
        }
    }

    fn find_shadow(&self, id: u8) -> Option<Arc<ServoShadow>> {
        self.registry.lock().iter().find(|s| s.id() == id).cloned()
    }
}
