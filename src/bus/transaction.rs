//! 单飞事务引擎
//!
//! 一条总线同一时刻只允许一笔在途事务。引擎独占一条串行链路，
//! 维护软件事务锁、最近一次通信状态、最近收发的帧字节，
//! 并实现半双工总线上的发送/接收状态机：
//!
//! 1. 取事务锁；上一笔以 RxTimeout/RxCorrupt 结束时先清洗输入缓冲
//! 2. 组帧、校验、整帧写出（写不全即 TxFail）
//! 3. 广播或 ack 策略豁免时不等应答，否则按预期应答长度武装超时
//! 4. 分轮接收，扫描 0xFF 0xFF 帧头做失步恢复，RxWaiting 续收
//! 5. 核对应答 ID 与校验和，任何出口都释放事务锁

use tracing::{error, trace};

use crate::protocol::{
    find_header, make_word, CommStatus, DeviceError, HeaderScan, Instruction, InstructionPacket,
    PingResponse, StatusPacket, BROADCAST_ID, MAX_PACKET_LEN, MIN_STATUS_PACKET_LEN, PKT_ID,
    PKT_LENGTH,
};
use crate::serial::SerialLink;

use super::{AckPolicy, BusError};

/// 把状态包里的设备错误位域逐项写入日志（错误级别）
pub fn report_device_error(id: u8, error: DeviceError) {
    for flag in error.describe() {
        error!("[#{}] Protocol Error: {} error!", id, flag);
    }
}

/// 单飞事务引擎
///
/// 泛型于串行链路实现，测试时注入仿真链路。
pub struct TransactionEngine<L: SerialLink> {
    link: L,
    ack_policy: AckPolicy,
    /// 软件事务锁。单线程内 `&mut self` 已经保证了单飞，
    /// 这个标志承载的是「任何出口都必须释放」的协议不变量。
    lock: bool,
    status: CommStatus,
    /// 最近发送的完整帧
    tx_frame: Vec<u8>,
    /// 接收缓冲区，同时是最近收到的帧
    rx_buf: [u8; MAX_PACKET_LEN],
    rx_received: usize,
}

impl<L: SerialLink> TransactionEngine<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            ack_policy: AckPolicy::default(),
            lock: false,
            status: CommStatus::RxSuccess,
            tx_frame: Vec::new(),
            rx_buf: [0; MAX_PACKET_LEN],
            rx_received: 0,
        }
    }

    // ============================================================
    // 配置与观测
    // ============================================================

    pub fn set_ack_policy(&mut self, ack: AckPolicy) {
        self.ack_policy = ack;
    }

    pub fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    pub fn set_latency(&mut self, ms: u64) {
        self.link.set_latency(ms);
    }

    pub fn latency(&self) -> u64 {
        self.link.latency()
    }

    /// 最近一次事务的通信状态
    pub fn last_status(&self) -> CommStatus {
        self.status
    }

    /// 最近一次事务是否计为一次总线错误
    pub fn last_error_count(&self) -> u32 {
        u32::from(self.status.is_error())
    }

    /// 事务锁当前是否空闲
    pub fn lock_free(&self) -> bool {
        !self.lock
    }

    /// 最近发送的帧字节
    pub fn last_tx_frame(&self) -> &[u8] {
        &self.tx_frame
    }

    /// 最近收到的帧字节
    pub fn last_rx_frame(&self) -> &[u8] {
        &self.rx_buf[..self.rx_received]
    }

    /// 最近一个状态包里的设备错误位域
    ///
    /// 还没收到过完整状态包时返回空位域。
    pub fn last_device_error(&self) -> DeviceError {
        if self.rx_received >= MIN_STATUS_PACKET_LEN {
            DeviceError(self.rx_buf[crate::protocol::PKT_ERRBIT])
        } else {
            DeviceError(0)
        }
    }

    pub fn device_path(&self) -> &str {
        self.link.device_path()
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    // ============================================================
    // 核心事务
    // ============================================================

    /// 发送一笔指令并（按需）等待状态应答
    ///
    /// # 参数
    /// - `id`: 目标设备地址，254 为广播
    /// - `params`: 指令参数字节
    /// - `expected_reply_params`: 预期应答的参数个数，用于武装超时
    /// - `ack`: 本笔事务的 ack 覆盖；`None` 时沿用总线策略
    ///
    /// # 返回
    /// - `Ok(Some(StatusPacket))`: 收到并校验通过的状态包
    /// - `Ok(None)`: 本笔事务按约定不等应答
    /// - `Err(BusError::Comm(..))`: 事务以错误状态结束
    ///
    /// 无论走哪条路径，返回时事务锁一定已释放，
    /// `last_status` 也绝不会停留在 `RxWaiting`。
    pub fn txrx(
        &mut self,
        id: u8,
        instruction: Instruction,
        params: &[u8],
        expected_reply_params: usize,
        ack: Option<AckPolicy>,
    ) -> Result<Option<StatusPacket>, BusError> {
        self.lock = true;

        // 上一笔没收干净时，先把串口里的残渣倒掉
        if matches!(self.status, CommStatus::RxTimeout | CommStatus::RxCorrupt) {
            self.link.flush();
        }

        // 组帧（长度越界在这里拦下）
        let packet = match InstructionPacket::new(id, instruction, params) {
            Ok(packet) => packet,
            Err(e) => {
                self.status = CommStatus::TxError;
                self.lock = false;
                return Err(BusError::Protocol(e));
            },
        };
        let frame = packet.encode();
        self.tx_frame.clear();
        self.tx_frame.extend_from_slice(&frame);
        trace!("Packet sent {:02X?}", &frame[..]);

        // 整帧写出
        let written = match self.link.write(&frame) {
            Ok(n) => n,
            Err(e) => {
                self.status = CommStatus::TxFail;
                self.lock = false;
                return Err(BusError::Serial(e));
            },
        };
        if written != frame.len() {
            self.status = CommStatus::TxFail;
            self.lock = false;
            return Err(BusError::Comm(CommStatus::TxFail));
        }
        self.status = CommStatus::TxSuccess;

        // 要不要等应答
        let effective = ack.unwrap_or(self.ack_policy);
        let expect_reply = id != BROADCAST_ID
            && effective != AckPolicy::NoReply
            && (effective == AckPolicy::ReplyOnAll || instruction == Instruction::Read);

        if !expect_reply {
            self.status = CommStatus::RxSuccess;
            self.lock = false;
            return Ok(None);
        }

        // 按预期应答长度武装接收超时（6 是 v1 状态包的最小长度）
        self.link
            .set_timeout(MIN_STATUS_PACKET_LEN + expected_reply_params);

        let result = self.rx_packet(id);
        self.lock = false;
        if result.is_ok() {
            trace!("Packet recv {:02X?}", self.last_rx_frame());
        }
        result.map(Some)
    }

    /// 接收状态机。返回前 `self.status` 一定是终态。
    fn rx_packet(&mut self, request_id: u8) -> Result<StatusPacket, BusError> {
        let mut expected = MIN_STATUS_PACKET_LEN;
        self.rx_received = 0;

        loop {
            // 本轮续收
            if self.rx_received < expected {
                let n = match self.link.read(&mut self.rx_buf[self.rx_received..expected]) {
                    Ok(n) => n,
                    Err(e) => {
                        self.status = CommStatus::RxFail;
                        return Err(BusError::Serial(e));
                    },
                };
                self.rx_received += n;

                if self.rx_received < expected && self.link.check_timeout() {
                    self.status = if self.rx_received == 0 {
                        CommStatus::RxTimeout
                    } else {
                        CommStatus::RxCorrupt
                    };
                    return Err(BusError::Comm(self.status));
                }
            }

            // 帧头定位与失步恢复
            match find_header(&self.rx_buf[..self.rx_received]) {
                HeaderScan::Found { offset: 0 } => {},
                HeaderScan::Found { offset } | HeaderScan::Partial { offset } => {
                    self.rx_buf.copy_within(offset..self.rx_received, 0);
                    self.rx_received -= offset;
                },
                HeaderScan::Missing => {
                    // 只保留最后一个字节：它可能是下一帧的开始
                    if self.rx_received > 1 {
                        let last = self.rx_buf[self.rx_received - 1];
                        self.rx_buf[0] = last;
                        self.rx_received = 1;
                    }
                },
            }

            if self.rx_received < expected {
                self.status = CommStatus::RxWaiting;
                continue;
            }

            // 应答 ID 必须与请求一致（广播根本不会走到这里）
            if self.rx_buf[PKT_ID] != request_id {
                self.status = CommStatus::RxCorrupt;
                return Err(BusError::Comm(self.status));
            }

            // 长度字段就位，换算出整帧长度
            let full = self.rx_buf[PKT_LENGTH] as usize + 4;
            if full > MAX_PACKET_LEN {
                self.status = CommStatus::RxCorrupt;
                return Err(BusError::Comm(self.status));
            }
            if self.rx_received < full {
                expected = full;
                self.status = CommStatus::RxWaiting;
                continue;
            }

            // 整帧到齐，统一走解码侧校验（长度一致性 + 校验和）
            return match StatusPacket::parse(&self.rx_buf[..full]) {
                Ok(packet) => {
                    self.rx_received = full;
                    self.status = CommStatus::RxSuccess;
                    Ok(packet)
                },
                Err(_) => {
                    self.status = CommStatus::RxCorrupt;
                    Err(BusError::Comm(self.status))
                },
            };
        }
    }

    // ============================================================
    // 便捷指令
    // ============================================================

    /// PING 一个设备
    ///
    /// v1 协议的 PING 应答只说明「在线」；型号与固件版本用两次
    /// 补充 READ 模拟出来（ack 被豁免时返回零值应答）。
    pub fn ping(&mut self, id: u8, ack: Option<AckPolicy>) -> Result<PingResponse, BusError> {
        let reply = self.txrx(id, Instruction::Ping, &[], 0, ack)?;

        match reply {
            Some(status) => {
                if !status.error.is_ok() {
                    report_device_error(id, status.error);
                }
                let model_number = self.read_word(id, 0, ack)?;
                let firmware_version = self.read_byte(id, 2, ack)?;
                Ok(PingResponse {
                    model_number,
                    firmware_version,
                })
            },
            None => Ok(PingResponse::default()),
        }
    }

    /// 读单字节寄存器
    ///
    /// # 错误
    /// - `BusError::BroadcastRead` / `BusError::ReadWithoutAck`:
    ///   调用方缺陷，不触碰总线
    pub fn read_byte(
        &mut self,
        id: u8,
        address: u8,
        ack: Option<AckPolicy>,
    ) -> Result<u8, BusError> {
        self.check_read_allowed(id, ack)?;
        let reply = self.txrx(id, Instruction::Read, &[address, 1], 1, ack)?;
        let Some(packet) = reply else {
            return Err(BusError::ReadWithoutAck);
        };
        match packet.param(0) {
            Some(value) => Ok(value),
            None => {
                self.status = CommStatus::RxCorrupt;
                Err(BusError::Comm(CommStatus::RxCorrupt))
            },
        }
    }

    /// 读双字节寄存器（低字节在前）
    pub fn read_word(
        &mut self,
        id: u8,
        address: u8,
        ack: Option<AckPolicy>,
    ) -> Result<u16, BusError> {
        self.check_read_allowed(id, ack)?;
        let reply = self.txrx(id, Instruction::Read, &[address, 2], 2, ack)?;
        let Some(packet) = reply else {
            return Err(BusError::ReadWithoutAck);
        };
        match (packet.param(0), packet.param(1)) {
            (Some(low), Some(high)) => Ok(make_word(low, high)),
            _ => {
                self.status = CommStatus::RxCorrupt;
                Err(BusError::Comm(CommStatus::RxCorrupt))
            },
        }
    }

    /// 写单字节寄存器。ack 豁免时静默成功。
    pub fn write_byte(
        &mut self,
        id: u8,
        address: u8,
        value: u8,
        ack: Option<AckPolicy>,
    ) -> Result<DeviceError, BusError> {
        let reply = self.txrx(id, Instruction::Write, &[address, value], 0, ack)?;
        Ok(reply.map(|p| p.error).unwrap_or_default())
    }

    /// 写双字节寄存器（低字节在前）
    pub fn write_word(
        &mut self,
        id: u8,
        address: u8,
        value: u16,
        ack: Option<AckPolicy>,
    ) -> Result<DeviceError, BusError> {
        let params = [address, (value & 0xFF) as u8, (value >> 8) as u8];
        let reply = self.txrx(id, Instruction::Write, &params, 0, ack)?;
        Ok(reply.map(|p| p.error).unwrap_or_default())
    }

    /// 触发挂起的 REG_WRITE
    pub fn action(&mut self, id: u8, ack: Option<AckPolicy>) -> Result<(), BusError> {
        self.txrx(id, Instruction::Action, &[], 0, ack)?;
        Ok(())
    }

    /// 恢复出厂设置
    ///
    /// v1 协议不支持分区重置，`_mode` 仅为接口一致性保留。
    pub fn factory_reset(
        &mut self,
        id: u8,
        _mode: crate::servo::ResetMode,
        ack: Option<AckPolicy>,
    ) -> Result<(), BusError> {
        self.txrx(id, Instruction::FactoryReset, &[], 0, ack)?;
        Ok(())
    }

    /// REBOOT 在 v1 协议上不可用，固定以 `TxFail` 失败
    pub fn reboot(&mut self, _id: u8) -> Result<(), BusError> {
        error!("'Reboot' instruction not available with protocol v1!");
        self.status = CommStatus::TxFail;
        Err(BusError::Comm(CommStatus::TxFail))
    }

    /// SYNC_WRITE：一帧广播写多个设备的同一个寄存器
    ///
    /// 广播帧永远没有应答。
    pub fn sync_write(
        &mut self,
        address: u8,
        size: u8,
        values: &[(u8, u16)],
    ) -> Result<(), BusError> {
        let mut params = Vec::with_capacity(2 + values.len() * (size as usize + 1));
        params.push(address);
        params.push(size);
        for &(id, value) in values {
            params.push(id);
            params.push((value & 0xFF) as u8);
            if size == 2 {
                params.push((value >> 8) as u8);
            }
        }
        self.txrx(BROADCAST_ID, Instruction::SyncWrite, &params, 0, None)?;
        Ok(())
    }

    fn check_read_allowed(&mut self, id: u8, ack: Option<AckPolicy>) -> Result<(), BusError> {
        if id == BROADCAST_ID {
            error!("Cannot send 'Read' instruction to broadcast address!");
            return Err(BusError::BroadcastRead);
        }
        if ack.unwrap_or(self.ack_policy) == AckPolicy::NoReply {
            error!("Cannot send 'Read' instruction if ACK_NO_REPLY is set!");
            return Err(BusError::ReadWithoutAck);
        }
        Ok(())
    }
}
