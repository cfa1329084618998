//! 指令包编码与状态包解码
//!
//! 帧格式（与线缆字节序一一对应）：
//!
//! ```text
//! 指令包:  FF FF ID LEN INSTR P1..Pn CHK     LEN = n + 2
//! 状态包:  FF FF ID LEN ERR   P1..Pm CHK     LEN = m + 2
//! ```
//!
//! 校验和对 [ID, LEN, INSTR/ERR, P1..] 求八位和后取反。

use smallvec::SmallVec;

use super::constants::{Instruction, BROADCAST_ID, HEADER, MAX_PACKET_LEN, MIN_STATUS_PACKET_LEN};
use super::{DeviceError, ProtocolError};

/// 包内各字段的偏移
pub const PKT_ID: usize = 2;
pub const PKT_LENGTH: usize = 3;
pub const PKT_INSTRUCTION: usize = 4;
pub const PKT_ERRBIT: usize = 4;
pub const PKT_PARAMETER: usize = 5;

/// 帧字节缓冲
///
/// 绝大多数帧（读写单个寄存器）不超过 32 字节，栈上直接放下；
/// 更长的 SYNC_WRITE 帧自动溢出到堆，上限仍是 150 字节。
pub type PacketBuffer = SmallVec<[u8; 32]>;

/// 对一个完整帧计算校验和
///
/// `length_field` 是帧内的 LEN 字节；参与求和的是从 ID 起的
/// `length_field + 1` 个字节（ID、LEN、INSTR/ERR、参数）。
/// 调用方必须先保证 `frame.len() == length_field + 4`。
pub fn packet_checksum(frame: &[u8], length_field: u8) -> u8 {
    let mut checksum: u8 = 0;
    for i in 0..(length_field as usize + 1) {
        checksum = checksum.wrapping_add(frame[PKT_ID + i]);
    }
    !checksum
}

/// 待发送的指令包
#[derive(Debug, Clone)]
pub struct InstructionPacket {
    pub id: u8,
    pub instruction: Instruction,
    params: PacketBuffer,
}

impl InstructionPacket {
    /// 组装一个指令包
    ///
    /// # 错误
    /// - `ProtocolError::PacketTooLong`: 参数过多，帧总长超过 150 字节
    pub fn new(id: u8, instruction: Instruction, params: &[u8]) -> Result<Self, ProtocolError> {
        let total = params.len() + 6;
        if total > MAX_PACKET_LEN {
            return Err(ProtocolError::PacketTooLong { size: total });
        }

        Ok(Self {
            id,
            instruction,
            params: PacketBuffer::from_slice(params),
        })
    }

    /// 该包是否发往广播地址
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.id == BROADCAST_ID
    }

    /// LEN 字段的取值（参数个数 + 2）
    #[inline]
    pub fn length_field(&self) -> u8 {
        (self.params.len() + 2) as u8
    }

    /// 帧总长（LEN + 4）
    #[inline]
    pub fn total_len(&self) -> usize {
        self.params.len() + 6
    }

    #[inline]
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// 编码为完整的线缆帧（含帧头与校验和）
    pub fn encode(&self) -> PacketBuffer {
        let mut frame = PacketBuffer::with_capacity(self.total_len());
        frame.extend_from_slice(&HEADER);
        frame.push(self.id);
        frame.push(self.length_field());
        frame.push(self.instruction.code());
        frame.extend_from_slice(&self.params);
        let checksum = packet_checksum(&frame, self.length_field());
        frame.push(checksum);
        frame
    }
}

/// 已收到并通过校验的状态包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    pub error: DeviceError,
    params: PacketBuffer,
}

impl StatusPacket {
    /// 解析一个完整的状态包帧
    ///
    /// 输入必须是恰好一帧（已完成帧头对齐与长度补齐）。
    /// 校验之前先核对帧总长与 LEN 字段一致，不一致按损坏处理。
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < MIN_STATUS_PACKET_LEN {
            return Err(ProtocolError::PacketTooShort { size: frame.len() });
        }
        if frame.len() > MAX_PACKET_LEN {
            return Err(ProtocolError::PacketTooLong { size: frame.len() });
        }
        if frame[0..2] != HEADER {
            return Err(ProtocolError::HeaderNotFound);
        }

        let length_field = frame[PKT_LENGTH];
        let expected = length_field as usize + 4;
        if frame.len() != expected {
            return Err(ProtocolError::LengthMismatch {
                expected,
                actual: frame.len(),
            });
        }

        let computed = packet_checksum(frame, length_field);
        let received = frame[expected - 1];
        if computed != received {
            return Err(ProtocolError::ChecksumMismatch { computed, received });
        }

        Ok(Self {
            id: frame[PKT_ID],
            error: DeviceError(frame[PKT_ERRBIT]),
            params: PacketBuffer::from_slice(&frame[PKT_PARAMETER..expected - 1]),
        })
    }

    #[inline]
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// 取第 index 个参数字节
    pub fn param(&self, index: usize) -> Option<u8> {
        self.params.get(index).copied()
    }
}

/// 在接收缓冲区中定位帧头的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderScan {
    /// 在 `offset` 处找到完整的 FF FF 帧头
    Found { offset: usize },
    /// 末尾只有孤立的一个 0xFF，可能是被截断的帧头首字节
    Partial { offset: usize },
    /// 缓冲区里没有帧头
    Missing,
}

/// 扫描缓冲区寻找 0xFF 0xFF 帧头
///
/// 事务引擎用它做失步恢复：`Found { offset > 0 }` 时把缓冲区
/// 下移 offset 字节；`Partial` 时保留末尾的 0xFF 继续收；
/// `Missing` 时整个缓冲区都是垃圾。
pub fn find_header(buf: &[u8]) -> HeaderScan {
    if buf.is_empty() {
        return HeaderScan::Missing;
    }

    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == 0xFF && buf[i + 1] == 0xFF {
            return HeaderScan::Found { offset: i };
        }
    }

    if buf[buf.len() - 1] == 0xFF {
        return HeaderScan::Partial {
            offset: buf.len() - 1,
        };
    }

    HeaderScan::Missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_frame_encoding() {
        // 协议手册基准向量: ping(id=1) -> FF FF 01 02 01 FB
        let packet = InstructionPacket::new(1, Instruction::Ping, &[]).unwrap();
        let frame = packet.encode();
        assert_eq!(frame.as_slice(), &[0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
    }

    #[test]
    fn test_read_word_frame_encoding() {
        // read_word(id=2, addr=36) -> FF FF 02 04 02 24 02 D1
        let packet = InstructionPacket::new(2, Instruction::Read, &[36, 2]).unwrap();
        let frame = packet.encode();
        assert_eq!(
            frame.as_slice(),
            &[0xFF, 0xFF, 0x02, 0x04, 0x02, 0x24, 0x02, 0xD1]
        );
    }

    #[test]
    fn test_write_byte_frame_encoding() {
        // write_byte(id=3, addr=25, 1) -> FF FF 03 04 03 19 01 DB
        let packet = InstructionPacket::new(3, Instruction::Write, &[25, 1]).unwrap();
        let frame = packet.encode();
        assert_eq!(
            frame.as_slice(),
            &[0xFF, 0xFF, 0x03, 0x04, 0x03, 0x19, 0x01, 0xDB]
        );
    }

    #[test]
    fn test_goal_position_clamped_encoding() {
        // 1023 编码为 FF 03（低字节在前）
        let packet = InstructionPacket::new(1, Instruction::Write, &[30, 0xFF, 0x03]).unwrap();
        let frame = packet.encode();
        assert_eq!(&frame[5..7], &[0xFF, 0x03]);
    }

    #[test]
    fn test_packet_too_long_rejected() {
        let params = [0u8; MAX_PACKET_LEN];
        let err = InstructionPacket::new(1, Instruction::SyncWrite, &params).unwrap_err();
        assert!(matches!(err, ProtocolError::PacketTooLong { .. }));

        // 刚好 150 字节是允许的
        let params = [0u8; MAX_PACKET_LEN - 6];
        assert!(InstructionPacket::new(1, Instruction::SyncWrite, &params).is_ok());
    }

    #[test]
    fn test_status_packet_parse() {
        // ping 应答: FF FF 01 02 00 FC
        let status = StatusPacket::parse(&[0xFF, 0xFF, 0x01, 0x02, 0x00, 0xFC]).unwrap();
        assert_eq!(status.id, 1);
        assert!(status.error.is_ok());
        assert!(status.params().is_empty());
    }

    #[test]
    fn test_status_packet_with_params() {
        // read_word 应答: FF FF 02 04 00 FF 03 F7, 值 = 0x03FF = 1023
        let status = StatusPacket::parse(&[0xFF, 0xFF, 0x02, 0x04, 0x00, 0xFF, 0x03, 0xF7]).unwrap();
        assert_eq!(status.id, 2);
        assert!(status.error.is_ok());
        assert_eq!(status.params(), &[0xFF, 0x03]);
        assert_eq!(
            crate::protocol::make_word(status.param(0).unwrap(), status.param(1).unwrap()),
            1023
        );
    }

    #[test]
    fn test_status_packet_bad_checksum() {
        let err = StatusPacket::parse(&[0xFF, 0xFF, 0x01, 0x02, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_status_packet_length_mismatch() {
        // LEN 声称有 4（两个参数），但帧只有 6 字节
        let err = StatusPacket::parse(&[0xFF, 0xFF, 0x01, 0x04, 0x00, 0xFB]).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthMismatch { .. }));
    }

    #[test]
    fn test_status_packet_error_bits() {
        // ERR = 0x24 (overheat | overload), checksum = ~(01+02+24) = ~0x27 = 0xD8
        let status = StatusPacket::parse(&[0xFF, 0xFF, 0x01, 0x02, 0x24, 0xD8]).unwrap();
        assert!(status.error.overheat());
        assert!(status.error.overload());
        assert!(!status.error.voltage());
    }

    #[test]
    fn test_encode_parse_roundtrip_checksum() {
        // 任意编码出来的帧都应当通过解码侧的校验
        let packet = InstructionPacket::new(5, Instruction::Write, &[30, 0x12, 0x02]).unwrap();
        let frame = packet.encode();
        let checksum = packet_checksum(&frame, frame[PKT_LENGTH]);
        assert_eq!(checksum, frame[frame.len() - 1]);
    }

    #[test]
    fn test_find_header_at_start() {
        assert_eq!(
            find_header(&[0xFF, 0xFF, 0x01, 0x02]),
            HeaderScan::Found { offset: 0 }
        );
    }

    #[test]
    fn test_find_header_with_garbage_prefix() {
        // 协议手册基准向量: AA FF FF 01 02 00 FC -> 去掉前导 AA 后可解析
        let buf = [0xAA, 0xFF, 0xFF, 0x01, 0x02, 0x00, 0xFC];
        assert_eq!(find_header(&buf), HeaderScan::Found { offset: 1 });
        let status = StatusPacket::parse(&buf[1..]).unwrap();
        assert_eq!(status.id, 1);
    }

    #[test]
    fn test_find_header_missing() {
        assert_eq!(find_header(&[0xAA, 0xBB]), HeaderScan::Missing);
        assert_eq!(find_header(&[]), HeaderScan::Missing);
    }

    #[test]
    fn test_find_header_trailing_partial() {
        assert_eq!(
            find_header(&[0xAA, 0xBB, 0xFF]),
            HeaderScan::Partial { offset: 2 }
        );
        assert_eq!(find_header(&[0xFF]), HeaderScan::Partial { offset: 0 });
    }
}
