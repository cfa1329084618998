//! 集成测试公共设施：仿真总线链路
//!
//! `MockBusLink` 实现 `SerialLink`，在内存里模拟一条挂着若干
//! 舵机的半双工总线：解析写入的指令帧，按寄存器文件生成状态
//! 应答。应答队列空即视为接收超时，测试因此不依赖真实时钟。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use mercury_sdk::prelude::*;
use mercury_sdk::protocol::{BROADCAST_ID, PKT_ID, PKT_INSTRUCTION, PKT_LENGTH, PKT_PARAMETER};
use mercury_sdk::servo::ARCADIA_V1_CONTROL_TABLE;

/// 一台仿真舵机：字节寻址的寄存器文件
pub struct MockServo {
    pub id: u8,
    pub model: u16,
    pub regs: [u8; 64],
    /// 应答里携带的设备错误位域
    pub error_bits: u8,
}

impl MockServo {
    pub fn new(id: u8, model: u16) -> Self {
        let mut servo = Self {
            id,
            model,
            regs: [0; 64],
            error_bits: 0,
        };
        servo.load_defaults();
        servo
    }

    fn load_defaults(&mut self) {
        self.regs = [0; 64];
        for reg in ARCADIA_V1_CONTROL_TABLE.iter() {
            let (Some(default), Some(addr)) = (reg.default, reg.address(RegisterArea::Auto)) else {
                continue;
            };
            self.store(addr, reg.size, default as u16);
        }
        // 型号与固件版本
        self.store(0, 2, self.model);
        self.regs[2] = 7;
        // ID 寄存器反映真实 ID
        self.regs[3] = self.id;
    }

    fn store(&mut self, addr: u8, size: u8, value: u16) {
        self.regs[addr as usize] = (value & 0xFF) as u8;
        if size == 2 {
            self.regs[addr as usize + 1] = (value >> 8) as u8;
        }
    }
}

struct MockState {
    servos: Vec<MockServo>,
    reply: VecDeque<u8>,
    /// 写到总线上的全部指令帧（供断言）
    frames: Vec<Vec<u8>>,
    latency: u64,
}

/// 仿真链路（被 move 进同步线程）
pub struct MockBusLink {
    state: Arc<Mutex<MockState>>,
}

/// 仿真总线的测试侧句柄
#[derive(Clone)]
pub struct MockBusHandle {
    state: Arc<Mutex<MockState>>,
}

/// 创建一条挂着 `servos` 的仿真总线
pub fn mock_bus(servos: &[(u8, u16)]) -> (MockBusLink, MockBusHandle) {
    let state = Arc::new(Mutex::new(MockState {
        servos: servos.iter().map(|&(id, model)| MockServo::new(id, model)).collect(),
        reply: VecDeque::new(),
        frames: Vec::new(),
        latency: 10,
    }));
    (
        MockBusLink {
            state: state.clone(),
        },
        MockBusHandle { state },
    )
}

impl MockBusHandle {
    pub fn get_byte(&self, id: u8, addr: u8) -> u8 {
        let state = self.state.lock().unwrap();
        let servo = state.servos.iter().find(|s| s.id == id).unwrap();
        servo.regs[addr as usize]
    }

    pub fn get_word(&self, id: u8, addr: u8) -> u16 {
        let state = self.state.lock().unwrap();
        let servo = state.servos.iter().find(|s| s.id == id).unwrap();
        u16::from_le_bytes([servo.regs[addr as usize], servo.regs[addr as usize + 1]])
    }

    pub fn set_byte(&self, id: u8, addr: u8, value: u8) {
        let mut state = self.state.lock().unwrap();
        let servo = state.servos.iter_mut().find(|s| s.id == id).unwrap();
        servo.regs[addr as usize] = value;
    }

    pub fn set_word(&self, id: u8, addr: u8, value: u16) {
        let mut state = self.state.lock().unwrap();
        let servo = state.servos.iter_mut().find(|s| s.id == id).unwrap();
        servo.regs[addr as usize] = (value & 0xFF) as u8;
        servo.regs[addr as usize + 1] = (value >> 8) as u8;
    }

    pub fn set_error_bits(&self, id: u8, bits: u8) {
        let mut state = self.state.lock().unwrap();
        let servo = state.servos.iter_mut().find(|s| s.id == id).unwrap();
        servo.error_bits = bits;
    }

    /// 到目前为止写出的全部指令帧
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().frames.clone()
    }

    /// 链路当前的基础接收延迟
    pub fn latency(&self) -> u64 {
        self.state.lock().unwrap().latency
    }

    /// 是否出现过发往 `id`、指令为 `instruction` 的帧
    pub fn saw_instruction(&self, id: u8, instruction: u8) -> bool {
        self.state
            .lock()
            .unwrap()
            .frames
            .iter()
            .any(|f| f[PKT_ID] == id && f[PKT_INSTRUCTION] == instruction)
    }
}

fn push_reply(state: &mut MockState, id: u8, error: u8, params: &[u8]) {
    let length = (params.len() + 2) as u8;
    let mut frame = vec![0xFF, 0xFF, id, length, error];
    frame.extend_from_slice(params);
    let mut checksum: u8 = 0;
    for &b in &frame[2..] {
        checksum = checksum.wrapping_add(b);
    }
    frame.push(!checksum);
    state.reply.extend(frame);
}

fn apply_instruction(state: &mut MockState, frame: &[u8]) {
    let id = frame[PKT_ID];
    let instruction = frame[PKT_INSTRUCTION];
    let length = frame[PKT_LENGTH] as usize;
    let params = frame[PKT_PARAMETER..PKT_PARAMETER + length.saturating_sub(2)].to_vec();

    // SYNC_WRITE：广播帧逐设备分发，永不应答
    if instruction == 0x83 {
        let addr = params[0];
        let size = params[1] as usize;
        let mut rest = &params[2..];
        while rest.len() >= 1 + size {
            let target = rest[0];
            if let Some(servo) = state.servos.iter_mut().find(|s| s.id == target) {
                for (i, &b) in rest[1..1 + size].iter().enumerate() {
                    servo.regs[addr as usize + i] = b;
                }
            }
            rest = &rest[1 + size..];
        }
        return;
    }

    if id == BROADCAST_ID {
        // 普通广播：应用到所有设备，不应答
        if instruction == 0x03 {
            let addr = params[0] as usize;
            for servo in state.servos.iter_mut() {
                for (i, &b) in params[1..].iter().enumerate() {
                    servo.regs[addr + i] = b;
                }
            }
        }
        return;
    }

    let Some(index) = state.servos.iter().position(|s| s.id == id) else {
        // 无此设备：总线保持安静，主机侧将超时
        return;
    };
    let error = state.servos[index].error_bits;

    match instruction {
        // PING
        0x01 => push_reply(state, id, error, &[]),
        // READ
        0x02 => {
            let addr = params[0] as usize;
            let count = params[1] as usize;
            let data: Vec<u8> = state.servos[index].regs[addr..addr + count].to_vec();
            push_reply(state, id, error, &data);
        },
        // WRITE
        0x03 => {
            let addr = params[0] as usize;
            for (i, &b) in params[1..].iter().enumerate() {
                state.servos[index].regs[addr + i] = b;
            }
            push_reply(state, id, error, &[]);
        },
        // ACTION
        0x05 => push_reply(state, id, error, &[]),
        // FACTORY_RESET
        0x06 => {
            state.servos[index].load_defaults();
            push_reply(state, id, error, &[]);
        },
        _ => push_reply(state, id, error, &[]),
    }
}

impl SerialLink for MockBusLink {
    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        let mut state = self.state.lock().unwrap();
        state.frames.push(data.to_vec());
        let frame = data.to_vec();
        apply_instruction(&mut state, &frame);
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        let mut state = self.state.lock().unwrap();
        let mut n = 0;
        while n < buf.len() {
            let Some(byte) = state.reply.pop_front() else {
                break;
            };
            buf[n] = byte;
            n += 1;
        }
        Ok(n)
    }

    fn flush(&mut self) {
        self.state.lock().unwrap().reply.clear();
    }

    fn set_latency(&mut self, ms: u64) {
        self.state.lock().unwrap().latency = ms;
    }

    fn latency(&self) -> u64 {
        self.state.lock().unwrap().latency
    }

    fn set_timeout(&mut self, _packet_len: usize) {}

    fn check_timeout(&self) -> bool {
        self.state.lock().unwrap().reply.is_empty()
    }

    fn device_path(&self) -> &str {
        "/dev/mockbus0"
    }
}
