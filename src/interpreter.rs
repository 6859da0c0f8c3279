/// # interpreter
///
/// Machine state visible to a CHIP-8 program:
///  V0-VF  8bit general registers; VF doubles as carry/borrow/collision flag
///  I      16bit address register (12 bits meaningful)
///  PC     program counter                       -- 0x200
///  SP     index of the top call frame           -- -1 when empty
///  DT     delay timer, counts down at 60Hz      -- decremented by tick()
///  ST     sound timer, counts down at 60Hz      -- ditto
///
/// Everything else (the stack of call frames, the display) lives in the
/// memory map and is reached only through its checked accessors.
use crate::config::{Config, ShiftQuirk, SpriteEdge};
use crate::error::Chip8Error;
use crate::input::Input;
use crate::instruction::Instruction;
use crate::memory::{Chip8MemoryMap, MemoryMap, CHIP8_DISPLAY_SIZE_BYTES};
use crate::stack::{CallFrame, STACK_DEPTH};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;

pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;

const FONT_GLYPH_BYTES: u16 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    pub v: [u8; 16],
    pub i: u16,
    pub pc: u16,
    pub sp: i8,
    pub delay_timer: u8,
    pub sound_timer: u8,
}

impl Registers {
    fn power_on(pc: u16) -> Self {
        Registers {
            v: [0; 16],
            i: 0,
            pc,
            sp: -1,
            delay_timer: 0,
            sound_timer: 0,
        }
    }

    fn frame(&self) -> CallFrame {
        CallFrame {
            pc: self.pc,
            i: self.i,
            v: self.v,
            delay_timer: self.delay_timer,
            sound_timer: self.sound_timer,
        }
    }
}

/// What a call to `step` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Executed(Instruction),
    /// paused on Fx0A; nothing executed, PC unchanged
    WaitingForKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    WaitingForKey(u8),
}

/// where PC goes after an instruction
enum Flow {
    Next,
    Skip,
    Jump(u16),
    Wait,
}

pub struct Chip8Interpreter {
    memory: Chip8MemoryMap,
    regs: Registers,
    config: Config,
    rng: StdRng,
    state: State,
}

impl Chip8Interpreter {
    pub fn new(config: Config) -> Result<Chip8Interpreter, Chip8Error> {
        let memory = Chip8MemoryMap::new()?;
        let regs = Registers::power_on(memory.program_addr);
        Ok(Chip8Interpreter {
            memory,
            regs,
            rng: seeded_rng(config.seed),
            config,
            state: State::Running,
        })
    }

    /// load a chip8 program at 0x200
    pub fn load_program(&mut self, reader: &mut impl io::Read) -> Result<(), Chip8Error> {
        self.memory.load_program(reader)
    }

    /// load a raw image at an arbitrary origin
    pub fn load_image(&mut self, image: &[u8], origin: u16) -> Result<(), Chip8Error> {
        self.memory.load_image(image, origin)
    }

    /// power-on state: registers zeroed, memory cleared, font restored
    pub fn reset(&mut self) -> Result<(), Chip8Error> {
        self.memory.clear()?;
        self.regs = Registers::power_on(self.memory.program_addr);
        self.rng = seeded_rng(self.config.seed);
        self.state = State::Running;
        Ok(())
    }

    pub fn memory(&self) -> &Chip8MemoryMap {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Chip8MemoryMap {
        &mut self.memory
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// copy of the display page for rendering
    pub fn framebuffer(&self) -> Result<[u8; CHIP8_DISPLAY_SIZE_BYTES], Chip8Error> {
        self.memory.display_snapshot()
    }

    /// state of one pixel; x < 64, y < 32
    pub fn pixel(&self, x: usize, y: usize) -> Result<bool, Chip8Error> {
        let base = self.memory.display_addr as usize;
        if x >= DISPLAY_WIDTH || y >= DISPLAY_HEIGHT {
            let offset = y.saturating_mul(DISPLAY_WIDTH / 8).saturating_add(x / 8);
            return Err(Chip8Error::OutOfBounds {
                addr: base.saturating_add(offset),
                len: 1,
            });
        }
        let addr = base + y * DISPLAY_WIDTH / 8 + x / 8;
        let byte = self.memory.read_byte(addr as u16)?;
        Ok(byte & (0x80 >> (x % 8)) != 0)
    }

    pub fn is_waiting_for_key(&self) -> bool {
        matches!(self.state, State::WaitingForKey(_))
    }

    /// 60Hz timer interrupt: count both timers down, stopping at zero
    pub fn tick(&mut self) {
        self.regs.delay_timer = self.regs.delay_timer.saturating_sub(1);
        self.regs.sound_timer = self.regs.sound_timer.saturating_sub(1);
    }

    /// hand a key to a pending Fx0A. Returns false if nothing was waiting.
    pub fn resume_with_key(&mut self, key: u8) -> Result<bool, Chip8Error> {
        match self.state {
            State::WaitingForKey(x) => {
                self.finish_key_wait(x, key)?;
                Ok(true)
            }
            State::Running => Ok(false),
        }
    }

    /// fetch, decode and execute one instruction. A failed step leaves the
    /// machine exactly as it was.
    pub fn step(&mut self, input: &mut dyn Input) -> Result<Step, Chip8Error> {
        if let State::WaitingForKey(x) = self.state {
            return match input.take_key()? {
                Some(key) => {
                    self.finish_key_wait(x, key)?;
                    Ok(Step::Executed(Instruction::LdKey(x)))
                }
                None => Ok(Step::WaitingForKey),
            };
        }

        let pc = self.regs.pc;
        let opcode = self.memory.get_word(pc)?;
        let instr = Instruction::decode(opcode, self.config.sys_calls)?;
        trace!("{:04x}: {:04x}  {}", pc, opcode, instr);

        match self.execute(instr, input)? {
            Flow::Next => self.regs.pc = advance(pc, 2)?,
            Flow::Skip => self.regs.pc = advance(pc, 4)?,
            Flow::Jump(addr) => self.regs.pc = addr,
            Flow::Wait => {
                debug!("0x{:04x}: waiting for key into V{:X}", pc, opcode >> 8 & 0xf);
                return Ok(Step::WaitingForKey);
            }
        }
        Ok(Step::Executed(instr))
    }

    /// XOR an n-row sprite from [I] onto the display at (x, y). Returns true
    /// if any lit pixel was turned off.
    pub fn draw_sprite(&mut self, x: u8, y: u8, n: u8) -> Result<bool, Chip8Error> {
        let sprite = self.memory.get_ro_slice(self.regs.i, n as usize)?.to_vec();
        let mut frame = self.memory.display_snapshot()?;
        let x0 = x as usize % DISPLAY_WIDTH;
        let y0 = y as usize % DISPLAY_HEIGHT;
        let mut collision = false;

        for (row, bits) in sprite.iter().enumerate() {
            for bit in 0..8 {
                if bits & (0x80 >> bit) == 0 {
                    continue;
                }
                let (px, py) = (x0 + bit, y0 + row);
                let (px, py) = match self.config.sprite_edge {
                    SpriteEdge::Wrap => (px % DISPLAY_WIDTH, py % DISPLAY_HEIGHT),
                    SpriteEdge::Clip if px < DISPLAY_WIDTH && py < DISPLAY_HEIGHT => (px, py),
                    SpriteEdge::Clip => continue,
                };
                let idx = py * DISPLAY_WIDTH / 8 + px / 8;
                let mask = 0x80 >> (px % 8);
                collision |= frame[idx] & mask != 0;
                frame[idx] ^= mask;
            }
        }

        self.memory.write(&frame, self.memory.display_addr)?;
        Ok(collision)
    }

    fn execute(&mut self, instr: Instruction, input: &mut dyn Input) -> Result<Flow, Chip8Error> {
        use Instruction::*;

        let flow = match instr {
            Cls => {
                self.memory
                    .write(&[0; CHIP8_DISPLAY_SIZE_BYTES], self.memory.display_addr)?;
                Flow::Next
            }
            Ret => {
                let depth = top_frame(self.regs.sp)?;
                let frame = CallFrame::load(&self.memory, self.memory.stack_addr, depth)?;
                let ret = advance(frame.pc, 2)?;
                debug!("return from depth {} to 0x{:04x}", depth, ret);
                self.regs.i = frame.i;
                self.regs.v = frame.v;
                self.regs.delay_timer = frame.delay_timer;
                self.regs.sound_timer = frame.sound_timer;
                self.regs.sp -= 1;
                Flow::Jump(ret)
            }
            Call(addr) | Sys(addr) => {
                let depth = match self.regs.sp {
                    -1 => 0,
                    sp => top_frame(sp)? + 1,
                };
                if depth >= STACK_DEPTH {
                    return Err(Chip8Error::StackOverflow);
                }
                debug!("call 0x{:04x} at depth {}", addr, depth);
                let base = self.memory.stack_addr;
                self.regs.frame().store(&mut self.memory, base, depth)?;
                self.regs.sp += 1;
                Flow::Jump(addr)
            }
            Jp(addr) => Flow::Jump(addr),
            JpV0(addr) => Flow::Jump(addr + self.regs.v[0] as u16),
            SeByte(x, kk) => skip_if(self.v(x) == kk),
            SneByte(x, kk) => skip_if(self.v(x) != kk),
            SeReg(x, y) => skip_if(self.v(x) == self.v(y)),
            SneReg(x, y) => skip_if(self.v(x) != self.v(y)),
            LdByte(x, kk) => {
                self.set_v(x, kk);
                Flow::Next
            }
            AddByte(x, kk) => {
                self.set_v(x, self.v(x).wrapping_add(kk));
                Flow::Next
            }
            LdReg(x, y) => {
                self.set_v(x, self.v(y));
                Flow::Next
            }
            Or(x, y) => {
                self.set_v(x, self.v(x) | self.v(y));
                Flow::Next
            }
            And(x, y) => {
                self.set_v(x, self.v(x) & self.v(y));
                Flow::Next
            }
            Xor(x, y) => {
                self.set_v(x, self.v(x) ^ self.v(y));
                Flow::Next
            }
            AddReg(x, y) => {
                let (sum, carry) = self.v(x).overflowing_add(self.v(y));
                self.set_v_with_flag(x, sum, carry);
                Flow::Next
            }
            Sub(x, y) => {
                let (vx, vy) = (self.v(x), self.v(y));
                self.set_v_with_flag(x, vx.wrapping_sub(vy), vx >= vy);
                Flow::Next
            }
            Subn(x, y) => {
                let (vx, vy) = (self.v(x), self.v(y));
                self.set_v_with_flag(x, vy.wrapping_sub(vx), vy >= vx);
                Flow::Next
            }
            Shr(x, y) | Shl(x, y) => {
                let vx = self.v(x);
                let (result, flag) = match (self.config.shift, instr) {
                    (ShiftQuirk::RightByVy, _) => (
                        vx.checked_shr(self.v(y) as u32).unwrap_or(0),
                        vx & 0x01 != 0,
                    ),
                    (ShiftQuirk::Standard, Shr(..)) => (vx >> 1, vx & 0x01 != 0),
                    (ShiftQuirk::Standard, _) => (vx << 1, vx & 0x80 != 0),
                };
                self.set_v_with_flag(x, result, flag);
                Flow::Next
            }
            LdI(addr) => {
                self.regs.i = addr;
                Flow::Next
            }
            Rnd(x, kk) => {
                let r: u8 = self.rng.gen();
                self.set_v(x, r & kk);
                Flow::Next
            }
            Drw(x, y, n) => {
                let collision = self.draw_sprite(self.v(x), self.v(y), n)?;
                self.regs.v[0xf] = collision as u8;
                Flow::Next
            }
            Skp(x) => skip_if(input.is_key_pressed(self.v(x))?),
            Sknp(x) => skip_if(!input.is_key_pressed(self.v(x))?),
            LdVxDt(x) => {
                self.set_v(x, self.regs.delay_timer);
                Flow::Next
            }
            LdKey(x) => match input.take_key()? {
                Some(key) => {
                    self.set_v(x, key & 0xf);
                    Flow::Next
                }
                None => {
                    self.state = State::WaitingForKey(x);
                    Flow::Wait
                }
            },
            LdDtVx(x) => {
                self.regs.delay_timer = self.v(x);
                Flow::Next
            }
            LdStVx(x) => {
                self.regs.sound_timer = self.v(x);
                Flow::Next
            }
            AddI(x) => {
                self.regs.i = self.regs.i.wrapping_add(self.v(x) as u16);
                Flow::Next
            }
            LdF(x) => {
                self.regs.i = self.memory.font_addr + self.v(x) as u16 * FONT_GLYPH_BYTES;
                Flow::Next
            }
            LdB(x) => {
                let vx = self.v(x);
                self.memory.write(&[vx / 100, vx / 10 % 10, vx % 10], self.regs.i)?;
                Flow::Next
            }
            LdDerefIVx(x) => {
                let count = x as usize + 1;
                self.memory.write(&self.regs.v[..count], self.regs.i)?;
                Flow::Next
            }
            LdVxDerefI(x) => {
                let count = x as usize + 1;
                let bytes = self.memory.get_ro_slice(self.regs.i, count)?;
                self.regs.v[..count].copy_from_slice(bytes);
                Flow::Next
            }
        };
        Ok(flow)
    }

    fn finish_key_wait(&mut self, x: u8, key: u8) -> Result<(), Chip8Error> {
        let next = advance(self.regs.pc, 2)?;
        debug!("key 0x{:x} into V{:X}", key & 0xf, x);
        self.set_v(x, key & 0xf);
        self.regs.pc = next;
        self.state = State::Running;
        Ok(())
    }

    fn v(&self, x: u8) -> u8 {
        self.regs.v[x as usize]
    }

    fn set_v(&mut self, x: u8, value: u8) {
        self.regs.v[x as usize] = value;
    }

    /// flag is written after the result, so VF as a destination ends up
    /// holding the flag
    fn set_v_with_flag(&mut self, x: u8, value: u8, flag: bool) {
        self.set_v(x, value);
        self.regs.v[0xf] = flag as u8;
    }
}

fn skip_if(cond: bool) -> Flow {
    if cond {
        Flow::Skip
    } else {
        Flow::Next
    }
}

/// slot of the live top frame. -1 is the empty stack; anything outside
/// -1..=15 can only come from a driver poking SP.
fn top_frame(sp: i8) -> Result<usize, Chip8Error> {
    match usize::try_from(sp) {
        Ok(depth) if depth < STACK_DEPTH => Ok(depth),
        Ok(_) => Err(Chip8Error::StackOverflow),
        Err(_) => Err(Chip8Error::StackUnderflow),
    }
}

fn advance(pc: u16, by: u16) -> Result<u16, Chip8Error> {
    pc.checked_add(by).ok_or(Chip8Error::OutOfBounds {
        addr: pc as usize,
        len: by as usize,
    })
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{DummyInput, NoInput};
    use crate::memory::{CHIP8_DISPLAY_ADDR, CHIP8_STACK_ADDR};

    fn machine_with(config: Config, program: &[u8]) -> Result<Chip8Interpreter, Chip8Error> {
        let mut m = Chip8Interpreter::new(config)?;
        m.load_image(program, 0x200)?;
        Ok(m)
    }

    fn machine(program: &[u8]) -> Result<Chip8Interpreter, Chip8Error> {
        machine_with(
            Config {
                seed: Some(8),
                ..Config::default()
            },
            program,
        )
    }

    fn step(m: &mut Chip8Interpreter) -> Result<Step, Chip8Error> {
        m.step(&mut NoInput)
    }

    #[test]
    fn test_program_load_ok() -> Result<(), Chip8Error> {
        let mut i = Chip8Interpreter::new(Config::default())?;
        let mut prog: &[u8] = &[0x00, 0xe0]; // clear screen
        i.load_program(&mut prog)?;
        assert_eq!(i.memory().get_word(0x200)?, 0x00e0);
        Ok(())
    }

    #[test]
    fn test_power_on_registers() -> Result<(), Chip8Error> {
        let m = Chip8Interpreter::new(Config::default())?;
        let r = m.registers();
        assert_eq!(r.pc, 0x200);
        assert_eq!(r.sp, -1);
        assert_eq!(r.i, 0);
        assert_eq!(r.v, [0; 16]);
        assert!(!m.is_waiting_for_key());
        Ok(())
    }

    #[test]
    fn test_ld_byte() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x62, 0x05])?;
        assert_eq!(step(&mut m)?, Step::Executed(Instruction::LdByte(2, 5)));
        assert_eq!(m.registers().v[2], 5);
        assert_eq!(m.registers().pc, 0x202);
        Ok(())
    }

    #[test]
    fn test_add_byte_wraps_without_flag() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x70, 0x02])?;
        m.registers_mut().v[0] = 0xff;
        m.registers_mut().v[0xf] = 0xab;
        step(&mut m)?;
        assert_eq!(m.registers().v[0], 0x01);
        assert_eq!(m.registers().v[0xf], 0xab);
        Ok(())
    }

    #[test]
    fn test_logic_ops() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x81, 0x20, 0x83, 0x41, 0x85, 0x62, 0x87, 0x83])?;
        let v = &mut m.registers_mut().v;
        v[2] = 0x5a;
        v[3] = 0xf0;
        v[4] = 0x0f;
        v[5] = 0xf0;
        v[6] = 0x3c;
        v[7] = 0xff;
        v[8] = 0x0f;
        for _ in 0..4 {
            step(&mut m)?;
        }
        let v = m.registers().v;
        assert_eq!(v[1], 0x5a);
        assert_eq!(v[3], 0xff);
        assert_eq!(v[5], 0x30);
        assert_eq!(v[7], 0xf0);
        assert_eq!(v[0xf], 0);
        Ok(())
    }

    #[test]
    fn test_add_reg_carry() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x81, 0x24, 0x83, 0x44])?;
        let v = &mut m.registers_mut().v;
        v[1] = 0xff;
        v[2] = 0x01;
        v[3] = 0x10;
        v[4] = 0x20;
        step(&mut m)?;
        assert_eq!(m.registers().v[1], 0x00);
        assert_eq!(m.registers().v[0xf], 1);
        step(&mut m)?;
        assert_eq!(m.registers().v[3], 0x30);
        assert_eq!(m.registers().v[0xf], 0);
        Ok(())
    }

    #[test]
    fn test_sub_borrow() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x81, 0x25, 0x83, 0x45])?;
        let v = &mut m.registers_mut().v;
        v[1] = 0x01;
        v[2] = 0x02;
        v[3] = 0x05;
        v[4] = 0x05;
        step(&mut m)?;
        assert_eq!(m.registers().v[1], 0xff);
        assert_eq!(m.registers().v[0xf], 0);
        // equal operands are not a borrow
        step(&mut m)?;
        assert_eq!(m.registers().v[3], 0x00);
        assert_eq!(m.registers().v[0xf], 1);
        Ok(())
    }

    #[test]
    fn test_subn() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x81, 0x27, 0x83, 0x47])?;
        let v = &mut m.registers_mut().v;
        v[1] = 0x02;
        v[2] = 0x01;
        v[3] = 0x10;
        v[4] = 0x30;
        step(&mut m)?;
        assert_eq!(m.registers().v[1], 0xff);
        assert_eq!(m.registers().v[0xf], 0);
        step(&mut m)?;
        assert_eq!(m.registers().v[3], 0x20);
        assert_eq!(m.registers().v[0xf], 1);
        Ok(())
    }

    #[test]
    fn test_flag_wins_when_vf_is_destination() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x8f, 0x14])?;
        m.registers_mut().v[0xf] = 0xff;
        m.registers_mut().v[1] = 0x01;
        step(&mut m)?;
        assert_eq!(m.registers().v[0xf], 1);
        Ok(())
    }

    #[test]
    fn test_shift_standard() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x81, 0x26, 0x83, 0x2e, 0x84, 0x26, 0x85, 0x2e])?;
        let v = &mut m.registers_mut().v;
        v[1] = 0x81;
        v[2] = 0x07; // ignored
        v[3] = 0x81;
        v[4] = 0x80;
        v[5] = 0x01;
        step(&mut m)?;
        assert_eq!((m.registers().v[1], m.registers().v[0xf]), (0x40, 1));
        step(&mut m)?;
        assert_eq!((m.registers().v[3], m.registers().v[0xf]), (0x02, 1));
        step(&mut m)?;
        assert_eq!((m.registers().v[4], m.registers().v[0xf]), (0x40, 0));
        step(&mut m)?;
        assert_eq!((m.registers().v[5], m.registers().v[0xf]), (0x02, 0));
        Ok(())
    }

    // conformance note: this mode deliberately diverges from the usual
    // definition of SHL; both opcodes shift right by Vy
    #[test]
    fn test_shift_right_by_vy_quirk() -> Result<(), Chip8Error> {
        let config = Config {
            shift: ShiftQuirk::RightByVy,
            ..Config::default()
        };
        let mut m = machine_with(config, &[0x81, 0x26, 0x83, 0x2e, 0x84, 0x56])?;
        let v = &mut m.registers_mut().v;
        v[1] = 0b1011;
        v[2] = 2;
        v[3] = 0b1011;
        v[4] = 0xfe;
        v[5] = 9;
        step(&mut m)?;
        assert_eq!((m.registers().v[1], m.registers().v[0xf]), (0b10, 1));
        step(&mut m)?;
        assert_eq!((m.registers().v[3], m.registers().v[0xf]), (0b10, 1));
        // shifting by 8 or more empties the register
        step(&mut m)?;
        assert_eq!((m.registers().v[4], m.registers().v[0xf]), (0, 0));
        Ok(())
    }

    #[test]
    fn test_skip_family() -> Result<(), Chip8Error> {
        // (opcode, vx, vy, skips)
        let cases: [(u16, u8, u8, bool); 8] = [
            (0x3142, 0x42, 0, true),
            (0x3142, 0x41, 0, false),
            (0x4142, 0x41, 0, true),
            (0x4142, 0x42, 0, false),
            (0x5120, 7, 7, true),
            (0x5120, 7, 8, false),
            (0x9120, 7, 8, true),
            (0x9120, 7, 7, false),
        ];
        for (opcode, vx, vy, skips) in cases {
            let mut m = machine(&opcode.to_be_bytes())?;
            m.registers_mut().v[1] = vx;
            m.registers_mut().v[2] = vy;
            step(&mut m)?;
            let expected = if skips { 0x204 } else { 0x202 };
            assert_eq!(m.registers().pc, expected, "{opcode:04x} {vx} {vy}");
        }
        Ok(())
    }

    #[test]
    fn test_jumps() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x13, 0x45])?;
        step(&mut m)?;
        assert_eq!(m.registers().pc, 0x345);

        let mut m = machine(&[0xb3, 0x00])?;
        m.registers_mut().v[0] = 0x12;
        step(&mut m)?;
        assert_eq!(m.registers().pc, 0x312);
        Ok(())
    }

    #[test]
    fn test_ld_i() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xa1, 0x23])?;
        step(&mut m)?;
        assert_eq!(m.registers().i, 0x123);
        assert_eq!(m.registers().pc, 0x202);
        Ok(())
    }

    #[test]
    fn test_call_return_round_trip() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x23, 0x00])?;
        // subroutine trashes everything it can reach, then returns
        m.load_image(
            &[0x60, 0x11, 0x6f, 0x22, 0xa1, 0x23, 0xf0, 0x15, 0xf0, 0x18, 0x00, 0xee],
            0x300,
        )?;
        {
            let r = m.registers_mut();
            for (n, v) in r.v.iter_mut().enumerate() {
                *v = 0xa0 + n as u8;
            }
            r.i = 0x0456;
            r.delay_timer = 0x33;
            r.sound_timer = 0x44;
        }
        let before = m.registers().clone();

        step(&mut m)?;
        assert_eq!(m.registers().pc, 0x300);
        assert_eq!(m.registers().sp, 0);
        assert_eq!(m.memory().get_word(CHIP8_STACK_ADDR)?, 0x200);
        for _ in 0..5 {
            step(&mut m)?;
        }
        assert_eq!(m.registers().v[0], 0x11);
        assert_eq!(m.registers().delay_timer, 0x11);

        assert_eq!(step(&mut m)?, Step::Executed(Instruction::Ret));
        let after = m.registers();
        assert_eq!(after.pc, 0x202);
        assert_eq!(after.sp, before.sp);
        assert_eq!(after.i, before.i);
        assert_eq!(after.v, before.v);
        assert_eq!(after.delay_timer, before.delay_timer);
        assert_eq!(after.sound_timer, before.sound_timer);
        Ok(())
    }

    #[test]
    fn test_sys_is_a_call() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x03, 0x00])?;
        m.load_image(&[0x00, 0xee], 0x300)?;
        assert_eq!(step(&mut m)?, Step::Executed(Instruction::Sys(0x300)));
        assert_eq!(m.registers().sp, 0);
        step(&mut m)?;
        assert_eq!(m.registers().pc, 0x202);
        assert_eq!(m.registers().sp, -1);
        Ok(())
    }

    #[test]
    fn test_return_with_empty_stack() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x00, 0xee])?;
        let before = m.registers().clone();
        assert!(matches!(step(&mut m), Err(Chip8Error::StackUnderflow)));
        assert_eq!(m.registers(), &before);
        Ok(())
    }

    #[test]
    fn test_stack_overflow_on_seventeenth_call() -> Result<(), Chip8Error> {
        // calls itself forever
        let mut m = machine(&[0x22, 0x00])?;
        for _ in 0..STACK_DEPTH {
            step(&mut m)?;
        }
        assert_eq!(m.registers().sp, 15);
        let before = m.registers().clone();
        assert!(matches!(step(&mut m), Err(Chip8Error::StackOverflow)));
        assert_eq!(m.registers(), &before);
        // deepest frame must not spill into the display
        assert_eq!(m.framebuffer()?, [0; 256]);
        Ok(())
    }

    #[test]
    fn test_corrupt_stack_pointer_is_reported() -> Result<(), Chip8Error> {
        for (sp, opcode) in [(i8::MAX, 0x2200u16), (16, 0x2200), (i8::MAX, 0x00ee), (16, 0x00ee)] {
            let mut m = machine(&opcode.to_be_bytes())?;
            m.registers_mut().sp = sp;
            assert!(matches!(step(&mut m), Err(Chip8Error::StackOverflow)), "{sp} {opcode:04x}");
            assert_eq!(m.registers().sp, sp);
        }
        for (sp, opcode) in [(i8::MIN, 0x2200u16), (-2, 0x2200), (i8::MIN, 0x00ee), (-2, 0x00ee)] {
            let mut m = machine(&opcode.to_be_bytes())?;
            m.registers_mut().sp = sp;
            assert!(matches!(step(&mut m), Err(Chip8Error::StackUnderflow)), "{sp} {opcode:04x}");
            assert_eq!(m.registers().pc, 0x200);
        }
        Ok(())
    }

    #[test]
    fn test_cls() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x00, 0xe0])?;
        m.memory_mut().write(&[0xff; 256], CHIP8_DISPLAY_ADDR)?;
        step(&mut m)?;
        assert_eq!(m.framebuffer()?, [0; 256]);
        assert_eq!(m.registers().pc, 0x202);
        Ok(())
    }

    #[test]
    fn test_draw_xor_and_collision() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xa3, 0x00, 0xd0, 0x11, 0xd0, 0x11, 0xd0, 0x11])?;
        m.memory_mut().write_byte(0x300, 0x80)?;
        step(&mut m)?;

        step(&mut m)?;
        assert!(m.pixel(0, 0)?);
        assert_eq!(m.registers().v[0xf], 0);

        // drawing the same bit again turns it off, which is a collision
        step(&mut m)?;
        assert!(!m.pixel(0, 0)?);
        assert_eq!(m.registers().v[0xf], 1);

        step(&mut m)?;
        assert!(m.pixel(0, 0)?);
        assert_eq!(m.registers().v[0xf], 0);
        Ok(())
    }

    #[test]
    fn test_draw_font_glyph() -> Result<(), Chip8Error> {
        // LD F, V0 ; DRW V1, V2, 5
        let mut m = machine(&[0xf0, 0x29, 0xd1, 0x25])?;
        m.registers_mut().v[0] = 0x1;
        m.registers_mut().v[1] = 8;
        m.registers_mut().v[2] = 2;
        step(&mut m)?;
        assert_eq!(m.registers().i, 5);
        step(&mut m)?;
        let fb = m.framebuffer()?;
        // glyph "1" lands byte-aligned in column byte 1
        assert_eq!(
            [fb[2 * 8 + 1], fb[3 * 8 + 1], fb[4 * 8 + 1], fb[5 * 8 + 1], fb[6 * 8 + 1]],
            [0x20, 0x60, 0x20, 0x20, 0x70]
        );
        Ok(())
    }

    // edge behaviour is configurable; the default wraps
    #[test]
    fn test_draw_wraps_at_edges() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xd0, 0x12])?;
        m.memory_mut().write(&[0xff, 0xff], 0x300)?;
        m.registers_mut().i = 0x300;
        m.registers_mut().v[0] = 62;
        m.registers_mut().v[1] = 31;
        step(&mut m)?;
        assert!(m.pixel(62, 31)?);
        assert!(m.pixel(63, 31)?);
        assert!(m.pixel(0, 31)?);
        assert!(m.pixel(5, 31)?);
        assert!(!m.pixel(6, 31)?);
        assert!(m.pixel(62, 0)?);
        assert!(m.pixel(5, 0)?);
        assert_eq!(m.registers().v[0xf], 0);
        Ok(())
    }

    #[test]
    fn test_draw_clips_at_edges() -> Result<(), Chip8Error> {
        let config = Config {
            sprite_edge: SpriteEdge::Clip,
            ..Config::default()
        };
        let mut m = machine_with(config, &[0xd0, 0x12])?;
        m.memory_mut().write(&[0xff, 0xff], 0x300)?;
        m.registers_mut().i = 0x300;
        m.registers_mut().v[0] = 62;
        m.registers_mut().v[1] = 31;
        step(&mut m)?;
        assert!(m.pixel(62, 31)?);
        assert!(m.pixel(63, 31)?);
        assert!(!m.pixel(0, 31)?);
        assert!(!m.pixel(62, 0)?);
        assert_eq!(m.framebuffer()?.iter().map(|b| b.count_ones()).sum::<u32>(), 2);
        Ok(())
    }

    #[test]
    fn test_draw_origin_wraps_even_when_clipping() -> Result<(), Chip8Error> {
        let config = Config {
            sprite_edge: SpriteEdge::Clip,
            ..Config::default()
        };
        let mut m = machine_with(config, &[0xd0, 0x11])?;
        m.memory_mut().write_byte(0x300, 0x80)?;
        m.registers_mut().i = 0x300;
        m.registers_mut().v[0] = 64 + 3;
        m.registers_mut().v[1] = 32 + 1;
        step(&mut m)?;
        assert!(m.pixel(3, 1)?);
        Ok(())
    }

    #[test]
    fn test_draw_sprite_out_of_bounds_changes_nothing() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xd0, 0x03])?;
        m.registers_mut().i = 0x0ffe;
        m.registers_mut().v[0xf] = 0x77;
        let before = m.framebuffer()?;
        assert!(matches!(
            step(&mut m),
            Err(Chip8Error::OutOfBounds { addr: 0x0ffe, len: 3 })
        ));
        assert_eq!(m.framebuffer()?, before);
        assert_eq!(m.registers().v[0xf], 0x77);
        assert_eq!(m.registers().pc, 0x200);
        Ok(())
    }

    #[test]
    fn test_rnd_masks_and_is_seeded() -> Result<(), Chip8Error> {
        let program = [0xc0, 0x0f, 0xc1, 0x00, 0xc2, 0xff, 0xc3, 0xff];
        let mut a = machine(&program)?;
        let mut b = machine(&program)?;
        for _ in 0..4 {
            step(&mut a)?;
            step(&mut b)?;
        }
        assert!(a.registers().v[0] < 0x10);
        assert_eq!(a.registers().v[1], 0);
        assert_eq!(a.registers().v, b.registers().v);
        Ok(())
    }

    #[test]
    fn test_key_skips() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xe1, 0x9e, 0xe1, 0xa1])?;
        m.registers_mut().v[1] = 0x5;
        m.step(&mut DummyInput::new(&[0x5]))?;
        assert_eq!(m.registers().pc, 0x204);

        let mut m = machine(&[0xe1, 0x9e, 0xe1, 0xa1])?;
        m.registers_mut().v[1] = 0x5;
        step(&mut m)?;
        assert_eq!(m.registers().pc, 0x202);
        // headless: never pressed, so SKNP skips
        step(&mut m)?;
        assert_eq!(m.registers().pc, 0x206);
        Ok(())
    }

    #[test]
    fn test_key_wait_pauses_until_key() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xf3, 0x0a])?;
        assert_eq!(step(&mut m)?, Step::WaitingForKey);
        assert!(m.is_waiting_for_key());
        assert_eq!(m.registers().pc, 0x200);
        // polling again without a key changes nothing
        assert_eq!(step(&mut m)?, Step::WaitingForKey);
        assert_eq!(m.registers().pc, 0x200);

        assert_eq!(
            m.step(&mut DummyInput::new(&[0xc]))?,
            Step::Executed(Instruction::LdKey(3))
        );
        assert_eq!(m.registers().v[3], 0xc);
        assert_eq!(m.registers().pc, 0x202);
        assert!(!m.is_waiting_for_key());
        Ok(())
    }

    #[test]
    fn test_key_wait_resumed_by_driver() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xf3, 0x0a])?;
        assert!(!m.resume_with_key(1)?);
        step(&mut m)?;
        assert!(m.resume_with_key(0xb)?);
        assert_eq!(m.registers().v[3], 0xb);
        assert_eq!(m.registers().pc, 0x202);
        Ok(())
    }

    #[test]
    fn test_key_wait_with_key_ready() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xf3, 0x0a])?;
        m.step(&mut DummyInput::new(&[0x9]))?;
        assert_eq!(m.registers().v[3], 0x9);
        assert_eq!(m.registers().pc, 0x202);
        Ok(())
    }

    #[test]
    fn test_timers() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xf1, 0x15, 0xf2, 0x18, 0xf3, 0x07])?;
        m.registers_mut().v[1] = 2;
        m.registers_mut().v[2] = 1;
        step(&mut m)?;
        step(&mut m)?;
        assert_eq!(m.registers().delay_timer, 2);
        assert_eq!(m.registers().sound_timer, 1);
        m.tick();
        step(&mut m)?;
        assert_eq!(m.registers().v[3], 1);
        m.tick();
        m.tick();
        assert_eq!(m.registers().delay_timer, 0);
        assert_eq!(m.registers().sound_timer, 0);
        Ok(())
    }

    #[test]
    fn test_add_i() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xa2, 0xf0, 0xf1, 0x1e])?;
        m.registers_mut().v[1] = 0x20;
        step(&mut m)?;
        step(&mut m)?;
        assert_eq!(m.registers().i, 0x310);
        Ok(())
    }

    #[test]
    fn test_bcd() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xa4, 0x00, 0xf5, 0x33])?;
        m.registers_mut().v[5] = 234;
        step(&mut m)?;
        step(&mut m)?;
        assert_eq!(m.memory().get_ro_slice(0x400, 3)?, &[2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_store_and_load_registers() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xa4, 0x00, 0xf3, 0x55, 0x60, 0x00, 0x61, 0x00, 0xf2, 0x65])?;
        m.registers_mut().v[..5].copy_from_slice(&[1, 2, 3, 4, 5]);
        step(&mut m)?;
        step(&mut m)?;
        assert_eq!(m.memory().get_ro_slice(0x400, 5)?, &[1, 2, 3, 4, 0]);
        assert_eq!(m.registers().i, 0x400);
        for _ in 0..3 {
            step(&mut m)?;
        }
        assert_eq!(&m.registers().v[..5], &[1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_store_registers_past_end_changes_nothing() -> Result<(), Chip8Error> {
        let mut m = machine(&[0xf3, 0x55])?;
        m.registers_mut().v[..4].copy_from_slice(&[9, 9, 9, 9]);
        m.registers_mut().i = 0x0ffe;
        assert!(matches!(step(&mut m), Err(Chip8Error::OutOfBounds { .. })));
        assert_eq!(m.memory().read_word(0x0ffe)?, (0, 0));
        assert_eq!(m.registers().pc, 0x200);
        Ok(())
    }

    #[test]
    fn test_invalid_opcode_is_fatal() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x80, 0x08])?;
        assert!(matches!(step(&mut m), Err(Chip8Error::InvalidOpcode(0x8008))));
        assert_eq!(m.registers().pc, 0x200);
        // and stays fatal; nothing is skipped
        assert!(matches!(step(&mut m), Err(Chip8Error::InvalidOpcode(0x8008))));
        Ok(())
    }

    #[test]
    fn test_fetch_past_end_of_memory() -> Result<(), Chip8Error> {
        let mut m = machine(&[])?;
        m.registers_mut().pc = 0x0fff;
        assert!(matches!(
            step(&mut m),
            Err(Chip8Error::OutOfBounds { addr: 0x0fff, len: 2 })
        ));
        Ok(())
    }

    #[test]
    fn test_pixel_bounds() -> Result<(), Chip8Error> {
        let m = machine(&[])?;
        assert!(!m.pixel(63, 31)?);
        assert!(m.pixel(64, 0).is_err());
        assert!(m.pixel(0, 32).is_err());
        assert!(matches!(
            m.pixel(0, usize::MAX),
            Err(Chip8Error::OutOfBounds { len: 1, .. })
        ));
        assert!(m.pixel(usize::MAX, usize::MAX).is_err());
        Ok(())
    }

    #[test]
    fn test_reset() -> Result<(), Chip8Error> {
        let mut m = machine(&[0x61, 0x01, 0xf0, 0x0a])?;
        step(&mut m)?;
        step(&mut m)?;
        assert!(m.is_waiting_for_key());
        m.reset()?;
        assert!(!m.is_waiting_for_key());
        assert_eq!(m.registers().v[1], 0);
        assert_eq!(m.registers().pc, 0x200);
        assert_eq!(m.memory().get_word(0x200)?, 0);
        Ok(())
    }
}
