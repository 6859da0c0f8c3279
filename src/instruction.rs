//! CHIP-8 instruction set.
//!
//! Opcodes are decoded fresh on every step; an `Instruction` is never stored
//! in memory. Register operands are indices 0x0..=0xF.
use crate::error::Chip8Error;
use std::fmt;

/// One decoded CHIP-8 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// 00E0
    Cls,
    /// 00EE
    Ret,
    /// 0nnn, nnn >= 0x200: machine subroutine, treated as a call
    Sys(u16),
    /// 1nnn
    Jp(u16),
    /// 2nnn
    Call(u16),
    /// 3xkk
    SeByte(u8, u8),
    /// 4xkk
    SneByte(u8, u8),
    /// 5xy0
    SeReg(u8, u8),
    /// 6xkk
    LdByte(u8, u8),
    /// 7xkk
    AddByte(u8, u8),
    /// 8xy0
    LdReg(u8, u8),
    /// 8xy1
    Or(u8, u8),
    /// 8xy2
    And(u8, u8),
    /// 8xy3
    Xor(u8, u8),
    /// 8xy4
    AddReg(u8, u8),
    /// 8xy5
    Sub(u8, u8),
    /// 8xy6
    Shr(u8, u8),
    /// 8xy7
    Subn(u8, u8),
    /// 8xyE
    Shl(u8, u8),
    /// 9xy0
    SneReg(u8, u8),
    /// Annn
    LdI(u16),
    /// Bnnn
    JpV0(u16),
    /// Cxkk
    Rnd(u8, u8),
    /// Dxyn
    Drw(u8, u8, u8),
    /// Ex9E
    Skp(u8),
    /// ExA1
    Sknp(u8),
    /// Fx07
    LdVxDt(u8),
    /// Fx0A
    LdKey(u8),
    /// Fx15
    LdDtVx(u8),
    /// Fx18
    LdStVx(u8),
    /// Fx1E
    AddI(u8),
    /// Fx29
    LdF(u8),
    /// Fx33
    LdB(u8),
    /// Fx55
    LdDerefIVx(u8),
    /// Fx65
    LdVxDerefI(u8),
}

impl Instruction {
    /// Decode a big-endian opcode. `sys_calls` enables the 0nnn machine
    /// subroutine form; without it only 00E0 and 00EE exist in family 0.
    pub fn decode(opcode: u16, sys_calls: bool) -> Result<Instruction, Chip8Error> {
        use Instruction::*;

        let nnn = opcode & 0x0fff;
        let x = ((opcode >> 8) & 0xf) as u8;
        let y = ((opcode >> 4) & 0xf) as u8;
        let kk = (opcode & 0xff) as u8;
        let n = (opcode & 0xf) as u8;
        let invalid = Err(Chip8Error::InvalidOpcode(opcode));

        let instr = match opcode >> 12 {
            0x0 => match nnn {
                0x0e0 => Cls,
                0x0ee => Ret,
                _ if sys_calls && nnn >= 0x200 => Sys(nnn),
                _ => return invalid,
            },
            0x1 => Jp(nnn),
            0x2 => Call(nnn),
            0x3 => SeByte(x, kk),
            0x4 => SneByte(x, kk),
            0x5 if n == 0 => SeReg(x, y),
            0x6 => LdByte(x, kk),
            0x7 => AddByte(x, kk),
            0x8 => match n {
                0x0 => LdReg(x, y),
                0x1 => Or(x, y),
                0x2 => And(x, y),
                0x3 => Xor(x, y),
                0x4 => AddReg(x, y),
                0x5 => Sub(x, y),
                0x6 => Shr(x, y),
                0x7 => Subn(x, y),
                0xe => Shl(x, y),
                _ => return invalid,
            },
            0x9 if n == 0 => SneReg(x, y),
            0xa => LdI(nnn),
            0xb => JpV0(nnn),
            0xc => Rnd(x, kk),
            0xd => Drw(x, y, n),
            0xe => match kk {
                0x9e => Skp(x),
                0xa1 => Sknp(x),
                _ => return invalid,
            },
            0xf => match kk {
                0x07 => LdVxDt(x),
                0x0a => LdKey(x),
                0x15 => LdDtVx(x),
                0x18 => LdStVx(x),
                0x1e => AddI(x),
                0x29 => LdF(x),
                0x33 => LdB(x),
                0x55 => LdDerefIVx(x),
                0x65 => LdVxDerefI(x),
                _ => return invalid,
            },
            _ => return invalid,
        };
        Ok(instr)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match *self {
            Cls => f.write_str("CLS"),
            Ret => f.write_str("RET"),
            Sys(a) => write!(f, "SYS  0x{a:03x}"),
            Jp(a) => write!(f, "JP   0x{a:03x}"),
            Call(a) => write!(f, "CALL 0x{a:03x}"),
            SeByte(x, kk) => write!(f, "SE   V{x:X}, 0x{kk:02x}"),
            SneByte(x, kk) => write!(f, "SNE  V{x:X}, 0x{kk:02x}"),
            SeReg(x, y) => write!(f, "SE   V{x:X}, V{y:X}"),
            LdByte(x, kk) => write!(f, "LD   V{x:X}, 0x{kk:02x}"),
            AddByte(x, kk) => write!(f, "ADD  V{x:X}, 0x{kk:02x}"),
            LdReg(x, y) => write!(f, "LD   V{x:X}, V{y:X}"),
            Or(x, y) => write!(f, "OR   V{x:X}, V{y:X}"),
            And(x, y) => write!(f, "AND  V{x:X}, V{y:X}"),
            Xor(x, y) => write!(f, "XOR  V{x:X}, V{y:X}"),
            AddReg(x, y) => write!(f, "ADD  V{x:X}, V{y:X}"),
            Sub(x, y) => write!(f, "SUB  V{x:X}, V{y:X}"),
            Shr(x, y) => write!(f, "SHR  V{x:X}, V{y:X}"),
            Subn(x, y) => write!(f, "SUBN V{x:X}, V{y:X}"),
            Shl(x, y) => write!(f, "SHL  V{x:X}, V{y:X}"),
            SneReg(x, y) => write!(f, "SNE  V{x:X}, V{y:X}"),
            LdI(a) => write!(f, "LD   I, 0x{a:03x}"),
            JpV0(a) => write!(f, "JP   V0, 0x{a:03x}"),
            Rnd(x, kk) => write!(f, "RND  V{x:X}, 0x{kk:02x}"),
            Drw(x, y, n) => write!(f, "DRW  V{x:X}, V{y:X}, {n}"),
            Skp(x) => write!(f, "SKP  V{x:X}"),
            Sknp(x) => write!(f, "SKNP V{x:X}"),
            LdVxDt(x) => write!(f, "LD   V{x:X}, DT"),
            LdKey(x) => write!(f, "LD   V{x:X}, K"),
            LdDtVx(x) => write!(f, "LD   DT, V{x:X}"),
            LdStVx(x) => write!(f, "LD   ST, V{x:X}"),
            AddI(x) => write!(f, "ADD  I, V{x:X}"),
            LdF(x) => write!(f, "LD   F, V{x:X}"),
            LdB(x) => write!(f, "LD   B, V{x:X}"),
            LdDerefIVx(x) => write!(f, "LD   [I], V{x:X}"),
            LdVxDerefI(x) => write!(f, "LD   V{x:X}, [I]"),
        }
    }
}
