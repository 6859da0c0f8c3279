//! Call frames saved into the stack region on subroutine entry.
//!
//! Frame layout (22 bytes):
//!   +0  return pc (hi, lo)
//!   +2  I (hi, lo)
//!   +4  V0..VF
//!   +20 delay timer
//!   +21 sound timer
use crate::error::Chip8Error;
use crate::memory::MemoryMap;

pub const FRAME_SIZE_BYTES: usize = 2 + 2 + 16 + 1 + 1;

/// how many frames may be live at once
pub const STACK_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub pc: u16,
    pub i: u16,
    pub v: [u8; 16],
    pub delay_timer: u8,
    pub sound_timer: u8,
}

impl CallFrame {
    pub fn encode(&self) -> [u8; FRAME_SIZE_BYTES] {
        let mut bytes = [0u8; FRAME_SIZE_BYTES];
        bytes[0..2].copy_from_slice(&self.pc.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.i.to_be_bytes());
        bytes[4..20].copy_from_slice(&self.v);
        bytes[20] = self.delay_timer;
        bytes[21] = self.sound_timer;
        bytes
    }

    pub fn decode(bytes: &[u8]) -> CallFrame {
        let mut v = [0u8; 16];
        v.copy_from_slice(&bytes[4..20]);
        CallFrame {
            pc: u16::from_be_bytes([bytes[0], bytes[1]]),
            i: u16::from_be_bytes([bytes[2], bytes[3]]),
            v,
            delay_timer: bytes[20],
            sound_timer: bytes[21],
        }
    }

    /// write this frame into slot `depth` of the stack region at `base`
    pub fn store(&self, memory: &mut impl MemoryMap, base: u16, depth: usize) -> Result<(), Chip8Error> {
        memory.write(&self.encode(), slot_addr(base, depth)?)
    }

    /// read the frame in slot `depth`
    pub fn load(memory: &impl MemoryMap, base: u16, depth: usize) -> Result<CallFrame, Chip8Error> {
        let bytes = memory.get_ro_slice(slot_addr(base, depth)?, FRAME_SIZE_BYTES)?;
        Ok(CallFrame::decode(bytes))
    }
}

fn slot_addr(base: u16, depth: usize) -> Result<u16, Chip8Error> {
    if depth >= STACK_DEPTH {
        return Err(Chip8Error::StackOverflow);
    }
    let addr = base as usize + depth * FRAME_SIZE_BYTES;
    u16::try_from(addr).map_err(|_| Chip8Error::OutOfBounds {
        addr,
        len: FRAME_SIZE_BYTES,
    })
}
