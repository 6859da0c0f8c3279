use std::fmt;
use std::io;

/// Everything that can stop the interpreter. None of these are retried
/// internally; the driver decides what to do with them.
#[derive(Debug)]
pub enum Chip8Error {
    /// an access of `len` bytes at `addr` would leave the 4K address space
    OutOfBounds { addr: usize, len: usize },
    /// the opcode has a known family but no defined operation
    InvalidOpcode(u16),
    /// a call would need a 17th frame
    StackOverflow,
    /// a return with no live frame
    StackUnderflow,
    /// a collaborator (loader, input, display) failed
    Io(io::Error),
}

impl fmt::Display for Chip8Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chip8Error::OutOfBounds { addr, len } => write!(
                f,
                "access of {len} byte(s) at 0x{addr:04x} is out of memory bounds"
            ),
            Chip8Error::InvalidOpcode(op) => write!(f, "invalid opcode 0x{op:04x}"),
            Chip8Error::StackOverflow => f.write_str("call stack overflow"),
            Chip8Error::StackUnderflow => f.write_str("return with empty call stack"),
            Chip8Error::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for Chip8Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Chip8Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Chip8Error {
    fn from(e: io::Error) -> Self {
        Chip8Error::Io(e)
    }
}
