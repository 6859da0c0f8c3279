use crate::error::Chip8Error;
use std::io;

// NB. addresses are u16 as per the chip-8; lengths are usize to stop endless casting

/// Represents the address space. Every access is bounds-checked; nothing is
/// ever clamped or wrapped, an access that leaves the space is an error.
pub trait MemoryMap {
    /// get a r/w slice of the underlying memory
    fn get_rw_slice(&mut self, addr: u16, len: usize) -> Result<&mut [u8], Chip8Error>;

    /// get a r/o slice of the underlying memory
    fn get_ro_slice(&self, addr: u16, len: usize) -> Result<&[u8], Chip8Error>;

    fn read_byte(&self, addr: u16) -> Result<u8, Chip8Error> {
        Ok(self.get_ro_slice(addr, 1)?[0])
    }

    /// two consecutive bytes, high byte first
    fn read_word(&self, addr: u16) -> Result<(u8, u8), Chip8Error> {
        let word = self.get_ro_slice(addr, 2)?;
        Ok((word[0], word[1]))
    }

    /// get a two-byte big-endian word (opcodes, stack)
    fn get_word(&self, addr: u16) -> Result<u16, Chip8Error> {
        let (hi, lo) = self.read_word(addr)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), Chip8Error> {
        self.get_rw_slice(addr, 1)?[0] = value;
        Ok(())
    }

    fn write_word(&mut self, addr: u16, (hi, lo): (u8, u8)) -> Result<(), Chip8Error> {
        self.write(&[hi, lo], addr)
    }

    /// write a chunk of bytes; either all of it lands or none of it does
    fn write(&mut self, data: &[u8], addr: u16) -> Result<(), Chip8Error> {
        self.get_rw_slice(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// write unknown len of data into memory at a particular address,
    /// returning how many bytes landed
    fn write_any(&mut self, reader: &mut impl io::Read, addr: u16) -> Result<usize, Chip8Error> {
        let mut buf = Vec::new();
        let len = reader.read_to_end(&mut buf)?;
        self.write(&buf, addr)?;
        Ok(len)
    }
}

/// how much RAM we have
pub const CHIP8_RAM_SIZE_BYTES: usize = 4096;

/// where the program is loaded
pub const CHIP8_PROGRAM_ADDR: u16 = 0x0200;

/// where the built-in hex font lives; Fx29 relies on glyph n being at n * 5
pub const CHIP8_FONT_ADDR: u16 = 0x0000;

/// call frames grow upward from here and stop exactly at the display page
pub const CHIP8_STACK_ADDR: u16 = 0x0da0;

/// 64x32 monochrome, 8 pixels per byte, row-major
pub const CHIP8_DISPLAY_ADDR: u16 = 0x0f00;
pub const CHIP8_DISPLAY_SIZE_BYTES: usize = 0x100;

/// Defines the CHIP-8 memory map used here
///   0x0000-0x004f  hex font
///   0x0050-0x01ff  unused (interpreter area on real hardware)
///   0x0200-0x0d9f  program
///   0x0da0-0x0eff  call frames (16 x 22 bytes)
///   0x0f00-0x0fff  display
///
/// chip-8 programs *should* not access the last two directly
pub struct Chip8MemoryMap {
    bytes: Box<[u8]>,
    pub program_addr: u16,
    pub font_addr: u16,
    pub stack_addr: u16,
    pub display_addr: u16,
}

impl MemoryMap for Chip8MemoryMap {
    fn get_rw_slice(&mut self, addr: u16, len: usize) -> Result<&mut [u8], Chip8Error> {
        let range = self.checked_range(addr, len)?;
        Ok(&mut self.bytes[range])
    }

    fn get_ro_slice(&self, addr: u16, len: usize) -> Result<&[u8], Chip8Error> {
        let range = self.checked_range(addr, len)?;
        Ok(&self.bytes[range])
    }
}

impl Chip8MemoryMap {
    /// initialises CHIP-8 with zeroed RAM and the font baked in
    pub fn new() -> Result<Self, Chip8Error> {
        let mut mm = Chip8MemoryMap {
            bytes: vec![0u8; CHIP8_RAM_SIZE_BYTES].into_boxed_slice(),
            program_addr: CHIP8_PROGRAM_ADDR,
            font_addr: CHIP8_FONT_ADDR,
            stack_addr: CHIP8_STACK_ADDR,
            display_addr: CHIP8_DISPLAY_ADDR,
        };
        mm.write(&CHIP8_CONTEMPORARY_FONT, mm.font_addr)?;
        Ok(mm)
    }

    /// back to power-on contents
    pub fn clear(&mut self) -> Result<(), Chip8Error> {
        self.bytes.fill(0);
        self.write(&CHIP8_CONTEMPORARY_FONT, self.font_addr)
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// copy a program image in at `origin`; fails without writing anything
    /// if it does not fit
    pub fn load_image(&mut self, image: &[u8], origin: u16) -> Result<(), Chip8Error> {
        self.write(image, origin)?;
        log::info!(
            "loaded {} byte(s) at 0x{:04x}..0x{:04x}",
            image.len(),
            origin,
            origin as usize + image.len()
        );
        Ok(())
    }

    /// load a CHIP-8 program at 0x200
    pub fn load_program(&mut self, reader: &mut impl io::Read) -> Result<(), Chip8Error> {
        let len = self.write_any(reader, self.program_addr)?;
        log::info!("loaded {} byte program at 0x{:04x}", len, self.program_addr);
        Ok(())
    }

    /// the display page, as a copy so renderers never alias live memory
    pub fn display_snapshot(&self) -> Result<[u8; CHIP8_DISPLAY_SIZE_BYTES], Chip8Error> {
        let mut frame = [0u8; CHIP8_DISPLAY_SIZE_BYTES];
        frame.copy_from_slice(self.get_ro_slice(self.display_addr, CHIP8_DISPLAY_SIZE_BYTES)?);
        Ok(frame)
    }

    fn checked_range(&self, addr: u16, len: usize) -> Result<std::ops::Range<usize>, Chip8Error> {
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(Chip8Error::OutOfBounds { addr: start, len }),
        }
    }
}

const CHIP8_CONTEMPORARY_FONT: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];
