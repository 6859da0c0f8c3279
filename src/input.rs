use crossterm::event::{poll, read, Event, KeyCode};
use crossterm::terminal;
use log::{debug, warn};
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// map of keys on the left-hand side of a qwerty keyboard to the COSMAC VIP
/// hex keypad, which is laid out
///   1 2 3 C
///   4 5 6 D
///   7 8 9 E
///   A 0 B F
const CHIP8_CONVENTIONAL_KEYMAP: [(char, u8); 16] = [
    ('x', 0x00),
    ('1', 0x01),
    ('2', 0x02),
    ('3', 0x03),
    ('q', 0x04),
    ('w', 0x05),
    ('e', 0x06),
    ('a', 0x07),
    ('s', 0x08),
    ('d', 0x09),
    ('z', 0x0a),
    ('c', 0x0b),
    ('4', 0x0c),
    ('r', 0x0d),
    ('f', 0x0e),
    ('v', 0x0f),
];

/// reads keypresses
pub trait Input {
    /// get a list of all the mapped keys that have been pressed recently,
    /// without flushing them from the buffer
    fn peek_keys(&mut self) -> Result<&[u8], io::Error>;

    /// flush all the keypresses from the buffer
    fn flush_keys(&mut self) -> Result<(), io::Error>;

    /// is hex key `key` (0x0..=0xF) currently down
    fn is_key_pressed(&mut self, key: u8) -> Result<bool, io::Error> {
        Ok(self.peek_keys()?.contains(&key))
    }

    /// consume the oldest pending key and discard the rest
    fn take_key(&mut self) -> Result<Option<u8>, io::Error> {
        let key = self.peek_keys()?.first().copied();
        if key.is_some() {
            self.flush_keys()?;
        }
        Ok(key)
    }

    /// has the user asked to leave
    fn quit_requested(&self) -> bool {
        false
    }
}

/// headless Input: no key is ever pressed
pub struct NoInput;

impl Input for NoInput {
    fn peek_keys(&mut self) -> Result<&[u8], io::Error> {
        Ok(&[])
    }

    fn flush_keys(&mut self) -> Result<(), io::Error> {
        Ok(())
    }
}

/// simple implementation of Input, using crossterm's event stream on STDIN
pub struct StdinInput {
    buffer: Vec<u8>,
    keymap: HashMap<char, u8>,
    quit: bool,
}

impl StdinInput {
    pub fn new() -> Result<Self, io::Error> {
        terminal::enable_raw_mode()?;
        Ok(StdinInput {
            buffer: Vec::new(),
            keymap: HashMap::from(CHIP8_CONVENTIONAL_KEYMAP),
            quit: false,
        })
    }

    fn read_stdin(&mut self) -> Result<(), io::Error> {
        while poll(Duration::from_millis(0))? {
            match read()? {
                Event::Key(evt) => match evt.code {
                    KeyCode::Char(key) => match self.keymap.get(&key.to_ascii_lowercase()) {
                        Some(mapped_key) => self.buffer.push(*mapped_key),
                        None => warn!("can't map {:?} to a COSMAC key", key),
                    },
                    KeyCode::Esc => {
                        debug!("quit requested");
                        self.quit = true;
                    }
                    other => warn!("unknown key event received: {:?}", other),
                },
                // resizes and mouse events are none of our business
                _ => {}
            }
        }
        Ok(())
    }
}

impl Drop for StdinInput {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("failed to leave raw mode: {}", e);
        }
    }
}

impl Input for StdinInput {
    fn peek_keys(&mut self) -> Result<&[u8], io::Error> {
        self.read_stdin()?;
        Ok(self.buffer.as_slice())
    }

    fn flush_keys(&mut self) -> Result<(), io::Error> {
        self.read_stdin()?;
        self.buffer.clear();
        Ok(())
    }

    fn quit_requested(&self) -> bool {
        self.quit
    }
}

/// dummy Input implementation for testing
pub struct DummyInput {
    bytes: Vec<u8>,
}

impl DummyInput {
    pub fn new(keys: &[u8]) -> Self {
        DummyInput {
            bytes: Vec::from(keys),
        }
    }
}

impl Input for DummyInput {
    fn peek_keys(&mut self) -> Result<&[u8], io::Error> {
        Ok(self.bytes.as_slice())
    }

    fn flush_keys(&mut self) -> Result<(), io::Error> {
        self.bytes.clear();
        Ok(())
    }
}
