///
/// ## Design
///
/// * the interpreter owns all machine state; no globals
/// * one `step()` is one whole instruction: it either fully applies or fails
///   with nothing changed
/// * no clock inside the interpreter; the driver calls `tick()` at 60Hz and
///   decides how many steps to run in between
/// * abstract display so can plug alternatives; starting with TUI in-console
/// * Fx0A pauses the interpreter rather than spinning inside it
///
/// Model
///
/// Driver (main.rs)
///  |-- config, display, input
///  |-- interpreter(config)
///  |    |-- memory map: program, font, call frames, display page
///  |    `-- registers
///  `-- main loop, once per 60Hz frame
///       |-- up to N x interpreter.step(input); stop early while waiting for a key
///       |-- interpreter.tick()
///       |-- display.draw(interpreter.framebuffer())
///       `-- sleep until the next frame boundary
pub mod config;
pub mod display;
pub mod error;
pub mod input;
pub mod instruction;
pub mod interpreter;
pub mod memory;
pub mod stack;

pub use config::{Config, ShiftQuirk, SpriteEdge};
pub use error::Chip8Error;
pub use interpreter::{Chip8Interpreter, Registers, Step};
