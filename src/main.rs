use std::error::Error;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chip8::display::{Display, DummyDisplay, MonoTermDisplay};
use chip8::input::{Input, NoInput, StdinInput};
use chip8::memory::{CHIP8_DISPLAY_SIZE_BYTES, CHIP8_PROGRAM_ADDR};
use chip8::{Chip8Error, Chip8Interpreter, Config, ShiftQuirk, SpriteEdge, Step};
use clap::Parser;
use log::{error, info, warn};
use spin_sleep::SpinSleeper;

const FRAMES_PER_SECOND: u64 = 60;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftArg {
    /// shift by one, VF = bit shifted out
    Standard,
    /// shift Vx right by Vy for both 8xy6 and 8xyE
    RightByVy,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeArg {
    Wrap,
    Clip,
}

#[derive(Parser, Debug)]
#[command(name = "chip8", about = "CHIP-8 interpreter for the terminal")]
struct Args {
    /// Program image to run (raw bytes, no header).
    #[arg(value_name = "ROM")]
    rom: PathBuf,

    /// Load address for the image (hex with 0x prefix, or decimal).
    #[arg(long, value_name = "ADDR", value_parser = parse_addr, default_value = "0x200")]
    origin: u16,

    /// Instructions executed per 60Hz frame.
    #[arg(long, default_value_t = 12)]
    steps_per_frame: u32,

    /// Stop after this many frames.
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Seed for the Cxkk random number generator.
    #[arg(long)]
    seed: Option<u64>,

    /// Behaviour of 8xy6/8xyE.
    #[arg(long, value_enum, default_value_t = ShiftArg::Standard)]
    shift_quirk: ShiftArg,

    /// Behaviour of sprites drawn past the screen edge.
    #[arg(long, value_enum, default_value_t = EdgeArg::Wrap)]
    sprite_edge: EdgeArg,

    /// Treat 0nnn as an invalid opcode instead of a subroutine call.
    #[arg(long, default_value_t = false)]
    no_sys: bool,

    /// Run without a terminal display or keyboard.
    #[arg(long, default_value_t = false)]
    headless: bool,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            shift: match self.shift_quirk {
                ShiftArg::Standard => ShiftQuirk::Standard,
                ShiftArg::RightByVy => ShiftQuirk::RightByVy,
            },
            sprite_edge: match self.sprite_edge {
                EdgeArg::Wrap => SpriteEdge::Wrap,
                EdgeArg::Clip => SpriteEdge::Clip,
            },
            sys_calls: !self.no_sys,
            seed: self.seed,
        }
    }
}

fn parse_addr(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("bad address {s:?}: {e}"))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut interpreter = Chip8Interpreter::new(args.config())?;
    let image = fs::read(&args.rom)?;
    interpreter.load_image(&image, args.origin)?;
    if args.origin != CHIP8_PROGRAM_ADDR {
        // execution always starts at 0x200
        warn!("image loaded at 0x{:04x}, not the program address", args.origin);
    }
    info!("running {}", args.rom.display());

    let result = if args.headless {
        run(&mut interpreter, &mut DummyDisplay::new(), &mut NoInput, &args)
    } else {
        let mut display = MonoTermDisplay::chip8()?;
        let mut input = StdinInput::new()?;
        let result = run(&mut interpreter, &mut display, &mut input, &args);
        // shove some junk on stdout to stop the cli messing up the last frame
        println!();
        result
    };

    if let Err(e) = &result {
        error!(
            "halted at pc 0x{:04x}: {}",
            interpreter.registers().pc,
            e
        );
    }
    Ok(result?)
}

/// the driver loop: a frame's worth of steps, one timer tick, one present
fn run(
    interpreter: &mut Chip8Interpreter,
    display: &mut dyn Display,
    input: &mut dyn Input,
    args: &Args,
) -> Result<(), Chip8Error> {
    let wanted = display.get_display_size_bytes();
    if wanted != CHIP8_DISPLAY_SIZE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "display takes {} byte frames, interpreter produces {}",
                wanted, CHIP8_DISPLAY_SIZE_BYTES
            ),
        )
        .into());
    }

    let sleeper = SpinSleeper::default();
    let frame_time = Duration::from_nanos(1_000_000_000 / FRAMES_PER_SECOND);
    let mut frames: u64 = 0;

    while !input.quit_requested() && args.frames.map_or(true, |max| frames < max) {
        let start = Instant::now();
        for _ in 0..args.steps_per_frame {
            if interpreter.step(input)? == Step::WaitingForKey {
                break;
            }
        }
        if args.headless && interpreter.is_waiting_for_key() {
            warn!("program is waiting for a key and there is no keyboard");
            break;
        }

        interpreter.tick();
        display.draw(&interpreter.framebuffer()?)?;
        input.flush_keys()?;
        frames += 1;

        if let Some(rest) = frame_time.checked_sub(start.elapsed()) {
            sleeper.sleep(rest);
        }
    }
    info!("stopped after {} frame(s)", frames);
    Ok(())
}
