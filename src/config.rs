//! Interpreter configuration: the behaviours where CHIP-8 implementations
//! disagree, plus the RNG seed.

/// How 8xy6 (SHR) and 8xyE (SHL) behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShiftQuirk {
    /// shift Vx by one in the named direction, ignore Vy, VF = bit shifted out
    #[default]
    Standard,
    /// both opcodes shift Vx *right* by Vy bits, VF = low bit of Vx before
    /// the shift. Reproduces a known-divergent interpreter.
    RightByVy,
}

/// What happens to sprite pixels that fall off the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpriteEdge {
    /// every pixel coordinate is taken modulo 64x32
    #[default]
    Wrap,
    /// only the origin wraps; pixels past the right/bottom edge are dropped
    Clip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub shift: ShiftQuirk,
    pub sprite_edge: SpriteEdge,
    /// decode 0nnn (nnn >= 0x200) as a subroutine call
    pub sys_calls: bool,
    /// fixed seed for Cxkk; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            shift: ShiftQuirk::Standard,
            sprite_edge: SpriteEdge::Wrap,
            sys_calls: true,
            seed: None,
        }
    }
}
