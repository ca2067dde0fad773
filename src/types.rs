// This file is part of the tbprobe library.
// Copyright (C) 2017-2019 Niklas Fiekas <niklas.fiekas@backscattering.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use arrayvec::ArrayVec;
use shakmaty::{Chess, Color, Move, Outcome, Piece};

/// Syzygy tables are available for up to 7 pieces.
pub const MAX_PIECES: usize = 7;

/// List of up to [`MAX_PIECES`] pieces.
pub type Pieces = ArrayVec<Piece, MAX_PIECES>;

/// A chess variant with Syzygy support.
pub trait Syzygy {
    /// Extension of WDL table files, e.g. `rtbw`.
    const TBW_EXTENSION: &'static str;
    /// Extension of DTZ table files, e.g. `rtbz`.
    const TBZ_EXTENSION: &'static str;

    /// Magic initial bytes of a WDL table.
    const WDL_MAGIC: [u8; 4];
    /// Magic initial bytes of a DTZ table.
    const DTZ_MAGIC: [u8; 4];

    /// Whether both players will have exactly one king unless the game
    /// is over.
    const ONE_KING: bool;
    /// Whether kings are allowed to be on adjacent squares.
    const CONNECTED_KINGS: bool;
    /// Whether captures are compulsory.
    const CAPTURES_COMPULSORY: bool;
}

impl Syzygy for Chess {
    const TBW_EXTENSION: &'static str = "rtbw";
    const TBZ_EXTENSION: &'static str = "rtbz";

    const WDL_MAGIC: [u8; 4] = [0x71, 0xe8, 0x23, 0x5d];
    const DTZ_MAGIC: [u8; 4] = [0xd7, 0x66, 0x0c, 0xa5];

    const ONE_KING: bool = true;
    const CONNECTED_KINGS: bool = false;
    const CAPTURES_COMPULSORY: bool = false;
}

/// 5-valued evaluation of a position in the context of the 50-move drawing
/// rule.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(i8)]
pub enum Wdl {
    /// Unconditional loss for the side to move.
    Loss = -2,
    /// Loss that can be saved by the 50-move rule.
    BlessedLoss = -1,
    /// Unconditional draw.
    Draw = 0,
    /// Win that can be frustrated by the 50-move rule.
    CursedWin = 1,
    /// Unconditional win.
    Win = 2,
}

impl Wdl {
    /// Converts a game outcome to a `Wdl` from the given point of view.
    pub fn from_outcome(outcome: Outcome, pov: Color) -> Wdl {
        match outcome {
            Outcome::Draw => Wdl::Draw,
            Outcome::Decisive { winner } if winner == pov => Wdl::Win,
            _ => Wdl::Loss,
        }
    }

    /// The WDL value implied by a DTZ value, assuming the 50-move counter
    /// is zero after the preceding zeroing move.
    pub fn from_dtz_after_zeroing(dtz: Dtz) -> Wdl {
        match dtz.0 {
            n if (-100..=-1).contains(&n) => Wdl::Loss,
            n if n < -100 => Wdl::BlessedLoss,
            0 => Wdl::Draw,
            n if 100 < n => Wdl::CursedWin,
            _ => Wdl::Win,
        }
    }

    pub(crate) fn signum(self) -> i32 {
        i32::from(self as i8).signum()
    }
}

impl Neg for Wdl {
    type Output = Wdl;

    fn neg(self) -> Wdl {
        match self {
            Wdl::Loss => Wdl::Win,
            Wdl::BlessedLoss => Wdl::CursedWin,
            Wdl::Draw => Wdl::Draw,
            Wdl::CursedWin => Wdl::BlessedLoss,
            Wdl::Win => Wdl::Loss,
        }
    }
}

macro_rules! from_wdl_impl {
    ($($t:ty)+) => {
        $(impl From<Wdl> for $t {
            #[inline]
            fn from(wdl: Wdl) -> $t {
                wdl as $t
            }
        })+
    }
}

from_wdl_impl! { i8 i16 i32 i64 }

/// Distance to zeroing of the half-move clock.
///
/// Can be off by one: `Dtz(-n)` can mean a loss in `n + 1` plies and
/// `Dtz(n)` can mean a win in `n + 1` plies. This is guaranteed not to
/// happen for positions exactly on the edge of the 50-move rule, so that
/// this never impacts results of practical play.
///
/// | DTZ | WDL | |
/// | --- | --- | --- |
/// | `-100 <= n <= -1` | Loss | Unconditional loss (assuming the 50-move counter is zero). Zeroing move can be forced in `-n` plies. |
/// | `n < -100` | Blessed loss | Loss, but draw under the 50-move rule. A zeroing move can be forced in `-n` plies or `-n - 100` plies (if a later phase is responsible for the blessing). |
/// | 0 | Draw | |
/// | `1 <= n <= 100` | Win | Unconditional win (assuming the 50-move counter is zero). Zeroing move can be forced in `n` plies. |
/// | `100 < n` | Cursed win | Win, but draw under the 50-move rule. A zeroing move can be forced in `n` or `n - 100` plies (if a later phase is responsible for the curse). |
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Dtz(pub i32);

impl Dtz {
    /// The DTZ of the position before a zeroing move to a position with
    /// the given WDL value was played.
    pub fn before_zeroing(wdl: Wdl) -> Dtz {
        match wdl {
            Wdl::Loss => Dtz(-1),
            Wdl::BlessedLoss => Dtz(-101),
            Wdl::Draw => Dtz(0),
            Wdl::CursedWin => Dtz(101),
            Wdl::Win => Dtz(1),
        }
    }

    /// Increases the absolute non-zero value by `plies`.
    pub fn add_plies(self, plies: i32) -> Dtz {
        Dtz(self.0.signum() * (self.0.abs() + plies))
    }

    pub(crate) fn signum(self) -> i32 {
        self.0.signum()
    }
}

macro_rules! from_dtz_impl {
    ($($t:ty)+) => {
        $(impl From<Dtz> for $t {
            #[inline]
            fn from(dtz: Dtz) -> $t {
                dtz.0.into()
            }
        })+
    }
}

from_dtz_impl! { i32 i64 }

macro_rules! dtz_from_impl {
    ($($t:ty)+) => {
        $(impl From<$t> for Dtz {
            #[inline]
            fn from(dtz: $t) -> Dtz {
                Dtz(i32::from(dtz))
            }
        })+
    }
}

dtz_from_impl! { u8 i8 u16 i16 i32 }

impl Neg for Dtz {
    type Output = Dtz;

    #[inline]
    fn neg(self) -> Dtz {
        Dtz(-self.0)
    }
}

impl Add for Dtz {
    type Output = Dtz;

    #[inline]
    fn add(self, other: Dtz) -> Dtz {
        Dtz(self.0 + other.0)
    }
}

impl AddAssign for Dtz {
    #[inline]
    fn add_assign(&mut self, other: Dtz) {
        self.0 += other.0;
    }
}

impl Sub for Dtz {
    type Output = Dtz;

    #[inline]
    fn sub(self, other: Dtz) -> Dtz {
        Dtz(self.0 - other.0)
    }
}

impl SubAssign for Dtz {
    #[inline]
    fn sub_assign(&mut self, other: Dtz) {
        self.0 -= other.0;
    }
}

/// Additional information from a probe, obtained from a brief search over
/// zeroing moves.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProbeState {
    /// Normal probe.
    Normal,
    /// Best move is zeroing.
    ZeroingBestMove,
    /// Threatening to force a capture (in variants where captures are
    /// compulsory).
    Threat,
}

/// Mate value on the engine score scale used by [`RootMove::tb_score`].
pub const VALUE_MATE: i32 = 32_000;

/// Score of a drawn position.
pub const VALUE_DRAW: i32 = 0;

pub(crate) const MAX_MATE_PLY: i32 = 128;

pub(crate) const PAWN_VALUE_EG: i32 = 208;

/// A root move annotated with a tablebase rank and score.
///
/// Ranks are in `-1000..=1000`. Moves preserving a win (or achieving the
/// best possible defense) rank highest; the search can prune any root move
/// ranked below the maximum.
#[derive(Debug, Clone)]
pub struct RootMove {
    /// The move leading away from the root position.
    pub mv: Move,
    /// Tablebase rank of the move.
    pub tb_rank: i32,
    /// Centipawn-style score to display for the move.
    pub tb_score: i32,
}

impl RootMove {
    /// Creates a root move with zeroed rank and score.
    pub fn new(mv: Move) -> RootMove {
        RootMove {
            mv,
            tb_rank: 0,
            tb_score: 0,
        }
    }
}
