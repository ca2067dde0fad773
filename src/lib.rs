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

//! Probe Syzygy endgame tablebases from a chess engine search.
//!
//! Syzygy tables allow optimal play under the 50-move rule. Tables are
//! available for positions with up to 7 pieces.
//!
//! # Example
//!
//! ```no_run
//! use shakmaty::{CastlingMode, Chess, fen::Fen};
//! use tbprobe::{Tablebase, Wdl, Dtz};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tables = Tablebase::new();
//! tables.set_paths("tables/chess");
//!
//! let pos: Chess = "8/8/8/8/B7/N7/K2k4/8 b - - 0 1"
//!     .parse::<Fen>()?
//!     .into_position(CastlingMode::Standard)?;
//!
//! let (wdl, _state) = tables.probe_wdl(&pos)?;
//! assert_eq!(wdl, Wdl::Loss);
//!
//! let dtz = tables.probe_dtz(&pos)?;
//! assert_eq!(dtz, Dtz(-59));
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! See [`SyzygyError`] for possible error conditions.

#![doc(html_root_url = "https://docs.rs/tbprobe/0.1.0")]
#![warn(missing_debug_implementations)]

#[macro_use]
mod errors;
mod lazy;
mod material;
mod table;
mod tablebase;
mod types;

pub mod filesystem;

pub use crate::errors::{SyzygyError, SyzygyResult};
pub use crate::material::{Material, MaterialSide, ParseMaterialError};
pub use crate::tablebase::Tablebase;
pub use crate::types::{
    Dtz, Pieces, ProbeState, RootMove, Syzygy, Wdl, MAX_PIECES, VALUE_DRAW, VALUE_MATE,
};
