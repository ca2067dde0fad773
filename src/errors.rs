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

use std::error::Error;
use std::fmt;
use std::io;

use crate::material::Material;

/// A [`Result`] type for Syzygy tablebase probes.
pub type SyzygyResult<T> = Result<T, SyzygyError>;

/// Error when probing a table.
#[derive(Debug)]
pub enum SyzygyError {
    /// Position has castling rights, but Syzygy tables do not contain
    /// positions with castling rights.
    Castling,
    /// Position has too many pieces.
    TooManyPieces,
    /// Missing table.
    MissingTable {
        /// The material configuration of the missing table.
        material: Material,
    },
    /// I/O error.
    Read {
        /// The underlying error.
        error: io::Error,
    },
    /// Table file has unexpected magic header bytes.
    Magic,
    /// Table file does not have the expected size. The length of a valid
    /// table file is 16 modulo 64.
    InvalidSize,
    /// Corrupted table.
    CorruptedTable {
        /// Source file of the detection site.
        file: &'static str,
        /// Source line of the detection site.
        line: u32,
    },
}

impl fmt::Display for SyzygyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SyzygyError::Castling => {
                write!(f, "syzygy tables do not contain positions with castling rights")
            }
            SyzygyError::TooManyPieces => {
                write!(f, "syzygy tables only contain positions with up to 7 pieces")
            }
            SyzygyError::MissingTable { ref material } => {
                write!(f, "required table not found: {}", material)
            }
            SyzygyError::Read { ref error } => {
                write!(f, "i/o error when reading a table: {}", error)
            }
            SyzygyError::Magic => write!(f, "table file has invalid magic bytes"),
            SyzygyError::InvalidSize => write!(f, "table file has invalid size"),
            SyzygyError::CorruptedTable { file, line } => {
                write!(f, "corrupted table (detected in {} l. {})", file, line)
            }
        }
    }
}

impl Error for SyzygyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            SyzygyError::Read { ref error } => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for SyzygyError {
    fn from(error: io::Error) -> SyzygyError {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => SyzygyError::CorruptedTable {
                file: file!(),
                line: line!(),
            },
            _ => SyzygyError::Read { error },
        }
    }
}

/// Return a `CorruptedTable` error.
macro_rules! throw {
    () => {
        return Err($crate::errors::SyzygyError::CorruptedTable {
            file: file!(),
            line: line!(),
        })
    };
}

/// Unwrap an `Option` or return a `CorruptedTable` error.
macro_rules! u {
    ($e:expr) => {
        match $e {
            Some(ok) => ok,
            None => throw!(),
        }
    };
}

/// Ensure that a condition holds. Otherwise return a `CorruptedTable` error.
macro_rules! ensure {
    ($cond:expr) => {
        if !$cond {
            throw!();
        }
    };
}
