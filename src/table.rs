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

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use arrayvec::ArrayVec;
use bit_vec::BitVec;
use bitflags::bitflags;
use itertools::Itertools;
use lazy_static::lazy_static;
use num_integer::binomial;
use shakmaty::{Bitboard, Color, File, Piece, Position, Rank, Role, Square};

use crate::errors::{SyzygyError, SyzygyResult};
use crate::filesystem::{Filesystem, RandomAccessFile, ReadHint};
use crate::material::Material;
use crate::types::{Dtz, Pieces, Syzygy, Wdl, MAX_PIECES};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Metric {
    Wdl,
    Dtz,
}

pub trait TableTag {
    const METRIC: Metric;
}

#[derive(Debug)]
pub enum WdlTag {}

impl TableTag for WdlTag {
    const METRIC: Metric = Metric::Wdl;
}

#[derive(Debug)]
pub enum DtzTag {}

impl TableTag for DtzTag {
    const METRIC: Metric = Metric::Dtz;
}

bitflags! {
    /// Table layout flags.
    struct Layout: u8 {
        /// Two sided table for non-symmetric material.
        const SPLIT = 1;
        /// Table with pawns, split per file of the leading pawn.
        const HAS_PAWNS = 2;
    }
}

bitflags! {
    /// Subtable format flags.
    struct Flag: u8 {
        /// DTZ table stores black to move.
        const STM = 1;
        /// Use `DtzMap`.
        const MAPPED = 2;
        /// DTZ table has winning positions on the edge of the 50-move rule
        /// and therefore stores exact plies rather than just full moves.
        const WIN_PLIES = 4;
        /// DTZ table has losing positions on the edge of the 50-move rule
        /// and therefore stores exact plies rather than just full moves.
        const LOSS_PLIES = 8;
        /// DTZ table contains very long endgames, so that values require
        /// 16 bits rather than just 8.
        const WIDE_DTZ = 16;
        /// Table stores only a single value.
        const SINGLE_VALUE = 128;
    }
}

/// Maps squares into the a1-d1-d4 triangle.
const TRIANGLE: [u64; 64] = [
    6, 0, 1, 2, 2, 1, 0, 6,
    0, 7, 3, 4, 4, 3, 7, 0,
    1, 3, 8, 5, 5, 8, 3, 1,
    2, 4, 5, 9, 9, 5, 4, 2,
    2, 4, 5, 9, 9, 5, 4, 2,
    1, 3, 8, 5, 5, 8, 3, 1,
    0, 7, 3, 4, 4, 3, 7, 0,
    6, 0, 1, 2, 2, 1, 0, 6,
];

/// Inverse of `TRIANGLE`.
const INV_TRIANGLE: [usize; 10] = [1, 2, 3, 10, 11, 19, 0, 9, 18, 27];

/// Maps the b1-h1-h7 triangle to `0..=27`.
const LOWER: [u64; 64] = [
    28,  0,  1,  2,  3,  4,  5,  6,
     0, 29,  7,  8,  9, 10, 11, 12,
     1,  7, 30, 13, 14, 15, 16, 17,
     2,  8, 13, 31, 18, 19, 20, 21,
     3,  9, 14, 18, 32, 22, 23, 24,
     4, 10, 15, 19, 22, 33, 25, 26,
     5, 11, 16, 20, 23, 25, 34, 27,
     6, 12, 17, 21, 24, 26, 27, 35,
];

/// Used to initialize `Consts::mult_idx` and `Consts::mult_factor`.
const MULT_TWIST: [u64; 64] = [
    15, 63, 55, 47, 40, 48, 56, 12,
    62, 11, 39, 31, 24, 32,  8, 57,
    54, 38,  7, 23, 16,  4, 33, 49,
    46, 30, 22,  3,  0, 17, 25, 41,
    45, 29, 21,  2,  1, 18, 26, 42,
    53, 37,  6, 20, 19,  5, 34, 50,
    61, 10, 36, 28, 27, 35,  9, 58,
    14, 60, 52, 44, 43, 51, 59, 13,
];

/// Unused entry. Initialized to `-1`, so that most uses will cause noticable
/// overflow in debug mode.
const Z0: u64 = u64::MAX;

/// Encoding of all 462 configurations of two not-connected kings.
const KK_IDX: [[u64; 64]; 10] = [[
     Z0,  Z0,  Z0,   0,   1,   2,   3,   4,
     Z0,  Z0,  Z0,   5,   6,   7,   8,   9,
     10,  11,  12,  13,  14,  15,  16,  17,
     18,  19,  20,  21,  22,  23,  24,  25,
     26,  27,  28,  29,  30,  31,  32,  33,
     34,  35,  36,  37,  38,  39,  40,  41,
     42,  43,  44,  45,  46,  47,  48,  49,
     50,  51,  52,  53,  54,  55,  56,  57,
], [
     58,  Z0,  Z0,  Z0,  59,  60,  61,  62,
     63,  Z0,  Z0,  Z0,  64,  65,  66,  67,
     68,  69,  70,  71,  72,  73,  74,  75,
     76,  77,  78,  79,  80,  81,  82,  83,
     84,  85,  86,  87,  88,  89,  90,  91,
     92,  93,  94,  95,  96,  97,  98,  99,
    100, 101, 102, 103, 104, 105, 106, 107,
    108, 109, 110, 111, 112, 113, 114, 115,
], [
    116, 117,  Z0,  Z0,  Z0, 118, 119, 120,
    121, 122,  Z0,  Z0,  Z0, 123, 124, 125,
    126, 127, 128, 129, 130, 131, 132, 133,
    134, 135, 136, 137, 138, 139, 140, 141,
    142, 143, 144, 145, 146, 147, 148, 149,
    150, 151, 152, 153, 154, 155, 156, 157,
    158, 159, 160, 161, 162, 163, 164, 165,
    166, 167, 168, 169, 170, 171, 172, 173,
], [
    174,  Z0,  Z0,  Z0, 175, 176, 177, 178,
    179,  Z0,  Z0,  Z0, 180, 181, 182, 183,
    184,  Z0,  Z0,  Z0, 185, 186, 187, 188,
    189, 190, 191, 192, 193, 194, 195, 196,
    197, 198, 199, 200, 201, 202, 203, 204,
    205, 206, 207, 208, 209, 210, 211, 212,
    213, 214, 215, 216, 217, 218, 219, 220,
    221, 222, 223, 224, 225, 226, 227, 228,
], [
    229, 230,  Z0,  Z0,  Z0, 231, 232, 233,
    234, 235,  Z0,  Z0,  Z0, 236, 237, 238,
    239, 240,  Z0,  Z0,  Z0, 241, 242, 243,
    244, 245, 246, 247, 248, 249, 250, 251,
    252, 253, 254, 255, 256, 257, 258, 259,
    260, 261, 262, 263, 264, 265, 266, 267,
    268, 269, 270, 271, 272, 273, 274, 275,
    276, 277, 278, 279, 280, 281, 282, 283,
], [
    284, 285, 286, 287, 288, 289, 290, 291,
    292, 293,  Z0,  Z0,  Z0, 294, 295, 296,
    297, 298,  Z0,  Z0,  Z0, 299, 300, 301,
    302, 303,  Z0,  Z0,  Z0, 304, 305, 306,
    307, 308, 309, 310, 311, 312, 313, 314,
    315, 316, 317, 318, 319, 320, 321, 322,
    323, 324, 325, 326, 327, 328, 329, 330,
    331, 332, 333, 334, 335, 336, 337, 338,
], [
     Z0,  Z0, 339, 340, 341, 342, 343, 344,
     Z0,  Z0, 345, 346, 347, 348, 349, 350,
     Z0,  Z0, 441, 351, 352, 353, 354, 355,
     Z0,  Z0,  Z0, 442, 356, 357, 358, 359,
     Z0,  Z0,  Z0,  Z0, 443, 360, 361, 362,
     Z0,  Z0,  Z0,  Z0,  Z0, 444, 363, 364,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 445, 365,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 446,
], [
     Z0,  Z0,  Z0, 366, 367, 368, 369, 370,
     Z0,  Z0,  Z0, 371, 372, 373, 374, 375,
     Z0,  Z0,  Z0, 376, 377, 378, 379, 380,
     Z0,  Z0,  Z0, 447, 381, 382, 383, 384,
     Z0,  Z0,  Z0,  Z0, 448, 385, 386, 387,
     Z0,  Z0,  Z0,  Z0,  Z0, 449, 388, 389,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 450, 390,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 451,
], [
    452, 391, 392, 393, 394, 395, 396, 397,
     Z0,  Z0,  Z0,  Z0, 398, 399, 400, 401,
     Z0,  Z0,  Z0,  Z0, 402, 403, 404, 405,
     Z0,  Z0,  Z0,  Z0, 406, 407, 408, 409,
     Z0,  Z0,  Z0,  Z0, 453, 410, 411, 412,
     Z0,  Z0,  Z0,  Z0,  Z0, 454, 413, 414,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 455, 415,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 456,
], [
    457, 416, 417, 418, 419, 420, 421, 422,
     Z0, 458, 423, 424, 425, 426, 427, 428,
     Z0,  Z0,  Z0,  Z0,  Z0, 429, 430, 431,
     Z0,  Z0,  Z0,  Z0,  Z0, 432, 433, 434,
     Z0,  Z0,  Z0,  Z0,  Z0, 435, 436, 437,
     Z0,  Z0,  Z0,  Z0,  Z0, 459, 438, 439,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 460, 440,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 461,
]];

/// Encoding of a pair of identical pieces.
const PP_IDX: [[u64; 64]; 10] = [[
      0,  Z0,   1,   2,   3,   4,   5,   6,
      7,   8,   9,  10,  11,  12,  13,  14,
     15,  16,  17,  18,  19,  20,  21,  22,
     23,  24,  25,  26,  27,  28,  29,  30,
     31,  32,  33,  34,  35,  36,  37,  38,
     39,  40,  41,  42,  43,  44,  45,  46,
     Z0,  47,  48,  49,  50,  51,  52,  53,
     54,  55,  56,  57,  58,  59,  60,  61,
], [
     62,  Z0,  Z0,  63,  64,  65,  Z0,  66,
     Z0,  67,  68,  69,  70,  71,  72,  Z0,
     73,  74,  75,  76,  77,  78,  79,  80,
     81,  82,  83,  84,  85,  86,  87,  88,
     89,  90,  91,  92,  93,  94,  95,  96,
     Z0,  97,  98,  99, 100, 101, 102, 103,
     Z0, 104, 105, 106, 107, 108, 109,  Z0,
    110,  Z0, 111, 112, 113, 114,  Z0, 115,
], [
    116,  Z0,  Z0,  Z0, 117,  Z0,  Z0, 118,
     Z0, 119, 120, 121, 122, 123, 124,  Z0,
     Z0, 125, 126, 127, 128, 129, 130,  Z0,
    131, 132, 133, 134, 135, 136, 137, 138,
     Z0, 139, 140, 141, 142, 143, 144, 145,
     Z0, 146, 147, 148, 149, 150, 151,  Z0,
     Z0, 152, 153, 154, 155, 156, 157,  Z0,
    158,  Z0,  Z0, 159, 160,  Z0,  Z0, 161,
], [
    162,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 163,
     Z0, 164,  Z0, 165, 166, 167, 168,  Z0,
     Z0, 169, 170, 171, 172, 173, 174,  Z0,
     Z0, 175, 176, 177, 178, 179, 180,  Z0,
     Z0, 181, 182, 183, 184, 185, 186,  Z0,
     Z0,  Z0, 187, 188, 189, 190, 191,  Z0,
     Z0, 192, 193, 194, 195, 196, 197,  Z0,
    198,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 199,
], [
    200,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 201,
     Z0, 202,  Z0,  Z0, 203,  Z0, 204,  Z0,
     Z0,  Z0, 205, 206, 207, 208,  Z0,  Z0,
     Z0, 209, 210, 211, 212, 213, 214,  Z0,
     Z0,  Z0, 215, 216, 217, 218, 219,  Z0,
     Z0,  Z0, 220, 221, 222, 223,  Z0,  Z0,
     Z0, 224,  Z0, 225, 226,  Z0, 227,  Z0,
    228,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 229,
], [
    230,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 231,
     Z0, 232,  Z0,  Z0,  Z0,  Z0, 233,  Z0,
     Z0,  Z0, 234,  Z0, 235, 236,  Z0,  Z0,
     Z0,  Z0, 237, 238, 239, 240,  Z0,  Z0,
     Z0,  Z0,  Z0, 241, 242, 243,  Z0,  Z0,
     Z0,  Z0, 244, 245, 246, 247,  Z0,  Z0,
     Z0, 248,  Z0,  Z0,  Z0,  Z0, 249,  Z0,
    250,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 251,
], [
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 259,
     Z0, 252,  Z0,  Z0,  Z0,  Z0, 260,  Z0,
     Z0,  Z0, 253,  Z0,  Z0, 261,  Z0,  Z0,
     Z0,  Z0,  Z0, 254, 262,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 255,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0, 256,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 257,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 258,
], [
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 268,  Z0,
     Z0,  Z0, 263,  Z0,  Z0, 269,  Z0,  Z0,
     Z0,  Z0,  Z0, 264, 270,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 265,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0, 266,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0, 267,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
], [
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0, 274,  Z0,  Z0,
     Z0,  Z0,  Z0, 271, 275,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 272,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0, 273,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
], [
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 277,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0, 276,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
     Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,  Z0,
]];

/// The a5, a6, a7, b5, b6, c5 squares.
const TEST45: Bitboard = Bitboard(0x1_0307_0000_0000);

lazy_static! {
    static ref CONSTS: Consts = Consts::new();
}

struct Consts {
    mult_idx: [[u64; 10]; 5],
    mult_factor: [u64; 5],

    map_pawns: [u64; 64],
    lead_pawn_idx: [[u64; 64]; 6],
    lead_pawns_size: [[u64; 4]; 6],
}

impl Consts {
    fn new() -> Consts {
        let mut mult_idx = [[0; 10]; 5];
        let mut mult_factor = [0; 5];

        for i in 0..5 {
            let mut s = 0;
            for j in 0..10 {
                mult_idx[i][j] = s;
                s += if i == 0 {
                    1
                } else {
                    binomial(MULT_TWIST[INV_TRIANGLE[j]], i as u64)
                };
            }
            mult_factor[i] = s;
        }

        let mut available_squares = 48;

        let mut map_pawns = [0; 64];
        let mut lead_pawn_idx = [[0; 64]; 6];
        let mut lead_pawns_size = [[0; 4]; 6];

        for lead_pawns_cnt in 1..=5 {
            for file in 0..4 {
                let mut idx = 0;

                for rank in 1..7 {
                    let sq = Square::from_coords(File::new(file as u32), Rank::new(rank as u32));
                    if lead_pawns_cnt == 1 {
                        available_squares -= 1;
                        map_pawns[usize::from(sq)] = available_squares;
                        available_squares -= 1;
                        map_pawns[usize::from(sq.flip_horizontal())] = available_squares;
                    }
                    lead_pawn_idx[lead_pawns_cnt][usize::from(sq)] = idx;
                    idx += binomial(map_pawns[usize::from(sq)], lead_pawns_cnt as u64 - 1);
                }

                lead_pawns_size[lead_pawns_cnt][file] = idx;
            }
        }

        Consts {
            mult_idx,
            mult_factor,
            map_pawns,
            lead_pawn_idx,
            lead_pawns_size,
        }
    }
}

/// Header byte to piece.
fn byte_to_piece(p: u8) -> Option<Piece> {
    let color = Color::from_white(p & 8 == 0);
    Some(match p & !8 {
        1 => Role::Pawn.of(color),
        2 => Role::Knight.of(color),
        3 => Role::Bishop.of(color),
        4 => Role::Rook.of(color),
        5 => Role::Queen.of(color),
        6 => Role::King.of(color),
        _ => return None,
    })
}

/// Checks if a square is not on the a1-h8 diagonal.
fn offdiag(sq: Square) -> bool {
    u32::from(sq.file()) != u32::from(sq.rank())
}

fn rank_idx(sq: Square) -> u64 {
    u64::from(u32::from(sq.rank()))
}

fn flip_if(flip: bool, color: Color) -> Color {
    if flip {
        !color
    } else {
        color
    }
}

/// Reads a 3-byte Re-Pair tree entry: 12 bits for the left child, 12 bits
/// for the right child.
fn read_lr(raf: &dyn RandomAccessFile, ptr: u64, hint: ReadHint) -> SyzygyResult<(u16, u16)> {
    let mut buf = [0; 3];
    raf.read_exact_at(&mut buf, ptr, hint)?;
    let left = (u16::from(buf[1] & 0xf) << 8) | u16::from(buf[0]);
    let right = (u16::from(buf[2]) << 4) | (u16::from(buf[1]) >> 4);
    Ok((left, right))
}

/// Parses a piece list from the nibbles of the given side.
fn parse_pieces(
    raf: &dyn RandomAccessFile,
    ptr: u64,
    count: usize,
    side: Color,
) -> SyzygyResult<Pieces> {
    let mut buffer = [0; MAX_PIECES];
    let bytes = &mut buffer[..count];
    raf.read_exact_at(bytes, ptr, ReadHint::Header)?;

    let mut pieces = Pieces::new();
    for p in bytes {
        pieces.push(u!(byte_to_piece(match side {
            Color::White => *p & 0xf,
            Color::Black => *p >> 4,
        })));
    }

    Ok(pieces)
}

/// Group pieces that will be encoded together.
fn group_pieces(pieces: &Pieces) -> ArrayVec<usize, MAX_PIECES> {
    let mut result = ArrayVec::new();
    let material = Material::from_iter(pieces.iter().copied());

    // For pawnless positions: if there are at least 3 unique pieces, then 3
    // unique pieces will form the leading group. Otherwise the two kings
    // will form the leading group.
    let first_len = if material.has_pawns() {
        0
    } else if material.unique_pieces() >= 3 {
        3
    } else {
        2
    };

    if first_len > 0 {
        result.push(first_len);
    }

    // The remaining identical pieces are grouped together.
    result.extend(
        pieces
            .iter()
            .skip(first_len)
            .group_by(|p| *p)
            .into_iter()
            .map(|(_, g)| g.count()),
    );

    result
}

/// Description of the encoding used for a piece configuration.
#[derive(Debug, Clone)]
struct GroupData {
    pieces: Pieces,
    lens: ArrayVec<usize, MAX_PIECES>,
    factors: ArrayVec<u64, { MAX_PIECES + 1 }>,
}

impl GroupData {
    fn new<S: Syzygy>(pieces: Pieces, order: [u8; 2], file: usize) -> SyzygyResult<GroupData> {
        ensure!(pieces.len() >= 2);

        let material = Material::from_iter(pieces.iter().copied());

        // Compute group lengths.
        let lens = group_pieces(&pieces);
        ensure!(!material.has_pawns() || (1..=5).contains(&lens[0]));

        // Compute a factor for each group.
        let pp = material.white.has_pawns() && material.black.has_pawns();
        let mut factors = ArrayVec::from([0; MAX_PIECES + 1]);
        factors.truncate(lens.len() + 1);
        let mut free_squares = 64 - lens[0] - if pp { lens[1] } else { 0 };
        let mut next = if pp { 2 } else { 1 };
        let mut idx = 1u64;
        let mut k = 0;

        while next < lens.len() || k == order[0] || k == order[1] {
            if k == order[0] {
                // Leading pawns or pieces.
                factors[0] = idx;

                idx = u!(idx.checked_mul(if material.has_pawns() {
                    CONSTS.lead_pawns_size[lens[0]][file]
                } else if material.unique_pieces() >= 3 {
                    31_332
                } else if material.unique_pieces() == 2 {
                    if S::CONNECTED_KINGS {
                        518
                    } else {
                        462
                    }
                } else if material.min_like_man() == 2 {
                    278
                } else {
                    CONSTS.mult_factor[usize::from(material.min_like_man()) - 1]
                }));
            } else if k == order[1] {
                // Remaining pawns.
                factors[1] = idx;
                idx = u!(idx.checked_mul(binomial(48 - lens[0] as u64, lens[1] as u64)));
            } else {
                // Remaining pieces.
                factors[next] = idx;
                idx = u!(idx.checked_mul(binomial(free_squares as u64, lens[next] as u64)));
                free_squares -= lens[next];
                next += 1;
            }
            k += 1;
        }

        factors[lens.len()] = idx;

        Ok(GroupData {
            pieces,
            lens,
            factors,
        })
    }
}

/// Indexes into the DTZ value remap of a table.
#[derive(Debug)]
enum DtzMap {
    /// Normal 8-bit DTZ map.
    Normal { map_ptr: u64, by_wdl: [u16; 4] },
    /// 16-bit DTZ map for very long endgames.
    Wide { map_ptr: u64, by_wdl: [u16; 4] },
}

impl DtzMap {
    fn read(&self, raf: &dyn RandomAccessFile, wdl: Wdl, res: u16) -> SyzygyResult<u16> {
        let wdl = match wdl {
            Wdl::Win => 0,
            Wdl::Loss => 1,
            Wdl::CursedWin => 2,
            Wdl::BlessedLoss => 3,
            Wdl::Draw => 0, // unreachable
        };

        Ok(match *self {
            DtzMap::Normal { map_ptr, by_wdl } => {
                let offset = map_ptr + u64::from(by_wdl[wdl]) + u64::from(res);
                u16::from(raf.read_u8_at(offset, ReadHint::DtzMap)?)
            }
            DtzMap::Wide { map_ptr, by_wdl } => {
                let offset = map_ptr + 2 * (u64::from(by_wdl[wdl]) + u64::from(res));
                raf.read_u16_le_at(offset, ReadHint::DtzMap)?
            }
        })
    }
}

/// Description of encoding and compression for one subtable.
#[derive(Debug)]
struct PairsData {
    /// Encoding flags.
    flags: Flag,
    /// Piece configuration encoding info.
    groups: GroupData,

    /// Block size in bytes.
    block_size: u32,
    /// About every span values there is a sparse index entry.
    span: u32,
    /// Number of blocks in the table.
    blocks_num: u32,

    /// Offset of the symbol table.
    btree: u64,
    /// Minimum length in bits of the Huffman symbols.
    min_symlen: u8,
    /// Offset of the lowest symbols for each length.
    lowest_sym: u64,
    /// 64-bit padded lowest symbols for each length.
    base: Vec<u64>,
    /// Number of values (-1) represented by a given Huffman symbol.
    symlen: Vec<u8>,

    /// Offset of the sparse index.
    sparse_index: u64,
    /// Size of the sparse index.
    sparse_index_size: u32,

    /// Offset of the block length table.
    block_lengths: u64,
    /// Size of the block length table, padded to be bigger than `blocks_num`.
    block_length_size: u32,

    /// Start of compressed data.
    data: u64,

    /// DTZ mapping.
    dtz_map: Option<DtzMap>,
}

impl PairsData {
    fn parse<S: Syzygy, T: TableTag>(
        raf: &dyn RandomAccessFile,
        mut ptr: u64,
        groups: GroupData,
    ) -> SyzygyResult<(PairsData, u64)> {
        let flags = Flag::from_bits_truncate(raf.read_u8_at(ptr, ReadHint::Header)?);

        if flags.contains(Flag::SINGLE_VALUE) {
            let single_value = if T::METRIC == Metric::Wdl {
                raf.read_u8_at(ptr + 1, ReadHint::Header)?
            } else if S::CAPTURES_COMPULSORY {
                1 // http://www.talkchess.com/forum/viewtopic.php?p=698093#698093
            } else {
                0
            };

            return Ok((
                PairsData {
                    flags,
                    min_symlen: single_value,
                    groups,
                    base: Vec::new(),
                    block_lengths: 0,
                    block_length_size: 0,
                    block_size: 0,
                    blocks_num: 0,
                    btree: 0,
                    data: 0,
                    lowest_sym: 0,
                    span: 0,
                    sparse_index: 0,
                    sparse_index_size: 0,
                    symlen: Vec::new(),
                    dtz_map: None,
                },
                ptr + 2,
            ));
        }

        // Read header.
        let mut header = [0; 10];
        raf.read_exact_at(&mut header, ptr, ReadHint::Header)?;

        let tb_size = groups.factors[groups.lens.len()];
        let block_size = u!(1u32.checked_shl(u32::from(header[1])));
        let span = u!(1u32.checked_shl(u32::from(header[2])));
        let sparse_index_size = ((tb_size + u64::from(span) - 1) / u64::from(span)) as u32;
        let padding = header[3];
        let blocks_num = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let block_length_size = u!(blocks_num.checked_add(u32::from(padding)));

        let max_symlen = header[8];
        let min_symlen = header[9];
        ensure!(max_symlen >= min_symlen);
        ensure!(min_symlen >= 1 && max_symlen <= 32);
        let h = usize::from(max_symlen - min_symlen + 1);

        let lowest_sym = ptr + 10;

        // Initialize base.
        let mut base = vec![0u64; h];
        for i in (0..h - 1).rev() {
            let ptr = lowest_sym + i as u64 * 2;

            base[i] = u!(u!(base[i + 1]
                .checked_add(u64::from(raf.read_u16_le_at(ptr, ReadHint::Header)?)))
            .checked_sub(u64::from(raf.read_u16_le_at(ptr + 2, ReadHint::Header)?)))
                / 2;

            ensure!(base[i] * 2 >= base[i + 1]);
        }

        for (i, base) in base.iter_mut().enumerate() {
            *base = u!(base.checked_shl(64 - (u32::from(min_symlen) + i as u32)));
        }

        // Initialize symlen.
        ptr += 10 + h as u64 * 2;
        let sym = raf.read_u16_le_at(ptr, ReadHint::Header)?;
        ptr += 2;
        let btree = ptr;
        let mut symlen = vec![0; usize::from(sym)];
        let mut visited = BitVec::from_elem(symlen.len(), false);
        for s in 0..sym {
            read_symlen(raf, btree, &mut symlen, &mut visited, s)?;
        }
        ptr += symlen.len() as u64 * 3 + (symlen.len() as u64 & 1);

        Ok((
            PairsData {
                flags,
                groups,

                block_size,
                span,
                blocks_num,

                btree,
                min_symlen,
                lowest_sym,
                base,
                symlen,

                // The rest is initialized later.
                sparse_index: 0,
                sparse_index_size,

                block_lengths: 0,
                block_length_size,

                data: 0,

                dtz_map: None,
            },
            ptr,
        ))
    }
}

/// Build the symlen table.
///
/// Re-Pair symbols can expand into up to 256 values, so the depth-first
/// visit uses an explicit stack instead of recursing.
fn read_symlen(
    raf: &dyn RandomAccessFile,
    btree: u64,
    symlen: &mut [u8],
    visited: &mut BitVec,
    sym: u16,
) -> SyzygyResult<()> {
    let mut stack = Vec::new();
    stack.push((sym, false));

    while let Some((sym, children_visited)) = stack.pop() {
        let s = usize::from(sym);
        if u!(visited.get(s)) {
            continue;
        }

        let (left, right) = read_lr(raf, btree + 3 * u64::from(sym), ReadHint::Header)?;

        if right == 0xfff {
            *u!(symlen.get_mut(s)) = 0;
            visited.set(s, true);
        } else if children_visited {
            // A cycle would leave one of the children unresolved.
            ensure!(u!(visited.get(usize::from(left))));
            ensure!(u!(visited.get(usize::from(right))));
            let len = u!(u!(symlen[usize::from(left)].checked_add(symlen[usize::from(right)]))
                .checked_add(1));
            *u!(symlen.get_mut(s)) = len;
            visited.set(s, true);
        } else {
            ensure!(usize::from(left) < symlen.len() && usize::from(right) < symlen.len());
            stack.push((sym, true));
            stack.push((right, false));
            stack.push((left, false));
        }
    }

    Ok(())
}

/// Description of encoding and compression for both sides of a table.
#[derive(Debug)]
struct FileData {
    sides: ArrayVec<PairsData, 2>,
}

/// A Syzygy table.
pub struct Table<T: TableTag, S: Position + Syzygy> {
    is_wdl: PhantomData<T>,
    syzygy: PhantomData<S>,

    raf: Box<dyn RandomAccessFile>,

    material: Material,

    num_unique_pieces: u8,
    min_like_man: u8,
    files: ArrayVec<FileData, 4>,
}

impl<T: TableTag, S: Position + Syzygy> fmt::Debug for Table<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("material", &self.material)
            .finish_non_exhaustive()
    }
}

impl<T: TableTag, S: Position + Syzygy> Table<T, S> {
    /// Opens the table at `path` and parses its header.
    pub fn open(
        filesystem: &dyn Filesystem,
        path: &Path,
        material: &Material,
    ) -> SyzygyResult<Table<T, S>> {
        let material = material.clone();
        ensure!(material.count() <= MAX_PIECES);

        // Check magic.
        let magic = match T::METRIC {
            Metric::Wdl => S::WDL_MAGIC,
            Metric::Dtz => S::DTZ_MAGIC,
        };

        let raf = filesystem.open(path)?;

        let mut first = [0; 4];
        raf.read_exact_at(&mut first, 0, ReadHint::Header)?;
        if first != magic {
            return Err(SyzygyError::Magic);
        }

        // Files have a 5 byte header, then sections padded to 64 bytes.
        if filesystem.regular_file_size(path)? % 64 != 16 {
            return Err(SyzygyError::InvalidSize);
        }

        // Read layout flags.
        let layout = Layout::from_bits_truncate(raf.read_u8_at(4, ReadHint::Header)?);
        let has_pawns = layout.contains(Layout::HAS_PAWNS);
        let split = layout.contains(Layout::SPLIT);

        // Check consistency of layout and material key.
        ensure!(has_pawns == material.has_pawns());
        ensure!(split != material.is_symmetric());

        // Read group data.
        let pp = material.white.has_pawns() && material.black.has_pawns();
        let num_files = if has_pawns { 4 } else { 1 };
        let num_sides = if T::METRIC == Metric::Wdl && !material.is_symmetric() {
            2
        } else {
            1
        };

        let mut groups: ArrayVec<ArrayVec<GroupData, 2>, 4> = ArrayVec::new();
        let mut ptr = 5;

        for file in 0..num_files {
            let mut sides = ArrayVec::new();

            let order_byte = raf.read_u8_at(ptr, ReadHint::Header)?;
            let pawn_order_byte = if pp {
                raf.read_u8_at(ptr + 1, ReadHint::Header)?
            } else {
                0xff
            };
            let order = [
                [order_byte & 0xf, if pp { pawn_order_byte & 0xf } else { 0xf }],
                [order_byte >> 4, if pp { pawn_order_byte >> 4 } else { 0xf }],
            ];

            ptr += 1 + u64::from(pp);

            for side in [Color::White, Color::Black].into_iter().take(num_sides) {
                let pieces = parse_pieces(&*raf, ptr, material.count(), side)?;
                let key = Material::from_iter(pieces.iter().copied());
                ensure!(key == material || key.flipped() == material);

                let group = GroupData::new::<S>(pieces, order[side.is_black() as usize], file)?;
                sides.push(group);
            }

            ptr += material.count() as u64;

            groups.push(sides);
        }

        ptr += ptr & 1;

        // Ensure reference pawn goes first.
        ensure!(!has_pawns || groups[0][0].pieces[0].role == Role::Pawn);

        let mut files: ArrayVec<FileData, 4> = ArrayVec::new();

        for file_groups in groups.into_iter() {
            let mut sides = ArrayVec::new();

            for group in file_groups.into_iter() {
                let (pairs, next_ptr) = PairsData::parse::<S, T>(&*raf, ptr, group)?;

                sides.push(pairs);
                ptr = next_ptr;
            }

            files.push(FileData { sides });
        }

        // Read DTZ map.
        if T::METRIC == Metric::Dtz {
            let map_ptr = ptr;

            for file in files.iter_mut() {
                if file.sides[0].flags.contains(Flag::MAPPED) {
                    let mut by_wdl = [0; 4];
                    if file.sides[0].flags.contains(Flag::WIDE_DTZ) {
                        ptr += ptr & 1;
                        for idx in by_wdl.iter_mut() {
                            *idx = u!(u16::try_from((ptr - map_ptr) / 2 + 1).ok());
                            ptr += u64::from(raf.read_u16_le_at(ptr, ReadHint::Header)?) * 2 + 2;
                        }
                        file.sides[0].dtz_map = Some(DtzMap::Wide { map_ptr, by_wdl });
                    } else {
                        for idx in by_wdl.iter_mut() {
                            *idx = u!(u16::try_from(ptr - map_ptr + 1).ok());
                            ptr += u64::from(raf.read_u8_at(ptr, ReadHint::Header)?) + 1;
                        }
                        file.sides[0].dtz_map = Some(DtzMap::Normal { map_ptr, by_wdl });
                    }
                }
            }

            ptr += ptr & 1;
        }

        // Assign sparse index offsets.
        for file in files.iter_mut() {
            for side in file.sides.iter_mut() {
                side.sparse_index = ptr;
                ptr += u64::from(side.sparse_index_size) * 6;
            }
        }

        // Assign block length offsets.
        for file in files.iter_mut() {
            for side in file.sides.iter_mut() {
                side.block_lengths = ptr;
                ptr += u64::from(side.block_length_size) * 2;
            }
        }

        // Assign 64 byte aligned compressed data offsets.
        for file in files.iter_mut() {
            for side in file.sides.iter_mut() {
                ptr = (ptr + 0x3f) & !0x3f;
                side.data = ptr;
                ptr = u!(ptr.checked_add(
                    u64::from(side.blocks_num) * u64::from(side.block_size)
                ));
            }
        }

        Ok(Table {
            is_wdl: PhantomData,
            syzygy: PhantomData,
            raf,
            num_unique_pieces: material.unique_pieces(),
            min_like_man: material.min_like_man(),
            files,
            material,
        })
    }

    /// Retrieves the value stored for `idx` by decompressing in blocks.
    fn decompress_pairs(&self, d: &PairsData, idx: u64) -> SyzygyResult<u16> {
        // Special case where all values are equal.
        if d.flags.contains(Flag::SINGLE_VALUE) {
            return Ok(u16::from(d.min_symlen));
        }

        // Use the sparse index to jump very close to the correct block.
        let k = idx / u64::from(d.span);

        let mut block = u64::from(
            self.raf
                .read_u32_le_at(d.sparse_index + 6 * k, ReadHint::SparseIndex)?,
        );
        let mut offset = i64::from(
            self.raf
                .read_u16_le_at(d.sparse_index + 6 * k + 4, ReadHint::SparseIndex)?,
        );

        let diff = idx as i64 % i64::from(d.span) - i64::from(d.span) / 2;
        offset += diff;

        // Now move forwards/backwards to find the correct block.
        while offset < 0 {
            block = u!(block.checked_sub(1));
            offset += i64::from(
                self.raf
                    .read_u16_le_at(d.block_lengths + block * 2, ReadHint::BlockLengths)?,
            ) + 1;
        }

        loop {
            let block_length = i64::from(
                self.raf
                    .read_u16_le_at(d.block_lengths + block * 2, ReadHint::BlockLengths)?,
            );
            if offset <= block_length {
                break;
            }
            offset -= block_length + 1;
            block += 1;
        }

        let mut ptr = d.data + block * u64::from(d.block_size);

        // Read the first 64 bits.
        let mut buf = self.raf.read_u64_be_at(ptr, ReadHint::Data)?;
        ptr += 8;
        let mut buf_size = 64u32;

        let mut sym;

        loop {
            let mut len = 0usize;

            // Find the length of the next symbol. For any symbol of length
            // l, right-padded to 64 bits, base[l - 1] >= sym64 >= base[l].
            while buf < *u!(d.base.get(len)) {
                len += 1;
            }

            // Symbols of a given length are numbered consecutively.
            sym = ((buf - d.base[len]) >> (64 - len as u32 - u32::from(d.min_symlen))) as u16;
            sym = u!(sym.checked_add(
                self.raf
                    .read_u16_le_at(d.lowest_sym + 2 * len as u64, ReadHint::Data)?
            ));

            // The position is inside the symbol if the remaining offset
            // is within the number of values the symbol expands to.
            if offset < i64::from(*u!(d.symlen.get(usize::from(sym)))) + 1 {
                break;
            }

            offset -= i64::from(d.symlen[usize::from(sym)]) + 1;
            let len = len as u32 + u32::from(d.min_symlen);
            buf <<= len;
            buf_size -= len;

            // Refill the buffer.
            if buf_size <= 32 {
                buf_size += 32;
                buf |= u64::from(self.raf.read_u32_be_at(ptr, ReadHint::Data)?) << (64 - buf_size);
                ptr += 4;
            }
        }

        // Expand the symbol via the Re-Pair grammar. Adjacent child symbols
        // cover adjacent ranges of values, so the descent is a binary
        // search. Leaves carry the stored value in their left slot.
        while *u!(d.symlen.get(usize::from(sym))) != 0 {
            let (left, right) = read_lr(&*self.raf, d.btree + 3 * u64::from(sym), ReadHint::Data)?;

            if offset < i64::from(*u!(d.symlen.get(usize::from(left)))) + 1 {
                sym = left;
            } else {
                offset -= i64::from(d.symlen[usize::from(left)]) + 1;
                sym = right;
            }
        }

        let (value, _) = read_lr(&*self.raf, d.btree + 3 * u64::from(sym), ReadHint::Data)?;
        Ok(value)
    }

    /// Given a position, produce an index into the table.
    ///
    /// Returns `None` if the selected DTZ subtable stores the other side to
    /// move, in which case the caller retries from the other side.
    fn encode(&self, pos: &S) -> SyzygyResult<Option<(&PairsData, u64)>> {
        let key = Material::from_board(pos.board());
        debug_assert!(key == self.material || key == self.material.flipped());

        let symmetric_btm = self.material.is_symmetric() && pos.turn().is_black();
        let black_stronger = key != self.material;
        let flip = symmetric_btm || black_stronger;
        let bside = pos.turn().is_black() ^ flip;

        let mut squares: ArrayVec<Square, MAX_PIECES> = ArrayVec::new();
        let mut used = Bitboard(0);

        // For pawns there are subtables for each file of the leading pawn.
        let file = if self.material.has_pawns() {
            let reference_pawn = self.files[0].sides[0].groups.pieces[0];
            ensure!(reference_pawn.role == Role::Pawn);
            let color = flip_if(flip, reference_pawn.color);

            let lead_pawns = pos.board().pawns() & pos.board().by_color(color);
            used = used | lead_pawns;
            squares.extend(lead_pawns.into_iter().map(|sq| {
                if flip {
                    sq.flip_vertical()
                } else {
                    sq
                }
            }));

            // Ensure squares[0] is the maximum with regard to map_pawns.
            for i in 1..squares.len() {
                if CONSTS.map_pawns[usize::from(squares[0])]
                    < CONSTS.map_pawns[usize::from(squares[i])]
                {
                    squares.swap(0, i);
                }
            }
            if squares[0].file() >= File::E {
                usize::from(squares[0].flip_horizontal().file())
            } else {
                usize::from(squares[0].file())
            }
        } else {
            0
        };

        // WDL tables have subtables for each side to move.
        let side = &self.files[file].sides[if bside {
            self.files[file].sides.len() - 1
        } else {
            0
        }];

        // DTZ tables store only one side to move. It is possible that we
        // need to check the other side instead (the one that would have
        // been stored if the tables were generated the other way around).
        if T::METRIC == Metric::Dtz
            && side.flags.contains(Flag::STM) != bside
            && (!self.material.is_symmetric() || self.material.has_pawns())
        {
            return Ok(None);
        }

        // The subtable has been determined.
        //
        // So far squares has been initialized with the leading pawns.
        // Also add the other pieces.
        let lead_pawns_count = squares.len();

        for piece in side.groups.pieces.iter().skip(lead_pawns_count) {
            let color = flip_if(flip, piece.color);
            let square = u!((pos.board().by_piece(piece.role.of(color)) & !used).first());
            squares.push(if flip { square.flip_vertical() } else { square });
            used = used | Bitboard::from(square);
        }

        debug_assert!(squares.len() >= 2);

        // Now we can compute the index according to the piece positions.
        if squares[0].file() >= File::E {
            for square in &mut squares {
                *square = square.flip_horizontal();
            }
        }

        let mut idx = if self.material.has_pawns() {
            let mut idx = CONSTS.lead_pawn_idx[lead_pawns_count][usize::from(squares[0])];

            squares[1..lead_pawns_count]
                .sort_unstable_by_key(|sq| CONSTS.map_pawns[usize::from(*sq)]);

            for (i, &square) in squares.iter().enumerate().take(lead_pawns_count).skip(1) {
                idx += binomial(CONSTS.map_pawns[usize::from(square)], i as u64);
            }

            idx
        } else {
            if squares[0].rank() >= Rank::Fifth {
                for square in &mut squares {
                    *square = square.flip_vertical();
                }
            }

            for i in 0..side.groups.lens[0] {
                if !offdiag(squares[i]) {
                    continue;
                }

                if rank_idx(squares[i]) > u64::from(u32::from(squares[i].file())) {
                    // A1-H8 diagonal flip: SQ_A3 -> SQ_C1
                    for square in &mut squares[i..] {
                        *square = square.flip_diagonal();
                    }
                }

                break;
            }

            if self.num_unique_pieces > 2 {
                let adjust1 = u64::from(squares[1] > squares[0]);
                let adjust2 =
                    u64::from(squares[2] > squares[0]) + u64::from(squares[2] > squares[1]);

                // MapA1D1D4[] maps the b1-d1-d3 triangle to 0..=5. There
                // are 63 squares for the second piece and 62 (mapped to
                // 0..=61) for the third.
                if offdiag(squares[0]) {
                    TRIANGLE[usize::from(squares[0])] * 63 * 62
                        + (u64::from(squares[1]) - adjust1) * 62
                        + (u64::from(squares[2]) - adjust2)
                } else if offdiag(squares[1]) {
                    6 * 63 * 62
                        + rank_idx(squares[0]) * 28 * 62
                        + LOWER[usize::from(squares[1])] * 62
                        + u64::from(squares[2])
                        - adjust2
                } else if offdiag(squares[2]) {
                    6 * 63 * 62
                        + 4 * 28 * 62
                        + rank_idx(squares[0]) * 7 * 28
                        + (rank_idx(squares[1]) - adjust1) * 28
                        + LOWER[usize::from(squares[2])]
                } else {
                    6 * 63 * 62
                        + 4 * 28 * 62
                        + 4 * 7 * 28
                        + rank_idx(squares[0]) * 7 * 6
                        + (rank_idx(squares[1]) - adjust1) * 6
                        + (rank_idx(squares[2]) - adjust2)
                }
            } else if self.num_unique_pieces == 2 {
                if S::CONNECTED_KINGS {
                    let adjust = u64::from(squares[1] > squares[0]);

                    if offdiag(squares[0]) {
                        TRIANGLE[usize::from(squares[0])] * 63 + (u64::from(squares[1]) - adjust)
                    } else if offdiag(squares[1]) {
                        6 * 63 + rank_idx(squares[0]) * 28 + LOWER[usize::from(squares[1])]
                    } else {
                        6 * 63
                            + 4 * 28
                            + rank_idx(squares[0]) * 7
                            + (rank_idx(squares[1]) - adjust)
                    }
                } else {
                    KK_IDX[TRIANGLE[usize::from(squares[0])] as usize][usize::from(squares[1])]
                }
            } else if self.min_like_man == 2 {
                if TRIANGLE[usize::from(squares[0])] > TRIANGLE[usize::from(squares[1])] {
                    squares.swap(0, 1);
                }

                if squares[0].file() >= File::E {
                    for square in &mut squares {
                        *square = square.flip_horizontal();
                    }
                }

                if squares[0].rank() >= Rank::Fifth {
                    for square in &mut squares {
                        *square = square.flip_vertical();
                    }
                }

                if rank_idx(squares[0]) > u64::from(u32::from(squares[0].file()))
                    || (!offdiag(squares[0])
                        && rank_idx(squares[1]) > u64::from(u32::from(squares[1].file())))
                {
                    for square in &mut squares {
                        *square = square.flip_diagonal();
                    }
                }

                if TEST45.contains(squares[1])
                    && TRIANGLE[usize::from(squares[0])] == TRIANGLE[usize::from(squares[1])]
                {
                    squares.swap(0, 1);
                    for square in &mut squares {
                        *square = square.flip_horizontal();
                    }
                }

                PP_IDX[TRIANGLE[usize::from(squares[0])] as usize][usize::from(squares[1])]
            } else {
                for i in 1..side.groups.lens[0] {
                    if TRIANGLE[usize::from(squares[0])] > TRIANGLE[usize::from(squares[i])] {
                        squares.swap(0, i);
                    }
                }

                if squares[0].file() >= File::E {
                    for square in &mut squares {
                        *square = square.flip_horizontal();
                    }
                }

                if squares[0].rank() >= Rank::Fifth {
                    for square in &mut squares {
                        *square = square.flip_vertical();
                    }
                }

                if rank_idx(squares[0]) > u64::from(u32::from(squares[0].file())) {
                    for square in &mut squares {
                        *square = square.flip_diagonal();
                    }
                }

                for i in 1..side.groups.lens[0] {
                    for j in (i + 1)..side.groups.lens[0] {
                        if MULT_TWIST[usize::from(squares[i])]
                            > MULT_TWIST[usize::from(squares[j])]
                        {
                            squares.swap(i, j);
                        }
                    }
                }

                let mut idx =
                    CONSTS.mult_idx[side.groups.lens[0] - 1][TRIANGLE[usize::from(squares[0])] as usize];
                for i in 1..side.groups.lens[0] {
                    idx += binomial(MULT_TWIST[usize::from(squares[i])], i as u64);
                }

                idx
            }
        };

        idx *= side.groups.factors[0];

        // Encode the remaining pawns and pieces.
        let mut remaining_pawns =
            self.material.white.has_pawns() && self.material.black.has_pawns();
        let mut next = 1;
        let mut group_sq = side.groups.lens[0];
        for lens in side.groups.lens.iter().copied().skip(1) {
            let (prev_squares, group_squares) = squares.split_at_mut(group_sq);
            let group_squares = &mut group_squares[..lens];
            group_squares.sort_unstable();

            let mut n = 0;

            for (i, &group_square) in group_squares.iter().enumerate() {
                let adjust = prev_squares
                    .iter()
                    .filter(|sq| group_square > **sq)
                    .count() as u64;
                n += binomial(
                    u64::from(group_square) - adjust - if remaining_pawns { 8 } else { 0 },
                    i as u64 + 1,
                );
            }

            remaining_pawns = false;
            idx += n * side.groups.factors[next];
            group_sq += side.groups.lens[next];
            next += 1;
        }

        Ok(Some((side, idx)))
    }

    /// Probes a WDL table.
    pub fn probe_wdl_table(&self, pos: &S) -> SyzygyResult<Wdl> {
        debug_assert!(T::METRIC == Metric::Wdl);

        // WDL tables always have an entry for both sides to move.
        let (side, idx) = u!(self.encode(pos)?);

        let decompressed = self.decompress_pairs(side, idx)?;

        Ok(match decompressed {
            0 => Wdl::Loss,
            1 => Wdl::BlessedLoss,
            2 => Wdl::Draw,
            3 => Wdl::CursedWin,
            4 => Wdl::Win,
            _ => throw!(),
        })
    }

    /// Probes a DTZ table.
    ///
    /// Returns `None` if the table stores the other side to move, in which
    /// case the caller does a 1-ply search over the position instead.
    pub fn probe_dtz_table(&self, pos: &S, wdl: Wdl) -> SyzygyResult<Option<Dtz>> {
        debug_assert!(T::METRIC == Metric::Dtz);

        let (side, idx) = match self.encode(pos)? {
            Some(found) => found,
            None => return Ok(None), // check other side
        };

        let res = self.decompress_pairs(side, idx)?;

        // Values are remapped by frequency of occurrence.
        let res = match side.dtz_map {
            None => res,
            Some(ref map) => map.read(&*self.raf, wdl, res)?,
        };

        // Convert from stored full moves to plies where required.
        let stores_plies = match wdl {
            Wdl::Win => side.flags.contains(Flag::WIN_PLIES),
            Wdl::Loss => side.flags.contains(Flag::LOSS_PLIES),
            Wdl::CursedWin | Wdl::BlessedLoss => false,
            Wdl::Draw => true, // unreachable
        };

        Ok(Some(Dtz(
            i32::from(res) * if stores_plies { 1 } else { 2 },
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use shakmaty::Chess;

    use super::*;

    struct MemFile(Vec<u8>);

    impl RandomAccessFile for MemFile {
        fn read_at(&self, buf: &mut [u8], offset: u64, _hint: ReadHint) -> io::Result<usize> {
            let offset = offset as usize;
            if offset >= self.0.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.0.len() - offset);
            buf[..n].copy_from_slice(&self.0[offset..offset + n]);
            Ok(n)
        }
    }

    fn piece(color: Color, role: Role) -> Piece {
        role.of(color)
    }

    #[test]
    fn test_consts() {
        // The leading pawn on a2 leaves the most squares for the others.
        assert_eq!(CONSTS.map_pawns[usize::from(Square::A2)], 47);
        assert_eq!(CONSTS.map_pawns[usize::from(Square::H2)], 46);

        // A single leading pawn has 6 configurations per file.
        for file in 0..4 {
            assert_eq!(CONSTS.lead_pawns_size[1][file], 6);
        }

        // Each of the 10 triangle entries contributes one multiset start.
        assert_eq!(CONSTS.mult_factor[0], 10);
    }

    #[test]
    fn test_triangle_inverse() {
        for (value, &sq) in INV_TRIANGLE.iter().enumerate() {
            assert_eq!(TRIANGLE[sq], value as u64);
        }
    }

    #[test]
    fn test_kk_idx_range() {
        let max = KK_IDX
            .iter()
            .flatten()
            .filter(|&&v| v != Z0)
            .max()
            .copied();
        assert_eq!(max, Some(461));
    }

    #[test]
    fn test_group_pieces() {
        let krvk: Pieces = [
            piece(Color::White, Role::King),
            piece(Color::White, Role::Rook),
            piece(Color::Black, Role::King),
        ]
        .into_iter()
        .collect();
        assert_eq!(group_pieces(&krvk).as_slice(), &[3]);

        let knnvk: Pieces = [
            piece(Color::White, Role::King),
            piece(Color::Black, Role::King),
            piece(Color::White, Role::Knight),
            piece(Color::White, Role::Knight),
        ]
        .into_iter()
        .collect();
        assert_eq!(group_pieces(&knnvk).as_slice(), &[2, 2]);

        let kpvk: Pieces = [
            piece(Color::White, Role::Pawn),
            piece(Color::White, Role::King),
            piece(Color::Black, Role::King),
        ]
        .into_iter()
        .collect();
        assert_eq!(group_pieces(&kpvk).as_slice(), &[1, 1, 1]);
    }

    #[test]
    fn test_decompress_two_symbol_stream() {
        // A table with two Huffman symbols, both of length 1: symbol 0 is
        // the value 5, symbol 1 is the value 7. The stream 0x55.. encodes
        // the values 5 and 7 alternating.
        let mut data = vec![0; 96];
        // lowest_sym at 0: lowest symbol of length 1 is symbol 0.
        data[0] = 0;
        data[1] = 0;
        // btree at 8: two leaves.
        data[8..11].copy_from_slice(&[0x05, 0xf0, 0xff]);
        data[11..14].copy_from_slice(&[0x07, 0xf0, 0xff]);
        // sparse index at 16: all entries point into block 0.
        for k in 0..4u64 {
            let entry = 16 + 6 * k as usize;
            data[entry..entry + 4].copy_from_slice(&0u32.to_le_bytes());
            data[entry + 4..entry + 6].copy_from_slice(&((k as u16) * 4 + 2).to_le_bytes());
        }
        // block lengths at 40: a single block of 16 values.
        data[40..42].copy_from_slice(&15u16.to_le_bytes());
        // compressed data at 64.
        for byte in &mut data[64..96] {
            *byte = 0x55;
        }

        let pieces: Pieces = [
            piece(Color::White, Role::Queen),
            piece(Color::White, Role::King),
            piece(Color::Black, Role::King),
        ]
        .into_iter()
        .collect();
        let groups = GroupData::new::<Chess>(pieces, [0, 0xf], 0).expect("groups");

        let table: Table<WdlTag, Chess> = Table {
            is_wdl: PhantomData,
            syzygy: PhantomData,
            raf: Box::new(MemFile(data)),
            material: "KQvK".parse().expect("valid material"),
            num_unique_pieces: 3,
            min_like_man: 0,
            files: ArrayVec::new(),
        };

        let d = PairsData {
            flags: Flag::empty(),
            groups,
            block_size: 32,
            span: 4,
            blocks_num: 1,
            btree: 8,
            min_symlen: 1,
            lowest_sym: 0,
            base: vec![0],
            symlen: vec![0, 0],
            sparse_index: 16,
            sparse_index_size: 4,
            block_lengths: 40,
            block_length_size: 1,
            data: 64,
            dtz_map: None,
        };

        for idx in 0..16 {
            let expected = if idx % 2 == 0 { 5 } else { 7 };
            assert_eq!(table.decompress_pairs(&d, idx).expect("decompress"), expected);
        }
    }
}
