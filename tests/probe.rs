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

//! Probes over hand-assembled table files, served from memory.
//!
//! Real table files are far too big to ship with the tests, so these
//! tables are assembled byte by byte following the file format. Their
//! values are synthetic: every `KQvK.rtbw` position is stored as a win
//! for white, every `KRvK.rtbw` position as a draw, and so on. The
//! assertions below check the probing machinery against those stored
//! values, not against real endgame theory.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess};
use tbprobe::filesystem::{Filesystem, RandomAccessFile, ReadHint};
use tbprobe::{Dtz, ProbeState, SyzygyError, Tablebase, Wdl, VALUE_MATE};

const WDL_MAGIC: [u8; 4] = [0x71, 0xe8, 0x23, 0x5d];
const DTZ_MAGIC: [u8; 4] = [0xd7, 0x66, 0x0c, 0xa5];

/// Piece nibbles for both sides of a pawnless 3 piece table: the strong
/// piece, the strong king and the weak king.
const KQVK_PIECES: [u8; 3] = [0xd5, 0xe6, 0x6e];
const KRVK_PIECES: [u8; 3] = [0xc4, 0xe6, 0x6e];
/// Piece nibbles for `KPvK`: the pawn goes first.
const KPVK_PIECES: [u8; 3] = [0x91, 0xe6, 0x6e];

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

#[derive(Default)]
struct MemFilesystem {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemFilesystem {
    fn new() -> MemFilesystem {
        MemFilesystem::default()
    }

    fn put(&mut self, path: &str, bytes: Vec<u8>) {
        self.files.insert(PathBuf::from(path), bytes);
    }
}

impl Filesystem for MemFilesystem {
    fn regular_file_size(&self, path: &Path) -> io::Result<u64> {
        self.files
            .get(path)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| io::ErrorKind::NotFound.into())
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn RandomAccessFile>> {
        self.files
            .get(path)
            .map(|bytes| Box::new(MemFile(bytes.clone())) as Box<dyn RandomAccessFile>)
            .ok_or_else(|| io::ErrorKind::NotFound.into())
    }
}

/// The length of a valid table file is 16 modulo 64.
fn pad(bytes: &mut Vec<u8>) {
    while bytes.len() % 64 != 16 {
        bytes.push(0);
    }
}

/// A pawnless WDL table storing a single value per side to move.
fn single_value_wdl(pieces: [u8; 3], stm_value: u8, other_value: u8) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&WDL_MAGIC);
    bytes.push(0x01); // split, no pawns
    bytes.push(0x00); // order
    bytes.extend_from_slice(&pieces);
    bytes.push(0); // padding to 2 bytes
    bytes.extend_from_slice(&[0x80, stm_value]);
    bytes.extend_from_slice(&[0x80, other_value]);
    pad(&mut bytes);
    bytes
}

/// A pawnless DTZ table storing a single value for white to move.
fn single_value_dtz(pieces: [u8; 3]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&DTZ_MAGIC);
    bytes.push(0x01);
    bytes.push(0x00);
    bytes.extend_from_slice(&pieces);
    bytes.push(0);
    bytes.extend_from_slice(&[0x80, 0]);
    pad(&mut bytes);
    bytes
}

/// A WDL table for `KPvK` with a single value per side to move, repeated
/// for all four leading pawn files.
fn single_value_pawn_wdl(stm_value: u8, other_value: u8) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&WDL_MAGIC);
    bytes.push(0x03); // split, has pawns
    for _ in 0..4 {
        bytes.push(0x00);
        bytes.extend_from_slice(&KPVK_PIECES);
    }
    bytes.push(0); // padding to 2 bytes
    for _ in 0..4 {
        bytes.extend_from_slice(&[0x80, stm_value]);
        bytes.extend_from_slice(&[0x80, other_value]);
    }
    pad(&mut bytes);
    bytes
}

/// A DTZ table for `KPvK` with a single value for white to move.
fn single_value_pawn_dtz() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&DTZ_MAGIC);
    bytes.push(0x03);
    for _ in 0..4 {
        bytes.push(0x00);
        bytes.extend_from_slice(&KPVK_PIECES);
    }
    bytes.push(0);
    for _ in 0..4 {
        bytes.extend_from_slice(&[0x80, 0]);
    }
    pad(&mut bytes);
    bytes
}

/// A pawnless WDL table with an actual compressed stream for white to
/// move. The canonical Huffman code has two symbols, both 1 bit long.
/// Symbol 0 is a leaf with value 2 (a draw), symbol 1 a leaf with value
/// `4`. The stream is all zero bits, so every position decodes to a draw.
fn compressed_draw_wdl(pieces: [u8; 3]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&WDL_MAGIC);
    bytes.push(0x01);
    bytes.push(0x00);
    bytes.extend_from_slice(&pieces);
    bytes.push(0);

    // White to move: compressed.
    debug_assert!(bytes.len() == 10);
    bytes.push(0x00); // flags
    bytes.push(5); // block size 32
    bytes.push(15); // span 32768, so a single sparse index entry
    bytes.push(0); // no padding blocks
    bytes.extend_from_slice(&1u32.to_le_bytes()); // 1 block
    bytes.push(1); // max_sym_len
    bytes.push(1); // min_sym_len
    bytes.extend_from_slice(&0u16.to_le_bytes()); // lowest symbol of length 1
    bytes.extend_from_slice(&2u16.to_le_bytes()); // 2 symbols
    bytes.extend_from_slice(&[0x02, 0xf0, 0xff]); // symbol 0: value 2
    bytes.extend_from_slice(&[0x04, 0xf0, 0xff]); // symbol 1: value 4

    // Black to move: a single draw value.
    bytes.extend_from_slice(&[0x80, 2]);

    // Sparse index for white to move.
    debug_assert!(bytes.len() == 32);
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&16384u16.to_le_bytes()); // span / 2

    // Block lengths for white to move.
    bytes.extend_from_slice(&31331u16.to_le_bytes());

    // Compressed data, 64 byte aligned.
    bytes.resize(64, 0);
    bytes.resize(96, 0); // 32 bytes of zero bits

    pad(&mut bytes);
    bytes
}

/// A pawnless DTZ table for white to move with a 16-bit value map. The
/// compressed stream is all zero bits, so every position decodes to the
/// raw value 0, which each of the four per-WDL maps translates to a
/// different stored distance.
fn wide_dtz(pieces: [u8; 3]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&DTZ_MAGIC);
    bytes.push(0x01);
    bytes.push(0x00);
    bytes.extend_from_slice(&pieces);
    bytes.push(0);

    debug_assert!(bytes.len() == 10);
    bytes.push(0x12); // flags: mapped, wide
    bytes.push(5); // block size 32
    bytes.push(15); // span 32768
    bytes.push(0); // no padding blocks
    bytes.extend_from_slice(&1u32.to_le_bytes()); // 1 block
    bytes.push(1); // max_sym_len
    bytes.push(1); // min_sym_len
    bytes.extend_from_slice(&0u16.to_le_bytes()); // lowest symbol of length 1
    bytes.extend_from_slice(&2u16.to_le_bytes()); // 2 symbols
    bytes.extend_from_slice(&[0x00, 0xf0, 0xff]); // symbol 0: value 0
    bytes.extend_from_slice(&[0x00, 0xf0, 0xff]); // symbol 1: value 0

    // The value maps, in the order win, loss, cursed win, blessed loss.
    // Each one byte of length, then that many 16-bit entries.
    debug_assert!(bytes.len() == 30);
    for value in [77u16, 66, 55, 44] {
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    // Sparse index.
    debug_assert!(bytes.len() == 46);
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&16384u16.to_le_bytes());

    // Block lengths.
    bytes.extend_from_slice(&31331u16.to_le_bytes());

    // Compressed data, 64 byte aligned.
    bytes.resize(64, 0);
    bytes.resize(96, 0);

    pad(&mut bytes);
    bytes
}

fn garbage_magic() -> Vec<u8> {
    let mut bytes = vec![0xde, 0xad, 0xbe, 0xef];
    pad(&mut bytes);
    bytes
}

fn truncated_file() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&WDL_MAGIC);
    bytes.resize(81, 0); // 81 % 64 != 16
    bytes
}

fn tables() -> Tablebase<Chess> {
    let mut fs = MemFilesystem::new();
    fs.put("syzygy/KQvK.rtbw", single_value_wdl(KQVK_PIECES, 4, 0));
    fs.put("syzygy/KQvK.rtbz", single_value_dtz(KQVK_PIECES));
    fs.put("syzygy/KRvK.rtbw", compressed_draw_wdl(KRVK_PIECES));
    fs.put("syzygy/KPvK.rtbw", single_value_pawn_wdl(4, 0));
    fs.put("syzygy/KPvK.rtbz", single_value_pawn_dtz());
    fs.put("syzygy/KNvK.rtbw", garbage_magic());
    fs.put("syzygy/KBvK.rtbw", truncated_file());

    let mut tables = Tablebase::with_filesystem(Arc::new(fs));
    tables.set_paths("syzygy");
    tables
}

fn pos(fen: &str) -> Chess {
    fen.parse::<Fen>()
        .expect("valid fen")
        .into_position(CastlingMode::Standard)
        .expect("legal position")
}

#[test]
fn test_max_cardinality() {
    let tables = tables();
    assert_eq!(tables.max_cardinality(), 3);
}

#[test]
fn test_single_value_wdl() {
    let tables = tables();

    let (wdl, state) = tables
        .probe_wdl(&pos("7k/8/8/8/8/8/8/KQ6 w - - 0 1"))
        .expect("wdl");
    assert_eq!(wdl, Wdl::Win);
    assert_eq!(state, ProbeState::Normal);

    let (wdl, _) = tables
        .probe_wdl(&pos("7k/8/8/8/8/8/8/KQ6 b - - 0 1"))
        .expect("wdl");
    assert_eq!(wdl, Wdl::Loss);
}

#[test]
fn test_single_value_dtz() {
    let tables = tables();

    // White to move matches the stored side: straight table probe.
    assert_eq!(
        tables.probe_dtz(&pos("7k/8/8/8/8/8/8/KQ6 w - - 0 1")).expect("dtz"),
        Dtz(1)
    );

    // Black to move requires the 1-ply search over the stored side.
    assert_eq!(
        tables.probe_dtz(&pos("7k/8/8/8/8/8/8/KQ6 b - - 0 1")).expect("dtz"),
        Dtz(-2)
    );
}

#[test]
fn test_compressed_stream() {
    let tables = tables();

    // Decodes the Huffman stream of the white to move subtable.
    let (wdl, _) = tables
        .probe_wdl(&pos("7k/8/8/8/8/8/8/KR6 w - - 0 1"))
        .expect("wdl");
    assert_eq!(wdl, Wdl::Draw);

    let (wdl, _) = tables
        .probe_wdl(&pos("7k/8/8/8/8/8/8/KR6 b - - 0 1"))
        .expect("wdl");
    assert_eq!(wdl, Wdl::Draw);

    // Draws never probe the DTZ table.
    assert_eq!(
        tables.probe_dtz(&pos("7k/8/8/8/8/8/8/KR6 w - - 0 1")).expect("dtz"),
        Dtz(0)
    );
}

#[test]
fn test_pawn_table() {
    let tables = tables();

    // KPvK with the stronger side to move.
    let (wdl, _) = tables
        .probe_wdl(&pos("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"))
        .expect("wdl");
    assert_eq!(wdl, Wdl::Win);

    // KvKP: the same table probed from the mirrored side.
    let (wdl, _) = tables
        .probe_wdl(&pos("8/8/8/8/4k3/4p3/8/4K3 w - - 0 1"))
        .expect("wdl");
    assert_eq!(wdl, Wdl::Loss);
}

#[test]
fn test_pawn_dtz_zeroing_best_move() {
    let tables = tables();

    // A pawn push keeps the win, so the DTZ value is determined without
    // probing the DTZ table at all.
    assert_eq!(
        tables
            .probe_dtz(&pos("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"))
            .expect("dtz"),
        Dtz(1)
    );
}

#[test]
fn test_mirror_opposite_sign() {
    let tables = tables();

    // Swapping piece colors and flipping ranks while keeping the side to
    // move hands the move to the defending side: the same table entry is
    // reached from the other orientation and the WDL value changes sign.
    let (wdl, _) = tables
        .probe_wdl(&pos("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"))
        .expect("wdl");
    let (mirrored, _) = tables
        .probe_wdl(&pos("4k3/4p3/8/8/8/8/8/4K3 w - - 0 1"))
        .expect("wdl");
    assert_eq!(wdl, Wdl::Win);
    assert_eq!(mirrored, -wdl);

    // DTZ changes sign as well. The defender to move is one ply away from
    // the position where the attacker zeroes, so against the stored win
    // in 1 the defender is lost with dtz -2.
    let dtz = tables
        .probe_dtz(&pos("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"))
        .expect("dtz");
    let mirrored = tables
        .probe_dtz(&pos("4k3/4p3/8/8/8/8/8/4K3 w - - 0 1"))
        .expect("dtz");
    assert_eq!(dtz, Dtz(1));
    assert_eq!(mirrored, Dtz(-2));
    assert_eq!(i32::from(mirrored).signum(), -i32::from(dtz).signum());
}

#[test]
fn test_color_relabeling() {
    let tables = tables();

    // Relabeling the colors, flipping the ranks and also giving the move
    // to the other player describes the same game: the side to move
    // relative values are unchanged.
    let (wdl, _) = tables
        .probe_wdl(&pos("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"))
        .expect("wdl");
    let (relabeled, _) = tables
        .probe_wdl(&pos("4k3/4p3/8/8/8/8/8/4K3 b - - 0 1"))
        .expect("wdl");
    assert_eq!(wdl, relabeled);
    assert_eq!(wdl, Wdl::Win);

    let dtz = tables
        .probe_dtz(&pos("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"))
        .expect("dtz");
    let relabeled = tables
        .probe_dtz(&pos("4k3/4p3/8/8/8/8/8/4K3 b - - 0 1"))
        .expect("dtz");
    assert_eq!(dtz, relabeled);
}

#[test]
fn test_wide_dtz_map() {
    let mut fs = MemFilesystem::new();
    fs.put("syzygy/KQvK.rtbw", single_value_wdl(KQVK_PIECES, 4, 0));
    fs.put("syzygy/KQvK.rtbz", wide_dtz(KQVK_PIECES));

    let mut tables = Tablebase::<Chess>::with_filesystem(Arc::new(fs));
    tables.set_paths("syzygy");

    // The raw value 0 goes through the 16-bit win map (77), is doubled
    // because the table stores full moves, and offset by the ply before
    // the zeroing move.
    assert_eq!(
        tables.probe_dtz(&pos("7k/8/8/8/8/8/8/KQ6 w - - 0 1")).expect("dtz"),
        Dtz(1 + 2 * 77)
    );
}

#[test]
fn test_corrupted_tables_are_treated_as_missing() {
    let tables = tables();

    // Bad magic bytes.
    assert!(matches!(
        tables.probe_wdl(&pos("7k/8/8/8/8/8/8/KN6 w - - 0 1")),
        Err(SyzygyError::MissingTable { .. })
    ));

    // Bad file size.
    assert!(matches!(
        tables.probe_wdl(&pos("7k/8/8/8/8/8/8/KB6 w - - 0 1")),
        Err(SyzygyError::MissingTable { .. })
    ));
}

#[test]
fn test_missing_material() {
    let tables = tables();

    // No table was registered for KQQvK.
    assert!(matches!(
        tables.probe_wdl(&pos("7k/8/8/8/8/8/8/KQQ5 w - - 0 1")),
        Err(SyzygyError::MissingTable { .. })
    ));
}

#[test]
fn test_root_probe() {
    let tables = tables();

    let root = pos("7k/8/8/8/8/8/8/KQ6 w - - 0 1");
    let mut root_moves = Tablebase::root_moves(&root);
    assert!(!root_moves.is_empty());

    tables
        .root_probe(&root, true, false, &mut root_moves)
        .expect("root probe");

    // Every white move preserves the stored win.
    for rm in &root_moves {
        assert_eq!(rm.tb_rank, 1000);
        assert_eq!(rm.tb_score, VALUE_MATE - 128 - 1);
    }
}

#[test]
fn test_root_probe_wdl() {
    let tables = tables();

    let root = pos("7k/8/8/8/8/8/8/KQ6 w - - 0 1");
    let mut root_moves = Tablebase::root_moves(&root);

    tables
        .root_probe_wdl(&root, true, &mut root_moves)
        .expect("root probe wdl");

    for rm in &root_moves {
        assert_eq!(rm.tb_rank, 1000);
        assert_eq!(rm.tb_score, VALUE_MATE - 128 - 1);
    }
}

#[test]
fn test_multiple_directories() {
    let mut fs = MemFilesystem::new();
    fs.put("first/KQvK.rtbw", single_value_wdl(KQVK_PIECES, 4, 0));
    fs.put("second/KRvK.rtbw", compressed_draw_wdl(KRVK_PIECES));

    let mut tables = Tablebase::<Chess>::with_filesystem(Arc::new(fs));
    tables.set_paths("first:second");

    assert!(tables.probe_wdl(&pos("7k/8/8/8/8/8/8/KQ6 w - - 0 1")).is_ok());
    assert!(tables.probe_wdl(&pos("7k/8/8/8/8/8/8/KR6 w - - 0 1")).is_ok());
}

#[test]
fn test_disabled() {
    let mut fs = MemFilesystem::new();
    fs.put("syzygy/KQvK.rtbw", single_value_wdl(KQVK_PIECES, 4, 0));

    let mut tables = Tablebase::<Chess>::with_filesystem(Arc::new(fs));
    tables.set_paths("<empty>");

    assert_eq!(tables.max_cardinality(), 0);
    assert!(matches!(
        tables.probe_wdl(&pos("7k/8/8/8/8/8/8/KQ6 w - - 0 1")),
        Err(SyzygyError::MissingTable { .. })
    ));
}
