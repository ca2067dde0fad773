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

use std::cmp::max;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use shakmaty::{Position, Role};

use crate::errors::{SyzygyError, SyzygyResult};
use crate::filesystem::Filesystem;
#[cfg(any(unix, windows))]
use crate::filesystem::OsFilesystem;
use crate::lazy::Lazy;
use crate::material::Material;
use crate::table::{DtzTag, Table, WdlTag};
use crate::types::{
    Dtz, ProbeState, RootMove, Syzygy, Wdl, MAX_MATE_PLY, MAX_PIECES, PAWN_VALUE_EG, VALUE_DRAW,
    VALUE_MATE,
};

fn rotate_role(role: Role) -> Role {
    match role {
        Role::Pawn => Role::Knight,
        Role::Knight => Role::Bishop,
        Role::Bishop => Role::Rook,
        Role::Rook => Role::Queen,
        Role::Queen => Role::King,
        Role::King => Role::Pawn,
    }
}

struct RoleRange {
    from: Role,
    to: Role,
}

impl RoleRange {
    fn excl(from: Role, to: Role) -> RoleRange {
        RoleRange { from, to }
    }

    fn incl(from: Role, to: Role) -> RoleRange {
        RoleRange {
            from,
            to: rotate_role(to),
        }
    }
}

impl Iterator for RoleRange {
    type Item = Role;

    fn next(&mut self) -> Option<Role> {
        if self.from != self.to {
            let from = self.from;
            self.from = rotate_role(from);
            Some(from)
        } else {
            None
        }
    }
}

/// Number of buckets of the registry hash. The signature enumeration
/// inserts at most two keys per table, so 4096 buckets leave ample slack
/// for 6-piece tables.
const HASH_SIZE: usize = 1 << 12;

/// Fixed capacity hash from material keys to slot indices, resolving
/// collisions with Robin Hood displacement.
#[derive(Debug, Clone)]
struct TableHash {
    // One extra never-occupied bucket so that lookups always terminate.
    buckets: Vec<Option<(u64, u32)>>,
}

impl TableHash {
    fn new() -> TableHash {
        TableHash {
            buckets: vec![None; HASH_SIZE + 1],
        }
    }

    fn insert(&mut self, mut key: u64, mut slot: u32) {
        let mut home = key as usize & (HASH_SIZE - 1);

        for bucket in home..HASH_SIZE {
            match self.buckets[bucket] {
                None => {
                    self.buckets[bucket] = Some((key, slot));
                    return;
                }
                Some((other_key, other_slot)) => {
                    if other_key == key {
                        self.buckets[bucket] = Some((key, slot));
                        return;
                    }

                    // Robin Hood hashing: if the resident entry is closer
                    // to its home bucket than we are to ours, it moves out
                    // and continues the search for a new spot.
                    let other_home = other_key as usize & (HASH_SIZE - 1);
                    if other_home > home {
                        self.buckets[bucket] = Some((key, slot));
                        key = other_key;
                        slot = other_slot;
                        home = other_home;
                    }
                }
            }
        }

        panic!("tablebase registry hash is full");
    }

    fn get(&self, key: u64) -> Option<u32> {
        let mut bucket = key as usize & (HASH_SIZE - 1);
        loop {
            match self.buckets[bucket] {
                None => return None,
                Some((other_key, slot)) => {
                    if other_key == key {
                        return Some(slot);
                    }
                }
            }
            bucket += 1;
        }
    }
}

/// The lazily initialized tables for one material configuration.
struct TableSlot<S: Position + Clone + Syzygy> {
    material: Material,
    wdl: (PathBuf, Lazy<Option<Table<WdlTag, S>>>),
    dtz: Option<(PathBuf, Lazy<Option<Table<DtzTag, S>>>)>,
}

/// A collection of tables.
///
/// Initialized with a list of directories to search. Table files are
/// located at startup, but only opened and memory mapped (or read,
/// depending on the [`Filesystem`] implementation) on first probe.
pub struct Tablebase<S: Position + Clone + Syzygy> {
    filesystem: Arc<dyn Filesystem>,
    slots: Vec<TableSlot<S>>,
    hash: TableHash,
    max_cardinality: usize,
}

impl<S: Position + Clone + Syzygy> fmt::Debug for Tablebase<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tablebase")
            .field("tables", &self.slots.len())
            .field("max_cardinality", &self.max_cardinality)
            .finish_non_exhaustive()
    }
}

#[cfg(any(unix, windows))]
impl<S: Position + Clone + Syzygy> Default for Tablebase<S> {
    fn default() -> Tablebase<S> {
        Tablebase::new()
    }
}

impl<S: Position + Clone + Syzygy> Tablebase<S> {
    /// Creates an empty collection of tables using the default filesystem
    /// implementation.
    #[cfg(any(unix, windows))]
    pub fn new() -> Tablebase<S> {
        Tablebase::with_filesystem(Arc::new(OsFilesystem::new()))
    }

    /// Creates an empty collection of tables with a custom filesystem
    /// implementation.
    pub fn with_filesystem(filesystem: Arc<dyn Filesystem>) -> Tablebase<S> {
        Tablebase {
            filesystem,
            slots: Vec::new(),
            hash: TableHash::new(),
            max_cardinality: 0,
        }
    }

    /// The maximum piece count over all added tables, at most
    /// [`MAX_PIECES`](crate::MAX_PIECES).
    pub fn max_cardinality(&self) -> usize {
        self.max_cardinality
    }

    /// Clears the registry, then enumerates all relevant material
    /// configurations and registers the table files found in the given
    /// list of directories.
    ///
    /// Directories are separated by `;` on Windows and by `:` on other
    /// platforms. The first directory containing a file wins. An empty
    /// string or the special value `<empty>` disables tablebases.
    ///
    /// Files are located eagerly, but not yet opened. Probing is not
    /// affected by directory contents changing later on.
    pub fn set_paths(&mut self, paths: &str) {
        use Role::*;

        self.slots.clear();
        self.hash = TableHash::new();
        self.max_cardinality = 0;

        if paths.is_empty() || paths == "<empty>" {
            return;
        }

        let separator = if cfg!(windows) { ';' } else { ':' };
        let dirs: Vec<PathBuf> = paths
            .split(separator)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .collect();

        if S::ONE_KING {
            for a in RoleRange::excl(Pawn, King) {
                self.add_both(&dirs, &[King, a], &[King]);

                for b in RoleRange::incl(Pawn, a) {
                    self.add_both(&dirs, &[King, a, b], &[King]);
                    self.add_both(&dirs, &[King, a], &[King, b]);

                    for c in RoleRange::excl(Pawn, King) {
                        self.add_both(&dirs, &[King, a, b], &[King, c]);
                    }

                    for c in RoleRange::incl(Pawn, b) {
                        self.add_both(&dirs, &[King, a, b, c], &[King]);

                        for d in RoleRange::incl(Pawn, c) {
                            self.add_both(&dirs, &[King, a, b, c, d], &[King]);
                        }

                        for d in RoleRange::excl(Pawn, King) {
                            self.add_both(&dirs, &[King, a, b, c], &[King, d]);
                        }
                    }

                    for c in RoleRange::incl(Pawn, a) {
                        for d in RoleRange::incl(Pawn, if a == c { b } else { c }) {
                            self.add_both(&dirs, &[King, a, b], &[King, c, d]);
                        }
                    }
                }
            }
        } else {
            for a in RoleRange::incl(Pawn, King) {
                for b in RoleRange::incl(Pawn, a) {
                    self.add_both(&dirs, &[a], &[b]);

                    for c in RoleRange::incl(Pawn, King) {
                        self.add_both(&dirs, &[a, b], &[c]);
                    }

                    for c in RoleRange::incl(Pawn, b) {
                        for d in RoleRange::incl(Pawn, King) {
                            self.add_both(&dirs, &[a, b, c], &[d]);

                            for e in RoleRange::incl(Pawn, d) {
                                self.add_both(&dirs, &[a, b, c], &[d, e]);
                            }
                        }

                        for d in RoleRange::incl(Pawn, c) {
                            for e in RoleRange::incl(Pawn, King) {
                                self.add_both(&dirs, &[a, b, c, d], &[e]);

                                for f in RoleRange::incl(Pawn, e) {
                                    self.add_both(&dirs, &[a, b, c, d], &[e, f]);
                                }
                            }

                            for e in RoleRange::incl(Pawn, d) {
                                for f in RoleRange::incl(Pawn, King) {
                                    self.add_both(&dirs, &[a, b, c, d, e], &[f]);
                                }
                            }
                        }

                        for d in RoleRange::incl(Pawn, a) {
                            for e in RoleRange::incl(Pawn, if a == d { b } else { d }) {
                                for f in
                                    RoleRange::incl(Pawn, if a == d && b == e { c } else { e })
                                {
                                    self.add_both(&dirs, &[a, b, c], &[d, e, f]);
                                }
                            }
                        }
                    }

                    for c in RoleRange::incl(Pawn, a) {
                        for d in RoleRange::incl(Pawn, if a == c { b } else { c }) {
                            self.add_both(&dirs, &[a, b], &[c, d]);
                        }
                    }
                }
            }
        }

        info!(
            "found {} wdl and {} dtz tablebase files",
            self.slots.len(),
            self.slots.iter().filter(|slot| slot.dtz.is_some()).count()
        );
    }

    fn find_file(&self, dirs: &[PathBuf], name: &str, ext: &str) -> Option<PathBuf> {
        for dir in dirs {
            let path = dir.join(format!("{}.{}", name, ext));
            if self.filesystem.regular_file_size(&path).is_ok() {
                return Some(path);
            }
        }
        None
    }

    fn add_both(&mut self, dirs: &[PathBuf], white: &[Role], black: &[Role]) {
        let material = Material {
            white: white.iter().copied().collect(),
            black: black.iter().copied().collect(),
        };
        let name = material.to_string();

        // Only the WDL file is required.
        let wdl_path = match self.find_file(dirs, &name, S::TBW_EXTENSION) {
            Some(path) => path,
            None => return,
        };
        let dtz_path = self.find_file(dirs, &name, S::TBZ_EXTENSION);

        self.max_cardinality = max(self.max_cardinality, material.count());

        let key = material.key();
        let mirrored_key = material.flipped().key();
        let slot = self.slots.len() as u32;

        self.slots.push(TableSlot {
            material,
            wdl: (wdl_path, Lazy::new()),
            dtz: dtz_path.map(|path| (path, Lazy::new())),
        });

        self.hash.insert(key, slot);
        if key != mirrored_key {
            self.hash.insert(mirrored_key, slot);
        }
    }

    fn probe_wdl_table(&self, pos: &S) -> SyzygyResult<Wdl> {
        // Variant game end.
        if let Some(outcome) = pos.variant_outcome() {
            return Ok(Wdl::from_outcome(outcome, pos.turn()));
        }

        // Test for KvK.
        if S::ONE_KING && pos.board().kings() == pos.board().occupied() {
            return Ok(Wdl::Draw);
        }

        // Probe table.
        let material = Material::from_board(pos.board());
        let slot = match self.hash.get(material.key()) {
            Some(slot) => &self.slots[slot as usize],
            None => {
                return Err(SyzygyError::MissingTable {
                    material: material.normalized(),
                })
            }
        };

        let (path, table) = &slot.wdl;
        let table = table.get_or_init(|| -> SyzygyResult<_> {
            Ok(match Table::open(&*self.filesystem, path, &slot.material) {
                Ok(table) => Some(table),
                Err(error) => {
                    warn!("failed to open table {}: {}", path.display(), error);
                    None
                }
            })
        })?;

        match table {
            Some(table) => table.probe_wdl_table(pos),
            None => Err(SyzygyError::MissingTable {
                material: material.normalized(),
            }),
        }
    }

    fn probe_dtz_table(&self, pos: &S, wdl: Wdl) -> SyzygyResult<Option<Dtz>> {
        let material = Material::from_board(pos.board());
        let slot = match self.hash.get(material.key()) {
            Some(slot) => &self.slots[slot as usize],
            None => {
                return Err(SyzygyError::MissingTable {
                    material: material.normalized(),
                })
            }
        };

        let (path, table) = match slot.dtz {
            Some(ref dtz) => dtz,
            None => {
                return Err(SyzygyError::MissingTable {
                    material: material.normalized(),
                })
            }
        };

        let table = table.get_or_init(|| -> SyzygyResult<_> {
            Ok(match Table::open(&*self.filesystem, path, &slot.material) {
                Ok(table) => Some(table),
                Err(error) => {
                    warn!("failed to open table {}: {}", path.display(), error);
                    None
                }
            })
        })?;

        match table {
            Some(table) => table.probe_dtz_table(pos, wdl),
            None => Err(SyzygyError::MissingTable {
                material: material.normalized(),
            }),
        }
    }

    /// Probes tables for the WDL value of a position.
    ///
    /// Tables do not store a win for positions where the side to move has
    /// a winning capture, and generally store whatever compresses better
    /// for positions where captures allow reaching a result at least as
    /// good as the stored one. The probe therefore searches captures
    /// (resp. all zeroing moves for DTZ purposes) 1 ply deep and combines
    /// the best capture value with the table value.
    ///
    /// The returned [`ProbeState`] is [`ProbeState::ZeroingBestMove`] if
    /// the best move is a capture (or would reset the 50-move counter).
    ///
    /// # Errors
    ///
    /// See [`SyzygyError`] for possible error conditions. A failed probe
    /// means tablebase guidance is not available for this position.
    pub fn probe_wdl(&self, pos: &S) -> SyzygyResult<(Wdl, ProbeState)> {
        if pos.board().occupied().count() > MAX_PIECES {
            return Err(SyzygyError::TooManyPieces);
        }
        if pos.castles().any() {
            return Err(SyzygyError::Castling);
        }

        self.probe_wdl_search(pos, false)
    }

    /// The 1-ply search over captures, and over pawn moves as well when
    /// `check_zeroing` is set.
    fn probe_wdl_search(&self, pos: &S, check_zeroing: bool) -> SyzygyResult<(Wdl, ProbeState)> {
        if S::CAPTURES_COMPULSORY {
            if let Some(outcome) = pos.variant_outcome() {
                return Ok((
                    Wdl::from_outcome(outcome, pos.turn()),
                    ProbeState::ZeroingBestMove,
                ));
            }

            return self.probe_compulsory_captures(pos, Wdl::Loss, Wdl::Win, check_zeroing);
        }

        let moves = pos.legal_moves();
        let total_count = moves.len();
        let mut move_count = 0;

        let mut best = Wdl::Loss;

        for m in &moves {
            if !m.is_capture() && (!check_zeroing || m.role() != Role::Pawn) {
                continue;
            }

            move_count += 1;

            let mut after = pos.clone();
            after.play_unchecked(m);

            let (v, _) = self.probe_wdl_search(&after, false)?;
            let v = -v;

            if v > best {
                best = v;

                if v == Wdl::Win {
                    return Ok((v, ProbeState::ZeroingBestMove));
                }
            }
        }

        // If all legal moves have been searched, the table must not be
        // probed: its value may be a "don't care" (and for positions with
        // en passant rights it does not reflect the ep move at all).
        let no_more_moves = move_count > 0 && move_count == total_count;

        let v = if no_more_moves {
            best
        } else {
            self.probe_wdl_table(pos)?
        };

        if best >= v {
            Ok((
                best,
                if best > Wdl::Draw || no_more_moves {
                    ProbeState::ZeroingBestMove
                } else {
                    ProbeState::Normal
                },
            ))
        } else {
            Ok((v, ProbeState::Normal))
        }
    }

    fn probe_compulsory_captures(
        &self,
        pos: &S,
        mut alpha: Wdl,
        beta: Wdl,
        threats: bool,
    ) -> SyzygyResult<(Wdl, ProbeState)> {
        // Explore compulsory captures first.
        if pos.them().count() > 1 {
            if let Some(v) = self.probe_captures(pos, alpha, beta)? {
                return Ok((v, ProbeState::ZeroingBestMove));
            }
        } else {
            // The opponent only has one piece left. If we need to capture
            // it the game ends immediately.
            if !pos.capture_moves().is_empty() {
                return Ok((Wdl::Loss, ProbeState::ZeroingBestMove));
            }
        }

        let mut threats_found = false;

        // For big endgames (or if indicated by the threats flag) also
        // explore threat moves that will force a capture on the following
        // move.
        if threats || pos.board().occupied().count() >= 6 {
            for threat in pos.legal_moves() {
                if threat.role() != Role::Pawn {
                    let mut after = pos.clone();
                    after.play_unchecked(&threat);

                    if let Some(v_plus) = self.probe_captures(&after, -beta, -alpha)? {
                        let v = -v_plus;

                        if v > alpha {
                            threats_found = true;
                            alpha = v;
                            if alpha >= beta {
                                return Ok((v, ProbeState::Threat));
                            }
                        }
                    }
                }
            }
        }

        let v = self.probe_wdl_table(pos)?;

        if v > alpha {
            Ok((v, ProbeState::Normal))
        } else {
            Ok((
                alpha,
                if threats_found {
                    ProbeState::Threat
                } else {
                    ProbeState::Normal
                },
            ))
        }
    }

    fn probe_captures(&self, pos: &S, mut alpha: Wdl, beta: Wdl) -> SyzygyResult<Option<Wdl>> {
        // Explore capture moves. If captures exist they are the only
        // moves, because captures are compulsory.
        let captures = pos.capture_moves();

        if captures.is_empty() {
            return Ok(None);
        }

        for m in &captures {
            let mut after = pos.clone();
            after.play_unchecked(m);

            let (v_plus, _) = self.probe_compulsory_captures(&after, -beta, -alpha, false)?;
            let v = -v_plus;

            if v > alpha {
                alpha = v;
                if alpha >= beta {
                    break;
                }
            }
        }

        Ok(Some(alpha))
    }

    /// Probes tables for the DTZ value of a position.
    ///
    /// Min-maxing the DTZ of the available moves guarantees achieving the
    /// optimal outcome under the 50-move rule.
    ///
    /// # Errors
    ///
    /// See [`SyzygyError`] for possible error conditions, in particular a
    /// missing DTZ table.
    pub fn probe_dtz(&self, pos: &S) -> SyzygyResult<Dtz> {
        if pos.board().occupied().count() > MAX_PIECES {
            return Err(SyzygyError::TooManyPieces);
        }
        if pos.castles().any() {
            return Err(SyzygyError::Castling);
        }

        self.probe_dtz_inner(pos)
    }

    fn probe_dtz_inner(&self, pos: &S) -> SyzygyResult<Dtz> {
        let (wdl, state) = self.probe_wdl_search(pos, true)?;

        // DTZ tables do not store draws.
        if wdl == Wdl::Draw {
            return Ok(Dtz(0));
        }

        // DTZ stores a "don't care" value if the best move is zeroing.
        if state == ProbeState::ZeroingBestMove || pos.us() == pos.our(Role::Pawn) {
            return Ok(Dtz::before_zeroing(wdl));
        }

        // The position is a win or a cursed win by a threat move.
        if state == ProbeState::Threat && wdl > Wdl::Draw {
            return Ok(Dtz(if wdl == Wdl::Win { 2 } else { 102 }));
        }

        if let Some(dtz) = self.probe_dtz_table(pos, wdl)? {
            return Ok(Dtz::before_zeroing(wdl).add_plies(i32::from(dtz)));
        }

        // The table stores results for the other side to move, so a 1-ply
        // search is needed: find the move that minimizes DTZ while
        // preserving the WDL outcome.
        let mut min_dtz: Option<Dtz> = None;

        for m in pos.legal_moves() {
            let zeroing = m.is_zeroing();

            let mut after = pos.clone();
            after.play_unchecked(&m);

            // For zeroing moves the DTZ of the position before the move is
            // determined by the WDL value of the position after it.
            let mut v = if zeroing {
                -Dtz::before_zeroing(self.probe_wdl_search(&after, false)?.0)
            } else {
                -self.probe_dtz_inner(&after)?
            };

            // If the move mates, use DTZ 1.
            if v == Dtz(1) && after.is_checkmate() {
                min_dtz = Some(Dtz(1));
            }

            // Convert results from the 1-ply search. Zeroing moves are
            // already accounted for by the before-zeroing value.
            if !zeroing {
                v = v.add_plies(1);
            }

            // Skip draws, and in winning positions only pick positive DTZ.
            if v.signum() == wdl.signum() && min_dtz.map_or(true, |best| v < best) {
                min_dtz = Some(v);
            }
        }

        // When there are no legal moves, the position is mated.
        Ok(min_dtz.unwrap_or(Dtz(-1)))
    }

    /// Probes and ranks every move of `root_moves` with DTZ tables.
    ///
    /// Ranks are assigned so that the search can rely on the highest
    /// ranked moves to preserve the game theoretical outcome under the
    /// 50-move rule. `has_repeated` should be set if a position has
    /// repeated since the last zeroing move; winning moves are then ranked
    /// strictly by DTZ.
    ///
    /// # Errors
    ///
    /// Errors when any single probe fails. Ranks and scores are left in an
    /// unspecified state in that case; the caller falls back to
    /// [`root_probe_wdl`](Tablebase::root_probe_wdl) or to a regular
    /// search.
    pub fn root_probe(
        &self,
        pos: &S,
        use_rule50: bool,
        has_repeated: bool,
        root_moves: &mut [RootMove],
    ) -> SyzygyResult<()> {
        // Obtain the 50-move counter for the root position.
        let cnt50 = pos.halfmoves() as i32;

        // The border between draw and win lies at rank 1 or rank 900,
        // depending on whether the 50-move rule is used.
        let bound = if use_rule50 { 900 } else { 1 };

        // Probe, rank and score each move.
        for rm in root_moves.iter_mut() {
            let mut after = pos.clone();
            after.play_unchecked(&rm.mv);

            // DTZ for the current move, counting from the root position.
            let mut dtz = if after.halfmoves() == 0 {
                // A zeroing move gives dtz of -101/-1/0/1/101.
                let (v, _) = self.probe_wdl(&after)?;
                Dtz::before_zeroing(-v)
            } else {
                // Otherwise take dtz of the position after the move and
                // correct by 1 ply.
                self.probe_dtz(&after).map(|v| (-v).add_plies(1))?
            };

            // Make sure that a mating move gets rank 1000.
            if dtz == Dtz(2) && after.is_checkmate() {
                dtz = Dtz(1);
            }

            // Better moves are ranked higher. Certain wins are ranked
            // equally. Losing moves are ranked equally unless a 50-move
            // draw is in sight.
            let dtz = i32::from(dtz);
            let r = if dtz > 0 {
                if dtz + cnt50 <= 99 && !has_repeated {
                    1000
                } else {
                    1000 - (dtz + cnt50)
                }
            } else if dtz < 0 {
                if -dtz * 2 + cnt50 < 100 {
                    -1000
                } else {
                    -1000 + (-dtz + cnt50)
                }
            } else {
                0
            };
            rm.tb_rank = r;

            // The score displayed for the move. Cursed wins get at least
            // 1 cp, growing to 49 cp as the position gets closer to a
            // real win.
            rm.tb_score = if r >= bound {
                VALUE_MATE - MAX_MATE_PLY - 1
            } else if r > 0 {
                max(3, r - 800) * PAWN_VALUE_EG / 200
            } else if r == 0 {
                VALUE_DRAW
            } else if r > -bound {
                std::cmp::min(-3, r + 800) * PAWN_VALUE_EG / 200
            } else {
                -VALUE_MATE + MAX_MATE_PLY + 1
            };
        }

        Ok(())
    }

    /// Probes and ranks every move of `root_moves` with WDL tables.
    ///
    /// This is a fallback for the case that some or all DTZ tables are
    /// missing.
    ///
    /// # Errors
    ///
    /// Errors when any single probe fails. Ranks and scores are left in an
    /// unspecified state in that case.
    pub fn root_probe_wdl(
        &self,
        pos: &S,
        use_rule50: bool,
        root_moves: &mut [RootMove],
    ) -> SyzygyResult<()> {
        const WDL_TO_RANK: [i32; 5] = [-1000, -899, 0, 899, 1000];
        const WDL_TO_VALUE: [i32; 5] = [
            -VALUE_MATE + MAX_MATE_PLY + 1,
            VALUE_DRAW - 2,
            VALUE_DRAW,
            VALUE_DRAW + 2,
            VALUE_MATE - MAX_MATE_PLY - 1,
        ];

        // Probe, rank and score each move.
        for rm in root_moves.iter_mut() {
            let mut after = pos.clone();
            after.play_unchecked(&rm.mv);

            let (v, _) = self.probe_wdl(&after)?;
            let mut wdl = -v;

            rm.tb_rank = WDL_TO_RANK[(i32::from(wdl) + 2) as usize];

            if !use_rule50 {
                wdl = match wdl {
                    w if w > Wdl::Draw => Wdl::Win,
                    w if w < Wdl::Draw => Wdl::Loss,
                    _ => Wdl::Draw,
                };
            }
            rm.tb_score = WDL_TO_VALUE[(i32::from(wdl) + 2) as usize];
        }

        Ok(())
    }

    /// Builds annotated root moves for all legal moves of a position.
    pub fn root_moves(pos: &S) -> Vec<RootMove> {
        pos.legal_moves().into_iter().map(RootMove::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::Path;

    use shakmaty::fen::Fen;
    use shakmaty::variant::Antichess;
    use shakmaty::{CastlingMode, Chess};

    use super::*;
    use crate::filesystem::{RandomAccessFile, ReadHint};

    // A compulsory capture variant for exercising the threat probes. No
    // table files are shipped for it, but the probes below resolve by
    // search and game end alone.
    impl Syzygy for Antichess {
        const TBW_EXTENSION: &'static str = "gtbw";
        const TBZ_EXTENSION: &'static str = "gtbz";

        const WDL_MAGIC: [u8; 4] = [0xbc, 0x55, 0xbc, 0x21];
        const DTZ_MAGIC: [u8; 4] = [0xd6, 0xf5, 0x1b, 0x50];

        const ONE_KING: bool = false;
        const CONNECTED_KINGS: bool = true;
        const CAPTURES_COMPULSORY: bool = true;
    }

    fn pos(fen: &str) -> Chess {
        let fen: Fen = fen.parse().expect("valid fen");
        fen.into_position(CastlingMode::Standard).expect("legal position")
    }

    fn antichess_pos(fen: &str) -> Antichess {
        let fen: Fen = fen.parse().expect("valid fen");
        fen.into_position(CastlingMode::Standard).expect("legal position")
    }

    #[test]
    fn test_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Tablebase<Chess>>();
        assert_sync::<Tablebase<Chess>>();
    }

    #[test]
    fn test_hash_insert_get() {
        let mut hash = TableHash::new();
        for i in 0..1000u64 {
            // Adjacent keys all map to distinct home buckets, displaced
            // keys must still be found.
            hash.insert(i.wrapping_mul(0x9e37_79b9_7f4a_7c15), i as u32);
        }
        for i in 0..1000u64 {
            assert_eq!(hash.get(i.wrapping_mul(0x9e37_79b9_7f4a_7c15)), Some(i as u32));
        }
        assert_eq!(hash.get(12345), None);
    }

    #[test]
    fn test_hash_colliding_home_buckets() {
        let mut hash = TableHash::new();
        // All keys share the same home bucket.
        for i in 0..32u64 {
            hash.insert(7 + (i << 12), i as u32);
        }
        for i in 0..32u64 {
            assert_eq!(hash.get(7 + (i << 12)), Some(i as u32));
        }
    }

    struct NoFilesystem;

    impl Filesystem for NoFilesystem {
        fn regular_file_size(&self, _path: &Path) -> io::Result<u64> {
            Err(io::ErrorKind::NotFound.into())
        }

        fn open(&self, _path: &Path) -> io::Result<Box<dyn RandomAccessFile>> {
            Err(io::ErrorKind::NotFound.into())
        }
    }

    #[test]
    fn test_kvk_draw_without_tables() {
        let tables = Tablebase::<Chess>::with_filesystem(Arc::new(NoFilesystem));

        let kvk = pos("8/8/4k3/8/4K3/8/8/8 w - - 0 1");
        let (wdl, state) = tables.probe_wdl(&kvk).expect("kvk probe");
        assert_eq!(wdl, Wdl::Draw);
        assert_eq!(state, ProbeState::Normal);
        assert_eq!(tables.probe_dtz(&kvk).expect("kvk dtz"), Dtz(0));
    }

    #[test]
    fn test_missing_table() {
        let mut tables = Tablebase::<Chess>::with_filesystem(Arc::new(NoFilesystem));
        tables.set_paths("anywhere");
        assert_eq!(tables.max_cardinality(), 0);

        let krvk = pos("4k3/8/8/8/8/8/8/R3K3 w - - 0 1");
        match tables.probe_wdl(&krvk) {
            Err(SyzygyError::MissingTable { material }) => {
                assert_eq!(material.to_string(), "KRvK");
            }
            v => panic!("unexpected result: {:?}", v.map(|(wdl, _)| wdl)),
        }
    }

    #[test]
    fn test_too_many_pieces_and_castling() {
        let tables = Tablebase::<Chess>::with_filesystem(Arc::new(NoFilesystem));

        let start = Chess::default();
        assert!(matches!(
            tables.probe_wdl(&start),
            Err(SyzygyError::TooManyPieces)
        ));

        let castling = pos("4k3/8/8/8/8/8/8/R3K3 w Q - 0 1");
        assert!(matches!(
            tables.probe_wdl(&castling),
            Err(SyzygyError::Castling)
        ));
    }

    #[test]
    fn test_compulsory_capture_of_last_piece() {
        let tables = Tablebase::<Antichess>::with_filesystem(Arc::new(NoFilesystem));

        // The opponent has a single piece left and we can capture it,
        // which ends the game immediately in the opponent's favor.
        let pos = antichess_pos("8/8/8/8/n7/8/8/R7 w - - 0 1");
        let (wdl, state) = tables.probe_wdl(&pos).expect("probe");
        assert_eq!(wdl, Wdl::Loss);
        assert_eq!(state, ProbeState::ZeroingBestMove);
    }

    #[test]
    fn test_compulsory_captures_variant_end() {
        let tables = Tablebase::<Antichess>::with_filesystem(Arc::new(NoFilesystem));

        // The side to move is stalemated and therefore wins.
        let pos = antichess_pos("8/8/8/8/8/p7/P7/8 w - - 0 1");
        let (wdl, state) = tables.probe_wdl(&pos).expect("probe");
        assert_eq!(wdl, Wdl::Win);
        assert_eq!(state, ProbeState::ZeroingBestMove);
    }

    #[test]
    fn test_threat_move() {
        let tables = Tablebase::<Antichess>::with_filesystem(Arc::new(NoFilesystem));

        // White has no capture, but moving the knight to a square
        // defended by the b4 pawn forces a capture that strips white of
        // its last piece and wins.
        let pos = antichess_pos("8/7p/8/8/1p6/8/8/1N6 w - - 0 1");

        let (wdl, state) = tables.probe_wdl_search(&pos, true).expect("probe");
        assert_eq!(wdl, Wdl::Win);
        assert_eq!(state, ProbeState::Threat);

        // A win by a threat move takes two plies to the zeroing capture.
        assert_eq!(tables.probe_dtz(&pos).expect("dtz"), Dtz(2));
    }

    #[test]
    fn test_rank_boundaries() {
        // Property of the ranking formula: a win closer to the 50-move
        // horizon ranks below a certain win.
        let cnt50 = 0;
        let rank = |dtz: i32| -> i32 {
            if dtz > 0 {
                if dtz + cnt50 <= 99 {
                    1000
                } else {
                    1000 - (dtz + cnt50)
                }
            } else if dtz < 0 {
                if -dtz * 2 + cnt50 < 100 {
                    -1000
                } else {
                    -1000 + (-dtz + cnt50)
                }
            } else {
                0
            }
        };

        assert_eq!(rank(1), 1000);
        assert_eq!(rank(99), 1000);
        assert_eq!(rank(100), 900);
        assert!(rank(100) < rank(99));
        assert!(rank(101) < rank(100));
        assert_eq!(rank(-1), -1000);
        assert!(rank(-60) > rank(-49));
        assert_eq!(rank(0), 0);
    }
}
