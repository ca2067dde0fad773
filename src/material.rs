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
use std::iter::FromIterator;
use std::str::FromStr;

use shakmaty::{Board, Color, Piece, Role};

/// The piece roles in the order used for table names: `KQvKR`, not `KRvKQ`.
pub(crate) const ROLES: [Role; 6] = [
    Role::King,
    Role::Queen,
    Role::Rook,
    Role::Bishop,
    Role::Knight,
    Role::Pawn,
];

/// Error when parsing a material key from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMaterialError;

impl fmt::Display for ParseMaterialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid material key")
    }
}

impl std::error::Error for ParseMaterialError {}

/// The material configuration of one side.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct MaterialSide {
    pub pawns: u8,
    pub knights: u8,
    pub bishops: u8,
    pub rooks: u8,
    pub queens: u8,
    pub kings: u8,
}

impl MaterialSide {
    pub fn new() -> MaterialSide {
        MaterialSide::default()
    }

    pub fn by_role(&self, role: Role) -> u8 {
        match role {
            Role::Pawn => self.pawns,
            Role::Knight => self.knights,
            Role::Bishop => self.bishops,
            Role::Rook => self.rooks,
            Role::Queen => self.queens,
            Role::King => self.kings,
        }
    }

    pub fn by_role_mut(&mut self, role: Role) -> &mut u8 {
        match role {
            Role::Pawn => &mut self.pawns,
            Role::Knight => &mut self.knights,
            Role::Bishop => &mut self.bishops,
            Role::Rook => &mut self.rooks,
            Role::Queen => &mut self.queens,
            Role::King => &mut self.kings,
        }
    }

    pub fn count(&self) -> usize {
        ROLES.iter().map(|&r| usize::from(self.by_role(r))).sum()
    }

    pub fn has_pawns(&self) -> bool {
        self.pawns > 0
    }

    pub(crate) fn unique_roles(&self) -> u8 {
        ROLES.iter().map(|&r| self.by_role(r)).filter(|&c| c == 1).count() as u8
    }
}

impl fmt::Display for MaterialSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &role in &ROLES {
            for _ in 0..self.by_role(role) {
                write!(f, "{}", role.upper_char())?;
            }
        }
        Ok(())
    }
}

impl FromStr for MaterialSide {
    type Err = ParseMaterialError;

    fn from_str(s: &str) -> Result<MaterialSide, ParseMaterialError> {
        let mut result = MaterialSide::new();
        for ch in s.chars() {
            let role = Role::from_char(ch.to_ascii_lowercase()).ok_or(ParseMaterialError)?;
            *result.by_role_mut(role) += 1;
        }
        Ok(result)
    }
}

impl Extend<Role> for MaterialSide {
    fn extend<T: IntoIterator<Item = Role>>(&mut self, iter: T) {
        for role in iter {
            *self.by_role_mut(role) += 1;
        }
    }
}

impl FromIterator<Role> for MaterialSide {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> MaterialSide {
        let mut result = MaterialSide::new();
        result.extend(iter);
        result
    }
}

/// The material configuration of both sides, identifying a table.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct Material {
    pub white: MaterialSide,
    pub black: MaterialSide,
}

impl Material {
    pub fn new() -> Material {
        Material::default()
    }

    pub fn from_board(board: &Board) -> Material {
        let mut material = Material::new();
        for color in [Color::White, Color::Black] {
            let side = material.by_color_mut(color);
            for &role in &ROLES {
                *side.by_role_mut(role) = board.by_piece(role.of(color)).count() as u8;
            }
        }
        material
    }

    pub fn by_color(&self, color: Color) -> &MaterialSide {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    pub fn by_color_mut(&mut self, color: Color) -> &mut MaterialSide {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    pub fn by_piece(&self, piece: Piece) -> u8 {
        self.by_color(piece.color).by_role(piece.role)
    }

    pub fn by_piece_mut(&mut self, piece: Piece) -> &mut u8 {
        self.by_color_mut(piece.color).by_role_mut(piece.role)
    }

    pub fn count(&self) -> usize {
        self.white.count() + self.black.count()
    }

    pub fn has_pawns(&self) -> bool {
        self.white.has_pawns() || self.black.has_pawns()
    }

    /// Swaps the material of both sides.
    pub fn flipped(&self) -> Material {
        Material {
            white: self.black.clone(),
            black: self.white.clone(),
        }
    }

    /// Puts the side with more material first, the canonical orientation
    /// for table names.
    pub fn normalized(&self) -> Material {
        let key = |side: &MaterialSide| {
            (side.count(), ROLES.map(|r| side.by_role(r)))
        };
        if key(&self.white) >= key(&self.black) {
            self.clone()
        } else {
            self.flipped()
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.white == self.black
    }

    pub(crate) fn unique_pieces(&self) -> u8 {
        self.white.unique_roles() + self.black.unique_roles()
    }

    pub(crate) fn min_like_man(&self) -> u8 {
        ROLES
            .iter()
            .map(|&r| self.white.by_role(r))
            .chain(ROLES.iter().map(|&r| self.black.by_role(r)))
            .filter(|&c| 2 <= c)
            .min()
            .unwrap_or(0)
    }

    /// A 64-bit fingerprint of the piece counts. Mirrored material has a
    /// different key unless the material is symmetric.
    pub fn key(&self) -> u64 {
        let counts = [
            self.white.pawns,
            self.white.knights,
            self.white.bishops,
            self.white.rooks,
            self.white.queens,
            self.white.kings,
            self.black.pawns,
            self.black.knights,
            self.black.bishops,
            self.black.rooks,
            self.black.queens,
            self.black.kings,
        ];
        fxhash::hash64(&counts)
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.white, self.black)
    }
}

impl FromStr for Material {
    type Err = ParseMaterialError;

    fn from_str(s: &str) -> Result<Material, ParseMaterialError> {
        let (white, black) = s.split_once('v').ok_or(ParseMaterialError)?;
        Ok(Material {
            white: white.parse()?,
            black: black.parse()?,
        })
    }
}

impl Extend<Piece> for Material {
    fn extend<T: IntoIterator<Item = Piece>>(&mut self, iter: T) {
        for piece in iter {
            *self.by_piece_mut(piece) += 1;
        }
    }
}

impl FromIterator<Piece> for Material {
    fn from_iter<T: IntoIterator<Item = Piece>>(iter: T) -> Material {
        let mut result = Material::new();
        result.extend(iter);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let material: Material = "KQvKR".parse().expect("valid material");
        assert_eq!(material.white.queens, 1);
        assert_eq!(material.black.rooks, 1);
        assert_eq!(material.count(), 4);
        assert_eq!(material.to_string(), "KQvKR");
    }

    #[test]
    fn test_key_symmetry() {
        let krvkr: Material = "KRvKR".parse().expect("valid material");
        assert!(krvkr.is_symmetric());
        assert_eq!(krvkr.key(), krvkr.flipped().key());

        let krvk: Material = "KRvK".parse().expect("valid material");
        assert!(!krvk.is_symmetric());
        assert_ne!(krvk.key(), krvk.flipped().key());
        assert_eq!(krvk.key(), krvk.flipped().flipped().key());
    }

    #[test]
    fn test_normalized() {
        let kvkq: Material = "KvKQ".parse().expect("valid material");
        assert_eq!(kvkq.normalized().to_string(), "KQvK");
    }

    #[test]
    fn test_shape_facts() {
        let material: Material = "KRRvKN".parse().expect("valid material");
        assert_eq!(material.unique_pieces(), 3);
        assert_eq!(material.min_like_man(), 2);
        assert!(!material.has_pawns());
    }
}
