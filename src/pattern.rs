//! Fingerprint patterns and the filters they compile to.
//!
//! A pattern is 40 symbols, one per fingerprint nibble:
//! - `0`-`9`, `A`-`F`: the nibble must equal that digit
//! - `*`: any nibble
//! - any other symbol (conventionally `X`): a linked wildcard. Every position
//!   carrying the same symbol must decode to the same nibble, whatever it is.
//!
//! Whitespace is ignored and matching is case-insensitive.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// Number of nibbles in a SHA-1 fingerprint.
pub const PATTERN_LEN: usize = 40;

/// Nibbles per digest word.
const NIBBLES_PER_WORD: usize = 8;

/// The five 32-bit words of a SHA-1 digest.
pub type Digest = [u32; 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symbol {
    Fixed(u8),
    Free,
    Linked(char),
}

/// A parsed fingerprint pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    symbols: Vec<Symbol>,
}

impl Pattern {
    /// Parses a pattern, ignoring whitespace.
    pub fn parse(input: &str) -> Result<Self> {
        let symbols: Vec<Symbol> = input
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| {
                let c = c.to_ascii_uppercase();
                match c {
                    '*' => Symbol::Free,
                    _ => match c.to_digit(16) {
                        Some(d) => Symbol::Fixed(d as u8),
                        None => Symbol::Linked(c),
                    },
                }
            })
            .collect();

        if symbols.len() != PATTERN_LEN {
            return Err(Error::InvalidPattern {
                reason: format!(
                    "expected {} symbols, got {}",
                    PATTERN_LEN,
                    symbols.len()
                ),
            });
        }

        Ok(Self { symbols })
    }

    /// Positions of each linked wildcard group, ordered by first occurrence.
    fn linked_groups(&self) -> Vec<Vec<usize>> {
        let mut groups: FxHashMap<char, Vec<usize>> = FxHashMap::default();
        for (pos, symbol) in self.symbols.iter().enumerate() {
            if let Symbol::Linked(c) = symbol {
                groups.entry(*c).or_default().push(pos);
            }
        }
        let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
        groups.sort_unstable_by_key(|positions| positions[0]);
        groups
    }

    /// Compiles the pattern into a filter over the digest words.
    pub fn compile(&self) -> Filter {
        let mut constraints = Vec::new();

        for (word, group) in self.symbols.chunks(NIBBLES_PER_WORD).enumerate() {
            let mut mask = 0u32;
            let mut value = 0u32;
            let mut activated = false;
            for symbol in group {
                mask <<= 4;
                value <<= 4;
                if let Symbol::Fixed(d) = symbol {
                    mask |= 0xF;
                    value |= u32::from(*d);
                    activated = true;
                }
            }
            if activated {
                constraints.push(Constraint::Masked { word, mask, value });
            }
        }

        for positions in self.linked_groups() {
            for pair in positions.windows(2) {
                constraints.push(Constraint::linked(pair[0], pair[1]));
            }
        }

        Filter { constraints }
    }

    /// Difficulty in bits: every fixed nibble and every extra member of a
    /// linked group costs four.
    pub fn difficulty_bits(&self) -> u32 {
        let fixed = self
            .symbols
            .iter()
            .filter(|s| matches!(s, Symbol::Fixed(_)))
            .count();
        let linked: usize = self.linked_groups().iter().map(|g| g.len() - 1).sum();
        4 * (fixed + linked) as u32
    }

    /// Expected number of hashes before a match.
    pub fn expected_hashes(&self) -> f64 {
        2f64.powi(self.difficulty_bits() as i32)
    }

    /// Checks a 40-digit hex fingerprint against the pattern directly.
    pub fn matches_fingerprint(&self, fingerprint: &str) -> bool {
        let nibbles: Vec<u32> = fingerprint
            .chars()
            .filter(|c| !c.is_whitespace())
            .filter_map(|c| c.to_digit(16))
            .collect();
        if nibbles.len() != PATTERN_LEN {
            return false;
        }

        let mut linked: FxHashMap<char, u32> = FxHashMap::default();
        self.symbols
            .iter()
            .zip(nibbles)
            .all(|(symbol, nibble)| match symbol {
                Symbol::Fixed(d) => u32::from(*d) == nibble,
                Symbol::Free => true,
                Symbol::Linked(c) => *linked.entry(*c).or_insert(nibble) == nibble,
            })
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw: String = self
            .symbols
            .iter()
            .map(|s| match s {
                Symbol::Fixed(d) => char::from_digit(u32::from(*d), 16)
                    .unwrap_or('?')
                    .to_ascii_uppercase(),
                Symbol::Free => '*',
                Symbol::Linked(c) => *c,
            })
            .collect();
        f.write_str(&format_fingerprint(&raw))
    }
}

/// One clause of a compiled filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// `(h[word] & mask) == value`
    Masked { word: usize, mask: u32, value: u32 },
    /// `(shift(h[left]) & mask) == (h[right] & mask)`, where a positive shift
    /// moves left and a negative one moves right.
    Linked {
        left: usize,
        right: usize,
        shift: i32,
        mask: u32,
    },
}

impl Constraint {
    fn linked(left_pos: usize, right_pos: usize) -> Self {
        // Nibble index counted from the least significant end of the word.
        let left_digit = (NIBBLES_PER_WORD - 1 - left_pos % NIBBLES_PER_WORD) as i32;
        let right_digit = (NIBBLES_PER_WORD - 1 - right_pos % NIBBLES_PER_WORD) as i32;
        Constraint::Linked {
            left: left_pos / NIBBLES_PER_WORD,
            right: right_pos / NIBBLES_PER_WORD,
            shift: (right_digit - left_digit) * 4,
            mask: 0xF << (right_digit * 4),
        }
    }

    #[inline(always)]
    pub fn accepts(&self, h: &Digest) -> bool {
        match *self {
            Constraint::Masked { word, mask, value } => h[word] & mask == value,
            Constraint::Linked {
                left,
                right,
                shift,
                mask,
            } => {
                let moved = if shift >= 0 {
                    h[left] << shift
                } else {
                    h[left] >> -shift
                };
                moved & mask == h[right] & mask
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Constraint::Masked { word, mask, value } => {
                write!(f, "(h[{}] & 0x{:08X}) == 0x{:08X}", word, mask, value)
            }
            Constraint::Linked {
                left,
                right,
                shift,
                mask,
            } => {
                let op = if shift >= 0 { "<<" } else { ">>" };
                write!(
                    f,
                    "((h[{}] {} {}) & 0x{:08X}) == (h[{}] & 0x{:08X})",
                    left,
                    op,
                    shift.abs(),
                    mask,
                    right,
                    mask
                )
            }
        }
    }
}

/// Conjunction of constraints over the digest words. Empty means "always".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    constraints: Vec<Constraint>,
}

impl Filter {
    /// The constant-true filter.
    pub fn always() -> Self {
        Self::default()
    }

    pub fn from_constraints(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn is_always(&self) -> bool {
        self.constraints.is_empty()
    }

    #[inline(always)]
    pub fn accepts(&self, h: &Digest) -> bool {
        self.constraints.iter().all(|c| c.accepts(h))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return f.write_str("true");
        }
        for (i, c) in self.constraints.iter().enumerate() {
            if i > 0 {
                f.write_str(" && ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Upper-cases a fingerprint and groups it by four.
pub fn format_fingerprint(hex: &str) -> String {
    let chars: Vec<char> = hex
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    chars
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a 40-digit hex string into digest words.
pub fn digest_from_hex(hex: &str) -> Option<Digest> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if hex.len() != PATTERN_LEN || !hex.is_ascii() {
        return None;
    }
    let mut h = [0u32; 5];
    for (i, word) in h.iter_mut().enumerate() {
        let start = i * NIBBLES_PER_WORD;
        *word = u32::from_str_radix(&hex[start..start + NIBBLES_PER_WORD], 16).ok()?;
    }
    Some(h)
}
