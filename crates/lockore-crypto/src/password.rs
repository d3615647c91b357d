//! Password strength estimate in bits.
//!
//! Heuristic, not a cracker model: repeated patterns, digit runs and
//! dictionary words (optionally followed by digits) are rejected outright;
//! everything else is scored by character-class mix.

use std::collections::HashSet;
use std::io::BufRead;

use lockore_core::LockoreResult;

/// Punctuation counted as the "special" class.
pub const SPECIAL: &str = "~!@#$%^&*()-_=+[{]};:'\"\\,<.>/?";

pub const WEAK: i32 = 12;
pub const AVERAGE: i32 = 36;
pub const GOOD: i32 = 61;
pub const STRONG: i32 = 129;

const MIN_LENGTH: usize = 4;
const MIN_CHARS_FOR_MIX: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    /// Pattern, dictionary word, or fewer than `WEAK` bits.
    Rejected,
    Weak,
    Average,
    Good,
    Strong,
}

impl Strength {
    pub fn from_bits(bits: i32) -> Self {
        match bits {
            b if b < WEAK => Self::Rejected,
            b if b < AVERAGE => Self::Weak,
            b if b < GOOD => Self::Average,
            b if b < STRONG => Self::Good,
            _ => Self::Strong,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Weak => "weak",
            Self::Average => "average",
            Self::Good => "good",
            Self::Strong => "strong",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PasswordQuality {
    dict: HashSet<String>,
}

impl PasswordQuality {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dict = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { dict }
    }

    /// One word per line; blank lines are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> LockoreResult<Self> {
        let mut words = Vec::new();
        for line in reader.lines() {
            words.push(line?);
        }
        Ok(Self::from_words(words))
    }

    pub fn dictionary_len(&self) -> usize {
        self.dict.len()
    }

    /// Dictionary hit, also after stripping a trailing run of digits when
    /// `strip_digits` is set.
    pub fn is_dict(&self, password: &str, strip_digits: bool) -> bool {
        let lower = password.to_lowercase();
        match tail_digits(&lower).filter(|_| strip_digits) {
            Some(tail) => self.dict.contains(&lower[..lower.len() - tail.len()]),
            None => self.dict.contains(&lower),
        }
    }

    /// Estimated entropy in whole bits; `-1` for patterns and dictionary words.
    pub fn bits(&self, password: &str) -> i32 {
        if password.is_empty() {
            return 0;
        }
        if is_series(password) || self.is_dict(password, true) {
            return -1;
        }

        let (mut dig, mut upper, mut lower, mut spec, mut extra) = (0, 0, 0, 0, 0);
        for c in password.chars() {
            if c.is_numeric() {
                dig += 1;
            } else if c.is_uppercase() {
                upper += 1;
            } else if c.is_lowercase() {
                lower += 1;
            } else if c <= '\u{7F}' {
                spec += 1;
            } else {
                extra += 1;
            }
        }

        let special_len = SPECIAL.chars().count() as u32;
        let classes: [(usize, u32, u32); 5] = [
            (dig, 10, 10),
            (upper, 26, 26),
            (lower, 26, 26),
            (spec, special_len, 16),
            (extra, 26, 26),
        ];

        let mut bits = 0i64;
        let (mut acc, mut cnt) = (0i64, 0u32);
        for (count, alone, mixed) in classes {
            if count < MIN_CHARS_FOR_MIX {
                bits += log2_centi(alone) * count as i64;
            } else {
                cnt += mixed;
                acc += count as i64;
            }
        }
        let pool = if acc == 0 { 1 } else { cnt };
        ((bits + log2_centi(pool) * acc) / 100) as i32
    }

    pub fn strength(&self, password: &str) -> Strength {
        Strength::from_bits(self.bits(password))
    }
}

fn tail_digits(s: &str) -> Option<&str> {
    let head = s.trim_end_matches(|c: char| c.is_ascii_digit());
    (head.len() < s.len()).then(|| &s[head.len()..])
}

/// Repetition (`aaa`, `ababa`, `abcabc`) or an arithmetic digit run
/// (`1234`, `9753`, `8901`).
fn is_series(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    let len = chars.len();
    if len == 0 {
        return false;
    }

    if let Some(period) = chars[1..].iter().position(|&c| c == chars[0]).map(|p| p + 1) {
        let min_len = period * 2 + usize::from(period * 2 <= MIN_LENGTH);
        if min_len <= len && (0..len).all(|i| chars[i] == chars[i % period]) {
            return true;
        }
    }

    if len < MIN_LENGTH || !chars.iter().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let step = |a: char, b: char| {
        let d = b as i32 - a as i32;
        if d.unsigned_abs() as usize > MIN_LENGTH {
            d - 10 * d.signum()
        } else {
            d
        }
    };
    let diff = step(chars[0], chars[1]);
    chars.windows(2).all(|w| step(w[0], w[1]) == diff)
}

/// `100 * log2(n)`, using the tuned table for common class mixes.
fn log2_centi(n: u32) -> i64 {
    match n {
        0 | 1 => 0,
        10 => 332,
        16 => 400,
        26 => 470,
        32 => 500,
        36 => 517,
        42 => 539,
        52 => 570,
        62 => 595,
        68 => 609,
        78 => 629,
        88 => 646,
        94 => 655,
        104 => 670,
        _ => {
            let rounding = i64::from(!n.is_power_of_two());
            (i64::from(31 - n.leading_zeros()) + rounding) * 100
        }
    }
}
