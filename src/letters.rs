// ============================================
// src/letters.rs
// アルファベット (A〜Z) とシャッフル処理
// ============================================

use std::fmt;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// 大文字のアルファベット1文字
///
/// 中身は必ず 'A'〜'Z'。小文字は `to_lower()` で作る。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct Letter(char);

/// 26文字すべて
pub const ALPHABET: [Letter; 26] = {
    let mut out = [Letter('A'); 26];
    let mut i = 0;
    while i < 26 {
        out[i] = Letter((b'A' + i as u8) as char);
        i += 1;
    }
    out
};

impl Letter {
    /// 大文字からのみ作成できる (小文字や記号は None)
    pub fn new(c: char) -> Option<Self> {
        c.is_ascii_uppercase().then_some(Self(c))
    }

    /// 小文字からも大文字からも作成する
    pub fn from_any(c: char) -> Option<Self> {
        Self::new(c.to_ascii_uppercase())
    }

    pub fn upper(self) -> char {
        self.0
    }

    pub fn to_lower(self) -> char {
        self.0.to_ascii_lowercase()
    }

    /// 小文字 `c` がこの文字のペアかどうか
    pub fn pairs_with(self, c: char) -> bool {
        self.to_lower() == c
    }
}

impl TryFrom<char> for Letter {
    type Error = String;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Letter::new(c).ok_or_else(|| format!("'{c}' は大文字のアルファベットではありません"))
    }
}

impl From<Letter> for char {
    fn from(letter: Letter) -> Self {
        letter.0
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// リストをシャッフルしたコピーを返す (rand の shuffle は Fisher–Yates)
pub fn shuffled<T: Clone, R: Rng + ?Sized>(list: &[T], rng: &mut R) -> Vec<T> {
    let mut cloned = list.to_vec();
    cloned.shuffle(rng);
    cloned
}

/// アルファベットから重複なしで `count` 文字を選ぶ
///
/// 全体をシャッフルして先頭を取るので、26 を超える数は 26 に丸められる。
pub fn pick_unique<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Letter> {
    let mut letters = shuffled(&ALPHABET, rng);
    letters.truncate(count.min(ALPHABET.len()));
    letters
}
