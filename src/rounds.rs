// ============================================
// src/rounds.rs
// レベル定義とラウンド (スライド) の生成
// ============================================

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::letters::{Letter, pick_unique, shuffled};

/// 1レベルあたりのラウンド数
pub const ROUNDS_PER_LEVEL: usize = 20;

/// 「列」ラウンドで並べる文字数
pub const ROW_LEN: usize = 6;

/// ラウンドの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    /// 正解1つ + ハズレ1つの2択
    Single,
    /// 大文字と小文字を全部ペアにする
    Pairs,
    /// 小文字の列から1文字だけ選ぶ
    Row,
}

/// 1ラウンド分のお題
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub kind: RoundKind,
    /// 答える対象の大文字 (表示順)
    pub uppers: Vec<Letter>,
    /// 選択肢の小文字 (シャッフル済み)
    pub lowers: Vec<char>,
}

impl Round {
    /// 正解 + ハズレの2択ラウンド
    pub fn single(target: Letter, distractor: Letter) -> Self {
        Self {
            kind: RoundKind::Single,
            uppers: vec![target],
            lowers: vec![target.to_lower(), distractor.to_lower()],
        }
    }

    /// 全ペアのラウンド。`lowers` は与えられた順のまま
    pub fn pairs(uppers: Vec<Letter>, lowers: Vec<char>) -> Self {
        Self {
            kind: RoundKind::Pairs,
            uppers,
            lowers,
        }
    }

    /// 列ラウンド。`row` の中に `target` が含まれていること
    pub fn row(target: Letter, row: &[Letter]) -> Self {
        Self {
            kind: RoundKind::Row,
            uppers: vec![target],
            lowers: row.iter().map(|l| l.to_lower()).collect(),
        }
    }

    pub fn contains_upper(&self, letter: Letter) -> bool {
        self.uppers.contains(&letter)
    }
}

/// ラウンドの形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "size", rename_all = "snake_case")]
pub enum Shape {
    Single,
    Pairs(usize),
    Row(usize),
}

/// 練習 (何度でも) か テスト (1回きり)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Practice,
    Test,
}

/// レベル番号とラウンド生成パラメータ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub number: u8,
    pub shape: Shape,
    pub mode: Mode,
}

impl LevelSpec {
    /// ラウンドを完了するのに必要なペア数
    pub fn pairs(&self) -> usize {
        match self.shape {
            Shape::Single | Shape::Row(_) => 1,
            Shape::Pairs(n) => n,
        }
    }

    pub fn is_test(&self) -> bool {
        self.mode == Mode::Test
    }

    /// 画面表示用のラベル
    pub fn label(&self) -> String {
        match (self.shape, self.mode) {
            (Shape::Single, _) => format!("Level {} · Single Pair", self.number),
            (Shape::Row(n), _) => format!("Level {} · Row of {}", self.number, n),
            (Shape::Pairs(n), Mode::Practice) => format!("Level {} · {} pairs", self.number, n),
            (Shape::Pairs(n), Mode::Test) => format!("Level {} · Test ({} pairs)", self.number, n),
        }
    }
}

/// 3種類のアプリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// 先生と生徒がタブ (プロセス) 間で同期する教室版
    Classroom,
    /// 音つきの一人練習 + 最終テスト
    Arena,
    /// タップ / 列 の2レベルだけの簡易版
    Simple,
}

impl Variant {
    /// レベル番号から定義を引く。存在しないレベルは None
    ///
    /// `custom_pairs` はアリーナのレベル5としてのみ使われる。
    pub fn level(self, number: u8, custom_pairs: Option<usize>) -> Option<LevelSpec> {
        let (shape, mode) = match (self, number) {
            (Variant::Classroom | Variant::Arena | Variant::Simple, 1) => (Shape::Single, Mode::Practice),
            (Variant::Classroom | Variant::Arena, 2) => (Shape::Pairs(5), Mode::Practice),
            (Variant::Classroom | Variant::Arena, 3) => (Shape::Pairs(9), Mode::Practice),
            (Variant::Arena, 4) => (Shape::Pairs(6), Mode::Test),
            (Variant::Arena, 5) => match custom_pairs {
                Some(n) if (1..=26).contains(&n) => (Shape::Pairs(n), Mode::Practice),
                _ => return None,
            },
            (Variant::Simple, 2) => (Shape::Row(ROW_LEN), Mode::Practice),
            _ => return None,
        };
        Some(LevelSpec { number, shape, mode })
    }

    /// 選べるレベルの一覧
    pub fn levels(self, custom_pairs: Option<usize>) -> Vec<LevelSpec> {
        (1..=5).filter_map(|n| self.level(n, custom_pairs)).collect()
    }

    pub fn first_level(self) -> LevelSpec {
        LevelSpec {
            number: 1,
            shape: Shape::Single,
            mode: Mode::Practice,
        }
    }
}

/// 1ラウンドを生成する
pub fn generate_round<R: Rng + ?Sized>(level: &LevelSpec, rng: &mut R) -> Round {
    match level.shape {
        Shape::Single => {
            // 2文字を重複なしで一度に引くので、ハズレが正解と同じになることはない
            let picked = pick_unique(2, rng);
            let single = Round::single(picked[0], picked[1]);
            Round {
                lowers: shuffled(&single.lowers, rng),
                ..single
            }
        }
        Shape::Pairs(n) => {
            let uppers = pick_unique(n, rng);
            let lowers: Vec<char> = uppers.iter().map(|l| l.to_lower()).collect();
            let lowers = shuffled(&lowers, rng);
            Round::pairs(uppers, lowers)
        }
        Shape::Row(n) => {
            let row = pick_unique(n.max(1), rng);
            let target = *row.choose(rng).unwrap_or(&row[0]);
            Round::row(target, &row)
        }
    }
}

/// レベルの全ラウンドを生成する
pub fn generate_rounds<R: Rng + ?Sized>(level: &LevelSpec, count: usize, rng: &mut R) -> Vec<Round> {
    (0..count).map(|_| generate_round(level, rng)).collect()
}
