// ============================================
// src/game.rs
// ゲームの状態とアクション (ステートマシン本体)
// ============================================

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::letters::Letter;
use crate::rounds::{LevelSpec, ROUNDS_PER_LEVEL, Round, generate_rounds};

/// 直近の回答履歴の上限
pub const ATTEMPT_LOG_CAP: usize = 18;

/// セッション全体で共通のルール
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub rounds_per_level: usize,
    pub attempt_log_cap: usize,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            rounds_per_level: ROUNDS_PER_LEVEL,
            attempt_log_cap: ATTEMPT_LOG_CAP,
        }
    }
}

/// プレイヤー (先生・生徒) の操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SwitchLevel(LevelSpec),
    StartActivity,
    SelectUpper(Letter),
    SelectLower(char),
}

/// アクションを適用した結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 何も変わらなかった
    Ignored,
    /// レベル切り替えでリセットされた
    Reset,
    Started,
    /// 大文字を選択中にした
    Selected,
    Correct,
    Wrong,
    /// 正解でラウンドが終わり、次のラウンドへ進んだ
    RoundCleared,
    /// 最後のラウンドが終わった
    Completed,
}

impl Outcome {
    /// 状態が変わったかどうか (同期が必要かどうか)
    pub fn changed(self) -> bool {
        self != Outcome::Ignored
    }
}

/// 回答の正誤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Wrong,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub correct: u32,
    pub wrong: u32,
}

impl Score {
    /// 正答率 (%)。まだ回答がなければ 100
    pub fn accuracy(&self) -> f64 {
        let total = self.correct + self.wrong;
        if total == 0 {
            100.0
        } else {
            self.correct as f64 / total as f64 * 100.0
        }
    }
}

/// 直前の回答のハイライト (一定時間で消える)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub upper: Letter,
    pub lower: char,
    pub result: Verdict,
    pub at: DateTime<Utc>,
}

/// 先生のライブビュー用の回答記録
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub at: DateTime<Utc>,
    pub level: u8,
    /// 1から数えたラウンド番号
    pub round: usize,
    pub upper: Letter,
    pub lower: char,
    pub result: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// まだ開始していない
    Idle,
    /// ラウンド進行中
    Active,
    /// 全ラウンド終了
    Complete,
}

/// `level` はレベル番号 (整数) として読み書きする
///
/// 保存・送信されるのは教室版の状態だけなので、番号は教室版のレベル表で引く。
mod level_number {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::rounds::{LevelSpec, Variant};

    pub fn serialize<S: Serializer>(level: &LevelSpec, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(level.number)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LevelSpec, D::Error> {
        let number = u8::deserialize(deserializer)?;
        Variant::Classroom
            .level(number, None)
            .ok_or_else(|| D::Error::custom(format!("unknown level {number}")))
    }
}

/// 1セッションの状態。教室版ではこれが丸ごと JSON で保存・送信される
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(with = "level_number")]
    pub level: LevelSpec,
    pub started: bool,
    pub round_index: usize,
    pub rounds: Vec<Round>,
    pub score: Score,
    pub selected_upper: Option<Letter>,
    pub selected_lower: Option<char>,
    pub matched_uppers: Vec<Letter>,
    #[serde(default)]
    pub failed_uppers: Vec<Letter>,
    pub flash: Option<Flash>,
    pub attempts: Vec<Attempt>,
}

impl GameState {
    /// 開始前の状態を作る (ラウンドは生成済み)
    pub fn new<R: Rng + ?Sized>(level: LevelSpec, rules: &Rules, rng: &mut R) -> Self {
        Self::with_rounds(level, generate_rounds(&level, rules.rounds_per_level, rng))
    }

    /// ラウンドを指定して作る
    pub fn with_rounds(level: LevelSpec, rounds: Vec<Round>) -> Self {
        Self {
            level,
            started: false,
            round_index: 0,
            rounds,
            score: Score::default(),
            selected_upper: None,
            selected_lower: None,
            matched_uppers: Vec::new(),
            failed_uppers: Vec::new(),
            flash: None,
            attempts: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        if !self.rounds.is_empty() && self.round_index >= self.rounds.len() {
            Phase::Complete
        } else if self.started {
            Phase::Active
        } else {
            Phase::Idle
        }
    }

    /// ラウンドの形がレベルと合っているか (外から受け取った状態の検査用)
    pub fn is_consistent(&self) -> bool {
        let pairs = self.level.pairs();
        self.round_index <= self.rounds.len()
            && self.rounds.iter().all(|round| {
                round.uppers.len() == pairs
                    && round.lowers.len() >= pairs
                    && round.uppers.iter().all(|u| round.lowers.contains(&u.to_lower()))
            })
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.get(self.round_index)
    }

    pub fn is_matched(&self, letter: Letter) -> bool {
        self.matched_uppers.contains(&letter)
    }

    pub fn is_failed(&self, letter: Letter) -> bool {
        self.failed_uppers.contains(&letter)
    }

    /// 現在のラウンドが解決済みか (テストモードでは失敗した文字も数える)
    fn round_resolved(&self) -> bool {
        let mut resolved = self.matched_uppers.len();
        if self.level.is_test() {
            resolved += self.failed_uppers.len();
        }
        resolved >= self.level.pairs()
    }

    /// ラウンドごとの一時的な項目をリセット
    fn clear_round_fields(&mut self) {
        self.selected_upper = None;
        self.selected_lower = None;
        self.matched_uppers.clear();
        self.failed_uppers.clear();
        self.flash = None;
    }

    /// スコア・選択・履歴をまとめてリセット
    fn clear_session(&mut self) {
        self.round_index = 0;
        self.score = Score::default();
        self.attempts.clear();
        self.clear_round_fields();
    }

    /// アクションを適用する
    ///
    /// 範囲外の操作 (開始前の選択、正解済みの文字の再選択など) は何もせず `Ignored` を返す。
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        action: Action,
        rules: &Rules,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Outcome {
        match action {
            Action::SwitchLevel(level) => {
                self.level = level;
                self.started = false;
                self.rounds = generate_rounds(&level, rules.rounds_per_level, rng);
                self.clear_session();
                Outcome::Reset
            }
            Action::StartActivity => {
                self.started = true;
                self.rounds = generate_rounds(&self.level, rules.rounds_per_level, rng);
                self.clear_session();
                Outcome::Started
            }
            Action::SelectUpper(letter) => self.select_upper(letter),
            Action::SelectLower(lower) => self.select_lower(lower, rules, now),
        }
    }

    fn select_upper(&mut self, letter: Letter) -> Outcome {
        if !self.started {
            return Outcome::Ignored;
        }
        let Some(round) = self.current_round() else {
            return Outcome::Ignored;
        };
        if !round.contains_upper(letter) || self.is_matched(letter) || self.is_failed(letter) {
            return Outcome::Ignored;
        }

        self.selected_upper = Some(letter);
        self.selected_lower = None;
        self.flash = None;
        Outcome::Selected
    }

    fn select_lower(&mut self, lower: char, rules: &Rules, now: DateTime<Utc>) -> Outcome {
        if !self.started || self.current_round().is_none() {
            return Outcome::Ignored;
        }
        let Some(upper) = self.selected_upper else {
            return Outcome::Ignored;
        };

        let result = if upper.pairs_with(lower) {
            Verdict::Correct
        } else {
            Verdict::Wrong
        };

        self.flash = Some(Flash {
            upper,
            lower,
            result,
            at: now,
        });
        self.attempts.insert(
            0,
            Attempt {
                at: now,
                level: self.level.number,
                round: self.round_index + 1,
                upper,
                lower,
                result,
            },
        );
        self.attempts.truncate(rules.attempt_log_cap);
        self.selected_upper = None;
        self.selected_lower = None;

        match result {
            Verdict::Correct => {
                self.score.correct += 1;
                if !self.is_matched(upper) {
                    self.matched_uppers.push(upper);
                }
            }
            Verdict::Wrong => {
                self.score.wrong += 1;
                // テストモードでは間違えた文字はやり直しなし
                if self.level.is_test() && !self.is_failed(upper) {
                    self.failed_uppers.push(upper);
                }
            }
        }

        if self.round_resolved() {
            return self.next_round();
        }
        match result {
            Verdict::Correct => Outcome::Correct,
            Verdict::Wrong => Outcome::Wrong,
        }
    }

    /// 次のラウンドへ進む。最後なら終了状態へ
    fn next_round(&mut self) -> Outcome {
        let total = self.rounds.len();
        let flash = self.flash;
        self.clear_round_fields();
        // 最後の回答のハイライトだけは残す (タイマーで消える)
        self.flash = flash;
        if self.round_index + 1 >= total {
            self.started = false;
            self.round_index = total;
            tracing::debug!(level = self.level.number, score = ?self.score, "activity complete");
            return Outcome::Completed;
        }
        self.round_index += 1;
        Outcome::RoundCleared
    }
}
