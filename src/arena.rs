// ============================================
// src/arena.rs
// 一人練習アリーナ (効果音つき、レベル4は最終テスト)
// ============================================

use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;

use crate::audio::{Cue, Sound};
use crate::config::Settings;
use crate::game::{Action, GameState, Outcome, Phase, Rules, Score};
use crate::letters::Letter;
use crate::rounds::{LevelSpec, Variant};
use crate::timer::{FlashTimer, TimerHandle, Timers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArenaTimer {
    ClearFlash(DateTime<Utc>),
    /// ラウンドクリア後の一時停止を解除する
    Resume,
}

/// 終了時のリザルト
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub level: LevelSpec,
    pub score: Score,
    pub accuracy: f64,
    /// テストモードで間違えた文字 (出題順)
    pub failed: Vec<Letter>,
}

/// アリーナ版のセッション (メモリ上のみ)
pub struct Arena {
    state: GameState,
    rules: Rules,
    settings: Settings,
    rng: StdRng,
    sound: Sound,
    timers: Timers<ArenaTimer>,
    flash_timer: FlashTimer,
    pause: Option<TimerHandle>,
    failed: Vec<Letter>,
}

impl Arena {
    pub fn new(settings: &Settings, mut rng: StdRng, sound: Sound) -> Self {
        let rules = settings.rules();
        Self {
            state: GameState::new(Variant::Arena.first_level(), &rules, &mut rng),
            rules,
            settings: settings.clone(),
            rng,
            sound,
            timers: Timers::new(),
            flash_timer: FlashTimer::default(),
            pause: None,
            failed: Vec::new(),
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// ラウンドクリア直後の「次へ」待ち中か
    pub fn is_paused(&self) -> bool {
        self.pause.is_some()
    }

    /// 選べるレベル一覧 (カスタムはレベル5)
    pub fn levels(&self) -> Vec<LevelSpec> {
        Variant::Arena.levels(self.settings.custom_pairs)
    }

    pub fn switch_level(&mut self, number: u8, now: Instant) -> Outcome {
        match Variant::Arena.level(number, self.settings.custom_pairs) {
            Some(level) => self.dispatch(Action::SwitchLevel(level), now),
            None => Outcome::Ignored,
        }
    }

    pub fn dispatch(&mut self, action: Action, now: Instant) -> Outcome {
        let selecting = matches!(action, Action::SelectUpper(_) | Action::SelectLower(_));
        if selecting && self.is_paused() {
            return Outcome::Ignored;
        }
        if !selecting {
            self.failed.clear();
            if let Some(handle) = self.pause.take() {
                self.timers.cancel(handle);
            }
        }

        let pending = self.state.selected_upper;
        let wrong_before = self.state.score.wrong;
        let outcome = self.state.apply(action, &self.rules, &mut self.rng, Utc::now());

        if self.state.level.is_test() && self.state.score.wrong > wrong_before {
            if let Some(upper) = pending {
                self.failed.push(upper);
            }
        }
        if let Some(cue) = Cue::for_outcome(outcome) {
            self.sound.play(cue);
        }
        if outcome == Outcome::RoundCleared {
            self.pause = Some(
                self.timers
                    .schedule(now, self.settings.advance_delay(), ArenaTimer::Resume),
            );
        }
        self.flash_timer.sync(
            &mut self.timers,
            self.state.flash.map(|f| f.at),
            now,
            self.settings.flash_delay(),
            ArenaTimer::ClearFlash,
        );
        if outcome.changed() {
            tracing::debug!(?action, ?outcome, "arena action");
        }
        outcome
    }

    /// 期限の来たタイマーを処理する。表示が変わったら true
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for timer in self.timers.poll(now) {
            match timer {
                ArenaTimer::ClearFlash(at) => {
                    self.flash_timer.fired();
                    if self.state.flash.map(|f| f.at) == Some(at) {
                        self.state.flash = None;
                        changed = true;
                    }
                }
                ArenaTimer::Resume => {
                    self.pause = None;
                    changed = true;
                }
            }
        }
        changed
    }

    /// 全ラウンド終了後のリザルト
    pub fn summary(&self) -> Option<Summary> {
        (self.state.phase() == Phase::Complete).then(|| Summary {
            level: self.state.level,
            score: self.state.score,
            accuracy: self.state.score.accuracy(),
            failed: self.failed.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::time::Duration;

    fn arena(rounds: usize) -> Arena {
        let settings = Settings {
            rounds_per_level: rounds,
            custom_pairs: Some(3),
            ..Settings::default()
        };
        Arena::new(&settings, StdRng::seed_from_u64(77), Sound::silent())
    }

    fn answer(arena: &mut Arena, upper: Letter, lower: char, now: Instant) -> Outcome {
        arena.dispatch(Action::SelectUpper(upper), now);
        arena.dispatch(Action::SelectLower(lower), now)
    }

    #[test]
    fn round_clear_pauses_input_until_advance_delay() {
        let mut arena = arena(3);
        let now = Instant::now();
        arena.dispatch(Action::StartActivity, now);

        let target = arena.state().current_round().unwrap().uppers[0];
        assert_eq!(answer(&mut arena, target, target.to_lower(), now), Outcome::RoundCleared);
        assert!(arena.is_paused());

        let next = arena.state().current_round().unwrap().uppers[0];
        assert_eq!(arena.dispatch(Action::SelectUpper(next), now), Outcome::Ignored);

        assert!(!arena.tick(now + Duration::from_millis(300)));
        assert!(arena.tick(now + Duration::from_millis(650)));
        assert!(!arena.is_paused());
        assert_eq!(arena.dispatch(Action::SelectUpper(next), now), Outcome::Selected);
    }

    #[test]
    fn flash_clears_after_delay() {
        let mut arena = arena(3);
        let now = Instant::now();
        arena.switch_level(2, now);
        arena.dispatch(Action::StartActivity, now);
        let uppers = arena.state().current_round().unwrap().uppers.clone();

        assert_eq!(answer(&mut arena, uppers[0], uppers[1].to_lower(), now), Outcome::Wrong);
        assert!(arena.state().flash.is_some());
        arena.tick(now + Duration::from_millis(950));
        assert_eq!(arena.state().flash, None);
    }

    #[test]
    fn final_test_collects_failed_letters_in_summary() {
        let mut arena = arena(2);
        let now = Instant::now();
        assert_eq!(arena.switch_level(4, now), Outcome::Reset);
        arena.dispatch(Action::StartActivity, now);

        let mut t = now;
        let mut expected_failed = Vec::new();
        for _ in 0..2 {
            let uppers = arena.state().current_round().unwrap().uppers.clone();
            // 各ラウンドの先頭だけ間違える
            answer(&mut arena, uppers[0], uppers[1].to_lower(), t);
            expected_failed.push(uppers[0]);
            for upper in &uppers[1..] {
                answer(&mut arena, *upper, upper.to_lower(), t);
            }
            t += Duration::from_millis(700);
            arena.tick(t);
        }

        let summary = arena.summary().unwrap();
        assert_eq!(summary.score, Score { correct: 10, wrong: 2 });
        assert_eq!(summary.failed, expected_failed);
        assert!((summary.accuracy - 10.0 / 12.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn custom_level_is_available_when_configured() {
        let mut arena = arena(1);
        let now = Instant::now();
        assert_eq!(arena.levels().len(), 5);
        assert_eq!(arena.switch_level(5, now), Outcome::Reset);
        assert_eq!(arena.state().level.pairs(), 3);
        assert_eq!(arena.switch_level(6, now), Outcome::Ignored);
        assert!(arena.summary().is_none());
    }
}
