// ============================================
// src/simple.rs
// 簡易版: レベル1 = 2択タップ、レベル2 = 6文字の列から選ぶ
// ============================================

use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;

use crate::config::Settings;
use crate::game::{Action, GameState, Outcome, Rules};
use crate::rounds::Variant;
use crate::timer::{FlashTimer, Timers};

/// 簡易版のセッション
///
/// 大文字は1つしかないので、タップ1回で「大文字を選ぶ → 小文字を選ぶ」をまとめて行う。
pub struct SimpleGame {
    state: GameState,
    rules: Rules,
    settings: Settings,
    rng: StdRng,
    timers: Timers<DateTime<Utc>>,
    flash_timer: FlashTimer,
}

impl SimpleGame {
    pub fn new(settings: &Settings, mut rng: StdRng) -> Self {
        let rules = settings.rules();
        Self {
            state: GameState::new(Variant::Simple.first_level(), &rules, &mut rng),
            rules,
            settings: settings.clone(),
            rng,
            timers: Timers::new(),
            flash_timer: FlashTimer::default(),
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    fn apply(&mut self, action: Action, now: Instant) -> Outcome {
        let outcome = self.state.apply(action, &self.rules, &mut self.rng, Utc::now());
        self.flash_timer.sync(
            &mut self.timers,
            self.state.flash.map(|f| f.at),
            now,
            self.settings.flash_delay(),
            |at| at,
        );
        outcome
    }

    pub fn switch_level(&mut self, number: u8, now: Instant) -> Outcome {
        match Variant::Simple.level(number, None) {
            Some(level) => self.apply(Action::SwitchLevel(level), now),
            None => Outcome::Ignored,
        }
    }

    pub fn start(&mut self, now: Instant) -> Outcome {
        self.apply(Action::StartActivity, now)
    }

    /// 小文字をタップする
    pub fn tap(&mut self, lower: char, now: Instant) -> Outcome {
        let Some(target) = self.state.current_round().map(|r| r.uppers[0]) else {
            return Outcome::Ignored;
        };
        if !self.state.started {
            return Outcome::Ignored;
        }
        self.apply(Action::SelectUpper(target), now);
        let outcome = self.apply(Action::SelectLower(lower), now);
        tracing::debug!(%target, lower = %lower, ?outcome, "tap");
        outcome
    }

    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for at in self.timers.poll(now) {
            self.flash_timer.fired();
            if self.state.flash.map(|f| f.at) == Some(at) {
                self.state.flash = None;
                changed = true;
            }
        }
        changed
    }
}
