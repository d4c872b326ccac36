// ============================================
// src/audio.rs
// 効果音 (端末のベル)
// ============================================

use console::Term;

use crate::game::Outcome;

/// 鳴らす音の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Correct,
    Wrong,
    RoundCleared,
    Completed,
}

impl Cue {
    /// アクションの結果に対応する音 (無ければ None)
    pub fn for_outcome(outcome: Outcome) -> Option<Self> {
        match outcome {
            Outcome::Correct => Some(Cue::Correct),
            Outcome::Wrong => Some(Cue::Wrong),
            Outcome::RoundCleared => Some(Cue::RoundCleared),
            Outcome::Completed => Some(Cue::Completed),
            _ => None,
        }
    }

    /// ベルを鳴らす回数
    fn bells(self) -> usize {
        match self {
            Cue::Correct => 1,
            Cue::Wrong => 2,
            Cue::RoundCleared => 1,
            Cue::Completed => 3,
        }
    }
}

/// 音の出力先。鳴らせない環境では何もしない
pub struct Sound {
    term: Option<Term>,
}

impl Sound {
    /// 標準出力が端末なら有効にする
    pub fn detect(muted: bool) -> Self {
        let term = Term::stdout();
        let enabled = !muted && term.is_term();
        if !enabled {
            tracing::debug!(muted, "sound disabled");
        }
        Self {
            term: enabled.then_some(term),
        }
    }

    pub fn silent() -> Self {
        Self { term: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.term.is_some()
    }

    /// 鳴らす。失敗してもゲームには影響させない
    pub fn play(&self, cue: Cue) {
        let Some(term) = &self.term else { return };
        let bells = "\u{7}".repeat(cue.bells());
        if let Err(e) = term.write_str(&bells) {
            tracing::debug!(error = %e, ?cue, "failed to play sound");
        }
    }
}
