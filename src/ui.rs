// ============================================
// src/ui.rs
// 画面描画 (ratatui)
// ============================================

use ratatui::{
    prelude::*,
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
};

use crate::arena::Arena;
use crate::game::{Attempt, GameState, Phase, Verdict};
use crate::letters::Letter;
use crate::room::Role;
use crate::rounds::{LevelSpec, RoundKind};
use crate::simple::SimpleGame;

/// カードの見た目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Neutral,
    Selected,
    Correct,
    Wrong,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Tone::Neutral => Style::default().fg(Color::White).bg(Color::DarkGray),
            Tone::Selected => Style::default().fg(Color::Black).bg(Color::Cyan),
            Tone::Correct => Style::default().fg(Color::Black).bg(Color::Green),
            Tone::Wrong => Style::default().fg(Color::White).bg(Color::Red),
        }
    }
}

fn verdict_tone(result: Verdict) -> Tone {
    match result {
        Verdict::Correct => Tone::Correct,
        Verdict::Wrong => Tone::Wrong,
    }
}

/// 大文字カードの色
fn upper_tone(state: &GameState, letter: Letter) -> Tone {
    if state.is_matched(letter) {
        return Tone::Correct;
    }
    if state.is_failed(letter) {
        return Tone::Wrong;
    }
    if let Some(flash) = state.flash {
        if flash.upper == letter {
            return verdict_tone(flash.result);
        }
    }
    if state.selected_upper == Some(letter) {
        return Tone::Selected;
    }
    Tone::Neutral
}

/// 小文字カードの色
fn lower_tone(state: &GameState, lower: char) -> Tone {
    if Letter::from_any(lower).is_some_and(|l| state.is_matched(l)) {
        return Tone::Correct;
    }
    if let Some(flash) = state.flash {
        if flash.lower == lower {
            return verdict_tone(flash.result);
        }
    }
    Tone::Neutral
}

/// 文字カードを横に並べた1行
fn card_row<'a>(cards: impl Iterator<Item = (char, Tone)>) -> Line<'a> {
    let mut spans = Vec::new();
    for (c, tone) in cards {
        spans.push(Span::styled(format!(" {c} "), tone.style().bold()));
        spans.push(Span::raw("  "));
    }
    Line::from(spans).centered()
}

/// 現在のラウンドのカード (大文字の行 + 小文字の行)
fn round_lines<'a>(state: &GameState) -> Vec<Line<'a>> {
    let Some(round) = state.current_round() else {
        return Vec::new();
    };
    let mut lines = Vec::new();

    match round.kind {
        // 3x3 など多い場合は3つずつ折り返す
        RoundKind::Pairs if round.uppers.len() > 6 => {
            for chunk in round.uppers.chunks(3) {
                lines.push(card_row(chunk.iter().map(|&u| (u.upper(), upper_tone(state, u)))));
            }
        }
        _ => lines.push(card_row(
            round.uppers.iter().map(|&u| (u.upper(), upper_tone(state, u))),
        )),
    }
    lines.push(Line::from(""));
    if round.kind == RoundKind::Pairs && round.lowers.len() > 6 {
        for chunk in round.lowers.chunks(3) {
            lines.push(card_row(chunk.iter().map(|&l| (l, lower_tone(state, l)))));
        }
    } else {
        lines.push(card_row(round.lowers.iter().map(|&l| (l, lower_tone(state, l)))));
    }
    lines
}

fn feedback_line<'a>(state: &GameState) -> Line<'a> {
    let line = match state.flash.map(|f| f.result) {
        Some(Verdict::Correct) => Line::from("Perfect match!").style(Style::default().fg(Color::Green)),
        Some(Verdict::Wrong) => Line::from("Not a match. Try another pair.").style(Style::default().fg(Color::Red)),
        None => Line::from(""),
    };
    line.centered()
}

/// ステータスバー (スライド進捗と正誤数)
fn progress_gauge<'a>(state: &GameState) -> Gauge<'a> {
    let total = state.rounds.len().max(1);
    let shown = (state.round_index + usize::from(state.started)).min(total);
    let label = format!(
        "{} · Slides: {} / {} · Correct: {} · Wrong: {}",
        state.level.label(),
        shown,
        total,
        state.score.correct,
        state.score.wrong
    );
    Gauge::default()
        .block(Block::default().borders(Borders::NONE))
        .gauge_style(Style::default().fg(Color::Magenta).bg(Color::Black))
        .ratio((shown as f64 / total as f64).min(1.0))
        .label(label)
}

fn attempt_lines<'a>(attempts: &[Attempt]) -> Vec<Line<'a>> {
    if attempts.is_empty() {
        return vec![Line::from("No attempts yet.").style(Style::default().fg(Color::DarkGray))];
    }
    attempts
        .iter()
        .map(|a| {
            let (text, color) = match a.result {
                Verdict::Correct => ("correct", Color::Green),
                Verdict::Wrong => ("wrong", Color::Red),
            };
            Line::from(vec![
                Span::raw(format!("L{} · Slide {}: {} → {}  ", a.level, a.round, a.upper, a.lower)),
                Span::styled(text, Style::default().fg(color).bold()),
            ])
        })
        .collect()
}

fn level_menu<'a>(levels: &[LevelSpec], current: &LevelSpec) -> Line<'a> {
    let spans: Vec<Span> = levels
        .iter()
        .map(|level| {
            let style = if level.number == current.number {
                Style::default().fg(Color::Black).bg(Color::Yellow)
            } else {
                Style::default().fg(Color::Gray)
            };
            Span::styled(format!(" [{}] {} ", level.number, level.label()), style)
        })
        .collect();
    Line::from(spans)
}

/// 中央のゲームエリア (開始前 / 進行中 / 終了)
fn game_area<'a>(state: &GameState, waiting_hint: &str, instruction: &str) -> Vec<Line<'a>> {
    match state.phase() {
        Phase::Idle => vec![Line::from(waiting_hint.to_string()).style(Style::default().fg(Color::Gray)).centered()],
        Phase::Active => {
            let mut lines = vec![Line::from(instruction.to_string()).centered(), Line::from("")];
            lines.extend(round_lines(state));
            lines.push(Line::from(""));
            lines.push(feedback_line(state));
            lines
        }
        Phase::Complete => vec![
            Line::from("Activity Complete").style(Style::default().fg(Color::Yellow).bold()).centered(),
            Line::from(format!("Total Correct: {}", state.score.correct)).centered(),
            Line::from(format!("Total Wrong: {}", state.score.wrong)).centered(),
        ],
    }
}

// --------------------------------------------------
// 各バリアントの画面
// --------------------------------------------------

pub fn draw_classroom(f: &mut Frame, state: &GameState, role: Role, levels: &[LevelSpec]) {
    let size = f.area();
    let block = Block::default().borders(Borders::ALL).title("Find my little brother · Classroom");
    let inner_area = block.inner(size);
    f.render_widget(block, size);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // [0] 役割
            Constraint::Length(1), // [1] レベル
            Constraint::Length(1), // [2] 進捗
            Constraint::Min(8),    // [3] ゲームエリア
            Constraint::Length(8), // [4] ライブビュー
        ])
        .split(inner_area);

    let controls = match role {
        Role::Teacher => "1-3: level · Enter: start · Esc: quit",
        Role::Student => "UPPERCASE key, then lowercase key · Esc: quit",
        Role::Observer => "read-only · Esc: quit",
    };
    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::raw("Role: "),
            Span::styled(role.to_string(), Style::default().fg(Color::Cyan).bold()),
            Span::raw(format!("  ({controls})")),
        ])),
        chunks[0],
    );
    f.render_widget(Paragraph::new(level_menu(levels, &state.level)), chunks[1]);
    f.render_widget(progress_gauge(state), chunks[2]);

    let hint = if role == Role::Teacher {
        "Select level and start the activity."
    } else {
        "Wait for teacher to start, then match uppercase and lowercase."
    };
    f.render_widget(
        Paragraph::new(game_area(state, hint, "Type the UPPERCASE letter first, then its lowercase.")),
        chunks[3],
    );

    f.render_widget(
        Paragraph::new(attempt_lines(&state.attempts))
            .block(Block::default().borders(Borders::TOP).title("Teacher Live View · Student Attempts")),
        chunks[4],
    );
}

pub fn draw_arena(f: &mut Frame, arena: &Arena) {
    let state = arena.state();
    let size = f.area();
    let block = Block::default().borders(Borders::ALL).title("Find my little brother · Practice Arena");
    let inner_area = block.inner(size);
    f.render_widget(block, size);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // [0] レベル
            Constraint::Length(1), // [1] 進捗
            Constraint::Min(8),    // [2] ゲームエリア
        ])
        .split(inner_area);

    f.render_widget(Paragraph::new(level_menu(&arena.levels(), &state.level)), chunks[0]);
    f.render_widget(progress_gauge(state), chunks[1]);

    let mut lines = if arena.is_paused() {
        vec![Line::from("Great! Next round...").style(Style::default().fg(Color::Green).bold()).centered()]
    } else {
        game_area(
            state,
            "Pick a level (number keys) and press Enter to start.",
            "Type the UPPERCASE letter first, then its lowercase.",
        )
    };
    if let Some(summary) = arena.summary() {
        lines.push(Line::from(format!("Accuracy: {:.1}%", summary.accuracy)).centered());
        if summary.level.is_test() {
            let failed: String = if summary.failed.is_empty() {
                "none".to_string()
            } else {
                summary.failed.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(" ")
            };
            lines.push(Line::from(format!("Missed letters: {failed}")).style(Style::default().fg(Color::Red)).centered());
        }
        lines.push(Line::from("Enter: run again · Esc: quit").style(Style::default().fg(Color::Gray)).centered());
    }
    f.render_widget(Paragraph::new(lines), chunks[2]);
}

pub fn draw_simple(f: &mut Frame, game: &SimpleGame, levels: &[LevelSpec]) {
    let state = game.state();
    let size = f.area();
    let block = Block::default().borders(Borders::ALL).title("Find my little brother · Simple");
    let inner_area = block.inner(size);
    f.render_widget(block, size);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // [0] レベル
            Constraint::Length(1), // [1] 進捗
            Constraint::Min(8),    // [2] ゲームエリア
        ])
        .split(inner_area);

    f.render_widget(Paragraph::new(level_menu(levels, &state.level)), chunks[0]);
    f.render_widget(progress_gauge(state), chunks[1]);
    f.render_widget(
        Paragraph::new(game_area(
            state,
            "1: tap · 2: row · Enter: start",
            "Tap (type) the little brother of the big letter.",
        )),
        chunks[2],
    );
}
