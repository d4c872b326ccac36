// ============================================
// src/timer.rs
// キャンセル可能なタイマー (ハイライト消去や自動で次へ進む用)
// ============================================

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// `Timers::schedule` が返すハンドル。`cancel` に渡すと取り消せる
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug)]
struct Pending<E> {
    handle: TimerHandle,
    deadline: Instant,
    event: E,
}

/// 時刻を外から渡して進める単純なタイマー群
///
/// UI ループは毎フレーム `poll(Instant::now())` を呼ぶ。テストでは任意の時刻を渡せる。
#[derive(Debug)]
pub struct Timers<E> {
    next_id: u64,
    pending: Vec<Pending<E>>,
}

impl<E> Default for Timers<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: Vec::new(),
        }
    }
}

impl<E> Timers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `now` から `delay` 後に `event` を発火させる
    pub fn schedule(&mut self, now: Instant, delay: Duration, event: E) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.pending.push(Pending {
            handle,
            deadline: now + delay,
            event,
        });
        handle
    }

    /// 取り消す。既に発火済みなら false
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.handle != handle);
        self.pending.len() != before
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.iter().any(|p| p.handle == handle)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 期限が来たイベントを期限の早い順に取り出す
    pub fn poll(&mut self, now: Instant) -> Vec<E> {
        let (mut due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.deadline <= now);
        self.pending = rest;
        due.sort_by_key(|p| (p.deadline, p.handle.0));
        due.into_iter().map(|p| p.event).collect()
    }
}

/// ハイライト (フラッシュ) を消すタイマーを1本だけ持つ
///
/// ハイライトの時刻が変わるたびに前のタイマーを取り消して予約し直す。
#[derive(Debug, Default)]
pub struct FlashTimer {
    scheduled: Option<(TimerHandle, DateTime<Utc>)>,
}

impl FlashTimer {
    /// 現在のハイライト時刻 `flash_at` に合わせて予約を更新する
    pub fn sync<E>(
        &mut self,
        timers: &mut Timers<E>,
        flash_at: Option<DateTime<Utc>>,
        now: Instant,
        delay: Duration,
        event: impl FnOnce(DateTime<Utc>) -> E,
    ) {
        if self.scheduled.map(|(_, at)| at) == flash_at {
            return;
        }
        if let Some((handle, _)) = self.scheduled.take() {
            timers.cancel(handle);
        }
        if let Some(at) = flash_at {
            let handle = timers.schedule(now, delay, event(at));
            self.scheduled = Some((handle, at));
        }
    }

    /// タイマーが発火したら呼ぶ
    pub fn fired(&mut self) {
        self.scheduled = None;
    }
}
