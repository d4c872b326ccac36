// ============================================
// src/room.rs
// 教室版: 先生・生徒の役割と、タブ (プロセス) 間の状態同期
// ============================================

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, RoomMessage};
use crate::config::Settings;
use crate::errors::Result;
use crate::game::{Action, GameState, Outcome, Rules};
use crate::rounds::Variant;
use crate::store::Store;
use crate::timer::{FlashTimer, Timers};

pub const ROOM_STATE_KEY: &str = "letter-room-state-v2";
pub const ROOM_ROLE_KEY: &str = "letter-room-roles-v2";
pub const CHANNEL_NAME: &str = "letter-room-channel-v2";

/// タブごとの役割
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// レベル切り替えと開始ができる
    Teacher,
    /// 文字を選べる
    Student,
    /// 見るだけ
    Observer,
}

impl Role {
    /// この役割でアクションを実行できるか
    pub fn may(self, action: &Action) -> bool {
        match action {
            Action::SwitchLevel(_) | Action::StartActivity => self == Role::Teacher,
            Action::SelectUpper(_) | Action::SelectLower(_) => self == Role::Student,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Teacher => "TEACHER",
            Role::Student => "STUDENT",
            Role::Observer => "OBSERVER",
        };
        f.write_str(name)
    }
}

/// 役割の割り当て表 (先着順: 1人目が先生、2人目が生徒)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRegistry {
    pub teacher: Option<String>,
    pub student: Option<String>,
}

impl RoleRegistry {
    /// 壊れている・無い場合は空の表
    pub fn load<S: Store>(store: &S) -> Self {
        match store.get(ROOM_ROLE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "role registry is malformed, starting empty");
                Self::default()
            }),
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read role registry");
                Self::default()
            }
        }
    }

    /// `client_id` の役割を返す。未登録なら空いている役割を取る
    pub fn claim<S: Store>(store: &mut S, client_id: &str) -> Result<Role> {
        let mut roles = Self::load(store);

        if roles.teacher.as_deref() == Some(client_id) {
            return Ok(Role::Teacher);
        }
        if roles.student.as_deref() == Some(client_id) {
            return Ok(Role::Student);
        }

        let role = if roles.teacher.is_none() {
            roles.teacher = Some(client_id.to_string());
            Role::Teacher
        } else if roles.student.is_none() {
            roles.student = Some(client_id.to_string());
            Role::Student
        } else {
            return Ok(Role::Observer);
        };
        store.set(ROOM_ROLE_KEY, &serde_json::to_string(&roles)?)?;
        Ok(role)
    }

    /// 割り当てをすべて解除する
    pub fn reset<S: Store>(store: &mut S) -> Result<()> {
        store.remove(ROOM_ROLE_KEY)
    }
}

/// `client-xxxxxxx` 形式のランダムなID
pub fn new_client_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let suffix: String = (0..7)
        .map(|_| DIGITS[rng.random_range(0..DIGITS.len())] as char)
        .collect();
    format!("client-{suffix}")
}

/// JSON の状態を読む。壊れている・レベルと合わない場合は None
fn parse_state(raw: &str) -> Option<GameState> {
    match serde_json::from_str::<GameState>(raw) {
        Ok(state) if state.is_consistent() => Some(state),
        Ok(state) => {
            tracing::warn!(level = state.level.number, "room state does not match its level");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "room state is malformed");
            None
        }
    }
}

/// 保存されている状態を読む。無い・壊れている場合は None
fn load_state<S: Store>(store: &S) -> Option<GameState> {
    match store.get(ROOM_STATE_KEY) {
        Ok(raw) => parse_state(&raw?),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read room state");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoomTimer {
    /// この時刻のハイライトがまだ残っていれば消す
    ClearFlash(DateTime<Utc>),
}

/// 教室版の1タブ分のクライアント
pub struct RoomClient<S: Store, C: Channel> {
    client_id: String,
    role: Role,
    state: GameState,
    store: S,
    channel: C,
    rules: Rules,
    settings: Settings,
    rng: StdRng,
    timers: Timers<RoomTimer>,
    flash_timer: FlashTimer,
}

impl<S: Store, C: Channel> RoomClient<S, C> {
    /// 役割を取得し、保存されている状態を読み込んで参加する
    pub fn join(
        mut store: S,
        channel: C,
        client_id: String,
        settings: &Settings,
        mut rng: StdRng,
        now: Instant,
    ) -> Result<Self> {
        let role = RoleRegistry::claim(&mut store, &client_id)?;
        let rules = settings.rules();

        let state = match load_state(&store) {
            Some(state) => state,
            None => {
                let fresh = GameState::new(Variant::Classroom.first_level(), &rules, &mut rng);
                store.set(ROOM_STATE_KEY, &serde_json::to_string(&fresh)?)?;
                fresh
            }
        };
        tracing::info!(client_id = %client_id, role = %role, "joined room");

        let mut client = Self {
            client_id,
            role,
            state,
            store,
            channel,
            rules,
            settings: settings.clone(),
            rng,
            timers: Timers::new(),
            flash_timer: FlashTimer::default(),
        };
        client.reschedule_flash(now);
        Ok(client)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// 役割チェックをしてからアクションを適用し、保存・送信する
    pub fn dispatch(&mut self, action: Action, now: Instant) -> Outcome {
        if !self.role.may(&action) {
            tracing::debug!(role = %self.role, ?action, "action not allowed for role");
            return Outcome::Ignored;
        }

        let outcome = self.state.apply(action, &self.rules, &mut self.rng, Utc::now());
        tracing::debug!(?action, ?outcome, "dispatched");
        if outcome.changed() {
            self.persist();
            self.reschedule_flash(now);
        }
        outcome
    }

    /// レベル番号で切り替える (教室版にないレベルは無視)
    pub fn switch_level(&mut self, number: u8, now: Instant) -> Outcome {
        match Variant::Classroom.level(number, None) {
            Some(level) => self.dispatch(Action::SwitchLevel(level), now),
            None => Outcome::Ignored,
        }
    }

    /// 状態を保存して他のタブへ送る。失敗しても手元の状態はそのまま
    ///
    /// 書き込みより前に届いていたメッセージは古いので捨てる (最後に書いた方が勝つ)。
    fn persist(&mut self) {
        match self.channel.drain() {
            Ok(stale) if !stale.is_empty() => {
                tracing::debug!(count = stale.len(), "dropping messages older than own write");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to read channel"),
        }
        match serde_json::to_string(&self.state) {
            Ok(json) => {
                if let Err(e) = self.store.set(ROOM_STATE_KEY, &json) {
                    tracing::warn!(error = %e, "failed to persist room state");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize room state"),
        }
        if let Err(e) = self.channel.post(&RoomMessage::RoomState(self.state.clone())) {
            tracing::warn!(error = %e, "failed to broadcast room state");
        }
    }

    /// 保存領域から状態を読み直す
    pub fn refresh_from_store(&mut self, now: Instant) -> bool {
        match load_state(&self.store) {
            Some(latest) => self.adopt(latest, now),
            None => false,
        }
    }

    /// 受け取った状態でそのまま上書きする (マージはしない)
    fn adopt(&mut self, latest: GameState, now: Instant) -> bool {
        if latest == self.state {
            return false;
        }
        if !latest.is_consistent() {
            tracing::warn!(level = latest.level.number, "ignoring room state that does not match its level");
            return false;
        }
        self.state = latest;
        self.reschedule_flash(now);
        true
    }

    /// 保存領域の変更通知・チャンネルのメッセージ・期限切れタイマーを処理する
    ///
    /// 状態が変わったら true。
    pub fn pump(&mut self, now: Instant) -> bool {
        let mut changed = false;

        match self.store.poll_events() {
            Ok(events) => {
                for event in events {
                    if event.key != ROOM_STATE_KEY {
                        continue;
                    }
                    let Some(raw) = event.new_value else { continue };
                    if let Some(latest) = parse_state(&raw) {
                        changed |= self.adopt(latest, now);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to poll storage events"),
        }

        match self.channel.drain() {
            Ok(messages) => {
                for message in messages {
                    let RoomMessage::RoomState(latest) = message;
                    changed |= self.adopt(latest, now);
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to read channel"),
        }

        for timer in self.timers.poll(now) {
            match timer {
                RoomTimer::ClearFlash(at) => changed |= self.expire_flash(at),
            }
        }
        changed
    }

    /// ハイライトが変わったら古いタイマーを取り消して新しく予約する
    fn reschedule_flash(&mut self, now: Instant) {
        self.flash_timer.sync(
            &mut self.timers,
            self.state.flash.map(|f| f.at),
            now,
            self.settings.flash_delay(),
            RoomTimer::ClearFlash,
        );
    }

    /// 保存済みの最新状態のハイライトがまだ `at` のままなら消す
    ///
    /// 他プロセスのタイマーはここから取り消せないので、時刻の比較で古いものを無視する。
    fn expire_flash(&mut self, at: DateTime<Utc>) -> bool {
        self.flash_timer.fired();
        let Some(mut latest) = load_state(&self.store) else {
            return false;
        };
        if latest.flash.map(|f| f.at) != Some(at) {
            return false;
        }
        latest.flash = None;
        self.state = latest;
        self.persist();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{FileChannel, LocalBus, LocalChannel};
    use crate::game::{Phase, Verdict};
    use crate::store::{FileStore, MemoryProfile, MemoryStore};
    use rand::SeedableRng;
    use std::time::Duration;

    type Tab = RoomClient<MemoryStore, LocalChannel>;

    fn open(profile: &MemoryProfile, bus: &LocalBus, id: &str, seed: u64, now: Instant) -> Tab {
        RoomClient::join(
            profile.open_tab(),
            bus.open(CHANNEL_NAME),
            id.to_string(),
            &Settings::default(),
            StdRng::seed_from_u64(seed),
            now,
        )
        .unwrap()
    }

    #[test]
    fn roles_are_first_come_and_sticky() {
        let profile = MemoryProfile::new();
        let mut store = profile.open_tab();

        assert_eq!(RoleRegistry::claim(&mut store, "client-a").unwrap(), Role::Teacher);
        assert_eq!(RoleRegistry::claim(&mut store, "client-b").unwrap(), Role::Student);
        assert_eq!(RoleRegistry::claim(&mut store, "client-c").unwrap(), Role::Observer);
        assert_eq!(RoleRegistry::claim(&mut store, "client-a").unwrap(), Role::Teacher);
        assert_eq!(RoleRegistry::claim(&mut store, "client-b").unwrap(), Role::Student);

        RoleRegistry::reset(&mut store).unwrap();
        assert_eq!(RoleRegistry::claim(&mut store, "client-c").unwrap(), Role::Teacher);
    }

    #[test]
    fn client_ids_look_like_client_prefix_plus_base36() {
        let id = new_client_id(&mut StdRng::seed_from_u64(1));
        assert!(id.starts_with("client-"));
        assert_eq!(id.len(), "client-".len() + 7);
        assert!(id["client-".len()..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn start_from_teacher_is_visible_to_student_after_refresh() {
        let profile = MemoryProfile::new();
        let bus = LocalBus::new();
        let now = Instant::now();
        let mut teacher = open(&profile, &bus, "client-t", 1, now);
        let mut student = open(&profile, &bus, "client-s", 2, now);
        assert_eq!(teacher.role(), Role::Teacher);
        assert_eq!(student.role(), Role::Student);
        assert!(!student.state().started);

        let before = student.state().rounds.clone();
        assert_eq!(teacher.dispatch(Action::StartActivity, now), Outcome::Started);

        assert!(student.refresh_from_store(now));
        assert!(student.state().started);
        assert_eq!(student.state().rounds.len(), 20);
        assert_ne!(student.state().rounds, before);
        assert_eq!(student.state(), teacher.state());
    }

    #[test]
    fn pump_applies_storage_events_and_broadcasts() {
        let profile = MemoryProfile::new();
        let bus = LocalBus::new();
        let now = Instant::now();
        let mut teacher = open(&profile, &bus, "client-t", 1, now);
        let mut student = open(&profile, &bus, "client-s", 2, now);
        let mut observer = open(&profile, &bus, "client-o", 3, now);
        assert_eq!(observer.role(), Role::Observer);

        assert_eq!(teacher.switch_level(2, now), Outcome::Reset);
        teacher.dispatch(Action::StartActivity, now);
        assert!(student.pump(now));
        assert!(observer.pump(now));
        // 同じ状態が2経路で届いても2回目は変化なし
        assert!(!student.pump(now));

        let upper = student.state().current_round().unwrap().uppers[0];
        assert_eq!(student.dispatch(Action::SelectUpper(upper), now), Outcome::Selected);
        assert_eq!(student.dispatch(Action::SelectLower(upper.to_lower()), now), Outcome::Correct);

        assert!(teacher.pump(now));
        assert!(observer.pump(now));
        let seen = observer.state();
        assert_eq!(seen.score.correct, 1);
        assert_eq!(seen.matched_uppers, vec![upper]);
        assert_eq!(seen.attempts[0].upper, upper);
        assert_eq!(seen.attempts[0].level, 2);
        assert_eq!(teacher.state(), student.state());
    }

    #[test]
    fn actions_are_gated_by_role() {
        let profile = MemoryProfile::new();
        let bus = LocalBus::new();
        let now = Instant::now();
        let mut teacher = open(&profile, &bus, "client-t", 1, now);
        let mut student = open(&profile, &bus, "client-s", 2, now);
        let mut observer = open(&profile, &bus, "client-o", 3, now);

        assert_eq!(student.dispatch(Action::StartActivity, now), Outcome::Ignored);
        assert_eq!(observer.switch_level(3, now), Outcome::Ignored);
        assert_eq!(teacher.switch_level(4, now), Outcome::Ignored);
        assert!(!teacher.pump(now));

        teacher.dispatch(Action::StartActivity, now);
        student.pump(now);
        observer.pump(now);
        let upper = teacher.state().current_round().unwrap().uppers[0];
        assert_eq!(teacher.dispatch(Action::SelectUpper(upper), now), Outcome::Ignored);
        assert_eq!(observer.dispatch(Action::SelectUpper(upper), now), Outcome::Ignored);
        assert_eq!(student.dispatch(Action::SelectUpper(upper), now), Outcome::Selected);
    }

    #[test]
    fn flash_expires_across_tabs() {
        let profile = MemoryProfile::new();
        let bus = LocalBus::new();
        let now = Instant::now();
        let mut teacher = open(&profile, &bus, "client-t", 1, now);
        let mut student = open(&profile, &bus, "client-s", 2, now);
        teacher.switch_level(3, now);
        teacher.dispatch(Action::StartActivity, now);
        student.pump(now);

        let uppers = student.state().current_round().unwrap().uppers.clone();
        student.dispatch(Action::SelectUpper(uppers[0]), now);
        student.dispatch(Action::SelectLower(uppers[1].to_lower()), now);
        teacher.pump(now);
        assert_eq!(teacher.state().flash.unwrap().result, Verdict::Wrong);

        // まだ期限前
        let early = now + Duration::from_millis(400);
        assert!(!teacher.pump(early));
        assert!(!student.pump(early));

        let later = now + Duration::from_millis(950);
        assert!(teacher.pump(later));
        assert_eq!(teacher.state().flash, None);
        // 生徒側は先生が消した状態を受け取り、自分のタイマーは何もしない
        assert!(student.pump(later));
        assert_eq!(student.state().flash, None);
        assert_eq!(student.state().score.wrong, 1);
    }

    #[test]
    fn superseded_flash_timer_is_a_no_op() {
        let profile = MemoryProfile::new();
        let bus = LocalBus::new();
        let now = Instant::now();
        let mut teacher = open(&profile, &bus, "client-t", 1, now);
        let mut student = open(&profile, &bus, "client-s", 2, now);
        teacher.switch_level(3, now);
        teacher.dispatch(Action::StartActivity, now);
        student.pump(now);

        let uppers = student.state().current_round().unwrap().uppers.clone();
        student.dispatch(Action::SelectUpper(uppers[0]), now);
        student.dispatch(Action::SelectLower(uppers[1].to_lower()), now);
        teacher.pump(now);

        std::thread::sleep(Duration::from_millis(2));
        let second = now + Duration::from_millis(500);
        student.dispatch(Action::SelectUpper(uppers[2]), second);
        student.dispatch(Action::SelectLower(uppers[3].to_lower()), second);
        teacher.pump(second);
        let newer = student.state().flash.unwrap().at;

        // 最初のハイライトの期限 (900ms) を過ぎても新しいハイライトは残る
        let after_first = now + Duration::from_millis(1000);
        assert!(!teacher.pump(after_first));
        assert!(!student.pump(after_first));
        assert_eq!(student.state().flash.unwrap().at, newer);

        let after_second = second + Duration::from_millis(950);
        student.pump(after_second);
        teacher.pump(after_second);
        assert_eq!(student.state().flash, None);
        assert_eq!(teacher.state().flash, None);
    }

    #[test]
    fn malformed_stored_state_falls_back_to_fresh_state() {
        let profile = MemoryProfile::new();
        let bus = LocalBus::new();
        profile.open_tab().set(ROOM_STATE_KEY, "{ broken").unwrap();

        let tab = open(&profile, &bus, "client-t", 1, Instant::now());
        assert_eq!(tab.state().phase(), Phase::Idle);
        assert_eq!(tab.state().level.number, 1);
        let stored = profile.open_tab().get(ROOM_STATE_KEY).unwrap().unwrap();
        assert!(serde_json::from_str::<GameState>(&stored).is_ok());
    }

    #[test]
    fn stored_state_with_impossible_level_falls_back_to_fresh_state() {
        let fresh = GameState::new(Variant::Classroom.first_level(), &Rules::default(), &mut StdRng::seed_from_u64(4));
        let json = serde_json::to_value(&fresh).unwrap();
        let levels = [
            serde_json::json!({ "number": 1, "shape": { "shape": "pairs", "size": 40 } }),
            serde_json::json!(9),
        ];

        for level in levels {
            let mut raw = json.clone();
            raw["level"] = level;
            let raw = raw.to_string();
            let profile = MemoryProfile::new();
            let bus = LocalBus::new();
            profile.open_tab().set(ROOM_STATE_KEY, &raw).unwrap();

            let tab = open(&profile, &bus, "client-t", 1, Instant::now());
            assert_eq!(tab.state().level, Variant::Classroom.first_level());
            assert!(tab.state().level.pairs() <= 26);
            assert!(tab.state().is_consistent());
        }
    }

    #[test]
    fn inconsistent_state_from_other_tab_is_not_adopted() {
        let profile = MemoryProfile::new();
        let bus = LocalBus::new();
        let now = Instant::now();
        let mut teacher = open(&profile, &bus, "client-t", 1, now);
        let mut student = open(&profile, &bus, "client-s", 2, now);

        // レベル3 (9ペア) なのにラウンドは1文字ずつ
        let mut broken = teacher.state().clone();
        broken.level = Variant::Classroom.level(3, None).unwrap();
        profile.open_tab().set(ROOM_STATE_KEY, &serde_json::to_string(&broken).unwrap()).unwrap();
        bus.open(CHANNEL_NAME).post(&RoomMessage::RoomState(broken)).unwrap();

        assert!(!student.pump(now));
        assert_eq!(student.state().level.number, 1);
        assert!(!teacher.pump(now));
    }

    #[test]
    fn own_write_wins_over_updates_received_before_it() {
        let profile = MemoryProfile::new();
        let bus = LocalBus::new();
        let now = Instant::now();
        let mut teacher = open(&profile, &bus, "client-t", 1, now);
        let mut student = open(&profile, &bus, "client-s", 2, now);
        teacher.switch_level(3, now);
        teacher.dispatch(Action::StartActivity, now);
        student.pump(now);

        let uppers = student.state().current_round().unwrap().uppers.clone();
        student.dispatch(Action::SelectUpper(uppers[0]), now);
        student.dispatch(Action::SelectLower(uppers[1].to_lower()), now);
        teacher.pump(now);

        // 先生側でハイライトが消えた直後、生徒は受信前に次の文字を選ぶ
        let later = now + Duration::from_millis(950);
        assert!(teacher.pump(later));
        assert_eq!(student.dispatch(Action::SelectUpper(uppers[2]), later), Outcome::Selected);
        student.pump(later);

        assert_eq!(student.state().selected_upper, Some(uppers[2]));
        let stored = load_state(&profile.open_tab()).unwrap();
        assert_eq!(&stored, student.state());
        assert_eq!(student.dispatch(Action::SelectLower(uppers[2].to_lower()), later), Outcome::Correct);

        assert!(teacher.pump(later));
        assert_eq!(teacher.state(), student.state());
        assert_eq!(teacher.state().score.correct, 1);
    }

    #[test]
    fn tabs_in_separate_processes_sync_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let now = Instant::now();
        let join = |id: &str, seed: u64| {
            RoomClient::join(
                FileStore::open(dir.path()).unwrap(),
                FileChannel::open(dir.path(), CHANNEL_NAME, id).unwrap(),
                id.to_string(),
                &Settings::default(),
                StdRng::seed_from_u64(seed),
                now,
            )
            .unwrap()
        };
        let mut teacher = join("client-t", 1);
        let mut student = join("client-s", 2);
        assert_eq!(teacher.role(), Role::Teacher);
        assert_eq!(student.role(), Role::Student);

        teacher.switch_level(2, now);
        teacher.dispatch(Action::StartActivity, now);
        assert!(student.pump(now));
        assert_eq!(student.state(), teacher.state());

        let uppers = student.state().current_round().unwrap().uppers.clone();
        student.dispatch(Action::SelectUpper(uppers[0]), now);
        student.dispatch(Action::SelectLower(uppers[1].to_lower()), now);
        assert!(teacher.pump(now));
        assert_eq!(teacher.state().score.wrong, 1);

        // 先生のタイマーでハイライトが消えた後、生徒が受信前に操作しても生徒の書き込みが残る
        let later = now + Duration::from_millis(950);
        assert!(teacher.pump(later));
        assert_eq!(student.dispatch(Action::SelectUpper(uppers[2]), later), Outcome::Selected);
        student.pump(later);
        assert_eq!(student.state().selected_upper, Some(uppers[2]));
        assert_eq!(student.dispatch(Action::SelectLower(uppers[2].to_lower()), later), Outcome::Correct);

        assert!(teacher.pump(later));
        assert_eq!(teacher.state(), student.state());
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(load_state(&reopened).as_ref(), Some(student.state()));
    }
}
