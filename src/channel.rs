// ============================================
// src/channel.rs
// 名前付きブロードキャストチャンネル
// (ブラウザの BroadcastChannel に相当する)
// ============================================

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::game::GameState;

/// チャンネルに流れるメッセージ
///
/// JSON では `{"type":"ROOM_STATE","payload":{...}}` になる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RoomMessage {
    #[serde(rename = "ROOM_STATE")]
    RoomState(GameState),
}

/// 送信したメッセージは自分以外の購読者に届く
pub trait Channel {
    fn post(&mut self, message: &RoomMessage) -> Result<()>;
    /// 届いているメッセージを全部受け取る
    fn drain(&mut self) -> Result<Vec<RoomMessage>>;
}

// --------------------------------------------------
// 同一プロセス内のバス
// --------------------------------------------------

#[derive(Debug, Default)]
struct BusInner {
    next_id: usize,
    /// チャンネル名 -> (購読者ID -> 受信キュー)
    subscribers: HashMap<String, HashMap<usize, VecDeque<RoomMessage>>>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    inner: Rc<RefCell<BusInner>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, name: &str) -> LocalChannel {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .subscribers
            .entry(name.to_string())
            .or_default()
            .insert(id, VecDeque::new());
        LocalChannel {
            bus: self.clone(),
            name: name.to_string(),
            id,
        }
    }
}

#[derive(Debug)]
pub struct LocalChannel {
    bus: LocalBus,
    name: String,
    id: usize,
}

impl Channel for LocalChannel {
    fn post(&mut self, message: &RoomMessage) -> Result<()> {
        let mut inner = self.bus.inner.borrow_mut();
        if let Some(subscribers) = inner.subscribers.get_mut(&self.name) {
            for (id, queue) in subscribers.iter_mut() {
                if *id != self.id {
                    queue.push_back(message.clone());
                }
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<Vec<RoomMessage>> {
        let mut inner = self.bus.inner.borrow_mut();
        Ok(inner
            .subscribers
            .get_mut(&self.name)
            .and_then(|subs| subs.get_mut(&self.id))
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.bus.inner.try_borrow_mut() {
            if let Some(subs) = inner.subscribers.get_mut(&self.name) {
                subs.remove(&self.id);
            }
        }
    }
}

// --------------------------------------------------
// ファイル経由 (別プロセス間)
// --------------------------------------------------

/// ファイルに保存する1通分
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    seq: u64,
    sender: String,
    message: RoomMessage,
}

/// 最新の1通だけをファイルに置くチャンネル
///
/// ペイロードは常に状態全体なので、古いメッセージを取りこぼしても問題ない。
#[derive(Debug)]
pub struct FileChannel {
    path: PathBuf,
    sender: String,
    last_seen: u64,
}

impl FileChannel {
    /// `dir/<name>.channel.json` を開く。開く前のメッセージは受け取らない
    pub fn open(dir: impl Into<PathBuf>, name: &str, sender: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut channel = Self {
            path: dir.join(format!("{name}.channel.json")),
            sender: sender.to_string(),
            last_seen: 0,
        };
        channel.last_seen = channel.read_frame().map(|f| f.seq).unwrap_or(0);
        Ok(channel)
    }

    fn read_frame(&self) -> Option<Frame> {
        let text = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }
}

impl Channel for FileChannel {
    fn post(&mut self, message: &RoomMessage) -> Result<()> {
        let seq = self.read_frame().map(|f| f.seq).unwrap_or(0).max(self.last_seen) + 1;
        let frame = Frame {
            seq,
            sender: self.sender.clone(),
            message: message.clone(),
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&frame)?)?;
        fs::rename(&tmp, &self.path)?;
        self.last_seen = seq;
        Ok(())
    }

    fn drain(&mut self) -> Result<Vec<RoomMessage>> {
        let Some(frame) = self.read_frame() else {
            return Ok(Vec::new());
        };
        if frame.seq == self.last_seen {
            return Ok(Vec::new());
        }
        self.last_seen = frame.seq;
        if frame.sender == self.sender {
            return Ok(Vec::new());
        }
        Ok(vec![frame.message])
    }
}
