// ============================================
// src/store.rs
// プロファイル単位のキー・バリュー保存領域
// (ブラウザの localStorage に相当する)
// ============================================

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bincode::config::standard;
use bincode::{Decode, Encode};

use crate::errors::Result;

const STORE_FILE_BIN: &str = "room_store.bin";
const STORE_FILE_JSON: &str = "room_store.json"; // デバッグ用

/// 他のハンドルが値を書き換えたときの通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// 削除された場合は None
    pub new_value: Option<String>,
}

/// 保存領域への読み書き
///
/// 書き込みは他のハンドルにだけ `StorageEvent` として届く (自分には届かない)。
pub trait Store {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
    /// 前回の呼び出し以降に他のハンドルが行った変更
    fn poll_events(&mut self) -> Result<Vec<StorageEvent>>;
}

// --------------------------------------------------
// メモリ上のプロファイル (テストや同一プロセス内の複数タブ用)
// --------------------------------------------------

#[derive(Debug, Default)]
struct ProfileInner {
    values: HashMap<String, String>,
    next_tab: usize,
    queues: HashMap<usize, VecDeque<StorageEvent>>,
}

impl ProfileInner {
    /// 自分の書き込みより前に届いていた同じキーの通知を捨てる
    fn discard_pending(&mut self, tab: usize, key: &str) {
        if let Some(queue) = self.queues.get_mut(&tab) {
            queue.retain(|event| event.key != key);
        }
    }

    fn notify_others(&mut self, origin: usize, event: StorageEvent) {
        for (tab, queue) in self.queues.iter_mut() {
            if *tab != origin {
                queue.push_back(event.clone());
            }
        }
    }
}

/// 1つのブラウザプロファイルに相当する共有領域
#[derive(Debug, Clone, Default)]
pub struct MemoryProfile {
    inner: Rc<RefCell<ProfileInner>>,
}

impl MemoryProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新しいタブ用のハンドルを開く
    pub fn open_tab(&self) -> MemoryStore {
        let mut inner = self.inner.borrow_mut();
        let tab = inner.next_tab;
        inner.next_tab += 1;
        inner.queues.insert(tab, VecDeque::new());
        MemoryStore {
            profile: self.clone(),
            tab,
        }
    }
}

/// `MemoryProfile` のタブ1つ分のハンドル
#[derive(Debug)]
pub struct MemoryStore {
    profile: MemoryProfile,
    tab: usize,
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.profile.inner.borrow().values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.profile.inner.borrow_mut();
        inner.discard_pending(self.tab, key);
        let previous = inner.values.insert(key.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            inner.notify_others(
                self.tab,
                StorageEvent {
                    key: key.to_string(),
                    new_value: Some(value.to_string()),
                },
            );
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let mut inner = self.profile.inner.borrow_mut();
        inner.discard_pending(self.tab, key);
        if inner.values.remove(key).is_some() {
            inner.notify_others(
                self.tab,
                StorageEvent {
                    key: key.to_string(),
                    new_value: None,
                },
            );
        }
        Ok(())
    }

    fn poll_events(&mut self) -> Result<Vec<StorageEvent>> {
        let mut inner = self.profile.inner.borrow_mut();
        Ok(inner
            .queues
            .get_mut(&self.tab)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        // 閉じたタブにはもう通知しない
        if let Ok(mut inner) = self.profile.inner.try_borrow_mut() {
            inner.queues.remove(&self.tab);
        }
    }
}

// --------------------------------------------------
// ファイル保存 (別プロセスのタブ同士で共有)
// --------------------------------------------------

/// bincode 用の内部表現
#[derive(Encode, Decode)]
struct StoreFileBin {
    entries: Vec<(String, String)>,
}

fn decode_entries(bytes: &[u8]) -> Result<BTreeMap<String, String>> {
    let (bin, _): (StoreFileBin, usize) = bincode::decode_from_slice(bytes, standard())?;
    Ok(bin.entries.into_iter().collect())
}

/// データディレクトリに置くキー・バリューファイル
///
/// 毎回ファイルを読み直して書き込む (read-modify-write)。ロックはしないので最後に書いた方が勝つ。
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// 最後に読んだ (または書いた) 内容
    snapshot: BTreeMap<String, String>,
    /// 最後に見たファイルの中身
    last_raw: Option<Vec<u8>>,
    /// `set` の前に見つけた他プロセスの変更
    pending: Vec<StorageEvent>,
}

impl FileStore {
    /// ディレクトリを開く (無ければ作成する)
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut store = Self {
            dir,
            snapshot: BTreeMap::new(),
            last_raw: None,
            pending: Vec::new(),
        };
        let (raw, values) = store.read_disk();
        store.last_raw = raw;
        store.snapshot = values;
        Ok(store)
    }

    fn bin_path(&self) -> PathBuf {
        self.dir.join(STORE_FILE_BIN)
    }

    fn json_path(&self) -> PathBuf {
        self.dir.join(STORE_FILE_JSON)
    }

    /// MARK:ファイルから読み込む (バイナリ優先、JSONフォールバック)
    fn read_disk(&self) -> (Option<Vec<u8>>, BTreeMap<String, String>) {
        let raw = fs::read(self.bin_path()).ok();

        if let Some(bytes) = &raw {
            match decode_entries(bytes) {
                Ok(values) => return (raw.clone(), values),
                Err(e) => tracing::warn!(
                    path = %self.bin_path().display(),
                    error = %e,
                    "store file is corrupt, trying JSON mirror"
                ),
            }
        }

        if let Ok(text) = fs::read_to_string(self.json_path()) {
            if let Ok(values) = serde_json::from_str::<BTreeMap<String, String>>(&text) {
                return (raw, values);
            }
        }

        (raw, BTreeMap::new())
    }

    /// ディスクの内容が変わっていれば snapshot を更新し、差分を pending に積む
    fn refresh(&mut self) {
        let (raw, values) = self.read_disk();
        if raw == self.last_raw {
            return;
        }
        let keys: Vec<&String> = self.snapshot.keys().chain(values.keys()).collect();
        for key in keys {
            let old = self.snapshot.get(key);
            let new = values.get(key);
            if old != new && !self.pending.iter().any(|e| &e.key == key && e.new_value.as_ref() == new) {
                self.pending.push(StorageEvent {
                    key: key.clone(),
                    new_value: new.cloned(),
                });
            }
        }
        self.last_raw = raw;
        self.snapshot = values;
    }

    /// MARK:ファイルに保存する (バイナリ + JSON)
    fn write_disk(&mut self) -> Result<()> {
        let bin = StoreFileBin {
            entries: self.snapshot.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let encoded = bincode::encode_to_vec(&bin, standard())?;

        // 読み手が書きかけのファイルを見ないように一時ファイルから rename する
        let tmp = self.dir.join(format!("{STORE_FILE_BIN}.tmp"));
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(&encoded)?;
            writer.flush()?;
        }
        fs::rename(&tmp, self.bin_path())?;
        self.last_raw = Some(encoded);

        if let Ok(json) = serde_json::to_string_pretty(&self.snapshot) {
            let _ = fs::write(self.json_path(), json);
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let (_, values) = self.read_disk();
        Ok(values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.refresh();
        self.pending.retain(|event| event.key != key);
        self.snapshot.insert(key.to_string(), value.to_string());
        self.write_disk()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.refresh();
        self.pending.retain(|event| event.key != key);
        if self.snapshot.remove(key).is_some() {
            self.write_disk()?;
        }
        Ok(())
    }

    fn poll_events(&mut self) -> Result<Vec<StorageEvent>> {
        self.refresh();
        Ok(std::mem::take(&mut self.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_tabs_share_values_and_notify_only_others() {
        let profile = MemoryProfile::new();
        let mut teacher = profile.open_tab();
        let mut student = profile.open_tab();

        teacher.set("k", "1").unwrap();
        assert_eq!(student.get("k").unwrap().as_deref(), Some("1"));
        assert!(teacher.poll_events().unwrap().is_empty());
        assert_eq!(
            student.poll_events().unwrap(),
            vec![StorageEvent {
                key: "k".into(),
                new_value: Some("1".into())
            }]
        );

        // 同じ値の書き込みは通知しない
        teacher.set("k", "1").unwrap();
        assert!(student.poll_events().unwrap().is_empty());

        student.remove("k").unwrap();
        assert_eq!(teacher.poll_events().unwrap()[0].new_value, None);
        assert_eq!(teacher.get("k").unwrap(), None);
    }

    #[test]
    fn file_store_round_trips_and_detects_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = FileStore::open(dir.path()).unwrap();
        let mut b = FileStore::open(dir.path()).unwrap();

        a.set("state", "{\"level\":1}").unwrap();
        assert!(a.poll_events().unwrap().is_empty());
        assert_eq!(b.get("state").unwrap().as_deref(), Some("{\"level\":1}"));

        let events = b.poll_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "state");
        assert!(b.poll_events().unwrap().is_empty());

        // b の書き込みは a の別キーを消さない
        b.set("roles", "{}").unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert!(reopened.get("state").unwrap().is_some());
        assert!(reopened.get("roles").unwrap().is_some());
        assert!(dir.path().join(STORE_FILE_JSON).exists());
    }

    #[test]
    fn corrupt_binary_falls_back_to_json_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.set("k", "v").unwrap();
        fs::write(dir.path().join(STORE_FILE_BIN), b"\xff\xff\xff").unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
        assert!(matches!(decode_entries(b"\xff\xff\xff"), Err(crate::errors::Error::Decode(_))));
    }

    #[test]
    fn own_write_drops_older_events_for_the_same_key() {
        let profile = MemoryProfile::new();
        let mut teacher = profile.open_tab();
        let mut student = profile.open_tab();

        teacher.set("state", "old").unwrap();
        teacher.set("roles", "{}").unwrap();
        // 生徒は通知を読む前に自分で書き込む
        student.set("state", "new").unwrap();

        let events = student.poll_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "roles");
        assert_eq!(student.get("state").unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn file_store_own_write_drops_older_events_for_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = FileStore::open(dir.path()).unwrap();
        let mut b = FileStore::open(dir.path()).unwrap();

        a.set("state", "old").unwrap();
        a.set("roles", "{}").unwrap();
        b.set("state", "new").unwrap();

        let events = b.poll_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "roles");
        assert_eq!(a.poll_events().unwrap()[0].new_value.as_deref(), Some("new"));
    }
}
