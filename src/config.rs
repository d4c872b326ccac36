// ============================================
// src/config.rs
// 設定ファイル (config.json) の読み込み
// ============================================

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::game::{ATTEMPT_LOG_CAP, Rules};
use crate::rounds::ROUNDS_PER_LEVEL;

const CONFIG_FILE: &str = "config.json";

/// アプリの設定。ファイルに無い項目はデフォルト値
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rounds_per_level: usize,
    /// ハイライトが消えるまで (ミリ秒)
    pub flash_ms: u64,
    /// ラウンドクリア後に次へ進むまで (ミリ秒、アリーナ版)
    pub advance_ms: u64,
    pub attempt_log_cap: usize,
    /// アリーナ版のレベル5 (カスタム) のペア数
    pub custom_pairs: Option<usize>,
    /// 保存先。None なら OS ごとのデータディレクトリ
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rounds_per_level: ROUNDS_PER_LEVEL,
            flash_ms: 900,
            advance_ms: 600,
            attempt_log_cap: ATTEMPT_LOG_CAP,
            custom_pairs: None,
            data_dir: None,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("jp", "Fukumoto0141", "LETTER_WIZ")
}

impl Settings {
    /// MARK:設定ファイルを読み込む (無ければデフォルト)
    ///
    /// 壊れている・読めない場合はエラーを返す。呼び出し側でデフォルトに戻して警告する。
    pub fn load() -> Result<Self> {
        let Some(dirs) = project_dirs() else {
            return Ok(Self::default());
        };
        Self::load_from(&dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// 値の範囲チェック
    pub fn validate(&self) -> Result<()> {
        if self.rounds_per_level == 0 {
            return Err(Error::Config {
                message: "rounds_per_level は 1 以上にしてください".into(),
            });
        }
        if let Some(n) = self.custom_pairs {
            if !(1..=26).contains(&n) {
                return Err(Error::Config {
                    message: format!("custom_pairs は 1〜26 の範囲で指定してください (指定値: {n})"),
                });
            }
        }
        Ok(())
    }

    pub fn rules(&self) -> Rules {
        Rules {
            rounds_per_level: self.rounds_per_level,
            attempt_log_cap: self.attempt_log_cap,
        }
    }

    pub fn flash_delay(&self) -> Duration {
        Duration::from_millis(self.flash_ms)
    }

    pub fn advance_delay(&self) -> Duration {
        Duration::from_millis(self.advance_ms)
    }

    /// MARK:データの保存先ディレクトリ (無ければ作成)
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        let dir = match (&self.data_dir, project_dirs()) {
            (Some(dir), _) => dir.clone(),
            (None, Some(dirs)) => dirs.data_dir().to_path_buf(),
            // 万が一取得できなかったらカレントディレクトリに
            (None, None) => PathBuf::from(".letterwiz"),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
