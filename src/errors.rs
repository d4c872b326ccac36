// ============================================
// src/errors.rs
// エラー型
// ============================================

/// このアプリの Result
pub type Result<T> = std::result::Result<T, Error>;

/// 保存・同期・起動時に起こりうるエラー
///
/// ゲームの操作自体はエラーにならない (間違いはスコアの wrong として数えるだけ)。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ファイル操作に失敗しました: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON の読み書きに失敗しました: {0}")]
    Json(#[from] serde_json::Error),

    #[error("セーブデータの書き込みに失敗しました: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("セーブデータの読み込みに失敗しました: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("入力プロンプトでエラーが発生しました: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("設定が不正です: {message}")]
    Config { message: String },
}
