// ============================================
// src/lib.rs
// Find my little brother: 大文字と小文字のマッチング教材
// ============================================

//! 教室版 (先生 + 生徒の同期)、一人練習アリーナ、簡易版の3つで共通のロジック。

pub mod arena;
pub mod audio;
pub mod channel;
pub mod config;
pub mod errors;
pub mod game;
pub mod letters;
pub mod room;
pub mod rounds;
pub mod simple;
pub mod store;
pub mod timer;
pub mod ui;
