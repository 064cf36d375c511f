//! hearing-screen - セルフチェック型の純音聴力スクリーニング
//!
//! 左右の耳に純音を提示して各周波数の閾値（聞こえ始めた音量）を測定し、
//! 自己評価アンケートと組み合わせて聴力の総合判定を行う。
//!
//! # 主な機能
//!
//! - **トーン生成**: 低域の音量補正・左右パン・クリックのない音量変更
//! - **閾値測定**: 上昇法による耳・周波数ごとの閾値記録
//! - **採点**: 割合スコア、4段階の総合判定、推奨事項とヒント
//! - **結果の受け渡し**: 顧客情報付きJSONをファイルまたは標準出力へ
//! - **WAV書き出し**: 検査音をオフライン描画して保存
//!
//! # アーキテクチャ
//!
//! ```text
//! [Questionnaire] ──→ answers ─────────────────────┐
//!                                                  ↓
//! [Screening] → [ToneGenerator] → [AudioContext] → [Scoring] → [HearingTestResult]
//!      │              │                 │                              │
//!      ↓              ↓                 ↓                              ↓
//! [ThresholdRecorder] [ToneGraph]   [cpal / offline]            [ReportSink]
//! ```
//!
//! # 使用例
//!
//! ```
//! use hearing_screen::scoring::evaluate;
//! use hearing_screen::types::{ThresholdSample, TEST_FREQUENCIES};
//!
//! let ear: Vec<ThresholdSample> = TEST_FREQUENCIES
//!     .iter()
//!     .map(|&f| ThresholdSample::new(f, 0.1))
//!     .collect();
//! let result = evaluate(&[0; 7], &ear, &ear).unwrap();
//! assert_eq!(result.overall_assessment.as_str(), "normal");
//! ```

pub mod audio_output;
pub mod config;
pub mod questionnaire;
pub mod recorder;
pub mod report;
pub mod scoring;
pub mod screening;
pub mod synth;
pub mod tone_generator;
pub mod types;
pub mod wav_writer;
