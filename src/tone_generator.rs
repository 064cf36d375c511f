//! 聴力検査用トーンジェネレーター
//!
//! 常に高々1つの合成グラフだけを所有する。新しいトーンを開始すると、
//! 前のグラフを同期的に破棄してから新しいグラフを構築する。
//!
//! # 状態遷移
//!
//! ```text
//!            start_looping_tone / play_tone
//!   ┌──────┐ ──────────────────────────────→ ┌─────────────────┐
//!   │ Idle │                                 │ Playing(handle) │
//!   └──────┘ ←────────────────────────────── └─────────────────┘
//!        ↑    stop_tone / 再生時間経過 / cleanup     │
//!        └───────────────────────────────────────────┘
//!             （再開始時も必ず Idle を経由する）
//! ```

use crate::audio_output::{AudioContext, Destination, GraphId};
use crate::config::AudioConfig;
use crate::synth::{clamp_volume, compensated_gain, ToneGraph, MIN_RAMP_GAIN, VOLUME_RAMP_SECONDS};
use crate::types::Ear;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// トーン再生要求のエラー
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToneError {
    #[error("周波数が不正です: {0} Hz")]
    InvalidFrequency(f64),

    #[error("周波数 {frequency} Hz はナイキスト周波数 ({nyquist} Hz) 以上です")]
    AboveNyquist { frequency: f64, nyquist: f64 },

    #[error("再生時間のタイマーに必要な tokio ランタイムがありません")]
    NoRuntime,
}

/// 出力環境の有無
///
/// 構築時に一度だけ判定し、以降の再生操作はこれで分岐する。
pub enum AudioCapability {
    Available(AudioContext),
    Unavailable,
    /// `cleanup` 後。再び開くことはない
    Closed,
}

/// 再生中のグラフへのハンドル
struct ActiveTone {
    graph: GraphId,
    destination: Destination,
    completion: Option<oneshot::Sender<()>>,
}

impl ActiveTone {
    /// グラフを切断して解放し、完了通知を送る
    fn teardown(mut self) {
        if let Some(mut graph) = self.destination.disconnect(self.graph) {
            // 自然に停止済みのオシレーターは無視する
            if let Err(e) = graph.stop() {
                log::debug!("オシレーター停止: {}", e);
            }
        }
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(());
        }
    }
}

enum ToneState {
    Idle,
    Playing(ActiveTone),
}

struct Session {
    state: ToneState,
    frequency: f64,
    volume: f64,
    ear: Ear,
    looping: bool,
}

impl Session {
    /// Idle へ遷移。再生中だった場合は true
    fn stop(&mut self) -> bool {
        self.looping = false;
        match std::mem::replace(&mut self.state, ToneState::Idle) {
            ToneState::Idle => false,
            ToneState::Playing(tone) => {
                tone.teardown();
                true
            }
        }
    }

    /// 再生時間経過による停止
    ///
    /// 既に手動停止された、あるいは別のトーンに置き換わっている場合は何もしない。
    fn finish_timed(&mut self, graph: GraphId) -> bool {
        match &self.state {
            ToneState::Playing(tone) if tone.graph == graph => self.stop(),
            _ => false,
        }
    }

    fn playing_graph(&self) -> Option<GraphId> {
        match &self.state {
            ToneState::Playing(tone) => Some(tone.graph),
            ToneState::Idle => None,
        }
    }
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

/// `play_tone` の完了通知
///
/// 1回の再生につき必ず1回だけ完了する。手動停止・置き換え・`cleanup` の
/// いずれでも完了するため、待ち続けることはない。待たずに捨ててもよい。
pub struct ToneCompletion {
    rx: Option<oneshot::Receiver<()>>,
}

impl ToneCompletion {
    fn ready() -> Self {
        Self { rx: None }
    }

    fn pending(rx: oneshot::Receiver<()>) -> Self {
        Self { rx: Some(rx) }
    }
}

impl Future for ToneCompletion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(());
        };
        // 送信側が破棄された場合も完了とみなす
        if Pin::new(rx).poll(cx).is_ready() {
            self.rx = None;
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// 純音トーンジェネレーター
///
/// # Examples
///
/// ```
/// # use hearing_screen::tone_generator::ToneGenerator;
/// # use hearing_screen::audio_output::AudioContext;
/// # use hearing_screen::types::Ear;
/// let mut generator = ToneGenerator::with_context(AudioContext::offline(48000, 2));
/// generator.start_looping_tone(1000.0, 0.2, Ear::Left).unwrap();
/// assert!(generator.is_looping());
///
/// generator.set_volume(0.4);
/// generator.stop_tone();
/// generator.stop_tone(); // 冪等
/// assert_eq!(generator.connected_graphs(), 0);
/// ```
pub struct ToneGenerator {
    capability: AudioCapability,
    session: Arc<Mutex<Session>>,
}

impl ToneGenerator {
    /// 設定に従って出力デバイスを開く
    ///
    /// 失敗しても構築はエラーにせず、無音モード (`Unavailable`) で続行する。
    pub fn new(config: &AudioConfig) -> Self {
        if !config.enabled {
            log::info!("音声出力は設定で無効化されています");
            return Self::unavailable();
        }

        match AudioContext::open(config.device_name.as_deref()) {
            Ok(context) => Self::with_context(context),
            Err(e) => {
                log::warn!("音声出力を利用できません。無音で続行します: {:#}", e);
                Self::unavailable()
            }
        }
    }

    /// 既存のコンテキストを使用
    pub fn with_context(context: AudioContext) -> Self {
        Self::from_capability(AudioCapability::Available(context))
    }

    /// 出力なし（全再生操作が無音の no-op）
    pub fn unavailable() -> Self {
        Self::from_capability(AudioCapability::Unavailable)
    }

    fn from_capability(capability: AudioCapability) -> Self {
        Self {
            capability,
            session: Arc::new(Mutex::new(Session {
                state: ToneState::Idle,
                frequency: 1000.0,
                volume: 0.5,
                ear: Ear::Both,
                looping: false,
            })),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock_session(&self.session)
    }

    pub fn is_available(&self) -> bool {
        matches!(self.capability, AudioCapability::Available(_))
    }

    /// `cleanup` 済みか
    pub fn is_closed(&self) -> bool {
        matches!(self.capability, AudioCapability::Closed)
    }

    pub fn context(&self) -> Option<&AudioContext> {
        match &self.capability {
            AudioCapability::Available(context) => Some(context),
            AudioCapability::Unavailable | AudioCapability::Closed => None,
        }
    }

    /// 周波数の検証
    ///
    /// 出力環境の有無にかかわらず同じ入力は同じ結果になる
    /// （ナイキスト判定のみサンプルレートが分かる場合に行う）。
    fn validate(&self, frequency: f64) -> Result<(), ToneError> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(ToneError::InvalidFrequency(frequency));
        }
        if let Some(context) = self.context() {
            let nyquist = context.sample_rate() as f64 / 2.0;
            if frequency >= nyquist {
                return Err(ToneError::AboveNyquist { frequency, nyquist });
            }
        }
        Ok(())
    }

    /// 前のグラフを破棄してから新しいグラフを構築・接続
    fn start_graph(
        &self,
        frequency: f64,
        volume: f64,
        ear: Ear,
        completion: Option<oneshot::Sender<()>>,
    ) -> Option<GraphId> {
        let context = self.context()?;
        let mut session = self.session();

        session.stop();

        let volume = clamp_volume(volume);
        let gain = compensated_gain(frequency, volume);
        let graph = ToneGraph::new(frequency, gain, ear.pan(), context.sample_rate());
        let id = context.destination().connect(graph);

        log::info!(
            "トーン開始: {}Hz, 音量={:.3} (補正後 {:.3}), 耳={}, パン={}",
            frequency,
            volume,
            gain,
            ear,
            ear.pan()
        );

        session.state = ToneState::Playing(ActiveTone {
            graph: id,
            destination: context.destination().clone(),
            completion,
        });
        session.frequency = frequency;
        session.volume = volume;
        session.ear = ear;

        Some(id)
    }

    /// 連続トーンを開始
    ///
    /// `stop_tone` が呼ばれるまで鳴り続ける。出力がない場合は何もしない。
    pub fn start_looping_tone(&mut self, frequency: f64, volume: f64, ear: Ear) -> Result<(), ToneError> {
        self.validate(frequency)?;
        if self.start_graph(frequency, volume, ear, None).is_some() {
            self.session().looping = true;
        }
        Ok(())
    }

    /// 指定時間だけトーンを再生
    ///
    /// 即座に戻り、`duration_ms` 経過後に自動停止する。戻り値の
    /// `ToneCompletion` を待つと停止まで待機できる。
    /// 自動停止のタイマーには tokio ランタイムが必要。
    pub fn play_tone(
        &mut self,
        frequency: f64,
        volume: f64,
        duration_ms: u64,
        ear: Ear,
    ) -> Result<ToneCompletion, ToneError> {
        self.validate(frequency)?;
        if !self.is_available() {
            return Ok(ToneCompletion::ready());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ToneError::NoRuntime)?;

        let (tx, rx) = oneshot::channel();
        let Some(graph) = self.start_graph(frequency, volume, ear, Some(tx)) else {
            return Ok(ToneCompletion::ready());
        };

        let session = Arc::clone(&self.session);
        runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
            if lock_session(&session).finish_timed(graph) {
                log::debug!("トーン自動停止: {}ms 経過", duration_ms);
            } else {
                log::debug!("自動停止タイマー: 停止対象なし");
            }
        });

        Ok(ToneCompletion::pending(rx))
    }

    /// トーンを停止（冪等）
    pub fn stop_tone(&mut self) {
        if self.session().stop() {
            log::debug!("トーン停止");
        }
    }

    /// 再生中のトーンの音量を変更
    ///
    /// 再生を止めずに 50ms の指数ランプで変化させる。
    /// 再生中でなくても音量値は保持される。
    pub fn set_volume(&mut self, volume: f64) {
        let mut session = self.session();
        session.volume = clamp_volume(volume);

        let (Some(context), Some(graph)) = (self.context(), session.playing_graph()) else {
            return;
        };

        let target = compensated_gain(session.frequency, session.volume).max(MIN_RAMP_GAIN);
        context.destination().with_graph(graph, |graph, now| {
            graph
                .gain_mut()
                .exponential_ramp_to(target, now, now + VOLUME_RAMP_SECONDS);
        });
        log::debug!("音量変更: {:.3} (補正後 {:.3})", session.volume, target);
    }

    /// 現在の音量（補正前、0.0 ~ 1.0）
    pub fn volume(&self) -> f64 {
        self.session().volume
    }

    /// 連続トーン再生中か
    pub fn is_looping(&self) -> bool {
        self.session().looping
    }

    /// 最後に再生した周波数
    pub fn frequency(&self) -> f64 {
        self.session().frequency
    }

    /// 最後に再生した耳
    pub fn ear(&self) -> Ear {
        self.session().ear
    }

    /// 再生中か
    pub fn is_playing(&self) -> bool {
        self.session().playing_graph().is_some()
    }

    /// 再生中のグラフのゲイン目標値（補正後）
    pub fn output_gain(&self) -> Option<f64> {
        let graph = self.session().playing_graph()?;
        self.context()?
            .destination()
            .with_graph(graph, |graph, _| graph.gain().target())
    }

    /// 出力に接続されているグラフ数
    pub fn connected_graphs(&self) -> usize {
        self.context()
            .map(|context| context.destination().connected_count())
            .unwrap_or(0)
    }

    /// トーンを停止し、オーディオコンテキストを解放
    ///
    /// 以降の再生操作は no-op になる。
    pub fn cleanup(&mut self) {
        self.stop_tone();
        if let AudioCapability::Available(mut context) =
            std::mem::replace(&mut self.capability, AudioCapability::Closed)
        {
            context.close();
            log::info!("オーディオコンテキストを解放しました");
        }
    }
}

impl Drop for ToneGenerator {
    fn drop(&mut self) {
        self.cleanup();
    }
}
