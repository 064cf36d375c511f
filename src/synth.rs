//! 純音合成グラフ
//!
//! オシレーター → ゲイン → ステレオパン の1系統を表現する。
//! 出力先 (`audio_output::Destination`) に接続されたグラフが
//! オーディオコールバックからフレーム単位で読み出される。

use std::f64::consts::{FRAC_PI_2, TAU};
use thiserror::Error;

/// 指数ランプの下限ゲイン
///
/// 指数ランプは 0 に向かって定義できないため、目標値をこれ以上に保つ。
pub const MIN_RAMP_GAIN: f64 = 0.001;

/// 音量変更時のランプ時間（秒）
pub const VOLUME_RAMP_SECONDS: f64 = 0.05;

/// 低域のラウドネス補正倍率
///
/// 同じ電気的振幅でも 250Hz 以下では知覚音量が大きく下がるため、
/// 周波数帯ごとにゲインを持ち上げる。
///
/// | 周波数 | 倍率 |
/// |---|---|
/// | < 50 Hz | 4.0 |
/// | 50 ~ 99 Hz | 3.0 |
/// | 100 ~ 250 Hz | 2.0 |
/// | > 250 Hz | 1.0 |
pub fn loudness_multiplier(frequency: f64) -> f64 {
    if frequency < 50.0 {
        4.0
    } else if frequency < 100.0 {
        3.0
    } else if frequency <= 250.0 {
        2.0
    } else {
        1.0
    }
}

/// 補正後のゲインを計算
///
/// 音量を [0, 1] にクランプしてから補正倍率を掛け、再度 1.0 でクランプする。
/// 再生開始時と音量変更時の両方でこの関数を使う。
///
/// # Examples
///
/// ```
/// # use hearing_screen::synth::compensated_gain;
/// assert_eq!(compensated_gain(1000.0, 0.5), 0.5);
/// assert_eq!(compensated_gain(250.0, 0.3), 0.6);
/// assert_eq!(compensated_gain(50.0, 0.5), 1.0);
/// ```
pub fn compensated_gain(frequency: f64, volume: f64) -> f64 {
    (clamp_volume(volume) * loudness_multiplier(frequency)).min(1.0)
}

/// 音量を [0, 1] にクランプ（NaN は 0 とみなす）
pub fn clamp_volume(volume: f64) -> f64 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// グラフノードのエラー
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("オシレーターは既に停止しています")]
    AlreadyStopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OscillatorState {
    Running,
    Stopped,
}

/// 正弦波オシレーター
pub struct Oscillator {
    frequency: f64,
    sample_rate: f64,
    phase: f64,
    state: OscillatorState,
}

impl Oscillator {
    /// 開始済みのオシレーターを作成
    pub fn new(frequency: f64, sample_rate: u32) -> Self {
        Self {
            frequency,
            sample_rate: sample_rate as f64,
            phase: 0.0,
            state: OscillatorState::Running,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn is_running(&self) -> bool {
        self.state == OscillatorState::Running
    }

    /// 停止する
    ///
    /// 既に停止済みの場合は `NodeError::AlreadyStopped` を返す。
    pub fn stop(&mut self) -> Result<(), NodeError> {
        match self.state {
            OscillatorState::Running => {
                self.state = OscillatorState::Stopped;
                Ok(())
            }
            OscillatorState::Stopped => Err(NodeError::AlreadyStopped),
        }
    }

    /// 次のサンプルを生成（停止後は無音）
    pub fn next_sample(&mut self) -> f32 {
        if self.state == OscillatorState::Stopped {
            return 0.0;
        }
        let sample = self.phase.sin() as f32;
        self.phase += TAU * self.frequency / self.sample_rate;
        if self.phase >= TAU {
            self.phase -= TAU;
        }
        sample
    }
}

#[derive(Clone, Copy, Debug)]
struct Ramp {
    start_value: f64,
    start_time: f64,
    end_value: f64,
    end_time: f64,
}

/// ゲインパラメータ（自動化付き）
///
/// 即時設定と指数ランプのみをサポートする。
pub struct GainParam {
    value: f64,
    ramp: Option<Ramp>,
}

impl GainParam {
    pub fn new(value: f64) -> Self {
        Self { value, ramp: None }
    }

    /// 値を即時に設定（進行中のランプは破棄）
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
        self.ramp = None;
    }

    /// 現在時刻から `end_time` までの指数ランプを予約
    ///
    /// 始点は `now` 時点の値。始点と終点はどちらも `MIN_RAMP_GAIN` 以上に
    /// 持ち上げるので、0 を含むランプでも値は途切れず変化する。
    pub fn exponential_ramp_to(&mut self, target: f64, now: f64, end_time: f64) {
        let start_value = self.value_at(now).max(MIN_RAMP_GAIN);
        let end_value = target.max(MIN_RAMP_GAIN);
        self.value = end_value;
        self.ramp = Some(Ramp {
            start_value,
            start_time: now,
            end_value,
            end_time: end_time.max(now),
        });
    }

    /// 指定時刻の値
    pub fn value_at(&self, time: f64) -> f64 {
        let Some(ramp) = self.ramp else {
            return self.value;
        };

        if time >= ramp.end_time {
            ramp.end_value
        } else if time <= ramp.start_time {
            ramp.start_value
        } else {
            let progress = (time - ramp.start_time) / (ramp.end_time - ramp.start_time);
            ramp.start_value * (ramp.end_value / ramp.start_value).powf(progress)
        }
    }

    /// ランプ完了後の最終値
    pub fn target(&self) -> f64 {
        self.value
    }
}

/// ステレオパンナー（等パワー則、モノラル入力）
pub struct StereoPanner {
    left_gain: f32,
    right_gain: f32,
    pan: f32,
}

impl StereoPanner {
    pub fn new(pan: f32) -> Self {
        let pan = pan.clamp(-1.0, 1.0);
        let x = (pan as f64 + 1.0) / 2.0;
        Self {
            left_gain: (x * FRAC_PI_2).cos() as f32,
            right_gain: (x * FRAC_PI_2).sin() as f32,
            pan,
        }
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// モノラルサンプルを左右に振り分け
    pub fn process(&self, sample: f32) -> (f32, f32) {
        (sample * self.left_gain, sample * self.right_gain)
    }
}

/// 1系統の純音合成グラフ
pub struct ToneGraph {
    oscillator: Oscillator,
    gain: GainParam,
    panner: StereoPanner,
}

impl ToneGraph {
    /// グラフを構築して発音を開始
    pub fn new(frequency: f64, gain: f64, pan: f32, sample_rate: u32) -> Self {
        Self {
            oscillator: Oscillator::new(frequency, sample_rate),
            gain: GainParam::new(gain),
            panner: StereoPanner::new(pan),
        }
    }

    pub fn frequency(&self) -> f64 {
        self.oscillator.frequency()
    }

    pub fn pan(&self) -> f32 {
        self.panner.pan()
    }

    pub fn gain(&self) -> &GainParam {
        &self.gain
    }

    pub fn gain_mut(&mut self) -> &mut GainParam {
        &mut self.gain
    }

    pub fn is_running(&self) -> bool {
        self.oscillator.is_running()
    }

    /// オシレーターを停止
    pub fn stop(&mut self) -> Result<(), NodeError> {
        self.oscillator.stop()
    }

    /// 1フレーム（左右）を生成
    pub fn next_frame(&mut self, time: f64) -> (f32, f32) {
        let sample = self.oscillator.next_sample();
        let gain = self.gain.value_at(time) as f32;
        self.panner.process(sample * gain)
    }
}
