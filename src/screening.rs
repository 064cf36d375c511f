//! 検査手順（上昇法）
//!
//! アンケートの回答を集めた後、左耳・右耳の順に標準周波数ごとの閾値を測定する。
//! 各周波数では連続トーンを開始音量で鳴らし、応答がなければ再生を止めずに
//! 音量を一段ずつ上げる。最大音量でも応答がなければ「聞こえず」(1.0) を記録する。

use crate::config::TestConfig;
use crate::questionnaire::{Question, QUESTIONS};
use crate::recorder::ThresholdRecorder;
use crate::scoring;
use crate::synth::clamp_volume;
use crate::tone_generator::ToneGenerator;
use crate::types::{HearingTestResult, TestedEar, TEST_FREQUENCIES};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// 被検者からの応答
#[async_trait]
pub trait Responder: Send {
    /// 設問に回答する（選択肢のインデックス）
    async fn answer(&mut self, question: &Question) -> Result<usize>;

    /// `window` の間に「聞こえた」応答があったか
    async fn heard_within(&mut self, window: Duration) -> Result<bool>;

    /// トーン開始前に溜まっている応答を捨てる（捨てた件数を返す）
    ///
    /// 前の周波数での押し過ぎなど、提示前の応答を次の測定に持ち越さない。
    async fn discard_pending(&mut self) -> Result<usize> {
        Ok(0)
    }
}

/// 音量掃引のパラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepParams {
    pub start_volume: f64,
    pub volume_step: f64,
    pub step_interval: Duration,
}

impl From<&TestConfig> for SweepParams {
    fn from(config: &TestConfig) -> Self {
        Self {
            start_volume: config.start_volume,
            volume_step: config.volume_step,
            step_interval: Duration::from_millis(config.step_interval_ms),
        }
    }
}

impl Default for SweepParams {
    fn default() -> Self {
        Self::from(&TestConfig::default())
    }
}

/// 1つの耳・周波数の閾値を測定
///
/// 応答があった時点の音量を返す。最大音量でも応答がなければ `None`。
/// エラーで中断した場合も含め、戻る前に必ずトーンを止める。
pub async fn measure_threshold<R: Responder + ?Sized>(
    generator: &mut ToneGenerator,
    responder: &mut R,
    ear: TestedEar,
    frequency: u32,
    params: SweepParams,
) -> Result<Option<f64>> {
    let outcome = sweep(generator, responder, ear, frequency, params).await;
    generator.stop_tone();
    outcome
}

async fn sweep<R: Responder + ?Sized>(
    generator: &mut ToneGenerator,
    responder: &mut R,
    ear: TestedEar,
    frequency: u32,
    params: SweepParams,
) -> Result<Option<f64>> {
    if params.volume_step <= 0.0 {
        anyhow::bail!("音量ステップは正の値が必要です: {}", params.volume_step);
    }

    let discarded = responder.discard_pending().await?;
    if discarded > 0 {
        log::debug!("{} {}Hz: トーン提示前の応答 {} 件を破棄", ear, frequency, discarded);
    }

    let mut volume = clamp_volume(params.start_volume);
    generator
        .start_looping_tone(frequency as f64, volume, ear.into())
        .with_context(|| format!("トーンを開始できません: {}Hz", frequency))?;

    loop {
        if responder.heard_within(params.step_interval).await? {
            log::info!("{} {}Hz: 音量 {:.3} で応答あり", ear, frequency, volume);
            return Ok(Some(volume));
        }
        if volume >= 1.0 {
            log::info!("{} {}Hz: 最大音量でも応答なし", ear, frequency);
            return Ok(None);
        }
        volume = (volume + params.volume_step).min(1.0);
        generator.set_volume(volume);
    }
}

/// 検査全体を実行して結果を生成
pub async fn run_screening<R: Responder + ?Sized>(
    generator: &mut ToneGenerator,
    responder: &mut R,
    params: SweepParams,
) -> Result<HearingTestResult> {
    let mut answers = Vec::with_capacity(QUESTIONS.len());
    for question in QUESTIONS.iter() {
        let answer = responder.answer(question).await?;
        if !question.is_valid_answer(answer) {
            anyhow::bail!("設問 {} の回答が範囲外です: {}", question.id, answer);
        }
        answers.push(answer);
    }

    let mut recorder = ThresholdRecorder::new();
    for ear in TestedEar::ALL {
        log::info!("{} 耳の測定を開始します", ear);
        for frequency in TEST_FREQUENCIES {
            match measure_threshold(generator, responder, ear, frequency, params).await? {
                Some(threshold) => recorder.record(ear, frequency, threshold)?,
                None => recorder.record_not_heard(ear, frequency)?,
            }
        }
    }

    let (left, right) = recorder.finish()?;
    let result = scoring::evaluate(&answers, &left, &right)?;
    Ok(result)
}

/// 停止フラグの確認間隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 溜まった入力を捨てる際、次の行を待つ時間
const DRAIN_WINDOW: Duration = Duration::from_millis(20);

/// コンソールでの応答
///
/// 設問には番号を入力し、トーンが聞こえたら Enter を押す。
/// Ctrl+C で `running` が下ろされると、待機中の操作はエラーで戻る。
pub struct ConsoleResponder {
    lines: Lines<BufReader<Stdin>>,
    running: Arc<AtomicBool>,
}

impl ConsoleResponder {
    pub fn new(running: Arc<AtomicBool>) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            running,
        }
    }

    fn check_running(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            anyhow::bail!("検査が中断されました");
        }
        Ok(())
    }

    /// 1行読む（停止フラグを監視しながら待つ）
    async fn read_line(&mut self) -> Result<String> {
        loop {
            self.check_running()?;
            tokio::select! {
                line = self.lines.next_line() => {
                    return line
                        .context("標準入力の読み込みに失敗")?
                        .context("標準入力が閉じられました");
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

#[async_trait]
impl Responder for ConsoleResponder {
    async fn answer(&mut self, question: &Question) -> Result<usize> {
        println!();
        println!("{}", question.question);
        for (i, option) in question.options.iter().enumerate() {
            println!("  {}) {}", i + 1, option);
        }

        loop {
            let line = self.read_line().await?;
            match line.trim().parse::<usize>() {
                Ok(n) if n >= 1 && question.is_valid_answer(n - 1) => return Ok(n - 1),
                _ => println!("1 ~ {} の番号を入力してください", question.options.len()),
            }
        }
    }

    async fn heard_within(&mut self, window: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            self.check_running()?;
            tokio::select! {
                line = self.lines.next_line() => {
                    line.context("標準入力の読み込みに失敗")?
                        .context("標準入力が閉じられました")?;
                    return Ok(true);
                }
                _ = tokio::time::sleep_until(deadline) => return Ok(false),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn discard_pending(&mut self) -> Result<usize> {
        let mut discarded = 0;
        while let Ok(line) = tokio::time::timeout(DRAIN_WINDOW, self.lines.next_line()).await {
            line.context("標準入力の読み込みに失敗")?
                .context("標準入力が閉じられました")?;
            discarded += 1;
        }
        Ok(discarded)
    }
}
