use crate::audio_output::AudioContext;
use crate::tone_generator::ToneGenerator;
use crate::types::Ear;
use anyhow::{Context, Result};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// 一度に描画するフレーム数
const RENDER_BLOCK_FRAMES: usize = 4096;

/// f32 サンプル (-1.0 ~ 1.0) を 16bit PCM の WAV ファイルに書き出す
pub struct WavWriter {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<fs::File>>>,
    spec: hound::WavSpec,
    frames_written: usize,
}

impl WavWriter {
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32, channels: u16) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // 親ディレクトリが存在しない場合は作成
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("出力ディレクトリの作成に失敗: {:?}", parent))?;
            }
        }

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("WAVファイルの作成に失敗: {:?}", path))?;
        log::info!("WAVファイル作成: {:?}", path);

        Ok(Self {
            path,
            writer: Some(writer),
            spec,
            frames_written: 0,
        })
    }

    /// インターリーブ形式のフレームを書き込み
    pub fn write_frames(&mut self, samples: &[f32]) -> Result<()> {
        let Some(writer) = &mut self.writer else {
            anyhow::bail!("ファイナライズ済みのWAVファイルには書き込めません");
        };

        for &sample in samples {
            let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(pcm)
                .with_context(|| "WAVファイルへのサンプル書き込みに失敗")?;
        }
        self.frames_written += samples.len() / self.spec.channels.max(1) as usize;

        Ok(())
    }

    /// ファイルを閉じる
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .with_context(|| "WAVファイルのファイナライズに失敗")?;
            log::info!(
                "WAVファイル書き込み完了: {:?}, {}フレーム ({:.2}秒)",
                self.path,
                self.frames_written,
                self.duration_seconds()
            );
        }
        Ok(())
    }

    /// 書き込んだフレーム数
    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// 書き込んだ時間（秒）
    pub fn duration_seconds(&self) -> f64 {
        self.frames_written as f64 / self.spec.sample_rate as f64
    }
}

impl Drop for WavWriter {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.finalize() {
                log::error!("WavWriter のドロップ時にエラー: {}", e);
            }
        }
    }
}

/// トーンをオフラインで描画してステレオWAVに保存
///
/// デバイス再生と同じ合成経路（低域補正・パン）を通る。
/// 書き込んだフレーム数を返す。
pub fn render_tone<P: AsRef<Path>>(
    path: P,
    frequency: f64,
    volume: f64,
    ear: Ear,
    duration_ms: u64,
    sample_rate: u32,
) -> Result<usize> {
    let mut generator = ToneGenerator::with_context(AudioContext::offline(sample_rate, 2));
    generator.start_looping_tone(frequency, volume, ear)?;

    let total_frames = (sample_rate as u64 * duration_ms / 1000) as usize;
    let mut writer = WavWriter::create(path, sample_rate, 2)?;

    let mut remaining = total_frames;
    while remaining > 0 {
        let frames = remaining.min(RENDER_BLOCK_FRAMES);
        let Some(context) = generator.context() else {
            anyhow::bail!("オフラインコンテキストが解放されています");
        };
        writer.write_frames(&context.render_offline(frames))?;
        remaining -= frames;
    }

    generator.stop_tone();
    writer.finalize()?;
    Ok(writer.frames_written())
}
