use crate::synth::ToneGraph;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use regex_lite::Regex;
use std::sync::{Arc, Mutex, MutexGuard};

/// 出力先に接続されたグラフの識別子
pub type GraphId = u64;

/// 検査音の出力に使うべきでない仮想デバイス
const EXCLUDED_OUTPUT_DEVICES: &str =
    "Microsoft Teams|ZoomAudioDevice|Background|BlackHole|Soundflower|Loopback";

/// オフライン描画時のデフォルトサンプルレート
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

struct DestinationState {
    sample_rate: u32,
    frames_rendered: u64,
    next_id: GraphId,
    graphs: Vec<(GraphId, ToneGraph)>,
}

impl DestinationState {
    fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// インターリーブ形式でフレームを描画し、時計を進める
    fn render(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }

        for frame in out.chunks_exact_mut(channels) {
            let time = self.current_time();
            let (mut left, mut right) = (0.0f32, 0.0f32);
            for (_, graph) in self.graphs.iter_mut() {
                let (l, r) = graph.next_frame(time);
                left += l;
                right += r;
            }

            if channels == 1 {
                frame[0] = (left + right).clamp(-1.0, 1.0);
            } else {
                frame[0] = left.clamp(-1.0, 1.0);
                frame[1] = right.clamp(-1.0, 1.0);
                frame[2..].fill(0.0);
            }
            self.frames_rendered += 1;
        }
    }
}

/// オーディオコンテキストの出力先
///
/// オーディオスレッドと制御側で共有される。クローンは同じ出力先を指す。
#[derive(Clone)]
pub struct Destination {
    inner: Arc<Mutex<DestinationState>>,
}

impl Destination {
    fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DestinationState {
                sample_rate,
                frames_rendered: 0,
                next_id: 1,
                graphs: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DestinationState> {
        // オーディオスレッドでのパニックで止めない
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    /// コンテキスト時刻（描画済みフレームから算出、秒）
    pub fn current_time(&self) -> f64 {
        self.lock().current_time()
    }

    /// グラフを接続
    pub fn connect(&self, graph: ToneGraph) -> GraphId {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.graphs.push((id, graph));
        id
    }

    /// グラフを切断して返す（未接続なら None）
    pub fn disconnect(&self, id: GraphId) -> Option<ToneGraph> {
        let mut state = self.lock();
        let index = state.graphs.iter().position(|(gid, _)| *gid == id)?;
        Some(state.graphs.remove(index).1)
    }

    /// 接続中のグラフを現在時刻とともに操作
    pub fn with_graph<R>(&self, id: GraphId, f: impl FnOnce(&mut ToneGraph, f64) -> R) -> Option<R> {
        let mut state = self.lock();
        let now = state.current_time();
        state
            .graphs
            .iter_mut()
            .find(|(gid, _)| *gid == id)
            .map(|(_, graph)| f(graph, now))
    }

    /// 接続中のグラフ数
    pub fn connected_count(&self) -> usize {
        self.lock().graphs.len()
    }

    fn disconnect_all(&self) -> usize {
        let mut state = self.lock();
        let count = state.graphs.len();
        state.graphs.clear();
        count
    }

    /// インターリーブ形式でフレームを描画
    pub fn render(&self, out: &mut [f32], channels: usize) {
        self.lock().render(out, channels);
    }
}

/// 出力デバイスと合成グラフの接続先をまとめたオーディオコンテキスト
///
/// デバイスのストリームを持たないオフラインコンテキストも作れる。
/// オフラインの場合は `render_offline` を呼んだ分だけ時計が進む。
pub struct AudioContext {
    destination: Destination,
    channels: u16,
    stream: Option<Stream>,
}

impl AudioContext {
    /// 出力デバイスを開いてストリームを開始
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        // デバイスを選択
        let device = if let Some(name) = device_name {
            Self::output_devices()?
                .into_iter()
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow::anyhow!("出力デバイス '{}' が見つかりません", name))?
        } else {
            host.default_output_device()
                .ok_or_else(|| anyhow::anyhow!("デフォルト出力デバイスが見つかりません"))?
        };

        log::info!("出力デバイス: {}", device.name()?);

        let default_config = device
            .default_output_config()
            .context("デフォルト出力設定が取得できません")?;

        log::info!(
            "出力デバイス設定: {:?}, {}Hz, {}ch",
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );

        let config: StreamConfig = default_config.config();
        let destination = Destination::new(config.sample_rate.0);

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, destination.clone())?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, destination.clone())?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, destination.clone())?,
            _ => anyhow::bail!(
                "サポートされていないサンプルフォーマット: {:?}",
                default_config.sample_format()
            ),
        };

        stream.play().context("ストリームの再生開始に失敗")?;

        Ok(Self {
            destination,
            channels: config.channels,
            stream: Some(stream),
        })
    }

    /// デバイスを使わないオフラインコンテキストを作成
    pub fn offline(sample_rate: u32, channels: u16) -> Self {
        Self {
            destination: Destination::new(sample_rate),
            channels,
            stream: None,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn sample_rate(&self) -> u32 {
        self.destination.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_offline(&self) -> bool {
        self.stream.is_none()
    }

    /// オフラインで指定フレーム数を描画（インターリーブ）
    ///
    /// デバイスのストリームが動いている場合は時計が二重に進むため何もしない。
    pub fn render_offline(&self, frames: usize) -> Vec<f32> {
        if !self.is_offline() {
            log::warn!("デバイス出力中のコンテキストはオフライン描画できません");
            return Vec::new();
        }
        let mut out = vec![0.0f32; frames * self.channels as usize];
        self.destination.render(&mut out, self.channels as usize);
        out
    }

    /// ストリームを停止し、全グラフを切断
    pub fn close(&mut self) {
        let released = self.destination.disconnect_all();
        if released > 0 {
            log::debug!("未切断のグラフ {} 個を解放しました", released);
        }
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("出力ストリームを停止しました");
        }
    }

    /// 指定されたサンプルフォーマットで出力ストリームを構築
    fn build_stream<T>(device: &Device, config: &StreamConfig, destination: Destination) -> Result<Stream>
    where
        T: SizedSample + Sample + FromSample<f32> + Send + 'static,
    {
        let channels = config.channels as usize;
        let mut scratch: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if scratch.len() != data.len() {
                        scratch.resize(data.len(), 0.0);
                    }
                    destination.render(&mut scratch, channels);
                    for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(sample);
                    }
                },
                move |err| {
                    log::error!("出力ストリームエラー: {}", err);
                },
                None,
            )
            .context("出力ストリームの構築に失敗")?;

        Ok(stream)
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> Result<()> {
        let host = cpal::default_host();
        println!("=== 利用可能な出力デバイス ===");

        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        for (idx, device) in Self::output_devices()?.into_iter().enumerate() {
            let name = device.name()?;
            let marker = if default_name.as_deref() == Some(name.as_str()) {
                " (デフォルト)"
            } else {
                ""
            };
            println!("{}. {}{}", idx, name, marker);

            if let Ok(config) = device.default_output_config() {
                println!(
                    "   フォーマット: {:?}, サンプルレート: {} Hz, チャンネル数: {}",
                    config.sample_format(),
                    config.sample_rate().0,
                    config.channels()
                );
            }
        }

        Ok(())
    }

    /// 仮想デバイスを除外した出力デバイス一覧
    fn output_devices() -> Result<Vec<Device>> {
        let host = cpal::default_host();
        let excluded = Regex::new(EXCLUDED_OUTPUT_DEVICES).context("除外デバイス名の正規表現が不正")?;
        let devices = host
            .output_devices()?
            .filter(|device| match device.name() {
                Ok(name) => !is_excluded_device(&excluded, &name),
                Err(_) => true,
            })
            .collect();
        Ok(devices)
    }
}

fn is_excluded_device(excluded: &Regex, name: &str) -> bool {
    excluded.is_match(name)
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_render_advances_clock() {
        let ctx = AudioContext::offline(1000, 2);
        assert_eq!(ctx.destination().current_time(), 0.0);

        let out = ctx.render_offline(500);
        assert_eq!(out.len(), 1000);
        assert!((ctx.destination().current_time() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_silence_without_graphs() {
        let ctx = AudioContext::offline(48000, 2);
        let out = ctx.render_offline(256);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_connect_disconnect() {
        let ctx = AudioContext::offline(48000, 2);
        let dest = ctx.destination();

        let a = dest.connect(ToneGraph::new(1000.0, 0.5, 0.0, 48000));
        let b = dest.connect(ToneGraph::new(2000.0, 0.5, 0.0, 48000));
        assert_ne!(a, b);
        assert_eq!(dest.connected_count(), 2);

        let graph = dest.disconnect(a).unwrap();
        assert_eq!(graph.frequency(), 1000.0);
        assert!(dest.disconnect(a).is_none());
        assert_eq!(dest.connected_count(), 1);
    }

    #[test]
    fn test_render_routes_channels() {
        let ctx = AudioContext::offline(48000, 2);
        ctx.destination()
            .connect(ToneGraph::new(1000.0, 0.5, 1.0, 48000));

        let out = ctx.render_offline(480);
        let left_peak = out.iter().step_by(2).fold(0.0f32, |m, s| m.max(s.abs()));
        let right_peak = out.iter().skip(1).step_by(2).fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(left_peak < 1e-6);
        assert!(right_peak > 0.45);
    }

    #[test]
    fn test_render_extra_channels_silent() {
        let ctx = AudioContext::offline(48000, 4);
        ctx.destination()
            .connect(ToneGraph::new(1000.0, 0.5, 0.0, 48000));

        let out = ctx.render_offline(64);
        for frame in out.chunks(4) {
            assert_eq!(frame[2], 0.0);
            assert_eq!(frame[3], 0.0);
        }
    }

    #[test]
    fn test_with_graph_reports_context_time() {
        let ctx = AudioContext::offline(100, 1);
        let id = ctx
            .destination()
            .connect(ToneGraph::new(10.0, 0.5, 0.0, 100));
        ctx.render_offline(50);

        let now = ctx.destination().with_graph(id, |_, now| now).unwrap();
        assert!((now - 0.5).abs() < 1e-12);
        assert!(ctx.destination().with_graph(id + 1, |_, now| now).is_none());
    }

    #[test]
    fn test_close_releases_graphs() {
        let mut ctx = AudioContext::offline(48000, 2);
        ctx.destination()
            .connect(ToneGraph::new(1000.0, 0.5, 0.0, 48000));
        ctx.close();
        assert_eq!(ctx.destination().connected_count(), 0);
    }

    #[test]
    fn test_virtual_devices_excluded() {
        let excluded = Regex::new(EXCLUDED_OUTPUT_DEVICES).unwrap();
        assert!(is_excluded_device(&excluded, "Microsoft Teams Audio"));
        assert!(is_excluded_device(&excluded, "BlackHole 2ch"));
        assert!(!is_excluded_device(&excluded, "External Headphones"));
    }
}
