use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub test: TestConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// 音声出力設定
///
/// # デフォルト値
///
/// - `enabled`: true
/// - `device_name`: なし（システムのデフォルト出力デバイス）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// 検査手順の設定
///
/// 上昇法で閾値を測定する際のパラメータ。
///
/// # デフォルト値
///
/// - `start_volume`: 0.05
/// - `volume_step`: 0.05
/// - `step_interval_ms`: 1500 ms（各音量で応答を待つ時間）
/// - `tone_duration_ms`: 2000 ms（単発再生の長さ）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestConfig {
    #[serde(default = "default_start_volume")]
    pub start_volume: f64,
    #[serde(default = "default_volume_step")]
    pub volume_step: f64,
    #[serde(default = "default_step_interval_ms")]
    pub step_interval_ms: u64,
    #[serde(default = "default_tone_duration_ms")]
    pub tone_duration_ms: u64,
}

/// 結果の受け渡し先
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportSinkType {
    /// JSONファイルとして出力ディレクトリに保存
    File,
    /// 標準出力に1行のJSONとして出力
    Stdout,
}

/// 結果レポート設定
///
/// 宛先はここで指定する。検査エンジン側に既定の宛先は持たない。
///
/// # デフォルト値
///
/// - `recipient`: "results@example.com"
/// - `sink`: "file"
/// - `output_dir`: "./reports"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_recipient")]
    pub recipient: String,
    #[serde(default = "default_sink")]
    pub sink: ReportSinkType,
    #[serde(default = "default_report_output_dir")]
    pub output_dir: String,
}

/// ログ設定
///
/// # デフォルト値
///
/// - `log_level`: "info"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default functions
fn default_enabled() -> bool {
    true
}

fn default_start_volume() -> f64 {
    0.05
}

fn default_volume_step() -> f64 {
    0.05
}

fn default_step_interval_ms() -> u64 {
    1500
}

fn default_tone_duration_ms() -> u64 {
    2000
}

fn default_recipient() -> String {
    "results@example.com".to_string()
}

fn default_sink() -> ReportSinkType {
    ReportSinkType::File
}

fn default_report_output_dir() -> String {
    "./reports".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            device_name: None,
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            start_volume: default_start_volume(),
            volume_step: default_volume_step(),
            step_interval_ms: default_step_interval_ms(),
            tone_duration_ms: default_tone_duration_ms(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            recipient: default_recipient(),
            sink: default_sink(),
            output_dir: default_report_output_dir(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl TestConfig {
    /// 値の範囲を検証
    ///
    /// 音量ステップが 0 以下だと上昇法が終わらない。
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.start_volume) {
            anyhow::bail!("start_volume は 0.0 ~ 1.0 の範囲で指定してください: {}", self.start_volume);
        }
        if !(self.volume_step > 0.0 && self.volume_step <= 1.0) {
            anyhow::bail!("volume_step は 0.0 より大きく 1.0 以下で指定してください: {}", self.volume_step);
        }
        if self.step_interval_ms == 0 {
            anyhow::bail!("step_interval_ms は 1 以上で指定してください");
        }
        Ok(())
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込み、パース、または値の検証に失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use hearing_screen::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        config.test.validate()?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込む（なければ `None`）
    ///
    /// ログ出力はしないので、ロガー初期化前でも呼べる。
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        if path.as_ref().exists() {
            Self::from_file(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::load(path)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.audio.enabled);
        assert!(config.audio.device_name.is_none());
        assert_eq!(config.test.start_volume, 0.05);
        assert_eq!(config.test.tone_duration_ms, 2000);
        assert_eq!(config.report.sink, ReportSinkType::File);
        assert_eq!(config.output.log_level, "info");
    }

    #[test]
    fn test_write_and_read_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        Config::write_default(path).unwrap();

        let config = Config::from_file(path).unwrap();
        assert_eq!(config.test.step_interval_ms, 1500);
        assert_eq!(config.report.recipient, "results@example.com");
    }

    #[test]
    fn test_custom_config() {
        let toml_content = r#"
[audio]
enabled = false
device_name = "External Headphones"

[test]
start_volume = 0.1
volume_step = 0.02
step_interval_ms = 800
tone_duration_ms = 1000

[report]
recipient = "clinic@example.org"
sink = "stdout"
output_dir = "/tmp/reports"

[output]
log_level = "debug"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert!(!config.audio.enabled);
        assert_eq!(config.audio.device_name.as_deref(), Some("External Headphones"));
        assert_eq!(config.test.start_volume, 0.1);
        assert_eq!(config.test.volume_step, 0.02);
        assert_eq!(config.test.step_interval_ms, 800);
        assert_eq!(config.report.recipient, "clinic@example.org");
        assert_eq!(config.report.sink, ReportSinkType::Stdout);
        assert_eq!(config.report.output_dir, "/tmp/reports");
        assert_eq!(config.output.log_level, "debug");
    }

    #[test]
    fn test_partial_config() {
        let toml_content = r#"
[test]
volume_step = 0.1
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.test.volume_step, 0.1);
        assert_eq!(config.test.start_volume, 0.05);
        assert!(config.audio.enabled);
        assert_eq!(config.report.output_dir, "./reports");
    }

    #[test]
    fn test_invalid_step_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[test]\nvolume_step = 0.0\n")
            .unwrap();
        temp_file.flush().unwrap();

        assert!(Config::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_nonexistent() {
        let config = Config::load_or_default("nonexistent_file.toml").unwrap();
        assert_eq!(config.test.volume_step, 0.05);
    }

    #[test]
    fn test_load_reports_missing_file() {
        assert!(Config::load("nonexistent_file.toml").unwrap().is_none());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[test]\nvolume_step = 0.1").unwrap();
        let config = Config::load(file.path()).unwrap().unwrap();
        assert_eq!(config.test.volume_step, 0.1);
    }
}
