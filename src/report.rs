//! 検査結果の受け渡し
//!
//! 完了した検査結果を顧客情報と組み合わせ、設定された宛先へ渡す。
//! 送信経路（メール等）は外部の担当で、ここではJSONとして書き出すだけ。
//! 顧客情報がない場合は受け渡しを行わない。

use crate::config::{ReportConfig, ReportSinkType};
use crate::scoring::{self, hearing_level, HearingLevel, ScoringError};
use crate::types::{EarResultSet, HearingTestResult, ThresholdSample};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 最寄りの店舗
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Branch {
    pub name: String,
    pub city: String,
}

/// 顧客情報
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerData {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub mobile: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_branch: Option<Branch>,
}

/// 受け渡し用ペイロード
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    pub customer_data: CustomerData,
    pub test_results: HearingTestResult,
    pub left_ear_results: EarResultSet,
    pub right_ear_results: EarResultSet,
}

impl ResultPayload {
    pub fn new(customer_data: CustomerData, test_results: HearingTestResult) -> Self {
        Self {
            left_ear_results: test_results.left_ear_results.clone(),
            right_ear_results: test_results.right_ear_results.clone(),
            customer_data,
            test_results,
        }
    }

    /// 件名（"Hearing Test Results - 氏名"）
    pub fn subject(&self) -> String {
        format!("Hearing Test Results - {}", self.customer_data.name)
    }
}

/// 周波数ごとの聞こえ (0 ~ 100, 高いほど良い)
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FrequencyAbility {
    pub frequency: u32,
    pub ability: u32,
    pub level: HearingLevel,
}

impl From<&ThresholdSample> for FrequencyAbility {
    fn from(sample: &ThresholdSample) -> Self {
        Self {
            frequency: sample.frequency,
            ability: good_hearing_percentage(sample.threshold),
            level: hearing_level(sample.threshold),
        }
    }
}

/// レポート表示用の集計値
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// 両耳の平均閾値から求めた「良好な聞こえ」スコア
    pub overall_score: u32,
    /// 判定ラベル（"mild loss" など）
    pub classification: String,
    pub headline: String,
    pub left_ear: Vec<FrequencyAbility>,
    pub right_ear: Vec<FrequencyAbility>,
}

fn good_hearing_percentage(threshold: f64) -> u32 {
    ((1.0 - threshold.clamp(0.0, 1.0)) * 100.0).round() as u32
}

impl ReportSummary {
    pub fn from_payload(payload: &ResultPayload) -> Result<Self, ScoringError> {
        let avg = scoring::average_threshold(&payload.left_ear_results, &payload.right_ear_results)?;
        let assessment = payload.test_results.overall_assessment;
        Ok(Self {
            overall_score: good_hearing_percentage(avg),
            classification: assessment.label(),
            headline: assessment.headline().to_string(),
            left_ear: payload.left_ear_results.iter().map(FrequencyAbility::from).collect(),
            right_ear: payload.right_ear_results.iter().map(FrequencyAbility::from).collect(),
        })
    }
}

/// 書き出すJSONの外枠
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportEnvelope<'a> {
    recipient: &'a str,
    reply_to: &'a str,
    subject: String,
    generated_at: String,
    summary: ReportSummary,
    payload: &'a ResultPayload,
}

impl<'a> ReportEnvelope<'a> {
    fn new(recipient: &'a str, payload: &'a ResultPayload) -> Result<Self> {
        let summary = ReportSummary::from_payload(payload).context("レポート集計に失敗")?;
        Ok(Self {
            recipient,
            reply_to: &payload.customer_data.email,
            subject: payload.subject(),
            generated_at: chrono::Local::now().to_rfc3339(),
            summary,
            payload,
        })
    }
}

/// 結果の受け渡し先の共通トレイト
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// ペイロードを宛先へ渡す
    async fn deliver(&self, recipient: &str, payload: &ResultPayload) -> Result<()>;

    /// ログ表示用の名前
    fn name(&self) -> &'static str;
}

/// 出力ディレクトリにJSONファイルとして保存
pub struct JsonFileSink {
    output_dir: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// 書き出して作成したファイルのパスを返す
    pub async fn write(&self, recipient: &str, payload: &ResultPayload) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("出力ディレクトリの作成に失敗: {:?}", self.output_dir))?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let filepath = self
            .output_dir
            .join(format!("hearing_test_{}.json", timestamp));

        let envelope = ReportEnvelope::new(recipient, payload)?;
        let json = serde_json::to_string_pretty(&envelope).context("レポートのシリアライズに失敗")?;
        tokio::fs::write(&filepath, json)
            .await
            .with_context(|| format!("レポートの書き込みに失敗: {:?}", filepath))?;

        log::info!("レポート保存: {:?} (宛先: {})", filepath, recipient);
        Ok(filepath)
    }
}

#[async_trait]
impl ReportSink for JsonFileSink {
    async fn deliver(&self, recipient: &str, payload: &ResultPayload) -> Result<()> {
        self.write(recipient, payload).await.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// 標準出力に1行のJSONとして出力
pub struct StdoutSink;

#[async_trait]
impl ReportSink for StdoutSink {
    async fn deliver(&self, recipient: &str, payload: &ResultPayload) -> Result<()> {
        let envelope = ReportEnvelope::new(recipient, payload)?;
        let json = serde_json::to_string(&envelope).context("レポートのシリアライズに失敗")?;
        println!("{}", json);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

/// 設定に従って受け渡し先を作成
pub fn build_sink(config: &ReportConfig) -> Box<dyn ReportSink> {
    match config.sink {
        ReportSinkType::File => Box::new(JsonFileSink::new(&config.output_dir)),
        ReportSinkType::Stdout => Box::new(StdoutSink),
    }
}

/// 顧客情報があれば結果を受け渡す
///
/// 受け渡した場合は true。顧客情報がなければ何もせず false。
pub async fn hand_off(
    sink: &dyn ReportSink,
    recipient: &str,
    customer: Option<CustomerData>,
    result: &HearingTestResult,
) -> Result<bool> {
    let Some(customer) = customer else {
        log::info!("顧客情報がないため結果の受け渡しをスキップします");
        return Ok(false);
    };

    let payload = ResultPayload::new(customer, result.clone());
    sink.deliver(recipient, &payload)
        .await
        .with_context(|| format!("結果の受け渡しに失敗 ({})", sink.name()))?;
    Ok(true)
}
