use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 標準検査周波数 (Hz)
///
/// 検査はこの順序で行い、結果もこの順序で保持する。
pub const TEST_FREQUENCIES: [u32; 7] = [50, 250, 500, 1000, 2000, 4000, 8000];

/// 標準検査周波数に含まれるか
pub fn is_test_frequency(frequency: u32) -> bool {
    TEST_FREQUENCIES.contains(&frequency)
}

/// 再生先の耳
///
/// `Both` は合成時のみの概念（中央定位）で、記録された閾値には現れない。
///
/// # Examples
///
/// ```
/// # use hearing_screen::types::Ear;
/// let ear: Ear = "left".parse().unwrap();
/// assert_eq!(ear.pan(), -1.0);
/// assert!("center".parse::<Ear>().is_err());
/// ```
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Ear {
    Left,
    Right,
    #[default]
    Both,
}

impl Ear {
    /// ステレオパン値（左 -1 / 中央 0 / 右 +1）
    ///
    /// 中間の定位は使わない。
    pub fn pan(self) -> f32 {
        match self {
            Ear::Left => -1.0,
            Ear::Right => 1.0,
            Ear::Both => 0.0,
        }
    }
}

impl fmt::Display for Ear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ear::Left => "left",
            Ear::Right => "right",
            Ear::Both => "both",
        };
        f.write_str(s)
    }
}

/// 不明な耳指定
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("不明な耳の指定: {0:?} (left / right / both)")]
pub struct UnknownEar(pub String);

impl FromStr for Ear {
    type Err = UnknownEar;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(Ear::Left),
            "right" | "r" => Ok(Ear::Right),
            "both" | "b" => Ok(Ear::Both),
            _ => Err(UnknownEar(s.to_string())),
        }
    }
}

/// 検査対象の耳（閾値を記録できるのは左右のみ）
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TestedEar {
    Left,
    Right,
}

impl TestedEar {
    /// 検査順
    pub const ALL: [TestedEar; 2] = [TestedEar::Left, TestedEar::Right];
}

impl From<TestedEar> for Ear {
    fn from(ear: TestedEar) -> Self {
        match ear {
            TestedEar::Left => Ear::Left,
            TestedEar::Right => Ear::Right,
        }
    }
}

impl fmt::Display for TestedEar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ear::from(*self).fmt(f)
    }
}

/// 周波数ごとの閾値サンプル
///
/// `threshold` はデシベルではなく正規化された再生音量 (0.0 ~ 1.0)。
/// 0 は最小出力でも聞こえた、1 は最大出力が必要だったことを表す。
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct ThresholdSample {
    /// 周波数 (Hz)
    pub frequency: u32,
    /// 閾値（正規化音量）
    pub threshold: f64,
}

impl ThresholdSample {
    pub fn new(frequency: u32, threshold: f64) -> Self {
        Self {
            frequency,
            threshold,
        }
    }
}

/// 片耳分の閾値サンプル列
///
/// 標準周波数の順序を保持する（値で並べ替えない）。
pub type EarResultSet = Vec<ThresholdSample>;

/// 総合判定
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Assessment {
    Normal,
    MildLoss,
    ModerateLoss,
    SevereLoss,
}

impl Assessment {
    /// シリアライズ時と同じ識別子（"mild-loss" など）
    pub fn as_str(self) -> &'static str {
        match self {
            Assessment::Normal => "normal",
            Assessment::MildLoss => "mild-loss",
            Assessment::ModerateLoss => "moderate-loss",
            Assessment::SevereLoss => "severe-loss",
        }
    }

    /// レポート表示用ラベル（ハイフンを空白に置換）
    pub fn label(self) -> String {
        self.as_str().replace('-', " ")
    }

    /// 結果画面の見出し
    pub fn headline(self) -> &'static str {
        match self {
            Assessment::Normal => "You likely have good hearing.",
            Assessment::MildLoss => "You may have mild hearing loss.",
            Assessment::ModerateLoss => "You may have moderate hearing loss.",
            Assessment::SevereLoss => "You may have significant hearing loss.",
        }
    }
}

impl fmt::Display for Assessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 聴力検査結果
///
/// 検査完了時に一度だけ生成され、以降は変更しない。
/// 再検査では新しいインスタンスを作る。
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HearingTestResult {
    pub theoretical_score: u32,
    pub left_ear_results: EarResultSet,
    pub right_ear_results: EarResultSet,
    pub overall_assessment: Assessment,
    pub recommendations: Vec<String>,
    pub hearing_tips: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ear_pan_values() {
        assert_eq!(Ear::Left.pan(), -1.0);
        assert_eq!(Ear::Right.pan(), 1.0);
        assert_eq!(Ear::Both.pan(), 0.0);
    }

    #[test]
    fn test_ear_parse() {
        assert_eq!("Left".parse::<Ear>().unwrap(), Ear::Left);
        assert_eq!(" right ".parse::<Ear>().unwrap(), Ear::Right);
        assert_eq!("both".parse::<Ear>().unwrap(), Ear::Both);
        assert_eq!(
            "middle".parse::<Ear>(),
            Err(UnknownEar("middle".to_string()))
        );
    }

    #[test]
    fn test_tested_ear_never_both() {
        for ear in TestedEar::ALL {
            assert_ne!(Ear::from(ear), Ear::Both);
        }
    }

    #[test]
    fn test_assessment_serialization() {
        let json = serde_json::to_string(&Assessment::ModerateLoss).unwrap();
        assert_eq!(json, r#""moderate-loss""#);

        let parsed: Assessment = serde_json::from_str(r#""severe-loss""#).unwrap();
        assert_eq!(parsed, Assessment::SevereLoss);
        assert_eq!(Assessment::MildLoss.label(), "mild loss");
    }

    #[test]
    fn test_result_json_field_names() {
        let result = HearingTestResult {
            theoretical_score: 12,
            left_ear_results: vec![ThresholdSample::new(1000, 0.2)],
            right_ear_results: vec![ThresholdSample::new(1000, 0.3)],
            overall_assessment: Assessment::Normal,
            recommendations: vec!["a".to_string()],
            hearing_tips: vec![],
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["theoreticalScore"], 12);
        assert_eq!(json["leftEarResults"][0]["frequency"], 1000);
        assert_eq!(json["rightEarResults"][0]["threshold"], 0.3);
        assert_eq!(json["overallAssessment"], "normal");
        assert!(json["hearingTips"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_frequency_set_is_ordered() {
        assert!(TEST_FREQUENCIES.windows(2).all(|w| w[0] < w[1]));
        assert!(is_test_frequency(50));
        assert!(!is_test_frequency(125));
    }
}
