//! 採点エンジン
//!
//! 記録された閾値とアンケート回答から、割合スコア・総合判定・推奨事項を求める。
//! すべて副作用のない純粋関数で、同じ入力には常に同じ結果を返す。
//!
//! # 不完全なデータの扱い
//!
//! - 個々の計算関数は与えられたサンプル数で平均を取る。空の入力と
//!   範囲外の閾値は `ScoringError` で拒否する（0 除算の NaN を返さない）。
//! - `evaluate` は両耳とも全標準周波数が揃っていることを要求し、
//!   欠落・重複・順序違いは `ScoringError::IncompleteResults` で拒否する。

use crate::questionnaire::{calculate_theoretical_score, find_invalid_answer};
use crate::types::{
    Assessment, EarResultSet, HearingTestResult, TestedEar, ThresholdSample, TEST_FREQUENCIES,
};
use serde::Serialize;
use thiserror::Error;

/// 推定損失スコアへの換算係数（平均閾値 × 80）
const LOSS_SCALE: f64 = 80.0;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoringError {
    #[error("設問 {question} の回答が範囲外です: {answer}")]
    InvalidAnswer { question: &'static str, answer: usize },

    #[error("閾値サンプルがありません")]
    EmptyResults,

    #[error("閾値が範囲外です: {frequency}Hz = {threshold}")]
    InvalidThreshold { frequency: u32, threshold: f64 },

    #[error("{ear} の検査結果が不完全です (欠落: {missing:?}, 記録: {recorded:?})")]
    IncompleteResults {
        ear: TestedEar,
        missing: Vec<u32>,
        recorded: Vec<u32>,
    },
}

fn mean_threshold<'a>(samples: impl IntoIterator<Item = &'a ThresholdSample>) -> Result<f64, ScoringError> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for sample in samples {
        if !(0.0..=1.0).contains(&sample.threshold) {
            return Err(ScoringError::InvalidThreshold {
                frequency: sample.frequency,
                threshold: sample.threshold,
            });
        }
        sum += sample.threshold;
        count += 1;
    }
    if count == 0 {
        return Err(ScoringError::EmptyResults);
    }
    Ok(sum / count as f64)
}

/// 片耳の割合スコア (0 ~ 100)
///
/// 閾値の平均 × 100 を四捨五入する。これは測定出力の尺度であり、
/// 閾値が高い（大きな音量が必要だった）ほど値も大きくなる。
/// 臨床的な聴力損失 (dB HL) とは向きも単位も異なるので混同しないこと。
///
/// # Examples
///
/// ```
/// # use hearing_screen::scoring::calculate_hearing_percentage;
/// # use hearing_screen::types::ThresholdSample;
/// let results = [ThresholdSample::new(1000, 0.0), ThresholdSample::new(1000, 1.0)];
/// assert_eq!(calculate_hearing_percentage(&results).unwrap(), 50);
/// ```
pub fn calculate_hearing_percentage(ear_results: &[ThresholdSample]) -> Result<u32, ScoringError> {
    let avg = mean_threshold(ear_results)?;
    Ok((avg * 100.0).round() as u32)
}

/// 両耳の割合スコアの平均（四捨五入）
pub fn calculate_overall_percentage(
    left: &[ThresholdSample],
    right: &[ThresholdSample],
) -> Result<u32, ScoringError> {
    let left = calculate_hearing_percentage(left)?;
    let right = calculate_hearing_percentage(right)?;
    Ok(((left + right) as f64 / 2.0).round() as u32)
}

/// 両耳の全サンプルの平均閾値
pub fn average_threshold(
    left: &[ThresholdSample],
    right: &[ThresholdSample],
) -> Result<f64, ScoringError> {
    mean_threshold(left.iter().chain(right))
}

/// 総合判定
///
/// 両耳の全サンプルの平均閾値から推定損失スコア (0 ~ 80) を求め、
/// 理論スコア / 100 と組み合わせて判定する。先に一致した規則を採用する。
///
/// 1. 損失 < 15 **かつ** 係数 < 0.3 → 正常
/// 2. 損失 < 30 **または** 係数 < 0.5 → 軽度
/// 3. 損失 < 55 **または** 係数 < 0.7 → 中等度
/// 4. それ以外 → 高度
///
/// 正常判定のみ両方の指標が低いことを要求し、以降は片方で足りる。
/// 見逃しを減らす方向に偏らせたスクリーニングなので、この組み合わせは変えないこと。
/// 推定損失スコアは PTA の近似であり、校正されたデシベル値ではない。
pub fn calculate_overall_assessment(
    theoretical_score: u32,
    left: &[ThresholdSample],
    right: &[ThresholdSample],
) -> Result<Assessment, ScoringError> {
    let avg_threshold = average_threshold(left, right)?;
    Ok(classify(avg_threshold * LOSS_SCALE, theoretical_score as f64 / 100.0))
}

fn classify(estimated_loss_score: f64, theoretical_factor: f64) -> Assessment {
    if estimated_loss_score < 15.0 && theoretical_factor < 0.3 {
        Assessment::Normal
    } else if estimated_loss_score < 30.0 || theoretical_factor < 0.5 {
        Assessment::MildLoss
    } else if estimated_loss_score < 55.0 || theoretical_factor < 0.7 {
        Assessment::ModerateLoss
    } else {
        Assessment::SevereLoss
    }
}

const NORMAL_RECOMMENDATIONS: &[&str] = &[
    "Your hearing appears to be within normal range.",
    "Continue to protect your hearing from loud noises and use hearing protection when necessary.",
    "Schedule regular hearing check-ups every 2-3 years to monitor your hearing health.",
    "Maintain a healthy lifestyle with proper nutrition and exercise to support overall ear health.",
];

const MILD_RECOMMENDATIONS: &[&str] = &[
    "Your results suggest mild hearing loss in certain frequencies.",
    "We recommend scheduling a comprehensive audiological evaluation with our certified audiologists.",
    "Early intervention can prevent further hearing deterioration and improve quality of life.",
    "Consider using hearing protection in noisy environments to prevent additional damage.",
    "Modern hearing aids can significantly improve your hearing in challenging listening situations.",
];

const MODERATE_RECOMMENDATIONS: &[&str] = &[
    "Your results indicate moderate hearing loss that may be affecting your daily communication.",
    "We strongly recommend scheduling an appointment with our audiologists for a complete evaluation.",
    "Hearing aids are highly recommended and can dramatically improve your quality of life.",
    "Our audiologists can help you find the perfect hearing solution tailored to your lifestyle.",
    "Don't delay - addressing hearing loss early leads to better outcomes and adaptation.",
];

const SEVERE_RECOMMENDATIONS: &[&str] = &[
    "Your results suggest significant hearing challenges that require immediate professional attention.",
    "Please schedule an appointment with our audiologists as soon as possible for a comprehensive evaluation.",
    "Advanced hearing aid technology or cochlear implants may be appropriate solutions for you.",
    "Untreated hearing loss can lead to social isolation and cognitive decline - early treatment is crucial.",
    "We offer free consultations and can help you explore all available treatment options.",
    "Our team specializes in severe hearing loss and can provide the support you need.",
];

const HEARING_TIPS: &[&str] = &[
    "Protect Your Ears: Use earplugs or earmuffs in noisy environments (concerts, construction sites, loud machinery).",
    "Lower the Volume: Keep personal audio devices at 60% volume or lower and take listening breaks every hour.",
    "Maintain Ear Hygiene: Keep ears clean and dry. Never insert cotton swabs deep into the ear canal.",
    "Exercise Regularly: Good cardiovascular health improves blood flow to the ears and supports hearing health.",
    "Eat a Balanced Diet: Foods rich in omega-3 fatty acids, vitamins A, C, and E support ear health.",
    "Avoid Smoking: Smoking restricts blood flow to the ears and increases risk of hearing loss.",
    "Manage Stress: Chronic stress can affect hearing. Practice relaxation techniques and get adequate sleep.",
    "Regular Check-ups: Schedule annual hearing tests, especially if you're over 50 or work in noisy environments.",
    "Stay Alert to Warning Signs: Ringing in ears (tinnitus), muffled sounds, or difficulty understanding speech warrant immediate attention.",
    "Use Assistive Devices: Don't hesitate to use hearing aids if recommended - they significantly improve quality of life.",
];

/// 判定に応じた推奨事項
pub fn generate_recommendations(assessment: Assessment) -> Vec<String> {
    let lines = match assessment {
        Assessment::Normal => NORMAL_RECOMMENDATIONS,
        Assessment::MildLoss => MILD_RECOMMENDATIONS,
        Assessment::ModerateLoss => MODERATE_RECOMMENDATIONS,
        Assessment::SevereLoss => SEVERE_RECOMMENDATIONS,
    };
    lines.iter().map(|s| s.to_string()).collect()
}

/// 聴力を守るためのヒント（判定によらず共通）
pub fn generate_hearing_tips() -> Vec<String> {
    HEARING_TIPS.iter().map(|s| s.to_string()).collect()
}

/// 周波数ごとの聞こえの目安（結果表示用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum HearingLevel {
    Good,
    Fair,
    Loss,
    SignificantLoss,
}

impl HearingLevel {
    pub fn label(self) -> &'static str {
        match self {
            HearingLevel::Good => "Good",
            HearingLevel::Fair => "Fair",
            HearingLevel::Loss => "Loss",
            HearingLevel::SignificantLoss => "Significant Loss",
        }
    }
}

/// 閾値から聞こえの目安を求める
pub fn hearing_level(threshold: f64) -> HearingLevel {
    if threshold < 0.25 {
        HearingLevel::Good
    } else if threshold < 0.4 {
        HearingLevel::Fair
    } else if threshold < 0.6 {
        HearingLevel::Loss
    } else {
        HearingLevel::SignificantLoss
    }
}

/// 片耳の結果が全標準周波数を順序通りに1つずつ含むか検証
pub fn check_complete(ear: TestedEar, results: &[ThresholdSample]) -> Result<(), ScoringError> {
    let recorded: Vec<u32> = results.iter().map(|s| s.frequency).collect();
    if recorded == TEST_FREQUENCIES {
        return Ok(());
    }

    let missing = TEST_FREQUENCIES
        .iter()
        .copied()
        .filter(|f| !recorded.contains(f))
        .collect();
    Err(ScoringError::IncompleteResults {
        ear,
        missing,
        recorded,
    })
}

/// 検査結果を生成
///
/// 選択肢の範囲外の回答は `InvalidAnswer`、両耳の結果が揃っていない場合は
/// `IncompleteResults` を返す。
pub fn evaluate(
    answers: &[usize],
    left: &[ThresholdSample],
    right: &[ThresholdSample],
) -> Result<HearingTestResult, ScoringError> {
    if let Some((question, answer)) = find_invalid_answer(answers) {
        return Err(ScoringError::InvalidAnswer { question, answer });
    }
    check_complete(TestedEar::Left, left)?;
    check_complete(TestedEar::Right, right)?;

    let theoretical_score = calculate_theoretical_score(answers);
    let overall_assessment = calculate_overall_assessment(theoretical_score, left, right)?;

    log::info!(
        "採点完了: 理論スコア={}, 判定={}",
        theoretical_score,
        overall_assessment
    );

    Ok(HearingTestResult {
        theoretical_score,
        left_ear_results: EarResultSet::from(left),
        right_ear_results: EarResultSet::from(right),
        overall_assessment,
        recommendations: generate_recommendations(overall_assessment),
        hearing_tips: generate_hearing_tips(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(threshold: f64) -> EarResultSet {
        TEST_FREQUENCIES
            .iter()
            .map(|&f| ThresholdSample::new(f, threshold))
            .collect()
    }

    fn from_thresholds(thresholds: [f64; 7]) -> EarResultSet {
        TEST_FREQUENCIES
            .iter()
            .zip(thresholds)
            .map(|(&f, t)| ThresholdSample::new(f, t))
            .collect()
    }

    #[test]
    fn test_hearing_percentage_mean() {
        let results = [ThresholdSample::new(500, 0.0), ThresholdSample::new(500, 1.0)];
        assert_eq!(calculate_hearing_percentage(&results).unwrap(), 50);

        let results = from_thresholds([0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);
        assert_eq!(calculate_hearing_percentage(&results).unwrap(), 40);

        // 0.333.. → 33
        let results = [
            ThresholdSample::new(500, 0.0),
            ThresholdSample::new(1000, 0.0),
            ThresholdSample::new(2000, 1.0),
        ];
        assert_eq!(calculate_hearing_percentage(&results).unwrap(), 33);
    }

    #[test]
    fn test_hearing_percentage_rejects_empty() {
        assert_eq!(
            calculate_hearing_percentage(&[]),
            Err(ScoringError::EmptyResults)
        );
    }

    #[test]
    fn test_hearing_percentage_rejects_out_of_range() {
        let results = [ThresholdSample::new(500, 1.2)];
        assert!(matches!(
            calculate_hearing_percentage(&results),
            Err(ScoringError::InvalidThreshold { frequency: 500, .. })
        ));
        let results = [ThresholdSample::new(500, f64::NAN)];
        assert!(calculate_hearing_percentage(&results).is_err());
    }

    #[test]
    fn test_overall_percentage_symmetric() {
        let left = from_thresholds([0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4]);
        let right = from_thresholds([0.5, 0.6, 0.6, 0.7, 0.7, 0.8, 0.9]);

        let a = calculate_overall_percentage(&left, &right).unwrap();
        let b = calculate_overall_percentage(&right, &left).unwrap();
        assert_eq!(a, b);
        // 左 23, 右 69 → 46
        assert_eq!(a, 46);
    }

    #[test]
    fn test_overall_percentage_rounds_half_up() {
        let left = uniform(0.51);
        let right = uniform(0.50);
        // (51 + 50) / 2 = 50.5 → 51
        assert_eq!(calculate_overall_percentage(&left, &right).unwrap(), 51);
    }

    #[test]
    fn test_overall_percentage_requires_both_ears() {
        assert_eq!(
            calculate_overall_percentage(&uniform(0.2), &[]),
            Err(ScoringError::EmptyResults)
        );
    }

    #[test]
    fn test_assessment_normal_requires_both_signals() {
        // 損失 14.4, 係数 0.29 → 正常
        let low = uniform(0.18);
        assert_eq!(
            calculate_overall_assessment(29, &low, &low).unwrap(),
            Assessment::Normal
        );
        // 同じ閾値で係数 0.31 → 正常の AND が外れ、軽度の OR (14.4 < 30) に一致
        assert_eq!(
            calculate_overall_assessment(31, &low, &low).unwrap(),
            Assessment::MildLoss
        );
    }

    #[test]
    fn test_assessment_boundary_is_strict() {
        // 0.1875 × 80 = 15.0 ちょうど。15 < 15 は偽なので正常にならない
        let edge = uniform(0.1875);
        assert_eq!(
            calculate_overall_assessment(29, &edge, &edge).unwrap(),
            Assessment::MildLoss
        );
        assert_eq!(
            calculate_overall_assessment(0, &edge, &edge).unwrap(),
            Assessment::MildLoss
        );
        assert_eq!(
            calculate_overall_assessment(31, &edge, &edge).unwrap(),
            Assessment::MildLoss
        );

        // 損失 14.4 なら係数 0.29 で正常
        let below = uniform(0.18);
        assert_eq!(
            calculate_overall_assessment(29, &below, &below).unwrap(),
            Assessment::Normal
        );
    }

    #[test]
    fn test_assessment_or_branches() {
        let quiet = uniform(0.1);
        let mid = uniform(0.5);
        let loud = uniform(0.8);

        // 損失が低くても自己評価が高ければ正常にはならない
        assert_eq!(
            calculate_overall_assessment(107, &quiet, &quiet).unwrap(),
            Assessment::MildLoss
        );
        // 損失 40: 係数 < 0.5 なら軽度、それ以上は中等度
        assert_eq!(
            calculate_overall_assessment(40, &mid, &mid).unwrap(),
            Assessment::MildLoss
        );
        assert_eq!(
            calculate_overall_assessment(60, &mid, &mid).unwrap(),
            Assessment::ModerateLoss
        );
        // 損失 64: 係数 < 0.7 なら中等度、それ以上は高度
        assert_eq!(
            calculate_overall_assessment(65, &loud, &loud).unwrap(),
            Assessment::ModerateLoss
        );
        assert_eq!(
            calculate_overall_assessment(80, &loud, &loud).unwrap(),
            Assessment::SevereLoss
        );
        // 損失 64 でも係数 < 0.5 なら軽度
        assert_eq!(
            calculate_overall_assessment(20, &loud, &loud).unwrap(),
            Assessment::MildLoss
        );
    }

    #[test]
    fn test_assessment_pools_both_ears() {
        // 左 0.0, 右 0.3 → 平均 0.15 → 損失 12
        let left = uniform(0.0);
        let right = uniform(0.3);
        assert_eq!(
            calculate_overall_assessment(0, &left, &right).unwrap(),
            Assessment::Normal
        );
        assert_eq!(
            calculate_overall_assessment(0, &[], &[]),
            Err(ScoringError::EmptyResults)
        );
    }

    #[test]
    fn test_recommendations_are_deterministic() {
        for assessment in [
            Assessment::Normal,
            Assessment::MildLoss,
            Assessment::ModerateLoss,
            Assessment::SevereLoss,
        ] {
            let first = generate_recommendations(assessment);
            assert!(!first.is_empty());
            assert_eq!(first, generate_recommendations(assessment));
        }
        assert_eq!(generate_recommendations(Assessment::Normal).len(), 4);
        assert_eq!(generate_recommendations(Assessment::SevereLoss).len(), 6);
        assert_eq!(
            generate_recommendations(Assessment::MildLoss)[0],
            "Your results suggest mild hearing loss in certain frequencies."
        );
    }

    #[test]
    fn test_hearing_tips_are_deterministic() {
        let tips = generate_hearing_tips();
        assert_eq!(tips.len(), 10);
        assert_eq!(tips, generate_hearing_tips());
        assert!(tips[0].starts_with("Protect Your Ears"));
    }

    #[test]
    fn test_hearing_level_bands() {
        assert_eq!(hearing_level(0.0), HearingLevel::Good);
        assert_eq!(hearing_level(0.249), HearingLevel::Good);
        assert_eq!(hearing_level(0.25), HearingLevel::Fair);
        assert_eq!(hearing_level(0.4), HearingLevel::Loss);
        assert_eq!(hearing_level(0.6), HearingLevel::SignificantLoss);
        assert_eq!(HearingLevel::SignificantLoss.label(), "Significant Loss");
    }

    #[test]
    fn test_check_complete() {
        assert!(check_complete(TestedEar::Left, &uniform(0.2)).is_ok());

        let mut partial = uniform(0.2);
        partial.remove(3);
        match check_complete(TestedEar::Right, &partial) {
            Err(ScoringError::IncompleteResults { ear, missing, .. }) => {
                assert_eq!(ear, TestedEar::Right);
                assert_eq!(missing, vec![1000]);
            }
            other => panic!("unexpected: {:?}", other),
        }

        // 重複
        let mut duplicated = uniform(0.2);
        duplicated.push(ThresholdSample::new(8000, 0.3));
        assert!(check_complete(TestedEar::Left, &duplicated).is_err());

        // 順序違い
        let mut reversed = uniform(0.2);
        reversed.reverse();
        assert!(check_complete(TestedEar::Left, &reversed).is_err());
    }

    #[test]
    fn test_evaluate_builds_result() {
        let left = from_thresholds([0.3, 0.1, 0.1, 0.05, 0.1, 0.15, 0.2]);
        let right = from_thresholds([0.35, 0.1, 0.05, 0.05, 0.1, 0.2, 0.25]);
        let answers = [1, 0, 0, 1, 0, 0, 0];

        let result = evaluate(&answers, &left, &right).unwrap();
        assert_eq!(result.theoretical_score, 10);
        assert_eq!(result.overall_assessment, Assessment::Normal);
        assert_eq!(result.recommendations, generate_recommendations(Assessment::Normal));
        assert_eq!(result.hearing_tips, generate_hearing_tips());
        // 順序は保持される
        assert_eq!(result.left_ear_results, left);
        assert_eq!(result.right_ear_results, right);
    }

    #[test]
    fn test_evaluate_rejects_incomplete() {
        let left = uniform(0.2);
        let right: EarResultSet = uniform(0.2).into_iter().take(5).collect();
        let err = evaluate(&[0; 7], &left, &right).unwrap_err();
        assert!(matches!(
            err,
            ScoringError::IncompleteResults {
                ear: TestedEar::Right,
                ..
            }
        ));
    }

    #[test]
    fn test_evaluate_rejects_out_of_range_answers() {
        let ear = uniform(0.2);

        assert_eq!(
            evaluate(&[7, 0, 0, 0, 0, 0, 0], &ear, &ear),
            Err(ScoringError::InvalidAnswer {
                question: "q1",
                answer: 7
            })
        );
        assert_eq!(
            evaluate(&[0, 0, 0, 0, 0, 0, usize::MAX], &ear, &ear),
            Err(ScoringError::InvalidAnswer {
                question: "q7",
                answer: usize::MAX
            })
        );
        // 上限ちょうどは有効
        assert!(evaluate(&[4, 4, 4, 4, 4, 2, 4], &ear, &ear).is_ok());
    }

    #[test]
    fn test_percentage_recomputed_from_result_matches() {
        let left = from_thresholds([0.6, 0.3, 0.2, 0.2, 0.25, 0.4, 0.55]);
        let right = from_thresholds([0.65, 0.35, 0.2, 0.15, 0.3, 0.45, 0.6]);

        let displayed = calculate_overall_percentage(&left, &right).unwrap();
        let result = evaluate(&[2, 1, 1, 2, 1, 2, 1], &left, &right).unwrap();
        let recomputed =
            calculate_overall_percentage(&result.left_ear_results, &result.right_ear_results)
                .unwrap();
        assert_eq!(displayed, recomputed);
    }
}
