//! 自己評価アンケート
//!
//! 標準的な聴力質問票に基づく7問。回答は選択肢のインデックスで表し、
//! 各設問の重み (1 ~ 5) を掛けて理論スコアを求める。

use serde::Serialize;

/// 設問の採点方法
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    /// 回答インデックス × 重み（選択肢が重症度順に並んでいる）
    Scaled,
    /// 0 以外の回答なら重みをそのまま加算（選択肢がカテゴリ）
    Presence,
}

/// 設問
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Question {
    pub id: &'static str,
    pub question: &'static str,
    pub options: &'static [&'static str],
    /// 重み（大きいほど懸念度が高い）
    pub weight: u32,
    pub scoring: Scoring,
}

impl Question {
    /// この設問の得点
    ///
    /// 範囲外の回答でもパニックしない（上限で飽和する）。範囲の検証は
    /// `is_valid_answer` で行う。
    pub fn score(&self, answer: usize) -> u32 {
        match self.scoring {
            Scoring::Scaled => u32::try_from(answer)
                .unwrap_or(u32::MAX)
                .saturating_mul(self.weight),
            Scoring::Presence => {
                if answer > 0 {
                    self.weight
                } else {
                    0
                }
            }
        }
    }

    /// 回答インデックスが選択肢の範囲内か
    pub fn is_valid_answer(&self, answer: usize) -> bool {
        answer < self.options.len()
    }
}

const FREQUENCY_OPTIONS: &[&str] = &["Never", "Rarely", "Occasionally", "Often", "Always"];

/// 設問一覧（この順序で回答を受け取る）
pub const QUESTIONS: [Question; 7] = [
    Question {
        id: "q1",
        question: "How would you describe your hearing?",
        options: &[
            "Excellent",
            "Good",
            "I have a little trouble",
            "I have some trouble",
            "I have a lot of trouble",
        ],
        weight: 5,
        scoring: Scoring::Scaled,
    },
    Question {
        id: "q2",
        question: "In conversations in a quiet environment, do people seem to mumble?",
        options: FREQUENCY_OPTIONS,
        weight: 4,
        scoring: Scoring::Scaled,
    },
    Question {
        id: "q3",
        question: "Do you find it hard to have a conversation on the phone?",
        options: FREQUENCY_OPTIONS,
        weight: 4,
        scoring: Scoring::Scaled,
    },
    Question {
        id: "q4",
        question: "Do you find it hard to follow conversations in a noisy environment? (such as in noisy restaurants or in a crowd)",
        options: FREQUENCY_OPTIONS,
        weight: 5,
        scoring: Scoring::Scaled,
    },
    Question {
        id: "q5",
        question: "Do you often ask people to repeat themselves?",
        options: FREQUENCY_OPTIONS,
        weight: 4,
        scoring: Scoring::Scaled,
    },
    Question {
        id: "q6",
        question: "Do you feel like one ear hears significantly better than the other one? If so, which one?",
        options: &["Both about the same", "Left", "Right"],
        weight: 3,
        scoring: Scoring::Presence,
    },
    Question {
        id: "q7",
        question: "Do you have difficulty hearing the television or radio at normal volume?",
        options: FREQUENCY_OPTIONS,
        weight: 4,
        scoring: Scoring::Scaled,
    },
];

/// 理論スコアを計算
///
/// 設問数を超える回答は無視し、不足分は 0 点として扱う（エラーにしない）。
///
/// # Examples
///
/// ```
/// # use hearing_screen::questionnaire::calculate_theoretical_score;
/// assert_eq!(calculate_theoretical_score(&[4, 4, 4, 4, 4, 1, 4]), 107);
/// assert_eq!(calculate_theoretical_score(&[]), 0);
/// ```
pub fn calculate_theoretical_score(answers: &[usize]) -> u32 {
    QUESTIONS
        .iter()
        .zip(answers)
        .map(|(question, &answer)| question.score(answer))
        .fold(0, u32::saturating_add)
}

/// 最初の範囲外の回答を (設問 ID, 回答) で返す（設問数を超える分は対象外）
pub fn find_invalid_answer(answers: &[usize]) -> Option<(&'static str, usize)> {
    QUESTIONS
        .iter()
        .zip(answers)
        .find(|(question, &answer)| !question.is_valid_answer(answer))
        .map(|(question, &answer)| (question.id, answer))
}

/// 全設問の最大スコア
pub fn max_theoretical_score() -> u32 {
    QUESTIONS
        .iter()
        .map(|q| q.score(q.options.len().saturating_sub(1)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights() {
        let weights: Vec<u32> = QUESTIONS.iter().map(|q| q.weight).collect();
        assert_eq!(weights, vec![5, 4, 4, 5, 4, 3, 4]);
        assert!(QUESTIONS.iter().all(|q| (1..=5).contains(&q.weight)));
    }

    #[test]
    fn test_theoretical_score_documented_case() {
        // 4*5 + 4*4 + 4*4 + 4*5 + 4*4 + 3 + 4*4
        assert_eq!(calculate_theoretical_score(&[4, 4, 4, 4, 4, 1, 4]), 107);
    }

    #[test]
    fn test_ear_preference_is_presence_scored() {
        let none = [0, 0, 0, 0, 0, 0, 0];
        let left = [0, 0, 0, 0, 0, 1, 0];
        let right = [0, 0, 0, 0, 0, 2, 0];
        assert_eq!(calculate_theoretical_score(&none), 0);
        assert_eq!(calculate_theoretical_score(&left), 3);
        assert_eq!(calculate_theoretical_score(&right), 3);
    }

    #[test]
    fn test_missing_and_extra_answers() {
        assert_eq!(calculate_theoretical_score(&[2]), 10);
        assert_eq!(calculate_theoretical_score(&[1, 1]), 9);
        assert_eq!(
            calculate_theoretical_score(&[0, 0, 0, 0, 0, 0, 1, 4, 4, 4]),
            4
        );
    }

    #[test]
    fn test_huge_answer_does_not_overflow() {
        assert_eq!(
            calculate_theoretical_score(&[1_000_000_000, 0, 0, 0, 0, 0, 0]),
            u32::MAX
        );
        // 2^32 + 1 が 1 に切り詰められて 5 点になってはならない
        assert_eq!(calculate_theoretical_score(&[(1usize << 32) + 1]), u32::MAX);
        assert_eq!(calculate_theoretical_score(&[usize::MAX; 7]), u32::MAX);
    }

    #[test]
    fn test_find_invalid_answer() {
        assert!(find_invalid_answer(&[4, 4, 4, 4, 4, 2, 4]).is_none());
        assert!(find_invalid_answer(&[0, 0, 0, 0, 0, 0, 0, 99]).is_none());

        assert_eq!(find_invalid_answer(&[7, 0, 0]), Some(("q1", 7)));
        assert_eq!(find_invalid_answer(&[0, 0, 0, 0, 0, 3]), Some(("q6", 3)));
    }

    #[test]
    fn test_max_score() {
        assert_eq!(max_theoretical_score(), 4 * 5 + 4 * 4 + 4 * 4 + 4 * 5 + 4 * 4 + 3 + 4 * 4);
    }

    #[test]
    fn test_answer_validation() {
        assert!(QUESTIONS[0].is_valid_answer(4));
        assert!(!QUESTIONS[0].is_valid_answer(5));
        assert!(QUESTIONS[5].is_valid_answer(2));
        assert!(!QUESTIONS[5].is_valid_answer(3));
    }
}
