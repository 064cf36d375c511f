//! 閾値レコーダー
//!
//! 検査中に測定した閾値を耳・周波数ごとに保持する。
//! 出力は常に標準周波数の順序で並ぶ。

use crate::types::{is_test_frequency, EarResultSet, TestedEar, ThresholdSample, TEST_FREQUENCIES};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    #[error("標準検査周波数ではありません: {0}Hz")]
    UnknownFrequency(u32),

    #[error("閾値が不正です: {0}")]
    InvalidThreshold(f64),

    #[error("{ear} の未測定の周波数があります: {missing:?}")]
    IncompleteResults { ear: TestedEar, missing: Vec<u32> },
}

/// 測定済み閾値の記録
#[derive(Debug, Clone, Default)]
pub struct ThresholdRecorder {
    left: BTreeMap<u32, f64>,
    right: BTreeMap<u32, f64>,
}

impl ThresholdRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn ear_mut(&mut self, ear: TestedEar) -> &mut BTreeMap<u32, f64> {
        match ear {
            TestedEar::Left => &mut self.left,
            TestedEar::Right => &mut self.right,
        }
    }

    fn ear(&self, ear: TestedEar) -> &BTreeMap<u32, f64> {
        match ear {
            TestedEar::Left => &self.left,
            TestedEar::Right => &self.right,
        }
    }

    /// 閾値を記録
    ///
    /// 値は 0.0 ~ 1.0 に丸める。同じ周波数を再測定した場合は小さい方を残す
    /// （一度でも小さい音量で聞こえたならそれが閾値）。
    pub fn record(&mut self, ear: TestedEar, frequency: u32, threshold: f64) -> Result<(), RecordError> {
        if !is_test_frequency(frequency) {
            return Err(RecordError::UnknownFrequency(frequency));
        }
        if threshold.is_nan() {
            return Err(RecordError::InvalidThreshold(threshold));
        }

        let threshold = threshold.clamp(0.0, 1.0);
        let slot = self.ear_mut(ear).entry(frequency).or_insert(threshold);
        if threshold < *slot {
            *slot = threshold;
        }
        log::debug!("閾値記録: {} {}Hz = {:.3}", ear, frequency, *slot);
        Ok(())
    }

    /// 最大音量でも聞こえなかった周波数を記録
    pub fn record_not_heard(&mut self, ear: TestedEar, frequency: u32) -> Result<(), RecordError> {
        self.record(ear, frequency, 1.0)
    }

    /// 記録済みの閾値
    pub fn threshold(&self, ear: TestedEar, frequency: u32) -> Option<f64> {
        self.ear(ear).get(&frequency).copied()
    }

    /// 未測定の周波数（標準順）
    pub fn missing(&self, ear: TestedEar) -> Vec<u32> {
        let recorded = self.ear(ear);
        TEST_FREQUENCIES
            .iter()
            .copied()
            .filter(|f| !recorded.contains_key(f))
            .collect()
    }

    /// 両耳とも全周波数を測定済みか
    pub fn is_complete(&self) -> bool {
        TestedEar::ALL.iter().all(|&ear| self.missing(ear).is_empty())
    }

    /// 片耳分の結果（標準順、未測定の周波数は含まない）
    pub fn results(&self, ear: TestedEar) -> EarResultSet {
        let recorded = self.ear(ear);
        TEST_FREQUENCIES
            .iter()
            .filter_map(|&f| recorded.get(&f).map(|&t| ThresholdSample::new(f, t)))
            .collect()
    }

    /// 記録を終えて (左, 右) の結果を返す
    ///
    /// 未測定の周波数が残っていれば `IncompleteResults`。
    pub fn finish(self) -> Result<(EarResultSet, EarResultSet), RecordError> {
        for ear in TestedEar::ALL {
            let missing = self.missing(ear);
            if !missing.is_empty() {
                return Err(RecordError::IncompleteResults { ear, missing });
            }
        }
        Ok((self.results(TestedEar::Left), self.results(TestedEar::Right)))
    }
}
