//! Pure, deterministic clinical analytics: no I/O, no clock, no state.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::records::{LabResult, VitalRecord, VitalType};

lazy_static! {
    static ref SYMPTOM_RE: Regex = Regex::new(
        r"(?i)(chest pain|dyspnea|fatigue|syncope|dizziness|palpitation|edema|blurred vision)"
    )
    .unwrap();
    static ref RANGE_BOTH_RE: Regex =
        Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*[-–]\s*(-?\d+(?:\.\d+)?)\s*$").unwrap();
    static ref RANGE_UPPER_RE: Regex = Regex::new(r"^\s*[<≤]\s*(-?\d+(?:\.\d+)?)\s*$").unwrap();
    static ref RANGE_LOWER_RE: Regex = Regex::new(r"^\s*[>≥]\s*(-?\d+(?:\.\d+)?)\s*$").unwrap();
}

pub const DEFAULT_Z_THRESHOLD: f64 = 2.0;

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Anomaly {
    pub index: usize,
    pub value: f64,
    pub z: f64,
}

/// Z-score outliers over the full series. Returns nothing for fewer than
/// three points or a flat series (σ = 0).
pub fn zscore_anomalies(series: &[f64], threshold: f64) -> Vec<Anomaly> {
    if series.len() < 3 {
        return Vec::new();
    }
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let variance = series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let sigma = variance.sqrt();
    if sigma == 0.0 {
        return Vec::new();
    }

    series
        .iter()
        .enumerate()
        .filter_map(|(index, &value)| {
            // The reported z is the 2-decimal one, so the threshold applies
            // to it as well (a 1.996 spike still reads as 2.0).
            let z = round2((value - mean) / sigma);
            if z.abs() >= threshold {
                Some(Anomaly { index, value, z })
            } else {
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTrend {
    pub metric: VitalType,
    pub points: Vec<f64>,
    pub latest: Option<f64>,
    pub delta: f64,
    pub anomalies: Vec<Anomaly>,
}

/// Per-metric trend over a patient's vitals: numeric projection ordered
/// oldest to newest, with delta = last − first and z-score anomalies.
pub fn metric_trends(vitals: &[VitalRecord]) -> Vec<MetricTrend> {
    VitalType::ALL
        .iter()
        .map(|&metric| {
            let mut records: Vec<&VitalRecord> = vitals
                .iter()
                .filter(|v| v.vital_type == metric.as_str())
                .collect();
            records.sort_by_key(|v| v.recorded_at);

            let points: Vec<f64> = records
                .iter()
                .filter_map(|v| v.numeric_value)
                .filter(|n| n.is_finite())
                .collect();

            let latest = points.last().copied();
            let delta = match (points.first(), points.last()) {
                (Some(first), Some(last)) if points.len() > 1 => round2(last - first),
                _ => 0.0,
            };

            MetricTrend {
                metric,
                anomalies: zscore_anomalies(&points, DEFAULT_Z_THRESHOLD),
                points,
                latest,
                delta,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    High,
    Low,
    Normal,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeBounds {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

/// Parse a reference-range string. Unparsable input yields unbounded sides;
/// parsing is idempotent over its own output representation.
pub fn parse_reference_range(raw: &str) -> RangeBounds {
    if let Some(caps) = RANGE_BOTH_RE.captures(raw) {
        let low = caps[1].parse::<f64>().ok();
        let high = caps[2].parse::<f64>().ok();
        return RangeBounds { low, high };
    }
    if let Some(caps) = RANGE_UPPER_RE.captures(raw) {
        return RangeBounds {
            low: None,
            high: caps[1].parse::<f64>().ok(),
        };
    }
    if let Some(caps) = RANGE_LOWER_RE.captures(raw) {
        return RangeBounds {
            low: caps[1].parse::<f64>().ok(),
            high: None,
        };
    }
    RangeBounds {
        low: None,
        high: None,
    }
}

/// Flag a lab value against its reference range.
pub fn flag_lab(numeric_value: Option<f64>, reference_range: Option<&str>) -> LabStatus {
    let value = match numeric_value {
        Some(v) if v.is_finite() => v,
        _ => return LabStatus::Unknown,
    };
    let bounds = match reference_range {
        Some(raw) => parse_reference_range(raw),
        None => return LabStatus::Unknown,
    };
    if bounds.low.is_none() && bounds.high.is_none() {
        return LabStatus::Unknown;
    }
    if let Some(high) = bounds.high {
        if value > high {
            return LabStatus::High;
        }
    }
    if let Some(low) = bounds.low {
        if value < low {
            return LabStatus::Low;
        }
    }
    LabStatus::Normal
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedLab {
    pub id: uuid::Uuid,
    pub test_name: String,
    pub value: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    pub status: LabStatus,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

pub fn flag_labs(labs: &[LabResult]) -> Vec<FlaggedLab> {
    labs.iter()
        .map(|lab| FlaggedLab {
            id: lab.id,
            test_name: lab.test_name.clone(),
            value: lab.value.clone(),
            unit: lab.unit.clone(),
            reference_range: lab.reference_range.clone(),
            status: flag_lab(lab.numeric_value, lab.reference_range.as_deref()),
            recorded_at: lab.recorded_at,
        })
        .collect()
}

pub fn is_concerning_symptom(symptom: &str) -> bool {
    SYMPTOM_RE.is_match(symptom)
}

/// Count of symptom strings matching the concerning-symptom pattern.
pub fn concerning_symptom_matches(symptoms: &[String]) -> u32 {
    symptoms.iter().filter(|s| is_concerning_symptom(s)).count() as u32
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Moderate,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskContributor {
    pub source: &'static str,
    pub weight: f64,
    pub subscore: f64,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    pub score: f64,
    pub tier: RiskTier,
    pub contributors: Vec<RiskContributor>,
}

/// Weighted composite risk score in [0, 100] with its four contributors.
pub fn composite_risk(
    anomaly_count: u32,
    active_flag_count: u32,
    labs_evaluated: u32,
    labs_out_of_range: u32,
    symptoms: &[String],
) -> RiskScore {
    let vital_score = (anomaly_count as f64 * 20.0).min(100.0);
    let flag_score = (active_flag_count as f64 * 25.0).min(100.0);
    let lab_score = if labs_evaluated == 0 {
        0.0
    } else {
        (100.0 * labs_out_of_range as f64 / labs_evaluated as f64).round()
    };
    let symptom_matches = concerning_symptom_matches(symptoms);
    let symptom_score = (symptom_matches as f64 * 25.0).min(100.0);

    let contributors = vec![
        RiskContributor {
            source: "vital_anomalies",
            weight: 0.30,
            subscore: vital_score,
            detail: format!("{anomaly_count} anomalous vital reading(s)"),
        },
        RiskContributor {
            source: "ai_risk_flags",
            weight: 0.30,
            subscore: flag_score,
            detail: format!("{active_flag_count} active trend flag(s)"),
        },
        RiskContributor {
            source: "lab_out_of_range",
            weight: 0.25,
            subscore: lab_score,
            detail: format!("{labs_out_of_range} of {labs_evaluated} evaluated lab(s) out of range"),
        },
        RiskContributor {
            source: "concerning_symptoms",
            weight: 0.15,
            subscore: symptom_score,
            detail: format!("{symptom_matches} recent symptom report(s) matched"),
        },
    ];

    let score = contributors
        .iter()
        .map(|c| c.weight * c.subscore)
        .sum::<f64>()
        .round();

    let tier = if score < 25.0 {
        RiskTier::Low
    } else if score < 50.0 {
        RiskTier::Moderate
    } else if score < 75.0 {
        RiskTier::High
    } else {
        RiskTier::Critical
    };

    RiskScore {
        score,
        tier,
        contributors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn short_series_yields_nothing() {
        assert!(zscore_anomalies(&[120.0, 121.0], 2.0).is_empty());
        assert!(zscore_anomalies(&[], 2.0).is_empty());
    }

    #[test]
    fn flat_series_yields_nothing() {
        assert!(zscore_anomalies(&[98.0, 98.0, 98.0, 98.0], 2.0).is_empty());
    }

    #[test]
    fn spike_is_detected() {
        // Raw z here is 1.9966; the reported (rounded) z is 2.0 and counts.
        let anomalies = zscore_anomalies(&[120.0, 122.0, 121.0, 123.0, 165.0], 2.0);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].index, 4);
        assert_eq!(anomalies[0].value, 165.0);
        assert_eq!(anomalies[0].z, 2.0);
    }

    #[test]
    fn every_returned_entry_clears_the_threshold() {
        let series = [10.0, 10.5, 9.5, 10.0, 40.0, -20.0, 10.0];
        for a in zscore_anomalies(&series, 1.5) {
            assert!(a.z.abs() >= 1.5, "z {} below threshold", a.z);
        }
    }

    fn vital(vital_type: &str, value: f64, minutes: i64) -> VitalRecord {
        VitalRecord {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            vital_type: vital_type.to_string(),
            value: value.to_string(),
            numeric_value: Some(value),
            unit: None,
            recorded_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes),
        }
    }

    #[test]
    fn trends_cover_all_metrics_with_delta() {
        let vitals = vec![
            vital("BP", 120.0, 0),
            vital("BP", 122.0, 10),
            vital("BP", 165.0, 20),
            vital("WEIGHT", 80.0, 0),
        ];
        let trends = metric_trends(&vitals);
        assert_eq!(trends.len(), 4);

        let bp = trends.iter().find(|t| t.metric == VitalType::Bp).unwrap();
        assert_eq!(bp.points, vec![120.0, 122.0, 165.0]);
        assert_eq!(bp.latest, Some(165.0));
        assert_eq!(bp.delta, 45.0);

        let weight = trends.iter().find(|t| t.metric == VitalType::Weight).unwrap();
        assert_eq!(weight.delta, 0.0);
        assert_eq!(weight.latest, Some(80.0));

        let glucose = trends.iter().find(|t| t.metric == VitalType::Glucose).unwrap();
        assert!(glucose.points.is_empty());
        assert_eq!(glucose.latest, None);
    }

    #[test]
    fn trend_sorts_out_of_order_readings() {
        let vitals = vec![vital("GLUCOSE", 140.0, 30), vital("GLUCOSE", 90.0, 0)];
        let trends = metric_trends(&vitals);
        let glucose = trends.iter().find(|t| t.metric == VitalType::Glucose).unwrap();
        assert_eq!(glucose.points, vec![90.0, 140.0]);
        assert_eq!(glucose.delta, 50.0);
    }

    #[test]
    fn reference_range_forms() {
        assert_eq!(
            parse_reference_range("70-100"),
            RangeBounds { low: Some(70.0), high: Some(100.0) }
        );
        assert_eq!(
            parse_reference_range(" 0.5 – 1.2 "),
            RangeBounds { low: Some(0.5), high: Some(1.2) }
        );
        assert_eq!(
            parse_reference_range("< 5"),
            RangeBounds { low: None, high: Some(5.0) }
        );
        assert_eq!(
            parse_reference_range("≤ 5.5"),
            RangeBounds { low: None, high: Some(5.5) }
        );
        assert_eq!(
            parse_reference_range("> 60"),
            RangeBounds { low: Some(60.0), high: None }
        );
        assert_eq!(
            parse_reference_range("≥ 0.8"),
            RangeBounds { low: Some(0.8), high: None }
        );
        assert_eq!(
            parse_reference_range("negative"),
            RangeBounds { low: None, high: None }
        );
        assert_eq!(
            parse_reference_range(""),
            RangeBounds { low: None, high: None }
        );
    }

    #[test]
    fn lab_flagging() {
        assert_eq!(flag_lab(Some(150.0), Some("70-100")), LabStatus::High);
        assert_eq!(flag_lab(Some(60.0), Some("70-100")), LabStatus::Low);
        assert_eq!(flag_lab(Some(85.0), Some("70-100")), LabStatus::Normal);
        assert_eq!(flag_lab(None, Some("70-100")), LabStatus::Unknown);
        assert_eq!(flag_lab(Some(85.0), Some("see notes")), LabStatus::Unknown);
        assert_eq!(flag_lab(Some(85.0), None), LabStatus::Unknown);
        assert_eq!(flag_lab(Some(4.0), Some("< 5")), LabStatus::Normal);
        assert_eq!(flag_lab(Some(6.0), Some("< 5")), LabStatus::High);
        assert_eq!(flag_lab(Some(50.0), Some("> 60")), LabStatus::Low);
    }

    #[test]
    fn symptom_matching_is_case_insensitive() {
        let symptoms = vec![
            "Chest Pain after exercise".to_string(),
            "mild headache".to_string(),
            "reports DIZZINESS".to_string(),
        ];
        assert_eq!(concerning_symptom_matches(&symptoms), 2);
    }

    #[test]
    fn composite_risk_bounds_and_tiers() {
        let none = composite_risk(0, 0, 0, 0, &[]);
        assert_eq!(none.score, 0.0);
        assert_eq!(none.tier, RiskTier::Low);

        let max = composite_risk(10, 4, 4, 4, &[
            "chest pain".into(),
            "syncope".into(),
            "edema".into(),
            "dyspnea".into(),
        ]);
        assert_eq!(max.score, 100.0);
        assert_eq!(max.tier, RiskTier::Critical);

        for score in [&none, &max] {
            assert!(score.score >= 0.0 && score.score <= 100.0);
            assert_eq!(score.contributors.len(), 4);
        }
    }

    #[test]
    fn lab_subscore_zero_when_nothing_evaluated() {
        let risk = composite_risk(0, 0, 0, 0, &[]);
        let lab = risk
            .contributors
            .iter()
            .find(|c| c.source == "lab_out_of_range")
            .unwrap();
        assert_eq!(lab.subscore, 0.0);
    }

    #[test]
    fn tier_thresholds() {
        // 2 anomalies → 40·0.3 = 12 → low
        assert_eq!(composite_risk(2, 0, 0, 0, &[]).tier, RiskTier::Low);
        // 5 anomalies → 100·0.3 = 30 → moderate
        assert_eq!(composite_risk(5, 0, 0, 0, &[]).tier, RiskTier::Moderate);
        // + 4 flags → 30 + 30 = 60 → high
        assert_eq!(composite_risk(5, 4, 0, 0, &[]).tier, RiskTier::High);
        // + all labs out of range → 85 → critical
        assert_eq!(composite_risk(5, 4, 2, 2, &[]).tier, RiskTier::Critical);
    }
}
