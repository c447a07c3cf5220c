//! PHI stripping applied to the structured input before any external model
//! call. Output carries no direct identifier, free-text name, email or phone.

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::services::structured_input::StructuredInput;

lazy_static! {
    static ref SALUTATION_RE: Regex =
        Regex::new(r"(?i)\b(mr|mrs|ms|dr|patient|name)\b\.?:?").unwrap();
    static ref NAME_PAIR_RE: Regex =
        Regex::new(r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b").unwrap();
    static ref PHONE_LIKE_RE: Regex = Regex::new(r"\+?\d[\d().\-\s]{5,}\d").unwrap();
    static ref EMAIL_LIKE_RE: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// The anonymized projection handed to the model: a session id replaces every
/// caller-facing identifier, the age collapses to a five-year band.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymizedInput {
    pub session_id: Uuid,
    pub age_band: String,
    pub bp_trend: Vec<f64>,
    pub glucose_trend: Vec<f64>,
    pub heart_rate_trend: Vec<f64>,
    pub weight_trend: Vec<f64>,
    pub recent_symptoms: Vec<String>,
    pub recent_lab_values: Vec<crate::services::structured_input::LabValue>,
}

/// Exact ages collapse to "L-L+4" with L ≡ 0 (mod 5); unknown or negative
/// ages become "unknown".
pub fn age_band(age: Option<i64>) -> String {
    match age {
        Some(age) if age >= 0 => {
            let lower = (age / 5) * 5;
            format!("{}-{}", lower, lower + 4)
        }
        _ => "unknown".to_string(),
    }
}

/// Normalize one free-text symptom: drop salutation labels, redact
/// capitalized name pairs, phone-like runs and email-like tokens, then
/// lowercase and collapse whitespace. Placeholders stay upper case.
pub fn sanitize_symptom(raw: &str) -> String {
    let text = raw.trim();
    let text = SALUTATION_RE.replace_all(text, " ");
    let text = NAME_PAIR_RE.replace_all(&text, "[REDACTED]");
    let text = PHONE_LIKE_RE.replace_all(&text, "[PHONE]");
    let text = EMAIL_LIKE_RE.replace_all(&text, "[EMAIL]");
    let text = text.to_lowercase();
    let text = text
        .replace("[redacted]", "[REDACTED]")
        .replace("[phone]", "[PHONE]")
        .replace("[email]", "[EMAIL]");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// Strip PHI from a structured input. Numeric series and lab rows pass
/// through unchanged; the fresh session id carries no link to the patient.
pub fn anonymize(input: &StructuredInput) -> AnonymizedInput {
    AnonymizedInput {
        session_id: Uuid::new_v4(),
        age_band: age_band(input.age),
        bp_trend: input.bp_trend.clone(),
        glucose_trend: input.glucose_trend.clone(),
        heart_rate_trend: input.heart_rate_trend.clone(),
        weight_trend: input.weight_trend.clone(),
        recent_symptoms: input
            .recent_symptoms
            .iter()
            .map(|s| sanitize_symptom(s))
            .collect(),
        recent_lab_values: input.recent_lab_values.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_bands_are_five_year_aligned() {
        assert_eq!(age_band(Some(0)), "0-4");
        assert_eq!(age_band(Some(4)), "0-4");
        assert_eq!(age_band(Some(5)), "5-9");
        assert_eq!(age_band(Some(37)), "35-39");
        assert_eq!(age_band(Some(80)), "80-84");
        assert_eq!(age_band(None), "unknown");
        assert_eq!(age_band(Some(-1)), "unknown");
    }

    #[test]
    fn name_pairs_are_redacted() {
        let out = sanitize_symptom("John Smith reports chest pain");
        assert!(!out.contains("john"));
        assert!(!out.contains("smith"));
        assert!(out.contains("[REDACTED]"));
        assert!(out.contains("chest pain"));
    }

    #[test]
    fn salutations_and_labels_are_dropped() {
        let out = sanitize_symptom("Mr. patient complains of fatigue");
        assert!(!out.contains("mr"));
        assert!(!out.contains("patient"));
        assert!(out.contains("fatigue"));
    }

    #[test]
    fn phones_and_emails_become_placeholders() {
        let out = sanitize_symptom("callback +1 (555) 123-4567 or jane@clinic.org");
        assert!(out.contains("[PHONE]"));
        assert!(out.contains("[EMAIL]"));
        assert!(!out.contains("555"));
        assert!(!out.contains("jane@clinic.org"));
    }

    #[test]
    fn output_is_lowercase_with_collapsed_whitespace() {
        let out = sanitize_symptom("  Severe   HEADACHE   since   Monday  ");
        assert_eq!(out, "severe headache since monday");
    }

    #[test]
    fn anonymized_input_carries_no_identifiers() {
        let input = StructuredInput {
            age: Some(52),
            bp_trend: vec![165.0, 123.0, 121.0],
            glucose_trend: vec![],
            heart_rate_trend: vec![],
            weight_trend: vec![],
            recent_symptoms: vec!["Jane Doe dizziness, call 5551234567".into()],
            recent_lab_values: vec![],
        };
        let out = anonymize(&input);
        assert_eq!(out.age_band, "50-54");
        assert_eq!(out.bp_trend, input.bp_trend);
        let joined = out.recent_symptoms.join(" ");
        assert!(!joined.to_lowercase().contains("jane"));
        assert!(!joined.contains("5551234567"));
    }
}
