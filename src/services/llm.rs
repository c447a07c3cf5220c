use anyhow::anyhow;
use reqwest::{header, Client};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::Config;
use crate::models::summary::RiskFlags;
use crate::services::anonymizer::AnonymizedInput;

/// Fixed disclaimer carried by every summary, model-written or rendered.
pub const DISCLAIMER: &str =
    "This summary is AI-assisted, intended for clinician review only, and is not a diagnosis.";

pub const SECTION_HEADERS: [&str; 7] = [
    "Clinical Overview",
    "Vital Sign Trends",
    "Laboratory Findings",
    "Symptom Analysis",
    "Risk Assessment",
    "Recommended Monitoring",
    "Disclaimer",
];

const SUMMARY_SYSTEM_PROMPT: &str = "You are a clinical documentation assistant. \
Summarize the provided anonymized patient data for a treating clinician. \
Structure the response into exactly these sections: Clinical Overview, \
Vital Sign Trends, Laboratory Findings, Symptom Analysis, Risk Assessment, \
Recommended Monitoring, Disclaimer. Describe observations and trends only. \
Never diagnose, never name conditions as established facts, and never invent \
data not present in the input. End with the provided disclaimer verbatim.";

const CHAT_SYSTEM_PROMPT: &str = "You are a clinical assistant answering a \
clinician's question about one anonymized patient. Answer strictly from the \
provided context; say so when the context does not contain the answer. Never \
diagnose. Close with a one-line reminder that the answer is advisory and not \
a diagnosis.";

/// Thin OpenAI-style chat-completions client. A missing key or any transport
/// or shape error makes the caller fall back to the deterministic renderer.
pub struct LlmClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: config.llm_api_key.clone(),
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            model: config.llm_model.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn generate_summary(
        &self,
        input: &AnonymizedInput,
        flags: &RiskFlags,
    ) -> anyhow::Result<String> {
        let user_content = format!(
            "Anonymized patient context:\n{}\n\nDeterministic risk flags:\n{}\n\nDisclaimer to append verbatim: {}",
            serde_json::to_string_pretty(input)?,
            serde_json::to_string_pretty(flags)?,
            DISCLAIMER,
        );
        self.chat(SUMMARY_SYSTEM_PROMPT, &user_content, 0.25).await
    }

    pub async fn answer_question(
        &self,
        input: &AnonymizedInput,
        question: &str,
    ) -> anyhow::Result<String> {
        let user_content = format!(
            "Context:\n{}\n\nQuestion: {question}",
            serde_json::to_string_pretty(input)?,
        );
        self.chat(CHAT_SYSTEM_PROMPT, &user_content, 0.2).await
    }

    async fn chat(
        &self,
        system_prompt: &str,
        user_content: &str,
        temperature: f64,
    ) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("LLM provider not configured"))?;

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_content }
            ],
            "temperature": temperature,
            "max_tokens": 1500
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM provider error {status}: {text}"));
        }

        let payload: Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("Unexpected LLM response shape"))?
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(anyhow!("LLM returned an empty completion"));
        }
        Ok(content)
    }
}

fn describe_trend(label: &str, unit: &str, trend: &[f64]) -> String {
    match trend.split_first() {
        None => format!("- {label}: no recent readings."),
        Some((latest, rest)) if rest.is_empty() => {
            format!("- {label}: single reading of {latest} {unit}.")
        }
        Some((latest, rest)) => {
            let oldest = rest.last().unwrap_or(latest);
            format!(
                "- {label}: latest {latest} {unit} across {} readings (from {oldest}).",
                trend.len()
            )
        }
    }
}

/// Deterministic renderer used whenever the model is unreachable or not
/// configured. Produces the same enumerated sections as the model prompt.
pub fn render_fallback_summary(input: &AnonymizedInput, flags: &RiskFlags) -> String {
    let mut out = String::new();

    out.push_str("## Clinical Overview\n");
    out.push_str(&format!(
        "Automated summary for an anonymized patient (age band {}), generated from {} recent symptom report(s), {} lab value(s) and the tracked vital-sign trends.\n\n",
        input.age_band,
        input.recent_symptoms.len(),
        input.recent_lab_values.len(),
    ));

    out.push_str("## Vital Sign Trends\n");
    out.push_str(&describe_trend("Blood pressure", "mmHg", &input.bp_trend));
    out.push('\n');
    out.push_str(&describe_trend("Glucose", "mg/dL", &input.glucose_trend));
    out.push('\n');
    out.push_str(&describe_trend("Heart rate", "bpm", &input.heart_rate_trend));
    out.push('\n');
    out.push_str(&describe_trend("Weight", "kg", &input.weight_trend));
    out.push_str("\n\n");

    out.push_str("## Laboratory Findings\n");
    if input.recent_lab_values.is_empty() {
        out.push_str("No recent laboratory results on record.\n");
    } else {
        for lab in &input.recent_lab_values {
            let range = lab.reference_range.as_deref().unwrap_or("no range");
            out.push_str(&format!(
                "- {}: {} {} (reference {range}): {:?}\n",
                lab.test_name,
                lab.value,
                lab.unit.as_deref().unwrap_or(""),
                lab.status,
            ));
        }
    }
    out.push('\n');

    out.push_str("## Symptom Analysis\n");
    if input.recent_symptoms.is_empty() {
        out.push_str("No recent symptom reports on record.\n");
    } else {
        for symptom in &input.recent_symptoms {
            out.push_str(&format!("- {symptom}\n"));
        }
    }
    if !flags.concerning_symptoms.is_empty() {
        out.push_str(&format!(
            "Concerning patterns matched: {}.\n",
            flags.concerning_symptoms.join("; ")
        ));
    }
    out.push('\n');

    out.push_str("## Risk Assessment\n");
    let mut raised = Vec::new();
    if flags.high_blood_pressure_trend {
        raised.push("blood pressure trending high");
    }
    if flags.rising_glucose_trend {
        raised.push("glucose trending up");
    }
    if flags.tachycardia_trend {
        raised.push("heart rate trending high");
    }
    if flags.rapid_weight_change {
        raised.push("rapid weight change");
    }
    if raised.is_empty() {
        out.push_str("No deterministic trend flags are active.\n\n");
    } else {
        out.push_str(&format!("Active trend flags: {}.\n\n", raised.join(", ")));
    }

    out.push_str("## Recommended Monitoring\n");
    if raised.is_empty() && flags.concerning_symptoms.is_empty() {
        out.push_str("Continue routine monitoring of the tracked metrics.\n\n");
    } else {
        out.push_str(
            "Review the flagged trends above and consider increased monitoring frequency for the affected metrics.\n\n",
        );
    }

    out.push_str("## Disclaimer\n");
    out.push_str(DISCLAIMER);
    out.push('\n');
    out
}

/// Deterministic answer used when the chat model is unreachable.
pub fn render_fallback_answer(input: &AnonymizedInput) -> String {
    format!(
        "The assistant model is currently unavailable, so no free-form answer can be generated. \
Context on record: age band {}, {} blood pressure reading(s), {} glucose reading(s), \
{} heart-rate reading(s), {} weight reading(s), {} lab value(s), {} recent symptom report(s). \
This response is advisory and is not a diagnosis.",
        input.age_band,
        input.bp_trend.len(),
        input.glucose_trend.len(),
        input.heart_rate_trend.len(),
        input.weight_trend.len(),
        input.recent_lab_values.len(),
        input.recent_symptoms.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::anonymizer::AnonymizedInput;
    use uuid::Uuid;

    fn sample_input() -> AnonymizedInput {
        AnonymizedInput {
            session_id: Uuid::new_v4(),
            age_band: "50-54".into(),
            bp_trend: vec![165.0, 123.0, 121.0, 122.0, 120.0],
            glucose_trend: vec![],
            heart_rate_trend: vec![72.0],
            weight_trend: vec![],
            recent_symptoms: vec!["chest pain".into()],
            recent_lab_values: vec![],
        }
    }

    fn sample_flags() -> RiskFlags {
        RiskFlags {
            high_blood_pressure_trend: true,
            rising_glucose_trend: false,
            tachycardia_trend: false,
            rapid_weight_change: false,
            concerning_symptoms: vec!["chest pain".into()],
            disclaimer: DISCLAIMER.into(),
        }
    }

    #[test]
    fn fallback_contains_every_section_header() {
        let text = render_fallback_summary(&sample_input(), &sample_flags());
        for header in SECTION_HEADERS {
            assert!(text.contains(header), "missing section: {header}");
        }
    }

    #[test]
    fn fallback_carries_the_disclaimer() {
        let text = render_fallback_summary(&sample_input(), &sample_flags());
        assert!(text.contains("not a diagnosis"));
        assert!(text.contains(DISCLAIMER));
    }

    #[test]
    fn fallback_reflects_active_flags() {
        let text = render_fallback_summary(&sample_input(), &sample_flags());
        assert!(text.contains("blood pressure trending high"));
        assert!(text.contains("chest pain"));
    }

    #[test]
    fn fallback_is_deterministic() {
        let input = sample_input();
        let flags = sample_flags();
        assert_eq!(
            render_fallback_summary(&input, &flags),
            render_fallback_summary(&input, &flags)
        );
    }

    #[test]
    fn chat_fallback_disclaims() {
        let answer = render_fallback_answer(&sample_input());
        assert!(answer.contains("not a diagnosis"));
    }
}
