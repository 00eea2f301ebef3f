//! Coaching tip generation
//!
//! `TipGenerator` is the swappable text backend. `CoachingService` never
//! fails: backend errors or empty output fall back to the deterministic
//! template tips.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CoachingConfig;
use crate::models::{ScoreAxis, ScoreBreakdown, SectionScore};

/// Tip backend errors
#[derive(Debug, Error)]
pub enum TipError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout")]
    Timeout,
}

/// Produces coaching tips from a score breakdown
#[async_trait]
pub trait TipGenerator: Send + Sync {
    async fn generate(&self, breakdown: &ScoreBreakdown) -> Result<Vec<String>, TipError>;

    /// Backend name (for logging)
    fn name(&self) -> &str;
}

/// Deterministic phrase-per-weak-axis tips
#[derive(Debug, Clone)]
pub struct TemplateTipGenerator {
    weak_axis_threshold: f64,
    max_tips: usize,
}

impl TemplateTipGenerator {
    pub fn new(weak_axis_threshold: f64, max_tips: usize) -> Self {
        Self {
            weak_axis_threshold,
            max_tips,
        }
    }

    pub fn tips(&self, breakdown: &ScoreBreakdown) -> Vec<String> {
        let weak_axes = breakdown.weak_axes(self.weak_axis_threshold);
        if weak_axes.is_empty() {
            return vec![match breakdown.weakest_section() {
                Some(section) if section.overall.is_some_and(|o| o < 100.0) => format!(
                    "Strong performance. For extra polish, revisit {} where your score was lowest.",
                    section.label
                ),
                _ => "Strong performance. Keep practising to stay consistent.".to_string(),
            }];
        }

        weak_axes
            .iter()
            .map(|(axis, _)| {
                let place = weakest_section_for(&breakdown.sections, *axis)
                    .map(|s| s.label.as_str())
                    .unwrap_or("the whole piece");
                axis_tip(*axis, place)
            })
            .take(self.max_tips.max(1))
            .collect()
    }
}

#[async_trait]
impl TipGenerator for TemplateTipGenerator {
    async fn generate(&self, breakdown: &ScoreBreakdown) -> Result<Vec<String>, TipError> {
        Ok(self.tips(breakdown))
    }

    fn name(&self) -> &str {
        "template"
    }
}

fn axis_tip(axis: ScoreAxis, place: &str) -> String {
    match axis {
        ScoreAxis::Pitch => format!(
            "Work on pitch accuracy in {}: sing it slowly with the reference and hold each note until it settles.",
            place
        ),
        ScoreAxis::Timing => format!(
            "Your timing drifted in {}. Practise it with a metronome before singing along with the track.",
            place
        ),
        ScoreAxis::Dynamics => format!(
            "Follow the loudness shape of the reference in {}: swell and soften where it does.",
            place
        ),
    }
}

fn weakest_section_for(sections: &[SectionScore], axis: ScoreAxis) -> Option<&SectionScore> {
    sections
        .iter()
        .filter_map(|s| s.axis(axis).map(|value| (s, value)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(s, _)| s)
}

fn score_text(score: Option<f64>) -> String {
    score
        .map(|s| format!("{:.0}", s))
        .unwrap_or_else(|| "n/a".to_string())
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Tips from a text-generation endpoint (Ollama `/api/generate` shape)
pub struct HttpTipGenerator {
    client: Client,
    endpoint: String,
    model: String,
    timeout: Duration,
    weak_axis_threshold: f64,
    max_tips: usize,
}

impl HttpTipGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        weak_axis_threshold: f64,
        max_tips: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            timeout,
            weak_axis_threshold,
            max_tips,
        }
    }

    fn prompt(&self, breakdown: &ScoreBreakdown) -> String {
        let mut prompt = format!(
            "You are a choir vocal coach. A singer scored pitch {:.0}, timing {:.0}, dynamics {:.0} \
             (overall {:.0}) out of 100.\n",
            breakdown.pitch, breakdown.timing, breakdown.dynamics, breakdown.overall
        );
        for section in &breakdown.sections {
            prompt.push_str(&format!(
                "- {}: pitch {}, timing {}, dynamics {}\n",
                section.label,
                score_text(section.pitch),
                score_text(section.timing),
                score_text(section.dynamics)
            ));
        }
        prompt.push_str(&format!(
            "Scores below {:.0} need work. Give at most {} short, concrete practice tips, one per line, \
             without numbering.",
            self.weak_axis_threshold, self.max_tips
        ));
        prompt
    }
}

#[async_trait]
impl TipGenerator for HttpTipGenerator {
    async fn generate(&self, breakdown: &ScoreBreakdown) -> Result<Vec<String>, TipError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: self.prompt(breakdown),
            stream: false,
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "Requesting coaching tips");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TipError::Timeout
                } else {
                    TipError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TipError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TipError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        Ok(parse_tip_lines(&body.response))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// One tip per non-empty line, list markers stripped
fn parse_tip_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Wraps a tip backend with the template fallback
pub struct CoachingService {
    backend: Arc<dyn TipGenerator>,
    fallback: TemplateTipGenerator,
    max_tips: usize,
}

impl CoachingService {
    pub fn new(backend: Arc<dyn TipGenerator>, config: &CoachingConfig) -> Self {
        Self {
            backend,
            fallback: TemplateTipGenerator::new(config.weak_axis_threshold, config.max_tips),
            max_tips: config.max_tips.max(1),
        }
    }

    /// Service using only the template tips
    pub fn template_only(config: &CoachingConfig) -> Self {
        let template = TemplateTipGenerator::new(config.weak_axis_threshold, config.max_tips);
        Self::new(Arc::new(template), config)
    }

    /// Build from configuration: HTTP backend when an endpoint is configured
    pub fn from_config(config: &CoachingConfig) -> Self {
        match &config.endpoint {
            Some(endpoint) => Self::new(
                Arc::new(HttpTipGenerator::new(
                    endpoint.clone(),
                    config.model.clone(),
                    Duration::from_secs(config.timeout_secs),
                    config.weak_axis_threshold,
                    config.max_tips,
                )),
                config,
            ),
            None => Self::template_only(config),
        }
    }

    /// Tips for a breakdown; never fails
    pub async fn tips(&self, breakdown: &ScoreBreakdown) -> Vec<String> {
        match self.backend.generate(breakdown).await {
            Ok(mut tips) if !tips.is_empty() => {
                tips.truncate(self.max_tips);
                tips
            }
            Ok(_) => {
                warn!(backend = self.backend.name(), "Tip backend returned no tips, using templates");
                self.fallback.tips(breakdown)
            }
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "Tip backend failed, using templates");
                self.fallback.tips(breakdown)
            }
        }
    }
}
