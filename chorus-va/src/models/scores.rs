//! Score breakdowns and section boundaries

use serde::{Deserialize, Serialize};

/// A labelled span of the reference timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub label: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Section {
    /// Split `[0, duration_ms)` into `count` equal sections labelled "Section N"
    pub fn equal_partition(duration_ms: u64, count: usize) -> Vec<Section> {
        let count = count.max(1) as u64;
        (0..count)
            .map(|i| Section {
                label: format!("Section {}", i + 1),
                start_ms: duration_ms * i / count,
                end_ms: duration_ms * (i + 1) / count,
            })
            .collect()
    }

    pub fn contains(&self, offset_ms: u64) -> bool {
        offset_ms >= self.start_ms && offset_ms < self.end_ms
    }

    /// Sections must be non-empty, ordered and non-overlapping
    pub fn validate_list(sections: &[Section]) -> Result<(), String> {
        let mut previous_end = 0u64;
        for (index, section) in sections.iter().enumerate() {
            if section.end_ms <= section.start_ms {
                return Err(format!(
                    "section {} ({}) has end_ms <= start_ms",
                    index, section.label
                ));
            }
            if section.start_ms < previous_end {
                return Err(format!(
                    "section {} ({}) overlaps the previous section",
                    index, section.label
                ));
            }
            previous_end = section.end_ms;
        }
        Ok(())
    }
}

/// Score axis, used to phrase coaching tips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreAxis {
    Pitch,
    Timing,
    Dynamics,
}

impl ScoreAxis {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreAxis::Pitch => "pitch",
            ScoreAxis::Timing => "timing",
            ScoreAxis::Dynamics => "dynamics",
        }
    }
}

/// Sub-scores of one section (0-100)
///
/// A section holding no reference frames, e.g. one placed after the end of
/// the reference, carries no scores at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionScore {
    pub section_index: usize,
    pub label: String,
    pub start_ms: u64,
    pub end_ms: u64,
    /// `None` when the section is mostly unvoiced in the reference
    pub pitch: Option<f64>,
    pub timing: Option<f64>,
    pub dynamics: Option<f64>,
    pub overall: Option<f64>,
}

impl SectionScore {
    pub fn axis(&self, axis: ScoreAxis) -> Option<f64> {
        match axis {
            ScoreAxis::Pitch => self.pitch,
            ScoreAxis::Timing => self.timing,
            ScoreAxis::Dynamics => self.dynamics,
        }
    }

    /// Lowest-scoring axis of this section, if any axis was scored
    pub fn weakest_axis(&self) -> Option<(ScoreAxis, f64)> {
        [ScoreAxis::Timing, ScoreAxis::Pitch, ScoreAxis::Dynamics]
            .into_iter()
            .filter_map(|axis| self.axis(axis).map(|score| (axis, score)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Complete scoring result of one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub pitch: f64,
    pub timing: f64,
    pub dynamics: f64,
    pub overall: f64,
    pub sections: Vec<SectionScore>,
}

impl ScoreBreakdown {
    pub fn axis(&self, axis: ScoreAxis) -> f64 {
        match axis {
            ScoreAxis::Pitch => self.pitch,
            ScoreAxis::Timing => self.timing,
            ScoreAxis::Dynamics => self.dynamics,
        }
    }

    /// Axes below `threshold`, weakest first
    pub fn weak_axes(&self, threshold: f64) -> Vec<(ScoreAxis, f64)> {
        let mut axes: Vec<(ScoreAxis, f64)> = [ScoreAxis::Pitch, ScoreAxis::Timing, ScoreAxis::Dynamics]
            .into_iter()
            .map(|axis| (axis, self.axis(axis)))
            .filter(|(_, score)| *score < threshold)
            .collect();
        axes.sort_by(|a, b| a.1.total_cmp(&b.1));
        axes
    }

    /// Scored section with the lowest overall score
    pub fn weakest_section(&self) -> Option<&SectionScore> {
        self.sections
            .iter()
            .filter_map(|s| s.overall.map(|overall| (s, overall)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s)
    }
}
