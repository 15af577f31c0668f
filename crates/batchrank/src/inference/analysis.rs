//! Structured output of one resume analysis.
//!
//! Field names follow the wire format of the analysis service (snake_case).
//! Missing facts are `null`, never guesses.

use serde::{Deserialize, Serialize};

use super::InferenceError;

/// Version of the stored result layout.
pub const RESULT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Links {
    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub portfolio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub degree: Option<String>,
    pub institution: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub title: Option<String>,
    pub company: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Per-dimension points; each has its own cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub skills_match: f64,
    pub experience_relevance: f64,
    pub education: f64,
    pub certifications: f64,
    pub career_progression: f64,
    pub keywords_alignment: f64,
    pub formatting_quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePack {
    pub total_score: f64,
    pub breakdown: ScoreBreakdown,
    pub ats_score: f64,
    pub skill_match_score: f64,
    pub education_score: f64,
    pub experience_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugSource {
    pub field: String,
    pub snippet: String,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub debug_mode_enabled: bool,
    #[serde(default)]
    pub sources: Vec<DebugSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeAnalysis {
    pub candidate_name: Option<String>,
    pub contact: Contact,
    pub links: Links,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub education: Vec<Education>,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub certifications: Vec<String>,
    pub description: String,
    pub scores: ScorePack,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

impl ResumeAnalysis {
    /// Decodes a raw service payload and validates it.
    pub fn from_json(value: serde_json::Value) -> Result<Self, InferenceError> {
        let analysis: ResumeAnalysis = serde_json::from_value(value)
            .map_err(|e| InferenceError::SchemaMismatch(e.to_string()))?;
        analysis.validate()?;
        Ok(analysis)
    }

    /// Checks every score against its allowed range.
    pub fn validate(&self) -> Result<(), InferenceError> {
        let s = &self.scores;
        let b = &s.breakdown;
        let checks: [(&str, f64, f64); 12] = [
            ("scores.total_score", s.total_score, 100.0),
            ("scores.ats_score", s.ats_score, 100.0),
            ("scores.skill_match_score", s.skill_match_score, 100.0),
            ("scores.education_score", s.education_score, 100.0),
            ("scores.experience_score", s.experience_score, 100.0),
            ("breakdown.skills_match", b.skills_match, 25.0),
            ("breakdown.experience_relevance", b.experience_relevance, 25.0),
            ("breakdown.education", b.education, 15.0),
            ("breakdown.certifications", b.certifications, 5.0),
            ("breakdown.career_progression", b.career_progression, 10.0),
            ("breakdown.keywords_alignment", b.keywords_alignment, 10.0),
            ("breakdown.formatting_quality", b.formatting_quality, 10.0),
        ];

        for (field, value, max) in checks {
            if !value.is_finite() || !(0.0..=max).contains(&value) {
                return Err(InferenceError::SchemaMismatch(format!(
                    "{} = {} is outside 0..={}",
                    field, value, max
                )));
            }
        }

        Ok(())
    }
}

/// Result payload stored on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub analysis: ResumeAnalysis,
    pub description: String,
    pub scores: ScorePack,
    pub schema_version: u32,
    pub model_version: String,
}

impl JobResult {
    pub fn new(analysis: ResumeAnalysis, model_version: &str) -> Self {
        Self {
            description: analysis.description.clone(),
            scores: analysis.scores.clone(),
            analysis,
            schema_version: RESULT_SCHEMA_VERSION,
            model_version: model_version.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A valid analysis with the given total score.
    pub fn analysis(total: f64) -> ResumeAnalysis {
        ResumeAnalysis {
            candidate_name: Some("Ada Lovelace".to_string()),
            contact: Contact {
                email: Some("ada@example.com".to_string()),
                phone: None,
                location: Some("London".to_string()),
            },
            links: Links {
                linkedin: None,
                github: None,
                portfolio: None,
            },
            skills: vec!["rust".to_string(), "sql".to_string()],
            education: vec![],
            experience: vec![],
            projects: vec![],
            certifications: vec![],
            description: "Strong systems background.".to_string(),
            scores: ScorePack {
                total_score: total,
                breakdown: ScoreBreakdown {
                    skills_match: 20.0,
                    experience_relevance: 20.0,
                    education: 10.0,
                    certifications: 2.0,
                    career_progression: 8.0,
                    keywords_alignment: 7.0,
                    formatting_quality: 9.0,
                },
                ats_score: 80.0,
                skill_match_score: 85.0,
                education_score: 70.0,
                experience_score: 75.0,
            },
            debug: None,
        }
    }
}
