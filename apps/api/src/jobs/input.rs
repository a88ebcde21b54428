//! Typed job inputs: validates the opaque payload before it reaches the
//! queue and turns it into a prompt when the job runs.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::AppError;
use crate::jobs::prompts::{
    ATS_ANALYSIS_PROMPT_TEMPLATE, CONTENT_OPTIMIZATION_PROMPT_TEMPLATE, COVER_LETTER_PROMPT_TEMPLATE,
    COVER_LETTER_SYSTEM, RESUME_GENERATION_PROMPT_TEMPLATE,
};
use crate::jobs::tone::{render_guidance, Tone};
use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM};
use crate::models::job::JobType;

/// Longest free-text field accepted, in characters.
pub const MAX_TEXT_CHARS: usize = 20_000;

#[derive(Debug, Clone, Deserialize)]
pub struct CoverLetterInput {
    pub job_description: String,
    #[serde(default)]
    pub tone: Tone,
    pub position: Option<String>,
    pub company_name: Option<String>,
    pub applicant_name: Option<String>,
    pub resume_summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentOptimizationInput {
    pub content: String,
    pub section: Option<String>,
    pub job_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResumeGenerationInput {
    pub profile: Value,
    pub target_role: Option<String>,
    pub job_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtsAnalysisInput {
    pub resume_text: String,
    pub job_description: String,
}

#[derive(Debug, Clone)]
pub enum JobInput {
    CoverLetter(CoverLetterInput),
    ContentOptimization(ContentOptimizationInput),
    ResumeGeneration(ResumeGenerationInput),
    AtsAnalysis(AtsAnalysisInput),
}

/// Prompt and system instruction for one provider call.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub prompt: String,
    pub system: &'static str,
    /// Whether the model was asked for JSON.
    pub expects_json: bool,
}

impl JobInput {
    /// Parses and validates `input` for `job_type`.
    pub fn parse(job_type: JobType, input: &Value) -> Result<Self, AppError> {
        if !input.is_object() {
            return Err(AppError::Validation(
                "input must be a JSON object".to_string(),
            ));
        }

        let parsed = match job_type {
            JobType::CoverLetter => {
                let i: CoverLetterInput = from_value(input)?;
                require_text("job_description", &i.job_description)?;
                optional_text("resume_summary", i.resume_summary.as_deref())?;
                JobInput::CoverLetter(i)
            }
            JobType::ContentOptimization => {
                let i: ContentOptimizationInput = from_value(input)?;
                require_text("content", &i.content)?;
                optional_text("job_description", i.job_description.as_deref())?;
                JobInput::ContentOptimization(i)
            }
            JobType::ResumeGeneration => {
                let i: ResumeGenerationInput = from_value(input)?;
                let empty = match &i.profile {
                    Value::Object(map) => map.is_empty(),
                    _ => true,
                };
                if empty {
                    return Err(AppError::Validation(
                        "profile must be a non-empty object".to_string(),
                    ));
                }
                optional_text("job_description", i.job_description.as_deref())?;
                JobInput::ResumeGeneration(i)
            }
            JobType::AtsAnalysis => {
                let i: AtsAnalysisInput = from_value(input)?;
                require_text("resume_text", &i.resume_text)?;
                require_text("job_description", &i.job_description)?;
                JobInput::AtsAnalysis(i)
            }
        };
        Ok(parsed)
    }

    pub fn prepare_prompt(&self) -> PreparedPrompt {
        match self {
            JobInput::CoverLetter(i) => PreparedPrompt {
                prompt: COVER_LETTER_PROMPT_TEMPLATE
                    .replace("{tone_guidance}", &render_guidance(i.tone))
                    .replace("{grounding}", GROUNDING_INSTRUCTION)
                    .replace("{position}", or_unspecified(i.position.as_deref()))
                    .replace("{company_name}", or_unspecified(i.company_name.as_deref()))
                    .replace("{applicant_name}", or_unspecified(i.applicant_name.as_deref()))
                    .replace("{resume_summary}", or_unspecified(i.resume_summary.as_deref()))
                    .replace("{job_description}", i.job_description.trim()),
                system: COVER_LETTER_SYSTEM,
                expects_json: false,
            },
            JobInput::ContentOptimization(i) => PreparedPrompt {
                prompt: CONTENT_OPTIMIZATION_PROMPT_TEMPLATE
                    .replace("{section}", i.section.as_deref().unwrap_or("section"))
                    .replace("{grounding}", GROUNDING_INSTRUCTION)
                    .replace("{job_description}", i.job_description.as_deref().unwrap_or(""))
                    .replace("{content}", i.content.trim()),
                system: JSON_ONLY_SYSTEM,
                expects_json: true,
            },
            JobInput::ResumeGeneration(i) => PreparedPrompt {
                prompt: RESUME_GENERATION_PROMPT_TEMPLATE
                    .replace("{target_role}", or_unspecified(i.target_role.as_deref()))
                    .replace("{grounding}", GROUNDING_INSTRUCTION)
                    .replace("{job_description}", i.job_description.as_deref().unwrap_or(""))
                    .replace(
                        "{profile}",
                        &serde_json::to_string_pretty(&i.profile).unwrap_or_default(),
                    ),
                system: JSON_ONLY_SYSTEM,
                expects_json: true,
            },
            JobInput::AtsAnalysis(i) => PreparedPrompt {
                prompt: ATS_ANALYSIS_PROMPT_TEMPLATE
                    .replace("{job_description}", i.job_description.trim())
                    .replace("{resume_text}", i.resume_text.trim()),
                system: JSON_ONLY_SYSTEM,
                expects_json: true,
            },
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T, AppError> {
    T::deserialize(input).map_err(|e| AppError::Validation(format!("Invalid input: {e}")))
}

fn require_text(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    optional_text(field, Some(value))
}

fn optional_text(field: &str, value: Option<&str>) -> Result<(), AppError> {
    match value {
        Some(v) if v.chars().count() > MAX_TEXT_CHARS => Err(AppError::Validation(format!(
            "{field} exceeds {MAX_TEXT_CHARS} characters"
        ))),
        _ => Ok(()),
    }
}

fn or_unspecified(value: Option<&str>) -> &str {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => "(not specified)",
    }
}
