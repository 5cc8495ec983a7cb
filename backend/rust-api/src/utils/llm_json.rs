//! Tolerant extraction of JSON arrays from generated text.
//!
//! Generators are instructed to emit a bare JSON array but routinely wrap it
//! in markdown code fences or surrounding prose. Extraction strips fences
//! first, then falls back to the outermost `[` .. `]` span.

use serde::Deserialize;

use crate::error::CoreError;
use crate::models::course::Module;

/// Question shape as produced by the generator, before it is assigned an id
/// and course reference.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedQuestion {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer_index: u32,
}

pub fn extract_json_array(raw: &str) -> Result<String, CoreError> {
    let mut text = raw.trim();

    if text.starts_with("```") {
        let mut lines: Vec<&str> = text.lines().collect();
        if lines.first().is_some_and(|l| l.starts_with("```")) {
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| l.trim() == "```") {
            lines.pop();
        }
        return extract_json_array(&lines.join("\n"));
    }

    if !text.starts_with('[') {
        let start = text.find('[');
        let end = text.rfind(']');
        match (start, end) {
            (Some(s), Some(e)) if e > s => text = &text[s..=e],
            _ => {
                return Err(CoreError::UpstreamGeneration(
                    "response contains no JSON array".to_string(),
                ))
            }
        }
    }

    Ok(text.to_string())
}

/// Parse and validate a synthesized module list. The batch is atomic: any
/// structural defect rejects the whole response.
pub fn parse_modules(raw: &str) -> Result<Vec<Module>, CoreError> {
    let json = extract_json_array(raw)?;
    let modules: Vec<Module> = serde_json::from_str(&json)
        .map_err(|e| CoreError::UpstreamGeneration(format!("invalid module JSON: {}", e)))?;

    if modules.is_empty() {
        return Err(CoreError::UpstreamGeneration(
            "generator returned an empty module list".to_string(),
        ));
    }
    for (i, module) in modules.iter().enumerate() {
        if module.name.trim().is_empty() || module.content.trim().is_empty() {
            return Err(CoreError::UpstreamGeneration(format!(
                "module {} has an empty name or content",
                i
            )));
        }
    }

    Ok(modules)
}

/// Parse and validate generated test questions: exactly 4 options each,
/// correct index in range.
pub fn parse_questions(raw: &str) -> Result<Vec<GeneratedQuestion>, CoreError> {
    let json = extract_json_array(raw)?;
    let questions: Vec<GeneratedQuestion> = serde_json::from_str(&json)
        .map_err(|e| CoreError::UpstreamGeneration(format!("invalid question JSON: {}", e)))?;

    for (i, question) in questions.iter().enumerate() {
        if question.options.len() != 4 {
            return Err(CoreError::UpstreamGeneration(format!(
                "question {} must have exactly 4 options, got {}",
                i,
                question.options.len()
            )));
        }
        if question.correct_answer_index > 3 {
            return Err(CoreError::UpstreamGeneration(format!(
                "question {} has correct_answer_index out of range",
                i
            )));
        }
    }

    Ok(questions)
}
