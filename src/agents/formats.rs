use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, MatchKind};
use serde_json::{json, Value};

use crate::agents::completion::{CompletionClient, CompletionRequest};
use crate::agents::extract::extract_json_object;
use crate::models::ReasoningEffort;

const ARCHITECT_INSTRUCTIONS: &str =
    "You are an expert system architect who specializes in designing JSON data formats for AI applications.";

/// Industries in lookup priority order, with the keywords that identify them.
const INDUSTRY_KEYWORDS: [(&str, &[&str]); 6] = [
    ("finance", &["finance", "banking", "investment", "trading", "insurance", "fintech", "stock"]),
    ("healthcare", &["healthcare", "medical", "clinical", "patient", "diagnosis", "treatment"]),
    ("technology", &["technology", "software", "development", "engineering", "tech"]),
    ("retail", &["retail", "ecommerce", "sales", "marketing", "customer", "product"]),
    ("legal", &["legal", "law", "compliance", "regulatory", "contract", "litigation"]),
    ("education", &["education", "learning", "training", "academic", "student", "course"]),
];

static INDUSTRY_MATCHER: LazyLock<(AhoCorasick, Vec<usize>)> = LazyLock::new(|| {
    let mut patterns = Vec::new();
    let mut owners = Vec::new();
    for (idx, (_, keywords)) in INDUSTRY_KEYWORDS.iter().enumerate() {
        for keyword in keywords.iter() {
            patterns.push(*keyword);
            owners.push(idx);
        }
    }
    let matcher = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::Standard)
        .build(&patterns)
        .expect("industry keyword automaton");
    (matcher, owners)
});

#[derive(Debug, Clone, PartialEq)]
pub struct IndustryFormats {
    pub input_format: Value,
    pub output_format: Value,
    /// False when the canned fallback was used.
    pub generated: bool,
}

/// Best guess at the industry a use case belongs to, `"general"` when no
/// keyword matches. Earlier industries win ties.
pub fn detect_industry(usecase: &str) -> &'static str {
    let (matcher, owners) = &*INDUSTRY_MATCHER;
    matcher
        .find_overlapping_iter(usecase)
        .map(|m| owners[m.pattern().as_usize()])
        .min()
        .map(|idx| INDUSTRY_KEYWORDS[idx].0)
        .unwrap_or("general")
}

fn format_request(industry: &str, usecase: &str, tasks: &[String]) -> String {
    let tasks_text = if tasks.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = tasks.iter().map(|t| format!("- {}", t)).collect();
        format!("\nSpecific tasks to consider:\n{}", lines.join("\n"))
    };

    format!(
        r#"Generate appropriate JSON schemas for both INPUT and OUTPUT formats for an AI system in the {industry} industry, specifically for {usecase}.{tasks_text}

Requirements:
1. Design practical, real-world JSON formats that would be used in {industry} for {usecase}
2. Include all relevant fields that professionals in {industry} would expect
3. Use appropriate data types (string, number, boolean, array, object)
4. Include nested objects where appropriate for the domain
5. Add meaningful field names that reflect industry terminology
6. Consider compliance, regulatory, and industry-specific requirements
7. Make the input format comprehensive enough to capture all necessary data
8. Make the output format detailed and actionable for professionals

Return ONLY a JSON object with exactly this structure:
{{"input_format": {{ ... }}, "output_format": {{ ... }}}}"#
    )
}

fn parse_formats(text: &str) -> Option<(Value, Value)> {
    let object = extract_json_object(text)?;
    let mut value: Value = serde_json::from_str(object).ok()?;
    let input = value.get_mut("input_format").map(Value::take).unwrap_or_else(|| json!({}));
    let output = value.get_mut("output_format").map(Value::take).unwrap_or_else(|| json!({}));
    Some((input, output))
}

/// Asks the model for input/output JSON formats. Never fails: any upstream or
/// parse problem yields [`fallback_formats`].
pub async fn generate_json_formats(
    client: &dyn CompletionClient,
    model: &str,
    industry: &str,
    usecase: &str,
    tasks: &[String],
    reasoning_effort: ReasoningEffort,
) -> IndustryFormats {
    let request = CompletionRequest::new(model, ARCHITECT_INSTRUCTIONS, format_request(industry, usecase, tasks))
        .with_reasoning_effort(reasoning_effort);

    match client.complete(request).await {
        Ok(response) => match parse_formats(&response.output_text) {
            Some((input_format, output_format)) => {
                log::info!("🧩 Generated JSON formats for {} - {}", industry, usecase);
                IndustryFormats {
                    input_format,
                    output_format,
                    generated: true,
                }
            }
            None => {
                log::warn!("⚠️ Format reply had no JSON object, using fallback for {}", industry);
                fallback_formats(industry)
            }
        },
        Err(e) => {
            log::error!("❌ Error generating JSON formats: {}", e);
            fallback_formats(industry)
        }
    }
}

pub fn fallback_formats(industry: &str) -> IndustryFormats {
    let (input_format, output_format) = match industry.to_lowercase().as_str() {
        "finance" => (
            json!({
                "request_id": "string",
                "user_id": "string",
                "data": {
                    "market_data": {
                        "symbols": ["string"],
                        "timeframe": "string",
                        "metrics": ["string"]
                    },
                    "analysis_type": "string",
                    "risk_tolerance": "string",
                    "compliance_requirements": ["string"]
                },
                "timestamp": "string"
            }),
            json!({
                "analysis_id": "string",
                "results": {
                    "summary": "string",
                    "recommendations": ["string"],
                    "risk_assessment": {
                        "risk_level": "string",
                        "risk_factors": ["string"],
                        "risk_score": "number"
                    },
                    "financial_metrics": {
                        "key_indicators": "object",
                        "performance_data": "object"
                    }
                },
                "compliance": {
                    "regulatory_notes": ["string"],
                    "approval_status": "string"
                },
                "timestamp": "string",
                "confidence_level": "number"
            }),
        ),
        "healthcare" => (
            json!({
                "patient_id": "string",
                "request_type": "string",
                "clinical_data": {
                    "symptoms": ["string"],
                    "medical_history": ["string"],
                    "current_medications": ["string"],
                    "vital_signs": "object",
                    "lab_results": "object"
                },
                "privacy_consent": "boolean",
                "urgency_level": "string"
            }),
            json!({
                "analysis_id": "string",
                "clinical_assessment": {
                    "primary_findings": ["string"],
                    "differential_diagnosis": ["string"],
                    "risk_stratification": "string"
                },
                "recommendations": {
                    "immediate_actions": ["string"],
                    "follow_up_care": ["string"],
                    "referrals": ["string"]
                },
                "safety_alerts": ["string"],
                "confidence_metrics": {
                    "certainty_level": "number",
                    "evidence_quality": "string"
                },
                "compliance_notes": ["string"]
            }),
        ),
        "technology" => (
            json!({
                "project_id": "string",
                "requirements": {
                    "functional_specs": ["string"],
                    "technical_constraints": ["string"],
                    "performance_criteria": "object",
                    "security_requirements": ["string"]
                },
                "context": {
                    "technology_stack": ["string"],
                    "team_size": "number",
                    "timeline": "string",
                    "budget_constraints": "string"
                }
            }),
            json!({
                "solution_id": "string",
                "technical_solution": {
                    "architecture_design": "object",
                    "implementation_plan": ["string"],
                    "technology_recommendations": ["string"]
                },
                "risk_analysis": {
                    "technical_risks": ["string"],
                    "mitigation_strategies": ["string"]
                },
                "resource_estimates": {
                    "time_estimate": "string",
                    "effort_breakdown": "object",
                    "skill_requirements": ["string"]
                },
                "success_metrics": ["string"]
            }),
        ),
        _ => (
            json!({
                "request_id": "string",
                "user_input": "string",
                "context": "object",
                "parameters": "object"
            }),
            json!({
                "response_id": "string",
                "result": "string",
                "metadata": "object",
                "confidence": "number",
                "timestamp": "string"
            }),
        ),
    };

    IndustryFormats {
        input_format,
        output_format,
        generated: false,
    }
}
