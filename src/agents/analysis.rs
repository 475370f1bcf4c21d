//! Heuristic prompt quality scoring. Cheap, local and deterministic; no model
//! calls are made here.

use std::collections::HashSet;
use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Marker {
    Example,
    Instruction,
    Role,
    Capability,
    Constraint,
}

const MARKER_PHRASES: [(&str, Marker); 14] = [
    ("example", Marker::Example),
    ("instruction", Marker::Instruction),
    ("rule", Marker::Instruction),
    ("guideline", Marker::Instruction),
    ("you are", Marker::Role),
    ("act as", Marker::Role),
    ("role", Marker::Role),
    ("can", Marker::Capability),
    ("able to", Marker::Capability),
    ("capabilities", Marker::Capability),
    ("don't", Marker::Constraint),
    ("cannot", Marker::Constraint),
    ("avoid", Marker::Constraint),
    ("limitation", Marker::Constraint),
];

static MARKERS: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(MARKER_PHRASES.iter().map(|(phrase, _)| phrase))
        .expect("marker automaton")
});

fn markers(content: &str) -> HashSet<Marker> {
    MARKERS
        .find_overlapping_iter(content)
        .map(|m| MARKER_PHRASES[m.pattern().as_usize()].1)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptAnalysis {
    pub word_count: usize,
    pub character_count: usize,
    pub has_examples: bool,
    pub has_instructions: bool,
    pub clarity_score: f64,
    pub structure_score: f64,
    pub completeness_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub analysis: PromptAnalysis,
    pub recommendations: Vec<String>,
}

impl PromptAnalysis {
    pub fn of(content: &str) -> Self {
        let found = markers(content);
        let has_examples = found.contains(&Marker::Example);
        let has_instructions = found.contains(&Marker::Instruction);

        Self {
            word_count: content.split_whitespace().count(),
            character_count: content.chars().count(),
            has_examples,
            has_instructions,
            clarity_score: clarity_score(content),
            structure_score: structure_score(content, has_examples, has_instructions),
            completeness_score: completeness_score(&found),
        }
    }

    pub fn recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();

        if self.clarity_score < 0.7 {
            recommendations.push("Consider breaking long sentences into shorter, clearer statements");
        }
        if self.structure_score < 0.6 {
            recommendations.push("Add section headers and numbered lists for better organization");
        }
        if self.completeness_score < 0.6 {
            recommendations.push("Include role definition, capabilities, and examples for completeness");
        }
        if !self.has_examples {
            recommendations.push("Add concrete examples to illustrate expected behavior");
        }
        if self.word_count < 50 {
            recommendations.push("Consider expanding the prompt with more detailed instructions");
        } else if self.word_count > 500 {
            recommendations.push("Consider condensing the prompt for better focus");
        }

        recommendations.into_iter().map(String::from).collect()
    }

    pub fn report(self) -> AnalysisReport {
        AnalysisReport {
            recommendations: self.recommendations(),
            analysis: self,
        }
    }
}

/// Shorter sentences score higher, peaking around twenty words.
fn clarity_score(content: &str) -> f64 {
    let sentences: Vec<&str> = content.split('.').collect();
    let words: usize = sentences.iter().map(|s| s.split_whitespace().count()).sum();
    let avg = words as f64 / sentences.len().max(1) as f64;

    if avg <= 20.0 {
        (avg / 20.0).min(1.0)
    } else {
        (1.0 - (avg - 20.0) / 50.0).max(0.3)
    }
}

fn structure_score(content: &str, has_examples: bool, has_instructions: bool) -> f64 {
    let mut score = 0.0;
    if content.contains(['#', '*', '-']) {
        score += 0.3;
    }
    if (1..=5).any(|i| content.contains(&format!("{}.", i))) {
        score += 0.3;
    }
    if has_examples {
        score += 0.2;
    }
    if has_instructions {
        score += 0.2;
    }
    f64::min(score, 1.0)
}

fn completeness_score(found: &HashSet<Marker>) -> f64 {
    [Marker::Role, Marker::Capability, Marker::Constraint, Marker::Example]
        .iter()
        .filter(|m| found.contains(m))
        .count() as f64
        * 0.25
}
