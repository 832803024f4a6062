//! Rule engine: local evaluation of structured rule documents and safe
//! derived output.
//!
//! Nothing parsed out of a rule document crosses this module's boundary
//! except rule ids inside `triggered_rules` and the author-chosen
//! `dimension` / `conclusion` tokens. Keywords and weights never leave.

use serde::Deserialize;

/// One decision rule.
#[derive(Clone, Debug, Deserialize)]
pub struct Rule {
    pub id: String,
    pub dimension: String,
    pub condition: Condition,
    pub conclusion: String,
    pub weight: f64,
}

/// Firing condition. An absent or empty keyword list always fires.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

/// Per-dimension outcome of an evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct DimensionScore {
    pub dimension: String,
    /// `10 × fired_weight / total_weight`, one decimal.
    pub score: f64,
    /// Ids of fired rules, in input order.
    pub triggered_rules: Vec<String>,
    /// Conclusion token of the heaviest fired rule; `None` if nothing fired.
    pub conclusion_key: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Recommend,
    Neutral,
    Caution,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Recommend => "recommend",
            Verdict::Neutral => "neutral",
            Verdict::Caution => "caution",
        }
    }

    fn from_score(score: f64) -> Self {
        if score >= 7.0 {
            Verdict::Recommend
        } else if score < 4.0 {
            Verdict::Caution
        } else {
            Verdict::Neutral
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub results: Vec<DimensionScore>,
    pub overall_score: f64,
    pub verdict: Verdict,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Two-stage decode: a document is structured iff it is a non-empty JSON
/// array whose every element carries the full rule shape with sane fields.
/// Anything else is free-form, which is not an error.
pub fn try_parse_rules(doc: &str) -> Option<Vec<Rule>> {
    let value: serde_json::Value = serde_json::from_str(doc).ok()?;
    let array = value.as_array()?;
    if array.is_empty() {
        return None;
    }
    let rules: Vec<Rule> = serde_json::from_value(value.clone()).ok()?;
    let valid = rules.iter().all(|r| {
        !r.dimension.is_empty() && !r.conclusion.is_empty() && (0.0..=1.0).contains(&r.weight)
    });
    valid.then_some(rules)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Evaluate rules against a query. Matching is case-insensitive substring
/// over the raw query text.
pub fn evaluate(rules: &[Rule], query: &str) -> Evaluation {
    struct DimAcc {
        dimension: String,
        total_weight: f64,
        fired_weight: f64,
        triggered: Vec<String>,
        /// `(weight, conclusion)` of the heaviest fired rule; first wins ties.
        best: Option<(f64, String)>,
    }

    let folded = query.to_lowercase();
    let mut dims: Vec<DimAcc> = Vec::new();

    for rule in rules {
        let slot = match dims.iter_mut().find(|d| d.dimension == rule.dimension) {
            Some(slot) => slot,
            None => {
                dims.push(DimAcc {
                    dimension: rule.dimension.clone(),
                    total_weight: 0.0,
                    fired_weight: 0.0,
                    triggered: Vec::new(),
                    best: None,
                });
                dims.last_mut().unwrap()
            }
        };
        slot.total_weight += rule.weight;

        let fired = match &rule.condition.keywords {
            None => true,
            Some(keywords) if keywords.is_empty() => true,
            Some(keywords) => keywords
                .iter()
                .any(|kw| folded.contains(&kw.to_lowercase())),
        };
        if fired {
            slot.fired_weight += rule.weight;
            slot.triggered.push(rule.id.clone());
            if slot.best.as_ref().map_or(true, |(w, _)| rule.weight > *w) {
                slot.best = Some((rule.weight, rule.conclusion.clone()));
            }
        }
    }

    let results: Vec<DimensionScore> = dims
        .into_iter()
        .filter(|d| d.total_weight > 0.0)
        .map(|d| DimensionScore {
            dimension: d.dimension,
            score: round1(10.0 * d.fired_weight / d.total_weight),
            triggered_rules: d.triggered,
            conclusion_key: d.best.map(|(_, c)| c),
        })
        .collect();

    let overall_score = if results.is_empty() {
        5.0
    } else {
        round1(results.iter().map(|d| d.score).sum::<f64>() / results.len() as f64)
    };
    let verdict = if results.is_empty() {
        Verdict::Neutral
    } else {
        Verdict::from_score(overall_score)
    };

    Evaluation {
        results,
        overall_score,
        verdict,
    }
}

// ---------------------------------------------------------------------------
// Derived output
// ---------------------------------------------------------------------------

/// Safe prompt for external polishing: the query plus derived scalars and
/// author-chosen tokens. No keywords, weights, or rule ids.
pub fn to_safe_prompt(evaluation: &Evaluation, query: &str) -> String {
    let mut out = String::new();
    out.push_str("Evaluation skeleton (all figures pre-computed locally):\n\n");
    out.push_str(&format!("Query: \"{}\"\n\n", query));
    out.push_str("Dimension breakdown:\n");
    for dim in &evaluation.results {
        match &dim.conclusion_key {
            Some(key) => out.push_str(&format!(
                "- {}: score {:.1}/10, signal \"{}\"\n",
                dim.dimension, dim.score, key
            )),
            None => out.push_str(&format!(
                "- {}: score {:.1}/10, no signal\n",
                dim.dimension, dim.score
            )),
        }
    }
    out.push_str(&format!(
        "\nOverall score: {:.1}/10\nVerdict: {}\n",
        evaluation.overall_score, evaluation.verdict
    ));
    out
}

/// Local conclusion report (no external call, no query echo).
pub fn local_report(evaluation: &Evaluation) -> String {
    let mut out = String::from("Skill evaluation complete.\n\n");
    if evaluation.results.is_empty() {
        out.push_str("No scoring dimensions were applicable.\n");
    } else {
        out.push_str("Dimension breakdown:\n");
        for dim in &evaluation.results {
            match &dim.conclusion_key {
                Some(key) => out.push_str(&format!(
                    "- {}: score {:.1}/10, signal \"{}\"\n",
                    dim.dimension, dim.score, key
                )),
                None => out.push_str(&format!(
                    "- {}: score {:.1}/10, no signal\n",
                    dim.dimension, dim.score
                )),
            }
        }
    }
    out.push_str(&format!(
        "\nOverall score: {:.1}/10\nVerdict: {}\n",
        evaluation.overall_score, evaluation.verdict
    ));
    out
}

/// Generic reply for free-form documents. Echoes at most the first 100 code
/// points of the query and nothing from the document.
pub fn mock_freeform_response(query: &str) -> String {
    let snippet: String = query.chars().take(100).collect();
    let ellipsis = if query.chars().count() > 100 { "..." } else { "" };
    format!(
        "This skill provides free-form guidance and was applied locally. \
         Query received: \"{}{}\". A structured verdict is not available \
         for free-form skills.",
        snippet, ellipsis
    )
}
