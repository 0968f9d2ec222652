//! Extraction and normalization of the remote "fit score".
//!
//! The score can sit anywhere in the candidate or ratings payload, under a
//! variety of key names and scales. Every stored score is on the platform's
//! 0-10 scale.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const SCORE_KEYWORDS: &[&str] = &["score", "rating", "match"];

/// Leaf key names in descending preference. Keys that merely contain a score
/// keyword rank after all of these.
const KEY_PRIORITY: &[&str] = &[
    "ai_rating",
    "ai_score",
    "ai_match_score",
    "match_score",
    "fit_score",
    "overall_score",
    "overall_rating",
    "score",
    "rating",
];

/// Keys that mention a score keyword but carry counts, ids or timestamps.
const EXCLUDED_FRAGMENTS: &[&str] = &["count", "_id", "_at", "max", "min", "scale"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkableScore {
    pub raw: f64,
    /// `None` when the raw value is outside every recognised scale.
    pub normalized: Option<f64>,
    /// Dotted path of the field the score came from, prefixed by payload.
    pub source: String,
}

/// Map a raw score onto 0-10 by magnitude: fractions are scaled up,
/// 0-10 passes through, percentages are scaled down.
pub fn normalize_score(raw: f64) -> Option<f64> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let scaled = if raw <= 1.0 {
        raw * 10.0
    } else if raw <= 10.0 {
        raw
    } else if raw <= 100.0 {
        raw / 10.0
    } else {
        return None;
    };
    Some((scaled * 100.0).round() / 100.0)
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn is_score_key(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    SCORE_KEYWORDS.iter().any(|kw| k.contains(kw))
        && !EXCLUDED_FRAGMENTS.iter().any(|ex| k.contains(ex))
}

fn key_rank(key: &str) -> usize {
    let k = key.to_ascii_lowercase();
    KEY_PRIORITY
        .iter()
        .position(|p| *p == k)
        .unwrap_or(KEY_PRIORITY.len())
}

struct Found {
    rank: usize,
    raw: f64,
    path: String,
}

fn walk(v: &Value, path: &str, out: &mut Vec<Found>) {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                let child_path = format!("{}.{}", path, k);
                if is_score_key(k) {
                    if let Some(raw) = numeric(child) {
                        out.push(Found {
                            rank: key_rank(k),
                            raw,
                            path: child_path,
                        });
                        continue;
                    }
                }
                walk(child, &child_path, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                walk(child, &format!("{}[{}]", path, i), out);
            }
        }
        _ => {}
    }
}

/// Find the best-ranked score-like field across the candidate payload and the
/// optional ratings payload. Ties go to the first field encountered, candidate
/// payload before ratings.
pub fn extract_workable_score(candidate: &Value, ratings: Option<&Value>) -> Option<WorkableScore> {
    let mut found = Vec::new();
    walk(candidate, "candidate", &mut found);
    if let Some(r) = ratings {
        walk(r, "ratings", &mut found);
    }

    let mut best: Option<Found> = None;
    for f in found {
        if best.as_ref().map_or(true, |b| f.rank < b.rank) {
            best = Some(f);
        }
    }
    best.map(|f| WorkableScore {
        raw: f.raw,
        normalized: normalize_score(f.raw),
        source: f.path,
    })
}
