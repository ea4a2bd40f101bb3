use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifyOptions {
    pub threshold: f64,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub start: usize,
    pub end: usize,
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start, self.end)
    }
}

/// Matched windows are skipped entirely, so matches never overlap.
#[must_use]
pub fn find_matches(target: &[i16], ad: &[i16], options: IdentifyOptions) -> Vec<Match> {
    let ad_energy = dot(ad, ad);
    if ad.is_empty() || ad.len() > target.len() || ad_energy <= 0.0 {
        debug!(
            target_len = target.len(),
            ad_len = ad.len(),
            "degenerate identify input"
        );
        return Vec::new();
    }

    let mut matches = Vec::new();
    let mut start = 0;
    while start + ad.len() <= target.len() {
        let score = dot(&target[start..start + ad.len()], ad) / ad_energy;
        if score >= options.threshold {
            matches.push(Match {
                start,
                end: start + ad.len() - 1,
            });
            start += ad.len();
        } else {
            start += 1;
        }
    }
    matches
}

#[must_use]
pub fn format_matches(matches: &[Match]) -> String {
    matches
        .iter()
        .map(Match::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn dot(left: &[i16], right: &[i16]) -> f64 {
    left.iter()
        .zip(right)
        .map(|(&l, &r)| f64::from(l) * f64::from(r))
        .sum()
}
