//! Picks the best satellite pass among noisy, cloud-obscured candidates.
//!
//! Candidates under the cloud ceiling are preferred. Among those, recency
//! wins unless an older pass is more than [`CLOUD_TIE_BAND`] points clearer.
//! When nothing passes the ceiling the least cloudy pass is used anyway and a
//! warning is attached, so a field with any imagery never reads "no data".

use std::cmp::Ordering;

use crate::provider::ImageCandidate;

pub const DEFAULT_CLOUD_CEILING: f64 = 50.0;

/// Cloud differences up to this many percentage points count as comparable.
pub const CLOUD_TIE_BAND: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    /// Candidates must be strictly below this cloud percentage to be preferred.
    pub cloud_ceiling: f64,
    /// Use the least cloudy pass when none is under the ceiling.
    pub allow_fallback: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            cloud_ceiling: DEFAULT_CLOUD_CEILING,
            allow_fallback: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// A pass under the cloud ceiling.
    Preferred(ImageCandidate),
    /// Nothing under the ceiling; the least cloudy pass was substituted.
    Fallback {
        candidate: ImageCandidate,
        warning: String,
    },
    NoImagery,
}

impl Selection {
    pub fn candidate(&self) -> Option<&ImageCandidate> {
        match self {
            Selection::Preferred(c) => Some(c),
            Selection::Fallback { candidate, .. } => Some(candidate),
            Selection::NoImagery => None,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            Selection::Fallback { warning, .. } => Some(warning),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Selection::NoImagery)
    }
}

/// Newest first; equal capture times fall back to lower cloud.
fn by_recency(a: &&ImageCandidate, b: &&ImageCandidate) -> Ordering {
    b.captured_at.cmp(&a.captured_at).then_with(|| {
        a.cloud_coverage_pct
            .total_cmp(&b.cloud_coverage_pct)
    })
}

/// Lowest cloud first; equal cloud falls back to newer.
fn by_cloud(a: &&ImageCandidate, b: &&ImageCandidate) -> Ordering {
    a.cloud_coverage_pct
        .total_cmp(&b.cloud_coverage_pct)
        .then_with(|| b.captured_at.cmp(&a.captured_at))
}

pub fn select(candidates: &[ImageCandidate], policy: &SelectionPolicy) -> Selection {
    let mut clear: Vec<&ImageCandidate> = candidates
        .iter()
        .filter(|c| c.cloud_coverage_pct < policy.cloud_ceiling)
        .collect();
    clear.sort_by(by_recency);

    // Walk from newest to oldest; an older pass only displaces the current
    // pick when it is clearer by more than the tie band.
    let best = clear.into_iter().reduce(|best, next| {
        if best.cloud_coverage_pct - next.cloud_coverage_pct > CLOUD_TIE_BAND {
            next
        } else {
            best
        }
    });

    if let Some(best) = best {
        return Selection::Preferred(best.clone());
    }

    if !policy.allow_fallback {
        return Selection::NoImagery;
    }

    match candidates.iter().min_by(by_cloud) {
        Some(least_cloudy) => Selection::Fallback {
            warning: format!(
                "image with {:.0}% cloud coverage",
                least_cloudy.cloud_coverage_pct
            ),
            candidate: least_cloudy.clone(),
        },
        None => Selection::NoImagery,
    }
}
