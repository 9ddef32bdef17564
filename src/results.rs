//! Result summaries, fetched on demand.
//!
//! Counts are always loaded. The heavier panels (coverage, details,
//! performance, longterm) are only requested while open.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::api::{Backend, Coverage, LongtermBucket, ResultCounts, ResultDetail};
use crate::error::DashResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Panel {
    Coverage,
    Details,
    Performance,
    Longterm,
}

/// Which panels are expanded
#[derive(Debug, Clone, Default)]
pub struct ResultPanels {
    open: BTreeSet<Panel>,
}

impl ResultPanels {
    pub fn with(panels: impl IntoIterator<Item = Panel>) -> Self {
        Self {
            open: panels.into_iter().collect(),
        }
    }

    /// Flip a panel; returns whether it is now open
    pub fn toggle(&mut self, panel: Panel) -> bool {
        if self.open.remove(&panel) {
            false
        } else {
            self.open.insert(panel);
            true
        }
    }

    pub fn is_open(&self, panel: Panel) -> bool {
        self.open.contains(&panel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionSummary {
    pub name: String,
    pub cases: u64,
    pub observed: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub cases: u64,
    pub observed: u64,
    pub percentage: f64,
    pub questions: Vec<QuestionSummary>,
}

impl CoverageSummary {
    /// `None` when there are no cases at all (the panel stays hidden)
    pub fn from_coverage(coverage: &Coverage) -> Option<Self> {
        if coverage.cases < 1 {
            return None;
        }

        let questions = coverage
            .questions
            .iter()
            .map(|q| match q.observed {
                Some(observed) if q.cases > 0 => QuestionSummary {
                    name: q.name.clone(),
                    cases: q.cases,
                    observed,
                    percentage: percentage(observed, q.cases),
                },
                _ => QuestionSummary {
                    name: q.name.clone(),
                    cases: 0,
                    observed: 0,
                    percentage: 0.0,
                },
            })
            .collect();

        Some(Self {
            cases: coverage.cases,
            observed: coverage.observed,
            percentage: percentage(coverage.observed, coverage.cases),
            questions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongtermSummary {
    pub buckets: Vec<LongtermBucket>,
    pub ok_users: u64,
    pub fail_users: u64,
}

impl LongtermSummary {
    pub fn from_buckets(buckets: Vec<LongtermBucket>) -> Self {
        let (ok_users, fail_users) = buckets.iter().fold((0, 0), |(ok, fail), b| {
            if b.is_ok() {
                (ok + b.users(), fail)
            } else {
                (ok, fail + b.users())
            }
        });
        Self {
            buckets,
            ok_users,
            fail_users,
        }
    }
}

/// Everything fetched in one results refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultsView {
    pub counts: ResultCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ResultDetail>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longterm: Option<LongtermSummary>,
}

impl ResultsView {
    pub fn total_runs(&self) -> u64 {
        self.counts.values().map(|c| c.runs).sum()
    }

    /// Result panels other than longterm are hidden without any runs
    pub fn has_results(&self) -> bool {
        self.total_runs() > 0
    }
}

/// Load counts plus every open panel
pub async fn fetch(backend: &dyn Backend, panels: &ResultPanels) -> DashResult<ResultsView> {
    let mut view = ResultsView {
        counts: backend.result_counts().await?,
        ..ResultsView::default()
    };

    if panels.is_open(Panel::Coverage) {
        view.coverage = CoverageSummary::from_coverage(&backend.result_coverage().await?);
    }
    if panels.is_open(Panel::Details) {
        view.details = Some(backend.result_details().await?);
    }
    if panels.is_open(Panel::Performance) {
        view.performance = Some(backend.result_performance().await?);
    }
    if panels.is_open(Panel::Longterm) {
        view.longterm = Some(LongtermSummary::from_buckets(backend.result_longterm().await?));
    }

    debug!(runs = view.total_runs(), "results refreshed");
    Ok(view)
}

fn percentage(part: u64, whole: u64) -> f64 {
    100.0 * part as f64 / whole as f64
}

/// `12.345` -> `"12.3%"`
pub fn format_percentage(value: f64) -> String {
    format!("{:.1}%", value)
}
