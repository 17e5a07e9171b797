//! Recorded event replay.
//!
//! Messages from one source are replayed in file order; sources run
//! concurrently, as they would from separate transport workers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use cohort_engine::{DispatchOutcome, ReferenceCopyDispatcher};
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ReplayLine {
    source: String,
    message: serde_json::Value,
}

/// Raw messages grouped by source, in file order within each source.
#[derive(Debug, Default)]
pub struct ReplayInput {
    pub by_source: BTreeMap<String, Vec<String>>,
    pub unreadable: usize,
}

impl ReplayInput {
    pub fn len(&self) -> usize {
        self.by_source.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

pub fn parse_lines(content: &str) -> ReplayInput {
    let mut input = ReplayInput::default();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<ReplayLine>(line) {
            Ok(record) => input
                .by_source
                .entry(record.source)
                .or_default()
                .push(record.message.to_string()),
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping unreadable replay line");
                input.unreadable += 1;
            }
        }
    }
    input
}

pub fn read_events(path: &Path) -> Result<ReplayInput> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read events file: {}", path.display()))?;
    let input = parse_lines(&content);
    info!(
        path = %path.display(),
        sources = input.by_source.len(),
        events = input.len(),
        unreadable = input.unreadable,
        "Loaded replay events"
    );
    Ok(input)
}

#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub events: usize,
    pub unreadable: usize,
    outcomes: HashMap<DispatchOutcome, usize>,
}

impl ReplaySummary {
    pub fn count(&self, outcome: DispatchOutcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    fn record(&mut self, outcomes: &[DispatchOutcome]) {
        self.events += outcomes.len();
        for outcome in outcomes {
            *self.outcomes.entry(*outcome).or_default() += 1;
        }
    }
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} events: {} applied, {} filtered, {} already known, {} ignored, {} conflicts, {} failed ({} unreadable lines)",
            self.events,
            self.count(DispatchOutcome::Applied),
            self.count(DispatchOutcome::Filtered),
            self.count(DispatchOutcome::AlreadyKnown),
            self.count(DispatchOutcome::Ignored),
            self.count(DispatchOutcome::ConflictRecorded),
            self.count(DispatchOutcome::Failed),
            self.unreadable,
        )
    }
}

pub async fn replay(
    dispatcher: &ReferenceCopyDispatcher,
    input: ReplayInput,
) -> Result<ReplaySummary> {
    let mut workers = JoinSet::new();
    for (source, messages) in input.by_source {
        let dispatcher = dispatcher.clone();
        workers.spawn(async move {
            let mut outcomes = Vec::with_capacity(messages.len());
            for raw in &messages {
                outcomes.push(dispatcher.dispatch_json(&source, raw).await);
            }
            (source, outcomes)
        });
    }

    let mut summary = ReplaySummary {
        unreadable: input.unreadable,
        ..ReplaySummary::default()
    };
    while let Some(joined) = workers.join_next().await {
        let (source, outcomes) = joined.context("Replay worker failed")?;
        info!(source = source.as_str(), events = outcomes.len(), "Source replayed");
        summary.record(&outcomes);
    }
    Ok(summary)
}
