use crate::model::{FetchScope, Row, RowSet, ViewKind};
use crate::provider::DataProvider;
use crate::router::{FetchTarget, descriptor};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum FetchResult {
    Rows(RowSet),
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub seq: u64,
    pub target: FetchTarget,
    pub result: FetchResult,
}

#[derive(Debug)]
pub struct DetailOutcome {
    pub seq: u64,
    pub lines: Vec<String>,
}

/// Everything background tasks hand back to the UI loop.
#[derive(Debug)]
pub enum BackgroundEvent {
    Fetch(FetchOutcome),
    Detail(DetailOutcome),
}

/// Loading/error/notice bookkeeping. The loading mark is per view and carries the sequence
/// number of the admitted fetch.
#[derive(Debug, Default)]
pub struct FetchCycleState {
    in_flight: HashMap<ViewKind, u64>,
    last_error: Option<String>,
    empty_notice: Option<String>,
}

impl FetchCycleState {
    pub fn is_loading(&self, view: ViewKind) -> bool {
        self.in_flight.contains_key(&view)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn empty_notice(&self) -> Option<&str> {
        self.empty_notice.as_deref()
    }

    fn admit(&mut self, view: ViewKind, seq: u64) -> bool {
        if self.is_loading(view) {
            return false;
        }
        self.in_flight.insert(view, seq);
        true
    }

    /// Drops the loading mark if it still belongs to `seq`.
    pub fn release(&mut self, view: ViewKind, seq: u64) {
        if self.in_flight.get(&view) == Some(&seq) {
            self.in_flight.remove(&view);
        }
    }

    pub fn record_rows(&mut self, empty_notice: Option<String>) {
        self.last_error = None;
        self.empty_notice = empty_notice;
    }

    pub fn record_error(&mut self, error: String) {
        self.last_error = Some(error);
    }

    pub fn clear_banners(&mut self) {
        self.last_error = None;
        self.empty_notice = None;
    }
}

/// Starts background fetches and routes their results back over one channel.
pub struct RefreshScheduler {
    provider: Arc<dyn DataProvider>,
    run_token: CancellationToken,
    fetch_timeout: Duration,
    next_seq: u64,
    tx: UnboundedSender<BackgroundEvent>,
}

impl RefreshScheduler {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        run_token: CancellationToken,
        fetch_timeout: Duration,
        tx: UnboundedSender<BackgroundEvent>,
    ) -> Self {
        Self {
            provider,
            run_token,
            fetch_timeout,
            next_seq: 0,
            tx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.run_token.is_cancelled()
    }

    pub fn shutdown(&self) {
        self.run_token.cancel();
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Spawns a fetch for `target` unless one is already in flight for that view or the run
    /// has been cancelled. Returns whether a fetch was started.
    pub fn request_fetch(
        &mut self,
        cycle: &mut FetchCycleState,
        target: FetchTarget,
        scope: FetchScope,
    ) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let seq = self.next_seq();
        if !cycle.admit(target.view, seq) {
            debug!(view = %target.view, "fetch already in flight, skipping");
            return false;
        }

        let fetch = descriptor(target.view).fetch;
        let provider = Arc::clone(&self.provider);
        let token = self.run_token.child_token();
        let limit = self.fetch_timeout;
        let tx = self.tx.clone();
        debug!(view = %target.view, seq, namespace = %target.namespace, "fetch started");

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => FetchResult::Cancelled,
                outcome = timeout(limit, fetch(provider.as_ref(), &scope)) => match outcome {
                    Ok(Ok(rows)) => FetchResult::Rows(rows),
                    Ok(Err(error)) => {
                        warn!(view = %target.view, "fetch failed: {error:#}");
                        FetchResult::Failed(compact_error(&error))
                    }
                    Err(_) => FetchResult::Failed(timeout_message(limit)),
                },
            };
            let _ = tx.send(BackgroundEvent::Fetch(FetchOutcome {
                seq,
                target,
                result,
            }));
        });
        true
    }

    /// Describes a service and lists its instances in the background. Returns the sequence
    /// number the outcome will carry.
    pub fn request_describe(&mut self, name: String, scope: FetchScope) -> u64 {
        let seq = self.next_seq();
        let provider = Arc::clone(&self.provider);
        let token = self.run_token.child_token();
        let limit = self.fetch_timeout;
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let lines = tokio::select! {
                _ = token.cancelled() => return,
                lines = describe_service_lines(provider.as_ref(), &scope, &name, limit) => lines,
            };
            let _ = tx.send(BackgroundEvent::Detail(DetailOutcome { seq, lines }));
        });
        seq
    }
}

async fn describe_service_lines(
    provider: &dyn DataProvider,
    scope: &FetchScope,
    name: &str,
    limit: Duration,
) -> Vec<String> {
    let child_scope = FetchScope {
        parent: Some(name.to_string()),
        ..scope.clone()
    };
    let (described, instances) = tokio::join!(
        timeout(limit, provider.describe_service(scope, name)),
        timeout(limit, provider.list_service_instances(&child_scope)),
    );

    let pairs = match flatten_timeout(described, limit) {
        Ok(pairs) => pairs,
        Err(error) => return vec![format!("Describe service failed: {error}")],
    };

    let mut lines = vec![format!("Service: {name}"), String::new()];
    lines.extend(key_value_lines(pairs));
    lines.push(String::new());
    lines.push("Instances:".to_string());
    match flatten_timeout(instances, limit) {
        Err(error) => lines.push(format!("  Error: {error}")),
        Ok(instances) if instances.is_empty() => lines.push("  (none)".to_string()),
        Ok(instances) => lines.extend(
            instances
                .rows
                .iter()
                .map(|row| format!("  {}", row.cells.join("  "))),
        ),
    }
    lines
}

fn flatten_timeout<T>(
    outcome: Result<Result<T>, tokio::time::error::Elapsed>,
    limit: Duration,
) -> Result<T, String> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(compact_error(&error)),
        Err(_) => Err(timeout_message(limit)),
    }
}

pub fn row_pairs(columns: &[String], row: &Row) -> Vec<(String, String)> {
    columns
        .iter()
        .cloned()
        .zip(row.cells.iter().cloned())
        .collect()
}

/// `key: value` lines sorted by key with blank values dropped.
pub fn key_value_lines(mut pairs: Vec<(String, String)>) -> Vec<String> {
    pairs.sort_by(|left, right| left.0.cmp(&right.0));
    let lines = pairs
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return vec!["(no details)".to_string()];
    }
    lines
}

pub fn timeout_message(limit: Duration) -> String {
    if limit.as_secs() >= 1 {
        format!("timed out after {}s", limit.as_secs())
    } else {
        format!("timed out after {}ms", limit.as_millis())
    }
}

/// First error plus up to two causes on a single line.
pub fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join("; ")
}
