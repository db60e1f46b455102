//! Diagnostics coordination.
//!
//! tsserver reports diagnostics asynchronously, as three event kinds per
//! file. [`DiagnosticsQueue`] is the pure aggregation half: it keeps the
//! last-received list per (file, kind) and merges them in a fixed order for
//! publication. [`DiagnosticsScheduler`] is the timing half: it debounces
//! `geterr` requests behind 200 ms of quiescence, keeps at most one in
//! flight, and lets read requests interrupt it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tower_lsp::lsp_types::{Diagnostic, NumberOrString, Range};

use crate::protocol::{Command, GeterrRequestArgs, EVENT_SEMANTIC_DIAG, EVENT_SUGGESTION_DIAG, EVENT_SYNTAX_DIAG};
use crate::tsserver::{CancellationToken, TsServer};

pub const DIAGNOSTICS_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Syntax,
    Semantic,
    Suggestion,
}

impl DiagnosticKind {
    pub fn from_event(event: &str) -> Option<Self> {
        match event {
            EVENT_SYNTAX_DIAG => Some(DiagnosticKind::Syntax),
            EVENT_SEMANTIC_DIAG => Some(DiagnosticKind::Semantic),
            EVENT_SUGGESTION_DIAG => Some(DiagnosticKind::Suggestion),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct FileBuckets {
    syntax: Vec<Diagnostic>,
    semantic: Vec<Diagnostic>,
    suggestion: Vec<Diagnostic>,
}

/// Per-file diagnostic buckets. Each event kind replaces its bucket
/// atomically; the published list is always syntax, then semantic, then
/// suggestion.
#[derive(Debug, Default)]
pub struct DiagnosticsQueue {
    files: HashMap<PathBuf, FileBuckets>,
}

impl DiagnosticsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, path: &Path, kind: DiagnosticKind, diagnostics: Vec<Diagnostic>) {
        let buckets = self.files.entry(path.to_path_buf()).or_default();
        match kind {
            DiagnosticKind::Syntax => buckets.syntax = diagnostics,
            DiagnosticKind::Semantic => buckets.semantic = diagnostics,
            DiagnosticKind::Suggestion => buckets.suggestion = diagnostics,
        }
    }

    pub fn merged(&self, path: &Path) -> Vec<Diagnostic> {
        let Some(buckets) = self.files.get(path) else {
            return Vec::new();
        };
        buckets
            .syntax
            .iter()
            .chain(buckets.semantic.iter())
            .chain(buckets.suggestion.iter())
            .cloned()
            .collect()
    }

    pub fn clear(&mut self, path: &Path) {
        self.files.remove(path);
    }

    /// Numeric error codes of stored diagnostics overlapping `range`; input
    /// to `getCodeFixes`.
    pub fn codes_in_range(&self, path: &Path, range: Range) -> Vec<i64> {
        let Some(buckets) = self.files.get(path) else {
            return Vec::new();
        };
        let mut codes: Vec<i64> = buckets
            .syntax
            .iter()
            .chain(buckets.semantic.iter())
            .chain(buckets.suggestion.iter())
            .filter(|diagnostic| ranges_overlap(diagnostic.range, range))
            .filter_map(|diagnostic| match &diagnostic.code {
                Some(NumberOrString::Number(code)) => Some(*code as i64),
                _ => None,
            })
            .collect();
        codes.dedup();
        codes
    }
}

fn ranges_overlap(a: Range, b: Range) -> bool {
    a.start <= b.end && b.start <= a.end
}

/// Debounced `geterr` driver. `schedule` arms (or re-arms) the 200 ms timer;
/// `cancel_inflight` is the interruption hook read requests use before
/// talking to tsserver.
pub struct DiagnosticsScheduler {
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    debounce: Option<tokio::task::JoinHandle<()>>,
    inflight: Option<CancellationToken>,
}

impl DiagnosticsScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Request diagnostics for `files` after the debounce window. A newer
    /// call replaces an armed timer, so only the last snapshot of open files
    /// is sent.
    pub fn schedule(self: std::sync::Arc<Self>, server: TsServer, files: Vec<String>) {
        if files.is_empty() {
            return;
        }
        let scheduler = std::sync::Arc::clone(&self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(DIAGNOSTICS_DEBOUNCE).await;
            scheduler.issue(server, files).await;
        });

        let mut state = self.state.lock().unwrap();
        if let Some(previous) = state.debounce.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel whatever `geterr` is in flight (and disarm a pending timer).
    /// Returns whether anything was actually cancelled.
    pub fn cancel_inflight(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(timer) = state.debounce.take() {
            timer.abort();
        }
        match state.inflight.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn issue(self: std::sync::Arc<Self>, server: TsServer, files: Vec<String>) {
        let token = CancellationToken::new();
        {
            let mut state = self.state.lock().unwrap();
            // A new geterr always replaces the previous one.
            if let Some(previous) = state.inflight.replace(token.clone()) {
                previous.cancel();
            }
        }

        let args = GeterrRequestArgs { files, delay: 0 };
        if let Err(err) = server
            .request_cancellable(Command::Geterr, args, &token)
            .await
        {
            if !token.is_cancelled() {
                tracing::warn!(error = %err, "geterr failed");
            }
        }

        let mut state = self.state.lock().unwrap();
        if state
            .inflight
            .as_ref()
            .is_some_and(|current| current.same_as(&token))
        {
            state.inflight = None;
        }
    }
}

impl Default for DiagnosticsScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Position;

    fn diagnostic(line: u32, message: &str, code: Option<i32>) -> Diagnostic {
        Diagnostic {
            range: Range::new(Position::new(line, 0), Position::new(line, 5)),
            message: message.to_string(),
            code: code.map(NumberOrString::Number),
            ..Default::default()
        }
    }

    #[test]
    fn event_names_map_to_kinds() {
        assert_eq!(
            DiagnosticKind::from_event("syntaxDiag"),
            Some(DiagnosticKind::Syntax)
        );
        assert_eq!(
            DiagnosticKind::from_event("semanticDiag"),
            Some(DiagnosticKind::Semantic)
        );
        assert_eq!(
            DiagnosticKind::from_event("suggestionDiag"),
            Some(DiagnosticKind::Suggestion)
        );
        assert_eq!(DiagnosticKind::from_event("telemetry"), None);
    }

    #[test]
    fn merged_keeps_the_fixed_bucket_order() {
        let path = Path::new("/a.ts");
        let mut queue = DiagnosticsQueue::new();
        queue.update(path, DiagnosticKind::Suggestion, vec![diagnostic(2, "s", None)]);
        queue.update(path, DiagnosticKind::Semantic, vec![diagnostic(1, "m", None)]);
        queue.update(path, DiagnosticKind::Syntax, vec![diagnostic(0, "x", None)]);

        let merged = queue.merged(path);
        let messages: Vec<_> = merged.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["x", "m", "s"]);
    }

    #[test]
    fn an_update_replaces_only_its_bucket() {
        let path = Path::new("/a.ts");
        let mut queue = DiagnosticsQueue::new();
        queue.update(path, DiagnosticKind::Semantic, vec![diagnostic(1, "old", None)]);
        queue.update(path, DiagnosticKind::Syntax, vec![diagnostic(0, "x", None)]);
        queue.update(path, DiagnosticKind::Semantic, vec![diagnostic(1, "new", None)]);

        let messages: Vec<_> = queue
            .merged(path)
            .iter()
            .map(|d| d.message.clone())
            .collect();
        assert_eq!(messages, vec!["x", "new"]);
    }

    #[test]
    fn closing_a_file_clears_everything() {
        let path = Path::new("/a.ts");
        let mut queue = DiagnosticsQueue::new();
        queue.update(path, DiagnosticKind::Syntax, vec![diagnostic(0, "x", None)]);
        queue.clear(path);
        assert!(queue.merged(path).is_empty());
    }

    #[test]
    fn codes_in_range_filters_by_overlap() {
        let path = Path::new("/a.ts");
        let mut queue = DiagnosticsQueue::new();
        queue.update(
            path,
            DiagnosticKind::Semantic,
            vec![diagnostic(0, "a", Some(2304)), diagnostic(5, "b", Some(1005))],
        );

        let codes = queue.codes_in_range(
            path,
            Range::new(Position::new(0, 0), Position::new(1, 0)),
        );
        assert_eq!(codes, vec![2304]);
    }
}
