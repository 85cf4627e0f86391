//! Orchestrator - sequences walk, store, diff and highlight
//!
//! ```text
//! Idle → Loading → Walking → NoChange
//!                          → Saving → Saved
//!                          → Saving → Diffing → Highlighting → Done
//!                                            → NoChange
//! (any) → Failed
//! ```
//!
//! A page is opened for the load/walk/screenshot phases only and is closed
//! on every exit path before the result is inspected. Those phases are
//! bounded by the settle time plus the page load timeout.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Semaphore};

use browser::{BrowserEvent, Clip, PageHandle, RenderCapability};
use dom::diff::diff as diff_trees;
use dom::{CaptureMeta, Change, DomService, Side, SnapshotTree, Timestamp, DUMP_SCRIPT};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::highlight::{Highlight, HighlightRenderer, OverlaySide};
use crate::observer::{LogLevel, RunLog, SharedObserver, TracingObserver};
use crate::store::{host_label, parse_url, path_segment, LatestSnapshot, SavedCapture, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Loading,
    Walking,
    NoChange,
    Saving,
    Saved,
    Diffing,
    Highlighting,
    Done,
    Failed,
}

/// How a CAPTURE run ended
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Same content as the latest capture; nothing was saved
    NoChange { latest: Timestamp },
    /// Saved without diffing (first capture, or no diff requested)
    Saved(SavedCapture),
    /// Saved, and the diff against the prior capture came out empty
    SavedNoChange {
        saved: SavedCapture,
        prior: Timestamp,
    },
    /// Saved, diffed and highlighted
    Highlighted {
        saved: SavedCapture,
        prior: Timestamp,
        changes: Vec<Change>,
        highlight: Highlight,
    },
}

impl CaptureOutcome {
    /// Terminal state of the run
    pub fn state(&self) -> RunState {
        match self {
            CaptureOutcome::NoChange { .. } | CaptureOutcome::SavedNoChange { .. } => {
                RunState::NoChange
            }
            CaptureOutcome::Saved(_) => RunState::Saved,
            CaptureOutcome::Highlighted { .. } => RunState::Done,
        }
    }
}

/// How a DIFF run ended
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    NoChange,
    Highlighted {
        changes: Vec<Change>,
        highlight: Highlight,
    },
}

impl DiffOutcome {
    pub fn state(&self) -> RunState {
        match self {
            DiffOutcome::NoChange => RunState::NoChange,
            DiffOutcome::Highlighted { .. } => RunState::Done,
        }
    }
}

/// What the page phases produced
enum PagePhase {
    Unchanged { latest: Timestamp },
    Captured {
        tree: SnapshotTree,
        screenshot: Vec<u8>,
        prior: Option<LatestSnapshot>,
    },
}

/// Unix time in milliseconds
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

pub struct Monitor<R: RenderCapability> {
    renderer: Arc<R>,
    store: SnapshotStore,
    config: Arc<MonitorConfig>,
    observer: SharedObserver,
}

impl<R: RenderCapability> Monitor<R> {
    pub fn new(renderer: Arc<R>, config: Arc<MonitorConfig>) -> Self {
        Self {
            renderer,
            store: SnapshotStore::new(config.root.clone()),
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// CAPTURE one URL at `time`
    pub async fn capture(
        &self,
        url: &str,
        time: Timestamp,
        diff_requested: bool,
    ) -> Result<CaptureOutcome> {
        let log = RunLog::new(self.observer.clone(), url);
        log.state(RunState::Idle, format!("capture at {}", time));

        let result = self.run_capture(&log, url, time, diff_requested).await;
        match &result {
            Ok(outcome) => log.state(outcome.state(), "capture finished"),
            Err(e) => log.state(RunState::Failed, e.to_string()),
        }
        result
    }

    /// CAPTURE every URL at one shared timestamp
    pub async fn capture_all(
        &self,
        urls: &[String],
        diff_requested: bool,
    ) -> (Timestamp, Vec<(String, Result<CaptureOutcome>)>) {
        let time = now_millis();
        (time, self.capture_all_at(urls, time, diff_requested).await)
    }

    /// Batch CAPTURE; one URL failing never stops the others
    pub async fn capture_all_at(
        &self,
        urls: &[String],
        time: Timestamp,
        diff_requested: bool,
    ) -> Vec<(String, Result<CaptureOutcome>)> {
        // Pair hosts in the order given, not the order their pages load
        if let Err(e) = self.store.reserve_batch(time, urls).await {
            tracing::warn!(time, "Failed to record batch order: {}", e);
        }

        let permits = Semaphore::new(self.config.concurrency.max(1));
        let runs = urls.iter().map(|url| {
            let permits = &permits;
            async move {
                let _permit = permits.acquire().await;
                (url.clone(), self.capture(url, time, diff_requested).await)
            }
        });
        join_all(runs).await
    }

    /// DIFF the two captures recorded for `path_name` at `time`
    pub async fn diff(&self, time: Timestamp, path_name: &str) -> Result<DiffOutcome> {
        let log = RunLog::new(self.observer.clone(), path_name);
        log.state(RunState::Idle, format!("diff at {}", time));

        let result = self.run_diff(&log, time, path_name).await;
        match &result {
            Ok(outcome) => log.state(outcome.state(), "diff finished"),
            Err(e) => log.state(RunState::Failed, e.to_string()),
        }
        result
    }

    /// DIFF every path recorded at `time`
    pub async fn diff_all(&self, time: Timestamp) -> Result<Vec<(String, Result<DiffOutcome>)>> {
        let paths = self.store.paths_at(time).await?;
        let permits = Semaphore::new(self.config.concurrency.max(1));
        let runs = paths.into_iter().map(|path| {
            let permits = &permits;
            async move {
                let _permit = permits.acquire().await;
                let result = self.diff(time, &path).await;
                (path, result)
            }
        });
        Ok(join_all(runs).await)
    }

    async fn run_capture(
        &self,
        log: &RunLog,
        url: &str,
        time: Timestamp,
        diff_requested: bool,
    ) -> Result<CaptureOutcome> {
        let parsed = parse_url(url)?;

        log.state(RunState::Loading, "opening page");
        let mut events = self.renderer.events();
        let page = self
            .renderer
            .navigate(url)
            .await
            .map_err(|e| MonitorError::render(url, e))?;

        let limit = self.config.page.settle() + self.config.page.load_timeout();
        let phases = async {
            match tokio::time::timeout(limit, self.page_phases(log, &page, url, time)).await {
                Ok(result) => result,
                Err(_) => Err(MonitorError::render(
                    url,
                    format!("page did not finish within {:?}", limit),
                )),
            }
        };
        let phase = self
            .guarded(log, RunState::Walking, &mut events, &page, url, phases)
            .await;
        if let Err(e) = self.renderer.close(page).await {
            log.emit(LogLevel::Warning, RunState::Walking, format!("failed to close page: {}", e));
        }

        let (tree, screenshot, prior) = match phase? {
            PagePhase::Unchanged { latest } => return Ok(CaptureOutcome::NoChange { latest }),
            PagePhase::Captured {
                tree,
                screenshot,
                prior,
            } => (tree, screenshot, prior),
        };

        log.state(RunState::Saving, "saving capture");
        let rect = tree.rect;
        let saved = self
            .store
            .save(url, tree.clone().into(), rect, &screenshot, time)
            .await?;

        let prior = match prior {
            Some(prior) if diff_requested => prior,
            _ => return Ok(CaptureOutcome::Saved(saved)),
        };

        log.state(RunState::Diffing, format!("diffing against {}", prior.time));
        let changes = diff_trees(&prior.tree, &tree, &self.config.diff);
        if changes.is_empty() {
            return Ok(CaptureOutcome::SavedNoChange {
                saved,
                prior: prior.time,
            });
        }

        log.state(RunState::Highlighting, format!("{} changes", changes.len()));
        let left = OverlaySide::from_capture(
            self.store.read_screenshot(url, prior.time).await?,
            prior.tree.rect,
        );
        let right = OverlaySide::from_capture(screenshot, rect);
        let label = format!("{}/{}-{}", host_label(&parsed), prior.time, time);
        let overlay = self
            .store
            .overlay_path(&label, &path_segment(parsed.path()));
        let highlight = HighlightRenderer::new(&*self.renderer)
            .render(&changes, &left, &right, &self.config.highlight, &overlay)
            .await?;

        Ok(CaptureOutcome::Highlighted {
            saved,
            prior: prior.time,
            changes,
            highlight,
        })
    }

    /// Settle, walk, fast-path check and screenshot, all on the open page
    async fn page_phases(
        &self,
        log: &RunLog,
        page: &PageHandle,
        url: &str,
        time: Timestamp,
    ) -> Result<PagePhase> {
        let settle = self.config.page.settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        log.state(RunState::Walking, "walking DOM");
        let dump = self
            .renderer
            .evaluate(page, DUMP_SCRIPT, self.config.walk.dump_args())
            .await
            .map_err(|e| MonitorError::render(url, e))?;
        let mut service = DomService::new();
        service.parse_page_dump(&dump)?;
        let tree = dom::walk(
            service.arena(),
            &self.config.walk,
            CaptureMeta {
                url: url.to_string(),
                timestamp: time,
            },
        )?;

        let prior = self.store.get_latest(url).await?;
        if let Some(latest) = &prior {
            if latest.tree.same_content(&tree) {
                return Ok(PagePhase::Unchanged {
                    latest: latest.time,
                });
            }
        }

        let rect = tree.rect;
        let clip = (!rect.is_empty()).then(|| Clip::new(rect.x, rect.y, rect.width, rect.height));
        let screenshot = self
            .renderer
            .screenshot(page, clip)
            .await
            .map_err(|e| MonitorError::render(url, e))?;

        Ok(PagePhase::Captured {
            tree,
            screenshot,
            prior,
        })
    }

    /// Run `phase` while watching the page's events.
    ///
    /// A crash or unexpected close aborts the phase; script errors are
    /// logged and abort only with `fail_on_script_error`.
    async fn guarded<T, F>(
        &self,
        log: &RunLog,
        state: RunState,
        events: &mut broadcast::Receiver<BrowserEvent>,
        page: &PageHandle,
        url: &str,
        phase: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::pin!(phase);
        let mut listening = true;

        loop {
            tokio::select! {
                biased;
                event = events.recv(), if listening => match event {
                    Ok(event) => self.check_event(log, state, page, url, event)?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(url, "Page event stream lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => listening = false,
                },
                result = &mut phase => {
                    // Events queued while the phase finished still count
                    while let Ok(event) = events.try_recv() {
                        self.check_event(log, state, page, url, event)?;
                    }
                    return result;
                }
            }
        }
    }

    fn check_event(
        &self,
        log: &RunLog,
        state: RunState,
        page: &PageHandle,
        url: &str,
        event: BrowserEvent,
    ) -> Result<()> {
        if event.target_id() != page.target_id {
            return Ok(());
        }
        match event {
            BrowserEvent::PageCrashed { .. } => Err(MonitorError::render(url, "page crashed")),
            BrowserEvent::PageClosed { .. } => {
                Err(MonitorError::render(url, "page closed unexpectedly"))
            }
            BrowserEvent::PageError { message, .. } => {
                log.emit(
                    LogLevel::Warning,
                    state,
                    format!("uncaught script error: {}", message),
                );
                if self.config.fail_on_script_error {
                    Err(MonitorError::render(url, message))
                } else {
                    Ok(())
                }
            }
            BrowserEvent::ConsoleMessage { level, text, .. } => {
                log.emit(LogLevel::Debug, state, format!("console.{}: {}", level, text));
                Ok(())
            }
            BrowserEvent::PageLoaded { .. } => Ok(()),
        }
    }

    async fn run_diff(&self, log: &RunLog, time: Timestamp, path_name: &str) -> Result<DiffOutcome> {
        let (left_url, right_url) = self.store.resolve_pair(time, path_name).await?;
        let missing = |side| MonitorError::MissingSnapshot {
            side,
            time,
            path_name: path_name.to_string(),
        };
        let left = self
            .store
            .get_tree(&left_url, time)
            .await?
            .ok_or_else(|| missing(Side::Left))?;
        let right = self
            .store
            .get_tree(&right_url, time)
            .await?
            .ok_or_else(|| missing(Side::Right))?;

        log.state(RunState::Diffing, format!("{} vs {}", left_url, right_url));
        let changes = diff_trees(&left, &right, &self.config.diff);
        if changes.is_empty() {
            return Ok(DiffOutcome::NoChange);
        }

        log.state(RunState::Highlighting, format!("{} changes", changes.len()));
        let left_side = OverlaySide::from_capture(
            self.store.read_screenshot(&left_url, time).await?,
            left.rect,
        );
        let right_side = OverlaySide::from_capture(
            self.store.read_screenshot(&right_url, time).await?,
            right.rect,
        );
        let overlay = self
            .store
            .overlay_path(&time.to_string(), &path_segment(path_name));
        let highlight = HighlightRenderer::new(&*self.renderer)
            .render(
                &changes,
                &left_side,
                &right_side,
                &self.config.highlight,
                &overlay,
            )
            .await?;

        Ok(DiffOutcome::Highlighted { changes, highlight })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ChannelObserver, MonitorRecord};
    use crate::testing::{page_dump, FakeRenderer};
    use dom::ChangeType;
    use std::path::Path;

    const HOME: &str = "http://example.com/home";

    fn setup(root: &Path, fail_on_script_error: bool) -> (Arc<FakeRenderer>, Monitor<FakeRenderer>) {
        setup_with(MonitorConfig {
            root: root.to_path_buf(),
            fail_on_script_error,
            ..MonitorConfig::default()
        })
    }

    fn setup_with(config: MonitorConfig) -> (Arc<FakeRenderer>, Monitor<FakeRenderer>) {
        let renderer = Arc::new(FakeRenderer::new());
        let monitor = Monitor::new(renderer.clone(), Arc::new(config));
        (renderer, monitor)
    }

    fn corrupt_tree(monitor: &Monitor<FakeRenderer>, url: &str, time: Timestamp) {
        let path = monitor
            .store()
            .artifact_dir(url, time)
            .unwrap()
            .join(crate::store::TREE_FILE);
        std::fs::write(path, "{ not a tree").unwrap();
    }

    fn drain(rx: &mut broadcast::Receiver<MonitorRecord>) -> Vec<MonitorRecord> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_first_capture_saves_without_diff() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        renderer.serve(HOME, page_dump(&[("x", "Hello")]));

        assert!(monitor.store().get_latest(HOME).await.unwrap().is_none());
        let outcome = monitor.capture(HOME, 1, true).await.unwrap();

        match outcome {
            CaptureOutcome::Saved(saved) => {
                assert_eq!(saved.time, 1);
                assert!(saved.screenshot.exists());
            }
            other => panic!("expected Saved, got {:?}", other),
        }
        assert!(!dir.path().join("diff").exists());
        assert_eq!(renderer.opened(), 1);
        assert_eq!(renderer.closed(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_page_is_not_saved_again() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        renderer.serve(HOME, page_dump(&[("x", "Hello")]));

        monitor.capture(HOME, 1, true).await.unwrap();
        let outcome = monitor.capture(HOME, 2, true).await.unwrap();

        assert_eq!(outcome, CaptureOutcome::NoChange { latest: 1 });
        assert_eq!(outcome.state(), RunState::NoChange);
        assert!(!monitor.store().artifact_dir(HOME, 2).unwrap().exists());
        assert_eq!(renderer.opened(), renderer.closed());
    }

    #[tokio::test]
    async fn test_changed_page_is_highlighted() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        let observer = Arc::new(ChannelObserver::default());
        let monitor = monitor.with_observer(observer.clone());
        let mut records = observer.subscribe();

        renderer.serve(HOME, page_dump(&[("x", "Hello")]));
        monitor.capture(HOME, 1, true).await.unwrap();
        renderer.serve(HOME, page_dump(&[("x", "World")]));
        let outcome = monitor.capture(HOME, 2, true).await.unwrap();

        let CaptureOutcome::Highlighted {
            saved,
            prior,
            changes,
            highlight,
        } = outcome
        else {
            panic!("expected Highlighted");
        };
        assert_eq!(prior, 1);
        assert_eq!(saved.time, 2);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeType::TEXT);
        assert_eq!(highlight.count, 1);
        assert_eq!(
            highlight.overlay,
            dir.path().join("diff").join("example.com").join("1-2").join("_home.png")
        );
        assert!(highlight.overlay.exists());
        assert!(highlight.html.exists());

        // capture page twice plus the overlay page
        assert_eq!(renderer.opened(), 3);
        assert_eq!(renderer.closed(), 3);

        let states: Vec<RunState> = drain(&mut records).iter().map(|r| r.state).collect();
        let second_run = &states[states.len() - 7..];
        assert_eq!(
            second_run,
            &[
                RunState::Idle,
                RunState::Loading,
                RunState::Walking,
                RunState::Saving,
                RunState::Diffing,
                RunState::Highlighting,
                RunState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_no_diff_requested() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        renderer.serve(HOME, page_dump(&[("x", "Hello")]));
        monitor.capture(HOME, 1, false).await.unwrap();
        renderer.serve(HOME, page_dump(&[("x", "Hello"), ("y", "new")]));

        let outcome = monitor.capture(HOME, 2, false).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Saved(_)));
        assert!(!dir.path().join("diff").exists());
    }

    #[tokio::test]
    async fn test_geometry_only_change_saves_but_reports_no_change() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        renderer.serve(HOME, page_dump(&[("x", "Hello")]));
        monitor.capture(HOME, 1, true).await.unwrap();

        let mut moved = page_dump(&[("x", "Hello")]);
        moved["root"]["children"][0]["children"][0]["bounds"] = serde_json::json!([0, 40, 375, 20]);
        renderer.serve(HOME, moved);

        let outcome = monitor.capture(HOME, 2, true).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::SavedNoChange { prior: 1, .. }));
        assert_eq!(outcome.state(), RunState::NoChange);
        assert!(monitor.store().artifact_dir(HOME, 2).unwrap().exists());
    }

    #[tokio::test]
    async fn test_crash_closes_page_and_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        let observer = Arc::new(ChannelObserver::default());
        let monitor = monitor.with_observer(observer.clone());
        let mut records = observer.subscribe();

        renderer.serve(HOME, page_dump(&[("x", "Hello")]));
        renderer.crash_on_walk(HOME);

        let err = monitor.capture(HOME, 1, true).await.unwrap_err();
        assert!(matches!(err, MonitorError::RenderFailure { .. }));
        assert_eq!(renderer.opened(), 1);
        assert_eq!(renderer.closed(), 1);
        assert_eq!(renderer.open_count(), 0);
        assert!(!monitor.store().artifact_dir(HOME, 1).unwrap().exists());

        let last = drain(&mut records).pop().unwrap();
        assert_eq!(last.state, RunState::Failed);
        assert_eq!(last.level, LogLevel::Error);
    }

    #[tokio::test]
    async fn test_script_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        let observer = Arc::new(ChannelObserver::default());
        let monitor = monitor.with_observer(observer.clone());
        let mut records = observer.subscribe();

        renderer.serve(HOME, page_dump(&[("x", "Hello")]));
        renderer.script_error_on(HOME, "TypeError: boom");
        tokio_test::assert_ok!(monitor.capture(HOME, 1, true).await);
        assert!(drain(&mut records)
            .iter()
            .any(|r| r.level == LogLevel::Warning && r.message.contains("TypeError: boom")));

        let strict_dir = tempfile::tempdir().unwrap();
        let (renderer, strict) = setup(strict_dir.path(), true);
        renderer.serve(HOME, page_dump(&[("x", "Hello")]));
        renderer.script_error_on(HOME, "TypeError: boom");
        let err = strict.capture(HOME, 1, true).await.unwrap_err();
        assert!(matches!(err, MonitorError::RenderFailure { .. }));
        assert_eq!(renderer.opened(), renderer.closed());
    }

    #[tokio::test]
    async fn test_capture_all_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        let urls: Vec<String> = vec![
            "http://a.test/".to_string(),
            "http://b.test/".to_string(),
            "http://unreachable.test/".to_string(),
            "not a url".to_string(),
        ];
        renderer.serve(&urls[0], page_dump(&[("x", "a")]));
        renderer.serve(&urls[1], page_dump(&[("x", "b")]));
        renderer.crash_on_walk(&urls[1]);

        let results = monitor.capture_all_at(&urls, 9, true).await;
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].0, urls[0]);
        assert!(matches!(results[0].1, Ok(CaptureOutcome::Saved(_))));
        assert!(matches!(results[1].1, Err(MonitorError::RenderFailure { .. })));
        assert!(matches!(results[2].1, Err(MonitorError::RenderFailure { .. })));
        assert!(matches!(results[3].1, Err(MonitorError::InvalidUrl { .. })));
        assert_eq!(renderer.opened(), renderer.closed());
    }

    #[tokio::test]
    async fn test_diff_with_one_side_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        renderer.serve("http://old.test/home", page_dump(&[("x", "Hello")]));
        monitor.capture("http://old.test/home", 5, false).await.unwrap();

        let err = monitor.diff(5, "/home").await.unwrap_err();
        assert_eq!(err.missing_side(), Some(Side::Right));
        assert!(!dir.path().join("diff").exists());

        let err = monitor.diff(6, "/home").await.unwrap_err();
        assert_eq!(err.missing_side(), Some(Side::Left));
    }

    #[tokio::test]
    async fn test_diff_two_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        let urls = vec![
            "http://old.test/home".to_string(),
            "http://new.test/home".to_string(),
            "http://old.test/about".to_string(),
            "http://new.test/about".to_string(),
        ];
        renderer.serve(&urls[0], page_dump(&[("x", "Hello")]));
        renderer.serve(&urls[1], page_dump(&[("x", "Hello"), ("y", "added")]));
        renderer.serve(&urls[2], page_dump(&[("a", "same")]));
        renderer.serve(&urls[3], page_dump(&[("a", "same")]));

        let results = monitor.capture_all_at(&urls, 10, false).await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));

        match monitor.diff(10, "/home").await.unwrap() {
            DiffOutcome::Highlighted { changes, highlight } => {
                assert_eq!(changes.len(), 1);
                assert_eq!(changes[0].kind, ChangeType::ADD);
                assert_eq!(highlight.count, 1);
                assert_eq!(
                    highlight.overlay,
                    dir.path().join("diff").join("10").join("_home.png")
                );
            }
            other => panic!("expected Highlighted, got {:?}", other),
        }

        let mut all = monitor.diff_all(10).await.unwrap();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "/about");
        assert!(matches!(all[0].1, Ok(DiffOutcome::NoChange)));
        assert!(matches!(all[1].1, Ok(DiffOutcome::Highlighted { .. })));
        assert_eq!(renderer.opened(), renderer.closed());
    }

    #[tokio::test]
    async fn test_batch_pairs_hosts_in_given_order() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        let urls = vec![
            "http://old.test/home".to_string(),
            "http://new.test/home".to_string(),
        ];
        renderer.serve(&urls[0], page_dump(&[("x", "Hello")]));
        renderer.serve(&urls[1], page_dump(&[("x", "Hello"), ("y", "added")]));
        // the left host finishes last
        renderer.delay_load(&urls[0], std::time::Duration::from_millis(200));

        let results = monitor.capture_all_at(&urls, 10, false).await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));

        let (left, right) = monitor.store().resolve_pair(10, "/home").await.unwrap();
        assert_eq!(left, urls[0]);
        assert_eq!(right, urls[1]);

        match monitor.diff(10, "/home").await.unwrap() {
            DiffOutcome::Highlighted { changes, .. } => {
                assert_eq!(dom::kinds(&changes), ChangeType::ADD);
            }
            other => panic!("expected Highlighted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stalled_page_times_out_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MonitorConfig {
            root: dir.path().to_path_buf(),
            ..MonitorConfig::default()
        };
        config.page.load_timeout_ms = 50;
        let (renderer, monitor) = setup_with(config);
        renderer.serve(HOME, page_dump(&[("x", "Hello")]));
        renderer.stall_on_walk(HOME);

        let err = monitor.capture(HOME, 1, true).await.unwrap_err();
        assert!(matches!(err, MonitorError::RenderFailure { .. }));
        assert_eq!(renderer.opened(), 1);
        assert_eq!(renderer.closed(), 1);
        assert!(!monitor.store().artifact_dir(HOME, 1).unwrap().exists());
    }

    #[tokio::test]
    async fn test_malformed_prior_capture_stays_with_its_url() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        let urls = vec!["http://a.test/".to_string(), "http://b.test/".to_string()];
        renderer.serve(&urls[0], page_dump(&[("x", "a")]));
        renderer.serve(&urls[1], page_dump(&[("x", "b")]));
        monitor.capture_all_at(&urls, 1, true).await;

        corrupt_tree(&monitor, &urls[0], 1);
        renderer.serve(&urls[1], page_dump(&[("x", "b2")]));

        let results = monitor.capture_all_at(&urls, 2, true).await;
        assert!(matches!(
            results[0].1,
            Err(MonitorError::MalformedArtifact { .. })
        ));
        assert!(matches!(
            results[1].1,
            Ok(CaptureOutcome::Highlighted { prior: 1, .. })
        ));
        assert_eq!(renderer.opened(), renderer.closed());
    }

    #[tokio::test]
    async fn test_malformed_tree_stays_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, monitor) = setup(dir.path(), false);
        let urls = vec![
            "http://old.test/home".to_string(),
            "http://new.test/home".to_string(),
            "http://old.test/about".to_string(),
            "http://new.test/about".to_string(),
        ];
        renderer.serve(&urls[0], page_dump(&[("x", "Hello")]));
        renderer.serve(&urls[1], page_dump(&[("x", "Hello")]));
        renderer.serve(&urls[2], page_dump(&[("a", "one")]));
        renderer.serve(&urls[3], page_dump(&[("a", "two")]));
        monitor.capture_all_at(&urls, 3, false).await;

        corrupt_tree(&monitor, &urls[0], 3);

        let mut all = monitor.diff_all(3).await.unwrap();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(all[0].0, "/about");
        assert!(matches!(all[0].1, Ok(DiffOutcome::Highlighted { .. })));
        assert_eq!(all[1].0, "/home");
        assert!(matches!(
            all[1].1,
            Err(MonitorError::MalformedArtifact { .. })
        ));
    }
}
