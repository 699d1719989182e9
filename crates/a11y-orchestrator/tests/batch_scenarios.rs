//! End-to-end batches over the scripted backend and in-memory CMS

use a11y_core::{PageRef, ScoreBasis, WcagLevel, WcagVersion};
use a11y_orchestrator::{
    BatchJob, BatchProgress, BatchScheduler, ExecutionMode, RemoteConfiguration, ScanPhase,
    CROSS_ORIGIN_TITLE_SUFFIX,
};
use a11y_sandbox::CancellationToken;
use a11y_test_utils::fixtures::{clean_results, heavy_results};
use a11y_test_utils::{orchestrator, page_url, pages, test_config, FakeBackend, InMemoryCms, PageBehaviour};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

fn drain(rx: &mut UnboundedReceiver<BatchProgress>) -> Vec<BatchProgress> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn paths(pages: &[PageRef]) -> Vec<&str> {
    pages.iter().map(|p| p.path.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn hanging_page_fails_alone() {
    let cms = Arc::new(InMemoryCms::new().with_pages(pages(5)));
    let backend = Arc::new(FakeBackend::default().with_page(page_url("/page-3"), PageBehaviour::Hangs));
    let scheduler = BatchScheduler::new(
        orchestrator(&cms, &backend, &test_config()),
        &Default::default(),
    )
    .with_window_delay(Duration::ZERO);
    let (tx, mut rx) = unbounded_channel();

    let report = scheduler
        .run(
            BatchJob::new(pages(5), WcagLevel::AA, 2),
            Some(&tx),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.entries.len(), 5);
    assert!(!report.cancelled);
    assert!(report.skipped.is_empty());
    let order: Vec<&str> = report.entries.iter().map(|e| e.page.path.as_str()).collect();
    assert_eq!(order, vec!["/page-1", "/page-2", "/page-3", "/page-4", "/page-5"]);
    for entry in &report.entries {
        if entry.page.path == "/page-3" {
            assert!(!entry.success);
            assert!(entry.error.as_deref().unwrap_or_default().contains("timed out"));
        } else {
            assert!(entry.success, "{} should succeed", entry.page.path);
            assert_eq!(entry.score, Some(100));
            assert_eq!(entry.violation_count, Some(0));
        }
    }
    assert_eq!(report.succeeded(), 4);
    assert!(!report.all_succeeded());

    let events = drain(&mut rx);
    assert_eq!(events.len(), 5);
    let currents: Vec<usize> = events.iter().map(|e| e.current).collect();
    assert_eq!(currents, vec![1, 2, 3, 4, 5]);
    assert!(events.iter().all(|e| e.total == 5));
    assert!(events.windows(2).all(|w| w[0].percentage <= w[1].percentage));
    assert_eq!(events.last().map(|e| e.percentage), Some(100));

    // a page that never loaded leaves any stored score untouched
    assert_eq!(cms.saved().len(), 4);
    assert!(cms.saved_for("/page-3").is_none());

    let stats = scheduler.orchestrator().container().stats();
    assert!(stats.is_balanced());
    assert_eq!(backend.live(), 0);
    assert!(backend.max_in_flight() <= 2);
}

#[tokio::test(start_paused = true)]
async fn windows_never_exceed_concurrency() {
    let slow = PageBehaviour::LoadsAfter {
        delay: Duration::from_millis(50),
        results: clean_results(4),
    };
    let cms = Arc::new(InMemoryCms::new().with_pages(pages(7)));
    let backend = Arc::new(FakeBackend::new(slow));
    let scheduler = BatchScheduler::new(
        orchestrator(&cms, &backend, &test_config()),
        &Default::default(),
    )
    .with_window_delay(Duration::from_millis(500));

    let started = tokio::time::Instant::now();
    let report = scheduler
        .run(BatchJob::new(pages(7), WcagLevel::A, 3), None, &CancellationToken::new())
        .await;

    assert!(report.all_succeeded());
    assert_eq!(report.entries.len(), 7);
    assert!(backend.max_in_flight() <= 3);
    assert!(backend.max_in_flight() > 1);
    assert_eq!(backend.created(), 7);
    assert_eq!(backend.discarded(), 7);
    // three windows, two pauses between them
    assert!(started.elapsed() >= Duration::from_millis(1_000));
}

#[tokio::test]
async fn cross_origin_page_is_recorded_with_placeholder_score() {
    let cms = Arc::new(InMemoryCms::new().with_pages(pages(2)));
    let backend = Arc::new(
        FakeBackend::new(PageBehaviour::Loads(heavy_results()))
            .with_page(page_url("/page-2"), PageBehaviour::CrossOrigin),
    );
    let scheduler = BatchScheduler::new(
        orchestrator(&cms, &backend, &test_config()),
        &Default::default(),
    );

    let report = scheduler
        .run(BatchJob::new(pages(2), WcagLevel::AA, 2), None, &CancellationToken::new())
        .await;

    let heavy = &report.entries[0];
    assert!(heavy.success);
    assert_eq!(heavy.score, Some(0));
    assert_eq!(heavy.violation_count, Some(3));

    let blocked = &report.entries[1];
    assert!(blocked.success);
    assert_eq!(blocked.score, Some(100));
    assert_eq!(blocked.violation_count, Some(0));
    assert!(blocked.message.as_deref().unwrap_or_default().contains("Cross-origin"));
    assert_eq!(blocked.error, None);

    let saved = cms.saved_for("/page-2").unwrap();
    assert_eq!(saved.page_title, format!("Page 2{CROSS_ORIGIN_TITLE_SUFFIX}"));
    assert_eq!(saved.score, 100);
    assert!(saved.axe_results.violations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_skips_unstarted_pages_and_releases_sessions() {
    let cms = Arc::new(InMemoryCms::new().with_pages(pages(6)));
    let backend = Arc::new(FakeBackend::new(PageBehaviour::Hangs));
    let config = test_config().with_load_timeout(Duration::from_secs(30));
    let scheduler = BatchScheduler::new(orchestrator(&cms, &backend, &config), &Default::default())
        .with_window_delay(Duration::ZERO);
    let cancel = CancellationToken::new();
    let (tx, mut rx) = unbounded_channel();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let report = scheduler
        .run(BatchJob::new(pages(6), WcagLevel::AA, 2), Some(&tx), &cancel)
        .await;

    assert!(report.cancelled);
    assert_eq!(report.entries.len(), 2);
    assert!(report.entries.iter().all(|e| !e.success));
    assert!(report
        .entries
        .iter()
        .all(|e| e.error.as_deref() == Some("scan cancelled")));
    assert_eq!(paths(&report.skipped), vec!["/page-3", "/page-4", "/page-5", "/page-6"]);

    assert_eq!(drain(&mut rx).len(), 2);
    assert!(cms.saved().is_empty());
    assert!(scheduler.orchestrator().container().stats().is_balanced());
    assert_eq!(backend.live(), 0);
    assert_eq!(backend.created(), 2);
}

#[tokio::test]
async fn persistence_failure_fails_only_that_page() {
    let cms = Arc::new(InMemoryCms::new().with_pages(pages(3)).failing_save_for("/page-2"));
    let backend = Arc::new(FakeBackend::default());
    let scheduler = BatchScheduler::new(
        orchestrator(&cms, &backend, &test_config()),
        &Default::default(),
    );

    let report = scheduler
        .run(BatchJob::new(pages(3), WcagLevel::AA, 3), None, &CancellationToken::new())
        .await;

    assert_eq!(report.succeeded(), 2);
    let failed = &report.entries[1];
    assert_eq!(failed.page.path, "/page-2");
    assert!(!failed.success);
    assert!(failed
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("failed to persist scan results"));
    assert_eq!(cms.saved().len(), 2);
    assert_eq!(backend.discarded(), 3);
}

#[tokio::test]
async fn server_delegated_scan_skips_the_sandbox() {
    let cms = Arc::new(
        InMemoryCms::new()
            .with_pages(pages(1))
            .with_configuration(RemoteConfiguration {
                server_side_scan: true,
                ..Default::default()
            })
            .with_server_result("/page-1", heavy_results()),
    );
    let backend = Arc::new(FakeBackend::default());
    let mut config = test_config();
    config.mode = None;
    let orchestrator = orchestrator(&cms, &backend, &config);
    let listed = pages(1);
    let page = &listed[0];

    let report = orchestrator
        .scan_page(page, WcagLevel::AA, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.mode, ExecutionMode::ServerDelegated);
    assert_eq!(report.score.value, 0);
    assert_eq!(report.score.basis, ScoreBasis::Audited);
    assert_eq!(report.violation_count(), 3);
    assert_eq!(report.request.page_url, page_url("/page-1"));
    assert_eq!(report.phases.last().map(|r| r.phase), Some(ScanPhase::Succeeded));
    assert_eq!(report.message.as_deref(), Some("Server-side scan completed"));

    // configuration is cached between scans
    orchestrator
        .scan_page(page, WcagLevel::AA, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cms.configuration_fetches(), 1);
    assert_eq!(cms.server_scans(), 2);
    assert!(cms.saved().is_empty());
    assert_eq!(backend.created(), 0);
    assert_eq!(backend.attach_count(), 0);
}

#[tokio::test]
async fn unreachable_configuration_scans_locally() {
    let cms = Arc::new(InMemoryCms::new().with_pages(pages(1)));
    let backend = Arc::new(FakeBackend::default());
    let mut config = test_config();
    config.mode = None;
    let orchestrator = orchestrator(&cms, &backend, &config);

    let report = orchestrator
        .scan_page(&pages(1)[0], WcagLevel::AA, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.mode, ExecutionMode::ClientSandboxed);
    assert_eq!(report.score.value, 100);
    assert_eq!(backend.created(), 1);
    assert_eq!(cms.saved().len(), 1);
}

#[tokio::test]
async fn cms_level_and_version_drive_the_engine_tags() {
    let cms = Arc::new(
        InMemoryCms::new()
            .with_pages(pages(1))
            .with_configuration(RemoteConfiguration {
                server_side_scan: false,
                wcag_level: WcagLevel::AAA,
                wcag_version: WcagVersion::V2_2,
            }),
    );
    let backend = Arc::new(FakeBackend::default());
    let mut config = test_config();
    config.mode = None;
    let orchestrator = orchestrator(&cms, &backend, &config);

    let level = orchestrator.default_level().await;
    assert_eq!(level, WcagLevel::AAA);
    let report = orchestrator
        .scan_page(&pages(1)[0], level, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.mode, ExecutionMode::ClientSandboxed);
    assert_eq!(report.request.wcag_level, WcagLevel::AAA);
    assert_eq!(cms.configuration_fetches(), 1);

    let invocation = &backend.invocations()[0];
    assert!(invocation.run_only.values.iter().any(|t| t == "wcag22aaa"));
    assert!(invocation.run_only.values.iter().any(|t| t == "wcag2aaa"));
}

#[tokio::test]
async fn local_overrides_beat_cms_level_and_version() {
    let cms = Arc::new(
        InMemoryCms::new()
            .with_pages(pages(1))
            .with_configuration(RemoteConfiguration {
                server_side_scan: false,
                wcag_level: WcagLevel::AAA,
                wcag_version: WcagVersion::V2_2,
            }),
    );
    let backend = Arc::new(FakeBackend::default());
    let config = test_config()
        .with_default_level(WcagLevel::A)
        .with_wcag_version(WcagVersion::V2_1);
    let orchestrator = orchestrator(&cms, &backend, &config);

    let level = orchestrator.default_level().await;
    assert_eq!(level, WcagLevel::A);
    orchestrator
        .scan_page(&pages(1)[0], level, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cms.configuration_fetches(), 0);

    let invocation = &backend.invocations()[0];
    assert!(!invocation.run_only.values.iter().any(|t| t.starts_with("wcag22")));
    assert!(!invocation.run_only.values.iter().any(|t| t == "wcag2aa"));
}

#[tokio::test]
async fn orchestrators_keep_separate_containers() {
    let cms = Arc::new(InMemoryCms::new().with_pages(pages(3)));
    let first_backend = Arc::new(FakeBackend::default());
    let second_backend = Arc::new(FakeBackend::default());
    let first = orchestrator(&cms, &first_backend, &test_config());
    let second = orchestrator(&cms, &second_backend, &test_config());
    let cancel = CancellationToken::new();
    let listed = pages(2);

    let (a, b) = tokio::join!(
        first.scan_page(&listed[0], WcagLevel::AA, &cancel),
        second.scan_page(&listed[1], WcagLevel::AAA, &cancel),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(first.container().stats().created, 1);
    assert_eq!(second.container().stats().created, 1);

    first.shutdown().await;
    assert!(first.container().is_closed());
    assert!(!second.container().is_closed());
    assert_eq!(first_backend.detach_count(), 1);
    assert_eq!(second_backend.detach_count(), 0);

    let invocation = &second_backend.invocations()[0];
    assert!(invocation.run_only.values.iter().any(|t| t == "wcag2aaa"));
}
