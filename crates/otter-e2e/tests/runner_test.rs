//! Integration tests for discovery, scheduling and JUnit output

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{MockBackend, RecordingReporter, sample, settings};
use otter_e2e::{
    JunitWriter, Module, ModuleDescriptor, OutputFolder, Outcome, ReporterConfig, Runner, RunnerError, Settings,
    SourcePaths, TestBody, TestError, TestSource, read_test_source,
};

fn runner(settings: Settings, backend: &MockBackend, reporter: &RecordingReporter) -> Runner {
    Runner::create(settings, ReporterConfig::default())
        .with_backend(Arc::new(backend.clone()))
        .with_reporter(Box::new(reporter.clone()))
}

fn code_module(name: &str) -> otter_e2e::module::ModuleBuilder {
    Module::builder(ModuleDescriptor::new("/code", format!("/code/{}.yaml", name), &[], name))
}

#[tokio::test]
async fn test_empty_source_rejects_run() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let settings = settings(out.path());

    let source = read_test_source(src.path(), &settings).unwrap().await.unwrap();
    assert!(source.is_empty());

    let mut runner = runner(settings, &MockBackend::new(), &RecordingReporter::default());
    let err = runner.run(source).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("No tests defined! using source folder: {}", src.path().display())
    );
    assert!(runner.results().is_empty());
}

#[test]
fn test_missing_source_fails_before_discovery() {
    let result = read_test_source(SourcePaths::none(), &Settings::default());
    let err = result.err().unwrap();
    assert!(matches!(err, RunnerError::NoTestSource));
    assert_eq!(
        err.to_string(),
        "No test source specified and no source folder defined. Check configuration."
    );
}

#[tokio::test]
async fn test_src_folders_from_settings() {
    let out = tempfile::tempdir().unwrap();
    let settings = Settings {
        src_folders: vec![sample("simple")],
        ..settings(out.path())
    };

    let source = read_test_source(SourcePaths::none(), &settings).unwrap().await.unwrap();
    let keys: Vec<_> = source.modules().iter().map(|m| m.key().to_string()).collect();
    assert_eq!(keys, ["sample"]);
}

#[tokio::test]
async fn test_simple_run_completes() {
    let out = tempfile::tempdir().unwrap();
    let settings = settings(out.path());
    let backend = MockBackend::new();

    let source = read_test_source(sample("simple"), &settings).unwrap().await.unwrap();
    let mut runner = runner(settings, &backend, &RecordingReporter::default());
    let summary = runner.run(source).await.unwrap();

    let module = runner.results().module("sample").unwrap();
    assert!(module.is_completed("demoTest"));
    assert!(runner.results().last_error().is_none());
    assert!(!summary.has_failures());
    assert_eq!(summary.assertions, 1);
    assert_eq!(backend.started(), 1);
    assert_eq!(backend.stopped(), 1);
}

#[tokio::test]
async fn test_subfolders_mirrored_in_output() {
    let out = tempfile::tempdir().unwrap();
    let root = out.path().join("output");
    let settings = settings(&root);

    let source = read_test_source(sample("withsubfolders"), &settings).unwrap().await.unwrap();
    let mut runner = runner(settings, &MockBackend::new(), &RecordingReporter::default());
    runner.run(source).await.unwrap();

    let mut folders: Vec<String> = std::fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    folders.sort();
    assert_eq!(folders, ["simple", "tags"]);

    let simple: Vec<_> = std::fs::read_dir(root.join("simple")).unwrap().collect();
    assert_eq!(simple.len(), 1);
    assert!(root.join("tags/FIREFOX_TEST_TEST_sampleTags.xml").is_file());

    let xml = std::fs::read_to_string(root.join("simple/FIREFOX_TEST_TEST_sample.xml")).unwrap();
    assert!(xml.contains(
        "<testsuite name=\"simple.sample\" errors=\"0\" failures=\"0\" hostname=\"\" id=\"\" package=\"sample\" skipped=\"0\" tests=\"1\""
    ));
    assert!(xml.contains("<testcase name=\"simpleDemoTest\" classname=\"simple.sample\" time=\""));
    assert!(xml.contains("assertions=\"1\">"));
}

#[tokio::test]
async fn test_failed_assertion_is_reported_and_run_resolves() {
    let out = tempfile::tempdir().unwrap();
    let settings = settings(out.path());

    let source = read_test_source(sample("withfailures"), &settings).unwrap().await.unwrap();
    let mut runner = runner(settings, &MockBackend::new(), &RecordingReporter::default());
    let summary = runner.run(source).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.passed, 1);
    let module = runner.results().module("sample").unwrap();
    assert_eq!(module.testcase("badElement").unwrap().outcome, Outcome::Failed);
    assert!(module.is_completed("goodElement"));
    // Assertion failures are not unrecoverable errors.
    assert!(runner.results().last_error().is_none());

    let xml = std::fs::read_to_string(out.path().join("FIREFOX_TEST_TEST_sample.xml")).unwrap();
    assert!(xml.contains("<failure message=\"Testing if element &lt;#badElement&gt; is present."));
}

#[tokio::test]
async fn test_unit_module_report_has_no_prefix() {
    let out = tempfile::tempdir().unwrap();
    let root = out.path().join("output");
    let settings = settings(&root);
    let backend = MockBackend::new();

    let source = read_test_source(sample("unittests/unittest-failure.yaml"), &settings)
        .unwrap()
        .await
        .unwrap();
    let mut runner = runner(settings, &backend, &RecordingReporter::default());
    runner.run(source).await.unwrap();

    assert_eq!(backend.started(), 0);
    let xml = std::fs::read_to_string(root.join("unittest-failure.xml")).unwrap();
    assert!(xml.contains(
        "<failure message=\"AssertionError: 1 == 0 - expected &#34;0&#34; but got: &#34;1&#34;\">"
    ));
}

#[tokio::test]
async fn test_skipped_testcase_in_unit_module() {
    let out = tempfile::tempdir().unwrap();
    let settings = settings(out.path());

    let source = read_test_source(sample("unittests/unittest-passing.yaml"), &settings)
        .unwrap()
        .await
        .unwrap();
    let mut runner = runner(settings, &MockBackend::new(), &RecordingReporter::default());
    let summary = runner.run(source).await.unwrap();

    assert_eq!(summary.passed, 1);
    assert_eq!(summary.skipped, 1);
    let xml = std::fs::read_to_string(out.path().join("unittest-passing.xml")).unwrap();
    assert!(xml.contains("<skipped message=\"pending backend support\" />"));
}

#[tokio::test]
async fn test_async_timeout_is_reported_once() {
    let out = tempfile::tempdir().unwrap();
    let mut settings = settings(out.path());
    settings.globals.async_hook_timeout = 10;
    let backend = MockBackend::new();
    let reporter = RecordingReporter::default();

    let source = read_test_source(sample("asynctimeout"), &settings).unwrap().await.unwrap();
    let mut runner = runner(settings, &backend, &reporter);
    runner.run(source).await.unwrap();

    assert_eq!(
        reporter.uncaught_messages(),
        ["done() callback timeout of 10 ms was reached while executing \"demoTest\". \
          Make sure to call the done() callback when the operation finishes."]
    );

    let module = runner.results().module("sample").unwrap();
    let timed_out = module.testcase("demoTest").unwrap();
    assert_eq!(timed_out.outcome, Outcome::Errored);
    assert!(timed_out.timed_out());
    assert!(module.is_completed("afterTimeout"));
    assert!(runner.results().last_error().is_some());
    assert_eq!(backend.stopped(), 1);
}

#[tokio::test]
async fn test_timed_out_testcase_leaves_nothing_behind() {
    let reporter = RecordingReporter::default();
    let fired = Arc::new(AtomicUsize::new(0));

    let stale = Arc::clone(&fired);
    let first = code_module("first")
        .unit()
        .async_timeout(Duration::from_millis(10))
        .test(
            "slow",
            TestBody::with_done(move |ctx, done| {
                let fired = Arc::clone(&stale);
                ctx.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    fired.fetch_add(1, Ordering::SeqCst);
                    done.complete();
                    Err(TestError::runtime("too late"))
                });
                Ok(())
            }),
        )
        .build();

    // Keeps the run alive well past the moment the stale task would fire.
    let second = code_module("second")
        .unit()
        .async_timeout(Duration::from_millis(1000))
        .test(
            "waits",
            TestBody::with_done(|ctx, done| {
                ctx.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    done.complete();
                    Ok(())
                });
                Ok(())
            }),
        )
        .build();

    let settings = Settings {
        output_folder: OutputFolder::Disabled,
        output: false,
        ..Settings::default()
    };
    let mut runner = runner(settings, &MockBackend::new(), &reporter);
    runner
        .run(TestSource::new(vec!["/code".into()], vec![first, second]))
        .await
        .unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(reporter.uncaught.lock().len(), 1);
    assert_eq!(reporter.uncaught.lock()[0].0, "slow");

    assert!(runner.results().module("first").unwrap().testcase("slow").unwrap().timed_out());
    let second = runner.results().module("second").unwrap();
    assert!(second.is_completed("waits"));
    assert!(second.testcase("waits").unwrap().error.is_none());
}

#[tokio::test]
async fn test_panic_in_spawned_task_is_attributed() {
    let reporter = RecordingReporter::default();
    let module = code_module("panicky")
        .unit()
        .test(
            "crashes",
            TestBody::with_done(|ctx, _done| {
                ctx.spawn(async {
                    let elements: Vec<u32> = Vec::new();
                    if elements.is_empty() {
                        panic!("element went away");
                    }
                    Ok(())
                });
                Ok(())
            }),
        )
        .test("survives", TestBody::sync(|ctx| {
            ctx.assert_equal(2, 2);
            Ok(())
        }))
        .build();

    let settings = Settings {
        output_folder: OutputFolder::Disabled,
        output: false,
        ..Settings::default()
    };
    let mut runner = runner(settings, &MockBackend::new(), &reporter);
    runner
        .run(TestSource::new(vec!["/code".into()], vec![module]))
        .await
        .unwrap();

    let module = runner.results().module("panicky").unwrap();
    assert_eq!(
        module.testcase("crashes").unwrap().error,
        Some(TestError::Panic("element went away".to_string()))
    );
    assert!(module.is_completed("survives"));
    assert_eq!(reporter.uncaught_messages(), ["element went away"]);
}

#[tokio::test]
async fn test_session_stopped_once_per_module() {
    let out = tempfile::tempdir().unwrap();
    let settings = settings(out.path());
    let backend = MockBackend::new();

    let source = read_test_source(
        vec![sample("withsubfolders"), sample("withfailures")],
        &settings,
    )
    .unwrap()
    .await
    .unwrap();
    let mut runner = runner(settings, &backend, &RecordingReporter::default());
    runner.run(source).await.unwrap();

    assert_eq!(backend.started(), 3);
    assert_eq!(backend.stopped(), 3);
    assert_eq!(runner.sessions().started(), runner.sessions().stopped());
}

#[tokio::test]
async fn test_session_start_failure_errors_module() {
    let out = tempfile::tempdir().unwrap();
    let settings = settings(out.path());
    let backend = MockBackend::refusing();

    let source = read_test_source(sample("withfailures"), &settings).unwrap().await.unwrap();
    let mut runner = runner(settings, &backend, &RecordingReporter::default());
    let summary = runner.run(source).await.unwrap();

    assert_eq!(summary.errored, 2);
    assert_eq!(backend.stopped(), 0);
    let module = runner.results().module("sample").unwrap();
    assert!(matches!(
        module.testcase("badElement").unwrap().error,
        Some(TestError::Session(_))
    ));
    assert!(out.path().join("sample.xml").is_file());
}

#[tokio::test]
async fn test_skip_testcases_on_fail() {
    let out = tempfile::tempdir().unwrap();
    let settings = Settings {
        skip_testcases_on_fail: true,
        ..settings(out.path())
    };

    let source = read_test_source(sample("withfailures"), &settings).unwrap().await.unwrap();
    let mut runner = runner(settings, &MockBackend::new(), &RecordingReporter::default());
    let summary = runner.run(source).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    let good = runner.results().module("sample").unwrap().testcase("goodElement").unwrap();
    assert_eq!(good.skip_reason.as_deref(), Some("Skipped after failure in \"badElement\""));
}

#[tokio::test]
async fn test_report_writing_is_idempotent() {
    let out = tempfile::tempdir().unwrap();
    let root = out.path().join("output");
    let settings = settings(&root);

    let source = read_test_source(sample("withsubfolders"), &settings).unwrap().await.unwrap();
    let mut runner = runner(settings, &MockBackend::new(), &RecordingReporter::default());
    runner.run(source).await.unwrap();

    let writer = JunitWriter::new(&root);
    let before: Vec<Vec<u8>> = runner
        .results()
        .modules()
        .map(|m| std::fs::read(writer.report_path(m)).unwrap())
        .collect();

    let written = writer.write(runner.results()).await.unwrap();
    let after: Vec<Vec<u8>> = written.iter().map(|p| std::fs::read(p).unwrap()).collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_disabled_output_writes_nothing() {
    let out = tempfile::tempdir().unwrap();
    let settings = Settings {
        output_folder: OutputFolder::Disabled,
        output: false,
        ..Settings::default()
    };

    let source = read_test_source(sample("simple"), &settings).unwrap().await.unwrap();
    let mut runner = runner(settings, &MockBackend::new(), &RecordingReporter::default());
    runner.run(source).await.unwrap();

    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    assert!(runner.results().module("sample").is_some());
}

#[tokio::test]
async fn test_results_survive_failed_report_write() {
    let out = tempfile::tempdir().unwrap();
    let blocker = out.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let settings = settings(&blocker.join("out"));
    let backend = MockBackend::new();

    let source = read_test_source(sample("withfailures"), &settings).unwrap().await.unwrap();
    let mut runner = runner(settings, &backend, &RecordingReporter::default());
    let err = runner.run(source).await.unwrap_err();

    assert!(matches!(err, RunnerError::Report(_)));
    let module = runner.results().module("sample").unwrap();
    assert!(module.is_completed("goodElement"));
    assert_eq!(module.testcase("badElement").unwrap().outcome, Outcome::Failed);
    assert_eq!(backend.stopped(), 1);
}

#[tokio::test]
async fn test_async_hook_timeout_is_a_module_error() {
    let reporter = RecordingReporter::default();
    let backend = MockBackend::new();

    let module = code_module("hooked")
        .async_timeout(Duration::from_millis(10))
        .before(TestBody::with_done(|ctx, done| {
            // Holds the signal without ever sending it.
            ctx.spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                done.complete();
                Ok(())
            });
            Ok(())
        }))
        .test("first", TestBody::sync(|ctx| {
            ctx.assert_ok(true, "first ran");
            Ok(())
        }))
        .test("second", TestBody::sync(|_| Ok(())))
        .build();

    let settings = Settings {
        output_folder: OutputFolder::Disabled,
        output: false,
        ..Settings::default()
    };
    let mut runner = runner(settings, &backend, &reporter);
    runner
        .run(TestSource::new(vec!["/code".into()], vec![module]))
        .await
        .unwrap();

    let uncaught = reporter.uncaught.lock().clone();
    assert_eq!(uncaught.len(), 1);
    assert_eq!(uncaught[0].0, "before");
    assert!(matches!(&uncaught[0].1, TestError::Timeout { timeout_ms: 10, name } if name == "before"));

    let result = runner.results().module("hooked").unwrap();
    assert!(result.is_completed("first"));
    assert!(result.is_completed("second"));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].origin, "before");
    assert!(runner.results().last_error().is_some_and(|err| matches!(err, TestError::Timeout { .. })));
    assert_eq!(backend.started(), 1);
    assert_eq!(backend.stopped(), 1);
}

#[tokio::test]
async fn test_task_error_in_after_hook_is_a_module_error() {
    let reporter = RecordingReporter::default();
    let backend = MockBackend::new();

    let module = code_module("cleanup")
        .after(TestBody::with_done(|ctx, _done| {
            ctx.spawn(async { Err(TestError::runtime("cleanup failed")) });
            Ok(())
        }))
        .test("only", TestBody::sync(|_| Ok(())))
        .build();

    let settings = Settings {
        output_folder: OutputFolder::Disabled,
        output: false,
        ..Settings::default()
    };
    let mut runner = runner(settings, &backend, &reporter);
    let summary = runner
        .run(TestSource::new(vec!["/code".into()], vec![module]))
        .await
        .unwrap();

    assert_eq!(reporter.uncaught_messages(), ["cleanup failed"]);
    assert_eq!(reporter.uncaught.lock()[0].0, "after");

    let result = runner.results().module("cleanup").unwrap();
    assert!(result.is_completed("only"));
    assert_eq!(result.errors[0].origin, "after");
    assert_eq!(summary.module_errors, 1);
    assert!(summary.has_failures());
    assert_eq!(backend.stopped(), 1);
}
