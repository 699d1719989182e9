use a11y_core::PageRef;
use a11y_orchestrator::{
    BatchJob, BatchProgress, BatchReport, BatchScheduler, CmsClient, ExecutionMode, HttpCmsClient,
    ScanOrchestrator, ScannerConfig,
};
use a11y_sandbox::{CancellationToken, WebDriverBackend};
use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("a11y-scan")
        .version(a11y_orchestrator::VERSION)
        .about("Audit CMS pages for accessibility and report scores")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Scanner config file (TOML)"),
        )
        .arg(
            Arg::new("cms")
                .long("cms")
                .global(true)
                .help("CMS REST base URL"),
        )
        .arg(
            Arg::new("webdriver")
                .long("webdriver")
                .global(true)
                .help("WebDriver endpoint"),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .global(true)
                .value_parser(["client", "server"])
                .help("Force an execution mode instead of reading CMS configuration"),
        )
        .arg(
            Arg::new("level")
                .long("level")
                .global(true)
                .value_parser(["A", "AA", "AAA"])
                .help("WCAG conformance level (defaults to the CMS configuration)"),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .global(true)
                .value_parser(value_parser!(usize))
                .help("Pages scanned at once"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print results as JSON"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("scan").about("Scan one page").arg(
                Arg::new("page")
                    .long("page")
                    .required(true)
                    .help("Page path, e.g. /home/about"),
            ),
        )
        .subcommand(
            Command::new("batch")
                .about("Scan many pages")
                .arg(
                    Arg::new("page")
                        .long("page")
                        .action(ArgAction::Append)
                        .help("Page path (repeatable)"),
                )
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("page")
                        .help("Scan every page in the CMS inventory"),
                )
                .arg(
                    Arg::new("root")
                        .long("root")
                        .default_value("/")
                        .requires("all")
                        .help("Inventory subtree for --all"),
                ),
        )
        .subcommand(Command::new("config").about("Show effective and CMS configuration"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<ScannerConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ScannerConfig::load(path)?,
        None => ScannerConfig::default(),
    };
    if let Some(url) = matches.get_one::<String>("cms") {
        config = config.with_cms_base_url(url);
    }
    if let Some(url) = matches.get_one::<String>("webdriver") {
        config = config.with_webdriver_url(url);
    }
    if let Some(mode) = matches.get_one::<String>("mode") {
        let mode: ExecutionMode = mode.parse().map_err(anyhow::Error::msg)?;
        config = config.with_mode(mode);
    }
    if let Some(level) = matches.get_one::<String>("level") {
        config = config.with_default_level(level.parse()?);
    }
    if let Some(concurrency) = matches.get_one::<usize>("concurrency") {
        config = config.with_concurrency(*concurrency);
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_batch(report: &BatchReport) {
    for entry in &report.entries {
        let status = if entry.success { "ok  " } else { "FAIL" };
        let score = entry.score.map_or_else(|| "-".to_string(), |s| s.to_string());
        let detail = entry
            .error
            .as_deref()
            .or(entry.message.as_deref())
            .unwrap_or("");
        println!("{status} {score:>3} {:<40} {detail}", entry.page.label());
    }
    for page in &report.skipped {
        println!("skip   - {}", page.label());
    }
    println!(
        "{} succeeded, {} failed, {} skipped",
        report.succeeded(),
        report.failed(),
        report.skipped.len()
    );
}

async fn run(matches: ArgMatches) -> anyhow::Result<bool> {
    let config = load_config(&matches)?;
    let json = matches.get_flag("json");
    let cms: Arc<dyn CmsClient> = Arc::new(
        HttpCmsClient::new(config.cms_base_url.clone(), config.request_timeout())
            .context("failed to build CMS client")?,
    );

    if let Some(("config", _)) = matches.subcommand() {
        let remote = cms.fetch_configuration().await;
        if json {
            print_json(&serde_json::json!({
                "local": config,
                "remote": remote.as_ref().ok(),
                "remoteError": remote.as_ref().err().map(ToString::to_string),
            }))?;
        } else {
            println!("{}", toml::to_string_pretty(&config)?);
            match remote {
                Ok(remote) => println!("# CMS configuration\n{remote:#?}"),
                Err(err) => println!("# CMS configuration unavailable: {err}"),
            }
        }
        return Ok(true);
    }

    let backend = Arc::new(
        WebDriverBackend::new(config.webdriver_config()).context("failed to build WebDriver backend")?,
    );
    let orchestrator = ScanOrchestrator::new(Arc::clone(&cms), backend, &config);
    let level = orchestrator.default_level().await;
    tracing::debug!(%level, "default conformance level");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let success = match matches.subcommand() {
        Some(("scan", args)) => {
            let path = args
                .get_one::<String>("page")
                .context("--page is required")?;
            let result = orchestrator
                .scan_page(&PageRef::new(path.clone()), level, &cancel)
                .await;
            match result {
                Ok(report) => {
                    if json {
                        print_json(&report)?;
                    } else {
                        println!(
                            "{} score {} ({:?}), {} violations",
                            report.request.page_path,
                            report.score.value,
                            report.score.band(),
                            report.violation_count()
                        );
                        if let Some(message) = &report.message {
                            println!("note: {message}");
                        }
                    }
                    true
                }
                Err(err) => {
                    eprintln!("scan failed: {err}");
                    false
                }
            }
        }
        Some(("batch", args)) => {
            let pages: Vec<PageRef> = if args.get_flag("all") {
                let root = args.get_one::<String>("root").map_or("/", String::as_str);
                cms.list_pages(root).await.context("failed to list pages")?
            } else {
                args.get_many::<String>("page")
                    .into_iter()
                    .flatten()
                    .map(|p| PageRef::new(p.clone()))
                    .collect()
            };
            anyhow::ensure!(!pages.is_empty(), "no pages to scan (use --page or --all)");

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<BatchProgress>();
            let printer = tokio::spawn(async move {
                while let Some(progress) = rx.recv().await {
                    eprintln!(
                        "[{:>3}%] {}/{} {}",
                        progress.percentage, progress.current, progress.total, progress.current_page_label
                    );
                }
            });

            let scheduler = BatchScheduler::new(orchestrator.clone(), &config.batch);
            let job = BatchJob::new(pages, level, config.batch.concurrency);
            let report = scheduler.run(job, Some(&tx), &cancel).await;
            drop(tx);
            let _ = printer.await;

            if json {
                print_json(&report)?;
            } else {
                print_batch(&report);
            }
            report.all_succeeded()
        }
        _ => anyhow::bail!("unknown subcommand"),
    };

    orchestrator.shutdown().await;
    Ok(success)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let success = run(matches).await?;
    std::process::exit(if success { 0 } else { 1 });
}
