use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use topic_press::batch::{BatchRunner, BatchSize, Notifier};
use topic_press::channels::{EmailChannel, MailTransport};
use topic_press::command;
use topic_press::config::AppConfig;
use topic_press::controller::CycleController;
use topic_press::dispatch::Dispatcher;
use topic_press::llm::{GeminiImageGenerator, TextGenerator, create_provider};
use topic_press::pipeline::{BATCH_MAX_ATTEMPTS, GenerationPipeline};
use topic_press::publish::{GitPublisher, NoopPublisher, Publisher};
use topic_press::site::Site;

#[derive(Parser)]
#[command(name = "topic-press")]
#[command(about = "Email-driven article generator for a static site")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the mailbox and advance the catalog until interrupted (default)
    Run,
    /// Verify IMAP and SMTP connectivity, list pending commands, and exit
    Check,
    /// Generate unpublished articles once and mail a summary
    Generate {
        /// Number of articles to generate
        #[arg(short, long, default_value_t = 1, conflicts_with = "all")]
        count: usize,

        /// Generate every remaining article
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let cli = Cli::parse();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📰 Topic Press v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Root: {}", config.paths.root.display());

    let site = Site::new(config.paths.docs());
    site.ensure_dirs()
        .with_context(|| format!("creating output tree under {}", site.docs_dir().display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config, site).await,
        Commands::Check => check(&config).await,
        Commands::Generate { count, all } => {
            let size = if all { BatchSize::All } else { BatchSize::Count(count) };
            generate(&config, site, size).await
        }
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("   Warning: Could not create log dir {}: {e}", dir.display());
            }
            let appender = tracing_appender::rolling::daily(dir, "topic-press.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    guard
}

fn build_pipeline(config: &AppConfig, site: Site, writer: Arc<dyn TextGenerator>) -> GenerationPipeline {
    let images = GeminiImageGenerator::from_config(&config.image);
    let publisher: Arc<dyn Publisher> = if config.publish.enabled {
        Arc::new(GitPublisher::new(
            &config.paths.root,
            config.publish.remote.as_str(),
            config.publish.branch.as_str(),
        ))
    } else {
        Arc::new(NoopPublisher)
    };
    eprintln!(
        "   Images: {}",
        if config.image.api_key.is_some() { config.image.model.as_str() } else { "disabled" }
    );
    eprintln!(
        "   Publish: {}",
        if config.publish.enabled { "git" } else { "disabled" }
    );
    GenerationPipeline::new(writer, images, publisher, site, config.pipeline.clone())
}

async fn run(config: &AppConfig, site: Site) -> anyhow::Result<()> {
    let controller_config = config.controller()?;
    let transport: Arc<dyn MailTransport> = Arc::new(EmailChannel::new(config.email()?));

    let writer = create_provider(&config.llm)?;
    let pipeline = build_pipeline(config, site, Arc::clone(&writer));
    let dispatcher = Dispatcher::new(pipeline, writer);

    eprintln!("   Allowed sender: {}", controller_config.allowed_sender);
    eprintln!("   Poll: every {}s", controller_config.poll_interval.as_secs());
    match controller_config.auto_interval {
        Some(interval) => eprintln!("   Auto-advance: every {} min", interval.as_secs() / 60),
        None => eprintln!("   Auto-advance: disabled"),
    }
    eprintln!("   Press Ctrl+C to stop\n");

    let controller = CycleController::new(
        transport,
        dispatcher,
        config.paths.catalog(),
        controller_config,
    );
    controller
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}

async fn check(config: &AppConfig) -> anyhow::Result<()> {
    let email = config.email()?;
    let allowed = config.allowed_sender.clone().unwrap_or_default();

    println!("=== Connectivity check ===");
    println!("IMAP: {}:{}", email.imap_host, email.imap_port);
    println!("SMTP: {}:{}", email.smtp_host, email.smtp_port);
    println!("Account: {}", email.username);
    println!("Allowed sender: {allowed}\n");

    let transport = EmailChannel::new(email);
    let report = transport.check().await.context("connectivity check failed")?;

    println!("IMAP login: {}", if report.inbound_ok { "OK" } else { "FAILED" });
    println!("Unread emails: {}", report.unread.len());
    for message in report.unread.iter().filter(|m| m.sender == allowed) {
        let parsed = command::parse(&message.subject, &message.body);
        println!("  -> '{}' => {:?}", message.subject, parsed);
    }
    println!("SMTP login: {}", if report.outbound_ok { "OK" } else { "FAILED" });

    if !(report.inbound_ok && report.outbound_ok) {
        anyhow::bail!("connectivity check failed");
    }
    println!("\nAll checks passed. Ready to run.");
    Ok(())
}

async fn generate(config: &AppConfig, site: Site, size: BatchSize) -> anyhow::Result<()> {
    let writer = create_provider(&config.llm)?;
    let pipeline = build_pipeline(config, site, writer);
    let pipeline = pipeline.with_settings(
        pipeline
            .settings()
            .clone()
            .with_max_attempts(BATCH_MAX_ATTEMPTS),
    );

    let notifier = match (&config.email, &config.allowed_sender) {
        (Some(email), Some(to)) => Some(Notifier {
            transport: Arc::new(EmailChannel::new(email.clone())),
            to: to.clone(),
        }),
        _ => {
            eprintln!("   Summary mail: disabled (no mailbox or recipient configured)");
            None
        }
    };

    let runner = BatchRunner::new(pipeline, config.paths.catalog(), reqwest::Client::new(), notifier);
    let report = runner.run(size).await?;

    eprintln!(
        "\nDone: {} generated, {} failed.",
        report.entries.len(),
        report.failures.len()
    );
    Ok(())
}
