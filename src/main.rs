use anyhow::{anyhow, bail, Context};
use depot_installer::cdn::HttpCdnClient;
use depot_installer::config::InstallerConfig;
use depot_installer::metrics::init_metrics;
use depot_installer::pipeline::{
    BootstrapSource, InstallRequest, InstallationPipeline, PipelineEvent,
};
use depot_installer::progress::progress_channel;
use depot_installer::record::{InstallRecord, InstallRecordStore, SqliteRecordStore};
use depot_installer::runtime::VersionedRootfs;
use depot_installer::validator::InstallationValidator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage:
  depot-installer register <app-id> <name> <container> <executable>
  depot-installer install <record-id> <content-depot> <install-dir> [<bootstrap-depot> <bootstrap-file> <extract-to>]
  depot-installer validate <record-id>
  depot-installer status

environment:
  DEPOT_CONFIG          JSON config file (defaults otherwise)
  DEPOT_DATABASE_URL    install record database (default sqlite://depot-installer.db)
  DEPOT_ACCESS_TOKEN    account token exchanged for CDN tokens (install)
  DEPOT_ROOTFS          guest root filesystem (install)";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "depot_installer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    init_metrics();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = load_config()?;
    let url = config
        .database_url
        .clone()
        .unwrap_or_else(|| "sqlite://depot-installer.db".to_string());
    let records = Arc::new(
        SqliteRecordStore::new(&url)
            .await
            .with_context(|| format!("opening {url}"))?,
    );

    let result = match args.first().map(String::as_str) {
        Some("register") => register(&args[1..], records.as_ref()).await,
        Some("install") => install(&args[1..], &config, records.clone()).await,
        Some("validate") => validate(&args[1..], &config, records.as_ref()).await,
        Some("status") => status(records.as_ref()).await,
        _ => bail!("{USAGE}"),
    };

    records.close().await;
    result
}

fn load_config() -> anyhow::Result<InstallerConfig> {
    match std::env::var("DEPOT_CONFIG") {
        Ok(path) => InstallerConfig::from_json_file(&PathBuf::from(&path))
            .with_context(|| format!("loading {path}")),
        Err(_) => Ok(InstallerConfig::from_env()?),
    }
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> anyhow::Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing <{name}>\n\n{USAGE}"))
}

async fn register(args: &[String], records: &SqliteRecordStore) -> anyhow::Result<()> {
    let app_id: u32 = arg(args, 0, "app-id")?.parse().context("app-id")?;
    let record = InstallRecord::new(
        app_id,
        arg(args, 1, "name")?,
        arg(args, 2, "container")?,
        arg(args, 3, "executable")?,
    );
    records.insert(&record).await?;
    println!("{}", record.id);
    Ok(())
}

async fn install(
    args: &[String],
    config: &InstallerConfig,
    records: Arc<SqliteRecordStore>,
) -> anyhow::Result<()> {
    let record_id = arg(args, 0, "record-id")?;
    let content_depot: u32 = arg(args, 1, "content-depot")?.parse().context("content-depot")?;
    let mut request = InstallRequest::new(record_id, content_depot, arg(args, 2, "install-dir")?);
    if args.len() > 3 {
        request = request.with_bootstrap(BootstrapSource {
            depot_id: arg(args, 3, "bootstrap-depot")?.parse().context("bootstrap-depot")?,
            filename: arg(args, 4, "bootstrap-file")?.to_string(),
            nested_entry: None,
            extract_to: arg(args, 5, "extract-to")?.into(),
        });
    }

    let access_token = std::env::var("DEPOT_ACCESS_TOKEN").context("DEPOT_ACCESS_TOKEN")?;
    let rootfs = std::env::var("DEPOT_ROOTFS").context("DEPOT_ROOTFS")?;
    let cdn = Arc::new(HttpCdnClient::new(&config.cdn, access_token)?);
    let pipeline = InstallationPipeline::from_config(
        config,
        cdn.clone(),
        cdn,
        Arc::new(VersionedRootfs::new(rootfs, 1)),
        records,
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping at the next chunk boundary");
            on_interrupt.cancel();
        }
    });

    let (tx, mut rx) = progress_channel();
    let printer = tokio::spawn(async move {
        let mut shown = -1i64;
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::StageStarted { stage } => tracing::info!(stage = %stage, "Stage"),
                PipelineEvent::Progress { overall, .. } => {
                    let percent = (overall * 100.0) as i64;
                    if percent > shown {
                        shown = percent;
                        eprint!("\r{percent:3}%");
                    }
                }
                PipelineEvent::Completed { .. } => eprintln!(),
                PipelineEvent::Failed { .. } | PipelineEvent::StageCompleted { .. } => {}
            }
        }
    });

    let outcome = pipeline.run(&request, tx, &cancel).await;
    let _ = printer.await;

    let outcome = outcome?;
    println!(
        "{} installed: {} files, {} bytes fetched",
        outcome.record.name,
        outcome.content.files_downloaded + outcome.content.files_resumed,
        outcome.content.bytes_fetched
    );
    Ok(())
}

async fn validate(
    args: &[String],
    config: &InstallerConfig,
    records: &SqliteRecordStore,
) -> anyhow::Result<()> {
    let record_id = arg(args, 0, "record-id")?;
    let record = records
        .get(record_id)
        .await?
        .ok_or_else(|| anyhow!("no install record {record_id}"))?;

    let report = InstallationValidator::new(config.validator.clone())
        .validate(&record)
        .await;
    if report.is_valid() {
        println!("{}: ready to launch", record.name);
        return Ok(());
    }
    for error in &report.errors {
        println!("{}: {}", record.name, error);
    }
    bail!("{} check(s) failed", report.errors.len())
}

async fn status(records: &SqliteRecordStore) -> anyhow::Result<()> {
    for record in records.list().await? {
        println!(
            "{}  {:>8}  {:<18} {:>5.1}%  {}{}",
            record.id,
            record.app_id,
            record.status.as_str(),
            record.progress_percent(),
            record.name,
            record
                .error_message
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
