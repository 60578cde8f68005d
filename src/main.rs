//! Wiring & DI. Entry point: load config, bootstrap adapters, inject into
//! use cases, run one forwarding pass. No business logic here.

use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tg_forward::adapters::persistence::{JsonHistoryStore, JsonlMetadataStore};
use tg_forward::adapters::telegram::{session, GrammersAuthAdapter, GrammersTgGateway};
use tg_forward::domain::CanonicalKey;
use tg_forward::ports::{AuthPort, HistoryStorePort, TgGateway};
use tg_forward::shared::config::AppConfig;
use tg_forward::shared::maintenance;
use tg_forward::usecases::media_uploader::CaptionPolicy;
use tg_forward::usecases::{
    CapabilityProber, ChannelResolver, ForwardingEngine, MediaDownloader, MediaUploader,
    MessageFetcher, PipelineController,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    // Single accepted flag: an explicit config file path, overriding TGFWD_CONFIG.
    if let Some(config_path) = std::env::args().nth(1) {
        std::env::set_var("TGFWD_CONFIG", config_path);
    }

    let cfg = AppConfig::load().map_err(|e| anyhow::anyhow!("load config: {e}"))?;

    let session_path = PathBuf::from(format!("{}.session", cfg.telegram.session_name));
    let tg_client = create_telegram_client(&cfg, &session_path).await?;

    let auth_adapter: Arc<dyn AuthPort> =
        Arc::new(GrammersAuthAdapter::new(tg_client.clone(), cfg.telegram.api_hash.clone()));
    run_auth_flow_if_needed(&auth_adapter).await?;

    let tg: Arc<dyn TgGateway> = Arc::new(GrammersTgGateway::new(Arc::new(tokio::sync::Mutex::new(tg_client))));

    let storage_dir = PathBuf::from(&cfg.storage.tmp_path);
    let history: Arc<dyn HistoryStorePort> = Arc::new(JsonHistoryStore::new(storage_dir.clone()));
    let metadata = Arc::new(JsonlMetadataStore::new(storage_dir.join("metadata")));

    let resolver = Arc::new(ChannelResolver::new(Arc::clone(&tg)));
    let prober = Arc::new(CapabilityProber::new(Arc::clone(&tg)));

    let caption_policy = CaptionPolicy {
        remove_captions: cfg.forward.remove_captions,
        template: cfg.forward.caption_template.clone(),
        include_attribution: cfg.forward.include_attribution,
    };

    let download_dir = PathBuf::from(&cfg.download.directory);
    let fetcher = Arc::new(MessageFetcher::new(Arc::clone(&tg)));
    let downloader = Arc::new(MediaDownloader::new(
        Arc::clone(&tg),
        Arc::clone(&history),
        metadata,
        download_dir,
    ));
    let uploader = Arc::new(MediaUploader::new(
        Arc::clone(&tg),
        Arc::clone(&history),
        caption_policy,
    ));

    let pipeline = Arc::new(
        PipelineController::new(Arc::clone(&fetcher), Arc::clone(&downloader), Arc::clone(&uploader))
            .with_upload_workers(cfg.upload_workers()),
    );

    let engine = ForwardingEngine::new(
        Arc::clone(&tg),
        Arc::clone(&history),
        resolver,
        prober,
        pipeline,
        cfg.upload_workers(),
    );

    let run_config = cfg.forward.to_run_config();
    let stats = engine
        .run(&run_config)
        .await
        .map_err(|e| anyhow::anyhow!("forward run failed: {e}"))?;

    info!(
        total = stats.total,
        success = stats.success,
        failed = stats.failed,
        skipped = stats.skipped,
        "forward run complete"
    );
    if stats.error_overflow > 0 {
        warn!(
            overflow = stats.error_overflow,
            "error log truncated, see error_messages for the first entries"
        );
    }
    for msg in &stats.error_messages {
        warn!(%msg, "run error");
    }

    for pair in &run_config.forward_channel_pairs {
        if let Ok(parsed) = tg_forward::usecases::channel_resolver::parse(&pair.source_channel) {
            let key: CanonicalKey = parsed.key;
            if let Err(e) = maintenance::cleanup_history(history.as_ref(), &[key], 30).await {
                warn!(error = %e, "history cleanup failed");
            }
        }
    }
    if let Err(e) = maintenance::cleanup_temp_artifacts(
        &PathBuf::from(&cfg.download.directory),
        std::time::Duration::from_secs(24 * 3600),
    )
    .await
    {
        warn!(error = %e, "temp artifact cleanup failed");
    }

    Ok(())
}

async fn run_auth_flow_if_needed(auth: &Arc<dyn AuthPort>) -> anyhow::Result<()> {
    if auth
        .is_authenticated()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?
    {
        info!("session already authenticated");
        return Ok(());
    }

    let phone = prompt("Phone number (international format): ")?;
    auth.request_login_code(&phone)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let code = prompt("Login code: ")?;
    let needs_password = auth.sign_in(&code).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    if needs_password {
        let password = prompt("Two-factor password: ")?;
        auth.check_password(&password)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    info!("authenticated");
    Ok(())
}

fn prompt(label: &str) -> anyhow::Result<String> {
    use std::io::Write;
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Create a grammers Client with persistent session storage. Requires
/// `telegram.api_id`/`telegram.api_hash` to be set.
async fn create_telegram_client(
    cfg: &AppConfig,
    session_path: &std::path::Path,
) -> anyhow::Result<grammers_client::Client> {
    if cfg.telegram.api_id == 0 {
        anyhow::bail!(
            "set TGFWD_TELEGRAM__API_ID (and TGFWD_TELEGRAM__API_HASH). Get both from https://my.telegram.org"
        );
    }

    let session = session::open_file_session(session_path).await?;
    let session = Arc::new(session);
    let pool = grammers_client::SenderPool::new(session, cfg.telegram.api_id);
    let handle = pool.handle.clone();
    tokio::spawn(async move {
        pool.runner.run().await;
    });
    let client = grammers_client::Client::new(handle);

    Ok(client)
}
