use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use autoresponder::channels::{ImapTransport, MimeParser, SmtpSender};
use autoresponder::config::{EmailConfig, LlmConfig, ResponderConfig};
use autoresponder::llm::{LlmResponder, LlmSpamClassifier, create_provider};
use autoresponder::pipeline::{Poller, PollerDeps, PollerState};

fn load_config() -> autoresponder::error::Result<(EmailConfig, LlmConfig, ResponderConfig)> {
    Ok((
        EmailConfig::from_env()?,
        LlmConfig::from_env()?,
        ResponderConfig::from_env()?,
    ))
}

fn build_deps(
    email: &EmailConfig,
    llm_config: &LlmConfig,
    responder: &ResponderConfig,
) -> autoresponder::error::Result<PollerDeps> {
    let llm = create_provider(llm_config)?;

    Ok(PollerDeps {
        transport: Arc::new(ImapTransport::new(email.clone(), responder.unread_window)),
        parser: Arc::new(MimeParser::new(responder.max_body_chars)),
        spam: Arc::new(LlmSpamClassifier::new(Arc::clone(&llm))),
        responder: Arc::new(LlmResponder::new(
            Arc::clone(&llm),
            responder.system_prompt.clone(),
        )),
        sender: Arc::new(SmtpSender::new(email)?),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Console plus a non-blocking file sink
    let log_dir = std::env::var("AUTORESPONDER_LOG_DIR").unwrap_or_else(|_| ".".to_string());
    let file_appender = tracing_appender::rolling::never(&log_dir, "autoresponder.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let (email_config, llm_config, responder_config) =
        load_config().context("failed to load configuration")?;

    eprintln!("📬 Autoresponder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Account: {}", email_config.address);
    eprintln!(
        "   IMAP: {}:{}  SMTP: {}:{}",
        email_config.imap_host,
        email_config.imap_port,
        email_config.smtp_host,
        email_config.smtp_port
    );
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   History: {}", responder_config.history_path.display());

    let deps = build_deps(&email_config, &llm_config, &responder_config)
        .context("failed to set up mail and LLM clients")?;

    let state = PollerState::load(&responder_config);
    tracing::info!(
        records = state.history.len(),
        ignored = state.ignore.len(),
        "Loaded response history"
    );

    let poller = Poller::new(responder_config, &email_config.address, deps);
    let (mut handle, shutdown) = poller.spawn(state);

    tokio::select! {
        result = &mut handle => {
            result.context("poller task failed")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::info!("Ctrl-C received, finishing the current cycle");
            shutdown.store(true, Ordering::Relaxed);
            let state = handle.await.context("poller task failed")?;
            tracing::info!(records = state.history.len(), "Autoresponder stopped");
        }
    }

    Ok(())
}
