//! Compliance Loader
//!
//! Reconciles a file of harvested compliance records into the metadata
//! repository:
//! 1. Loads configuration and sets up logging and metrics
//! 2. Reads the records (JSON array) named on the command line
//! 3. Runs them through the reconciler in a bounded batch
//! 4. Logs the batch summary; exits non-zero if any record failed

use anyhow::Context;
use compliance_common::{config::AppConfig, gateway::HttpGateway, metrics, VERSION};
use compliance_loader::{BatchRunner, HarvestedRecord, Reconciler};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.observability.log_level))
        .with_target(true);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(
        service = %config.observability.service_name,
        "Starting Compliance Loader v{}", VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {e}"))?;
        info!(port = config.observability.metrics_port, "Metrics exporter listening");
    }
    metrics::register_metrics();

    let path = std::env::args()
        .nth(1)
        .context("usage: loader <records.json>")?;
    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let records: Vec<HarvestedRecord> =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path))?;
    info!(path = %path, records = records.len(), "Loaded harvested records");

    let gateway = Arc::new(HttpGateway::from_config(&config.repository)?);
    let reconciler = Arc::new(Reconciler::from_config(gateway, &config));
    let runner = BatchRunner::from_config(reconciler, &config.reconcile);

    let summary = runner.run(records).await;
    for failure in &summary.failures {
        if failure.class.halts_record() {
            warn!(
                pmid = %failure.pmid,
                code = failure.code.as_code(),
                class = ?failure.class,
                message = %failure.message,
                "Record not reconciled"
            );
        } else {
            error!(
                pmid = %failure.pmid,
                code = failure.code.as_code(),
                class = ?failure.class,
                message = %failure.message,
                "Record failed after retries"
            );
        }
    }

    if summary.failed() > 0 {
        error!(failed = summary.failed(), total = summary.total, "Batch finished with failures");
        std::process::exit(1);
    }

    info!("Compliance Loader finished");
    Ok(())
}
