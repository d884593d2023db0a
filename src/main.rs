//! debtor-node bootstrap.
//!
//! Loads config, initializes logging, connects to the store, bootstraps the
//! schema, then idles on a periodic health check. Task-dispatch and RPC
//! wiring are deployment-specific and plug in on top of
//! [`debtor_node::procedures`].

use std::time::Duration;

use anyhow::Result;

use debtor_node::Context;
use debtor_node::config::AppConfig;
use debtor_node::db::{Database, schema};
use debtor_node::logging::init_logging;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _guard = init_logging(&config);

    let db = Database::connect(&config.postgres_url).await?;
    schema::init_schema(db.pool()).await?;

    let ctx = Context::builder(db).build();
    tracing::info!(env = %env, "debtor node ready");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                if let Err(e) = ctx.db().health_check().await {
                    tracing::error!(error = %e, "store health check failed");
                }
            }
        }
    }

    Ok(())
}
