//! NATS message handlers

pub mod import;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use futures::StreamExt;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::handlers::import::ImportContext;
use crate::services::import_processor::ImportProcessor;
use crate::services::ledger::SessionLedger;
use crate::store::PropertyStore;
use crate::types::{ErrorResponse, Request, SuccessResponse};

/// Handle patrulha.ping requests
async fn handle_ping(client: Client, mut subscriber: async_nats::Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };
        let request: Request<serde_json::Value> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };
        let pong = SuccessResponse::new(request.id, serde_json::json!({ "message": "pong" }));
        let _ = client.publish(reply, serde_json::to_vec(&pong)?.into()).await;
    }
    Ok(())
}

/// Start all message handlers and the JetStream import consumer
pub async fn start_handlers(
    client: Client,
    store: Arc<dyn PropertyStore>,
    config: &Config,
) -> Result<()> {
    info!("Starting message handlers...");

    let processor = Arc::new(ImportProcessor::new(client.clone(), store.clone()).await?);
    let ledger = Arc::new(SessionLedger::new(store.clone()));

    let ctx = Arc::new(ImportContext {
        client: client.clone(),
        processor: processor.clone(),
        ledger,
        store,
        jwt_secret: config.jwt_secret.clone(),
    });

    let ping_sub = client.subscribe("patrulha.ping").await?;
    let analyze_sub = client.subscribe("patrulha.import.analyze").await?;
    let submit_sub = client.subscribe("patrulha.import.submit").await?;
    let cancel_sub = client.subscribe("patrulha.import.cancel").await?;
    let undo_sub = client.subscribe("patrulha.import.undo").await?;
    let sessions_sub = client.subscribe("patrulha.import.sessions").await?;
    let errors_sub = client.subscribe("patrulha.import.errors").await?;
    let template_sub = client.subscribe("patrulha.import.template").await?;

    info!("Subscribed to all subjects, worker ready");

    tokio::spawn(handle_ping(client.clone(), ping_sub));
    tokio::spawn(import::handle_analyze(ctx.clone(), analyze_sub));
    tokio::spawn(import::handle_submit(ctx.clone(), submit_sub));
    tokio::spawn(import::handle_cancel(ctx.clone(), cancel_sub));
    tokio::spawn(import::handle_undo(ctx.clone(), undo_sub));
    tokio::spawn(import::handle_sessions(ctx.clone(), sessions_sub));
    tokio::spawn(import::handle_errors(ctx.clone(), errors_sub));
    tokio::spawn(import::handle_template(ctx.clone(), template_sub));

    // The work-queue consumer runs on the current task
    processor.start_processing().await?;

    Ok(())
}
