//! CSV import NATS handlers
//!
//! Request/reply endpoints for the import workflow: analyze a file,
//! submit a run, cancel it, inspect sessions, download the error report
//! or the template, and undo a whole run.

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use futures::StreamExt;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::extract_auth;
use crate::services::cancellation::CANCELLATION;
use crate::services::column_mapper;
use crate::services::import_processor::ImportProcessor;
use crate::services::ledger::{LedgerError, SessionLedger};
use crate::services::report;
use crate::store::PropertyStore;
use crate::types::{
    CancelImportRequest, ColumnMapping, EmptyPayload, ErrorReportRequest, ErrorReportResponse,
    ErrorResponse, ImportAnalyzeRequest, ImportAnalyzeResponse, ImportJobRequest, QueuedImportJob,
    Request, SuccessResponse, UndoSessionRequest,
};

/// Shared state for the import handlers
pub struct ImportContext {
    pub client: Client,
    pub processor: Arc<ImportProcessor>,
    pub ledger: Arc<SessionLedger>,
    pub store: Arc<dyn PropertyStore>,
    pub jwt_secret: String,
}

async fn reply_json<T: serde::Serialize>(client: &Client, reply: async_nats::Subject, body: &T) {
    match serde_json::to_vec(body) {
        Ok(payload) => {
            let _ = client.publish(reply, payload.into()).await;
        }
        Err(e) => error!("Failed to serialize reply: {}", e),
    }
}

fn ledger_error_code(err: &LedgerError) -> &'static str {
    match err {
        LedgerError::SessionNotFound => "NOT_FOUND",
        LedgerError::AlreadyUndone => "ALREADY_UNDONE",
        LedgerError::Forbidden => "FORBIDDEN",
        LedgerError::Store(_) => "STORE_ERROR",
    }
}

/// Handle patrulha.import.analyze requests
pub async fn handle_analyze(
    ctx: Arc<ImportContext>,
    mut subscriber: async_nats::Subscriber,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ImportAnalyzeRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import analyze request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        if let Err(e) = extract_auth(&request, &ctx.jwt_secret) {
            let error = ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string());
            reply_json(&ctx.client, reply, &error).await;
            continue;
        }

        let analysis = column_mapper::analyze(&request.payload.csv_content);
        info!(
            filename = %request.payload.filename,
            headers = analysis.headers.len(),
            rows = analysis.rows.len(),
            "Import file analyzed"
        );
        let response = ImportAnalyzeResponse {
            suggested_mapping: analysis.suggested.to_entries(),
            total_rows: analysis.rows.len(),
            headers: analysis.headers,
        };
        reply_json(&ctx.client, reply, &SuccessResponse::new(request.id, response)).await;
    }
    Ok(())
}

/// Handle patrulha.import.submit requests
pub async fn handle_submit(
    ctx: Arc<ImportContext>,
    mut subscriber: async_nats::Subscriber,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ImportJobRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import submit request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        let auth = match extract_auth(&request, &ctx.jwt_secret) {
            Ok(auth) => auth,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        // Import never starts with an incomplete mapping
        let mapping = match ColumnMapping::from_entries(&request.payload.mapping) {
            Ok(mapping) => mapping,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "INVALID_MAPPING", e);
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };
        let complaints = mapping.validate();
        if !complaints.is_empty() {
            let error =
                ErrorResponse::new(request.id, "INVALID_MAPPING", complaints.join("; "));
            reply_json(&ctx.client, reply, &error).await;
            continue;
        }

        let analysis = column_mapper::analyze(&request.payload.csv_content);
        if analysis.rows.is_empty() {
            let error = ErrorResponse::new(
                request.id,
                "EMPTY_FILE",
                "arquivo CSV vazio ou ilegível",
            );
            reply_json(&ctx.client, reply, &error).await;
            continue;
        }
        let total_rows = analysis.rows.len();

        let session = match ctx
            .ledger
            .begin(auth.user_id, &request.payload.filename, total_rows as i32)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to open import session: {}", e);
                let error = ErrorResponse::new(request.id, "STORE_ERROR", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        let job = QueuedImportJob::new(auth.user_id, session.id, request.payload.clone());
        match ctx.processor.submit_job(job, total_rows).await {
            Ok(response) => {
                reply_json(&ctx.client, reply, &SuccessResponse::new(request.id, response)).await;
            }
            Err(e) => {
                error!("Failed to submit import job: {}", e);
                let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
            }
        }
    }
    Ok(())
}

/// Handle patrulha.import.cancel requests
pub async fn handle_cancel(
    ctx: Arc<ImportContext>,
    mut subscriber: async_nats::Subscriber,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<CancelImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        let auth = match extract_auth(&request, &ctx.jwt_secret) {
            Ok(auth) => auth,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        let job_id = request.payload.job_id;
        match CANCELLATION.cancel(&job_id, auth.user_id) {
            Ok(true) => {
                info!(%job_id, "Cancellation requested");
                reply_json(&ctx.client, reply, &SuccessResponse::new(request.id, EmptyPayload {}))
                    .await;
            }
            Ok(false) => {
                // Not running yet: flag it so the worker skips it on pickup
                CANCELLATION.pre_cancel(job_id, auth.user_id);
                reply_json(&ctx.client, reply, &SuccessResponse::new(request.id, EmptyPayload {}))
                    .await;
            }
            Err(_) => {
                let error = ErrorResponse::new(
                    request.id,
                    "FORBIDDEN",
                    "apenas quem enviou a importação pode cancelá-la",
                );
                reply_json(&ctx.client, reply, &error).await;
            }
        }
    }
    Ok(())
}

/// Handle patrulha.import.undo requests. `confirm=false` returns the
/// preview only; the destructive action requires `confirm=true`.
pub async fn handle_undo(
    ctx: Arc<ImportContext>,
    mut subscriber: async_nats::Subscriber,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<UndoSessionRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        let auth = match extract_auth(&request, &ctx.jwt_secret) {
            Ok(auth) => auth,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        let session_id = request.payload.session_id;
        if !request.payload.confirm {
            match ctx.ledger.undo_preview(session_id).await {
                Ok(preview) => {
                    reply_json(&ctx.client, reply, &SuccessResponse::new(request.id, preview))
                        .await;
                }
                Err(e) => {
                    let error =
                        ErrorResponse::new(request.id, ledger_error_code(&e), e.to_string());
                    reply_json(&ctx.client, reply, &error).await;
                }
            }
            continue;
        }

        match ctx.ledger.undo(session_id, &auth).await {
            Ok(outcome) => {
                reply_json(&ctx.client, reply, &SuccessResponse::new(request.id, outcome)).await;
            }
            Err(e) => {
                let error = ErrorResponse::new(request.id, ledger_error_code(&e), e.to_string());
                reply_json(&ctx.client, reply, &error).await;
            }
        }
    }
    Ok(())
}

/// Handle patrulha.import.sessions requests
pub async fn handle_sessions(
    ctx: Arc<ImportContext>,
    mut subscriber: async_nats::Subscriber,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<EmptyPayload> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        let auth = match extract_auth(&request, &ctx.jwt_secret) {
            Ok(auth) => auth,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        match ctx.ledger.list(auth.user_id).await {
            Ok(sessions) => {
                reply_json(&ctx.client, reply, &SuccessResponse::new(request.id, sessions)).await;
            }
            Err(e) => {
                let error = ErrorResponse::new(request.id, ledger_error_code(&e), e.to_string());
                reply_json(&ctx.client, reply, &error).await;
            }
        }
    }
    Ok(())
}

/// Handle patrulha.import.errors requests: the per-row error report as CSV
pub async fn handle_errors(
    ctx: Arc<ImportContext>,
    mut subscriber: async_nats::Subscriber,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ErrorReportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        if let Err(e) = extract_auth(&request, &ctx.jwt_secret) {
            let error = ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string());
            reply_json(&ctx.client, reply, &error).await;
            continue;
        }

        let session_id = request.payload.session_id;
        let errors = match ctx.store.session_errors(session_id).await {
            Ok(errors) => errors,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "NOT_FOUND", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        match report::error_report_csv(&errors) {
            Ok(csv_content) => {
                let response = ErrorReportResponse {
                    session_id,
                    error_count: errors.len(),
                    csv_content,
                };
                reply_json(&ctx.client, reply, &SuccessResponse::new(request.id, response)).await;
            }
            Err(e) => {
                let error = ErrorResponse::new(request.id, "REPORT_ERROR", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
            }
        }
    }
    Ok(())
}

/// Handle patrulha.import.template requests. The template is static,
/// but the subject still rejects unauthenticated callers like the rest.
pub async fn handle_template(
    ctx: Arc<ImportContext>,
    mut subscriber: async_nats::Subscriber,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<EmptyPayload> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&ctx.client, reply, &error).await;
                continue;
            }
        };

        if let Err(e) = extract_auth(&request, &ctx.jwt_secret) {
            let error = ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string());
            reply_json(&ctx.client, reply, &error).await;
            continue;
        }

        reply_json(
            &ctx.client,
            reply,
            &SuccessResponse::new(request.id, report::template_csv()),
        )
        .await;
    }
    Ok(())
}
