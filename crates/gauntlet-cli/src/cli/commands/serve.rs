use super::{build_engine, EngineOptions};
use crate::cli::args::ServeArgs;
use gauntlet_core::engine::Engine;
use gauntlet_core::webhook;
use serde_json::json;
use std::io::Read;
use tiny_http::{Response, Server};

/// Completion-webhook listener. The agent runtime posts trial outcomes here;
/// each request is parsed, authorized and handed to the completion recorder.
pub async fn run(args: ServeArgs) -> anyhow::Result<i32> {
    let engine = build_engine(EngineOptions {
        db: args.db,
        runtime_url: None,
        webhook_base: format!("http://{}", args.addr),
        webhook_secret: args.webhook_secret,
        settings: None,
    })?;

    let server = Server::http(&args.addr).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    tracing::info!(event = "serve.start", addr = %args.addr);

    let handle = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || {
        for mut request in server.incoming_requests() {
            let mut body = Vec::new();
            let _ = request.as_reader().read_to_end(&mut body);
            let token = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("x-gauntlet-token"))
                .map(|h| h.value.to_string());
            let url = request.url().to_string();
            let (code, reply) = handle.block_on(route(&engine, &url, token.as_deref(), &body));
            let response = Response::from_string(reply)
                .with_status_code(code)
                .with_header(
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("static header"),
                );
            if let Err(e) = request.respond(response) {
                tracing::warn!(event = "serve.respond_failed", error = %e);
            }
        }
    })
    .await?;
    Ok(0)
}

async fn route(engine: &Engine, url: &str, token: Option<&str>, body: &[u8]) -> (u16, String) {
    if engine.webhook.authorize(token).is_err() {
        return (401, json!({"error": "unauthorized"}).to_string());
    }
    match url {
        "/hooks/trajectory" => match webhook::parse_trajectory(body) {
            Ok(payload) => match engine.record_trajectory_completion(&payload).await {
                Ok(ack) => (200, serde_json::to_string(&ack).unwrap_or_default()),
                Err(e) => (422, json!({"error": e.to_string()}).to_string()),
            },
            Err(e) => (400, json!({"error": e.to_string()}).to_string()),
        },
        "/hooks/thread" => match webhook::parse_thread(body) {
            Ok(payload) => match engine.record_thread_completion(&payload).await {
                Ok(ack) => (200, serde_json::to_string(&ack).unwrap_or_default()),
                Err(e) => (422, json!({"error": e.to_string()}).to_string()),
            },
            Err(e) => (400, json!({"error": e.to_string()}).to_string()),
        },
        _ => (404, json!({"error": "not found"}).to_string()),
    }
}
