use actix_web::{HttpResponse, Responder, get, web};
use futures_util::stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::player::Orchestrator;

/// Live notification feed as server-sent events, one JSON object per event.
/// No history: subscribers see only what happens after they connect.
#[get("/api/events")]
pub async fn event_stream(orchestrator: web::Data<Orchestrator>) -> impl Responder {
    let rx = orchestrator.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Ok(payload) = serde_json::to_string(&event) else {
                        continue;
                    };
                    let frame = web::Bytes::from(format!("data: {payload}\n\n"));
                    return Some((Ok::<_, actix_web::Error>(frame), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event stream subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}
