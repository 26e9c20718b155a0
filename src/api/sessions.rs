use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use serenity::all::GuildId;

use crate::player::Orchestrator;

#[derive(Serialize)]
struct ErrorResp<'a> {
    error: &'a str,
}

/// All live sessions with their state, current track, and backlog.
#[get("/api/sessions")]
pub async fn list_sessions(orchestrator: web::Data<Orchestrator>) -> impl Responder {
    let snapshots = orchestrator.snapshots().await;
    HttpResponse::Ok().json(snapshots)
}

#[get("/api/sessions/{guild_id}")]
pub async fn get_session(
    orchestrator: web::Data<Orchestrator>,
    path: web::Path<String>,
) -> impl Responder {
    let Ok(id) = path.into_inner().parse::<std::num::NonZeroU64>() else {
        return HttpResponse::BadRequest().json(ErrorResp {
            error: "invalid guild id",
        });
    };
    match orchestrator.snapshot(GuildId::new(id.get())).await {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => HttpResponse::NotFound().json(ErrorResp {
            error: "no active session for this guild",
        }),
    }
}
