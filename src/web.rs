use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, Responder, get, web};
use serde::Serialize;

use crate::api;
use crate::metrics::{METRICS, MetricsSnapshot};
use crate::player::Orchestrator;

#[derive(Serialize)]
struct ProbeResp<'a> {
    status: &'a str,
}

#[get("/k8s/readyz")]
async fn readyz() -> impl Responder {
    if METRICS.is_ready() {
        HttpResponse::Ok().json(ProbeResp { status: "ok" })
    } else {
        HttpResponse::ServiceUnavailable().json(ProbeResp { status: "starting" })
    }
}

#[get("/k8s/livez")]
async fn livez() -> impl Responder {
    HttpResponse::Ok().json(ProbeResp { status: "ok" })
}

#[get("/k8s/metrics")]
async fn metrics() -> impl Responder {
    let m: MetricsSnapshot = METRICS.snapshot();
    // Prometheus-like text exposition (simple)
    let body = format!(
        concat!(
            "# HELP chorus_uptime_seconds Seconds since process start\n",
            "# TYPE chorus_uptime_seconds counter\n",
            "chorus_uptime_seconds {}\n",
            "# HELP chorus_ready 1 if ready, 0 otherwise\n",
            "# TYPE chorus_ready gauge\n",
            "chorus_ready {}\n",
            "# HELP chorus_active_sessions Number of live voice sessions\n",
            "# TYPE chorus_active_sessions gauge\n",
            "chorus_active_sessions {}\n",
            "# HELP chorus_tracks_played Tracks started since boot\n",
            "# TYPE chorus_tracks_played counter\n",
            "chorus_tracks_played {}\n",
            "# HELP chorus_tracks_queued Tracks queued behind a playing one since boot\n",
            "# TYPE chorus_tracks_queued counter\n",
            "chorus_tracks_queued {}\n",
            "# HELP chorus_commands_denied Commands refused by admission control since boot\n",
            "# TYPE chorus_commands_denied counter\n",
            "chorus_commands_denied {}\n"
        ),
        m.uptime_secs,
        if m.ready { 1 } else { 0 },
        m.active_sessions,
        m.tracks_played,
        m.tracks_queued,
        m.commands_denied,
    );
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body)
}

pub async fn run_http(bind: String, orchestrator: Arc<Orchestrator>) -> std::io::Result<()> {
    let data = web::Data::from(orchestrator);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .service(readyz)
            .service(livez)
            .service(metrics)
            .service(api::list_sessions)
            .service(api::get_session)
            .service(api::event_stream)
    })
    .bind(bind)?
    .workers(1) // lightweight
    .run();
    server.await
}
