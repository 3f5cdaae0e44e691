use axum::Json;
use axum::extract::State;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::agent::server::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": state.settings.build.version,
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}

pub async fn version(State(state): State<AppState>) -> Json<Value> {
    let build = &state.settings.build;
    Json(json!({
        "version": build.version,
        "commit": build.commit,
        "build_date": build.build_date,
    }))
}
