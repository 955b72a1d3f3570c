use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::watch;
use shared::protocol::API_PREFIX;
use shared::types::{Service, ServiceKey, SourceState};
use crate::config::{BrowserConfig, Descriptor};
use crate::registry_manager::{RegistryHandle, ServiceSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub snapshot_rx: watch::Receiver<ServiceSnapshot>,
    pub source_rx: watch::Receiver<SourceState>,
    pub config: Arc<BrowserConfig>,
    /// Descriptor actually in use, after the environment override
    pub descriptor: Descriptor,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub service_type: String,
    pub domain: String,
    pub descriptor: Descriptor,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/config", get(get_config))
        .route("/services", get(get_services))
        .route("/services/hash", get(get_hash))
        .route("/services/:domain/:name", get(get_service))
        .route("/source", get(get_source));

    Router::new().nest(API_PREFIX, api).with_state(state)
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        service_type: state.config.service_type.clone(),
        domain: state.config.domain.clone(),
        descriptor: state.descriptor,
    })
}

async fn get_services(State(state): State<AppState>) -> Json<Vec<Service>> {
    let snapshot = state.snapshot_rx.borrow().clone();
    Json(snapshot.services.to_vec())
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.snapshot_rx.borrow().digest.clone()
}

async fn get_service(
    State(state): State<AppState>,
    Path((domain, name)): Path<(String, String)>,
) -> Result<Json<Service>, StatusCode> {
    state
        .registry
        .get(ServiceKey::new(name, domain))
        .await
        .map_err(|e| {
            tracing::error!("Failed to query service: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_source(State(state): State<AppState>) -> Json<SourceState> {
    Json(state.source_rx.borrow().clone())
}
