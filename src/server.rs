use crate::config::AppConfig;
use crate::data::StaticDatasets;
use crate::filter::{self, FilterPlan, FilterSelection};
use crate::geocode::{self, Geocoder};
use crate::interaction::{
    HoverState, InteractionRegistry, PointerEvent, PointerEventKind, PointerHit, PopupCommand, PopupContent,
    RenderedFeature,
};
use crate::layers::{IconAsset, LayerRegistry};
use crate::map::StyleDocument;
use crate::processing::{self, ReconcileRules};
use crate::render::{self, ICON_URL_PREFIX};
use crate::types::{DistrictId, ManualAddress};
use crate::view::MapView;
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use geo::Point;
use geojson::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

/// Zoom used when flying to a searched address.
pub const SEARCH_ZOOM: f64 = 16.0;

/// What the map currently shows, as last published by the composing task.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub style: Value,
    pub declared: BTreeSet<String>,
    pub interactions: InteractionRegistry,
    pub reconciled: bool,
}

impl Snapshot {
    fn of(view: &MapView<StyleDocument>, reconciled: bool) -> Self {
        Self {
            style: view.map().to_json(),
            declared: view.map().layer_ids(),
            interactions: view.interactions().clone(),
            reconciled,
        }
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub registry: LayerRegistry,
    pub districts: Vec<DistrictSummary>,
    pub snapshot: watch::Receiver<Arc<Snapshot>>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistrictSummary {
    pub id: DistrictId,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    /// Comma-separated district ids. Absent selects all, empty selects none.
    districts: Option<String>,
    bathrooms: Option<bool>,
    fountains: Option<bool>,
    combo: Option<bool>,
}

impl FilterParams {
    fn selection(&self) -> FilterSelection {
        let defaults = FilterSelection::default();
        let base = match &self.districts {
            Some(raw) => {
                let values: Vec<&str> = raw.split(',').map(str::trim).filter(|v| !v.is_empty()).collect();
                defaults.with_district_values(&values)
            }
            None => defaults,
        };
        FilterSelection {
            show_bathrooms: self.bathrooms.unwrap_or(true),
            show_fountains: self.fountains.unwrap_or(true),
            show_combo: self.combo.unwrap_or(true),
            ..base
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PopupRequest {
    layer_id: String,
    #[serde(default)]
    properties: JsonObject,
}

#[derive(Debug, Serialize)]
pub struct PopupResponse {
    content: PopupContent,
    html: String,
}

/// One pointer event on a layer. The client keeps the hover state between
/// events and sends it back with the next one.
#[derive(Debug, Deserialize)]
pub struct PointerRequest {
    layer_id: String,
    event: PointerEventKind,
    #[serde(default)]
    state: HoverState,
    position: [f64; 2],
    #[serde(default)]
    features: Vec<RenderedFeature>,
}

#[derive(Debug, Serialize)]
pub struct PointerResponse {
    state: HoverState,
    commands: Vec<PopupCommand>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    q: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FlyTo {
    center: [f64; 2],
    zoom: f64,
}

/// Publishes the static map at once, then geocodes and reconciles in the
/// background and replaces it when done.
pub async fn start_server(
    config: AppConfig,
    datasets: StaticDatasets,
    icons: Vec<IconAsset>,
    addresses: Vec<ManualAddress>,
    geocoder: Option<Arc<dyn Geocoder>>,
) -> Result<()> {
    let rules = ReconcileRules::from_config(&config);
    let initial = processing::reconcile(&datasets, &[], &rules);
    let view = render::build_view(&config, &icons, &initial)?;
    let (tx, rx) = watch::channel(Arc::new(Snapshot::of(&view, false)));

    let districts = datasets
        .districts
        .iter()
        .map(|d| DistrictSummary {
            id: d.id,
            name: d.name.clone(),
        })
        .collect();

    let reconcile_task = spawn_reconciliation(view, datasets, addresses, geocoder.clone(), rules, tx);

    let state = Arc::new(AppState {
        registry: LayerRegistry::for_groups(&config.deployment.groups),
        config: config.clone(),
        districts,
        snapshot: rx,
        geocoder,
    });

    let addr = SocketAddr::from((config.server.bind, config.server.port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let result = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reconcile_task.abort();
    result.context("Server error")?;
    info!("Server stopped");
    Ok(())
}

/// The single writer of the view once serving starts. Without a geocoder the
/// manual layer is skipped and the static map stays published.
pub fn spawn_reconciliation(
    mut view: MapView<StyleDocument>,
    datasets: StaticDatasets,
    addresses: Vec<ManualAddress>,
    geocoder: Option<Arc<dyn Geocoder>>,
    rules: ReconcileRules,
    tx: watch::Sender<Arc<Snapshot>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let geocoded = match &geocoder {
            Some(geocoder) if !addresses.is_empty() => geocode::geocode_addresses(geocoder.as_ref(), &addresses).await,
            _ => Vec::new(),
        };
        let manual = geocoded.len();
        let composed = tokio::task::spawn_blocking(move || {
            let layers = processing::reconcile(&datasets, &geocoded, &rules);
            let declared = view.compose(&layers);
            (declared, Snapshot::of(&view, true))
        })
        .await;
        let (declared, snapshot) = match composed {
            Ok(composed) => composed,
            Err(e) => {
                warn!(error = %e, "reconciliation failed; static map stays published");
                return;
            }
        };
        info!(declared, manual, "publishing reconciled map");
        if tx.send(Arc::new(snapshot)).is_err() {
            warn!("no listeners for the reconciled map");
        }
    })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let icons = ServeDir::new(&state.config.icons.dir);
    let static_files = ServeDir::new(&state.config.output.dir);

    Router::new()
        .route("/api/style", get(style_handler))
        .route("/api/filters", get(filters_handler))
        .route("/api/popup", post(popup_handler))
        .route("/api/pointer", post(pointer_handler))
        .route("/api/search", get(search_handler))
        .route("/api/districts", get(districts_handler))
        .nest_service("/icons", icons)
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn style_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.snapshot.borrow().style.clone())
}

async fn filters_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FilterParams>,
) -> Json<FilterPlan> {
    let mut plan = filter::compile(&params.selection(), state.registry.bindings());
    plan.retain_layers(&state.snapshot.borrow().declared);
    Json(plan)
}

async fn popup_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PopupRequest>,
) -> Result<Json<PopupResponse>, StatusCode> {
    let layer = state
        .snapshot
        .borrow()
        .interactions
        .resume(&request.layer_id, HoverState::Idle)
        .ok_or(StatusCode::NOT_FOUND)?;
    let content = PopupContent::build(&request.properties, layer.group);
    let icon_url = format!("/{}/{}", ICON_URL_PREFIX, state.config.icons.file_name(content.icon));
    let html = content.to_html(&icon_url);
    Ok(Json(PopupResponse { content, html }))
}

async fn pointer_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PointerRequest>,
) -> Result<Json<PointerResponse>, StatusCode> {
    let mut layer = state
        .snapshot
        .borrow()
        .interactions
        .resume(&request.layer_id, request.state)
        .ok_or(StatusCode::NOT_FOUND)?;
    let [lon, lat] = request.position;
    let event = PointerEvent::new(
        request.event,
        PointerHit {
            position: Point::new(lon, lat),
            features: request.features,
        },
    );
    let commands = layer.handle(&event);
    Ok(Json(PointerResponse {
        state: layer.state(),
        commands,
    }))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Json<Option<FlyTo>> {
    let query = params.q.trim();
    let Some(geocoder) = state.geocoder.as_ref().filter(|_| !query.is_empty()) else {
        return Json(None);
    };
    match geocoder.locate(query).await {
        Ok(found) => Json(found.map(|p| FlyTo {
            center: [p.x(), p.y()],
            zoom: SEARCH_ZOOM,
        })),
        Err(e) => {
            warn!(query, error = %e, "address search failed");
            Json(None)
        }
    }
}

async fn districts_handler(State(state): State<Arc<AppState>>) -> Json<Vec<DistrictSummary>> {
    Json(state.districts.clone())
}
