//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use gpudra_core::{
    AllocatableDevice, AllocationResult, ClaimAllocation, ClaimParameters, DeviceClassParameters,
    DraError, DraResult, NodeAllocationState, ResourceClaim, ResourceClass,
};
use gpudra_scheduler::AllocationEngine;
use gpudra_store::MemoryParameterSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<AllocationEngine>,
    /// Parameter objects the engine resolves claims against
    pub parameters: Arc<MemoryParameterSource>,
}

type ApiError = (StatusCode, String);

/// Create the API router
pub fn create_router(
    engine: Arc<AllocationEngine>,
    parameters: Arc<MemoryParameterSource>,
) -> Router {
    let state = Arc::new(AppState { engine, parameters });

    Router::new()
        .route("/api/v1/claims/validate", post(validate_claim_parameters))
        .route(
            "/api/v1/claim-parameters/:namespace/:name",
            put(put_claim_parameters),
        )
        .route(
            "/api/v1/device-class-parameters/:name",
            put(put_device_class_parameters),
        )
        .route("/api/v1/unsuitable-nodes", post(unsuitable_nodes))
        .route("/api/v1/allocate", post(allocate))
        .route("/api/v1/deallocate", post(deallocate))
        .route("/api/v1/nodes/:name", get(get_node).put(publish_node))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Map an engine error to an HTTP status
fn error_response(err: DraError) -> ApiError {
    let status = match &err {
        DraError::Validation(_) | DraError::Parameters(_) | DraError::Unsupported(_) => {
            StatusCode::BAD_REQUEST
        }
        DraError::NotFound(_) => StatusCode::NOT_FOUND,
        DraError::NotReady { .. } | DraError::Consistency(_) | DraError::AlreadyExists(_) => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Validate claim parameters
async fn validate_claim_parameters(
    State(state): State<Arc<AppState>>,
    Json(params): Json<ClaimParameters>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .validate_claim_parameters(&params)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Register a claim parameters object
async fn put_claim_parameters(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(params): Json<ClaimParameters>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .validate_claim_parameters(&params)
        .map_err(error_response)?;

    info!(
        kind = params.kind_name(),
        namespace = %namespace,
        name = %name,
        "Registered claim parameters"
    );
    state
        .parameters
        .insert_claim_parameters(&namespace, &name, params)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Register a device class parameters object
async fn put_device_class_parameters(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(params): Json<DeviceClassParameters>,
) -> StatusCode {
    info!(name = %name, "Registered device class parameters");
    state
        .parameters
        .insert_device_class_parameters(&name, params)
        .await;
    StatusCode::NO_CONTENT
}

/// A claim as submitted by the scheduler, parameters not yet resolved
#[derive(Debug, Deserialize)]
pub struct PendingClaim {
    pub claim: ResourceClaim,
    /// Class the claim was created from
    #[serde(default)]
    pub class: Option<ResourceClass>,
}

async fn resolve(engine: &AllocationEngine, pending: PendingClaim) -> DraResult<ClaimAllocation> {
    engine.resolve_claim(pending.claim, pending.class.as_ref()).await
}

/// Request to filter potential nodes for a batch of claims
#[derive(Debug, Deserialize)]
pub struct UnsuitableNodesRequest {
    pub claims: Vec<PendingClaim>,
    pub potential_nodes: Vec<String>,
}

/// Evaluate potential nodes, returning the claims with their unsuitable nodes
async fn unsuitable_nodes(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UnsuitableNodesRequest>,
) -> Result<Json<Vec<ClaimAllocation>>, ApiError> {
    let mut cas = Vec::with_capacity(req.claims.len());
    for pending in req.claims {
        cas.push(
            resolve(&state.engine, pending)
                .await
                .map_err(error_response)?,
        );
    }

    state
        .engine
        .unsuitable_nodes(&mut cas, &req.potential_nodes)
        .await
        .map_err(error_response)?;
    Ok(Json(cas))
}

/// Request to commit a batch of claims on a node
#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    pub claims: Vec<PendingClaim>,
    #[serde(default)]
    pub selected_node: Option<String>,
}

/// Outcome of committing one claim
#[derive(Debug, Serialize)]
pub struct AllocateResponse {
    pub claim_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Commit a batch of claims
async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AllocateRequest>,
) -> Json<Vec<AllocateResponse>> {
    info!(
        claims = req.claims.len(),
        node = ?req.selected_node,
        "Allocating claims"
    );

    // Claims whose parameters fail to resolve are reported in place and
    // left out of the committed batch.
    let mut resolved = Vec::with_capacity(req.claims.len());
    let mut outcomes: Vec<(String, Option<DraError>)> = Vec::with_capacity(req.claims.len());
    for pending in req.claims {
        let uid = pending.claim.uid.clone();
        match resolve(&state.engine, pending).await {
            Ok(ca) => {
                resolved.push(ca);
                outcomes.push((uid, None));
            }
            Err(e) => outcomes.push((uid, Some(e))),
        }
    }

    let mut committed = state
        .engine
        .allocate(&resolved, req.selected_node.as_deref())
        .await
        .into_iter();

    let responses = outcomes
        .into_iter()
        .map(|(claim_uid, failed)| {
            let result = match failed {
                Some(e) => Err(e),
                None => committed.next().unwrap_or_else(|| {
                    Err(DraError::Consistency(format!(
                        "no commit result for claim '{}'",
                        claim_uid
                    )))
                }),
            };
            match result {
                Ok(allocation) => AllocateResponse {
                    claim_uid,
                    allocation: Some(allocation),
                    error: None,
                },
                Err(e) => AllocateResponse {
                    claim_uid,
                    allocation: None,
                    error: Some(e.to_string()),
                },
            }
        })
        .collect();

    Json(responses)
}

/// Release a claim
async fn deallocate(
    State(state): State<Arc<AppState>>,
    Json(claim): Json<ResourceClaim>,
) -> Result<StatusCode, ApiError> {
    info!(claim = %claim.uid, "Deallocating claim");

    state
        .engine
        .release(&claim)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Get the allocation state of a node
async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<NodeAllocationState>, ApiError> {
    let nas = state
        .engine
        .nodes()
        .get(&name)
        .await
        .map_err(error_response)?;
    Ok(Json(nas))
}

/// Request to publish a node's device inventory
#[derive(Debug, Deserialize)]
pub struct PublishNodeRequest {
    pub allocatable_devices: Vec<AllocatableDevice>,
}

/// Publish the inventory of a node and mark it ready
async fn publish_node(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<PublishNodeRequest>,
) -> Result<Json<NodeAllocationState>, ApiError> {
    let nas = state
        .engine
        .publish_node_inventory(&name, req.allocatable_devices)
        .await
        .map_err(error_response)?;
    Ok(Json(nas))
}

/// System status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub namespace: String,
    pub backend: String,
    pub staged_claims: usize,
    pub locked_nodes: usize,
}

/// Get system status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let engine = &state.engine;
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        namespace: engine.nodes().namespace().to_string(),
        backend: engine.nodes().backend().to_string(),
        staged_claims: engine.staging().len().await,
        locked_nodes: engine.locks().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use gpudra_store::{MemoryStore, NodeStateClient};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let client = NodeStateClient::new(
            Arc::new(MemoryStore::new()),
            "gpudra",
            Duration::from_secs(5),
        );
        let parameters = Arc::new(MemoryParameterSource::new());
        let engine = Arc::new(AllocationEngine::new(client, parameters.clone()));
        create_router(engine, parameters)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn claim_with_params(uid: &str, params_name: &str) -> serde_json::Value {
        serde_json::json!({
            "claim": {
                "uid": uid,
                "name": format!("claim-{uid}"),
                "namespace": "default",
                "parameters_ref": {
                    "api_group": "gpu.resource.example.com",
                    "kind": "GpuClaimParameters",
                    "name": params_name
                }
            }
        })
    }

    async fn publish_two_gpus(router: &Router) {
        let published = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/v1/nodes/node-a",
                serde_json::json!({
                    "allocatable_devices": [
                        {"gpu": {"uuid": "GPU-a", "product_name": "A100"}},
                        {"gpu": {"uuid": "GPU-b", "product_name": "A100"}}
                    ]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(published.status(), StatusCode::OK);
        assert_eq!(body_json(published).await["status"], "Ready");
    }

    #[tokio::test]
    async fn test_validate_rejects_zero_count() {
        let router = test_router();

        let ok = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/claims/validate",
                serde_json::json!({"gpu": {"count": 1}}),
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::NO_CONTENT);

        let bad = router
            .oneshot(json_request(
                "POST",
                "/api/v1/claims/validate",
                serde_json::json!({"gpu": {"count": 0}}),
            ))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_claim_parameters_not_registered() {
        let response = test_router()
            .oneshot(json_request(
                "PUT",
                "/api/v1/claim-parameters/default/zero",
                serde_json::json!({"gpu": {"count": 0}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_node_is_not_found() {
        let response = test_router()
            .oneshot(get_request("/api/v1/nodes/node-a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_filter_then_allocate_with_registered_parameters() {
        let router = test_router();
        publish_two_gpus(&router).await;

        let registered = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/v1/claim-parameters/default/two-gpus",
                serde_json::json!({"gpu": {"count": 2}}),
            ))
            .await
            .unwrap();
        assert_eq!(registered.status(), StatusCode::NO_CONTENT);

        let claims = serde_json::json!([claim_with_params("c1", "two-gpus")]);

        let filtered = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/unsuitable-nodes",
                serde_json::json!({"claims": claims, "potential_nodes": ["node-a", "node-b"]}),
            ))
            .await
            .unwrap();
        assert_eq!(filtered.status(), StatusCode::OK);
        let filtered = body_json(filtered).await;
        assert_eq!(filtered[0]["claim_parameters"]["gpu"]["count"], 2);
        assert_eq!(filtered[0]["unsuitable_nodes"], serde_json::json!(["node-b"]));

        let allocated = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/allocate",
                serde_json::json!({"claims": claims, "selected_node": "node-a"}),
            ))
            .await
            .unwrap();
        let allocated = body_json(allocated).await;
        assert_eq!(allocated[0]["claim_uid"], "c1");
        assert_eq!(allocated[0]["allocation"]["shareable"], true);

        let node = body_json(
            router
                .oneshot(get_request("/api/v1/nodes/node-a"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(
            node["spec"]["allocated_claims"]["c1"]["gpu"]["devices"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_claim_without_parameters_ref_requests_one_gpu() {
        let router = test_router();
        publish_two_gpus(&router).await;

        let filtered = router
            .oneshot(json_request(
                "POST",
                "/api/v1/unsuitable-nodes",
                serde_json::json!({
                    "claims": [{"claim": {"uid": "c1", "name": "claim-1", "namespace": "default"}}],
                    "potential_nodes": ["node-a"]
                }),
            ))
            .await
            .unwrap();
        let filtered = body_json(filtered).await;
        assert_eq!(filtered[0]["claim_parameters"]["gpu"]["count"], 1);
        assert_eq!(filtered[0]["unsuitable_nodes"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unregistered_parameters_fail_filtering() {
        let router = test_router();
        publish_two_gpus(&router).await;

        let response = router
            .oneshot(json_request(
                "POST",
                "/api/v1/unsuitable-nodes",
                serde_json::json!({
                    "claims": [claim_with_params("c1", "missing")],
                    "potential_nodes": ["node-a"]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_class_parameters_resolved() {
        let router = test_router();

        let registered = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/v1/device-class-parameters/all-gpus",
                serde_json::json!({"device_selector": [{"type": "gpu", "name": "A100"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(registered.status(), StatusCode::NO_CONTENT);

        let filtered = router
            .oneshot(json_request(
                "POST",
                "/api/v1/unsuitable-nodes",
                serde_json::json!({
                    "claims": [{
                        "claim": {"uid": "c1", "name": "claim-1", "namespace": "default"},
                        "class": {
                            "name": "gpu.example.com",
                            "parameters_ref": {
                                "api_group": "gpu.resource.example.com",
                                "kind": "DeviceClassParameters",
                                "name": "all-gpus"
                            }
                        }
                    }],
                    "potential_nodes": []
                }),
            ))
            .await
            .unwrap();
        let filtered = body_json(filtered).await;
        assert_eq!(
            filtered[0]["class_parameters"]["device_selector"][0]["name"],
            "A100"
        );
    }

    #[tokio::test]
    async fn test_allocate_reports_errors_per_claim() {
        let router = test_router();
        publish_two_gpus(&router).await;

        let claims = serde_json::json!([
            claim_with_params("c1", "missing"),
            {"claim": {"uid": "c2", "name": "claim-2", "namespace": "default"}}
        ]);
        let allocated = router
            .oneshot(json_request(
                "POST",
                "/api/v1/allocate",
                serde_json::json!({"claims": claims}),
            ))
            .await
            .unwrap();
        let body = body_json(allocated).await;

        assert_eq!(body[0]["claim_uid"], "c1");
        assert!(body[0]["error"].as_str().unwrap().contains("missing"));
        assert_eq!(body[1]["claim_uid"], "c2");
        assert!(body[1]["error"]
            .as_str()
            .unwrap()
            .contains("selected node is required"));
    }

    #[tokio::test]
    async fn test_status() {
        let response = test_router()
            .oneshot(get_request("/api/v1/status"))
            .await
            .unwrap();
        let status: StatusResponse =
            serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(status.namespace, "gpudra");
        assert_eq!(status.backend, "memory");
        assert_eq!(status.staged_claims, 0);
    }
}
