use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use karkhana_api::{app, AppState};
use karkhana_core::WorkshopService;
use karkhana_order::BusinessRules;

fn test_app() -> Router {
    let workshop = WorkshopService::in_memory(BusinessRules::default(), 32);
    app(AppState::new(workshop).unwrap())
}

async fn call(app: &Router, method: &str, uri: &str, role: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(role) = role {
        builder = builder.header("x-workshop-user", "meena").header("x-workshop-role", role);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_order(app: &Router, number: &str) -> String {
    let (status, order) = call(
        app,
        "POST",
        "/v1/work-orders",
        Some("MANAGER"),
        Some(json!({
            "order_number": number,
            "customer_name": "Farah Khan",
            "customer_phone": "9820012345",
            "design_code": "NK-301",
            "metal_purity": "22K",
            "initial_weight": "18.400"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    order["id"].as_str().unwrap().to_string()
}

fn weight(value: &Value) -> rust_decimal::Decimal {
    value.as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_health_needs_no_identity() {
    let app = test_app();
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let app = test_app();
    let (status, body) = call(&app, "GET", &format!("/v1/work-orders/{}", uuid::Uuid::new_v4()), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("x-workshop-user"));

    let (status, _) = call(&app, "GET", "/v1/karigars/x", Some("OWNER"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_rules() {
    let app = test_app();
    let (status, _) = call(
        &app,
        "POST",
        "/v1/work-orders",
        Some("VIEWER"),
        Some(json!({ "order_number": "WO-1", "customer_name": "A", "design_code": "D", "initial_weight": "1" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let id = create_order(&app, "WO-77").await;
    let (status, _) = call(&app, "POST", &format!("/v1/work-orders/{}/cancel", id), Some("MANAGER"), Some(json!({ "reason": "customer left" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, order) = call(&app, "POST", &format!("/v1/work-orders/{}/cancel", id), Some("ADMIN"), Some(json!({ "reason": "customer left" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "CANCELLED");

    let (status, order) = call(&app, "GET", &format!("/v1/work-orders/{}", id), Some("VIEWER"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["customer_phone"], "9820012345");
}

#[tokio::test]
async fn test_full_pipeline_with_stones() {
    let app = test_app();

    let (status, setter) = call(
        &app,
        "POST",
        "/v1/karigars",
        Some("ADMIN"),
        Some(json!({ "name": "Salim", "specialities": ["SETTING"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let setter_id = setter["id"].as_str().unwrap().to_string();

    let (status, lot) = call(
        &app,
        "POST",
        "/v1/stones/lots",
        Some("MANAGER"),
        Some(json!({ "lot_code": "RB-04", "stone_type": "RUBY", "carat_per_piece": "0.1", "opening_quantity": 20 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let lot_id = lot["id"].as_str().unwrap().to_string();

    let id = create_order(&app, "WO-100").await;
    let base = format!("/v1/work-orders/{}", id);

    // Setting before framing is out of order.
    let (status, body) = call(&app, "POST", &format!("{}/stages", base), Some("MANAGER"), Some(json!({ "stage": "SETTING" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("NONE"));

    let (status, _) = call(&app, "POST", &format!("{}/stages", base), Some("MANAGER"), Some(json!({ "stage": "FRAMING" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, framing) = call(
        &app,
        "POST",
        &format!("{}/stages/current/receive", base),
        Some("MANAGER"),
        Some(json!({ "jamah_weight": "18.300" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(weight(&framing["weight_loss"]), "0.1".parse().unwrap());

    // More stones than the lot holds.
    let (status, _) = call(
        &app,
        "POST",
        &format!("{}/stages", base),
        Some("MANAGER"),
        Some(json!({ "stage": "SETTING", "karigar_id": setter_id, "stones": [{ "stone_lot_id": lot_id, "quantity": 25 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, setting) = call(
        &app,
        "POST",
        &format!("{}/stages", base),
        Some("MANAGER"),
        Some(json!({ "stage": "SETTING", "karigar_id": setter_id, "stones": [{ "stone_lot_id": lot_id, "quantity": 12 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(setting["status"], "ISSUED");

    let (_, lot) = call(&app, "GET", &format!("/v1/stones/lots/{}", lot_id), Some("VIEWER"), None).await;
    assert_eq!(lot["quantity_on_hand"], 8);

    let (_, balance) = call(&app, "GET", &format!("/v1/karigars/{}/balance", setter_id), Some("VIEWER"), None).await;
    assert_eq!(balance["stones_held"], 12);

    // Dispatch is blocked while the setter holds the piece.
    let (status, _) = call(&app, "POST", &format!("{}/dispatch", base), Some("DISPATCHER"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 10 set stones add 10 x 0.1 ct x 0.2 g = 0.2 g.
    let (status, received) = call(
        &app,
        "POST",
        &format!("{}/stages/current/receive", base),
        Some("MANAGER"),
        Some(json!({
            "jamah_weight": "18.450",
            "stones": [{ "stone_lot_id": lot_id, "set": 10, "returned": 1, "broken": 1 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(weight(&received["stone_weight_added"]), "0.2".parse().unwrap());
    assert_eq!(weight(&received["weight_loss"]), "0.05".parse().unwrap());
    assert_eq!(received["loss_exceeds_tolerance"], false);

    let (_, lot) = call(&app, "GET", &format!("/v1/stones/lots/{}", lot_id), Some("VIEWER"), None).await;
    assert_eq!(lot["quantity_on_hand"], 9);

    let (status, _) = call(&app, "POST", &format!("{}/stages", base), Some("MANAGER"), Some(json!({ "stage": "POLISH" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(
        &app,
        "POST",
        &format!("{}/stages/current/receive", base),
        Some("MANAGER"),
        Some(json!({ "jamah_weight": "18.400" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, order) = call(
        &app,
        "POST",
        &format!("{}/dispatch", base),
        Some("DISPATCHER"),
        Some(json!({ "reference": "COURIER-88" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "DISPATCHED");
    assert_eq!(order["stages"].as_array().unwrap().len(), 4);

    let (_, summary) = call(&app, "GET", &format!("{}/reconciliation", base), Some("VIEWER"), None).await;
    assert_eq!(summary["weights"]["balanced"], true);
    assert_eq!(summary["stones"][0]["broken"], 1);

    let (_, audit) = call(&app, "GET", &format!("{}/audit", base), Some("VIEWER"), None).await;
    let actions: Vec<&str> = audit.as_array().unwrap().iter().map(|e| e["action"].as_str().unwrap()).collect();
    assert_eq!(
        actions,
        vec!["CREATED", "STAGE_ISSUED", "STAGE_RECEIVED", "STAGE_ISSUED", "STAGE_RECEIVED", "STAGE_ISSUED", "STAGE_RECEIVED", "DISPATCHED"]
    );

    let (status, _) = call(&app, "POST", &format!("{}/stages", base), Some("MANAGER"), Some(json!({ "stage": "REPAIR" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, metrics) = call_text(&app, "/metrics").await;
    assert!(metrics.contains("karkhana_stage_transitions_total"));
}

#[tokio::test]
async fn test_weight_gain_rejected_and_not_found() {
    let app = test_app();
    let id = create_order(&app, "WO-200").await;
    let base = format!("/v1/work-orders/{}", id);

    call(&app, "POST", &format!("{}/stages", base), Some("ADMIN"), Some(json!({ "stage": "FRAMING" }))).await;
    let (status, body) = call(
        &app,
        "POST",
        &format!("{}/stages/current/receive", base),
        Some("ADMIN"),
        Some(json!({ "jamah_weight": "18.500" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("exceeds"));

    let (status, _) = call(&app, "GET", &format!("/v1/work-orders/{}", uuid::Uuid::new_v4()), Some("VIEWER"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "POST", "/v1/work-orders", Some("ADMIN"), Some(json!({
        "order_number": "WO-200", "customer_name": "B", "design_code": "D", "initial_weight": "2"
    }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_malformed_requests_get_json_errors() {
    let app = test_app();

    let (status, body) = call(
        &app,
        "POST",
        "/v1/work-orders",
        Some("MANAGER"),
        Some(json!({ "order_number": "WO-300", "customer_name": "C", "design_code": "D" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("initial_weight"));

    let (status, body) = call(&app, "GET", "/v1/work-orders/not-a-uuid", Some("VIEWER"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = call(&app, "GET", "/v1/events/stream?work_order_id=42", Some("VIEWER"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = call(&app, "POST", "/v1/work-orders", Some("MANAGER"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_weights_rounding_to_zero_rejected() {
    let app = test_app();
    let (status, body) = call(
        &app,
        "POST",
        "/v1/work-orders",
        Some("MANAGER"),
        Some(json!({ "order_number": "WO-301", "customer_name": "C", "design_code": "D", "initial_weight": "0.0004" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("initial_weight"));
}

#[tokio::test]
async fn test_reassign_and_deactivate_karigar() {
    let app = test_app();
    let (_, first) = call(&app, "POST", "/v1/karigars", Some("ADMIN"), Some(json!({ "name": "Gopal" }))).await;
    let (_, second) = call(&app, "POST", "/v1/karigars", Some("ADMIN"), Some(json!({ "name": "Harish" }))).await;
    let first_id = first["id"].as_str().unwrap().to_string();
    let second_id = second["id"].as_str().unwrap().to_string();

    let id = create_order(&app, "WO-400").await;
    let base = format!("/v1/work-orders/{}", id);
    let (status, _) = call(
        &app,
        "POST",
        &format!("{}/stages", base),
        Some("MANAGER"),
        Some(json!({ "stage": "FRAMING", "karigar_id": first_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let reassign = json!({ "karigar_id": second_id });
    let (status, _) = call(&app, "PUT", &format!("{}/stages/current/karigar", base), Some("VIEWER"), Some(reassign.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, stage) = call(&app, "PUT", &format!("{}/stages/current/karigar", base), Some("MANAGER"), Some(reassign)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stage["karigar_id"], second_id.as_str());
    assert_eq!(stage["status"], "ISSUED");

    let (_, balance) = call(&app, "GET", &format!("/v1/karigars/{}/balance", first_id), Some("VIEWER"), None).await;
    assert_eq!(balance["open_stages"], 0);
    let (_, balance) = call(&app, "GET", &format!("/v1/karigars/{}/balance", second_id), Some("VIEWER"), None).await;
    assert_eq!(balance["open_stages"], 1);

    let (_, audit) = call(&app, "GET", &format!("{}/audit", base), Some("VIEWER"), None).await;
    assert_eq!(audit.as_array().unwrap().last().unwrap()["action"], "KARIGAR_REASSIGNED");

    let (status, _) = call(&app, "POST", &format!("/v1/karigars/{}/deactivate", first_id), Some("MANAGER"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, karigar) = call(&app, "POST", &format!("/v1/karigars/{}/deactivate", first_id), Some("ADMIN"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(karigar["is_active"], false);

    call(&app, "POST", &format!("{}/stages/current/receive", base), Some("MANAGER"), Some(json!({ "jamah_weight": "18.350" }))).await;
    let (status, body) = call(
        &app,
        "POST",
        &format!("{}/stages", base),
        Some("MANAGER"),
        Some(json!({ "stage": "POLISH", "karigar_id": first_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("inactive"));
}

#[tokio::test]
async fn test_stone_receipts() {
    let app = test_app();
    let (_, lot) = call(
        &app,
        "POST",
        "/v1/stones/lots",
        Some("MANAGER"),
        Some(json!({ "lot_code": "EM-09", "stone_type": "EMERALD", "carat_per_piece": "0.05", "opening_quantity": 5 })),
    )
    .await;
    let receipts = format!("/v1/stones/lots/{}/receipts", lot["id"].as_str().unwrap());

    let (status, lot) = call(&app, "POST", &receipts, Some("MANAGER"), Some(json!({ "quantity": 15, "note": "supplier batch 7" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lot["quantity_on_hand"], 20);

    let (status, _) = call(&app, "POST", &receipts, Some("MANAGER"), Some(json!({ "quantity": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, "POST", &receipts, Some("DISPATCHER"), Some(json!({ "quantity": 3 }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/stones/lots/{}/receipts", uuid::Uuid::new_v4()),
        Some("ADMIN"),
        Some(json!({ "quantity": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dispatch_roles() {
    let app = test_app();
    let id = create_order(&app, "WO-500").await;
    let base = format!("/v1/work-orders/{}", id);
    call(&app, "POST", &format!("{}/stages", base), Some("MANAGER"), Some(json!({ "stage": "FRAMING" }))).await;
    call(&app, "POST", &format!("{}/stages/current/receive", base), Some("MANAGER"), Some(json!({ "jamah_weight": "18.390" }))).await;
    call(&app, "POST", &format!("{}/stages", base), Some("MANAGER"), Some(json!({ "stage": "POLISH" }))).await;
    call(&app, "POST", &format!("{}/stages/current/receive", base), Some("MANAGER"), Some(json!({ "jamah_weight": "18.300" }))).await;

    let (status, _) = call(&app, "POST", &format!("{}/dispatch", base), Some("MANAGER"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "POST", &format!("{}/dispatch", base), Some("VIEWER"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, order) = call(&app, "POST", &format!("{}/dispatch", base), Some("DISPATCHER"), Some(json!({ "reference": "HAND-1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "DISPATCHED");
    assert_eq!(order["dispatch_reference"], "HAND-1");
}

#[tokio::test]
async fn test_event_stream_filters_by_work_order() {
    let app = test_app();
    let watched = create_order(&app, "WO-600").await;
    let other = create_order(&app, "WO-601").await;

    let request = Request::builder()
        .uri(format!("/v1/events/stream?work_order_id={}", watched))
        .header("x-workshop-user", "meena")
        .header("x-workshop-role", "VIEWER")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"].to_str().unwrap().starts_with("text/event-stream"));
    let mut body = response.into_body();

    call(&app, "POST", &format!("/v1/work-orders/{}/stages", other), Some("MANAGER"), Some(json!({ "stage": "FRAMING" }))).await;
    call(&app, "POST", &format!("/v1/work-orders/{}/stages", watched), Some("MANAGER"), Some(json!({ "stage": "FRAMING" }))).await;

    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), body.frame())
        .await
        .expect("no event within two seconds")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: stage_issued"));
    assert!(text.contains(&watched));
    assert!(!text.contains(&other));
}

async fn call_text(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}
