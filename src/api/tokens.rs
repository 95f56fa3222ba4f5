use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::AppState;
use crate::error::AppError;
use crate::models::{
    AttendanceRecord, AttendanceState, PurgeCounts, Token, TokenFilter, TokenStatus,
    TokenWithAttendee,
};
use crate::services::qr_image;

/// Upper bound for `limit` on the token listing
const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct GenerateTokensRequest {
    pub quantity: i64,
    pub label: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateTokensResponse {
    pub created_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListTokensQuery {
    pub status: Option<TokenStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TokenDetails {
    #[serde(flatten)]
    pub token: Token,
    pub attendee: Option<AttendanceRecord>,
    pub state: AttendanceState,
}

#[derive(Debug, Serialize)]
pub struct DeletedCount {
    pub deleted_count: u64,
}

// Codes are issued upper-case; scanners and typed input may not be.
fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

async fn find_token(state: &AppState, code: &str) -> Result<Token, AppError> {
    let code = normalize_code(code);

    state
        .store
        .find_token_by_code(&code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Token {} not found", code)))
}

/// Generates a batch of tokens
async fn generate_tokens(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<GenerateTokensRequest>,
) -> Result<(StatusCode, Json<GenerateTokensResponse>), AppError> {
    let tokens = state
        .generator
        .generate(req.quantity, req.label.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateTokensResponse {
            created_count: tokens.len(),
        }),
    ))
}

async fn list_tokens(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListTokensQuery>,
) -> Result<Json<Vec<TokenWithAttendee>>, AppError> {
    let defaults = TokenFilter::default();
    let filter = TokenFilter {
        status: query.status,
        limit: query.limit.unwrap_or(defaults.limit).clamp(1, MAX_LIST_LIMIT),
    };

    let tokens = state.store.list_tokens(&filter).await?;

    Ok(Json(tokens))
}

/// Looks up a token by code, with its attendee and lifecycle state
async fn get_token(
    State(state): State<AppState>,
    ApiPath(code): ApiPath<String>,
) -> Result<Json<TokenDetails>, AppError> {
    let token = find_token(&state, &code).await?;
    let attendee = state.store.find_record_by_token(token.id).await?;

    Ok(Json(TokenDetails {
        state: AttendanceState::of(attendee.as_ref()),
        token,
        attendee,
    }))
}

async fn qr_svg(
    State(state): State<AppState>,
    ApiPath(code): ApiPath<String>,
) -> Result<Response, AppError> {
    let token = find_token(&state, &code).await?;
    let url = qr_image::registration_url(&state.config.base_url, &token.code);
    let svg = qr_image::generate_qr_svg(&url)?;

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

async fn qr_png(
    State(state): State<AppState>,
    ApiPath(code): ApiPath<String>,
) -> Result<Response, AppError> {
    let token = find_token(&state, &code).await?;
    let url = qr_image::registration_url(&state.config.base_url, &token.code);
    let png = qr_image::generate_qr_png(&url)?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Deletes every token nobody has registered yet
async fn delete_generated(State(state): State<AppState>) -> Result<Json<DeletedCount>, AppError> {
    let deleted_count = state.store.delete_generated_tokens().await?;

    tracing::info!(deleted_count, "Deleted unregistered tokens");

    Ok(Json(DeletedCount { deleted_count }))
}

/// Wipes all tokens and attendance records
async fn delete_all(State(state): State<AppState>) -> Result<Json<PurgeCounts>, AppError> {
    let counts = state.store.delete_all().await?;

    tracing::info!(
        tokens_deleted = counts.tokens_deleted,
        records_deleted = counts.records_deleted,
        "Deleted all tokens and attendance records"
    );

    Ok(Json(counts))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tokens/:code", get(get_token))
        .route("/api/tokens/:code/qr.svg", get(qr_svg))
        .route("/api/tokens/:code/qr.png", get(qr_png))
}

/// Routes that must sit behind the admin password
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/api/tokens", get(list_tokens))
        .route("/api/tokens/generate", post(generate_tokens))
        .route("/api/tokens/generated", delete(delete_generated))
        .route("/api/tokens/all", delete(delete_all))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{admin_request, json_request, read_json, TestApp};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::json;
    use tower::ServiceExt;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" ab12ef "), "AB12EF");
    }

    #[tokio::test]
    async fn test_generate_requires_admin_password() {
        let app = TestApp::new(&[]);

        let response = app
            .router()
            .oneshot(json_request(
                Method::POST,
                "/api/tokens/generate",
                json!({ "quantity": 2 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_generate_creates_tokens() {
        let app = TestApp::new(&[]);

        let response = app
            .router()
            .oneshot(admin_request(
                Method::POST,
                "/api/tokens/generate",
                json!({ "quantity": 3, "label": "Orientation" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(read_json(response).await["created_count"], 3);

        let tokens = app.store.list_tokens(&TokenFilter::default()).await.unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(tokens
            .iter()
            .all(|t| t.token.label.as_deref() == Some("Orientation")));
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_quantity() {
        let app = TestApp::new(&[]);

        let response = app
            .router()
            .oneshot(admin_request(
                Method::POST,
                "/api/tokens/generate",
                json!({ "quantity": 0 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["error"], "invalid_quantity");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("between 1 and 3000"));
    }

    #[tokio::test]
    async fn test_get_token_by_code() {
        let app = TestApp::new(&["AB12EF0000"]);
        app.generate(1).await;

        let response = app
            .router()
            .oneshot(
                Request::get("/api/tokens/ab12ef0000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["code"], "AB12EF0000");
        assert_eq!(body["status"], "generated");
        assert_eq!(body["state"], "unregistered");
        assert!(body["attendee"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_token_is_404() {
        let app = TestApp::new(&[]);

        let response = app
            .router()
            .oneshot(
                Request::get("/api/tokens/FFFFFFFFFF")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(read_json(response).await["error"], "not_found");
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let app = TestApp::new(&[]);
        let tokens = app.generate(3).await;
        app.register(tokens[0].id, "Jane Doe", "BSIT").await;

        let response = app
            .router()
            .oneshot(admin_request(
                Method::GET,
                "/api/tokens?status=registered",
                json!({}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        let listed = body.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["code"], tokens[0].code.as_str());
        assert_eq!(listed[0]["attendee"]["full_name"], "Jane Doe");
    }

    #[tokio::test]
    async fn test_list_requires_admin_password() {
        let app = TestApp::new(&[]);

        let response = app
            .router()
            .oneshot(Request::get("/api/tokens").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rejected_query_uses_error_shape() {
        let app = TestApp::new(&[]);

        let response = app
            .router()
            .oneshot(admin_request(
                Method::GET,
                "/api/tokens?status=archived",
                json!({}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_qr_images() {
        let app = TestApp::new(&["AB12EF0000"]);
        app.generate(1).await;

        let svg = app
            .router()
            .oneshot(
                Request::get("/api/tokens/AB12EF0000/qr.svg")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(svg.status(), StatusCode::OK);
        assert_eq!(svg.headers()[header::CONTENT_TYPE], "image/svg+xml");

        let png = app
            .router()
            .oneshot(
                Request::get("/api/tokens/AB12EF0000/qr.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(png.status(), StatusCode::OK);
        assert_eq!(png.headers()[header::CONTENT_TYPE], "image/png");
    }

    #[tokio::test]
    async fn test_delete_generated_keeps_registered_tokens() {
        let app = TestApp::new(&[]);
        let tokens = app.generate(3).await;
        app.register(tokens[1].id, "Jane Doe", "BSIT").await;

        let response = app
            .router()
            .oneshot(admin_request(
                Method::DELETE,
                "/api/tokens/generated",
                json!({}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["deleted_count"], 2);

        let remaining = app.store.list_tokens(&TokenFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token.id, tokens[1].id);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let app = TestApp::new(&[]);
        let tokens = app.generate(2).await;
        app.register(tokens[0].id, "Jane Doe", "BSIT").await;

        let response = app
            .router()
            .oneshot(admin_request(Method::DELETE, "/api/tokens/all", json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["tokens_deleted"], 2);
        assert_eq!(body["records_deleted"], 1);
    }
}
