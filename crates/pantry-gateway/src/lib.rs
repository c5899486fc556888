//! Pantry HTTP surface: one axum route per pipeline operation, plus health.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, ConnectInfo, DefaultBodyLimit, RawQuery, State},
    http::{header, HeaderMap, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pantry_core::{
    extract_bearer, GatewayContext, GatewayError, IngredientsRequest, RecipeDetailsQuery,
    RecipesListQuery,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Maps a pipeline failure to its status and redacted body. Detail goes to the log only.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.is_server_error() {
            tracing::error!("[PANTRY SYSTEM] request failed: {}", self.0);
        } else {
            tracing::warn!("[PANTRY AUTH] request rejected: {}", self.0);
        }
        (status, self.0.public_message()).into_response()
    }
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// `max_image_bytes` caps the `/getIngredients` body; every other route keeps axum's default.
pub fn router(ctx: Arc<GatewayContext>, max_image_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let ingredients = post(
        move |State(ctx): State<Arc<GatewayContext>>,
              headers: HeaderMap,
              body: Result<Bytes, BytesRejection>| {
            get_ingredients(ctx, headers, body, max_image_bytes)
        },
    )
    .layer(DefaultBodyLimit::max(max_image_bytes));

    Router::new()
        .route("/health", get(health))
        .route("/getIngredients", ingredients)
        .route("/getRecipesList", get(get_recipes_list))
        .route("/getRecipeDetails", get(get_recipe_details))
        .route("/test", get(probe))
        .with_state(ctx)
        .layer(cors)
        .layer(axum::middleware::from_fn(log_request))
}

async fn log_request(request: Request<Body>, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".into());
    tracing::info!(
        method = %request.method(),
        path = %request.uri().path(),
        "[PANTRY SYSTEM] request from {}",
        peer
    );
    next.run(request).await
}

async fn health() -> &'static str {
    "OK"
}

/// Body is parsed by hand so a missing bearer header is answered before body problems,
/// an oversized body included.
async fn get_ingredients(
    ctx: Arc<GatewayContext>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
    limit: usize,
) -> Result<Json<serde_json::Value>, ApiError> {
    let auth = authorization(&headers);
    let request: IngredientsRequest = match body {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            extract_bearer(auth).map_err(GatewayError::from)?;
            return Err(GatewayError::PayloadTooLarge { limit }.into());
        }
        Err(rejection) => {
            tracing::debug!("[PANTRY SYSTEM] unreadable ingredients body: {}", rejection);
            IngredientsRequest::default()
        }
    };
    let value = ctx.identify_ingredients(auth, &request).await?;
    Ok(Json(value))
}

// Queries are read raw; the typed extractor would reject repeated keys before the auth check.
async fn get_recipes_list(
    State(ctx): State<Arc<GatewayContext>>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = RecipesListQuery::from_query(raw.as_deref());
    let value = ctx.list_recipes(authorization(&headers), &query).await?;
    Ok(Json(value))
}

async fn get_recipe_details(
    State(ctx): State<Arc<GatewayContext>>,
    headers: HeaderMap,
    RawQuery(raw): RawQuery,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = RecipeDetailsQuery::from_query(raw.as_deref());
    let value = ctx.recipe_details(authorization(&headers), &query).await?;
    Ok(Json(value))
}

async fn probe(
    State(ctx): State<Arc<GatewayContext>>,
    headers: HeaderMap,
) -> Result<&'static str, ApiError> {
    let caller = ctx.probe(authorization(&headers)).await?;
    tracing::info!(uid = %caller.uid(), "[PANTRY AUTH] probe passed");
    Ok("Authenticated and entitled.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantry_core::testing::Harness;
    use pantry_core::{ContentPart, DEFAULT_MAX_IMAGE_BYTES};
    use tower::ServiceExt;

    fn app(h: &Harness) -> Router {
        router(h.ctx.clone(), DEFAULT_MAX_IMAGE_BYTES)
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn get_req(uri: &str, auth: bool) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if auth {
            builder = builder.header("authorization", Harness::bearer());
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_ingredients(body: &str, auth: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/getIngredients")
            .header("content-type", "application/json");
        if auth {
            builder = builder.header("authorization", Harness::bearer());
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let h = Harness::entitled("{}");
        let (status, body) = send(app(&h), get_req("/health", false)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn every_gated_endpoint_is_403_without_header() {
        let h = Harness::entitled("{}");
        let requests = vec![
            get_req("/getRecipesList?ingredients=egg", false),
            get_req("/getRecipesList", false),
            get_req("/getRecipeDetails?ingredients=egg&title=Omelette&category=breakfast", false),
            get_req("/test", false),
            post_ingredients(r#"{"image":"aGVsbG8="}"#, false),
            post_ingredients("not json", false),
        ];
        for req in requests {
            let (status, body) = send(app(&h), req).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body, b"Unauthorized");
        }
        assert_eq!(h.oracle.calls(), 0);
        assert_eq!(h.ledger.calls(), 0);
        assert!(h.backend.requests().is_empty());
    }

    #[tokio::test]
    async fn recipes_list_scenario_returns_completion_json() {
        let h = Harness::entitled(r#"{"recipes":["soup"]}"#);
        let (status, body) = send(
            app(&h),
            get_req("/getRecipesList?ingredients=carrot%2Cpotato", true),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "recipes": ["soup"] }));

        let sent = h.backend.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].messages.user_parts(), &[ContentPart::text("carrot,potato")]);
    }

    #[tokio::test]
    async fn blank_title_is_400_and_nothing_is_composed() {
        let h = Harness::entitled("{}");
        let (status, body) = send(
            app(&h),
            get_req("/getRecipeDetails?ingredients=egg&title=&category=breakfast", true),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"No valid title provided");
        assert_eq!(h.oracle.calls(), 0);
        assert_eq!(h.templates.loads(), 0);
        assert!(h.backend.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_ingredients_is_400() {
        let h = Harness::entitled("{}");
        let (status, body) = send(app(&h), get_req("/getRecipesList", true)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"No valid ingredients provided");
    }

    #[tokio::test]
    async fn unentitled_caller_is_403() {
        let h = Harness::with_active_records(0, "{}");
        let (status, body) = send(app(&h), get_req("/test", true)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, b"An active subscription is required");
        assert!(h.backend.requests().is_empty());
    }

    #[tokio::test]
    async fn probe_answers_plain_text() {
        let h = Harness::entitled("{}");
        let (status, body) = send(app(&h), get_req("/test", true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"Authenticated and entitled.");
    }

    #[tokio::test]
    async fn ingredients_scenario_sends_text_and_image_parts() {
        let h = Harness::entitled(r#"{"ingredients":["carrot","potato"]}"#);
        let (status, body) = send(
            app(&h),
            post_ingredients(r#"{"image":"aGVsbG8gd29ybGQ="}"#, true),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ingredients"][1], "potato");

        let parts = h.backend.requests()[0].messages.user_parts().to_vec();
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[0], ContentPart::Text { .. }));
        assert_eq!(parts[1], ContentPart::jpeg_base64("aGVsbG8gd29ybGQ="));
    }

    #[tokio::test]
    async fn non_json_completion_is_500_with_redacted_body() {
        let h = Harness::entitled("Sure! Try a carrot soup.");
        let (status, body) = send(
            app(&h),
            get_req("/getRecipesList?ingredients=carrot", true),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, b"Upstream returned an invalid response");
    }

    #[tokio::test]
    async fn backend_outage_does_not_leak_upstream_detail() {
        let h = Harness::backend_down();
        let (status, body) = send(
            app(&h),
            get_req("/getRecipesList?ingredients=carrot", true),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text, "Upstream service unavailable");
        assert!(!text.contains("503"));
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let h = Harness::entitled("{}");
        let (status, _) = send(app(&h), get_req("/getIngredients", true)).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn shipped_templates_cover_every_operation() {
        use pantry_core::{compose, FsTemplateStore, Operation, UserContent};

        let store = FsTemplateStore::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates"));
        for op in [
            Operation::IdentifyIngredients,
            Operation::ListRecipes,
            Operation::RecipeDetails,
        ] {
            let prompt = compose(&store, op, UserContent::Text("egg".into()))
                .await
                .unwrap();
            assert!(prompt.instructions().contains("JSON"));
        }
    }

    #[tokio::test]
    async fn repeated_query_keys_still_answer_403_without_header() {
        let h = Harness::entitled("{}");
        for uri in [
            "/getRecipesList?ingredients=egg&ingredients=milk",
            "/getRecipeDetails?ingredients=egg&title=Omelette&title=Pancake&category=breakfast",
        ] {
            let (status, body) = send(app(&h), get_req(uri, false)).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body, b"Unauthorized");
        }
        assert_eq!(h.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn repeated_query_keys_use_the_first_value() {
        let h = Harness::entitled(r#"{"steps":[]}"#);
        let (status, _) = send(
            app(&h),
            get_req(
                "/getRecipeDetails?ingredients=egg&title=Omelette&title=Pancake&category=breakfast",
                true,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            h.backend.requests()[0].messages.user_parts(),
            &[ContentPart::text(
                "title: Omelette, ingredients: egg, category: breakfast"
            )]
        );
    }

    #[tokio::test]
    async fn photo_sized_image_fits_the_default_limit() {
        let h = Harness::entitled(r#"{"ingredients":["carrot"]}"#);
        let image = "A".repeat(3 * 1024 * 1024);
        let body = format!(r#"{{"image":"{}"}}"#, image);
        let (status, _) = send(app(&h), post_ingredients(&body, true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn oversized_body_is_403_without_header_then_redacted_413() {
        let h = Harness::entitled("{}");
        let body = format!(r#"{{"image":"{}"}}"#, "A".repeat(4096));

        let (status, text) = send(router(h.ctx.clone(), 1024), post_ingredients(&body, false)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(text, b"Unauthorized");

        let (status, text) = send(router(h.ctx.clone(), 1024), post_ingredients(&body, true)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(text, b"Image is too large");
        assert_eq!(h.oracle.calls(), 0);
        assert!(h.backend.requests().is_empty());
    }

    #[tokio::test]
    async fn unreachable_oracle_answers_403_without_touching_the_ledger() {
        let h = Harness::oracle_down("{}");
        for uri in ["/test", "/getRecipesList?ingredients=egg"] {
            let (status, body) = send(app(&h), get_req(uri, true)).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body, b"Unauthorized");
        }
        assert_eq!(h.oracle.calls(), 2);
        assert_eq!(h.ledger.calls(), 0);
    }

    #[tokio::test]
    async fn cors_reflects_request_origin() {
        let h = Harness::entitled("{}");
        let req = Request::builder()
            .method("GET")
            .uri("/health")
            .header("origin", "https://app.pantry.test")
            .body(Body::empty())
            .unwrap();
        let res = app(&h).oneshot(req).await.unwrap();
        assert_eq!(
            res.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("https://app.pantry.test")
        );
    }
}
