//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use datahub::core::config::{AppConfig, CrawlerConfig, FeatureFlags, RateLimitConfig};
use datahub::{build_router, AppState};

fn app_with(config: AppConfig) -> Router {
    let state = AppState::new(config, reqwest::Client::new());
    build_router(Arc::new(state))
}

fn app() -> Router {
    app_with(AppConfig::default())
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn multipart_request(file_mime: &str, payload: &[u8], fields: &[(&str, &str)]) -> Request<Body> {
    let boundary = "datahub-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"doc.pdf\"\r\nContent-Type: {file_mime}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/api/parse")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// One-page PDF with a single Helvetica text run and a valid xref table.
fn text_pdf(text: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", stream.len(), stream),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }
    let xref_at = out.len();
    out.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for off in offsets {
        out.push_str(&format!("{off:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_at
    ));
    out.into_bytes()
}

/// Serves a two-page board on an ephemeral port and returns its first page.
async fn serve_board() -> String {
    use axum::{response::Html, routing::get};

    let board = Router::new()
        .route(
            "/board/list",
            get(|| async {
                Html(
                    r#"<ul class="posts">
                         <li><a href="/board/view/1">2024 주택가격 동향</a></li>
                         <li><a href="/board/view/2">지역별 아파트 매매지수</a></li>
                       </ul>
                       <a class="next" href="/board/list2">다음</a>"#,
                )
            }),
        )
        .route(
            "/board/list2",
            get(|| async {
                Html(r#"<ul class="posts"><li><a href="/board/view/3">전월세 전환율</a></li></ul>"#)
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, board).await.unwrap();
    });
    format!("http://{addr}/board/list")
}

fn query_from(peer: SocketAddr, forwarded_for: &str, i: usize) -> Request<Body> {
    let mut request = json_request(
        Method::POST,
        "/api/query",
        json!({ "query": format!("서울 아파트 가격 {i}") }),
    );
    request
        .headers_mut()
        .insert("x-forwarded-for", forwarded_for.parse().unwrap());
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

#[tokio::test]
async fn health_endpoints_report_status() {
    let app = app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["environment"], "development");
    assert_eq!(body["data"]["features"]["ocrParsing"], true);
}

#[tokio::test]
async fn twenty_first_query_is_rate_limited() {
    let app = app();
    for i in 0..20 {
        let (status, _) = send(
            &app,
            json_request(Method::POST, "/api/query", json!({ "query": format!("2024년 서울 투표율 {i}") })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "query {i} should pass");
    }

    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/api/query", json!({ "query": "서울 투표율" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "QUERY_RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn general_limit_applies_across_api_routes() {
    let app = app();
    for _ in 0..100 {
        let (status, _) = send(&app, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&app, get("/api/sources")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "TOO_MANY_REQUESTS");

    // Liveness sits outside the limiter.
    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn sixth_failed_login_is_blocked() {
    let app = app();
    for _ in 0..5 {
        let (status, body) = send(
            &app,
            json_request(Method::POST, "/api/auth/login", json!({ "email": "kim@example.kr" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "MISSING_CREDENTIALS");
    }

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "email": "kim@example.kr", "password": "pw" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "TOO_MANY_AUTH_ATTEMPTS");
}

#[tokio::test]
async fn dev_login_token_verifies() {
    let app = app();
    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "email": "kim@example.kr", "password": "pw" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["role"], "admin");
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri("/api/auth/verify")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(body["data"]["user"]["email"], "kim@example.kr");

    let (status, body) = send(&app, get("/api/auth/me")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn disabled_ocr_rejects_parse_before_reading_upload() {
    let config = AppConfig {
        features: FeatureFlags {
            ocr_parsing: false,
            ..FeatureFlags::default()
        },
        ..AppConfig::default()
    };
    let app = app_with(config);

    let (status, body) = send(&app, multipart_request("application/pdf", b"%PDF-1.4", &[])).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "FEATURE_DISABLED");

    let (status, _) = send(&app, get("/api/parse/parsers")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn non_pdf_upload_is_a_validation_error() {
    let app = app();
    let (status, body) = send(&app, multipart_request("text/plain", b"hello", &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "file");
}

#[tokio::test]
async fn disabled_query_feature_does_not_spend_quota() {
    let config = AppConfig {
        features: FeatureFlags {
            nl_query: false,
            ..FeatureFlags::default()
        },
        ..AppConfig::default()
    };
    let app = app_with(config);
    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/query", json!({ "query": "서울 투표율" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "FEATURE_DISABLED");
}

#[tokio::test]
async fn crawler_types_list_implementation_status() {
    let app = app();
    let (status, body) = send(&app, get("/api/crawl/types")).await;
    assert_eq!(status, StatusCode::OK);
    let types = body["data"].as_array().unwrap();
    let find = |id: &str| types.iter().find(|t| t["id"] == id).cloned().unwrap();
    assert_eq!(find("nec_library")["implemented"], true);
    assert_eq!(find("custom")["implemented"], true);
    assert_eq!(find("nec_policy")["implemented"], false);
}

#[tokio::test]
async fn unimplemented_crawler_is_service_unavailable() {
    let app = app();
    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/crawl", json!({ "crawlerType": "rone_reports" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not yet implemented"));

    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/crawl", json!({ "crawlerType": "bogus" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"][0]["field"], "crawlerType");
}

#[tokio::test]
async fn accepted_crawl_is_tracked_as_a_job() {
    let app = app();
    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/crawl",
            json!({
                "crawlerType": "custom",
                "options": {
                    "url": "http://127.0.0.1:9/board",
                    "maxPages": 1,
                    "selectors": { "item": "li" }
                }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["data"]["jobId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&format!("/api/crawl/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], job_id.as_str());
    assert_eq!(body["data"]["target"], "custom");

    let (status, _) = send(&app, get("/api/crawl/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = send(&app, get(&format!("/api/crawl/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn csv_export_is_an_attachment() {
    let app = app();
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/export",
            json!({ "data": [{ "a": 1, "b": "x,y" }], "format": "csv" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"export-"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"a,b\n1,\"x,y\"\n");
}

#[tokio::test]
async fn empty_export_has_empty_body() {
    let app = app();
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/export",
            json!({ "data": [], "format": "json" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());

    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/export", json!({ "data": [], "format": "xlsx" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"][0]["field"], "format");
}

#[tokio::test]
async fn queries_are_paged_newest_first() {
    let app = app();
    for q in ["첫번째 질의", "두번째 질의", "세번째 질의"] {
        let (status, _) =
            send(&app, json_request(Method::POST, "/api/query", json!({ "query": q }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, get("/api/history?limit=2&offset=0")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["items"][0]["query"], "세번째 질의");

    let (status, body) = send(&app, get("/api/history?limit=500")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"][0]["field"], "limit");
}

#[tokio::test]
async fn query_is_sanitized_before_length_check() {
    let app = app();
    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/query",
            json!({ "query": "<script>alert(1)</script> a " }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"][0]["field"], "query");

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/query/validate",
            json!({
                "intent": "ELECTION",
                "confidence": 0.9,
                "source": { "api": "nec" },
                "outputFormat": "chart"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
}

#[tokio::test]
async fn text_pdf_upload_is_parsed_locally() {
    let app = app();
    let pdf = text_pdf(&"Seoul apartment price index ".repeat(4));
    let (status, body) = send(&app, multipart_request("application/pdf", &pdf, &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["parser"], "pdf_text");
    assert_eq!(body["data"]["pageCount"], 1);
    assert!(body["data"]["content"]["text"]
        .as_str()
        .unwrap()
        .contains("Seoul apartment price index"));
}

#[tokio::test]
async fn unknown_parser_id_is_unsupported() {
    let app = app();
    let pdf = text_pdf("Hello");
    let (status, body) = send(
        &app,
        multipart_request("application/pdf", &pdf, &[("parserId", "tesseract")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "UNSUPPORTED_PARSER");
}

#[tokio::test]
async fn custom_crawl_completes_with_records() {
    let start_url = serve_board().await;
    let config = AppConfig {
        crawler: CrawlerConfig {
            host_delay: Duration::ZERO,
            ..CrawlerConfig::default()
        },
        ..AppConfig::default()
    };
    let app = app_with(config);

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/crawl",
            json!({
                "crawlerType": "custom",
                "options": {
                    "url": start_url,
                    "maxPages": 5,
                    "selectors": { "item": "ul.posts li", "nextPage": "a.next" }
                }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["data"]["jobId"].as_str().unwrap().to_string();

    let mut job = Value::Null;
    for _ in 0..50 {
        let (status, body) = send(&app, get(&format!("/api/crawl/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        job = body["data"].clone();
        if job["status"] == "COMPLETED" || job["status"] == "FAILED" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(job["status"], "COMPLETED", "job ended as {job}");
    assert_eq!(job["resultCount"], 3);
    let results = job["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["title"], "2024 주택가격 동향");
    assert!(results[2]["url"].as_str().unwrap().ends_with("/board/view/3"));
}

#[tokio::test]
async fn spoofed_forwarded_header_does_not_reset_query_quota() {
    let app = app();
    let peer: SocketAddr = "203.0.113.7:50000".parse().unwrap();
    let mut limited = 0;
    for i in 0..30 {
        let spoofed = format!("10.0.0.{i}");
        let (status, _) = send(&app, query_from(peer, &spoofed, i)).await;
        if status == StatusCode::TOO_MANY_REQUESTS {
            limited += 1;
        }
    }
    assert_eq!(limited, 10);
}

#[tokio::test]
async fn trusted_proxy_keys_clients_by_forwarded_header() {
    let config = AppConfig {
        rate_limits: RateLimitConfig {
            trust_proxy: true,
            ..RateLimitConfig::default()
        },
        ..AppConfig::default()
    };
    let app = app_with(config);
    let proxy: SocketAddr = "10.0.0.1:8080".parse().unwrap();
    for i in 0..30 {
        let client = format!("198.51.100.{i}");
        let (status, _) = send(&app, query_from(proxy, &client, i)).await;
        assert_eq!(status, StatusCode::OK, "client {client} should have its own quota");
    }
}
