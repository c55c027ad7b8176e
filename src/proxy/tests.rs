// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::{BodyExt, Empty, Full};
    use hyper::{Request, Response, StatusCode};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::{Config, FileConfigProvider, FileFormat};
    use crate::core::{ProxyError, RootContext};
    use crate::filter::ProblemDetailsFilter;
    use crate::proxy::{DEFAULT_BODY_LIMIT, ProxyCore};

    fn config(value: Value) -> Config {
        let provider = FileConfigProvider::from_content(&value.to_string(), FileFormat::Json).unwrap();
        Config::builder().with_provider(provider).build()
    }

    fn proxy(upstream: &str, extra: Value) -> ProxyCore {
        let mut document = json!({
            "upstream": {"url": upstream, "timeout": 2},
            "filter": {"targetURLPrefixes": ["/api/"]}
        });
        if let (Some(target), Value::Object(extra)) = (document.as_object_mut(), extra) {
            target.extend(extra);
        }
        let config = config(document);

        let mut filter = ProblemDetailsFilter::default();
        filter
            .on_plugin_start(&config.plugin_payload().unwrap())
            .unwrap();
        ProxyCore::new(&config, Arc::new(filter)).unwrap()
    }

    fn get(uri: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .uri(uri)
            .header("host", "gateway.local")
            .body(Empty::new())
            .unwrap()
    }

    async fn read_body(response: Response<reqwest::Body>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_requires_upstream_url() {
        let filter: Arc<dyn RootContext> = Arc::new(ProblemDetailsFilter::default());

        let err = ProxyCore::new(&config(json!({})), filter.clone()).unwrap_err();
        assert!(matches!(err, ProxyError::ConfigError(_)));

        let err = ProxyCore::new(&config(json!({"upstream": {"url": "ftp://x"}})), filter.clone())
            .unwrap_err();
        assert!(err.to_string().contains("http or https"));

        let err = ProxyCore::new(&config(json!({"upstream": {"url": "not a url"}})), filter)
            .unwrap_err();
        assert!(err.to_string().contains("invalid upstream.url"));
    }

    #[tokio::test]
    async fn test_configuration_defaults() {
        let core = proxy("http://127.0.0.1:9/", json!({}));
        assert_eq!(core.upstream_url(), "http://127.0.0.1:9");
        assert_eq!(core.timeout(), Duration::from_secs(2));
        assert_eq!(core.body_limit(), DEFAULT_BODY_LIMIT);
        assert_eq!(core.filter_name(), "problem_details");
    }

    #[tokio::test]
    async fn test_rewrites_upstream_error() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/orders"))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_raw("no healthy upstream", "text/plain"),
            )
            .mount(&upstream)
            .await;

        let core = proxy(&upstream.uri(), json!({}));
        let mut request = get("/api/orders");
        request
            .headers_mut()
            .insert("x-request-id", "req-1".parse().unwrap());
        let response = core.process_request(request, "10.0.0.1").await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers()["content-type"],
            "application/problem+json"
        );
        assert!(response.headers().get("content-length").is_none());

        let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body["status"], 503);
        assert_eq!(body["instance"], "/api/orders");
        assert_eq!(body["trace_id"], "req-1");
        assert_eq!(body["detail"], "no healthy upstream");
    }

    #[tokio::test]
    async fn test_success_streams_unchanged() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/echo"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_raw(r#"{"id":1}"#, "application/json"),
            )
            .mount(&upstream)
            .await;

        let core = proxy(&upstream.uri(), json!({}));
        let request = Request::builder()
            .method("POST")
            .uri("/api/echo")
            .header("host", "gateway.local")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();
        let response = core.process_request(request, "10.0.0.1").await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(&read_body(response).await[..], br#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_forwards_query_and_generated_request_id() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/search"))
            .and(header_exists("x-request-id"))
            .and(header("x-forwarded-for", "10.0.0.7"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nothing"))
            .expect(1)
            .mount(&upstream)
            .await;

        let core = proxy(&upstream.uri(), json!({}));
        let response = core.process_request(get("/api/search?q=x"), "10.0.0.7").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body["instance"], "/api/search?q=x");
        // A generated uuid, not the built-in default
        assert_eq!(body["trace_id"].as_str().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn test_request_id_generation_can_be_disabled() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&upstream)
            .await;

        let core = proxy(
            &upstream.uri(),
            json!({"proxy": {"generate_request_id": false}}),
        );
        let response = core.process_request(get("/api/x"), "10.0.0.1").await;

        let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body["trace_id"], crate::problem::defaults().trace_id);
    }

    #[tokio::test]
    async fn test_non_target_path_is_untouched() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_raw("<p>oops</p>", "text/html"),
            )
            .mount(&upstream)
            .await;

        let core = proxy(&upstream.uri(), json!({}));
        let response = core.process_request(get("/web/index.html"), "10.0.0.1").await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["content-type"], "text/html");
        assert_eq!(&read_body(response).await[..], b"<p>oops</p>");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_rewritten_bad_gateway() {
        // Bind and drop to find a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let core = proxy(&format!("http://127.0.0.1:{port}"), json!({}));
        let response = core.process_request(get("/api/orders"), "10.0.0.1").await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body["status"], 502);
        assert_eq!(
            body["detail"],
            "upstream connect error or disconnect/reset before headers"
        );
    }

    #[tokio::test]
    async fn test_slow_upstream_is_rewritten_gateway_timeout() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&upstream)
            .await;

        let core = proxy(&upstream.uri(), json!({"upstream": {"url": upstream.uri(), "timeout": 1}}));
        let response = core.process_request(get("/api/slow"), "10.0.0.1").await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body: Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body["detail"], "upstream request timeout");
    }

    #[tokio::test]
    async fn test_oversized_error_body_passes_through() {
        let upstream = MockServer::start().await;
        let large = "x".repeat(4096);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string(large.clone()))
            .mount(&upstream)
            .await;

        let core = proxy(&upstream.uri(), json!({"server": {"body_limit": 1024}}));
        let response = core.process_request(get("/api/big"), "10.0.0.1").await;

        assert_eq!(&read_body(response).await[..], large.as_bytes());
    }
}
