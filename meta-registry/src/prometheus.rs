use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::metrics_consts::{HTTP_REQUESTS, HTTP_REQUEST_DURATION};

const UNMATCHED_ROUTE: &str = "unmatched";

/// Install the global prometheus recorder. Only one can be installed per process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 50.0, 100.0, 250.0, 1000.0,
        5000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Counts requests and records their latency, labelled by method, route template and
/// status. Requests that matched no route share one `path` label.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned());

    let response = next.run(req).await;

    let labels = request_labels(&method, route, response.status());
    metrics::counter!(HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());

    response
}

fn request_labels(
    method: &Method,
    route: Option<String>,
    status: StatusCode,
) -> [(&'static str, String); 3] {
    [
        ("method", method.to_string()),
        ("path", route.unwrap_or_else(|| String::from(UNMATCHED_ROUTE))),
        ("status", status.as_u16().to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_use_the_route_template() {
        let labels = request_labels(
            &Method::POST,
            Some(String::from("/register")),
            StatusCode::BAD_REQUEST,
        );
        assert_eq!(
            labels,
            [
                ("method", String::from("POST")),
                ("path", String::from("/register")),
                ("status", String::from("400")),
            ]
        );
    }

    #[test]
    fn unmatched_paths_share_a_label() {
        let labels = request_labels(&Method::GET, None, StatusCode::NOT_FOUND);
        assert_eq!(labels[1], ("path", String::from(UNMATCHED_ROUTE)));
        assert_eq!(labels[2], ("status", String::from("404")));
    }
}
