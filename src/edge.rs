//! HTTP edge gate: an axum middleware applying the route-guard policy to page
//! requests before they reach the app, keyed only on the presence of a `token`
//! cookie.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Router;
use tracing::debug;

use crate::identity::guard::{decide_edge, RouteDecision};

pub const TOKEN_COOKIE: &str = "token";

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Path prefixes served without a decision (assets, framework internals).
    pub bypass_prefixes: Vec<String>,
    pub cookie_name: String,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            bypass_prefixes: vec!["/static".into(), "/assets".into(), "/_next".into(), "/favicon.ico".into()],
            cookie_name: TOKEN_COOKIE.to_string(),
        }
    }
}

impl EdgeConfig {
    /// Prefixes match whole path segments: `/static/app.js` bypasses, `/statically` does not.
    pub fn bypasses(&self, path: &str) -> bool {
        self.bypass_prefixes.iter().any(|p| {
            let p = p.trim_end_matches('/');
            path.strip_prefix(p).is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all("cookie") {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if let Some(eq) = p.find('=') {
                let (k, v) = p.split_at(eq);
                if k == name {
                    let raw = &v[1..];
                    return Some(urlencoding::decode(raw).map(|c| c.into_owned()).unwrap_or_else(|_| raw.to_string()));
                }
            }
        }
    }
    None
}

/// Pure decision for one request; `None` lets the request through.
pub fn gate(cfg: &EdgeConfig, path: &str, headers: &HeaderMap) -> Option<&'static str> {
    if cfg.bypasses(path) {
        return None;
    }
    let has_token = parse_cookie(headers, &cfg.cookie_name).is_some_and(|t| !t.is_empty());
    match decide_edge(path, has_token) {
        RouteDecision::Proceed => None,
        RouteDecision::Redirect(to) => {
            debug!(target: "edge", path, has_token, to, "edge redirect");
            Some(to)
        }
    }
}

pub async fn edge_gate(State(cfg): State<EdgeConfig>, req: Request<Body>, next: Next) -> Response {
    match gate(&cfg, req.uri().path(), req.headers()) {
        Some(to) => Redirect::temporary(to).into_response(),
        None => next.run(req).await,
    }
}

/// Wrap every route of `router` in the edge gate.
pub fn protect<S>(router: Router<S>, cfg: EdgeConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(cfg, edge_gate))
}
