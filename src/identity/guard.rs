//! Route guarding policy shared by the in-process store and the HTTP edge gate.

use super::principal::Identity;

pub const LOGIN_PATH: &str = "/login";
pub const DASHBOARD_PATH: &str = "/dashboard";
pub const SUPERADMIN_DASHBOARD_PATH: &str = "/superadmin/dashboard";

/// Paths only meant for visitors without a session. The landing page counts.
const PUBLIC_ONLY: &[&str] = &["/", "/login", "/register", "/forgot-password", "/reset-password"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Proceed,
    Redirect(&'static str),
}

impl RouteDecision {
    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            RouteDecision::Proceed => None,
            RouteDecision::Redirect(p) => Some(p),
        }
    }
}

/// Strip query/fragment and a trailing slash so `/login/?next=x` matches `/login`.
pub fn normalize_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let p = &path[..end];
    if p.is_empty() {
        return "/";
    }
    let trimmed = p.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

pub fn is_public_only(path: &str) -> bool {
    PUBLIC_ONLY.contains(&normalize_path(path))
}

pub fn home_for(identity: &Identity) -> &'static str {
    if identity.is_super_admin { SUPERADMIN_DASHBOARD_PATH } else { DASHBOARD_PATH }
}

/// Client-side decision keyed on the cached identity.
pub fn decide(path: &str, identity: Option<&Identity>) -> RouteDecision {
    match (identity, is_public_only(path)) {
        (Some(id), true) => RouteDecision::Redirect(home_for(id)),
        (None, false) => RouteDecision::Redirect(LOGIN_PATH),
        _ => RouteDecision::Proceed,
    }
}

/// Edge decision keyed only on whether a session token was presented. The edge
/// cannot see the role, so an authenticated visitor is sent to the tenant home and
/// the client re-routes super-admins once it has fetched the identity.
pub fn decide_edge(path: &str, has_token: bool) -> RouteDecision {
    match (has_token, is_public_only(path)) {
        (true, true) => RouteDecision::Redirect(DASHBOARD_PATH),
        (false, false) => RouteDecision::Redirect(LOGIN_PATH),
        _ => RouteDecision::Proceed,
    }
}
