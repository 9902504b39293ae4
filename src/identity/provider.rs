use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::ApiClient;
use crate::error::{AppError, AppResult};

use super::principal::Identity;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9\s-]{7,15}$").expect("phone regex"));

const MIN_PASSWORD_LEN: usize = 6;
/// Account settings hold a new password to a stricter floor than sign-up does.
const MIN_NEW_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new<S: Into<String>>(email: S, password: S) -> Self {
        Self { email: email.into(), password: password.into() }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.email.trim().is_empty() { return Err(AppError::field("email", "Email is required.")); }
        if self.password.is_empty() { return Err(AppError::field("password", "Password is required.")); }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Registration {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().chars().count() < 2 { return Err(AppError::field("name", "Please enter your full name.")); }
        if !EMAIL_RE.is_match(&self.email) { return Err(AppError::field("email", "Please enter a valid email address.")); }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::field("password", "Password must be at least 6 characters."));
        }
        if let Some(phone) = self.phone.as_deref().filter(|p| !p.is_empty()) {
            if !PHONE_RE.is_match(phone) { return Err(AppError::field("phone", "Please enter a valid phone number.")); }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetPassword {
    pub email: String,
    pub token: String,
    pub password: String,
    pub password_confirmation: String,
}

impl ResetPassword {
    pub fn validate(&self) -> AppResult<()> {
        if self.email.trim().is_empty() || self.token.trim().is_empty() {
            return Err(AppError::field("token", "The reset link is missing required data."));
        }
        if self.password.is_empty() { return Err(AppError::field("password", "Password is required.")); }
        if self.password != self.password_confirmation {
            return Err(AppError::field("password_confirmation", "Passwords do not match."));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangePassword {
    pub current_password: String,
    pub password: String,
    pub password_confirmation: String,
}

impl ChangePassword {
    pub fn validate(&self) -> AppResult<()> {
        if self.current_password.is_empty() || self.password.is_empty() || self.password_confirmation.is_empty() {
            return Err(AppError::field("password", "Please fill out all password fields."));
        }
        if self.password.chars().count() < MIN_NEW_PASSWORD_LEN {
            return Err(AppError::field("password", "Password must be at least 8 characters."));
        }
        if self.password != self.password_confirmation {
            return Err(AppError::field("password_confirmation", "New passwords do not match."));
        }
        Ok(())
    }
}

/// Successful login: the primary bearer token and the identity it belongs to.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub token: String,
    pub identity: Identity,
}

/// Registration may or may not sign the new account in straight away.
#[derive(Debug, Clone, Default)]
pub struct RegisterOutcome {
    pub grant: Option<AuthGrant>,
    pub message: Option<String>,
}

/// Plain acknowledgement from the password endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
}

/// The backend calls the session store depends on.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, creds: &Credentials) -> AppResult<AuthGrant>;
    async fn register(&self, reg: &Registration) -> AppResult<RegisterOutcome>;
    async fn me(&self) -> AppResult<Identity>;
    async fn profile(&self) -> AppResult<Identity>;
    async fn logout(&self) -> AppResult<()>;
    async fn forgot_password(&self, email: &str) -> AppResult<Ack>;
    async fn reset_password(&self, req: &ResetPassword) -> AppResult<Ack>;
    async fn change_password(&self, req: &ChangePassword) -> AppResult<Ack>;
    /// Returns the impersonation bearer token for the tenant.
    async fn impersonate(&self, tenant_id: i64) -> AppResult<String>;
    async fn exit_impersonation(&self) -> AppResult<()>;
}

/// `AuthApi` over the REST backend.
#[derive(Clone)]
pub struct HttpAuthApi {
    client: ApiClient,
}

impl HttpAuthApi {
    pub fn new(client: ApiClient) -> Self { Self { client } }

    pub fn client(&self) -> &ApiClient { &self.client }
}

fn parse_grant(v: &Value) -> AppResult<Option<AuthGrant>> {
    let token = v.get("token").and_then(|t| t.as_str()).filter(|t| !t.is_empty());
    let user = v.get("user").filter(|u| u.is_object());
    match (token, user) {
        (Some(token), Some(user)) => Ok(Some(AuthGrant { token: token.to_string(), identity: Identity::from_value(user.clone())? })),
        _ => Ok(None),
    }
}

fn message_of(v: &Value) -> Option<String> {
    v.get("message").and_then(|m| m.as_str()).map(|s| s.to_string())
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, creds: &Credentials) -> AppResult<AuthGrant> {
        let v: Value = self.client.post_inline("/login", creds).await?;
        parse_grant(&v)?.ok_or_else(|| AppError::decode("login_decode".to_string(), "login response lacks token or user".to_string()))
    }

    async fn register(&self, reg: &Registration) -> AppResult<RegisterOutcome> {
        let v: Value = self.client.post_inline("/register", reg).await?;
        Ok(RegisterOutcome { grant: parse_grant(&v)?, message: message_of(&v) })
    }

    async fn me(&self) -> AppResult<Identity> {
        let v: Value = self.client.get("/me").await?;
        Identity::from_value(v)
    }

    async fn profile(&self) -> AppResult<Identity> {
        let v: Value = self.client.get("/profile").await?;
        Identity::from_profile(v)
    }

    async fn logout(&self) -> AppResult<()> {
        let _: Value = self.client.post("/logout", &json!({})).await?;
        Ok(())
    }

    async fn forgot_password(&self, email: &str) -> AppResult<Ack> {
        let v: Value = self.client.post_inline("/forgot-password", &json!({ "email": email })).await?;
        Ok(Ack { message: message_of(&v) })
    }

    async fn reset_password(&self, req: &ResetPassword) -> AppResult<Ack> {
        let v: Value = self.client.post_inline("/reset-password", req).await?;
        Ok(Ack { message: message_of(&v) })
    }

    async fn change_password(&self, req: &ChangePassword) -> AppResult<Ack> {
        let v: Value = self.client.post("/change-password", req).await?;
        Ok(Ack { message: message_of(&v) })
    }

    async fn impersonate(&self, tenant_id: i64) -> AppResult<String> {
        let v: Value = self.client.post(&format!("/admin/impersonate/{}", tenant_id), &json!({})).await?;
        v.get("impersonation_token")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .ok_or_else(|| AppError::decode("impersonation_decode".to_string(), "response lacks impersonation_token".to_string()))
    }

    async fn exit_impersonation(&self) -> AppResult<()> {
        let _: Value = self.client.post("/impersonation/exit", &json!({})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_rules() {
        let ok = Registration { name: "Nadia".into(), email: "n@example.test".into(), password: "secret1".into(), phone: Some("+880 1711-000000".into()), address: None };
        assert!(ok.validate().is_ok());

        let short_name = Registration { name: " N ".into(), ..ok.clone() };
        assert!(matches!(short_name.validate(), Err(AppError::ValidationFailed { ref fields, .. }) if fields.contains_key("name")));
        let bad_email = Registration { email: "n@example".into(), ..ok.clone() };
        assert!(bad_email.validate().is_err());
        let short_pw = Registration { password: "12345".into(), ..ok.clone() };
        assert!(short_pw.validate().is_err());
        let bad_phone = Registration { phone: Some("12ab".into()), ..ok.clone() };
        assert!(bad_phone.validate().is_err());
        let empty_phone = Registration { phone: Some(String::new()), ..ok };
        assert!(empty_phone.validate().is_ok());
    }

    #[test]
    fn password_forms() {
        let reset = ResetPassword { email: "a@b.cd".into(), token: "t".into(), password: "pw1234".into(), password_confirmation: "pw1234".into() };
        assert!(reset.validate().is_ok());
        let mismatch = ResetPassword { password_confirmation: "other".into(), ..reset.clone() };
        assert_eq!(mismatch.validate().unwrap_err().message(), "Passwords do not match.");
        let no_token = ResetPassword { token: "".into(), ..reset };
        assert!(no_token.validate().is_err());

        let change = ChangePassword { current_password: "old".into(), password: "newpass1".into(), password_confirmation: "newpass1".into() };
        assert!(change.validate().is_ok());
        let short = ChangePassword { password: "abc1234".into(), password_confirmation: "abc1234".into(), ..change.clone() };
        assert_eq!(short.validate().unwrap_err().message(), "Password must be at least 8 characters.");
        let unconfirmed = ChangePassword { password_confirmation: "".into(), ..change.clone() };
        assert_eq!(unconfirmed.validate().unwrap_err().message(), "Please fill out all password fields.");
        let mismatch = ChangePassword { password_confirmation: "newpass2".into(), ..change.clone() };
        assert_eq!(mismatch.validate().unwrap_err().message(), "New passwords do not match.");
        assert!(ChangePassword { current_password: "".into(), ..change }.validate().is_err());
        assert!(Credentials::new("", "x").validate().is_err());
    }

    #[test]
    fn grant_requires_token_and_user() {
        let v = json!({"token": "abc", "user": {"id": 1, "name": "A", "email": "a@b.c"}});
        let g = parse_grant(&v).unwrap().unwrap();
        assert_eq!(g.token, "abc");
        assert_eq!(g.identity.id, 1);
        assert!(parse_grant(&json!({"message": "created"})).unwrap().is_none());
        assert!(parse_grant(&json!({"token": "", "user": {"id": 1}})).unwrap().is_none());
        assert!(parse_grant(&json!({"token": "x", "user": {"name": "no id"}})).is_err());
    }
}
