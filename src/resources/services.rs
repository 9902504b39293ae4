//! Admin resource endpoints. Every call is authenticated, so failures also reach the
//! client's notifier.

use serde::Serialize;
use serde_json::{json, Value};

use crate::client::ApiClient;
use crate::error::AppResult;
use crate::identity::Ack;

use super::logs::{normalize_logs, LogEntry};
use super::records::{BranchRecord, CategoryRecord, Listing, PermissionRecord, RoleRecord, TenantRecord, UserRecord};

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserForm {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BranchForm {
    pub tenant_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryForm {
    pub name: String,
    pub description: String,
}

fn paging(page: u32, per_page: u32) -> Vec<(&'static str, String)> {
    vec![("page", page.max(1).to_string()), ("per_page", per_page.max(1).to_string())]
}

fn ack(v: Value) -> Ack {
    Ack { message: v.get("message").and_then(|m| m.as_str()).map(|s| s.to_string()) }
}

// `{data: [...]}` or a bare array; anything else is an empty list.
fn unwrap_rows(v: Value) -> Value {
    match v {
        Value::Object(mut m) => match m.remove("data") {
            Some(rows @ Value::Array(_)) => rows,
            _ => Value::Array(Vec::new()),
        },
        rows @ Value::Array(_) => rows,
        _ => Value::Array(Vec::new()),
    }
}

#[derive(Clone)]
pub struct ResourceApi {
    client: ApiClient,
}

impl ResourceApi {
    pub fn new(client: ApiClient) -> Self { Self { client } }

    // users

    pub async fn users(&self, page: u32, per_page: u32) -> AppResult<Listing<UserRecord>> {
        Listing::from_value(self.client.get_query("/users", &paging(page, per_page)).await?)
    }

    /// Every user in one request, for pickers.
    pub async fn all_users(&self) -> AppResult<Vec<UserRecord>> {
        let v: Value = self.client.get_query("/users", &[("per_page", "100".to_string())]).await?;
        Ok(Listing::from_value(unwrap_rows(v))?.items)
    }

    pub async fn create_user(&self, form: &UserForm) -> AppResult<Ack> {
        self.client.post("/users", form).await.map(ack)
    }

    pub async fn update_user(&self, id: i64, form: &UserForm) -> AppResult<Ack> {
        self.client.put(&format!("/users/{}", id), form).await.map(ack)
    }

    pub async fn delete_user(&self, id: i64) -> AppResult<Ack> {
        self.client.delete(&format!("/users/{}", id)).await.map(ack)
    }

    pub async fn assign_role(&self, user_id: i64, role: &str) -> AppResult<Ack> {
        self.client.post(&format!("/users/{}/assign-role", user_id), &json!({ "role": role })).await.map(ack)
    }

    pub async fn assign_branch(&self, user_id: i64, branch_id: &str) -> AppResult<Ack> {
        self.client.post(&format!("/users/{}/assign-branch", user_id), &json!({ "branch_id": branch_id })).await.map(ack)
    }

    // roles & permissions

    pub async fn roles(&self, page: u32, per_page: u32) -> AppResult<Listing<RoleRecord>> {
        Listing::from_value(self.client.get_query("/roles", &paging(page, per_page)).await?)
    }

    pub async fn delete_role(&self, id: i64) -> AppResult<Ack> {
        self.client.delete(&format!("/roles/{}", id)).await.map(ack)
    }

    pub async fn permissions(&self, page: u32, per_page: u32) -> AppResult<Listing<PermissionRecord>> {
        Listing::from_value(self.client.get_query("/permissions", &paging(page, per_page)).await?)
    }

    pub async fn all_permissions(&self) -> AppResult<Vec<PermissionRecord>> {
        let v: Value = self.client.get("/all-permissions").await?;
        Ok(Listing::from_value(unwrap_rows(v))?.items)
    }

    // branches & categories

    pub async fn branches(&self, page: u32, per_page: u32) -> AppResult<Listing<BranchRecord>> {
        Listing::from_value(self.client.get_query("/branches", &paging(page, per_page)).await?)
    }

    pub async fn create_branch(&self, form: &BranchForm) -> AppResult<Ack> {
        self.client.post("/branches", form).await.map(ack)
    }

    /// The categories endpoint names its page size `perpage`.
    pub async fn categories(&self, page: u32, per_page: u32) -> AppResult<Listing<CategoryRecord>> {
        let query = [("page", page.max(1).to_string()), ("perpage", per_page.max(1).to_string())];
        Listing::from_value(self.client.get_query("/categories", &query).await?)
    }

    pub async fn category(&self, id: i64) -> AppResult<CategoryRecord> {
        let v: Value = self.client.get(&format!("/categories/{}", id)).await?;
        let record = match v {
            Value::Object(mut m) if m.get("data").is_some_and(|d| d.is_object()) => m.remove("data").unwrap_or_default(),
            other => other,
        };
        Ok(serde_json::from_value(record)?)
    }

    pub async fn create_category(&self, form: &CategoryForm) -> AppResult<Ack> {
        self.client.post("/categories", form).await.map(ack)
    }

    pub async fn update_category(&self, id: i64, form: &CategoryForm) -> AppResult<Ack> {
        self.client.put(&format!("/categories/{}", id), form).await.map(ack)
    }

    pub async fn delete_category(&self, id: i64) -> AppResult<Ack> {
        self.client.delete(&format!("/categories/{}", id)).await.map(ack)
    }

    // logs & organizations

    pub async fn logs(&self) -> AppResult<Vec<LogEntry>> {
        let v: Value = self.client.get("/alllogs").await?;
        Ok(normalize_logs(&v))
    }

    pub async fn organizations(&self, page: u32, per_page: u32) -> AppResult<Listing<TenantRecord>> {
        Listing::from_value(self.client.get_query("/all-tenant", &paging(page, per_page)).await?)
    }

    pub async fn tenants(&self) -> AppResult<Vec<TenantRecord>> {
        let v: Value = self.client.get("/tenants").await?;
        Ok(Listing::from_value(unwrap_rows(v))?.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_unwrap_or_empty() {
        assert_eq!(unwrap_rows(json!({"data": [1, 2]})), json!([1, 2]));
        assert_eq!(unwrap_rows(json!([3])), json!([3]));
        assert_eq!(unwrap_rows(json!({"data": {"x": 1}})), json!([]));
        assert_eq!(unwrap_rows(Value::Null), json!([]));
    }

    #[test]
    fn paging_is_at_least_one() {
        assert_eq!(paging(0, 0), vec![("page", "1".to_string()), ("per_page", "1".to_string())]);
        assert_eq!(ack(json!({"message": "Deleted"})).message.as_deref(), Some("Deleted"));
    }
}
