//! Typed admin records and the paginated listing envelope.
//!
//! Backend payloads are loose: ids arrive as numbers or strings, nullable columns
//! come back as `null`, and list endpoints answer either with a bare array or a
//! Laravel paginator object. Everything is folded into strict shapes here.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::identity::principal::{de_id, de_names, de_opt_id};

/// Scalar to display text; `null` becomes the empty string and structured values
/// their compact JSON.
pub fn text_of(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn de_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(text_of(&Value::deserialize(d)?).trim().to_string())
}

fn de_opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let s = text_of(&Value::deserialize(d)?);
    let s = s.trim();
    Ok(if s.is_empty() { None } else { Some(s.to_string()) })
}

fn de_count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn de_opt_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub name: String,
    #[serde(default, deserialize_with = "de_text")]
    pub email: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub tenant_id: Option<i64>,
    #[serde(default, deserialize_with = "de_names")]
    pub roles: BTreeSet<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub guard_name: Option<String>,
    #[serde(default, deserialize_with = "de_names")]
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub guard_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    #[serde(deserialize_with = "de_text")]
    pub id: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub tenant_id: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub description: Option<String>,
}

/// An organization as listed by `/all-tenant` and `/tenants`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    #[serde(deserialize_with = "de_text")]
    pub id: String,
    #[serde(default, deserialize_with = "de_text")]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLink {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub label: String,
    #[serde(default)]
    pub active: bool,
}

/// Laravel `LengthAwarePaginator` metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    #[serde(default, deserialize_with = "de_count")]
    pub current_page: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub last_page: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub per_page: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub total: u64,
    #[serde(default, deserialize_with = "de_opt_count")]
    pub from: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_count")]
    pub to: Option<u64>,
    #[serde(default)]
    pub links: Vec<PageLink>,
}

/// One page of records. `meta` is `None` when the backend returned a bare array and
/// paging is up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub meta: Option<PageMeta>,
    /// Rows that could not be read as `T`.
    pub skipped: usize,
}

impl<T> Default for Listing<T> {
    fn default() -> Self { Self { items: Vec::new(), meta: None, skipped: 0 } }
}

impl<T: DeserializeOwned> Listing<T> {
    /// Accepts a bare array, `{data: [...], ...paginator}` or a resource wrapper
    /// `{data: {data: [...], ...paginator}}`.
    pub fn from_value(v: Value) -> AppResult<Self> {
        let (rows, meta_src) = match v {
            Value::Array(rows) => (rows, None),
            Value::Object(mut top) => match top.remove("data") {
                Some(Value::Array(rows)) => (rows, Some(Value::Object(top))),
                Some(Value::Object(mut inner)) => match inner.remove("data") {
                    Some(Value::Array(rows)) => (rows, Some(Value::Object(inner))),
                    _ => return Err(AppError::decode("listing_decode", "no record array under data.data")),
                },
                _ => return Err(AppError::decode("listing_decode", "listing payload has no data array")),
            },
            other => return Err(AppError::decode("listing_decode".to_string(), format!("unexpected listing payload {}", other))),
        };
        let meta = meta_src
            .filter(|m| m.get("current_page").is_some() || m.get("last_page").is_some())
            .map(serde_json::from_value::<PageMeta>)
            .transpose()?;
        let mut out = Listing { items: Vec::with_capacity(rows.len()), meta, skipped: 0 };
        for row in rows {
            match serde_json::from_value::<T>(row) {
                Ok(item) => out.items.push(item),
                Err(e) => {
                    warn!(target: "resources", "skipping unreadable row: {}", e);
                    out.skipped += 1;
                }
            }
        }
        Ok(out)
    }
}

impl<T> Listing<T> {
    pub fn is_server_paged(&self) -> bool { self.meta.is_some() }

    /// Page count: the paginator's `last_page`, else one page of everything.
    pub fn total_pages(&self) -> u64 {
        match &self.meta {
            Some(m) => m.last_page,
            None => u64::from(!self.items.is_empty()),
        }
    }
}
