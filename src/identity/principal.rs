use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// The authenticated principal as cached by the session store.
///
/// Wire payloads are loose (`is_super_admin` may be `1`, `tenant_id` may be a
/// string, roles may be objects); deserialization folds them into this shape once.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, deserialize_with = "de_flag")]
    pub is_super_admin: bool,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub tenant_id: Option<i64>,
    #[serde(default, deserialize_with = "de_names")]
    pub roles: BTreeSet<String>,
    #[serde(default, deserialize_with = "de_names")]
    pub permissions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Identity {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Parse the flat `GET /me` shape (also the `user` of a login response).
    pub fn from_value(v: Value) -> AppResult<Self> {
        serde_json::from_value(v).map_err(|e| AppError::decode("identity_decode".to_string(), e.to_string()))
    }

    /// Parse `GET /profile`, which nests the user and lists roles/permissions beside it.
    /// Falls back to the flat shape when there is no `user` object.
    pub fn from_profile(v: Value) -> AppResult<Self> {
        let Value::Object(mut top) = v else {
            return Err(AppError::decode("identity_decode".to_string(), "profile payload is not an object".to_string()));
        };
        let Some(Value::Object(mut user)) = top.remove("user") else {
            return Self::from_value(Value::Object(top));
        };
        for key in ["roles", "permissions"] {
            if let Some(list) = top.remove(key) {
                user.insert(key.to_string(), list);
            }
        }
        Self::from_value(Value::Object(user))
    }
}

pub(crate) fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64().ok_or_else(|| serde::de::Error::custom("id out of range")),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| serde::de::Error::custom(format!("non-numeric id '{}'", s))),
        other => Err(serde::de::Error::custom(format!("invalid id {}", other))),
    }
}

pub(crate) fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| serde::de::Error::custom("id out of range")),
        Value::String(s) => s.trim().parse::<i64>().map(Some).map_err(|_| serde::de::Error::custom(format!("non-numeric id '{}'", s))),
        other => Err(serde::de::Error::custom(format!("invalid id {}", other))),
    }
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    })
}

// Roles and permissions arrive as ["view-users"] or [{"id": 3, "name": "view-users"}].
pub(crate) fn de_names<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<String>, D::Error> {
    let mut out = BTreeSet::new();
    if let Value::Array(arr) = Value::deserialize(d)? {
        for item in arr {
            let name = match item {
                Value::String(s) => Some(s),
                Value::Object(mut m) => match m.remove("name") {
                    Some(Value::String(s)) => Some(s),
                    _ => None,
                },
                _ => None,
            };
            if let Some(n) = name.filter(|n| !n.is_empty()) { out.insert(n); }
        }
    }
    Ok(out)
}
