use super::principal::Identity;

/// Capability check: super-admins pass unconditionally, everyone else needs the
/// exact permission name. No identity or an empty name is always a denial.
pub fn can(identity: Option<&Identity>, permission: &str) -> bool {
    let Some(id) = identity else { return false; };
    if id.is_super_admin {
        return true;
    }
    if permission.is_empty() {
        return false;
    }
    id.has_permission(permission)
}

/// True when any of `permissions` is held. An empty list is a denial unless super-admin.
pub fn can_any<S: AsRef<str>>(identity: Option<&Identity>, permissions: &[S]) -> bool {
    let Some(id) = identity else { return false; };
    if id.is_super_admin {
        return true;
    }
    permissions.iter().any(|p| {
        let p = p.as_ref();
        !p.is_empty() && id.has_permission(p)
    })
}

/// True only when every one of `permissions` is held (super-admins always pass).
pub fn can_all<S: AsRef<str>>(identity: Option<&Identity>, permissions: &[S]) -> bool {
    let Some(id) = identity else { return false; };
    if id.is_super_admin {
        return true;
    }
    !permissions.is_empty() && permissions.iter().all(|p| can(Some(id), p.as_ref()))
}
