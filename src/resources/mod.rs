//! Tolerant-parsing boundary for the admin resources (users, roles, permissions,
//! branches, categories, organizations, activity logs).

pub mod logs;
pub mod page;
pub mod records;
mod services;

pub use logs::{normalize_logs, LogEntry, LogFilter, Severity};
pub use page::{pagination_links, PageItem};
pub use records::{BranchRecord, CategoryRecord, Listing, PageMeta, PermissionRecord, RoleRecord, TenantRecord, UserRecord};
pub use services::{BranchForm, CategoryForm, ResourceApi, UserForm};
