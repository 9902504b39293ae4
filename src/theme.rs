//! Light/dark preference, persisted beside the session under `theme`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::storage::{SessionStorage, KEY_THEME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self { Theme::Dark => "dark", Theme::Light => "light" }
    }

    pub fn flipped(self) -> Self {
        match self { Theme::Dark => Theme::Light, Theme::Light => Theme::Dark }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Theme {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(AppError::field("theme", &format!("unknown theme '{}'", other))),
        }
    }
}

/// The stored theme, or the system preference when none (or garbage) is stored.
pub fn current(storage: &dyn SessionStorage, system_prefers_dark: bool) -> Theme {
    storage
        .get(KEY_THEME)
        .and_then(|s| s.parse().ok())
        .unwrap_or(if system_prefers_dark { Theme::Dark } else { Theme::Light })
}

pub fn set(storage: &dyn SessionStorage, theme: Theme) -> AppResult<()> {
    storage.set(KEY_THEME, theme.as_str())
}

pub fn toggle(storage: &dyn SessionStorage, system_prefers_dark: bool) -> AppResult<Theme> {
    let next = current(storage, system_prefers_dark).flipped();
    set(storage, next)?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn falls_back_to_system_then_persists_toggle() {
        let s = MemoryStorage::new();
        assert_eq!(current(&s, true), Theme::Dark);
        assert_eq!(current(&s, false), Theme::Light);
        assert_eq!(toggle(&s, false).unwrap(), Theme::Dark);
        assert_eq!(s.get(KEY_THEME).as_deref(), Some("dark"));
        assert_eq!(current(&s, false), Theme::Dark);
        s.set(KEY_THEME, "sepia").unwrap();
        assert_eq!(current(&s, true), Theme::Dark);
        assert!("Light".parse::<Theme>().is_ok());
    }
}
