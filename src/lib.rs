pub mod error;
pub mod config;
pub mod storage;
pub mod client;
pub mod identity;
pub mod edge;
pub mod resources;
pub mod theme;

pub use error::{AppError, AppResult};

// Diagnostic printing that only exists in test/debug builds.
// Usage: tprintln!("session.refresh user={}", id);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// Release builds keep the format checks but print nothing.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
