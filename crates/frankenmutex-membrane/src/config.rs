//! Runtime mode configuration.
//!
//! The runtime mode is set via the `FRANKENMUTEX_MODE` environment variable:
//! - `strict` (default): POSIX error-code semantics. Handle pointers handed to
//!   the abi layer are checked for null and otherwise trusted.
//! - `hardened`: the abi layer additionally validates attribute handles against
//!   the registry of live attribute objects, turning use of a destroyed
//!   attribute object into `EINVAL` instead of undefined behavior.
//! - `off`: No validation. Pure passthrough for benchmarking baseline only.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

/// Name of the environment variable holding the runtime mode.
pub const MODE_ENV_VAR: &str = "FRANKENMUTEX_MODE";

/// Runtime operating mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyLevel {
    /// POSIX error-code semantics; null checks only.
    #[default]
    Strict,
    /// Registry-backed handle validation at the abi boundary.
    Hardened,
    /// No validation. Pure passthrough for benchmarking baseline.
    Off,
}

impl SafetyLevel {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "strict" | "default" | "posix" => Self::Strict,
            "hardened" | "validate" | "full" => Self::Hardened,
            "off" | "none" | "disabled" => Self::Off,
            _ => Self::Strict,
        }
    }

    /// Stable label used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Hardened => "hardened",
            Self::Off => "off",
        }
    }

    /// Returns true if handles are checked against the live-object registry.
    #[must_use]
    pub const fn registry_validation_enabled(self) -> bool {
        matches!(self, Self::Hardened)
    }

    /// Returns true if any validation (including null checks) is active.
    #[must_use]
    pub const fn validation_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

// Atomic cache: 0=unresolved, 1=Strict, 2=Hardened, 3=Off.
static CACHED_LEVEL: AtomicU8 = AtomicU8::new(LEVEL_UNRESOLVED);

const LEVEL_UNRESOLVED: u8 = 0;
const LEVEL_STRICT: u8 = 1;
const LEVEL_HARDENED: u8 = 2;
const LEVEL_OFF: u8 = 3;

fn parse_runtime_mode_env(raw: &str) -> SafetyLevel {
    match raw.to_ascii_lowercase().as_str() {
        "strict" | "default" | "posix" => SafetyLevel::Strict,
        "hardened" | "validate" | "full" => SafetyLevel::Hardened,
        // The env contract is strict|hardened only. `Off` stays reachable via
        // `set_safety_level` for benchmarks.
        _ => SafetyLevel::Strict,
    }
}

/// Level named by `FRANKENMUTEX_MODE`, read once per process.
fn env_level() -> SafetyLevel {
    static ENV_LEVEL: OnceLock<SafetyLevel> = OnceLock::new();
    *ENV_LEVEL.get_or_init(|| {
        std::env::var(MODE_ENV_VAR)
            .map(|v| parse_runtime_mode_env(&v))
            .unwrap_or_default()
    })
}

fn level_to_u8(level: SafetyLevel) -> u8 {
    match level {
        SafetyLevel::Strict => LEVEL_STRICT,
        SafetyLevel::Hardened => LEVEL_HARDENED,
        SafetyLevel::Off => LEVEL_OFF,
    }
}

fn u8_to_level(v: u8) -> SafetyLevel {
    match v {
        LEVEL_HARDENED => SafetyLevel::Hardened,
        LEVEL_OFF => SafetyLevel::Off,
        _ => SafetyLevel::Strict,
    }
}

/// Get the configured safety level.
///
/// The first call seeds the cache from the environment; an override stored
/// by [`set_safety_level`] before or during that seeding wins.
#[must_use]
pub fn safety_level() -> SafetyLevel {
    let cached = CACHED_LEVEL.load(Ordering::Acquire);
    if cached != LEVEL_UNRESOLVED {
        return u8_to_level(cached);
    }

    let level = env_level();
    match CACHED_LEVEL.compare_exchange(
        LEVEL_UNRESOLVED,
        level_to_u8(level),
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => level,
        Err(current) => u8_to_level(current),
    }
}

/// Override the cached level, returning the one previously in force.
///
/// Intended for benchmarks and tests; production code takes the env value.
pub fn set_safety_level(level: SafetyLevel) -> SafetyLevel {
    let previous = safety_level();
    CACHED_LEVEL.store(level_to_u8(level), Ordering::Release);
    previous
}
