//! # Biomatch Auth
//!
//! Warstwa decyzyjna silnika biometrycznego.
//!
//! ## Możliwości:
//! - Poziomy bezpieczeństwa LOW..MAXIMUM z podzbiorami algorytmów,
//!   progami i limitami blokady
//! - Uwierzytelnianie 1:1: bramka jakości, równoległe dopasowanie, fuzja ważona
//! - Podwójne uwierzytelnianie twarz + odcisk, próby liczone per modalność
//! - Śledzenie prób per tożsamość+modalność z blokadą czasową
//! - Rejestracja z bramką jakości
//! - Tokeny sesji HMAC i asynchroniczny dziennik audytu
//! - Identyfikacja 1:N przez skaner z rdzenia

pub mod attempts;
pub mod audit;
pub mod clock;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod session;
pub mod telemetry;

// Re-exports
pub use attempts::{AttemptLog, AttemptTracker, LockStatus, MemoryAttemptLog};
pub use audit::{AuditEvent, AuditEventType, AuditSink, ChannelAuditSink, MemoryAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, LogFormat};
pub use enrollment::Enroller;
pub use error::{AuthError, AuthResult, PolicyError};
pub use orchestrator::{
    AlgorithmScore, AuthRequest, AuthResponse, Authenticator, AuthenticatorBuilder, Decision,
    DualAuthRequest, DualAuthResponse,
};
pub use policy::{LevelPolicy, SecurityLevel, SecurityPolicy, MAX_LOCKOUT_SECONDS};
pub use registry::{Identity, IdentityRegistry, TemplateStore};
pub use session::{HmacSessionIssuer, SessionClaims, SessionIssuer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// System name
pub const SYSTEM_NAME: &str = "BIOMATCH";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "1.0.0");
        assert_eq!(SYSTEM_NAME, "BIOMATCH");
    }
}
