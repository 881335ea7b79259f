//! Sentinel Registry Server
//!
//! Keeps the authoritative record of backend services and their signed
//! registrations:
//! - Registers services, self-signed or signed with the registry's key
//! - Probes registered services and marks them healthy or unhealthy
//! - Fails a failover group over to its best backup, and back once the
//!   primary is stable again
//! - Rotates the active member of a group behind the rotation gate
//! - Records every security-relevant decision in a bounded audit trail
//!
//! ## API Endpoints
//!
//! ### Core Endpoints
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check
//! - `GET /v1/keys/registry` - Registry signing key
//!
//! ### Service Endpoints
//! - `POST /v1/services/register` - Register a service
//! - `POST /v1/services/discover` - Discover services by type/health/version
//! - `GET /v1/services` - List live registrations
//! - `GET /v1/services/{id}` - Get one registration
//! - `GET /v1/services/{id}/health` - Health summary and recent checks
//! - `POST /v1/services/update` - Patch a registration
//! - `POST /v1/services/decommission` - Retire a registration
//! - `POST /v1/services/rotate` - Rotate the active member of a group
//! - `GET /v1/failover/{group}/history` - Failover events of a group
//!
//! ### Security Endpoints
//! - `POST /v1/security/events` - Report a security event
//! - `GET /v1/security/events` - Recent events
//! - `GET /v1/security/events/ip/{ip}` - Events from one address
//! - `GET /v1/security/events/type/{event_type}` - Events of one type
//! - `GET /v1/security/statistics` - Aggregate counts

pub mod api;
pub mod config;
pub mod core;
pub mod registry;
pub mod storage;

pub use api::create_router;
pub use api::handlers::AppState;
pub use config::{ConfigError, RegistryConfig};
pub use core::{AdminAuthorizer, FailoverManager, HealthMonitor, HealthProbe, HttpProbe};
pub use registry::{RegistryError, ServiceHealthReport, ServiceRegistry};
pub use storage::{HealthPolicy, MemoryStore, RegistryStore, StorageError};
