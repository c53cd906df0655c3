//! Foreman gateway: the authenticated HTTP surface.
//!
//! A thin axum adapter over [`foreman_runtime::Engine`]: bearer-token
//! authentication, request parsing, and the mapping of engine errors onto
//! HTTP status codes. Everything else (the protocol, the gates, the
//! journal) lives below.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check; always `200 OK`, unauthenticated. |
//! | `POST` | `/api/v1/sessions` | Create a session. |
//! | `GET`  | `/api/v1/sessions/{id}` | Fetch a session. |
//! | `POST` | `/api/v1/sessions/{id}/stop` | Cancel a session. |
//! | `POST` | `/api/v1/sessions/{id}/plans/import` | Import a plan version. |
//! | `GET`  | `/api/v1/sessions/{id}/plans/{v}` | Fetch a plan with steps. |
//! | `POST` | `/api/v1/sessions/{id}/plans/{v}/approve` | Approve a plan. |
//! | `POST` | `/api/v1/sessions/{id}/steps/{sid}/approve` | Approve a step. |
//! | `POST` | `/api/v1/sessions/{id}/steps/{sid}/execute` | Execute a step. |
//! | `GET`  | `/api/v1/sessions/{id}/events/search?q=` | Search the journal. |
//! | `GET`  | `/api/v1/sessions/{id}/artifacts` | List artifacts. |
//! | `GET`  | `/api/v1/tools` | List the tool registry. |
//! | `GET`  | `/api/v1/tools/{name}/permissions` | Tool permission profile. |

pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use server::{build_router, serve};
pub use state::AppState;
