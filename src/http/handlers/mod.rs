//! Request handlers for the northbound API
//!
//! Thin layers over the repository ports and the transport broker; all
//! cross-cutting enforcement happens in the middleware chain.

pub mod api_keys;
pub mod audit;
pub mod auth;
pub mod gateway;
pub mod namespaces;
pub mod servers;
pub mod users;
