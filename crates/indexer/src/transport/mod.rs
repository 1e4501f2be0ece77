//! Transports fronting the query facade.
//!
//! Both surfaces are thin: validate what only the transport can see (path
//! and query parameter shapes), delegate to [`crate::QueryService`], and map
//! the error taxonomy onto wire status codes.

pub mod grpc;
pub mod http;
