//! HTTP layer: routes, handlers and DTOs for the `/sunray-srvr/v1` surface.

pub mod dto;
pub mod handlers;
pub mod routes;
