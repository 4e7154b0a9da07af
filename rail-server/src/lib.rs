//! Rail traffic data API.
//!
//! An HTTP service exposing SNCF network data (stations, lines, trains and
//! disruption alerts). Every API request is authenticated with a bearer JWT
//! checked against the identity provider's published keys, rate limited per
//! subject, and recorded in an audit trail.

pub mod audit;
pub mod auth;
pub mod config;
pub mod domain;
pub mod limit;
pub mod store;
pub mod upstream;
pub mod web;
