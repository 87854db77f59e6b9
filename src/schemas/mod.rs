//! Request / response types for the JSON API.

pub mod auth;
pub mod chat;
