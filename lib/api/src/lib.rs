//! Serving layer: the [`Recommender`] service and its REST routes.

pub mod rest;
pub mod service;

pub use rest::{routes, RestApi};
pub use service::{RecommendResponse, Recommender};
