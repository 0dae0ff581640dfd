pub mod auth;

pub use auth::{identity_middleware, Actor, Role};
