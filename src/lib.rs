pub mod api;
pub mod backend;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod observability;
pub mod state;
