pub mod api;
pub mod auth;
pub mod config;
pub mod course;
pub mod db;
pub mod error;
pub mod progress;
pub mod purchase;
pub mod user;
pub mod utils;
