//! Postboard - a blog-style content API
//!
//! Users authenticate with session tokens and manage their own tags,
//! topics and posts. Every read and write is scoped to the caller.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
