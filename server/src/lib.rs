//! AuthCenter Server
//!
//! Central identity gateway: issues tokens, gates access to downstream
//! domains and keeps user state in sync across them.

pub mod access;
pub mod activity;
pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod domains;
pub mod ephemeral;
pub mod oauth;
pub mod ratelimit;
pub mod settings;
pub mod sync;
