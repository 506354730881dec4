// handlers/protected/mod.rs - Handlers behind the identity middleware
//
// Route Prefix: /api/*

pub mod auth;
pub mod data;
pub mod describe;
pub mod find;
