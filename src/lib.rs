//! Drive portal gateway: signs users in with OIDC, maps them to tabs through a
//! static access policy, and proxies searches and uploads to the Google Drive
//! folder behind each tab.

pub mod access;
pub mod auth;
pub mod cli;
pub mod constants;
pub mod error;
pub mod logging;
pub mod server;
pub mod storage;
pub mod upload;
pub mod web;

#[cfg(test)]
mod tests;
