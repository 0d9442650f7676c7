pub mod handlers;
/// Request and response bodies for the JSON API
pub(crate) mod serde;
pub mod service;
/// Web templates
pub(crate) mod templates;
