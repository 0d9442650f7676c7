use askama::Template;

/// Error page template
#[derive(Template)]
#[template(path = "error.html")]
pub(crate) struct ErrorTemplate {
    pub(crate) error_message: String,
}

/// Landing page, the browser app takes over once `/api/user` says we're signed in
#[derive(Template, Default)]
#[template(path = "index.html")]
pub(crate) struct IndexTemplate {
    pub(crate) auth_url: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) demo_login_enabled: bool,
}
