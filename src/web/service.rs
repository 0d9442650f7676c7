//! Tower service in front of [`WebHandler`], picking up the request's session

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use tower::Service;
use tower_sessions::Session;
use tracing::error;

use crate::error::GatewayError;
use crate::web::handlers::WebHandler;

#[derive(Clone)]
pub struct WebService {
    web_handler: Arc<WebHandler>,
}

impl WebService {
    pub fn new(web_handler: Arc<WebHandler>) -> Self {
        Self { web_handler }
    }
}

impl Service<Request<Incoming>> for WebService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let handler = self.web_handler.clone();

        Box::pin(async move {
            // Inserted by SessionManagerLayer
            let Some(session) = req.extensions().get::<Session>().cloned() else {
                error!(
                    method = %req.method(),
                    path = req.uri().path(),
                    "Session not found in request extensions"
                );
                let err = GatewayError::Session("Session layer is not configured".to_string());
                return Ok(err.into());
            };

            handler.handle_request(req, session).await
        })
    }
}
