//! The extension point of the relay.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Context;
use crate::protocol::{Request, Response};

/// Turns one client request into a response, usually by relaying it through the context's
/// backend connection.
///
/// The server writes the returned response and then drains whatever the handler left unread
/// of the request body before reading the next request. An error ends the session.
#[async_trait]
pub trait Handler: Send + Sync {
    type Error: Into<Box<dyn Error + Send + Sync>> + Send;

    async fn handle(&self, ctx: &mut Context, req: &mut Request) -> Result<Response, Self::Error>;
}

#[async_trait]
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    type Error = H::Error;

    async fn handle(&self, ctx: &mut Context, req: &mut Request) -> Result<Response, Self::Error> {
        (**self).handle(ctx, req).await
    }
}

#[async_trait]
impl<H> Handler for Box<H>
where
    H: Handler + ?Sized,
{
    type Error = H::Error;

    async fn handle(&self, ctx: &mut Context, req: &mut Request) -> Result<Response, Self::Error> {
        (**self).handle(ctx, req).await
    }
}
