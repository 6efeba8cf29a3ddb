//! Request dispatch context of a module.

use crate::protocol::{RequestMessage, ResponseMessage, StatusCode};

/// Handles requests the gateway forwards to this module.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, request: RequestMessage) -> ResponseMessage;
}

impl<F> Dispatch for F
where
    F: Fn(RequestMessage) -> ResponseMessage + Send + Sync,
{
    fn dispatch(&self, request: RequestMessage) -> ResponseMessage {
        self(request)
    }
}

/// Dispatch for modules that serve no requests. Answers DISPATCH_FAILED.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDispatch;

impl Dispatch for NoDispatch {
    fn dispatch(&self, mut request: RequestMessage) -> ResponseMessage {
        request.fail_with(StatusCode::DispatchFailed)
    }
}
