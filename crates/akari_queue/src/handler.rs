use crate::{Request, Response};

/// Executes requests on worker threads.
///
/// Handlers never get access to the consumer's state; everything they need has to travel
/// inside the request payload.
pub trait RequestHandler<Req, Res>: Send + Sync + 'static {
    fn can_handle(&self, _request: &Request<Req>) -> bool {
        true
    }
    fn handle_request(&self, request: &Request<Req>) -> anyhow::Result<Res>;
}

/// Consumes finished requests on the thread that drains the queue
pub trait ResponseHandler<Req, Res> {
    fn can_handle(&self, _response: &Response<Req, Res>) -> bool {
        true
    }
    fn handle_response(&mut self, response: Response<Req, Res>);
}
