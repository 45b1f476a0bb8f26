use std::{path::PathBuf, sync::Arc};

use akari_queue::{Request, RequestHandler};

use crate::{Resource, Serializer};

#[derive(Debug)]
pub enum ResourceRequest {
    Load { path: PathBuf },
}

pub enum ResourceResponse {
    Loaded(Box<dyn Resource>),
}

/// Decodes resource files on the work queue's workers
pub struct LoadRequestHandler {
    serializer: Arc<dyn Serializer>,
}

impl LoadRequestHandler {
    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self { serializer }
    }
}

impl RequestHandler<ResourceRequest, ResourceResponse> for LoadRequestHandler {
    fn handle_request(
        &self,
        request: &Request<ResourceRequest>,
    ) -> anyhow::Result<ResourceResponse> {
        match request.payload() {
            ResourceRequest::Load { path } => {
                log::debug!("Decoding {:?} (request {})", path, request.id());
                let resource = self.serializer.decode(path)?;

                Ok(ResourceResponse::Loaded(resource))
            }
        }
    }
}
