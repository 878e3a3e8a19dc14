use std::sync::Arc;

use crate::application::renders::RenderService;

#[derive(Clone)]
pub struct ApiState {
    pub renders: Arc<RenderService>,
}

impl ApiState {
    pub fn new(renders: Arc<RenderService>) -> Self {
        Self { renders }
    }
}
