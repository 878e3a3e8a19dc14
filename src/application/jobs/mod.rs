mod context;
mod queue;
mod render;

pub use context::{RenderWorkerContext, job_failed};
pub use queue::{RenderTaskRequest, TaskQueue};
pub use render::{RENDER_JOB_TYPE, RenderJobPayload, process_render_job};
