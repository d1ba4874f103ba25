mod health;
mod scheduler;
mod workflows;

pub use health::health_handler;
pub use scheduler::{scheduler_start_handler, scheduler_status_handler, scheduler_stop_handler};
pub use workflows::{execute_workflow_handler, get_job_handler, list_workflows_handler};
