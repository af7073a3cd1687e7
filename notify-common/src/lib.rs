pub mod metrics;
pub mod pipeline;
pub mod task;
