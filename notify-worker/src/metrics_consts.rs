pub const MESSAGES_RECEIVED: &str = "notify_worker_messages_received";
pub const EMPTY_MESSAGES: &str = "notify_worker_empty_messages";
pub const MESSAGE_PARSE_ERROR: &str = "notify_worker_message_parse_error";
pub const TASKS_RECEIVED: &str = "notify_worker_tasks_received";
pub const TASKS_REJECTED: &str = "notify_worker_tasks_rejected";
pub const TASKS_WITHOUT_RECEIVERS: &str = "notify_worker_tasks_without_receivers";
pub const CONTENT_DROPPED: &str = "notify_worker_content_dropped";
pub const TASKS_COMPLETED: &str = "notify_worker_tasks_completed";
pub const TASKS_STOPPED: &str = "notify_worker_tasks_stopped";
pub const TASKS_FAILED: &str = "notify_worker_tasks_failed";
pub const TASKS_PANICKED: &str = "notify_worker_tasks_panicked";

pub const WORKER_BLOCKED: &str = "notify_worker_pool_blocked";
pub const CALLER_RUNS: &str = "notify_worker_pool_caller_runs";
pub const WORKERS_SPAWNED: &str = "notify_worker_pool_workers_spawned";
pub const WORKERS_RETIRED: &str = "notify_worker_pool_workers_retired";
pub const WORKERS_LIVE: &str = "notify_worker_pool_workers_live";

pub const QUIET_HOURS_BLOCKED: &str = "notify_worker_quiet_hours_blocked";
pub const FREQUENCY_LIMITED: &str = "notify_worker_frequency_limited_receivers";
pub const FREQUENCY_STORE_ERRORS: &str = "notify_worker_frequency_store_errors";
pub const DEDUP_SUPPRESSED: &str = "notify_worker_dedup_suppressed_receivers";
pub const DEDUP_STORE_ERRORS: &str = "notify_worker_dedup_store_errors";
pub const CONTENT_MASKED: &str = "notify_worker_content_masked";
pub const DISPATCH_RESULT: &str = "notify_worker_dispatch_result";
pub const DISPATCH_UNROUTABLE: &str = "notify_worker_dispatch_unroutable";
