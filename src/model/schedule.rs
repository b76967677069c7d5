use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cron-driven synthetic invocation of a command string, as though
/// typed by `username` in `channel_id` on `adapter`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub schedule_id: Uuid,
    pub cron_expression: String,
    pub command_string: String,
    pub adapter: String,
    pub channel_id: String,
    pub user_id: String,
    pub user_email: String,
    pub username: String,
}
