//! Owns the set of active cron entries; at each tick, synthesizes a
//! chat event into the Router (§4.7).

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule as CronSchedule;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::{AdapterEvent, EventKind};
use crate::error::GortError;
use crate::model::schedule::Schedule;
use crate::persistence::Persistence;
use crate::router::Router;

const CHECK_INTERVAL: Duration = Duration::from_secs(1);

struct TrackedSchedule {
    last_fired: chrono::DateTime<Utc>,
}

/// Drives the cron tick loop. Missed ticks during downtime are not
/// replayed: a schedule's tracked `last_fired` jumps straight to the
/// most recent boundary on the tick that notices it, rather than
/// firing once per skipped boundary. Overlap is prevented per
/// schedule, not globally: a schedule whose prior synthesized request
/// hasn't completed is skipped on its next boundary.
pub struct Scheduler {
    persistence: Arc<dyn Persistence>,
    router: Arc<Router>,
    tracked: Mutex<HashMap<Uuid, TrackedSchedule>>,
    running: Arc<Mutex<HashSet<Uuid>>>,
}

impl Scheduler {
    pub fn new(persistence: Arc<dyn Persistence>, router: Arc<Router>) -> Self {
        Self {
            persistence,
            router,
            tracked: Mutex::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(CHECK_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                warn!("scheduler tick failed: {e}");
            }
        }
    }

    async fn tick(&self) -> Result<(), GortError> {
        let schedules = self.persistence.schedules_all().await?;
        let now = Utc::now();
        let mut tracked = self.tracked.lock().await;

        // Drop tracking for schedules that no longer exist.
        let live_ids: HashSet<Uuid> = schedules.iter().map(|s| s.schedule_id).collect();
        tracked.retain(|id, _| live_ids.contains(id));

        for schedule in schedules {
            let cron_expr = normalize_cron(&schedule.cron_expression);
            let parsed = match CronSchedule::from_str(&cron_expr) {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        "schedule {} has an invalid cron expression {:?}: {e}",
                        schedule.schedule_id, schedule.cron_expression
                    );
                    continue;
                }
            };

            let entry = tracked
                .entry(schedule.schedule_id)
                .or_insert(TrackedSchedule { last_fired: now });

            let due = parsed
                .after(&entry.last_fired)
                .take_while(|t| *t <= now)
                .last();

            let Some(fire_time) = due else { continue };
            // Jump straight to the most recent boundary: any earlier
            // missed boundaries are not replayed.
            entry.last_fired = fire_time;

            if self.running.lock().await.contains(&schedule.schedule_id) {
                debug!("schedule {} still running, skipping this tick", schedule.schedule_id);
                continue;
            }

            self.dispatch(schedule);
        }
        Ok(())
    }

    fn dispatch(&self, schedule: Schedule) {
        let router = self.router.clone();
        let running = self.running.clone();
        let schedule_id = schedule.schedule_id;
        tokio::spawn(async move {
            running.lock().await.insert(schedule_id);
            let event = AdapterEvent {
                channel: schedule.channel_id.clone(),
                provider_user_id: schedule.user_id.clone(),
                text: schedule.command_string.clone(),
                kind: EventKind::MessageChannel,
            };
            router.handle(&schedule.adapter, event).await;
            running.lock().await.remove(&schedule_id);
        });
    }

    pub async fn create(&self, schedule: Schedule) -> Result<Uuid, GortError> {
        self.persistence.schedule_create(schedule).await
    }

    pub async fn delete(&self, schedule_id: Uuid) -> Result<(), GortError> {
        self.tracked.lock().await.remove(&schedule_id);
        self.persistence.schedule_delete(schedule_id).await
    }
}

/// The `cron` crate requires a leading seconds field; §6 permits a
/// plain 5-field expression, defaulting seconds to `0`.
fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_five_field_cron() {
        assert_eq!(normalize_cron("*/1 * * * *"), "0 */1 * * * *");
    }

    #[test]
    fn leaves_six_field_cron_untouched() {
        assert_eq!(normalize_cron("0 */1 * * * *"), "0 */1 * * * *");
    }
}
