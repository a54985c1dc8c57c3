//! Periodic producer that turns due graduation checks into email
//! notifications.
//!
//! Exactly one instance should run per deployment; a second replica would
//! send every notice twice. The toggle for that lives in configuration.

use std::sync::Arc;

use tokio::{sync::watch, time::Duration};
use tracing::{error, info, warn};

use crate::{
    clients::task_api::TaskApi,
    config::Config,
    error::ApiError,
    models::{
        email::EmailNotification,
        task::{TaskStatus, TimeRange, UserTask},
    },
    publisher::NotificationPublisher,
    utils::shutdown_requested_within,
};

const GRADUATION_SUBJECT: &str = "You are expected to graduate";

#[derive(Debug, Clone)]
pub struct GraduationSchedule {
    pub startup_delay: Duration,
    pub interval: Duration,
    pub lookback: Duration,
}

impl GraduationSchedule {
    pub fn from_config(config: &Config) -> Self {
        Self {
            startup_delay: config.graduation_startup_delay(),
            interval: config.graduation_interval(),
            lookback: config.graduation_lookback(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub due: usize,
    pub skipped: usize,
    pub published: usize,
    pub marked: usize,
    pub failed: usize,
}

pub struct GraduationWorker {
    task_api: Arc<dyn TaskApi>,
    publisher: NotificationPublisher,
    schedule: GraduationSchedule,
}

impl GraduationWorker {
    pub fn new(
        task_api: Arc<dyn TaskApi>,
        publisher: NotificationPublisher,
        schedule: GraduationSchedule,
    ) -> Self {
        Self {
            task_api,
            publisher,
            schedule,
        }
    }

    /// Runs until shutdown and returns the number of completed iterations.
    ///
    /// Shutdown is observed before every iteration and while waiting between
    /// them; an iteration that has started is always finished. Upstream
    /// failures are logged and retried on the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            startup_delay_secs = self.schedule.startup_delay.as_secs(),
            interval_secs = self.schedule.interval.as_secs(),
            "Graduation worker started"
        );

        let mut iterations = 0;

        if shutdown_requested_within(self.schedule.startup_delay, &mut shutdown).await {
            info!("Graduation worker stopped before first run");
            return iterations;
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            iterations += 1;

            match self.run_once().await {
                Ok(report) => info!(
                    iteration = iterations,
                    due = report.due,
                    skipped = report.skipped,
                    published = report.published,
                    marked = report.marked,
                    failed = report.failed,
                    "Graduation check finished"
                ),
                Err(e) => error!(
                    iteration = iterations,
                    error = %e,
                    "CRITICAL: graduation check failed, retrying on next run"
                ),
            }

            if shutdown_requested_within(self.schedule.interval, &mut shutdown).await {
                break;
            }
        }

        info!(iterations, "Graduation worker stopped");
        iterations
    }

    /// One pass over the due tasks. Each task is published before it is
    /// marked handled, so a crash in between re-sends rather than loses it.
    pub async fn run_once(&self) -> Result<BatchReport, ApiError> {
        let range = TimeRange::ending_now(self.schedule.lookback);
        let tasks = self.task_api.get_due_tasks(&range).await?;

        let mut report = BatchReport {
            due: tasks.len(),
            ..BatchReport::default()
        };

        for task in &tasks {
            if task.status != TaskStatus::Pending {
                report.skipped += 1;
                continue;
            }

            let notice = graduation_notice(task);

            match self.publisher.publish_email(&notice).await {
                Ok(envelope) => {
                    report.published += 1;
                    info!(task_id = %task.id, envelope_id = %envelope.id, "Graduation notice published");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(task_id = %task.id, error = %e, "Failed to publish graduation notice");
                    continue;
                }
            }

            match self.task_api.mark_task_handled(&task.id).await {
                Ok(()) => report.marked += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        task_id = %task.id,
                        error = %e,
                        "Failed to mark task as notified, notice may be sent again"
                    );
                }
            }
        }

        Ok(report)
    }
}

pub fn graduation_notice(task: &UserTask) -> EmailNotification {
    let greeting = match &task.user.name {
        Some(name) => format!("Hi {},", name),
        None => "Hi,".to_string(),
    };
    let due = task.due_date.format("%B %-d, %Y");

    let text = format!(
        "{}\n\nOur records show that you are expected to graduate. \
         Please review your graduation requirements before {}.",
        greeting, due
    );
    let html = format!(
        "<p>{}</p><p>Our records show that you are expected to graduate. \
         Please review your graduation requirements before <strong>{}</strong>.</p>",
        greeting, due
    );

    EmailNotification::new(task.user.email.clone(), text)
        .with_subject(GRADUATION_SUBJECT)
        .with_html(html)
}
