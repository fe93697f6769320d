//! Status - タスク状態の集計（レポート用）

use serde::{Deserialize, Serialize};

use crate::domain::{TaskRecord, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub created: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub retry_scheduled: usize,
}

impl StatusCounts {
    pub fn tally<'a, T: 'a>(records: impl IntoIterator<Item = &'a TaskRecord<T>>) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.add(record.status);
        }
        counts
    }

    pub fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Created => self.created += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::TimedOut => self.timed_out += 1,
            TaskStatus::RetryScheduled => self.retry_scheduled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created
            + self.running
            + self.succeeded
            + self.failed
            + self.timed_out
            + self.retry_scheduled
    }

    pub fn unfinished(&self) -> usize {
        self.created + self.running + self.retry_scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityCall, TaskId, Transition};
    use chrono::Utc;
    use serde_json::{Value, json};

    fn record(path: &[TaskStatus]) -> TaskRecord<Value> {
        let mut r = TaskRecord::new(
            TaskId::from_ulid(ulid::Ulid::new()),
            ActivityCall::new("a", json!({})),
            Utc::now(),
        );
        for status in path {
            r.apply(Transition::to(*status), Utc::now()).unwrap();
        }
        r
    }

    #[test]
    fn tally_counts_each_status() {
        let records = vec![
            record(&[]),
            record(&[TaskStatus::Running]),
            record(&[TaskStatus::Running, TaskStatus::Succeeded]),
            record(&[TaskStatus::Running, TaskStatus::Succeeded]),
            record(&[TaskStatus::Running, TaskStatus::RetryScheduled]),
            record(&[TaskStatus::Running, TaskStatus::TimedOut]),
            record(&[TaskStatus::Failed]),
        ];

        let counts = StatusCounts::tally(&records);
        assert_eq!(counts.created, 1);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.succeeded, 2);
        assert_eq!(counts.retry_scheduled, 1);
        assert_eq!(counts.timed_out, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 7);
        assert_eq!(counts.unfinished(), 3);
    }
}
