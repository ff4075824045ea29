use std::collections::{HashSet, VecDeque};

use pulse_core::Priority;

use crate::types::{ProcessingTask, TaskId};

/// Pick up to `batch_size` tasks from `queue`.
///
/// On a priority cycle, high-priority tasks fill the batch first (in queue
/// order) and the remaining slots are backfilled from the rest of the queue
/// in queue order. Otherwise the head of the queue is taken as is.
pub(super) fn select_batch(
    queue: &VecDeque<ProcessingTask>,
    batch_size: usize,
    priority_cycle: bool,
) -> Vec<ProcessingTask> {
    if !priority_cycle {
        return queue.iter().take(batch_size).cloned().collect();
    }

    let mut batch: Vec<ProcessingTask> = queue
        .iter()
        .filter(|t| t.priority == Priority::High)
        .take(batch_size)
        .cloned()
        .collect();
    let picked: HashSet<TaskId> = batch.iter().map(|t| t.id).collect();
    let remaining = batch_size - batch.len();
    batch.extend(
        queue
            .iter()
            .filter(|t| !picked.contains(&t.id))
            .take(remaining)
            .cloned(),
    );
    batch
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::types::TaskType;

    fn queue(priorities: &[Priority]) -> VecDeque<ProcessingTask> {
        let now = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        priorities
            .iter()
            .map(|p| ProcessingTask::new(TaskType::ProximityEvent, serde_json::Value::Null, *p, now))
            .collect()
    }

    fn priorities(batch: &[ProcessingTask]) -> Vec<Priority> {
        batch.iter().map(|t| t.priority).collect()
    }

    #[test]
    fn plain_cycle_takes_queue_head() {
        use Priority::*;
        let q = queue(&[Low, Medium, High, Low]);
        let batch = select_batch(&q, 2, false);
        assert_eq!(priorities(&batch), vec![Low, Medium]);
        assert_eq!(batch[0].id, q[0].id);
    }

    #[test]
    fn priority_cycle_puts_high_first_then_backfills_in_order() {
        use Priority::*;
        let q = queue(&[Low, High, Medium, High, Low]);
        let batch = select_batch(&q, 4, true);
        assert_eq!(priorities(&batch), vec![High, High, Low, Medium]);
        assert_eq!(batch[2].id, q[0].id);
    }

    #[test]
    fn priority_cycle_caps_high_at_batch_size() {
        use Priority::*;
        let q = queue(&[High, High, High, Low]);
        let batch = select_batch(&q, 2, true);
        assert_eq!(priorities(&batch), vec![High, High]);
    }

    #[test]
    fn small_queue_yields_whole_queue() {
        use Priority::*;
        let q = queue(&[Medium, Low]);
        assert_eq!(select_batch(&q, 10, true).len(), 2);
        assert_eq!(select_batch(&q, 10, false).len(), 2);
    }
}
