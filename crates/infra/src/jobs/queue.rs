//! Named work queues over a hash-map service's list primitives.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::store::services::{HashService, ListEnd};

use super::dispatch::DispatchError;

const QUEUE_PREFIX: &str = "queue:";
const ARCHIVE_PREFIX: &str = "old";

/// A deferred method call: the method's registered name and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub method: String,
    pub params: JsonValue,
}

impl WorkItem {
    pub fn new(method: impl Into<String>, params: JsonValue) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

fn queue_key(queue: &str) -> Vec<u8> {
    format!("{QUEUE_PREFIX}{queue}").into_bytes()
}

/// Name of the queue an item from `queue` is archived to before it runs.
pub fn archive_queue(queue: &str) -> String {
    format!("{ARCHIVE_PREFIX}{queue}")
}

/// FIFO queues: normal items join the tail, urgent items the head, and
/// consumers always take from the head. Queues are unbounded.
#[derive(Debug, Clone)]
pub struct WorkQueue<H> {
    service: H,
}

impl<H> WorkQueue<H>
where
    H: HashService,
{
    pub fn new(service: H) -> Self {
        Self { service }
    }

    pub fn enqueue(&self, urgent: bool, queue: &str, item: &WorkItem) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(item).map_err(|e| DispatchError::Encode(e.to_string()))?;
        let end = if urgent { ListEnd::Head } else { ListEnd::Tail };
        self.service.push(&queue_key(queue), &payload, end)?;
        debug!(queue = %queue, method = %item.method, urgent, "work enqueued");
        Ok(())
    }

    /// Take the next item from the first non-empty queue in `queues`, waiting
    /// at most `timeout`. Returns the queue name with the item.
    pub fn dequeue(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, WorkItem)>, DispatchError> {
        let keys: Vec<Vec<u8>> = queues.iter().map(|q| queue_key(q)).collect();
        let Some((key, payload)) = self.service.blocking_pop(&keys, timeout)? else {
            return Ok(None);
        };
        let queue = String::from_utf8_lossy(&key[QUEUE_PREFIX.len()..]).into_owned();
        let item: WorkItem =
            serde_json::from_slice(&payload).map_err(|e| DispatchError::Encode(e.to_string()))?;
        Ok(Some((queue, item)))
    }

    /// Keep a copy of `item` at the head of `old<queue>` so it can be resubmitted.
    pub fn archive(&self, queue: &str, item: &WorkItem) -> Result<(), DispatchError> {
        self.enqueue(true, &archive_queue(queue), item)
    }

    pub fn len(&self, queue: &str) -> Result<usize, DispatchError> {
        Ok(self.service.list_len(&queue_key(queue))?)
    }

    pub fn is_empty(&self, queue: &str) -> Result<bool, DispatchError> {
        Ok(self.len(queue)? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::services::InMemoryHashService;
    use serde_json::json;

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normal_items_are_fifo_and_urgent_items_jump_ahead() {
        let q = WorkQueue::new(InMemoryHashService::new());
        q.enqueue(false, "default", &WorkItem::new("a", json!(1))).unwrap();
        q.enqueue(false, "default", &WorkItem::new("b", json!(2))).unwrap();
        q.enqueue(true, "default", &WorkItem::new("urgent", json!(0))).unwrap();

        let names = queues(&["default"]);
        let timeout = Duration::from_millis(10);
        let order: Vec<String> = std::iter::from_fn(|| q.dequeue(&names, timeout).unwrap())
            .map(|(_, item)| item.method)
            .collect();
        assert_eq!(order, vec!["urgent", "a", "b"]);
    }

    #[test]
    fn dequeue_reports_queue_name_and_times_out_empty() {
        let q = WorkQueue::new(InMemoryHashService::new());
        let names = queues(&["high", "low"]);
        assert_eq!(q.dequeue(&names, Duration::from_millis(5)).unwrap(), None);

        q.enqueue(false, "low", &WorkItem::new("m", json!({}))).unwrap();
        let (queue, item) = q.dequeue(&names, Duration::from_millis(5)).unwrap().unwrap();
        assert_eq!(queue, "low");
        assert_eq!(item.method, "m");
    }

    #[test]
    fn archive_goes_to_old_queue() {
        let q = WorkQueue::new(InMemoryHashService::new());
        q.archive("default", &WorkItem::new("m", json!({}))).unwrap();
        assert_eq!(q.len("olddefault").unwrap(), 1);
        assert!(q.is_empty("default").unwrap());
    }
}
