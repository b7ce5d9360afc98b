use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};

use crate::model::Verdict;

/// A submission waiting to be judged
#[derive(Debug)]
pub struct JudgeTask {
    pub submission_id: i64,
    /// Receives the final verdict, if anyone is waiting for it
    pub responder: Option<oneshot::Sender<Verdict>>,
}

impl JudgeTask {
    pub fn fire_and_forget(submission_id: i64) -> Self {
        Self {
            submission_id,
            responder: None,
        }
    }

    /// A task together with the receiver its verdict will arrive on
    pub fn blocking(submission_id: i64) -> (Self, oneshot::Receiver<Verdict>) {
        let (tx, rx) = oneshot::channel();
        let task = Self {
            submission_id,
            responder: Some(tx),
        };
        (task, rx)
    }
}

/// The rejected task is handed back to the caller
#[derive(Debug, thiserror::Error)]
#[error("judge queue is full, submission {} rejected", .0.submission_id)]
pub struct QueueFull(pub JudgeTask);

/// Bounded FIFO shared between intake and the judging workers
pub struct JudgeQueue {
    queue: Mutex<VecDeque<JudgeTask>>,
    notify: Notify,
    capacity: usize,
}

impl JudgeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn push(&self, task: JudgeTask) -> Result<(), QueueFull> {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                return Err(QueueFull(task));
            }
            queue.push_back(task);
        }
        self.notify.notify_one();
        Ok(())
    }

    pub async fn pop(&self) -> JudgeTask {
        loop {
            let task = self.queue.lock().pop_front();
            if let Some(task) = task {
                return task;
            }
            self.notify.notified().await;
        }
    }

    /// Removes a task that has not been picked up yet
    pub fn cancel(&self, submission_id: i64) -> bool {
        let mut queue = self.queue.lock();
        let before_len = queue.len();
        queue.retain(|t| t.submission_id != submission_id);
        before_len != queue.len()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn rejects_beyond_capacity() {
        let queue = JudgeQueue::new(2);
        queue.push(JudgeTask::fire_and_forget(1)).unwrap();
        queue.push(JudgeTask::fire_and_forget(2)).unwrap();

        let QueueFull(task) = queue.push(JudgeTask::fire_and_forget(3)).unwrap_err();
        assert_eq!(task.submission_id, 3);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let queue = JudgeQueue::new(4);
        for id in 1..=3 {
            queue.push(JudgeTask::fire_and_forget(id)).unwrap();
        }
        assert!(queue.cancel(2));
        assert!(!queue.cancel(2));

        assert_eq!(queue.pop().await.submission_id, 1);
        assert_eq!(queue.pop().await.submission_id, 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(JudgeQueue::new(1));
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop().await.submission_id }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(JudgeTask::fire_and_forget(7)).unwrap();

        let id = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, 7);
    }
}
