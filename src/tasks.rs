use crate::{addon::WorkshopItem, workshop::WorkshopResolver};
use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

pub const RESOLVE_WORKERS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub enum TaskMessage<P, T> {
    Progress(P),
    Finished(T),
    Failed(String),
}

#[derive(Debug)]
pub enum TaskOutcome<T> {
    Finished(T),
    Cancelled,
    Failed(String),
}

pub struct Task<P, T> {
    rx: Receiver<TaskMessage<P, T>>,
    cancel: CancelFlag,
    handle: Option<JoinHandle<()>>,
}

impl<P, T> Task<P, T>
where
    P: Send + 'static,
    T: Send + 'static,
{
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce(&dyn Fn(P), &CancelFlag) -> anyhow::Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let handle = thread::spawn(move || {
            let progress_tx = tx.clone();
            let report = move |progress: P| {
                let _ = progress_tx.send(TaskMessage::Progress(progress));
            };
            match work(&report, &flag) {
                Ok(value) => {
                    let _ = tx.send(TaskMessage::Finished(value));
                }
                Err(err) => {
                    let _ = tx.send(TaskMessage::Failed(format!("{err:#}")));
                }
            }
        });
        Self {
            rx,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn wait(mut self, mut on_progress: impl FnMut(P)) -> TaskOutcome<T> {
        let mut outcome = None;
        for message in self.rx.iter() {
            match message {
                TaskMessage::Progress(progress) => on_progress(progress),
                TaskMessage::Finished(value) => {
                    outcome = Some(TaskOutcome::Finished(value));
                    break;
                }
                TaskMessage::Failed(_) if self.cancel.is_cancelled() => {
                    outcome = Some(TaskOutcome::Cancelled);
                    break;
                }
                TaskMessage::Failed(error) => {
                    outcome = Some(TaskOutcome::Failed(error));
                    break;
                }
            }
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() && outcome.is_none() {
                return TaskOutcome::Failed("task panicked".to_string());
            }
        }
        outcome.unwrap_or_else(|| TaskOutcome::Failed("task ended without a result".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub resolved: Vec<WorkshopItem>,
    pub not_found: Vec<String>,
    pub failed: Vec<ResolveFailure>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.resolved.len() + self.not_found.len() + self.failed.len()
    }
}

enum ItemOutcome {
    Resolved(WorkshopItem),
    NotFound,
    Failed(String),
}

pub fn resolve_batch(
    ids: &[String],
    workers: usize,
    resolver: &dyn WorkshopResolver,
    cancel: &CancelFlag,
    on_progress: &mut dyn FnMut(usize, usize),
) -> BatchReport {
    let total = ids.len();
    let queue: Mutex<VecDeque<(usize, &str)>> =
        Mutex::new(ids.iter().map(String::as_str).enumerate().collect());
    let (tx, rx) = mpsc::channel::<(usize, ItemOutcome)>();
    let mut outcomes: Vec<(usize, ItemOutcome)> = Vec::with_capacity(total);

    thread::scope(|scope| {
        for _ in 0..workers.clamp(1, total.max(1)) {
            let tx = tx.clone();
            let queue = &queue;
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = match queue.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => None,
                };
                let Some((idx, id)) = next else {
                    break;
                };
                let outcome = match resolver.resolve_by_id(id) {
                    Ok(Some(item)) => ItemOutcome::Resolved(item),
                    Ok(None) => ItemOutcome::NotFound,
                    Err(err) => ItemOutcome::Failed(format!("{err:#}")),
                };
                if tx.send((idx, outcome)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        for message in rx.iter() {
            outcomes.push(message);
            on_progress(outcomes.len(), total);
        }
    });

    outcomes.sort_by_key(|(idx, _)| *idx);
    let mut report = BatchReport {
        cancelled: cancel.is_cancelled() && outcomes.len() < total,
        ..BatchReport::default()
    };
    for (idx, outcome) in outcomes {
        match outcome {
            ItemOutcome::Resolved(item) => report.resolved.push(item),
            ItemOutcome::NotFound => report.not_found.push(ids[idx].clone()),
            ItemOutcome::Failed(error) => report.failed.push(ResolveFailure {
                id: ids[idx].clone(),
                error,
            }),
        }
    }
    tracing::debug!(
        resolved = report.resolved.len(),
        not_found = report.not_found.len(),
        failed = report.failed.len(),
        "batch resolution finished"
    );
    report
}
