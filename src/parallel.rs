//! Fixed-size worker pool for fanning independent tasks out over threads.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{bounded, unbounded};
use log::debug;

use crate::common::{Result, StrataError, MAX_WORKER_NUM};

/// A unit of work handed to [`parallel_compute`].
pub type Task<'a, T> = Box<dyn FnOnce() -> Result<T> + Send + 'a>;

/// Runs `tasks` on `worker_num` threads and returns their results in task
/// order. A task that panics is reported as [`StrataError::Worker`]; the
/// first failing task's error is returned after every worker has finished.
pub fn parallel_compute<'a, T: Send>(worker_num: usize, tasks: Vec<Task<'a, T>>) -> Result<Vec<T>> {
    if worker_num == 0 || worker_num > MAX_WORKER_NUM {
        return Err(StrataError::Worker(format!(
            "worker count {} outside 1..={}",
            worker_num, MAX_WORKER_NUM
        )));
    }
    let task_count = tasks.len();
    if task_count == 0 {
        return Ok(Vec::new());
    }
    let workers = worker_num.min(task_count);
    debug!("running {} tasks on {} workers", task_count, workers);

    let (task_tx, task_rx) = bounded::<(usize, Task<'a, T>)>(task_count);
    let (result_tx, result_rx) = unbounded::<(usize, Result<T>)>();
    for job in tasks.into_iter().enumerate() {
        // Capacity equals the task count, so this never blocks.
        let _ = task_tx.send(job);
    }
    drop(task_tx);

    thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                while let Ok((index, task)) = task_rx.recv() {
                    let result = panic::catch_unwind(AssertUnwindSafe(task))
                        .unwrap_or_else(|_| {
                            Err(StrataError::Worker(format!("task {} panicked", index)))
                        });
                    if result_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut slots: Vec<Option<Result<T>>> = (0..task_count).map(|_| None).collect();
    for (index, result) in result_rx.iter() {
        slots[index] = Some(result);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| Err(StrataError::Worker(format!("task {} lost", index))))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_results_keep_task_order() {
        let tasks: Vec<Task<'_, usize>> = (0..50)
            .map(|i| Box::new(move || -> Result<usize> { Ok(i * i) }) as Task<'_, usize>)
            .collect();
        let results = parallel_compute(8, tasks).unwrap();
        assert_eq!(results, (0..50).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_tasks_may_borrow() {
        let counter = AtomicUsize::new(0);
        let tasks: Vec<Task<'_, ()>> = (0..20)
            .map(|_| {
                Box::new(|| -> Result<()> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as Task<'_, ()>
            })
            .collect();
        parallel_compute(4, tasks).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_failures_are_reported() {
        let tasks: Vec<Task<'_, u32>> = vec![
            Box::new(|| -> Result<u32> { Ok(1) }) as Task<'_, u32>,
            Box::new(|| -> Result<u32> { Err(StrataError::KeyNotFound(7)) }) as Task<'_, u32>,
            Box::new(|| -> Result<u32> { panic!("boom") }) as Task<'_, u32>,
        ];
        assert!(matches!(
            parallel_compute(2, tasks),
            Err(StrataError::KeyNotFound(7))
        ));
    }

    #[test]
    fn test_worker_count_bounds() {
        let empty: Vec<Task<'_, ()>> = Vec::new();
        assert!(parallel_compute(1, empty).unwrap().is_empty());
        let tasks: Vec<Task<'_, ()>> = vec![Box::new(|| -> Result<()> { Ok(()) }) as Task<'_, ()>];
        assert!(matches!(
            parallel_compute(MAX_WORKER_NUM + 1, tasks),
            Err(StrataError::Worker(_))
        ));
    }
}
