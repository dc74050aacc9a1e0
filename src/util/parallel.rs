use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Runs `body` for every index in `0..count` across worker threads.
///
/// Indices are handed out through a shared atomic cursor, so the split adapts to
/// uneven per-index cost. Workers are pinned to cores when the core list is
/// available, falling back to an unpinned `num_cpus`-sized pool otherwise.
/// Returns once every index has been processed.
pub fn parallel_for_indices<F>(count: usize, body: F)
where
    F: Fn(usize, usize) + Sync,
{
    if count == 0 {
        return;
    }

    let cores = core_affinity::get_core_ids().unwrap_or_default();
    let worker_count = if cores.is_empty() {
        num_cpus::get()
    } else {
        cores.len()
    }
    .min(count)
    .max(1);

    let next_index = AtomicUsize::new(0);
    let next_index = &next_index;
    let body = &body;

    thread::scope(|scope| {
        for worker_id in 0..worker_count {
            let core = cores.get(worker_id).copied();
            scope.spawn(move || {
                if let Some(core) = core {
                    core_affinity::set_for_current(core);
                }

                loop {
                    let index = next_index.fetch_add(1, Ordering::AcqRel);
                    if index >= count {
                        break;
                    }
                    body(worker_id, index);
                }
            });
        }
    });
}
