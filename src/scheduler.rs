use std::cell::{Cell, RefCell};

use fxhash::{FxHashMap, FxHashSet};

use crate::error::{handle_error, warn};
use crate::watcher::Watcher;

const MAX_CIRCULAR: u32 = 100;

thread_local! {
	static QUEUE: RefCell<Vec<Watcher>> = RefCell::new(Vec::new());
	static QUEUED_IDS: RefCell<FxHashSet<u64>> = RefCell::new(FxHashSet::default());
	static CIRCULAR: RefCell<FxHashMap<u64, u32>> = RefCell::new(FxHashMap::default());
	static FLUSHING: Cell<bool> = Cell::new(false);
	static FLUSH_INDEX: Cell<usize> = Cell::new(0);
	static BATCH_DEPTH: Cell<usize> = Cell::new(0);
}

pub fn in_batch() -> bool {
	BATCH_DEPTH.with(|depth| depth.get()) > 0
}

/// Coalesce writes: watchers queued inside the closure run at most once,
/// after it returns. Batches nest; only the outermost flushes. The depth is
/// restored on unwind, so a panicking closure does not wedge later writes.
pub fn batch(func: impl FnOnce()) {
	BATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
	let guard = DepthGuard;
	func();
	drop(guard);
	if !in_batch() && !FLUSHING.with(|flag| flag.get()) {
		flush_queue();
	}
}

struct DepthGuard;

impl Drop for DepthGuard {
	fn drop(&mut self) {
		BATCH_DEPTH.with(|depth| depth.set(depth.get() - 1));
	}
}

/// Queue a watcher for the next flush, deduplicated by id. Outside a batch
/// the queue drains immediately; during a flush the watcher is spliced into
/// the unflushed tail by id.
pub(crate) fn queue_watcher(watcher: &Watcher) {
	let id = watcher.id();
	let fresh = QUEUED_IDS.with(|ids| ids.borrow_mut().insert(id));
	if !fresh {
		return;
	}
	if FLUSHING.with(|flag| flag.get()) {
		QUEUE.with(|queue| {
			let mut queue = queue.borrow_mut();
			let start = FLUSH_INDEX.with(|index| index.get()) + 1;
			let mut pos = queue.len();
			while pos > start && queue[pos - 1].id() > id {
				pos -= 1;
			}
			let pos = pos.min(queue.len());
			queue.insert(pos, watcher.clone());
		});
		return;
	}
	QUEUE.with(|queue| queue.borrow_mut().push(watcher.clone()));
	if !in_batch() {
		flush_queue();
	}
}

/// Run every queued watcher in ascending creation order, so computations
/// created earlier settle before the watchers built on top of them.
fn flush_queue() {
	if FLUSHING.with(|flag| flag.get()) {
		return;
	}
	FLUSHING.with(|flag| flag.set(true));
	QUEUE.with(|queue| queue.borrow_mut().sort_by_key(Watcher::id));
	let mut index = 0;
	loop {
		let next = QUEUE.with(|queue| queue.borrow().get(index).cloned());
		let Some(watcher) = next else {
			break;
		};
		FLUSH_INDEX.with(|slot| slot.set(index));
		index += 1;
		let id = watcher.id();
		// allow the watcher to re-queue itself, subject to the circular guard
		QUEUED_IDS.with(|ids| ids.borrow_mut().remove(&id));
		let runs = CIRCULAR.with(|circular| {
			let mut circular = circular.borrow_mut();
			let count = circular.entry(id).or_insert(0);
			*count += 1;
			*count
		});
		if runs > MAX_CIRCULAR {
			warn(&format!(
				"possible infinite update loop in watcher \"{}\"",
				watcher.body.expression()
			));
			continue;
		}
		if let Err(err) = watcher.body.run() {
			let owner = watcher.body.owner();
			let context = format!("watcher \"{}\"", watcher.body.expression());
			handle_error(&err, owner.as_ref(), &context);
		}
	}
	QUEUE.with(|queue| queue.borrow_mut().clear());
	QUEUED_IDS.with(|ids| ids.borrow_mut().clear());
	CIRCULAR.with(|circular| circular.borrow_mut().clear());
	FLUSH_INDEX.with(|slot| slot.set(0));
	FLUSHING.with(|flag| flag.set(false));
}
