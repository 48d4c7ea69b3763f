use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::handle_error;
use crate::watcher::WatcherBody;

thread_local! {
	static NEXT_ID: Cell<u64> = Cell::new(0);
	static TARGETS: RefCell<Vec<Weak<WatcherBody>>> = RefCell::new(Vec::new());
}

/// Registry of watchers interested in one observable slot. Subscribers are
/// kept in registration order and appear at most once (the watcher-side id
/// guard in `WatcherBody::add_dep` enforces this).
#[derive(Clone)]
pub struct Dep {
	body: Rc<DepBody>,
}

struct DepBody {
	id: u64,
	subs: RefCell<Vec<Weak<WatcherBody>>>,
}

impl Dep {
	pub fn new() -> Self {
		let id = NEXT_ID.with(|next| {
			let id = next.get();
			next.set(id + 1);
			id
		});
		Dep {
			body: Rc::new(DepBody {
				id,
				subs: RefCell::new(Vec::new()),
			}),
		}
	}

	pub fn id(&self) -> u64 {
		self.body.id
	}

	pub(crate) fn add_sub(&self, watcher: Weak<WatcherBody>) {
		self.body.subs.borrow_mut().push(watcher);
	}

	pub(crate) fn remove_sub(&self, id: u64) {
		self.body.subs.borrow_mut().retain(|sub| match sub.upgrade() {
			Some(watcher) => watcher.id() != id,
			None => false,
		});
	}

	/// Register this dependency with the watcher currently evaluating, if any.
	pub fn depend(&self) {
		if let Some(watcher) = target() {
			watcher.add_dep(self);
		}
	}

	/// Invoke `update` on every live subscriber, in registration order. One
	/// failing reaction is reported and does not stop the pass.
	pub fn notify(&self) {
		let subs: Vec<Weak<WatcherBody>> = self.body.subs.borrow().clone();
		for sub in subs {
			if let Some(watcher) = sub.upgrade() {
				if let Err(err) = watcher.update() {
					let owner = watcher.owner();
					let context = format!("watcher \"{}\"", watcher.expression());
					handle_error(&err, owner.as_ref(), &context);
				}
			}
		}
	}
}

impl Default for Dep {
	fn default() -> Self {
		Dep::new()
	}
}

/// The watcher currently collecting dependencies, if any.
pub(crate) fn target() -> Option<Rc<WatcherBody>> {
	TARGETS
		.with(|stack| stack.borrow().last().cloned())
		.and_then(|weak| weak.upgrade())
}

pub(crate) fn target_active() -> bool {
	TARGETS.with(|stack| !stack.borrow().is_empty())
}

/// Scoped entry on the active-watcher stack. The slot is popped on drop, so
/// nested evaluations restore the outer watcher on every exit path.
pub(crate) struct TargetGuard;

impl TargetGuard {
	pub fn push(watcher: Weak<WatcherBody>) -> Self {
		TARGETS.with(|stack| stack.borrow_mut().push(watcher));
		TargetGuard
	}
}

impl Drop for TargetGuard {
	fn drop(&mut self) {
		TARGETS.with(|stack| {
			stack.borrow_mut().pop();
		});
	}
}
