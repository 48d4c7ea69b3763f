use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use fxhash::FxHashSet;

use crate::dep::{Dep, TargetGuard};
use crate::error::{handle_error, warn, Error};
use crate::instance::{Instance, InstanceBody};
use crate::scheduler::queue_watcher;
use crate::traverse::traverse;
use crate::value::{same_value, Value};

pub type Getter = Box<dyn Fn() -> Result<Value, Error>>;
pub type Callback = Box<dyn Fn(&Value, &Value) -> Result<(), Error>>;

thread_local! {
	static NEXT_ID: Cell<u64> = Cell::new(0);
}

/// What a watcher evaluates: a dotted path resolved against the owning
/// instance, or an arbitrary getter closure.
pub enum WatchSource {
	Path(String),
	Getter(Getter),
}

impl WatchSource {
	pub fn path(path: impl Into<String>) -> Self {
		WatchSource::Path(path.into())
	}

	pub fn getter(func: impl Fn() -> Result<Value, Error> + 'static) -> Self {
		WatchSource::Getter(Box::new(func))
	}
}

impl From<&str> for WatchSource {
	fn from(path: &str) -> Self {
		WatchSource::Path(path.to_string())
	}
}

impl From<String> for WatchSource {
	fn from(path: String) -> Self {
		WatchSource::Path(path)
	}
}

#[derive(Default, Clone, Copy)]
pub struct WatcherOptions {
	pub lazy: bool,
	pub sync: bool,
	pub user: bool,
	pub deep: bool,
}

impl WatcherOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Defer work on change: mark dirty, recompute on next read.
	pub fn lazy(mut self) -> Self {
		self.lazy = true;
		self
	}

	/// Re-run synchronously on change instead of going through the queue.
	pub fn sync(mut self) -> Self {
		self.sync = true;
		self
	}

	/// User-declared: evaluation errors are reported and isolated instead of
	/// propagated.
	pub fn user(mut self) -> Self {
		self.user = true;
		self
	}

	/// Traverse the evaluated value so nested mutations trigger too.
	pub fn deep(mut self) -> Self {
		self.deep = true;
		self
	}
}

/// A unit of reactive computation: an expression or getter, a cached value
/// and the set of dependencies read during the last evaluation.
#[derive(Clone)]
pub struct Watcher {
	pub(crate) body: Rc<WatcherBody>,
}

pub(crate) struct WatcherBody {
	id: u64,
	lazy: bool,
	sync: bool,
	user: bool,
	deep: bool,
	expression: String,
	owner: Option<Weak<InstanceBody>>,
	getter: Getter,
	callback: Option<Callback>,
	dirty: Cell<bool>,
	active: Cell<bool>,
	this: Weak<WatcherBody>,
	inner: RefCell<WatcherInner>,
}

struct WatcherInner {
	value: Value,
	deps: Vec<Dep>,
	dep_ids: FxHashSet<u64>,
	new_deps: Vec<Dep>,
	new_dep_ids: FxHashSet<u64>,
}

impl Watcher {
	pub fn new(
		owner: Option<&Instance>,
		source: WatchSource,
		callback: Option<Callback>,
		options: WatcherOptions,
	) -> Watcher {
		let (getter, expression) = match source {
			WatchSource::Getter(getter) => (getter, String::from("<function>")),
			WatchSource::Path(path) => {
				let getter = match owner {
					Some(instance) => path_getter(instance, &path),
					None => {
						warn(&format!(
							"path watcher \"{}\" needs an owner instance",
							path
						));
						Box::new(|| Ok(Value::Null)) as Getter
					}
				};
				(getter, path)
			}
		};
		let id = NEXT_ID.with(|next| {
			let id = next.get();
			next.set(id + 1);
			id
		});
		let body = Rc::new_cyclic(|this| WatcherBody {
			id,
			lazy: options.lazy,
			sync: options.sync,
			user: options.user,
			deep: options.deep,
			expression,
			owner: owner.map(Instance::downgrade),
			getter,
			callback,
			dirty: Cell::new(options.lazy),
			active: Cell::new(true),
			this: this.clone(),
			inner: RefCell::new(WatcherInner {
				value: Value::Null,
				deps: Vec::new(),
				dep_ids: FxHashSet::default(),
				new_deps: Vec::new(),
				new_dep_ids: FxHashSet::default(),
			}),
		});
		let watcher = Watcher { body };
		if let Some(instance) = owner {
			instance.register_watcher(&watcher);
		}
		if !watcher.body.lazy {
			// collect the initial dependency set now; an error here can only
			// come from a non-user getter and is reported, not propagated,
			// so construction never fails
			if let Err(err) = watcher.body.refresh_value() {
				let context = format!("getter for watcher \"{}\"", watcher.body.expression);
				handle_error(&err, watcher.body.owner().as_ref(), &context);
			}
		}
		watcher
	}

	pub fn id(&self) -> u64 {
		self.body.id
	}

	/// Cached result of the last evaluation.
	pub fn value(&self) -> Value {
		self.body.value()
	}

	pub fn dirty(&self) -> bool {
		self.body.dirty.get()
	}

	/// Lazy watchers only: recompute the cached value on demand.
	pub fn evaluate(&self) -> Result<(), Error> {
		self.body.evaluate()
	}

	/// Re-register every held dependency with the watcher currently
	/// collecting, so an outer computation subscribes through this one.
	pub fn depend(&self) {
		self.body.depend();
	}

	/// Remove this watcher from every dependency it holds. Idempotent; a
	/// torn-down watcher stays silent for any notify still in flight.
	pub fn teardown(&self) {
		self.body.teardown();
	}
}

impl WatcherBody {
	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	pub(crate) fn expression(&self) -> &str {
		&self.expression
	}

	pub(crate) fn value(&self) -> Value {
		self.inner.borrow().value.clone()
	}

	pub(crate) fn is_dirty(&self) -> bool {
		self.dirty.get()
	}

	pub(crate) fn owner(&self) -> Option<Instance> {
		self.owner
			.as_ref()
			.and_then(Weak::upgrade)
			.map(Instance::from_body)
	}

	pub(crate) fn call_callback(&self, new: &Value, old: &Value) -> Result<(), Error> {
		match &self.callback {
			Some(callback) => callback(new, old),
			None => Ok(()),
		}
	}

	fn refresh_value(&self) -> Result<(), Error> {
		let value = self.evaluate_getter()?;
		self.inner.borrow_mut().value = value;
		Ok(())
	}

	/// Evaluate the getter with this watcher pushed as the active target,
	/// then reconcile the dependency sets. The target stack is restored on
	/// every exit path.
	fn evaluate_getter(&self) -> Result<Value, Error> {
		let guard = TargetGuard::push(self.this.clone());
		let result = (self.getter)();
		let result = match result {
			Err(err) if self.user => {
				let context = format!("getter for watcher \"{}\"", self.expression);
				handle_error(&err, self.owner().as_ref(), &context);
				Ok(Value::Null)
			}
			other => other,
		};
		if let Ok(value) = &result {
			if self.deep {
				traverse(value);
			}
		}
		drop(guard);
		self.cleanup_deps();
		result
	}

	/// Record a dependency for the current pass. Subscribes only if the
	/// previous pass did not already hold it.
	pub(crate) fn add_dep(&self, dep: &Dep) {
		let id = dep.id();
		let mut inner = self.inner.borrow_mut();
		if inner.new_dep_ids.contains(&id) {
			return;
		}
		inner.new_dep_ids.insert(id);
		inner.new_deps.push(dep.clone());
		if !inner.dep_ids.contains(&id) {
			dep.add_sub(self.this.clone());
		}
	}

	/// Unsubscribe from dependencies held last pass but not re-read this
	/// pass, then promote the current pass's set.
	fn cleanup_deps(&self) {
		let mut inner = self.inner.borrow_mut();
		let WatcherInner {
			deps,
			dep_ids,
			new_deps,
			new_dep_ids,
			..
		} = &mut *inner;
		for dep in deps.iter() {
			if !new_dep_ids.contains(&dep.id()) {
				dep.remove_sub(self.id);
			}
		}
		std::mem::swap(deps, new_deps);
		std::mem::swap(dep_ids, new_dep_ids);
		new_deps.clear();
		new_dep_ids.clear();
	}

	/// Change reaction entry point, called from `Dep::notify`.
	pub(crate) fn update(&self) -> Result<(), Error> {
		if !self.active.get() {
			return Ok(());
		}
		if self.lazy {
			self.dirty.set(true);
			Ok(())
		} else if self.sync {
			self.run()
		} else {
			if let Some(body) = self.this.upgrade() {
				queue_watcher(&Watcher { body });
			}
			Ok(())
		}
	}

	/// Re-evaluate and fire the callback when the result changed. Containers
	/// and deep watchers always fire since the value may have been mutated
	/// in place.
	pub(crate) fn run(&self) -> Result<(), Error> {
		if !self.active.get() {
			return Ok(());
		}
		let value = self.evaluate_getter()?;
		let old = {
			let mut inner = self.inner.borrow_mut();
			let changed = !same_value(&value, &inner.value)
				|| matches!(value, Value::Obj(_) | Value::List(_))
				|| self.deep;
			if !changed {
				return Ok(());
			}
			std::mem::replace(&mut inner.value, value.clone())
		};
		if let Some(callback) = &self.callback {
			if let Err(err) = callback(&value, &old) {
				if self.user {
					let context = format!("callback for watcher \"{}\"", self.expression);
					handle_error(&err, self.owner().as_ref(), &context);
				} else {
					return Err(err);
				}
			}
		}
		Ok(())
	}

	pub(crate) fn evaluate(&self) -> Result<(), Error> {
		self.refresh_value()?;
		self.dirty.set(false);
		Ok(())
	}

	pub(crate) fn depend(&self) {
		let deps: Vec<Dep> = self.inner.borrow().deps.clone();
		for dep in deps {
			dep.depend();
		}
	}

	pub(crate) fn teardown(&self) {
		if !self.active.get() {
			return;
		}
		if let Some(instance) = self.owner() {
			instance.unregister_watcher(self.id);
		}
		let deps: Vec<Dep> = self.inner.borrow().deps.clone();
		for dep in deps {
			dep.remove_sub(self.id);
		}
		self.active.set(false);
	}
}

impl Drop for WatcherBody {
	fn drop(&mut self) {
		if !self.active.get() {
			return;
		}
		let deps = std::mem::take(&mut self.inner.get_mut().deps);
		for dep in deps {
			dep.remove_sub(self.id);
		}
	}
}

impl std::fmt::Debug for Watcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Watcher")
			.field("id", &self.body.id)
			.field("expression", &self.body.expression)
			.finish()
	}
}

/// Handle returned by `Instance::watch`; consuming it tears the watcher
/// down.
pub struct Unwatch {
	watcher: Watcher,
}

impl Unwatch {
	pub(crate) fn new(watcher: Watcher) -> Self {
		Unwatch { watcher }
	}

	/// Stop observing: the watcher unregisters from every dependency and
	/// never fires again.
	pub fn unwatch(self) {
		self.watcher.teardown();
	}
}

/// Build a getter that walks a dotted path from the owning instance,
/// yielding null when an intermediate segment is missing.
fn path_getter(instance: &Instance, path: &str) -> Getter {
	let segments: Vec<String> = path.split('.').map(str::to_string).collect();
	let owner = Instance::downgrade(instance);
	Box::new(move || {
		let Some(body) = owner.upgrade() else {
			return Ok(Value::Null);
		};
		let instance = Instance::from_body(body);
		let mut current = instance.get(&segments[0])?;
		for segment in &segments[1..] {
			current = match current {
				Value::Obj(obj) => obj.get(segment).unwrap_or(Value::Null),
				_ => return Ok(Value::Null),
			};
		}
		Ok(current)
	})
}
