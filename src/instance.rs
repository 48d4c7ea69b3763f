use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::dep::target_active;
use crate::error::{handle_error, warn, Error};
use crate::observer::{define_reactive, observe, without_conversion, SetterHook};
use crate::value::{Obj, Value};
use crate::watcher::{Callback, Unwatch, WatchSource, Watcher, WatcherOptions};

pub type DataFactory = Box<dyn Fn(&Instance) -> Result<Value, Error>>;
pub type ComputedFn = Rc<dyn Fn(&Instance) -> Result<Value, Error>>;
pub type ComputedSetter = Rc<dyn Fn(&Instance, &Value) -> Result<(), Error>>;
pub type Method = Rc<dyn Fn(&Instance, &[Value]) -> Result<Value, Error>>;
pub type WatchHandler = Rc<dyn Fn(&Instance, &Value, &Value) -> Result<(), Error>>;

/// Declared input property: the caller may supply a value, otherwise the
/// default applies.
#[derive(Default, Clone)]
pub struct PropOptions {
	default: Option<Value>,
}

impl PropOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn default_value(mut self, value: impl Into<Value>) -> Self {
		self.default = Some(value.into());
		self
	}
}

#[derive(Default, Clone, Copy)]
pub struct WatchOptions {
	pub immediate: bool,
	pub deep: bool,
	pub sync: bool,
}

impl WatchOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Invoke the callback once synchronously with the initial value.
	pub fn immediate(mut self) -> Self {
		self.immediate = true;
		self
	}

	pub fn deep(mut self) -> Self {
		self.deep = true;
		self
	}

	pub fn sync(mut self) -> Self {
		self.sync = true;
		self
	}
}

struct ComputedEntry {
	getter: ComputedFn,
	setter: Option<ComputedSetter>,
}

enum WatchTarget {
	Handler(WatchHandler),
	Method(String),
}

struct WatchEntry {
	options: WatchOptions,
	target: WatchTarget,
}

/// Declarative shape of an instance: props, data factory, computed getters,
/// watch entries and methods, all keyed by name in declaration order.
pub struct Options {
	name: Option<String>,
	root: bool,
	inert: bool,
	props: IndexMap<String, PropOptions>,
	props_data: IndexMap<String, Value>,
	data: Option<DataFactory>,
	computed: IndexMap<String, ComputedEntry>,
	watch: IndexMap<String, SmallVec<[WatchEntry; 1]>>,
	methods: IndexMap<String, Option<Method>>,
}

impl Options {
	pub fn new() -> Self {
		Options {
			name: None,
			root: true,
			inert: false,
			props: IndexMap::new(),
			props_data: IndexMap::new(),
			data: None,
			computed: IndexMap::new(),
			watch: IndexMap::new(),
			methods: IndexMap::new(),
		}
	}

	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Mark the instance as nested: externally-supplied prop values are not
	/// converted and direct prop mutation warns.
	pub fn nested(mut self) -> Self {
		self.root = false;
		self
	}

	/// Output-only mode: computed fields become plain per-read getters with
	/// no caching watcher behind them.
	pub fn inert(mut self) -> Self {
		self.inert = true;
		self
	}

	pub fn prop(mut self, key: impl Into<String>, options: PropOptions) -> Self {
		self.props.insert(key.into(), options);
		self
	}

	/// Caller-supplied value for a declared prop.
	pub fn prop_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.props_data.insert(key.into(), value.into());
		self
	}

	pub fn data(mut self, factory: impl Fn(&Instance) -> Result<Value, Error> + 'static) -> Self {
		self.data = Some(Box::new(factory));
		self
	}

	pub fn computed(
		mut self,
		key: impl Into<String>,
		getter: impl Fn(&Instance) -> Result<Value, Error> + 'static,
	) -> Self {
		self.computed.insert(
			key.into(),
			ComputedEntry {
				getter: Rc::new(getter),
				setter: None,
			},
		);
		self
	}

	/// Computed field declared as a getter/setter pair; assignment routes
	/// through the setter instead of warning.
	pub fn computed_with_setter(
		mut self,
		key: impl Into<String>,
		getter: impl Fn(&Instance) -> Result<Value, Error> + 'static,
		setter: impl Fn(&Instance, &Value) -> Result<(), Error> + 'static,
	) -> Self {
		self.computed.insert(
			key.into(),
			ComputedEntry {
				getter: Rc::new(getter),
				setter: Some(Rc::new(setter)),
			},
		);
		self
	}

	pub fn watch(
		self,
		key: impl Into<String>,
		handler: impl Fn(&Instance, &Value, &Value) -> Result<(), Error> + 'static,
	) -> Self {
		self.watch_with(key, WatchOptions::new(), handler)
	}

	/// Append a handler for a key; a key may hold several handlers.
	pub fn watch_with(
		mut self,
		key: impl Into<String>,
		options: WatchOptions,
		handler: impl Fn(&Instance, &Value, &Value) -> Result<(), Error> + 'static,
	) -> Self {
		self.watch
			.entry(key.into())
			.or_insert_with(SmallVec::new)
			.push(WatchEntry {
				options,
				target: WatchTarget::Handler(Rc::new(handler)),
			});
		self
	}

	/// Route changes on a key to a declared method by name; the method
	/// receives the new and previous value as arguments.
	pub fn watch_method(self, key: impl Into<String>, method_name: impl Into<String>) -> Self {
		self.watch_method_with(key, WatchOptions::new(), method_name)
	}

	pub fn watch_method_with(
		mut self,
		key: impl Into<String>,
		options: WatchOptions,
		method_name: impl Into<String>,
	) -> Self {
		self.watch
			.entry(key.into())
			.or_insert_with(SmallVec::new)
			.push(WatchEntry {
				options,
				target: WatchTarget::Method(method_name.into()),
			});
		self
	}

	pub fn method(
		mut self,
		key: impl Into<String>,
		method: impl Fn(&Instance, &[Value]) -> Result<Value, Error> + 'static,
	) -> Self {
		self.methods.insert(key.into(), Some(Rc::new(method)));
		self
	}

	/// Declare a method without a body; it becomes a warning no-op instead
	/// of failing construction.
	pub fn method_missing(mut self, key: impl Into<String>) -> Self {
		self.methods.insert(key.into(), None);
		self
	}
}

impl Default for Options {
	fn default() -> Self {
		Options::new()
	}
}

/// Where a public key is backed: the slot descriptor of the forwarding
/// layer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SlotKind {
	Prop,
	Data,
	Computed,
	Method,
}

/// A state-owning instance: props and data storage, computed watchers, the
/// forwarding key map and the watcher registry.
#[derive(Clone)]
pub struct Instance {
	pub(crate) body: Rc<InstanceBody>,
}

pub(crate) struct InstanceBody {
	this: Weak<InstanceBody>,
	name: Option<String>,
	root: bool,
	inert: bool,
	props: Obj,
	data: RefCell<Obj>,
	key_map: RefCell<IndexMap<String, SlotKind>>,
	computed_watchers: RefCell<IndexMap<String, Watcher>>,
	computed_getters: RefCell<IndexMap<String, ComputedFn>>,
	computed_setters: RefCell<IndexMap<String, ComputedSetter>>,
	methods: RefCell<IndexMap<String, Method>>,
	watchers: RefCell<Vec<Watcher>>,
	destroyed: Cell<bool>,
}

impl Instance {
	/// Build an instance and run state initialization: props, data,
	/// computed, watch, methods. Construction never fails; user code errors
	/// are reported and substituted.
	pub fn new(options: Options) -> Instance {
		let Options {
			name,
			root,
			inert,
			props,
			props_data,
			data,
			computed,
			watch,
			methods,
		} = options;
		let instance = Instance {
			body: Rc::new_cyclic(|this| InstanceBody {
				this: this.clone(),
				name,
				root,
				inert,
				props: Obj::new(),
				data: RefCell::new(Obj::new()),
				key_map: RefCell::new(IndexMap::new()),
				computed_watchers: RefCell::new(IndexMap::new()),
				computed_getters: RefCell::new(IndexMap::new()),
				computed_setters: RefCell::new(IndexMap::new()),
				methods: RefCell::new(IndexMap::new()),
				watchers: RefCell::new(Vec::new()),
				destroyed: Cell::new(false),
			}),
		};
		instance.init_props(props, props_data);
		instance.init_data(data, &methods);
		instance.init_computed(computed);
		instance.init_watch(watch);
		instance.init_methods(methods);
		instance
	}

	pub fn name(&self) -> Option<String> {
		self.body.name.clone()
	}

	/// Internal data storage, the target of the forwarding layer.
	pub fn data(&self) -> Obj {
		self.body.data.borrow().clone()
	}

	/// Internal props storage.
	pub fn props(&self) -> Obj {
		self.body.props.clone()
	}

	pub fn slot(&self, key: &str) -> Option<SlotKind> {
		self.body.key_map.borrow().get(key).copied()
	}

	/// Read a public field through the key map.
	pub fn get(&self, key: &str) -> Result<Value, Error> {
		let kind = self.body.key_map.borrow().get(key).copied();
		match kind {
			Some(SlotKind::Prop) => Ok(self.body.props.get(key).unwrap_or(Value::Null)),
			Some(SlotKind::Data) => {
				let data = self.body.data.borrow().clone();
				Ok(data.get(key).unwrap_or(Value::Null))
			}
			Some(SlotKind::Computed) => self.computed_value(key),
			Some(SlotKind::Method) => {
				warn(&format!("\"{}\" is a method, invoke it with call()", key));
				Ok(Value::Null)
			}
			None => {
				warn(&format!("field \"{}\" is not defined on this instance", key));
				Ok(Value::Null)
			}
		}
	}

	/// Write a public field through the key map. Props and computed are
	/// policy-protected: the violation warns, reactive data writes go
	/// through.
	pub fn set(&self, key: &str, value: impl Into<Value>) {
		let value = value.into();
		let kind = self.body.key_map.borrow().get(key).copied();
		match kind {
			Some(SlotKind::Prop) => self.body.props.set(key, value),
			Some(SlotKind::Data) => {
				let data = self.body.data.borrow().clone();
				data.set(key, value);
			}
			Some(SlotKind::Computed) => {
				let setter = self.body.computed_setters.borrow().get(key).cloned();
				match setter {
					Some(setter) => {
						if let Err(err) = setter(self, &value) {
							let context = format!("setter for computed field \"{}\"", key);
							handle_error(&err, Some(self), &context);
						}
					}
					None => {
						warn(&format!(
							"computed field \"{}\" was assigned to but it has no setter",
							key
						));
					}
				}
			}
			Some(SlotKind::Method) => {
				warn(&format!("\"{}\" is a method and cannot be assigned", key));
			}
			None => {
				warn(&format!(
					"field \"{}\" is not defined on this instance, declare it in data or add it with set()",
					key
				));
			}
		}
	}

	/// Declaratively observe a path or getter; the callback receives the new
	/// and previous value. The returned handle tears the watcher down.
	pub fn watch(
		&self,
		source: impl Into<WatchSource>,
		callback: impl Fn(&Value, &Value) -> Result<(), Error> + 'static,
		options: WatchOptions,
	) -> Unwatch {
		self.watch_source(source.into(), Box::new(callback), options)
	}

	fn watch_source(&self, source: WatchSource, callback: Callback, options: WatchOptions) -> Unwatch {
		let mut watcher_options = WatcherOptions::new().user();
		if options.deep {
			watcher_options = watcher_options.deep();
		}
		if options.sync {
			watcher_options = watcher_options.sync();
		}
		let watcher = Watcher::new(Some(self), source, Some(callback), watcher_options);
		if options.immediate {
			let value = watcher.value();
			if let Err(err) = watcher.body.call_callback(&value, &Value::Null) {
				let context = format!(
					"callback for immediate watcher \"{}\"",
					watcher.body.expression()
				);
				handle_error(&err, Some(self), &context);
			}
		}
		Unwatch::new(watcher)
	}

	/// Invoke a declared method with the instance as receiver.
	pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
		let method = self.body.methods.borrow().get(name).cloned();
		match method {
			Some(method) => method(self, args),
			None => {
				warn(&format!("method \"{}\" is not defined", name));
				Ok(Value::Null)
			}
		}
	}

	/// Detachable bound method: resolves its receiver through a weak
	/// back-reference, so the handle outlives direct access to the instance.
	pub fn method(&self, name: &str) -> Option<BoundMethod> {
		let method = self.body.methods.borrow().get(name).cloned()?;
		Some(BoundMethod {
			owner: self.body.this.clone(),
			func: method,
		})
	}

	/// Tear down every watcher this instance owns, computed included.
	pub fn teardown(&self) {
		if self.body.destroyed.get() {
			return;
		}
		self.body.destroyed.set(true);
		let watchers: Vec<Watcher> = self.body.watchers.borrow_mut().drain(..).collect();
		for watcher in watchers {
			watcher.teardown();
		}
	}

	pub fn is_destroyed(&self) -> bool {
		self.body.destroyed.get()
	}

	pub(crate) fn from_body(body: Rc<InstanceBody>) -> Instance {
		Instance { body }
	}

	pub(crate) fn downgrade(&self) -> Weak<InstanceBody> {
		self.body.this.clone()
	}

	pub(crate) fn register_watcher(&self, watcher: &Watcher) {
		self.body.watchers.borrow_mut().push(watcher.clone());
	}

	pub(crate) fn unregister_watcher(&self, id: u64) {
		if self.body.destroyed.get() {
			return;
		}
		self.body
			.watchers
			.borrow_mut()
			.retain(|watcher| watcher.id() != id);
	}

	/// Record a forwarding entry so `get`/`set` route the public key to its
	/// backing slot. Keeps the first registration on collision.
	fn proxy(&self, key: &str, kind: SlotKind) -> bool {
		let mut key_map = self.body.key_map.borrow_mut();
		if key_map.contains_key(key) {
			return false;
		}
		key_map.insert(key.to_string(), kind);
		true
	}

	fn init_props(&self, props: IndexMap<String, PropOptions>, mut props_data: IndexMap<String, Value>) {
		if props.is_empty() {
			return;
		}
		let root = self.body.root;
		let install = move || {
			for (key, prop) in props {
				if is_reserved(&key) {
					warn(&format!(
						"\"{}\" is a reserved name and cannot be used as a prop",
						key
					));
				}
				let value = props_data
					.shift_remove(&key)
					.or(prop.default)
					.unwrap_or(Value::Null);
				let setter: Option<SetterHook> = if root {
					None
				} else {
					let key = key.clone();
					Some(Rc::new(move || {
						warn(&format!(
							"avoid mutating prop \"{}\" directly, use a data or computed field based on it",
							key
						));
					}))
				};
				define_reactive(&self.body.props, &key, value, setter);
				self.proxy(&key, SlotKind::Prop);
			}
		};
		if root {
			install();
		} else {
			without_conversion(install);
		}
	}

	fn init_data(&self, factory: Option<DataFactory>, methods: &IndexMap<String, Option<Method>>) {
		let data = match factory {
			Some(factory) => match factory(self) {
				Ok(value) => value,
				Err(err) => {
					handle_error(&err, Some(self), "data()");
					Value::Obj(Obj::new())
				}
			},
			None => Value::Obj(Obj::new()),
		};
		let data = match data {
			Value::Obj(obj) => obj,
			_ => {
				warn("data factories should return an object");
				Obj::new()
			}
		};
		for key in data.keys() {
			if methods.contains_key(&key) {
				warn(&format!(
					"method \"{}\" has already been defined as a data field",
					key
				));
			}
			let is_prop = self.slot(&key) == Some(SlotKind::Prop);
			if is_prop {
				warn(&format!(
					"data field \"{}\" is already declared as a prop, use the prop default instead",
					key
				));
			} else if !is_reserved(&key) {
				self.proxy(&key, SlotKind::Data);
			}
		}
		observe(&Value::Obj(data.clone()), true);
		*self.body.data.borrow_mut() = data;
	}

	fn init_computed(&self, computed: IndexMap<String, ComputedEntry>) {
		for (key, entry) in computed {
			match self.slot(&key) {
				Some(SlotKind::Data) => {
					warn(&format!(
						"computed field \"{}\" is already defined in data",
						key
					));
					continue;
				}
				Some(SlotKind::Prop) => {
					warn(&format!(
						"computed field \"{}\" is already defined as a prop",
						key
					));
					continue;
				}
				Some(_) => {
					warn(&format!("computed field \"{}\" is already defined", key));
					continue;
				}
				None => {}
			}
			self.proxy(&key, SlotKind::Computed);
			let ComputedEntry { getter, setter } = entry;
			if let Some(setter) = setter {
				self.body
					.computed_setters
					.borrow_mut()
					.insert(key.clone(), setter);
			}
			if self.body.inert {
				self.body.computed_getters.borrow_mut().insert(key, getter);
				continue;
			}
			let owner = self.body.this.clone();
			let watcher = Watcher::new(
				Some(self),
				WatchSource::getter(move || match owner.upgrade() {
					Some(body) => getter(&Instance::from_body(body)),
					None => Ok(Value::Null),
				}),
				None,
				WatcherOptions::new().lazy(),
			);
			self.body.computed_watchers.borrow_mut().insert(key, watcher);
		}
	}

	fn init_watch(&self, watch: IndexMap<String, SmallVec<[WatchEntry; 1]>>) {
		for (key, entries) in watch {
			for entry in entries {
				let owner = self.body.this.clone();
				let callback: Callback = match entry.target {
					WatchTarget::Handler(handler) => Box::new(move |new, old| match owner.upgrade() {
						Some(body) => handler(&Instance::from_body(body), new, old),
						None => Ok(()),
					}),
					// resolved at fire time, methods are installed last
					WatchTarget::Method(name) => Box::new(move |new, old| match owner.upgrade() {
						Some(body) => Instance::from_body(body)
							.call(&name, &[new.clone(), old.clone()])
							.map(|_| ()),
						None => Ok(()),
					}),
				};
				// kept alive by the instance watcher registry
				let _handle = self.watch_source(WatchSource::path(key.clone()), callback, entry.options);
			}
		}
	}

	fn init_methods(&self, methods: IndexMap<String, Option<Method>>) {
		for (key, method) in methods {
			if method.is_none() {
				warn(&format!(
					"method \"{}\" has no body, replacing it with a no-op",
					key
				));
			}
			if self.slot(&key) == Some(SlotKind::Prop) {
				warn(&format!(
					"method \"{}\" has already been defined as a prop",
					key
				));
			}
			if is_reserved(&key) {
				warn(&format!(
					"avoid method names starting with $ or _: \"{}\"",
					key
				));
			}
			let method = method
				.unwrap_or_else(|| Rc::new(|_: &Instance, _: &[Value]| Ok(Value::Null)) as Method);
			self.proxy(&key, SlotKind::Method);
			self.body.methods.borrow_mut().insert(key, method);
		}
	}

	/// Caching accessor for a computed field: recompute only when dirty, and
	/// forward the computed watcher's dependencies to whatever computation
	/// is collecting right now.
	fn computed_value(&self, key: &str) -> Result<Value, Error> {
		if self.body.inert {
			let getter = self.body.computed_getters.borrow().get(key).cloned();
			return match getter {
				Some(getter) => getter(self),
				None => Ok(Value::Null),
			};
		}
		let watcher = self.body.computed_watchers.borrow().get(key).cloned();
		let Some(watcher) = watcher else {
			return Ok(Value::Null);
		};
		if watcher.body.is_dirty() {
			watcher.body.evaluate()?;
		}
		if target_active() {
			watcher.body.depend();
		}
		Ok(watcher.value())
	}
}

impl std::fmt::Debug for Instance {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Instance")
			.field("name", &self.body.name)
			.finish()
	}
}

/// A method bound to its instance through a weak back-reference, callable
/// after being detached.
#[derive(Clone)]
pub struct BoundMethod {
	owner: Weak<InstanceBody>,
	func: Method,
}

impl BoundMethod {
	pub fn call(&self, args: &[Value]) -> Result<Value, Error> {
		match self.owner.upgrade() {
			Some(body) => (self.func)(&Instance::from_body(body), args),
			None => Ok(Value::Null),
		}
	}
}

fn is_reserved(key: &str) -> bool {
	matches!(key.as_bytes().first(), Some(b'$') | Some(b'_'))
}
