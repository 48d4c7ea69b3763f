use std::cell::Cell;
use std::rc::Rc;

use crate::dep::Dep;
use crate::error::warn;
use crate::value::{Arr, Field, Obj, Value};

/// Interceptor invoked before a reactive field stores a new value. Used for
/// policy warnings (prop mutation); never affects the write itself.
pub type SetterHook = Rc<dyn Fn()>;

/// Marker attached to a container once it has been walked. Carries the
/// container-level dependency used for "structure changed" notifications and
/// a counter of root state owners.
pub struct Observer {
	dep: Dep,
	vm_count: Cell<usize>,
}

impl Observer {
	pub fn dep(&self) -> &Dep {
		&self.dep
	}

	pub(crate) fn is_root_state(&self) -> bool {
		self.vm_count.get() > 0
	}
}

thread_local! {
	static CONVERTING: Cell<bool> = Cell::new(true);
}

/// Disable observation of newly-assigned values for the duration of `func`.
/// Non-root prop installation uses this so externally-supplied inputs are
/// not converted.
pub(crate) fn without_conversion<R>(func: impl FnOnce() -> R) -> R {
	CONVERTING.with(|flag| {
		let prev = flag.replace(false);
		let out = func();
		flag.set(prev);
		out
	})
}

/// Walk a container and install reactive plumbing on every field, element
/// included. Idempotent: an already-observed value returns its existing
/// observer. Non-containers, raw-marked containers and (while conversion is
/// disabled, for non-root values) everything else are left alone.
pub fn observe(value: &Value, as_root: bool) -> Option<Rc<Observer>> {
	let (existing, raw) = match value {
		Value::Obj(obj) => (obj.body.ob.borrow().clone(), obj.body.raw.get()),
		Value::List(arr) => (arr.body.ob.borrow().clone(), arr.body.raw.get()),
		_ => return None,
	};
	if let Some(ob) = existing {
		if as_root {
			ob.vm_count.set(ob.vm_count.get() + 1);
		}
		return Some(ob);
	}
	if raw || (!as_root && !CONVERTING.with(|flag| flag.get())) {
		return None;
	}
	let ob = Rc::new(Observer {
		dep: Dep::new(),
		vm_count: Cell::new(if as_root { 1 } else { 0 }),
	});
	match value {
		Value::Obj(obj) => {
			*obj.body.ob.borrow_mut() = Some(ob.clone());
			walk(obj);
		}
		Value::List(arr) => {
			*arr.body.ob.borrow_mut() = Some(ob.clone());
			let items: Vec<Value> = arr.body.items.borrow().clone();
			for item in &items {
				observe(item, false);
			}
		}
		_ => {}
	}
	Some(ob)
}

fn walk(obj: &Obj) {
	let keys: Vec<String> = obj.body.fields.borrow().keys().cloned().collect();
	for key in keys {
		if let Some(value) = obj.get_untracked(&key) {
			define_reactive(obj, &key, value, None);
		}
	}
}

/// Install one reactive slot: a fresh per-field dependency, recursive
/// observation of the initial value, and an optional setter interceptor.
pub fn define_reactive(obj: &Obj, key: &str, value: Value, custom_setter: Option<SetterHook>) {
	observe(&value, false);
	obj.body.fields.borrow_mut().insert(
		key.to_string(),
		Field {
			value,
			dep: Some(Dep::new()),
			setter: custom_setter,
		},
	);
}

/// Reading a list also subscribes to structure changes of every nested
/// element, since elements are reachable without going through a reactive
/// field.
pub(crate) fn depend_list(arr: &Arr) {
	let items: Vec<Value> = arr.body.items.borrow().clone();
	for item in items {
		if let Some(ob) = item.observer() {
			ob.dep.depend();
		}
		if let Value::List(nested) = item {
			depend_list(&nested);
		}
	}
}

/// Add or update a key on observed state so a key absent at observation
/// time still becomes reactive and the container dependency fires.
pub fn set(obj: &Obj, key: &str, value: impl Into<Value>) {
	let value = value.into();
	if obj.contains_key(key) {
		obj.set(key, value);
		return;
	}
	let ob = obj.body.ob.borrow().clone();
	let Some(ob) = ob else {
		obj.insert(key, value);
		return;
	};
	if ob.is_root_state() {
		warn(&format!(
			"avoid adding reactive key \"{}\" to root instance state, declare it in data instead",
			key
		));
		return;
	}
	define_reactive(obj, key, value, None);
	ob.dep.notify();
}

/// Remove a key from observed state, notifying the container dependency.
pub fn del(obj: &Obj, key: &str) {
	let ob = obj.body.ob.borrow().clone();
	if let Some(ob) = &ob {
		if ob.is_root_state() {
			warn(&format!(
				"avoid deleting key \"{}\" on root instance state",
				key
			));
			return;
		}
	}
	let removed = obj.body.fields.borrow_mut().shift_remove(key).is_some();
	if !removed {
		return;
	}
	if let Some(ob) = ob {
		ob.dep.notify();
	}
}
