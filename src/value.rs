use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::dep::{target_active, Dep};
use crate::observer::{depend_list, observe, Observer, SetterHook};

/// Dynamic value stored in reactive state. Containers are cheap-clone
/// reference handles, so cloning a `Value` never copies structure and two
/// clones of the same container observe the same mutations.
#[derive(Clone)]
pub enum Value {
	Null,
	Bool(bool),
	Num(f64),
	Str(Rc<str>),
	Obj(Obj),
	List(Arr),
}

impl Value {
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(value) => Some(*value),
			_ => None,
		}
	}

	pub fn as_num(&self) -> Option<f64> {
		match self {
			Value::Num(value) => Some(*value),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(value) => Some(value),
			_ => None,
		}
	}

	pub fn as_obj(&self) -> Option<&Obj> {
		match self {
			Value::Obj(value) => Some(value),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&Arr> {
		match self {
			Value::List(value) => Some(value),
			_ => None,
		}
	}

	pub(crate) fn observer(&self) -> Option<Rc<Observer>> {
		match self {
			Value::Obj(obj) => obj.body.ob.borrow().clone(),
			Value::List(arr) => arr.body.ob.borrow().clone(),
			_ => None,
		}
	}
}

/// Identity comparison used by the write path. Containers compare by
/// pointer, primitives by value, and a number that is unequal to itself is
/// never considered changed relative to another such number.
pub fn same_value(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Null, Value::Null) => true,
		(Value::Bool(a), Value::Bool(b)) => a == b,
		(Value::Num(a), Value::Num(b)) => a == b || (a != a && b != b),
		(Value::Str(a), Value::Str(b)) => a == b,
		(Value::Obj(a), Value::Obj(b)) => Rc::ptr_eq(&a.body, &b.body),
		(Value::List(a), Value::List(b)) => Rc::ptr_eq(&a.body, &b.body),
		_ => false,
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Value::Num(a), Value::Num(b)) => a == b,
			_ => same_value(self, other),
		}
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Bool(value)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Value::Num(value)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Value::Num(value as f64)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Num(value as f64)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::Str(Rc::from(value))
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::Str(Rc::from(value.as_str()))
	}
}

impl From<Obj> for Value {
	fn from(value: Obj) -> Self {
		Value::Obj(value)
	}
}

impl From<Arr> for Value {
	fn from(value: Arr) -> Self {
		Value::List(value)
	}
}

impl Debug for Value {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Value::Null => f.write_str("null"),
			Value::Bool(value) => value.fmt(f),
			Value::Num(value) => value.fmt(f),
			Value::Str(value) => value.fmt(f),
			Value::Obj(value) => value.fmt(f),
			Value::List(value) => value.fmt(f),
		}
	}
}

pub(crate) struct Field {
	pub(crate) value: Value,
	pub(crate) dep: Option<Dep>,
	pub(crate) setter: Option<SetterHook>,
}

impl Field {
	pub(crate) fn plain(value: Value) -> Self {
		Field {
			value,
			dep: None,
			setter: None,
		}
	}
}

/// String-keyed container. Starts out plain; `observe` installs a per-field
/// dependency on every key, after which reads register with the active
/// watcher and writes notify.
#[derive(Clone)]
pub struct Obj {
	pub(crate) body: Rc<ObjBody>,
}

pub(crate) struct ObjBody {
	pub(crate) fields: RefCell<IndexMap<String, Field>>,
	pub(crate) ob: RefCell<Option<Rc<Observer>>>,
	pub(crate) raw: Cell<bool>,
}

impl Obj {
	pub fn new() -> Self {
		Obj {
			body: Rc::new(ObjBody {
				fields: RefCell::new(IndexMap::new()),
				ob: RefCell::new(None),
				raw: Cell::new(false),
			}),
		}
	}

	/// Exclude this container from observation permanently.
	pub fn mark_raw(&self) {
		self.body.raw.set(true);
	}

	pub fn is_observed(&self) -> bool {
		self.body.ob.borrow().is_some()
	}

	/// Plain insertion, bypassing reactivity. Keys added this way after
	/// observation stay invisible to watchers; use `set` from the crate root
	/// to add reactive keys late.
	pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
		self.body
			.fields
			.borrow_mut()
			.insert(key.into(), Field::plain(value.into()));
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.body.fields.borrow().contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.body.fields.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.body.fields.borrow().is_empty()
	}

	/// Field names in declaration order. Registers on the container
	/// dependency so structural changes re-run enumerating watchers.
	pub fn keys(&self) -> Vec<String> {
		if target_active() {
			if let Some(ob) = self.body.ob.borrow().clone() {
				ob.dep().depend();
			}
		}
		self.body.fields.borrow().keys().cloned().collect()
	}

	/// Reactive read. Registers the field dependency with the active watcher
	/// and, when the value is an observed container, its container
	/// dependency as well, so reading a field also subscribes to structure
	/// changes of its value.
	pub fn get(&self, key: &str) -> Option<Value> {
		let (value, dep) = {
			let fields = self.body.fields.borrow();
			let field = fields.get(key)?;
			(field.value.clone(), field.dep.clone())
		};
		if target_active() {
			if let Some(dep) = dep {
				dep.depend();
			}
			if let Some(ob) = value.observer() {
				ob.dep().depend();
				if let Value::List(list) = &value {
					depend_list(list);
				}
			}
		}
		Some(value)
	}

	/// Read without registering any dependency.
	pub fn get_untracked(&self, key: &str) -> Option<Value> {
		self.body
			.fields
			.borrow()
			.get(key)
			.map(|field| field.value.clone())
	}

	/// Reactive write: identity short-circuit, setter interceptor, store,
	/// observe the new value, notify. A write to a key that was never made
	/// reactive falls back to plain insertion.
	pub fn set(&self, key: &str, value: impl Into<Value>) {
		let value = value.into();
		let planned = {
			let fields = self.body.fields.borrow();
			match fields.get(key) {
				None => None,
				Some(field) => {
					if same_value(&field.value, &value) {
						return;
					}
					Some((field.dep.clone(), field.setter.clone()))
				}
			}
		};
		let Some((dep, setter)) = planned else {
			self.insert(key, value);
			return;
		};
		if let Some(setter) = setter {
			setter();
		}
		{
			let mut fields = self.body.fields.borrow_mut();
			if let Some(field) = fields.get_mut(key) {
				field.value = value.clone();
			}
		}
		if let Some(dep) = dep {
			observe(&value, false);
			dep.notify();
		}
	}
}

impl Default for Obj {
	fn default() -> Self {
		Obj::new()
	}
}

impl Debug for Obj {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let fields = self.body.fields.borrow();
		let mut map = f.debug_map();
		for (key, field) in fields.iter() {
			map.entry(key, &field.value);
		}
		map.finish()
	}
}

/// Sequence container. Mutation goes through a vetted API; each operation
/// performs the change, observes inserted elements and notifies the
/// container dependency.
#[derive(Clone)]
pub struct Arr {
	pub(crate) body: Rc<ArrBody>,
}

pub(crate) struct ArrBody {
	pub(crate) items: RefCell<Vec<Value>>,
	pub(crate) ob: RefCell<Option<Rc<Observer>>>,
	pub(crate) raw: Cell<bool>,
}

impl Arr {
	pub fn new() -> Self {
		Arr {
			body: Rc::new(ArrBody {
				items: RefCell::new(Vec::new()),
				ob: RefCell::new(None),
				raw: Cell::new(false),
			}),
		}
	}

	pub fn from_vec(items: Vec<Value>) -> Self {
		let arr = Arr::new();
		*arr.body.items.borrow_mut() = items;
		arr
	}

	pub fn mark_raw(&self) {
		self.body.raw.set(true);
	}

	pub fn is_observed(&self) -> bool {
		self.body.ob.borrow().is_some()
	}

	pub fn len(&self) -> usize {
		self.depend();
		self.body.items.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn get(&self, index: usize) -> Option<Value> {
		self.depend();
		let value = self.body.items.borrow().get(index).cloned()?;
		if target_active() {
			if let Some(ob) = value.observer() {
				ob.dep().depend();
			}
			if let Value::List(nested) = &value {
				depend_list(nested);
			}
		}
		Some(value)
	}

	pub fn to_vec(&self) -> Vec<Value> {
		self.depend();
		self.body.items.borrow().clone()
	}

	pub fn push(&self, value: impl Into<Value>) {
		let value = value.into();
		self.body.items.borrow_mut().push(value.clone());
		self.mutated(&[value]);
	}

	pub fn pop(&self) -> Option<Value> {
		let removed = self.body.items.borrow_mut().pop();
		if removed.is_some() {
			self.mutated(&[]);
		}
		removed
	}

	pub fn insert(&self, index: usize, value: impl Into<Value>) {
		let value = value.into();
		{
			let mut items = self.body.items.borrow_mut();
			let index = index.min(items.len());
			items.insert(index, value.clone());
		}
		self.mutated(&[value]);
	}

	pub fn remove(&self, index: usize) -> Option<Value> {
		let removed = {
			let mut items = self.body.items.borrow_mut();
			if index >= items.len() {
				return None;
			}
			items.remove(index)
		};
		self.mutated(&[]);
		Some(removed)
	}

	/// Replace `delete_count` elements starting at `start` with `items`,
	/// returning the removed elements.
	pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
		let inserted = items.clone();
		let removed: Vec<Value> = {
			let mut current = self.body.items.borrow_mut();
			let start = start.min(current.len());
			let end = (start + delete_count).min(current.len());
			current.splice(start..end, items).collect()
		};
		self.mutated(&inserted);
		removed
	}

	/// Index write. Out-of-bounds writes grow the list with nulls first.
	pub fn set_index(&self, index: usize, value: impl Into<Value>) {
		let value = value.into();
		{
			let mut items = self.body.items.borrow_mut();
			if index >= items.len() {
				items.resize(index + 1, Value::Null);
			}
			items[index] = value.clone();
		}
		self.mutated(&[value]);
	}

	pub fn clear(&self) {
		self.body.items.borrow_mut().clear();
		self.mutated(&[]);
	}

	fn depend(&self) {
		if target_active() {
			if let Some(ob) = self.body.ob.borrow().clone() {
				ob.dep().depend();
			}
		}
	}

	fn mutated(&self, inserted: &[Value]) {
		let ob = self.body.ob.borrow().clone();
		if let Some(ob) = ob {
			for value in inserted {
				observe(value, false);
			}
			ob.dep().notify();
		}
	}
}

impl Default for Arr {
	fn default() -> Self {
		Arr::new()
	}
}

impl Debug for Arr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let items = self.body.items.borrow();
		f.debug_list().entries(items.iter()).finish()
	}
}
