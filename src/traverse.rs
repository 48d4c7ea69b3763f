use fxhash::FxHashSet;

use crate::value::Value;

/// Recursively read a value so every nested dependency registers with the
/// watcher currently collecting. Shared containers are visited once,
/// deduplicated by container dependency id.
pub(crate) fn traverse(value: &Value) {
	let mut seen = FxHashSet::default();
	traverse_value(value, &mut seen);
}

fn traverse_value(value: &Value, seen: &mut FxHashSet<u64>) {
	if let Some(ob) = value.observer() {
		if !seen.insert(ob.dep().id()) {
			return;
		}
	}
	match value {
		Value::Obj(obj) => {
			for key in obj.keys() {
				if let Some(child) = obj.get(&key) {
					traverse_value(&child, seen);
				}
			}
		}
		Value::List(arr) => {
			for index in 0..arr.len() {
				if let Some(child) = arr.get(index) {
					traverse_value(&child, seen);
				}
			}
		}
		_ => {}
	}
}
