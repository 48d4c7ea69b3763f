use std::cell::{Cell, RefCell};
use std::rc::Rc;

use reactive::{
	obj, Error, Instance, Options, PropOptions, SlotKind, Value, WatchOptions, WatchSource,
};

mod mock;

use mock::Spy;

fn num(value: &Value) -> f64 {
	value.as_num().unwrap_or(f64::NAN)
}

#[test]
fn props_seed_from_values_and_defaults() {
	let instance = Instance::new(
		Options::new()
			.prop("size", PropOptions::new().default_value(10))
			.prop("label", PropOptions::new().default_value("unnamed"))
			.prop("extra", PropOptions::new())
			.prop_value("size", 42),
	);
	assert_eq!(instance.get("size").unwrap(), Value::Num(42.0));
	assert_eq!(instance.get("label").unwrap(), Value::from("unnamed"));
	assert!(instance.get("extra").unwrap().is_null());
	assert_eq!(instance.slot("size"), Some(SlotKind::Prop));
}

#[test]
fn root_prop_containers_are_converted_nested_are_not() {
	let root = Instance::new(
		Options::new()
			.prop("cfg", PropOptions::new())
			.prop_value("cfg", obj! { "a" => 1 }),
	);
	let cfg = root.get("cfg").unwrap();
	assert!(cfg.as_obj().unwrap().is_observed());

	let nested = Instance::new(
		Options::new()
			.nested()
			.prop("cfg", PropOptions::new())
			.prop_value("cfg", obj! { "a" => 1 }),
	);
	let cfg = nested.get("cfg").unwrap();
	assert!(!cfg.as_obj().unwrap().is_observed());
}

#[test]
fn mutating_a_nested_prop_warns_but_writes() {
	let warnings = Rc::new(RefCell::new(Vec::new()));
	reactive::set_warn_hook({
		let warnings = warnings.clone();
		move |message| warnings.borrow_mut().push(message.to_string())
	});

	let instance = Instance::new(
		Options::new()
			.nested()
			.prop("size", PropOptions::new().default_value(1)),
	);
	instance.set("size", 2);
	assert_eq!(instance.get("size").unwrap(), Value::Num(2.0));
	assert!(warnings
		.borrow()
		.iter()
		.any(|message| message.contains("avoid mutating prop \"size\"")));

	reactive::clear_warn_hook();
}

#[test]
fn data_fields_are_proxied_and_reactive() {
	let instance = Instance::new(
		Options::new().data(|_| Ok(Value::Obj(obj! { "count" => 0, "title" => "hello" }))),
	);
	assert_eq!(instance.slot("count"), Some(SlotKind::Data));
	assert_eq!(instance.get("count").unwrap(), Value::Num(0.0));

	instance.set("count", 5);
	assert_eq!(instance.get("count").unwrap(), Value::Num(5.0));
	assert!(instance.data().is_observed());
}

#[test]
fn data_prop_collision_keeps_the_prop() {
	let warnings = Rc::new(RefCell::new(Vec::new()));
	reactive::set_warn_hook({
		let warnings = warnings.clone();
		move |message| warnings.borrow_mut().push(message.to_string())
	});

	let instance = Instance::new(
		Options::new()
			.prop("x", PropOptions::new().default_value(1))
			.data(|_| Ok(Value::Obj(obj! { "x" => 2 }))),
	);
	assert_eq!(instance.slot("x"), Some(SlotKind::Prop));
	assert_eq!(instance.get("x").unwrap(), Value::Num(1.0));
	assert!(warnings
		.borrow()
		.iter()
		.any(|message| message.contains("already declared as a prop")));

	reactive::clear_warn_hook();
}

#[test]
fn reserved_data_keys_are_not_proxied() {
	let instance =
		Instance::new(Options::new().data(|_| Ok(Value::Obj(obj! { "_secret" => 1, "a" => 2 }))));
	assert_eq!(instance.slot("_secret"), None);
	assert_eq!(instance.slot("a"), Some(SlotKind::Data));
	// still reachable through the storage object
	assert_eq!(
		instance.data().get_untracked("_secret"),
		Some(Value::Num(1.0))
	);
}

#[test]
fn failing_data_factory_leaves_empty_state() {
	let reported = Rc::new(RefCell::new(Vec::new()));
	reactive::set_error_hook({
		let reported = reported.clone();
		move |err, _, context| {
			reported.borrow_mut().push(format!("{context}: {err}"));
		}
	});

	let instance = Instance::new(
		Options::new()
			.name("broken")
			.data(|_| Err(Error::msg("factory exploded"))),
	);
	assert!(instance.data().is_empty());
	assert!(instance.data().is_observed());
	assert_eq!(reported.borrow().len(), 1);
	assert!(reported.borrow()[0].starts_with("data():"));

	reactive::clear_error_hook();
}

#[test]
fn computed_caches_between_changes() {
	let runs = Rc::new(Cell::new(0u32));
	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.computed("b", {
				let runs = runs.clone();
				move |this| {
					runs.set(runs.get() + 1);
					let a = num(&this.get("a")?);
					Ok(Value::Num(a * 2.0))
				}
			}),
	);
	assert_eq!(runs.get(), 0);

	assert_eq!(instance.get("b").unwrap(), Value::Num(2.0));
	assert_eq!(instance.get("b").unwrap(), Value::Num(2.0));
	assert_eq!(runs.get(), 1);

	instance.set("a", 5);
	assert_eq!(runs.get(), 1);

	assert_eq!(instance.get("b").unwrap(), Value::Num(10.0));
	assert_eq!(instance.get("b").unwrap(), Value::Num(10.0));
	assert_eq!(runs.get(), 2);
}

#[test]
fn watching_a_computed_field_propagates_dependencies() {
	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.computed("double", |this| {
				let a = num(&this.get("a")?);
				Ok(Value::Num(a * 2.0))
			}),
	);
	let seen = Rc::new(RefCell::new(Vec::new()));
	let _watch = instance.watch(
		"double",
		{
			let seen = seen.clone();
			move |new, old| {
				seen.borrow_mut().push((num(new), num(old)));
				Ok(())
			}
		},
		WatchOptions::new(),
	);

	instance.set("a", 3);
	assert_eq!(*seen.borrow(), vec![(6.0, 2.0)]);
}

#[test]
fn immediate_watch_fires_then_tracks_changes() {
	let calls = Rc::new(RefCell::new(Vec::new()));
	let instance = Instance::new(Options::new().data(|_| Ok(Value::Obj(obj! { "a" => 1 }))));
	let _watch = instance.watch(
		"a",
		{
			let calls = calls.clone();
			move |new, old| {
				calls.borrow_mut().push((new.clone(), old.clone()));
				Ok(())
			}
		},
		WatchOptions::new().immediate(),
	);
	// invoked once, synchronously, with the initial value
	assert_eq!(calls.borrow().len(), 1);
	assert_eq!(calls.borrow()[0].0, Value::Num(1.0));
	assert!(calls.borrow()[0].1.is_null());

	instance.set("a", 2);
	assert_eq!(calls.borrow().len(), 2);
	assert_eq!(calls.borrow()[1], (Value::Num(2.0), Value::Num(1.0)));
}

#[test]
fn unwatch_silences_callback() {
	let calls = Rc::new(Cell::new(0u32));
	let instance = Instance::new(Options::new().data(|_| Ok(Value::Obj(obj! { "a" => 1 }))));
	let watch = instance.watch(
		"a",
		{
			let calls = calls.clone();
			move |_, _| {
				calls.set(calls.get() + 1);
				Ok(())
			}
		},
		WatchOptions::new(),
	);

	instance.set("a", 2);
	assert_eq!(calls.get(), 1);

	watch.unwatch();
	instance.set("a", 3);
	assert_eq!(calls.get(), 1);
}

#[test]
fn declared_watch_supports_many_handlers() {
	let first = Rc::new(Cell::new(0u32));
	let second = Rc::new(Cell::new(0u32));
	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.watch("a", {
				let first = first.clone();
				move |_, _, _| {
					first.set(first.get() + 1);
					Ok(())
				}
			})
			.watch_with("a", WatchOptions::new().sync(), {
				let second = second.clone();
				move |_, _, _| {
					second.set(second.get() + 1);
					Ok(())
				}
			}),
	);

	instance.set("a", 2);
	assert_eq!(first.get(), 1);
	assert_eq!(second.get(), 1);
}

#[test]
fn deep_watch_through_instance() {
	let calls = Rc::new(Cell::new(0u32));
	let instance = Instance::new(
		Options::new().data(|_| Ok(Value::Obj(obj! { "child" => obj! { "x" => 1 } }))),
	);
	let _watch = instance.watch(
		"child",
		{
			let calls = calls.clone();
			move |_, _| {
				calls.set(calls.get() + 1);
				Ok(())
			}
		},
		WatchOptions::new().deep(),
	);

	let child = instance
		.get("child")
		.unwrap()
		.as_obj()
		.unwrap()
		.clone();
	child.set("x", 2);
	assert_eq!(calls.get(), 1);
}

#[test]
fn watch_by_getter_source() {
	let calls = Rc::new(RefCell::new(Vec::new()));
	let instance = Instance::new(
		Options::new().data(|_| Ok(Value::Obj(obj! { "a" => 1, "b" => 2 }))),
	);
	let source = WatchSource::getter({
		let instance = instance.clone();
		move || {
			let a = num(&instance.get("a")?);
			let b = num(&instance.get("b")?);
			Ok(Value::Num(a + b))
		}
	});
	let _watch = instance.watch(
		source,
		{
			let calls = calls.clone();
			move |new, _| {
				calls.borrow_mut().push(num(new));
				Ok(())
			}
		},
		WatchOptions::new(),
	);

	instance.set("a", 10);
	instance.set("b", 20);
	assert_eq!(*calls.borrow(), vec![12.0, 30.0]);
}

#[test]
fn methods_bind_to_the_instance() {
	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "count" => 0 })))
			.method("bump", |this, args| {
				let by = args.first().and_then(Value::as_num).unwrap_or(1.0);
				let count = num(&this.get("count")?);
				this.set("count", Value::Num(count + by));
				this.get("count")
			}),
	);

	assert_eq!(
		instance.call("bump", &[Value::Num(2.0)]).unwrap(),
		Value::Num(2.0)
	);

	// detached handle still resolves its receiver
	let bump = instance.method("bump").unwrap();
	assert_eq!(bump.call(&[]).unwrap(), Value::Num(3.0));
	assert_eq!(instance.get("count").unwrap(), Value::Num(3.0));
}

#[test]
fn missing_method_body_becomes_noop() {
	let warnings = Rc::new(RefCell::new(Vec::new()));
	reactive::set_warn_hook({
		let warnings = warnings.clone();
		move |message| warnings.borrow_mut().push(message.to_string())
	});

	let instance = Instance::new(Options::new().method_missing("ghost"));
	assert!(instance.call("ghost", &[]).unwrap().is_null());
	assert!(warnings
		.borrow()
		.iter()
		.any(|message| message.contains("has no body")));

	reactive::clear_warn_hook();
}

#[test]
fn inert_computed_recomputes_every_read() {
	let runs = Rc::new(Cell::new(0u32));
	let instance = Instance::new(
		Options::new()
			.inert()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.computed("b", {
				let runs = runs.clone();
				move |this| {
					runs.set(runs.get() + 1);
					let a = num(&this.get("a")?);
					Ok(Value::Num(a * 2.0))
				}
			}),
	);

	assert_eq!(instance.get("b").unwrap(), Value::Num(2.0));
	assert_eq!(instance.get("b").unwrap(), Value::Num(2.0));
	assert_eq!(runs.get(), 2);
}

#[test]
fn computed_collision_and_assignment_warn() {
	let warnings = Rc::new(RefCell::new(Vec::new()));
	reactive::set_warn_hook({
		let warnings = warnings.clone();
		move |message| warnings.borrow_mut().push(message.to_string())
	});

	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.computed("a", |_| Ok(Value::Null))
			.computed("b", |this| this.get("a")),
	);
	assert!(warnings
		.borrow()
		.iter()
		.any(|message| message.contains("already defined in data")));
	// "a" still reads as data
	assert_eq!(instance.slot("a"), Some(SlotKind::Data));

	instance.set("b", 99);
	assert!(warnings
		.borrow()
		.iter()
		.any(|message| message.contains("no setter")));
	assert_eq!(instance.get("b").unwrap(), Value::Num(1.0));

	reactive::clear_warn_hook();
}

#[test]
fn computed_setter_routes_assignment() {
	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.computed_with_setter(
				"double",
				|this| Ok(Value::Num(num(&this.get("a")?) * 2.0)),
				|this, value| {
					let half = value.as_num().unwrap_or(0.0) / 2.0;
					this.set("a", half);
					Ok(())
				},
			),
	);
	assert_eq!(instance.get("double").unwrap(), Value::Num(2.0));

	instance.set("double", 10);
	assert_eq!(instance.get("a").unwrap(), Value::Num(5.0));
	assert_eq!(instance.get("double").unwrap(), Value::Num(10.0));
}

#[test]
fn failing_computed_setter_is_reported() {
	let reported = Rc::new(RefCell::new(Vec::new()));
	reactive::set_error_hook({
		let reported = reported.clone();
		move |_, _, context| reported.borrow_mut().push(context.to_string())
	});

	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.computed_with_setter(
				"double",
				|this| Ok(Value::Num(num(&this.get("a")?) * 2.0)),
				|_, _| Err(Error::msg("setter failed")),
			),
	);
	instance.set("double", 10);
	assert_eq!(reported.borrow().len(), 1);
	assert!(reported.borrow()[0].contains("setter for computed field \"double\""));

	reactive::clear_error_hook();
}

#[test]
fn watch_handler_may_name_a_method() {
	let seen = Rc::new(RefCell::new(Vec::new()));
	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.watch_method("a", "record")
			.method("record", {
				let seen = seen.clone();
				move |_, args| {
					let new = args.first().and_then(Value::as_num).unwrap_or(f64::NAN);
					let old = args.get(1).and_then(Value::as_num).unwrap_or(f64::NAN);
					seen.borrow_mut().push((new, old));
					Ok(Value::Null)
				}
			}),
	);

	instance.set("a", 2);
	assert_eq!(*seen.borrow(), vec![(2.0, 1.0)]);
}

#[test]
fn computed_errors_propagate_to_the_reader() {
	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.computed("bad", |_| Err(Error::msg("computed exploded"))),
	);
	assert!(instance.get("bad").is_err());
}

#[test]
fn immediate_callback_errors_are_reported() {
	let reported = Rc::new(RefCell::new(Vec::new()));
	reactive::set_error_hook({
		let reported = reported.clone();
		move |_, _, context| reported.borrow_mut().push(context.to_string())
	});

	let instance = Instance::new(Options::new().data(|_| Ok(Value::Obj(obj! { "a" => 1 }))));
	let _watch = instance.watch(
		"a",
		|_, _| Err(Error::msg("handler failed")),
		WatchOptions::new().immediate(),
	);
	assert_eq!(reported.borrow().len(), 1);
	assert!(reported.borrow()[0].contains("immediate watcher \"a\""));

	reactive::clear_error_hook();
}

#[test]
fn teardown_silences_all_watchers() {
	let calls = Rc::new(Cell::new(0u32));
	let instance = Instance::new(
		Options::new()
			.data(|_| Ok(Value::Obj(obj! { "a" => 1 })))
			.watch("a", {
				let calls = calls.clone();
				move |_, _, _| {
					calls.set(calls.get() + 1);
					Ok(())
				}
			}),
	);

	instance.set("a", 2);
	assert_eq!(calls.get(), 1);

	instance.teardown();
	assert!(instance.is_destroyed());
	instance.set("a", 3);
	assert_eq!(calls.get(), 1);
}

#[test]
fn batched_instance_writes_coalesce() {
	let mock = mock::SharedMock::new();
	let instance = Instance::new(Options::new().data(|_| Ok(Value::Obj(obj! { "a" => 1 }))));
	let _watch = instance.watch(
		"a",
		{
			let mock = mock.clone();
			move |new, _| {
				mock.get().trigger(new.as_num().unwrap_or(0.0));
				Ok(())
			}
		},
		WatchOptions::new(),
	);

	mock.get().expect_trigger().times(1).return_const(());
	reactive::batch(|| {
		instance.set("a", 2);
		instance.set("a", 3);
	});
	mock.get().checkpoint();
}
