use std::cell::RefCell;
use std::rc::Rc;

use crate::instance::Instance;

/// Error produced by user-supplied code (data factories, watch getters and
/// callbacks, computed getters, methods).
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{0}")]
	Message(String),
}

impl Error {
	pub fn msg(message: impl Into<String>) -> Self {
		Error::Message(message.into())
	}
}

impl From<String> for Error {
	fn from(message: String) -> Self {
		Error::Message(message)
	}
}

impl From<&str> for Error {
	fn from(message: &str) -> Self {
		Error::Message(message.to_string())
	}
}

type ErrorHook = Rc<dyn Fn(&Error, Option<&Instance>, &str)>;
type WarnHook = Rc<dyn Fn(&str)>;

thread_local! {
	static ERROR_HOOK: RefCell<Option<ErrorHook>> = RefCell::new(None);
	static WARN_HOOK: RefCell<Option<WarnHook>> = RefCell::new(None);
}

/// Route reported errors to a caller-supplied handler instead of the log.
/// The handler receives the error, the owning instance if any, and a label
/// identifying where the error originated.
pub fn set_error_hook(hook: impl Fn(&Error, Option<&Instance>, &str) + 'static) {
	ERROR_HOOK.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
}

pub fn clear_error_hook() {
	ERROR_HOOK.with(|slot| *slot.borrow_mut() = None);
}

/// Route advisory warnings to a caller-supplied handler instead of the log.
pub fn set_warn_hook(hook: impl Fn(&str) + 'static) {
	WARN_HOOK.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
}

pub fn clear_warn_hook() {
	WARN_HOOK.with(|slot| *slot.borrow_mut() = None);
}

pub(crate) fn handle_error(err: &Error, instance: Option<&Instance>, context: &str) {
	let hook = ERROR_HOOK.with(|slot| slot.borrow().clone());
	if let Some(hook) = hook {
		hook(err, instance, context);
		return;
	}
	match instance.and_then(|instance| instance.name()) {
		Some(name) => tracing::error!(instance = %name, error = %err, "error in {context}"),
		None => tracing::error!(error = %err, "error in {context}"),
	}
}

pub(crate) fn warn(message: &str) {
	let hook = WARN_HOOK.with(|slot| slot.borrow().clone());
	if let Some(hook) = hook {
		hook(message);
		return;
	}
	tracing::warn!("{}", message);
}
