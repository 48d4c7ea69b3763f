pub mod macros;

mod dep;
mod error;
mod instance;
mod observer;
mod scheduler;
mod traverse;
mod value;
mod watcher;

pub use dep::Dep;
pub use error::{clear_error_hook, clear_warn_hook, set_error_hook, set_warn_hook, Error};
pub use instance::{
	BoundMethod, ComputedFn, ComputedSetter, DataFactory, Instance, Method, Options, PropOptions,
	SlotKind, WatchHandler, WatchOptions,
};
pub use observer::{define_reactive, del, observe, set, Observer, SetterHook};
pub use scheduler::{batch, in_batch};
pub use value::{same_value, Arr, Obj, Value};
pub use watcher::{Callback, Getter, Unwatch, WatchSource, Watcher, WatcherOptions};
