pub use enclose::*;

/// Object literal: `obj! { "a" => 1, "nested" => obj! { "b" => true } }`.
#[macro_export]
macro_rules! obj {
	() => { $crate::Obj::new() };
	($($key:expr => $value:expr),+ $(,)?) => {{
		let obj = $crate::Obj::new();
		$( obj.insert($key, $crate::Value::from($value)); )+
		obj
	}};
}

/// List literal: `list![1, 2, "three"]`.
#[macro_export]
macro_rules! list {
	() => { $crate::Arr::new() };
	($($value:expr),+ $(,)?) => {{
		let arr = $crate::Arr::new();
		$( arr.push($crate::Value::from($value)); )+
		arr
	}};
}

#[macro_export]
macro_rules! batch {
	(( $($d_tt:tt)* ) => $($b:tt)*) => {
		$crate::batch($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
	};
	($($b:tt)*) => {
		$crate::batch(move || { $($b)* })
	};
}
