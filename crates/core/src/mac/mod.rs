/// A macro that allows lazily parsing a value from the environment variable,
/// with a fallback default value if the variable is not set or parsing fails.
///
/// # Parameters
///
/// - `$key`: An expression representing the name of the environment variable.
/// - `$t`: The type of the value to be parsed.
/// - `$default`: The default value to fall back to if the environment variable is not set or
///   parsing fails.
///
/// # Return Value
///
/// A lazy static variable of type `std::sync::LazyLock`, which holds the parsed
/// value from the environment variable or the default value.
#[macro_export]
macro_rules! lazy_env_parse {
	// With no default specified
	($key:expr, Option<$t:ty>) => {
		std::sync::LazyLock::new(|| std::env::var($key).ok().and_then(|s| s.parse::<$t>().ok()))
	};
	// With a closure for the default value
	($key:expr, $t:ty, || $default:expr) => {
		std::sync::LazyLock::new(|| {
			std::env::var($key).ok().and_then(|s| s.parse::<$t>().ok()).unwrap_or_else(|| $default)
		})
	};
	// With a static expression for the default value
	($key:expr, $t:ty, $default:expr) => {
		std::sync::LazyLock::new(|| {
			std::env::var($key).ok().and_then(|s| s.parse::<$t>().ok()).unwrap_or($default)
		})
	};
}

/// Creates a new b-tree map of key-value pairs.
#[macro_export]
macro_rules! map {
	($($k:expr => $v:expr),* $(,)?) => {{
		let mut m = ::std::collections::BTreeMap::new();
		$(m.insert($k.into(), $v.into());)*
		m
	}};
}

/// Throws an unreachable error with location details
macro_rules! fail {
	($($arg:tt)+) => {
		return Err(::anyhow::Error::new($crate::err::Error::unreachable(format_args!($($arg)*))))
	};
}

#[cfg(test)]
mod test {
	use crate::err::Error;

	fn fail_func() -> Result<(), anyhow::Error> {
		fail!("Reached unreachable code");
	}

	fn fail_func_args() -> Result<(), anyhow::Error> {
		fail!("Found {} but expected {}", "test", "other");
	}

	#[test]
	fn fail_literal() {
		let Ok(Error::Unreachable(msg)) = fail_func().unwrap_err().downcast() else {
			panic!()
		};
		assert!(msg.ends_with("src/mac/mod.rs:57: Reached unreachable code"), "{msg}");
	}

	#[test]
	fn fail_arguments() {
		let Ok(Error::Unreachable(msg)) = fail_func_args().unwrap_err().downcast() else {
			panic!()
		};
		assert!(msg.ends_with("src/mac/mod.rs:61: Found test but expected other"), "{msg}");
	}

	#[test]
	fn map_converts_entries() {
		let m: std::collections::BTreeMap<String, String> = map! { "a" => "x", "b" => "y" };
		assert_eq!(m.len(), 2);
		assert_eq!(m["b"], "y");
	}
}
