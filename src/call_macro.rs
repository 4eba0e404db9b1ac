//! Argument helpers for both ends of a call.
//!
//! Callers can skip building `Vec<Value>` by hand:
//!
//! ```rust,no_run
//! use wtfork::{call, Peer};
//!
//! # async fn demo(child: Peer) -> wtfork::Result<()> {
//! let echoed: String = call!(child.methods(), simples("a")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Method bodies can pull typed arguments out of theirs:
//!
//! ```rust
//! use wtfork::{ArgsExtractor, MethodRegistry};
//! use serde_json::json;
//!
//! let registry = MethodRegistry::builder()
//!     .sync_method("add", |args| {
//!         let args = ArgsExtractor::new(args);
//!         let a: i64 = args.get(0)?;
//!         let b: i64 = args.get(1)?;
//!         Ok(json!(a + b))
//!     })
//!     .build();
//! ```

use crate::error::{Result, WtforkError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Typed positional access to call arguments.
#[derive(Debug, Clone)]
pub struct ArgsExtractor {
    args: Vec<Value>,
}

impl ArgsExtractor {
    pub fn new(args: Vec<Value>) -> Self {
        Self { args }
    }

    /// Argument at `index`, converted to `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.args.get(index).ok_or_else(|| missing(index))?;
        serde_json::from_value(value.clone()).map_err(WtforkError::Json)
    }

    /// Argument at `index` if present. A missing or `null` argument is `None`.
    pub fn get_opt<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>> {
        match self.args.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(WtforkError::Json),
        }
    }

    /// Remove and convert the argument at `index`. Later arguments shift down.
    pub fn take<T: DeserializeOwned>(&mut self, index: usize) -> Result<T> {
        if index >= self.args.len() {
            return Err(missing(index));
        }
        serde_json::from_value(self.args.remove(index)).map_err(WtforkError::Json)
    }

    pub fn remaining(&self) -> &[Value] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

fn missing(index: usize) -> WtforkError {
    WtforkError::InvalidArgument(format!("Missing argument at index {}", index))
}

/// Conversion of a single call argument to JSON.
///
/// Fails with [`WtforkError::Json`] when the value has no JSON form, such
/// as a map with non-string keys. Nothing is sent in that case.
pub trait ToJsonArg {
    fn to_json(self) -> Result<Value>;
}

impl ToJsonArg for Value {
    fn to_json(self) -> Result<Value> {
        Ok(self)
    }
}

macro_rules! to_json_via_from {
    ($($ty:ty),*) => {
        $(
            impl ToJsonArg for $ty {
                fn to_json(self) -> Result<Value> {
                    Ok(Value::from(self))
                }
            }
        )*
    };
}

to_json_via_from!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, bool, String);

impl ToJsonArg for &str {
    fn to_json(self) -> Result<Value> {
        Ok(Value::String(self.to_string()))
    }
}

impl<T: Serialize> ToJsonArg for &T {
    fn to_json(self) -> Result<Value> {
        serde_json::to_value(self).map_err(WtforkError::Json)
    }
}

impl<T: Serialize> ToJsonArg for Vec<T> {
    fn to_json(self) -> Result<Value> {
        serde_json::to_value(self).map_err(WtforkError::Json)
    }
}

impl<T: Serialize> ToJsonArg for Option<T> {
    fn to_json(self) -> Result<Value> {
        serde_json::to_value(self).map_err(WtforkError::Json)
    }
}

/// Conversion of a tuple of arguments to a call's argument list. The first
/// argument that fails to convert fails the whole list.
pub trait CallArgs {
    fn to_json_args(self) -> Result<Vec<Value>>;
}

impl CallArgs for () {
    fn to_json_args(self) -> Result<Vec<Value>> {
        Ok(vec![])
    }
}

impl CallArgs for Vec<Value> {
    fn to_json_args(self) -> Result<Vec<Value>> {
        Ok(self)
    }
}

macro_rules! call_args_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: ToJsonArg),+> CallArgs for ($($name,)+) {
            fn to_json_args(self) -> Result<Vec<Value>> {
                Ok(vec![$(self.$idx.to_json()?),+])
            }
        }
    };
}

call_args_tuple!(A.0);
call_args_tuple!(A.0, B.1);
call_args_tuple!(A.0, B.1, C.2);
call_args_tuple!(A.0, B.1, C.2, D.3);
call_args_tuple!(A.0, B.1, C.2, D.3, E.4);
call_args_tuple!(A.0, B.1, C.2, D.3, E.4, F.5);

/// Call an advertised remote method by identifier.
///
/// `call!(methods, name(a, b))` converts `(a, b)` through [`CallArgs`] and
/// calls `methods.call("name", args)`, where `methods` is a
/// [`RemoteMethods`](crate::RemoteMethods). Takes up to six arguments. An
/// argument with no JSON form fails the call before anything is sent. The
/// result type comes from inference.
#[macro_export]
macro_rules! call {
    ($methods:expr, $func:ident($($arg:expr),* $(,)?)) => {
        async {
            match $crate::CallArgs::to_json_args(($($arg,)*)) {
                Ok(args) => $methods.call(stringify!($func), args).await,
                Err(e) => Err(e),
            }
        }
    };
}

/// Like [`call!`] with the result type spelled out.
#[macro_export]
macro_rules! call_with_type {
    ($methods:expr, $func:ident, ($($arg:expr),* $(,)?), $ret:ty) => {
        async {
            match $crate::CallArgs::to_json_args(($($arg,)*)) {
                Ok(args) => $methods.call::<$ret>(stringify!($func), args).await,
                Err(e) => Err(e),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{ErrorKind, RemoteError};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_get_and_take() {
        let mut args = ArgsExtractor::new(vec![json!(10), json!("x"), json!(true)]);
        let a: i64 = args.get(0).unwrap();
        let s: String = args.get(1).unwrap();
        assert_eq!((a, s.as_str()), (10, "x"));

        let first: i64 = args.take(0).unwrap();
        let next: String = args.take(0).unwrap();
        assert_eq!(first, 10);
        assert_eq!(next, "x");
        assert_eq!(args.remaining(), [json!(true)]);
    }

    #[test]
    fn test_missing_and_mistyped_arguments() {
        let args = ArgsExtractor::new(vec![json!("not a number")]);
        assert!(matches!(args.get::<i64>(3), Err(WtforkError::InvalidArgument(_))));
        assert!(matches!(args.get::<i64>(0), Err(WtforkError::Json(_))));
    }

    #[test]
    fn test_extraction_errors_become_type_errors() {
        fn body(args: Vec<Value>) -> std::result::Result<Value, RemoteError> {
            let n: i64 = ArgsExtractor::new(args).get(0)?;
            Ok(json!(n))
        }
        let err = body(vec![json!("oops")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_get_opt() {
        let args = ArgsExtractor::new(vec![json!(null), json!(5)]);
        assert_eq!(args.get_opt::<i64>(0).unwrap(), None);
        assert_eq!(args.get_opt::<i64>(1).unwrap(), Some(5));
        assert_eq!(args.get_opt::<i64>(9).unwrap(), None);
    }

    #[test]
    fn test_to_json_arg() {
        assert_eq!(5i64.to_json().unwrap(), json!(5));
        assert_eq!("hello".to_json().unwrap(), json!("hello"));
        assert_eq!(vec![1u8, 2].to_json().unwrap(), json!([1, 2]));
        assert_eq!(None::<i32>.to_json().unwrap(), json!(null));
        assert_eq!((&json!({"a": 1})).to_json().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_unrepresentable_argument_is_an_error() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys have no JSON form");

        assert!(matches!((&bad).to_json(), Err(WtforkError::Json(_))));
        assert!(matches!(vec![bad.clone()].to_json(), Err(WtforkError::Json(_))));
        assert!(matches!(Some(bad.clone()).to_json(), Err(WtforkError::Json(_))));
        assert!(matches!(("ok", &bad).to_json_args(), Err(WtforkError::Json(_))));
    }

    #[test]
    fn test_call_args_tuples() {
        assert!(().to_json_args().unwrap().is_empty());
        assert_eq!(("a",).to_json_args().unwrap(), vec![json!("a")]);
        assert_eq!(
            (1i64, "b", false, 2.5f64, 7u8, String::from("z")).to_json_args().unwrap(),
            vec![json!(1), json!("b"), json!(false), json!(2.5), json!(7), json!("z")]
        );
    }
}
