use crate::val::{Object, Value};

/// A minimal expression evaluated against a single document.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
	/// A constant value
	Literal(Value),
	/// The value at a dotted field path, or NONE if it is missing
	Field(String),
	/// The whole document
	Root,
	/// An object built from named sub-expressions
	Object(Vec<(String, Expr)>),
}

impl Expr {
	/// Shorthand for a field path expression.
	pub fn field(path: impl Into<String>) -> Self {
		Self::Field(path.into())
	}

	pub fn evaluate(&self, doc: &Value) -> Value {
		match self {
			Expr::Literal(v) => v.clone(),
			Expr::Field(path) => doc.pick(path),
			Expr::Root => doc.clone(),
			Expr::Object(fields) => {
				let mut out = Object::new();
				for (name, expr) in fields {
					let v = expr.evaluate(doc);
					// Missing fields are left out, as they would be in the source document
					if !v.is_none() {
						out.insert(name.clone(), v);
					}
				}
				out.into()
			}
		}
	}
}
