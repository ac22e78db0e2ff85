//! Parameter-space algebra for combinatorial test-case generation.
//!
//! A [`ParamSpec`] is a declarative description of a space of test cases:
//! named dimensions combined by cartesian product, filtered by predicates,
//! and expanded by value-dependent generators. Evaluating a spec yields a
//! lazy, ordered, restartable sequence of [`CaseParams`] - one concrete
//! assignment per case - without ever touching a device.
//!
//! # Example
//!
//! ```
//! use prism::params::params;
//!
//! let spec = params()
//!     .combine("topology", ["point-list", "line-list"])
//!     .toggle("indirect")
//!     .unless(|p| Ok(p.str("topology")? == "point-list" && p.bool("indirect")?));
//!
//! let ids: Vec<String> = spec
//!     .cases()
//!     .map(|c| c.map(|c| c.id_string()))
//!     .collect::<prism::Result<_>>()
//!     .unwrap();
//! assert_eq!(ids.len(), 3);
//! ```

use crate::error::{Error, Result};
use crate::oracle::Color;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// ParamValue
// ---------------------------------------------------------------------------

/// One concrete value bound to a dimension.
///
/// `Floats` carries small float vectors (colors, bounds); `Absent` is an
/// intentionally-missing optional value, distinct from an unbound dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Floats(Vec<f64>),
    Absent,
}

impl ParamValue {
    /// Short kind name used in type-mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
            ParamValue::Floats(_) => "float list",
            ParamValue::Absent => "absent",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
            ParamValue::Floats(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            ParamValue::Absent => write!(f, "none"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::Floats(v)
    }
}

impl From<Color> for ParamValue {
    fn from(c: Color) -> Self {
        ParamValue::Floats(c.to_array().to_vec())
    }
}

impl From<Option<Color>> for ParamValue {
    fn from(c: Option<Color>) -> Self {
        match c {
            Some(c) => c.into(),
            None => ParamValue::Absent,
        }
    }
}

// ---------------------------------------------------------------------------
// CaseParams
// ---------------------------------------------------------------------------

/// A fragment of dimension assignments, as produced by expansion generators.
pub type Fragment = Vec<(String, ParamValue)>;

/// One concrete, fully-bound assignment of values to dimensions.
///
/// Entries keep dimension declaration order; a `CaseParams` is immutable
/// once produced - binding and merging return new values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaseParams {
    entries: Vec<(String, ParamValue)>,
}

impl CaseParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// Iterate entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    fn require(&self, name: &str) -> Result<&ParamValue> {
        self.get(name)
            .ok_or_else(|| Error::usage(format!("dimension '{}' is not bound", name)))
    }

    fn type_error(&self, name: &str, expected: &str, actual: &ParamValue) -> Error {
        Error::usage(format!(
            "dimension '{}' is {}, not {}",
            name,
            actual.kind(),
            expected
        ))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            ParamValue::Bool(v) => Ok(*v),
            other => Err(self.type_error(name, "bool", other)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            ParamValue::Int(v) => Ok(*v),
            other => Err(self.type_error(name, "int", other)),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        match self.require(name)? {
            ParamValue::Float(v) => Ok(*v),
            other => Err(self.type_error(name, "float", other)),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            ParamValue::Str(v) => Ok(v),
            other => Err(self.type_error(name, "string", other)),
        }
    }

    pub fn floats(&self, name: &str) -> Result<&[f64]> {
        match self.require(name)? {
            ParamValue::Floats(v) => Ok(v),
            other => Err(self.type_error(name, "float list", other)),
        }
    }

    /// A 4-channel color stored as a float list.
    pub fn color(&self, name: &str) -> Result<Color> {
        Color::from_slice(self.floats(name)?)
    }

    /// A color that may be intentionally absent (e.g. no blend constant).
    pub fn opt_color(&self, name: &str) -> Result<Option<Color>> {
        match self.require(name)? {
            ParamValue::Absent => Ok(None),
            ParamValue::Floats(v) => Color::from_slice(v).map(Some),
            other => Err(self.type_error(name, "float list or absent", other)),
        }
    }

    /// Bind one new dimension, returning a new `CaseParams`.
    ///
    /// Re-binding an already-bound name is a usage error: a silent re-bind
    /// hides spec-construction bugs (see also [`CaseParams::merged`]).
    pub fn bind(&self, name: &str, value: ParamValue) -> Result<CaseParams> {
        if self.contains(name) {
            return Err(Error::usage(format!(
                "dimension '{}' is already bound",
                name
            )));
        }
        let mut entries = self.entries.clone();
        entries.push((name.to_string(), value));
        Ok(CaseParams { entries })
    }

    /// Merge a fragment of additional assignments into a new `CaseParams`.
    pub fn merged_fragment(&self, fragment: &[(String, ParamValue)]) -> Result<CaseParams> {
        let mut out = self.clone();
        for (name, value) in fragment {
            out = out.bind(name, value.clone())?;
        }
        Ok(out)
    }

    /// Merge another `CaseParams` (e.g. a subcase) into a new one.
    pub fn merged(&self, other: &CaseParams) -> Result<CaseParams> {
        self.merged_fragment(&other.entries)
    }

    /// Deterministic, stable serialization of this assignment, e.g.
    /// `topology=line-strip;indirect=true;primitiveRestart=false`.
    pub fn id_string(&self) -> String {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        parts.join(";")
    }
}

impl fmt::Display for CaseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id_string())
    }
}

// ---------------------------------------------------------------------------
// ParamSpec combinators
// ---------------------------------------------------------------------------

type Pred = Rc<dyn Fn(&CaseParams) -> Result<bool>>;
type ExpandFn = Rc<dyn Fn(&CaseParams) -> Result<Box<dyn Iterator<Item = Fragment>>>>;
type SubcasesFn = Rc<dyn Fn(&CaseParams) -> Result<ParamSpec>>;

#[derive(Clone)]
enum Op {
    Combine { name: String, values: Vec<ParamValue> },
    Unless(Pred),
    Expand(ExpandFn),
    Subcases(SubcasesFn),
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Combine { name, values } => f
                .debug_struct("Combine")
                .field("name", name)
                .field("values", &values.len())
                .finish(),
            Op::Unless(_) => write!(f, "Unless(..)"),
            Op::Expand(_) => write!(f, "Expand(..)"),
            Op::Subcases(_) => write!(f, "Subcases(..)"),
        }
    }
}

/// A declarative parameter-space specification.
///
/// Combinators are persistent: each returns a new spec value and never
/// mutates the receiver's already-shared state, so a common prefix can be
/// extended in different directions safely. Evaluation via [`cases`] is
/// lazy end-to-end and restartable.
///
/// [`cases`]: ParamSpec::cases
#[derive(Debug, Clone, Default)]
pub struct ParamSpec {
    ops: Vec<Op>,
}

/// Start an empty parameter spec (a single case with no dimensions).
pub fn params() -> ParamSpec {
    ParamSpec::default()
}

impl ParamSpec {
    /// Cartesian-product the current case list with a new named dimension.
    ///
    /// With N existing cases and M values the result has N*M cases, the new
    /// dimension varying fastest. An empty value list yields an empty case
    /// list for the whole spec.
    pub fn combine<V>(mut self, name: &str, values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<ParamValue>,
    {
        self.ops.push(Op::Combine {
            name: name.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Sugar for `combine(name, [false, true])`.
    pub fn toggle(self, name: &str) -> Self {
        self.combine(name, [false, true])
    }

    /// Remove every case for which `pred` holds.
    ///
    /// Referencing a dimension the predicate needs before it is bound fails
    /// case generation with a usage error rather than silently passing.
    pub fn unless(mut self, pred: impl Fn(&CaseParams) -> Result<bool> + 'static) -> Self {
        self.ops.push(Op::Unless(Rc::new(pred)));
        self
    }

    /// For each case, emit one child per fragment the generator yields.
    ///
    /// The generator's output is consumed lazily; a case for which it yields
    /// no fragments contributes no children.
    pub fn expand<I>(mut self, generator: impl Fn(&CaseParams) -> Result<I> + 'static) -> Self
    where
        I: Iterator<Item = Fragment> + 'static,
    {
        self.ops.push(Op::Expand(Rc::new(move |parent| {
            let iter = generator(parent)?;
            Ok(Box::new(iter) as Box<dyn Iterator<Item = Fragment>>)
        })));
        self
    }

    /// For each case, evaluate a second-level spec and merge each of its
    /// cases with the parent.
    ///
    /// Unlike [`expand`], the dependent dimensions form their own algebra
    /// (they may themselves use `combine`/`unless`/...).
    ///
    /// [`expand`]: ParamSpec::expand
    pub fn subcases(mut self, f: impl Fn(&CaseParams) -> Result<ParamSpec> + 'static) -> Self {
        self.ops.push(Op::Subcases(Rc::new(f)));
        self
    }

    /// Evaluate the spec into a fresh, lazy case iterator.
    ///
    /// Each call starts an independent traversal; generation is
    /// referentially transparent, so repeated calls yield the same sequence.
    pub fn cases(&self) -> CaseIter {
        let mut iter: CaseStream = Box::new(std::iter::once(Ok(CaseParams::new())));
        for op in &self.ops {
            iter = apply_op(iter, op.clone());
        }
        CaseIter { inner: iter }
    }

    /// Count the cases by running one full (buffered-free) traversal.
    pub fn case_count(&self) -> Result<usize> {
        let mut count = 0;
        for case in self.cases() {
            case?;
            count += 1;
        }
        Ok(count)
    }
}

type CaseStream = Box<dyn Iterator<Item = Result<CaseParams>>>;

fn apply_op(prev: CaseStream, op: Op) -> CaseStream {
    match op {
        Op::Combine { name, values } => Box::new(prev.flat_map(move |res| -> CaseStream {
            match res {
                Ok(parent) => {
                    let name = name.clone();
                    Box::new(
                        values
                            .clone()
                            .into_iter()
                            .map(move |value| parent.bind(&name, value)),
                    )
                }
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        })),
        Op::Unless(pred) => Box::new(prev.filter_map(move |res| match res {
            Ok(case) => match pred(&case) {
                Ok(true) => None,
                Ok(false) => Some(Ok(case)),
                Err(e) => Some(Err(e)),
            },
            Err(e) => Some(Err(e)),
        })),
        Op::Expand(generator) => Box::new(prev.flat_map(move |res| -> CaseStream {
            match res {
                Ok(parent) => match generator(&parent) {
                    Ok(fragments) => {
                        Box::new(fragments.map(move |frag| parent.merged_fragment(&frag)))
                    }
                    Err(e) => Box::new(std::iter::once(Err(e))),
                },
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        })),
        Op::Subcases(f) => Box::new(prev.flat_map(move |res| -> CaseStream {
            match res {
                Ok(parent) => match f(&parent) {
                    Ok(sub) => Box::new(
                        sub.cases()
                            .map(move |subres| subres.and_then(|s| parent.merged(&s))),
                    ),
                    Err(e) => Box::new(std::iter::once(Err(e))),
                },
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        })),
    }
}

// ---------------------------------------------------------------------------
// CaseIter
// ---------------------------------------------------------------------------

/// Lazy iterator over the concrete cases of a [`ParamSpec`].
///
/// Yields `Err` for generation-time usage errors (unbound dimension in a
/// predicate, dimension re-binding, merge collision); consumers treat the
/// first error as fatal to the whole group.
pub struct CaseIter {
    inner: CaseStream,
}

impl Iterator for CaseIter {
    type Item = Result<CaseParams>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
