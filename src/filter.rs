//! Attribute filters over model collections.
//!
//! A [`Filter`] is an AND of named-field patterns plus an optional predicate
//! over the whole object. Field patterns are given as text and interpreted
//! when the filter runs:
//!
//! - `"dend"` matches fields containing `dend` (case-sensitive),
//! - `"regex:^dend\[\d+\]$"` matches with a regular expression, anywhere in
//!   the field unless anchored,
//! - `"soma,apic"` matches fields containing any of the comma-separated parts,
//! - [`Pattern::func`] runs a closure over the field value,
//! - [`Pattern::Any`] accepts every value of an existing field.
//!
//! A pattern on a field the object does not expose fails for that object.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{OnceLock, RwLock};

use regex::Regex;

use crate::error::{LookupError, ModelError, ModelResult, ValidationError};
use crate::wrappers::Removable;

const REGEX_PREFIX: &str = "regex:";
const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

/// Compiles a regular expression, reusing earlier compilations.
pub(crate) fn cached_regex(pattern: &str) -> ModelResult<Regex> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| ModelError::internal("regex cache lock poisoned"))?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = Regex::new(pattern).map_err(|e| ValidationError::InvalidFilterPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut guard = cache
        .write()
        .map_err(|_| ModelError::internal("regex cache lock poisoned"))?;
    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }
    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

/// Value of a queryable field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text, eg. a name.
    Str(String),
    /// Floating point number.
    Num(f64),
    /// Integer.
    Int(i64),
    /// Flag.
    Bool(bool),
}

impl FieldValue {
    /// Text content, if this is a string field.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric content, if this is a numeric field.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Num(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Num(v)
    }
}

impl From<usize> for FieldValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Objects that expose named fields to filters.
pub trait Filterable {
    /// Returns the value of a field, or `None` if the object has no such field.
    fn field(&self, name: &str) -> Option<FieldValue>;
}

/// Closure over a field value.
pub type FieldFn = Rc<dyn Fn(&FieldValue) -> bool>;

/// A single field pattern.
#[derive(Clone)]
pub enum Pattern {
    /// Accepts any value.
    Any,
    /// Substring, `regex:` expression or comma-separated alternatives.
    Text(String),
    /// Arbitrary predicate.
    Func(FieldFn),
}

impl Pattern {
    /// Pattern backed by a closure.
    pub fn func(f: impl Fn(&FieldValue) -> bool + 'static) -> Self {
        Self::Func(Rc::new(f))
    }

    /// Regular expression pattern.
    #[must_use]
    pub fn regex(expr: &str) -> Self {
        Self::Text(format!("{REGEX_PREFIX}{expr}"))
    }

    /// Returns true for [`Pattern::Any`].
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    fn compile(&self) -> ModelResult<Matcher> {
        Ok(match self {
            Self::Any => Matcher::Any,
            Self::Func(f) => Matcher::Func(Rc::clone(f)),
            Self::Text(text) => {
                if let Some(expr) = text.strip_prefix(REGEX_PREFIX) {
                    Matcher::Regex(cached_regex(expr)?)
                } else if text.contains(',') {
                    let alternatives: Vec<String> = text
                        .split(',')
                        .map(|p| format!("({})", regex::escape(p)))
                        .collect();
                    Matcher::Regex(cached_regex(&alternatives.join("|"))?)
                } else {
                    Matcher::Contains(text.clone())
                }
            }
        })
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Text(t) => write!(f, "'{t}'"),
            Self::Func(_) => f.write_str("<fn>"),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for Pattern {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl<P: Into<Pattern>> From<Option<P>> for Pattern {
    fn from(p: Option<P>) -> Self {
        p.map_or(Self::Any, Into::into)
    }
}

enum Matcher {
    Any,
    Contains(String),
    Regex(Regex),
    Func(FieldFn),
}

impl Matcher {
    fn matches(&self, value: &FieldValue) -> bool {
        match self {
            Self::Any => true,
            Self::Func(f) => f(value),
            Self::Contains(s) => value.to_string().contains(s.as_str()),
            Self::Regex(re) => re.is_match(&value.to_string()),
        }
    }
}

/// Whole-object predicate.
pub type ObjFn<T> = Rc<dyn Fn(&T) -> bool>;

/// AND-combined field patterns and an optional whole-object predicate.
pub struct Filter<T> {
    fields: Vec<(String, Pattern)>,
    predicate: Option<ObjFn<T>>,
}

impl<T> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<T> Default for Filter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Filter<T> {
    /// A filter that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            predicate: None,
        }
    }

    /// Alias of [`Filter::new`], reads better at call sites.
    #[must_use]
    pub fn all() -> Self {
        Self::new()
    }

    /// Filter on the `name` field.
    #[must_use]
    pub fn name(pattern: impl Into<Pattern>) -> Self {
        Self::new().field("name", pattern)
    }

    /// Filter on the `tag` field.
    #[must_use]
    pub fn tag(pattern: impl Into<Pattern>) -> Self {
        Self::new().field("tag", pattern)
    }

    /// Filter with only a whole-object predicate.
    #[must_use]
    pub fn predicate(f: impl Fn(&T) -> bool + 'static) -> Self {
        Self::new().and_predicate(f)
    }

    /// Adds a field pattern.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, pattern: impl Into<Pattern>) -> Self {
        self.fields.push((name.into(), pattern.into()));
        self
    }

    /// Sets the whole-object predicate.
    #[must_use]
    pub fn and_predicate(mut self, f: impl Fn(&T) -> bool + 'static) -> Self {
        self.predicate = Some(Rc::new(f));
        self
    }

    /// Returns true when the filter asks for everything.
    ///
    /// Zero matches on a trivial filter is not an error.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.predicate.is_none() && self.fields.iter().all(|(_, p)| p.is_any())
    }
}

impl<T: Filterable> Filter<T> {
    fn compile(&self) -> ModelResult<CompiledFilter<'_, T>> {
        let fields = self
            .fields
            .iter()
            .map(|(name, p)| Ok((name.as_str(), p.compile()?)))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(CompiledFilter {
            fields,
            predicate: self.predicate.as_deref(),
        })
    }

    /// Tests one object.
    pub fn matches(&self, obj: &T) -> ModelResult<bool> {
        Ok(self.compile()?.matches(obj))
    }
}

impl<T> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<T> fmt::Display for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() && self.predicate.is_none() {
            return f.write_str("{all}");
        }
        f.write_str("{")?;
        let mut first = true;
        for (name, p) in &self.fields {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{name}={p}")?;
            first = false;
        }
        if self.predicate.is_some() {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str("obj_filter=<fn>")?;
        }
        f.write_str("}")
    }
}

struct CompiledFilter<'a, T> {
    fields: Vec<(&'a str, Matcher)>,
    predicate: Option<&'a dyn Fn(&T) -> bool>,
}

impl<T: Filterable> CompiledFilter<'_, T> {
    fn matches(&self, obj: &T) -> bool {
        if let Some(pred) = self.predicate {
            if !pred(obj) {
                return false;
            }
        }
        self.fields
            .iter()
            .all(|(name, m)| obj.field(name).is_some_and(|v| m.matches(&v)))
    }
}

/// Result of a lookup that unwraps single matches.
#[derive(Debug, Clone)]
pub enum Selection<T> {
    /// Exactly one object matched.
    One(T),
    /// Zero or several objects matched.
    Many(Vec<T>),
}

impl<T> Selection<T> {
    /// Number of selected objects.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(v) => v.len(),
        }
    }

    /// Returns true when nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single object, if exactly one matched.
    #[must_use]
    pub fn one(self) -> Option<T> {
        match self {
            Self::One(t) => Some(t),
            Self::Many(_) => None,
        }
    }

    /// All selected objects as a list.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(t) => vec![t],
            Self::Many(v) => v,
        }
    }
}

fn not_found<T>(collection: &str, filter: &Filter<T>) -> ModelError {
    LookupError::NotFound {
        collection: collection.to_string(),
        filter: filter.to_string(),
    }
    .into()
}

/// Returns every item matching `filter`, in collection order.
///
/// Zero matches is a [`LookupError::NotFound`] unless the filter is trivial.
pub fn filter<T: Filterable + Clone>(
    collection: &str,
    items: &[T],
    filter: &Filter<T>,
) -> ModelResult<Vec<T>> {
    let compiled = filter.compile()?;
    let found: Vec<T> = items.iter().filter(|o| compiled.matches(o)).cloned().collect();
    if found.is_empty() && !filter.is_trivial() {
        return Err(not_found(collection, filter));
    }
    Ok(found)
}

/// Like [`filter`], but unwraps a single match.
pub fn select<T: Filterable + Clone>(
    collection: &str,
    items: &[T],
    f: &Filter<T>,
) -> ModelResult<Selection<T>> {
    let mut found = filter(collection, items, f)?;
    if found.len() == 1 {
        if let Some(one) = found.pop() {
            return Ok(Selection::One(one));
        }
    }
    Ok(Selection::Many(found))
}

/// Returns the only item matching `filter`.
pub fn filter_one<T: Filterable + Clone>(
    collection: &str,
    items: &[T],
    f: &Filter<T>,
) -> ModelResult<T> {
    let mut found = filter(collection, items, f)?;
    match found.len() {
        1 => found.pop().ok_or_else(|| ModelError::internal("single match vanished")),
        0 => Err(not_found(collection, f)),
        count => Err(LookupError::Ambiguous {
            collection: collection.to_string(),
            filter: f.to_string(),
            count,
        }
        .into()),
    }
}

/// Detaches every item matching `filter` from `items` and removes it.
///
/// Returns the number of removed items.
pub fn remove<T: Filterable + Removable>(
    collection: &str,
    items: &mut Vec<T>,
    filter: &Filter<T>,
) -> ModelResult<usize> {
    let compiled = filter.compile()?;
    let (matched, kept): (Vec<T>, Vec<T>) = std::mem::take(items)
        .into_iter()
        .partition(|o| compiled.matches(o));
    *items = kept;

    if matched.is_empty() && !filter.is_trivial() {
        return Err(not_found(collection, filter));
    }
    for item in &matched {
        item.remove_now();
    }
    Ok(matched.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        name: String,
        size: i64,
        tag: Option<String>,
    }

    impl Item {
        fn new(name: &str, size: i64) -> Self {
            Self {
                name: name.to_string(),
                size,
                tag: None,
            }
        }
    }

    impl Filterable for Item {
        fn field(&self, name: &str) -> Option<FieldValue> {
            match name {
                "name" => Some(FieldValue::from(self.name.as_str())),
                "size" => Some(FieldValue::Int(self.size)),
                "tag" => self.tag.as_deref().map(FieldValue::from),
                _ => None,
            }
        }
    }

    fn items() -> Vec<Item> {
        vec![
            Item::new("soma", 1),
            Item::new("dend[0]", 2),
            Item::new("dend[1]", 3),
            Item::new("apic[0]", 4),
            Item::new("axon", 5),
        ]
    }

    fn names(v: &[Item]) -> Vec<&str> {
        v.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn test_substring() {
        let found = filter("items", &items(), &Filter::name("dend")).unwrap();
        assert_eq!(names(&found), vec!["dend[0]", "dend[1]"]);
    }

    #[test]
    fn test_substring_is_case_sensitive() {
        assert!(filter("items", &items(), &Filter::name("Dend")).is_err());
    }

    #[test]
    fn test_regex() {
        let found = filter("items", &items(), &Filter::name("regex:^(soma|axon)$")).unwrap();
        assert_eq!(names(&found), vec!["soma", "axon"]);

        let found = filter("items", &items(), &Filter::name(Pattern::regex(r"\[1\]"))).unwrap();
        assert_eq!(names(&found), vec!["dend[1]"]);
    }

    #[test]
    fn test_comma_alternatives_are_escaped() {
        let found = filter("items", &items(), &Filter::name("soma,apic[0]")).unwrap();
        assert_eq!(names(&found), vec!["soma", "apic[0]"]);
    }

    #[test]
    fn test_invalid_regex() {
        let err = filter("items", &items(), &Filter::name("regex:(")).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_func_and_predicate_are_anded() {
        let f = Filter::name("dend")
            .field("size", Pattern::func(|v| v.as_f64().is_some_and(|s| s > 2.0)));
        assert_eq!(names(&filter("items", &items(), &f).unwrap()), vec!["dend[1]"]);

        let f = Filter::name("dend").and_predicate(|i: &Item| i.size == 2);
        assert_eq!(names(&filter("items", &items(), &f).unwrap()), vec!["dend[0]"]);

        let f = Filter::predicate(|i: &Item| i.size > 3);
        assert_eq!(names(&filter("items", &items(), &f).unwrap()), vec!["apic[0]", "axon"]);
    }

    #[test]
    fn test_missing_field_fails_the_match() {
        let mut all = items();
        all[0].tag = Some("exc".to_string());
        let found = filter("items", &all, &Filter::tag(Pattern::Any)).unwrap();
        assert_eq!(names(&found), vec!["soma"]);

        let f = Filter::name("soma").field("colour", Pattern::Any);
        assert!(filter("items", &all, &f).unwrap_err().is_lookup());
    }

    #[test]
    fn test_empty_results() {
        let err = filter("items", &items(), &Filter::name("basal")).unwrap_err();
        assert!(err.is_lookup());
        assert!(format!("{err}").contains("basal"));

        let found = filter::<Item>("items", &[], &Filter::all()).unwrap();
        assert!(found.is_empty());
        let found = filter::<Item>("items", &[], &Filter::name(None::<&str>)).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_select_unwraps_single() {
        let one = select("items", &items(), &Filter::name("soma")).unwrap();
        assert_eq!(one.one().map(|i| i.name), Some("soma".to_string()));

        let many = select("items", &items(), &Filter::name("dend")).unwrap();
        assert_eq!(many.len(), 2);
        assert!(many.clone().one().is_none());
        assert_eq!(many.into_vec().len(), 2);
    }

    #[test]
    fn test_filter_one() {
        assert_eq!(filter_one("items", &items(), &Filter::name("axon")).unwrap().size, 5);
        let err = filter_one("items", &items(), &Filter::name("dend")).unwrap_err();
        assert!(format!("{err}").contains("matched 2"));
    }

    #[test]
    fn test_display() {
        let f: Filter<Item> = Filter::name("dend").field("size", Pattern::Any).and_predicate(|_| true);
        assert_eq!(f.to_string(), "{name='dend', size=*, obj_filter=<fn>}");
        assert_eq!(Filter::<Item>::all().to_string(), "{all}");
    }

    fn arb_items() -> impl Strategy<Value = Vec<Item>> {
        prop::collection::vec(("[a-z]{1,6}", 0i64..10), 1..30).prop_map(|v| {
            v.into_iter()
                .map(|(name, size)| Item::new(&name, size))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn test_prop_totality(all in arb_items()) {
            let f = Filter::predicate(|_: &Item| true).field("name", Pattern::Any);
            let found = filter("items", &all, &f).unwrap();
            prop_assert_eq!(found, all);
        }

        #[test]
        fn test_prop_soundness(all in arb_items(), wanted in 0i64..10) {
            let f = Filter::new().field("size", Pattern::func(move |v| v == &FieldValue::Int(wanted)));
            match filter("items", &all, &f) {
                Ok(found) => {
                    prop_assert!(!found.is_empty());
                    prop_assert!(found.iter().all(|i| i.size == wanted));
                    let expected = all.iter().filter(|i| i.size == wanted).count();
                    prop_assert_eq!(found.len(), expected);
                }
                Err(e) => {
                    prop_assert!(e.is_lookup());
                    prop_assert!(all.iter().all(|i| i.size != wanted));
                }
            }
        }
    }
}
