//! Filter expressions and projections understood by record stores
//!
//! A [`FilterExpr`] is a small boolean tree over record fields. Stores backed
//! by a query language translate it; the in-memory store evaluates it directly
//! against JSON records with [`FilterExpr::matches`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boolean filter over the fields of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FilterExpr {
    /// Matches every record
    All,
    /// String field starts with `prefix`
    StartsWith {
        /// Field name
        field: String,
        /// Required prefix
        prefix: String,
    },
    /// String field starts with at least one of `prefixes`
    StartsWithAny {
        /// Field name
        field: String,
        /// Candidate prefixes
        prefixes: Vec<String>,
    },
    /// Field is missing or explicitly null
    IsNull {
        /// Field name
        field: String,
    },
    /// Negation of the inner expression
    Not(Box<FilterExpr>),
    /// Conjunction; an empty conjunction matches everything
    And(Vec<FilterExpr>),
}

impl FilterExpr {
    /// `field` starts with `prefix`
    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::StartsWith {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    /// `field` starts with any of `prefixes`
    pub fn starts_with_any<I, S>(field: impl Into<String>, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::StartsWithAny {
            field: field.into(),
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// `field` is null or absent
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull { field: field.into() }
    }

    /// Negate `inner`
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: FilterExpr) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Combine `self` with `other`, flattening nested conjunctions and dropping `All`
    pub fn and(self, other: FilterExpr) -> Self {
        match (self, other) {
            (FilterExpr::All, rhs) => rhs,
            (lhs, FilterExpr::All) => lhs,
            (FilterExpr::And(mut lhs), FilterExpr::And(rhs)) => {
                lhs.extend(rhs);
                FilterExpr::And(lhs)
            }
            (FilterExpr::And(mut lhs), rhs) => {
                lhs.push(rhs);
                FilterExpr::And(lhs)
            }
            (lhs, FilterExpr::And(mut rhs)) => {
                rhs.insert(0, lhs);
                FilterExpr::And(rhs)
            }
            (lhs, rhs) => FilterExpr::And(vec![lhs, rhs]),
        }
    }

    /// Evaluate the expression against a JSON object
    ///
    /// Prefix tests on a missing, null or non-string field are false, so
    /// `Not(StartsWithAny ..)` holds for records without the field.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            FilterExpr::All => true,
            FilterExpr::StartsWith { field, prefix } => string_field(record, field)
                .map(|value| value.starts_with(prefix.as_str()))
                .unwrap_or(false),
            FilterExpr::StartsWithAny { field, prefixes } => string_field(record, field)
                .map(|value| prefixes.iter().any(|p| value.starts_with(p.as_str())))
                .unwrap_or(false),
            FilterExpr::IsNull { field } => matches!(record.get(field), None | Some(Value::Null)),
            FilterExpr::Not(inner) => !inner.matches(record),
            FilterExpr::And(parts) => parts.iter().all(|part| part.matches(record)),
        }
    }
}

fn string_field<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str)
}

/// Fields a store should return for each candidate
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Projection {
    /// Field names besides the identifier
    pub fields: Vec<String>,
}

impl Projection {
    /// Identifier only
    pub fn ids() -> Self {
        Self::default()
    }

    /// Add a field to the projection
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.fields.contains(&field) {
            self.fields.push(field);
        }
        self
    }
}
