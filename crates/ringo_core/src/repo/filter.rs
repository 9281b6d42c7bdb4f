//! Search expression parsing for the generic CRUD `search` operation.
//!
//! Grammars:
//! - filter: `clause ("|" clause)*`, `clause = field "::" value` (equality, AND)
//! - sort: `key ("|" key)*`, `key = field ["::" ("asc" | "desc")]`
//! - field selection: `field ("|" field)*`
//!
//! # Invariants
//! - Every parsed field references a declared descriptor of the entity.
//! - Filter values are converted to the field kind before reaching SQL.

use crate::model::entity::{Entity, FieldDescriptor, FieldKind, FieldValue};
use crate::repo::crud::{CrudError, CrudResult};
use uuid::Uuid;

const SEPARATOR: char = '|';
const PAIR_SEPARATOR: &str = "::";

/// Caller-facing search request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Maximum rows to return; `None` means unbounded.
    pub limit: Option<u32>,
    /// Rows to skip before the first returned one.
    pub offset: u32,
    pub filter: Option<String>,
    pub sort: Option<String>,
}

/// One equality clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterClause {
    pub field: &'static FieldDescriptor,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: &'static FieldDescriptor,
    pub descending: bool,
}

/// Validated search ready for SQL generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSearch {
    pub clauses: Vec<FilterClause>,
    pub sort: Vec<SortKey>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl ParsedSearch {
    pub fn parse<E: Entity>(query: &SearchQuery) -> CrudResult<Self> {
        Ok(Self {
            clauses: parse_filter::<E>(query.filter.as_deref())?,
            sort: parse_sort::<E>(query.sort.as_deref())?,
            limit: query.limit,
            offset: query.offset,
        })
    }
}

/// Parses a filter expression; blank input yields no clauses.
pub fn parse_filter<E: Entity>(expr: Option<&str>) -> CrudResult<Vec<FilterClause>> {
    let Some(expr) = non_blank(expr) else {
        return Ok(Vec::new());
    };

    expr.split(SEPARATOR)
        .map(|clause| {
            let parts: Vec<&str> = clause.split(PAIR_SEPARATOR).collect();
            let [name, raw] = parts.as_slice() else {
                return Err(CrudError::ClientError(format!(
                    "filter clause `{clause}` must have the form field::value"
                )));
            };
            let field = declared_field::<E>(name.trim(), "filter")?;
            let value = convert_filter_value(field, raw)?;
            Ok(FilterClause { field, value })
        })
        .collect()
}

/// Parses a sort expression; blank input keeps the store order.
pub fn parse_sort<E: Entity>(expr: Option<&str>) -> CrudResult<Vec<SortKey>> {
    let Some(expr) = non_blank(expr) else {
        return Ok(Vec::new());
    };

    expr.split(SEPARATOR)
        .map(|key| {
            let parts: Vec<&str> = key.split(PAIR_SEPARATOR).collect();
            let (name, descending) = match parts.as_slice() {
                [name] => (*name, false),
                [name, direction] => match direction.trim().to_ascii_lowercase().as_str() {
                    "asc" => (*name, false),
                    "desc" => (*name, true),
                    other => {
                        return Err(CrudError::ClientError(format!(
                            "unknown sort direction `{other}`; expected asc|desc"
                        )))
                    }
                },
                _ => {
                    return Err(CrudError::ClientError(format!(
                        "sort key `{key}` must have the form field[::asc|desc]"
                    )))
                }
            };
            let field = declared_field::<E>(name.trim(), "sort")?;
            Ok(SortKey { field, descending })
        })
        .collect()
}

/// Splits a field-selection expression. Unknown names are kept; they are
/// simply absent from `get_values` output.
pub fn parse_field_selection(expr: Option<&str>) -> Option<Vec<String>> {
    non_blank(expr).map(|expr| {
        expr.split(SEPARATOR)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn non_blank(expr: Option<&str>) -> Option<&str> {
    expr.map(str::trim).filter(|expr| !expr.is_empty())
}

fn declared_field<E: Entity>(name: &str, context: &str) -> CrudResult<&'static FieldDescriptor> {
    let field = E::field(name).ok_or_else(|| {
        CrudError::ClientError(format!("{context} references unknown {} field `{name}`", E::NAME))
    })?;
    if field.secret {
        return Err(CrudError::ClientError(format!(
            "{context} cannot reference secret {} field `{name}`",
            E::NAME
        )));
    }
    Ok(field)
}

fn convert_filter_value(field: &FieldDescriptor, raw: &str) -> CrudResult<FieldValue> {
    match field.kind {
        FieldKind::Integer | FieldKind::Timestamp => raw
            .trim()
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| {
                CrudError::ClientError(format!(
                    "filter value `{raw}` for `{}` is not an integer",
                    field.name
                ))
            }),
        FieldKind::Uuid => Uuid::parse_str(raw.trim())
            .map(|uuid| FieldValue::Text(uuid.to_string()))
            .map_err(|_| {
                CrudError::ClientError(format!(
                    "filter value `{raw}` for `{}` is not a uuid",
                    field.name
                ))
            }),
        FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
    }
}
