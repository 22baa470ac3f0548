//! Query construction for the read API
//!
//! Validates raw query-string parameters and builds lookups against the two
//! directional views. When both `from` and `to` are supplied, `from` wins and
//! `to` is only validated.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::record::is_address;

/// View keyed by sender
pub const FROM_VIEW: &str = "transactions_from_mv";

/// View keyed by recipient
pub const TO_VIEW: &str = "transactions_to_mv";

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;
pub const MIN_LIMIT: u64 = 1;
pub const MAX_LIMIT: u64 = 100;

/// Errors in caller-supplied parameters, surfaced as 400
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryParamError {
    #[error("Either \"from\" or \"to\" parameter is required")]
    MissingAddress,

    #[error("Invalid query parameters: {0}")]
    Invalid(String),
}

/// Which address column a lookup filters on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressRole {
    From,
    To,
}

impl AddressRole {
    /// Materialized view serving this role
    pub fn view(&self) -> &'static str {
        match self {
            AddressRole::From => FROM_VIEW,
            AddressRole::To => TO_VIEW,
        }
    }

    /// Column name, as a quoted identifier
    pub fn column(&self) -> &'static str {
        match self {
            AddressRole::From => "`from`",
            AddressRole::To => "`to`",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressRole::From => "from",
            AddressRole::To => "to",
        }
    }
}

impl fmt::Display for AddressRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated address filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFilter {
    pub role: AddressRole,
    /// Matches `^0x[a-fA-F0-9]{40}$`
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Sort key of a list lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrdering {
    /// `(block_number, tx_index)`
    ChainPosition,
    /// `value`
    Value,
}

/// A validated paginated lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: AddressFilter,
    /// 1-based page number
    pub page: u64,
    /// Rows per page, `MIN_LIMIT..=MAX_LIMIT`
    pub limit: u64,
    pub order: SortOrder,
}

impl ListQuery {
    /// Rows skipped before this page; saturates instead of overflowing
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

/// Validate `from`/`to` and pick the filter
///
/// Both addresses are checked against the pattern before the
/// at-least-one-present rule is applied.
pub fn parse_filter(params: &HashMap<String, String>) -> Result<AddressFilter, QueryParamError> {
    let from = address_param(params, "from")?;
    let to = address_param(params, "to")?;

    match (from, to) {
        (Some(address), _) => Ok(AddressFilter {
            role: AddressRole::From,
            address,
        }),
        (None, Some(address)) => Ok(AddressFilter {
            role: AddressRole::To,
            address,
        }),
        (None, None) => Err(QueryParamError::MissingAddress),
    }
}

/// Validate the full parameter set of a list endpoint
pub fn parse_list_query(params: &HashMap<String, String>) -> Result<ListQuery, QueryParamError> {
    let page = integer_param(params, "page", DEFAULT_PAGE)?;
    if page < 1 {
        return Err(QueryParamError::Invalid("page must be at least 1".to_string()));
    }

    let limit = integer_param(params, "limit", DEFAULT_LIMIT)?;
    if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        return Err(QueryParamError::Invalid(format!(
            "limit must be between {} and {}",
            MIN_LIMIT, MAX_LIMIT
        )));
    }

    if (page - 1).checked_mul(limit).is_none() {
        return Err(QueryParamError::Invalid("page out of range".to_string()));
    }

    let order = match params.get("order").map(String::as_str) {
        None | Some("ASC") => SortOrder::Asc,
        Some("DESC") => SortOrder::Desc,
        Some(other) => {
            return Err(QueryParamError::Invalid(format!(
                "order must be ASC or DESC, got {}",
                other
            )))
        }
    };

    let filter = parse_filter(params)?;

    Ok(ListQuery {
        filter,
        page,
        limit,
        order,
    })
}

fn address_param(params: &HashMap<String, String>, name: &str) -> Result<Option<String>, QueryParamError> {
    match params.get(name) {
        None => Ok(None),
        Some(value) if is_address(value) => Ok(Some(value.clone())),
        Some(_) => Err(QueryParamError::Invalid(format!(
            "{} must match ^0x[a-fA-F0-9]{{40}}$",
            name
        ))),
    }
}

fn integer_param(params: &HashMap<String, String>, name: &str, default: u64) -> Result<u64, QueryParamError> {
    match params.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| QueryParamError::Invalid(format!("{} must be a positive integer", name))),
    }
}

/// SQL for one page of a list lookup
///
/// The address is interpolated only after it matched the address pattern,
/// so it cannot carry quotes.
pub fn list_sql(query: &ListQuery, ordering: ListOrdering) -> String {
    let role = query.filter.role;
    let order = query.order.as_sql();
    let order_by = match ordering {
        ListOrdering::ChainPosition => format!("block_number {order}, tx_index {order}"),
        ListOrdering::Value => format!("value {order}"),
    };

    format!(
        "SELECT * FROM {} WHERE {} = '{}' ORDER BY {} LIMIT {} OFFSET {}",
        role.view(),
        role.column(),
        query.filter.address,
        order_by,
        query.limit,
        query.offset()
    )
}

/// SQL counting all rows for an address
pub fn count_sql(filter: &AddressFilter) -> String {
    format!(
        "SELECT count(*) AS count FROM {} WHERE {} = '{}'",
        filter.role.view(),
        filter.role.column(),
        filter.address
    )
}
