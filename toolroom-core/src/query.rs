//! List/search contract shared by every list view.
//!
//! One query shape (`page`, `pageSize`, `search`, `filter`) is used for
//! instances, checkouts and returns. Search is a case-insensitive substring
//! match over a kind-specific default field set; filter keys are kind-specific
//! and unknown keys are ignored.

use crate::{
    CheckoutRecord, EntityId, ReturnRecord, ToolInstance, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Default page size used by list views.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Pagination, search and filter parameters of a list request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: u32,
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, Value>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

impl ListQuery {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            search: None,
            filter: BTreeMap::new(),
        }
    }

    /// Set the search term. Blank terms clear the search.
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        let trimmed = search.trim();
        self.search = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    /// The search term, trimmed. Absent and blank terms are the same query.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page < 1 {
            return Err(ValidationError::invalid("page", "must be >= 1"));
        }
        if self.page_size == 0 {
            return Err(ValidationError::invalid("pageSize", "must be > 0"));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(ValidationError::invalid(
                "pageSize",
                format!("must be <= {}", MAX_PAGE_SIZE),
            ));
        }
        Ok(())
    }

    /// Canonical text form, stable across filter insertion order.
    pub fn fingerprint(&self) -> String {
        let filter = serde_json::to_string(&self.filter).unwrap_or_default();
        format!(
            "p={}&s={}&q={}&f={}",
            self.page,
            self.page_size,
            self.search_term().unwrap_or(""),
            filter
        )
    }

    /// Flattened query-string pairs for the REST surface.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("pageSize".to_string(), self.page_size.to_string()),
        ];
        if let Some(search) = self.search_term() {
            pairs.push(("search".to_string(), search.to_string()));
        }
        for (key, value) in &self.filter {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            pairs.push((key.clone(), rendered));
        }
        pairs
    }

    fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.page_size as usize)
    }
}

/// One page of a list result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        Self {
            items,
            total,
            page,
            page_size,
            total_pages: total_pages(total, page_size),
        }
    }

    pub fn empty(query: &ListQuery) -> Self {
        Self::new(Vec::new(), 0, query.page, query.page_size)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}

/// `ceil(total / page_size)`; zero when `page_size` is zero.
pub fn total_pages(total: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let pages = total.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Kind-specific search and filter behaviour.
pub trait Searchable {
    /// Fields the free-text search looks at.
    fn search_fields(&self) -> Vec<&str>;

    /// Evaluate one filter entry. `None` means the key is not recognised for
    /// this kind and must be ignored.
    fn filter_matches(&self, key: &str, value: &Value) -> Option<bool>;

    fn matches_search(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.search_fields()
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }

    fn matches_query(&self, query: &ListQuery) -> bool {
        if let Some(term) = query.search_term() {
            if !self.matches_search(term) {
                return false;
            }
        }
        query
            .filter
            .iter()
            .all(|(key, value)| self.filter_matches(key, value).unwrap_or(true))
    }
}

/// Filter, search and paginate an in-memory collection, preserving order.
pub fn apply_query<T: Searchable + Clone>(items: &[T], query: &ListQuery) -> Page<T> {
    let matching: Vec<&T> = items.iter().filter(|item| item.matches_query(query)).collect();
    let total = matching.len() as u64;
    let page_items = matching
        .into_iter()
        .skip(query.offset())
        .take(query.page_size as usize)
        .cloned()
        .collect();
    Page::new(page_items, total, query.page, query.page_size)
}

fn id_matches(value: &Value, id: &EntityId) -> bool {
    match value {
        Value::Number(n) => n.as_i64().map(EntityId::Number).as_ref() == Some(id),
        Value::String(s) => &EntityId::parse(s) == id,
        _ => false,
    }
}

fn str_matches(value: &Value, actual: &str) -> bool {
    value
        .as_str()
        .map(|expected| expected.trim().eq_ignore_ascii_case(actual))
        .unwrap_or(false)
}

impl Searchable for ToolInstance {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.serial_number.as_str()];
        if let Some(comment) = &self.comment {
            fields.push(comment);
        }
        fields
    }

    fn filter_matches(&self, key: &str, value: &Value) -> Option<bool> {
        match key {
            "condition" => Some(str_matches(value, self.condition.as_str())),
            "productId" => Some(id_matches(value, &self.product_id)),
            "deliveryId" => Some(id_matches(value, &self.delivery_id)),
            "instanceId" => Some(id_matches(value, &self.instance_id)),
            _ => None,
        }
    }
}

impl Searchable for CheckoutRecord {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.purpose.as_str(), self.site.as_str()]
    }

    fn filter_matches(&self, key: &str, value: &Value) -> Option<bool> {
        match key {
            "instanceId" => Some(id_matches(value, &self.instance_id)),
            "employeeId" => Some(id_matches(value, &self.employee_id)),
            "conditionBefore" => Some(str_matches(value, self.condition_before.as_str())),
            "site" => Some(str_matches(value, &self.site)),
            "orderReference" => Some(id_matches(value, &self.order_reference)),
            _ => None,
        }
    }
}

impl Searchable for ReturnRecord {
    fn search_fields(&self) -> Vec<&str> {
        self.comment.as_deref().into_iter().collect()
    }

    fn filter_matches(&self, key: &str, value: &Value) -> Option<bool> {
        match key {
            "instanceId" => Some(id_matches(value, &self.instance_id)),
            "employeeId" => Some(id_matches(value, &self.employee_id)),
            "conditionAfter" => Some(str_matches(value, self.condition_after.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstanceCondition;
    use chrono::NaiveDate;
    use serde_json::json;

    fn instance(id: i64, serial: &str, condition: InstanceCondition) -> ToolInstance {
        ToolInstance {
            instance_id: EntityId::from(id),
            serial_number: serial.to_string(),
            entry_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            condition,
            comment: None,
            delivery_id: EntityId::from(3i64),
            product_id: EntityId::from(9i64),
            review: None,
        }
    }

    fn stock() -> Vec<ToolInstance> {
        vec![
            instance(1, "DRL-0001", InstanceCondition::Good),
            instance(2, "DRL-0002", InstanceCondition::Damaged),
            instance(3, "SAW-0001", InstanceCondition::Good),
        ]
    }

    #[test]
    fn test_total_pages_is_ceiling() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(5, 0), 0);
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let page = apply_query(&stock(), &ListQuery::new(1, 10).with_search("drl"));
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].serial_number, "DRL-0001");
    }

    #[test]
    fn test_filter_by_condition_and_unknown_key_is_ignored() {
        let query = ListQuery::new(1, 10)
            .with_filter("condition", "GOOD")
            .with_filter("colour", "red");
        let page = apply_query(&stock(), &query);
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_filter_ids_accept_numbers_and_strings() {
        let by_number = apply_query(&stock(), &ListQuery::new(1, 10).with_filter("instanceId", 2));
        let by_string = apply_query(&stock(), &ListQuery::new(1, 10).with_filter("instanceId", "2"));
        assert_eq!(by_number, by_string);
        assert_eq!(by_number.total, 1);
    }

    #[test]
    fn test_pagination_window() {
        let page = apply_query(&stock(), &ListQuery::new(2, 2));
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].serial_number, "SAW-0001");
        assert!(!page.has_next());

        let beyond = apply_query(&stock(), &ListQuery::new(5, 2));
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 3);
    }

    #[test]
    fn test_validate_bounds() {
        assert!(ListQuery::new(1, 10).validate().is_ok());
        assert_eq!(ListQuery::new(0, 10).validate().unwrap_err().field(), "page");
        assert_eq!(ListQuery::new(1, 0).validate().unwrap_err().field(), "pageSize");
        assert!(ListQuery::new(1, MAX_PAGE_SIZE + 1).validate().is_err());
    }

    #[test]
    fn test_fingerprint_ignores_filter_insertion_order() {
        let a = ListQuery::new(1, 10).with_filter("a", 1).with_filter("b", "x");
        let b = ListQuery::new(1, 10).with_filter("b", "x").with_filter("a", 1);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), ListQuery::new(2, 10).fingerprint());
    }

    #[test]
    fn test_blank_search_is_cleared() {
        assert_eq!(ListQuery::default().with_search("   ").search, None);
    }

    #[test]
    fn test_deserialized_blank_search_matches_absent_search() {
        use crate::Condition;
        use chrono::{TimeZone, Utc};

        let silent = ReturnRecord {
            instance_id: EntityId::from(42i64),
            employee_id: EntityId::from(7i64),
            return_timestamp: Utc.with_ymd_and_hms(2025, 5, 3, 9, 0, 0).unwrap(),
            condition_after: Condition::Good,
            comment: None,
            checkout_timestamp: None,
        };
        let absent: ListQuery = serde_json::from_value(json!({"page": 1, "pageSize": 10})).unwrap();
        let blank: ListQuery =
            serde_json::from_value(json!({"page": 1, "pageSize": 10, "search": " "})).unwrap();

        assert_eq!(absent.fingerprint(), blank.fingerprint());
        assert_eq!(blank.search_term(), None);
        let items = [silent];
        assert_eq!(apply_query(&items, &absent).total, 1);
        assert_eq!(apply_query(&items, &blank).total, 1);
        assert!(!blank.to_query_pairs().iter().any(|(key, _)| key == "search"));
    }

    #[test]
    fn test_query_pairs() {
        let pairs = ListQuery::new(2, 25)
            .with_search("drill")
            .with_filter("instanceId", json!(42))
            .to_query_pairs();
        assert!(pairs.contains(&("page".to_string(), "2".to_string())));
        assert!(pairs.contains(&("pageSize".to_string(), "25".to_string())));
        assert!(pairs.contains(&("search".to_string(), "drill".to_string())));
        assert!(pairs.contains(&("instanceId".to_string(), "42".to_string())));
    }
}
