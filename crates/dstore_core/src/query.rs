//! Queries and the query planner.
//!
//! A [`Query`] is planned against the builtin and registered indexes. The
//! plan decides which projection is scanned; equality filters are re-checked
//! on every candidate so repeated filters on a multi-valued property keep
//! their per-value meaning.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::error::{CoreError, CoreResult};
use crate::index::{Direction, IndexColumn, IndexDefinition};
use crate::key::Key;
use crate::property::{is_meta, PropertyMap, PropertyValue};

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// `=`
    Equal,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
}

impl FilterOp {
    /// True for everything except [`FilterOp::Equal`].
    #[must_use]
    pub fn is_inequality(self) -> bool {
        self != FilterOp::Equal
    }
}

/// A property filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Property name.
    pub property: String,
    /// Operator.
    pub op: FilterOp,
    /// Operand.
    pub value: PropertyValue,
}

/// A sort order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Property name.
    pub property: String,
    /// Direction.
    pub direction: Direction,
}

/// A contiguous range of property values of one type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    lower: Bound<PropertyValue>,
    upper: Bound<PropertyValue>,
}

impl Default for ValueRange {
    fn default() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }
}

impl ValueRange {
    /// Narrows the range with one filter.
    pub fn tighten(&mut self, op: FilterOp, value: &PropertyValue) {
        match op {
            FilterOp::Equal => {
                self.tighten_lower(Bound::Included(value.clone()));
                self.tighten_upper(Bound::Included(value.clone()));
            }
            FilterOp::GreaterThan => self.tighten_lower(Bound::Excluded(value.clone())),
            FilterOp::GreaterThanOrEqual => self.tighten_lower(Bound::Included(value.clone())),
            FilterOp::LessThan => self.tighten_upper(Bound::Excluded(value.clone())),
            FilterOp::LessThanOrEqual => self.tighten_upper(Bound::Included(value.clone())),
        }
    }

    fn tighten_lower(&mut self, new: Bound<PropertyValue>) {
        let replace = match (&self.lower, &new) {
            (Bound::Unbounded, _) => true,
            (Bound::Included(cur) | Bound::Excluded(cur), Bound::Included(v)) => v > cur,
            (Bound::Included(cur), Bound::Excluded(v)) => v >= cur,
            (Bound::Excluded(cur), Bound::Excluded(v)) => v > cur,
            (_, Bound::Unbounded) => false,
        };
        if replace {
            self.lower = new;
        }
    }

    fn tighten_upper(&mut self, new: Bound<PropertyValue>) {
        let replace = match (&self.upper, &new) {
            (Bound::Unbounded, _) => true,
            (Bound::Included(cur) | Bound::Excluded(cur), Bound::Included(v)) => v < cur,
            (Bound::Included(cur), Bound::Excluded(v)) => v <= cur,
            (Bound::Excluded(cur), Bound::Excluded(v)) => v < cur,
            (_, Bound::Unbounded) => false,
        };
        if replace {
            self.upper = new;
        }
    }

    /// True if `value` is inside the range. Bounded sides only admit values
    /// of the bound's own type.
    #[must_use]
    pub fn contains(&self, value: &PropertyValue) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(l) => value.type_rank() == l.type_rank() && value >= l,
            Bound::Excluded(l) => value.type_rank() == l.type_rank() && value > l,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(u) => value.type_rank() == u.type_rank() && value <= u,
            Bound::Excluded(u) => value.type_rank() == u.type_rank() && value < u,
        };
        above && below
    }

    /// True if no value can be inside the range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let (l, l_incl) = match &self.lower {
            Bound::Unbounded => return false,
            Bound::Included(v) => (v, true),
            Bound::Excluded(v) => (v, false),
        };
        let (u, u_incl) = match &self.upper {
            Bound::Unbounded => return false,
            Bound::Included(v) => (v, true),
            Bound::Excluded(v) => (v, false),
        };
        if l.type_rank() != u.type_rank() {
            return true;
        }
        if let (Some(lo), Some(hi)) = (discrete(l, l_incl, 1), discrete(u, u_incl, -1)) {
            return match (lo, hi) {
                (Some(lo), Some(hi)) => lo > hi,
                _ => true,
            };
        }
        l > u || (l == u && !(l_incl && u_incl))
    }

    /// Borrowed bounds for `BTreeMap::range`. Only call on non-empty ranges.
    #[must_use]
    pub fn bounds(&self) -> (Bound<&PropertyValue>, Bound<&PropertyValue>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }
}

/// Closest included integer bound for `Int` and `Time` values; `None` for
/// other types. The inner `None` means the bound steps past the type's range.
fn discrete(value: &PropertyValue, inclusive: bool, step: i64) -> Option<Option<i64>> {
    let n = match value {
        PropertyValue::Int(n) | PropertyValue::Time(n) => *n,
        _ => return None,
    };
    Some(if inclusive { Some(n) } else { n.checked_add(step) })
}

/// A datastore query over one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    kind: String,
    namespace: Option<String>,
    ancestor: Option<Key>,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    limit: Option<usize>,
    offset: usize,
    keys_only: bool,
}

impl Query {
    /// A query returning every entity of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: None,
            ancestor: None,
            filters: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: 0,
            keys_only: false,
        }
    }

    /// Restricts results to the subtree rooted at `ancestor`.
    #[must_use]
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Runs in `namespace` instead of the datastore default.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Adds a filter.
    #[must_use]
    pub fn filter(
        mut self,
        property: impl Into<String>,
        op: FilterOp,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.filters.push(Filter {
            property: property.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn eq(self, property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.filter(property, FilterOp::Equal, value)
    }

    /// Adds a sort order.
    #[must_use]
    pub fn order(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order {
            property: property.into(),
            direction,
        });
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` results.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Returns keys with empty property maps.
    #[must_use]
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Kind queried.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Namespace override.
    #[must_use]
    pub fn namespace_override(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Ancestor restriction.
    #[must_use]
    pub fn ancestor_key(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    /// Filters in insertion order.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Orders in insertion order.
    #[must_use]
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Result cap.
    #[must_use]
    pub fn result_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Results skipped.
    #[must_use]
    pub fn result_offset(&self) -> usize {
        self.offset
    }

    /// Whether only keys are returned.
    #[must_use]
    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// Chooses the index that serves this query.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidQuery`] for malformed queries and
    /// [`CoreError::MissingIndex`] when a composite index is needed but not
    /// among `registered`.
    pub fn plan<'a>(
        &self,
        namespace: &str,
        registered: impl IntoIterator<Item = &'a IndexDefinition>,
    ) -> CoreResult<QueryPlan> {
        self.validate(namespace)?;

        let eq_props: BTreeSet<&str> = self
            .filters
            .iter()
            .filter(|f| !f.op.is_inequality())
            .map(|f| f.property.as_str())
            .collect();
        let ineq_prop = self
            .filters
            .iter()
            .find(|f| f.op.is_inequality())
            .map(|f| f.property.as_str());
        let mut ineq_range = ValueRange::default();
        for f in self.filters.iter().filter(|f| f.op.is_inequality()) {
            ineq_range.tighten(f.op, &f.value);
        }

        let mut orders: Vec<&Order> = Vec::new();
        for order in &self.orders {
            if eq_props.contains(order.property.as_str())
                || orders.iter().any(|o| o.property == order.property)
            {
                continue;
            }
            orders.push(order);
        }

        let equality = self.equality_filters();

        if self.filters.is_empty() && orders.is_empty() {
            return Ok(QueryPlan::Kind { equality });
        }

        let mut involved: BTreeSet<&str> = eq_props.clone();
        involved.extend(ineq_prop);
        involved.extend(orders.iter().map(|o| o.property.as_str()));

        if self.ancestor.is_none() && involved.len() == 1 {
            let property = involved.iter().next().map_or("", |p| *p).to_string();
            let mut range = ineq_range;
            if let Some(first_eq) = self.filters.iter().find(|f| !f.op.is_inequality()) {
                range.tighten(FilterOp::Equal, &first_eq.value);
            }
            let direction = orders.first().map_or(Direction::Ascending, |o| o.direction);
            return Ok(QueryPlan::Property {
                property,
                range,
                direction,
                equality,
            });
        }

        let mut tail: Vec<IndexColumn> = Vec::new();
        if let Some(prop) = ineq_prop {
            let direction = orders
                .first()
                .filter(|o| o.property == prop)
                .map_or(Direction::Ascending, |o| o.direction);
            tail.push(IndexColumn {
                property: prop.to_string(),
                direction,
            });
        }
        for order in &orders {
            if Some(order.property.as_str()) != ineq_prop {
                tail.push(IndexColumn {
                    property: order.property.clone(),
                    direction: order.direction,
                });
            }
        }

        let wanted_ancestor = self.ancestor.is_some();
        let served = registered.into_iter().find(|def| {
            def.kind == self.kind
                && def.ancestor == wanted_ancestor
                && def.sort_by.len() == eq_props.len() + tail.len()
                && def.sort_by[..eq_props.len()]
                    .iter()
                    .map(|c| c.property.as_str())
                    .collect::<BTreeSet<_>>()
                    == eq_props
                && def.sort_by[eq_props.len()..] == tail[..]
        });

        match served {
            Some(def) => {
                let prefix = def.sort_by[..eq_props.len()]
                    .iter()
                    .filter_map(|c| {
                        self.filters
                            .iter()
                            .find(|f| !f.op.is_inequality() && f.property == c.property)
                            .map(|f| f.value.clone())
                    })
                    .collect();
                Ok(QueryPlan::Composite {
                    index: def.clone(),
                    prefix,
                    range: ineq_prop.map(|_| ineq_range),
                    equality,
                })
            }
            None => {
                let mut needed = IndexDefinition::new(self.kind.clone());
                needed.ancestor = wanted_ancestor;
                needed.sort_by = eq_props
                    .iter()
                    .map(|p| IndexColumn::asc(*p))
                    .chain(tail)
                    .collect();
                Err(CoreError::MissingIndex {
                    index: needed.to_string(),
                })
            }
        }
    }

    fn equality_filters(&self) -> Vec<(String, PropertyValue)> {
        self.filters
            .iter()
            .filter(|f| !f.op.is_inequality())
            .map(|f| (f.property.clone(), f.value.clone()))
            .collect()
    }

    fn validate(&self, namespace: &str) -> CoreResult<()> {
        if self.kind.is_empty() {
            return Err(CoreError::invalid_query("kindless queries are not supported"));
        }
        if let Some(ancestor) = &self.ancestor {
            if ancestor.is_incomplete() {
                return Err(CoreError::invalid_query("ancestor key is incomplete"));
            }
            if ancestor.namespace() != namespace {
                return Err(CoreError::invalid_query(format!(
                    "ancestor namespace {:?} does not match query namespace {namespace:?}",
                    ancestor.namespace()
                )));
            }
        }
        for name in self
            .filters
            .iter()
            .map(|f| &f.property)
            .chain(self.orders.iter().map(|o| &o.property))
        {
            if name.is_empty() || is_meta(name) {
                return Err(CoreError::invalid_query(format!(
                    "cannot filter or sort on {name:?}"
                )));
            }
        }

        let ineq: BTreeSet<&str> = self
            .filters
            .iter()
            .filter(|f| f.op.is_inequality())
            .map(|f| f.property.as_str())
            .collect();
        if ineq.len() > 1 {
            return Err(CoreError::invalid_query(format!(
                "inequality filters on more than one property: {ineq:?}"
            )));
        }
        if let (Some(prop), Some(first)) = (ineq.iter().next(), self.orders.first()) {
            if first.property != *prop {
                return Err(CoreError::invalid_query(format!(
                    "first sort order must be on inequality property {prop:?}"
                )));
            }
        }
        Ok(())
    }
}

/// The projection a query scans, plus the equality filters to re-check.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Walk the kind index in key order.
    Kind {
        /// Equality filters to re-check.
        equality: Vec<(String, PropertyValue)>,
    },
    /// Walk one builtin property index.
    Property {
        /// Property indexed.
        property: String,
        /// Value range to walk.
        range: ValueRange,
        /// Walk direction.
        direction: Direction,
        /// Equality filters to re-check.
        equality: Vec<(String, PropertyValue)>,
    },
    /// Walk a registered composite index.
    Composite {
        /// The registered definition.
        index: IndexDefinition,
        /// Values of the equality columns, in column order.
        prefix: Vec<PropertyValue>,
        /// Range on the column after the prefix.
        range: Option<ValueRange>,
        /// Equality filters to re-check.
        equality: Vec<(String, PropertyValue)>,
    },
}

impl QueryPlan {
    /// True if `pm` satisfies every equality filter of the plan.
    #[must_use]
    pub fn matches(&self, pm: &PropertyMap) -> bool {
        let equality = match self {
            QueryPlan::Kind { equality }
            | QueryPlan::Property { equality, .. }
            | QueryPlan::Composite { equality, .. } => equality,
        };
        equality.iter().all(|(name, value)| {
            pm.get(name).is_some_and(|props| {
                props
                    .iter()
                    .any(|p| p.is_indexed() && p.value() == value)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyContext;

    fn none() -> Vec<&'static IndexDefinition> {
        Vec::new()
    }

    #[test]
    fn kind_only_query_uses_kind_index() {
        let plan = Query::new("Obj").plan("", none()).unwrap();
        assert_eq!(plan, QueryPlan::Kind { equality: vec![] });
    }

    #[test]
    fn single_property_uses_builtin() {
        let plan = Query::new("Obj")
            .filter("A", FilterOp::GreaterThan, 1)
            .order("A", Direction::Descending)
            .plan("", none())
            .unwrap();
        match plan {
            QueryPlan::Property {
                property,
                direction,
                ..
            } => {
                assert_eq!(property, "A");
                assert_eq!(direction, Direction::Descending);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn two_properties_need_composite() {
        let err = Query::new("Obj")
            .eq("B", "x")
            .order("A", Direction::Descending)
            .plan("", none())
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::MissingIndex {
                index: "Obj(B, -A)".into()
            }
        );

        let def = IndexDefinition::new("Obj").asc("B").desc("A");
        let plan = Query::new("Obj")
            .eq("B", "x")
            .order("A", Direction::Descending)
            .plan("", [&def])
            .unwrap();
        assert!(matches!(plan, QueryPlan::Composite { ref prefix, .. } if prefix.len() == 1));
    }

    #[test]
    fn ancestor_with_filter_needs_ancestor_index() {
        let ctx = KeyContext::new("dev~app", "");
        let root = ctx.new_key("Root", 1, None);
        let err = Query::new("Obj")
            .ancestor(root.clone())
            .eq("A", 1)
            .plan("", none())
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::MissingIndex {
                index: "Obj(ancestor, A)".into()
            }
        );

        let plan = Query::new("Obj").ancestor(root).plan("", none()).unwrap();
        assert!(matches!(plan, QueryPlan::Kind { .. }));
    }

    #[test]
    fn equality_columns_match_in_any_order() {
        let def = IndexDefinition::new("Obj").asc("B").asc("A");
        let plan = Query::new("Obj")
            .eq("A", 1)
            .eq("B", 2)
            .plan("", [&def])
            .unwrap();
        match plan {
            QueryPlan::Composite { prefix, .. } => {
                assert_eq!(prefix, vec![PropertyValue::Int(2), PropertyValue::Int(1)]);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn invalid_queries() {
        let two_ineq = Query::new("Obj")
            .filter("A", FilterOp::LessThan, 1)
            .filter("B", FilterOp::LessThan, 1)
            .plan("", none());
        assert!(matches!(two_ineq, Err(CoreError::InvalidQuery { .. })));

        let bad_order = Query::new("Obj")
            .filter("A", FilterOp::LessThan, 1)
            .order("B", Direction::Ascending)
            .plan("", none());
        assert!(matches!(bad_order, Err(CoreError::InvalidQuery { .. })));

        assert!(Query::new("").plan("", none()).is_err());
        assert!(Query::new("Obj").eq("$key", 1).plan("", none()).is_err());
    }

    #[test]
    fn range_tightening() {
        let mut r = ValueRange::default();
        r.tighten(FilterOp::GreaterThan, &PropertyValue::Int(1));
        r.tighten(FilterOp::GreaterThanOrEqual, &PropertyValue::Int(0));
        r.tighten(FilterOp::LessThanOrEqual, &PropertyValue::Int(5));
        assert!(!r.contains(&PropertyValue::Int(1)));
        assert!(r.contains(&PropertyValue::Int(2)));
        assert!(r.contains(&PropertyValue::Int(5)));
        assert!(!r.contains(&PropertyValue::Int(6)));
        assert!(!r.is_empty());

        r.tighten(FilterOp::LessThan, &PropertyValue::Int(2));
        assert!(r.is_empty());
    }

    #[test]
    fn adjacent_integer_bounds_are_empty() {
        let mut r = ValueRange::default();
        r.tighten(FilterOp::GreaterThanOrEqual, &PropertyValue::Int(1));
        r.tighten(FilterOp::LessThan, &PropertyValue::Int(2));
        assert!(!r.is_empty());

        let mut r = ValueRange::default();
        r.tighten(FilterOp::GreaterThan, &PropertyValue::Time(i64::MAX));
        r.tighten(FilterOp::LessThanOrEqual, &PropertyValue::Time(i64::MAX));
        assert!(r.is_empty());

        let mut r = ValueRange::default();
        r.tighten(FilterOp::GreaterThan, &PropertyValue::Float(1.0));
        r.tighten(FilterOp::LessThan, &PropertyValue::Float(2.0));
        assert!(!r.is_empty());
    }

    #[test]
    fn mixed_type_range_is_empty() {
        let mut r = ValueRange::default();
        r.tighten(FilterOp::GreaterThan, &PropertyValue::Int(1));
        r.tighten(FilterOp::LessThan, &PropertyValue::from("z"));
        assert!(r.is_empty());
    }

    #[test]
    fn plan_rechecks_repeated_equality() {
        let plan = Query::new("Obj").eq("A", 1).eq("A", 2).plan("", none()).unwrap();
        let mut both = PropertyMap::new();
        both.set_multi(
            "A",
            vec![
                crate::property::Property::new(1),
                crate::property::Property::new(2),
            ],
        );
        let mut one = PropertyMap::new();
        one.set("A", 1);
        assert!(plan.matches(&both));
        assert!(!plan.matches(&one));
    }
}
