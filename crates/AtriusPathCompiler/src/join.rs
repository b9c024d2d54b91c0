//! # Joins and Aliases
//!
//! A compiled expression is backed by the subject relation extended with a set
//! of joins. Each join introduces one alias and is described by a structural
//! [`JoinTarget`], so two joins with the same target are the same join. Join
//! sets are ordered by (kind, alias), deduplicated on merge, and can be
//! emitted in dependency order for execution.
//!
//! Aliases are allocated by a per-request [`AliasGenerator`]; root aliases are
//! the record-type names themselves.

use atrius_path_support::{QueryError, QueryResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::plan::{Expr, SubPlan};

/// A relation alias, ordered by (sequence, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias {
    seq: u32,
    name: String,
}

impl Alias {
    /// The alias of a record type's base relation.
    pub fn root(record_type: &str) -> Alias {
        Alias {
            seq: 0,
            name: record_type.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.seq == 0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Allocates `j1`, `j2`, ... for one request.
#[derive(Debug, Default)]
pub struct AliasGenerator {
    last: u32,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_alias(&mut self) -> Alias {
        self.last += 1;
        Alias {
            seq: self.last,
            name: format!("j{}", self.last),
        }
    }
}

/// Join kinds, in the order they sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JoinKind {
    /// Lateral unnest of a repeating element
    Table,
    /// `resolve()`
    Reference,
    /// `reverseResolve()`
    ReverseReference,
    /// Per-identity aggregate subquery
    Derived,
    /// `in` / `contains` subquery
    Membership,
    /// Value-set expansion
    ValueSet,
}

/// What a join joins to, and on what.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinTarget {
    /// One row per element of `source`; a row with no value when it is empty.
    Unnest { source: Expr },
    /// The `record_type` record that `reference` points at.
    Resolve { record_type: String, reference: Expr },
    /// Every `record_type` record whose `field` points at the `anchor_type`
    /// record identified by `anchor`.
    ReverseResolve {
        record_type: String,
        field: Vec<String>,
        anchor_type: String,
        anchor: Expr,
    },
    /// A subquery keyed on the subject identity `key`.
    Subquery { plan: Box<SubPlan>, key: Expr },
    /// The row of value-set table `table` matching `coding`, if any.
    ValueSet { table: String, coding: Expr },
}

impl JoinTarget {
    /// Aliases read by the join condition.
    pub fn references(&self) -> BTreeSet<Alias> {
        match self {
            JoinTarget::Unnest { source } => source.aliases(),
            JoinTarget::Resolve { reference, .. } => reference.aliases(),
            JoinTarget::ReverseResolve { anchor, .. } => anchor.aliases(),
            JoinTarget::Subquery { key, .. } => key.aliases(),
            JoinTarget::ValueSet { coding, .. } => coding.aliases(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    pub kind: JoinKind,
    pub alias: Alias,
    pub target: JoinTarget,
    /// The most recently introduced non-root alias the join reads, if any.
    pub depends_on: Option<Alias>,
}

impl Join {
    pub fn new(kind: JoinKind, alias: Alias, target: JoinTarget) -> Join {
        let depends_on = target
            .references()
            .into_iter()
            .filter(|a| !a.is_root())
            .max();
        Join {
            kind,
            alias,
            target,
            depends_on,
        }
    }

    fn sort_key(&self) -> (JoinKind, &Alias) {
        (self.kind, &self.alias)
    }
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alias = &self.alias;
        match &self.target {
            JoinTarget::Unnest { source } => {
                write!(f, "LEFT JOIN LATERAL UNNEST({}) AS {}", source, alias)
            }
            JoinTarget::Resolve {
                record_type,
                reference,
            } => write!(
                f,
                "LEFT JOIN {} AS {} ON {}.id = REFERENCE_KEY({}, '{}')",
                record_type, alias, alias, reference, record_type
            ),
            JoinTarget::ReverseResolve {
                record_type,
                field,
                anchor_type,
                anchor,
            } => write!(
                f,
                "LEFT JOIN {} AS {} ON REFERS_TO({}.{}, '{}', {})",
                record_type,
                alias,
                alias,
                field.join("."),
                anchor_type,
                anchor
            ),
            JoinTarget::Subquery { plan, key } => {
                write!(f, "LEFT JOIN ({}) AS {} ON {}.key = {}", plan, alias, alias, key)
            }
            JoinTarget::ValueSet { table, coding } => write!(
                f,
                "LEFT JOIN {} AS {} ON CODING_EQUALS({}, {})",
                table, alias, alias, coding
            ),
        }
    }
}

/// An ordered, deduplicated set of joins keyed by alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSet {
    joins: BTreeMap<Alias, Join>,
}

impl JoinSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn contains(&self, alias: &Alias) -> bool {
        self.joins.contains_key(alias)
    }

    pub fn get(&self, alias: &Alias) -> Option<&Join> {
        self.joins.get(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Join> {
        self.joins.values()
    }

    /// Adds a join. An identical join already present is a no-op; a different
    /// join under the same alias is an alias collision.
    pub fn insert(&mut self, join: Join) -> QueryResult<()> {
        match self.joins.get(&join.alias) {
            Some(existing) if existing.kind == join.kind && existing.target == join.target => {
                Ok(())
            }
            Some(existing) => Err(QueryError::Internal(format!(
                "Alias collision on {}: {} and {}",
                join.alias, existing, join
            ))),
            None => {
                self.joins.insert(join.alias.clone(), join);
                Ok(())
            }
        }
    }

    /// Returns a new set with `join` added.
    pub fn with(&self, join: Join) -> QueryResult<JoinSet> {
        let mut set = self.clone();
        set.insert(join)?;
        Ok(set)
    }

    /// The union of two sets.
    pub fn merge(&self, other: &JoinSet) -> QueryResult<JoinSet> {
        let mut set = self.clone();
        for join in other.iter() {
            set.insert(join.clone())?;
        }
        Ok(set)
    }

    /// Joins in (kind, alias) order.
    pub fn ordered(&self) -> Vec<&Join> {
        let mut joins: Vec<&Join> = self.joins.values().collect();
        joins.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        joins
    }

    /// Joins in an order where every join comes after the joins it reads,
    /// ties broken by (kind, alias).
    pub fn in_dependency_order(&self) -> Vec<&Join> {
        let mut pending: BTreeMap<&Alias, BTreeSet<&Alias>> = self
            .joins
            .values()
            .map(|join| {
                let reads = join
                    .target
                    .references()
                    .into_iter()
                    .filter_map(|a| self.joins.get_key_value(&a).map(|(k, _)| k))
                    .filter(|a| *a != &join.alias)
                    .collect();
                (&join.alias, reads)
            })
            .collect();

        let mut ordered = Vec::with_capacity(self.joins.len());
        while !pending.is_empty() {
            let next = pending
                .iter()
                .filter(|(_, reads)| reads.is_empty())
                .filter_map(|(alias, _)| self.joins.get(*alias))
                .min_by(|a, b| a.sort_key().cmp(&b.sort_key()));
            let Some(next) = next else {
                // A cycle cannot be built by the compiler; emit the rest in key order.
                let mut rest: Vec<&Join> =
                    pending.keys().filter_map(|a| self.joins.get(*a)).collect();
                rest.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
                ordered.extend(rest);
                break;
            };
            pending.remove(&next.alias);
            for reads in pending.values_mut() {
                reads.remove(&next.alias);
            }
            ordered.push(next);
        }
        ordered
    }

    /// Checks that every alias read by `exprs` and by the joins themselves is
    /// either `subject` or introduced by a join in this set.
    pub fn check_reachable(&self, subject: &Alias, source: &str, exprs: &[&Expr]) -> QueryResult<()> {
        let mut read = BTreeSet::new();
        for expr in exprs {
            read.extend(expr.aliases());
        }
        for join in self.iter() {
            read.extend(join.target.references());
        }
        match read.iter().find(|a| *a != subject && !self.contains(a)) {
            Some(alias) => Err(QueryError::InvalidRequest(format!(
                "Expression {} refers to {}, which cannot be reached from subject resource {}",
                source, alias, subject
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unnest(alias: Alias, source: Expr) -> Join {
        Join::new(JoinKind::Table, alias, JoinTarget::Unnest { source })
    }

    #[test]
    fn test_aliases_are_unique_and_ordered() {
        let mut generator = AliasGenerator::new();
        let a = generator.next_alias();
        let b = generator.next_alias();
        assert_eq!(a.to_string(), "j1");
        assert_eq!(b.to_string(), "j2");
        assert!(Alias::root("Patient") < a);
        assert!(a < b);
    }

    #[test]
    fn test_identical_joins_collapse() {
        let mut generator = AliasGenerator::new();
        let alias = generator.next_alias();
        let source = Expr::column(Alias::root("Patient"), vec!["name".into()]);
        let left = JoinSet::new().with(unnest(alias.clone(), source.clone())).unwrap();
        let right = JoinSet::new().with(unnest(alias, source)).unwrap();
        assert_eq!(left.merge(&right).unwrap().len(), 1);
    }

    #[test]
    fn test_alias_collision_is_internal_error() {
        let alias = AliasGenerator::new().next_alias();
        let left = JoinSet::new()
            .with(unnest(alias.clone(), Expr::column(Alias::root("Patient"), vec!["name".into()])))
            .unwrap();
        let right = JoinSet::new()
            .with(unnest(alias, Expr::column(Alias::root("Patient"), vec!["address".into()])))
            .unwrap();
        assert!(matches!(left.merge(&right), Err(QueryError::Internal(_))));
    }

    #[test]
    fn test_dependency_order_puts_sources_first() {
        let mut generator = AliasGenerator::new();
        let j1 = generator.next_alias();
        let j2 = generator.next_alias();
        let j3 = generator.next_alias();
        let patient = Alias::root("Patient");

        // j3 resolves a reference read through j2, which unnests j1.
        let mut set = JoinSet::new();
        set.insert(Join::new(
            JoinKind::Reference,
            j3.clone(),
            JoinTarget::Resolve {
                record_type: "Organization".into(),
                reference: Expr::column(j2.clone(), vec![]),
            },
        ))
        .unwrap();
        set.insert(unnest(j2.clone(), Expr::column(j1.clone(), vec!["given".into()])))
            .unwrap();
        set.insert(unnest(j1.clone(), Expr::column(patient, vec!["name".into()])))
            .unwrap();

        let order: Vec<String> = set
            .in_dependency_order()
            .iter()
            .map(|j| j.alias.to_string())
            .collect();
        assert_eq!(order, vec!["j1", "j2", "j3"]);
        assert_eq!(set.get(&j3).unwrap().depends_on, Some(j2));
        assert_eq!(set.get(&j1).unwrap().depends_on, None);
    }

    #[test]
    fn test_ordered_sorts_by_kind_then_alias() {
        let mut generator = AliasGenerator::new();
        let j1 = generator.next_alias();
        let j2 = generator.next_alias();
        let patient = Alias::root("Patient");
        let mut set = JoinSet::new();
        set.insert(Join::new(
            JoinKind::Reference,
            j1.clone(),
            JoinTarget::Resolve {
                record_type: "Organization".into(),
                reference: Expr::column(patient.clone(), vec!["managingOrganization".into()]),
            },
        ))
        .unwrap();
        set.insert(unnest(j2.clone(), Expr::column(patient, vec!["name".into()])))
            .unwrap();
        let order: Vec<&Alias> = set.ordered().iter().map(|j| &j.alias).collect();
        assert_eq!(order, vec![&j2, &j1]);
    }

    #[test]
    fn test_unreachable_alias_is_reported() {
        let set = JoinSet::new();
        let subject = Alias::root("Patient");
        let other = Expr::column(Alias::root("Condition"), vec!["code".into()]);
        let err = set
            .check_reachable(&subject, "Condition.code", &[&other])
            .unwrap_err();
        assert!(err.to_string().contains("cannot be reached from subject resource Patient"));
        assert!(set
            .check_reachable(&subject, "gender", &[&Expr::column(subject.clone(), vec![])])
            .is_ok());
    }
}
