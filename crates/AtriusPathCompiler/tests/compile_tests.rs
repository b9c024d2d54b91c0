mod common;

use atrius_path_compiler::{JoinKind, Shape, compile};
use atrius_path_support::{Cardinality, QueryError, ValueKind};
use common::{ED_DIAGNOSIS_VALUE_SET, context, rendered};

#[test]
fn test_encounter_groupings() {
    let mut ctx = context("Encounter");
    let class_code = compile("class.code", &mut ctx).unwrap();
    assert_eq!(class_code.value.to_string(), "Encounter.class.code");
    assert!(class_code.is_singular());
    assert!(class_code.joins.is_empty());

    let display = compile("reasonCode.coding.display", &mut ctx).unwrap();
    assert_eq!(display.cardinality, Cardinality::Collection);
    assert_eq!(display.value.to_string(), "j2.display");
    assert_eq!(
        rendered(&display.joins),
        vec![
            "LEFT JOIN LATERAL UNNEST(Encounter.reasonCode) AS j1",
            "LEFT JOIN LATERAL UNNEST(j1.coding) AS j2",
        ]
    );
}

#[test]
fn test_claim_item_sequence() {
    let mut ctx = context("Claim");
    let sequence = compile("item.sequence", &mut ctx).unwrap();
    assert_eq!(sequence.kind, ValueKind::Integer);
    assert_eq!(sequence.value.to_string(), "j1.sequence");

    let err = compile("item.sequence.first() + 1", &mut ctx).unwrap_err();
    assert!(matches!(err, QueryError::Unsupported(_)));
}

#[test]
fn test_resolve_groupings() {
    let mut ctx = context("AllergyIntolerance");
    let gender = compile("patient.resolve().gender", &mut ctx).unwrap();
    assert_eq!(gender.value.to_string(), "j1.gender");
    assert_eq!(
        rendered(&gender.joins),
        vec!["LEFT JOIN Patient AS j1 ON j1.id = REFERENCE_KEY(AllergyIntolerance.patient, 'Patient')"]
    );

    let mut ctx = context("DiagnosticReport");
    let gender = compile("subject.resolve().ofType(Patient).gender", &mut ctx).unwrap();
    assert_eq!(
        rendered(&gender.joins),
        vec!["LEFT JOIN Patient AS j1 ON j1.id = REFERENCE_KEY(DiagnosticReport.subject, 'Patient')"]
    );
}

#[test]
fn test_reverse_resolve_groupings() {
    let mut ctx = context("Patient");
    let display = compile("reverseResolve(Condition.subject).code.coding.display", &mut ctx).unwrap();
    assert_eq!(display.value.to_string(), "j2.display");
    assert_eq!(
        rendered(&display.joins),
        vec![
            "LEFT JOIN Condition AS j1 ON REFERS_TO(j1.subject, 'Patient', Patient.id)",
            "LEFT JOIN LATERAL UNNEST(j1.code.coding) AS j2",
        ]
    );

    let count = compile("reverseResolve(Condition.subject).code.coding.count()", &mut ctx).unwrap();
    assert!(count.is_singular());
    assert_eq!(count.kind, ValueKind::Integer);
    let derived = count.joins.iter().next().unwrap();
    assert_eq!(derived.kind, JoinKind::Derived);
    assert_eq!(derived.alias.to_string(), "j3");
}

#[test]
fn test_sibling_collections_share_the_parent_unnest() {
    let mut ctx = context("Patient");
    let given = compile("name.given", &mut ctx).unwrap();
    let prefix = compile("name.prefix", &mut ctx).unwrap();
    assert_eq!(given.value.to_string(), "j2");
    assert_eq!(prefix.value.to_string(), "j3");

    let merged = given.joins.merge(&prefix.joins).unwrap();
    assert_eq!(
        rendered(&merged),
        vec![
            "LEFT JOIN LATERAL UNNEST(Patient.name) AS j1",
            "LEFT JOIN LATERAL UNNEST(j1.given) AS j2",
            "LEFT JOIN LATERAL UNNEST(j1.prefix) AS j3",
        ]
    );
}

#[test]
fn test_multiple_aggregations() {
    let mut ctx = context("Patient");
    let given = compile("name.given.count()", &mut ctx).unwrap();
    let identifiers = compile("identifier.count()", &mut ctx).unwrap();
    assert_eq!(given.aggregate.unwrap().function.to_string(), "COUNT(j2)");
    assert_eq!(identifiers.aggregate.unwrap().function.to_string(), "COUNT(j4)");
}

#[test]
fn test_where_on_reverse_resolved_conditions() {
    let mut ctx = context("Patient");
    let compiled = compile(
        "reverseResolve(Condition.subject).where($this.onsetDateTime > @2010 and \
         $this.onsetDateTime < @2011).verificationStatus.coding.code",
        &mut ctx,
    )
    .unwrap();
    assert_eq!(compiled.cardinality, Cardinality::Collection);
    assert_eq!(compiled.kind, ValueKind::String);
    let kinds: Vec<JoinKind> = compiled.joins.in_dependency_order().iter().map(|j| j.kind).collect();
    assert_eq!(kinds, vec![JoinKind::ReverseReference, JoinKind::Table]);
    assert_eq!(compiled.value.to_string(), "j2.code");
}

#[test]
fn test_member_of_on_reverse_resolved_conditions() {
    let mut ctx = context("Patient");
    let compiled = compile(
        &format!(
            "reverseResolve(Condition.subject).code.memberOf('{}')",
            ED_DIAGNOSIS_VALUE_SET
        ),
        &mut ctx,
    )
    .unwrap();
    assert!(compiled.is_boolean());
    assert_eq!(compiled.cardinality, Cardinality::Collection);
    let kinds: Vec<JoinKind> = compiled.joins.in_dependency_order().iter().map(|j| j.kind).collect();
    assert_eq!(kinds, vec![JoinKind::ReverseReference, JoinKind::ValueSet]);
    assert_eq!(ctx.value_set_cache().len(), 1);
}

#[test]
fn test_literal_coding_in_collection() {
    let mut ctx = context("Condition");
    let compiled = compile("http://snomed.info/sct|444814009 in code.coding", &mut ctx).unwrap();
    assert!(compiled.is_singular());
    let join = compiled.joins.iter().next().unwrap();
    assert_eq!(join.kind, JoinKind::Membership);
    assert_eq!(
        join.to_string(),
        "LEFT JOIN (SELECT Condition.id AS key, \
         MAX(CODING_EQUALS(CODING('http://snomed.info/sct|444814009'), j1)) AS value \
         FROM Condition AS Condition LEFT JOIN LATERAL UNNEST(Condition.code.coding) AS j1 \
         GROUP BY Condition.id) AS j2 ON j2.key = Condition.id"
    );
}

#[test]
fn test_join_sets_are_isomorphic_across_requests() {
    let expression = "reverseResolve(Condition.subject).code.coding.display";
    let first = compile(expression, &mut context("Patient")).unwrap();
    let second = compile(expression, &mut context("Patient")).unwrap();
    assert_eq!(first.joins, second.joins);
    assert_eq!(first.value, second.value);
}

#[test]
fn test_resolved_record_shape() {
    let mut ctx = context("Patient");
    let organization = compile("managingOrganization.resolve()", &mut ctx).unwrap();
    assert_eq!(organization.shape, Shape::Resource("Organization".into()));
    assert_eq!(organization.identity().to_string(), "j1.id");
}
