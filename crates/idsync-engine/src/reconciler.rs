//! Policy-driven reconciliation.
//!
//! Turns a source/destination entity pair into at most one [`Change`]:
//!
//! ```text
//!   source   destination   outcome
//!   ------   -----------   -------------------------------------------
//!   none     none          nothing
//!   some     none          CREATE  (ADD_VALUES only)
//!   none     some          DELETE  (identifier only)
//!   some     some          UPDATE  when identifiers match or source has none
//!                          RENAME  otherwise (no attribute operations)
//! ```
//!
//! Every outcome is gated by the condition the policy declares for its
//! modification type. A gated-off change is still returned, flagged as not
//! allowed, so it can be reported.

use idsync_connector::{
    eq_folded, AttributeOperation, AttributeValue, Change, Entity, ModificationType,
};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::expression::{Bindings, ExpressionEvaluator, DESTINATION};
use crate::policy::{AttributeStatus, Policy};
use crate::values::{missing_from, normalize, same_values, to_strings};

/// Decide which modification a pair of entities calls for.
pub fn classify(source: Option<&Entity>, destination: Option<&Entity>) -> Option<ModificationType> {
    match (source, destination) {
        (None, None) => None,
        (Some(_), None) => Some(ModificationType::Create),
        (None, Some(_)) => Some(ModificationType::Delete),
        (Some(src), Some(dst)) => match (src.identifier(), dst.identifier()) {
            (Some(s), Some(d)) if !eq_folded(s, d) => Some(ModificationType::Rename),
            _ => Some(ModificationType::Update),
        },
    }
}

/// A computed change and whether its gating condition let it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub change: Change,
    pub allowed: bool,
}

/// Pure diff engine over one policy.
pub struct Reconciler<'a> {
    policy: &'a Policy,
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> Reconciler<'a> {
    pub fn new(policy: &'a Policy, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self { policy, evaluator }
    }

    /// Give a source entry without identifier the one it would be created
    /// with, so renames can be detected.
    pub fn prepare_source(&self, source: &mut Entity) -> SyncResult<()> {
        if source.identifier().is_some() || !self.policy.identifier.is_configured() {
            return Ok(());
        }
        if let Some(identifier) = self.resolve_identifier(source)? {
            source.set_identifier(identifier);
        }
        Ok(())
    }

    /// Build a destination identifier from the identifier rule.
    pub fn resolve_identifier(&self, source: &Entity) -> SyncResult<Option<String>> {
        let rule = &self.policy.identifier;

        if let Some(expression) = &rule.expression {
            let values = self
                .evaluator
                .eval_string_list(expression, &Bindings::source(source))?;
            return match values.into_iter().next() {
                Some(relative) => Ok(Some(rule.qualify(&relative))),
                None => Err(SyncError::evaluation(
                    expression.as_str(),
                    "identifier expression returned no value",
                )),
            };
        }

        if let Some(attribute) = &rule.unique_attribute {
            return Ok(source
                .first_value(attribute)
                .filter(|v| !v.is_empty())
                .map(|value| rule.qualify(&format!("{attribute}={value}"))));
        }

        Ok(None)
    }

    /// Whether the delete condition needs the destination entity.
    pub fn delete_needs_destination(&self) -> bool {
        self.policy
            .conditions
            .for_modification(ModificationType::Delete)
            .references(self.evaluator, DESTINATION)
    }

    /// Compute the change for a pair of entities.
    ///
    /// `Ok(None)` means nothing to do, including an update whose attribute
    /// operations all turned out empty.
    pub fn compute_change(
        &self,
        source: Option<&Entity>,
        destination: Option<&Entity>,
    ) -> SyncResult<Option<PlannedChange>> {
        match (classify(source, destination), source, destination) {
            (Some(ModificationType::Create), Some(src), _) => self.plan_create(src).map(Some),
            (Some(ModificationType::Update), Some(src), Some(dst)) => self.plan_update(src, dst),
            (Some(ModificationType::Rename), Some(src), Some(dst)) => {
                self.plan_rename(src, dst).map(Some)
            }
            (Some(ModificationType::Delete), _, Some(dst)) => {
                let identifier = destination_identifier(dst)?;
                self.plan_delete(identifier, Some(dst)).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Plan the creation of a source-only entry.
    pub fn plan_create(&self, source: &Entity) -> SyncResult<PlannedChange> {
        let identifier = match source.identifier() {
            Some(id) => id.to_string(),
            None => self.resolve_identifier(source)?.ok_or_else(|| {
                SyncError::missing_identifier(
                    "source entry has no identifier and no identifier rule matched",
                )
            })?,
        };

        let mut operations = Vec::new();
        for name in self.policy.write_scope(Some(source)) {
            let status = self.policy.status_of(&name);
            let source_values = attribute_values(source, &name);
            let source_strings = to_strings(&source_values);
            let bindings = Bindings::source(source).with_attribute(&source_strings, &[]);

            let mut values = match self.policy.attribute(&name) {
                Some(p) if !p.force_values.is_empty() => self.expand(&p.force_values, &bindings)?,
                _ => source_values,
            };

            if let Some(attribute_policy) = self.policy.attribute(&name) {
                if status == AttributeStatus::Merge || normalize(values.clone()).is_empty() {
                    values.extend(self.expand(&attribute_policy.create_values, &bindings)?);
                }
                if status == AttributeStatus::Merge || normalize(values.clone()).is_empty() {
                    values.extend(self.expand(&attribute_policy.default_values, &bindings)?);
                }
            }

            let values = normalize(values);
            if !values.is_empty() {
                operations.push(AttributeOperation::add(name, values));
            }
        }

        let allowed = self.is_allowed(ModificationType::Create, &Bindings::source(source))?;

        Ok(PlannedChange {
            change: Change::create(identifier, operations),
            allowed,
        })
    }

    /// Plan the attribute convergence of a correlated pair.
    pub fn plan_update(
        &self,
        source: &Entity,
        destination: &Entity,
    ) -> SyncResult<Option<PlannedChange>> {
        let mut operations = Vec::new();

        for name in self.policy.write_scope(Some(source)) {
            let status = self.policy.status_of(&name);
            if status == AttributeStatus::Keep {
                continue;
            }

            let source_values = attribute_values(source, &name);
            let destination_values = attribute_values(destination, &name);
            let source_strings = to_strings(&source_values);
            let destination_strings = to_strings(&destination_values);
            let bindings = Bindings::pair(Some(source), Some(destination))
                .with_attribute(&source_strings, &destination_strings);

            let attribute_policy = self.policy.attribute(&name);
            let mut values = match attribute_policy {
                Some(p) if !p.force_values.is_empty() => self.expand(&p.force_values, &bindings)?,
                _ => source_values,
            };
            values = normalize(values);

            if let Some(p) = attribute_policy {
                if status == AttributeStatus::Merge || values.is_empty() {
                    values.extend(self.expand(&p.default_values, &bindings)?);
                    values = normalize(values);
                }
            }

            let existing = normalize(destination_values);
            if let Some(operation) = diff_attribute(status, &name, values, existing) {
                operations.push(operation);
            }
        }

        if operations.is_empty() {
            debug!(
                identifier = ?destination.identifier(),
                "Entries already converged"
            );
            return Ok(None);
        }

        let identifier = destination_identifier(destination)?;
        let allowed = self.is_allowed(
            ModificationType::Update,
            &Bindings::pair(Some(source), Some(destination)),
        )?;

        Ok(Some(PlannedChange {
            change: Change::update(identifier, operations),
            allowed,
        }))
    }

    /// Plan a rename. Attribute convergence waits for the next pass.
    pub fn plan_rename(&self, source: &Entity, destination: &Entity) -> SyncResult<PlannedChange> {
        let old = destination_identifier(destination)?;
        let new = source.identifier().ok_or_else(|| {
            SyncError::missing_identifier("rename requires a source identifier")
        })?;
        let allowed = self.is_allowed(
            ModificationType::Rename,
            &Bindings::pair(Some(source), Some(destination)),
        )?;

        Ok(PlannedChange {
            change: Change::rename(old, new),
            allowed,
        })
    }

    /// Plan a deletion. `destination` is only needed when the delete
    /// condition references it.
    pub fn plan_delete(
        &self,
        identifier: &str,
        destination: Option<&Entity>,
    ) -> SyncResult<PlannedChange> {
        let allowed =
            self.is_allowed(ModificationType::Delete, &Bindings::destination(destination))?;

        Ok(PlannedChange {
            change: Change::delete(identifier),
            allowed,
        })
    }

    /// Evaluate the condition the policy declares for `modification`.
    fn is_allowed(&self, modification: ModificationType, bindings: &Bindings<'_>) -> SyncResult<bool> {
        self.policy
            .conditions
            .for_modification(modification)
            .evaluate(self.evaluator, bindings)
    }

    fn expand(&self, expressions: &[String], bindings: &Bindings<'_>) -> SyncResult<Vec<AttributeValue>> {
        let mut values = Vec::new();
        for expression in expressions {
            values.extend(
                self.evaluator
                    .eval_string_list(expression, bindings)?
                    .into_iter()
                    .map(AttributeValue::String),
            );
        }
        Ok(values)
    }
}

/// Per-status dispatch for one attribute.
///
/// `wanted` and `existing` must already be normalized.
fn diff_attribute(
    status: AttributeStatus,
    name: &str,
    wanted: Vec<AttributeValue>,
    existing: Vec<AttributeValue>,
) -> Option<AttributeOperation> {
    match status {
        AttributeStatus::Force => match (wanted.is_empty(), existing.is_empty()) {
            (true, true) => None,
            (true, false) => Some(AttributeOperation::delete(name, existing)),
            (false, true) => Some(AttributeOperation::replace(name, wanted)),
            (false, false) => {
                (!same_values(&wanted, &existing)).then(|| AttributeOperation::replace(name, wanted))
            }
        },
        AttributeStatus::Merge => {
            if wanted.is_empty() {
                return None;
            }
            if existing.is_empty() {
                return Some(AttributeOperation::add(name, wanted));
            }
            let missing = missing_from(&wanted, &existing);
            (!missing.is_empty()).then(|| AttributeOperation::add(name, missing))
        }
        AttributeStatus::Keep => None,
    }
}

fn attribute_values(entity: &Entity, name: &str) -> Vec<AttributeValue> {
    entity
        .attribute(name)
        .map(|a| a.values().to_vec())
        .unwrap_or_default()
}

fn destination_identifier(destination: &Entity) -> SyncResult<&str> {
    destination
        .identifier()
        .ok_or_else(|| SyncError::internal("destination entity has no identifier"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Condition;
    use crate::policy::{AttributePolicy, Conditions, IdentifierRule};
    use crate::rhai_evaluator::RhaiEvaluator;
    use idsync_connector::OperationKind;

    fn status(name: &str, status: AttributeStatus) -> Policy {
        Policy::new().with_attribute(name, AttributePolicy::with_status(status))
    }

    fn pair(src: &[&str], dst: &[&str], attr: &str) -> (Entity, Entity) {
        (
            Entity::new("uid=1,dc=x").with(attr, src.iter().copied()),
            Entity::new("uid=1,dc=x").with(attr, dst.iter().copied()),
        )
    }

    fn sorted(op: &AttributeOperation) -> Vec<String> {
        let mut values = op.string_values();
        values.sort();
        values
    }

    #[test]
    fn test_classify() {
        let a = Entity::new("uid=a,dc=x");
        let a_upper = Entity::new("UID=A,DC=X");
        let b = Entity::new("uid=b,dc=x");
        let anonymous = Entity::anonymous();

        assert_eq!(classify(None, None), None);
        assert_eq!(classify(Some(&a), None), Some(ModificationType::Create));
        assert_eq!(classify(None, Some(&a)), Some(ModificationType::Delete));
        assert_eq!(classify(Some(&a_upper), Some(&a)), Some(ModificationType::Update));
        assert_eq!(classify(Some(&anonymous), Some(&a)), Some(ModificationType::Update));
        assert_eq!(classify(Some(&b), Some(&a)), Some(ModificationType::Rename));

        let accented = Entity::new("cn=ÉLODIE MÜLLER,dc=x");
        let lower = Entity::new("cn=élodie müller,dc=x");
        assert_eq!(classify(Some(&accented), Some(&lower)), Some(ModificationType::Update));
    }

    #[test]
    fn test_merge_adds_only_missing_values() {
        let evaluator = RhaiEvaluator::new();
        let policy = status("telephoneNumber", AttributeStatus::Merge);
        let (src, mut dst) = pair(&["A", "B"], &["B", "C"], "telephoneNumber");

        let planned = Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), Some(&dst))
            .unwrap()
            .unwrap();
        assert_eq!(planned.change.modification, ModificationType::Update);
        assert_eq!(planned.change.operations.len(), 1);
        let op = &planned.change.operations[0];
        assert_eq!(op.kind, OperationKind::AddValues);
        assert_eq!(op.string_values(), vec!["A"]);

        planned.change.apply_operations(&mut dst);
        let mut after = dst.values("telephoneNumber");
        after.sort();
        assert_eq!(after, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_merge_is_monotonic() {
        let evaluator = RhaiEvaluator::new();
        let policy = status("telephoneNumber", AttributeStatus::Merge);
        let reconciler = Reconciler::new(&policy, &evaluator);

        let (src, mut dst) = pair(&["A", "B"], &[], "telephoneNumber");
        let first = reconciler.compute_change(Some(&src), Some(&dst)).unwrap().unwrap();
        first.change.apply_operations(&mut dst);

        let shrunk = Entity::new("uid=1,dc=x").with("telephoneNumber", ["A"]);
        assert!(reconciler.compute_change(Some(&shrunk), Some(&dst)).unwrap().is_none());
        let emptied = Entity::new("uid=1,dc=x");
        assert!(reconciler.compute_change(Some(&emptied), Some(&dst)).unwrap().is_none());
    }

    #[test]
    fn test_force_deletes_when_source_empty() {
        let evaluator = RhaiEvaluator::new();
        let policy = status("description", AttributeStatus::Force);
        let (src, dst) = pair(&[], &["old"], "description");

        let planned = Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), Some(&dst))
            .unwrap()
            .unwrap();
        let op = planned.change.operation_for("description").unwrap();
        assert_eq!(op.kind, OperationKind::DeleteValues);
        assert_eq!(op.string_values(), vec!["old"]);
    }

    #[test]
    fn test_force_replaces_and_is_idempotent() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new();
        let reconciler = Reconciler::new(&policy, &evaluator);
        let (src, mut dst) = pair(&["x", "y"], &["y", "z"], "mail");

        let first = reconciler.compute_change(Some(&src), Some(&dst)).unwrap().unwrap();
        let op = first.change.operation_for("mail").unwrap();
        assert_eq!(op.kind, OperationKind::ReplaceValues);
        assert_eq!(sorted(op), vec!["x", "y"]);

        first.change.apply_operations(&mut dst);
        assert!(reconciler.compute_change(Some(&src), Some(&dst)).unwrap().is_none());
    }

    #[test]
    fn test_force_ignores_order_and_empty_strings() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new();
        let reconciler = Reconciler::new(&policy, &evaluator);

        let (src, dst) = pair(&["b", "a"], &["a", "b"], "mail");
        assert!(reconciler.compute_change(Some(&src), Some(&dst)).unwrap().is_none());

        let (src, dst) = pair(&[""], &[], "description");
        assert!(reconciler.compute_change(Some(&src), Some(&dst)).unwrap().is_none());
    }

    #[test]
    fn test_keep_never_emits_an_operation() {
        let evaluator = RhaiEvaluator::new();
        let policy = status("seeAlso", AttributeStatus::Keep);
        let src = Entity::new("uid=1,dc=x").with("seeAlso", ["X"]).with("cn", ["New"]);
        let dst = Entity::new("uid=1,dc=x").with("cn", ["Old"]);

        let planned = Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), Some(&dst))
            .unwrap()
            .unwrap();
        assert!(planned.change.operation_for("seeAlso").is_none());
        assert!(planned.change.operation_for("cn").is_some());
    }

    #[test]
    fn test_create_emits_only_add_values() {
        let evaluator = RhaiEvaluator::new();
        let policy = status("description", AttributeStatus::Force).with_attribute(
            "mail",
            AttributePolicy::default().create_value(r#"source.uid + "@example.com""#),
        );
        let src = Entity::new("uid=42,dc=x")
            .with("uid", ["42"])
            .with("cn", ["Forty Two"]);

        let planned = Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), None)
            .unwrap()
            .unwrap();
        assert!(planned.allowed);
        assert_eq!(planned.change.modification, ModificationType::Create);
        assert!(planned
            .change
            .operations
            .iter()
            .all(|op| op.kind == OperationKind::AddValues));
        assert_eq!(
            planned.change.operation_for("mail").unwrap().string_values(),
            vec!["42@example.com"]
        );
        assert!(planned.change.operation_for("description").is_none());
    }

    #[test]
    fn test_create_identifier_from_expression_and_base() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new().with_identifier(IdentifierRule {
            expression: Some(r#""uid=" + source.uid"#.to_string()),
            unique_attribute: None,
            base: Some("ou=people,dc=example,dc=com".to_string()),
        });
        let src = Entity::anonymous().with("uid", ["42"]);

        let planned = Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), None)
            .unwrap()
            .unwrap();
        assert_eq!(planned.change.identifier, "uid=42,ou=people,dc=example,dc=com");
    }

    #[test]
    fn test_create_identifier_from_unique_attribute() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new().with_identifier(IdentifierRule {
            expression: None,
            unique_attribute: Some("uid".to_string()),
            base: Some("dc=x".to_string()),
        });
        let reconciler = Reconciler::new(&policy, &evaluator);
        let src = Entity::anonymous().with("uid", ["7"]);
        let planned = reconciler.plan_create(&src).unwrap();
        assert_eq!(planned.change.identifier, "uid=7,dc=x");

        let nameless = Entity::anonymous().with("cn", ["No Uid"]);
        let err = reconciler.plan_create(&nameless).unwrap_err();
        assert_eq!(err.kind(), "missing_identifier");
    }

    #[test]
    fn test_prepare_source_enables_rename() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new().with_identifier(IdentifierRule {
            expression: Some(r#""uid=" + source.uid"#.to_string()),
            unique_attribute: None,
            base: Some("dc=x".to_string()),
        });
        let reconciler = Reconciler::new(&policy, &evaluator);
        let mut src = Entity::anonymous().with("uid", ["new"]);
        reconciler.prepare_source(&mut src).unwrap();
        assert_eq!(src.identifier(), Some("uid=new,dc=x"));

        let dst = Entity::new("uid=old,dc=x").with("uid", ["old"]);
        let planned = reconciler.compute_change(Some(&src), Some(&dst)).unwrap().unwrap();
        assert_eq!(planned.change, Change::rename("uid=old,dc=x", "uid=new,dc=x"));
        assert!(planned.change.operations.is_empty());
    }

    #[test]
    fn test_force_values_override_source() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new().with_attribute(
            "cn",
            AttributePolicy::default().force_value(r#"source.givenName + " " + source.sn"#),
        );
        let src = Entity::new("uid=1,dc=x")
            .with("cn", ["ignored"])
            .with("givenName", ["Ada"])
            .with("sn", ["Lovelace"]);
        let dst = Entity::new("uid=1,dc=x")
            .with("cn", ["Ada Lovelace"])
            .with("givenName", ["Ada"])
            .with("sn", ["Lovelace"]);

        assert!(Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), Some(&dst))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_default_values_fill_empty_source() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new()
            .with_attribute("loginShell", AttributePolicy::default().default_value(r#""/bin/bash""#));
        let src = Entity::new("uid=1,dc=x");
        let dst = Entity::new("uid=1,dc=x");

        let planned = Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), Some(&dst))
            .unwrap()
            .unwrap();
        let op = planned.change.operation_for("loginShell").unwrap();
        assert_eq!(op.kind, OperationKind::ReplaceValues);
        assert_eq!(op.string_values(), vec!["/bin/bash"]);
    }

    #[test]
    fn test_write_allow_list_limits_scope() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new().with_write_attributes(["mail"]);
        let src = Entity::new("uid=1,dc=x").with("mail", ["a@x"]).with("cn", ["New"]);
        let dst = Entity::new("uid=1,dc=x").with("mail", ["a@x"]).with("cn", ["Old"]);

        assert!(Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), Some(&dst))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_false_condition_marks_change_not_allowed() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new().with_conditions(Conditions {
            update: Condition::from(r#"destination.cn != "Old""#),
            ..Conditions::default()
        });
        let (src, dst) = pair(&["New"], &["Old"], "cn");

        let planned = Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), Some(&dst))
            .unwrap()
            .unwrap();
        assert!(!planned.allowed);
        assert_eq!(planned.change.modification, ModificationType::Update);
    }

    #[test]
    fn test_each_modification_uses_its_own_condition() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new().with_conditions(Conditions {
            rename: Condition::Never,
            create: Condition::from(r#"source.uid != "blocked""#),
            ..Conditions::default()
        });
        let reconciler = Reconciler::new(&policy, &evaluator);

        let renamed = Entity::new("uid=b,dc=x");
        let existing = Entity::new("uid=a,dc=x");
        let planned = reconciler.plan_rename(&renamed, &existing).unwrap();
        assert_eq!(planned.change.modification, ModificationType::Rename);
        assert!(!planned.allowed);

        let blocked = Entity::new("uid=blocked,dc=x").with("uid", ["blocked"]);
        let welcome = Entity::new("uid=w,dc=x").with("uid", ["w"]);
        assert!(!reconciler.plan_create(&blocked).unwrap().allowed);
        assert!(reconciler.plan_create(&welcome).unwrap().allowed);
        assert!(reconciler.plan_delete("uid=a,dc=x", None).unwrap().allowed);
    }

    #[test]
    fn test_delete_condition_and_destination_reference() {
        let evaluator = RhaiEvaluator::new();
        let lazy = Policy::new().with_conditions(Conditions {
            delete: Condition::from(r#"destination.employeeType == "temp""#),
            ..Conditions::default()
        });
        let reconciler = Reconciler::new(&lazy, &evaluator);
        assert!(reconciler.delete_needs_destination());

        let temp = Entity::new("uid=t,dc=x").with("employeeType", ["temp"]);
        let staff = Entity::new("uid=s,dc=x").with("employeeType", ["staff"]);
        assert!(reconciler.plan_delete("uid=t,dc=x", Some(&temp)).unwrap().allowed);
        assert!(!reconciler.plan_delete("uid=s,dc=x", Some(&staff)).unwrap().allowed);

        let literal = Policy::new();
        let reconciler = Reconciler::new(&literal, &evaluator);
        assert!(!reconciler.delete_needs_destination());
        let planned = reconciler.plan_delete("uid=gone,dc=x", None).unwrap();
        assert!(planned.allowed);
        assert_eq!(planned.change, Change::delete("uid=gone,dc=x"));
    }

    #[test]
    fn test_broken_expression_is_evaluation_error() {
        let evaluator = RhaiEvaluator::new();
        let policy = Policy::new()
            .with_attribute("mail", AttributePolicy::default().force_value("source.uid +"));
        let (src, dst) = pair(&["a"], &["b"], "mail");

        let err = Reconciler::new(&policy, &evaluator)
            .compute_change(Some(&src), Some(&dst))
            .unwrap_err();
        assert!(matches!(err, SyncError::Evaluation { .. }));
    }
}
