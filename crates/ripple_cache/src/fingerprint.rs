//! Class fingerprints and the diff that classifies class changes.
//!
//! A fingerprint keeps hashes rather than the full descriptor: the class
//! header (visibility, modality, supertypes, type parameters), the
//! constructors, and per member name the combined signature of all overloads
//! with that name. Diffing two fingerprints yields the [`ChangeInfo`]s of one
//! save.

use std::collections::{BTreeMap, BTreeSet};

use ripple_common::{ContentHash, FqName};
use ripple_config::DiffPolicy;
use serde::{Deserialize, Serialize};

use crate::change::ChangeInfo;
use crate::descriptor::{ClassDescriptor, MemberDescriptor, MemberKind, Modality, Visibility};

/// Stored summary of one class from its last successful compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFingerprint {
    /// Hash of visibility, modality, supertypes and type parameters.
    pub header_hash: ContentHash,
    /// Whether the class can have subclasses.
    pub is_open: bool,
    /// Declared direct supertypes; feeds the subtype index.
    pub supertypes: Vec<FqName>,
    /// Hash of all constructor signatures.
    pub constructors_hash: ContentHash,
    /// Per member name, the merged fingerprint of its overloads.
    pub members: BTreeMap<String, MemberFingerprint>,
    /// Hash of linkage-irrelevant contents.
    pub body_hash: ContentHash,
}

/// Merged fingerprint of every overload sharing one member name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFingerprint {
    /// Hash of the sorted `kind:signature` strings of all overloads.
    pub signature_hash: ContentHash,
    /// The widest visibility among the overloads.
    pub visibility: Visibility,
    /// Whether any overload can be overridden.
    pub overridable: bool,
}

impl ClassFingerprint {
    /// Fingerprints a class descriptor.
    pub fn of(class: &ClassDescriptor) -> Self {
        let header_hash = ContentHash::from_fields(
            [
                format!("{:?}", class.visibility),
                format!("{:?}", class.modality),
            ]
            .into_iter()
            .chain(class.supertypes.iter().map(|s| format!("super:{s}")))
            .chain(class.type_parameters.iter().map(|p| format!("tparam:{p}"))),
        );

        let mut constructors: Vec<String> = class
            .members
            .iter()
            .filter(|m| m.kind == MemberKind::Constructor)
            .map(|m| format!("{:?}:{}", m.visibility, m.signature))
            .collect();
        constructors.sort();

        let mut by_name: BTreeMap<&str, Vec<&MemberDescriptor>> = BTreeMap::new();
        for member in class
            .members
            .iter()
            .filter(|m| m.kind != MemberKind::Constructor)
        {
            by_name.entry(member.name.as_str()).or_default().push(member);
        }
        let members = by_name
            .into_iter()
            .map(|(name, overloads)| (name.to_string(), MemberFingerprint::of(&overloads)))
            .collect();

        Self {
            header_hash,
            is_open: class.modality.is_overridable(),
            supertypes: class.supertypes.clone(),
            constructors_hash: ContentHash::from_fields(constructors),
            members,
            body_hash: class.body_hash,
        }
    }
}

impl MemberFingerprint {
    fn of(overloads: &[&MemberDescriptor]) -> Self {
        let mut signatures: Vec<String> = overloads
            .iter()
            .map(|m| format!("{:?}:{:?}:{}", m.kind, m.modality, m.signature))
            .collect();
        signatures.sort();
        Self {
            signature_hash: ContentHash::from_fields(signatures),
            visibility: overloads
                .iter()
                .map(|m| m.visibility)
                .max()
                .unwrap_or(Visibility::Private),
            overridable: overloads.iter().any(|m| m.modality != Modality::Final),
        }
    }
}

/// Classifies the change from `old` to `new` for the class `fq_name`.
///
/// Returns an empty list when the fingerprints are identical, and a single
/// `NoPropagation` when only linkage-irrelevant contents differ. Otherwise a
/// header, constructor, or member signature change yields `SignatureChanged`,
/// and any non-private member delta yields `MembersChanged`; a single save can
/// produce both.
pub fn diff(
    fq_name: &FqName,
    old: Option<&ClassFingerprint>,
    new: &ClassFingerprint,
    policy: &DiffPolicy,
) -> Vec<ChangeInfo> {
    let Some(old) = old else {
        let change = if policy.propagate_new_classes {
            ChangeInfo::SignatureChanged {
                fq_name: fq_name.clone(),
                are_subclasses_affected: false,
            }
        } else {
            ChangeInfo::NoPropagation {
                fq_name: Some(fq_name.clone()),
            }
        };
        return vec![change];
    };
    if old == new {
        return Vec::new();
    }

    let class_open = old.is_open || new.is_open;
    let mut signature_changed = false;
    let mut subclasses_affected = false;
    let mut changed_members = BTreeSet::new();

    if old.header_hash != new.header_hash {
        signature_changed = true;
        subclasses_affected |= class_open;
    }
    if old.constructors_hash != new.constructors_hash {
        signature_changed = true;
    }

    let names: BTreeSet<&String> = old.members.keys().chain(new.members.keys()).collect();
    for name in names {
        match (old.members.get(name), new.members.get(name)) {
            (Some(before), Some(after)) => {
                if before.visibility != after.visibility {
                    changed_members.insert(name.clone());
                }
                if before.overridable != after.overridable {
                    changed_members.insert(name.clone());
                    signature_changed = true;
                    subclasses_affected |= class_open;
                }
                if before.signature_hash != after.signature_hash {
                    signature_changed = true;
                    let private = before.visibility == Visibility::Private
                        && after.visibility == Visibility::Private;
                    if !private {
                        changed_members.insert(name.clone());
                    }
                    subclasses_affected |= if private {
                        policy.private_member_changes_affect_subclasses
                    } else if class_open && (before.overridable || after.overridable) {
                        true
                    } else {
                        policy.non_open_member_changes_affect_subclasses
                    };
                }
            }
            _ => {
                changed_members.insert(name.clone());
            }
        }
    }

    let mut changes = Vec::new();
    if signature_changed {
        changes.push(ChangeInfo::SignatureChanged {
            fq_name: fq_name.clone(),
            are_subclasses_affected: subclasses_affected,
        });
    }
    if !changed_members.is_empty() {
        changes.push(ChangeInfo::MembersChanged {
            fq_name: fq_name.clone(),
            names: changed_members,
        });
    }
    if changes.is_empty() {
        changes.push(ChangeInfo::NoPropagation {
            fq_name: Some(fq_name.clone()),
        });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ClassDescriptor {
        ClassDescriptor::new("p.Base")
            .open()
            .with_member(MemberDescriptor::function("foo", "(): Int").open())
            .with_member(MemberDescriptor::function("bar", "(): Unit"))
    }

    fn classify(old: &ClassDescriptor, new: &ClassDescriptor) -> Vec<ChangeInfo> {
        classify_with(old, new, &DiffPolicy::default())
    }

    fn classify_with(
        old: &ClassDescriptor,
        new: &ClassDescriptor,
        policy: &DiffPolicy,
    ) -> Vec<ChangeInfo> {
        diff(
            &new.fq_name,
            Some(&ClassFingerprint::of(old)),
            &ClassFingerprint::of(new),
            policy,
        )
    }

    fn signature(affected: bool) -> ChangeInfo {
        ChangeInfo::SignatureChanged {
            fq_name: FqName::new("p.Base"),
            are_subclasses_affected: affected,
        }
    }

    fn members(names: &[&str]) -> ChangeInfo {
        ChangeInfo::MembersChanged {
            fq_name: FqName::new("p.Base"),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[test]
    fn new_class_is_not_propagated_by_default() {
        let fp = ClassFingerprint::of(&base());
        let changes = diff(&FqName::new("p.Base"), None, &fp, &DiffPolicy::default());
        assert_eq!(
            changes,
            vec![ChangeInfo::NoPropagation {
                fq_name: Some(FqName::new("p.Base"))
            }]
        );
    }

    #[test]
    fn new_class_propagates_when_configured() {
        let policy = DiffPolicy {
            propagate_new_classes: true,
            ..DiffPolicy::default()
        };
        let fp = ClassFingerprint::of(&base());
        let changes = diff(&FqName::new("p.Base"), None, &fp, &policy);
        assert_eq!(changes, vec![signature(false)]);
    }

    #[test]
    fn identical_class_has_no_changes() {
        assert!(classify(&base(), &base()).is_empty());
    }

    #[test]
    fn member_order_is_irrelevant() {
        let reordered = ClassDescriptor::new("p.Base")
            .open()
            .with_member(MemberDescriptor::function("bar", "(): Unit"))
            .with_member(MemberDescriptor::function("foo", "(): Int").open());
        assert!(classify(&base(), &reordered).is_empty());
    }

    #[test]
    fn body_only_change_is_not_propagated() {
        let changed = base().with_body(b"return 42");
        assert_eq!(
            classify(&base(), &changed),
            vec![ChangeInfo::NoPropagation {
                fq_name: Some(FqName::new("p.Base"))
            }]
        );
    }

    #[test]
    fn open_member_signature_change_affects_subclasses() {
        let mut changed = base();
        changed.members[0].signature = "(): Long".to_string();
        assert_eq!(
            classify(&base(), &changed),
            vec![signature(true), members(&["foo"])]
        );
    }

    #[test]
    fn final_member_signature_change_is_local() {
        let mut changed = base();
        changed.members[1].signature = "(x: Int): Unit".to_string();
        assert_eq!(
            classify(&base(), &changed),
            vec![signature(false), members(&["bar"])]
        );
    }

    #[test]
    fn final_member_policy_is_tunable() {
        let policy = DiffPolicy {
            non_open_member_changes_affect_subclasses: true,
            ..DiffPolicy::default()
        };
        let mut changed = base();
        changed.members[1].signature = "(x: Int): Unit".to_string();
        assert_eq!(
            classify_with(&base(), &changed, &policy),
            vec![signature(true), members(&["bar"])]
        );
    }

    #[test]
    fn private_member_signature_change_has_no_member_delta() {
        let old = base().with_member(
            MemberDescriptor::function("helper", "(): Int").with_visibility(Visibility::Private),
        );
        let new = base().with_member(
            MemberDescriptor::function("helper", "(): Long").with_visibility(Visibility::Private),
        );
        assert_eq!(classify(&old, &new), vec![signature(false)]);

        let policy = DiffPolicy {
            private_member_changes_affect_subclasses: true,
            ..DiffPolicy::default()
        };
        assert_eq!(classify_with(&old, &new, &policy), vec![signature(true)]);
    }

    #[test]
    fn added_member_is_members_changed_only() {
        let changed = base().with_member(MemberDescriptor::property("baz", "Int"));
        assert_eq!(classify(&base(), &changed), vec![members(&["baz"])]);
    }

    #[test]
    fn removed_member_is_members_changed_only() {
        let mut changed = base();
        changed.members.remove(1);
        assert_eq!(classify(&base(), &changed), vec![members(&["bar"])]);
    }

    #[test]
    fn visibility_change_is_members_changed() {
        let mut changed = base();
        changed.members[1].visibility = Visibility::Internal;
        assert_eq!(classify(&base(), &changed), vec![members(&["bar"])]);
    }

    #[test]
    fn new_overload_changes_signature_of_name() {
        let changed = base().with_member(MemberDescriptor::function("bar", "(x: Int): Unit"));
        assert_eq!(
            classify(&base(), &changed),
            vec![signature(false), members(&["bar"])]
        );
    }

    #[test]
    fn making_member_final_affects_subclasses() {
        let mut changed = base();
        changed.members[0].modality = Modality::Final;
        assert_eq!(
            classify(&base(), &changed),
            vec![signature(true), members(&["foo"])]
        );
    }

    #[test]
    fn supertype_change_of_open_class_affects_subclasses() {
        let changed = base().with_supertype("p.Marker");
        assert_eq!(classify(&base(), &changed), vec![signature(true)]);
    }

    #[test]
    fn header_change_of_final_class_is_local() {
        let old = ClassDescriptor::new("p.Base");
        let new = ClassDescriptor::new("p.Base").with_type_parameter("T");
        assert_eq!(classify(&old, &new), vec![signature(false)]);
    }

    #[test]
    fn constructor_change_is_local() {
        let old = base().with_member(MemberDescriptor::constructor("()"));
        let new = base().with_member(MemberDescriptor::constructor("(x: Int)"));
        assert_eq!(classify(&old, &new), vec![signature(false)]);
    }

    #[test]
    fn fingerprint_records_supertypes() {
        let sub = ClassDescriptor::new("p.Sub").with_supertype("p.Base");
        let fp = ClassFingerprint::of(&sub);
        assert_eq!(fp.supertypes, vec![FqName::new("p.Base")]);
        assert!(!fp.is_open);
    }
}
