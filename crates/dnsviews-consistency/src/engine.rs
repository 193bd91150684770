//! View/prefix consistency checks.
//!
//! Given a proposed change of the prefixes directly assigned to a view, work
//! out which addresses would be governed by a different view afterwards and
//! dry-run their DNS records against that view. Every failure is collected;
//! the caller decides whether to persist.

use crate::collab::{MemberScope, PrefixHierarchy, RecordConsistency, ViewRegistry};
use crate::impact::ImpactSet;
use dnsviews_core::error::{Error, FieldErrors, Result};
use dnsviews_core::types::{IpAddress, View};
use ipnet::IpNet;
use std::collections::BTreeSet;
use tracing::debug;

/// Form field that prefix consistency problems are attached to.
pub const PREFIXES_FIELD: &str = "prefixes";

pub struct ConsistencyEngine<'a> {
    hierarchy: &'a dyn PrefixHierarchy,
    registry: &'a dyn ViewRegistry,
    records: &'a dyn RecordConsistency,
}

impl<'a> ConsistencyEngine<'a> {
    pub fn new(
        hierarchy: &'a dyn PrefixHierarchy,
        registry: &'a dyn ViewRegistry,
        records: &'a dyn RecordConsistency,
    ) -> Self {
        Self {
            hierarchy,
            registry,
            records,
        }
    }

    /// Validate moving `view` from `old` to `new` prefixes.
    ///
    /// `old` is `None` when the view has not been persisted yet. An empty
    /// result means the change is safe to commit. Collaborator failures
    /// abort the whole check.
    pub fn validate_prefix_change(
        &self,
        view: &View,
        old: Option<&BTreeSet<IpNet>>,
        new: &BTreeSet<IpNet>,
    ) -> Result<FieldErrors> {
        let impact = ImpactSet::compute(self.registry, view, old, new)?;
        let mut errors = FieldErrors::new();
        if impact.is_empty() {
            debug!(view = %view.name, "prefix assignment unchanged");
            return Ok(errors);
        }

        for prefix in &impact.gained {
            self.check_gained(view, prefix, &mut errors)?;
        }

        for prefix in impact.orphaned() {
            self.check_orphaned(view, prefix, &mut errors)?;
        }

        debug!(
            view = %view.name,
            gained = impact.gained.len(),
            lost = impact.lost.len(),
            errors = errors.len(),
            "validated prefix change"
        );

        Ok(errors)
    }

    /// Addresses in a newly assigned prefix must be valid under `view`.
    fn check_gained(&self, view: &View, prefix: &IpNet, errors: &mut FieldErrors) -> Result<()> {
        for address in self.hierarchy.members_of(prefix, MemberScope::AnyView)? {
            self.check_address(&address, view, errors)?;
        }
        Ok(())
    }

    /// A prefix without any direct assignment left inherits from its nearest
    /// ancestor. Its addresses must be valid under each view assigned there.
    fn check_orphaned(&self, view: &View, prefix: &IpNet, errors: &mut FieldErrors) -> Result<()> {
        let Some(parent) = self.hierarchy.ancestors_of(prefix)?.pop() else {
            debug!(prefix = %prefix, "prefix has no ancestor, no view will govern it");
            return Ok(());
        };

        let inherited: Vec<View> = self
            .registry
            .views_assigned_to(&parent)?
            .into_iter()
            .filter(|v| v.id != view.id)
            .collect();
        if inherited.is_empty() {
            return Ok(());
        }

        let members = self.hierarchy.members_of(prefix, MemberScope::AnyView)?;
        for candidate in &inherited {
            debug!(
                prefix = %prefix,
                parent = %parent,
                view = %candidate.name,
                "checking inherited view"
            );
            for address in &members {
                self.check_address(address, candidate, errors)?;
            }
        }
        Ok(())
    }

    fn check_address(
        &self,
        address: &IpAddress,
        candidate: &View,
        errors: &mut FieldErrors,
    ) -> Result<()> {
        match self
            .records
            .validate_record_for_view(address, candidate, false)
        {
            Ok(()) => Ok(()),
            Err(Error::Validation(messages)) => {
                debug!(
                    address = %address.address,
                    view = %candidate.name,
                    "record would be invalid under view"
                );
                errors.add_all(PREFIXES_FIELD, messages);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
