use crate::collab::{MemberScope, PrefixHierarchy, ViewRegistry};
use dnsviews_core::db::Db;
use dnsviews_core::error::Result;
use dnsviews_core::types::{IpAddress, Prefix, View};
use ipnet::IpNet;
use std::net::IpAddr;

impl PrefixHierarchy for Db {
    fn ancestors_of(&self, prefix: &IpNet) -> Result<Vec<IpNet>> {
        let prefix = prefix.trunc();
        let mut ancestors: Vec<IpNet> = self
            .list_prefixes()?
            .into_iter()
            .map(|p| p.prefix.trunc())
            .filter(|p| p.prefix_len() < prefix.prefix_len() && p.contains(&prefix))
            .collect();
        ancestors.sort_by_key(|p| p.prefix_len());
        Ok(ancestors)
    }

    fn members_of(&self, prefix: &IpNet, scope: MemberScope) -> Result<Vec<IpAddress>> {
        let members = self.addresses_in(prefix)?;
        match scope {
            MemberScope::AnyView => Ok(members),
            MemberScope::GovernedBy(view_id) => {
                let mut governed = Vec::new();
                for address in members {
                    if self
                        .effective_views(address.address)?
                        .iter()
                        .any(|v| v.id == view_id)
                    {
                        governed.push(address);
                    }
                }
                Ok(governed)
            }
        }
    }
}

impl ViewRegistry for Db {
    fn views_assigned_to(&self, prefix: &IpNet) -> Result<Vec<View>> {
        self.views_for_prefix(prefix)
    }

    fn effective_views(&self, address: IpAddr) -> Result<Vec<View>> {
        Ok(governing_views(
            &self.list_views()?,
            &self.list_prefixes()?,
            address,
        ))
    }
}

/// Direct assignments of the most specific prefix containing `address` that
/// has any.
fn governing_views(views: &[View], prefixes: &[Prefix], address: IpAddr) -> Vec<View> {
    let mut enclosing: Vec<IpNet> = prefixes
        .iter()
        .map(|p| p.prefix.trunc())
        .filter(|p| p.contains(&address))
        .collect();
    // most specific first
    enclosing.sort_by_key(|p| std::cmp::Reverse(p.prefix_len()));

    for prefix in enclosing {
        let assigned: Vec<View> = views
            .iter()
            .filter(|v| v.prefixes.contains(&prefix))
            .cloned()
            .collect();
        if !assigned.is_empty() {
            return assigned;
        }
    }

    Vec::new()
}

/// View assignments of the store with a batch of uncommitted views laid over
/// it, so each member of an import or bulk edit is checked against the
/// members staged before it.
pub struct StagedViews<'a> {
    db: &'a Db,
    staged: Vec<View>,
}

impl<'a> StagedViews<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self {
            db,
            staged: Vec::new(),
        }
    }

    /// Stage `view`, replacing an earlier staged copy with the same id.
    pub fn stage(&mut self, view: View) {
        self.staged.retain(|v| v.id != view.id);
        self.staged.push(view);
    }

    fn views(&self) -> Result<Vec<View>> {
        let mut views: Vec<View> = self
            .db
            .list_views()?
            .into_iter()
            .filter(|v| !self.staged.iter().any(|s| s.id == v.id))
            .collect();
        views.extend(self.staged.iter().cloned());
        views.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(views)
    }
}

impl ViewRegistry for StagedViews<'_> {
    fn views_assigned_to(&self, prefix: &IpNet) -> Result<Vec<View>> {
        let prefix = prefix.trunc();
        Ok(self
            .views()?
            .into_iter()
            .filter(|v| v.prefixes.contains(&prefix))
            .collect())
    }

    fn effective_views(&self, address: IpAddr) -> Result<Vec<View>> {
        Ok(governing_views(
            &self.views()?,
            &self.db.list_prefixes()?,
            address,
        ))
    }
}
