use crate::collab::ViewRegistry;
use dnsviews_core::error::Result;
use dnsviews_core::types::View;
use ipnet::IpNet;
use std::collections::BTreeSet;

/// A prefix that a view gives up in an edit.
#[derive(Debug, Clone)]
pub struct LostPrefix {
    pub prefix: IpNet,
    /// Other views that keep a direct assignment of the prefix.
    pub remaining: Vec<View>,
}

impl LostPrefix {
    /// No direct assignment is left, so the prefix falls back to whatever
    /// its ancestors are assigned to.
    pub fn is_orphaned(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Prefixes gained and lost by one view in one proposed edit.
#[derive(Debug, Clone, Default)]
pub struct ImpactSet {
    pub gained: BTreeSet<IpNet>,
    pub lost: Vec<LostPrefix>,
}

impl ImpactSet {
    /// Compare the current assignment of `view` with the proposed one.
    /// `old` is `None` for a view that has never been persisted.
    pub fn compute(
        registry: &dyn ViewRegistry,
        view: &View,
        old: Option<&BTreeSet<IpNet>>,
        new: &BTreeSet<IpNet>,
    ) -> Result<Self> {
        let new: BTreeSet<IpNet> = new.iter().map(IpNet::trunc).collect();
        let Some(old) = old else {
            return Ok(Self {
                gained: new,
                lost: Vec::new(),
            });
        };
        let old: BTreeSet<IpNet> = old.iter().map(IpNet::trunc).collect();

        let gained = new.difference(&old).copied().collect();

        let mut lost = Vec::new();
        for prefix in old.difference(&new) {
            let remaining = registry
                .views_assigned_to(prefix)?
                .into_iter()
                .filter(|v| v.id != view.id)
                .collect();
            lost.push(LostPrefix {
                prefix: *prefix,
                remaining,
            });
        }

        Ok(Self { gained, lost })
    }

    /// Lost prefixes left without any direct view assignment.
    pub fn orphaned(&self) -> impl Iterator<Item = &IpNet> {
        self.lost
            .iter()
            .filter(|l| l.is_orphaned())
            .map(|l| &l.prefix)
    }

    pub fn is_empty(&self) -> bool {
        self.gained.is_empty() && self.lost.is_empty()
    }
}
