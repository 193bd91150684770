//! Collaborator seams consumed by the consistency engine.
//!
//! The engine never talks to storage directly. Everything it needs to know
//! about the prefix hierarchy, view assignments and DNS records goes through
//! these traits, so tests can swap in deterministic fakes.

use dnsviews_core::error::Result;
use dnsviews_core::types::{IpAddress, View};
use ipnet::IpNet;
use std::net::IpAddr;
use uuid::Uuid;

/// Which member addresses of a prefix to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberScope {
    /// Every address inside the prefix, regardless of the view that
    /// currently governs it.
    AnyView,
    /// Only addresses whose effective view set contains this view.
    GovernedBy(Uuid),
}

/// Read access to the IPAM prefix hierarchy.
pub trait PrefixHierarchy {
    /// Ancestors of `prefix`, ordered from the root down to the immediate
    /// parent.
    fn ancestors_of(&self, prefix: &IpNet) -> Result<Vec<IpNet>>;

    /// Addresses contained in `prefix`, in address order.
    fn members_of(&self, prefix: &IpNet, scope: MemberScope) -> Result<Vec<IpAddress>>;
}

/// Read access to view assignments.
pub trait ViewRegistry {
    /// Views with a direct assignment of `prefix`, ordered by name.
    fn views_assigned_to(&self, prefix: &IpNet) -> Result<Vec<View>>;

    /// Views governing `address`: the direct assignment of the most specific
    /// enclosing prefix that has one. Empty when no view governs it.
    fn effective_views(&self, address: IpAddr) -> Result<Vec<View>>;
}

/// Reconciles the DNS records that point at an address.
pub trait RecordConsistency {
    /// Check whether the records of `address` are valid under `view`.
    ///
    /// A validation failure is reported as `Err(Error::Validation(messages))`;
    /// any other error means the check itself could not be carried out.
    /// With `commit` unset nothing is written.
    fn validate_record_for_view(&self, address: &IpAddress, view: &View, commit: bool)
        -> Result<()>;
}
