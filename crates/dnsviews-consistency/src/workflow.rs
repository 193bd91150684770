use crate::collab::{MemberScope, PrefixHierarchy, ViewRegistry};
use crate::engine::{ConsistencyEngine, PREFIXES_FIELD};
use crate::hierarchy::StagedViews;
use crate::records::RecordReconciler;
use chrono::Utc;
use dnsviews_core::db::Db;
use dnsviews_core::error::{Error, FieldErrors, Result, RowErrors};
use dnsviews_core::types::{IpAddress, View};
use ipnet::IpNet;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

const NAME_MAX_LEN: usize = 255;
const DESCRIPTION_MAX_LEN: usize = 200;

/// A view to be created.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_view: bool,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub prefixes: BTreeSet<IpNet>,
}

/// Partial update of one view; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub default_view: Option<bool>,
    pub tenant: Option<Option<String>>,
    pub prefixes: Option<BTreeSet<IpNet>>,
}

/// One row of a view import. Rows with an id update that view.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewImportRow {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub prefixes: BTreeSet<IpNet>,
}

/// Changes applied to several views at once.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkViewChanges {
    pub description: Option<String>,
    pub tenant: Option<String>,
    pub prefixes: Option<BTreeSet<IpNet>>,
    /// Fields to clear: `description`, `tenant`
    #[serde(default)]
    pub nullify: Vec<String>,
}

/// Create, edit, import, bulk-edit and delete views. Every path that changes
/// prefix assignments runs the consistency engine before anything is written
/// and re-syncs address records afterwards.
#[derive(Clone)]
pub struct ViewEditor {
    db: Db,
    reconciler: RecordReconciler,
}

impl ViewEditor {
    pub fn new(db: Db) -> Self {
        let reconciler = RecordReconciler::new(db.clone());
        Self { db, reconciler }
    }

    pub fn with_reconciler(reconciler: RecordReconciler) -> Self {
        Self {
            db: reconciler.db().clone(),
            reconciler,
        }
    }

    pub fn reconciler(&self) -> &RecordReconciler {
        &self.reconciler
    }

    fn engine(&self) -> ConsistencyEngine<'_> {
        self.engine_over(&self.db)
    }

    /// Engine reading view assignments from `registry` instead of the store.
    fn engine_over<'r>(&'r self, registry: &'r dyn ViewRegistry) -> ConsistencyEngine<'r> {
        ConsistencyEngine::new(&self.db, registry, &self.reconciler)
    }

    pub fn get_default_view(&self) -> Result<Option<View>> {
        self.db.get_default_view()
    }

    /// Dry-run a prefix change of an existing view.
    pub fn validate(&self, id: &Uuid, prefixes: &BTreeSet<IpNet>) -> Result<FieldErrors> {
        let view = self.load(id)?;
        let mut candidate = view.clone();
        candidate.prefixes = prefixes.clone();
        self.engine()
            .validate_prefix_change(&candidate, Some(&view.prefixes), prefixes)
    }

    pub fn create(&self, draft: ViewDraft) -> Result<View> {
        let mut view = View::new(&draft.name);
        view.description = draft.description;
        view.default_view = draft.default_view;
        view.tenant = draft.tenant;
        view.prefixes = draft.prefixes.iter().map(IpNet::trunc).collect();

        let mut errors = self.check_fields(&view)?;
        errors.append(
            self.engine()
                .validate_prefix_change(&view, None, &view.prefixes)?,
        );
        self.reject_if_any(&view, errors)?;

        let touched = view.prefixes.clone();
        self.commit(vec![view.clone()], &touched)?;
        info!(view = %view.name, prefixes = view.prefixes.len(), "view created");
        Ok(view)
    }

    pub fn update(&self, id: &Uuid, changes: ViewChanges) -> Result<View> {
        let old = self.load(id)?;
        let mut view = old.clone();
        if let Some(name) = changes.name {
            view.name = name;
        }
        if let Some(description) = changes.description {
            view.description = description;
        }
        if let Some(default_view) = changes.default_view {
            view.default_view = default_view;
        }
        if let Some(tenant) = changes.tenant {
            view.tenant = tenant;
        }
        if let Some(prefixes) = changes.prefixes {
            view.prefixes = prefixes.iter().map(IpNet::trunc).collect();
        }
        view.updated_at = Utc::now();

        let mut errors = self.check_fields(&view)?;
        errors.append(self.check_default_flag(&old, &view)?);
        if view.prefixes != old.prefixes {
            errors.append(self.engine().validate_prefix_change(
                &view,
                Some(&old.prefixes),
                &view.prefixes,
            )?);
        }
        self.reject_if_any(&view, errors)?;

        let touched = old.prefixes.union(&view.prefixes).copied().collect();
        self.commit(vec![view.clone()], &touched)?;
        info!(view = %view.name, prefixes = view.prefixes.len(), "view updated");
        Ok(view)
    }

    /// Import views. Each row is validated against the store with the rows
    /// before it applied; if any row fails nothing is written.
    pub fn import(&self, rows: Vec<ViewImportRow>) -> Result<Vec<View>> {
        let mut staged = StagedViews::new(&self.db);
        let mut batch = Vec::new();
        let mut rejected = Vec::new();
        let mut touched = BTreeSet::new();
        let mut seen_names = HashSet::new();

        for (index, row) in rows.into_iter().enumerate() {
            let mut errors = FieldErrors::new();

            let old = match row.id {
                Some(id) => match self.db.get_view(&id)? {
                    Some(view) => Some(view),
                    None => {
                        errors.add("id", format!("View {id} does not exist"));
                        rejected.push(RowErrors {
                            row: index + 1,
                            errors,
                        });
                        continue;
                    }
                },
                None => None,
            };

            let mut view = old.clone().unwrap_or_else(|| View::new(&row.name));
            view.name = row.name;
            view.description = row.description;
            view.tenant = row.tenant;
            view.prefixes = row.prefixes.iter().map(IpNet::trunc).collect();
            view.updated_at = Utc::now();

            errors.append(self.check_fields(&view)?);
            if !seen_names.insert(view.name.clone()) {
                errors.add("name", format!("View {} appears more than once", view.name));
            }
            let old_prefixes = old.as_ref().map(|v| &v.prefixes);
            if old_prefixes != Some(&view.prefixes) {
                errors.append(self.engine_over(&staged).validate_prefix_change(
                    &view,
                    old_prefixes,
                    &view.prefixes,
                )?);
            }
            staged.stage(view.clone());

            match old_prefixes {
                Some(old) => touched.extend(old.union(&view.prefixes).copied()),
                None => touched.extend(view.prefixes.iter().copied()),
            }

            if errors.is_empty() {
                batch.push(view);
            } else {
                rejected.push(RowErrors {
                    row: index + 1,
                    errors,
                });
            }
        }

        if !rejected.is_empty() {
            warn!(rows = rejected.len(), "view import rejected");
            return Err(Error::ImportRejected(rejected));
        }

        self.commit(batch.clone(), &touched)?;
        info!(views = batch.len(), "views imported");
        Ok(batch)
    }

    /// Apply the same changes to several views; all or nothing. Each view is
    /// validated with the views before it in `ids` already changed.
    pub fn bulk_edit(&self, ids: &[Uuid], changes: BulkViewChanges) -> Result<Vec<View>> {
        let mut errors = FieldErrors::new();
        for field in &changes.nullify {
            if field != "description" && field != "tenant" {
                errors.add("nullify", format!("Field {field} cannot be cleared"));
            }
        }

        let mut staged = StagedViews::new(&self.db);
        let mut batch = Vec::new();
        let mut touched = BTreeSet::new();
        for id in ids {
            let old = self.load(id)?;
            let mut view = old.clone();
            if let Some(ref description) = changes.description {
                view.description = description.clone();
            }
            if let Some(ref tenant) = changes.tenant {
                view.tenant = Some(tenant.clone());
            }
            if let Some(ref prefixes) = changes.prefixes {
                view.prefixes = prefixes.iter().map(IpNet::trunc).collect();
            }
            if changes.nullify.iter().any(|f| f == "description") {
                view.description = String::new();
            }
            if changes.nullify.iter().any(|f| f == "tenant") {
                view.tenant = None;
            }
            view.updated_at = Utc::now();

            let mut view_errors = self.check_fields(&view)?;
            if view.prefixes != old.prefixes {
                view_errors.append(self.engine_over(&staged).validate_prefix_change(
                    &view,
                    Some(&old.prefixes),
                    &view.prefixes,
                )?);
            }
            staged.stage(view.clone());
            for error in view_errors {
                errors.add(&error.field, format!("{}: {}", view.name, error.message));
            }

            touched.extend(old.prefixes.union(&view.prefixes).copied());
            batch.push(view);
        }

        if !errors.is_empty() {
            warn!(views = ids.len(), errors = errors.len(), "bulk edit rejected");
            return Err(Error::Rejected(errors));
        }

        self.commit(batch.clone(), &touched)?;
        info!(views = batch.len(), "views bulk edited");
        Ok(batch)
    }

    pub fn delete(&self, id: &Uuid) -> Result<()> {
        let view = self.load(id)?;

        let mut errors = FieldErrors::new();
        if view.default_view {
            errors.add("view", "The default view cannot be deleted");
        }
        let zones = self.db.zones_in_view(&view.id)?;
        if !zones.is_empty() {
            errors.add(
                "view",
                format!(
                    "Cannot delete view {}: it still owns {} zone(s)",
                    view.name,
                    zones.len()
                ),
            );
        }
        errors.append(self.engine().validate_prefix_change(
            &view,
            Some(&view.prefixes),
            &BTreeSet::new(),
        )?);
        self.reject_if_any(&view, errors)?;

        let addresses = self.addresses_governed_by(&view)?;
        self.db.delete_view(&view.id)?;
        self.reconciler.sync_addresses(&self.db, &addresses)?;
        info!(view = %view.name, "view deleted");
        Ok(())
    }

    fn load(&self, id: &Uuid) -> Result<View> {
        self.db
            .get_view(id)?
            .ok_or_else(|| Error::ViewNotFound(id.to_string()))
    }

    fn reject_if_any(&self, view: &View, errors: FieldErrors) -> Result<()> {
        if !errors.is_empty() {
            warn!(view = %view.name, errors = errors.len(), "view change rejected");
        }
        errors.into_result()
    }

    /// Checks on plain attributes that do not involve the engine.
    fn check_fields(&self, view: &View) -> Result<FieldErrors> {
        let mut errors = FieldErrors::new();

        if view.name.trim().is_empty() {
            errors.add("name", "This field is required.");
        } else if view.name.chars().count() > NAME_MAX_LEN {
            errors.add(
                "name",
                format!("Ensure this value has at most {NAME_MAX_LEN} characters."),
            );
        } else if let Some(other) = self.db.get_view_by_name(&view.name)? {
            if other.id != view.id {
                errors.add("name", "View with this Name already exists.");
            }
        }

        if view.description.chars().count() > DESCRIPTION_MAX_LEN {
            errors.add(
                "description",
                format!("Ensure this value has at most {DESCRIPTION_MAX_LEN} characters."),
            );
        }

        for prefix in &view.prefixes {
            if self.db.get_prefix_by_network(prefix)?.is_none() {
                errors.add(PREFIXES_FIELD, format!("Prefix {prefix} does not exist"));
            }
        }

        Ok(errors)
    }

    /// The default flag can only move to another view, never just vanish.
    fn check_default_flag(&self, old: &View, new: &View) -> Result<FieldErrors> {
        let mut errors = FieldErrors::new();
        if old.default_view && !new.default_view {
            let other_default = self
                .db
                .list_views()?
                .into_iter()
                .any(|v| v.default_view && v.id != new.id);
            if !other_default {
                errors.add(
                    "default_view",
                    "Please select a different view as default view to change this setting!",
                );
            }
        }
        Ok(errors)
    }

    /// Persist `batch`, demote the previous default view if a new one is in
    /// the batch, then re-sync records of addresses under `touched`.
    fn commit(&self, mut batch: Vec<View>, touched: &BTreeSet<IpNet>) -> Result<()> {
        if batch.iter().any(|v| v.default_view) {
            let ids: HashSet<Uuid> = batch.iter().map(|v| v.id).collect();
            for mut other in self.db.list_views()? {
                if other.default_view && !ids.contains(&other.id) {
                    other.default_view = false;
                    other.updated_at = Utc::now();
                    info!(view = %other.name, "view is no longer the default view");
                    batch.push(other);
                }
            }
        }

        self.db.save_views(&batch)?;

        let addresses = self.addresses_under(touched)?;
        self.reconciler.sync_addresses(&self.db, &addresses)
    }

    /// Addresses whose records currently follow `view`.
    fn addresses_governed_by(&self, view: &View) -> Result<Vec<IpAddress>> {
        let mut seen = HashSet::new();
        let mut addresses = Vec::new();
        for prefix in &view.prefixes {
            for address in self
                .db
                .members_of(prefix, MemberScope::GovernedBy(view.id))?
            {
                if seen.insert(address.id) {
                    addresses.push(address);
                }
            }
        }
        Ok(addresses)
    }

    fn addresses_under(&self, prefixes: &BTreeSet<IpNet>) -> Result<Vec<IpAddress>> {
        let mut seen = HashSet::new();
        let mut addresses = Vec::new();
        for prefix in prefixes {
            for address in self.db.addresses_in(prefix)? {
                if seen.insert(address.id) {
                    addresses.push(address);
                }
            }
        }
        Ok(addresses)
    }
}
