use crate::collab::{RecordConsistency, ViewRegistry};
use chrono::Utc;
use dnsviews_core::config::RecordSyncConfig;
use dnsviews_core::db::Db;
use dnsviews_core::error::{Error, FieldErrors, Result};
use dnsviews_core::types::{
    reverse_pointer_name, IpAddress, Record, RecordData, RecordType, View, Zone,
};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Validate a DNS name (zone or record name).
/// Returns Ok(()) if valid, Err(message) if invalid.
pub fn validate_dns_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".into());
    }

    // Allow "@" as zone apex shorthand
    if name == "@" {
        return Ok(());
    }

    // Allow wildcard prefix
    let check_name = name.strip_prefix("*.").unwrap_or(name);

    let clean = check_name.trim_end_matches('.');
    if clean.is_empty() {
        return Err("name cannot be empty".into());
    }
    if clean.len() > 253 {
        return Err("name exceeds 253 characters".into());
    }

    for label in clean.split('.') {
        if label.is_empty() {
            return Err("empty label in name".into());
        }
        if label.len() > 63 {
            return Err("label exceeds 63 characters".into());
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!("invalid characters in label: {label}"));
        }
    }

    Ok(())
}

/// A record an address would own in one zone.
#[derive(Debug, Clone)]
struct PlannedRecord {
    zone: Zone,
    name: String,
    data: RecordData,
}

impl PlannedRecord {
    fn slot(&self) -> (Uuid, RecordType) {
        (self.zone.id, self.data.record_type())
    }
}

/// Keeps the A/AAAA and PTR records of IPAM addresses in line with the
/// zones of the view that governs them.
#[derive(Clone)]
pub struct RecordReconciler {
    db: Db,
    auto_ptr: bool,
    enforce_unique_records: bool,
}

impl RecordReconciler {
    pub fn new(db: Db) -> Self {
        Self::with_config(db, &RecordSyncConfig::default())
    }

    pub fn with_config(db: Db, config: &RecordSyncConfig) -> Self {
        Self {
            db,
            auto_ptr: config.auto_ptr,
            enforce_unique_records: config.enforce_unique_records,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Work out the records `address` would own under `view`, plus the
    /// messages of every check they fail.
    fn plan(&self, address: &IpAddress, view: &View) -> Result<(Vec<PlannedRecord>, Vec<String>)> {
        let mut planned = Vec::new();
        let mut messages = Vec::new();

        let dns_name = match address.dns_name.as_deref().map(|n| n.trim_end_matches('.')) {
            Some(n) if !n.is_empty() => n.to_ascii_lowercase(),
            _ => return Ok((planned, messages)),
        };

        if let Err(e) = validate_dns_name(&dns_name) {
            messages.push(format!("Invalid DNS name {dns_name}: {e}"));
            return Ok((planned, messages));
        }

        if let Some(zone) = self.db.find_zone_for_fqdn(&view.id, &dns_name)? {
            if let Some(name) = zone.relative_name(&dns_name) {
                let data = RecordData::address(address.address);
                let rtype = data.record_type();

                if !self
                    .db
                    .query_records(&zone.id, &name, RecordType::CNAME)?
                    .is_empty()
                {
                    messages.push(format!(
                        "There is already a CNAME record with name {name} in zone {}",
                        zone.name
                    ));
                }

                if self.enforce_unique_records {
                    let duplicate = self
                        .db
                        .query_records(&zone.id, &name, rtype)?
                        .into_iter()
                        .any(|r| r.data == data && r.ipam_address_id != Some(address.id));
                    if duplicate {
                        messages.push(format!(
                            "There is already an active {rtype} record for name {name} in zone {} with value {}",
                            zone.name,
                            data.value()
                        ));
                    }
                }

                planned.push(PlannedRecord { zone, name, data });
            }
        }

        if self.auto_ptr {
            let ptr_fqdn = reverse_pointer_name(address.address);
            if let Some(zone) = self.db.find_zone_for_fqdn(&view.id, &ptr_fqdn)? {
                if let Some(name) = zone.relative_name(&ptr_fqdn) {
                    planned.push(PlannedRecord {
                        zone,
                        name,
                        data: RecordData::PTR(format!("{dns_name}.")),
                    });
                }
            }
        }

        Ok((planned, messages))
    }

    /// Write planned records, reusing the managed record already sitting in
    /// the same zone slot.
    fn commit_plan(&self, address: &IpAddress, planned: &[PlannedRecord]) -> Result<()> {
        let existing = self.db.records_for_address(&address.id)?;

        for plan in planned {
            let ttl = plan.zone.default_ttl;
            let current = existing
                .iter()
                .find(|r| r.zone_id == plan.zone.id && r.data.record_type() == plan.data.record_type());

            match current {
                Some(r) if r.name == plan.name && r.data == plan.data && r.ttl == ttl => continue,
                Some(r) => {
                    let mut record = r.clone();
                    record.name = plan.name.clone();
                    record.data = plan.data.clone();
                    record.ttl = ttl;
                    record.updated_at = Utc::now();
                    self.db.update_record(&record)?;
                }
                None => {
                    let now = Utc::now();
                    let record = Record {
                        id: Uuid::new_v4(),
                        zone_id: plan.zone.id,
                        name: plan.name.clone(),
                        ttl,
                        data: plan.data.clone(),
                        enabled: true,
                        ipam_address_id: Some(address.id),
                        created_at: now,
                        updated_at: now,
                    };
                    self.db.create_record(&record)?;
                }
            }

            self.db.increment_soa_serial(&plan.zone.id)?;
            debug!(
                address = %address.address,
                zone = %plan.zone.name,
                name = %plan.name,
                rtype = %plan.data.record_type(),
                "address record written"
            );
        }

        Ok(())
    }

    /// Bring the managed records of `address` in line with `views`: records
    /// in zones none of the views would use are removed, the rest written.
    pub fn sync_address(&self, address: &IpAddress, views: &[View]) -> Result<()> {
        let mut planned = Vec::new();
        for view in views {
            let (mut records, messages) = self.plan(address, view)?;
            if !messages.is_empty() {
                return Err(Error::Validation(messages));
            }
            planned.append(&mut records);
        }

        let keep: HashSet<(Uuid, RecordType)> = planned.iter().map(PlannedRecord::slot).collect();
        for record in self.db.records_for_address(&address.id)? {
            if !keep.contains(&(record.zone_id, record.data.record_type())) {
                self.db.delete_record(&record.id)?;
                self.db.increment_soa_serial(&record.zone_id)?;
                debug!(
                    address = %address.address,
                    name = %record.name,
                    rtype = %record.data.record_type(),
                    "stale address record removed"
                );
            }
        }

        self.commit_plan(address, &planned)
    }

    /// Re-sync every given address against the views governing it now.
    /// Addresses whose records no longer validate are left as they are.
    pub fn sync_addresses(&self, registry: &dyn ViewRegistry, addresses: &[IpAddress]) -> Result<()> {
        for address in addresses {
            let views = registry.effective_views(address.address)?;
            match self.sync_address(address, &views) {
                Ok(()) => {}
                Err(Error::Validation(messages)) => {
                    warn!(
                        address = %address.address,
                        "address records not updated: {}",
                        messages.join("; ")
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Create or update an IPAM address, rejecting the change if its records
    /// would be invalid under any view that governs it.
    pub fn save_address(&self, registry: &dyn ViewRegistry, address: &IpAddress) -> Result<()> {
        let views = registry.effective_views(address.address)?;

        let mut errors = FieldErrors::new();
        for view in &views {
            let (_, messages) = self.plan(address, view)?;
            errors.add_all("dns_name", messages);
        }
        errors.into_result()?;

        if self.db.get_address(&address.id)?.is_some() {
            self.db.update_address(address)?;
        } else {
            self.db.create_address(address)?;
        }
        self.sync_address(address, &views)?;

        info!(
            address = %address.address,
            dns_name = address.dns_name.as_deref().unwrap_or(""),
            views = views.len(),
            "address saved"
        );
        Ok(())
    }
}

impl RecordConsistency for RecordReconciler {
    fn validate_record_for_view(
        &self,
        address: &IpAddress,
        view: &View,
        commit: bool,
    ) -> Result<()> {
        let (planned, messages) = self.plan(address, view)?;
        if !messages.is_empty() {
            return Err(Error::Validation(messages));
        }
        if commit {
            self.commit_plan(address, &planned)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnsviews_core::types::{Prefix, SoaData};
    use tempfile::TempDir;

    fn test_db() -> (Db, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    fn make_zone(view: &View, name: &str) -> Zone {
        Zone {
            id: Uuid::new_v4(),
            view_id: view.id,
            name: name.to_string(),
            soa: SoaData {
                mname: format!("ns1.{name}"),
                rname: format!("admin.{name}"),
                serial: 2024010100,
                refresh: 3600,
                retry: 900,
                expire: 604800,
                minimum: 300,
            },
            default_ttl: 600,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn make_record(zone: &Zone, name: &str, data: RecordData) -> Record {
        Record {
            id: Uuid::new_v4(),
            zone_id: zone.id,
            name: name.to_string(),
            ttl: 300,
            data,
            enabled: true,
            ipam_address_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_dns_name_valid() {
        assert!(validate_dns_name("example.com").is_ok());
        assert!(validate_dns_name("sub.example.com").is_ok());
        assert!(validate_dns_name("@").is_ok());
        assert!(validate_dns_name("*.example.com").is_ok());
        assert!(validate_dns_name("a-b.example.com").is_ok());
        assert!(validate_dns_name("www").is_ok());
    }

    #[test]
    fn test_validate_dns_name_invalid() {
        assert!(validate_dns_name("").is_err());
        assert!(validate_dns_name(&"a".repeat(254)).is_err());
        assert!(validate_dns_name("bad name.com").is_err());
        assert!(validate_dns_name("bad;name.com").is_err());
    }

    #[test]
    fn test_address_without_name_or_zone_is_valid() {
        let (db, _dir) = test_db();
        let view = View::new("internal");
        let reconciler = RecordReconciler::new(db);

        let bare = IpAddress::new("10.0.0.5".parse().unwrap(), None);
        assert!(reconciler.validate_record_for_view(&bare, &view, false).is_ok());

        let unzoned = IpAddress::new("10.0.0.5".parse().unwrap(), Some("host.example.com"));
        assert!(reconciler.validate_record_for_view(&unzoned, &view, false).is_ok());
    }

    #[test]
    fn test_invalid_dns_name() {
        let (db, _dir) = test_db();
        let view = View::new("internal");
        let reconciler = RecordReconciler::new(db);

        let address = IpAddress::new("10.0.0.5".parse().unwrap(), Some("bad name.example.com"));
        match reconciler.validate_record_for_view(&address, &view, false) {
            Err(Error::Validation(messages)) => {
                assert_eq!(messages.len(), 1);
                assert!(messages[0].starts_with("Invalid DNS name bad name.example.com"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_conflicts_are_collected() {
        let (db, _dir) = test_db();
        let view = View::new("external");
        let zone = make_zone(&view, "example.com");
        db.create_zone(&zone).unwrap();
        db.create_record(&make_record(&zone, "host", RecordData::CNAME("www.example.com.".into())))
            .unwrap();
        db.create_record(&make_record(&zone, "host", RecordData::A("10.0.0.5".parse().unwrap())))
            .unwrap();

        let reconciler = RecordReconciler::new(db.clone());
        let address = IpAddress::new("10.0.0.5".parse().unwrap(), Some("host.example.com"));
        match reconciler.validate_record_for_view(&address, &view, true) {
            Err(Error::Validation(messages)) => {
                assert_eq!(
                    messages,
                    vec![
                        "There is already a CNAME record with name host in zone example.com".to_string(),
                        "There is already an active A record for name host in zone example.com with value 10.0.0.5".to_string(),
                    ]
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // nothing written on failure
        assert_eq!(db.list_records(&zone.id).unwrap().len(), 2);

        let relaxed = RecordReconciler::with_config(
            db,
            &RecordSyncConfig {
                auto_ptr: true,
                enforce_unique_records: false,
            },
        );
        match relaxed.validate_record_for_view(&address, &view, false) {
            Err(Error::Validation(messages)) => assert_eq!(messages.len(), 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_dry_run_writes_nothing_and_commit_writes_records() {
        let (db, _dir) = test_db();
        let view = View::new("internal");
        let forward = make_zone(&view, "example.com");
        let reverse = make_zone(&view, "0.0.10.in-addr.arpa");
        db.create_zone(&forward).unwrap();
        db.create_zone(&reverse).unwrap();

        let reconciler = RecordReconciler::new(db.clone());
        let address = IpAddress::new("10.0.0.5".parse().unwrap(), Some("host.example.com"));

        reconciler.validate_record_for_view(&address, &view, false).unwrap();
        assert!(db.records_for_address(&address.id).unwrap().is_empty());

        reconciler.validate_record_for_view(&address, &view, true).unwrap();
        let a = db.query_records(&forward.id, "host", RecordType::A).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].ttl, 600);
        assert_eq!(a[0].ipam_address_id, Some(address.id));
        let ptr = db.query_records(&reverse.id, "5", RecordType::PTR).unwrap();
        assert_eq!(ptr[0].data, RecordData::PTR("host.example.com.".to_string()));

        // committing again is a no-op and keeps the unique check happy
        reconciler.validate_record_for_view(&address, &view, true).unwrap();
        assert_eq!(db.records_for_address(&address.id).unwrap().len(), 2);
    }

    #[test]
    fn test_sync_moves_records_between_views() {
        let (db, _dir) = test_db();
        let internal = View::new("internal");
        let external = View::new("external");
        let internal_zone = make_zone(&internal, "example.com");
        let external_zone = make_zone(&external, "example.com");
        db.create_zone(&internal_zone).unwrap();
        db.create_zone(&external_zone).unwrap();

        let reconciler = RecordReconciler::new(db.clone());
        let address = IpAddress::new("10.0.0.5".parse().unwrap(), Some("host.example.com"));

        reconciler.sync_address(&address, std::slice::from_ref(&internal)).unwrap();
        assert_eq!(db.list_records(&internal_zone.id).unwrap().len(), 1);

        reconciler.sync_address(&address, std::slice::from_ref(&external)).unwrap();
        assert!(db.list_records(&internal_zone.id).unwrap().is_empty());
        assert_eq!(db.list_records(&external_zone.id).unwrap().len(), 1);

        reconciler.sync_address(&address, &[]).unwrap();
        assert!(db.records_for_address(&address.id).unwrap().is_empty());
    }

    #[test]
    fn test_save_address_rejects_conflicts() {
        let (db, _dir) = test_db();
        let mut view = View::new("internal");
        view.prefixes.insert("10.0.0.0/24".parse().unwrap());
        db.create_view(&view).unwrap();
        db.create_prefix(&Prefix::new("10.0.0.0/24".parse().unwrap())).unwrap();
        let zone = make_zone(&view, "example.com");
        db.create_zone(&zone).unwrap();
        db.create_record(&make_record(&zone, "alias", RecordData::CNAME("host.example.com.".into())))
            .unwrap();

        let reconciler = RecordReconciler::new(db.clone());

        let bad = IpAddress::new("10.0.0.7".parse().unwrap(), Some("alias.example.com"));
        match reconciler.save_address(&db, &bad) {
            Err(Error::Rejected(errors)) => {
                assert_eq!(errors.messages_for("dns_name").count(), 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(db.get_address(&bad.id).unwrap().is_none());

        let good = IpAddress::new("10.0.0.8".parse().unwrap(), Some("host.example.com"));
        reconciler.save_address(&db, &good).unwrap();
        assert!(db.get_address(&good.id).unwrap().is_some());
        assert_eq!(db.records_for_address(&good.id).unwrap().len(), 1);
    }

    #[test]
    fn test_conflicts_ignore_name_case() {
        let (db, _dir) = test_db();
        let view = View::new("external");
        let zone = make_zone(&view, "example.com");
        db.create_zone(&zone).unwrap();
        db.create_record(&make_record(&zone, "Host", RecordData::CNAME("www.example.com.".into())))
            .unwrap();

        let reconciler = RecordReconciler::new(db);
        let address = IpAddress::new("10.0.0.5".parse().unwrap(), Some("HOST.Example.com"));
        match reconciler.validate_record_for_view(&address, &view, false) {
            Err(Error::Validation(messages)) => assert_eq!(
                messages,
                vec!["There is already a CNAME record with name host in zone example.com".to_string()]
            ),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
