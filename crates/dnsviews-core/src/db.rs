use crate::error::{Error, Result};
use crate::types::{IpAddress, Prefix, Record, RecordType, View, Zone};
use chrono::Utc;
use ipnet::IpNet;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Views table: view_id (string) -> View (JSON)
const VIEWS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("views");

/// View name index: view_name (string) -> view_id (string)
const VIEW_NAME_INDEX: TableDefinition<&str, &str> = TableDefinition::new("view_name_index");

/// Prefixes table: prefix_id (string) -> Prefix (JSON)
const PREFIXES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("prefixes");

/// Prefix network index: canonical CIDR (string) -> prefix_id (string)
const PREFIX_NET_INDEX: TableDefinition<&str, &str> = TableDefinition::new("prefix_net_index");

/// IP addresses table: address_id (string) -> IpAddress (JSON)
const ADDRESSES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("ip_addresses");

/// Zones table: zone_id (string) -> Zone (JSON)
const ZONES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("zones");

/// Zone name index: "view_id:zone_name" -> zone_id (string)
const ZONE_NAME_INDEX: TableDefinition<&str, &str> = TableDefinition::new("zone_name_index");

/// Records table: record_id (string) -> Record (JSON)
const RECORDS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("records");

/// Records by zone index: "zone_id:name:type" -> comma-separated record_ids
const RECORDS_BY_ZONE: TableDefinition<&str, &str> = TableDefinition::new("records_by_zone");

type StrTable<'txn> = redb::Table<'txn, &'static str, &'static str>;
type StrTableDef = TableDefinition<'static, &'static str, &'static str>;

fn zone_key(view_id: &Uuid, name: &str) -> String {
    format!("{view_id}:{}", name.trim_end_matches('.').to_ascii_lowercase())
}

/// Owner names are matched case-insensitively.
fn record_key(record: &Record) -> String {
    format!(
        "{}:{}:{}",
        record.zone_id,
        record.name.to_ascii_lowercase(),
        record.data.record_type()
    )
}

fn index_add(by_zone: &mut StrTable<'_>, key: &str, id: &str) -> Result<()> {
    let new_val = match by_zone.get(key)?.map(|v| v.value().to_string()) {
        Some(existing) => format!("{existing},{id}"),
        None => id.to_string(),
    };
    by_zone.insert(key, new_val.as_str())?;
    Ok(())
}

fn index_remove(by_zone: &mut StrTable<'_>, key: &str, id: &str) -> Result<()> {
    let existing = by_zone.get(key)?.map(|v| v.value().to_string());
    if let Some(existing) = existing {
        let ids: Vec<&str> = existing.split(',').filter(|s| *s != id).collect();
        if ids.is_empty() {
            by_zone.remove(key)?;
        } else {
            let new_val = ids.join(",");
            by_zone.insert(key, new_val.as_str())?;
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct Db {
    inner: Arc<Database>,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(VIEWS_TABLE)?;
            let _ = write_txn.open_table(VIEW_NAME_INDEX)?;
            let _ = write_txn.open_table(PREFIXES_TABLE)?;
            let _ = write_txn.open_table(PREFIX_NET_INDEX)?;
            let _ = write_txn.open_table(ADDRESSES_TABLE)?;
            let _ = write_txn.open_table(ZONES_TABLE)?;
            let _ = write_txn.open_table(ZONE_NAME_INDEX)?;
            let _ = write_txn.open_table(RECORDS_TABLE)?;
            let _ = write_txn.open_table(RECORDS_BY_ZONE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            inner: Arc::new(db),
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        table: StrTableDef,
        key: &str,
    ) -> Result<Option<T>> {
        let read_txn = self.inner.begin_read()?;
        let table = read_txn.open_table(table)?;
        match table.get(key)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, table: StrTableDef) -> Result<Vec<T>> {
        let read_txn = self.inner.begin_read()?;
        let table = read_txn.open_table(table)?;
        let mut result = Vec::new();

        let iter = table.iter()?;
        for entry in iter {
            let entry = entry.map_err(|e| Error::Database(e.to_string()))?;
            result.push(serde_json::from_str(entry.1.value())?);
        }

        Ok(result)
    }

    // --- View operations ---

    pub fn create_view(&self, view: &View) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let mut name_idx = write_txn.open_table(VIEW_NAME_INDEX)?;
            if name_idx.get(view.name.as_str())?.is_some() {
                return Err(Error::DuplicateView(view.name.clone()));
            }

            let id_str = view.id.to_string();
            let json = serde_json::to_string(view)?;

            let mut views = write_txn.open_table(VIEWS_TABLE)?;
            views.insert(id_str.as_str(), json.as_str())?;
            name_idx.insert(view.name.as_str(), id_str.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_view(&self, id: &Uuid) -> Result<Option<View>> {
        self.get_json(VIEWS_TABLE, &id.to_string())
    }

    pub fn get_view_by_name(&self, name: &str) -> Result<Option<View>> {
        let read_txn = self.inner.begin_read()?;
        let name_idx = read_txn.open_table(VIEW_NAME_INDEX)?;

        let view_id = match name_idx.get(name)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };

        let views = read_txn.open_table(VIEWS_TABLE)?;
        match views.get(view_id.as_str())? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    /// All views, ordered by name
    pub fn list_views(&self) -> Result<Vec<View>> {
        let mut views: Vec<View> = self.list_json(VIEWS_TABLE)?;
        views.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(views)
    }

    pub fn get_default_view(&self) -> Result<Option<View>> {
        Ok(self.list_views()?.into_iter().find(|v| v.default_view))
    }

    /// Views that carry `prefix` as a direct assignment, ordered by name
    pub fn views_for_prefix(&self, prefix: &IpNet) -> Result<Vec<View>> {
        let prefix = prefix.trunc();
        Ok(self
            .list_views()?
            .into_iter()
            .filter(|v| v.prefixes.contains(&prefix))
            .collect())
    }

    pub fn update_view(&self, view: &View) -> Result<()> {
        if self.get_view(&view.id)?.is_none() {
            return Err(Error::ViewNotFound(view.id.to_string()));
        }
        self.save_views(std::slice::from_ref(view))
    }

    /// Insert or update several views in one transaction. Name uniqueness is
    /// checked against the state after all writes.
    pub fn save_views(&self, batch: &[View]) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let mut views = write_txn.open_table(VIEWS_TABLE)?;
            let mut name_idx = write_txn.open_table(VIEW_NAME_INDEX)?;

            for view in batch {
                let id_str = view.id.to_string();
                let existing = views
                    .get(id_str.as_str())?
                    .map(|v| v.value().to_string());
                if let Some(existing) = existing {
                    let existing: View = serde_json::from_str(&existing)?;
                    if existing.name != view.name {
                        name_idx.remove(existing.name.as_str())?;
                    }
                }
            }

            for view in batch {
                let id_str = view.id.to_string();
                let owner = name_idx
                    .get(view.name.as_str())?
                    .map(|v| v.value().to_string());
                if matches!(owner, Some(ref owner) if *owner != id_str) {
                    return Err(Error::DuplicateView(view.name.clone()));
                }

                let json = serde_json::to_string(view)?;
                views.insert(id_str.as_str(), json.as_str())?;
                name_idx.insert(view.name.as_str(), id_str.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn delete_view(&self, id: &Uuid) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let id_str = id.to_string();
            let mut views = write_txn.open_table(VIEWS_TABLE)?;

            let view_json = views
                .get(id_str.as_str())?
                .map(|v| v.value().to_string())
                .ok_or_else(|| Error::ViewNotFound(id_str.clone()))?;
            let view: View = serde_json::from_str(&view_json)?;

            views.remove(id_str.as_str())?;

            let mut name_idx = write_txn.open_table(VIEW_NAME_INDEX)?;
            name_idx.remove(view.name.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // --- Prefix operations ---

    pub fn create_prefix(&self, prefix: &Prefix) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let net = prefix.prefix.trunc().to_string();
            let mut net_idx = write_txn.open_table(PREFIX_NET_INDEX)?;
            if net_idx.get(net.as_str())?.is_some() {
                return Err(Error::DuplicatePrefix(net));
            }

            let id_str = prefix.id.to_string();
            let json = serde_json::to_string(prefix)?;

            let mut prefixes = write_txn.open_table(PREFIXES_TABLE)?;
            prefixes.insert(id_str.as_str(), json.as_str())?;
            net_idx.insert(net.as_str(), id_str.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_prefix(&self, id: &Uuid) -> Result<Option<Prefix>> {
        self.get_json(PREFIXES_TABLE, &id.to_string())
    }

    pub fn get_prefix_by_network(&self, net: &IpNet) -> Result<Option<Prefix>> {
        let read_txn = self.inner.begin_read()?;
        let net_idx = read_txn.open_table(PREFIX_NET_INDEX)?;

        let prefix_id = match net_idx.get(net.trunc().to_string().as_str())? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };

        let prefixes = read_txn.open_table(PREFIXES_TABLE)?;
        match prefixes.get(prefix_id.as_str())? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    /// All prefixes, ordered by network
    pub fn list_prefixes(&self) -> Result<Vec<Prefix>> {
        let mut prefixes: Vec<Prefix> = self.list_json(PREFIXES_TABLE)?;
        prefixes.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        Ok(prefixes)
    }

    /// Delete a prefix and drop it from every view that carries it.
    pub fn delete_prefix(&self, id: &Uuid) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let id_str = id.to_string();
            let mut prefixes = write_txn.open_table(PREFIXES_TABLE)?;

            let prefix_json = prefixes
                .get(id_str.as_str())?
                .map(|v| v.value().to_string())
                .ok_or_else(|| Error::PrefixNotFound(id_str.clone()))?;
            let prefix: Prefix = serde_json::from_str(&prefix_json)?;

            prefixes.remove(id_str.as_str())?;

            let mut net_idx = write_txn.open_table(PREFIX_NET_INDEX)?;
            net_idx.remove(prefix.prefix.trunc().to_string().as_str())?;

            let mut views = write_txn.open_table(VIEWS_TABLE)?;
            let mut to_update = Vec::new();
            {
                let iter = views.iter()?;
                for entry in iter {
                    let entry = entry.map_err(|e| Error::Database(e.to_string()))?;
                    let mut view: View = serde_json::from_str(entry.1.value())?;
                    if view.prefixes.remove(&prefix.prefix) {
                        view.updated_at = Utc::now();
                        to_update.push(view);
                    }
                }
            }
            for view in to_update {
                let json = serde_json::to_string(&view)?;
                views.insert(view.id.to_string().as_str(), json.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    // --- IP address operations ---

    pub fn create_address(&self, address: &IpAddress) -> Result<()> {
        if self.find_address(address.address)?.is_some() {
            return Err(Error::DuplicateAddress(address.address.to_string()));
        }

        let write_txn = self.inner.begin_write()?;
        {
            let id_str = address.id.to_string();
            let json = serde_json::to_string(address)?;
            let mut table = write_txn.open_table(ADDRESSES_TABLE)?;
            table.insert(id_str.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_address(&self, id: &Uuid) -> Result<Option<IpAddress>> {
        self.get_json(ADDRESSES_TABLE, &id.to_string())
    }

    pub fn find_address(&self, ip: IpAddr) -> Result<Option<IpAddress>> {
        Ok(self
            .list_json::<IpAddress>(ADDRESSES_TABLE)?
            .into_iter()
            .find(|a| a.address == ip))
    }

    /// All addresses, ordered by address
    pub fn list_addresses(&self) -> Result<Vec<IpAddress>> {
        let mut addresses: Vec<IpAddress> = self.list_json(ADDRESSES_TABLE)?;
        addresses.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(addresses)
    }

    /// Addresses contained in `prefix`, ordered by address
    pub fn addresses_in(&self, prefix: &IpNet) -> Result<Vec<IpAddress>> {
        Ok(self
            .list_addresses()?
            .into_iter()
            .filter(|a| prefix.contains(&a.address))
            .collect())
    }

    pub fn update_address(&self, address: &IpAddress) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let id_str = address.id.to_string();
            let json = serde_json::to_string(address)?;

            let mut table = write_txn.open_table(ADDRESSES_TABLE)?;
            if table.get(id_str.as_str())?.is_none() {
                return Err(Error::AddressNotFound(id_str));
            }
            table.insert(id_str.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete an address together with the records it manages.
    pub fn delete_address(&self, id: &Uuid) -> Result<()> {
        let managed = self.records_for_address(id)?;

        let write_txn = self.inner.begin_write()?;
        {
            let id_str = id.to_string();
            let mut table = write_txn.open_table(ADDRESSES_TABLE)?;
            if table.remove(id_str.as_str())?.is_none() {
                return Err(Error::AddressNotFound(id_str));
            }

            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut by_zone = write_txn.open_table(RECORDS_BY_ZONE)?;
            for record in &managed {
                let rid = record.id.to_string();
                records.remove(rid.as_str())?;
                index_remove(&mut by_zone, &record_key(record), &rid)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    // --- Zone operations ---

    pub fn create_zone(&self, zone: &Zone) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let key = zone_key(&zone.view_id, &zone.name);
            let mut name_idx = write_txn.open_table(ZONE_NAME_INDEX)?;
            if name_idx.get(key.as_str())?.is_some() {
                return Err(Error::DuplicateZone(zone.name.clone()));
            }

            let id_str = zone.id.to_string();
            let json = serde_json::to_string(zone)?;

            let mut zones = write_txn.open_table(ZONES_TABLE)?;
            zones.insert(id_str.as_str(), json.as_str())?;
            name_idx.insert(key.as_str(), id_str.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_zone(&self, id: &Uuid) -> Result<Option<Zone>> {
        self.get_json(ZONES_TABLE, &id.to_string())
    }

    pub fn get_zone_by_name(&self, view_id: &Uuid, name: &str) -> Result<Option<Zone>> {
        let read_txn = self.inner.begin_read()?;
        let name_idx = read_txn.open_table(ZONE_NAME_INDEX)?;

        let zone_id = match name_idx.get(zone_key(view_id, name).as_str())? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };

        let zones = read_txn.open_table(ZONES_TABLE)?;
        match zones.get(zone_id.as_str())? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_zones(&self) -> Result<Vec<Zone>> {
        let mut zones: Vec<Zone> = self.list_json(ZONES_TABLE)?;
        zones.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(zones)
    }

    pub fn zones_in_view(&self, view_id: &Uuid) -> Result<Vec<Zone>> {
        Ok(self
            .list_zones()?
            .into_iter()
            .filter(|z| z.view_id == *view_id)
            .collect())
    }

    /// Most specific zone of a view that contains `fqdn`.
    pub fn find_zone_for_fqdn(&self, view_id: &Uuid, fqdn: &str) -> Result<Option<Zone>> {
        let zones = self.zones_in_view(view_id)?;

        let mut best: Option<Zone> = None;
        for zone in zones {
            if zone.relative_name(fqdn).is_none() {
                continue;
            }
            if best.as_ref().map_or(true, |b| zone.name.len() > b.name.len()) {
                best = Some(zone);
            }
        }

        Ok(best)
    }

    pub fn delete_zone(&self, id: &Uuid) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let id_str = id.to_string();
            let mut zones = write_txn.open_table(ZONES_TABLE)?;

            let zone_json = zones
                .get(id_str.as_str())?
                .map(|v| v.value().to_string())
                .ok_or_else(|| Error::ZoneNotFound(id_str.clone()))?;
            let zone: Zone = serde_json::from_str(&zone_json)?;

            zones.remove(id_str.as_str())?;

            let mut name_idx = write_txn.open_table(ZONE_NAME_INDEX)?;
            name_idx.remove(zone_key(&zone.view_id, &zone.name).as_str())?;

            // Delete all records in this zone
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut by_zone = write_txn.open_table(RECORDS_BY_ZONE)?;

            let mut to_delete = Vec::new();
            {
                let iter = by_zone.iter()?;
                for entry in iter {
                    let entry = entry.map_err(|e| Error::Database(e.to_string()))?;
                    let key = entry.0.value().to_string();
                    if key.starts_with(&format!("{id_str}:")) {
                        let record_ids: Vec<String> = entry
                            .1
                            .value()
                            .split(',')
                            .map(|s| s.to_string())
                            .collect();
                        to_delete.push((key, record_ids));
                    }
                }
            }

            for (index_key, record_ids) in to_delete {
                by_zone.remove(index_key.as_str())?;
                for rid in record_ids {
                    records.remove(rid.as_str())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Increment zone SOA serial (called on any record change)
    pub fn increment_soa_serial(&self, zone_id: &Uuid) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let id_str = zone_id.to_string();
            let mut zones = write_txn.open_table(ZONES_TABLE)?;

            let zone_json = zones
                .get(id_str.as_str())?
                .map(|v| v.value().to_string())
                .ok_or_else(|| Error::ZoneNotFound(id_str.clone()))?;
            let mut zone: Zone = serde_json::from_str(&zone_json)?;

            // Use YYYYMMDDNN format, incrementing NN
            let today = Utc::now().format("%Y%m%d").to_string();
            let today_base: u32 = format!("{today}00")
                .parse()
                .unwrap_or_else(|_| zone.soa.serial.wrapping_add(1));

            // serial arithmetic wraps (RFC 1982)
            if zone.soa.serial >= today_base {
                zone.soa.serial = zone.soa.serial.wrapping_add(1);
            } else {
                zone.soa.serial = today_base;
            }
            zone.updated_at = Utc::now();

            let json = serde_json::to_string(&zone)?;
            zones.insert(id_str.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // --- Record operations ---

    pub fn create_record(&self, record: &Record) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let id_str = record.id.to_string();
            let json = serde_json::to_string(record)?;

            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            records.insert(id_str.as_str(), json.as_str())?;

            let mut by_zone = write_txn.open_table(RECORDS_BY_ZONE)?;
            index_add(&mut by_zone, &record_key(record), &id_str)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_record(&self, id: &Uuid) -> Result<Option<Record>> {
        self.get_json(RECORDS_TABLE, &id.to_string())
    }

    /// Query enabled records for a given zone, name, and record type
    pub fn query_records(
        &self,
        zone_id: &Uuid,
        name: &str,
        rtype: RecordType,
    ) -> Result<Vec<Record>> {
        let read_txn = self.inner.begin_read()?;
        let records = read_txn.open_table(RECORDS_TABLE)?;
        let by_zone = read_txn.open_table(RECORDS_BY_ZONE)?;

        let index_key = format!("{zone_id}:{}:{rtype}", name.to_ascii_lowercase());

        let record_ids = match by_zone.get(index_key.as_str())? {
            Some(v) => v.value().to_string(),
            None => return Ok(Vec::new()),
        };

        let mut result = Vec::new();
        for rid in record_ids.split(',') {
            if let Some(v) = records.get(rid)? {
                let record: Record = serde_json::from_str(v.value())?;
                if record.enabled {
                    result.push(record);
                }
            }
        }

        Ok(result)
    }

    /// List all records in a zone
    pub fn list_records(&self, zone_id: &Uuid) -> Result<Vec<Record>> {
        let read_txn = self.inner.begin_read()?;
        let records = read_txn.open_table(RECORDS_TABLE)?;
        let by_zone = read_txn.open_table(RECORDS_BY_ZONE)?;

        let prefix = format!("{zone_id}:");
        let mut result = Vec::new();

        let iter = by_zone.iter()?;
        for entry in iter {
            let entry = entry.map_err(|e| Error::Database(e.to_string()))?;
            let key = entry.0.value().to_string();
            if key.starts_with(&prefix) {
                let record_ids = entry.1.value().to_string();
                for rid in record_ids.split(',') {
                    if let Some(v) = records.get(rid)? {
                        let record: Record = serde_json::from_str(v.value())?;
                        result.push(record);
                    }
                }
            }
        }

        Ok(result)
    }

    /// Records maintained on behalf of an IPAM address
    pub fn records_for_address(&self, address_id: &Uuid) -> Result<Vec<Record>> {
        Ok(self
            .list_json::<Record>(RECORDS_TABLE)?
            .into_iter()
            .filter(|r| r.ipam_address_id == Some(*address_id))
            .collect())
    }

    pub fn update_record(&self, record: &Record) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let id_str = record.id.to_string();
            let json = serde_json::to_string(record)?;

            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let existing = records
                .get(id_str.as_str())?
                .map(|v| v.value().to_string())
                .ok_or_else(|| Error::RecordNotFound(id_str.clone()))?;
            let existing: Record = serde_json::from_str(&existing)?;
            records.insert(id_str.as_str(), json.as_str())?;

            // Owner name or type may have moved
            let old_key = record_key(&existing);
            let new_key = record_key(record);
            if old_key != new_key {
                let mut by_zone = write_txn.open_table(RECORDS_BY_ZONE)?;
                index_remove(&mut by_zone, &old_key, &id_str)?;
                index_add(&mut by_zone, &new_key, &id_str)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn delete_record(&self, id: &Uuid) -> Result<()> {
        let write_txn = self.inner.begin_write()?;
        {
            let id_str = id.to_string();
            let mut records = write_txn.open_table(RECORDS_TABLE)?;

            let record_json = records
                .get(id_str.as_str())?
                .map(|v| v.value().to_string())
                .ok_or_else(|| Error::RecordNotFound(id_str.clone()))?;
            let record: Record = serde_json::from_str(&record_json)?;

            records.remove(id_str.as_str())?;

            let mut by_zone = write_txn.open_table(RECORDS_BY_ZONE)?;
            index_remove(&mut by_zone, &record_key(&record), &id_str)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordData, SoaData};
    use tempfile::TempDir;

    fn test_db() -> (Db, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    fn make_zone(view_id: Uuid, name: &str) -> Zone {
        Zone {
            id: Uuid::new_v4(),
            view_id,
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
            default_ttl: 300,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn make_record(zone_id: Uuid, name: &str, data: RecordData) -> Record {
        Record {
            id: Uuid::new_v4(),
            zone_id,
            name: name.to_string(),
            ttl: 300,
            data,
            enabled: true,
            ipam_address_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_view_crud() {
        let (db, _dir) = test_db();
        let mut view = View::new("internal");
        view.prefixes.insert(net("10.0.0.0/24"));
        db.create_view(&view).unwrap();

        let fetched = db.get_view_by_name("internal").unwrap().unwrap();
        assert_eq!(fetched.id, view.id);
        assert!(fetched.prefixes.contains(&net("10.0.0.0/24")));

        // rename frees the old name
        let mut renamed = fetched.clone();
        renamed.name = "inside".to_string();
        db.update_view(&renamed).unwrap();
        assert!(db.get_view_by_name("internal").unwrap().is_none());
        assert!(db.get_view_by_name("inside").unwrap().is_some());

        db.delete_view(&view.id).unwrap();
        assert!(db.get_view(&view.id).unwrap().is_none());
        assert!(db.get_view_by_name("inside").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_view() {
        let (db, _dir) = test_db();
        db.create_view(&View::new("internal")).unwrap();
        assert!(matches!(
            db.create_view(&View::new("internal")),
            Err(Error::DuplicateView(_))
        ));

        let other = View::new("external");
        db.create_view(&other).unwrap();
        let mut clash = other.clone();
        clash.name = "internal".to_string();
        assert!(matches!(
            db.save_views(&[clash]),
            Err(Error::DuplicateView(_))
        ));
        // failed batch leaves the store untouched
        assert_eq!(db.get_view(&other.id).unwrap().unwrap().name, "external");
    }

    #[test]
    fn test_list_views_sorted_and_by_prefix() {
        let (db, _dir) = test_db();
        let mut b = View::new("b-view");
        b.prefixes.insert(net("10.0.0.0/24"));
        let mut a = View::new("a-view");
        a.prefixes.insert(net("10.0.0.0/24"));
        let c = View::new("c-view");
        db.save_views(&[b, c, a]).unwrap();

        let names: Vec<String> = db.list_views().unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["a-view", "b-view", "c-view"]);

        let holders: Vec<String> = db
            .views_for_prefix(&net("10.0.0.0/24"))
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(holders, vec!["a-view", "b-view"]);
    }

    #[test]
    fn test_prefix_crud_and_unassign() {
        let (db, _dir) = test_db();
        let prefix = Prefix::new(net("10.0.0.0/24"));
        db.create_prefix(&prefix).unwrap();
        assert!(matches!(
            db.create_prefix(&Prefix::new(net("10.0.0.0/24"))),
            Err(Error::DuplicatePrefix(_))
        ));

        let mut view = View::new("internal");
        view.prefixes.insert(prefix.prefix);
        db.create_view(&view).unwrap();

        assert_eq!(
            db.get_prefix_by_network(&net("10.0.0.9/24")).unwrap().unwrap().id,
            prefix.id
        );

        db.delete_prefix(&prefix.id).unwrap();
        assert!(db.get_prefix(&prefix.id).unwrap().is_none());
        assert!(db.get_view(&view.id).unwrap().unwrap().prefixes.is_empty());
    }

    #[test]
    fn test_addresses_in_prefix() {
        let (db, _dir) = test_db();
        for ip in ["10.0.0.9", "10.0.0.5", "10.0.1.5", "2001:db8::1"] {
            db.create_address(&IpAddress::new(ip.parse().unwrap(), None)).unwrap();
        }
        assert!(matches!(
            db.create_address(&IpAddress::new("10.0.0.5".parse().unwrap(), None)),
            Err(Error::DuplicateAddress(_))
        ));

        let inside: Vec<String> = db
            .addresses_in(&net("10.0.0.0/24"))
            .unwrap()
            .into_iter()
            .map(|a| a.address.to_string())
            .collect();
        assert_eq!(inside, vec!["10.0.0.5", "10.0.0.9"]);
        assert_eq!(db.addresses_in(&net("2001:db8::/64")).unwrap().len(), 1);
    }

    #[test]
    fn test_zone_names_scoped_per_view() {
        let (db, _dir) = test_db();
        let internal = View::new("internal");
        let external = View::new("external");
        db.create_zone(&make_zone(internal.id, "example.com")).unwrap();
        db.create_zone(&make_zone(external.id, "example.com")).unwrap();
        assert!(matches!(
            db.create_zone(&make_zone(internal.id, "example.com")),
            Err(Error::DuplicateZone(_))
        ));

        db.create_zone(&make_zone(internal.id, "lab.example.com")).unwrap();
        let zone = db
            .find_zone_for_fqdn(&internal.id, "host.lab.example.com")
            .unwrap()
            .unwrap();
        assert_eq!(zone.name, "lab.example.com");
        assert!(db.find_zone_for_fqdn(&internal.id, "host.example.org").unwrap().is_none());
        assert_eq!(db.zones_in_view(&external.id).unwrap().len(), 1);
    }

    #[test]
    fn test_record_crud_and_rename() {
        let (db, _dir) = test_db();
        let zone = make_zone(Uuid::new_v4(), "example.com");
        db.create_zone(&zone).unwrap();

        let mut record = make_record(zone.id, "www", RecordData::A("10.0.0.1".parse().unwrap()));
        db.create_record(&record).unwrap();
        assert_eq!(db.query_records(&zone.id, "www", RecordType::A).unwrap().len(), 1);

        record.name = "web".to_string();
        db.update_record(&record).unwrap();
        assert!(db.query_records(&zone.id, "www", RecordType::A).unwrap().is_empty());
        assert_eq!(db.query_records(&zone.id, "web", RecordType::A).unwrap().len(), 1);

        db.delete_record(&record.id).unwrap();
        assert!(db.get_record(&record.id).unwrap().is_none());
        assert!(db.list_records(&zone.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_address_removes_managed_records() {
        let (db, _dir) = test_db();
        let zone = make_zone(Uuid::new_v4(), "example.com");
        db.create_zone(&zone).unwrap();

        let address = IpAddress::new("10.0.0.5".parse().unwrap(), Some("host.example.com"));
        db.create_address(&address).unwrap();

        let mut managed = make_record(zone.id, "host", RecordData::A("10.0.0.5".parse().unwrap()));
        managed.ipam_address_id = Some(address.id);
        db.create_record(&managed).unwrap();
        let manual = make_record(zone.id, "www", RecordData::A("10.0.0.6".parse().unwrap()));
        db.create_record(&manual).unwrap();

        assert_eq!(db.records_for_address(&address.id).unwrap().len(), 1);
        db.delete_address(&address.id).unwrap();
        let left = db.list_records(&zone.id).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "www");
    }

    #[test]
    fn test_increment_soa_serial() {
        let (db, _dir) = test_db();
        let zone = make_zone(Uuid::new_v4(), "example.com");
        db.create_zone(&zone).unwrap();

        let before = db.get_zone(&zone.id).unwrap().unwrap().soa.serial;
        db.increment_soa_serial(&zone.id).unwrap();
        let after = db.get_zone(&zone.id).unwrap().unwrap().soa.serial;
        assert!(after > before);
    }

    #[test]
    fn test_soa_serial_wraps_at_max() {
        let (db, _dir) = test_db();
        let mut zone = make_zone(Uuid::new_v4(), "example.com");
        zone.soa.serial = u32::MAX;
        db.create_zone(&zone).unwrap();

        db.increment_soa_serial(&zone.id).unwrap();
        assert_eq!(db.get_zone(&zone.id).unwrap().unwrap().soa.serial, 0);
    }

    #[test]
    fn test_record_lookup_ignores_case() {
        let (db, _dir) = test_db();
        let zone = make_zone(Uuid::new_v4(), "example.com");
        db.create_zone(&zone).unwrap();
        let record = make_record(zone.id, "Host", RecordData::CNAME("www.example.com.".into()));
        db.create_record(&record).unwrap();

        assert_eq!(db.query_records(&zone.id, "host", RecordType::CNAME).unwrap().len(), 1);
        assert_eq!(db.query_records(&zone.id, "HOST", RecordType::CNAME).unwrap().len(), 1);

        let mut renamed = record.clone();
        renamed.name = "host".to_string();
        db.update_record(&renamed).unwrap();
        db.delete_record(&record.id).unwrap();
        assert!(db.query_records(&zone.id, "host", RecordType::CNAME).unwrap().is_empty());
    }
}
