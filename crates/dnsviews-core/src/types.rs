use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// DNS record types supported by dnsviews
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    MX,
    NS,
    PTR,
    TXT,
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::MX => write!(f, "MX"),
            RecordType::NS => write!(f, "NS"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::TXT => write!(f, "TXT"),
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "MX" => Ok(RecordType::MX),
            "NS" => Ok(RecordType::NS),
            "PTR" => Ok(RecordType::PTR),
            "TXT" => Ok(RecordType::TXT),
            _ => Err(crate::error::Error::InvalidRecord(format!(
                "unknown record type: {s}"
            ))),
        }
    }
}

/// DNS record data variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RecordData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    CNAME(String),
    MX { preference: u16, exchange: String },
    NS(String),
    PTR(String),
    TXT(String),
}

impl RecordData {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordData::A(_) => RecordType::A,
            RecordData::AAAA(_) => RecordType::AAAA,
            RecordData::CNAME(_) => RecordType::CNAME,
            RecordData::MX { .. } => RecordType::MX,
            RecordData::NS(_) => RecordType::NS,
            RecordData::PTR(_) => RecordType::PTR,
            RecordData::TXT(_) => RecordType::TXT,
        }
    }

    /// Address record for an IP address, A or AAAA depending on family.
    pub fn address(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => RecordData::A(v4),
            IpAddr::V6(v6) => RecordData::AAAA(v6),
        }
    }

    /// Presentation form of the record value.
    pub fn value(&self) -> String {
        match self {
            RecordData::A(ip) => ip.to_string(),
            RecordData::AAAA(ip) => ip.to_string(),
            RecordData::CNAME(target) | RecordData::NS(target) | RecordData::PTR(target) => {
                target.clone()
            }
            RecordData::MX {
                preference,
                exchange,
            } => format!("{preference} {exchange}"),
            RecordData::TXT(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoaData {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// A DNS view: a namespace that lets the same name resolve differently
/// depending on network context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_view: bool,
    #[serde(default)]
    pub tenant: Option<String>,
    /// Directly assigned IPAM prefixes
    #[serde(default)]
    pub prefixes: BTreeSet<IpNet>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl View {
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            default_view: false,
            tenant: None,
            prefixes: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for View {}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An IPAM prefix. Parent/child relations follow from containment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prefix {
    pub id: Uuid,
    pub prefix: IpNet,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Prefix {
    pub fn new(prefix: IpNet) -> Self {
        Self {
            id: Uuid::new_v4(),
            prefix: prefix.trunc(),
            description: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// An IPAM address, optionally carrying the DNS name its records use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    pub id: Uuid,
    pub address: IpAddr,
    #[serde(default)]
    pub dns_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IpAddress {
    pub fn new(address: IpAddr, dns_name: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            address,
            dns_name: dns_name.map(String::from),
            created_at: Utc::now(),
        }
    }
}

/// A DNS zone, always owned by one view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub view_id: Uuid,
    pub name: String,
    pub soa: SoaData,
    pub default_ttl: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Zone {
    /// Owner name of `fqdn` relative to this zone, `@` for the apex.
    /// `None` if the name is not inside the zone.
    pub fn relative_name(&self, fqdn: &str) -> Option<String> {
        let fqdn = fqdn.trim_end_matches('.').to_ascii_lowercase();
        let zone_name = self.name.trim_end_matches('.').to_ascii_lowercase();
        if fqdn == zone_name {
            Some("@".to_string())
        } else {
            fqdn.strip_suffix(&format!(".{zone_name}"))
                .map(|s| s.to_string())
        }
    }
}

/// A DNS record within a zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub name: String,
    pub ttl: u32,
    pub data: RecordData,
    pub enabled: bool,
    /// Set when the record is maintained on behalf of an IPAM address
    #[serde(default)]
    pub ipam_address_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reverse lookup name of an address, without trailing dot.
pub fn reverse_pointer_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let mut nibbles = Vec::with_capacity(32);
            for byte in v6.octets().iter().rev() {
                nibbles.push(format!("{:x}", byte & 0x0f));
                nibbles.push(format!("{:x}", byte >> 4));
            }
            format!("{}.ip6.arpa", nibbles.join("."))
        }
    }
}
