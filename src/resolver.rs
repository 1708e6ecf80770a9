//! GSLB request handler: decodes questions, walks the LB chain and builds
//! answer records.
//!
//! Unknown names and denied inspection queries answer NOERROR with an
//! empty section; this server is authoritative for whatever the registry
//! serves and nothing else.

use async_trait::async_trait;
use base64::Engine;
use hickory_proto::op::{Header, ResponseCode};
use hickory_proto::rr::rdata::opt::EdnsCode;
use hickory_proto::rr::rdata::{A, AAAA, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::BinEncodable;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::config::DnsServerConfig;
use crate::entry::{canonical_fqdn, Entry, Member};
use crate::error::GslbError;
use crate::lb::{LoadBalancer, MemberType, ResolveCtx};
use crate::metrics::{self, LbStage, QueryResult, Timer};
use crate::registry::{EntrySnapshot, Registry};

/// Prefix selecting the raw member listing of an entry.
pub const ALL_MEMBER_PREFIX: &str = "_all.";
/// Reserved TXT name answering the list of registered FQDNs.
pub const ALL_ENTRIES_FQDN: &str = "all.entries.gsloc.";

/// TTL used when the entry declares none.
const DEFAULT_TTL: u32 = 60;
/// Maximum length of one TXT character-string.
const TXT_CHUNK: usize = 255;

/// DNS front-end over the registry.
#[derive(Clone)]
pub struct GslbHandler {
    registry: Arc<Registry>,
    trust_edns: bool,
    allowed_inspect: Arc<Vec<IpNet>>,
}

impl GslbHandler {
    /// Build the handler for the configured DNS surface.
    pub fn new(registry: Arc<Registry>, cnf: &DnsServerConfig) -> Self {
        Self {
            registry,
            trust_edns: cnf.trust_edns,
            allowed_inspect: Arc::new(cnf.allowed_inspect.clone()),
        }
    }

    /// Client address for LB decisions: the EDNS client-subnet address
    /// when present and trusted, the DNS peer otherwise.
    fn client_ip(&self, request: &Request) -> Option<IpAddr> {
        if self.trust_edns {
            if let Some(ip) = edns_client_subnet(request) {
                return Some(ip);
            }
        }
        Some(request.src().ip())
    }

    /// Answer one question. Every exit records the query outcome.
    pub fn resolve(&self, ctx: &ResolveCtx, name: &str, qtype: RecordType) -> Vec<Record> {
        let timer = Timer::start();
        let qtype_str = qtype.to_string();
        let fqdn = canonical_fqdn(name);
        trace!(fqdn = %fqdn, qtype = %qtype_str, "resolving");

        if qtype == RecordType::TXT && fqdn == ALL_ENTRIES_FQDN && self.is_allowed_inspect(ctx) {
            let records = self.answer_all_entries();
            metrics::record_query(&qtype_str, QueryResult::Success, timer.elapsed());
            return records;
        }

        let mut see_all = false;
        let mut lookup_fqdn = fqdn.as_str();
        if let Some(stripped) = fqdn.strip_prefix(ALL_MEMBER_PREFIX) {
            if self.is_allowed_inspect(ctx) {
                lookup_fqdn = stripped;
                see_all = true;
            }
        }

        let Some(snapshot) = self.registry.get(lookup_fqdn) else {
            debug!(fqdn = %lookup_fqdn, "no entry for name");
            metrics::record_query(&qtype_str, QueryResult::NoEntry, timer.elapsed());
            return Vec::new();
        };

        let member_type = match qtype {
            RecordType::TXT => {
                if !self.is_allowed_inspect(ctx) {
                    metrics::record_query(&qtype_str, QueryResult::Denied, timer.elapsed());
                    return Vec::new();
                }
                let records = answer_json(&snapshot.entry);
                metrics::record_query(&qtype_str, QueryResult::Success, timer.elapsed());
                return records;
            }
            RecordType::A => MemberType::Ipv4,
            RecordType::AAAA => MemberType::Ipv6,
            RecordType::ANY => MemberType::All,
            _ => {
                trace!(fqdn = %lookup_fqdn, qtype = %qtype_str, "unsupported query type");
                metrics::record_query(&qtype_str, QueryResult::NoEntry, timer.elapsed());
                return Vec::new();
            }
        };

        let ttl = if snapshot.entry.ttl > 0 {
            snapshot.entry.ttl
        } else {
            DEFAULT_TTL
        };

        if see_all {
            let records = answer_all_members(&snapshot.entry, member_type, ttl);
            metrics::record_query(&qtype_str, QueryResult::Success, timer.elapsed());
            return records;
        }

        match self.find_members(ctx, &snapshot, member_type) {
            Ok(members) => {
                let records: Vec<Record> = members
                    .iter()
                    .filter_map(|m| record_for_member(lookup_fqdn, ttl, m))
                    .collect();
                metrics::record_query(&qtype_str, QueryResult::Success, timer.elapsed());
                records
            }
            Err(e) => {
                error!(fqdn = %lookup_fqdn, error = %e, "error finding members");
                metrics::record_query_failed(lookup_fqdn, &qtype_str);
                metrics::record_query(&qtype_str, QueryResult::Failed, timer.elapsed());
                Vec::new()
            }
        }
    }

    /// Up to `max_answer_returned` distinct members through the LB chain.
    fn find_members(
        &self,
        ctx: &ResolveCtx,
        snapshot: &EntrySnapshot,
        member_type: MemberType,
    ) -> Result<Vec<Member>, GslbError> {
        let max = snapshot.entry.max_answer_returned.max(1) as usize;
        let mut members: Vec<Member> = Vec::with_capacity(max);
        for _ in 0..max {
            let member = self.find_member(ctx, snapshot, member_type)?;
            if !members.iter().any(|m| m.ip == member.ip) {
                members.push(member);
            }
        }
        Ok(members)
    }

    /// One pass through preferred → alternate → fallback. "No candidate"
    /// counts as a stage failure.
    fn find_member(
        &self,
        ctx: &ResolveCtx,
        snapshot: &EntrySnapshot,
        member_type: MemberType,
    ) -> Result<Member, GslbError> {
        let fqdn = &snapshot.entry.fqdn;
        let stages: [(LbStage, &dyn LoadBalancer); 3] = [
            (LbStage::Preferred, snapshot.lb_preferred.as_ref()),
            (LbStage::Alternate, snapshot.lb_alternate.as_ref()),
            (LbStage::Fallback, snapshot.lb_fallback.as_ref()),
        ];
        let mut failures: Vec<String> = Vec::new();
        for (stage, lb) in stages {
            match lb.next(ctx, member_type) {
                Ok(Some(member)) => {
                    metrics::record_lb_selection(stage, fqdn, lb.name());
                    return Ok(member);
                }
                Ok(None) => failures.push(format!("{}: no candidate", lb.name())),
                Err(e) => failures.push(format!("{}: {e}", lb.name())),
            }
        }
        Err(GslbError::ChainExhausted(failures.join("; ")))
    }

    fn is_allowed_inspect(&self, ctx: &ResolveCtx) -> bool {
        let Some(ip) = ctx.client_ip else {
            return false;
        };
        ip.is_loopback() || self.allowed_inspect.iter().any(|cidr| cidr.contains(&ip))
    }

    /// One TXT record per registered fqdn under the reserved dump name.
    fn answer_all_entries(&self) -> Vec<Record> {
        let Ok(name) = Name::from_ascii(ALL_ENTRIES_FQDN) else {
            return Vec::new();
        };
        self.registry
            .fqdns()
            .into_iter()
            .map(|fqdn| {
                let mut record =
                    Record::from_rdata(name.clone(), 0, RData::TXT(TXT::new(vec![fqdn])));
                record.set_dns_class(DNSClass::IN);
                record
            })
            .collect()
    }
}

#[async_trait]
impl RequestHandler for GslbHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let ctx = ResolveCtx {
            client_ip: self.client_ip(request),
        };

        let mut records = Vec::new();
        for query in request.queries() {
            records.extend(self.resolve(&ctx, &query.name().to_string(), query.query_type()));
        }

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_recursion_available(false);

        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            records.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "error writing dns response");
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

/// A or AAAA record for one member; unparsable addresses contribute
/// nothing.
fn record_for_member(fqdn: &str, ttl: u32, member: &Member) -> Option<Record> {
    let name = match Name::from_ascii(fqdn) {
        Ok(name) => name,
        Err(e) => {
            error!(fqdn, error = %e, "invalid record name");
            return None;
        }
    };
    let rdata = match member.ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => RData::A(A::from(ip)),
        Ok(IpAddr::V6(ip)) => RData::AAAA(AAAA::from(ip)),
        Err(e) => {
            error!(ip = %member.ip, error = %e, "invalid member address");
            return None;
        }
    };
    let mut record = Record::from_rdata(name, ttl, rdata);
    record.set_dns_class(DNSClass::IN);
    Some(record)
}

/// The raw member list under `_all.<fqdn>`, bypassing the LB chain.
fn answer_all_members(entry: &Entry, member_type: MemberType, ttl: u32) -> Vec<Record> {
    let members = match member_type {
        MemberType::Ipv4 => entry.members_ipv4.clone(),
        MemberType::Ipv6 => entry.members_ipv6.clone(),
        MemberType::All => entry.all_members(),
    };
    let name = format!("{ALL_MEMBER_PREFIX}{}", entry.fqdn);
    members
        .iter()
        .filter_map(|m| record_for_member(&name, ttl, m))
        .collect()
}

/// One TXT record carrying the base64 JSON encoding of the entry, split
/// into 255-octet character-strings.
fn answer_json(entry: &Entry) -> Vec<Record> {
    let json = match serde_json::to_vec(entry) {
        Ok(json) => json,
        Err(e) => {
            error!(fqdn = %entry.fqdn, error = %e, "unserializable entry");
            return Vec::new();
        }
    };
    let name = match Name::from_ascii(&entry.fqdn) {
        Ok(name) => name,
        Err(e) => {
            error!(fqdn = %entry.fqdn, error = %e, "invalid record name");
            return Vec::new();
        }
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(json);
    let chunks: Vec<String> = encoded
        .as_bytes()
        .chunks(TXT_CHUNK)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    let mut record = Record::from_rdata(name, 0, RData::TXT(TXT::new(chunks)));
    record.set_dns_class(DNSClass::IN);
    vec![record]
}

/// EDNS client-subnet address of the request, when carried.
fn edns_client_subnet(request: &Request) -> Option<IpAddr> {
    let edns = request.edns()?;
    let option = edns.options().get(EdnsCode::Subnet)?;
    parse_client_subnet(&option.to_bytes().ok()?)
}

/// RFC 7871 option data: family (2 octets), source prefix length, scope
/// prefix length, then the truncated address.
fn parse_client_subnet(data: &[u8]) -> Option<IpAddr> {
    if data.len() < 4 {
        return None;
    }
    let family = u16::from_be_bytes([data[0], data[1]]);
    let addr = &data[4..];
    match family {
        1 => {
            let mut octets = [0u8; 4];
            let len = addr.len().min(4);
            octets[..len].copy_from_slice(&addr[..len]);
            Some(IpAddr::from(octets))
        }
        2 => {
            let mut octets = [0u8; 16];
            let len = addr.len().min(16);
            octets[..len].copy_from_slice(&addr[..len]);
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}
