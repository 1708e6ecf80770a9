//! Shared test infrastructure for DNS-level integration tests.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::opt::EdnsOption;
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use gslb_dns::config::{DcPosition, DnsServerConfig, Position};
use gslb_dns::entry::{Entry, LbAlgo, Member};
use gslb_dns::geoloc::GeoLoc;
use gslb_dns::registry::Registry;
use gslb_dns::resolver::GslbHandler;

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `GslbHandler::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format
/// bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Entry builders ---

pub fn make_member(ip: &str, dc: &str, ratio: u32) -> Member {
    Member {
        ip: ip.to_string(),
        dc: dc.to_string(),
        ratio,
        disabled: false,
    }
}

pub struct EntryBuilder {
    entry: Entry,
}

impl EntryBuilder {
    pub fn new(fqdn: &str) -> Self {
        Self {
            entry: Entry {
                fqdn: fqdn.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn member_v4(mut self, ip: &str, dc: &str, ratio: u32) -> Self {
        self.entry.members_ipv4.push(make_member(ip, dc, ratio));
        self
    }

    pub fn member_v6(mut self, ip: &str, dc: &str, ratio: u32) -> Self {
        self.entry.members_ipv6.push(make_member(ip, dc, ratio));
        self
    }

    pub fn algos(mut self, preferred: LbAlgo, alternate: LbAlgo, fallback: LbAlgo) -> Self {
        self.entry.lb_algo_preferred = preferred;
        self.entry.lb_algo_alternate = alternate;
        self.entry.lb_algo_fallback = fallback;
        self
    }

    pub fn ttl(mut self, ttl: u32) -> Self {
        self.entry.ttl = ttl;
        self
    }

    pub fn max_answer(mut self, max: u32) -> Self {
        self.entry.max_answer_returned = max;
        self
    }

    pub fn build(self) -> Entry {
        self.entry
    }
}

// --- Handler builders ---

pub fn dc_position(name: &str, lon: f64, lat: f64, cidrs: &[&str]) -> DcPosition {
    DcPosition {
        dc_name: name.to_string(),
        position: Position {
            longitude: lon,
            latitude: lat,
        },
        cidrs: cidrs.iter().map(|c| c.parse().unwrap()).collect(),
    }
}

/// Registry pre-filled with `entries` behind a handler, no geo database.
pub fn build_handler(entries: &[Entry], cnf: DnsServerConfig) -> GslbHandler {
    build_handler_with_positions(entries, cnf, Vec::new())
}

pub fn build_handler_with_positions(
    entries: &[Entry],
    cnf: DnsServerConfig,
    positions: Vec<DcPosition>,
) -> GslbHandler {
    let registry = Arc::new(Registry::new(Arc::new(GeoLoc::new(positions, None))));
    for entry in entries {
        registry.set_entry(entry);
    }
    GslbHandler::new(registry, &cnf)
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    build_message(name, record_type, id).to_vec().unwrap()
}

/// Same, with an EDNS client-subnet option attached.
pub fn build_query_bytes_with_subnet(
    name: &str,
    record_type: RecordType,
    id: u16,
    subnet: &[u8],
) -> Vec<u8> {
    let mut msg = build_message(name, record_type, id);
    let mut edns = Edns::new();
    edns.options_mut()
        .insert(EdnsOption::Unknown(8, subnet.to_vec()));
    msg.set_edns(edns);
    msg.to_vec().unwrap()
}

/// RFC 7871 option data for an IPv4 client subnet.
pub fn ipv4_subnet_option(octets: [u8; 4], prefix: u8) -> Vec<u8> {
    let mut data = vec![0x00, 0x01, prefix, 0x00];
    data.extend_from_slice(&octets[..usize::from(prefix.div_ceil(8)).min(4)]);
    data
}

fn build_message(name: &str, record_type: RecordType, id: u16) -> Message {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` with a crafted source address.
pub fn build_request(bytes: &[u8], src: SocketAddr) -> Request {
    Request::new(parse_message_request(bytes), src, Protocol::Udp)
}

// --- Execution helpers ---

/// Execute a query through the handler and return the parsed response.
pub async fn execute_query(
    handler: &GslbHandler,
    name: &str,
    record_type: RecordType,
    src: &str,
) -> Message {
    let bytes = build_query_bytes(name, record_type, 42);
    execute_raw(handler, &bytes, src).await
}

/// Execute pre-built query bytes through the handler.
pub async fn execute_raw(handler: &GslbHandler, bytes: &[u8], src: &str) -> Message {
    let request = build_request(bytes, src.parse().unwrap());
    let response_handler = TestResponseHandler::new();
    handler.handle_request(&request, response_handler.clone()).await;
    response_handler.into_message()
}

// --- Response helpers ---

/// Extract A/AAAA addresses from a response, in answer order.
pub fn extract_ips(msg: &Message) -> Vec<String> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(a.to_string()),
            RData::AAAA(aaaa) => Some(aaaa.to_string()),
            _ => None,
        })
        .collect()
}

/// Extract TXT payloads from a response, character-strings joined.
pub fn extract_txt(msg: &Message) -> Vec<String> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::TXT(txt) => Some(
                txt.iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>(),
            ),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}
