//! Authoritative DNS listener.
//!
//! UDP and TCP share one handler. Zone plumbing (SOA, NS, ns1 glue, apex A)
//! and ACME TXT answers are served directly; anything else under the apex
//! is treated as a token capture and run through the pipeline. Unknown
//! names get NXDOMAIN, never SERVFAIL, so lookup failures are
//! indistinguishable from nonexistence.

use crate::acme::{normalize_name, TxtStore};
use crate::config::SharedConfig;
use crate::db::Db;
use crate::error::Error;
use crate::events::{DnsDraft, DnsEvent, InteractionDraft, Kind};
use crate::plugins::Pipeline;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, error};
use trust_dns_proto::rr::rdata::SOA;
use trust_dns_server::authority::MessageResponseBuilder;
use trust_dns_server::client::op::{Header, MessageType, OpCode, ResponseCode};
use trust_dns_server::client::rr::rdata::TXT;
use trust_dns_server::client::rr::{Name, RData, Record, RecordType};
use trust_dns_server::server::{Protocol, Request, RequestHandler, ResponseHandler, ResponseInfo};
use trust_dns_server::ServerFuture;

const ZONE_TTL: u32 = 300;
const ACME_TXT_TTL: u32 = 1;
const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind the UDP and TCP sockets and return the serving future. Bind errors
/// surface here, before any task is spawned, and are fatal at startup.
pub async fn new(
    config: SharedConfig,
    handler: Handler,
) -> Result<ServerFuture<Handler>, Error> {
    let addr = format!("0.0.0.0:{}", config.dns_port);
    let mut server = ServerFuture::new(handler);
    server.register_socket(UdpSocket::bind(&addr).await?);
    server.register_listener(TcpListener::bind(&addr).await?, TCP_TIMEOUT);
    Ok(server)
}

#[derive(Clone)]
pub struct Handler {
    config: SharedConfig,
    db: Db,
    txt_store: Arc<TxtStore>,
    pipeline: Arc<Pipeline>,
}

impl Handler {
    pub fn new(
        config: SharedConfig,
        db: Db,
        txt_store: Arc<TxtStore>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Handler {
            config,
            db,
            txt_store,
            pipeline,
        }
    }

    fn domain(&self) -> String {
        self.config.domain.to_lowercase()
    }

    async fn dispatch<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            return self.send_nxdomain(request, response_handle).await;
        }

        let domain = self.domain();
        let qname = normalize_name(&request.query().name().to_string());
        let qtype = request.query().query_type();

        // SOA for the apex or any descendant, required for ACME zone
        // discovery. Minimum TTL of 1 keeps challenge answers uncached.
        if qtype == RecordType::SOA && (qname == domain || qname.ends_with(&format!(".{domain}"))) {
            let soa = RData::SOA(SOA::new(
                Name::from_str(&format!("ns1.{domain}."))?,
                Name::from_str(&format!("hostmaster.{domain}."))?,
                1,
                3600,
                600,
                604_800,
                1,
            ));
            let record = Record::from_rdata(Name::from_str(&format!("{domain}."))?, ZONE_TTL, soa);
            return self.send_records(request, response_handle, vec![record]).await;
        }

        if qtype == RecordType::NS && qname == domain {
            let ns = RData::NS(Name::from_str(&format!("ns1.{domain}."))?);
            let record = Record::from_rdata(request.query().name().into(), ZONE_TTL, ns);
            return self.send_records(request, response_handle, vec![record]).await;
        }

        // The nameserver's own glue. Other query types get an empty
        // authoritative answer rather than an error.
        if qname == format!("ns1.{domain}") {
            let records = match (qtype, self.public_ip_v4()) {
                (RecordType::A, Some(ip)) => {
                    vec![Record::from_rdata(
                        request.query().name().into(),
                        ZONE_TTL,
                        RData::A(ip),
                    )]
                }
                _ => Vec::new(),
            };
            return self.send_records(request, response_handle, records).await;
        }

        if qname == domain && qtype == RecordType::A {
            if let Some(ip) = self.public_ip_v4() {
                let record =
                    Record::from_rdata(request.query().name().into(), ZONE_TTL, RData::A(ip));
                return self.send_records(request, response_handle, vec![record]).await;
            }
            // Without a public IP the apex falls through and resolves to
            // NXDOMAIN like any other tokenless name.
        }

        if qtype == RecordType::TXT {
            let values = self.txt_store.get(&qname);
            if !values.is_empty() {
                let records = values
                    .into_iter()
                    .map(|value| {
                        Record::from_rdata(
                            request.query().name().into(),
                            ACME_TXT_TTL,
                            RData::TXT(TXT::new(vec![value])),
                        )
                    })
                    .collect();
                return self.send_records(request, response_handle, records).await;
            }
        }

        self.capture(request, response_handle, &qname).await
    }

    /// Token capture: resolve the leftmost label, run the pipeline, and
    /// answer with the plan's records. Unknown tokens are never persisted.
    async fn capture<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
        qname: &str,
    ) -> Result<ResponseInfo, Error> {
        let domain = self.domain();
        let token = extract_token_from_qname(qname, &domain);
        if token.is_empty() {
            return self.send_nxdomain(request, response_handle).await;
        }

        let token_id = match self.db.resolve_token_id(&token).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(token = %token, qname = %qname, "unknown token");
                return self.send_nxdomain(request, response_handle).await;
            }
            Err(err) => {
                error!(token = %token, error = %err, "token lookup failed");
                return self.send_nxdomain(request, response_handle).await;
            }
        };

        let protocol = match request.protocol() {
            Protocol::Udp => "udp",
            _ => "tcp",
        };
        let qtype = request.query().query_type();
        let src = request.src();

        let draft = InteractionDraft {
            token_value: token.clone(),
            token_id: Some(token_id),
            kind: Some(Kind::Dns),
            occurred_at: crate::db::now_unix(),
            remote_ip: src.ip().to_string(),
            remote_port: src.port(),
            tls: false,
            summary: format!("{qtype} {qname} {protocol}"),
            dns: Some(DnsDraft {
                qname: qname.to_string(),
                qtype: u16::from(qtype),
                qclass: u16::from(request.query().query_class()),
                rd: request.header().recursion_desired(),
                opcode: u8::from(request.header().op_code()),
                dns_id: request.header().id(),
                protocol: protocol.to_string(),
            }),
            ..Default::default()
        };

        let mut event = DnsEvent::new(draft);
        if let Err(err) = self.pipeline.process_dns(&mut event).await {
            error!(token = %token, error = %err, "pipeline failed for dns capture");
            return self.send_nxdomain(request, response_handle).await;
        }

        self.send_records(request, response_handle, event.response.answers)
            .await
    }

    fn public_ip_v4(&self) -> Option<std::net::Ipv4Addr> {
        match self.config.public_ip.parse() {
            Ok(IpAddr::V4(ip)) => Some(ip),
            _ => None,
        }
    }

    async fn send_records<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        records: Vec<Record>,
    ) -> Result<ResponseInfo, Error> {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(header, records.iter(), &[], &[], &[]);
        Ok(response_handle.send_response(response).await?)
    }

    async fn send_nxdomain<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(ResponseCode::NXDomain);
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build_no_records(header);
        Ok(response_handle.send_response(response).await?)
    }
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        match self.dispatch(request, response_handle).await {
            Ok(info) => info,
            Err(err) => {
                error!(error = %err, "error handling dns request");
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

/// Extract the leftmost label as the capture token for names under the
/// apex. Names outside the apex, and the apex itself, carry no token.
pub fn extract_token_from_qname(qname: &str, domain: &str) -> String {
    let domain = domain.to_lowercase();
    let Some(subdomain) = qname.strip_suffix(&format!(".{domain}")) else {
        return String::new();
    };
    subdomain.split('.').next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leftmost_label_is_the_token() {
        let domain = "oastrix.example.com";
        assert_eq!(
            extract_token_from_qname("abcdef123456.oastrix.example.com", domain),
            "abcdef123456"
        );
        assert_eq!(
            extract_token_from_qname("data.abcdef123456.oastrix.example.com", domain),
            "data"
        );
    }

    #[test]
    fn apex_and_foreign_names_have_no_token() {
        let domain = "oastrix.example.com";
        assert_eq!(extract_token_from_qname("oastrix.example.com", domain), "");
        assert_eq!(extract_token_from_qname("example.com", domain), "");
        assert_eq!(extract_token_from_qname("evil.com", domain), "");
        assert_eq!(
            extract_token_from_qname("oastrix.example.com.evil.com", domain),
            ""
        );
    }
}
