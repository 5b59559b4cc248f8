//! The `defaultresponse` core plugin.
//!
//! Registered with priority 999 so it terminates the response chain when no
//! feature plugin has claimed the event: HTTP captures get `200 ok`, DNS A
//! queries get an A record for the public IP, AAAA queries a loopback.

use crate::events::{DnsEvent, HttpEvent};
use crate::plugins::Plugin;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use trust_dns_server::client::rr::{Name, RData, Record, RecordType};

const ANSWER_TTL: u32 = 300;

pub struct DefaultResponsePlugin {
    public_ip: IpAddr,
}

impl DefaultResponsePlugin {
    /// `public_ip` falls back to `127.0.0.1` when unset or unparseable.
    pub fn new(public_ip: &str) -> Self {
        let public_ip = public_ip
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        DefaultResponsePlugin { public_ip }
    }
}

#[async_trait]
impl Plugin for DefaultResponsePlugin {
    fn id(&self) -> &'static str {
        "defaultresponse"
    }

    fn is_core(&self) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        999
    }

    async fn on_http_response(&self, event: &mut HttpEvent) -> Result<(), anyhow::Error> {
        if event.response.handled {
            return Ok(());
        }
        event.response.status = 200;
        event.response.body = b"ok".to_vec();
        event.response.handled = true;
        Ok(())
    }

    async fn on_dns_response(&self, event: &mut DnsEvent) -> Result<(), anyhow::Error> {
        if event.response.handled {
            return Ok(());
        }
        let Some(dns) = &event.base.draft.dns else {
            return Ok(());
        };

        let rdata = match (RecordType::from(dns.qtype), self.public_ip) {
            (RecordType::A, IpAddr::V4(ip)) => RData::A(ip),
            (RecordType::A, IpAddr::V6(_)) => RData::A(Ipv4Addr::LOCALHOST),
            (RecordType::AAAA, IpAddr::V6(ip)) => RData::AAAA(ip),
            (RecordType::AAAA, IpAddr::V4(_)) => RData::AAAA(Ipv6Addr::LOCALHOST),
            _ => return Ok(()),
        };

        let mut qname = dns.qname.clone();
        if !qname.ends_with('.') {
            qname.push('.');
        }
        let Ok(name) = Name::from_str(&qname) else {
            return Ok(());
        };

        event
            .response
            .answers
            .push(Record::from_rdata(name, ANSWER_TTL, rdata));
        event.response.handled = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DnsDraft, InteractionDraft, Kind};

    fn dns_event(qtype: u16) -> DnsEvent {
        DnsEvent::new(InteractionDraft {
            kind: Some(Kind::Dns),
            dns: Some(DnsDraft {
                qname: "tok.oastrix.example.com".into(),
                qtype,
                qclass: 1,
                protocol: "udp".into(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn http_default_is_200_ok() {
        let plugin = DefaultResponsePlugin::new("192.0.2.10");
        let mut event = HttpEvent::new(InteractionDraft::default());
        plugin.on_http_response(&mut event).await.unwrap();
        assert!(event.response.handled);
        assert_eq!(event.response.status, 200);
        assert_eq!(event.response.body, b"ok");
    }

    #[tokio::test]
    async fn handled_events_are_left_alone() {
        let plugin = DefaultResponsePlugin::new("192.0.2.10");
        let mut event = HttpEvent::new(InteractionDraft::default());
        event.response.status = 302;
        event.response.handled = true;
        plugin.on_http_response(&mut event).await.unwrap();
        assert_eq!(event.response.status, 302);
    }

    #[tokio::test]
    async fn a_queries_answer_with_public_ip() {
        let plugin = DefaultResponsePlugin::new("192.0.2.10");
        let mut event = dns_event(1);
        plugin.on_dns_response(&mut event).await.unwrap();
        assert!(event.response.handled);
        assert_eq!(event.response.answers.len(), 1);
        let record = &event.response.answers[0];
        assert_eq!(record.ttl(), ANSWER_TTL);
        assert_eq!(record.data(), Some(&RData::A("192.0.2.10".parse().unwrap())));
    }

    #[tokio::test]
    async fn missing_public_ip_falls_back_to_loopback() {
        let plugin = DefaultResponsePlugin::new("");
        let mut event = dns_event(1);
        plugin.on_dns_response(&mut event).await.unwrap();
        assert_eq!(
            event.response.answers[0].data(),
            Some(&RData::A(Ipv4Addr::LOCALHOST))
        );
    }

    #[tokio::test]
    async fn aaaa_queries_answer_loopback_for_v4_deployments() {
        let plugin = DefaultResponsePlugin::new("192.0.2.10");
        let mut event = dns_event(28);
        plugin.on_dns_response(&mut event).await.unwrap();
        assert_eq!(
            event.response.answers[0].data(),
            Some(&RData::AAAA(Ipv6Addr::LOCALHOST))
        );
    }

    #[tokio::test]
    async fn other_query_types_are_not_handled() {
        let plugin = DefaultResponsePlugin::new("192.0.2.10");
        let mut event = dns_event(16);
        plugin.on_dns_response(&mut event).await.unwrap();
        assert!(!event.response.handled);
        assert!(event.response.answers.is_empty());
    }
}
