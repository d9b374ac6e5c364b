use crate::config::SharedConfig;
use crate::error::Error;
use crate::model::Service;
use crate::resolver::Resolver;
use lazy_static::lazy_static;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, error};
use trust_dns_proto::rr::rdata::SOA;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_server::authority::MessageResponseBuilder;
use trust_dns_server::client::op::{Header, MessageType, OpCode, ResponseCode};
use trust_dns_server::client::rr::rdata::TXT;
use trust_dns_server::client::rr::{Name, RData, Record, RecordType};
use trust_dns_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

#[derive(Clone)]
pub struct Handler {
    config: SharedConfig,
    resolver: Arc<Resolver>,
    upstream: Option<Arc<TokioAsyncResolver>>,
}

lazy_static! {
    static ref SERIAL_FORMATTER: &'static [time::format_description::FormatItem<'static>] =
        format_description!(version = 2, "[year][month][day]");
}

impl Handler {
    pub(super) fn new(config: SharedConfig, resolver: Arc<Resolver>) -> Result<Self, Error> {
        let upstream = if config.upstreams.is_empty() {
            None
        } else {
            Some(Arc::new(upstream_resolver(&config.upstreams)?))
        };
        Ok(Handler {
            config,
            resolver,
            upstream,
        })
    }

    async fn dispatch_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response: R,
    ) -> Result<ResponseInfo, Error> {
        // If it isn't a query, return NOTIMPL.
        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            return self.send_error(request, response, ResponseCode::NotImp).await;
        }

        let name = request.query().name().to_string();
        if self.config.zone_for(&name).is_none() {
            return self.handle_forward(request, response).await;
        }

        match request.query().query_type() {
            RecordType::A | RecordType::CNAME | RecordType::TXT => {
                self.handle_dynamic(request, response).await
            }
            RecordType::SOA => self.handle_request_soa(request, response).await,
            RecordType::NS => self.handle_request_ns(request, response).await,
            // Only IPv4 answer sets are stored; an owned name simply has no
            // AAAA data.
            RecordType::AAAA => self.send_auth_resp(request, response, Vec::new()).await,
            _ => self.send_error(request, response, ResponseCode::NotImp).await,
        }
    }

    async fn handle_dynamic<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let name = request.query().name().to_string();
        let qtype = request.query().query_type();
        match self.resolver.services(&name, qtype, false).await {
            Ok(services) => {
                let records = services
                    .iter()
                    .filter_map(|serv| {
                        rdata(serv, qtype).map(|rd| {
                            Record::from_rdata(request.query().name().into(), serv.ttl, rd)
                        })
                    })
                    .collect();
                self.send_auth_resp(request, response_handle, records).await
            }
            Err(err) if err.is_name_error() => self.send_nxdomain(request, response_handle).await,
            Err(err) => Err(err),
        }
    }

    async fn handle_request_soa<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let name = request.query().name().to_string();
        if !self.is_zone_apex(&name) {
            return self.send_nxdomain(request, response_handle).await;
        }

        // NB: unwraps are safe: known date format producing values that will
        // always parse as u32.
        let serial: u32 = OffsetDateTime::now_utc()
            .format(&SERIAL_FORMATTER)
            .unwrap()
            .parse()
            .unwrap();
        let ns_domain = Name::from_str(&self.config.ns_domain)?;
        let ns_admin = self.config.ns_admin()?;
        // See RIPE 203[0] for recommended values.
        // [0]: https://www.ripe.net/publications/docs/ripe-203
        let soa_rdata = RData::SOA(SOA::new(
            ns_domain,
            ns_admin,
            serial,
            86_400,    // 24 hrs.
            7_200,     // 2 hours.
            3_600_000, // 1000 hours.
            172_800,   // 2 days.
        ));
        let record = Record::from_rdata(
            request.query().name().into(),
            self.config.default_ttl,
            soa_rdata,
        );
        self.send_auth_resp(request, response_handle, vec![record])
            .await
    }

    async fn handle_request_ns<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let name = crate::path::canonicalize(&request.query().name().to_string());
        let Some(ns_names) = self
            .config
            .ns_records
            .iter()
            .find(|(fqdn, _)| crate::path::canonicalize(fqdn) == name)
            .map(|(_, names)| names)
        else {
            return self.send_nxdomain(request, response_handle).await;
        };

        let mut records = Vec::with_capacity(ns_names.len());
        for ns in ns_names {
            let target = Name::from_str(ns)?;
            records.push(Record::from_rdata(
                request.query().name().into(),
                self.config.default_ttl,
                RData::NS(target),
            ));
        }
        self.send_auth_resp(request, response_handle, records).await
    }

    /// Names outside the managed zones go to the upstream recursor as-is.
    async fn handle_forward<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let Some(upstream) = &self.upstream else {
            return self
                .send_error(request, response_handle, ResponseCode::Refused)
                .await;
        };

        let name = request.query().name().to_string();
        let qtype = request.query().query_type();
        match upstream.lookup(name.clone(), qtype).await {
            Ok(lookup) => {
                let records: Vec<Record> = lookup.record_iter().cloned().collect();
                self.send_resp(request, response_handle, records, false).await
            }
            Err(err) if is_upstream_nxdomain(&err) => {
                self.send_nxdomain(request, response_handle).await
            }
            Err(err) => {
                debug!(%name, %err, "upstream lookup failed");
                self.send_error(request, response_handle, ResponseCode::ServFail)
                    .await
            }
        }
    }

    fn is_zone_apex(&self, name: &str) -> bool {
        let name = crate::path::canonicalize(name);
        self.config
            .zones
            .iter()
            .any(|zone| crate::path::canonicalize(zone) == name)
    }

    async fn send_auth_resp<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
        records: Vec<Record>,
    ) -> Result<ResponseInfo, Error> {
        self.send_resp(request, response_handle, records, true).await
    }

    async fn send_resp<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        records: Vec<Record>,
        authoritative: bool,
    ) -> Result<ResponseInfo, Error> {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(authoritative);
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(header, records.iter(), &[], &[], &[]);
        Ok(response_handle.send_response(response).await?)
    }

    async fn send_nxdomain<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(ResponseCode::NXDomain);
        let response = builder.build_no_records(header);
        Ok(response_handle.send_response(response).await?)
    }

    async fn send_error<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        code: ResponseCode,
    ) -> Result<ResponseInfo, Error> {
        let response = MessageResponseBuilder::from_message_request(request);
        Ok(response_handle
            .send_response(response.error_msg(request.header(), code))
            .await?)
    }
}

/// Wire form of one service for the given query type. Hosts that are not
/// IPv4 literals answer A queries as CNAMEs, letting stored records point
/// at names.
fn rdata(serv: &Service, qtype: RecordType) -> Option<RData> {
    match qtype {
        RecordType::A => match serv.host.parse::<Ipv4Addr>() {
            Ok(addr) => Some(RData::A(addr)),
            Err(_) => cname_rdata(&serv.host),
        },
        RecordType::CNAME => match serv.host.parse::<Ipv4Addr>() {
            // An address-valued service has no CNAME form.
            Ok(_) => None,
            Err(_) => cname_rdata(&serv.host),
        },
        RecordType::TXT => Some(RData::TXT(TXT::new(vec![serv.text.clone()]))),
        _ => None,
    }
}

fn cname_rdata(host: &str) -> Option<RData> {
    if host.is_empty() {
        return None;
    }
    Name::from_str(&format!("{}.", host.trim_end_matches('.')))
        .ok()
        .map(RData::CNAME)
}

fn upstream_resolver(upstreams: &[SocketAddr]) -> Result<TokioAsyncResolver, Error> {
    let mut servers = NameServerConfigGroup::new();
    for addr in upstreams {
        let ips: [IpAddr; 1] = [addr.ip()];
        servers.merge(NameServerConfigGroup::from_ips_clear(
            &ips,
            addr.port(),
            true,
        ));
    }
    let config = ResolverConfig::from_parts(None, Vec::new(), servers);
    TokioAsyncResolver::tokio(config, ResolverOpts::default())
        .map_err(|err| Error::BackendUnreachable(err.to_string()))
}

fn is_upstream_nxdomain(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        match self.dispatch_request(request, response_handle).await {
            Ok(info) => info,
            Err(err) => {
                error!("error in RequestHandler: {:?}", err);
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_hosts_answer_a_queries() {
        let serv = Service::host("1.2.3.4");
        assert!(matches!(rdata(&serv, RecordType::A), Some(RData::A(_))));
        assert!(rdata(&serv, RecordType::CNAME).is_none());
    }

    #[test]
    fn name_hosts_answer_as_cnames() {
        let serv = Service::host("target.example.com");
        assert!(matches!(
            rdata(&serv, RecordType::A),
            Some(RData::CNAME(_))
        ));
        assert!(matches!(
            rdata(&serv, RecordType::CNAME),
            Some(RData::CNAME(_))
        ));
    }

    #[test]
    fn text_services_answer_txt_queries() {
        let serv = Service::text("v=spf1");
        match rdata(&serv, RecordType::TXT) {
            Some(RData::TXT(txt)) => {
                assert_eq!(txt.txt_data().len(), 1);
            }
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[test]
    fn empty_hosts_produce_no_rdata() {
        let serv = Service::text("only-text");
        assert!(rdata(&serv, RecordType::A).is_none());
        assert!(rdata(&serv, RecordType::CNAME).is_none());
    }
}
