use domain::dns::entity::DnsMessage;
use domain::filter::entity::{Action, Rule};
use domain::packet::decoder::PacketInfo;

/// Hook consulted before the default block-response behavior.
///
/// A `Some(payload)` return is transmitted as the DNS response payload
/// and supersedes the default; `None` falls through to the configured
/// behavior (respond iff `response.block_response`, RCODE selected by
/// `response.nxdomain`).
pub trait ResponseHandler: Send + Sync {
    fn handle(
        &self,
        query: &DnsMessage<'_>,
        action: Action,
        rule: Option<&Rule>,
        info: &PacketInfo,
    ) -> Option<Vec<u8>>;
}
