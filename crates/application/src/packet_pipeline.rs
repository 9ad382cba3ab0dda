//! The data-plane pipeline: one receive loop per queue socket feeding
//! a bounded channel, drained by parse/match workers.
//!
//! Receive loops and workers run on dedicated OS threads — both sides
//! block (in `poll(2)` and channel receive respectively) and hold
//! exclusive frame handles that must never straddle a suspension
//! point. Cancellation is observed at every loop iteration; workers
//! drain the channel before exiting so no frame is stranded.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use adapters::xdp::{FrameHandle, XskSocket};
use domain::dns::parser::QueryParser;
use domain::filter::engine::FilterEngine;
use domain::filter::entity::Action;
use domain::packet::decoder::decode_udp;
use domain::packet::reflector::{build_block_response, build_response};
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::response_port::ResponseHandler;

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ResponseOptions {
    /// Synthesize a response for blocked queries.
    pub block_response: bool,
    /// true = NXDOMAIN, false = REFUSED.
    pub nxdomain: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub num_workers: usize,
    pub batch_size: usize,
    pub channel_capacity: usize,
    pub poll_timeout_ms: i32,
    pub response: ResponseOptions,
}

// ── Packet unit ─────────────────────────────────────────────────────

/// One received frame traveling from a receive loop to a worker. The
/// handle keeps the frame exclusively owned until the worker returns
/// it (recycle) or transmits a response.
pub struct RxPacket {
    pub queue_id: u32,
    pub frame: FrameHandle,
    pub socket: Arc<XskSocket>,
}

// ── Pipeline ────────────────────────────────────────────────────────

pub struct PacketPipeline {
    receive_handles: Vec<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl PacketPipeline {
    /// Spawn one receive loop per socket and `num_workers` workers.
    pub fn start(
        sockets: &[Arc<XskSocket>],
        opts: PipelineOptions,
        engine: Arc<FilterEngine>,
        metrics: Arc<dyn MetricsPort>,
        handler: Option<Arc<dyn ResponseHandler>>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = bounded::<RxPacket>(opts.channel_capacity);

        let receive_handles = sockets
            .iter()
            .map(|socket| {
                let socket = Arc::clone(socket);
                let tx = tx.clone();
                let metrics = Arc::clone(&metrics);
                let cancel = cancel.clone();
                let queue_id = socket.queue_id();
                std::thread::Builder::new()
                    .name(format!("rx-q{queue_id}"))
                    .spawn(move || {
                        receive_loop(&socket, &tx, opts, metrics.as_ref(), &cancel);
                    })
                    .expect("spawn receive loop")
            })
            .collect();
        // Receive loops own the only senders; when they exit, workers
        // see the channel disconnect after draining.
        drop(tx);

        let worker_handles = (0..opts.num_workers)
            .map(|id| {
                let rx = rx.clone();
                let mut ctx = WorkerContext {
                    parser: QueryParser::new(),
                    engine: Arc::clone(&engine),
                    metrics: Arc::clone(&metrics),
                    handler: handler.clone(),
                    response: opts.response,
                    response_buf: Vec::with_capacity(512),
                };
                let cancel = cancel.clone();
                std::thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn(move || {
                        worker_loop(id, &rx, &mut ctx, &cancel);
                    })
                    .expect("spawn worker")
            })
            .collect();

        info!(
            queues = sockets.len(),
            workers = opts.num_workers,
            channel_capacity = opts.channel_capacity,
            "packet pipeline started"
        );

        Self {
            receive_handles,
            worker_handles,
        }
    }

    /// Wait for every loop to exit. Receive loops stop on
    /// cancellation; workers stop once the channel is drained and
    /// disconnected.
    pub fn join(self) {
        for handle in self.receive_handles {
            let _ = handle.join();
        }
        for handle in self.worker_handles {
            let _ = handle.join();
        }
    }
}

// ── Receive loop ────────────────────────────────────────────────────

fn receive_loop(
    socket: &Arc<XskSocket>,
    tx: &Sender<RxPacket>,
    opts: PipelineOptions,
    metrics: &dyn MetricsPort,
    cancel: &CancellationToken,
) {
    let queue_id = socket.queue_id();
    let mut handles: Vec<FrameHandle> = Vec::with_capacity(opts.batch_size);

    while !cancel.is_cancelled() {
        socket.refill();

        let rx_available = match socket.poll(opts.poll_timeout_ms) {
            Ok((rx_available, _completions)) => rx_available,
            Err(e) => {
                warn!(queue_id, error = %e, "poll failed");
                continue;
            }
        };
        if rx_available == 0 {
            continue;
        }

        socket.receive(&mut handles, opts.batch_size);
        for frame in handles.drain(..) {
            let pkt = RxPacket {
                queue_id,
                frame,
                socket: Arc::clone(socket),
            };
            match tx.try_send(pkt) {
                Ok(()) => {}
                Err(TrySendError::Full(pkt)) => {
                    pkt.socket.recycle(pkt.frame);
                    metrics.record_dropped();
                }
                Err(TrySendError::Disconnected(pkt)) => {
                    pkt.socket.recycle(pkt.frame);
                    return;
                }
            }
        }
    }

    debug!(queue_id, "receive loop stopped");
}

// ── Workers ─────────────────────────────────────────────────────────

struct WorkerContext {
    parser: QueryParser,
    engine: Arc<FilterEngine>,
    metrics: Arc<dyn MetricsPort>,
    handler: Option<Arc<dyn ResponseHandler>>,
    response: ResponseOptions,
    /// Reused across packets; holds the outgoing DNS payload.
    response_buf: Vec<u8>,
}

fn worker_loop(id: usize, rx: &Receiver<RxPacket>, ctx: &mut WorkerContext, cancel: &CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            // Drain whatever is already queued, then stop.
            while let Ok(pkt) = rx.try_recv() {
                process_packet(pkt, ctx);
            }
            break;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(pkt) => process_packet(pkt, ctx),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = id, "worker stopped");
}

/// What the worker should do with the frame after classification.
#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    /// Return the frame to the free pool; nothing to send.
    Recycle,
    /// The response buffer holds a DNS payload to reflect back.
    Respond,
}

fn process_packet(pkt: RxPacket, ctx: &mut WorkerContext) {
    let disposition = {
        let data = pkt.socket.frame(&pkt.frame);
        classify(
            data,
            &mut ctx.parser,
            &ctx.engine,
            ctx.metrics.as_ref(),
            &ctx.response,
            ctx.handler.as_deref(),
            &mut ctx.response_buf,
        )
    };

    match disposition {
        Disposition::Recycle => pkt.socket.recycle(pkt.frame),
        Disposition::Respond => send_response(pkt, ctx),
    }
}

/// Classify one frame and, when called for, prepare the DNS response
/// payload in `response`.
///
/// Counter semantics: `received` counts successfully parsed messages;
/// malformed L2–L4 frames are dropped silently; parse failures count
/// `parse_errors`; responses (QR=1) are discarded after `received`.
fn classify(
    data: &[u8],
    parser: &mut QueryParser,
    engine: &FilterEngine,
    metrics: &dyn MetricsPort,
    opts: &ResponseOptions,
    handler: Option<&dyn ResponseHandler>,
    response: &mut Vec<u8>,
) -> Disposition {
    let Ok(decoded) = decode_udp(data) else {
        return Disposition::Recycle;
    };
    let payload = &data[decoded.payload.clone()];

    let msg = match parser.parse(payload) {
        Ok(msg) => msg,
        Err(_) => {
            metrics.record_parse_error();
            return Disposition::Recycle;
        }
    };
    metrics.record_received();

    if !msg.is_query() {
        return Disposition::Recycle;
    }

    let verdict = engine.check(msg.question.name, msg.question.qtype);
    match verdict.action {
        Action::Allow => metrics.record_allowed(),
        Action::Block => {
            metrics.record_blocked();
            if let Some(rule) = verdict.rule {
                warn!(
                    domain = msg.question.name,
                    rule = %rule.id,
                    src = %decoded.info.src_ip,
                    query_type = %msg.qtype().name(),
                    "threat detected"
                );
            }
        }
        Action::Log => {
            metrics.record_logged();
            info!(
                domain = msg.question.name,
                src = %decoded.info.src_ip,
                src_port = decoded.info.src_port,
                dst = %decoded.info.dst_ip,
                dst_port = decoded.info.dst_port,
                query_type = %msg.qtype().name(),
                "suspicious query"
            );
        }
    }

    // The handler, when present, is consulted first; a payload from it
    // supersedes the default behavior.
    if let Some(handler) = handler {
        if let Some(payload) = handler.handle(&msg, verdict.action, verdict.rule, &decoded.info) {
            response.clear();
            response.extend_from_slice(&payload);
            return Disposition::Respond;
        }
    }

    if verdict.action == Action::Block
        && opts.block_response
        && build_block_response(msg.raw, opts.nxdomain, response).is_ok()
    {
        return Disposition::Respond;
    }

    Disposition::Recycle
}

/// Reflect the prepared response into a TX frame and hand it to the
/// kernel; the original frame goes back to the free pool either way.
fn send_response(pkt: RxPacket, ctx: &mut WorkerContext) {
    let Some(mut tx_frame) = pkt.socket.alloc_frame() else {
        warn!(queue_id = pkt.queue_id, "no free frame for response");
        ctx.metrics.record_dropped();
        pkt.socket.recycle(pkt.frame);
        return;
    };

    let built = {
        let orig = pkt.socket.frame(&pkt.frame);
        let out = pkt.socket.frame_mut(&mut tx_frame);
        build_response(orig, &ctx.response_buf, out)
    };

    match built {
        Ok(len) => match pkt.socket.transmit(tx_frame, len as u32) {
            Ok(()) => {
                pkt.socket.recycle(pkt.frame);
                // Reclaim any frames the kernel has finished sending.
                pkt.socket.complete();
            }
            Err(returned) => {
                warn!(queue_id = pkt.queue_id, "TX ring full, dropping response");
                ctx.metrics.record_dropped();
                pkt.socket.recycle(returned);
                pkt.socket.recycle(pkt.frame);
            }
        },
        Err(e) => {
            warn!(queue_id = pkt.queue_id, error = %e, "response build failed");
            pkt.socket.recycle(tx_frame);
            pkt.socket.recycle(pkt.frame);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use domain::common::entity::RuleId;
    use domain::dns::entity::{DnsMessage, FLAG_AA, FLAG_QR};
    use domain::filter::entity::{DomainPattern, Rule};
    use domain::packet::decoder::PacketInfo;

    use super::*;

    // ── Fixtures ───────────────────────────────────────────────────

    #[derive(Default)]
    struct CountingMetrics {
        received: AtomicU64,
        allowed: AtomicU64,
        blocked: AtomicU64,
        logged: AtomicU64,
        dropped: AtomicU64,
        parse_errors: AtomicU64,
    }

    impl MetricsPort for CountingMetrics {
        fn record_received(&self) {
            self.received.fetch_add(1, Ordering::Relaxed);
        }
        fn record_allowed(&self) {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        }
        fn record_blocked(&self) {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
        fn record_logged(&self) {
            self.logged.fetch_add(1, Ordering::Relaxed);
        }
        fn record_dropped(&self) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        fn record_parse_error(&self) {
            self.parse_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn encode_name(domain: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        for label in domain.split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf
    }

    fn build_query(id: u16, domain: &str, qtype: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&[0u8; 6]);
        buf.extend(encode_name(domain));
        buf.extend_from_slice(&qtype.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf
    }

    fn build_ipv4_frame(dns: &[u8]) -> Vec<u8> {
        let udp_len = 8 + dns.len();
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0xBB; 6]); // dst mac
        frame.extend_from_slice(&[0xAA; 6]); // src mac
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.push(0x45);
        frame.push(0);
        frame.extend_from_slice(&((20 + udp_len) as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.push(64);
        frame.push(17);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&[192, 168, 0, 10]); // src ip
        frame.extend_from_slice(&[10, 0, 0, 53]); // dst ip
        frame.extend_from_slice(&33333u16.to_be_bytes());
        frame.extend_from_slice(&53u16.to_be_bytes());
        frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(dns);
        frame
    }

    fn build_ipv6_frame(dns: &[u8]) -> Vec<u8> {
        let udp_len = 8 + dns.len();
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x02; 6]);
        frame.extend_from_slice(&[0x01; 6]);
        frame.extend_from_slice(&0x86DDu16.to_be_bytes());
        frame.push(0x60);
        frame.extend_from_slice(&[0, 0, 0]);
        frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
        frame.push(17);
        frame.push(64);
        frame.extend_from_slice(&[0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        frame.extend_from_slice(&[0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        frame.extend_from_slice(&40000u16.to_be_bytes());
        frame.extend_from_slice(&53u16.to_be_bytes());
        frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(dns);
        frame
    }

    fn make_rule(id: &str, priority: i32, action: Action, domains: &[&str]) -> Rule {
        Rule {
            id: RuleId(id.to_string()),
            priority,
            enabled: true,
            action,
            domains: domains
                .iter()
                .map(|d| DomainPattern::parse(d).unwrap())
                .collect(),
            query_types: Vec::new(),
            description: String::new(),
        }
    }

    struct Harness {
        parser: QueryParser,
        engine: Arc<FilterEngine>,
        metrics: CountingMetrics,
        response: Vec<u8>,
    }

    impl Harness {
        fn new(rules: Vec<Rule>) -> Self {
            Self {
                parser: QueryParser::new(),
                engine: Arc::new(FilterEngine::new(rules).unwrap()),
                metrics: CountingMetrics::default(),
                response: Vec::new(),
            }
        }

        fn run(&mut self, frame: &[u8], opts: ResponseOptions) -> Disposition {
            classify(
                frame,
                &mut self.parser,
                &self.engine,
                &self.metrics,
                &opts,
                None,
                &mut self.response,
            )
        }
    }

    const MONITOR: ResponseOptions = ResponseOptions {
        block_response: false,
        nxdomain: true,
    };
    const RESPOND_NX: ResponseOptions = ResponseOptions {
        block_response: true,
        nxdomain: true,
    };
    const RESPOND_REFUSED: ResponseOptions = ResponseOptions {
        block_response: true,
        nxdomain: false,
    };

    // ── Scenario: allowed query ────────────────────────────────────

    #[test]
    fn allowed_query_is_counted_and_recycled() {
        let mut h = Harness::new(vec![]);
        let frame = build_ipv4_frame(&build_query(1, "www.example.com", 1));
        let d = h.run(&frame, RESPOND_NX);
        assert_eq!(d, Disposition::Recycle);
        assert_eq!(h.metrics.received.load(Ordering::Relaxed), 1);
        assert_eq!(h.metrics.allowed.load(Ordering::Relaxed), 1);
        assert_eq!(h.metrics.blocked.load(Ordering::Relaxed), 0);
    }

    // ── Scenario: blocked query with NXDOMAIN response ─────────────

    #[test]
    fn blocked_query_produces_nxdomain_payload() {
        let mut h = Harness::new(vec![make_rule(
            "block-bad",
            100,
            Action::Block,
            &["*.bad.com"],
        )]);
        let query = build_query(0x1234, "malware.bad.com", 1);
        let frame = build_ipv4_frame(&query);

        let d = h.run(&frame, RESPOND_NX);
        assert_eq!(d, Disposition::Respond);
        assert_eq!(h.metrics.blocked.load(Ordering::Relaxed), 1);

        let resp = &h.response;
        assert_eq!(&resp[0..2], &0x1234u16.to_be_bytes());
        let flags = u16::from_be_bytes([resp[2], resp[3]]);
        assert_ne!(flags & FLAG_QR, 0);
        assert_ne!(flags & FLAG_AA, 0);
        assert_eq!(flags & 0x000F, 3, "NXDOMAIN");
        // Question preserved.
        assert_eq!(&resp[12..], &query[12..]);
    }

    #[test]
    fn blocked_query_without_response_config_recycles() {
        let mut h = Harness::new(vec![make_rule("b", 10, Action::Block, &["*"])]);
        let frame = build_ipv4_frame(&build_query(1, "x.test", 1));
        assert_eq!(h.run(&frame, MONITOR), Disposition::Recycle);
        assert_eq!(h.metrics.blocked.load(Ordering::Relaxed), 1);
    }

    // ── Scenario: priority beats catch-all ─────────────────────────

    #[test]
    fn log_rule_outranks_lower_priority_block() {
        let mut txt_rule = make_rule("log-txt", 50, Action::Log, &["*.dyndns.org"]);
        txt_rule.query_types = vec![16];
        let rules = vec![txt_rule, make_rule("block-all", 10, Action::Block, &["*"])];
        let mut h = Harness::new(rules);

        let frame = build_ipv4_frame(&build_query(7, "host.dyndns.org", 16));
        assert_eq!(h.run(&frame, RESPOND_NX), Disposition::Recycle);
        assert_eq!(h.metrics.logged.load(Ordering::Relaxed), 1);
        assert_eq!(h.metrics.blocked.load(Ordering::Relaxed), 0);
    }

    // ── Scenario: IPv6 REFUSED ─────────────────────────────────────

    #[test]
    fn ipv6_block_produces_refused_payload() {
        let mut h = Harness::new(vec![make_rule("b", 10, Action::Block, &["a.test"])]);
        let frame = build_ipv6_frame(&build_query(2, "a.test", 28));

        let d = h.run(&frame, RESPOND_REFUSED);
        assert_eq!(d, Disposition::Respond);
        let flags = u16::from_be_bytes([h.response[2], h.response[3]]);
        assert_eq!(flags & 0x000F, 5, "REFUSED");
    }

    // ── Scenario: truncated payload ────────────────────────────────

    #[test]
    fn truncated_dns_counts_parse_error() {
        let mut h = Harness::new(vec![]);
        let frame = build_ipv4_frame(&[0u8; 8]); // 8 bytes of DNS, no question
        assert_eq!(h.run(&frame, RESPOND_NX), Disposition::Recycle);
        assert_eq!(h.metrics.parse_errors.load(Ordering::Relaxed), 1);
        assert_eq!(h.metrics.received.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn malformed_l2_is_silently_dropped() {
        let mut h = Harness::new(vec![]);
        let mut frame = build_ipv4_frame(&build_query(1, "x.test", 1));
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes()); // ARP
        assert_eq!(h.run(&frame, RESPOND_NX), Disposition::Recycle);
        assert_eq!(h.metrics.parse_errors.load(Ordering::Relaxed), 0);
        assert_eq!(h.metrics.received.load(Ordering::Relaxed), 0);
    }

    // ── Responses (QR=1) are discarded ─────────────────────────────

    #[test]
    fn dns_responses_are_not_classified() {
        let mut h = Harness::new(vec![make_rule("b", 10, Action::Block, &["*"])]);
        let mut query = build_query(1, "x.test", 1);
        query[2] |= (FLAG_QR >> 8) as u8;
        let frame = build_ipv4_frame(&query);
        assert_eq!(h.run(&frame, RESPOND_NX), Disposition::Recycle);
        assert_eq!(h.metrics.received.load(Ordering::Relaxed), 1);
        assert_eq!(h.metrics.blocked.load(Ordering::Relaxed), 0);
    }

    // ── Response handler precedence ────────────────────────────────

    struct FixedHandler(Vec<u8>);

    impl ResponseHandler for FixedHandler {
        fn handle(
            &self,
            _query: &DnsMessage<'_>,
            _action: Action,
            _rule: Option<&Rule>,
            _info: &PacketInfo,
        ) -> Option<Vec<u8>> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn handler_payload_supersedes_default() {
        let engine =
            Arc::new(FilterEngine::new(vec![make_rule("b", 10, Action::Block, &["*"])]).unwrap());
        let metrics = CountingMetrics::default();
        let mut parser = QueryParser::new();
        let mut response = Vec::new();
        let handler = FixedHandler(vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let frame = build_ipv4_frame(&build_query(1, "x.test", 1));
        let d = classify(
            &frame,
            &mut parser,
            &engine,
            &metrics,
            &MONITOR, // default would not respond
            Some(&handler),
            &mut response,
        );
        assert_eq!(d, Disposition::Respond);
        assert_eq!(response, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(metrics.blocked.load(Ordering::Relaxed), 1);
    }
}
