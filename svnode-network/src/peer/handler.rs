//! Per-connection message handlers.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use chrono::{TimeZone, Utc};
use tokio_util::codec::Encoder;

use svnode_chain::{
    block::{Block, CountedHeader},
    transaction::Transaction,
};

use crate::{
    protocol::external::{
        codec::CodecError,
        types::{Nonce, PeerServices, Version},
        AddrInVersion, AssociationId, AssociationIdField, BlockLocator, BlockTransactions,
        BlockTransactionsRequest, CreateStream, DataRefTx, DsDetected, FilterLoad,
        HeaderAndShortIds, InventoryHash, MerkleBlock, Message, Protoconf, Reject, SendCmpct,
        StreamAck, TimestampedAddr, VersionMessage,
    },
    Config,
};

use super::{
    connection::ConnectionCore, CloseReason, Direction, PeerInfo, PeerObserver,
};

/// What a handler can do to the connection that received a message.
///
/// Handlers run on the reactor thread, so everything here is non-blocking:
/// [`PeerContext::send`] only appends to the connection's send buffer.
pub struct PeerContext<'a> {
    core: &'a mut ConnectionCore,
}

impl<'a> PeerContext<'a> {
    pub(super) fn new(core: &'a mut ConnectionCore) -> PeerContext<'a> {
        PeerContext { core }
    }

    /// Frames `msg` and queues it for sending.
    ///
    /// On error, nothing is queued. The reactor closes the connection if a
    /// handler returns the error.
    pub fn send(&mut self, msg: Message) -> Result<(), CodecError> {
        trace!(%msg, "queueing message");
        self.core.codec.encode(&msg, &mut self.core.send_buf)
    }

    /// Asks the reactor to close the connection once the queued messages are
    /// sent. No further messages are dispatched to the handler.
    pub fn disconnect(&mut self) {
        debug!("handler requested disconnect");
        self.core.disconnect = true;
    }

    /// Returns the identity of this connection.
    pub fn info(&self) -> &PeerInfo {
        &self.core.info
    }

    /// Returns the reactor configuration.
    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// Returns the observer that test threads use to watch this connection.
    pub fn observer(&self) -> &PeerObserver {
        &self.core.observer
    }

    /// Switches the codec to `version`, and publishes it to observers.
    pub fn set_negotiated_version(&mut self, version: Version) {
        self.core.codec.reconfigure_version(version);
        self.core
            .observer
            .update(|state| state.negotiated_version = Some(version));
    }

    /// Records the association this connection belongs to.
    pub fn set_association_id(&mut self, id: AssociationId) {
        self.core
            .observer
            .update(|state| state.association_id = Some(id));
    }

    /// Returns a `version` message describing this side of the connection.
    pub fn local_version(&self, association_id: AssociationIdField) -> VersionMessage {
        let config = self.config();
        let services = PeerServices::NODE_NETWORK;
        let local_addr = self
            .core
            .local_addr
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));

        VersionMessage {
            version: config.protocol_version,
            services,
            // The wire format only has whole seconds.
            timestamp: Utc
                .timestamp_opt(Utc::now().timestamp(), 0)
                .single()
                .unwrap_or_else(Utc::now),
            address_recv: AddrInVersion::new(self.core.info.remote_addr, services),
            address_from: AddrInVersion::new(local_addr, services),
            nonce: Nonce::default(),
            user_agent: config.user_agent.clone(),
            start_height: config.start_height,
            relay: config.relay,
            association_id,
        }
    }

    /// Returns the `protoconf` this side advertises.
    pub fn protoconf(&self) -> Protoconf {
        self.config().protoconf()
    }

    /// Completes the handshake for a received `version`.
    ///
    /// Inbound connections reply with our own `version` first. Then this side
    /// sends `verack` and `protoconf`, speaks the lower of the two protocol
    /// versions, and adopts the peer's association id if it sent one.
    pub fn answer_version(&mut self, version: &VersionMessage) -> Result<(), CodecError> {
        self.answer_version_with(version, AssociationIdField::Omitted)
    }

    /// Like [`PeerContext::answer_version`], but an inbound reply carries
    /// `reply_association`.
    pub fn answer_version_with(
        &mut self,
        version: &VersionMessage,
        reply_association: AssociationIdField,
    ) -> Result<(), CodecError> {
        let negotiated = Version::negotiate(self.config().protocol_version, version.version);

        if self.info().direction == Direction::Inbound {
            let reply = self.local_version(reply_association);
            self.send(Message::Version(reply))?;
        }
        self.send(Message::Verack)?;
        self.set_negotiated_version(negotiated);

        let protoconf = self.protoconf();
        self.send(Message::Protoconf(protoconf))?;

        if let AssociationIdField::Id(id) = version.association_id {
            self.set_association_id(id);
        }

        Ok(())
    }

    /// Requests every announced item, skipping error entries.
    pub fn request_inventory(&mut self, hashes: &[InventoryHash]) -> Result<(), CodecError> {
        let wanted: Vec<InventoryHash> = hashes
            .iter()
            .filter(|hash| **hash != InventoryHash::Error)
            .copied()
            .collect();

        if wanted.is_empty() {
            return Ok(());
        }
        self.send(Message::GetData(wanted))
    }
}

/// Reacts to the messages received on one connection.
///
/// Every method has a default. The defaults keep a connection healthy from
/// the node's point of view: they complete the `version` handshake, answer
/// `ping` and request announced inventory. Everything else is ignored.
/// Whatever the handler does, the connection's [`PeerObserver`] records
/// every message after the handler returns.
///
/// Handlers run on the reactor thread, and must not block.
///
/// An error returned from a handler closes the connection.
#[allow(unused_variables)]
pub trait PeerHandler: Send + 'static {
    /// Called once the TCP connection is established and the opening
    /// message, if any, is queued.
    fn on_open(&mut self, ctx: &mut PeerContext<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    /// Called once when the connection closes, or fails to open.
    fn on_close(&mut self, ctx: &mut PeerContext<'_>, reason: &CloseReason) {}

    /// `version`: completes the handshake.
    fn on_version(
        &mut self,
        ctx: &mut PeerContext<'_>,
        version: VersionMessage,
    ) -> Result<(), CodecError> {
        ctx.answer_version(&version)
    }

    /// `verack`
    fn on_verack(&mut self, ctx: &mut PeerContext<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    /// `ping`: replies with a `pong` carrying the same nonce.
    fn on_ping(&mut self, ctx: &mut PeerContext<'_>, nonce: Nonce) -> Result<(), CodecError> {
        ctx.send(Message::Pong(nonce))
    }

    /// `pong`
    fn on_pong(&mut self, ctx: &mut PeerContext<'_>, nonce: Nonce) -> Result<(), CodecError> {
        Ok(())
    }

    /// `reject`
    fn on_reject(&mut self, ctx: &mut PeerContext<'_>, reject: Reject) -> Result<(), CodecError> {
        Ok(())
    }

    /// `getaddr`
    fn on_getaddr(&mut self, ctx: &mut PeerContext<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    /// `addr`
    fn on_addr(
        &mut self,
        ctx: &mut PeerContext<'_>,
        addrs: Vec<TimestampedAddr>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `alert`
    fn on_alert(
        &mut self,
        ctx: &mut PeerContext<'_>,
        payload: Vec<u8>,
        signature: Vec<u8>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `inv`: requests every announced item with `getdata`.
    fn on_inv(
        &mut self,
        ctx: &mut PeerContext<'_>,
        hashes: Vec<InventoryHash>,
    ) -> Result<(), CodecError> {
        ctx.request_inventory(&hashes)
    }

    /// `getdata`
    fn on_getdata(
        &mut self,
        ctx: &mut PeerContext<'_>,
        hashes: Vec<InventoryHash>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `notfound`
    fn on_notfound(
        &mut self,
        ctx: &mut PeerContext<'_>,
        hashes: Vec<InventoryHash>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `getblocks`
    fn on_getblocks(
        &mut self,
        ctx: &mut PeerContext<'_>,
        locator: BlockLocator,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `getheaders`
    fn on_getheaders(
        &mut self,
        ctx: &mut PeerContext<'_>,
        locator: BlockLocator,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `headers`
    fn on_headers(
        &mut self,
        ctx: &mut PeerContext<'_>,
        headers: Vec<CountedHeader>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `block`
    fn on_block(&mut self, ctx: &mut PeerContext<'_>, block: Arc<Block>) -> Result<(), CodecError> {
        Ok(())
    }

    /// `tx`
    fn on_tx(
        &mut self,
        ctx: &mut PeerContext<'_>,
        transaction: Arc<Transaction>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `mempool`
    fn on_mempool(&mut self, ctx: &mut PeerContext<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    /// `sendheaders`
    fn on_sendheaders(&mut self, ctx: &mut PeerContext<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    /// `feefilter`
    fn on_feefilter(&mut self, ctx: &mut PeerContext<'_>, fee_rate: i64) -> Result<(), CodecError> {
        Ok(())
    }

    /// `sendcmpct`
    fn on_sendcmpct(
        &mut self,
        ctx: &mut PeerContext<'_>,
        send_cmpct: SendCmpct,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `cmpctblock`
    fn on_cmpctblock(
        &mut self,
        ctx: &mut PeerContext<'_>,
        compact: HeaderAndShortIds,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `getblocktxn`
    fn on_getblocktxn(
        &mut self,
        ctx: &mut PeerContext<'_>,
        request: BlockTransactionsRequest,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `blocktxn`
    fn on_blocktxn(
        &mut self,
        ctx: &mut PeerContext<'_>,
        transactions: BlockTransactions,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `merkleblock`
    fn on_merkleblock(
        &mut self,
        ctx: &mut PeerContext<'_>,
        merkle_block: MerkleBlock,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `filterload`
    fn on_filterload(
        &mut self,
        ctx: &mut PeerContext<'_>,
        filter_load: FilterLoad,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `filteradd`
    fn on_filteradd(&mut self, ctx: &mut PeerContext<'_>, data: Vec<u8>) -> Result<(), CodecError> {
        Ok(())
    }

    /// `filterclear`
    fn on_filterclear(&mut self, ctx: &mut PeerContext<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    /// `protoconf`
    fn on_protoconf(
        &mut self,
        ctx: &mut PeerContext<'_>,
        protoconf: Protoconf,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `createstrm`
    fn on_createstream(
        &mut self,
        ctx: &mut PeerContext<'_>,
        create: CreateStream,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `streamack`
    fn on_streamack(&mut self, ctx: &mut PeerContext<'_>, ack: StreamAck) -> Result<(), CodecError> {
        Ok(())
    }

    /// `dsdetected`
    fn on_dsdetected(
        &mut self,
        ctx: &mut PeerContext<'_>,
        detected: DsDetected,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `datareftx`
    fn on_datareftx(
        &mut self,
        ctx: &mut PeerContext<'_>,
        data_ref: DataRefTx,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `authch`
    fn on_authch(
        &mut self,
        ctx: &mut PeerContext<'_>,
        version: i32,
        message: Vec<u8>,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// `authresp`
    fn on_authresp(
        &mut self,
        ctx: &mut PeerContext<'_>,
        public_key: Vec<u8>,
        client_nonce: u64,
        signature: Vec<u8>,
    ) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Calls the `handler` method for `msg`.
pub(super) fn dispatch(
    handler: &mut dyn PeerHandler,
    ctx: &mut PeerContext<'_>,
    msg: Message,
) -> Result<(), CodecError> {
    match msg {
        Message::Version(version) => handler.on_version(ctx, version),
        Message::Verack => handler.on_verack(ctx),
        Message::Ping(nonce) => handler.on_ping(ctx, nonce),
        Message::Pong(nonce) => handler.on_pong(ctx, nonce),
        Message::Reject(reject) => handler.on_reject(ctx, reject),
        Message::GetAddr => handler.on_getaddr(ctx),
        Message::Addr(addrs) => handler.on_addr(ctx, addrs),
        Message::Alert { payload, signature } => handler.on_alert(ctx, payload, signature),
        Message::Inv(hashes) => handler.on_inv(ctx, hashes),
        Message::GetData(hashes) => handler.on_getdata(ctx, hashes),
        Message::NotFound(hashes) => handler.on_notfound(ctx, hashes),
        Message::GetBlocks(locator) => handler.on_getblocks(ctx, locator),
        Message::GetHeaders(locator) => handler.on_getheaders(ctx, locator),
        Message::Headers(headers) => handler.on_headers(ctx, headers),
        Message::Block(block) => handler.on_block(ctx, block),
        Message::Tx(transaction) => handler.on_tx(ctx, transaction),
        Message::Mempool => handler.on_mempool(ctx),
        Message::SendHeaders => handler.on_sendheaders(ctx),
        Message::FeeFilter(fee_rate) => handler.on_feefilter(ctx, fee_rate),
        Message::SendCmpct(send_cmpct) => handler.on_sendcmpct(ctx, send_cmpct),
        Message::CmpctBlock(compact) => handler.on_cmpctblock(ctx, compact),
        Message::GetBlockTxn(request) => handler.on_getblocktxn(ctx, request),
        Message::BlockTxn(transactions) => handler.on_blocktxn(ctx, transactions),
        Message::MerkleBlock(merkle_block) => handler.on_merkleblock(ctx, merkle_block),
        Message::FilterLoad(filter_load) => handler.on_filterload(ctx, filter_load),
        Message::FilterAdd { data } => handler.on_filteradd(ctx, data),
        Message::FilterClear => handler.on_filterclear(ctx),
        Message::Protoconf(protoconf) => handler.on_protoconf(ctx, protoconf),
        Message::CreateStream(create) => handler.on_createstream(ctx, create),
        Message::StreamAck(ack) => handler.on_streamack(ctx, ack),
        Message::DsDetected(detected) => handler.on_dsdetected(ctx, detected),
        Message::DataRefTx(data_ref) => handler.on_datareftx(ctx, data_ref),
        Message::AuthCh { version, message } => handler.on_authch(ctx, version, message),
        Message::AuthResp {
            public_key,
            client_nonce,
            signature,
        } => handler.on_authresp(ctx, public_key, client_nonce, signature),
    }
}

/// A handler that only does what the protocol requires of a peer.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultHandler;

impl PeerHandler for DefaultHandler {}

/// A handler that never replies.
///
/// The connection still records every message, so tests can drive the
/// handshake and every reply by hand.
#[derive(Copy, Clone, Debug, Default)]
pub struct SilentHandler;

impl PeerHandler for SilentHandler {
    fn on_version(
        &mut self,
        _ctx: &mut PeerContext<'_>,
        _version: VersionMessage,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    fn on_ping(&mut self, _ctx: &mut PeerContext<'_>, _nonce: Nonce) -> Result<(), CodecError> {
        Ok(())
    }

    fn on_inv(
        &mut self,
        _ctx: &mut PeerContext<'_>,
        _hashes: Vec<InventoryHash>,
    ) -> Result<(), CodecError> {
        Ok(())
    }
}
