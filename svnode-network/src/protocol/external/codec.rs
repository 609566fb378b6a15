//! A Tokio codec mapping byte streams to Bitcoin SV message streams.

use std::{
    cmp::min,
    fmt,
    io::{self, Cursor, Read, Write},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use chrono::{TimeZone, Utc};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use svnode_chain::{
    block,
    serialization::{
        sha256d, sv_deserialize_bytes_external_count, sv_serialize_bytes, FakeWriter, ReadSvExt,
        SerializationError as Error, SvDeserialize, SvDeserializeInto, SvSerialize, WriteSvExt,
        MAX_PROTOCOL_MESSAGE_LEN,
    },
};

use crate::{
    constants::{
        self, EXTENDED_HEADER_LEN, EXTENDED_LENGTH_MARKER, EXTENDED_MESSAGE_VERSION, HEADER_LEN,
    },
    parameters::Network,
    Config,
};

use super::{
    addr::TimestampedAddr,
    association::{AssociationId, AssociationIdField},
    command::{Command, EXTMSG_COMMAND},
    message::*,
    types::*,
};

#[cfg(test)]
mod tests;

/// A framing or payload error. Every `CodecError` is fatal to the
/// connection it happened on: once the two sides disagree about framing,
/// there is no way to find the next message boundary.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Reading or writing the underlying buffer failed.
    #[error("codec i/o error: {0}")]
    Io(#[from] io::Error),

    /// The frame started with another network's magic.
    #[error("bad network magic {actual:?}, expected {expected:?}")]
    BadMagic {
        /// The magic of the configured network.
        expected: Magic,
        /// The magic in the frame header.
        actual: Magic,
    },

    /// The payload doesn't match the header checksum.
    #[error("{command} message checksum does not match its payload")]
    BadChecksum {
        /// The command in the frame header.
        command: Command,
    },

    /// The frame header names a command this crate doesn't know.
    #[error("unknown message command {0:?}")]
    UnknownCommand(String),

    /// The payload is longer than the configured limit.
    #[error("{command} payload of {len} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge {
        /// The command of the message.
        command: String,
        /// The payload length.
        len: u64,
        /// The configured limit.
        max: u64,
    },

    /// An `extmsg` frame was needed or received, but the negotiated protocol
    /// version predates extended framing.
    #[error(
        "extended message framing needs protocol version {}, negotiated {version}",
        EXTENDED_MESSAGE_VERSION.0
    )]
    ExtendedNotNegotiated {
        /// The protocol version in use.
        version: Version,
    },

    /// The payload could not be parsed as its command's message.
    #[error("malformed {command} payload: {source}")]
    Payload {
        /// The command in the frame header.
        command: Command,
        /// The parse failure, naming the offending field.
        #[source]
        source: Error,
    },
}

/// A codec which produces Bitcoin SV messages from byte streams and vice versa.
pub struct Codec {
    builder: Builder,
    state: DecodeState,
}

/// A builder for specifying [`Codec`] options.
pub struct Builder {
    /// The network magic to use in encoding.
    network: Network,
    /// The protocol version to speak when encoding/decoding.
    version: Version,
    /// The maximum allowable message length.
    max_len: usize,
    /// Payloads at least this long are sent with `extmsg` framing.
    extended_threshold: u64,
}

impl Codec {
    /// Return a builder for constructing a [`Codec`].
    pub fn builder() -> Builder {
        Builder {
            network: Network::Regtest,
            version: constants::CURRENT_NETWORK_PROTOCOL_VERSION,
            max_len: MAX_PROTOCOL_MESSAGE_LEN,
            extended_threshold: constants::DEFAULT_EXTENDED_MESSAGE_THRESHOLD,
        }
    }

    /// Returns a codec with the network, version and limits in `config`.
    pub fn for_config(config: &Config) -> Codec {
        Codec::builder()
            .for_network(config.network)
            .for_version(config.protocol_version)
            .with_max_body_len(config.max_payload_len)
            .with_extended_threshold(config.extended_message_threshold)
            .finish()
    }

    /// Reconfigure the version used by the codec, e.g., after completing a handshake.
    pub fn reconfigure_version(&mut self, version: Version) {
        self.builder.version = version;
    }

    /// Returns the version the codec currently speaks.
    pub fn version(&self) -> Version {
        self.builder.version
    }
}

impl Builder {
    /// Finalize the builder and return a [`Codec`].
    pub fn finish(self) -> Codec {
        Codec {
            builder: self,
            state: DecodeState::Head,
        }
    }

    /// Configure the codec for the given [`Network`].
    pub fn for_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Configure the codec for the given [`Version`].
    pub fn for_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Configure the codec's maximum accepted payload size, in bytes.
    pub fn with_max_body_len(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }

    /// Configure the payload size from which `extmsg` framing is used.
    pub fn with_extended_threshold(mut self, threshold: u64) -> Self {
        self.extended_threshold = threshold;
        self
    }
}

// ======== Encoding =========

impl Encoder<Message> for Codec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_message(&item, dst)
    }
}

impl<'a> Encoder<&'a Message> for Codec {
    type Error = CodecError;

    fn encode(&mut self, item: &'a Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_message(item, dst)
    }
}

impl Codec {
    /// Frames `item` and appends it to `dst`.
    ///
    /// On error, nothing is appended.
    fn encode_message(&self, item: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let command = item.command();
        let body_length = self.body_length(item)?;

        if body_length > self.builder.max_len {
            return Err(CodecError::PayloadTooLarge {
                command: command.to_string(),
                len: body_length as u64,
                max: self.builder.max_len as u64,
            });
        }

        // Legacy headers can't describe a payload of 0xffffffff bytes or more.
        let threshold = min(
            self.builder.extended_threshold,
            EXTENDED_LENGTH_MARKER as u64,
        );
        let extended = body_length as u64 >= threshold;
        if extended && self.builder.version < EXTENDED_MESSAGE_VERSION {
            return Err(CodecError::ExtendedNotNegotiated {
                version: self.builder.version,
            });
        }
        trace!(%item, len = body_length, extended);

        let header_len = if extended {
            EXTENDED_HEADER_LEN
        } else {
            HEADER_LEN
        };
        dst.reserve(header_len + body_length);
        let start_len = dst.len();
        let result = self.write_frame(item, command, body_length, extended, dst);
        if let Err(error) = result {
            dst.truncate(start_len);
            return Err(error.into());
        }

        if !extended {
            let checksum = sha256d::Checksum::from(&dst[start_len + HEADER_LEN..]);
            dst[start_len + 20..][..4].copy_from_slice(&checksum.0);
        }

        Ok(())
    }

    fn write_frame(
        &self,
        item: &Message,
        command: Command,
        body_length: usize,
        extended: bool,
        dst: &mut BytesMut,
    ) -> Result<(), io::Error> {
        let dst = &mut dst.writer();
        dst.write_all(&self.builder.network.magic().0[..])?;

        if extended {
            dst.write_all(&EXTMSG_COMMAND)?;
            dst.write_u32::<LittleEndian>(EXTENDED_LENGTH_MARKER)?;
            // Extended frames carry no checksum.
            dst.write_u32::<LittleEndian>(0)?;
            dst.write_all(&command.to_bytes())?;
            dst.write_u64::<LittleEndian>(body_length as u64)?;
        } else {
            dst.write_all(&command.to_bytes())?;
            dst.write_u32::<LittleEndian>(body_length as u32)?;

            // We zero the checksum at first, and compute it later
            // after the body has been written.
            dst.write_u32::<LittleEndian>(0)?;
        }

        self.write_body(item, dst)
    }

    /// Obtain the size of the body of a given message. This will match the
    /// number of bytes written to the writer provided to `write_body` for the
    /// same message.
    fn body_length(&self, msg: &Message) -> Result<usize, io::Error> {
        let mut writer = FakeWriter(0);

        self.write_body(msg, &mut writer)?;
        Ok(writer.0)
    }

    /// Write the body of the message into the given writer. This allows writing
    /// the message body prior to writing the header, so that the header can
    /// contain a checksum of the message body.
    fn write_body<W: Write>(&self, msg: &Message, mut writer: W) -> Result<(), io::Error> {
        match msg {
            Message::Version(version) => {
                writer.write_u32::<LittleEndian>(version.version.0)?;
                writer.write_u64::<LittleEndian>(version.services.bits())?;
                // # Security
                // DateTime<Utc>::timestamp has a smaller range than i64, so
                // serialization can not error.
                writer.write_i64::<LittleEndian>(version.timestamp.timestamp())?;

                version.address_recv.sv_serialize(&mut writer)?;
                version.address_from.sv_serialize(&mut writer)?;

                writer.write_u64::<LittleEndian>(version.nonce.0)?;
                version.user_agent.sv_serialize(&mut writer)?;
                writer.write_i32::<LittleEndian>(version.start_height)?;
                writer.write_u8(version.relay as u8)?;

                match version.association_id {
                    AssociationIdField::Omitted => {}
                    AssociationIdField::Null => AssociationId::write_optional(None, &mut writer)?,
                    AssociationIdField::Id(id) => {
                        AssociationId::write_optional(Some(id), &mut writer)?
                    }
                }
            }
            Message::Verack => { /* Empty payload -- no-op */ }
            Message::Ping(nonce) => {
                writer.write_u64::<LittleEndian>(nonce.0)?;
            }
            Message::Pong(nonce) => {
                writer.write_u64::<LittleEndian>(nonce.0)?;
            }
            Message::Reject(reject) => {
                reject.message.sv_serialize(&mut writer)?;
                writer.write_u8(reject.ccode.code())?;
                reject.reason.sv_serialize(&mut writer)?;
                if let Some(data) = reject.data {
                    writer.write_all(&data)?;
                }
            }
            Message::GetAddr => { /* Empty payload -- no-op */ }
            Message::Addr(addrs) => {
                if addrs.len() > constants::MAX_ADDRS_IN_MESSAGE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "more than MAX_ADDRS_IN_MESSAGE addresses in addr message",
                    ));
                }
                addrs.sv_serialize(&mut writer)?
            }
            Message::Alert { payload, signature } => {
                sv_serialize_bytes(&payload, &mut writer)?;
                sv_serialize_bytes(&signature, &mut writer)?;
            }
            Message::Inv(hashes) => hashes.sv_serialize(&mut writer)?,
            Message::GetData(hashes) => hashes.sv_serialize(&mut writer)?,
            Message::NotFound(hashes) => hashes.sv_serialize(&mut writer)?,
            Message::GetBlocks(locator) | Message::GetHeaders(locator) => {
                writer.write_u32::<LittleEndian>(locator.version.0)?;
                locator.known_blocks.sv_serialize(&mut writer)?;
                locator
                    .stop
                    .unwrap_or(block::Hash([0; 32]))
                    .sv_serialize(&mut writer)?;
            }
            Message::Headers(headers) => headers.sv_serialize(&mut writer)?,
            Message::Block(block) => block.sv_serialize(&mut writer)?,
            Message::Tx(transaction) => transaction.sv_serialize(&mut writer)?,
            Message::Mempool => { /* Empty payload -- no-op */ }
            Message::SendHeaders => { /* Empty payload -- no-op */ }
            Message::FeeFilter(fee_rate) => writer.write_i64::<LittleEndian>(*fee_rate)?,
            Message::SendCmpct(send_cmpct) => send_cmpct.sv_serialize(&mut writer)?,
            Message::CmpctBlock(compact) => compact.sv_serialize(&mut writer)?,
            Message::GetBlockTxn(request) => request.sv_serialize(&mut writer)?,
            Message::BlockTxn(transactions) => transactions.sv_serialize(&mut writer)?,
            Message::MerkleBlock(merkle_block) => {
                merkle_block.header.sv_serialize(&mut writer)?;
                writer.write_u32::<LittleEndian>(merkle_block.total_transactions)?;
                merkle_block.hashes.sv_serialize(&mut writer)?;
                sv_serialize_bytes(&merkle_block.flags, &mut writer)?;
            }
            Message::FilterLoad(filter_load) => {
                sv_serialize_bytes(&filter_load.filter.0, &mut writer)?;
                writer.write_u32::<LittleEndian>(filter_load.hash_functions_count)?;
                writer.write_u32::<LittleEndian>(filter_load.tweak.0)?;
                writer.write_u8(filter_load.flags)?;
            }
            Message::FilterAdd { data } => {
                sv_serialize_bytes(&data, &mut writer)?;
            }
            Message::FilterClear => { /* Empty payload -- no-op */ }
            Message::Protoconf(protoconf) => {
                writer.write_compactsize(protoconf.number_of_fields)?;
                if protoconf.number_of_fields >= 1 {
                    writer.write_u32::<LittleEndian>(protoconf.max_recv_payload_length)?;
                }
                if protoconf.number_of_fields >= 2 {
                    protoconf.stream_policies.sv_serialize(&mut writer)?;
                }
            }
            Message::CreateStream(create) => {
                AssociationId::write_optional(create.association_id, &mut writer)?;
                writer.write_u8(create.stream_type)?;
                create.policy.sv_serialize(&mut writer)?;
            }
            Message::StreamAck(ack) => {
                AssociationId::write_optional(ack.association_id, &mut writer)?;
                writer.write_u8(ack.stream_type)?;
            }
            Message::DsDetected(detected) => {
                writer.write_u16::<LittleEndian>(detected.version)?;
                detected.blocks.sv_serialize(&mut writer)?;
            }
            Message::DataRefTx(data_ref) => {
                data_ref.tx.sv_serialize(&mut writer)?;
                data_ref.proof.sv_serialize(&mut writer)?;
            }
            Message::AuthCh { version, message } => {
                writer.write_i32::<LittleEndian>(*version)?;
                write_u32_prefixed_bytes(message, &mut writer)?;
            }
            Message::AuthResp {
                public_key,
                client_nonce,
                signature,
            } => {
                write_u32_prefixed_bytes(public_key, &mut writer)?;
                writer.write_u64::<LittleEndian>(*client_nonce)?;
                write_u32_prefixed_bytes(signature, &mut writer)?;
            }
        }
        Ok(())
    }
}

/// Byte strings in `authch` and `authresp` have a 4-byte length prefix.
fn write_u32_prefixed_bytes<W: Write>(bytes: &[u8], mut writer: W) -> Result<(), io::Error> {
    let len = u32::try_from(bytes.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "byte string too long for a 32-bit length",
        )
    })?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(bytes)
}

fn read_u32_prefixed_bytes<R: Read>(mut reader: R) -> Result<Vec<u8>, Error> {
    let len = reader.read_u32::<LittleEndian>()?.try_into()?;
    sv_deserialize_bytes_external_count(len, reader)
}

// ======== Decoding =========

enum DecodeState {
    Head,
    ExtendedHead,
    Body {
        body_len: usize,
        command: Command,
        checksum: Option<sha256d::Checksum>,
    },
}

impl fmt::Debug for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeState::Head => write!(f, "DecodeState::Head"),
            DecodeState::ExtendedHead => write!(f, "DecodeState::ExtendedHead"),
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => f
                .debug_struct("DecodeState::Body")
                .field("body_len", &body_len)
                .field("command", &command)
                .field("checksum", &checksum)
                .finish(),
        }
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.state {
            DecodeState::Head => {
                // First check that the src buffer contains an entire header.
                if src.len() < HEADER_LEN {
                    trace!(?self.state, "src buffer does not have an entire header, waiting");
                    // Signal that decoding requires more data.
                    return Ok(None);
                }

                // Now that we know that src contains a header, split off the header section.
                let header = src.split_to(HEADER_LEN);

                // Create a cursor over the header and parse its fields.
                let mut header_reader = Cursor::new(&header);
                let magic = Magic(header_reader.read_4_bytes()?);
                let command = header_reader.read_12_bytes()?;
                let body_len = header_reader.read_u32::<LittleEndian>()?;
                let checksum = sha256d::Checksum(header_reader.read_4_bytes()?);
                trace!(
                    ?self.state,
                    ?magic,
                    command = %Command::escape_bytes(&command),
                    body_len,
                    ?checksum,
                    "read header from src buffer"
                );

                let expected = self.builder.network.magic();
                if magic != expected {
                    return Err(CodecError::BadMagic {
                        expected,
                        actual: magic,
                    });
                }

                if command == EXTMSG_COMMAND {
                    if self.builder.version < EXTENDED_MESSAGE_VERSION {
                        return Err(CodecError::ExtendedNotNegotiated {
                            version: self.builder.version,
                        });
                    }
                    self.state = DecodeState::ExtendedHead;
                    return self.decode(src);
                }

                let command = Command::from_bytes(&command)
                    .ok_or_else(|| CodecError::UnknownCommand(Command::escape_bytes(&command)))?;
                let body_len = self.check_body_len(command, body_len.into())?;

                // Reserve buffer space for the expected body and the following header.
                src.reserve(body_len + HEADER_LEN);

                self.state = DecodeState::Body {
                    body_len,
                    command,
                    checksum: Some(checksum),
                };

                // Now that the state is updated, recurse to attempt body decoding.
                self.decode(src)
            }
            DecodeState::ExtendedHead => {
                const EXTENSION_LEN: usize = EXTENDED_HEADER_LEN - HEADER_LEN;

                if src.len() < EXTENSION_LEN {
                    trace!(?self.state, "src buffer does not have an entire extended header, waiting");
                    return Ok(None);
                }

                let extension = src.split_to(EXTENSION_LEN);
                let mut extension_reader = Cursor::new(&extension);
                let command = extension_reader.read_12_bytes()?;
                let body_len = extension_reader.read_u64::<LittleEndian>()?;
                trace!(
                    command = %Command::escape_bytes(&command),
                    body_len,
                    "read extended header from src buffer"
                );

                let command = Command::from_bytes(&command)
                    .ok_or_else(|| CodecError::UnknownCommand(Command::escape_bytes(&command)))?;
                let body_len = self.check_body_len(command, body_len)?;

                src.reserve(body_len + HEADER_LEN);

                self.state = DecodeState::Body {
                    body_len,
                    command,
                    checksum: None,
                };

                self.decode(src)
            }
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => {
                if src.len() < body_len {
                    // Need to wait for the full body
                    trace!(?self.state, len = src.len(), "src buffer does not have an entire body, waiting");
                    return Ok(None);
                }

                // Now that we know we have the full body, split off the body,
                // and reset the decoder state for the next message. Otherwise
                // we will attempt to read the next header as the current body.
                let body = src.split_to(body_len);
                self.state = DecodeState::Head;

                if let Some(checksum) = checksum {
                    if checksum != sha256d::Checksum::from(&body[..]) {
                        return Err(CodecError::BadChecksum { command });
                    }
                }

                let mut body_reader = Cursor::new(&body[..]);
                let msg = Self::read_body(command, &mut body_reader)
                    .map_err(|source| CodecError::Payload { command, source })?;

                // bitcoin allows extra data at the end of most messages,
                // so that old nodes can still read newer message formats,
                // and ignore any extra fields
                let extra_bytes = remaining(&body_reader);
                if extra_bytes == 0 {
                    trace!(?extra_bytes, %msg, "finished message decoding");
                } else {
                    // log when there are extra bytes, so we know when we need to
                    // upgrade message formats
                    debug!(?extra_bytes, %msg, "extra data after decoding message");
                }

                Ok(Some(msg))
            }
        }
    }
}

/// The number of unread bytes left in a message body.
fn remaining(reader: &Cursor<&[u8]>) -> u64 {
    (reader.get_ref().len() as u64).saturating_sub(reader.position())
}

impl Codec {
    fn check_body_len(&self, command: Command, body_len: u64) -> Result<usize, CodecError> {
        match usize::try_from(body_len) {
            Ok(len) if len <= self.builder.max_len => Ok(len),
            _ => Err(CodecError::PayloadTooLarge {
                command: command.to_string(),
                len: body_len,
                max: self.builder.max_len as u64,
            }),
        }
    }

    fn read_body(command: Command, reader: &mut Cursor<&[u8]>) -> Result<Message, Error> {
        match command {
            Command::Version => Self::read_version(reader),
            Command::Verack => Ok(Message::Verack),
            Command::Ping => Ok(Message::Ping(Nonce(reader.read_u64::<LittleEndian>()?))),
            Command::Pong => Ok(Message::Pong(Nonce(reader.read_u64::<LittleEndian>()?))),
            Command::Reject => Self::read_reject(reader),
            Command::GetAddr => Ok(Message::GetAddr),
            Command::Addr => Self::read_addr(reader),
            Command::Alert => Ok(Message::Alert {
                payload: (&mut *reader).sv_deserialize_into()?,
                signature: (&mut *reader).sv_deserialize_into()?,
            }),
            Command::Inv => Ok(Message::Inv((&mut *reader).sv_deserialize_into()?)),
            Command::GetData => Ok(Message::GetData((&mut *reader).sv_deserialize_into()?)),
            Command::NotFound => Ok(Message::NotFound((&mut *reader).sv_deserialize_into()?)),
            Command::GetBlocks => Ok(Message::GetBlocks(Self::read_locator(reader)?)),
            Command::GetHeaders => Ok(Message::GetHeaders(Self::read_locator(reader)?)),
            Command::Headers => Ok(Message::Headers((&mut *reader).sv_deserialize_into()?)),
            Command::Block => Ok(Message::Block((&mut *reader).sv_deserialize_into()?)),
            Command::Tx => Ok(Message::Tx((&mut *reader).sv_deserialize_into()?)),
            Command::Mempool => Ok(Message::Mempool),
            Command::SendHeaders => Ok(Message::SendHeaders),
            Command::FeeFilter => Ok(Message::FeeFilter(reader.read_i64::<LittleEndian>()?)),
            Command::SendCmpct => Ok(Message::SendCmpct((&mut *reader).sv_deserialize_into()?)),
            Command::CmpctBlock => Ok(Message::CmpctBlock((&mut *reader).sv_deserialize_into()?)),
            Command::GetBlockTxn => Ok(Message::GetBlockTxn((&mut *reader).sv_deserialize_into()?)),
            Command::BlockTxn => Ok(Message::BlockTxn((&mut *reader).sv_deserialize_into()?)),
            Command::MerkleBlock => Ok(Message::MerkleBlock(MerkleBlock {
                header: (&mut *reader).sv_deserialize_into()?,
                total_transactions: reader.read_u32::<LittleEndian>()?,
                hashes: (&mut *reader).sv_deserialize_into()?,
                flags: (&mut *reader).sv_deserialize_into()?,
            })),
            Command::FilterLoad => Self::read_filterload(reader),
            Command::FilterAdd => Self::read_filteradd(reader),
            Command::FilterClear => Ok(Message::FilterClear),
            Command::Protoconf => Self::read_protoconf(reader),
            Command::CreateStream => Ok(Message::CreateStream(CreateStream {
                association_id: AssociationId::read_optional(&mut *reader)?,
                stream_type: reader.read_u8()?,
                policy: (&mut *reader).sv_deserialize_into()?,
            })),
            Command::StreamAck => Ok(Message::StreamAck(StreamAck {
                association_id: AssociationId::read_optional(&mut *reader)?,
                stream_type: reader.read_u8()?,
            })),
            Command::DsDetected => Ok(Message::DsDetected(DsDetected {
                version: reader.read_u16::<LittleEndian>()?,
                blocks: (&mut *reader).sv_deserialize_into()?,
            })),
            Command::DataRefTx => Ok(Message::DataRefTx(DataRefTx {
                tx: (&mut *reader).sv_deserialize_into()?,
                proof: (&mut *reader).sv_deserialize_into()?,
            })),
            Command::AuthCh => Ok(Message::AuthCh {
                version: reader.read_i32::<LittleEndian>()?,
                message: read_u32_prefixed_bytes(&mut *reader)?,
            }),
            Command::AuthResp => Ok(Message::AuthResp {
                public_key: read_u32_prefixed_bytes(&mut *reader)?,
                client_nonce: reader.read_u64::<LittleEndian>()?,
                signature: read_u32_prefixed_bytes(&mut *reader)?,
            }),
        }
    }

    fn read_version(reader: &mut Cursor<&[u8]>) -> Result<Message, Error> {
        let version = Version(reader.read_u32::<LittleEndian>()?);
        // Unknown service bits are kept, so the message round-trips.
        let services = PeerServices::from_bits_retain(reader.read_u64::<LittleEndian>()?);
        let timestamp = Utc
            .timestamp_opt(reader.read_i64::<LittleEndian>()?, 0)
            .single()
            .ok_or(Error::Parse(
                "version timestamp is out of range for DateTime",
            ))?;
        let address_recv = (&mut *reader).sv_deserialize_into()?;
        let address_from = (&mut *reader).sv_deserialize_into()?;
        let nonce = Nonce(reader.read_u64::<LittleEndian>()?);
        let user_agent = (&mut *reader).sv_deserialize_into()?;
        let start_height = reader.read_i32::<LittleEndian>()?;

        // Both trailing fields are optional, older peers stop early.
        let relay = if remaining(reader) > 0 {
            reader.read_bool()?
        } else {
            true
        };
        let association_id = if remaining(reader) > 0 {
            AssociationId::read_optional(&mut *reader)?.into()
        } else {
            AssociationIdField::Omitted
        };

        Ok(Message::Version(VersionMessage {
            version,
            services,
            timestamp,
            address_recv,
            address_from,
            nonce,
            user_agent,
            start_height,
            relay,
            association_id,
        }))
    }

    fn read_reject(reader: &mut Cursor<&[u8]>) -> Result<Message, Error> {
        let message = (&mut *reader).sv_deserialize_into()?;
        let ccode = RejectReason::from_code(reader.read_u8()?);
        let reason = (&mut *reader).sv_deserialize_into()?;

        // Sometimes there's data, sometimes there isn't. There's no length
        // field, this is just implicitly encoded by the body_len.
        // All known implementations supply 32 bytes of data (the hash of
        // the rejected object) or none.
        let data = if remaining(reader) >= 32 {
            Some(reader.read_32_bytes()?)
        } else {
            None
        };

        Ok(Message::Reject(Reject {
            message,
            ccode,
            reason,
            data,
        }))
    }

    fn read_addr(reader: &mut Cursor<&[u8]>) -> Result<Message, Error> {
        let addrs: Vec<TimestampedAddr> = (&mut *reader).sv_deserialize_into()?;

        if addrs.len() > constants::MAX_ADDRS_IN_MESSAGE {
            return Err(Error::Parse(
                "more than MAX_ADDRS_IN_MESSAGE in addr message",
            ));
        }

        Ok(Message::Addr(addrs))
    }

    fn read_locator(reader: &mut Cursor<&[u8]>) -> Result<BlockLocator, Error> {
        let version = Version(reader.read_u32::<LittleEndian>()?);
        let known_blocks = (&mut *reader).sv_deserialize_into()?;
        let stop_hash = block::Hash::sv_deserialize(&mut *reader)?;
        let stop = if stop_hash != block::Hash([0; 32]) {
            Some(stop_hash)
        } else {
            None
        };

        Ok(BlockLocator {
            version,
            known_blocks,
            stop,
        })
    }

    fn read_filterload(reader: &mut Cursor<&[u8]>) -> Result<Message, Error> {
        let filter: Vec<u8> = (&mut *reader).sv_deserialize_into()?;
        if filter.len() > constants::MAX_FILTERLOAD_LENGTH {
            return Err(Error::Parse("filterload filter is too long"));
        }

        Ok(Message::FilterLoad(FilterLoad {
            filter: Filter(filter),
            hash_functions_count: reader.read_u32::<LittleEndian>()?,
            tweak: Tweak(reader.read_u32::<LittleEndian>()?),
            flags: reader.read_u8()?,
        }))
    }

    fn read_filteradd(reader: &mut Cursor<&[u8]>) -> Result<Message, Error> {
        let data: Vec<u8> = (&mut *reader).sv_deserialize_into()?;
        if data.len() > constants::MAX_FILTERADD_LENGTH {
            return Err(Error::Parse("filteradd data is too long"));
        }

        Ok(Message::FilterAdd { data })
    }

    fn read_protoconf(reader: &mut Cursor<&[u8]>) -> Result<Message, Error> {
        let number_of_fields = reader.read_compact_u64()?;

        let max_recv_payload_length = if number_of_fields >= 1 {
            reader.read_u32::<LittleEndian>()?
        } else {
            constants::LEGACY_MAX_RECV_PAYLOAD_LENGTH
        };
        let stream_policies = if number_of_fields >= 2 {
            String::sv_deserialize(&mut *reader)?
        } else {
            constants::LEGACY_STREAM_POLICIES.to_string()
        };

        Ok(Message::Protoconf(Protoconf {
            number_of_fields,
            max_recv_payload_length,
            stream_policies,
        }))
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Codec")
            .field("network", &self.builder.network)
            .field("version", &self.builder.version)
            .field("max_len", &self.builder.max_len)
            .field("extended_threshold", &self.builder.extended_threshold)
            .field("state", &self.state)
            .finish()
    }
}
