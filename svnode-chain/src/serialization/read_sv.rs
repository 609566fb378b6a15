use std::{
    convert::TryInto,
    io,
    net::{IpAddr, Ipv6Addr, SocketAddr},
};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use super::{SerializationError, MAX_PROTOCOL_MESSAGE_LEN};

/// Extends [`Read`] with methods for reading Bitcoin wire types.
///
/// [`Read`]: https://doc.rust-lang.org/std/io/trait.Read.html
pub trait ReadSvExt: io::Read {
    /// Reads a `u64` using the Bitcoin `CompactSize` encoding.
    ///
    /// # Security
    ///
    /// Deserialized sizes must be validated before being used.
    ///
    /// Preallocating vectors using untrusted `CompactSize`s allows memory
    /// denial of service attacks. As a defence-in-depth, sizes greater than
    /// the protocol message length limit are rejected here.
    ///
    /// # Examples
    ///
    /// ```
    /// use svnode_chain::serialization::ReadSvExt;
    ///
    /// use std::io::Cursor;
    /// assert_eq!(
    ///     0x12,
    ///     Cursor::new(b"\x12")
    ///         .read_compactsize().unwrap()
    /// );
    /// assert_eq!(
    ///     0xfd,
    ///     Cursor::new(b"\xfd\xfd\x00")
    ///         .read_compactsize().unwrap()
    /// );
    /// assert_eq!(
    ///     0xaafd,
    ///     Cursor::new(b"\xfd\xfd\xaa")
    ///         .read_compactsize().unwrap()
    /// );
    /// ```
    ///
    /// Non-canonical encodings are invalid, they return a `Parse` error:
    /// ```
    /// # use svnode_chain::serialization::ReadSvExt;
    /// # use std::io::Cursor;
    /// Cursor::new(b"\xfd\x12\x00").read_compactsize().unwrap_err();
    /// Cursor::new(b"\xfe\xfd\xaa\x00\x00").read_compactsize().unwrap_err();
    /// ```
    #[inline]
    fn read_compactsize(&mut self) -> Result<u64, SerializationError> {
        let size = self.read_compact_u64()?;

        // # Security
        // Defence-in-depth for memory DoS via preallocation.
        if size
            > MAX_PROTOCOL_MESSAGE_LEN
                .try_into()
                .expect("usize fits in u64")
        {
            Err(SerializationError::Parse(
                "compactsize larger than protocol message limit",
            ))?;
        }

        Ok(size)
    }

    /// Reads a `u64` value, not a size, using the `CompactSize` encoding.
    ///
    /// Use this for indexes and counters that are never used to allocate.
    /// The full `u64` range is accepted, but the encoding must be canonical.
    #[inline]
    fn read_compact_u64(&mut self) -> Result<u64, SerializationError> {
        use SerializationError::Parse;
        let flag_byte = self.read_u8()?;
        let size = match flag_byte {
            n @ 0x00..=0xfc => Ok(n as u64),
            0xfd => match self.read_u16::<LittleEndian>()? {
                n @ 0x0000_00fd..=0x0000_ffff => Ok(n as u64),
                _ => Err(Parse("non-canonical compactsize")),
            },
            0xfe => match self.read_u32::<LittleEndian>()? {
                n @ 0x0001_0000..=0xffff_ffff => Ok(n as u64),
                _ => Err(Parse("non-canonical compactsize")),
            },
            0xff => match self.read_u64::<LittleEndian>()? {
                n @ 0x1_0000_0000..=0xffff_ffff_ffff_ffff => Ok(n),
                _ => Err(Parse("non-canonical compactsize")),
            },
        }?;

        Ok(size)
    }

    /// Reads a one-byte boolean, rejecting anything other than `0` or `1`.
    #[inline]
    fn read_bool(&mut self) -> Result<bool, SerializationError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SerializationError::Parse("non-bool value in boolean field")),
        }
    }

    /// Read an IP address in Bitcoin format.
    #[inline]
    fn read_ip_addr(&mut self) -> io::Result<IpAddr> {
        let mut octets = [0u8; 16];
        self.read_exact(&mut octets)?;
        let v6_addr = Ipv6Addr::from(octets);

        Ok(canonical_ip_addr(&v6_addr))
    }

    /// Read a Bitcoin-encoded `SocketAddr`.
    #[inline]
    fn read_socket_addr(&mut self) -> io::Result<SocketAddr> {
        let ip_addr = self.read_ip_addr()?;
        let port = self.read_u16::<BigEndian>()?;
        Ok(SocketAddr::new(ip_addr, port))
    }

    /// Convenience method to read a `[u8; 4]`.
    #[inline]
    fn read_4_bytes(&mut self) -> io::Result<[u8; 4]> {
        let mut bytes = [0; 4];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Convenience method to read a `[u8; 12]`.
    #[inline]
    fn read_12_bytes(&mut self) -> io::Result<[u8; 12]> {
        let mut bytes = [0; 12];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Convenience method to read a `[u8; 32]`.
    #[inline]
    fn read_32_bytes(&mut self) -> io::Result<[u8; 32]> {
        let mut bytes = [0; 32];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

/// Mark all types implementing `Read` as implementing the extension.
impl<R: io::Read + ?Sized> ReadSvExt for R {}

/// Transform a deserialized IPv6 address into a canonical IP address.
///
/// The Bitcoin protocol uses IPv6-mapped IPv4 addresses. Those are converted
/// back to `Ipv4Addr`s, so that round-tripped addresses compare equal to the
/// addresses tests connect to.
pub fn canonical_ip_addr(v6_addr: &Ipv6Addr) -> IpAddr {
    use IpAddr::*;

    match v6_addr.to_ipv4_mapped() {
        Some(v4_addr) => V4(v4_addr),
        None => V6(*v6_addr),
    }
}
