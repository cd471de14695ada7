// Licensed under the Apache-2.0 license

//! Transfer descriptor and result codes of the packet interface.
//!
//! A [`Packet`] names a 7-bit target and borrows the caller's buffer for the
//! duration of one call. Every packet operation answers with a [`StatusCode`];
//! there is no other failure channel and no hardware state leaks out.

/// Largest number of bytes a single packet may move.
pub const MAX_DATA_LENGTH: u16 = 255;

/// Highest valid 7-bit target address.
pub const MAX_ADDRESS: u16 = 0x7f;

/// Direction bit appended to the shifted target address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferDirection {
    Write = 0,
    Read = 1,
}

impl TransferDirection {
    /// Address byte as clocked out on the bus: `(address << 1) | direction`.
    #[must_use]
    pub fn address_byte(self, address: u8) -> u8 {
        (address << 1) | self as u8
    }
}

/// Outcome of a packet operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[must_use]
#[repr(u8)]
pub enum StatusCode {
    /// Transfer completed and the requested bytes were moved.
    Ok = 0x00,
    /// The request does not fit: length beyond the buffer or the platform limit,
    /// or an address outside the 7-bit range.
    Overflow = 0x01,
    /// A bounded wait ran out of budget. The bus was released before returning.
    Timeout = 0x02,
    /// The target did not acknowledge its address or a data byte.
    NoAcknowledge = 0x03,
    /// The peripheral flagged a bus error or lost arbitration.
    BusFault = 0x04,
}

impl StatusCode {
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

/// Transfer descriptor.
///
/// `data_length == 0` or `data == None` describes an address probe: the target
/// is addressed, no buffer is touched, and a responding target yields
/// [`StatusCode::Ok`].
#[derive(Debug)]
pub struct Packet<'a> {
    /// Un-shifted 7-bit target address.
    pub address: u16,
    /// Number of bytes to move.
    pub data_length: u16,
    /// Caller-owned buffer, borrowed for the call only.
    pub data: Option<&'a mut [u8]>,
}

impl<'a> Packet<'a> {
    /// Packet moving the whole of `data`.
    ///
    /// Buffers longer than `u16::MAX` saturate the length field and are later
    /// rejected as [`StatusCode::Overflow`].
    pub fn new(address: u16, data: &'a mut [u8]) -> Self {
        Self {
            address,
            data_length: u16::try_from(data.len()).unwrap_or(u16::MAX),
            data: Some(data),
        }
    }

    /// Address-only packet.
    #[must_use]
    pub fn probe(address: u16) -> Self {
        Self {
            address,
            data_length: 0,
            data: None,
        }
    }

    /// True when the packet moves no data.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.data_length == 0 || self.data.is_none()
    }

    /// The part of the buffer the transfer fills.
    pub(crate) fn payload_mut(&mut self) -> Option<&mut [u8]> {
        let len = usize::from(self.data_length);
        self.data.as_deref_mut().and_then(|data| data.get_mut(..len))
    }
}

/// Transfer descriptor for writes: the buffer is only read.
///
/// A `&Packet` converts into a `WritePacket`, so one descriptor can serve a
/// read and a later write of the same buffer.
#[derive(Copy, Clone, Debug)]
pub struct WritePacket<'a> {
    pub address: u16,
    pub data_length: u16,
    pub data: Option<&'a [u8]>,
}

impl<'a> WritePacket<'a> {
    /// Packet sending the whole of `data`.
    #[must_use]
    pub fn new(address: u16, data: &'a [u8]) -> Self {
        Self {
            address,
            data_length: u16::try_from(data.len()).unwrap_or(u16::MAX),
            data: Some(data),
        }
    }

    /// Address-only packet.
    #[must_use]
    pub fn probe(address: u16) -> Self {
        Self {
            address,
            data_length: 0,
            data: None,
        }
    }

    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.data_length == 0 || self.data.is_none()
    }

    /// The bytes the transfer sends.
    pub(crate) fn payload(&self) -> Option<&'a [u8]> {
        let len = usize::from(self.data_length);
        self.data.and_then(|data| data.get(..len))
    }
}

impl<'a> From<&'a Packet<'_>> for WritePacket<'a> {
    fn from(packet: &'a Packet<'_>) -> Self {
        Self {
            address: packet.address,
            data_length: packet.data_length,
            data: packet.data.as_deref(),
        }
    }
}
