//! Frame encoding/decoding
//!
//! Frame format (Echonet Lite, specified message format):
//! - 1 byte: EHD1 (0x10)
//! - 1 byte: EHD2 (0x81)
//! - 2 bytes: TID (big-endian)
//! - 3 bytes: SEOJ, 3 bytes: DEOJ
//! - 1 byte: ESV
//! - 1 byte: OPC, then OPC x (EPC, PDC, EDT[PDC])
//! - SetGet services only: OPCGet, then OPCGet x (EPC, PDC, EDT[PDC])

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use super::FrameError;

/// Echonet Lite protocol header byte
pub const EHD1_ECHONET_LITE: u8 = 0x10;

/// Specified message format
pub const EHD2_SPECIFIED: u8 = 0x81;

/// Header length up to and including the first OPC byte
pub const HEADER_LEN: usize = 12;

/// Status request sent by the send task when nothing is queued.
///
/// Controller -> low-voltage smart meter, Get E7 (instantaneous power) and
/// E8 (instantaneous current), TID 1. Field devices expect these exact bytes.
pub const KEEP_ALIVE_FRAME: [u8; 16] = [
    0x10, 0x81, 0x00, 0x01, 0x05, 0xFF, 0x01, 0x02, 0x88, 0x01, 0x62, 0x02, 0xE7, 0x00, 0xE8,
    0x00,
];

/// Address of an Echonet object: class group, class, instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EchonetObject {
    /// X1, class group code
    pub class_group: u8,
    /// X2, class code
    pub class: u8,
    /// X3, instance code
    pub instance: u8,
}

impl EchonetObject {
    /// Controller (05FF01), the object this side speaks as
    pub const CONTROLLER: Self = Self::new(0x05, 0xFF, 0x01);

    /// Low-voltage smart electric energy meter (028801)
    pub const LOW_VOLTAGE_SMART_METER: Self = Self::new(0x02, 0x88, 0x01);

    /// Node profile (0EF001)
    pub const NODE_PROFILE: Self = Self::new(0x0E, 0xF0, 0x01);

    /// Object from its three EOJ bytes
    pub const fn new(class_group: u8, class: u8, instance: u8) -> Self {
        Self {
            class_group,
            class,
            instance,
        }
    }

    /// EOJ bytes in wire order
    pub fn to_bytes(self) -> [u8; 3] {
        [self.class_group, self.class, self.instance]
    }

    fn from_slice(data: &[u8]) -> Self {
        Self::new(data[0], data[1], data[2])
    }
}

impl fmt::Display for EchonetObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}{:02X}{:02X}",
            self.class_group, self.class, self.instance
        )
    }
}

/// Echonet Lite service codes (ESV)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceCode {
    /// Property value write, no response required
    SetI = 0x60,
    /// Property value write, response required
    SetC = 0x61,
    /// Property value read request
    Get = 0x62,
    /// Property value notification request
    InfReq = 0x63,
    /// Property value write & read request
    SetGet = 0x6E,
    /// Property value write response
    SetRes = 0x71,
    /// Property value read response
    GetRes = 0x72,
    /// Property value notification
    Inf = 0x73,
    /// Property value notification, response required
    InfC = 0x74,
    /// Property value notification response
    InfCRes = 0x7A,
    /// Property value write & read response
    SetGetRes = 0x7E,
    /// SetI not possible
    SetISna = 0x50,
    /// SetC not possible
    SetCSna = 0x51,
    /// Get not possible
    GetSna = 0x52,
    /// Inf not possible
    InfSna = 0x53,
    /// SetGet not possible
    SetGetSna = 0x5E,
}

impl ServiceCode {
    /// Map a raw ESV byte to a known service code
    pub fn from_u8(value: u8) -> Option<Self> {
        let code = match value {
            0x60 => Self::SetI,
            0x61 => Self::SetC,
            0x62 => Self::Get,
            0x63 => Self::InfReq,
            0x6E => Self::SetGet,
            0x71 => Self::SetRes,
            0x72 => Self::GetRes,
            0x73 => Self::Inf,
            0x74 => Self::InfC,
            0x7A => Self::InfCRes,
            0x7E => Self::SetGetRes,
            0x50 => Self::SetISna,
            0x51 => Self::SetCSna,
            0x52 => Self::GetSna,
            0x53 => Self::InfSna,
            0x5E => Self::SetGetSna,
            _ => return None,
        };
        Some(code)
    }

    /// ESV byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Requests address the destination object; everything else comes from the source
    pub fn is_request(self) -> bool {
        (0x60..=0x6F).contains(&self.as_u8())
    }

    /// SetGet family frames carry a second (read) property list
    pub fn has_get_list(self) -> bool {
        matches!(self, Self::SetGet | Self::SetGetRes | Self::SetGetSna)
    }
}

impl TryFrom<u8> for ServiceCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(FrameError::UnknownService(value))
    }
}

/// A single property: EPC plus its EDT bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Property {
    /// EPC
    pub code: u8,
    /// EDT; empty in requests
    pub value: Vec<u8>,
}

impl Property {
    /// Property with a value
    pub fn new(code: u8, value: Vec<u8>) -> Self {
        Self { code, value }
    }

    /// Property with no data, as used in Get requests
    pub fn request(code: u8) -> Self {
        Self::new(code, Vec::new())
    }

    fn encoded_len(&self) -> usize {
        2 + self.value.len()
    }
}

/// Identity of a frame: the remote object and the property codes it concerns
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameKey {
    /// Meter-side object of the exchange
    pub object: EchonetObject,
    /// Property codes in frame order
    pub codes: Vec<u8>,
}

impl FrameKey {
    /// Iterate `(object, code)` pairs, one per property
    pub fn property_keys(&self) -> impl Iterator<Item = (EchonetObject, u8)> + '_ {
        self.codes.iter().map(move |&code| (self.object, code))
    }
}

/// An Echonet Lite frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    tid: u16,
    source: EchonetObject,
    destination: EchonetObject,
    service: ServiceCode,
    properties: Vec<Property>,
    get_properties: Vec<Property>,
}

impl Frame {
    /// Build a frame, validating property counts and value lengths
    pub fn new(
        tid: u16,
        source: EchonetObject,
        destination: EchonetObject,
        service: ServiceCode,
        properties: Vec<Property>,
    ) -> Result<Self, FrameError> {
        FrameBuilder::new(service)
            .tid(tid)
            .source(source)
            .destination(destination)
            .properties(properties)
            .build()
    }

    /// Get request from the controller object for the given property codes
    pub fn get_request(
        tid: u16,
        destination: EchonetObject,
        codes: &[u8],
    ) -> Result<Self, FrameError> {
        let properties = codes.iter().map(|&code| Property::request(code)).collect();
        Self::new(
            tid,
            EchonetObject::CONTROLLER,
            destination,
            ServiceCode::Get,
            properties,
        )
    }

    /// The fixed status request, see [`KEEP_ALIVE_FRAME`]
    pub fn keep_alive() -> Self {
        Self {
            tid: 0x0001,
            source: EchonetObject::CONTROLLER,
            destination: EchonetObject::LOW_VOLTAGE_SMART_METER,
            service: ServiceCode::Get,
            properties: vec![Property::request(0xE7), Property::request(0xE8)],
            get_properties: Vec::new(),
        }
    }

    /// Decode a frame from raw bytes
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN,
                actual: data.len(),
            });
        }

        if data[0] != EHD1_ECHONET_LITE || data[1] != EHD2_SPECIFIED {
            return Err(FrameError::InvalidHeader {
                ehd1: data[0],
                ehd2: data[1],
            });
        }

        let tid = BigEndian::read_u16(&data[2..4]);
        let source = EchonetObject::from_slice(&data[4..7]);
        let destination = EchonetObject::from_slice(&data[7..10]);
        let service = ServiceCode::try_from(data[10])?;

        let mut offset = 11;
        let properties = read_property_list(data, &mut offset)?;
        let get_properties = if service.has_get_list() {
            read_property_list(data, &mut offset)?
        } else {
            Vec::new()
        };

        if offset != data.len() {
            return Err(FrameError::TrailingBytes(data.len() - offset));
        }

        Ok(Self {
            tid,
            source,
            destination,
            service,
            properties,
            get_properties,
        })
    }

    /// Encode the frame to its wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());

        bytes.push(EHD1_ECHONET_LITE);
        bytes.push(EHD2_SPECIFIED);

        let mut tid = [0u8; 2];
        BigEndian::write_u16(&mut tid, self.tid);
        bytes.extend_from_slice(&tid);

        bytes.extend_from_slice(&self.source.to_bytes());
        bytes.extend_from_slice(&self.destination.to_bytes());
        bytes.push(self.service.as_u8());

        write_property_list(&mut bytes, &self.properties);
        if self.service.has_get_list() {
            write_property_list(&mut bytes, &self.get_properties);
        }

        bytes
    }

    /// Total encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        let list_len = |list: &[Property]| -> usize {
            1 + list.iter().map(Property::encoded_len).sum::<usize>()
        };
        let mut len = HEADER_LEN - 1 + list_len(&self.properties);
        if self.service.has_get_list() {
            len += list_len(&self.get_properties);
        }
        len
    }

    /// Identity used for outbound dedup and for routing into the property sink
    pub fn get_key(&self) -> FrameKey {
        let object = if self.service.is_request() {
            self.destination
        } else {
            self.source
        };
        let codes = self
            .properties
            .iter()
            .chain(self.get_properties.iter())
            .map(|p| p.code)
            .collect();
        FrameKey { object, codes }
    }

    /// Transaction ID
    pub fn tid(&self) -> u16 {
        self.tid
    }

    /// SEOJ
    pub fn source(&self) -> EchonetObject {
        self.source
    }

    /// DEOJ
    pub fn destination(&self) -> EchonetObject {
        self.destination
    }

    /// ESV
    pub fn service(&self) -> ServiceCode {
        self.service
    }

    /// Properties of the first (or only) list
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Second property list of SetGet family frames, empty otherwise
    pub fn get_properties(&self) -> &[Property] {
        &self.get_properties
    }

    /// Look up a property by code in either list
    pub fn property(&self, code: u8) -> Option<&Property> {
        self.properties
            .iter()
            .chain(self.get_properties.iter())
            .find(|p| p.code == code)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TID={:04X} {}->{} {:?} [",
            self.tid, self.source, self.destination, self.service
        )?;
        for (i, p) in self
            .properties
            .iter()
            .chain(self.get_properties.iter())
            .enumerate()
        {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", p.code)?;
            if !p.value.is_empty() {
                write!(f, "={}", hex::encode_upper(&p.value))?;
            }
        }
        write!(f, "]")
    }
}

fn read_property_list(data: &[u8], offset: &mut usize) -> Result<Vec<Property>, FrameError> {
    let count = *data.get(*offset).ok_or(FrameError::Truncated {
        needed: *offset + 1,
        actual: data.len(),
    })? as usize;
    *offset += 1;

    let mut properties = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < *offset + 2 {
            return Err(FrameError::Truncated {
                needed: *offset + 2,
                actual: data.len(),
            });
        }
        let code = data[*offset];
        let pdc = data[*offset + 1] as usize;
        *offset += 2;

        let end = *offset + pdc;
        if data.len() < end {
            return Err(FrameError::Truncated {
                needed: end,
                actual: data.len(),
            });
        }
        properties.push(Property::new(code, data[*offset..end].to_vec()));
        *offset = end;
    }

    Ok(properties)
}

fn write_property_list(bytes: &mut Vec<u8>, properties: &[Property]) {
    bytes.push(properties.len() as u8);
    for property in properties {
        bytes.push(property.code);
        bytes.push(property.value.len() as u8);
        bytes.extend_from_slice(&property.value);
    }
}

fn check_list(properties: &[Property]) -> Result<(), FrameError> {
    if properties.len() > u8::MAX as usize {
        return Err(FrameError::TooManyProperties(properties.len()));
    }
    for property in properties {
        if property.value.len() > u8::MAX as usize {
            return Err(FrameError::PropertyTooLong {
                code: property.code,
                len: property.value.len(),
            });
        }
    }
    Ok(())
}

/// Builder for constructing frames
pub struct FrameBuilder {
    tid: u16,
    source: EchonetObject,
    destination: EchonetObject,
    service: ServiceCode,
    properties: Vec<Property>,
    get_properties: Vec<Property>,
}

impl FrameBuilder {
    /// Start a frame from the controller to the smart meter
    pub fn new(service: ServiceCode) -> Self {
        Self {
            tid: 0,
            source: EchonetObject::CONTROLLER,
            destination: EchonetObject::LOW_VOLTAGE_SMART_METER,
            service,
            properties: Vec::new(),
            get_properties: Vec::new(),
        }
    }

    /// Set the transaction ID, 0 by default
    pub fn tid(mut self, tid: u16) -> Self {
        self.tid = tid;
        self
    }

    /// Override the sending object
    pub fn source(mut self, source: EchonetObject) -> Self {
        self.source = source;
        self
    }

    /// Override the target object
    pub fn destination(mut self, destination: EchonetObject) -> Self {
        self.destination = destination;
        self
    }

    /// Add a property to the first list
    pub fn property(mut self, code: u8, value: &[u8]) -> Self {
        self.properties.push(Property::new(code, value.to_vec()));
        self
    }

    /// Append properties to the first list
    pub fn properties(mut self, properties: Vec<Property>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Add a property to the read list of a SetGet frame
    pub fn get_property(mut self, code: u8, value: &[u8]) -> Self {
        self.get_properties.push(Property::new(code, value.to_vec()));
        self
    }

    /// Build the frame
    pub fn build(self) -> Result<Frame, FrameError> {
        check_list(&self.properties)?;
        check_list(&self.get_properties)?;
        let get_properties = if self.service.has_get_list() {
            self.get_properties
        } else {
            Vec::new()
        };
        Ok(Frame {
            tid: self.tid,
            source: self.source,
            destination: self.destination,
            service: self.service,
            properties: self.properties,
            get_properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keep_alive_bytes() {
        assert_eq!(Frame::keep_alive().encode(), KEEP_ALIVE_FRAME.to_vec());
        assert_eq!(Frame::keep_alive().encoded_len(), KEEP_ALIVE_FRAME.len());
    }

    #[test]
    fn test_decode_keep_alive() {
        let frame = Frame::decode(&KEEP_ALIVE_FRAME).expect("keep-alive decodes");
        assert_eq!(frame, Frame::keep_alive());
        assert_eq!(frame.tid(), 1);
        assert_eq!(frame.service(), ServiceCode::Get);
        assert_eq!(frame.properties().len(), 2);
    }

    #[test]
    fn test_get_response_decode() {
        // Get_Res from the meter: E7 = 0x000001F4 (500 W)
        let data = [
            0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xFF, 0x01, 0x72, 0x01, 0xE7, 0x04,
            0x00, 0x00, 0x01, 0xF4,
        ];
        let frame = Frame::decode(&data).unwrap();
        assert_eq!(frame.source(), EchonetObject::LOW_VOLTAGE_SMART_METER);
        assert_eq!(frame.property(0xE7).unwrap().value, vec![0x00, 0x00, 0x01, 0xF4]);
        assert_eq!(frame.encode(), data.to_vec());
    }

    #[test]
    fn test_truncated_property_list() {
        // Declares two properties, carries one
        let data = [
            0x10, 0x81, 0x00, 0x01, 0x05, 0xFF, 0x01, 0x02, 0x88, 0x01, 0x62, 0x02, 0xE7, 0x00,
        ];
        assert_eq!(
            Frame::decode(&data),
            Err(FrameError::Truncated {
                needed: 16,
                actual: 14
            })
        );
    }

    #[test]
    fn test_truncated_edt() {
        let data = [
            0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xFF, 0x01, 0x72, 0x01, 0xE7, 0x04,
            0x00, 0x00,
        ];
        assert!(matches!(
            Frame::decode(&data),
            Err(FrameError::Truncated { needed: 18, .. })
        ));
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(
            Frame::decode(&[0x10, 0x81, 0x00]),
            Err(FrameError::Truncated { needed: HEADER_LEN, actual: 3 })
        ));
    }

    #[test]
    fn test_invalid_header() {
        let mut data = KEEP_ALIVE_FRAME;
        data[1] = 0x82;
        assert_eq!(
            Frame::decode(&data),
            Err(FrameError::InvalidHeader {
                ehd1: 0x10,
                ehd2: 0x82
            })
        );
    }

    #[test]
    fn test_unknown_service() {
        let mut data = KEEP_ALIVE_FRAME;
        data[10] = 0x99;
        assert_eq!(Frame::decode(&data), Err(FrameError::UnknownService(0x99)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut data = KEEP_ALIVE_FRAME.to_vec();
        data.push(0x00);
        assert_eq!(Frame::decode(&data), Err(FrameError::TrailingBytes(1)));
    }

    #[test]
    fn test_set_get_second_list() {
        let frame = FrameBuilder::new(ServiceCode::SetGet)
            .tid(7)
            .property(0x97, &[0x12, 0x30])
            .get_property(0xE7, &[])
            .build()
            .unwrap();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), frame.encoded_len());
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.get_properties().len(), 1);
        assert_eq!(decoded.get_key().codes, vec![0x97, 0xE7]);
    }

    #[test]
    fn test_key_uses_remote_object() {
        let request = Frame::get_request(3, EchonetObject::LOW_VOLTAGE_SMART_METER, &[0xE0])
            .unwrap();
        let response = FrameBuilder::new(ServiceCode::GetRes)
            .source(EchonetObject::LOW_VOLTAGE_SMART_METER)
            .destination(EchonetObject::CONTROLLER)
            .property(0xE0, &[0, 0, 0, 1])
            .build()
            .unwrap();
        assert_eq!(request.get_key(), response.get_key());
    }

    #[test]
    fn test_property_too_long() {
        let result = FrameBuilder::new(ServiceCode::SetC)
            .property(0x80, &[0u8; 256])
            .build();
        assert_eq!(
            result,
            Err(FrameError::PropertyTooLong {
                code: 0x80,
                len: 256
            })
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Frame::keep_alive().to_string(),
            "TID=0001 05FF01->028801 Get [E7 E8]"
        );
    }
}
