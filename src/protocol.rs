// Architectural design:
//   * Using `Decoder` trait we decode a `Request` from a MessagePack body
//   * Using `Encoder` trait we encode Received Result<Response, T: Display>
//     Typically, generic T is `Error`, which then converted using `ToString` trait

use derive_more::Display;
use rmp_serde::decode::Error as RMPDecodeError;
use rmp_serde::encode::Error as RMPEncodeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Result as HiveResult;
use crate::insert::Row;
use crate::storage::{LogicalType, StorageFormat, TableDescriptor, TableName};

type HeaderType = u64;
const HEADER_SIZE: usize = size_of::<HeaderType>();
/// Largest accepted request body.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    CreateTable(CreateTableRequest),
    /// `table` is `database.table` or a bare table name in the default database.
    Insert { table: String, rows: Vec<Row> },
}

/// Table definition as sent by a client, with Hive type names such as `decimal(10,5)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableRequest {
    pub name: String,
    pub columns: Vec<(String, String)>,
    pub partition_columns: Vec<(String, String)>,
    pub format: StorageFormat,
    pub serde_properties: BTreeMap<String, String>,
    pub transactional: bool,
}

impl CreateTableRequest {
    /// Returns: TableDescriptor or InvalidTable for a malformed name or type
    pub fn into_descriptor(self) -> HiveResult<TableDescriptor> {
        let mut descriptor = TableDescriptor::new(TableName::try_from(self.name.as_str())?)
            .with_format(self.format)
            .with_transactional(self.transactional);
        for (name, hive_type) in &self.columns {
            descriptor = descriptor.with_column(name, LogicalType::try_from(hive_type.as_str())?);
        }
        for (name, hive_type) in &self.partition_columns {
            descriptor = descriptor
                .with_partition_column(name, LogicalType::try_from(hive_type.as_str())?);
        }
        descriptor.serde_properties = self.serde_properties;
        Ok(descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    RowsWritten(u64),
}

// Created for derive Display and IO error handling (required by `Encoder` and `Decoder` traits).
#[derive(Debug, Serialize, Display)]
pub enum ProtocolError {
    #[display("Request decoding error. {_0}")]
    Decode(String),
    #[display("Response encoding error. {_0}")]
    Encode(String),
    #[display("IO error: {_0}")]
    IOError(String),

    #[display("Conversion error. {_0}")]
    Conversion(String),
}

// Required by `Encoder` and `Decoder` traits.
impl From<std::io::Error> for ProtocolError {
    fn from(error: std::io::Error) -> Self {
        Self::IOError(error.to_string())
    }
}

impl From<RMPDecodeError> for ProtocolError {
    fn from(error: RMPDecodeError) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<RMPEncodeError> for ProtocolError {
    fn from(error: RMPEncodeError) -> Self {
        Self::Encode(error.to_string())
    }
}

/// TCP protocol codec implementing `tokio_util::codec::{Decoder, Encoder}` traits.
///
/// Protocol format:
/// - Header: 8-byte little-endian u64 containing body size
/// - Body: `MessagePack` encoded `Request` (for decoding) or `Result<Response, String>` (for encoding)
pub struct RequestCodec;

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming it
        let mut header_bytes = [0; HEADER_SIZE];
        header_bytes.copy_from_slice(&buf[..HEADER_SIZE]);

        let body_size = usize::try_from(HeaderType::from_le_bytes(header_bytes))
            .map_err(|_| ProtocolError::Conversion("Header type too large".to_string()))?;
        if body_size > MAX_FRAME_SIZE {
            return Err(ProtocolError::Conversion("Frame too large".to_string()));
        }
        let total_message_size = HEADER_SIZE
            .checked_add(body_size)
            .ok_or_else(|| ProtocolError::Conversion("Frame too large".to_string()))?;

        if buf.len() < total_message_size {
            buf.reserve(total_message_size - buf.len());
            return Ok(None);
        }

        // Now consume the header and the data
        buf.advance(HEADER_SIZE);
        let data = buf.split_to(body_size);

        Ok(Some(rmp_serde::from_slice(&data)?))
    }
}

impl<T> Encoder<Result<Response, T>> for RequestCodec
where
    T: fmt::Display,
{
    type Error = ProtocolError;

    fn encode(&mut self, item: Result<Response, T>, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let item = item.map_err(|error| error.to_string());
        let body = rmp_serde::to_vec(&item)?;

        let message_size = (body.len() as HeaderType).to_le_bytes();
        buf.put(message_size.as_slice()); // HEADER
        buf.put(body.as_slice()); // BODY

        Ok(())
    }
}

/// Frames a request the way a client sends it.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, ProtocolError> {
    let body = rmp_serde::to_vec(request)?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend((body.len() as HeaderType).to_le_bytes());
    frame.extend(body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::EngineValue;

    fn create_table_request(columns: &[(&str, &str)]) -> CreateTableRequest {
        CreateTableRequest {
            name: "sales.orders".to_string(),
            columns: columns
                .iter()
                .map(|(name, hive_type)| (name.to_string(), hive_type.to_string()))
                .collect(),
            partition_columns: vec![("ds".to_string(), "date".to_string())],
            format: StorageFormat::ColumnarBinary,
            serde_properties: BTreeMap::from([("field.delim".to_string(), "\t".to_string())]),
            transactional: false,
        }
    }

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let request = Request::Insert {
            table: "default.t".to_string(),
            rows: vec![vec![EngineValue::Integer(1), EngineValue::varchar("a")]],
        };
        let frame = encode_request(&request).unwrap();

        let mut buf = BytesMut::from(&frame[..frame.len() - 1]);
        assert!(RequestCodec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        assert_eq!(RequestCodec.decode(&mut buf).unwrap(), Some(request));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_create_table_request() {
        let request = Request::CreateTable(create_table_request(&[
            ("Amount", "DECIMAL(10, 5)"),
            ("note", "varchar(20)"),
        ]));
        let mut buf = BytesMut::from(encode_request(&request).unwrap().as_slice());
        let Some(Request::CreateTable(decoded)) = RequestCodec.decode(&mut buf).unwrap() else {
            panic!("expected a CreateTable request");
        };

        let descriptor = decoded.into_descriptor().unwrap();
        assert_eq!(
            descriptor,
            TableDescriptor::new(TableName::new("sales", "orders"))
                .with_column("amount", LogicalType::Decimal {
                    precision: 10,
                    scale: 5,
                })
                .with_column("note", LogicalType::Varchar(Some(20)))
                .with_partition_column("ds", LogicalType::Date)
                .with_format(StorageFormat::ColumnarBinary)
                .with_serde_property("field.delim", "\t")
        );
    }

    #[test]
    fn test_create_table_request_rejects_unknown_type() {
        let request = create_table_request(&[("a", "map<string,int>")]);
        assert!(matches!(
            request.into_descriptor(),
            Err(Error::InvalidTable(_))
        ));

        let mut request = create_table_request(&[("a", "int")]);
        request.name = "a.b.c".to_string();
        assert!(matches!(
            request.into_descriptor(),
            Err(Error::InvalidTable(_))
        ));
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        for header in [u64::MAX, 1u64 << 46, (MAX_FRAME_SIZE as u64) + 1] {
            let mut buf = BytesMut::new();
            buf.extend_from_slice(&header.to_le_bytes());
            buf.extend_from_slice(&[0x90]);
            assert!(matches!(
                RequestCodec.decode(&mut buf),
                Err(ProtocolError::Conversion(_))
            ));
            assert!(buf.capacity() < 1024);
        }
    }

    #[test]
    fn test_garbage_body_is_an_error() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&3u64.to_le_bytes());
        buf.extend_from_slice(&[0xC1, 0xC1, 0xC1]);
        assert!(matches!(
            RequestCodec.decode(&mut buf),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_encode_error_response() {
        let mut buf = BytesMut::new();
        RequestCodec
            .encode(Err::<Response, _>("boom"), &mut buf)
            .unwrap();

        let body_size = u64::from_le_bytes(buf[..HEADER_SIZE].try_into().unwrap()) as usize;
        assert_eq!(body_size, buf.len() - HEADER_SIZE);
        let decoded: Result<Response, String> = rmp_serde::from_slice(&buf[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, Err("boom".to_string()));
    }
}
