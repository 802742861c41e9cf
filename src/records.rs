//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//!Record framing for Network Time Security Key Establishment (NTS-KE)
//!
//!See <https://datatracker.ietf.org/doc/rfc8915/>. An NTS-KE message
//! is a sequence of TLV records carried over TLS: a 16-bit record
//! type whose high bit marks the record critical, a 16-bit body
//! length, and the body. A message ends with an End of Message
//! record.

use std::fmt;
use std::iter::FromIterator;
use tokio::io;
use tokio::prelude::*;

#[cfg(test)]
use quickcheck::{Arbitrary, Gen};
#[cfg(test)]
use rand::Rng;

///An NTS-KE record type number
#[derive(Debug, Copy, Clone, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct RecordNumber(pub u16);

#[cfg(test)]
impl Arbitrary for RecordNumber {
    fn arbitrary<G: Gen>(g: &mut G) -> RecordNumber {
        RecordNumber(u16::arbitrary(g) & 0x7fff)
    }
}

///An NTS-KE error code, carried in an Error record
#[derive(Debug, Copy, Clone, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct ErrorCode(pub u16);

#[cfg(test)]
impl Arbitrary for ErrorCode {
    fn arbitrary<G: Gen>(g: &mut G) -> ErrorCode {
        ErrorCode(u16::arbitrary(g))
    }
}

///An NTS-KE warning code, carried in a Warning record
#[derive(Debug, Copy, Clone, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct WarningCode(pub u16);

#[cfg(test)]
impl Arbitrary for WarningCode {
    fn arbitrary<G: Gen>(g: &mut G) -> WarningCode {
        WarningCode(u16::arbitrary(g))
    }
}

///An NTS next-protocol number
#[derive(Debug, Copy, Clone, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct NextProtocol(pub u16);

#[cfg(test)]
impl Arbitrary for NextProtocol {
    fn arbitrary<G: Gen>(g: &mut G) -> NextProtocol {
        NextProtocol(u16::arbitrary(g))
    }
}

///An RFC 5116 [AEAD algorithm](https://tools.ietf.org/html/rfc5116#section-6) number
#[derive(Debug, Copy, Clone, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct AeadAlgorithm(pub u16);

#[cfg(test)]
impl Arbitrary for AeadAlgorithm {
    fn arbitrary<G: Gen>(g: &mut G) -> AeadAlgorithm {
        AeadAlgorithm(u16::arbitrary(g))
    }
}

pub const RECORD_NUMBER_END_OF_MESSAGE: RecordNumber = RecordNumber(0);
pub const RECORD_NUMBER_NEXT_PROTOCOL_NEGOTIATION: RecordNumber = RecordNumber(1);
pub const RECORD_NUMBER_ERROR: RecordNumber = RecordNumber(2);
pub const RECORD_NUMBER_WARNING: RecordNumber = RecordNumber(3);
pub const RECORD_NUMBER_AEAD_ALGORITHM_NEGOTIATION: RecordNumber = RecordNumber(4);
pub const RECORD_NUMBER_NEW_COOKIE: RecordNumber = RecordNumber(5);
pub const RECORD_NUMBER_SERVER_NEGOTIATION: RecordNumber = RecordNumber(6);
pub const RECORD_NUMBER_PORT_NEGOTIATION: RecordNumber = RecordNumber(7);

pub const ERROR_UNRECOGNIZED_CRITICAL_RECORD: ErrorCode = ErrorCode(0);
pub const ERROR_BAD_REQUEST: ErrorCode = ErrorCode(1);
pub const ERROR_INTERNAL_SERVER_ERROR: ErrorCode = ErrorCode(2);

pub const NEXT_PROTOCOL_NTPV4: NextProtocol = NextProtocol(0);

//These are the five currently-registered AEAD algorithms that are
// sane to use with NTS. We support the first and, for cookie secrets
// only, the third.
pub const AEAD_AES_SIV_CMAC_256: AeadAlgorithm = AeadAlgorithm(15);
pub const AEAD_AES_SIV_CMAC_384: AeadAlgorithm = AeadAlgorithm(16);
pub const AEAD_AES_SIV_CMAC_512: AeadAlgorithm = AeadAlgorithm(17);
pub const AEAD_AES_128_GCM_SIV: AeadAlgorithm = AeadAlgorithm(30);
pub const AEAD_AES_256_GCM_SIV: AeadAlgorithm = AeadAlgorithm(31);

///ALPN protocol ID for NTS-KE
pub const NTSKE_ALPN: &[u8] = b"ntske/1";

///Everything that can go wrong while framing or deframing records
#[derive(Debug)]
pub enum RecordError {
    ///A record body longer than 65535 bytes cannot be encoded
    TooLong,
    ///The stream ended in the middle of a record
    ShortRead,
    ///The stream ended at a record boundary before an End of Message record
    MissingEnd,
    ///A record of a known type carried a body violating that type's shape
    Malformed(RecordNumber),
    ///Any other I/O error on the underlying stream
    Io(io::Error),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RecordError::*;
        match self {
            TooLong => write!(f, "record body exceeds 65535 bytes"),
            ShortRead => write!(f, "stream ended in the middle of a record"),
            MissingEnd => write!(f, "message ended without an End of Message record"),
            Malformed(num) => write!(f, "malformed body in record of type {}", num.0),
            Io(e) => write!(f, "reading records: {}", e),
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordError::Io(e) => Some(e),
            _ => None,
        }
    }
}

///Representation of an NTS-KE record
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Record {
    ///End of message record
    EndOfMessage,
    ///NTS next protocol negotiation record
    NextProtocolNegotiation(Vec<NextProtocol>),
    ///Error record
    Error(ErrorCode),
    ///Warning record
    Warning(WarningCode),
    ///AEAD algorithm negotiation record
    AeadAlgorithmNegotiation(Vec<AeadAlgorithm>),
    ///New cookie for NTPv4 record. Body is opaque to the client.
    NewCookie(Vec<u8>),
    ///NTPv4 server negotiation record
    ServerNegotiation(String),
    ///NTPv4 port negotiation record
    PortNegotiation(u16),
    ///Raw representation of any unrecognized record. Gives critical bit, record type, and body
    UnrecognizedRecord(bool, RecordNumber, Vec<u8>),
}

#[cfg(test)]
impl Arbitrary for Record {
    fn arbitrary<G: Gen>(g: &mut G) -> Record {
        use Record::*;
        match g.gen_range(0, 9) {
            0 => EndOfMessage,
            1 => NextProtocolNegotiation(Vec::<NextProtocol>::arbitrary(g)),
            2 => Error(ErrorCode::arbitrary(g)),
            3 => Warning(WarningCode::arbitrary(g)),
            4 => AeadAlgorithmNegotiation(Vec::<AeadAlgorithm>::arbitrary(g)),
            5 => NewCookie(Vec::<u8>::arbitrary(g)),
            6 => ServerNegotiation(String::arbitrary(g)),
            7 => PortNegotiation(u16::arbitrary(g)),
            _ => UnrecognizedRecord(
                bool::arbitrary(g),
                RecordNumber(g.gen_range(8, 0x8000)),
                Vec::<u8>::arbitrary(g),
            ),
        }
    }
}

///Parse a string of big-endian 16-bit unsigned integers.
fn parse_be_u16_vec(buf: &[u8]) -> Option<Vec<u16>> {
    if buf.len() & 1 == 1 {
        return None;
    }
    let mut bufptr = buf;
    let mut out: Vec<u16> = Vec::with_capacity(buf.len() >> 1);
    while !bufptr.is_empty() {
        out.push(u16::from_be_bytes([bufptr[0], bufptr[1]]));
        bufptr = &bufptr[2..];
    }
    Some(out)
}

impl Record {
    ///Parse an NTS-KE record. `head` is the first four bytes of the
    /// record (containing record type and body length), `body` is the
    /// rest. Unknown record types parse successfully into
    /// `UnrecognizedRecord`; whether to tolerate them is the
    /// exchange engine's call, based on the critical bit.
    pub fn parse(head: &[u8], body: &[u8]) -> Result<Record, RecordError> {
        assert!(head.len() == 4);
        let crit_num = u16::from_be_bytes([head[0], head[1]]);
        let crit = crit_num & (1 << 15) != 0;
        let rec_num = RecordNumber(crit_num & 0x7fff);
        let body_len = u16::from_be_bytes([head[2], head[3]]);
        assert!(body_len as usize == body.len());

        let malformed = RecordError::Malformed(rec_num);

        match rec_num {
            RECORD_NUMBER_END_OF_MESSAGE => {
                if body_len > 0 {
                    Err(malformed)
                } else {
                    Ok(Record::EndOfMessage)
                }
            }
            RECORD_NUMBER_NEXT_PROTOCOL_NEGOTIATION => match parse_be_u16_vec(body) {
                None => Err(malformed),
                Some(protos) => Ok(Record::NextProtocolNegotiation(Vec::from_iter(
                    protos.into_iter().map(NextProtocol),
                ))),
            },
            RECORD_NUMBER_ERROR => {
                if body_len != 2 {
                    Err(malformed)
                } else {
                    Ok(Record::Error(ErrorCode(u16::from_be_bytes([
                        body[0], body[1],
                    ]))))
                }
            }
            RECORD_NUMBER_WARNING => {
                if body_len != 2 {
                    Err(malformed)
                } else {
                    Ok(Record::Warning(WarningCode(u16::from_be_bytes([
                        body[0], body[1],
                    ]))))
                }
            }
            RECORD_NUMBER_AEAD_ALGORITHM_NEGOTIATION => match parse_be_u16_vec(body) {
                None => Err(malformed),
                Some(algos) => Ok(Record::AeadAlgorithmNegotiation(Vec::from_iter(
                    algos.into_iter().map(AeadAlgorithm),
                ))),
            },
            RECORD_NUMBER_NEW_COOKIE => Ok(Record::NewCookie(body.to_vec())),
            RECORD_NUMBER_SERVER_NEGOTIATION => match String::from_utf8(body.to_vec()) {
                Err(_) => Err(malformed),
                Ok(host) => Ok(Record::ServerNegotiation(host)),
            },
            RECORD_NUMBER_PORT_NEGOTIATION => {
                if body_len != 2 {
                    Err(malformed)
                } else {
                    Ok(Record::PortNegotiation(u16::from_be_bytes([
                        body[0], body[1],
                    ])))
                }
            }
            _ => Ok(Record::UnrecognizedRecord(crit, rec_num, body.to_vec())),
        }
    }

    ///Returns the record number indicating the type of this record.
    pub fn record_number(&self) -> RecordNumber {
        use Record::*;
        match self {
            EndOfMessage => RECORD_NUMBER_END_OF_MESSAGE,
            NextProtocolNegotiation(_) => RECORD_NUMBER_NEXT_PROTOCOL_NEGOTIATION,
            Error(_) => RECORD_NUMBER_ERROR,
            Warning(_) => RECORD_NUMBER_WARNING,
            AeadAlgorithmNegotiation(_) => RECORD_NUMBER_AEAD_ALGORITHM_NEGOTIATION,
            NewCookie(_) => RECORD_NUMBER_NEW_COOKIE,
            ServerNegotiation(_) => RECORD_NUMBER_SERVER_NEGOTIATION,
            PortNegotiation(_) => RECORD_NUMBER_PORT_NEGOTIATION,
            UnrecognizedRecord(_, n, _) => RecordNumber(n.0),
        }
    }

    ///Return whether this record is written with its critical bit
    /// set, i.e., whether a receiver that doesn't understand it must
    /// abort the exchange rather than ignore it.
    fn is_critical(&self) -> bool {
        use Record::*;
        match self {
            EndOfMessage => true,
            NextProtocolNegotiation(_) => true,
            Error(_) => true,
            Warning(_) => false,
            AeadAlgorithmNegotiation(_) => true,
            NewCookie(_) => false,
            ServerNegotiation(_) => false,
            PortNegotiation(_) => false,
            UnrecognizedRecord(c, _, _) => *c,
        }
    }

    ///Returns how long this record's body will be when serialized.
    fn body_length(&self) -> usize {
        use Record::*;
        match self {
            EndOfMessage => 0,
            NextProtocolNegotiation(protos) => 2 * protos.len(),
            Error(_) => 2,
            Warning(_) => 2,
            AeadAlgorithmNegotiation(algos) => 2 * algos.len(),
            NewCookie(cookie) => cookie.len(),
            ServerNegotiation(host) => host.len(),
            PortNegotiation(_) => 2,
            UnrecognizedRecord(_, _, v) => v.len(),
        }
    }

    ///Extend `v` with a serialized representation of this record.
    pub fn extend(&self, v: &mut Vec<u8>) -> Result<(), RecordError> {
        let body_len = self.body_length();
        if body_len > u16::max_value() as usize {
            return Err(RecordError::TooLong);
        }

        //First two bytes of the serialized record: record type and critical bit
        let crit_and_type = if self.is_critical() {
            (1 << 15 as u16) | self.record_number().0
        } else {
            self.record_number().0
        };

        let old_len = v.len(); //Just for debugging so we can check the assertion at the bottom
        v.extend_from_slice(&crit_and_type.to_be_bytes());
        v.extend_from_slice(&(body_len as u16).to_be_bytes());

        match self {
            Record::EndOfMessage => {}
            Record::NextProtocolNegotiation(protos) => {
                for proto in protos {
                    v.extend_from_slice(&proto.0.to_be_bytes());
                }
            }
            Record::Error(error) => {
                v.extend_from_slice(&error.0.to_be_bytes());
            }
            Record::Warning(warning) => {
                v.extend_from_slice(&warning.0.to_be_bytes());
            }
            Record::AeadAlgorithmNegotiation(algos) => {
                for algo in algos {
                    v.extend_from_slice(&algo.0.to_be_bytes());
                }
            }
            Record::NewCookie(cookie) => {
                v.extend_from_slice(cookie.as_slice());
            }
            Record::ServerNegotiation(host) => {
                v.extend_from_slice(host.as_bytes());
            }
            Record::PortNegotiation(port) => {
                v.extend_from_slice(&port.to_be_bytes());
            }
            Record::UnrecognizedRecord(_, _, body) => {
                v.extend_from_slice(body.as_slice());
            }
        };

        debug_assert!(v.len() == old_len + body_len + 4);
        Ok(())
    }
}

///Asynchronously serialize and write `records` to `stream`.
pub async fn write_records<A: io::AsyncWrite + std::marker::Unpin>(
    stream: &mut A,
    records: &[Record],
) -> Result<(), RecordError> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    for record in records {
        record.extend(&mut buf)?;
    }

    stream.write_all(&buf).await.map_err(RecordError::Io)?;
    Ok(())
}

///Asynchronously read and parse NTS-KE records from `stream` until an
/// End of Message record is seen.
pub async fn read_records<A: io::AsyncRead + std::marker::Unpin>(
    stream: &mut A,
) -> Result<Vec<Record>, RecordError> {
    let mut records = Vec::<Record>::new();
    loop {
        let mut head = [0; 4];
        match stream.read_exact(&mut head).await {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(RecordError::MissingEnd)
            }
            Err(e) => return Err(RecordError::Io(e)),
        }
        let body_len = u16::from_be_bytes([head[2], head[3]]) as usize;
        let mut body = vec![0; body_len];
        match stream.read_exact(&mut body).await {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(RecordError::ShortRead)
            }
            Err(e) => return Err(RecordError::Io(e)),
        }
        let record = Record::parse(&head, body.as_slice())?;
        match record {
            Record::EndOfMessage => {
                records.push(record);
                return Ok(records);
            }
            _ => records.push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::env;
    use std::iter;

    ///A whole well-formed message: arbitrary records, none of them
    /// End of Message, with an End of Message appended.
    #[derive(Debug, Clone)]
    struct Message(Vec<Record>);

    impl Arbitrary for Message {
        fn arbitrary<G: Gen>(g: &mut G) -> Message {
            let num_records = g.gen_range(0, g.size());
            Message(Vec::from_iter(
                iter::repeat_with(|| Record::arbitrary(g))
                    .filter(|record| *record != Record::EndOfMessage)
                    .take(num_records)
                    .chain(iter::once(Record::EndOfMessage)),
            ))
        }
    }

    fn qc_tests() -> u64 {
        let default = 100;
        match env::var("QUICKCHECK_TESTS") {
            Ok(val) => val.parse().unwrap_or(default),
            Err(_) => default,
        }
    }

    fn qc_gen_size() -> usize {
        let default = 100;
        match env::var("QUICKCHECK_GENERATOR_SIZE") {
            Ok(val) => val.parse().unwrap_or(default),
            Err(_) => default,
        }
    }

    #[tokio::test]
    async fn records_round_trip() {
        let mut g = quickcheck::StdGen::new(rand::rngs::StdRng::from_entropy(), qc_gen_size());
        for _ in 0..qc_tests() {
            let mut buf = Vec::new();
            let records_written = Message::arbitrary(&mut g).0;
            write_records(&mut buf, &records_written).await.unwrap();
            let mut buf_ptr = buf.as_slice();
            let records_read = read_records(&mut buf_ptr).await.unwrap();
            assert!(buf_ptr.is_empty()); //Assert the whole buffer was consumed
            assert_eq!(records_written, records_read);
        }
    }

    #[test]
    fn critical_bit_round_trips() {
        let mut g = quickcheck::StdGen::new(rand::rngs::StdRng::from_entropy(), qc_gen_size());
        for _ in 0..qc_tests() {
            let record = Record::arbitrary(&mut g);
            let mut buf = Vec::new();
            record.extend(&mut buf).unwrap();
            let written_crit = buf[0] & 0x80 != 0;
            assert_eq!(written_crit, record.is_critical());
            let written_num = u16::from_be_bytes([buf[0] & 0x7f, buf[1]]);
            assert_eq!(written_num, record.record_number().0);
        }
    }

    #[tokio::test]
    async fn missing_end_of_message() {
        let mut buf = Vec::new();
        write_records(
            &mut buf,
            &[Record::NextProtocolNegotiation(vec![NEXT_PROTOCOL_NTPV4])],
        )
        .await
        .unwrap();
        let mut buf_ptr = buf.as_slice();
        match read_records(&mut buf_ptr).await {
            Err(RecordError::MissingEnd) => {}
            other => panic!("expected MissingEnd, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn truncated_record() {
        let mut buf = Vec::new();
        write_records(&mut buf, &[Record::NewCookie(vec![0xab; 32])])
            .await
            .unwrap();
        buf.truncate(10); //Cut into the middle of the cookie body
        let mut buf_ptr = buf.as_slice();
        match read_records(&mut buf_ptr).await {
            Err(RecordError::ShortRead) => {}
            other => panic!("expected ShortRead, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn odd_length_u16_sequence_is_malformed() {
        //Next protocol negotiation record with a three-byte body
        let buf = [0x80, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut buf_ptr = &buf[..];
        match read_records(&mut buf_ptr).await {
            Err(RecordError::Malformed(RECORD_NUMBER_NEXT_PROTOCOL_NEGOTIATION)) => {}
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn nonempty_end_of_message_is_malformed() {
        let buf = [0x80, 0x00, 0x00, 0x01, 0x00];
        let mut buf_ptr = &buf[..];
        match read_records(&mut buf_ptr).await {
            Err(RecordError::Malformed(RECORD_NUMBER_END_OF_MESSAGE)) => {}
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_utf8_server_is_malformed() {
        let buf = [0x00, 0x06, 0x00, 0x02, 0xff, 0xfe];
        let mut buf_ptr = &buf[..];
        match read_records(&mut buf_ptr).await {
            Err(RecordError::Malformed(RECORD_NUMBER_SERVER_NEGOTIATION)) => {}
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn oversized_body_refuses_to_encode() {
        let record = Record::NewCookie(vec![0; 0x10000]);
        let mut buf = Vec::new();
        match record.extend(&mut buf) {
            Err(RecordError::TooLong) => {}
            other => panic!("expected TooLong, got {:?}", other),
        }
    }

    #[test]
    fn known_record_numbers() {
        assert_eq!(Record::EndOfMessage.record_number().0, 0);
        assert_eq!(
            Record::NextProtocolNegotiation(vec![]).record_number().0,
            1
        );
        assert_eq!(Record::Error(ERROR_BAD_REQUEST).record_number().0, 2);
        assert_eq!(Record::Warning(WarningCode(0)).record_number().0, 3);
        assert_eq!(Record::AeadAlgorithmNegotiation(vec![]).record_number().0, 4);
        assert_eq!(Record::NewCookie(vec![]).record_number().0, 5);
        assert_eq!(
            Record::ServerNegotiation(String::new()).record_number().0,
            6
        );
        assert_eq!(Record::PortNegotiation(123).record_number().0, 7);
    }
}
