//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//!NTS-protected NTPv4 queries
//!
//!One query, one cookie: the request carries a unique identifier, the
//! cookie, and an AEAD authenticator computed under the C2S key; the
//! response echoes the identifier and authenticates under the S2C
//! key. Extension fields follow the RFC 7822 framing (type, length,
//! value, padded to four bytes).
//!
//!This implements only what the polling client needs. Cookies the
//! server may enclose in its response are not extracted; the client
//! re-keys by running another NTS-KE exchange instead.

use crate::aead::{GenericArrayExt, SivCipher, SivNonce};
use log::trace;
use rand::{thread_rng, RngCore};
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::time;

///Offset between the NTP epoch (1900) and the Unix epoch (1970), in seconds
const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

const NTP_HEADER_LEN: usize = 48;
const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const VERSION: u8 = 4;
///Leap indicator value meaning the peer's clock is unsynchronized
const LEAP_UNSYNC: u8 = 3;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

//NTS extension field types
const EF_UNIQUE_IDENTIFIER: u16 = 0x0104;
const EF_NTS_COOKIE: u16 = 0x0204;
const EF_NTS_AUTHENTICATOR: u16 = 0x0404;

///Enumeration of everything that can go wrong in an NTP query
#[derive(Debug)]
pub enum NtpError {
    ///Socket-level failure
    Io(io::Error),
    ///No response within the query timeout
    Timeout,
    ///The response violates the NTP or extension-field framing
    Malformed(&'static str),
    ///The response fails authentication
    Auth(&'static str),
    ///The response parsed and authenticated but isn't usable time
    Invalid(&'static str),
}

impl fmt::Display for NtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use NtpError::*;
        match self {
            Io(e) => write!(f, "NTP socket: {}", e),
            Timeout => write!(f, "no NTP response within {:?}", QUERY_TIMEOUT),
            Malformed(what) => write!(f, "malformed NTP response: {}", what),
            Auth(what) => write!(f, "NTP response authentication: {}", what),
            Invalid(what) => write!(f, "NTP response unusable: {}", what),
        }
    }
}

impl std::error::Error for NtpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NtpError::Io(e) => Some(e),
            _ => None,
        }
    }
}

///Options for one NTP query
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    ///Destination port; 0 means the NTP default, 123
    pub port: u16,
    ///Protect the query with NTS extension fields
    pub nts: bool,
    ///Client-to-server key from the key exchange
    pub c2s: Vec<u8>,
    ///Server-to-client key from the key exchange
    pub s2c: Vec<u8>,
    ///One cookie, consumed by this query
    pub cookie: Vec<u8>,
    pub debug: bool,
}

///A validated-enough NTP server response
#[derive(Debug, Clone)]
pub struct Response {
    ///The server's transmit timestamp
    pub time: SystemTime,
    ///Our clock's offset from the server's, in seconds; positive
    /// means we're behind
    pub clock_offset: f64,
    ///Round-trip delay in seconds
    pub rtt: f64,
    pub stratum: u8,
    pub leap: u8,
}

impl Response {
    ///Check that the response describes time worth trusting. The
    /// cryptographic checks have already happened during the query;
    /// this is about the server's own claims.
    pub fn validate(&self) -> Result<(), NtpError> {
        if self.leap == LEAP_UNSYNC {
            return Err(NtpError::Invalid("server clock is unsynchronized"));
        }
        if self.stratum == 0 {
            return Err(NtpError::Invalid("kiss-of-death response"));
        }
        if self.stratum > 15 {
            return Err(NtpError::Invalid("stratum out of range"));
        }
        Ok(())
    }
}

///A 64-bit NTP timestamp: seconds since 1900 and a 32-bit fraction.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
struct NtpTimestamp {
    seconds: u32,
    fraction: u32,
}

impl NtpTimestamp {
    fn now() -> NtpTimestamp {
        NtpTimestamp::from_system(SystemTime::now())
    }

    fn from_system(t: SystemTime) -> NtpTimestamp {
        let since = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        NtpTimestamp {
            seconds: (since.as_secs() + NTP_EPOCH_OFFSET) as u32,
            fraction: (((since.subsec_nanos() as u64) << 32) / 1_000_000_000) as u32,
        }
    }

    fn to_system(self) -> SystemTime {
        let secs = (self.seconds as u64).saturating_sub(NTP_EPOCH_OFFSET);
        let nanos = ((self.fraction as u64) * 1_000_000_000) >> 32;
        UNIX_EPOCH + Duration::new(secs, nanos as u32)
    }

    ///Seconds since the Unix epoch, with fraction, for offset arithmetic
    fn as_seconds(self) -> f64 {
        self.seconds as f64 - NTP_EPOCH_OFFSET as f64
            + self.fraction as f64 / (1u64 << 32) as f64
    }

    fn is_zero(self) -> bool {
        self.seconds == 0 && self.fraction == 0
    }

    fn read(buf: &[u8]) -> NtpTimestamp {
        NtpTimestamp {
            seconds: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            fraction: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    fn write(self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.seconds.to_be_bytes());
        buf[4..8].copy_from_slice(&self.fraction.to_be_bytes());
    }
}

///Append one extension field, padded out to a four-byte boundary.
fn push_extension(buf: &mut Vec<u8>, field_type: u16, value: &[u8]) {
    let length = 4 + value.len();
    let padded = (length + 3) & !3;
    buf.extend_from_slice(&field_type.to_be_bytes());
    buf.extend_from_slice(&(length as u16).to_be_bytes());
    buf.extend_from_slice(value);
    buf.resize(buf.len() + (padded - length), 0);
}

///One extension field, borrowed out of the packet. `offset` is where
/// the field starts relative to the beginning of the extension data,
/// which is what the authenticator's associated data is defined by.
#[derive(Debug)]
struct RawExtension<'a> {
    field_type: u16,
    value: &'a [u8],
    offset: usize,
}

fn parse_extensions(data: &[u8]) -> Result<Vec<RawExtension<'_>>, NtpError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset + 4 <= data.len() {
        let field_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        if length < 4 {
            return Err(NtpError::Malformed("extension field length below minimum"));
        }
        if offset + length > data.len() {
            return Err(NtpError::Malformed("extension field overruns packet"));
        }
        out.push(RawExtension {
            field_type,
            value: &data[offset + 4..offset + length],
            offset,
        });
        offset += (length + 3) & !3;
    }
    Ok(out)
}

///The authenticator's value: nonce length, nonce padded to four
/// bytes, ciphertext length, ciphertext.
fn encode_authenticator(nonce: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(8 + nonce.len() + ciphertext.len());
    value.extend_from_slice(&(nonce.len() as u16).to_be_bytes());
    value.extend_from_slice(nonce);
    let nonce_padded = (2 + nonce.len() + 3) & !3;
    value.resize(nonce_padded, 0);
    value.extend_from_slice(&(ciphertext.len() as u16).to_be_bytes());
    value.extend_from_slice(ciphertext);
    value
}

fn decode_authenticator(value: &[u8]) -> Result<(SivNonce, &[u8]), NtpError> {
    if value.len() < 2 {
        return Err(NtpError::Malformed("authenticator too short"));
    }
    let nonce_len = u16::from_be_bytes([value[0], value[1]]) as usize;
    if 2 + nonce_len > value.len() {
        return Err(NtpError::Malformed("authenticator nonce overruns field"));
    }
    let nonce = SivNonce::try_clone_from_slice(&value[2..2 + nonce_len])
        .map_err(|_| NtpError::Malformed("authenticator nonce has unexpected length"))?;

    let ct_offset = (2 + nonce_len + 3) & !3;
    if ct_offset + 2 > value.len() {
        return Err(NtpError::Malformed("authenticator truncated"));
    }
    let ct_len = u16::from_be_bytes([value[ct_offset], value[ct_offset + 1]]) as usize;
    let ct_start = ct_offset + 2;
    if ct_start + ct_len > value.len() {
        return Err(NtpError::Malformed("authenticator ciphertext overruns field"));
    }
    Ok((nonce, &value[ct_start..ct_start + ct_len]))
}

///Verify the NTS extension fields on a response: the unique
/// identifier must echo ours and the authenticator must verify under
/// the S2C key over everything that precedes it.
fn verify_nts(packet: &[u8], uid: &[u8], s2c: &[u8]) -> Result<(), NtpError> {
    let extensions = parse_extensions(&packet[NTP_HEADER_LEN..])?;

    let resp_uid = extensions
        .iter()
        .find(|e| e.field_type == EF_UNIQUE_IDENTIFIER)
        .ok_or(NtpError::Auth("response lacks a unique identifier"))?;
    if resp_uid.value != uid {
        return Err(NtpError::Auth("unique identifier mismatch"));
    }

    let auth = extensions
        .iter()
        .find(|e| e.field_type == EF_NTS_AUTHENTICATOR)
        .ok_or(NtpError::Auth("response lacks an authenticator"))?;
    let (nonce, ciphertext) = decode_authenticator(auth.value)?;

    let cipher = SivCipher::from_key(s2c).ok_or(NtpError::Auth("unusable S2C key length"))?;
    let associated_data = &packet[..NTP_HEADER_LEN + auth.offset];
    cipher
        .open(&nonce, associated_data, ciphertext)
        .map_err(|_| NtpError::Auth("authenticator verification failed"))?;
    Ok(())
}

///Build the request packet. Returns the serialized packet, our
/// transmit timestamp, and the unique identifier (empty when NTS is
/// off).
fn build_request(opts: &QueryOptions) -> Result<(Vec<u8>, NtpTimestamp, Vec<u8>), NtpError> {
    let t1 = NtpTimestamp::now();
    let mut request = vec![0u8; NTP_HEADER_LEN];
    request[0] = (VERSION << 3) | MODE_CLIENT;
    t1.write(&mut request[40..48]);

    let mut uid = Vec::new();
    if opts.nts {
        uid = vec![0u8; 32];
        thread_rng().fill_bytes(&mut uid);
        push_extension(&mut request, EF_UNIQUE_IDENTIFIER, &uid);
        push_extension(&mut request, EF_NTS_COOKIE, &opts.cookie);

        let cipher =
            SivCipher::from_key(&opts.c2s).ok_or(NtpError::Auth("unusable C2S key length"))?;
        let mut nonce = SivNonce::default();
        thread_rng().fill_bytes(nonce.as_mut_slice());
        //Everything written so far is the associated data; the
        // plaintext is empty since we have no extensions to encrypt.
        let ciphertext = cipher
            .seal(&nonce, &request, &[])
            .map_err(|_| NtpError::Auth("sealing request failed"))?;
        let authenticator = encode_authenticator(nonce.as_slice(), &ciphertext);
        push_extension(&mut request, EF_NTS_AUTHENTICATOR, &authenticator);
    }

    Ok((request, t1, uid))
}

///Interpret a response packet against the request that elicited it.
fn interpret_response(
    packet: &[u8],
    t1: NtpTimestamp,
    t4: NtpTimestamp,
    uid: &[u8],
    opts: &QueryOptions,
) -> Result<Response, NtpError> {
    if packet.len() < NTP_HEADER_LEN {
        return Err(NtpError::Malformed("response shorter than an NTP header"));
    }

    let leap = packet[0] >> 6;
    let version = (packet[0] >> 3) & 7;
    let mode = packet[0] & 7;
    if version != VERSION {
        return Err(NtpError::Malformed("unexpected NTP version"));
    }
    if mode != MODE_SERVER {
        return Err(NtpError::Malformed("response is not in server mode"));
    }
    let stratum = packet[1];

    let origin = NtpTimestamp::read(&packet[24..32]);
    if origin != t1 {
        return Err(NtpError::Auth("origin timestamp does not echo our request"));
    }
    let t2 = NtpTimestamp::read(&packet[32..40]);
    let t3 = NtpTimestamp::read(&packet[40..48]);
    if t3.is_zero() {
        return Err(NtpError::Malformed("zero transmit timestamp"));
    }

    if opts.nts {
        verify_nts(packet, uid, &opts.s2c)?;
    }

    let clock_offset =
        ((t2.as_seconds() - t1.as_seconds()) + (t3.as_seconds() - t4.as_seconds())) / 2.0;
    let rtt = (t4.as_seconds() - t1.as_seconds()) - (t3.as_seconds() - t2.as_seconds());

    Ok(Response {
        time: t3.to_system(),
        clock_offset,
        rtt,
        stratum,
        leap,
    })
}

///Perform one NTP query against `server`, authenticated per the
/// options.
pub async fn query(server: &str, opts: QueryOptions) -> Result<Response, NtpError> {
    let port = if opts.port == 0 { 123 } else { opts.port };
    let addr = (server, port)
        .to_socket_addrs()
        .map_err(NtpError::Io)?
        .next()
        .ok_or_else(|| {
            NtpError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "server name resolved to no addresses",
            ))
        })?;

    let local: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(local).await.map_err(NtpError::Io)?;
    socket.connect(&addr).await.map_err(NtpError::Io)?;

    let (request, t1, uid) = build_request(&opts)?;
    if opts.debug {
        trace!("NTP request to {}: {:x?}", addr, request);
    }
    socket.send(&request).await.map_err(NtpError::Io)?;

    let mut buf = vec![0u8; 4096];
    let len = match time::timeout(QUERY_TIMEOUT, socket.recv(&mut buf)).await {
        Ok(result) => result.map_err(NtpError::Io)?,
        Err(_) => return Err(NtpError::Timeout),
    };
    let t4 = NtpTimestamp::now();
    if opts.debug {
        trace!("NTP response from {}: {:x?}", addr, &buf[..len]);
    }

    interpret_response(&buf[..len], t1, t4, &uid, &opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options() -> QueryOptions {
        QueryOptions {
            port: 0,
            nts: true,
            c2s: vec![0x42; 32],
            s2c: vec![0x43; 32],
            cookie: vec![0xab; 100],
            debug: false,
        }
    }

    ///Build a well-formed NTS response to `request`, signed under `s2c`.
    fn make_response(request: &[u8], s2c: &[u8], stratum: u8, leap: u8) -> Vec<u8> {
        let client_transmit = NtpTimestamp::read(&request[40..48]);
        let uid = parse_extensions(&request[NTP_HEADER_LEN..])
            .unwrap()
            .into_iter()
            .find(|e| e.field_type == EF_UNIQUE_IDENTIFIER)
            .expect("request lacks a UID")
            .value
            .to_vec();

        let mut response = vec![0u8; NTP_HEADER_LEN];
        response[0] = (leap << 6) | (VERSION << 3) | MODE_SERVER;
        response[1] = stratum;
        client_transmit.write(&mut response[24..32]); //origin = client transmit
        NtpTimestamp::now().write(&mut response[32..40]);
        NtpTimestamp::now().write(&mut response[40..48]);
        push_extension(&mut response, EF_UNIQUE_IDENTIFIER, &uid);

        let cipher = SivCipher::from_key(s2c).unwrap();
        let mut nonce = SivNonce::default();
        thread_rng().fill_bytes(nonce.as_mut_slice());
        let ciphertext = cipher.seal(&nonce, &response, &[]).unwrap();
        let authenticator = encode_authenticator(nonce.as_slice(), &ciphertext);
        push_extension(&mut response, EF_NTS_AUTHENTICATOR, &authenticator);
        response
    }

    #[test]
    fn timestamp_round_trips_through_wire_form() {
        let ts = NtpTimestamp::now();
        let mut buf = [0u8; 8];
        ts.write(&mut buf);
        assert_eq!(NtpTimestamp::read(&buf), ts);
    }

    #[test]
    fn timestamp_system_time_round_trip() {
        let now = SystemTime::now();
        let there_and_back = NtpTimestamp::from_system(now).to_system();
        let error = match there_and_back.duration_since(now) {
            Ok(d) => d,
            Err(e) => e.duration(),
        };
        //Fraction conversion loses less than a nanosecond
        assert!(error < Duration::from_nanos(2));
    }

    #[test]
    fn extension_fields_round_trip() {
        let mut buf = Vec::new();
        push_extension(&mut buf, EF_UNIQUE_IDENTIFIER, &[0xaa; 32]);
        push_extension(&mut buf, EF_NTS_COOKIE, &[0xbb; 101]); //unaligned length
        let fields = parse_extensions(&buf).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].field_type, EF_UNIQUE_IDENTIFIER);
        assert_eq!(fields[0].value, &[0xaa; 32][..]);
        assert_eq!(fields[1].field_type, EF_NTS_COOKIE);
        assert_eq!(fields[1].value, &[0xbb; 101][..]);
        assert_eq!(fields[1].offset, 36);
    }

    #[test]
    fn extension_field_overrun_is_malformed() {
        let mut buf = Vec::new();
        push_extension(&mut buf, EF_NTS_COOKIE, &[0xbb; 32]);
        buf.truncate(buf.len() - 1);
        match parse_extensions(&buf) {
            Err(NtpError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn authenticator_round_trips() {
        let nonce = [0x11u8; 16];
        let ciphertext = vec![0x22u8; 48];
        let value = encode_authenticator(&nonce, &ciphertext);
        let (parsed_nonce, parsed_ct) = decode_authenticator(&value).unwrap();
        assert_eq!(parsed_nonce.as_slice(), &nonce[..]);
        assert_eq!(parsed_ct, ciphertext.as_slice());
    }

    #[test]
    fn validate_rejects_unusable_servers() {
        let mut response = Response {
            time: SystemTime::now(),
            clock_offset: 0.0,
            rtt: 0.0,
            stratum: 2,
            leap: 0,
        };
        assert!(response.validate().is_ok());
        response.leap = LEAP_UNSYNC;
        assert!(response.validate().is_err());
        response.leap = 0;
        response.stratum = 0;
        assert!(response.validate().is_err());
        response.stratum = 16;
        assert!(response.validate().is_err());
    }

    #[test]
    fn response_interpretation_end_to_end() {
        let opts = test_options();
        let (request, t1, uid) = build_request(&opts).unwrap();
        let response = make_response(&request, &opts.s2c, 2, 0);
        let t4 = NtpTimestamp::now();
        let parsed = interpret_response(&response, t1, t4, &uid, &opts).unwrap();
        assert_eq!(parsed.stratum, 2);
        assert!(parsed.clock_offset.abs() < 1.0);
        parsed.validate().unwrap();
    }

    #[test]
    fn tampered_response_fails_authentication() {
        let opts = test_options();
        let (request, t1, uid) = build_request(&opts).unwrap();
        let mut response = make_response(&request, &opts.s2c, 2, 0);
        //The last two bytes are field padding; step past them into
        // the authenticator ciphertext proper.
        let idx = response.len() - 4;
        response[idx] ^= 1;
        let t4 = NtpTimestamp::now();
        match interpret_response(&response, t1, t4, &uid, &opts) {
            Err(NtpError::Auth(_)) => {}
            other => panic!("expected Auth error, got {:?}", other),
        }
    }

    #[test]
    fn response_signed_with_wrong_key_fails() {
        let opts = test_options();
        let (request, t1, uid) = build_request(&opts).unwrap();
        let response = make_response(&request, &[0x99; 32], 2, 0);
        let t4 = NtpTimestamp::now();
        match interpret_response(&response, t1, t4, &uid, &opts) {
            Err(NtpError::Auth(_)) => {}
            other => panic!("expected Auth error, got {:?}", other),
        }
    }

    #[test]
    fn response_with_wrong_uid_fails() {
        let opts = test_options();
        let (request, t1, _uid) = build_request(&opts).unwrap();
        let response = make_response(&request, &opts.s2c, 2, 0);
        let t4 = NtpTimestamp::now();
        match interpret_response(&response, t1, t4, &[0xde; 32], &opts) {
            Err(NtpError::Auth(_)) => {}
            other => panic!("expected Auth error, got {:?}", other),
        }
    }

    #[test]
    fn response_with_wrong_origin_fails() {
        let opts = test_options();
        let (request, _t1, uid) = build_request(&opts).unwrap();
        let response = make_response(&request, &opts.s2c, 2, 0);
        let bogus_t1 = NtpTimestamp {
            seconds: 1,
            fraction: 2,
        };
        let t4 = NtpTimestamp::now();
        match interpret_response(&response, bogus_t1, t4, &uid, &opts) {
            Err(NtpError::Auth(_)) => {}
            other => panic!("expected Auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn loopback_query() {
        let opts = test_options();
        let s2c = opts.s2c.clone();

        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let response = make_response(&buf[..len], &s2c, 2, 0);
            server.send_to(&response, &peer).await.unwrap();
        });

        let mut opts = opts;
        opts.port = port;
        let response = query("127.0.0.1", opts).await.unwrap();
        response.validate().unwrap();
        assert!(response.clock_offset.abs() < 1.0);
    }

    #[tokio::test]
    async fn loopback_query_detects_tampering() {
        let opts = test_options();
        let s2c = opts.s2c.clone();

        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut response = make_response(&buf[..len], &s2c, 2, 0);
            let idx = response.len() - 4;
            response[idx] ^= 0x80;
            server.send_to(&response, &peer).await.unwrap();
        });

        let mut opts = opts;
        opts.port = port;
        match query("127.0.0.1", opts).await {
            Err(NtpError::Auth(_)) => {}
            other => panic!("expected Auth error, got {:?}", other),
        }
    }
}
