//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//!The NTS-KE exchange itself: client and server state machines
//!
//!A key exchange runs over an established TLS 1.2 session. The client
//! writes its whole request, the server reads it and writes its whole
//! response, and both sides derive the session keys from the TLS
//! master secret via the RFC 5705 exporter, so the keys never touch
//! the wire.

use crate::cookie::{CookieError, PlainCookie};
use crate::records::*;
use log::{debug, trace};
use rand::{thread_rng, CryptoRng, RngCore};
use std::fmt;
use tokio::io;
use tokio::net::TcpStream;
use tokio::prelude::*;
use tokio_rustls::rustls::{Session, TLSError};
use tokio_rustls::webpki::DNSNameRef;

///RFC 5705 exporter label for NTS
pub const EXPORTER_LABEL: &[u8] = b"EXPORTER-network-time-security/1";

///Key direction byte closing the exporter context: client-to-server
const KEY_DIRECTION_C2S: u8 = 0;
///Key direction byte closing the exporter context: server-to-client
const KEY_DIRECTION_S2C: u8 = 1;

///Default port for the NTS-KE service itself
pub const DEFAULT_NTSKE_PORT: u16 = 4460;

///Default port for the negotiated NTP service
pub const DEFAULT_NTP_PORT: u16 = 123;

///An enumeration of everything that can go wrong in a key exchange
#[derive(Debug)]
pub enum ExchangeError {
    ///TCP connect or TLS handshake failure
    Io(io::Error),
    ///Record framing failure
    Wire(RecordError),
    ///The peer responded with an Error record
    ServerError(ErrorCode),
    ///The peer sent an unrecognized record with its critical bit set
    UnrecognizedCriticalRecord(RecordNumber),
    ///The response offered no next protocol we speak
    NextProtocolNegotiationFailed,
    ///The response offered no AEAD algorithm we support
    AeadNegotiationFailed,
    ///The exchange succeeded but the server issued no cookies
    NoCookies,
    ///The response was structurally invalid (e.g. duplicated negotiation records)
    BadResponse,
    ///The TLS session would not export keying material
    NoExporter(TLSError),
    ///Minting a cookie failed (server side)
    Cookie(CookieError),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ExchangeError::*;
        match self {
            Io(e) => write!(f, "connecting for NTS-KE: {}", e),
            Wire(e) => write!(f, "in NTS-KE message: {}", e),
            ServerError(code) => write!(f, "peer sent NTS-KE error {}", code.0),
            UnrecognizedCriticalRecord(num) => {
                write!(f, "peer sent unrecognized critical record {}", num.0)
            }
            NextProtocolNegotiationFailed => write!(f, "next-protocol negotiation failed"),
            AeadNegotiationFailed => write!(f, "AEAD algorithm negotiation failed"),
            NoCookies => write!(f, "exchange succeeded but no cookies were returned"),
            BadResponse => write!(f, "structurally invalid NTS-KE message"),
            NoExporter(e) => write!(f, "TLS session cannot export keying material: {}", e),
            Cookie(e) => write!(f, "minting cookie: {}", e),
        }
    }
}

impl std::error::Error for ExchangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use ExchangeError::*;
        match self {
            Io(e) => Some(e),
            Wire(e) => Some(e),
            Cookie(e) => Some(e),
            NoExporter(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RecordError> for ExchangeError {
    fn from(e: RecordError) -> ExchangeError {
        ExchangeError::Wire(e)
    }
}

///Session keys and NTP service parameters negotiated by a completed
/// key exchange
#[derive(Debug, Clone)]
pub struct Data {
    ///Client-to-server key, derived from the TLS session
    pub c2s_key: Vec<u8>,
    ///Server-to-client key, derived from the TLS session
    pub s2c_key: Vec<u8>,
    ///Host to direct NTP queries at
    pub server: String,
    ///Port to direct NTP queries at
    pub port: u16,
    ///The negotiated AEAD algorithm
    pub algo: AeadAlgorithm,
    ///Cookies, in the order the server issued them
    pub cookies: Vec<Vec<u8>>,
}

impl Default for Data {
    fn default() -> Data {
        Data {
            c2s_key: Vec::new(),
            s2c_key: Vec::new(),
            server: String::new(),
            port: DEFAULT_NTP_PORT,
            algo: AeadAlgorithm(0),
            cookies: Vec::new(),
        }
    }
}

///Per-key-output length for a negotiated algorithm, or `None` if we
/// don't support the algorithm. Future algorithms may specify other
/// sizes.
fn key_length(algo: AeadAlgorithm) -> Option<usize> {
    match algo {
        AEAD_AES_SIV_CMAC_256 => Some(32),
        _ => None,
    }
}

///Build the 5-byte exporter context: next protocol and algorithm,
/// big-endian, followed by the key direction.
fn exporter_context(next_proto: NextProtocol, algo: AeadAlgorithm, direction: u8) -> [u8; 5] {
    let proto = next_proto.0.to_be_bytes();
    let algo = algo.0.to_be_bytes();
    [proto[0], proto[1], algo[0], algo[1], direction]
}

///Derive the C2S and S2C keys from a TLS session via the RFC 5705
/// exporter. Both sides of the connection compute the same pair.
pub fn extract_session_keys<S: Session>(
    session: &S,
    next_proto: NextProtocol,
    algo: AeadAlgorithm,
) -> Result<(Vec<u8>, Vec<u8>), ExchangeError> {
    let len = key_length(algo).ok_or(ExchangeError::AeadNegotiationFailed)?;

    let mut c2s = vec![0; len];
    session
        .export_keying_material(
            &mut c2s,
            EXPORTER_LABEL,
            Some(&exporter_context(next_proto, algo, KEY_DIRECTION_C2S)),
        )
        .map_err(ExchangeError::NoExporter)?;
    let mut s2c = vec![0; len];
    session
        .export_keying_material(
            &mut s2c,
            EXPORTER_LABEL,
            Some(&exporter_context(next_proto, algo, KEY_DIRECTION_S2C)),
        )
        .map_err(ExchangeError::NoExporter)?;
    Ok((c2s, s2c))
}

///The request this client always sends: NTPv4, AES-SIV-CMAC-256.
fn make_request() -> Vec<Record> {
    vec![
        Record::NextProtocolNegotiation(vec![NEXT_PROTOCOL_NTPV4]),
        Record::AeadAlgorithmNegotiation(vec![AEAD_AES_SIV_CMAC_256]),
        Record::EndOfMessage,
    ]
}

///Interpret a server's response records, populating everything in
/// `Data` except the session keys. `default_server` is the NTS-KE
/// host, used when the response carries no server negotiation record.
fn interpret_response(response: Vec<Record>, default_server: &str) -> Result<Data, ExchangeError> {
    let mut next_protocol_seen = false;
    let mut next_protocol_ok = false;
    let mut algo: Option<AeadAlgorithm> = None;
    let mut server: Option<String> = None;
    let mut port = DEFAULT_NTP_PORT;
    let mut cookies = Vec::new();

    for record in response {
        match record {
            Record::EndOfMessage => break,
            Record::NextProtocolNegotiation(protos) => {
                if next_protocol_seen {
                    return Err(ExchangeError::BadResponse);
                }
                next_protocol_seen = true;
                if protos.contains(&NEXT_PROTOCOL_NTPV4) {
                    next_protocol_ok = true;
                }
            }
            Record::Error(code) => return Err(ExchangeError::ServerError(code)),
            Record::Warning(code) => {
                debug!("Ignoring warning {} in NTS-KE response", code.0);
            }
            Record::AeadAlgorithmNegotiation(algos) => {
                if algo.is_some() || algos.len() != 1 {
                    return Err(ExchangeError::BadResponse);
                }
                algo = Some(algos[0]);
            }
            Record::NewCookie(cookie) => cookies.push(cookie),
            Record::ServerNegotiation(host) => server = Some(host),
            Record::PortNegotiation(p) => port = p,
            Record::UnrecognizedRecord(critical, num, _) => {
                if critical {
                    return Err(ExchangeError::UnrecognizedCriticalRecord(num));
                }
            }
        }
    }

    if !next_protocol_ok {
        return Err(ExchangeError::NextProtocolNegotiationFailed);
    }
    //We only ever offer AES-SIV-CMAC-256, so anything else coming
    // back is the server's error, not a preference.
    match algo {
        Some(AEAD_AES_SIV_CMAC_256) => {}
        _ => return Err(ExchangeError::AeadNegotiationFailed),
    }
    if cookies.is_empty() {
        return Err(ExchangeError::NoCookies);
    }

    Ok(Data {
        c2s_key: Vec::new(),
        s2c_key: Vec::new(),
        server: server.unwrap_or_else(|| default_server.to_string()),
        port,
        algo: AEAD_AES_SIV_CMAC_256,
        cookies,
    })
}

///Split a `host:port` server string, defaulting to the NTS-KE port.
pub fn split_host_port(server: &str) -> (&str, u16) {
    match server.rfind(':') {
        Some(idx) => match server[idx + 1..].parse() {
            Ok(port) => (&server[..idx], port),
            Err(_) => (server, DEFAULT_NTSKE_PORT),
        },
        None => (server, DEFAULT_NTSKE_PORT),
    }
}

///A client-side key exchange session.
///
///Owns the TLS connection for its whole lifetime; `connect`,
/// `exchange` and `export_keys` walk it through the protocol, after
/// which `into_data` surrenders the negotiated state.
pub struct KeyExchange {
    stream: tokio_rustls::client::TlsStream<TcpStream>,
    host: String,
    ///Negotiated session state, populated by `exchange` and `export_keys`
    pub data: Data,
    debug: bool,
}

impl KeyExchange {
    ///Establish a TLS session with an NTS-KE server. `server` is a
    /// `host` or `host:port` string; the port defaults to 4460.
    pub async fn connect(
        server: &str,
        connector: &tokio_rustls::TlsConnector,
        debug: bool,
    ) -> Result<KeyExchange, ExchangeError> {
        let (host, port) = split_host_port(server);
        let dns_name = DNSNameRef::try_from_ascii_str(host).map_err(|_| {
            ExchangeError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a valid DNS name", host),
            ))
        })?;

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(ExchangeError::Io)?;
        let stream = connector
            .connect(dns_name, tcp)
            .await
            .map_err(ExchangeError::Io)?;
        debug!("Established NTS-KE session with {}:{}", host, port);

        Ok(KeyExchange {
            stream,
            host: host.to_string(),
            data: Data::default(),
            debug,
        })
    }

    ///Run the exchange: write our request, read the response, and
    /// populate everything in `data` except the session keys.
    pub async fn exchange(&mut self) -> Result<(), ExchangeError> {
        let request = make_request();
        trace!("NTS-KE request body: {:?}", request);
        write_records(&mut self.stream, &request).await?;

        let response = read_records(&mut self.stream).await?;
        trace!("NTS-KE response body: {:?}", response);

        self.data = interpret_response(response, &self.host)?;
        if self.debug {
            debug!(
                "NTS-KE yielded algo {}, server {}:{}, {} cookie(s)",
                self.data.algo.0,
                self.data.server,
                self.data.port,
                self.data.cookies.len()
            );
        }
        Ok(())
    }

    ///Derive the session keys from the TLS session. Must run after
    /// `exchange`, since the exporter context includes the negotiated
    /// algorithm.
    pub fn export_keys(&mut self) -> Result<(), ExchangeError> {
        let (_, session) = self.stream.get_ref();
        let (c2s, s2c) = extract_session_keys(session, NEXT_PROTOCOL_NTPV4, self.data.algo)?;
        self.data.c2s_key = c2s;
        self.data.s2c_key = s2c;
        Ok(())
    }

    ///Consume the session, keeping the negotiated state. Dropping the
    /// TLS stream closes the connection; the server has already
    /// closed its end after sending End of Message.
    pub fn into_data(self) -> Data {
        self.data
    }
}

///Read-only state shared by every server-side NTS-KE session
pub struct ServerContext {
    ///Identifies the cookie secret to clients' eventual NTP server
    pub key_id: u16,
    ///The cookie secret; 32 or 64 bytes
    pub secret: Vec<u8>,
    ///NTP host to advertise in responses
    pub ntp_server: String,
    ///NTP port to advertise in responses
    pub ntp_port: u16,
}

///What a validated request asked for.
#[derive(Debug)]
struct RequestSummary {
    next_protocol_seen: bool,
    next_protocol_ok: bool,
    aead_seen: bool,
    aead_ok: bool,
}

///Validate a client request. A structurally bad request yields the
/// error code to answer with; negotiation mismatches are reported in
/// the summary instead, since they get a cookie-less success response.
fn check_request(request: &[Record]) -> Result<RequestSummary, ErrorCode> {
    let mut summary = RequestSummary {
        next_protocol_seen: false,
        next_protocol_ok: false,
        aead_seen: false,
        aead_ok: false,
    };

    for record in request {
        match record {
            Record::EndOfMessage => break,
            Record::NextProtocolNegotiation(protos) => {
                if summary.next_protocol_seen {
                    return Err(ERROR_BAD_REQUEST);
                }
                summary.next_protocol_seen = true;
                if protos.contains(&NEXT_PROTOCOL_NTPV4) {
                    summary.next_protocol_ok = true;
                }
            }
            Record::AeadAlgorithmNegotiation(algos) => {
                if summary.aead_seen {
                    return Err(ERROR_BAD_REQUEST);
                }
                summary.aead_seen = true;
                if algos.contains(&AEAD_AES_SIV_CMAC_256) {
                    summary.aead_ok = true;
                }
            }
            //Clients have no business sending any of these
            Record::Error(_) => return Err(ERROR_BAD_REQUEST),
            Record::Warning(_) => return Err(ERROR_BAD_REQUEST),
            Record::NewCookie(_) => return Err(ERROR_BAD_REQUEST),
            //A client may ask for a particular NTP endpoint; we
            // always dictate our own, so these are noted and ignored.
            Record::ServerNegotiation(host) => {
                debug!("Client requested NTP server {}; not honoring", host);
            }
            Record::PortNegotiation(port) => {
                debug!("Client requested NTP port {}; not honoring", port);
            }
            Record::UnrecognizedRecord(critical, _, _) => {
                if *critical {
                    return Err(ERROR_UNRECOGNIZED_CRITICAL_RECORD);
                }
            }
        }
    }

    if !summary.next_protocol_seen || !summary.aead_seen {
        return Err(ERROR_BAD_REQUEST);
    }

    Ok(summary)
}

fn make_error_response(error: ErrorCode) -> Vec<Record> {
    vec![Record::Error(error), Record::EndOfMessage]
}

///Construct the response to a validated request. When negotiation
/// succeeded this mints one cookie holding the session keys.
fn build_response<R: RngCore + CryptoRng>(
    summary: &RequestSummary,
    ctx: &ServerContext,
    c2s: &[u8],
    s2c: &[u8],
    rng: &mut R,
) -> Result<Vec<Record>, CookieError> {
    let mut response = Vec::with_capacity(6);

    let next_protocols = if summary.next_protocol_ok {
        vec![NEXT_PROTOCOL_NTPV4]
    } else {
        Vec::new()
    };
    response.push(Record::NextProtocolNegotiation(next_protocols));

    let algos = if summary.aead_ok {
        vec![AEAD_AES_SIV_CMAC_256]
    } else {
        Vec::new()
    };
    response.push(Record::AeadAlgorithmNegotiation(algos));

    if !summary.next_protocol_ok || !summary.aead_ok {
        response.push(Record::EndOfMessage);
        return Ok(response);
    }

    response.push(Record::ServerNegotiation(ctx.ntp_server.clone()));
    response.push(Record::PortNegotiation(ctx.ntp_port));

    let plain = PlainCookie {
        algo: AEAD_AES_SIV_CMAC_256,
        s2c: s2c.to_vec(),
        c2s: c2s.to_vec(),
    };
    let sealed = plain.encrypt(&ctx.secret, ctx.key_id, rng)?;
    response.push(Record::NewCookie(sealed.to_bytes()));

    response.push(Record::EndOfMessage);
    Ok(response)
}

///Run the NTS-KE protocol as a server on one accepted session.
///
///Reads the client's request, derives the session keys from the TLS
/// session, and answers with the negotiated parameters and a sealed
/// cookie. Protocol violations are answered with an Error record
/// before the connection closes.
pub async fn serve_ntske(
    ctx: &ServerContext,
    stream: &mut tokio_rustls::server::TlsStream<TcpStream>,
) -> Result<(), ExchangeError> {
    let request = match read_records(stream).await {
        Ok(request) => request,
        Err(e) => {
            if let RecordError::Malformed(_) = e {
                let _ = write_records(stream, &make_error_response(ERROR_BAD_REQUEST)).await;
            }
            return Err(ExchangeError::Wire(e));
        }
    };
    trace!("NTS-KE request body: {:?}", request);

    let response = match check_request(&request) {
        Err(code) => {
            write_records(stream, &make_error_response(code)).await?;
            return match code {
                ERROR_UNRECOGNIZED_CRITICAL_RECORD => {
                    //Report which record we balked at
                    let num = request
                        .iter()
                        .find_map(|r| match r {
                            Record::UnrecognizedRecord(true, num, _) => Some(*num),
                            _ => None,
                        })
                        .unwrap_or(RecordNumber(0));
                    Err(ExchangeError::UnrecognizedCriticalRecord(num))
                }
                _ => Err(ExchangeError::BadResponse),
            };
        }
        Ok(summary) => {
            let (_, session) = stream.get_ref();
            let keys = extract_session_keys(session, NEXT_PROTOCOL_NTPV4, AEAD_AES_SIV_CMAC_256);
            let (c2s, s2c) = match keys {
                Ok(keys) => keys,
                Err(e) => {
                    let _ = write_records(
                        stream,
                        &make_error_response(ERROR_INTERNAL_SERVER_ERROR),
                    )
                    .await;
                    return Err(e);
                }
            };
            let build_result = {
                let mut rng = thread_rng();
                build_response(&summary, ctx, &c2s, &s2c, &mut rng)
            };
            match build_result {
                Ok(response) => response,
                Err(e) => {
                    let _ = write_records(
                        stream,
                        &make_error_response(ERROR_INTERNAL_SERVER_ERROR),
                    )
                    .await;
                    return Err(ExchangeError::Cookie(e));
                }
            }
        }
    };

    trace!("NTS-KE response body: {:?}", response);
    write_records(stream, &response).await?;
    stream.shutdown().await.map_err(ExchangeError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::EncryptedCookie;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn test_context() -> ServerContext {
        ServerContext {
            key_id: 1,
            secret: SECRET.to_vec(),
            ntp_server: String::from("ntp1.glypnod.com"),
            ntp_port: 123,
        }
    }

    fn respond(request: &[Record]) -> Result<Vec<Record>, ErrorCode> {
        let summary = check_request(request)?;
        Ok(
            build_response(&summary, &test_context(), &[0xbb; 32], &[0xaa; 32], &mut thread_rng())
                .unwrap(),
        )
    }

    #[test]
    fn self_serve() {
        let response = respond(&make_request()).unwrap();
        let data = interpret_response(response, "ke.example.net").unwrap();

        assert_eq!(data.algo, AEAD_AES_SIV_CMAC_256);
        assert_eq!(data.server, "ntp1.glypnod.com");
        assert_eq!(data.port, 123);
        assert_eq!(data.cookies.len(), 1);

        //The cookie must decrypt, with the server's secret, to the
        // very keys the server put in.
        let cookie = EncryptedCookie::from_bytes(&data.cookies[0]).unwrap();
        let plain = cookie.decrypt(SECRET, 1).unwrap();
        assert_eq!(plain.algo, AEAD_AES_SIV_CMAC_256);
        assert_eq!(plain.c2s, vec![0xbb; 32]);
        assert_eq!(plain.s2c, vec![0xaa; 32]);
    }

    #[test]
    fn response_without_ntpv4_is_rejected() {
        let response = vec![
            Record::NextProtocolNegotiation(vec![NextProtocol(0x7777)]),
            Record::AeadAlgorithmNegotiation(vec![AEAD_AES_SIV_CMAC_256]),
            Record::NewCookie(vec![1, 2, 3]),
            Record::EndOfMessage,
        ];
        match interpret_response(response, "host") {
            Err(ExchangeError::NextProtocolNegotiationFailed) => {}
            other => panic!("expected negotiation failure, got {:?}", other),
        }
    }

    #[test]
    fn response_with_unsupported_algorithm_is_rejected() {
        let response = vec![
            Record::NextProtocolNegotiation(vec![NEXT_PROTOCOL_NTPV4]),
            Record::AeadAlgorithmNegotiation(vec![AEAD_AES_SIV_CMAC_512]),
            Record::NewCookie(vec![1, 2, 3]),
            Record::EndOfMessage,
        ];
        match interpret_response(response, "host") {
            Err(ExchangeError::AeadNegotiationFailed) => {}
            other => panic!("expected negotiation failure, got {:?}", other),
        }
    }

    #[test]
    fn response_offering_two_algorithms_is_rejected() {
        let response = vec![
            Record::NextProtocolNegotiation(vec![NEXT_PROTOCOL_NTPV4]),
            Record::AeadAlgorithmNegotiation(vec![AEAD_AES_SIV_CMAC_256, AEAD_AES_SIV_CMAC_512]),
            Record::EndOfMessage,
        ];
        match interpret_response(response, "host") {
            Err(ExchangeError::BadResponse) => {}
            other => panic!("expected BadResponse, got {:?}", other),
        }
    }

    #[test]
    fn response_without_cookies_is_rejected() {
        let response = vec![
            Record::NextProtocolNegotiation(vec![NEXT_PROTOCOL_NTPV4]),
            Record::AeadAlgorithmNegotiation(vec![AEAD_AES_SIV_CMAC_256]),
            Record::EndOfMessage,
        ];
        match interpret_response(response, "host") {
            Err(ExchangeError::NoCookies) => {}
            other => panic!("expected NoCookies, got {:?}", other),
        }
    }

    #[test]
    fn error_record_aborts_the_exchange() {
        let response = vec![Record::Error(ERROR_BAD_REQUEST), Record::EndOfMessage];
        match interpret_response(response, "host") {
            Err(ExchangeError::ServerError(ERROR_BAD_REQUEST)) => {}
            other => panic!("expected ServerError, got {:?}", other),
        }
    }

    #[test]
    fn unknown_critical_record_aborts_the_exchange() {
        let response = vec![
            Record::NextProtocolNegotiation(vec![NEXT_PROTOCOL_NTPV4]),
            Record::UnrecognizedRecord(true, RecordNumber(0x4321), vec![]),
            Record::EndOfMessage,
        ];
        match interpret_response(response, "host") {
            Err(ExchangeError::UnrecognizedCriticalRecord(RecordNumber(0x4321))) => {}
            other => panic!("expected critical-record abort, got {:?}", other),
        }
    }

    #[test]
    fn unknown_noncritical_record_is_ignored() {
        let mut response = respond(&make_request()).unwrap();
        response.insert(0, Record::UnrecognizedRecord(false, RecordNumber(0x4321), vec![1]));
        assert!(interpret_response(response, "host").is_ok());
    }

    #[test]
    fn duplicated_negotiation_records_are_rejected() {
        let response = vec![
            Record::NextProtocolNegotiation(vec![NEXT_PROTOCOL_NTPV4]),
            Record::NextProtocolNegotiation(vec![NEXT_PROTOCOL_NTPV4]),
            Record::EndOfMessage,
        ];
        match interpret_response(response, "host") {
            Err(ExchangeError::BadResponse) => {}
            other => panic!("expected BadResponse, got {:?}", other),
        }
    }

    #[test]
    fn absent_server_record_falls_back_to_ke_host() {
        let plain = PlainCookie {
            algo: AEAD_AES_SIV_CMAC_256,
            s2c: vec![0; 32],
            c2s: vec![0; 32],
        };
        let cookie = plain
            .encrypt(SECRET, 1, &mut thread_rng())
            .unwrap()
            .to_bytes();
        let response = vec![
            Record::NextProtocolNegotiation(vec![NEXT_PROTOCOL_NTPV4]),
            Record::AeadAlgorithmNegotiation(vec![AEAD_AES_SIV_CMAC_256]),
            Record::NewCookie(cookie),
            Record::EndOfMessage,
        ];
        let data = interpret_response(response, "ke.example.net").unwrap();
        assert_eq!(data.server, "ke.example.net");
        assert_eq!(data.port, DEFAULT_NTP_PORT);
    }

    #[test]
    fn request_with_cookie_record_is_bad() {
        let mut request = make_request();
        request.insert(0, Record::NewCookie(vec![1]));
        match check_request(&request) {
            Err(ERROR_BAD_REQUEST) => {}
            other => panic!("expected bad request, got {:?}", other),
        }
    }

    #[test]
    fn request_with_unknown_critical_record_gets_code_zero() {
        let mut request = make_request();
        request.insert(0, Record::UnrecognizedRecord(true, RecordNumber(0x4321), vec![]));
        match check_request(&request) {
            Err(ERROR_UNRECOGNIZED_CRITICAL_RECORD) => {}
            other => panic!("expected code 0, got {:?}", other),
        }
    }

    #[test]
    fn negotiation_mismatch_yields_cookieless_response() {
        let request = vec![
            Record::NextProtocolNegotiation(vec![NextProtocol(0x7777)]),
            Record::AeadAlgorithmNegotiation(vec![AEAD_AES_SIV_CMAC_256]),
            Record::EndOfMessage,
        ];
        let response = respond(&request).unwrap();
        assert!(response
            .iter()
            .all(|r| !matches!(r, Record::NewCookie(_))));
        //And the client side duly refuses it
        match interpret_response(response, "host") {
            Err(ExchangeError::NextProtocolNegotiationFailed) => {}
            other => panic!("expected negotiation failure, got {:?}", other),
        }
    }

    #[test]
    fn split_host_port_defaults() {
        assert_eq!(split_host_port("example.com"), ("example.com", 4460));
        assert_eq!(split_host_port("example.com:123"), ("example.com", 123));
        assert_eq!(
            split_host_port("example.com:bogus"),
            ("example.com:bogus", 4460)
        );
    }
}
