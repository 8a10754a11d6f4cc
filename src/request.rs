use crate::error::Error;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use url::Url;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

// Builds the URL one virtual user connects to: the configured target with a
// username query parameter distinguishing the client, e.g.
// ws://host/ws?username=loadtest-3
pub fn client_url(target: &str, prefix: &str, index: usize) -> Result<Url, Error> {
    let mut url = Url::parse(target)?;
    if url.scheme() != "ws" {
        return Err(Error::InvalidSchemeURL);
    }
    url.query_pairs_mut()
        .append_pair("username", &format!("{}-{}", prefix, index));
    Ok(url)
}

// The TCP connection string for a parsed ws:// URL. The default port only
// applies when the URL carries none.
pub fn endpoint(url: &Url) -> Result<String, Error> {
    let host = url.host_str().ok_or(Error::URLNoHost)?;
    let port = url.port().unwrap_or(80);
    Ok(format!("{}:{}", host, port))
}

// Since we already have all the info, it isn't worth going through an HTTP
// request type, the upgrade request is assembled as a string and written to
// the socket as bytes.
pub fn build_upgrade_request(url: &Url, key: &str) -> Result<String, Error> {
    let host = url.host_str().ok_or(Error::URLNoHost)?;
    let host_field = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => String::from(host),
    };

    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    Ok(format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
        path, host_field, key,
    ))
}

// What the driver asserts on: the status code of the upgrade response, plus
// the accept key when the server sent one.
#[derive(Debug, Clone)]
pub struct UpgradeResponse {
    pub status: u16,
    pub accept: Option<String>,
}

pub fn parse_upgrade_response(head: &[u8]) -> Result<UpgradeResponse, Error> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(head)? {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => return Err(Error::IncompleteHandshake),
    }

    let status = response.code.ok_or(Error::IncompleteHandshake)?;
    let accept = response
        .headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case("Sec-WebSocket-Accept"))
        .map(|header| String::from_utf8_lossy(header.value).trim().to_string());

    Ok(UpgradeResponse { status, accept })
}

// The accept value is the SHA-1 of the request key concatenated with the
// RFC 6455 GUID, base64-encoded. Both sides compute it, the client to verify
// the server actually derived its answer from our key.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

pub fn generate_key() -> String {
    let random_bytes: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(random_bytes)
}
