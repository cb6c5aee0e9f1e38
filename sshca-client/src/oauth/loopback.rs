//! The loopback redirect listener: a short-lived HTTP listener on
//! `127.0.0.1` that receives the identity provider's OAuth redirect.
//!
//! Design doc §9's "Coroutine-style browser dance" note asks for this to be
//! modeled as "a bounded scoped task that completes when either (a) a code
//! is received, (b) an `access_denied` is received, or (c) a timeout
//! fires" — exactly the three outcomes [`listen`] produces.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use sshca_core::error::IssueError;

/// What the redirect carried.
pub enum LoopbackOutcome {
    /// A successful authorization: the code to exchange, and the `state`
    /// value the caller must check against what it sent.
    Code { code: String, state: String },
    /// The user declined consent at the identity provider.
    AccessDenied,
}

const MAX_REQUEST_BYTES: usize = 8 * 1024;
const SUCCESS_BODY: &str =
    "<html><body><h1>Signed in</h1><p>You may close this window and return to the terminal.</p></body></html>";
const DENIED_BODY: &str = "<html><body><h1>Access denied</h1><p>You may close this window.</p></body></html>";

/// Binds the first free port in `port_range` (inclusive). The caller needs
/// the bound port before it can build a `redirect_uri` that matches what
/// it's actually listening on, so this is split from [`accept_redirect`]
/// rather than folded into one call.
pub async fn bind_listener(port_range: (u16, u16)) -> Result<(u16, TcpListener), IssueError> {
    let (start, end) = port_range;
    for port in start..=end {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await {
            return Ok((port, listener));
        }
    }
    Err(IssueError::transport(format!("no free loopback port in {start}-{end}")))
}

/// Waits up to `timeout` for a single redirect request on `listener`.
pub async fn accept_redirect(listener: &TcpListener, timeout: Duration) -> Result<LoopbackOutcome, IssueError> {
    tokio::time::timeout(timeout, accept_and_handle(listener))
        .await
        .map_err(|_| IssueError::transport("timed out waiting for the oauth redirect"))?
}

/// Binds then waits for a single redirect, design doc §4.9: "a
/// local-redirect loopback listener on an ephemeral port".
pub async fn listen(port_range: (u16, u16), timeout: Duration) -> Result<(u16, LoopbackOutcome), IssueError> {
    let (port, listener) = bind_listener(port_range).await?;
    let outcome = accept_redirect(&listener, timeout).await?;
    Ok((port, outcome))
}

async fn accept_and_handle(listener: &TcpListener) -> Result<LoopbackOutcome, IssueError> {
    let (mut stream, _) = listener
        .accept()
        .await
        .map_err(|e| IssueError::transport(format!("loopback accept failed: {e}")))?;

    let request_line = read_request_line(&mut stream).await?;
    let query = parse_query(&request_line);

    let (body, outcome) =
        match (query.get("error").map(String::as_str), query.get("code"), query.get("state")) {
            (Some("access_denied"), _, _) => (DENIED_BODY, LoopbackOutcome::AccessDenied),
            (_, Some(code), Some(state)) =>
                (SUCCESS_BODY, LoopbackOutcome::Code { code: code.clone(), state: state.clone() }),
            _ => return Err(IssueError::transport("redirect carried neither an authorization code nor an error")),
        };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body,
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| IssueError::transport(format!("loopback write failed: {e}")))?;
    let _ = stream.flush().await;

    Ok(outcome)
}

async fn read_request_line(stream: &mut tokio::net::TcpStream) -> Result<String, IssueError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await.map_err(|e| IssueError::transport(format!("loopback read failed: {e}")))?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    let request = String::from_utf8_lossy(&buf);
    Ok(request.lines().next().unwrap_or("").to_string())
}

/// Parses the query string out of an HTTP request line like
/// `GET /callback?code=...&state=... HTTP/1.1`.
fn parse_query(request_line: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(path) = request_line.split_whitespace().nth(1) else { return map };
    let Some((_, query)) = path.split_once('?') else { return map };
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            let k = percent_encoding::percent_decode_str(k).decode_utf8_lossy().into_owned();
            let v = percent_encoding::percent_decode_str(v).decode_utf8_lossy().into_owned();
            map.insert(k, v);
        }
    }
    map
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_code_and_state_from_request_line() {
        let query = parse_query("GET /callback?code=abc123&state=xyz HTTP/1.1");
        assert_eq!(query.get("code").unwrap(), "abc123");
        assert_eq!(query.get("state").unwrap(), "xyz");
    }

    #[test]
    fn parses_percent_encoded_values() {
        let query = parse_query("GET /callback?code=a%2Fb%3Dc HTTP/1.1");
        assert_eq!(query.get("code").unwrap(), "a/b=c");
    }

    #[test]
    fn parses_access_denied_error() {
        let query = parse_query("GET /callback?error=access_denied&state=xyz HTTP/1.1");
        assert_eq!(query.get("error").unwrap(), "access_denied");
    }

    #[test]
    fn missing_query_string_yields_empty_map() {
        let query = parse_query("GET /callback HTTP/1.1");
        assert!(query.is_empty());
    }

    #[tokio::test]
    async fn listen_returns_code_outcome_for_a_real_redirect() {
        let listen_fut = listen((18085, 18095), Duration::from_secs(5));

        let client_fut = async {
            // Give the listener a moment to bind before we connect.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", 18085)).await.unwrap();
            stream.write_all(b"GET /callback?code=abc123&state=xyz HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n").await.unwrap();
            let mut resp = Vec::new();
            let mut buf = [0u8; 1024];
            // Read whatever the server sends back; a real browser would keep
            // reading until EOF, which happens here because the handler
            // closes the connection after responding.
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                resp.extend_from_slice(&buf[..n]);
            }
            resp
        };

        let (_port, (response, outcome)) = tokio::join!(client_fut, async {
            let result = listen_fut.await.unwrap();
            (Vec::<u8>::new(), result.1)
        });
        let _ = response;

        match outcome {
            LoopbackOutcome::Code { code, state } => {
                assert_eq!(code, "abc123");
                assert_eq!(state, "xyz");
            }
            LoopbackOutcome::AccessDenied => panic!("expected a code outcome"),
        }
    }

    #[tokio::test]
    async fn listen_times_out_without_a_connection() {
        let result = listen((18096, 18100), Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
