//! A scripted HTTP/1.1 upstream for gateway and orchestrator tests.
//!
//! Each accepted connection consumes the next [`MockReply`] and serves exactly
//! one request. Once the script runs out the listener stops accepting.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub enum MockReply {
    Respond {
        status: u16,
        content_type: Option<&'static str>,
        body: String,
    },
    /// Reads the request, never answers, and signals once the client hangs up.
    Hang,
}

impl MockReply {
    pub fn json(body: serde_json::Value) -> Self {
        MockReply::Respond {
            status: 200,
            content_type: Some("application/json"),
            body: body.to_string(),
        }
    }

    pub fn text(body: &str) -> Self {
        MockReply::Respond {
            status: 200,
            content_type: Some("text/plain; charset=utf-8"),
            body: body.to_string(),
        }
    }

    pub fn status(status: u16, content_type: Option<&'static str>, body: &str) -> Self {
        MockReply::Respond {
            status,
            content_type,
            body: body.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

pub struct MockUpstream {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    disconnected: Arc<Notify>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(script: Vec<MockReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let disconnected = Arc::new(Notify::new());

        let captured = Arc::clone(&requests);
        let hung_up = Arc::clone(&disconnected);
        let task = tokio::spawn(async move {
            for reply in script {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(request) = read_http_request(&mut stream).await else {
                    continue;
                };
                captured.lock().expect("capture lock").push(request);

                match reply {
                    MockReply::Respond {
                        status,
                        content_type,
                        body,
                    } => {
                        let mut response = format!("HTTP/1.1 {status} Mock\r\nconnection: close\r\n");
                        if let Some(content_type) = content_type {
                            response.push_str(&format!("content-type: {content_type}\r\n"));
                        }
                        response.push_str(&format!(
                            "content-length: {}\r\n\r\n{body}",
                            body.len()
                        ));
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                    MockReply::Hang => {
                        let mut sink = [0_u8; 256];
                        while matches!(stream.read(&mut sink).await, Ok(read) if read > 0) {}
                        hung_up.notify_one();
                    }
                }
            }
        });

        Self {
            url: format!("http://{addr}"),
            requests,
            disconnected,
            task,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().expect("capture lock").clone()
    }

    /// Resolves once a [`MockReply::Hang`] connection has been dropped by the client.
    pub async fn wait_for_disconnect(&self) {
        self.disconnected.notified().await;
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A client that ignores proxy environment variables.
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("test client should build")
}

/// A loopback URL nothing is listening on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    drop(listener);
    format!("http://{addr}")
}

async fn read_http_request(stream: &mut TcpStream) -> Result<CapturedRequest, String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.unwrap_or(buffer.len());
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        request_line,
        headers,
        body,
    })
}
