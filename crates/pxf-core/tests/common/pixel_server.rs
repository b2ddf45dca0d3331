//! Minimal HTTP/1.1 server answering pixel lookups for integration tests.
//!
//! Understands `/s0/pixel/<blockX>/<blockY>?x=<x>&y=<y>` and
//! `/q?blockX=..&blockY=..&x=..&y=..`, and answers with
//! `{"paintedBy":{"id":"<blockX>:<blockY>:<x>:<y>","picture":"data:..."}}`.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct PixelServerOptions {
    /// In-block (x, y) offsets answered with a null identifier.
    pub no_id: Vec<(i64, i64)>,
    /// First request for each point gets `429` with `Retry-After: 0`.
    pub throttle_first: bool,
    /// Delay before answering every request.
    pub delay: Option<Duration>,
}

pub struct PixelServer {
    pub base: String,
    hits: Arc<AtomicUsize>,
}

impl PixelServer {
    /// Template in placeholder mode pointing at this server.
    pub fn template(&self) -> String {
        format!("{}s0/pixel/{{blockX}}/{{blockY}}?x={{lx}}&y={{ly}}", self.base)
    }

    /// Requests served so far (any status).
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub fn start(opts: PixelServerOptions) -> PixelServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let throttled: Arc<Mutex<HashSet<(i64, i64, i64, i64)>>> = Arc::default();
    let opts = Arc::new(opts);
    {
        let hits = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let hits = Arc::clone(&hits);
                let throttled = Arc::clone(&throttled);
                let opts = Arc::clone(&opts);
                thread::spawn(move || handle(stream, &opts, &hits, &throttled));
            }
        });
    }
    PixelServer {
        base: format!("http://127.0.0.1:{}/", port),
        hits,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    opts: &PixelServerOptions,
    hits: &AtomicUsize,
    throttled: &Mutex<HashSet<(i64, i64, i64, i64)>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    hits.fetch_add(1, Ordering::SeqCst);
    if let Some(d) = opts.delay {
        thread::sleep(d);
    }
    let target = request
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/");
    let Some(point) = parse_target(target) else {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        return;
    };

    if opts.throttle_first && throttled.lock().unwrap().insert(point) {
        let _ = stream.write_all(
            b"HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let (bx, by, x, y) = point;
    let body = if opts.no_id.contains(&(x, y)) {
        r#"{"paintedBy":{"id":null,"name":""}}"#.to_string()
    } else {
        format!(
            r#"{{"paintedBy":{{"id":"{}:{}:{}:{}","name":"p","picture":"data:image/png;base64,AAAA"}}}}"#,
            bx, by, x, y
        )
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

/// `(blockX, blockY, x, y)` from either supported URL shape.
fn parse_target(target: &str) -> Option<(i64, i64, i64, i64)> {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let mut bx = None;
    let mut by = None;
    let mut x = None;
    let mut y = None;
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            let v = v.parse::<i64>().ok();
            match k {
                "blockX" => bx = v,
                "blockY" => by = v,
                "x" => x = v,
                "y" => y = v,
                _ => {}
            }
        }
    }
    let segs: Vec<&str> = path.trim_matches('/').split('/').collect();
    if let ["s0", "pixel", a, b] = segs.as_slice() {
        bx = a.parse().ok();
        by = b.parse().ok();
    }
    Some((bx?, by?, x?, y?))
}
