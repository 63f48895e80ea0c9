use segscope::backend::{http::HttpBackend, Backend};
use segscope::config::Config;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;

/// Serves one request with `head` followed by `body`, then closes the socket.
fn serve_once(head: String, body: &'static [u8]) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        stream.write_all(head.as_bytes()).unwrap();
        stream.write_all(body).unwrap();
        stream.flush().unwrap();
    });
    (base, handle)
}

fn backend(base: &str) -> HttpBackend {
    let mut cfg = Config::default();
    cfg.server.base_url = base.to_string();
    cfg.server.timeout_seconds = 5;
    HttpBackend::new(&cfg).unwrap()
}

#[test]
fn truncated_body_leaves_no_file_behind() {
    let head = "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\n".to_string();
    let (base, server) = serve_once(head, b"short");
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("p_masks.zip");

    let result = backend(&base).download(&format!("{base}/export/s/images.zip"), &dest);
    server.join().unwrap();

    assert!(result.is_err());
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn complete_body_lands_under_final_name() {
    let body: &'static [u8] = b"PK-archive-bytes";
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let (base, server) = serve_once(head, body);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("images.npz");

    let written = backend(&base)
        .download(&format!("{base}/export/s/images.npz"), &dest)
        .unwrap();
    server.join().unwrap();

    assert_eq!(written, body.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
