use std::sync::atomic::{AtomicUsize, Ordering};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Produces a socket path unique to this test process and call site, so
/// parallel test binaries never collide on `/tmp`.
pub fn unique_socket_path(prefix: &str) -> std::path::PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::path::PathBuf::from(format!(
        "/tmp/vitalring-test-{prefix}-{}-{n}.sock",
        std::process::id()
    ))
}
