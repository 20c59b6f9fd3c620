//! Integration test driving the transform child and chunk framing together
//! the way the connection state machine does, but against a real pipe and
//! a real `stderr` file rather than mocks.

use std::io::Read;

use httpd_proxy::transform::child::TransformChild;
use httpd_proxy::transform::chunked::unchunk;
use httpd_proxy::transform::stage::TransformStage;

#[test]
fn tr_command_uppercases_body_and_frames_as_chunks() {
    let stderr_file = tempfile::NamedTempFile::new().expect("tempfile");
    let stderr_path = stderr_file.path().to_str().unwrap().to_string();

    let child = TransformChild::spawn("tr a-z A-Z", &stderr_path).expect("spawn tr");
    let mut stage = TransformStage::new(child);

    let (origin_r, origin_w) = nix::unistd::pipe().expect("pipe");
    nix::unistd::write(origin_w, b"abc").unwrap();
    nix::unistd::close(origin_w).unwrap();

    for _ in 0..500 {
        let _ = stage.on_origin_readable(origin_r);
        let _ = stage.on_transform_stdin_writable();
        let _ = stage.on_transform_stdout_readable();
        if stage.is_finished() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    assert!(stage.is_finished());
    let framed = stage.take_chunked_output();
    assert_eq!(unchunk(&framed), b"ABC".to_vec());

    nix::unistd::close(origin_r).ok();
    stage.shutdown();
}

#[test]
fn spawn_failure_on_missing_binary_is_reported() {
    // A command whose exec target doesn't exist is caught by the single
    // post-fork WNOHANG probe, and the child's stderr still ends up in the
    // configured sink.
    let stderr_file = tempfile::NamedTempFile::new().expect("tempfile");
    let stderr_path = stderr_file.path().to_str().unwrap().to_string();
    let result = TransformChild::spawn("exec /definitely/not/a/binary", &stderr_path);
    assert!(result.is_err());

    let mut log = String::new();
    std::fs::File::open(&stderr_path)
        .unwrap()
        .read_to_string(&mut log)
        .ok();
}
