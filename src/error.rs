//! Crate-wide error taxonomy for the proxy core. One variant per failure
//! class in the spec's error design; no process-wide mutable error-message
//! singleton (the original C `errorMessage` static) — every fallible
//! operation returns its own value instead.

use std::io;

use quick_error::quick_error;

quick_error! {
    #[derive(Debug)]
    pub enum ProxyError {
        Parse(detail: String) {
            display("malformed request: {}", detail)
        }
        Resolve(host: String, source: io::Error) {
            display("could not resolve '{}': {}", host, source)
            source(source)
        }
        Connect(source: io::Error) {
            display("connect to origin failed: {}", source)
            source(source)
        }
        UpstreamIo(source: io::Error) {
            display("origin I/O error: {}", source)
            source(source)
        }
        DownstreamIo(source: io::Error) {
            display("client I/O error: {}", source)
            source(source)
        }
        TransformSpawn(stage: &'static str, source: io::Error) {
            display("transform spawn failed at {}: {}", stage, source)
            source(source)
        }
        TransformRuntime(detail: String) {
            display("transformer exited before producing output: {}", detail)
        }
        Timeout {
            display("connection idle timeout")
        }
        Selector(source: io::Error) {
            display("selector registration failed: {}", source)
            source(source)
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

quick_error! {
    #[derive(Debug)]
    pub enum AdminError {
        Auth(detail: String) {
            display("authentication rejected: {}", detail)
        }
        Version(server_version: u64) {
            display("protocol version mismatch, server is at {}", server_version)
        }
        Truncated {
            display("admin message truncated below the minimum frame size")
        }
        BadOpcode(byte: u8) {
            display("unrecognized opcode bits in request byte {:#04x}", byte)
        }
        Io(source: io::Error) {
            display("admin socket I/O error: {}", source)
            source(source)
        }
    }
}

pub type AdminResult<T> = Result<T, AdminError>;
