//! Entry point: parse CLI flags, ignore `SIGPIPE` process-wide (spec §5
//! Descriptor discipline), and run the selector loop until it errors or the
//! process is killed.

use std::process::ExitCode;

use log::error;
use nix::sys::signal::{signal, SigHandler, Signal};

use httpd_proxy::config::{ArgError, Config};
use httpd_proxy::server::Server;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let config = match Config::parse_args(&args) {
        Ok(cfg) => cfg,
        Err(ArgError::Invalid(detail)) => {
            eprintln!("argument error: {}", detail);
            return ExitCode::from(1);
        }
    };

    // SAFETY: installs the default ignore-disposition for SIGPIPE once at
    // startup, before any socket or pipe I/O begins; write errors surface
    // as EPIPE return values instead of terminating the process.
    unsafe {
        if let Err(e) = signal(Signal::SIGPIPE, SigHandler::SigIgn) {
            error!("failed to ignore SIGPIPE: {}", e);
            return ExitCode::from(2);
        }
    }

    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("bind/listen failed: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = server.run() {
        error!("server loop exited with error: {}", e);
        return ExitCode::from(2);
    }

    ExitCode::SUCCESS
}
