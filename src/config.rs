//! Process configuration. Parsed once at startup from CLI flags and from
//! then on treated as read-only; the proxy core never mutates it.
//!
//! On-disk configuration layout and reload are out of scope (spec §1) — this
//! only covers the flags in spec §6.

use argparse::{ArgumentParser, Store, StoreTrue};

#[derive(Debug, Clone)]
pub struct Config {
    /// `-l` listen address for the HTTP proxy.
    pub listen_addr: String,
    /// `-p` listen port for the HTTP proxy.
    pub listen_port: u16,
    /// `-c` shell command piped between origin body and client response.
    /// Empty means no transform is configured.
    pub command: String,
    /// `-e` path the transformer child's stderr is redirected to.
    pub stderr_path: String,
    /// `-n` disables the transform stage outright, regardless of `-c`.
    pub no_transform: bool,
    /// Admin protocol bind address.
    pub admin_addr: String,
    /// Admin protocol bind port.
    pub admin_port: u16,
    /// Number of SCTP streams to negotiate for the admin protocol.
    pub admin_streams: u16,
    /// Selector idle-timeout, enforced with >= 1s resolution (spec §5).
    pub idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
            command: String::new(),
            stderr_path: "/dev/null".to_string(),
            no_transform: false,
            admin_addr: "0.0.0.0".to_string(),
            admin_port: 9090,
            admin_streams: 4,
            idle_timeout_secs: 30,
        }
    }
}

/// Exit code convention from spec §6: 0 normal, 1 argument error, 2
/// bind/listen failure. `parse_args` only ever produces the first two; the
/// caller maps bind failures to 2 itself.
#[derive(Debug)]
pub enum ArgError {
    Invalid(String),
}

impl Config {
    pub fn parse_args(args: &[String]) -> Result<Config, ArgError> {
        let mut cfg = Config::default();
        {
            let mut parser = ArgumentParser::new();
            parser.set_description("Forward HTTP proxy with an optional body transformer");
            parser
                .refer(&mut cfg.listen_addr)
                .add_option(&["-l"], Store, "Address to listen on");
            parser
                .refer(&mut cfg.listen_port)
                .add_option(&["-p"], Store, "Port to listen on");
            parser
                .refer(&mut cfg.command)
                .add_option(&["-c"], Store, "Shell command to filter response bodies through");
            parser
                .refer(&mut cfg.stderr_path)
                .add_option(&["-e"], Store, "Path the transformer's stderr is redirected to");
            parser
                .refer(&mut cfg.no_transform)
                .add_option(&["-n"], StoreTrue, "Disable the transform stage");
            parser
                .refer(&mut cfg.admin_port)
                .add_option(&["--admin-port"], Store, "Admin SCTP protocol port");
            match parser.parse(args.to_vec(), &mut std::io::sink(), &mut std::io::sink()) {
                Ok(()) => {}
                Err(code) => return Err(ArgError::Invalid(format!("argument error (code {})", code))),
            }
        }
        Ok(cfg)
    }

    pub fn transform_enabled(&self) -> bool {
        !self.no_transform && !self.command.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_transform_command() {
        let cfg = Config::default();
        assert!(!cfg.transform_enabled());
    }

    #[test]
    fn no_transform_flag_overrides_command() {
        let mut cfg = Config::default();
        cfg.command = "tr a-z A-Z".to_string();
        assert!(cfg.transform_enabled());
        cfg.no_transform = true;
        assert!(!cfg.transform_enabled());
    }
}
