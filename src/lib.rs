//! TCP/IPv4 stack in user-space over SLIP-framed serial lines, built for
//! learning purposes.
//!
//! The stack has three layers, each usable on its own:
//!
//! - [link]: SLIP framing (RFC 1055) over point-to-point serial lines.
//! - [net]: IPv4 forwarding with longest-prefix-match routing and ICMP Time
//!   Exceeded.
//! - [tcp]: a passive TCP endpoint with retransmission, RTT estimation, and
//!   a congestion window.
//!
//! [Node] wires them into one host or router.
//!
//! Not suitable for production use.

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

#[cfg(not(target_os = "linux"))]
compile_error!(
    "This crate is only compatible with Linux systems that support pseudo-terminals and epoll."
);

pub mod config;
pub mod error;
pub mod link;
pub mod log;
pub mod net;
pub mod node;
pub mod protocol;
pub mod tcp;

pub use config::Config;
pub use error::{Error, HeaderError, ParseError, Result};
pub use node::{Application, Node, Stream};

/// Creates a [crate::Error::Io] with a message prefixed to the `errno` value.
#[macro_export]
macro_rules! errno {
    ($($arg:tt)+) => {{
        let errno = ::std::io::Error::last_os_error();
        let prefix = format!($($arg)+);

        let msg = format!("{prefix}: {errno}");

        $crate::Error::Io(::std::io::Error::new(errno.kind(), msg))
    }};
}
